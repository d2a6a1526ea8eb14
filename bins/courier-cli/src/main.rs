mod config;

use config::{ConfigError, CourierConfig, IdentityConfig, LoggingConfig, SessionConfig};
use courier_core::config::CoreConfig;
use courier_core::conversation::{ConversationEntry, Direction};
use courier_core::crypto::X3dhProvider;
use courier_core::error::CoreError;
use courier_core::ids::PeerId;
use courier_core::presence::PeerSummary;
use courier_core::relay::InMemoryRelay;
use courier_core::Core;
use log::{info, LevelFilter};
use std::path::PathBuf;
use std::sync::Arc;

const DEMO_PEER: &str = "demo-peer";
const SETTLE_ROUNDS: usize = 16;

#[derive(thiserror::Error, Debug)]
enum CliError {
    #[error("config: {0}")]
    Config(#[from] ConfigError),
    #[error("core: {0}")]
    Core(#[from] CoreError),
    #[error("usage: courier-cli [--config <path>] <demo <text...>|check-config>")]
    Usage,
}

struct Args {
    config: Option<PathBuf>,
    command: String,
    rest: Vec<String>,
}

fn parse_args(raw: &[String]) -> Result<Args, CliError> {
    let mut config = None;
    let mut positional = Vec::new();
    let mut i = 1;
    while i < raw.len() {
        if raw[i] == "--config" {
            let path = raw.get(i + 1).ok_or(CliError::Usage)?;
            config = Some(PathBuf::from(path));
            i += 2;
            continue;
        }
        positional.push(raw[i].clone());
        i += 1;
    }
    if positional.is_empty() {
        return Err(CliError::Usage);
    }
    let command = positional.remove(0);
    Ok(Args {
        config,
        command,
        rest: positional,
    })
}

#[tokio::main]
async fn main() -> Result<(), CliError> {
    let raw: Vec<String> = std::env::args().collect();
    let args = parse_args(&raw)?;
    let cfg = match &args.config {
        Some(path) => config::load_config(path)?,
        None => demo_config(),
    };
    match args.command.as_str() {
        "check-config" => {
            cfg.validate()?;
            println!("config ok peer={}", cfg.identity.peer_id);
            Ok(())
        }
        "demo" => {
            if args.rest.is_empty() {
                return Err(CliError::Usage);
            }
            init_logging(cfg.level_filter());
            run_demo(
                &cfg.core_config()?,
                cfg.session.prekey_limit,
                &args.rest.join(" "),
            )
            .await
        }
        _ => Err(CliError::Usage),
    }
}

fn demo_config() -> CourierConfig {
    CourierConfig {
        identity: IdentityConfig {
            peer_id: "alice".to_string(),
            username: None,
        },
        session: SessionConfig::default(),
        logging: LoggingConfig::default(),
    }
}

fn init_logging(level: LevelFilter) {
    let _ = env_logger::Builder::from_default_env()
        .filter_level(level)
        .try_init();
}

async fn run_demo(local: &CoreConfig, prekey_limit: usize, text: &str) -> Result<(), CliError> {
    let hub = InMemoryRelay::new();
    let remote_id = PeerId::new(DEMO_PEER);
    let remote_cfg = CoreConfig {
        drain_policy: local.drain_policy,
        ..CoreConfig::for_peer(remote_id.clone(), DEMO_PEER)
    };
    hub.connect(PeerSummary::new(local.local_id.clone(), &local.username, true))
        .await;
    hub.connect(PeerSummary::new(remote_id.clone(), DEMO_PEER, true))
        .await;
    let mut local_cfg = local.clone();
    local_cfg.polling_interval_ms = 0;
    let me = Core::init(
        local_cfg,
        Arc::new(X3dhProvider::with_prekey_limit(prekey_limit)),
        Arc::new(hub.clone()),
    )
    .await?;
    let them = Core::init(
        remote_cfg,
        Arc::new(X3dhProvider::with_prekey_limit(prekey_limit)),
        Arc::new(hub.clone()),
    )
    .await?;

    me.send_text(&remote_id, text).await?;
    settle(&me, &them).await?;
    them.send_text(me.local_id(), &format!("ack: {text}")).await?;
    settle(&me, &them).await?;
    info!(
        "demo finished sessions={} remote_sessions={}",
        me.session_count().await,
        them.session_count().await
    );

    print_logs(&me).await;
    print_logs(&them).await;
    me.teardown().await?;
    them.teardown().await?;
    Ok(())
}

async fn settle(a: &Core, b: &Core) -> Result<(), CliError> {
    for _ in 0..SETTLE_ROUNDS {
        let moved = a.poll_once().await? + b.poll_once().await?;
        if moved == 0 {
            break;
        }
    }
    Ok(())
}

async fn print_logs(core: &Core) {
    for peer in core.conversation_peers().await {
        println!("== {} <-> {}", core.local_id(), peer);
        for entry in core.history(&peer).await {
            println!("{}", render(&entry));
        }
    }
}

fn render(entry: &ConversationEntry) -> String {
    let arrow = match entry.direction {
        Direction::Sent => "->",
        Direction::Received => "<-",
    };
    format!("{} {} {}", entry.at_ms, arrow, entry.payload)
}

#[cfg(test)]
mod tests;
