use super::*;
use courier_core::config::DrainPolicy;
use courier_core::session::PendingMessage;
use tempfile::tempdir;


fn args(raw: &[&str]) -> Vec<String> {
    raw.iter().map(|s| s.to_string()).collect()
}

#[test]
fn parses_config_flag_anywhere() {
    let parsed = parse_args(&args(&["courier-cli", "demo", "--config", "c.toml", "hi", "there"]))
        .expect("args");
    assert_eq!(parsed.command, "demo");
    assert_eq!(parsed.config, Some(PathBuf::from("c.toml")));
    assert_eq!(parsed.rest, vec!["hi", "there"]);
}

#[test]
fn missing_command_is_usage_error() {
    assert!(matches!(
        parse_args(&args(&["courier-cli"])),
        Err(CliError::Usage)
    ));
    assert!(matches!(
        parse_args(&args(&["courier-cli", "demo", "--config"])),
        Err(CliError::Usage)
    ));
}

#[test]
fn renders_direction_arrows() {
    let pending = PendingMessage::new(PeerId::new("bob"), "hello");
    let sent = ConversationEntry::sent(pending.id, PeerId::new("bob"), pending.text.clone());
    assert!(render(&sent).ends_with("-> hello"));
    let received = ConversationEntry::received(pending.id, PeerId::new("bob"), pending.text);
    assert!(render(&received).ends_with("<- hello"));
}

#[tokio::test]
async fn demo_runs_both_directions() {
    let cfg = demo_config().core_config().expect("core config");
    run_demo(&cfg, 8, "hello demo").await.expect("demo");
}

#[tokio::test]
async fn demo_honours_drain_one_policy() {
    let mut cfg = demo_config();
    cfg.session.drain_policy = DrainPolicy::DrainOne;
    let core = cfg.core_config().expect("core config");
    assert_eq!(core.drain_policy, DrainPolicy::DrainOne);
    run_demo(&core, cfg.session.prekey_limit, "one at a time").await.expect("demo");
}

#[test]
fn loads_config_from_disk() {
    let dir = tempdir().expect("tempdir");
    let path = dir.path().join("courier.toml");
    std::fs::write(
        &path,
        r#"
[identity]
peer_id = "carol"

[logging]
level = "debug"
"#,
    )
    .expect("write");
    let loaded = config::load_config(&path).expect("load");
    assert_eq!(loaded.identity.peer_id, "carol");
    assert_eq!(loaded.level_filter(), LevelFilter::Debug);
    assert!(matches!(
        config::load_config(&dir.path().join("missing.toml")),
        Err(ConfigError::Io(_))
    ));
}
