use std::sync::Mutex;

use tempfile::{Builder, NamedTempFile};

use watcher_agent::config::AgentConfig;

static ENV_LOCK: Mutex<()> = Mutex::new(());

fn clear_env() {
    for key in [
        "WATCHER_CONFIG",
        "WATCHER_SERVER_HOST",
        "WATCHER_SERVER_PORT",
        "WATCHER_SOURCE",
        "WATCHER_SCORE_THRESHOLD",
        "WATCHER_LABELS",
        "WATCHER_PACKET_CAPACITY",
    ] {
        std::env::remove_var(key);
    }
}

#[test]
fn loads_config_from_file_and_env_overrides() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let mut file = NamedTempFile::new().expect("temp config");
    let json = r#"{
        "server": { "host": "aggregator.local", "port": 7000 },
        "source": { "uri": "stub://static", "width": 320, "height": 240, "target_fps": 12 },
        "detector": { "score_threshold": 0.6, "labels": ["car"], "diff_threshold": 25 },
        "assets": { "model_key": "models/ssd.onnx", "retry_delay_ms": 500 },
        "wire": { "packet_capacity": 65536 },
        "upload": { "jpeg_quality": 70, "scale": 0.25, "settings_poll_secs": 2 }
    }"#;
    std::io::Write::write_all(&mut file, json.as_bytes()).expect("write config");

    std::env::set_var("WATCHER_CONFIG", file.path());
    std::env::set_var("WATCHER_SERVER_PORT", "7100");
    std::env::set_var("WATCHER_LABELS", "person, bicycle");

    let cfg = AgentConfig::load().expect("load config");

    assert_eq!(cfg.server.host, "aggregator.local");
    assert_eq!(cfg.server.port, 7100);
    assert_eq!(cfg.source.uri, "stub://static");
    assert_eq!((cfg.source.width, cfg.source.height), (320, 240));
    assert_eq!(cfg.source.target_fps, 12);
    assert_eq!(cfg.detector.score_threshold, 0.6);
    assert_eq!(cfg.detector.labels, vec!["person", "bicycle"]);
    assert_eq!(cfg.detector.diff_threshold, 25);
    assert_eq!(cfg.detector.override_interval_ms, 3000);
    assert_eq!(cfg.assets.model_key, "models/ssd.onnx");
    assert_eq!(cfg.assets.labelmap_key, "model/labelmap.txt");
    assert_eq!(cfg.assets.retry_delay.as_millis(), 500);
    assert_eq!(cfg.packet_capacity, 65536);
    assert_eq!(cfg.upload.jpeg_quality, 70);
    assert_eq!(cfg.upload.scale, 0.25);
    assert_eq!(cfg.upload.settings_poll.as_secs(), 2);

    let upload = cfg.upload_config();
    assert_eq!(upload.packet_capacity, 65536);

    clear_env();
}

#[test]
fn loads_toml_config_by_extension() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let mut file = Builder::new().suffix(".toml").tempfile().expect("temp config");
    let toml = r#"
[server]
host = "10.0.0.2"

[detector]
labels = ["cat"]
override_interval_ms = 1500
"#;
    std::io::Write::write_all(&mut file, toml.as_bytes()).expect("write config");

    let cfg = AgentConfig::load_from(Some(file.path())).expect("load config");
    assert_eq!(cfg.server.host, "10.0.0.2");
    assert_eq!(cfg.server.port, 9000);
    assert_eq!(cfg.detector.labels, vec!["cat"]);
    assert_eq!(cfg.motion_config().override_interval_ms, 1500);

    clear_env();
}

#[test]
fn rejects_invalid_values() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    std::env::set_var("WATCHER_SCORE_THRESHOLD", "1.5");
    assert!(AgentConfig::load().is_err());
    clear_env();

    std::env::set_var("WATCHER_SERVER_PORT", "not-a-port");
    assert!(AgentConfig::load().is_err());
    clear_env();

    std::env::set_var("WATCHER_PACKET_CAPACITY", "16");
    assert!(AgentConfig::load().is_err());
    clear_env();

    std::env::set_var("WATCHER_SERVER_HOST", "   ");
    let cfg = AgentConfig::load().expect("blank host override is ignored");
    assert_eq!(cfg.server.host, "127.0.0.1");
    clear_env();
}

#[test]
fn missing_config_file_is_an_error() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    std::env::set_var("WATCHER_CONFIG", "/nonexistent/watcher.json");
    let err = AgentConfig::load().unwrap_err();
    assert!(err.to_string().contains("failed to read config file"));

    clear_env();
}

#[test]
fn command_line_overrides_are_validated() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let mut cfg = AgentConfig::load().expect("load defaults");
    cfg.override_with(Some(" 192.168.1.20 "), Some(8088), Some("stub://static"))
        .expect("valid overrides");
    assert_eq!(cfg.server.host, "192.168.1.20");
    assert_eq!(cfg.server.port, 8088);
    assert_eq!(cfg.source.uri, "stub://static");

    let mut cfg = AgentConfig::load().expect("load defaults");
    assert!(cfg.override_with(Some("  "), None, None).is_err());

    let mut cfg = AgentConfig::load().expect("load defaults");
    assert!(cfg.override_with(None, Some(0), None).is_err());

    let mut cfg = AgentConfig::load().expect("load defaults");
    assert!(cfg.override_with(None, None, Some("")).is_err());

    clear_env();
}
