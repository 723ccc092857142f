use serial_test::serial;
use std::env;
use std::fs;
use zai_cli::config::{AppConfig, ConfigArgs};
use zai_cli::{DispatchError, Dispatcher, transport::TransportDescriptor};

// Helper to clear environment variables that might interfere with tests
fn clear_env_vars() {
    unsafe {
        env::remove_var("ZAI_API__BASE_URL");
        env::remove_var("ZAI_TIMEOUTS__CALL_MS");
        env::remove_var("ZAI_RETRY__COUNT");
        env::remove_var("TEST_VISION_KEY");
    }
}

#[test]
#[serial]
fn test_default_config() {
    clear_env_vars();

    let config = AppConfig::load(&ConfigArgs::default()).expect("defaults should load");
    assert_eq!(config.api.base_url, "https://api.z.ai/api");
    assert_eq!(config.api.mode, "ZAI");
    assert_eq!(config.timeouts.connect_ms, 30_000);
    assert_eq!(config.timeouts.call_ms, 120_000);
    assert_eq!(config.retry.count, 0);
    assert_eq!(config.vision.command, "npx");
    assert_eq!(config.vision.args, vec!["-y", "@z_ai/mcp-server"]);
    assert!(config.require_api_key().is_err());
}

#[test]
#[serial]
fn test_env_override() {
    clear_env_vars();
    unsafe {
        env::set_var("ZAI_TIMEOUTS__CALL_MS", "9000");
        env::set_var("ZAI_RETRY__COUNT", "2");
    }

    let config = AppConfig::load(&ConfigArgs::default()).expect("Failed to load config");
    assert_eq!(config.timeouts.call_ms, 9000);
    assert_eq!(config.retry_policy().retries(), 2);

    clear_env_vars();
}

#[test]
#[serial]
fn test_cli_beats_env_and_file() {
    clear_env_vars();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("zai.yaml");
    fs::write(
        &path,
        r"
api:
  base_url: https://file.example/api
timeouts:
  call_ms: 1000
retry:
  count: 1
",
    )
    .unwrap();
    unsafe {
        env::set_var("ZAI_TIMEOUTS__CALL_MS", "2000");
    }

    let args = ConfigArgs {
        config: Some(path.display().to_string()),
        api_key: Some("cli-key".into()),
        retries: Some(4),
        ..ConfigArgs::default()
    };
    let config = AppConfig::load(&args).expect("Failed to load config from file");

    assert_eq!(config.api.base_url, "https://file.example/api");
    assert_eq!(config.timeouts.call_ms, 2000);
    assert_eq!(config.retry.count, 4);
    assert_eq!(config.require_api_key().unwrap(), "cli-key");

    clear_env_vars();
}

#[test]
#[serial]
fn test_missing_config_file_is_an_error() {
    clear_env_vars();
    let args = ConfigArgs {
        config: Some("/nonexistent/zai-config.yaml".into()),
        ..ConfigArgs::default()
    };
    assert!(AppConfig::load(&args).is_err());
}

#[tokio::test]
#[serial]
async fn test_dispatcher_from_config_with_overrides() {
    clear_env_vars();
    unsafe {
        env::set_var("TEST_VISION_KEY", "from-env");
    }
    let dir = tempfile::tempdir().unwrap();
    let overrides = dir.path().join("capabilities.json");
    fs::write(
        &overrides,
        r#"{
            "capabilities": {
                "local_vision": {
                    "command": "node",
                    "args": ["server.js"],
                    "env": { "Z_AI_API_KEY": "${TEST_VISION_KEY}" },
                    "tool": "image_analysis"
                }
            }
        }"#,
    )
    .unwrap();

    let args = ConfigArgs {
        api_key: Some("k".into()),
        capabilities: Some(overrides.display().to_string()),
        ..ConfigArgs::default()
    };
    let config = AppConfig::load(&args).unwrap();
    let dispatcher = Dispatcher::from_config(&config).unwrap();

    let route = dispatcher.table().resolve("local_vision").unwrap();
    assert_eq!(route.tool, "image_analysis");
    match &route.transport {
        TransportDescriptor::Stdio(target) => {
            assert_eq!(target.env["Z_AI_API_KEY"], "from-env");
        }
        other => panic!("expected stdio, got {other:?}"),
    }
    assert!(dispatcher.table().resolve("search").is_ok());
    assert!(matches!(
        dispatcher.table().resolve("chat"),
        Err(DispatchError::UnsupportedCapability(_))
    ));

    clear_env_vars();
}
