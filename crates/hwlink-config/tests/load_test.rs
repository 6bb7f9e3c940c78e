#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::path::Path;
use std::time::Duration;

use figment::Jail;
use pretty_assertions::assert_eq;

use hwlink_config::{
    Config, ConfigError, LogFormat, init_config, load_config_from, save_config_to,
};

fn load(path: &str) -> figment::error::Result<Config> {
    load_config_from(Path::new(path)).map_err(|e| e.to_string().into())
}

#[test]
fn missing_file_yields_defaults() {
    Jail::expect_with(|_jail| {
        let cfg = load("does-not-exist.toml")?;
        assert_eq!(cfg, Config::default());
        Ok(())
    });
}

#[test]
fn file_values_override_defaults() {
    Jail::expect_with(|jail| {
        jail.create_file(
            "config.toml",
            r#"
                poll_interval_ms = 5000
                derivation_path = "m/44'/5757'/1'/0/0"
                log_format = "json"
            "#,
        )?;

        let cfg = load("config.toml")?;
        assert_eq!(cfg.poll_interval_ms, 5000);
        assert_eq!(cfg.debounce_ms, 1000);
        assert_eq!(cfg.log_format, LogFormat::Json);

        let mgr = cfg.to_manager_config().expect("valid config");
        assert_eq!(mgr.poll_interval, Duration::from_secs(5));
        assert_eq!(mgr.derivation_path.to_string(), "m/44'/5757'/1'/0/0");
        Ok(())
    });
}

#[test]
fn environment_beats_file() {
    Jail::expect_with(|jail| {
        jail.create_file("config.toml", "debounce_ms = 250\nsim_seed = 3\n")?;
        jail.set_env("HWLINK_DEBOUNCE_MS", "750");
        jail.set_env("HWLINK_POLL_INTERVAL_MS", "0");

        let cfg = load("config.toml")?;
        assert_eq!(cfg.debounce_ms, 750);
        assert_eq!(cfg.poll_interval_ms, 0);
        assert_eq!(cfg.sim_seed, 3);
        Ok(())
    });
}

#[test]
fn wrongly_typed_value_fails_to_load() {
    Jail::expect_with(|jail| {
        jail.create_file("config.toml", "poll_interval_ms = \"often\"\n")?;
        let err = load_config_from(Path::new("config.toml")).expect_err("bad type");
        assert!(matches!(err, ConfigError::Figment(_)));
        Ok(())
    });
}

#[test]
fn saved_config_loads_back() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("nested").join("config.toml");
    let cfg = Config {
        poll_interval_ms: 1500,
        sim_seed: 99,
        ..Config::default()
    };

    save_config_to(&path, &cfg).expect("save");
    let raw = std::fs::read_to_string(&path).expect("read back");
    assert!(raw.contains("poll_interval_ms = 1500"));

    let loaded: Config = toml::from_str(&raw).expect("parse");
    assert_eq!(loaded, cfg);
}

#[test]
fn init_refuses_to_overwrite() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("config.toml");

    init_config(&path, false).expect("first init");
    let err = init_config(&path, false).expect_err("exists");
    assert!(matches!(err, ConfigError::AlreadyExists { .. }));
    init_config(&path, true).expect("forced init");
}
