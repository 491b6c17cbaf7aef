#![allow(clippy::unwrap_used)]

use std::path::Path;
use std::time::Duration;

use figment::Jail;
use gatewatch_config::{ConfigError, load};
use pretty_assertions::assert_eq;
use secrecy::ExposeSecret;

fn check(err: ConfigError) -> figment::Error {
    figment::Error::from(err.to_string())
}

#[test]
fn missing_file_yields_defaults() {
    Jail::expect_with(|_jail| {
        let config = load(Some(Path::new("absent.toml"))).map_err(check)?;
        let resolved = config.resolve().map_err(check)?;
        assert_eq!(resolved.mqtt.host, "localhost");
        assert_eq!(resolved.monitor.topics.control, "gate/mac_config");
        assert!(resolved.gates.is_empty());
        Ok(())
    });
}

#[test]
fn file_values_override_defaults() {
    Jail::expect_with(|jail| {
        jail.create_file(
            "gatewatch.toml",
            r#"
                [broker]
                host = "mosquitto"
                port = 1884

                [reconnect]
                busy_backoff_secs = 15
                max_attempts = 8

                [[gates]]
                name = "gate1"
                address = "aa:bb:cc:dd:ee:ff"
                topic = "gate1/ir"

                [[gates]]
                name = "gate2"
                address = "AA-BB-CC-DD-EE-01"
                topic = "gate2/ir"
            "#,
        )?;

        let resolved = load(Some(Path::new("gatewatch.toml")))
            .map_err(check)?
            .resolve()
            .map_err(check)?;

        assert_eq!(resolved.mqtt.host, "mosquitto");
        assert_eq!(resolved.mqtt.port, 1884);
        assert_eq!(resolved.monitor.reconnect.busy_backoff, Duration::from_secs(15));
        assert_eq!(resolved.monitor.reconnect.max_attempts, Some(8));
        assert_eq!(resolved.monitor.reconnect.retry_backoff, Duration::from_secs(5));

        let addresses: Vec<_> = resolved
            .gates
            .iter()
            .map(|g| g.address().to_string())
            .collect();
        assert_eq!(addresses, ["AA:BB:CC:DD:EE:FF", "AA:BB:CC:DD:EE:01"]);
        Ok(())
    });
}

#[test]
fn prefixed_env_overrides_file() {
    Jail::expect_with(|jail| {
        jail.create_file("gatewatch.toml", "[broker]\nport = 1884\n")?;
        jail.set_env("GATEWATCH_BROKER__PORT", "1999");
        jail.set_env("GATEWATCH_BROKER__PASSWORD", "hunter2");
        jail.set_env("GATEWATCH_SESSIONS__START_STAGGER_SECS", "1");

        let resolved = load(Some(Path::new("gatewatch.toml")))
            .map_err(check)?
            .resolve()
            .map_err(check)?;

        assert_eq!(resolved.mqtt.port, 1999);
        assert_eq!(
            resolved.mqtt.password.as_ref().map(|p| p.expose_secret().to_owned()),
            Some("hunter2".to_owned())
        );
        assert_eq!(resolved.monitor.start_stagger, Duration::from_secs(1));
        Ok(())
    });
}

#[test]
fn legacy_broker_variables_win() {
    Jail::expect_with(|jail| {
        jail.set_env("GATEWATCH_BROKER__HOST", "from-prefixed");
        jail.set_env("MQTT_BROKER", "from-legacy");
        jail.set_env("MQTT_PORT", "8883");

        let resolved = load(Some(Path::new("absent.toml")))
            .map_err(check)?
            .resolve()
            .map_err(check)?;

        assert_eq!(resolved.mqtt.host, "from-legacy");
        assert_eq!(resolved.mqtt.port, 8883);
        Ok(())
    });
}

#[test]
fn invalid_gate_in_file_is_reported() {
    Jail::expect_with(|jail| {
        jail.create_file(
            "gatewatch.toml",
            r#"
                [[gates]]
                name = "gate1"
                address = "not-a-mac"
                topic = "gate1/ir"
            "#,
        )?;

        let config = load(Some(Path::new("gatewatch.toml"))).map_err(check)?;
        let err = config.resolve().unwrap_err();
        assert!(err.to_string().starts_with("invalid gates[0]:"), "{err}");
        Ok(())
    });
}

#[test]
fn malformed_toml_is_a_load_error() {
    Jail::expect_with(|jail| {
        jail.create_file("broken.toml", "[broker\nport = ")?;
        let err = load(Some(Path::new("broken.toml"))).unwrap_err();
        assert!(matches!(err, ConfigError::Figment(_)));
        Ok(())
    });
}

#[test]
fn rendered_toml_reloads() {
    Jail::expect_with(|_jail| {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rendered.toml");
        let mut config = gatewatch_config::Config::default();
        config.broker.host = "broker.lan".into();
        config.reconnect.max_attempts = Some(4);
        std::fs::write(&path, config.to_toml().map_err(check)?).unwrap();

        let reloaded = load(Some(&path)).map_err(check)?;
        assert_eq!(reloaded.broker.host, "broker.lan");
        assert_eq!(reloaded.reconnect.max_attempts, Some(4));
        Ok(())
    });
}
