use std::{fmt::Display, fs, io, path::Path, str::FromStr, time::Duration};

use anyhow::Context;
use client_core::{
    types::DISPLAY_HOST,
    BackoffPolicy, ControllerConfig,
};
use serde::Deserialize;
use tracing::warn;

const ENV_PREFIX: &str = "AGENT__";

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub identity: Option<String>,
    pub endpoint: Option<String>,
    pub control_port: u16,
    pub backend_url: String,
    pub image_ref: String,
    pub host_port: u16,
    pub container_port: u16,
    pub settle_delay_secs: u64,
    pub backoff_base_secs: u64,
    pub max_retries: u32,
    pub provisioning_timeout_secs: u64,
    pub connect_timeout_secs: u64,
}

impl Default for Settings {
    fn default() -> Self {
        let config = ControllerConfig::default();
        Self {
            identity: None,
            endpoint: None,
            control_port: config.control_port,
            backend_url: config.backend_url,
            image_ref: config.image_ref,
            host_port: config.host_port,
            container_port: config.container_port,
            settle_delay_secs: config.settle_delay.as_secs(),
            backoff_base_secs: config.backoff.base.as_secs(),
            max_retries: config.backoff.max_retries,
            provisioning_timeout_secs: config.provisioning_timeout.as_secs(),
            connect_timeout_secs: config.connect_timeout.as_secs(),
        }
    }
}

impl Settings {
    pub fn controller_config(&self) -> ControllerConfig {
        ControllerConfig {
            control_port: self.control_port,
            backend_url: self.backend_url.clone(),
            image_ref: self.image_ref.clone(),
            host_port: self.host_port,
            container_port: self.container_port,
            display_host: DISPLAY_HOST.into(),
            settle_delay: Duration::from_secs(self.settle_delay_secs),
            backoff: BackoffPolicy {
                base: Duration::from_secs(self.backoff_base_secs),
                max_retries: self.max_retries,
            },
            provisioning_timeout: Duration::from_secs(self.provisioning_timeout_secs),
            connect_timeout: Duration::from_secs(self.connect_timeout_secs),
        }
    }
}

/// Defaults, then the optional TOML file at `path`, then `AGENT__*` variables.
pub fn load_settings(path: &Path) -> anyhow::Result<Settings> {
    let settings = match fs::read_to_string(path) {
        Ok(raw) => toml::from_str::<Settings>(&raw)
            .with_context(|| format!("failed to parse settings file '{}'", path.display()))?,
        Err(err) if err.kind() == io::ErrorKind::NotFound => Settings::default(),
        Err(err) => {
            return Err(err)
                .with_context(|| format!("failed to read settings file '{}'", path.display()))
        }
    };
    Ok(apply_env_overrides(settings, |key| std::env::var(key).ok()))
}

fn apply_env_overrides(
    mut settings: Settings,
    lookup: impl Fn(&str) -> Option<String>,
) -> Settings {
    let var = |name: &str| lookup(&format!("{ENV_PREFIX}{name}"));

    if let Some(v) = var("IDENTITY") {
        settings.identity = Some(v);
    }
    if let Some(v) = var("ENDPOINT") {
        settings.endpoint = Some(v);
    }
    if let Some(v) = var("BACKEND_URL") {
        settings.backend_url = v;
    }
    if let Some(v) = var("IMAGE_REF") {
        settings.image_ref = v;
    }
    parse_override("CONTROL_PORT", var("CONTROL_PORT"), &mut settings.control_port);
    parse_override("HOST_PORT", var("HOST_PORT"), &mut settings.host_port);
    parse_override(
        "CONTAINER_PORT",
        var("CONTAINER_PORT"),
        &mut settings.container_port,
    );
    parse_override(
        "SETTLE_DELAY_SECS",
        var("SETTLE_DELAY_SECS"),
        &mut settings.settle_delay_secs,
    );
    parse_override(
        "BACKOFF_BASE_SECS",
        var("BACKOFF_BASE_SECS"),
        &mut settings.backoff_base_secs,
    );
    parse_override("MAX_RETRIES", var("MAX_RETRIES"), &mut settings.max_retries);
    parse_override(
        "PROVISIONING_TIMEOUT_SECS",
        var("PROVISIONING_TIMEOUT_SECS"),
        &mut settings.provisioning_timeout_secs,
    );
    parse_override(
        "CONNECT_TIMEOUT_SECS",
        var("CONNECT_TIMEOUT_SECS"),
        &mut settings.connect_timeout_secs,
    );

    settings
}

fn parse_override<T>(name: &str, raw: Option<String>, target: &mut T)
where
    T: FromStr,
    T::Err: Display,
{
    let Some(raw) = raw else {
        return;
    };
    match raw.trim().parse::<T>() {
        Ok(parsed) => *target = parsed,
        Err(err) => warn!(
            variable = %format!("{ENV_PREFIX}{name}"),
            value = %raw,
            error = %err,
            "config: ignoring unparsable override"
        ),
    }
}

#[cfg(test)]
mod tests {
    use std::{
        collections::HashMap,
        env,
        time::{SystemTime, UNIX_EPOCH},
    };

    use super::*;

    fn temp_path(name: &str) -> std::path::PathBuf {
        let suffix = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos();
        env::temp_dir().join(format!("agent_config_test_{suffix}_{name}"))
    }

    #[test]
    fn defaults_match_fixed_constants() {
        let config = Settings::default().controller_config();
        assert_eq!(config.control_port, 8000);
        assert_eq!(config.host_port, 8080);
        assert_eq!(config.container_port, 5900);
        assert_eq!(config.settle_delay, Duration::from_secs(3));
        assert_eq!(config.backoff.base, Duration::from_secs(2));
        assert_eq!(config.backoff.max_retries, 3);
        assert_eq!(config.backend_url, "http://127.0.0.1:8001");
        assert_eq!(config.provisioning_timeout, Duration::from_secs(60));
        assert_eq!(config.connect_timeout, Duration::from_secs(10));
    }

    #[test]
    fn controller_config_carries_backend_settings() {
        let settings = Settings {
            backend_url: "http://10.0.0.9:9001".into(),
            provisioning_timeout_secs: 5,
            connect_timeout_secs: 2,
            ..Settings::default()
        };

        let config = settings.controller_config();

        assert_eq!(config.backend_url, "http://10.0.0.9:9001");
        assert_eq!(config.provisioning_timeout, Duration::from_secs(5));
        assert_eq!(config.connect_timeout, Duration::from_secs(2));
    }

    #[test]
    fn missing_file_yields_defaults() {
        let settings = load_settings(&temp_path("missing.toml")).expect("settings");
        assert_eq!(settings.control_port, Settings::default().control_port);
    }

    #[test]
    fn file_values_override_defaults() {
        let path = temp_path("agent.toml");
        fs::write(
            &path,
            "identity = \"Lab PC 1\"\nendpoint = \"10.0.0.5\"\nhost_port = 9090\n",
        )
        .expect("write");

        let settings = load_settings(&path).expect("settings");
        fs::remove_file(&path).expect("cleanup");

        assert_eq!(settings.identity.as_deref(), Some("Lab PC 1"));
        assert_eq!(settings.endpoint.as_deref(), Some("10.0.0.5"));
        assert_eq!(settings.host_port, 9090);
        assert_eq!(settings.container_port, 5900);
    }

    #[test]
    fn malformed_file_is_an_error() {
        let path = temp_path("broken.toml");
        fs::write(&path, "host_port = \"not a port\"\n").expect("write");

        let result = load_settings(&path);
        fs::remove_file(&path).expect("cleanup");

        assert!(result.is_err());
    }

    #[test]
    fn env_overrides_win_and_bad_values_are_ignored() {
        let vars: HashMap<String, String> = [
            ("AGENT__ENDPOINT", "192.168.1.20"),
            ("AGENT__MAX_RETRIES", "5"),
            ("AGENT__HOST_PORT", "eighty"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();

        let settings = apply_env_overrides(Settings::default(), |key| vars.get(key).cloned());

        assert_eq!(settings.endpoint.as_deref(), Some("192.168.1.20"));
        assert_eq!(settings.max_retries, 5);
        assert_eq!(settings.host_port, 8080);
    }
}
