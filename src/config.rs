//! Layered service configuration.
//!
//! Priority, lowest first: built-in defaults, config file, `GATED__*`
//! environment variables, legacy flat variables, CLI flags.

use std::env;
use std::path::Path;
use std::time::Duration;

use clap::Parser;
use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

use crate::run::{HttpRunSettings, RunSettings};

const ENV_PREFIX: &str = "GATED";
const DEFAULT_CONFIG_FILE: &str = "gated-agents.yaml";

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Config file path
    #[arg(short, long, env = "CONFIG_FILE")]
    pub config: Option<String>,

    /// Port to listen on
    #[arg(long, env = "PORT")]
    pub port: Option<u16>,

    /// Remote run service base URL
    #[arg(long)]
    pub remote_endpoint: Option<String>,

    /// Score at or above which a review escalates
    #[arg(long)]
    pub review_threshold: Option<u8>,

    /// Generation attempts before a draft is handed to a human
    #[arg(long)]
    pub max_iterations: Option<u32>,

    /// Log output format (pretty or json)
    #[arg(long)]
    pub log_format: Option<LogFormat>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub remote: RemoteConfig,
    pub run: RunConfig,
    pub quality: QualityConfig,
    pub context: ContextConfig,
    pub triage: TriageConfig,
    pub safety: SafetyConfig,
    pub actions: ActionsConfig,
    pub log: LogConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RemoteConfig {
    pub endpoint: Option<String>,
    pub api_key: Option<String>,
    pub api_version: String,
    pub model: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RunConfig {
    pub poll_interval_ms: u64,
    pub max_polls: u32,
    /// Upper bound on any single call to the run service.
    pub request_timeout_ms: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct QualityConfig {
    pub review_threshold: u8,
    pub max_iterations: u32,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ContextConfig {
    pub endpoint: Option<String>,
    pub api_key: Option<String>,
    pub window_days: u32,
    pub lang: String,
}

/// Deterministic triage classifier tried before the triage agent.
#[derive(Debug, Deserialize, Clone)]
pub struct TriageConfig {
    pub endpoint: Option<String>,
    pub api_key: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SafetyConfig {
    pub endpoint: Option<String>,
    pub api_key: Option<String>,
    pub api_version: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ActionsConfig {
    pub webhook_url: Option<String>,
    pub publish_attempts: u32,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LogConfig {
    pub format: LogFormat,
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

impl LogFormat {
    fn as_str(self) -> &'static str {
        match self {
            Self::Pretty => "pretty",
            Self::Json => "json",
        }
    }
}

impl AppConfig {
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from_args(env::args())
    }

    pub fn load_from_args<I, T>(args: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = T>,
        T: Into<std::ffi::OsString> + Clone,
    {
        let cli = Cli::try_parse_from(args).map_err(|e| ConfigError::Message(e.to_string()))?;

        let mut builder = Config::builder()
            .set_default("server.host", "0.0.0.0")?
            .set_default("server.port", 8080)?
            .set_default("remote.api_version", "v1")?
            .set_default("remote.model", "gpt-4o-mini")?
            .set_default("run.poll_interval_ms", 1000)?
            .set_default("run.max_polls", 120)?
            .set_default("run.request_timeout_ms", 30_000)?
            .set_default("quality.review_threshold", 70)?
            .set_default("quality.max_iterations", 3)?
            .set_default("context.window_days", 30)?
            .set_default("context.lang", "en")?
            .set_default("safety.api_version", "2023-10-01")?
            .set_default("actions.publish_attempts", 2)?
            .set_default("log.format", LogFormat::Pretty.as_str())?;

        match cli.config.as_deref() {
            Some(path) => builder = builder.add_source(File::with_name(path)),
            None if Path::new(DEFAULT_CONFIG_FILE).exists() => {
                builder = builder.add_source(File::with_name(DEFAULT_CONFIG_FILE));
            }
            None => {}
        }

        // GATED__QUALITY__REVIEW_THRESHOLD=80
        builder = builder.add_source(
            Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        );

        for (var, key) in [
            ("REVIEW_THRESHOLD", "quality.review_threshold"),
            ("MAX_ITERATIONS", "quality.max_iterations"),
        ] {
            if let Ok(val) = env::var(var) {
                let parsed = val
                    .trim()
                    .parse::<i64>()
                    .map_err(|e| ConfigError::Message(format!("{var}: {e}")))?;
                builder = builder.set_override(key, parsed)?;
            }
        }

        if let Some(port) = cli.port {
            builder = builder.set_override("server.port", port)?;
        }
        if let Some(endpoint) = cli.remote_endpoint {
            builder = builder.set_override("remote.endpoint", endpoint)?;
        }
        if let Some(threshold) = cli.review_threshold {
            builder = builder.set_override("quality.review_threshold", threshold)?;
        }
        if let Some(max) = cli.max_iterations {
            builder = builder.set_override("quality.max_iterations", max)?;
        }
        if let Some(format) = cli.log_format {
            builder = builder.set_override("log.format", format.as_str())?;
        }

        let config: Self = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.quality.review_threshold > 100 {
            return Err(ConfigError::Message(format!(
                "quality.review_threshold must be within 0..=100, got {}",
                self.quality.review_threshold
            )));
        }
        if self.quality.max_iterations == 0 {
            return Err(ConfigError::Message("quality.max_iterations must be at least 1".into()));
        }
        if self.run.max_polls == 0 {
            return Err(ConfigError::Message("run.max_polls must be at least 1".into()));
        }
        if self.run.request_timeout_ms == 0 {
            return Err(ConfigError::Message("run.request_timeout_ms must be at least 1".into()));
        }
        if self.actions.publish_attempts == 0 {
            return Err(ConfigError::Message("actions.publish_attempts must be at least 1".into()));
        }
        Ok(())
    }

    pub fn run_settings(&self) -> RunSettings {
        RunSettings {
            poll_interval: Duration::from_millis(self.run.poll_interval_ms),
            max_polls: self.run.max_polls,
            request_timeout: Duration::from_millis(self.run.request_timeout_ms),
        }
    }

    /// Transport settings for the remote run service, if an endpoint is set.
    pub fn remote_settings(&self) -> Option<HttpRunSettings> {
        let endpoint = non_empty(self.remote.endpoint.as_deref())?;
        Some(HttpRunSettings {
            endpoint: endpoint.to_string(),
            api_key: self.remote.api_key.clone(),
            api_version: self.remote.api_version.clone(),
            timeout: Duration::from_millis(self.run.request_timeout_ms),
        })
    }
}

pub(crate) fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> AppConfig {
        AppConfig {
            server: ServerConfig {
                host: "127.0.0.1".into(),
                port: 8080,
            },
            remote: RemoteConfig {
                endpoint: Some("  ".into()),
                api_key: None,
                api_version: "v1".into(),
                model: "m".into(),
            },
            run: RunConfig {
                poll_interval_ms: 250,
                max_polls: 4,
                request_timeout_ms: 5_000,
            },
            quality: QualityConfig {
                review_threshold: 70,
                max_iterations: 3,
            },
            context: ContextConfig {
                endpoint: None,
                api_key: None,
                window_days: 30,
                lang: "en".into(),
            },
            triage: TriageConfig {
                endpoint: None,
                api_key: None,
            },
            safety: SafetyConfig {
                endpoint: None,
                api_key: None,
                api_version: "2023-10-01".into(),
            },
            actions: ActionsConfig {
                webhook_url: None,
                publish_attempts: 2,
            },
            log: LogConfig {
                format: LogFormat::Pretty,
            },
        }
    }

    #[test]
    fn validate_rejects_out_of_range_values() {
        assert!(base().validate().is_ok());

        let mut cfg = base();
        cfg.quality.review_threshold = 101;
        assert!(cfg.validate().is_err());

        let mut cfg = base();
        cfg.quality.max_iterations = 0;
        assert!(cfg.validate().is_err());

        let mut cfg = base();
        cfg.run.max_polls = 0;
        assert!(cfg.validate().is_err());

        let mut cfg = base();
        cfg.run.request_timeout_ms = 0;
        assert!(cfg.validate().is_err());

        let mut cfg = base();
        cfg.actions.publish_attempts = 0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn blank_remote_endpoint_is_unset() {
        let mut cfg = base();
        assert!(cfg.remote_settings().is_none());

        cfg.remote.endpoint = Some("https://runs.example.test".into());
        let settings = cfg.remote_settings().unwrap();
        assert_eq!(settings.endpoint, "https://runs.example.test");
        assert_eq!(settings.api_version, "v1");
        assert_eq!(settings.timeout, Duration::from_secs(5));
    }

    #[test]
    fn run_settings_convert_interval() {
        let settings = base().run_settings();
        assert_eq!(settings.poll_interval, Duration::from_millis(250));
        assert_eq!(settings.max_polls, 4);
        assert_eq!(settings.request_timeout, Duration::from_secs(5));
    }
}
