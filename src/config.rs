//! Application configuration management.
//!
//! Configuration is loaded from a YAML file with environment variable
//! overrides, the same `figment` layering the teacher uses: a base YAML file,
//! then `TCC_`-prefixed environment variables with `__` for nesting, then a
//! `DATABASE_URL` escape hatch that overrides `database.url` directly.

use clap::Parser;
use figment::{
    Figment,
    providers::{Env, Format, Yaml},
};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::errors::Error;

/// CLI arguments: just enough to locate and validate the config file.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Path to configuration file.
    #[arg(short = 'f', long, env = "TCC_CONFIG", default_value = "config.yaml")]
    pub config: String,

    /// Validate configuration and exit without starting the server.
    #[arg(long)]
    pub validate: bool,
}

/// Root application configuration, loaded once at startup and never mutated
/// afterward (spec.md §9's "replace process-wide mutable state with an
/// explicit context value" redesign note — `Config` is that value).
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// HTTP server host to bind to.
    pub host: String,
    /// HTTP server port to bind to.
    pub port: u16,
    /// Postgres connection string, serving as both the Persistence Gateway's
    /// store and the realization of spec.md's "remote KV store" (see
    /// DESIGN.md for the Open Question resolution).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub database_url: Option<String>,
    pub database: DatabaseConfig,
    /// Path prefix the inbound TCC handler is mounted under.
    pub tcc_prefix: String,
    pub reconciler: ReconcilerConfig,
    pub alerter: AlerterConfig,
    #[serde(with = "humantime_serde")]
    pub default_participant_timeout: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            database_url: None,
            database: DatabaseConfig::default(),
            tcc_prefix: "/tcc".to_string(),
            reconciler: ReconcilerConfig::default(),
            alerter: AlerterConfig::default(),
            default_participant_timeout: Duration::from_secs(5),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct DatabaseConfig {
    pub url: String,
    pub pool: PoolSettings,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "postgres://localhost/tcc_coordinator".to_string(),
            pool: PoolSettings::default(),
        }
    }
}

/// Connection pool tuning, mirroring the teacher's `PoolSettings`.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct PoolSettings {
    pub max_connections: u32,
    pub min_connections: u32,
    pub acquire_timeout_secs: u64,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            max_connections: 10,
            min_connections: 1,
            acquire_timeout_secs: 10,
        }
    }
}

/// Reconciler tuning (spec.md §4.6, §7 "Operator configuration").
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct ReconcilerConfig {
    #[serde(with = "humantime_serde")]
    pub interval: Duration,
    /// `times >= retry_threshold` triggers the first alert for a row.
    pub retry_threshold: i32,
    /// Exceptional row count above which an aggregate alert also fires.
    pub max_exceptional_data: usize,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(30),
            retry_threshold: 5,
            max_exceptional_data: 100,
        }
    }
}

/// Alert recipient and sender identity (spec.md §7).
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct AlerterConfig {
    pub smtp_host: Option<String>,
    pub smtp_port: u16,
    pub smtp_username: Option<String>,
    pub smtp_password: Option<String>,
    pub from_address: String,
    pub recipients: Vec<String>,
}

impl Default for AlerterConfig {
    fn default() -> Self {
        Self {
            smtp_host: None,
            smtp_port: 587,
            smtp_username: None,
            smtp_password: None,
            from_address: "tcc-coordinator@localhost".to_string(),
            recipients: Vec::new(),
        }
    }
}

impl Config {
    #[allow(clippy::result_large_err)]
    pub fn load(args: &Args) -> Result<Self, figment::Error> {
        let mut config: Self = Self::figment(args).extract()?;

        if let Some(url) = config.database_url.take() {
            config.database.url = url;
        }

        config.validate().map_err(|e| figment::Error::from(e.to_string()))?;
        Ok(config)
    }

    pub fn figment(args: &Args) -> Figment {
        Figment::new()
            .merge(Yaml::file(&args.config))
            .merge(Env::prefixed("TCC_").split("__"))
            .merge(Env::raw().only(&["DATABASE_URL"]).map(|_| "database_url".into()))
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Validates cross-field invariants clap/serde can't express on their own.
    pub fn validate(&self) -> Result<(), Error> {
        if self.reconciler.retry_threshold < 1 {
            return Err(Error::Config {
                message: "reconciler.retry_threshold must be at least 1".to_string(),
            });
        }
        if !self.tcc_prefix.starts_with('/') {
            return Err(Error::Config {
                message: "tcc_prefix must start with '/'".to_string(),
            });
        }
        if self.alerter.smtp_host.is_some() && self.alerter.recipients.is_empty() {
            return Err(Error::Config {
                message: "alerter.smtp_host is set but alerter.recipients is empty".to_string(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use figment::Jail;

    #[test]
    fn loads_defaults_from_minimal_yaml() {
        Jail::expect_with(|jail| {
            jail.create_file("test.yaml", "database:\n  url: postgres://test/db\n")?;
            let args = Args {
                config: "test.yaml".to_string(),
                validate: false,
            };
            let config = Config::load(&args).unwrap();
            assert_eq!(config.port, 8080);
            assert_eq!(config.tcc_prefix, "/tcc");
            Ok(())
        });
    }

    #[test]
    fn database_url_env_overrides_yaml() {
        Jail::expect_with(|jail| {
            jail.create_file("test.yaml", "database:\n  url: postgres://yaml/db\n")?;
            jail.set_env("DATABASE_URL", "postgres://env/db");
            let args = Args {
                config: "test.yaml".to_string(),
                validate: false,
            };
            let config = Config::load(&args).unwrap();
            assert_eq!(config.database.url, "postgres://env/db");
            Ok(())
        });
    }

    #[test]
    fn rejects_prefix_without_leading_slash() {
        Jail::expect_with(|jail| {
            jail.create_file("test.yaml", "database:\n  url: postgres://test/db\ntcc_prefix: tcc\n")?;
            let args = Args {
                config: "test.yaml".to_string(),
                validate: false,
            };
            assert!(Config::load(&args).is_err());
            Ok(())
        });
    }
}
