//! Process configuration from environment variables.
//!
//! | Variable | Default |
//! |----------|---------|
//! | `DATABASE_URL` | required when `PGWS_UPSTREAM=postgres` |
//! | `PGWS_UPSTREAM` | `postgres` (`memory` for dev) |
//! | `PGWS_BIND_ADDR` | `0.0.0.0:8080` |
//! | `PGWS_WS_PATH` | `/ws` |
//! | `PGWS_CHANNELS` | `pgwebsocket` |
//! | `PGWS_AUDIENCE` | `fixed:default` |
//! | `PGWS_MAX_AUDIENCE_LEN` | `36` |
//! | `PGWS_OUTBOUND_QUEUE` | `64` |
//! | `PGWS_MIN_RECONNECT_SECS` | `10` |
//! | `PGWS_MAX_RECONNECT_SECS` | `60` |

use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

use pgws_events::{DEFAULT_MAX_AUDIENCE_LEN, EnvelopeCodec};

use crate::subscriber::DEFAULT_OUTBOUND_QUEUE;
use crate::upstream::{DEFAULT_MAX_RECONNECT, DEFAULT_MIN_RECONNECT, PgUpstreamConfig};

pub const DEFAULT_CHANNEL: &str = "pgwebsocket";
pub const DEFAULT_AUDIENCE: &str = "default";
pub const DEFAULT_WS_PATH: &str = "/ws";
pub const DEFAULT_BIND_ADDR: &str = "0.0.0.0:8080";

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),

    #[error("invalid {var}: {reason}")]
    Invalid { var: &'static str, reason: String },
}

impl ConfigError {
    fn invalid(var: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            var,
            reason: reason.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpstreamKind {
    Postgres { database_url: String },
    /// In-process upstream; nothing arrives unless something calls `notify`.
    InMemory,
}

/// How a websocket's audiences are chosen at connect time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AudienceSource {
    Fixed(Vec<String>),
    /// Every value of this query parameter.
    Query(String),
    /// Comma-separated values of this request header.
    Header(String),
}

impl Default for AudienceSource {
    fn default() -> Self {
        Self::Fixed(vec![DEFAULT_AUDIENCE.to_string()])
    }
}

impl FromStr for AudienceSource {
    type Err = ConfigError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let (kind, arg) = raw
            .split_once(':')
            .ok_or_else(|| ConfigError::invalid("PGWS_AUDIENCE", "expected <kind>:<value>"))?;
        let arg = arg.trim();
        if arg.is_empty() {
            return Err(ConfigError::invalid("PGWS_AUDIENCE", "empty value"));
        }

        match kind.trim() {
            "fixed" => Ok(Self::Fixed(split_list(arg))),
            "query" => Ok(Self::Query(arg.to_string())),
            "header" => Ok(Self::Header(arg.to_ascii_lowercase())),
            other => Err(ConfigError::invalid(
                "PGWS_AUDIENCE",
                format!("unknown kind '{other}' (fixed, query, header)"),
            )),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayConfig {
    pub upstream: UpstreamKind,
    pub bind_addr: SocketAddr,
    pub ws_path: String,
    pub channels: Vec<String>,
    pub audience: AudienceSource,
    pub max_audience_len: usize,
    pub outbound_queue: usize,
    pub min_reconnect: Duration,
    pub max_reconnect: Duration,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            upstream: UpstreamKind::InMemory,
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            ws_path: DEFAULT_WS_PATH.to_string(),
            channels: vec![DEFAULT_CHANNEL.to_string()],
            audience: AudienceSource::default(),
            max_audience_len: DEFAULT_MAX_AUDIENCE_LEN,
            outbound_queue: DEFAULT_OUTBOUND_QUEUE,
            min_reconnect: DEFAULT_MIN_RECONNECT,
            max_reconnect: DEFAULT_MAX_RECONNECT,
        }
    }
}

impl RelayConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup. Unset and empty values are treated
    /// the same.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let upstream = match get("PGWS_UPSTREAM").as_deref().map(str::trim) {
            None | Some("postgres") => UpstreamKind::Postgres {
                database_url: get("DATABASE_URL").ok_or(ConfigError::Missing("DATABASE_URL"))?,
            },
            Some("memory") => UpstreamKind::InMemory,
            Some(other) => {
                return Err(ConfigError::invalid(
                    "PGWS_UPSTREAM",
                    format!("unknown upstream '{other}' (postgres, memory)"),
                ));
            }
        };

        let bind_addr = get("PGWS_BIND_ADDR")
            .unwrap_or_else(|| DEFAULT_BIND_ADDR.to_string())
            .trim()
            .parse::<SocketAddr>()
            .map_err(|e| ConfigError::invalid("PGWS_BIND_ADDR", e.to_string()))?;

        let ws_path = get("PGWS_WS_PATH").unwrap_or_else(|| DEFAULT_WS_PATH.to_string());
        if !ws_path.starts_with('/') {
            return Err(ConfigError::invalid("PGWS_WS_PATH", "must start with '/'"));
        }

        let channels = get("PGWS_CHANNELS")
            .map(|raw| split_list(&raw))
            .unwrap_or_else(|| vec![DEFAULT_CHANNEL.to_string()]);
        if channels.is_empty() {
            return Err(ConfigError::invalid("PGWS_CHANNELS", "no channel names"));
        }

        let audience = match get("PGWS_AUDIENCE") {
            Some(raw) => raw.parse::<AudienceSource>()?,
            None => AudienceSource::default(),
        };
        if matches!(&audience, AudienceSource::Fixed(list) if list.is_empty()) {
            return Err(ConfigError::invalid("PGWS_AUDIENCE", "no audience names"));
        }

        let max_audience_len = parse_number(&get, "PGWS_MAX_AUDIENCE_LEN", DEFAULT_MAX_AUDIENCE_LEN)?;
        let outbound_queue = parse_number(&get, "PGWS_OUTBOUND_QUEUE", DEFAULT_OUTBOUND_QUEUE)?;
        if outbound_queue == 0 {
            return Err(ConfigError::invalid("PGWS_OUTBOUND_QUEUE", "must be at least 1"));
        }

        let min_reconnect = Duration::from_secs(parse_number(
            &get,
            "PGWS_MIN_RECONNECT_SECS",
            DEFAULT_MIN_RECONNECT.as_secs(),
        )?);
        let max_reconnect = Duration::from_secs(parse_number(
            &get,
            "PGWS_MAX_RECONNECT_SECS",
            DEFAULT_MAX_RECONNECT.as_secs(),
        )?);
        if max_reconnect < min_reconnect {
            return Err(ConfigError::invalid(
                "PGWS_MAX_RECONNECT_SECS",
                "must not be below PGWS_MIN_RECONNECT_SECS",
            ));
        }

        Ok(Self {
            upstream,
            bind_addr,
            ws_path,
            channels,
            audience,
            max_audience_len,
            outbound_queue,
            min_reconnect,
            max_reconnect,
        })
    }

    pub fn codec(&self) -> EnvelopeCodec {
        EnvelopeCodec::new().with_max_audience_len(self.max_audience_len)
    }

    pub fn pg_config(&self) -> PgUpstreamConfig {
        PgUpstreamConfig {
            min_reconnect: self.min_reconnect,
            max_reconnect: self.max_reconnect,
        }
    }
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

fn parse_number<T, G>(get: &G, var: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    G: Fn(&str) -> Option<String>,
{
    match get(var) {
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|e| ConfigError::invalid(var, e.to_string())),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(vars: &[(&str, &str)]) -> Result<RelayConfig, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        RelayConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_match_the_stock_deployment() {
        let cfg = config(&[("DATABASE_URL", "postgres://localhost/app")]).unwrap();

        assert_eq!(
            cfg.upstream,
            UpstreamKind::Postgres {
                database_url: "postgres://localhost/app".into()
            }
        );
        assert_eq!(cfg.bind_addr.to_string(), "0.0.0.0:8080");
        assert_eq!(cfg.ws_path, "/ws");
        assert_eq!(cfg.channels, vec!["pgwebsocket".to_string()]);
        assert_eq!(cfg.audience, AudienceSource::Fixed(vec!["default".into()]));
        assert_eq!(cfg.max_audience_len, 36);
        assert_eq!(cfg.outbound_queue, 64);
        assert_eq!(cfg.min_reconnect, Duration::from_secs(10));
        assert_eq!(cfg.max_reconnect, Duration::from_secs(60));
    }

    #[test]
    fn postgres_requires_database_url() {
        assert_eq!(config(&[]).unwrap_err(), ConfigError::Missing("DATABASE_URL"));
        assert_eq!(
            config(&[("DATABASE_URL", "  ")]).unwrap_err(),
            ConfigError::Missing("DATABASE_URL")
        );
    }

    #[test]
    fn memory_upstream_needs_no_database() {
        let cfg = config(&[("PGWS_UPSTREAM", "memory")]).unwrap();
        assert_eq!(cfg.upstream, UpstreamKind::InMemory);
    }

    #[test]
    fn lists_are_trimmed_and_split() {
        let cfg = config(&[
            ("PGWS_UPSTREAM", "memory"),
            ("PGWS_CHANNELS", " orders, invoices ,,"),
            ("PGWS_AUDIENCE", "fixed:a, b"),
        ])
        .unwrap();

        assert_eq!(cfg.channels, vec!["orders".to_string(), "invoices".to_string()]);
        assert_eq!(cfg.audience, AudienceSource::Fixed(vec!["a".into(), "b".into()]));
    }

    #[test]
    fn audience_sources_parse() {
        assert_eq!(
            "query:audience".parse::<AudienceSource>().unwrap(),
            AudienceSource::Query("audience".into())
        );
        assert_eq!(
            "header:X-Audience".parse::<AudienceSource>().unwrap(),
            AudienceSource::Header("x-audience".into())
        );
        assert!("cookie:x".parse::<AudienceSource>().is_err());
        assert!("fixed".parse::<AudienceSource>().is_err());
        assert!("query:".parse::<AudienceSource>().is_err());
    }

    #[test]
    fn invalid_values_name_the_variable() {
        let err = config(&[("PGWS_UPSTREAM", "memory"), ("PGWS_OUTBOUND_QUEUE", "lots")]).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { var: "PGWS_OUTBOUND_QUEUE", .. }));

        let err = config(&[("PGWS_UPSTREAM", "memory"), ("PGWS_BIND_ADDR", "nowhere")]).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { var: "PGWS_BIND_ADDR", .. }));

        let err = config(&[("PGWS_UPSTREAM", "kafka")]).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { var: "PGWS_UPSTREAM", .. }));

        let err = config(&[("PGWS_UPSTREAM", "memory"), ("PGWS_WS_PATH", "ws")]).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { var: "PGWS_WS_PATH", .. }));
    }

    #[test]
    fn reconnect_bounds_are_ordered() {
        let err = config(&[
            ("PGWS_UPSTREAM", "memory"),
            ("PGWS_MIN_RECONNECT_SECS", "30"),
            ("PGWS_MAX_RECONNECT_SECS", "5"),
        ])
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { var: "PGWS_MAX_RECONNECT_SECS", .. }));
    }

    #[test]
    fn codec_uses_configured_bound() {
        let cfg = config(&[("PGWS_UPSTREAM", "memory"), ("PGWS_MAX_AUDIENCE_LEN", "64")]).unwrap();
        assert_eq!(cfg.codec().max_audience_len(), 64);
    }
}
