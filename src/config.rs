/// Configuration management for netwarden
use crate::error::{WardenError, WardenResult};
use chrono::NaiveTime;
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;
use std::time::Duration;

/// Main service configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub database: DatabaseConfig,
    pub controller: ControllerConfig,
    pub jobs: JobsConfig,
    pub logging: LoggingConfig,
    pub metrics: MetricsConfig,
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub path: PathBuf,
    pub max_connections: u32,
}

/// Network controller configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControllerConfig {
    /// Local ZeroTier service API (e.g., http://127.0.0.1:9993)
    pub local_url: String,
    /// Contents of the local authtoken.secret
    pub local_secret: String,
    /// ZeroTier Central API base
    pub central_url: String,
    /// Central API token, if remote controller calls are allowed
    pub central_token: Option<String>,
    pub timeout_secs: u64,
    pub user_agent: String,
}

/// Background job configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobsConfig {
    pub enabled: bool,
    /// IANA zone the daily expiry check is pinned to
    pub timezone: String,
    /// Local wall-clock time of the daily expiry check (HH:MM)
    pub expiry_check_time: String,
    pub peer_sync_interval_secs: u64,
    /// Users seen more recently than this are considered online and skipped
    pub peer_inactivity_secs: u64,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    pub json: bool,
}

/// Metrics endpoint configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Listen address for `/metrics` and `/health`; `None` disables the listener
    pub addr: Option<String>,
}

impl Default for JobsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            timezone: "America/Los_Angeles".to_string(),
            expiry_check_time: "00:00".to_string(),
            peer_sync_interval_secs: 300,
            peer_inactivity_secs: 300,
        }
    }
}

impl JobsConfig {
    /// Parsed time zone for the daily job
    pub fn tz(&self) -> WardenResult<Tz> {
        self.timezone
            .parse::<Tz>()
            .map_err(|e| WardenError::Config(format!("Invalid JOB_TIMEZONE {}: {}", self.timezone, e)))
    }

    /// Parsed time of day for the daily job
    pub fn expiry_time(&self) -> WardenResult<NaiveTime> {
        NaiveTime::parse_from_str(&self.expiry_check_time, "%H:%M").map_err(|e| {
            WardenError::Config(format!(
                "Invalid EXPIRY_CHECK_TIME {}: {}",
                self.expiry_check_time, e
            ))
        })
    }

    pub fn peer_sync_interval(&self) -> Duration {
        Duration::from_secs(self.peer_sync_interval_secs)
    }

    pub fn peer_inactivity(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.peer_inactivity_secs as i64)
    }
}

impl ControllerConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl ServerConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> WardenResult<Self> {
        dotenv::dotenv().ok();

        let path: PathBuf = env::var("DATABASE_PATH")
            .unwrap_or_else(|_| "./data/netwarden.sqlite".to_string())
            .into();
        let max_connections = env::var("DATABASE_MAX_CONNECTIONS")
            .unwrap_or_else(|_| "5".to_string())
            .parse()
            .map_err(|_| WardenError::Config("Invalid DATABASE_MAX_CONNECTIONS".to_string()))?;

        let local_url = env::var("ZT_ADDR").unwrap_or_else(|_| "http://127.0.0.1:9993".to_string());
        let local_secret = env::var("ZT_SECRET")
            .map_err(|_| WardenError::Config("ZT_SECRET required".to_string()))?;
        let central_url = env::var("ZT_CENTRAL_URL")
            .unwrap_or_else(|_| "https://api.zerotier.com/api/v1".to_string());
        let central_token = env::var("ZT_CENTRAL_TOKEN").ok().filter(|s| !s.is_empty());
        let timeout_secs = env::var("CONTROLLER_TIMEOUT_SECS")
            .unwrap_or_else(|_| "10".to_string())
            .parse()
            .unwrap_or(10);
        let user_agent = format!("netwarden/{}", env!("CARGO_PKG_VERSION"));

        let defaults = JobsConfig::default();
        let jobs_enabled = env::var("JOBS_ENABLED")
            .unwrap_or_else(|_| "true".to_string())
            .parse()
            .unwrap_or(true);
        let timezone = env::var("JOB_TIMEZONE").unwrap_or(defaults.timezone);
        let expiry_check_time = env::var("EXPIRY_CHECK_TIME").unwrap_or(defaults.expiry_check_time);
        let peer_sync_interval_secs = env::var("PEER_SYNC_INTERVAL_SECS")
            .unwrap_or_else(|_| "300".to_string())
            .parse()
            .map_err(|_| WardenError::Config("Invalid PEER_SYNC_INTERVAL_SECS".to_string()))?;
        let peer_inactivity_secs = env::var("PEER_INACTIVITY_SECS")
            .unwrap_or_else(|_| "300".to_string())
            .parse()
            .map_err(|_| WardenError::Config("Invalid PEER_INACTIVITY_SECS".to_string()))?;

        let log_level = env::var("RUST_LOG").unwrap_or_else(|_| "netwarden=info".to_string());
        let json = env::var("LOG_FORMAT")
            .map(|f| f.eq_ignore_ascii_case("json"))
            .unwrap_or(false);

        let metrics_addr = env::var("METRICS_ADDR")
            .map(|a| a.trim().to_string())
            .unwrap_or_else(|_| "127.0.0.1:9464".to_string());

        Ok(ServerConfig {
            database: DatabaseConfig {
                path,
                max_connections,
            },
            controller: ControllerConfig {
                local_url,
                local_secret,
                central_url,
                central_token,
                timeout_secs,
                user_agent,
            },
            jobs: JobsConfig {
                enabled: jobs_enabled,
                timezone,
                expiry_check_time,
                peer_sync_interval_secs,
                peer_inactivity_secs,
            },
            logging: LoggingConfig {
                level: log_level,
                json,
            },
            metrics: MetricsConfig {
                addr: Some(metrics_addr).filter(|a| !a.is_empty()),
            },
        })
    }

    /// Validate configuration
    pub fn validate(&self) -> WardenResult<()> {
        if self.controller.local_url.is_empty() {
            return Err(WardenError::Config("ZT_ADDR cannot be empty".to_string()));
        }

        if self.controller.local_secret.trim().is_empty() {
            return Err(WardenError::Config("ZT_SECRET cannot be empty".to_string()));
        }

        if self.database.max_connections == 0 {
            return Err(WardenError::Config(
                "DATABASE_MAX_CONNECTIONS must be at least 1".to_string(),
            ));
        }

        if self.jobs.peer_sync_interval_secs == 0 {
            return Err(WardenError::Config(
                "PEER_SYNC_INTERVAL_SECS must be greater than zero".to_string(),
            ));
        }

        self.jobs.tz()?;
        self.jobs.expiry_time()?;

        if let Some(addr) = &self.metrics.addr {
            addr.parse::<std::net::SocketAddr>().map_err(|_| {
                WardenError::Config(format!("Invalid METRICS_ADDR {}", addr))
            })?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> ServerConfig {
        ServerConfig {
            database: DatabaseConfig {
                path: PathBuf::from("./data/test.sqlite"),
                max_connections: 1,
            },
            controller: ControllerConfig {
                local_url: "http://127.0.0.1:9993".to_string(),
                local_secret: "secret".to_string(),
                central_url: "https://api.zerotier.com/api/v1".to_string(),
                central_token: None,
                timeout_secs: 10,
                user_agent: "netwarden/test".to_string(),
            },
            jobs: JobsConfig::default(),
            logging: LoggingConfig {
                level: "info".to_string(),
                json: false,
            },
            metrics: MetricsConfig {
                addr: Some("127.0.0.1:9464".to_string()),
            },
        }
    }

    #[test]
    fn test_defaults_validate() {
        assert!(sample().validate().is_ok());
    }

    #[test]
    fn test_default_schedule() {
        let jobs = JobsConfig::default();
        assert_eq!(jobs.tz().unwrap(), chrono_tz::America::Los_Angeles);
        assert_eq!(jobs.expiry_time().unwrap(), NaiveTime::from_hms_opt(0, 0, 0).unwrap());
        assert_eq!(jobs.peer_sync_interval(), Duration::from_secs(300));
        assert_eq!(jobs.peer_inactivity(), chrono::Duration::minutes(5));
    }

    #[test]
    fn test_rejects_bad_timezone() {
        let mut config = sample();
        config.jobs.timezone = "Mars/Olympus_Mons".to_string();
        assert!(matches!(config.validate(), Err(WardenError::Config(_))));
    }

    #[test]
    fn test_rejects_bad_expiry_time() {
        let mut config = sample();
        config.jobs.expiry_check_time = "25:61".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_empty_secret() {
        let mut config = sample();
        config.controller.local_secret = "  ".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_bad_metrics_addr() {
        let mut config = sample();
        config.metrics.addr = Some("localhost".to_string());
        assert!(matches!(config.validate(), Err(WardenError::Config(_))));

        config.metrics.addr = None;
        assert!(config.validate().is_ok());
    }
}
