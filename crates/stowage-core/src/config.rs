//! Configuration module
//!
//! Settings for the HTTP server, the upload ledger, blob storage and the upload
//! pipeline. Loaded from the environment (and `.env` via dotenvy).

use std::env;
use std::fmt::{Display, Formatter, Result as FmtResult};
use std::path::{Path, PathBuf};
use std::str::FromStr;

const SERVER_PORT: u16 = 3000;
const MAX_CONNECTIONS: u32 = 20;
const CONNECTION_TIMEOUT_SECS: u64 = 30;
const STORAGE_PATH: &str = "./data";
const MAX_UPLOAD_SIZE_BYTES: u64 = 10 * 1024 * 1024 * 1024;
const MAX_CHUNK_SIZE_BYTES: u64 = 64 * 1024 * 1024;
const MAX_CHUNK_COUNT: u32 = 10_000;
const MAX_CONCURRENT_ASSEMBLIES: usize = 4;
const UPLOAD_RETENTION_HOURS: i64 = 24;
const JANITOR_INTERVAL_SECS: u64 = 3600;
const ASSEMBLY_STALE_AFTER_SECS: i64 = 900;
const THUMBNAIL_MAX_DIMENSION: u32 = 256;
const ARTIFACT_CACHE_CAPACITY: usize = 4096;
const IDENTIFICATION_WINDOW_BYTES: u64 = 64 * 1024;
const MIN_DISK_FREE_GB: u64 = 1;

/// Which upload ledger implementation to run against
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LedgerBackend {
    Postgres,
    Memory,
}

impl FromStr for LedgerBackend {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "postgres" | "postgresql" => Ok(LedgerBackend::Postgres),
            "memory" => Ok(LedgerBackend::Memory),
            _ => Err(anyhow::anyhow!("Invalid ledger backend: {}", s)),
        }
    }
}

impl Display for LedgerBackend {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            LedgerBackend::Postgres => write!(f, "postgres"),
            LedgerBackend::Memory => write!(f, "memory"),
        }
    }
}

/// Server-level settings
#[derive(Clone, Debug)]
pub struct BaseConfig {
    pub server_port: u16,
    pub cors_origins: Vec<String>,
    pub environment: String,
    pub db_max_connections: u32,
    pub db_timeout_seconds: u64,
}

impl Default for BaseConfig {
    fn default() -> Self {
        Self {
            server_port: SERVER_PORT,
            cors_origins: vec!["*".to_string()],
            environment: "development".to_string(),
            db_max_connections: MAX_CONNECTIONS,
            db_timeout_seconds: CONNECTION_TIMEOUT_SECS,
        }
    }
}

/// Upload service configuration
#[derive(Clone, Debug)]
pub struct StowageConfig {
    pub base: BaseConfig,
    pub ledger_backend: LedgerBackend,
    pub database_url: Option<String>,
    pub storage_path: PathBuf,
    pub max_upload_size_bytes: u64,
    pub max_chunk_size_bytes: u64,
    pub max_chunk_count: u32,
    pub max_concurrent_assemblies: usize,
    /// Idle time after which an unfinished upload is purged
    pub upload_retention_hours: i64,
    /// 0 disables the janitor
    pub janitor_interval_secs: u64,
    pub assembly_stale_after_secs: i64,
    /// No other process writes the ledger, so every ASSEMBLING session found at
    /// startup was orphaned by this deployment's previous run
    pub exclusive_ledger: bool,
    pub thumbnail_max_dimension: u32,
    pub artifact_cache_capacity: usize,
    pub identification_window_bytes: u64,
    pub min_disk_free_gb: u64,
    /// "fail" or "warn"
    pub disk_check_behavior: String,
}

impl Default for StowageConfig {
    fn default() -> Self {
        Self {
            base: BaseConfig::default(),
            ledger_backend: LedgerBackend::Postgres,
            database_url: None,
            storage_path: PathBuf::from(STORAGE_PATH),
            max_upload_size_bytes: MAX_UPLOAD_SIZE_BYTES,
            max_chunk_size_bytes: MAX_CHUNK_SIZE_BYTES,
            max_chunk_count: MAX_CHUNK_COUNT,
            max_concurrent_assemblies: MAX_CONCURRENT_ASSEMBLIES,
            upload_retention_hours: UPLOAD_RETENTION_HOURS,
            janitor_interval_secs: JANITOR_INTERVAL_SECS,
            assembly_stale_after_secs: ASSEMBLY_STALE_AFTER_SECS,
            exclusive_ledger: false,
            thumbnail_max_dimension: THUMBNAIL_MAX_DIMENSION,
            artifact_cache_capacity: ARTIFACT_CACHE_CAPACITY,
            identification_window_bytes: IDENTIFICATION_WINDOW_BYTES,
            min_disk_free_gb: MIN_DISK_FREE_GB,
            disk_check_behavior: "fail".to_string(),
        }
    }
}

/// Parse an env var, falling back to `default` when unset or unparsable.
fn env_or<T: FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|s| s.trim().parse().ok())
        .unwrap_or(default)
}

impl StowageConfig {
    pub fn from_env() -> Result<Self, anyhow::Error> {
        dotenvy::dotenv().ok();

        let environment = env::var("ENVIRONMENT")
            .or_else(|_| env::var("APP_ENV"))
            .unwrap_or_else(|_| "development".to_string());

        let cors_origins_str = env::var("CORS_ORIGINS").unwrap_or_else(|_| "*".to_string());
        let is_production =
            environment.to_lowercase() == "production" || environment.to_lowercase() == "prod";
        if is_production && cors_origins_str.trim() == "*" {
            return Err(anyhow::anyhow!(
                "CORS_ORIGINS cannot be '*' in production. Please specify explicit origins."
            ));
        }

        let cors_origins: Vec<String> = cors_origins_str
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        let base = BaseConfig {
            server_port: env::var("SERVER_PORT")
                .or_else(|_| env::var("PORT"))
                .unwrap_or_else(|_| SERVER_PORT.to_string())
                .parse()
                .map_err(|_| anyhow::anyhow!("SERVER_PORT must be a valid number"))?,
            cors_origins,
            environment,
            db_max_connections: env_or("DB_MAX_CONNECTIONS", MAX_CONNECTIONS),
            db_timeout_seconds: env_or("DB_TIMEOUT_SECONDS", CONNECTION_TIMEOUT_SECS),
        };

        let ledger_backend = env::var("LEDGER_BACKEND")
            .unwrap_or_else(|_| LedgerBackend::Postgres.to_string())
            .parse::<LedgerBackend>()?;

        let config = StowageConfig {
            base,
            ledger_backend,
            database_url: env::var("DATABASE_URL").ok(),
            storage_path: env::var("STORAGE_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from(STORAGE_PATH)),
            max_upload_size_bytes: env_or("MAX_UPLOAD_SIZE_BYTES", MAX_UPLOAD_SIZE_BYTES),
            max_chunk_size_bytes: env_or("MAX_CHUNK_SIZE_BYTES", MAX_CHUNK_SIZE_BYTES),
            max_chunk_count: env_or("MAX_CHUNK_COUNT", MAX_CHUNK_COUNT),
            max_concurrent_assemblies: env_or(
                "MAX_CONCURRENT_ASSEMBLIES",
                MAX_CONCURRENT_ASSEMBLIES,
            ),
            upload_retention_hours: env_or("UPLOAD_RETENTION_HOURS", UPLOAD_RETENTION_HOURS),
            janitor_interval_secs: env_or("JANITOR_INTERVAL_SECS", JANITOR_INTERVAL_SECS),
            assembly_stale_after_secs: env_or(
                "ASSEMBLY_STALE_AFTER_SECS",
                ASSEMBLY_STALE_AFTER_SECS,
            ),
            exclusive_ledger: env_or("EXCLUSIVE_LEDGER", false),
            thumbnail_max_dimension: env_or("THUMBNAIL_MAX_DIMENSION", THUMBNAIL_MAX_DIMENSION),
            artifact_cache_capacity: env_or("ARTIFACT_CACHE_CAPACITY", ARTIFACT_CACHE_CAPACITY),
            identification_window_bytes: env_or(
                "IDENTIFICATION_WINDOW_BYTES",
                IDENTIFICATION_WINDOW_BYTES,
            ),
            min_disk_free_gb: env_or("MIN_DISK_FREE_GB", MIN_DISK_FREE_GB),
            disk_check_behavior: env::var("DISK_CHECK_BEHAVIOR")
                .unwrap_or_else(|_| "fail".to_string())
                .to_lowercase(),
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), anyhow::Error> {
        if self.ledger_backend == LedgerBackend::Postgres {
            match self.database_url.as_deref() {
                Some(url) if url.starts_with("postgres://") || url.starts_with("postgresql://") => {
                }
                Some(_) => {
                    return Err(anyhow::anyhow!(
                        "DATABASE_URL must be a valid PostgreSQL connection string"
                    ))
                }
                None => {
                    return Err(anyhow::anyhow!(
                        "DATABASE_URL must be set when LEDGER_BACKEND=postgres"
                    ))
                }
            }
        }

        if self.max_chunk_size_bytes == 0 || self.max_chunk_count == 0 {
            return Err(anyhow::anyhow!(
                "MAX_CHUNK_SIZE_BYTES and MAX_CHUNK_COUNT must be greater than 0"
            ));
        }

        if self.max_concurrent_assemblies == 0 {
            return Err(anyhow::anyhow!(
                "MAX_CONCURRENT_ASSEMBLIES must be greater than 0"
            ));
        }

        if self.identification_window_bytes == 0 {
            return Err(anyhow::anyhow!(
                "IDENTIFICATION_WINDOW_BYTES must be greater than 0"
            ));
        }

        if !["fail", "warn"].contains(&self.disk_check_behavior.as_str()) {
            return Err(anyhow::anyhow!(
                "DISK_CHECK_BEHAVIOR must be 'fail' or 'warn', got '{}'",
                self.disk_check_behavior
            ));
        }

        Ok(())
    }
}

/// Application configuration.
#[derive(Clone, Debug)]
pub struct Config(pub Box<StowageConfig>);

impl Config {
    pub fn new(config: StowageConfig) -> Self {
        Config(Box::new(config))
    }

    fn inner(&self) -> &StowageConfig {
        &self.0
    }

    pub fn from_env() -> Result<Self, anyhow::Error> {
        Ok(Config::new(StowageConfig::from_env()?))
    }

    pub fn validate(&self) -> Result<(), anyhow::Error> {
        self.inner().validate()
    }

    /// Check if the application is running in production mode
    pub fn is_production(&self) -> bool {
        let env = self.inner().base.environment.to_lowercase();
        env == "production" || env == "prod"
    }

    pub fn server_port(&self) -> u16 {
        self.inner().base.server_port
    }

    pub fn cors_origins(&self) -> &[String] {
        &self.inner().base.cors_origins
    }

    pub fn environment(&self) -> &str {
        &self.inner().base.environment
    }

    pub fn db_max_connections(&self) -> u32 {
        self.inner().base.db_max_connections
    }

    pub fn db_timeout_seconds(&self) -> u64 {
        self.inner().base.db_timeout_seconds
    }

    pub fn ledger_backend(&self) -> LedgerBackend {
        self.inner().ledger_backend
    }

    pub fn database_url(&self) -> Option<&str> {
        self.inner().database_url.as_deref()
    }

    pub fn storage_path(&self) -> &Path {
        &self.inner().storage_path
    }

    pub fn max_upload_size_bytes(&self) -> u64 {
        self.inner().max_upload_size_bytes
    }

    pub fn max_chunk_size_bytes(&self) -> u64 {
        self.inner().max_chunk_size_bytes
    }

    pub fn max_chunk_count(&self) -> u32 {
        self.inner().max_chunk_count
    }

    pub fn max_concurrent_assemblies(&self) -> usize {
        self.inner().max_concurrent_assemblies
    }

    pub fn upload_retention_hours(&self) -> i64 {
        self.inner().upload_retention_hours
    }

    pub fn janitor_interval_secs(&self) -> u64 {
        self.inner().janitor_interval_secs
    }

    pub fn assembly_stale_after_secs(&self) -> i64 {
        self.inner().assembly_stale_after_secs
    }

    /// Whether startup recovery may take over fresh assemblies. Always true for the
    /// memory ledger, which no other process can see.
    pub fn owns_ledger(&self) -> bool {
        let inner = self.inner();
        inner.exclusive_ledger || inner.ledger_backend == LedgerBackend::Memory
    }

    pub fn thumbnail_max_dimension(&self) -> u32 {
        self.inner().thumbnail_max_dimension
    }

    pub fn artifact_cache_capacity(&self) -> usize {
        self.inner().artifact_cache_capacity
    }

    pub fn identification_window_bytes(&self) -> u64 {
        self.inner().identification_window_bytes
    }

    pub fn min_disk_free_gb(&self) -> u64 {
        self.inner().min_disk_free_gb
    }

    pub fn disk_check_behavior(&self) -> &str {
        &self.inner().disk_check_behavior
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ledger_backend_parse() {
        assert_eq!(
            "Postgres".parse::<LedgerBackend>().unwrap(),
            LedgerBackend::Postgres
        );
        assert_eq!(
            "memory".parse::<LedgerBackend>().unwrap(),
            LedgerBackend::Memory
        );
        assert!("mysql".parse::<LedgerBackend>().is_err());
    }

    #[test]
    fn test_validate_requires_database_url_for_postgres() {
        let config = StowageConfig::default();
        assert!(config.validate().is_err());

        let config = StowageConfig {
            database_url: Some("postgres://localhost/stowage".to_string()),
            ..StowageConfig::default()
        };
        assert!(config.validate().is_ok());

        let config = StowageConfig {
            ledger_backend: LedgerBackend::Memory,
            ..StowageConfig::default()
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_unknown_disk_behavior() {
        let config = StowageConfig {
            ledger_backend: LedgerBackend::Memory,
            disk_check_behavior: "ignore".to_string(),
            ..StowageConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_owns_ledger() {
        let shared = Config::new(StowageConfig {
            database_url: Some("postgres://localhost/stowage".to_string()),
            ..StowageConfig::default()
        });
        assert!(!shared.owns_ledger());

        let exclusive = Config::new(StowageConfig {
            database_url: Some("postgres://localhost/stowage".to_string()),
            exclusive_ledger: true,
            ..StowageConfig::default()
        });
        assert!(exclusive.owns_ledger());

        let memory = Config::new(StowageConfig {
            ledger_backend: LedgerBackend::Memory,
            ..StowageConfig::default()
        });
        assert!(memory.owns_ledger());
    }
}
