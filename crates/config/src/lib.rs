use std::path::PathBuf;
use std::time::Duration;
use serde::Deserialize;

/// All configuration for the box office backend.
///
/// Precedence (lowest to highest): defaults → config file → env var → CLI arg.
/// CLI arg merging is done by the caller after `Config::load()`.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    // Database
    pub db_url: String,
    pub db_max_connections: u32,
    pub db_acquire_timeout_secs: u64,

    // Server
    pub port: u16,

    // Logging
    pub log_level: String,
    pub utc: bool,

    // Identity
    pub jwt_secret: String,

    // Ticket issuance and housekeeping
    pub lock_timeout_ms: u64,
    pub pending_ttl_secs: u64,
    pub housekeeping_interval_secs: u64,
    pub reconcile_batch_size: u32,

    // Payment gateway
    pub gateway_url: String,
    pub gateway_secret_key: String,
    pub gateway_currency: String,
}

/// Config file layout (~/.boxoffice/config.toml). All fields optional; they
/// layer on top of compiled-in defaults.
#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct FileConfig {
    db_url: Option<String>,
    db_max_connections: Option<u32>,
    db_acquire_timeout_secs: Option<u64>,
    port: Option<u16>,
    log_level: Option<String>,
    utc: Option<bool>,
    jwt_secret: Option<String>,
    lock_timeout_ms: Option<u64>,
    pending_ttl_secs: Option<u64>,
    housekeeping_interval_secs: Option<u64>,
    reconcile_batch_size: Option<u32>,
    gateway_url: Option<String>,
    gateway_secret_key: Option<String>,
    gateway_currency: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self::defaults()
    }
}

impl Config {
    /// Config directory: ~/.boxoffice/
    pub fn dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".boxoffice")
    }

    /// Config file path: ~/.boxoffice/config.toml
    pub fn file_path() -> PathBuf {
        Self::dir().join("config.toml")
    }

    /// Load config: defaults → config file → env vars.
    /// CLI args should be merged by the caller afterward.
    pub fn load() -> Result<Self, toml::de::Error> {
        let file = std::fs::read_to_string(Self::file_path()).ok();
        Self::from_sources(file.as_deref(), |key| std::env::var(key).ok())
    }

    /// Builds a config from an optional TOML document and an environment lookup.
    /// A malformed file is an error rather than being silently ignored.
    pub fn from_sources(
        file: Option<&str>,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, toml::de::Error> {
        let mut config = Self::defaults();

        // Layer 2: config file
        if let Some(contents) = file {
            config.apply_file(toml::from_str::<FileConfig>(contents)?);
        }

        // Layer 3: environment variables
        config.apply_env(env);

        Ok(config)
    }

    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }

    pub fn pending_ttl(&self) -> Duration {
        Duration::from_secs(self.pending_ttl_secs)
    }

    pub fn housekeeping_interval(&self) -> Duration {
        Duration::from_secs(self.housekeeping_interval_secs.max(1))
    }

    pub fn db_acquire_timeout(&self) -> Duration {
        Duration::from_secs(self.db_acquire_timeout_secs)
    }

    // --- Private helpers ---

    fn defaults() -> Self {
        Self {
            db_url: "postgres://localhost/boxoffice".to_string(),
            db_max_connections: 10,
            db_acquire_timeout_secs: 5,
            port: 3008,
            log_level: "info".to_string(),
            utc: false,
            jwt_secret: String::new(),
            lock_timeout_ms: 5_000,
            pending_ttl_secs: 600,
            housekeeping_interval_secs: 60,
            reconcile_batch_size: 100,
            gateway_url: "https://api.stripe.com/v1".to_string(),
            gateway_secret_key: String::new(),
            gateway_currency: "egp".to_string(),
        }
    }

    fn apply_file(&mut self, file: FileConfig) {
        if let Some(v) = file.db_url { self.db_url = v; }
        if let Some(v) = file.db_max_connections { self.db_max_connections = v; }
        if let Some(v) = file.db_acquire_timeout_secs { self.db_acquire_timeout_secs = v; }
        if let Some(v) = file.port { self.port = v; }
        if let Some(v) = file.log_level { self.log_level = v; }
        if let Some(v) = file.utc { self.utc = v; }
        if let Some(v) = file.jwt_secret { self.jwt_secret = v; }
        if let Some(v) = file.lock_timeout_ms { self.lock_timeout_ms = v; }
        if let Some(v) = file.pending_ttl_secs { self.pending_ttl_secs = v; }
        if let Some(v) = file.housekeeping_interval_secs { self.housekeeping_interval_secs = v; }
        if let Some(v) = file.reconcile_batch_size { self.reconcile_batch_size = v; }
        if let Some(v) = file.gateway_url { self.gateway_url = v; }
        if let Some(v) = file.gateway_secret_key { self.gateway_secret_key = v; }
        if let Some(v) = file.gateway_currency { self.gateway_currency = v.to_ascii_lowercase(); }
    }

    fn apply_env(&mut self, env: impl Fn(&str) -> Option<String>) {
        if let Some(v) = env("BOXOFFICE_DB_URL").or_else(|| env("DATABASE_URL")) { self.db_url = v; }
        if let Some(v) = env("BOXOFFICE_DB_MAX_CONNECTIONS") {
            if let Ok(n) = v.parse() { self.db_max_connections = n; }
        }
        if let Some(v) = env("BOXOFFICE_DB_ACQUIRE_TIMEOUT_SECS") {
            if let Ok(n) = v.parse() { self.db_acquire_timeout_secs = n; }
        }
        if let Some(v) = env("BOXOFFICE_PORT") {
            if let Ok(p) = v.parse() { self.port = p; }
        }
        if let Some(v) = env("BOXOFFICE_LOG_LEVEL") { self.log_level = v; }
        if let Some(v) = env("BOXOFFICE_UTC") {
            self.utc = v == "1" || v.eq_ignore_ascii_case("true");
        }
        if let Some(v) = env("BOXOFFICE_JWT_SECRET").or_else(|| env("JWT_SECRET")) { self.jwt_secret = v; }
        if let Some(v) = env("BOXOFFICE_LOCK_TIMEOUT_MS") {
            if let Ok(n) = v.parse() { self.lock_timeout_ms = n; }
        }
        if let Some(v) = env("BOXOFFICE_PENDING_TTL_SECS") {
            if let Ok(n) = v.parse() { self.pending_ttl_secs = n; }
        }
        if let Some(v) = env("BOXOFFICE_HOUSEKEEPING_INTERVAL_SECS") {
            if let Ok(n) = v.parse() { self.housekeeping_interval_secs = n; }
        }
        if let Some(v) = env("BOXOFFICE_RECONCILE_BATCH_SIZE") {
            if let Ok(n) = v.parse() { self.reconcile_batch_size = n; }
        }
        if let Some(v) = env("BOXOFFICE_GATEWAY_URL") { self.gateway_url = v; }
        if let Some(v) = env("BOXOFFICE_GATEWAY_SECRET_KEY").or_else(|| env("STRIPE_SECRET_KEY")) {
            self.gateway_secret_key = v;
        }
        if let Some(v) = env("BOXOFFICE_GATEWAY_CURRENCY") { self.gateway_currency = v.to_ascii_lowercase(); }
    }
}
