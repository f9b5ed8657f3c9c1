use std::collections::HashSet;
use std::net::SocketAddr;
use std::time::Duration;

use crate::error::{QueueError, Result};

/// Server configuration, loaded from environment variables with
/// sensible defaults. Collection and database option names keep the
/// document-store vocabulary so a wire driver can reuse them.
#[derive(Debug, Clone)]
pub struct Config {
    pub listen_addr: SocketAddr,

    /// Require a recognized bearer token on every endpoint.
    pub admin_auth: bool,
    pub admin_tokens: HashSet<String>,

    pub mongodb_database: String,
    pub db_coll_jobs: String,
    pub db_coll_perf: String,
    pub db_coll_cgs: String,

    pub default_page_size: usize,

    /// A client missing heartbeats for longer than this is evicted.
    pub client_ttl: Duration,
    /// Default checkout timeout for tasks that do not declare one.
    pub checkout_timeout: Duration,
    /// Workunit attempts before the owning task is suspended.
    pub max_attempts: u32,
    /// How long completed jobs are kept before the expiration sweep
    /// purges them.
    pub expire_wait: Duration,

    pub client_sweep_interval: Duration,
    pub workunit_sweep_interval: Duration,
    pub expire_sweep_interval: Duration,

    /// Deadline for acquiring the queue-manager lock on behalf of an
    /// HTTP request; expiry surfaces as a timeout with no state change.
    pub request_deadline: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:8001".parse().unwrap(),
            admin_auth: false,
            admin_tokens: HashSet::new(),
            mongodb_database: "flowq".to_string(),
            db_coll_jobs: "jobs".to_string(),
            db_coll_perf: "perf".to_string(),
            db_coll_cgs: "cgs".to_string(),
            default_page_size: 25,
            client_ttl: Duration::from_secs(90),
            checkout_timeout: Duration::from_secs(3600),
            max_attempts: 3,
            expire_wait: Duration::from_secs(30 * 24 * 3600),
            client_sweep_interval: Duration::from_secs(30),
            workunit_sweep_interval: Duration::from_secs(30),
            expire_sweep_interval: Duration::from_secs(3600),
            request_deadline: Duration::from_secs(30),
        }
    }
}

impl Config {
    /// Load configuration from the environment, falling back to
    /// defaults for unset variables and failing fast on malformed
    /// values.
    pub fn from_env() -> Result<Self> {
        let mut cfg = Config::default();

        if let Ok(v) = std::env::var("ADMIN_AUTH") {
            cfg.admin_auth = parse_var("ADMIN_AUTH", &v)?;
        }
        if let Ok(v) = std::env::var("ADMIN_TOKENS") {
            cfg.admin_tokens = v
                .split(',')
                .map(str::trim)
                .filter(|t| !t.is_empty())
                .map(str::to_string)
                .collect();
        }
        if let Ok(v) = std::env::var("MONGODB_DATABASE") {
            cfg.mongodb_database = v;
        }
        if let Ok(v) = std::env::var("DB_COLL_JOBS") {
            cfg.db_coll_jobs = v;
        }
        if let Ok(v) = std::env::var("DB_COLL_PERF") {
            cfg.db_coll_perf = v;
        }
        if let Ok(v) = std::env::var("DB_COLL_CGS") {
            cfg.db_coll_cgs = v;
        }
        if let Ok(v) = std::env::var("DEFAULT_PAGE_SIZE") {
            cfg.default_page_size = parse_var("DEFAULT_PAGE_SIZE", &v)?;
        }
        if let Ok(v) = std::env::var("CLIENT_TTL_SECS") {
            cfg.client_ttl = Duration::from_secs(parse_var("CLIENT_TTL_SECS", &v)?);
        }
        if let Ok(v) = std::env::var("CHECKOUT_TIMEOUT_SECS") {
            cfg.checkout_timeout = Duration::from_secs(parse_var("CHECKOUT_TIMEOUT_SECS", &v)?);
        }
        if let Ok(v) = std::env::var("MAX_ATTEMPTS") {
            cfg.max_attempts = parse_var("MAX_ATTEMPTS", &v)?;
        }
        if let Ok(v) = std::env::var("EXPIRE_WAIT_DAYS") {
            let days: u64 = parse_var("EXPIRE_WAIT_DAYS", &v)?;
            cfg.expire_wait = Duration::from_secs(days * 24 * 3600);
        }
        if let Ok(v) = std::env::var("CLIENT_SWEEP_SECS") {
            cfg.client_sweep_interval = Duration::from_secs(parse_var("CLIENT_SWEEP_SECS", &v)?);
        }
        if let Ok(v) = std::env::var("WORKUNIT_SWEEP_SECS") {
            cfg.workunit_sweep_interval =
                Duration::from_secs(parse_var("WORKUNIT_SWEEP_SECS", &v)?);
        }
        if let Ok(v) = std::env::var("EXPIRE_SWEEP_SECS") {
            cfg.expire_sweep_interval = Duration::from_secs(parse_var("EXPIRE_SWEEP_SECS", &v)?);
        }
        if let Ok(v) = std::env::var("REQUEST_DEADLINE_SECS") {
            cfg.request_deadline = Duration::from_secs(parse_var("REQUEST_DEADLINE_SECS", &v)?);
        }

        Ok(cfg)
    }
}

fn parse_var<T: std::str::FromStr>(name: &str, value: &str) -> Result<T> {
    value
        .parse()
        .map_err(|_| QueueError::BadRequest(format!("invalid value for {}: {}", name, value)))
}
