//! Agent configuration from the environment.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;
use zeropoint_reconcile::RebootPolicy;

pub const STATE_DIR_ENV: &str = "ZEROPOINT_STATE_DIR";
pub const DEFAULTS_FILE_ENV: &str = zeropoint_state::DEFAULTS_ENV;
pub const LISTEN_ADDR_ENV: &str = "ZEROPOINT_LISTEN_ADDR";
pub const RECONCILE_INTERVAL_ENV: &str = "ZEROPOINT_RECONCILE_INTERVAL_SECS";
pub const REBOOT_POLICY_ENV: &str = "ZEROPOINT_REBOOT_POLICY";

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {var}={value:?}: {message}")]
    Invalid {
        var: &'static str,
        value: String,
        message: String,
    },
}

/// Runtime configuration of the agent.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Root of the state store; also holds the host ledger.
    pub state_dir: PathBuf,

    /// Defaults document consumed on first initialization.
    pub defaults_file: PathBuf,

    /// HTTP bind address.
    pub listen_addr: SocketAddr,

    /// Timer-driven reconcile period. `None` disables the timer.
    pub reconcile_interval: Option<Duration>,

    pub reboot_policy: RebootPolicy,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            state_dir: PathBuf::from("./state"),
            defaults_file: PathBuf::from("./data/defaults.json"),
            listen_addr: SocketAddr::from(([0, 0, 0, 0], 2370)),
            reconcile_interval: Some(Duration::from_secs(60)),
            reboot_policy: RebootPolicy::default(),
        }
    }
}

impl AgentConfig {
    /// Read configuration from process environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Build configuration from an arbitrary variable source. Unset and
    /// empty variables take their defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |var: &str| lookup(var).filter(|value| !value.trim().is_empty());
        let mut config = Self::default();

        if let Some(dir) = get(STATE_DIR_ENV) {
            config.state_dir = PathBuf::from(dir);
        }
        if let Some(file) = get(DEFAULTS_FILE_ENV) {
            config.defaults_file = PathBuf::from(file);
        }
        if let Some(addr) = get(LISTEN_ADDR_ENV) {
            config.listen_addr = addr.trim().parse().map_err(|e: std::net::AddrParseError| {
                ConfigError::Invalid {
                    var: LISTEN_ADDR_ENV,
                    value: addr.clone(),
                    message: e.to_string(),
                }
            })?;
        }
        if let Some(secs) = get(RECONCILE_INTERVAL_ENV) {
            let secs: u64 = secs.trim().parse().map_err(|e: std::num::ParseIntError| {
                ConfigError::Invalid {
                    var: RECONCILE_INTERVAL_ENV,
                    value: secs.clone(),
                    message: e.to_string(),
                }
            })?;
            config.reconcile_interval = (secs > 0).then(|| Duration::from_secs(secs));
        }
        if let Some(policy) = get(REBOOT_POLICY_ENV) {
            config.reboot_policy = policy.trim().parse().map_err(|_| ConfigError::Invalid {
                var: REBOOT_POLICY_ENV,
                value: policy.clone(),
                message: "expected any_new_disk or partition_changes_only".to_string(),
            })?;
        }

        Ok(config)
    }
}
