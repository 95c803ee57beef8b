// Runtime settings. The prompts supply host and credentials; this only
// carries the values they start from and the session tuning.

use std::time::Duration;

const DEFAULT_HOST: &str = "localhost";
const KEEPALIVE_SECS: u64 = 60;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Value pre-filled in the host prompt.
    pub default_host: String,
    /// Period between keep-alive pings while a session is open.
    pub keepalive: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            default_host: DEFAULT_HOST.into(),
            keepalive: Duration::from_secs(KEEPALIVE_SECS),
        }
    }
}
