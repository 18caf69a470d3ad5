//! Dialer behavior knobs.

use std::path::PathBuf;
use std::time::Duration;

/// Settings the dial loop and watchdogs run with.
///
/// Loaded by the server from its config file; executors capture a copy
/// at spawn time.
#[derive(Debug, Clone)]
pub struct DialerSettings {
    /// Dialplan context for originated local channels.
    pub channel_context: String,
    /// Directory holding playable announcement assets.
    pub media_dir: PathBuf,
    /// Pause between consecutive originations of one campaign.
    pub inter_call_delay: Duration,
    /// Ring timeout passed to the origination, in milliseconds.
    pub originate_timeout_ms: u32,
    /// Operator originations are rejected past this many in-flight calls.
    pub max_concurrent_calls: usize,
}

impl Default for DialerSettings {
    fn default() -> Self {
        Self {
            channel_context: "from-internal".to_string(),
            media_dir: PathBuf::from("/var/lib/outdial/media"),
            inter_call_delay: Duration::from_secs(5),
            originate_timeout_ms: 45_000,
            max_concurrent_calls: 25,
        }
    }
}
