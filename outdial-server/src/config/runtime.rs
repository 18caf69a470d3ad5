//! Runtime configuration derived from the file config.

use crate::config::file::{AmiSection, DialerSection, ServerConfig};
use outdial_ami::AmiConfig;
use outdial_core::settings::DialerSettings;
use std::time::Duration;

/// Configuration the running server reads. Rebuilt on SIGHUP; the
/// dialer knobs apply to operations started after the reload.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub server: ServerConfig,
    pub ami: AmiConfig,
    pub dialer: DialerSettings,
}

pub fn ami_config(section: &AmiSection) -> AmiConfig {
    AmiConfig::new(
        section.host.clone(),
        section.port,
        section.username.clone(),
        section.secret.clone(),
    )
}

pub fn dialer_settings(section: &DialerSection) -> DialerSettings {
    DialerSettings {
        channel_context: section.channel_context.clone(),
        media_dir: section.media_dir.clone(),
        inter_call_delay: Duration::from_secs(section.inter_call_delay_secs),
        originate_timeout_ms: section.originate_timeout_ms,
        max_concurrent_calls: section.max_concurrent_calls,
    }
}
