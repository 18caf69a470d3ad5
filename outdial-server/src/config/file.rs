//! TOML file configuration structures.
//!
//! These structs directly map to the `outdial-config.toml` file format.

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::PathBuf;

/// Root configuration structure as read from the TOML file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileConfig {
    pub server: ServerConfig,
    pub ami: AmiSection,
    #[serde(default)]
    pub dialer: DialerSection,
}

/// Server configuration section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// The address and port to listen on (e.g., "0.0.0.0:8080").
    #[serde(default = "default_listen_addr")]
    pub listen: SocketAddr,
}

fn default_listen_addr() -> SocketAddr {
    // The literal always parses.
    #[allow(clippy::unwrap_used)]
    "0.0.0.0:8080".parse().unwrap()
}

/// Control-channel credentials and endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AmiSection {
    #[serde(default = "default_ami_host")]
    pub host: String,
    #[serde(default = "default_ami_port")]
    pub port: u16,
    pub username: String,
    pub secret: String,
}

fn default_ami_host() -> String {
    "127.0.0.1".to_string()
}

fn default_ami_port() -> u16 {
    5038
}

/// Dialer behavior section. Every field has a sensible default.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DialerSection {
    pub channel_context: String,
    pub media_dir: PathBuf,
    pub inter_call_delay_secs: u64,
    pub originate_timeout_ms: u32,
    pub max_concurrent_calls: usize,
}

impl Default for DialerSection {
    fn default() -> Self {
        let defaults = outdial_core::settings::DialerSettings::default();
        Self {
            channel_context: defaults.channel_context,
            media_dir: defaults.media_dir,
            inter_call_delay_secs: defaults.inter_call_delay.as_secs(),
            originate_timeout_ms: defaults.originate_timeout_ms,
            max_concurrent_calls: defaults.max_concurrent_calls,
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;

    #[test]
    fn test_full_config_parsing() {
        let toml_str = r#"
[server]
listen = "127.0.0.1:3000"

[ami]
host = "10.0.0.5"
port = 5038
username = "dialer"
secret = "hunter2"

[dialer]
channel_context = "outbound"
media_dir = "/srv/outdial/media"
inter_call_delay_secs = 3
originate_timeout_ms = 30000
max_concurrent_calls = 10
"#;
        let config: FileConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.server.listen.port(), 3000);
        assert_eq!(config.ami.host, "10.0.0.5");
        assert_eq!(config.ami.username, "dialer");
        assert_eq!(config.dialer.channel_context, "outbound");
        assert_eq!(config.dialer.max_concurrent_calls, 10);
    }

    #[test]
    fn test_dialer_section_defaults() {
        let toml_str = r#"
[server]
listen = "127.0.0.1:3000"

[ami]
username = "dialer"
secret = "hunter2"
"#;
        let config: FileConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.ami.host, "127.0.0.1");
        assert_eq!(config.ami.port, 5038);
        assert_eq!(config.dialer.channel_context, "from-internal");
        assert_eq!(config.dialer.inter_call_delay_secs, 5);
        assert_eq!(config.dialer.originate_timeout_ms, 45_000);
    }
}
