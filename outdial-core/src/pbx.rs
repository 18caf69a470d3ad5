//! Out-of-band PBX command invocation.
//!
//! The control channel carries originations and events; channel listing
//! and forced hangups go through the PBX console CLI instead, bounded by
//! a 10s timeout. Commands are best-effort by contract: failures are
//! reported as values and never block an abort flow.

use async_trait::async_trait;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;
use tokio::process::Command;
use tracing::debug;

/// Timeout for one console command.
const COMMAND_TIMEOUT: Duration = Duration::from_secs(10);

/// Errors from out-of-band PBX commands.
#[derive(Debug, Error)]
pub enum PbxError {
    #[error("command failed: {0}")]
    CommandFailed(String),

    #[error("command timed out after {0:?}")]
    Timeout(Duration),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// One row of the concise channel listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConciseChannel {
    pub channel: String,
    pub extension: String,
    pub state: String,
}

impl ConciseChannel {
    /// The number this channel dialed: parsed from the channel name,
    /// falling back to the extension field.
    pub fn dialed_number(&self) -> Option<String> {
        crate::correlate::extract::recipient_from_channel(&self.channel).or_else(|| {
            let ext = self.extension.as_str();
            (!ext.is_empty() && ext.bytes().all(|b| b.is_ascii_digit()))
                .then(|| ext.to_string())
        })
    }
}

/// Out-of-band PBX commands, behind a trait so the watchdog and abort
/// flows are testable without a PBX.
#[async_trait]
pub trait PbxCommands: Send + Sync {
    /// Raw `core show channels` output, for substring matching.
    async fn show_channels(&self) -> Result<String, PbxError>;

    /// Parsed `core show channels concise` rows.
    async fn show_channels_concise(&self) -> Result<Vec<ConciseChannel>, PbxError>;

    /// Request a hangup for one channel.
    async fn request_hangup(&self, channel: &str) -> Result<String, PbxError>;
}

/// Real implementation shelling out to the Asterisk console.
pub struct AsteriskCli {
    binary: PathBuf,
}

impl AsteriskCli {
    pub fn new() -> Self {
        // The binary lives in different places across distributions.
        let binary = ["/usr/sbin/asterisk", "/usr/bin/asterisk"]
            .into_iter()
            .map(PathBuf::from)
            .find(|p| p.exists())
            .unwrap_or_else(|| PathBuf::from("asterisk"));
        Self { binary }
    }

    async fn run(&self, command: &str) -> Result<String, PbxError> {
        debug!(command, "running PBX console command");
        let output = tokio::time::timeout(
            COMMAND_TIMEOUT,
            Command::new(&self.binary).arg("-rx").arg(command).output(),
        )
        .await
        .map_err(|_| PbxError::Timeout(COMMAND_TIMEOUT))??;

        if output.status.success() {
            Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
            Err(PbxError::CommandFailed(if stderr.is_empty() {
                stdout
            } else {
                stderr
            }))
        }
    }
}

impl Default for AsteriskCli {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PbxCommands for AsteriskCli {
    async fn show_channels(&self) -> Result<String, PbxError> {
        self.run("core show channels").await
    }

    async fn show_channels_concise(&self) -> Result<Vec<ConciseChannel>, PbxError> {
        let output = self.run("core show channels concise").await?;
        Ok(parse_concise_listing(&output))
    }

    async fn request_hangup(&self, channel: &str) -> Result<String, PbxError> {
        self.run(&format!("channel request hangup {channel}")).await
    }
}

/// Parse the `!`-separated concise listing:
/// `channel!context!exten!prio!state!app!data!callerid!...`
pub fn parse_concise_listing(output: &str) -> Vec<ConciseChannel> {
    output
        .lines()
        .filter(|line| !line.trim().is_empty())
        .filter_map(|line| {
            let parts: Vec<&str> = line.split('!').collect();
            if parts.len() < 5 {
                return None;
            }
            Some(ConciseChannel {
                channel: parts[0].to_string(),
                extension: parts[2].to_string(),
                state: parts[4].to_string(),
            })
        })
        .collect()
}

/// Whether the plain channel listing shows a live channel for a
/// recipient. A known leg id must appear on the matching line; without
/// one, any up/ringing line mentioning the number counts.
pub fn channel_matches(listing: &str, phone_number: &str, leg_id: Option<&str>) -> bool {
    listing.lines().any(|line| {
        if !line.contains(phone_number) || !(line.contains("Up") || line.contains("Ringing")) {
            return false;
        }
        match leg_id {
            Some(leg) => line.contains(leg),
            None => true,
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const CONCISE: &str = "\
Local/5551234@from-internal-00000042;1!from-internal!5551234!1!Up!Playback!/var/lib/outdial/media/alert!\"Town\" <5551234>!!3!66!(None)!1712345678.42
Local/5551234@from-internal-00000042;2!from-internal!!1!Up!AppDial!(Outgoing Line)!5551234!!3!66!(None)!1712345678.43
PJSIP/trunk-00000007!outbound!5559999!2!Ringing!Dial!!!!3!12!(None)!1712345678.44";

    #[test]
    fn parses_concise_rows() {
        let rows = parse_concise_listing(CONCISE);
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0].channel, "Local/5551234@from-internal-00000042;1");
        assert_eq!(rows[0].state, "Up");
        assert_eq!(rows[2].extension, "5559999");
        assert_eq!(rows[2].state, "Ringing");
    }

    #[test]
    fn dialed_number_prefers_channel_name() {
        let rows = parse_concise_listing(CONCISE);
        assert_eq!(rows[0].dialed_number(), Some("5551234".to_string()));
        // No number in the channel name: the extension field answers.
        assert_eq!(rows[2].dialed_number(), Some("5559999".to_string()));
    }

    #[test]
    fn skips_malformed_lines() {
        let rows = parse_concise_listing("garbage\n\na!b\n");
        assert!(rows.is_empty());
    }

    #[test]
    fn channel_match_requires_live_state() {
        let listing = "\
Local/5551234@from-internal-0001;1  from-internal  Up       Playback  1712345678.42
Local/5559999@from-internal-0002;1  from-internal  Down     AppDial   1712345678.50";
        assert!(channel_matches(listing, "5551234", None));
        assert!(!channel_matches(listing, "5559999", None));
        assert!(!channel_matches(listing, "5550000", None));
    }

    #[test]
    fn channel_match_checks_leg_id_when_known() {
        let listing =
            "Local/5551234@from-internal-0001;1  from-internal  Ringing  AppDial  1712345678.42";
        assert!(channel_matches(listing, "5551234", Some("1712345678.42")));
        assert!(!channel_matches(listing, "5551234", Some("1712345678.99")));
        assert!(channel_matches(listing, "5551234", None));
    }
}
