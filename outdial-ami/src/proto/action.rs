//! Outbound action blocks.

use std::fmt::Write as _;

/// An outbound request on the control channel.
///
/// Serialized as `Action: <name>` followed by the parameter lines and a
/// terminating blank line.
#[derive(Debug, Clone)]
pub struct AmiAction {
    name: String,
    fields: Vec<(String, String)>,
}

impl AmiAction {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            fields: Vec::new(),
        }
    }

    /// Append a parameter line.
    pub fn field(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.fields.push((key.into(), value.into()));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The `ActionID` parameter, if one was attached.
    pub fn action_id(&self) -> Option<&str> {
        self.fields
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case("ActionID"))
            .map(|(_, v)| v.as_str())
    }

    /// Serialize to the wire format, including the terminating blank line.
    pub fn serialize(&self) -> String {
        let mut out = format!("Action: {}\r\n", self.name);
        for (key, value) in &self.fields {
            // write! to a String cannot fail.
            let _ = write!(out, "{key}: {value}\r\n");
        }
        out.push_str("\r\n");
        out
    }

    /// The login block. `Events: on` subscribes to the full event stream.
    pub fn login(username: &str, secret: &str) -> Self {
        Self::new("Login")
            .field("Username", username)
            .field("Secret", secret)
            .field("Events", "on")
    }

    /// Best-effort logoff sent before closing the socket.
    pub fn logoff() -> Self {
        Self::new("Logoff")
    }

    /// Keep-alive probe.
    pub fn ping() -> Self {
        Self::new("Ping")
    }

    /// Build an origination block from a request.
    pub fn originate(req: &OriginateRequest) -> Self {
        let variables = format!(
            "CAMPAIGN_ID={},DIAL_NUMBER={},MEMBER_ID={},FORCE_CALLER_ID={}",
            req.campaign_id, req.number, req.member_id, req.caller_id_name
        );
        Self::new("Originate")
            .field("Channel", format!("Local/{}@{}", req.number, req.context))
            .field("Application", "Playback")
            .field("Data", &req.playback_path)
            .field(
                "CallerID",
                format!("\"{}\" <{}>", req.caller_id_name, req.number),
            )
            .field("Async", "true")
            .field("Timeout", req.timeout_ms.to_string())
            .field("UserField", req.campaign_id.to_string())
            .field("Variable", variables)
            .field("ActionID", &req.action_id)
    }
}

/// Parameters for one outbound call attempt.
///
/// The campaign and member ids ride along as channel variables so that
/// later asynchronous events can be correlated even when the
/// acknowledgement is lost.
#[derive(Debug, Clone)]
pub struct OriginateRequest {
    /// Dialed number.
    pub number: String,
    /// Dialplan context for the local channel.
    pub context: String,
    /// Playable asset path, without extension.
    pub playback_path: String,
    /// Caller-id display text.
    pub caller_id_name: String,
    /// Campaign the call belongs to.
    pub campaign_id: i64,
    /// Recipient directory id.
    pub member_id: i64,
    /// Ring timeout in milliseconds.
    pub timeout_ms: u32,
    /// Client-generated token echoed by the acknowledgement and later
    /// events for this call leg.
    pub action_id: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn login_serializes_with_terminator() {
        let wire = AmiAction::login("dialer", "hunter2").serialize();
        assert!(wire.starts_with("Action: Login\r\n"));
        assert!(wire.contains("Username: dialer\r\n"));
        assert!(wire.contains("Secret: hunter2\r\n"));
        assert!(wire.contains("Events: on\r\n"));
        assert!(wire.ends_with("\r\n\r\n"));
    }

    #[test]
    fn originate_carries_correlation_fields() {
        let req = OriginateRequest {
            number: "5551234".into(),
            context: "from-internal".into(),
            playback_path: "/var/lib/outdial/media/storm-warning".into(),
            caller_id_name: "Town Alerts".into(),
            campaign_id: 42,
            member_id: 7,
            timeout_ms: 45_000,
            action_id: "tok-abc".into(),
        };
        let action = AmiAction::originate(&req);
        let wire = action.serialize();
        assert!(wire.contains("Channel: Local/5551234@from-internal\r\n"));
        assert!(wire.contains("Application: Playback\r\n"));
        assert!(wire.contains("CallerID: \"Town Alerts\" <5551234>\r\n"));
        assert!(wire.contains("UserField: 42\r\n"));
        assert!(wire.contains(
            "Variable: CAMPAIGN_ID=42,DIAL_NUMBER=5551234,MEMBER_ID=7,FORCE_CALLER_ID=Town Alerts\r\n"
        ));
        assert_eq!(action.action_id(), Some("tok-abc"));
    }
}
