//! Parsed asynchronous events.

use super::frame::AmiFrame;

/// An asynchronous event block received on the control channel.
///
/// Wraps the raw frame and adds typed accessors for the fields the
/// correlation logic cares about. Every accessor returns `Option` — the
/// event stream is noisy and most fields are present only on some event
/// types.
#[derive(Debug, Clone)]
pub struct AmiEvent {
    frame: AmiFrame,
}

impl AmiEvent {
    /// Wrap a frame that carries an `Event` key. Returns `None` for
    /// response blocks and noise.
    pub fn from_frame(frame: AmiFrame) -> Option<Self> {
        frame.is_event().then_some(Self { frame })
    }

    /// The event type, e.g. `Newstate`, `Hangup`, `OriginateResponse`.
    pub fn event_type(&self) -> &str {
        self.frame.get("Event").unwrap_or_default()
    }

    /// The action token echoed from the originating request.
    pub fn action_id(&self) -> Option<&str> {
        self.frame.get("ActionID")
    }

    /// The signaling channel's unique id for this call leg.
    pub fn unique_id(&self) -> Option<&str> {
        self.frame.get("Uniqueid")
    }

    pub fn channel(&self) -> Option<&str> {
        self.frame.get("Channel")
    }

    pub fn caller_id_num(&self) -> Option<&str> {
        self.frame.get("CallerIDNum")
    }

    pub fn connected_line_num(&self) -> Option<&str> {
        self.frame.get("ConnectedLineNum")
    }

    pub fn exten(&self) -> Option<&str> {
        self.frame.get("Exten")
    }

    /// Human-readable channel state on `Newstate` events.
    pub fn channel_state_desc(&self) -> Option<&str> {
        self.frame.get("ChannelStateDesc")
    }

    /// Human-readable disconnect cause on `Hangup` events.
    pub fn cause_txt(&self) -> Option<&str> {
        self.frame.get("Cause-txt")
    }

    /// Keypad digit on `DTMFEnd` events.
    pub fn digit(&self) -> Option<&str> {
        self.frame.get("Digit")
    }

    /// `Success` / `Failure` on acknowledgement events.
    pub fn response(&self) -> Option<&str> {
        self.frame.get("Response")
    }

    /// Failure reason on acknowledgement events.
    pub fn reason(&self) -> Option<&str> {
        self.frame.get("Reason")
    }

    /// Free-form numeric user field carried by channel events.
    pub fn user_field(&self) -> Option<&str> {
        self.frame.get("UserField")
    }

    /// Access the underlying frame for field scans.
    pub fn frame(&self) -> &AmiFrame {
        &self.frame
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wraps_only_event_frames() {
        let event = AmiFrame::parse("Event: Hangup\r\nCause-txt: Normal Clearing");
        let response = AmiFrame::parse("Response: Success\r\nMessage: Authentication accepted");
        assert!(AmiEvent::from_frame(event).is_some());
        assert!(AmiEvent::from_frame(response).is_none());
    }

    #[test]
    fn typed_accessors() {
        let frame = AmiFrame::parse(
            "Event: OriginateResponse\r\nResponse: Failure\r\nReason: 3\r\nActionID: tok-1\r\nUniqueid: 5.1",
        );
        let ev = match AmiEvent::from_frame(frame) {
            Some(ev) => ev,
            None => unreachable!("frame carries an Event key"),
        };
        assert_eq!(ev.event_type(), "OriginateResponse");
        assert_eq!(ev.response(), Some("Failure"));
        assert_eq!(ev.reason(), Some("3"));
        assert_eq!(ev.action_id(), Some("tok-1"));
        assert_eq!(ev.unique_id(), Some("5.1"));
    }
}
