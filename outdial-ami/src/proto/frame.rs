//! Parsing and serialization of raw `Key: Value` blocks.

/// The blank line that terminates every block on the wire.
pub const BLOCK_TERMINATOR: &str = "\r\n\r\n";

/// A parsed wire block: an ordered list of `(key, value)` pairs.
///
/// Order is preserved because the same key can legally repeat (e.g.
/// multiple `Variable` lines on channel events) and the correlation
/// fallbacks scan fields in wire order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AmiFrame {
    fields: Vec<(String, String)>,
}

impl AmiFrame {
    /// Parse one block (without its terminating blank line).
    ///
    /// Lines without a `": "` separator are ignored; the signaling
    /// stream occasionally emits free-text lines and the protocol treats
    /// them as noise.
    pub fn parse(block: &str) -> Self {
        let fields = block
            .split("\r\n")
            .filter(|line| !line.is_empty())
            .filter_map(|line| {
                line.split_once(": ")
                    .map(|(k, v)| (k.to_string(), v.to_string()))
            })
            .collect();
        Self { fields }
    }

    /// First value for `key`, compared ASCII case-insensitively.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v.as_str())
    }

    /// Iterate all `(key, value)` pairs in wire order.
    pub fn fields(&self) -> impl Iterator<Item = (&str, &str)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Whether this block is an asynchronous event.
    pub fn is_event(&self) -> bool {
        self.get("Event").is_some()
    }

    /// Whether this block is a reply to an action.
    pub fn is_response(&self) -> bool {
        self.get("Response").is_some()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

/// Split complete blocks off the front of `buffer`, leaving any partial
/// trailing block in place.
pub(crate) fn drain_blocks(buffer: &mut String) -> Vec<AmiFrame> {
    let mut frames = Vec::new();
    while let Some(pos) = buffer.find(BLOCK_TERMINATOR) {
        let block: String = buffer.drain(..pos + BLOCK_TERMINATOR.len()).collect();
        let frame = AmiFrame::parse(block.trim_end_matches(BLOCK_TERMINATOR));
        if !frame.is_empty() {
            frames.push(frame);
        }
    }
    frames
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_key_value_lines() {
        let frame = AmiFrame::parse("Event: Newstate\r\nChannelStateDesc: Ringing\r\nUniqueid: 171234.56");
        assert_eq!(frame.get("Event"), Some("Newstate"));
        assert_eq!(frame.get("ChannelStateDesc"), Some("Ringing"));
        assert_eq!(frame.get("Uniqueid"), Some("171234.56"));
        assert!(frame.is_event());
        assert!(!frame.is_response());
    }

    #[test]
    fn lookup_is_case_insensitive() {
        let frame = AmiFrame::parse("Event: Hangup\r\nCause-txt: User busy");
        assert_eq!(frame.get("cause-txt"), Some("User busy"));
    }

    #[test]
    fn ignores_malformed_lines() {
        let frame = AmiFrame::parse("Event: DTMFEnd\r\ngarbage without separator\r\nDigit: 0");
        assert_eq!(frame.get("Digit"), Some("0"));
        assert_eq!(frame.fields().count(), 2);
    }

    #[test]
    fn value_may_contain_separator() {
        let frame = AmiFrame::parse("AppData: path: /var/lib/sounds/foo");
        assert_eq!(frame.get("AppData"), Some("path: /var/lib/sounds/foo"));
    }

    #[test]
    fn drains_complete_blocks_and_keeps_partial_tail() {
        let mut buffer = String::from(
            "Event: Newstate\r\nUniqueid: 1\r\n\r\nEvent: Hangup\r\nUniqueid: 1\r\n\r\nEvent: Newsta",
        );
        let frames = drain_blocks(&mut buffer);
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].get("Event"), Some("Newstate"));
        assert_eq!(frames[1].get("Event"), Some("Hangup"));
        assert_eq!(buffer, "Event: Newsta");
    }
}
