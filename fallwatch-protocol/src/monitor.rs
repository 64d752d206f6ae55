//! Messages pushed from the relay node to the monitoring host
//!
//! The link carries raw ASCII with no delimiters, so the receiving side has
//! to cut the stream back into messages. [`MessageTokenizer`] does that
//! incrementally, which copes with TCP splitting a message across reads or
//! coalescing several messages into one read.

use std::fmt;

pub const ALARM_MESSAGE: &str = "ALARM: Fall detected! Immediate attention needed!";
pub const CLEARED_MESSAGE: &str = "ALARM CLEARED: Posture returned to normal";
pub const HEARTBEAT_MESSAGE: &str = "PING";

/// One message of the monitor link
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MonitorMessage {
    Alarm,
    Cleared,
    Heartbeat,
}

impl MonitorMessage {
    pub const ALL: [MonitorMessage; 3] = [
        MonitorMessage::Alarm,
        MonitorMessage::Cleared,
        MonitorMessage::Heartbeat,
    ];

    /// Notification for an alarm transition
    pub fn for_alarm(active: bool) -> Self {
        if active {
            MonitorMessage::Alarm
        } else {
            MonitorMessage::Cleared
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            MonitorMessage::Alarm => ALARM_MESSAGE,
            MonitorMessage::Cleared => CLEARED_MESSAGE,
            MonitorMessage::Heartbeat => HEARTBEAT_MESSAGE,
        }
    }

    pub fn as_bytes(self) -> &'static [u8] {
        self.as_str().as_bytes()
    }

    pub fn is_notification(self) -> bool {
        !matches!(self, MonitorMessage::Heartbeat)
    }
}

impl fmt::Display for MonitorMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

enum PrefixMatch {
    Complete(MonitorMessage),
    Partial,
    NoMatch,
}

fn match_prefix(buf: &[u8]) -> PrefixMatch {
    let mut partial = false;
    for message in MonitorMessage::ALL {
        let literal = message.as_bytes();
        if buf.starts_with(literal) {
            return PrefixMatch::Complete(message);
        }
        if literal.starts_with(buf) {
            partial = true;
        }
    }
    if partial {
        PrefixMatch::Partial
    } else {
        PrefixMatch::NoMatch
    }
}

/// Incremental splitter for the monitor link byte stream
#[derive(Debug, Default)]
pub struct MessageTokenizer {
    pending: Vec<u8>,
    skipped: u64,
}

impl MessageTokenizer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a chunk read from the socket and return every complete message
    /// it finished. Whitespace between messages is dropped silently; any
    /// other byte that cannot start a message is skipped and counted.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<MonitorMessage> {
        self.pending.extend_from_slice(chunk);

        let mut messages = Vec::new();
        let mut start = 0;
        while start < self.pending.len() {
            let rest = &self.pending[start..];
            if rest[0].is_ascii_whitespace() {
                start += 1;
                continue;
            }
            match match_prefix(rest) {
                PrefixMatch::Complete(message) => {
                    start += message.as_bytes().len();
                    messages.push(message);
                }
                PrefixMatch::Partial => break,
                PrefixMatch::NoMatch => {
                    self.skipped += 1;
                    start += 1;
                }
            }
        }
        self.pending.drain(..start);
        messages
    }

    /// Bytes discarded because they could not start any known message
    pub fn skipped_bytes(&self) -> u64 {
        self.skipped
    }

    /// Bytes held back waiting for the rest of a message
    pub fn pending_bytes(&self) -> usize {
        self.pending.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_notification_literals() {
        assert_eq!(
            MonitorMessage::for_alarm(true).as_str(),
            "ALARM: Fall detected! Immediate attention needed!"
        );
        assert_eq!(
            MonitorMessage::for_alarm(false).as_str(),
            "ALARM CLEARED: Posture returned to normal"
        );
        assert_eq!(MonitorMessage::Heartbeat.as_bytes().len(), 4);
        assert!(!MonitorMessage::Heartbeat.is_notification());
    }

    #[test]
    fn test_coalesced_messages_are_split() {
        let mut tokenizer = MessageTokenizer::new();
        let stream = format!("{ALARM_MESSAGE}{HEARTBEAT_MESSAGE}{CLEARED_MESSAGE}{CLEARED_MESSAGE}");

        let messages = tokenizer.feed(stream.as_bytes());

        assert_eq!(
            messages,
            vec![
                MonitorMessage::Alarm,
                MonitorMessage::Heartbeat,
                MonitorMessage::Cleared,
                MonitorMessage::Cleared,
            ]
        );
        assert_eq!(tokenizer.pending_bytes(), 0);
        assert_eq!(tokenizer.skipped_bytes(), 0);
    }

    #[test]
    fn test_fragmented_message_waits_for_rest() {
        let mut tokenizer = MessageTokenizer::new();
        let (head, tail) = ALARM_MESSAGE.split_at(8);

        assert!(tokenizer.feed(head.as_bytes()).is_empty());
        assert_eq!(tokenizer.pending_bytes(), head.len());

        assert_eq!(tokenizer.feed(tail.as_bytes()), vec![MonitorMessage::Alarm]);
        assert_eq!(tokenizer.pending_bytes(), 0);
    }

    #[test]
    fn test_shared_prefix_is_ambiguous_until_resolved() {
        let mut tokenizer = MessageTokenizer::new();

        // "ALARM" starts both notifications
        assert!(tokenizer.feed(b"ALARM").is_empty());
        assert_eq!(tokenizer.feed(b" CLEARED: Posture returned to normal"), vec![MonitorMessage::Cleared]);
    }

    #[test]
    fn test_garbage_is_skipped() {
        let mut tokenizer = MessageTokenizer::new();
        let stream = format!("xx\r\n{HEARTBEAT_MESSAGE}?");

        assert_eq!(tokenizer.feed(stream.as_bytes()), vec![MonitorMessage::Heartbeat]);
        assert_eq!(tokenizer.skipped_bytes(), 3);
        assert_eq!(tokenizer.pending_bytes(), 0);
    }
}
