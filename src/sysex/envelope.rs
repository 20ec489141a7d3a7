//! Inbound SysEx envelope parsing and sub-command dispatch

use super::{SYSEX_END, SYSEX_START, VENDOR_ID};

/// Smallest message we accept: start, vendor, one sub-command byte, end.
const MIN_MESSAGE_LEN: usize = 4;

/// Sub-command paths known to this crate.
///
/// The payload slices borrow from the raw message and are still packed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubCommand<'a> {
    /// `02 40 01`: full display frame.
    DisplayFull { row: u8, col: u8, packed: &'a [u8] },
    /// `02 40 02`: partial display update covering `page_count` pages.
    DisplayDelta { first_page: u8, page_count: u8, packed: &'a [u8] },
    /// `02 41 00`: 7-segment digits and dot mask, unpacked.
    SevenSegment { digits: [u8; 4], dots: u8 },
    /// `03 40`: debug console text.
    DebugText(&'a [u8]),
    /// `03 41`: feature status text.
    FeatureStatus(&'a [u8]),
    /// `03 42`: firmware version text.
    Version(&'a [u8]),
    /// `04`: JSON command reply tagged with a session message ID.
    Json { msg_id: u8, body: &'a [u8] },
    /// Any vendor message whose path is not in the table (or whose fixed fields are short).
    Unknown(&'a [u8]),
}

impl SubCommand<'_> {
    /// Short name used in logs.
    pub fn name(&self) -> &'static str {
        match self {
            SubCommand::DisplayFull { .. } => "display-full",
            SubCommand::DisplayDelta { .. } => "display-delta",
            SubCommand::SevenSegment { .. } => "seven-segment",
            SubCommand::DebugText(_) => "debug-text",
            SubCommand::FeatureStatus(_) => "feature-status",
            SubCommand::Version(_) => "version",
            SubCommand::Json { .. } => "json",
            SubCommand::Unknown(_) => "unknown",
        }
    }
}

/// A vendor SysEx message, borrowed from the raw bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Envelope<'a> {
    /// Everything between the vendor byte and the terminator.
    pub body: &'a [u8],
    /// Dispatched sub-command.
    pub command: SubCommand<'a>,
}

/// Parse a raw MIDI message.
///
/// Returns `None` for anything that is not a complete SysEx message carrying our vendor
/// prefix. Foreign SysEx traffic on the port is expected and not an error.
pub fn parse(raw: &[u8]) -> Option<Envelope<'_>> {
    if raw.len() < MIN_MESSAGE_LEN
        || raw[0] != SYSEX_START
        || raw[1] != VENDOR_ID
        || raw[raw.len() - 1] != SYSEX_END
    {
        return None;
    }

    let body = &raw[2..raw.len() - 1];
    Some(Envelope { body, command: dispatch(body) })
}

fn dispatch(body: &[u8]) -> SubCommand<'_> {
    match body {
        [0x02, 0x40, 0x01, row, col, packed @ ..] => {
            SubCommand::DisplayFull { row: *row, col: *col, packed }
        }
        [0x02, 0x40, 0x02, first_page, page_count, packed @ ..] => {
            SubCommand::DisplayDelta { first_page: *first_page, page_count: *page_count, packed }
        }
        [0x02, 0x41, 0x00, d0, d1, d2, d3, dots, ..] => {
            SubCommand::SevenSegment { digits: [*d0, *d1, *d2, *d3], dots: *dots }
        }
        [0x03, 0x40, text @ ..] => SubCommand::DebugText(text),
        [0x03, 0x41, text @ ..] => SubCommand::FeatureStatus(text),
        [0x03, 0x42, text @ ..] => SubCommand::Version(text),
        [0x04, msg_id, body @ ..] => SubCommand::Json { msg_id: *msg_id, body },
        other => SubCommand::Unknown(other),
    }
}

/// Decode device text: UTF-8 (lossy), with NUL padding removed.
pub fn text_payload(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).trim_matches('\0').to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn foreign_and_truncated_messages_are_ignored() {
        assert_eq!(parse(&[]), None);
        assert_eq!(parse(&[0xF0, 0x7D, 0xF7]), None);
        // Another vendor
        assert_eq!(parse(&[0xF0, 0x41, 0x10, 0x42, 0xF7]), None);
        // Missing terminator
        assert_eq!(parse(&[0xF0, 0x7D, 0x03, 0x40, 0x41]), None);
        // Not SysEx at all (note on)
        assert_eq!(parse(&[0x90, 0x3C, 0x7F, 0x00]), None);
    }

    #[test]
    fn dispatches_known_paths() {
        let full = [0xF0, 0x7D, 0x02, 0x40, 0x01, 0x00, 0x00, 0x44, 0x12, 0xF7];
        assert_eq!(
            parse(&full).unwrap().command,
            SubCommand::DisplayFull { row: 0, col: 0, packed: &[0x44, 0x12] }
        );

        let delta = [0xF0, 0x7D, 0x02, 0x40, 0x02, 0x02, 0x01, 0x44, 0x12, 0xF7];
        assert_eq!(
            parse(&delta).unwrap().command,
            SubCommand::DisplayDelta { first_page: 2, page_count: 1, packed: &[0x44, 0x12] }
        );

        let seg = [0xF0, 0x7D, 0x02, 0x41, 0x00, 0x3F, 0x06, 0x5B, 0x4F, 0x02, 0xF7];
        assert_eq!(
            parse(&seg).unwrap().command,
            SubCommand::SevenSegment { digits: [0x3F, 0x06, 0x5B, 0x4F], dots: 0x02 }
        );

        let json = [0xF0, 0x7D, 0x04, 0x41, b'{', b'}', 0xF7];
        assert_eq!(parse(&json).unwrap().command, SubCommand::Json { msg_id: 0x41, body: b"{}" });

        let version = [0xF0, 0x7D, 0x03, 0x42, b'4', b'.', b'1', 0xF7];
        assert_eq!(parse(&version).unwrap().command, SubCommand::Version(b"4.1"));
    }

    #[test]
    fn unmatched_paths_are_unknown() {
        let msg = [0xF0, 0x7D, 0x02, 0x7F, 0x01, 0xF7];
        assert_eq!(parse(&msg).unwrap().command, SubCommand::Unknown(&[0x02, 0x7F, 0x01]));

        // Seven-segment with too few digit bytes
        let short = [0xF0, 0x7D, 0x02, 0x41, 0x00, 0x01, 0xF7];
        assert_eq!(parse(&short).unwrap().command.name(), "unknown");
    }

    #[test]
    fn text_payload_strips_nul_padding() {
        assert_eq!(text_payload(b"\0hello\nworld\0\0"), "hello\nworld");
    }
}
