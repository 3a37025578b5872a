//! Telnet wire bytes: option negotiation sent at connect time and the
//! stateful scanner that picks NAWS window reports out of client input.
//!
//! Clients interleave negotiation replies with raw keystrokes on the same
//! stream, and a report may be split across reads, so the scanner carries
//! a possible marker prefix between calls. Parsing is best-effort: only a
//! byte-exact marker updates anything, malformed bytes fall through as
//! ordinary text and never fault.

pub const IAC: u8 = 255;
pub const DONT: u8 = 254;
pub const DO: u8 = 253;
pub const WILL: u8 = 251;
pub const SB: u8 = 250;
pub const SE: u8 = 240;

pub const OPT_ECHO: u8 = 1;
pub const OPT_SUPPRESS_GO_AHEAD: u8 = 3;
pub const OPT_NAWS: u8 = 31;
pub const OPT_LINEMODE: u8 = 34;

/// `IAC SB NAWS w_hi w_lo h_hi h_lo IAC SE`
const NAWS_REPORT_LEN: usize = 9;

/// Negotiation request sent once per connection: ask for window size
/// reports and put the client terminal into raw, no-echo mode.
pub fn negotiation_request() -> Vec<u8> {
    vec![
        IAC, DO, OPT_NAWS,
        IAC, WILL, OPT_ECHO,
        IAC, WILL, OPT_SUPPRESS_GO_AHEAD,
        IAC, DO, OPT_SUPPRESS_GO_AHEAD,
        IAC, DONT, OPT_LINEMODE,
    ]
}

/// Sent after negotiation: clear once, home, hide the cursor. Per-frame
/// output only homes the cursor, so redraw stays flicker-free.
pub const SCREEN_SETUP: &[u8] = b"\x1b[2J\x1b[H\x1b[?25l";

/// Per-frame prefix.
pub const CURSOR_HOME: &str = "\x1b[H";

/// Best-effort restore written before a session ends.
pub const CURSOR_RESTORE: &[u8] = b"\x1b[0m\x1b[?25h\r\n";

/// Result of feeding one input chunk through the scanner.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct Scan {
    /// Input with matched window reports stripped out.
    pub text: Vec<u8>,
    /// Last valid window report in the chunk, if any.
    pub window: Option<(u16, u16)>,
}

/// Carries a partial window-report marker across chunk seams.
#[derive(Debug, Default)]
pub struct NawsScanner {
    pending: Vec<u8>,
}

impl NawsScanner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn scan(&mut self, input: &[u8]) -> Scan {
        let mut buf = std::mem::take(&mut self.pending);
        buf.extend_from_slice(input);

        let mut scan = Scan::default();
        let mut i = 0;
        while i < buf.len() {
            let rest = &buf[i..];
            if rest[0] == IAC {
                if rest.len() >= NAWS_REPORT_LEN && is_window_report(&rest[..NAWS_REPORT_LEN]) {
                    let cols = u16::from_be_bytes([rest[3], rest[4]]);
                    let rows = u16::from_be_bytes([rest[5], rest[6]]);
                    // A zero dimension is a report we cannot render to;
                    // strip it but keep the previous geometry.
                    if cols > 0 && rows > 0 {
                        scan.window = Some((cols, rows));
                    }
                    i += NAWS_REPORT_LEN;
                    continue;
                }
                if rest.len() < NAWS_REPORT_LEN && is_window_report(rest) {
                    self.pending = rest.to_vec();
                    return scan;
                }
            }
            scan.text.push(rest[0]);
            i += 1;
        }
        scan
    }
}

fn marker_byte_matches(position: usize, byte: u8) -> bool {
    match position {
        0 => byte == IAC,
        1 => byte == SB,
        2 => byte == OPT_NAWS,
        7 => byte == IAC,
        8 => byte == SE,
        // Positions 3..=6 carry the big-endian width and height.
        _ => true,
    }
}

/// A full marker, or any prefix of one when fewer than nine bytes are
/// available.
fn is_window_report(bytes: &[u8]) -> bool {
    bytes
        .iter()
        .enumerate()
        .all(|(position, &byte)| marker_byte_matches(position, byte))
}

#[cfg(test)]
mod tests {
    use super::{NawsScanner, IAC, SB, SE};

    const REPORT_80X24: [u8; 9] = [255, 250, 31, 0, 80, 0, 24, 255, 240];

    #[test]
    fn whole_report_updates_window_and_leaves_no_text() {
        let mut scanner = NawsScanner::new();
        let scan = scanner.scan(&REPORT_80X24);
        assert_eq!(scan.window, Some((80, 24)));
        assert!(scan.text.is_empty());
    }

    #[test]
    fn report_split_across_chunks_still_matches() {
        let mut scanner = NawsScanner::new();
        let first = scanner.scan(&REPORT_80X24[..5]);
        assert_eq!(first.window, None);
        assert!(first.text.is_empty());

        let second = scanner.scan(&REPORT_80X24[5..]);
        assert_eq!(second.window, Some((80, 24)));
        assert!(second.text.is_empty());
    }

    #[test]
    fn byte_at_a_time_delivery_still_matches() {
        let mut scanner = NawsScanner::new();
        let mut window = None;
        for &byte in &REPORT_80X24 {
            if let Some(w) = scanner.scan(&[byte]).window {
                window = Some(w);
            }
        }
        assert_eq!(window, Some((80, 24)));
    }

    #[test]
    fn mismatched_terminator_leaves_window_unchanged() {
        let mut bad = REPORT_80X24;
        bad[8] = 241;
        let mut scanner = NawsScanner::new();
        let first = scanner.scan(&bad[..5]);
        assert_eq!(first.window, None);
        let second = scanner.scan(&bad[5..]);
        assert_eq!(second.window, None);
        // The near-miss bytes come back out as ordinary text.
        assert_eq!(first.text.len() + second.text.len(), bad.len());
    }

    #[test]
    fn zero_dimension_is_stripped_but_ignored() {
        let zero_width = [255, 250, 31, 0, 0, 0, 24, 255, 240];
        let mut scanner = NawsScanner::new();
        let scan = scanner.scan(&zero_width);
        assert_eq!(scan.window, None);
        assert!(scan.text.is_empty());
    }

    #[test]
    fn keystrokes_around_a_report_survive_stripping() {
        let mut input = b"ab".to_vec();
        input.extend_from_slice(&REPORT_80X24);
        input.extend_from_slice(b"cd");
        let mut scanner = NawsScanner::new();
        let scan = scanner.scan(&input);
        assert_eq!(scan.text, b"abcd");
        assert_eq!(scan.window, Some((80, 24)));
    }

    #[test]
    fn last_of_several_reports_wins() {
        let mut input = REPORT_80X24.to_vec();
        input.extend_from_slice(&[IAC, SB, 31, 0, 100, 0, 40, IAC, SE]);
        let mut scanner = NawsScanner::new();
        let scan = scanner.scan(&input);
        assert_eq!(scan.window, Some((100, 40)));
    }

    #[test]
    fn lone_iac_at_end_of_chunk_is_held_back() {
        let mut scanner = NawsScanner::new();
        let scan = scanner.scan(&[b'x', IAC]);
        assert_eq!(scan.text, b"x");
        // Continuation that rules the marker out flushes it as text.
        let scan = scanner.scan(&[b'y']);
        assert_eq!(scan.text, vec![IAC, b'y']);
    }
}
