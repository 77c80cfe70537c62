//! Minimal Telnet option handling for TCP connections
//!
//! Only the 3-byte negotiation commands (`IAC DO|DONT|WILL|WONT option`) are
//! recognised. Echo and Suppress-Go-Ahead are accepted, everything else is
//! refused. Both operations are pure so they can run on any chunk.

// Telnet protocol constants
/// Interpret As Command
pub const IAC: u8 = 255;
/// Refuse / request disable
pub const DONT: u8 = 254;
/// Request enable
pub const DO: u8 = 253;
/// Refuse to perform
pub const WONT: u8 = 252;
/// Offer to perform
pub const WILL: u8 = 251;

/// Echo option
pub const OPT_ECHO: u8 = 1;
/// Suppress Go Ahead option
pub const OPT_SUPPRESS_GO_AHEAD: u8 = 3;

const ACCEPTED_OPTIONS: [u8; 2] = [OPT_ECHO, OPT_SUPPRESS_GO_AHEAD];

fn is_negotiation_verb(byte: u8) -> bool {
    matches!(byte, DO | DONT | WILL | WONT)
}

/// Iterate over complete negotiation triples as `(offset, command, option)`
fn commands(chunk: &[u8]) -> impl Iterator<Item = (usize, u8, u8)> + '_ {
    let mut i = 0;
    std::iter::from_fn(move || {
        while i + 2 < chunk.len() {
            if chunk[i] == IAC && is_negotiation_verb(chunk[i + 1]) {
                let found = (i, chunk[i + 1], chunk[i + 2]);
                i += 3;
                return Some(found);
            }
            i += 1;
        }
        None
    })
}

/// Whether the chunk contains an IAC marker at all
pub fn contains_iac(chunk: &[u8]) -> bool {
    chunk.contains(&IAC)
}

/// Build the reply for every DO/WILL request in `chunk`.
///
/// DO is answered WILL/WONT and WILL is answered DO/DONT depending on the
/// allow-list. Incoming DONT/WONT need no answer.
pub fn negotiate(chunk: &[u8]) -> Vec<u8> {
    let mut reply = Vec::new();

    for (_, command, option) in commands(chunk) {
        let accepted = ACCEPTED_OPTIONS.contains(&option);
        let answer = match command {
            DO if accepted => WILL,
            DO => WONT,
            WILL if accepted => DO,
            WILL => DONT,
            _ => continue,
        };
        tracing::debug!(command, option, answer, "telnet negotiation");
        reply.extend_from_slice(&[IAC, answer, option]);
    }

    reply
}

/// Remove every complete negotiation triple, keeping all other bytes in order
pub fn strip(chunk: &[u8]) -> Vec<u8> {
    let mut output = Vec::with_capacity(chunk.len());
    let mut last = 0;

    for (offset, _, _) in commands(chunk) {
        output.extend_from_slice(&chunk[last..offset]);
        last = offset + 3;
    }
    output.extend_from_slice(&chunk[last..]);

    output
}

/// Length of a negotiation sequence cut off at the end of `chunk`.
///
/// Returns 1 for a trailing `IAC`, 2 for a trailing `IAC verb`, otherwise 0.
/// The receiver keeps these bytes for the next buffer instead of treating
/// them as payload.
pub fn incomplete_tail(chunk: &[u8]) -> usize {
    // A tail is only incomplete if it is not itself the end of a full triple
    let complete_end = commands(chunk).last().map_or(0, |(offset, _, _)| offset + 3);

    match chunk {
        [.., IAC] if chunk.len() > complete_end => 1,
        [.., IAC, verb] if is_negotiation_verb(*verb) && chunk.len() - 1 > complete_end => 2,
        _ => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_without_iac_is_identity() {
        let data = b"Sample ID\tLOT123G\r\nOK\r\n";
        assert_eq!(strip(data), data.to_vec());
        assert!(negotiate(data).is_empty());
    }

    #[test]
    fn test_strip_removes_triples_preserving_order() {
        let data = [
            b'A', IAC, DO, OPT_ECHO, b'B', b'C', IAC, WILL, 24, IAC, DONT, 31, b'D',
        ];
        assert_eq!(strip(&data), b"ABCD".to_vec());
    }

    #[test]
    fn test_negotiate_accepts_allow_list() {
        let data = [IAC, DO, OPT_ECHO, IAC, WILL, OPT_SUPPRESS_GO_AHEAD];
        assert_eq!(
            negotiate(&data),
            vec![IAC, WILL, OPT_ECHO, IAC, DO, OPT_SUPPRESS_GO_AHEAD]
        );
    }

    #[test]
    fn test_negotiate_refuses_other_options() {
        let data = [IAC, DO, 24, IAC, WILL, 31];
        assert_eq!(negotiate(&data), vec![IAC, WONT, 24, IAC, DONT, 31]);
    }

    #[test]
    fn test_negotiate_ignores_dont_and_wont() {
        let data = [IAC, DONT, OPT_ECHO, IAC, WONT, OPT_ECHO];
        assert!(negotiate(&data).is_empty());
        assert!(strip(&data).is_empty());
    }

    #[test]
    fn test_truncated_sequence_is_left_alone() {
        let data = [b'x', IAC, DO];
        assert!(negotiate(&data).is_empty());
        assert_eq!(strip(&data), data.to_vec());
        assert_eq!(incomplete_tail(&data), 2);
        assert_eq!(incomplete_tail(&[b'x', IAC]), 1);
    }

    #[test]
    fn test_incomplete_tail_ignores_complete_triples() {
        assert_eq!(incomplete_tail(&[IAC, DO, OPT_ECHO]), 0);
        // Option byte 255 closes a triple, it does not open a new one
        assert_eq!(incomplete_tail(&[IAC, WILL, IAC]), 0);
        assert_eq!(incomplete_tail(b"plain"), 0);
    }
}
