/// Carriage return.
pub const CR: u8 = 0x0d;

/// Line feed.
pub const LF: u8 = 0x0a;

/// Backspace.
pub const BS: u8 = 0x08;

/// Escape.
pub const ESC: u8 = 0x1b;

// Longest prompt-column escape we bother recognizing: ESC '[' plus digits.
const MAX_ESCAPE_DIGITS: usize = 10;

/// Interprets backspace and carriage-return bytes in a newly arrived suffix
/// against the previously committed buffer, returning the new (committed,
/// suffix) partition so callers can retry match attempts without re-processing.
///
/// Semantics, byte by byte over `suffix`:
///
/// - LF is preserved.
/// - BS deletes the previous byte of the current region: the suffix when it
///   has accumulated output, otherwise the last byte of the committed buffer.
/// - CR immediately followed by LF is an ordinary line ending and passes
///   through. A lone CR means the line is being re-drawn: it clears the suffix
///   back to its most recent LF, and when the suffix holds no LF it clears the
///   whole suffix plus the committed buffer's trailing line back to its last
///   LF.
/// - Everything else passes through.
///
/// The committed buffer itself is never re-scanned; only BS/CR arriving in the
/// suffix can reach back into it.
pub fn remove_control_chars(
    mut buf: Vec<u8>,
    suffix: &[u8],
) -> (Vec<u8>, Vec<u8>) {
    let mut out: Vec<u8> = Vec::with_capacity(suffix.len());

    let mut i = 0;
    while i < suffix.len() {
        let b = suffix[i];

        match b {
            LF => out.push(LF),
            BS => {
                if out.pop().is_none() {
                    buf.pop();
                }
            }
            CR => {
                if suffix.get(i + 1) == Some(&LF) {
                    out.push(CR);
                    out.push(LF);
                    i += 2;
                    continue;
                }

                // line re-drawn: drop back to the last completed line
                if let Some(p) = out.iter().rposition(|&c| c == LF) {
                    out.truncate(p + 1);
                } else {
                    out.clear();

                    if let Some(p) = buf.iter().rposition(|&c| c == LF) {
                        buf.truncate(p + 1);
                    } else {
                        buf.clear();
                    }
                }
            }
            _ => out.push(b),
        }

        i += 1;
    }

    (buf, out)
}

/// Recognizes the digits-then-`m` tail of the restricted SGR escape form. If
/// `buf` starts with at least one ASCII digit directly followed by `m`,
/// returns the length of that prefix including the `m` and true; otherwise
/// `(0, false)`. Bytes past the recognized prefix are ignored.
pub fn prefix_number_m(buf: &[u8]) -> (usize, bool) {
    let mut i = 0;

    while i < buf.len() && buf[i].is_ascii_digit() {
        i += 1;
    }

    if i > 0 && buf.get(i) == Some(&b'm') {
        (i + 1, true)
    } else {
        (0, false)
    }
}

/// Removes prompt-column escape sequences -- `ESC [ <digits> m` and the bare
/// `ESC <digits> m` form -- from `b`. Unrecognized escape bytes pass through.
pub fn strip_prompt_escapes(b: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(b.len());

    let mut i = 0;
    while i < b.len() {
        if b[i] == ESC {
            let rest = if b.get(i + 1) == Some(&b'[') {
                i + 2
            } else {
                i + 1
            };

            let (n, found) = prefix_number_m(&b[rest..]);
            if found {
                i = rest + n;
                continue;
            }
        }

        out.push(b[i]);
        i += 1;
    }

    out
}

/// Splits `data` so that a trailing incomplete escape sequence (ESC, optional
/// `[`, digits, no terminating `m` yet) is carried over to the next read
/// instead of leaking into the match buffer.
pub(crate) fn split_partial_escape(mut data: Vec<u8>) -> (Vec<u8>, Vec<u8>) {
    let Some(pos) = data.iter().rposition(|&c| c == ESC) else {
        return (data, vec![]);
    };

    let tail = &data[pos + 1..];
    if tail.len() > MAX_ESCAPE_DIGITS + 1 {
        return (data, vec![]);
    }

    let digits = if tail.first() == Some(&b'[') {
        &tail[1..]
    } else {
        tail
    };

    if digits.iter().all(u8::is_ascii_digit) {
        let carry = data.split_off(pos);
        return (data, carry);
    }

    (data, vec![])
}
