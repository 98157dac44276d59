use crate::errors::Error;
use crate::session::control::{
    remove_control_chars,
    split_partial_escape,
    strip_prompt_escapes,
};
use crate::transport::base::Transport;
use core::mem::take;
use core::time::Duration;
use regex::bytes::Regex;
use std::time::Instant;

// How far back from the end of the buffer a fresh read can still influence a
// match. Patterns that failed on a prefix are not re-scanned beyond this
// window, which keeps per-byte latency bounded on slow serial-like links.
const MATCH_LOOKBACK: usize = 1024;

/// A successful prompt match: the winning pattern, everything before the match
/// (the captured body) and the matched prompt bytes themselves.
#[derive(Debug)]
pub struct PromptMatch {
    /// Index into the caller's pattern list; on equal match end-offsets the
    /// lowest index wins.
    pub pattern_index: usize,
    /// Buffer contents up to the start of the match.
    pub body: Vec<u8>,
    /// The matched bytes (typically the prompt).
    pub prompt: Vec<u8>,
}

/// `Matcher` feeds a growing byte buffer from a transport and reports the
/// earliest pattern match. It is reusable within one session: leftover bytes
/// after a match become the prefix of the next call's buffer.
pub struct Matcher {
    buf: Vec<u8>,
    scanned: usize,
    carry: Vec<u8>,
    keep_control: bool,
}

impl Matcher {
    /// Returns a fresh matcher. With `keep_control` set, control-character
    /// normalization and escape stripping are skipped and the raw byte stream
    /// is matched and captured as-is.
    #[must_use]
    pub const fn new(keep_control: bool) -> Self {
        Self {
            buf: vec![],
            scanned: 0,
            carry: vec![],
            keep_control,
        }
    }

    /// Waits until any of `patterns` matches the buffer, reading from `t` as
    /// needed. The per-read deadline `read_timeout` is reset on each arrival;
    /// the total deadline `match_timeout` is fixed at call entry. Failures are
    /// classified as [`Error::Inactivity`] (no byte arrived in time),
    /// [`Error::SlowSender`] (total budget exhausted) or [`Error::Eof`] (peer
    /// closed).
    pub fn wait_for(
        &mut self,
        t: &mut dyn Transport,
        patterns: &[Regex],
        read_timeout: Duration,
        match_timeout: Duration,
    ) -> Result<PromptMatch, Error> {
        let entry = Instant::now();

        loop {
            if let Some((pattern_index, start, end)) = self.find_earliest(patterns) {
                let rest = self.buf.split_off(end);
                let mut body = take(&mut self.buf);
                self.buf = rest;
                self.scanned = 0;

                let prompt = body.split_off(start);

                return Ok(PromptMatch {
                    pattern_index,
                    body,
                    prompt,
                });
            }

            self.fill(t, entry, read_timeout, match_timeout)?;
        }
    }

    /// Collects the rest of the stream until the peer closes it. End-of-stream
    /// is success here; the two timeout classifications still apply.
    pub fn read_to_eof(
        &mut self,
        t: &mut dyn Transport,
        read_timeout: Duration,
        match_timeout: Duration,
    ) -> Result<Vec<u8>, Error> {
        let entry = Instant::now();

        loop {
            match self.fill(t, entry, read_timeout, match_timeout) {
                Ok(()) => {}
                Err(Error::Eof(_)) => {
                    let mut out = take(&mut self.buf);
                    out.extend(take(&mut self.carry));
                    self.scanned = 0;

                    return Ok(out);
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// One read under both deadlines, appending the (normalized) bytes to the
    /// buffer.
    fn fill(
        &mut self,
        t: &mut dyn Transport,
        entry: Instant,
        read_timeout: Duration,
        match_timeout: Duration,
    ) -> Result<(), Error> {
        let elapsed = entry.elapsed();
        if elapsed >= match_timeout {
            return Err(Error::SlowSender(format!(
                "no match within {match_timeout:?}"
            )));
        }

        let remaining = match_timeout - elapsed;
        let clipped = remaining < read_timeout;
        let budget = if clipped { remaining } else { read_timeout };

        t.set_read_deadline(budget)?;

        match t.read() {
            Ok(chunk) => {
                self.ingest(&chunk);
                Ok(())
            }
            Err(Error::Inactivity(d)) => {
                if clipped {
                    Err(Error::SlowSender(format!(
                        "no match within {match_timeout:?}"
                    )))
                } else {
                    Err(Error::Inactivity(d))
                }
            }
            Err(err) => Err(err),
        }
    }

    fn ingest(
        &mut self,
        chunk: &[u8],
    ) {
        if self.keep_control {
            self.buf.extend_from_slice(chunk);
            return;
        }

        let mut data = take(&mut self.carry);
        data.extend_from_slice(chunk);

        let (main, carry) = split_partial_escape(data);
        self.carry = carry;

        let stripped = strip_prompt_escapes(&main);

        let (committed, tail) = remove_control_chars(take(&mut self.buf), &stripped);
        self.buf = committed;
        // normalization may reach back into committed bytes, so rewind the
        // scan watermark to wherever the buffer now ends
        self.scanned = self.scanned.min(self.buf.len());
        self.buf.extend(tail);
    }

    /// Finds the match with the smallest end-offset; ties go to the pattern
    /// with the lowest index. Only the bytes that arrived since the last scan
    /// (plus a bounded lookback) are searched.
    fn find_earliest(
        &mut self,
        patterns: &[Regex],
    ) -> Option<(usize, usize, usize)> {
        let from = self.scanned.saturating_sub(MATCH_LOOKBACK);
        let window = &self.buf[from..];

        let mut best: Option<(usize, usize, usize)> = None;

        for (i, pattern) in patterns.iter().enumerate() {
            if let Some(m) = pattern.find(window) {
                let better = match best {
                    None => true,
                    Some((_, _, end)) => from + m.end() < end,
                };

                if better {
                    best = Some((i, from + m.start(), from + m.end()));
                }
            }
        }

        self.scanned = self.buf.len();

        best
    }
}

#[cfg(test)]
mod tests {
    use super::{
        Matcher,
        PromptMatch,
    };
    use crate::errors::Error;
    use crate::transport::base::{
        Transport,
        TransportKind,
    };
    use core::time::Duration;
    use regex::bytes::Regex;
    use std::collections::VecDeque;

    /// Canned transport feeding scripted chunks, then inactivity or EOF.
    struct Script {
        chunks: VecDeque<Vec<u8>>,
        eof_at_end: bool,
    }

    impl Script {
        fn new(
            chunks: &[&[u8]],
            eof_at_end: bool,
        ) -> Self {
            Self {
                chunks: chunks.iter().map(|c| c.to_vec()).collect(),
                eof_at_end,
            }
        }
    }

    impl Transport for Script {
        fn read(&mut self) -> Result<Vec<u8>, Error> {
            match self.chunks.pop_front() {
                Some(chunk) => Ok(chunk),
                None if self.eof_at_end => Err(Error::Eof(String::from("script done"))),
                None => Err(Error::Inactivity(String::from("script empty"))),
            }
        }

        fn write(
            &mut self,
            _b: &[u8],
        ) -> Result<(), Error> {
            Ok(())
        }

        fn set_read_deadline(
            &mut self,
            _timeout: Duration,
        ) -> Result<(), Error> {
            Ok(())
        }

        fn set_write_deadline(
            &mut self,
            _timeout: Duration,
        ) -> Result<(), Error> {
            Ok(())
        }

        fn close(&mut self) {}

        fn kind(&self) -> TransportKind {
            TransportKind::Telnet
        }
    }

    fn patterns(ps: &[&str]) -> Vec<Regex> {
        ps.iter().map(|p| Regex::new(p).unwrap()).collect()
    }

    fn wait(
        m: &mut Matcher,
        t: &mut Script,
        ps: &[Regex],
    ) -> Result<PromptMatch, Error> {
        m.wait_for(t, ps, Duration::from_secs(5), Duration::from_secs(10))
    }

    #[test]
    fn match_across_chunks_with_leftover() {
        let mut t = Script::new(&[b"show ver\nIOS", b" 15.2\nrouter# extra"], false);
        let mut m = Matcher::new(false);
        let ps = patterns(&[r"# $", r"# "]);

        let got = wait(&mut m, &mut t, &ps).unwrap();

        // same end offset: the lowest-indexed pattern wins... but pattern 0
        // anchors to buffer end and "extra" follows, so pattern 1 is the one
        // that matches here
        assert_eq!(got.pattern_index, 1);
        assert_eq!(got.body, b"show ver\nIOS 15.2\nrouter");
        assert_eq!(got.prompt, b"# ");

        // leftover bytes prefix the next call's buffer
        let mut t2 = Script::new(&[b"done# "], false);
        let got2 = wait(&mut m, &mut t2, &patterns(&[r"# "])).unwrap();
        assert_eq!(got2.body, b"extradone");
    }

    #[test]
    fn equal_end_ties_go_to_lowest_index() {
        let mut t = Script::new(&[b"router> "], false);
        let mut m = Matcher::new(false);
        // both match with the same end offset
        let ps = patterns(&[r"> $", r"router> $"]);

        let got = wait(&mut m, &mut t, &ps).unwrap();
        assert_eq!(got.pattern_index, 0);
    }

    #[test]
    fn inactivity_and_slow_sender_classification() {
        let mut t = Script::new(&[], false);
        let mut m = Matcher::new(false);
        let ps = patterns(&[r"never"]);

        let err = m
            .wait_for(&mut t, &ps, Duration::from_secs(5), Duration::from_secs(10))
            .unwrap_err();
        assert!(matches!(err, Error::Inactivity(_)));

        // a zero total budget trips the slow-sender classification immediately
        let err = m
            .wait_for(&mut t, &ps, Duration::from_secs(5), Duration::ZERO)
            .unwrap_err();
        assert!(matches!(err, Error::SlowSender(_)));
    }

    #[test]
    fn eof_classification_and_read_to_eof() {
        let mut t = Script::new(&[b"partial"], true);
        let mut m = Matcher::new(false);

        let err = wait(&mut m, &mut t, &patterns(&[r"never"])).unwrap_err();
        assert!(matches!(err, Error::Eof(_)));

        let mut t = Script::new(&[b"all of ", b"the output"], true);
        let mut m = Matcher::new(false);
        let got = m
            .read_to_eof(&mut t, Duration::from_secs(5), Duration::from_secs(10))
            .unwrap();
        assert_eq!(got, b"all of the output");
    }

    #[test]
    fn normalization_applies_before_matching() {
        // the device re-draws "bad prompt" as "router# " with a lone CR
        let mut t = Script::new(&[b"bad prompt\rrouter# "], false);
        let mut m = Matcher::new(false);

        let got = wait(&mut m, &mut t, &patterns(&[r"(?m)^router# $"])).unwrap();
        assert_eq!(got.body, b"");
        assert_eq!(got.prompt, b"router# ");
    }

    #[test]
    fn keep_control_skips_normalization() {
        let mut t = Script::new(&[b"abc\x08# "], false);
        let mut m = Matcher::new(true);

        let got = wait(&mut m, &mut t, &patterns(&[r"# "])).unwrap();
        assert_eq!(got.body, b"abc\x08");
    }

    #[test]
    fn escape_split_across_reads() {
        let mut t = Script::new(&[b"router\x1b[1", b"m# "], false);
        let mut m = Matcher::new(false);

        let got = wait(&mut m, &mut t, &patterns(&[r"# "])).unwrap();
        assert_eq!(got.body, b"router");
    }
}
