use crate::errors::Error;
use log::debug;
use std::collections::HashMap;
use std::sync::Mutex;

/// A line filter transforms one captured line into zero or more output lines.
/// `line_num` is 1-based and available for filters that only act on headers.
pub type LineFilter = fn(line: &[u8], line_num: usize) -> Result<Vec<Vec<u8>>, Error>;

/// `FilterTable` is the registry of line filters, keyed by the name a model's
/// `line_filter` attribute refers to.
pub struct FilterTable {
    filters: Mutex<HashMap<String, LineFilter>>,
}

impl Default for FilterTable {
    fn default() -> Self {
        Self::new()
    }
}

impl FilterTable {
    /// Returns a table pre-loaded with the built-in filters.
    #[allow(clippy::expect_used)]
    #[must_use]
    pub fn new() -> Self {
        let table = Self {
            filters: Mutex::new(HashMap::new()),
        };

        table
            .register("noop", filter_noop)
            .expect("registering builtin filters cannot collide");
        table
            .register("iosxr", filter_iosxr)
            .expect("registering builtin filters cannot collide");

        table
    }

    /// Registers a filter, rejecting duplicate names.
    #[allow(clippy::expect_used)]
    pub fn register(
        &self,
        name: &str,
        f: LineFilter,
    ) -> Result<(), Error> {
        let mut filters = self.filters.lock().expect("filter table lock poisoned");

        if filters.contains_key(name) {
            return Err(Error::Config(format!("duplicate filter name '{name}'")));
        }

        filters.insert(name.to_owned(), f);

        Ok(())
    }

    /// Runs the named filter over `capture` line by line. An empty name is a
    /// pass-through; an unknown name is a dialogue failure (the model refers
    /// to a filter nobody registered); a failing filter is a filter failure.
    #[allow(clippy::expect_used)]
    pub fn apply(
        &self,
        name: &str,
        capture: &[u8],
    ) -> Result<Vec<u8>, Error> {
        if name.is_empty() || capture.is_empty() {
            return Ok(capture.to_vec());
        }

        let f = *self
            .filters
            .lock()
            .expect("filter table lock poisoned")
            .get(name)
            .ok_or_else(|| Error::Dialogue(format!("unknown line filter '{name}'")))?;

        let had_trailing_newline = capture.ends_with(b"\n");

        let mut segments: Vec<&[u8]> = capture.split(|&b| b == b'\n').collect();
        if had_trailing_newline {
            // the trailing empty segment is the final newline, not a line
            segments.pop();
        }

        let mut out = Vec::with_capacity(capture.len());
        let mut kept = 0_usize;
        let mut dropped = 0_usize;

        for (idx, line) in segments.iter().enumerate() {
            let lines =
                f(line, idx + 1).map_err(|err| err.context(&format!("filter '{name}'")))?;

            if lines.is_empty() {
                dropped += 1;
            }

            for l in lines {
                kept += 1;
                out.extend_from_slice(&l);
                out.push(b'\n');
            }
        }

        // do not invent a trailing newline the capture never had
        if !had_trailing_newline && out.ends_with(b"\n") {
            out.pop();
        }

        debug!("filter '{name}': kept {kept} lines, dropped {dropped}");

        Ok(out)
    }
}

/// Keeps every line as-is.
#[allow(clippy::unnecessary_wraps)]
fn filter_noop(
    line: &[u8],
    _line_num: usize,
) -> Result<Vec<Vec<u8>>, Error> {
    Ok(vec![line.to_vec()])
}

/// Drops the volatile ios-xr header lines ("Building configuration..." and
/// the "!! Last configuration change ..." stamp) that would make every
/// otherwise-identical capture look changed.
#[allow(clippy::unnecessary_wraps)]
fn filter_iosxr(
    line: &[u8],
    _line_num: usize,
) -> Result<Vec<Vec<u8>>, Error> {
    const VOLATILE: &[&[u8]] = &[b"Building configuration", b"!! Last configuration change"];

    if VOLATILE.iter().any(|prefix| line.starts_with(prefix)) {
        return Ok(vec![]);
    }

    Ok(vec![line.to_vec()])
}

#[cfg(test)]
mod tests {
    use super::FilterTable;
    use crate::errors::Error;

    #[test]
    fn empty_name_is_passthrough() {
        let ft = FilterTable::new();
        let capture = b"line one\nline two\n";

        assert_eq!(ft.apply("", capture).unwrap(), capture);
    }

    #[test]
    fn noop_keeps_content() {
        let ft = FilterTable::new();
        let capture = b"line one\nline two\n";

        assert_eq!(ft.apply("noop", capture).unwrap(), capture);
    }

    #[test]
    fn iosxr_drops_volatile_header() {
        let ft = FilterTable::new();
        let capture =
            b"Building configuration...\n!! Last configuration change at 12:00\nhostname lab\n";

        assert_eq!(ft.apply("iosxr", capture).unwrap(), b"hostname lab\n");
    }

    #[test]
    fn unknown_filter_is_a_dialogue_failure() {
        let ft = FilterTable::new();

        assert!(matches!(
            ft.apply("no-such-filter", b"x\n"),
            Err(Error::Dialogue(_))
        ));
    }

    #[test]
    fn duplicate_registration_rejected() {
        let ft = FilterTable::new();

        assert!(matches!(
            ft.register("noop", |line, _| Ok(vec![line.to_vec()])),
            Err(Error::Config(_))
        ));
    }
}
