use thiserror::Error;

/// `Error` is the crate-wide error type. Variants mirror the failure kinds the
/// engine distinguishes: transport problems, the two timeout flavors the match
/// engine reports, end-of-stream, dialogue sequence violations, filter and
/// store failures, configuration lookups, and the changes-only dedup sentinel.
#[derive(Debug, Error)]
pub enum Error {
    /// Connect, read or write failure on the underlying transport.
    #[error("transport: {0}")]
    Transport(String),

    /// No byte arrived within the per-read timeout.
    #[error("inactivity: {0}")]
    Inactivity(String),

    /// Total elapsed time exceeded the full-match timeout.
    #[error("slow sender: {0}")]
    SlowSender(String),

    /// The peer closed the stream.
    #[error("end of stream: {0}")]
    Eof(String),

    /// The prompt sequence was violated, enable was refused, or the dialogue
    /// otherwise could not make progress.
    #[error("dialogue: {0}")]
    Dialogue(String),

    /// A line filter failed while transforming the capture.
    #[error("filter: {0}")]
    Filter(String),

    /// A repository write, rename, list or size-limit failure.
    #[error("store: {0}")]
    Store(String),

    /// A configuration lookup miss or an invalid configured value.
    #[error("config: {0}")]
    Config(String),

    /// Sentinel for the changes-only path: the fresh capture equals the most
    /// recent retained generation, so no new generation was written.
    #[error("capture unchanged from previous generation")]
    Unchanged,
}

impl Error {
    /// True for the two timeout flavors reported by the match engine.
    pub const fn is_timeout(&self) -> bool {
        matches!(self, Self::Inactivity(_) | Self::SlowSender(_))
    }

    /// Rewraps the error with a context prefix, preserving its kind.
    #[must_use]
    pub fn context(
        self,
        ctx: &str,
    ) -> Self {
        match self {
            Self::Transport(d) => Self::Transport(format!("{ctx}: {d}")),
            Self::Inactivity(d) => Self::Inactivity(format!("{ctx}: {d}")),
            Self::SlowSender(d) => Self::SlowSender(format!("{ctx}: {d}")),
            Self::Eof(d) => Self::Eof(format!("{ctx}: {d}")),
            Self::Dialogue(d) => Self::Dialogue(format!("{ctx}: {d}")),
            Self::Filter(d) => Self::Filter(format!("{ctx}: {d}")),
            Self::Store(d) => Self::Store(format!("{ctx}: {d}")),
            Self::Config(d) => Self::Config(format!("{ctx}: {d}")),
            Self::Unchanged => Self::Unchanged,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::Error;

    #[test]
    fn timeout_classification() {
        assert!(Error::Inactivity(String::from("x")).is_timeout());
        assert!(Error::SlowSender(String::from("x")).is_timeout());
        assert!(!Error::Eof(String::from("x")).is_timeout());
        assert!(!Error::Transport(String::from("x")).is_timeout());
    }

    #[test]
    fn context_keeps_kind() {
        let err = Error::Dialogue(String::from("no prompt")).context("login");
        assert!(matches!(err, Error::Dialogue(ref d) if d == "login: no prompt"));

        assert!(matches!(Error::Unchanged.context("save"), Error::Unchanged));
    }
}
