use crate::errors::Error;
use crate::transport::ssh::Ssh;
use crate::transport::telnet::Telnet;
use core::fmt;
use core::time::Duration;
use log::{
    debug,
    info,
};

/// The default telnet port.
pub const DEFAULT_TELNET_PORT: u16 = 23;

/// The default secure shell port.
pub const DEFAULT_SSH_PORT: u16 = 22;

/// The default transport read size -- 8,192 bytes.
pub const DEFAULT_READ_SIZE: usize = 8_192;

/// The default time allowed for establishing a connection.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// The transport flavors a device may list, in priority order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    /// Raw TCP with telnet option negotiation.
    Telnet,
    /// The system ssh binary under a pty.
    Ssh,
}

impl TransportKind {
    /// Parses one transport name.
    pub fn parse(s: &str) -> Result<Self, Error> {
        match s.trim() {
            "telnet" => Ok(Self::Telnet),
            "ssh" => Ok(Self::Ssh),
            other => Err(Error::Config(format!("unknown transport '{other}'"))),
        }
    }

    /// Parses a comma-separated transport list, e.g. "ssh,telnet", preserving
    /// order.
    pub fn parse_list(s: &str) -> Result<Vec<Self>, Error> {
        let kinds = s
            .split(',')
            .filter(|part| !part.trim().is_empty())
            .map(Self::parse)
            .collect::<Result<Vec<_>, _>>()?;

        if kinds.is_empty() {
            return Err(Error::Config(String::from("empty transport list")));
        }

        Ok(kinds)
    }

    /// The name used in logs and fetch replies.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Telnet => "telnet",
            Self::Ssh => "ssh",
        }
    }

    const fn default_port(self) -> u16 {
        match self {
            Self::Telnet => DEFAULT_TELNET_PORT,
            Self::Ssh => DEFAULT_SSH_PORT,
        }
    }
}

impl fmt::Display for TransportKind {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// `Transport` is the connection abstraction every dialogue runs against.
/// Reads block until the read deadline; deadline expiry is reported as
/// [`Error::Inactivity`], peer close as [`Error::Eof`], anything else as
/// [`Error::Transport`].
pub trait Transport {
    /// Read a chunk of bytes from the device.
    fn read(&mut self) -> Result<Vec<u8>, Error>;

    /// Write `b` to the device.
    fn write(
        &mut self,
        b: &[u8],
    ) -> Result<(), Error>;

    /// Set the deadline applied to subsequent reads.
    fn set_read_deadline(
        &mut self,
        timeout: Duration,
    ) -> Result<(), Error>;

    /// Set the deadline applied to subsequent writes.
    fn set_write_deadline(
        &mut self,
        timeout: Duration,
    ) -> Result<(), Error>;

    /// Close the transport. Safe to call on every exit path.
    fn close(&mut self);

    /// Which flavor this transport is.
    fn kind(&self) -> TransportKind;
}

/// Splits "host:port" into its parts, falling back to `default_port` when no
/// port is given.
pub(crate) fn split_host_port(
    host_port: &str,
    default_port: u16,
) -> (String, u16) {
    if let Some((host, port)) = host_port.rsplit_once(':') {
        if let Ok(port) = port.parse::<u16>() {
            return (host.to_owned(), port);
        }
    }

    (host_port.to_owned(), default_port)
}

/// Tries each transport kind in the order given; the first successful
/// connection wins. When every kind fails the error lists each attempt.
pub fn connect(
    host_port: &str,
    kinds: &[TransportKind],
    user: &str,
    connect_timeout: Duration,
) -> Result<Box<dyn Transport + Send>, Error> {
    let mut attempts: Vec<String> = vec![];

    for kind in kinds {
        let (host, port) = split_host_port(host_port, kind.default_port());

        debug!("connect: trying {kind} to {host}:{port}");

        let result: Result<Box<dyn Transport + Send>, Error> = match kind {
            TransportKind::Telnet => {
                Telnet::dial(&host, port, connect_timeout).map(|t| Box::new(t) as _)
            }
            TransportKind::Ssh => {
                Ssh::dial(&host, port, user, connect_timeout).map(|t| Box::new(t) as _)
            }
        };

        match result {
            Ok(t) => {
                debug!("connect: {kind} to {host}:{port} succeeded");

                return Ok(t);
            }
            Err(err) => {
                info!("connect: {kind} to {host}:{port} failed: {err}");

                attempts.push(format!("{kind}: {err}"));
            }
        }
    }

    Err(Error::Transport(format!(
        "all transports failed for {host_port}: {}",
        attempts.join("; ")
    )))
}
