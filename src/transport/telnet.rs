use crate::errors::Error;
use crate::transport::base::{
    Transport,
    TransportKind,
    DEFAULT_READ_SIZE,
};
use core::time::Duration;
use log::debug;
use std::io::{
    ErrorKind,
    Read,
    Write,
};
use std::net::{
    TcpStream,
    ToSocketAddrs,
};

/// Telnet command Interpret As Command.
const CMD_IAC: u8 = 255;
/// Telnet command Will.
const CMD_WILL: u8 = 251;
/// Telnet command Wont.
const CMD_WONT: u8 = 252;
/// Telnet command Do.
const CMD_DO: u8 = 253;
/// Telnet command Dont.
const CMD_DONT: u8 = 254;

/// `Telnet` is a raw TCP transport with just enough option negotiation to
/// refuse everything the far end proposes: every DO/DONT is answered with
/// WONT, every WILL/WONT with DONT. Negotiation runs only when a read begins
/// with IAC; when stripping the triples empties the chunk the read is
/// re-issued instead of reporting an empty read.
pub struct Telnet {
    stream: TcpStream,
}

impl Telnet {
    /// Connects to `host:port` within `connect_timeout`.
    pub fn dial(
        host: &str,
        port: u16,
        connect_timeout: Duration,
    ) -> Result<Self, Error> {
        let addr = (host, port)
            .to_socket_addrs()
            .map_err(|err| Error::Transport(format!("resolving {host}:{port}: {err}")))?
            .next()
            .ok_or_else(|| Error::Transport(format!("no address for {host}:{port}")))?;

        let stream = TcpStream::connect_timeout(&addr, connect_timeout)
            .map_err(|err| Error::Transport(format!("connecting to {addr}: {err}")))?;

        stream
            .set_nodelay(true)
            .map_err(|err| Error::Transport(format!("setting nodelay on {addr}: {err}")))?;

        Ok(Self { stream })
    }

    /// Answers and strips leading IAC negotiation triples, returning whatever
    /// payload remains.
    fn negotiate(
        &mut self,
        b: &[u8],
    ) -> Result<Vec<u8>, Error> {
        let mut i = 0;

        while b.len() - i >= 3 && b[i] == CMD_IAC {
            let opt = b[i + 2];

            let reply = match b[i + 1] {
                CMD_DO | CMD_DONT => CMD_WONT,
                CMD_WILL | CMD_WONT => CMD_DONT,
                _ => break,
            };

            debug!("telnet: negotiation verb={} opt={opt}, refusing", b[i + 1]);

            self.stream
                .write_all(&[CMD_IAC, reply, opt])
                .map_err(|err| Error::Transport(format!("negotiation write: {err}")))?;

            i += 3;
        }

        Ok(b[i..].to_vec())
    }
}

impl Transport for Telnet {
    fn read(&mut self) -> Result<Vec<u8>, Error> {
        let mut buf = vec![0_u8; DEFAULT_READ_SIZE];

        loop {
            let n = match self.stream.read(&mut buf) {
                Ok(0) => return Err(Error::Eof(String::from("peer closed connection"))),
                Ok(n) => n,
                Err(err) if matches!(err.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {
                    return Err(Error::Inactivity(format!("read timed out: {err}")))
                }
                Err(err) => return Err(Error::Transport(format!("read: {err}"))),
            };

            let payload = self.negotiate(&buf[..n])?;
            if !payload.is_empty() {
                return Ok(payload);
            }

            // chunk was negotiation only, re-issue the read
        }
    }

    fn write(
        &mut self,
        b: &[u8],
    ) -> Result<(), Error> {
        self.stream
            .write_all(b)
            .map_err(|err| Error::Transport(format!("write: {err}")))
    }

    fn set_read_deadline(
        &mut self,
        timeout: Duration,
    ) -> Result<(), Error> {
        self.stream
            .set_read_timeout(Some(timeout))
            .map_err(|err| Error::Transport(format!("setting read deadline: {err}")))
    }

    fn set_write_deadline(
        &mut self,
        timeout: Duration,
    ) -> Result<(), Error> {
        self.stream
            .set_write_timeout(Some(timeout))
            .map_err(|err| Error::Transport(format!("setting write deadline: {err}")))
    }

    fn close(&mut self) {
        let _ = self.stream.shutdown(std::net::Shutdown::Both);
    }

    fn kind(&self) -> TransportKind {
        TransportKind::Telnet
    }
}
