use crate::errors::Error;
use crate::transport::base::{
    Transport,
    TransportKind,
    DEFAULT_READ_SIZE,
};
use crate::util::pty::PtyProcess;
use core::time::Duration;
use log::debug;
use nix::poll::{
    poll,
    PollFd,
    PollFlags,
};
use nix::unistd::dup;
use std::fs::File;
use std::io::{
    ErrorKind,
    Read,
    Write,
};
use std::os::fd::RawFd;
use std::os::unix::io::{
    AsRawFd,
    FromRawFd,
};
use std::process::Command;

/// The binary driving the secure shell transport.
const SSH_BIN: &str = "ssh";

/// `Ssh` runs the system ssh binary under a pty and exposes the pty master as
/// the byte stream. Password authentication happens in-channel: the device's
/// password prompt flows through this transport and the login dialogue answers
/// it, exactly as over telnet.
pub struct Ssh {
    process: PtyProcess,
    file: File,
    file_handle: RawFd,
    read_deadline: Duration,
}

impl Ssh {
    /// Spawns `ssh -l user host -p port` under a pty.
    ///
    /// Host keys are not pinned: the collector talks to fleets whose keys
    /// churn, and transport privacy is what the capture needs.
    pub fn dial(
        host: &str,
        port: u16,
        user: &str,
        connect_timeout: Duration,
    ) -> Result<Self, Error> {
        let mut args = vec![
            host.to_owned(),
            String::from("-p"),
            format!("{port}"),
            String::from("-o"),
            format!("ConnectTimeout={}", connect_timeout.as_secs().max(1)),
            String::from("-o"),
            String::from("NumberOfPasswordPrompts=1"),
            String::from("-o"),
            String::from("StrictHostKeyChecking=no"),
            String::from("-o"),
            String::from("UserKnownHostsFile=/dev/null"),
        ];

        if !user.is_empty() {
            args.extend([String::from("-l"), user.to_owned()]);
        }

        debug!("ssh: spawning '{SSH_BIN}' with args {args:?}");

        let mut command = Command::new(SSH_BIN);
        command.args(args);

        let process = PtyProcess::new(command)?;

        let fd = dup(process.pty.as_raw_fd())
            .map_err(|err| Error::Transport(format!("duplicating pty handle: {err}")))?;

        // SAFETY: fd was just dup'd from a valid pty master descriptor.
        let file = unsafe { File::from_raw_fd(fd) };
        let file_handle = file.as_raw_fd();

        Ok(Self {
            process,
            file,
            file_handle,
            read_deadline: Duration::from_secs(10),
        })
    }
}

impl Transport for Ssh {
    fn read(&mut self) -> Result<Vec<u8>, Error> {
        let millis = i32::try_from(self.read_deadline.as_millis())
            .map_err(|_| Error::Transport(String::from("read deadline out of range")))?;

        let fd = PollFd::new(self.file_handle, PollFlags::POLLIN);

        let ready = poll(&mut [fd], millis)
            .map_err(|err| Error::Transport(format!("polling pty: {err}")))?;

        if ready < 1 {
            if !self.process.alive() {
                return Err(Error::Eof(String::from("ssh process exited")));
            }

            return Err(Error::Inactivity(format!(
                "no data within {:?}",
                self.read_deadline
            )));
        }

        let mut buf = vec![0_u8; DEFAULT_READ_SIZE];

        match self.file.read(&mut buf) {
            Ok(0) => Err(Error::Eof(String::from("ssh stream closed"))),
            Ok(n) => {
                buf.truncate(n);
                Ok(buf)
            }
            // the pty master raises EIO once the child side is gone
            Err(err) if err.raw_os_error() == Some(nix::libc::EIO) => {
                Err(Error::Eof(String::from("ssh process closed the pty")))
            }
            Err(err) if err.kind() == ErrorKind::WouldBlock => Err(Error::Inactivity(format!(
                "no data within {:?}",
                self.read_deadline
            ))),
            Err(err) => Err(Error::Transport(format!("pty read: {err}"))),
        }
    }

    fn write(
        &mut self,
        b: &[u8],
    ) -> Result<(), Error> {
        self.file
            .write_all(b)
            .and_then(|()| self.file.flush())
            .map_err(|err| Error::Transport(format!("pty write: {err}")))
    }

    fn set_read_deadline(
        &mut self,
        timeout: Duration,
    ) -> Result<(), Error> {
        self.read_deadline = timeout;

        Ok(())
    }

    fn set_write_deadline(
        &mut self,
        _timeout: Duration,
    ) -> Result<(), Error> {
        // pty writes land in the kernel tty buffer and do not block
        Ok(())
    }

    fn close(&mut self) {
        let _ = self.process.exit();
    }

    fn kind(&self) -> TransportKind {
        TransportKind::Ssh
    }
}
