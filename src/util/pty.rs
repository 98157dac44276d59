//! Start a process under a pty.

/// This module descends (via light rewriting) from rexpect's `PtyProcess`,
/// created and licensed by Philipp Keller. The following is a copy of the
/// rexpect crate's license file.
///
/// MIT License
///
/// Copyright (c) 2018 Philipp Keller
///
/// Permission is hereby granted, free of charge, to any person obtaining a copy
/// of this software and associated documentation files (the "Software"), to deal
/// in the Software without restriction, including without limitation the rights
/// to use, copy, modify, merge, publish, distribute, sublicense, and/or sell
/// copies of the Software, and to permit persons to whom the Software is
/// furnished to do so, subject to the following conditions:
///
/// The above copyright notice and this permission notice shall be included in all
/// copies or substantial portions of the Software.
///
/// THE SOFTWARE IS PROVIDED "AS IS", WITHOUT WARRANTY OF ANY KIND, EXPRESS OR
/// IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF MERCHANTABILITY,
/// FITNESS FOR A PARTICULAR PURPOSE AND NONINFRINGEMENT. IN NO EVENT SHALL THE
/// AUTHORS OR COPYRIGHT HOLDERS BE LIABLE FOR ANY CLAIM, DAMAGES OR OTHER
/// LIABILITY, WHETHER IN AN ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING FROM,
/// OUT OF OR IN CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER DEALINGS IN THE
/// SOFTWARE.
use crate::errors::Error;
use nix::fcntl::{
    open,
    OFlag,
};
use nix::libc::{
    STDERR_FILENO,
    STDIN_FILENO,
    STDOUT_FILENO,
};
use nix::pty::{
    grantpt,
    posix_openpt,
    unlockpt,
    PtyMaster,
};
use nix::sys::wait::{
    waitpid,
    WaitPidFlag,
    WaitStatus,
};
use nix::sys::{
    signal,
    stat,
    termios,
};
use nix::unistd::{
    dup2,
    fork,
    setsid,
    ForkResult,
    Pid,
};
#[cfg(target_os = "macos")]
use std::os::unix::io::AsRawFd;
use std::os::unix::process::CommandExt;
use std::process::Command;
use std::thread;
use std::time::Duration;

#[cfg(target_os = "linux")]
use nix::pty::ptsname_r;

#[cfg(target_os = "macos")]
/// `ptsname_r` is a linux extension; ptsname isn't thread-safe, so on macos
/// this calls ioctl with `TIOCPTYGNAME` directly.
fn ptsname_r(fd: &PtyMaster) -> nix::Result<String> {
    use core::ffi::CStr;
    use nix::libc::{
        ioctl,
        TIOCPTYGNAME,
    };

    let mut buf: [i8; 128] = [0; 128];

    // SAFETY: the buffer pointer stays valid for the duration of the ioctl.
    unsafe {
        match ioctl(fd.as_raw_fd(), u64::from(TIOCPTYGNAME), &mut buf) {
            0_i32 => {
                let res = CStr::from_ptr(buf.as_ptr()).to_string_lossy().into_owned();
                Ok(res)
            }
            _ => Err(nix::Error::last()),
        }
    }
}

/// A process running in a forked pty so it can be driven the way a terminal
/// would. The process and pty session are killed when `PtyProcess` drops.
pub(crate) struct PtyProcess {
    /// The pty master side.
    pub pty: PtyMaster,
    child: Pid,
}

impl PtyProcess {
    /// Starts `command` in a forked pty with echo disabled.
    pub fn new(mut command: Command) -> Result<Self, Error> {
        let master = posix_openpt(OFlag::O_RDWR | OFlag::O_NOCTTY | OFlag::O_NONBLOCK)
            .map_err(|err| Error::Transport(format!("opening pty master: {err}")))?;

        grantpt(&master).map_err(|err| Error::Transport(format!("grantpt: {err}")))?;
        unlockpt(&master).map_err(|err| Error::Transport(format!("unlockpt: {err}")))?;

        let slave_name =
            ptsname_r(&master).map_err(|err| Error::Transport(format!("ptsname: {err}")))?;

        // SAFETY: the child only calls async-signal-safe functions before exec.
        match unsafe { fork() }.map_err(|err| Error::Transport(format!("fork: {err}")))? {
            ForkResult::Child => {
                fn die(_: nix::Error) -> ! {
                    std::process::exit(127)
                }

                setsid().unwrap_or_else(|err| die(err));

                let slave = open(
                    std::path::Path::new(&slave_name),
                    OFlag::O_RDWR,
                    stat::Mode::empty(),
                )
                .unwrap_or_else(|err| die(err));

                dup2(slave, STDIN_FILENO).unwrap_or_else(|err| die(err));
                dup2(slave, STDOUT_FILENO).unwrap_or_else(|err| die(err));
                dup2(slave, STDERR_FILENO).unwrap_or_else(|err| die(err));

                // echo off so sent lines don't come straight back
                if let Ok(mut flags) = termios::tcgetattr(STDIN_FILENO) {
                    flags.local_flags &= !termios::LocalFlags::ECHO;
                    let _ = termios::tcsetattr(STDIN_FILENO, termios::SetArg::TCSANOW, &flags);
                }

                let _ = command.exec();
                std::process::exit(127);
            }
            ForkResult::Parent { child } => Ok(Self { pty: master, child }),
        }
    }

    /// Non-blocking status probe of the child.
    pub fn status(&self) -> Option<WaitStatus> {
        waitpid(self.child, Some(WaitPidFlag::WNOHANG)).ok()
    }

    /// True while the child has neither exited nor been reaped.
    pub fn alive(&self) -> bool {
        matches!(
            self.status(),
            Some(WaitStatus::StillAlive | WaitStatus::Continued(_))
        )
    }

    /// Terminates the child, waiting until it is gone. Escalates to SIGKILL if
    /// SIGTERM goes unanswered.
    pub fn exit(&mut self) -> Result<(), Error> {
        const KILL_GRACE: Duration = Duration::from_secs(5);

        let start = std::time::Instant::now();
        let mut sig = signal::SIGTERM;

        loop {
            match signal::kill(self.child, sig) {
                Ok(()) | Err(nix::errno::Errno::ESRCH) => {}
                Err(err) => return Err(Error::Transport(format!("killing ssh process: {err}"))),
            }

            match self.status() {
                Some(WaitStatus::StillAlive) | None => thread::sleep(Duration::from_millis(50)),
                Some(_) => return Ok(()),
            }

            if start.elapsed() > KILL_GRACE {
                sig = signal::SIGKILL;
            }
        }
    }
}

impl Drop for PtyProcess {
    fn drop(&mut self) {
        if self.alive() {
            let _ = self.exit();
        }
    }
}
