use crate::conf::DevAttributes;
use crate::errors::Error;
use log::debug;
use std::io::Read;
use std::process::{
    Command,
    Stdio,
};
use std::thread;
use std::time::{
    Duration,
    Instant,
};

/// Executes the device's external program and returns its standard output as
/// the capture. The program must finish within `run_timeout`; a non-zero exit
/// status is a dialogue failure, with a stderr snippet in the message.
pub fn run_external(attr: &DevAttributes) -> Result<Vec<u8>, Error> {
    let Some((prog, args)) = attr.run_prog.split_first() else {
        return Err(Error::Dialogue(String::from("run model without a program")));
    };

    debug!("run model: executing '{prog}' with args {args:?}");

    let mut child = Command::new(prog)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|err| Error::Dialogue(format!("spawning '{prog}': {err}")))?;

    // drain both pipes off-thread so a chatty program cannot fill a pipe and
    // deadlock against our exit-status polling
    let stdout = child.stdout.take();
    let stdout_reader = thread::spawn(move || read_all(stdout));

    let stderr = child.stderr.take();
    let stderr_reader = thread::spawn(move || read_all(stderr));

    let deadline = Instant::now() + attr.run_timeout;

    let status = loop {
        match child.try_wait() {
            Ok(Some(status)) => break status,
            Ok(None) => {
                if Instant::now() >= deadline {
                    let _ = child.kill();
                    let _ = child.wait();

                    return Err(Error::Dialogue(format!(
                        "'{prog}' did not finish within {:?}",
                        attr.run_timeout
                    )));
                }

                thread::sleep(Duration::from_millis(50));
            }
            Err(err) => {
                return Err(Error::Dialogue(format!("waiting for '{prog}': {err}")))
            }
        }
    };

    let stdout = stdout_reader.join().unwrap_or_default();
    let stderr = stderr_reader.join().unwrap_or_default();

    if !status.success() {
        let snippet: String = String::from_utf8_lossy(&stderr).chars().take(200).collect();

        return Err(Error::Dialogue(format!(
            "'{prog}' exited with {status}: {}",
            snippet.trim()
        )));
    }

    Ok(stdout)
}

fn read_all<R: Read>(source: Option<R>) -> Vec<u8> {
    let mut buf = vec![];

    if let Some(mut source) = source {
        let _ = source.read_to_end(&mut buf);
    }

    buf
}
