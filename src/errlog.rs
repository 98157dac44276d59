use chrono::offset::Utc;
use log::warn;
use std::fs;
use std::path::Path;

// Reading back more than this from an existing history means something else
// wrote the file; the trim below shrinks it again either way.
const MAX_HISTORY_BYTES: usize = 1_000_000;

/// Appends one line to the device's error history file
/// `<log_prefix><dev_id>.errlog`, keeping only the newest `hist_size` lines.
/// History is best-effort: problems are logged and never fail the fetch.
pub fn append(
    log_prefix: &str,
    dev_id: &str,
    msg: &str,
    hist_size: usize,
) {
    let path = format!("{log_prefix}{dev_id}.errlog");

    let mut history = match fs::read(&path) {
        Ok(b) if b.len() <= MAX_HISTORY_BYTES => String::from_utf8_lossy(&b).into_owned(),
        Ok(_) => {
            warn!("errlog: {path} is oversized, starting over");
            String::new()
        }
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => String::new(),
        Err(err) => {
            warn!("errlog: reading {path}: {err}");
            String::new()
        }
    };

    let stamp = Utc::now().format("%Y-%m-%dT%H:%M:%SZ");
    let line = msg.replace('\n', " ");
    history.push_str(&format!("{stamp} {line}\n"));

    let lines: Vec<&str> = history.lines().collect();
    let keep = hist_size.max(1);
    let trimmed = if lines.len() > keep {
        let mut s = lines[lines.len() - keep..].join("\n");
        s.push('\n');
        s
    } else {
        history
    };

    if let Some(parent) = Path::new(&path).parent() {
        let _ = fs::create_dir_all(parent);
    }

    if let Err(err) = fs::write(&path, trimmed) {
        warn!("errlog: writing {path}: {err}");
    }
}
