use crate::errors::Error;
use crate::store::{
    local,
    object,
};
use log::{
    debug,
    warn,
};
use std::io::Write;
use std::time::SystemTime;

/// Extracts the generation id from a filename: the substring after the last
/// '.' must be non-empty and wholly digits. This is the exact inverse of the
/// `<prefix>.<N>` naming, on both backends.
pub fn extract_commit_id_from_filename(name: &str) -> Result<u64, Error> {
    let Some((_, digits)) = name.rsplit_once('.') else {
        return Err(Error::Store(format!("no generation suffix in '{name}'")));
    };

    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return Err(Error::Store(format!(
            "generation suffix of '{name}' is not a number"
        )));
    }

    digits
        .parse::<u64>()
        .map_err(|err| Error::Store(format!("generation suffix of '{name}': {err}")))
}

/// Reads at most `max_size` bytes from `path`, failing when the source holds
/// more than that.
pub fn file_read(
    path: &str,
    max_size: u64,
) -> Result<Vec<u8>, Error> {
    if object::is_object_path(path) {
        object::file_read(path, max_size)
    } else {
        local::file_read(path, max_size)
    }
}

/// Returns `path`'s modification time and size.
pub fn file_info(path: &str) -> Result<(SystemTime, u64), Error> {
    if object::is_object_path(path) {
        object::file_info(path)
    } else {
        local::file_info(path)
    }
}

/// True when `path` exists.
pub fn file_exists(path: &str) -> bool {
    if object::is_object_path(path) {
        object::file_exists(path)
    } else {
        local::file_exists(path)
    }
}

/// Removes `path`.
pub fn file_remove(path: &str) -> Result<(), Error> {
    if object::is_object_path(path) {
        object::file_remove(path)
    } else {
        local::file_remove(path)
    }
}

/// Renames `from` to `to`. Local renames are atomic; object-store renames are
/// copy-then-delete.
pub fn file_rename(
    from: &str,
    to: &str,
) -> Result<(), Error> {
    if object::is_object_path(from) {
        object::file_rename(from, to)
    } else {
        local::file_rename(from, to)
    }
}

/// Lists the names of `path`'s siblings (directory entries, or keys sharing
/// the prefix).
pub fn dir_list(path: &str) -> Result<(String, Vec<String>), Error> {
    if object::is_object_path(path) {
        object::dir_list(path)
    } else {
        local::dir_list(path)
    }
}

/// Bulk delete of `path`'s prefix-sharing siblings.
pub fn dir_clean(path: &str) -> Result<(), Error> {
    if object::is_object_path(path) {
        object::dir_clean(path)
    } else {
        local::dir_clean(path)
    }
}

/// The base name of `prefix` (its part after the last separator), used to
/// match siblings on both backends.
fn base_name(prefix: &str) -> &str {
    prefix.rsplit_once('/').map_or(prefix, |(_, base)| base)
}

/// The generation ids currently present under `prefix`, unsorted. Names that
/// do not end in `.<digits>` are ignored, as are names that happen to share
/// the directory without sharing the prefix.
fn list_generations(prefix: &str) -> Result<Vec<u64>, Error> {
    let base = base_name(prefix);
    let (_, names) = dir_list(prefix)?;

    Ok(names
        .iter()
        .filter(|name| name.starts_with(base))
        .filter_map(|name| extract_commit_id_from_filename(name).ok())
        .collect())
}

/// Returns the path of the most recent generation under `prefix`.
pub fn find_last_config(prefix: &str) -> Result<String, Error> {
    let ids = list_generations(prefix)?;

    ids.iter()
        .max()
        .map(|id| format!("{prefix}{id}"))
        .ok_or_else(|| Error::Store(format!("no generation under '{prefix}'")))
}

/// Writes the next generation under `prefix` and applies retention.
///
/// The new generation id is one greater than the largest existing id (0 when
/// none). `write_fn` produces the payload. With `changes_only` set and a prior
/// generation present, an identical payload removes the fresh file again and
/// returns the [`Error::Unchanged`] sentinel -- no generation id is consumed
/// and no rotation happens. Otherwise the oldest generations are trimmed so at
/// most `max_files` remain; trim errors are logged and leave older generations
/// in place rather than risking data loss.
pub fn save_new_config<F>(
    prefix: &str,
    max_files: usize,
    write_fn: F,
    changes_only: bool,
    content_type: &str,
) -> Result<String, Error>
where
    F: FnOnce(&mut dyn Write) -> std::io::Result<()>,
{
    let mut ids = list_generations(prefix)?;

    let last = ids.iter().max().copied();
    let id = last.map_or(0, |n| n + 1);
    let path = format!("{prefix}{id}");

    let mut payload: Vec<u8> = vec![];
    write_fn(&mut payload)
        .map_err(|err| Error::Store(format!("producing payload for {path}: {err}")))?;

    let payload_len = payload.len() as u64;

    if object::is_object_path(&path) {
        object::file_put(&path, payload, content_type)?;
    } else {
        local::file_write(&path, &payload)?;
    }

    debug!("save: wrote generation {path}");

    if changes_only {
        if let Some(last_id) = last {
            let previous = format!("{prefix}{last_id}");

            if file_equal(&previous, &path, payload_len)? {
                file_remove(&path)?;

                debug!("save: {path} equals {previous}, dropped (changes-only)");

                return Err(Error::Unchanged);
            }
        }
    }

    ids.push(id);
    trim_generations(prefix, &mut ids, max_files);

    Ok(path)
}

/// Byte-compares two stored files. The read bound protects against a
/// runaway previous generation; an oversized side simply compares unequal.
fn file_equal(
    p1: &str,
    p2: &str,
    max_size: u64,
) -> Result<bool, Error> {
    let Ok(b1) = file_read(p1, max_size) else {
        return Ok(false);
    };

    let b2 = file_read(p2, max_size)?;

    Ok(b1 == b2)
}

/// Removes the oldest generations until at most `max_files` remain. Errors
/// are logged and stop the trim; old generations are never worth a data-loss
/// gamble.
fn trim_generations(
    prefix: &str,
    ids: &mut Vec<u64>,
    max_files: usize,
) {
    if max_files == 0 {
        return;
    }

    ids.sort_unstable();

    while ids.len() > max_files {
        let oldest = ids[0];
        let victim = format!("{prefix}{oldest}");

        if let Err(err) = file_remove(&victim) {
            warn!("rotation: could not remove {victim}: {err}");

            return;
        }

        debug!("rotation: removed {victim}");

        ids.remove(0);
    }
}

#[cfg(test)]
mod tests {
    use super::{
        extract_commit_id_from_filename,
        find_last_config,
        save_new_config,
    };
    use crate::errors::Error;
    use std::io::Write;
    use tempfile::TempDir;

    #[test]
    fn commit_id_vectors() {
        assert_eq!(extract_commit_id_from_filename("config.1").unwrap(), 1);
        assert_eq!(extract_commit_id_from_filename("config.42").unwrap(), 42);
        assert_eq!(extract_commit_id_from_filename("config.0").unwrap(), 0);
        assert_eq!(extract_commit_id_from_filename("config.999").unwrap(), 999);

        assert!(extract_commit_id_from_filename("config.xyz").is_err());
        assert!(extract_commit_id_from_filename("config.").is_err());
        assert!(extract_commit_id_from_filename("config").is_err());
    }

    #[test]
    fn naming_round_trip() {
        for n in [0_u64, 1, 7, 120, 4096] {
            let name = format!("lab1.{n}");
            assert_eq!(extract_commit_id_from_filename(&name).unwrap(), n);
        }
    }

    fn save(
        prefix: &str,
        content: &[u8],
        changes_only: bool,
    ) -> Result<String, Error> {
        let c = content.to_vec();
        save_new_config(prefix, 2, move |w| w.write_all(&c), changes_only, "")
    }

    #[test]
    fn generations_and_retention() {
        let repo = TempDir::new().unwrap();
        let prefix = repo.path().join("store-test.").display().to_string();

        assert_eq!(save(&prefix, b"a", false).unwrap(), format!("{prefix}0"));
        assert_eq!(find_last_config(&prefix).unwrap(), format!("{prefix}0"));

        assert_eq!(save(&prefix, b"b", false).unwrap(), format!("{prefix}1"));
        assert_eq!(save(&prefix, b"c", false).unwrap(), format!("{prefix}2"));
        assert_eq!(save(&prefix, b"d", false).unwrap(), format!("{prefix}3"));

        // max_files = 2: only the two newest survive
        assert_eq!(find_last_config(&prefix).unwrap(), format!("{prefix}3"));
        assert!(!std::path::Path::new(&format!("{prefix}0")).exists());
        assert!(!std::path::Path::new(&format!("{prefix}1")).exists());
        assert!(std::path::Path::new(&format!("{prefix}2")).exists());
    }

    #[test]
    fn unrelated_siblings_are_ignored() {
        let repo = TempDir::new().unwrap();
        let prefix = repo.path().join("dev1.").display().to_string();
        let other = repo.path().join("dev2.").display().to_string();

        assert_eq!(save(&other, b"x", false).unwrap(), format!("{other}0"));
        assert_eq!(save(&prefix, b"a", false).unwrap(), format!("{prefix}0"));

        // dev2's generation does not bump dev1's counter
        assert_eq!(save(&prefix, b"b", false).unwrap(), format!("{prefix}1"));
    }

    #[test]
    fn changes_only_dedup() {
        let repo = TempDir::new().unwrap();
        let prefix = repo.path().join("dev1.").display().to_string();

        assert_eq!(save(&prefix, b"same", true).unwrap(), format!("{prefix}0"));

        // identical payload: sentinel, no id consumed
        assert!(matches!(save(&prefix, b"same", true), Err(Error::Unchanged)));
        assert!(!std::path::Path::new(&format!("{prefix}1")).exists());
        assert_eq!(find_last_config(&prefix).unwrap(), format!("{prefix}0"));

        // a real change consumes the next id as if nothing happened
        assert_eq!(save(&prefix, b"changed", true).unwrap(), format!("{prefix}1"));
    }

    #[test]
    fn find_last_without_generations_fails() {
        let repo = TempDir::new().unwrap();
        let prefix = repo.path().join("dev1.").display().to_string();

        assert!(find_last_config(&prefix).is_err());
    }
}
