use crate::errors::Error;
use std::fs;
use std::io::Read;
use std::path::Path;
use std::time::SystemTime;

/// Reads at most `max_size` bytes from `path`, failing when the source holds
/// more than that.
pub fn file_read(
    path: &str,
    max_size: u64,
) -> Result<Vec<u8>, Error> {
    let f = fs::File::open(path).map_err(|err| Error::Store(format!("opening {path}: {err}")))?;

    let mut buf = Vec::new();
    f.take(max_size + 1)
        .read_to_end(&mut buf)
        .map_err(|err| Error::Store(format!("reading {path}: {err}")))?;

    if buf.len() as u64 > max_size {
        return Err(Error::Store(format!(
            "{path} exceeds the size limit of {max_size} bytes"
        )));
    }

    Ok(buf)
}

/// Returns `path`'s modification time and size.
pub fn file_info(path: &str) -> Result<(SystemTime, u64), Error> {
    let meta =
        fs::metadata(path).map_err(|err| Error::Store(format!("stat of {path}: {err}")))?;

    let mtime = meta
        .modified()
        .map_err(|err| Error::Store(format!("mtime of {path}: {err}")))?;

    Ok((mtime, meta.len()))
}

/// True when `path` exists (file or directory).
pub fn file_exists(path: &str) -> bool {
    Path::new(path).exists()
}

/// Removes `path`.
pub fn file_remove(path: &str) -> Result<(), Error> {
    fs::remove_file(path).map_err(|err| Error::Store(format!("removing {path}: {err}")))
}

/// Renames `from` to `to`.
pub fn file_rename(
    from: &str,
    to: &str,
) -> Result<(), Error> {
    fs::rename(from, to).map_err(|err| Error::Store(format!("renaming {from} to {to}: {err}")))
}

/// Writes `buf` under the temp-then-rename discipline: the payload lands in
/// `<path>.tmp` and is renamed into place, so a crash never leaves a partial
/// file visible under the final name.
pub fn file_write(
    path: &str,
    buf: &[u8],
) -> Result<(), Error> {
    if let Some(parent) = Path::new(path).parent() {
        fs::create_dir_all(parent)
            .map_err(|err| Error::Store(format!("creating {}: {err}", parent.display())))?;
    }

    let tmp = format!("{path}.tmp");

    fs::write(&tmp, buf).map_err(|err| Error::Store(format!("writing {tmp}: {err}")))?;

    file_rename(&tmp, path)
}

/// Lists the names of the entries sharing `path`'s directory. Returns the
/// directory and the plain (base) names. A missing directory lists as empty.
pub fn dir_list(path: &str) -> Result<(String, Vec<String>), Error> {
    let dir = Path::new(path)
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .map_or_else(|| String::from("."), |p| p.display().to_string());

    let entries = match fs::read_dir(&dir) {
        Ok(entries) => entries,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok((dir, vec![])),
        Err(err) => return Err(Error::Store(format!("listing {dir}: {err}"))),
    };

    let mut names = vec![];
    for entry in entries {
        let entry = entry.map_err(|err| Error::Store(format!("listing {dir}: {err}")))?;
        names.push(entry.file_name().to_string_lossy().into_owned());
    }

    Ok((dir, names))
}

/// Bulk delete of every sibling whose name starts with `path`'s base name.
pub fn dir_clean(path: &str) -> Result<(), Error> {
    let base = Path::new(path)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();

    let (dir, names) = dir_list(path)?;

    for name in names {
        if base.is_empty() || name.starts_with(&base) {
            file_remove(&format!("{dir}/{name}"))?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::{
        dir_clean,
        dir_list,
        file_exists,
        file_read,
        file_rename,
        file_write,
    };
    use crate::errors::Error;
    use tempfile::TempDir;

    #[test]
    fn bounded_read() {
        let repo = TempDir::new().unwrap();
        let path = repo.path().join("cfg").display().to_string();

        file_write(&path, b"0123456789").unwrap();

        assert_eq!(file_read(&path, 100).unwrap(), b"0123456789");
        assert_eq!(file_read(&path, 10).unwrap(), b"0123456789");
        assert!(matches!(file_read(&path, 9), Err(Error::Store(_))));
    }

    #[test]
    fn write_is_tmp_then_rename() {
        let repo = TempDir::new().unwrap();
        let path = repo.path().join("sub/cfg.0").display().to_string();

        file_write(&path, b"hello").unwrap();

        assert!(file_exists(&path));
        assert!(!file_exists(&format!("{path}.tmp")));
    }

    #[test]
    fn exists_rename_list_clean() {
        let repo = TempDir::new().unwrap();
        let p1 = repo.path().join("dev1.0").display().to_string();
        let p2 = repo.path().join("dev1.1").display().to_string();
        let other = repo.path().join("dev2.0").display().to_string();

        assert!(!file_exists(&p1));

        file_write(&p1, b"a").unwrap();
        file_write(&other, b"b").unwrap();

        file_rename(&p1, &p2).unwrap();
        assert!(!file_exists(&p1));
        assert!(file_exists(&p2));

        let (_, mut names) = dir_list(&p2).unwrap();
        names.sort();
        assert_eq!(names, vec!["dev1.1", "dev2.0"]);

        dir_clean(&repo.path().join("dev1.").display().to_string()).unwrap();
        assert!(!file_exists(&p2));
        assert!(file_exists(&other));
    }

    #[test]
    fn missing_dir_lists_empty() {
        let repo = TempDir::new().unwrap();
        let path = repo.path().join("nope/dev1.0").display().to_string();

        let (_, names) = dir_list(&path).unwrap();
        assert!(names.is_empty());
    }
}
