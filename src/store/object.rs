use crate::errors::Error;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{
    Delete,
    ObjectIdentifier,
};
use aws_sdk_s3::Client;
use log::debug;
use once_cell::sync::OnceCell;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{
    Duration,
    SystemTime,
    UNIX_EPOCH,
};
use tokio::runtime::Runtime;

/// The ARN prefix marking a repository path as object-store backed.
const ARN_PREFIX: &str = "arn:aws:s3:";

/// True when `path` addresses the object store.
#[must_use]
pub fn is_object_path(path: &str) -> bool {
    path.starts_with(ARN_PREFIX)
}

/// Overrides the default region used when an ARN leaves its region field
/// empty. Without an override the `AWS_REGION` / `AWS_DEFAULT_REGION`
/// environment is consulted. The first caller wins.
pub fn set_default_region(region: &str) {
    let _ = default_region_cell().set(region.to_owned());
}

fn default_region_cell() -> &'static OnceCell<String> {
    static REGION: OnceCell<String> = OnceCell::new();

    &REGION
}

fn default_region() -> Option<String> {
    if let Some(region) = default_region_cell().get() {
        return Some(region.clone());
    }

    std::env::var("AWS_REGION")
        .or_else(|_| std::env::var("AWS_DEFAULT_REGION"))
        .ok()
}

/// Parsed form of "arn:aws:s3:region::bucket/key": exactly six colon-delimited
/// fields, field 4 the region (may be empty), field 6 bucket and key split on
/// the first slash.
struct ArnPath {
    region: String,
    bucket: String,
    key: String,
}

fn parse(path: &str) -> Result<ArnPath, Error> {
    let fields: Vec<&str> = path.split(':').collect();
    if fields.len() < 6 {
        return Err(Error::Store(format!("bad object-store path '{path}'")));
    }

    let region = fields[3].to_owned();
    let file = fields[5];

    let Some(slash) = file.find('/').filter(|&i| i >= 1) else {
        return Err(Error::Store(format!(
            "object-store path '{path}' is missing bucket/key"
        )));
    };

    Ok(ArnPath {
        region,
        bucket: file[..slash].to_owned(),
        key: file[slash + 1..].to_owned(),
    })
}

/// Renders the https URL for an object-store path, or None when neither the
/// ARN nor the environment provides a region.
#[must_use]
pub fn object_url(path: &str) -> Option<String> {
    let arn = parse(path).ok()?;

    let region = if arn.region.is_empty() {
        default_region()?
    } else {
        arn.region
    };

    Some(format!(
        "https://s3-{region}.amazonaws.com/{}/{}",
        arn.bucket, arn.key
    ))
}

fn runtime() -> Result<&'static Runtime, Error> {
    static RUNTIME: OnceCell<Runtime> = OnceCell::new();

    RUNTIME.get_or_try_init(|| {
        tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|err| Error::Store(format!("starting object-store runtime: {err}")))
    })
}

/// Returns the client for `region`, creating and caching it on first use.
/// Credentials follow the SDK's conventional chain.
#[allow(clippy::expect_used)]
fn client(region: &str) -> Result<Client, Error> {
    static CLIENTS: OnceCell<Mutex<HashMap<String, Client>>> = OnceCell::new();

    let region = if region.is_empty() {
        default_region().ok_or_else(|| {
            Error::Store(String::from(
                "no region in path and no default region configured",
            ))
        })?
    } else {
        region.to_owned()
    };

    let cache = CLIENTS.get_or_init(|| Mutex::new(HashMap::new()));
    let mut table = cache.lock().expect("object-store client cache poisoned");

    if let Some(existing) = table.get(&region) {
        return Ok(existing.clone());
    }

    let rt = runtime()?;
    let config = rt.block_on(
        aws_config::defaults(aws_config::BehaviorVersion::latest())
            .region(aws_config::Region::new(region.clone()))
            .load(),
    );

    let fresh = Client::new(&config);
    table.insert(region.clone(), fresh.clone());

    debug!("object store: client created for region '{region}'");

    Ok(fresh)
}

/// Sniffs a content type from the first bytes of the payload: printable utf-8
/// reads as text, anything else as an opaque octet stream.
#[must_use]
pub fn detect_content_type(buf: &[u8]) -> &'static str {
    let head = &buf[..buf.len().min(512)];

    match core::str::from_utf8(head) {
        Ok(s) if !s.chars().any(|c| c.is_control() && !c.is_ascii_whitespace()) => {
            "text/plain; charset=utf-8"
        }
        _ => "application/octet-stream",
    }
}

/// Writes `buf` to the target key. Object creation is atomic at the service
/// layer, so no temp-key indirection is needed. `content_type` is the hint
/// from the model attributes: empty omits the header, "detect" sniffs the
/// payload, anything else is used literally.
pub fn file_put(
    path: &str,
    buf: Vec<u8>,
    content_type: &str,
) -> Result<(), Error> {
    let arn = parse(path)?;
    let svc = client(&arn.region)?;

    let hint = match content_type {
        "" => None,
        "detect" => Some(detect_content_type(&buf)),
        literal => Some(literal),
    };

    let mut req = svc
        .put_object()
        .bucket(&arn.bucket)
        .key(&arn.key)
        .body(ByteStream::from(buf));

    if let Some(hint) = hint {
        req = req.content_type(hint);
    }

    runtime()?
        .block_on(req.send())
        .map_err(|err| Error::Store(format!("putting {path}: {err}")))?;

    Ok(())
}

/// Reads at most `max_size` bytes from the object, failing when it holds more.
pub fn file_read(
    path: &str,
    max_size: u64,
) -> Result<Vec<u8>, Error> {
    let arn = parse(path)?;
    let svc = client(&arn.region)?;
    let rt = runtime()?;

    let resp = rt
        .block_on(svc.get_object().bucket(&arn.bucket).key(&arn.key).send())
        .map_err(|err| Error::Store(format!("getting {path}: {err}")))?;

    let data = rt
        .block_on(resp.body.collect())
        .map_err(|err| Error::Store(format!("reading {path}: {err}")))?
        .into_bytes();

    if data.len() as u64 > max_size {
        return Err(Error::Store(format!(
            "{path} exceeds the size limit of {max_size} bytes"
        )));
    }

    Ok(data.to_vec())
}

/// True when the object exists.
pub fn file_exists(path: &str) -> bool {
    let Ok(arn) = parse(path) else { return false };
    let Ok(svc) = client(&arn.region) else {
        return false;
    };
    let Ok(rt) = runtime() else { return false };

    rt.block_on(svc.head_object().bucket(&arn.bucket).key(&arn.key).send())
        .is_ok()
}

/// Returns the object's modification time and size.
pub fn file_info(path: &str) -> Result<(SystemTime, u64), Error> {
    let arn = parse(path)?;
    let svc = client(&arn.region)?;

    let resp = runtime()?
        .block_on(svc.head_object().bucket(&arn.bucket).key(&arn.key).send())
        .map_err(|err| Error::Store(format!("head of {path}: {err}")))?;

    let mtime = resp.last_modified().map_or(UNIX_EPOCH, |dt| {
        UNIX_EPOCH + Duration::from_secs(dt.secs().max(0).unsigned_abs())
    });

    let size = resp.content_length().unwrap_or(0).max(0).unsigned_abs();

    Ok((mtime, size))
}

/// Deletes the object.
pub fn file_remove(path: &str) -> Result<(), Error> {
    let arn = parse(path)?;
    let svc = client(&arn.region)?;

    runtime()?
        .block_on(svc.delete_object().bucket(&arn.bucket).key(&arn.key).send())
        .map_err(|err| Error::Store(format!("deleting {path}: {err}")))?;

    Ok(())
}

/// Renames `from` to `to` as copy-then-delete: the copy must succeed before
/// the source delete, and when the source delete fails the new key is removed
/// on a best-effort basis so no half-renamed pair lingers.
pub fn file_rename(
    from: &str,
    to: &str,
) -> Result<(), Error> {
    let src = parse(from)?;
    let dst = parse(to)?;
    let svc = client(&src.region)?;

    runtime()?
        .block_on(
            svc.copy_object()
                .bucket(&dst.bucket)
                .key(&dst.key)
                .copy_source(format!("{}/{}", src.bucket, src.key))
                .send(),
        )
        .map_err(|err| Error::Store(format!("copying {from} to {to}: {err}")))?;

    if let Err(err) = file_remove(from) {
        let _ = file_remove(to);

        return Err(err);
    }

    Ok(())
}

/// Lists the plain names of the keys under `path`'s prefix. There are no
/// directories at this layer; the "directory" is the key prefix up to the last
/// slash and names are the portions after it.
pub fn dir_list(path: &str) -> Result<(String, Vec<String>), Error> {
    let arn = parse(path)?;
    let svc = client(&arn.region)?;
    let rt = runtime()?;

    let dir = path.rsplit_once('/').map_or("", |(d, _)| d).to_owned();

    let mut names = vec![];
    let mut token: Option<String> = None;

    loop {
        let mut req = svc
            .list_objects_v2()
            .bucket(&arn.bucket)
            .prefix(&arn.key);

        if let Some(t) = token.take() {
            req = req.continuation_token(t);
        }

        let resp = rt
            .block_on(req.send())
            .map_err(|err| Error::Store(format!("listing {path}: {err}")))?;

        for obj in resp.contents() {
            if let Some(key) = obj.key() {
                let name = key.rsplit_once('/').map_or(key, |(_, n)| n);
                names.push(name.to_owned());
            }
        }

        if resp.is_truncated() == Some(true) {
            token = resp.next_continuation_token().map(ToOwned::to_owned);
            continue;
        }

        break;
    }

    Ok((dir, names))
}

/// Bulk delete of every key under `path`'s prefix.
pub fn dir_clean(path: &str) -> Result<(), Error> {
    let (_, names) = dir_list(path)?;
    if names.is_empty() {
        return Ok(());
    }

    let arn = parse(path)?;
    let svc = client(&arn.region)?;

    let folder = arn.key.rsplit_once('/').map_or("", |(d, _)| d);

    let mut objects = vec![];
    for name in names {
        let key = if folder.is_empty() {
            name
        } else {
            format!("{folder}/{name}")
        };

        let obj = ObjectIdentifier::builder()
            .key(key)
            .build()
            .map_err(|err| Error::Store(format!("building delete list for {path}: {err}")))?;

        objects.push(obj);
    }

    let delete = Delete::builder()
        .set_objects(Some(objects))
        .build()
        .map_err(|err| Error::Store(format!("building delete list for {path}: {err}")))?;

    runtime()?
        .block_on(
            svc.delete_objects()
                .bucket(&arn.bucket)
                .delete(delete)
                .send(),
        )
        .map_err(|err| Error::Store(format!("bulk delete under {path}: {err}")))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::{
        detect_content_type,
        is_object_path,
        object_url,
        parse,
    };

    #[test]
    fn path_classification() {
        assert!(is_object_path("arn:aws:s3:us-east-1::backups/routers/lab1.0"));
        assert!(!is_object_path("/var/lib/confvault/lab1.0"));
        assert!(!is_object_path("arn:aws:sns:x::y/z"));
    }

    #[test]
    fn arn_parsing() {
        let arn = parse("arn:aws:s3:us-east-1::backups/routers/lab1.0").unwrap();
        assert_eq!(arn.region, "us-east-1");
        assert_eq!(arn.bucket, "backups");
        assert_eq!(arn.key, "routers/lab1.0");

        // empty region field defers to the default region
        let arn = parse("arn:aws:s3:::backups/lab1.0").unwrap();
        assert_eq!(arn.region, "");
        assert_eq!(arn.bucket, "backups");
        assert_eq!(arn.key, "lab1.0");

        assert!(parse("arn:aws:s3:region::no-slash").is_err());
        assert!(parse("arn:aws:s3:short").is_err());
        assert!(parse("arn:aws:s3:r::/key-without-bucket").is_err());
    }

    #[test]
    fn url_rendering() {
        assert_eq!(
            object_url("arn:aws:s3:sa-east-1::backups/routers/lab1.0").unwrap(),
            "https://s3-sa-east-1.amazonaws.com/backups/routers/lab1.0"
        );
    }

    #[test]
    fn content_sniffing() {
        assert_eq!(
            detect_content_type(b"interface Loopback0\n"),
            "text/plain; charset=utf-8"
        );
        assert_eq!(
            detect_content_type(&[0x7f, 0x45, 0x4c, 0x46, 0x00]),
            "application/octet-stream"
        );
    }
}
