use crate::conf::{
    AppConfig,
    Options,
};
use crate::device::{
    Device,
    DeviceTable,
};
use crate::errlog;
use crate::errors::Error;
use crate::filter::FilterTable;
use crate::model::dialogue;
use crate::store::repo;
use chrono::offset::Utc;
use chrono::DateTime;
use core::time::Duration;
use log::{
    debug,
    error,
    info,
};
use std::io::Write;
use std::panic::{
    catch_unwind,
    AssertUnwindSafe,
};
use std::sync::mpsc::{
    Receiver,
    RecvTimeoutError,
    SyncSender,
};
use std::sync::Arc;
use std::thread;
use std::time::Instant;

/// The outcome class carried in a fetch reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchCode {
    /// Success: a new generation was saved.
    None,
    /// The device id could not be resolved.
    GetDev,
    /// Connecting, reading or writing failed.
    Transport,
    /// The conversation went off-script (or timed out).
    Dialogue,
    /// A line filter failed.
    Filter,
    /// The repository write failed.
    Store,
    /// Changes-only: the capture equals the previous generation; counts as
    /// success, writes nothing.
    Unchanged,
}

/// One fetch order for the spawner. The reply channel is shared by every
/// worker of a scan cycle; the scanner is its sole receiver.
pub struct FetchRequest {
    /// Device to fetch.
    pub id: String,
    /// Where to post the result, if the requester wants one.
    pub reply: Option<SyncSender<FetchResult>>,
}

/// The reply a fetch worker posts when it is done.
#[derive(Debug, Clone)]
pub struct FetchResult {
    /// Device id.
    pub dev_id: String,
    /// Device model.
    pub model: String,
    /// Device endpoint.
    pub host_port: String,
    /// Label of the transport that won, or "run" for the external-program
    /// model; empty when no transport was established.
    pub transport: String,
    /// Outcome class.
    pub code: FetchCode,
    /// Human-readable outcome.
    pub msg: String,
    /// When the fetch began.
    pub begin: DateTime<Utc>,
    /// When the fetch ended.
    pub end: DateTime<Utc>,
}

/// Counters and timing aggregates of one scan cycle.
/// `success + failure + skipped` equals the scanned device count.
#[derive(Debug, Clone, Default)]
pub struct ScanTally {
    /// Fetches that saved a generation (or deduped one, changes-only).
    pub success: usize,
    /// Fetches that failed.
    pub failure: usize,
    /// Devices not attempted: tombstoned or holdtime-gated.
    pub skipped: usize,
    /// Fastest reply turnaround.
    pub elapsed_min: Duration,
    /// Slowest reply turnaround.
    pub elapsed_max: Duration,
    /// Cycle wall time averaged over the device count.
    pub elapsed_avg: Duration,
}

/// The repository prefix owning a device's generations: `<repository>/<id>.`
/// on both backends.
#[must_use]
pub fn device_path_prefix(
    repository: &str,
    dev_id: &str,
) -> String {
    format!("{}/{dev_id}.", repository.trim_end_matches('/'))
}

/// Long-running request dispatcher. Reads fetch requests until the request
/// channel closes, resolves each device and launches one worker per request.
/// Workers already in flight keep running after the spawner exits.
pub fn spawner(
    tab: Arc<DeviceTable>,
    req_rx: Receiver<FetchRequest>,
    repository: String,
    log_prefix: String,
    options: Arc<Options>,
    filters: Arc<FilterTable>,
) {
    info!("spawner: starting");

    while let Ok(req) = req_rx.recv() {
        let dev = match tab.get_device(&req.id) {
            Ok(dev) => dev,
            Err(err) => {
                if let Some(reply) = req.reply {
                    // posted off-thread: the scanner may be mid-send on the
                    // request channel, and a synchronous reply would deadlock
                    let now = Utc::now();
                    let result = FetchResult {
                        dev_id: req.id.clone(),
                        model: String::new(),
                        host_port: String::new(),
                        transport: String::new(),
                        code: FetchCode::GetDev,
                        msg: format!("spawner: could not find device: {err}"),
                        begin: now,
                        end: now,
                    };

                    thread::spawn(move || {
                        let _ = reply.send(result);
                    });
                }

                continue;
            }
        };

        let opt = options.get();
        let tab = Arc::clone(&tab);
        let filters = Arc::clone(&filters);
        let repository = repository.clone();
        let log_prefix = log_prefix.clone();

        thread::spawn(move || {
            let outcome = catch_unwind(AssertUnwindSafe(|| {
                fetch_device(&tab, &dev, &repository, &log_prefix, &opt, &filters)
            }));

            // a panicking worker must not strand the scanner
            let result = outcome.unwrap_or_else(|_| {
                let now = Utc::now();

                error!("worker: panic while fetching {}", dev.id);

                FetchResult {
                    dev_id: dev.id.clone(),
                    model: dev.model.clone(),
                    host_port: dev.host_port.clone(),
                    transport: String::new(),
                    code: FetchCode::Dialogue,
                    msg: String::from("worker panicked"),
                    begin: now,
                    end: now,
                }
            });

            if let Some(reply) = req.reply {
                let _ = reply.send(result);
            }
        });
    }

    info!("spawner: request channel closed, exiting");
}

/// One complete fetch: dialogue, filters, store write, bookkeeping.
fn fetch_device(
    tab: &DeviceTable,
    dev: &Device,
    repository: &str,
    log_prefix: &str,
    opt: &AppConfig,
    filters: &FilterTable,
) -> FetchResult {
    let begin = Utc::now();
    let mut transport_label = String::new();

    let saved: Result<String, Error> = (|| {
        let (label, capture) = dialogue::fetch_capture(dev)?;
        transport_label = label;

        let filtered = filters.apply(&dev.attr.line_filter, &capture)?;

        let prefix = device_path_prefix(repository, &dev.id);

        repo::save_new_config(
            &prefix,
            opt.max_config_files,
            |w| w.write_all(&filtered),
            dev.attr.changes_only,
            &dev.attr.content_type,
        )
    })();

    let end = Utc::now();

    let (code, msg) = match saved {
        Ok(path) => (FetchCode::None, format!("saved {path}")),
        Err(Error::Unchanged) => (
            FetchCode::Unchanged,
            String::from("capture unchanged, no new generation"),
        ),
        Err(err) => (code_for(&err), err.to_string()),
    };

    let good = matches!(code, FetchCode::None | FetchCode::Unchanged);
    let elapsed = (end - begin).to_std().unwrap_or_default();

    tab.update_status(&dev.id, good, end, elapsed);

    if good {
        debug!("worker: {} done: {msg}", dev.id);
    } else {
        info!("worker: {} failed: {msg}", dev.id);
        errlog::append(log_prefix, &dev.id, &msg, dev.attr.errlog_hist_size);
    }

    FetchResult {
        dev_id: dev.id.clone(),
        model: dev.model.clone(),
        host_port: dev.host_port.clone(),
        transport: transport_label,
        code,
        msg,
        begin,
        end,
    }
}

const fn code_for(err: &Error) -> FetchCode {
    match err {
        Error::Transport(_) | Error::Eof(_) => FetchCode::Transport,
        Error::Inactivity(_) | Error::SlowSender(_) | Error::Dialogue(_) | Error::Config(_) => {
            FetchCode::Dialogue
        }
        Error::Filter(_) => FetchCode::Filter,
        Error::Store(_) => FetchCode::Store,
        Error::Unchanged => FetchCode::Unchanged,
    }
}

/// Scans the device snapshot, dispatching fetch requests to the spawner and
/// tallying the replies.
///
/// All requests of a cycle share one rendezvous reply channel. The pending
/// count -- requests launched minus replies received -- never exceeds
/// `max_concurrency`: when the limit is reached the scanner stops launching
/// and drains replies instead. Tombstoned devices and devices still inside
/// their holdtime are skipped. The cycle ends when every launched request has
/// replied.
#[allow(clippy::expect_used)]
pub fn scan(
    devices: &[Device],
    opt: &AppConfig,
    req_tx: &SyncSender<FetchRequest>,
) -> ScanTally {
    let device_count = devices.len();
    if device_count < 1 {
        info!("scan: empty device list, aborting");

        return ScanTally::default();
    }

    let begin = Instant::now();
    let (reply_tx, reply_rx) = std::sync::mpsc::sync_channel::<FetchResult>(0);

    let max_concurrency = opt.max_concurrency;
    let holdtime = opt.holdtime;

    let mut wait = 0_usize; // requests pending
    let mut next_device = 0_usize; // device iterator
    let mut success = 0_usize;
    let mut failure = 0_usize;
    let mut skipped = 0_usize;
    let mut deleted = 0_usize;
    let mut elapsed_min = Duration::MAX;
    let mut elapsed_max = Duration::ZERO;

    while next_device < device_count || wait > 0 {
        // launch requests until the governor bites
        while next_device < device_count {
            if max_concurrency > 0 && wait >= max_concurrency {
                break;
            }

            let d = &devices[next_device];
            next_device += 1;

            if d.deleted {
                deleted += 1;
                continue;
            }

            let h = d.holdtime(Utc::now(), holdtime);
            if h > Duration::ZERO {
                debug!("scan: {} skipping due to holdtime={h:?}", d.id);

                skipped += 1;
                continue;
            }

            let req = FetchRequest {
                id: d.id.clone(),
                reply: Some(reply_tx.clone()),
            };

            if req_tx.send(req).is_err() {
                error!("scan: {} not launched, spawner is gone", d.id);

                failure += 1;
                continue;
            }

            wait += 1; // launched

            debug!(
                "scan: launched {} count={next_device}/{device_count} wait={wait} max={max_concurrency}",
                d.id
            );
        }

        if wait < 1 {
            continue;
        }

        // wait one reply; workers always post one
        let r = reply_rx
            .recv()
            .expect("reply channel cannot close while the scanner holds a sender");
        wait -= 1; // received

        let elapsed = (Utc::now() - r.begin).to_std().unwrap_or_default();

        info!(
            "scan: recv {} {} {} {} msg=[{}] code={:?} wait={wait} remain={} skipped={skipped} elapsed={elapsed:?}",
            r.model,
            r.dev_id,
            r.host_port,
            r.transport,
            r.msg,
            r.code,
            device_count - next_device,
        );

        if matches!(r.code, FetchCode::None | FetchCode::Unchanged) {
            success += 1;
        } else {
            failure += 1;
        }

        elapsed_min = elapsed_min.min(elapsed);
        elapsed_max = elapsed_max.max(elapsed);
    }

    let elapsed = begin.elapsed();
    let tally = ScanTally {
        success,
        failure,
        skipped: skipped + deleted,
        elapsed_min: if success + failure > 0 {
            elapsed_min
        } else {
            Duration::ZERO
        },
        elapsed_max,
        elapsed_avg: elapsed / device_count as u32,
    };

    info!(
        "scan: finished elapsed={elapsed:?} devices={device_count} success={} failure={} skipped={} min={:?} max={:?} avg={:?}",
        tally.success,
        tally.failure,
        tally.skipped,
        tally.elapsed_min,
        tally.elapsed_max,
        tally.elapsed_avg,
    );

    tally
}

/// Drives repeated scan cycles every `scan_interval` until `stop_rx` fires (or
/// its sender drops). The interval is measured from cycle start to cycle
/// start; a cycle outrunning the interval starts the next one immediately.
pub fn scan_loop(
    tab: &DeviceTable,
    options: &Options,
    req_tx: &SyncSender<FetchRequest>,
    stop_rx: &Receiver<()>,
) {
    info!("scan loop: starting");

    loop {
        let opt = options.get();
        let begin = Instant::now();

        let devices = tab.list_devices();
        let tally = scan(&devices, &opt, req_tx);

        info!(
            "scan loop: cycle done success={} failure={} skipped={}",
            tally.success, tally.failure, tally.skipped
        );

        let pause = opt.scan_interval.saturating_sub(begin.elapsed());

        match stop_rx.recv_timeout(pause) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
            Err(RecvTimeoutError::Timeout) => {}
        }
    }

    info!("scan loop: stopped");
}
