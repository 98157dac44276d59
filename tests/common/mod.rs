#![allow(dead_code)]

use confvault::conf::AppConfig;
use confvault::conf::Options;
use confvault::device::DeviceTable;
use confvault::filter::FilterTable;
use confvault::scan::{
    self,
    FetchRequest,
    ScanTally,
};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread;

/// Wires up a spawner for `tab`, runs one scan cycle against `repo`, shuts the
/// spawner down and returns the tally.
pub fn run_scan(
    tab: &Arc<DeviceTable>,
    opt: AppConfig,
    repo: &str,
) -> ScanTally {
    let (req_tx, req_rx) = mpsc::sync_channel::<FetchRequest>(0);

    let options = Arc::new(Options::new(opt.clone()));
    let filters = Arc::new(FilterTable::new());
    let spawner_tab = Arc::clone(tab);
    let repository = repo.to_owned();
    let log_prefix = errlog_prefix(repo);

    let spawner = thread::spawn(move || {
        scan::spawner(spawner_tab, req_rx, repository, log_prefix, options, filters);
    });

    let devices = tab.list_devices();
    let tally = scan::scan(&devices, &opt, &req_tx);

    // closing the request channel shuts the spawner down cleanly
    drop(req_tx);
    spawner.join().expect("spawner thread panicked");

    tally
}

pub fn errlog_prefix(repo: &str) -> String {
    format!("{repo}/errlog_test.")
}
