mod common;

use confvault::conf::AppConfig;
use confvault::device::{
    create_device,
    DeviceTable,
};
use confvault::model::profiles::ModelTable;
use confvault::scan::device_path_prefix;
use confvault::store::repo::{
    file_read,
    find_last_config,
};
use std::io::{
    BufRead,
    BufReader,
    Write,
};
use std::net::{
    SocketAddr,
    TcpListener,
    TcpStream,
};
use std::sync::Arc;
use std::thread;
use tempfile::TempDir;

#[derive(Debug, Clone, Copy, Default)]
struct ServerOptions {
    break_conn: bool,
}

fn spawn_server(options: ServerOptions) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind test server");
    let addr = listener.local_addr().expect("test server addr");

    thread::spawn(move || {
        for conn in listener.incoming() {
            let Ok(conn) = conn else { break };

            thread::spawn(move || {
                let _ = handle_connection(conn, options);
            });
        }
    });

    addr
}

fn read_line(reader: &mut BufReader<TcpStream>) -> std::io::Result<Option<String>> {
    let mut line = String::new();

    if reader.read_line(&mut line)? == 0 {
        return Ok(None);
    }

    Ok(Some(line))
}

/// A bogus junos-speaking device: lowercase login prompt, no enable mode,
/// screen-length command accepted, one canned "show configuration".
fn handle_connection(
    conn: TcpStream,
    options: ServerOptions,
) -> std::io::Result<()> {
    let mut reader = BufReader::new(conn.try_clone()?);
    let mut conn = conn;

    conn.write_all(b"router (ttyp0)\n\nlogin: ")?;
    if read_line(&mut reader)?.is_none() {
        return Ok(());
    }

    conn.write_all(b"\nPassword: ")?;
    if read_line(&mut reader)?.is_none() {
        return Ok(());
    }

    loop {
        conn.write_all(b"\nlab@router> ")?;

        let Some(cmd) = read_line(&mut reader)? else {
            return Ok(());
        };
        let cmd = cmd.trim();

        if cmd.starts_with('q') || cmd.starts_with("ex") {
            break;
        } else if cmd.starts_with("set cli") {
            // screen length off, nothing to show for it
        } else if cmd.starts_with("show") {
            if options.break_conn {
                return Ok(()); // drop the connection mid-capture
            }

            conn.write_all(
                b"\nset system host-name router\nset interfaces lo0 unit 0 family inet address 10.0.0.1/32",
            )?;
        } else {
            conn.write_all(b"\nunknown command")?;
        }
    }

    conn.write_all(b"\nbye\n")?;

    Ok(())
}

fn test_options() -> AppConfig {
    AppConfig {
        max_concurrency: 3,
        max_config_files: 10,
        ..AppConfig::default()
    }
}

fn add_junos_device(
    tab: &DeviceTable,
    models: &ModelTable,
    id: &str,
    addr: SocketAddr,
) {
    create_device(
        tab,
        models,
        "junos",
        id,
        &format!("127.0.0.1:{}", addr.port()),
        "telnet",
        "lab",
        "pass",
        "",
        false,
    )
    .expect("create device");
}

#[test]
fn full_dialogue() {
    let addr = spawn_server(ServerOptions::default());

    let tab = Arc::new(DeviceTable::new());
    let models = ModelTable::with_builtin_models();
    add_junos_device(&tab, &models, "lab1", addr);

    let repo = TempDir::new().unwrap();
    let repo_path = repo.path().display().to_string();

    let tally = common::run_scan(&tab, test_options(), &repo_path);

    assert_eq!(tally.success, 1, "tally: {tally:?}");
    assert_eq!(tally.failure, 0);
    assert_eq!(tally.skipped, 0);

    let prefix = device_path_prefix(&repo_path, "lab1");
    let last = find_last_config(&prefix).expect("generation written");

    let capture = String::from_utf8(file_read(&last, 1_000_000).unwrap()).unwrap();
    assert!(capture.contains("set system host-name router"), "capture: {capture}");
}

#[test]
fn broken_connection_mid_capture() {
    let addr = spawn_server(ServerOptions { break_conn: true });

    let tab = Arc::new(DeviceTable::new());
    let models = ModelTable::with_builtin_models();
    add_junos_device(&tab, &models, "lab1", addr);

    let repo = TempDir::new().unwrap();
    let repo_path = repo.path().display().to_string();

    let tally = common::run_scan(&tab, test_options(), &repo_path);

    assert_eq!(tally.success, 0, "tally: {tally:?}");
    assert_eq!(tally.failure, 1);
    assert_eq!(tally.skipped, 0);

    let prefix = device_path_prefix(&repo_path, "lab1");
    assert!(find_last_config(&prefix).is_err());

    let d = tab.get_device("lab1").unwrap();
    assert!(!d.last_status);
}
