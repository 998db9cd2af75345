//! End-to-end downloads against a real dispatcher on loopback.
//!
//! Each test serves files out of a temporary root, runs a [`Downloader`]
//! against it, and checks both the reported outcomes and what actually landed
//! in the destination directory.

use std::net::SocketAddr;
use std::ops::RangeInclusive;
use std::path::Path;
use std::time::Duration;

use file_over_udp::server::PortAllocator;
use file_over_udp::{
    ClientConfig, Dispatcher, Downloader, JobOutcome, ServerConfig, TimerConfig,
};
use tempfile::TempDir;
use tokio::task::JoinHandle;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

const LINGER: Duration = Duration::from_millis(200);

struct TestServer {
    addr: SocketAddr,
    ports: PortAllocator,
    task: JoinHandle<()>,
    _root: TempDir,
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Serve `files` from a fresh root on an OS-chosen loopback port.
async fn start_server(files: &[(&str, Vec<u8>)], port_range: RangeInclusive<u16>) -> TestServer {
    let root = tempfile::tempdir().expect("temp root");
    for (name, contents) in files {
        let path = root.path().join(name);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).expect("create parent");
        }
        std::fs::write(&path, contents).expect("write served file");
    }

    let dispatcher = Dispatcher::bind(ServerConfig {
        bind: "127.0.0.1:0".parse().unwrap(),
        root: root.path().to_path_buf(),
        port_range,
        idle_timeout: Duration::from_secs(2),
        linger: LINGER,
    })
    .await
    .expect("bind dispatcher");

    TestServer {
        addr: dispatcher.local_addr(),
        ports: dispatcher.ports().clone(),
        task: tokio::spawn(dispatcher.run()),
        _root: root,
    }
}

fn client_config(server: SocketAddr, dest: &Path, workers: usize) -> ClientConfig {
    ClientConfig {
        server,
        workers,
        dest_dir: dest.to_path_buf(),
        timers: TimerConfig {
            control_base: Duration::from_millis(200),
            control_cap: Duration::from_secs(1),
            control_attempts: 5,
            data_timeout: Duration::from_millis(500),
            data_attempts: 5,
        },
        ..ClientConfig::default()
    }
}

/// Deterministic, non-repeating-looking bytes.
fn pattern(len: usize, salt: u8) -> Vec<u8> {
    (0..len)
        .map(|i| ((i * 31 + usize::from(salt) * 7) % 251) as u8)
        .collect()
}

fn dir_entries(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = std::fs::read_dir(dir)
        .expect("read dest dir")
        .map(|e| e.expect("dir entry").file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    names
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

/// A 2500-byte file arrives byte-identical over three chunks.
#[tokio::test]
async fn report_is_downloaded_byte_identical() {
    let contents = pattern(2500, 1);
    let server = start_server(&[("report.txt", contents.clone())], 51100..=51149).await;
    let dest = tempfile::tempdir().unwrap();

    let reports = Downloader::new(client_config(server.addr, dest.path(), 1))
        .run(vec!["report.txt".into()])
        .await;

    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].outcome, JobOutcome::Completed { bytes: 2500 });
    let written = std::fs::read(dest.path().join("report.txt")).unwrap();
    assert_eq!(written, contents);
    assert_eq!(dir_entries(dest.path()), vec!["report.txt"]);
}

/// A name the server does not have fails without leaving anything behind.
#[tokio::test]
async fn missing_file_reports_not_found() {
    let server = start_server(&[], 51150..=51199).await;
    let dest = tempfile::tempdir().unwrap();

    let reports = Downloader::new(client_config(server.addr, dest.path(), 1))
        .run(vec!["missing.bin".into()])
        .await;

    assert_eq!(reports[0].outcome, JobOutcome::NotFound);
    assert!(dir_entries(dest.path()).is_empty());
    assert_eq!(server.ports.in_use(), 0);
}

/// Two files, two workers: both complete with matching contents.
#[tokio::test]
async fn two_files_two_workers() {
    let a = pattern(3100, 2);
    let b = pattern(1700, 3);
    let server = start_server(
        &[("a.bin", a.clone()), ("b.bin", b.clone())],
        51200..=51249,
    )
    .await;
    let dest = tempfile::tempdir().unwrap();

    let reports = Downloader::new(client_config(server.addr, dest.path(), 2))
        .run(vec!["a.bin".into(), "b.bin".into()])
        .await;

    assert_eq!(reports[0].name, "a.bin");
    assert_eq!(reports[0].outcome, JobOutcome::Completed { bytes: 3100 });
    assert_eq!(reports[1].name, "b.bin");
    assert_eq!(reports[1].outcome, JobOutcome::Completed { bytes: 1700 });
    assert_eq!(std::fs::read(dest.path().join("a.bin")).unwrap(), a);
    assert_eq!(std::fs::read(dest.path().join("b.bin")).unwrap(), b);
}

/// More jobs than workers, with a failure mixed in: reports stay in input
/// order and the failure does not disturb its neighbours.
#[tokio::test]
async fn mixed_batch_keeps_input_order() {
    let files: Vec<(String, Vec<u8>)> = (0..5u8)
        .map(|i| (format!("f{i}.dat"), pattern(900 + usize::from(i) * 450, i)))
        .collect();
    let served: Vec<(&str, Vec<u8>)> = files
        .iter()
        .map(|(name, data)| (name.as_str(), data.clone()))
        .collect();
    let server = start_server(&served, 51250..=51299).await;
    let dest = tempfile::tempdir().unwrap();

    let mut jobs: Vec<String> = files.iter().map(|(name, _)| name.clone()).collect();
    jobs.insert(2, "ghost.dat".into());

    let reports = Downloader::new(client_config(server.addr, dest.path(), 3))
        .run(jobs.clone())
        .await;

    let names: Vec<_> = reports.iter().map(|r| r.name.clone()).collect();
    assert_eq!(names, jobs);
    assert_eq!(reports[2].outcome, JobOutcome::NotFound);
    for (name, data) in &files {
        assert_eq!(&std::fs::read(dest.path().join(name)).unwrap(), data, "{name}");
    }
    assert_eq!(dir_entries(dest.path()).len(), files.len());
}

/// A stale destination is replaced by the downloaded contents.
#[tokio::test]
async fn existing_destination_is_replaced() {
    let contents = pattern(1200, 4);
    let server = start_server(&[("notes.txt", contents.clone())], 51300..=51349).await;
    let dest = tempfile::tempdir().unwrap();
    std::fs::write(dest.path().join("notes.txt"), b"stale and much shorter").unwrap();

    let reports = Downloader::new(client_config(server.addr, dest.path(), 1))
        .run(vec!["notes.txt".into()])
        .await;

    assert!(reports[0].outcome.is_success(), "{:?}", reports[0].outcome);
    assert_eq!(std::fs::read(dest.path().join("notes.txt")).unwrap(), contents);
}

/// Zero-byte files need no chunk requests but still produce a destination.
#[tokio::test]
async fn empty_file_is_created() {
    let server = start_server(&[("empty.log", Vec::new())], 51350..=51399).await;
    let dest = tempfile::tempdir().unwrap();

    let reports = Downloader::new(client_config(server.addr, dest.path(), 1))
        .run(vec!["empty.log".into()])
        .await;

    assert_eq!(reports[0].outcome, JobOutcome::Completed { bytes: 0 });
    assert_eq!(std::fs::read(dest.path().join("empty.log")).unwrap(), b"");
}

/// Names with directory components are mirrored under the destination.
#[tokio::test]
async fn nested_name_creates_subdirectory() {
    let contents = pattern(1001, 5);
    let server = start_server(&[("logs/day1.txt", contents.clone())], 51400..=51449).await;
    let dest = tempfile::tempdir().unwrap();

    let reports = Downloader::new(client_config(server.addr, dest.path(), 1))
        .run(vec!["logs/day1.txt".into()])
        .await;

    assert_eq!(reports[0].outcome, JobOutcome::Completed { bytes: 1001 });
    assert_eq!(
        std::fs::read(dest.path().join("logs").join("day1.txt")).unwrap(),
        contents
    );
}

/// A file that is an exact multiple of the chunk size ends on a full chunk.
#[tokio::test]
async fn exact_multiple_of_chunk_size() {
    let contents = pattern(3000, 6);
    let server = start_server(&[("even.bin", contents.clone())], 51450..=51499).await;
    let dest = tempfile::tempdir().unwrap();

    let reports = Downloader::new(client_config(server.addr, dest.path(), 1))
        .run(vec!["even.bin".into()])
        .await;

    assert_eq!(reports[0].outcome, JobOutcome::Completed { bytes: 3000 });
    assert_eq!(std::fs::read(dest.path().join("even.bin")).unwrap(), contents);
}

/// Session ports go back to the pool once the linger period runs out.
#[tokio::test]
async fn ports_are_released_after_sessions_finish() {
    let server = start_server(
        &[("x.bin", pattern(1500, 7)), ("y.bin", pattern(500, 8))],
        51500..=51549,
    )
    .await;
    let dest = tempfile::tempdir().unwrap();

    let reports = Downloader::new(client_config(server.addr, dest.path(), 2))
        .run(vec!["x.bin".into(), "y.bin".into()])
        .await;
    assert!(reports.iter().all(|r| r.outcome.is_success()));

    tokio::time::sleep(LINGER * 4).await;
    assert_eq!(server.ports.in_use(), 0);
}
