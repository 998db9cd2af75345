//! Entry point for `file-over-udp`.
//!
//! Parses CLI arguments and dispatches into either **server** or **client** mode.
//! All protocol work is delegated to library modules; `main.rs` owns only
//! process setup (logging, argument parsing, exit status).

use std::net::SocketAddr;
use std::ops::RangeInclusive;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};

use file_over_udp::client::{read_job_list, DEFAULT_WORKERS};
use file_over_udp::{ClientConfig, Dispatcher, Downloader, ServerConfig};

/// Concurrent file download over UDP.
#[derive(Parser)]
#[command(author, version, about)]
struct Cli {
    #[command(subcommand)]
    mode: Mode,
}

#[derive(Subcommand)]
enum Mode {
    /// Serve files from a directory.
    Server {
        /// Control address to bind.
        #[arg(short, long, default_value = "0.0.0.0:9000")]
        bind: SocketAddr,
        /// Directory requested names are resolved against.
        #[arg(short, long, default_value = ".")]
        root: PathBuf,
        /// Ephemeral ports for transfer sessions, as LOW-HIGH.
        #[arg(long, default_value = "50000-51000", value_parser = parse_port_range)]
        port_range: RangeInclusive<u16>,
        /// Abandon a session after this many seconds without a valid request.
        #[arg(long, default_value_t = 60)]
        idle_timeout_secs: u64,
    },
    /// Download every file named in a list.
    Client {
        /// Server control address (e.g. 127.0.0.1:9000).
        #[arg(short, long)]
        server: SocketAddr,
        /// File with one name per line.
        #[arg(short, long)]
        list: PathBuf,
        /// Concurrent downloads.
        #[arg(short, long, default_value_t = DEFAULT_WORKERS)]
        workers: usize,
        /// Directory downloaded files are written into.
        #[arg(short, long, default_value = ".")]
        dest: PathBuf,
    },
}

fn parse_port_range(s: &str) -> Result<RangeInclusive<u16>, String> {
    let (lo, hi) = s
        .split_once('-')
        .ok_or_else(|| format!("expected LOW-HIGH, got {s:?}"))?;
    let lo: u16 = lo.trim().parse().map_err(|e| format!("{lo:?}: {e}"))?;
    let hi: u16 = hi.trim().parse().map_err(|e| format!("{hi:?}: {e}"))?;
    if lo == 0 || lo > hi {
        return Err(format!("empty or invalid range {lo}-{hi}"));
    }
    Ok(lo..=hi)
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    // Initialise env_logger; set RUST_LOG to control verbosity.
    env_logger::init();

    let cli = Cli::parse();

    match cli.mode {
        Mode::Server {
            bind,
            root,
            port_range,
            idle_timeout_secs,
        } => {
            if !root.is_dir() {
                bail!("root {} is not a directory", root.display());
            }
            let config = ServerConfig {
                bind,
                root,
                port_range,
                idle_timeout: Duration::from_secs(idle_timeout_secs),
                ..ServerConfig::default()
            };
            let dispatcher = Dispatcher::bind(config)
                .await
                .with_context(|| format!("binding {bind}"))?;
            dispatcher.run().await;
            Ok(ExitCode::SUCCESS)
        }
        Mode::Client {
            server,
            list,
            workers,
            dest,
        } => {
            let files = read_job_list(&list).await?;
            log::info!("Downloading {} file(s) from {server}", files.len());
            tokio::fs::create_dir_all(&dest)
                .await
                .with_context(|| format!("creating {}", dest.display()))?;

            let downloader = Downloader::new(ClientConfig {
                server,
                workers,
                dest_dir: dest,
                ..ClientConfig::default()
            });
            let reports = downloader.run(files).await;

            let mut failures = 0;
            for report in &reports {
                println!("{}: {}", report.name, report.outcome);
                if !report.outcome.is_success() {
                    failures += 1;
                }
            }
            println!(
                "{} of {} download(s) succeeded",
                reports.len() - failures,
                reports.len()
            );
            Ok(if failures == 0 {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use file_over_udp::server::DEFAULT_PORT_RANGE;

    use super::*;

    #[test]
    fn port_range_parses() {
        assert_eq!(parse_port_range("50000-51000"), Ok(50000..=51000));
        assert_eq!(parse_port_range("7-7"), Ok(7..=7));
        assert_eq!(DEFAULT_PORT_RANGE, parse_port_range("50000-51000").unwrap());
    }

    #[test]
    fn port_range_rejects_garbage() {
        assert!(parse_port_range("50000").is_err());
        assert!(parse_port_range("9-1").is_err());
        assert!(parse_port_range("0-10").is_err());
        assert!(parse_port_range("a-b").is_err());
    }

    #[test]
    fn cli_parses_both_modes() {
        let cli = Cli::try_parse_from([
            "file-over-udp",
            "client",
            "--server",
            "127.0.0.1:9000",
            "--list",
            "jobs.txt",
        ])
        .unwrap();
        assert!(matches!(cli.mode, Mode::Client { workers: 4, .. }));

        let cli = Cli::try_parse_from(["file-over-udp", "server", "--port-range", "40000-40010"])
            .unwrap();
        match cli.mode {
            Mode::Server { port_range, bind, .. } => {
                assert_eq!(port_range, 40000..=40010);
                assert_eq!(bind.port(), 9000);
            }
            Mode::Client { .. } => panic!("expected server"),
        }
    }
}
