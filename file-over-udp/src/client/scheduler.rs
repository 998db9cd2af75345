//! Bounded worker pool over a shared FIFO job queue.
//!
//! ```text
//!   job list ──▶ VecDeque<(index, name)> ──┬──▶ worker 0: control → transfer
//!                 (Arc<Mutex<..>>)         ├──▶ worker 1: control → transfer
//!                                          └──▶ worker w-1 ...
//! ```
//!
//! Each worker pops one job at a time and runs it start to finish; the lock is
//! held only for the pop.  Results are collected by job index so the report
//! list comes back in input order regardless of completion order.

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, PoisonError};

use crate::client::{ClientConfig, ClientError, ControlSession, TransferSession};
use crate::message::ControlResponse;
use crate::state::{JobOutcome, JobReport};

type JobQueue = Arc<Mutex<VecDeque<(usize, String)>>>;

/// Runs download jobs concurrently against one server.
#[derive(Debug, Clone)]
pub struct Downloader {
    config: Arc<ClientConfig>,
}

impl Downloader {
    pub fn new(config: ClientConfig) -> Self {
        Self {
            config: Arc::new(config),
        }
    }

    /// Download every file in `files` with at most `config.workers` running
    /// at once.  Returns one report per input, in input order.
    pub async fn run(&self, files: Vec<String>) -> Vec<JobReport> {
        let total = files.len();
        let workers = self.config.workers.max(1).min(total);
        log::info!("[scheduler] {total} job(s), {workers} worker(s)");

        let names = files.clone();
        let queue: JobQueue = Arc::new(Mutex::new(files.into_iter().enumerate().collect()));
        let results: Arc<Mutex<Vec<Option<JobReport>>>> = Arc::new(Mutex::new(vec![None; total]));

        let mut handles = Vec::with_capacity(workers);
        for id in 0..workers {
            let queue = Arc::clone(&queue);
            let results = Arc::clone(&results);
            let config = Arc::clone(&self.config);
            handles.push(tokio::spawn(async move {
                worker(id, config, queue, results).await;
            }));
        }
        for handle in handles {
            if let Err(e) = handle.await {
                log::error!("[scheduler] worker task failed: {e}");
            }
        }

        let slots = std::mem::take(&mut *results.lock().unwrap_or_else(PoisonError::into_inner));
        slots
            .into_iter()
            .zip(names)
            .map(|(slot, name)| {
                // Empty only if a worker panicked before finishing this job.
                slot.unwrap_or(JobReport {
                    name,
                    outcome: JobOutcome::Failed {
                        reason: "worker terminated".into(),
                    },
                })
            })
            .collect()
    }
}

async fn worker(
    id: usize,
    config: Arc<ClientConfig>,
    queue: JobQueue,
    results: Arc<Mutex<Vec<Option<JobReport>>>>,
) {
    loop {
        let job = queue
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front();
        let Some((index, name)) = job else {
            log::debug!("[scheduler] worker {id}: queue drained");
            return;
        };

        log::info!("[scheduler] worker {id}: {name}");
        let outcome = download_one(&config, &name).await;
        if outcome.is_success() {
            log::info!("[scheduler] {name}: {outcome}");
        } else {
            log::warn!("[scheduler] {name}: {outcome}");
        }

        results.lock().unwrap_or_else(PoisonError::into_inner)[index] =
            Some(JobReport { name, outcome });
    }
}

/// Control handshake followed by the chunked transfer, for one file.
pub async fn download_one(config: &ClientConfig, name: &str) -> JobOutcome {
    let response = match handshake(config, name).await {
        Ok(response) => response,
        Err(ClientError::NoResponse { .. }) => return JobOutcome::NoResponse,
        Err(e) => {
            return JobOutcome::Failed {
                reason: e.to_string(),
            }
        }
    };

    match response {
        ControlResponse::Ok { size, port, .. } => {
            let peer = SocketAddr::new(config.server.ip(), port);
            match transfer(config, name, size, peer).await {
                Ok(bytes) => JobOutcome::Completed { bytes },
                Err(e) => JobOutcome::Failed {
                    reason: e.to_string(),
                },
            }
        }
        ControlResponse::NotFound { .. } => JobOutcome::NotFound,
        ControlResponse::InvalidFormat => JobOutcome::Rejected,
    }
}

async fn handshake(config: &ClientConfig, name: &str) -> Result<ControlResponse, ClientError> {
    let session = ControlSession::open(config.server, config.timers.clone()).await?;
    session.download_request(name).await
}

async fn transfer(
    config: &ClientConfig,
    name: &str,
    size: u64,
    peer: SocketAddr,
) -> Result<u64, ClientError> {
    TransferSession::new(name, size, peer, config)
        .run(&config.dest_dir)
        .await
}
