//! Fault-injecting UDP relay for testing.
//!
//! Real networks drop, reorder, and duplicate datagrams.  To exercise the
//! retry paths without depending on actual network conditions, a
//! [`Simulator`] sits between a client and an upstream address and forwards
//! traffic both ways, applying a configurable fault model to every datagram:
//!
//! | Fault            | Description                                      |
//! |------------------|--------------------------------------------------|
//! | Loss             | Drop a datagram with probability `loss_rate`.    |
//! | Reordering       | Delay a datagram by `reorder_delay`, letting     |
//! |                  | later ones overtake it.                          |
//! | Duplication      | Deliver a datagram twice.                        |
//!
//! ```text
//!  client A ─┐                    ┌─ upstream socket for A ─┐
//!            ├─▶ listen socket ───┤                         ├─▶ upstream
//!  client B ─┘        ▲           └─ upstream socket for B ─┘       │
//!                     └────────────── replies (faulted) ◀───────────┘
//! ```
//!
//! Each client gets its own upstream socket so replies can be routed back to
//! the right sender.  Decisions come from a seeded RNG, so a given seed and
//! traffic pattern fault the same datagrams every run.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::net::UdpSocket;
use tokio::task::{JoinHandle, JoinSet};

/// Largest datagram the relay will carry.
const RELAY_BUF: usize = 65_536;

/// Configuration for the fault-injection model.
///
/// All probabilities are in the range `[0.0, 1.0]`.
#[derive(Debug, Clone)]
pub struct SimulatorConfig {
    /// Probability that any given datagram is silently dropped.
    pub loss_rate: f64,
    /// Probability that a datagram is held back.
    pub reorder_rate: f64,
    /// Fixed delay applied to held-back datagrams.
    pub reorder_delay: Duration,
    /// Probability that a datagram is delivered twice.
    pub duplicate_rate: f64,
    /// RNG seed.
    pub seed: u64,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        // No faults: a transparent pass-through.
        Self {
            loss_rate: 0.0,
            reorder_rate: 0.0,
            reorder_delay: Duration::ZERO,
            duplicate_rate: 0.0,
            seed: 0,
        }
    }
}

/// Running totals, updated as datagrams pass through.
#[derive(Debug, Default)]
pub struct SimulatorStats {
    forwarded: AtomicU64,
    dropped: AtomicU64,
    delayed: AtomicU64,
    duplicated: AtomicU64,
}

impl SimulatorStats {
    pub fn forwarded(&self) -> u64 {
        self.forwarded.load(Ordering::Relaxed)
    }
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
    pub fn delayed(&self) -> u64 {
        self.delayed.load(Ordering::Relaxed)
    }
    pub fn duplicated(&self) -> u64 {
        self.duplicated.load(Ordering::Relaxed)
    }
}

/// What happens to one datagram.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Fate {
    Drop,
    Deliver { copies: u8, delay: Option<Duration> },
}

/// Shared fault model: config, RNG, counters.
struct FaultModel {
    config: SimulatorConfig,
    rng: Mutex<StdRng>,
    stats: Arc<SimulatorStats>,
}

impl FaultModel {
    fn new(config: SimulatorConfig) -> Self {
        Self {
            rng: Mutex::new(StdRng::seed_from_u64(config.seed)),
            config,
            stats: Arc::new(SimulatorStats::default()),
        }
    }

    fn decide(&self) -> Fate {
        let mut rng = self.rng.lock().unwrap_or_else(PoisonError::into_inner);
        if rng.gen_bool(self.config.loss_rate.clamp(0.0, 1.0)) {
            self.stats.dropped.fetch_add(1, Ordering::Relaxed);
            return Fate::Drop;
        }
        let delay = rng
            .gen_bool(self.config.reorder_rate.clamp(0.0, 1.0))
            .then_some(self.config.reorder_delay);
        let copies = if rng.gen_bool(self.config.duplicate_rate.clamp(0.0, 1.0)) {
            2
        } else {
            1
        };
        if delay.is_some() {
            self.stats.delayed.fetch_add(1, Ordering::Relaxed);
        }
        if copies > 1 {
            self.stats.duplicated.fetch_add(1, Ordering::Relaxed);
        }
        self.stats.forwarded.fetch_add(1, Ordering::Relaxed);
        Fate::Deliver { copies, delay }
    }

    /// Send `datagram` from `via` to `dest`, subject to the fault model.
    async fn forward(&self, via: &Arc<UdpSocket>, datagram: &[u8], dest: SocketAddr) {
        match self.decide() {
            Fate::Drop => {
                log::debug!("[sim] dropped {} bytes → {dest}", datagram.len());
            }
            Fate::Deliver { copies, delay: None } => {
                send_copies(via, datagram, dest, copies).await;
            }
            Fate::Deliver {
                copies,
                delay: Some(delay),
            } => {
                log::debug!("[sim] holding {} bytes → {dest} for {delay:?}", datagram.len());
                let via = Arc::clone(via);
                let datagram = datagram.to_vec();
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    send_copies(&via, &datagram, dest, copies).await;
                });
            }
        }
    }
}

async fn send_copies(via: &UdpSocket, datagram: &[u8], dest: SocketAddr, copies: u8) {
    for _ in 0..copies {
        if let Err(e) = via.send_to(datagram, dest).await {
            log::debug!("[sim] send to {dest} failed: {e}");
        }
    }
}

/// Entry point for starting a relay.
pub struct Simulator;

impl Simulator {
    /// Start relaying between `listen` and `upstream`.
    ///
    /// The relay runs until the returned handle is dropped.
    pub async fn spawn(
        listen: SocketAddr,
        upstream: SocketAddr,
        config: SimulatorConfig,
    ) -> std::io::Result<SimulatorHandle> {
        let front = Arc::new(UdpSocket::bind(listen).await?);
        let local_addr = front.local_addr()?;
        let model = Arc::new(FaultModel::new(config));
        let stats = Arc::clone(&model.stats);
        log::info!("[sim] relaying {local_addr} → {upstream}");

        let task = tokio::spawn(relay(front, upstream, model));
        Ok(SimulatorHandle {
            local_addr,
            stats,
            task,
        })
    }
}

/// A running relay.  Dropping it stops all relay tasks.
pub struct SimulatorHandle {
    /// Address clients should send to instead of the upstream.
    pub local_addr: SocketAddr,
    stats: Arc<SimulatorStats>,
    task: JoinHandle<()>,
}

impl SimulatorHandle {
    pub fn stats(&self) -> &SimulatorStats {
        &self.stats
    }
}

impl Drop for SimulatorHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Client → upstream loop.  Owns the per-client return tasks, so aborting
/// it tears them all down.
async fn relay(front: Arc<UdpSocket>, upstream: SocketAddr, model: Arc<FaultModel>) {
    let mut peers: HashMap<SocketAddr, Arc<UdpSocket>> = HashMap::new();
    let mut returns = JoinSet::new();
    let mut buf = vec![0u8; RELAY_BUF];

    loop {
        let (n, client) = match front.recv_from(&mut buf).await {
            Ok(received) => received,
            Err(e) => {
                log::debug!("[sim] receive failed: {e}");
                continue;
            }
        };

        let back = match peers.get(&client) {
            Some(back) => Arc::clone(back),
            None => {
                let bind: SocketAddr = if upstream.is_ipv4() {
                    ([0, 0, 0, 0], 0).into()
                } else {
                    (std::net::Ipv6Addr::UNSPECIFIED, 0).into()
                };
                let back = match UdpSocket::bind(bind).await {
                    Ok(socket) => Arc::new(socket),
                    Err(e) => {
                        log::warn!("[sim] cannot open upstream socket for {client}: {e}");
                        continue;
                    }
                };
                log::debug!("[sim] new client {client}");
                returns.spawn(give_back(
                    Arc::clone(&back),
                    Arc::clone(&front),
                    client,
                    Arc::clone(&model),
                ));
                peers.insert(client, Arc::clone(&back));
                back
            }
        };

        model.forward(&back, &buf[..n], upstream).await;
    }
}

/// Upstream → client loop for one client.
async fn give_back(
    back: Arc<UdpSocket>,
    front: Arc<UdpSocket>,
    client: SocketAddr,
    model: Arc<FaultModel>,
) {
    let mut buf = vec![0u8; RELAY_BUF];
    loop {
        match back.recv_from(&mut buf).await {
            Ok((n, _)) => model.forward(&front, &buf[..n], client).await,
            Err(e) => log::debug!("[sim] upstream receive for {client} failed: {e}"),
        }
    }
}
