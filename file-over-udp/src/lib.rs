//! `file-over-udp`: concurrent file download over a text protocol on UDP.
//!
//! # Architecture
//!
//! ```text
//!   client                                   server
//!  ┌────────────┐   DOWNLOAD <name>     ┌────────────┐
//!  │  Control   │──────────────────────▶│ Dispatcher │  well-known port
//!  │  session   │◀──────────────────────│            │
//!  └─────┬──────┘  OK <name> SIZE PORT  └─────┬──────┘
//!        │                                    │ lease port, bind, spawn
//!  ┌─────▼──────┐   FILE .. GET START END ┌───▼────────┐
//!  │  Transfer  │──────────────────────▶  │  Session   │  ephemeral port
//!  │  session   │◀──────────────────────  │            │
//!  └─────┬──────┘     DATA <base64>       └────────────┘
//!        │ temp file → rename
//!  ┌─────▼──────┐
//!  │ Downloader │  bounded worker pool over a FIFO job queue
//!  └────────────┘
//! ```
//!
//! Each module has a single responsibility:
//! - [`message`]     wire grammar (encode / strict decode)
//! - [`codec`]       base64 payloads and the chunk size limit
//! - [`socket`]      async text-datagram socket
//! - [`timer`]       retry budgets and widening control timeout
//! - [`state`]       per-transfer progress and job outcomes
//! - [`client`]      control handshake, pull loop, worker pool
//! - [`server`]      dispatcher, port leases, transfer sessions
//! - [`simulator`]   lossy/reordering/duplicating relay for testing

pub mod client;
pub mod codec;
pub mod message;
pub mod server;
pub mod simulator;
pub mod socket;
pub mod state;
pub mod timer;

pub use client::{ClientConfig, ClientError, Downloader};
pub use server::{Dispatcher, ServerConfig, ServerError};
pub use simulator::{Simulator, SimulatorConfig, SimulatorHandle};
pub use state::{JobOutcome, JobReport};
pub use timer::TimerConfig;
