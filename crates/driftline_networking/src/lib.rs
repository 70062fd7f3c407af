//! # DRIFTLINE Networking
//!
//! Interest management and entity synchronization for a large, sparse world
//! simulated in `f32` around a floating origin.
//!
//! ## Architecture
//!
//! - **Scheduler**: per-connection relevance selection under an adaptive
//!   (AIMD) byte budget, with perceptual deadlines pacing each link
//! - **Sync**: one channel per (entity, role): authority publishes quantized
//!   snapshots, the owner predicts and reconciles, observers interpolate
//! - **Protocol**: one fixed-size message per datagram, `bytemuck` payloads
//! - **Transport**: a two-channel datagram trait plus an in-process loopback
//! - **Drivers**: [`ReplicationServer`] and [`ReplicationClient`] wire it all
//!   together on two cadences
//!
//! ## Data Flow
//!
//! ```text
//! CLIENT (owner)                     SERVER (authority)
//!   |                                  |
//!   |--- Input (unreliable) ---------->| flight step, origin check
//!   |                                  |
//!   |                                  | scheduler tick (5 Hz):
//!   |<-- Wake / Dormant (reliable) ----|   gather ▶ score ▶ admit
//!   |                                  |
//!   |<-- Snapshot (unreliable) --------| simulation tick (30 Hz):
//!   |<-- Ack (reliable) ---------------|   due links only
//!   |                                  |
//!   reconcile own ship,
//!   interpolate everyone else
//! ```
//!
//! ## Example
//!
//! ```rust,ignore
//! use driftline_networking::{LoopbackHub, ReplicationServer, SyncConfig};
//!
//! let mut server = ReplicationServer::new(SyncConfig::default(), LoopbackHub::new());
//! loop {
//!     server.advance(frame_dt);
//! }
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod cadence;
pub mod client;
pub mod config;
pub mod error;
pub mod flight;
pub mod protocol;
pub mod scheduler;
pub mod server;
pub mod simulation;
pub mod sync;
pub mod transport;

pub use cadence::{CadenceClock, CadenceSteps, TickStats};
pub use client::{ClientStats, ReplicationClient};
pub use config::SyncConfig;
pub use error::{SyncError, SyncResult};
pub use flight::{Flight, FlightParams, SimpleFlight};
pub use protocol::{Delivery, MessageTag, SyncMessage};
pub use scheduler::{InterestScheduler, SchedulerReport};
pub use server::{ReplicationServer, ServerStats};
pub use simulation::{NetworkConditions, SwarmConfig, SwarmReport, SwarmSimulation, WanderPilot};
pub use sync::{EntitySyncChannel, SnapshotOutcome, SyncRole};
pub use transport::{LoopbackEndpoint, LoopbackHub, Transport, TransportStats, SERVER_CONNECTION};
