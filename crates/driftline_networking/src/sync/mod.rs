//! # Entity Synchronization
//!
//! One [`EntitySyncChannel`] per replicated entity per host:
//!
//! ```text
//!   OWNER (client)                 AUTHORITY (server)               OBSERVER (other clients)
//!   ───────────────                ──────────────────               ────────────────────────
//!   owner_tick ── Input ─────────▶ receive_input
//!   (predict, queue)               authority_step
//!                                  publish ── Snapshot ──────────▶ observer_receive_snapshot
//!   owner_receive_snapshot ◀────── Snapshot / Ack                   sample(now)
//!   (reconcile, prune)
//! ```
//!
//! Snapshots carry their own origin reference, so every comparison that
//! spans hosts is made in the global frame.

mod buffer;
mod channel;
mod clock;
mod reconcile;

pub use buffer::{BufferedState, InterpolationBuffer};
pub use channel::{EntitySyncChannel, SnapshotOutcome, SyncRole};
pub use clock::ClockSync;
pub use reconcile::{
    CorrectionTier, Divergence, PendingInputQueue, Reconciler, TierCounts, PENDING_INPUT_CAPACITY,
};
