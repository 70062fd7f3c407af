//! # Driftline Shared
//!
//! Common types used by both the authority and its observers.
//!
//! ## CRITICAL RULE
//!
//! This crate holds *shapes* only: math, sector coordinates and the wire
//! payloads. It must never grow scheduling, transport or simulation state.

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod constants;
pub mod coordinate;
pub mod math;
pub mod protocol;

pub use constants::{MAX_PACKET_SIZE, MESSAGE_HEADER_SIZE, SCHEDULER_TICK_RATE, SIMULATION_TICK_RATE};
pub use coordinate::{from_global, to_global, GlobalPosition, DEFAULT_SECTOR_SIZE};
pub use math::{BodyState, DVec3, Quaternion, Vec3};
pub use protocol::{
    sequence_at_or_before, sequence_newer, ConnectionId, InputRecord, NetSnapshot,
};
