//! # Protocol Constants
//!
//! Values both sides of a connection must agree on.
//!
//! **CRITICAL:** changing any of these changes the wire contract.

// =============================================================================
// CADENCE
// =============================================================================

/// Default high-frequency simulation/transport rate (ticks per second).
pub const SIMULATION_TICK_RATE: u32 = 30;

/// Default low-frequency interest scheduler rate (ticks per second).
pub const SCHEDULER_TICK_RATE: u32 = 5;

// =============================================================================
// WIRE
// =============================================================================

/// Maximum packet size (MTU-safe)
pub const MAX_PACKET_SIZE: usize = 1200;

/// Bytes of framing in front of every payload: tag (1) + entity id (8).
pub const MESSAGE_HEADER_SIZE: usize = 9;
