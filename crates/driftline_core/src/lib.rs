//! # DRIFTLINE Core
//!
//! World-side building blocks shared by the authority and every observer:
//! - Generational entity handles and the [`EntityRegistry`]
//! - [`FloatingOriginManager`] keeping local `f32` math close to zero
//! - [`SpatialIndex`], a lazily self-healing uniform grid
//! - The perceptual deadline solver used to pace replication
//!
//! ## Ordering Rule
//!
//! An origin shift is the only write that crosses components. The caller
//! applies it synchronously, inside one tick, before anything reads local
//! positions again:
//!
//! ```text
//! FloatingOriginManager::tick ──► EntityRegistry::apply_origin_shift
//!                               ──► SpatialIndex::apply_origin_shift
//!                               ──► (networking) every sync channel
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod entity;
pub mod origin;
pub mod registry;
pub mod spatial;

pub use entity::{EntityId, EntityKind};
pub use origin::{FloatingOriginManager, OriginShift};
pub use registry::{CachedRoster, EntityLookup, EntityRecord, EntityRegistry};
pub use spatial::{urgency, CellKey, PerceptualDeadline, SpatialIndex, SpatialStats};
