//! Position reconstruction for multi-leg option structures.
//!
//! The broker reports individual option legs; this crate groups a flat,
//! unordered leg list into logical spread structures with per-structure
//! profit/loss. Reconstruction is a pure function of its input: it never
//! mutates the legs it is given and repeated calls yield identical output.

pub mod reconstruct;
pub mod types;

pub use reconstruct::reconstruct;
pub use types::{PositionLeg, SpreadKind, Structure, StructureStatus};
