//! Core domain types and shared logic for the Tyler ritual archive.
//!
//! This crate defines the canonical data model used across all other crates:
//! - Member profiles, roles and degrees
//! - Ritual documents, listing filters and storage key naming
//! - Session shapes exchanged between the credential store and its callers
//! - The authorization policy (pure role/degree decisions)
//! - The access gatekeeper's route classification and decision table
//! - Configuration types

pub mod config;
pub mod error;
pub mod gate;
pub mod policy;
pub mod profile;
pub mod ritual;
pub mod session;

pub use error::{Error, Result};
pub use gate::{GateDecision, RouteClass, SessionLookup, SIGN_IN_PATH};
pub use policy::RequiredDegree;
pub use profile::{Profile, ProfileChanges, Role, UserId};
pub use ritual::{OrganizeBy, Ritual, RitualFilter, RitualId};
pub use session::{Session, VerifiedSession};

/// Lowest degree a member can hold.
pub const MIN_DEGREE: i32 = 1;

/// Degree assigned to new members when none is given.
pub const DEFAULT_DEGREE: i32 = 1;
