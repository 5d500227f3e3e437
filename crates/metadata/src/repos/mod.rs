//! Repository traits for metadata operations.

pub mod credentials;
pub mod profiles;
pub mod rituals;

pub use credentials::CredentialRepo;
pub use profiles::ProfileRepo;
pub use rituals::RitualRepo;
