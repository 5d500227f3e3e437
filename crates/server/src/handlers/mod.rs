//! HTTP request handlers.

pub mod auth;
pub mod common;
pub mod files;
pub mod health;
pub mod pages;
pub mod rituals;
pub mod users;

pub use auth::*;
pub use files::*;
pub use health::*;
pub use rituals::*;
pub use users::*;
