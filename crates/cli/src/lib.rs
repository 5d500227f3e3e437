//! Client side of Tyler: the HTTP API client and the session cache used by
//! `tylerctl`.

pub mod api_client;
pub mod session;

pub use api_client::{ApiClient, ClientError, ClientResult, SessionTokens};
pub use session::{AuthState, SessionCache};
