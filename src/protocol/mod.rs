//! Protocol correlation layer
//!
//! Turns the transport's raw frame stream into request/response calls and
//! typed push subscriptions, and restores the session after reconnects.

pub mod auth;
mod correlator;
mod types;

pub use auth::{AuthChain, AuthError, Authenticator, HttpCredentials, SessionToken, StaticToken};
pub use correlator::ProtocolClient;
pub use types::{ProtocolError, PushEvent, Reconnected, SessionState, Subscription, SubscriptionKey};
