//! Authenticated platform client
//!
//! - `session`: turns a raw session credential into a reusable request
//!   context (bearer token, cookies, anti-forgery header)
//! - `api`: GraphQL calls against the platform's private API

mod api;
mod session;

pub use api::PlatformApi;
pub use session::Session;
