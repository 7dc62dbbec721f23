//! The HTTP gateway: proxy surface, control plane, auth, and the
//! periodic tasks that drive the lifecycle sweep and webhook retries.

pub mod api;
pub mod cli;
pub mod sanitize;
pub mod state;
