//! In-process coordination: topic pub/sub with glob routing and bounded
//! history, Banker's-Algorithm deadlock prevention, and webhook dispatch
//! fed from the bus.

pub mod banker;
pub mod bus;
pub mod glob;
pub mod webhook;

// Re-exports for convenience.
pub use banker::{GrantOutcome, ResourceBroker};
pub use bus::{BusStats, Handler, Message, MessageBus, SubscribeOpts, SubscriptionHandle};
pub use glob::topic_matches;
pub use webhook::WebhookDispatcher;
