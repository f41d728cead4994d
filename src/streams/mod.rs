//! Subscription matching and in-flight call sessions
//!
//! Each configured stream owns a [`SessionStore`]. The [`SubscriptionTable`]
//! is built once at startup and routes every call event to the first stream
//! whose system and talkgroup patterns match.

pub mod record;
pub mod session;
pub mod store;
pub mod subscription;

pub use record::{assemble, Assembly};
pub use session::{CallId, Session};
pub use store::{InsertOutcome, SessionStore};
pub use subscription::{talkgroup_candidates, Subscription, SubscriptionTable};
