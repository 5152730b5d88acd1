//! Repository layer for data access operations.
//!
//! Job records are accessed through `jobs::store`; this layer holds the
//! tables the handlers write to.

mod message_repo;

pub use message_repo::{MemoryMessageSink, MessageRepository, MessageSink};
