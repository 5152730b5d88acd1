mod message_log;

pub use message_log::{MessageLogHandler, MessageSinks};
