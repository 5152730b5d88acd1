use diesel::prelude::*;
use jiff_diesel::Timestamp;

/// Row written by the `message_log` handler
#[derive(Debug, Queryable, Selectable, Clone)]
#[diesel(table_name = crate::schema::messages)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct Message {
    pub id: i64,
    pub message: String,
    pub created_at: Timestamp,
}

#[derive(Debug, Insertable, Clone)]
#[diesel(table_name = crate::schema::messages)]
pub struct NewMessage {
    pub message: String,
}

impl NewMessage {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}
