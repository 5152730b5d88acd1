use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::AppResult;
use crate::jobs::activator::HandlerRegistry;
use crate::jobs::error::JobError;
use crate::jobs::types::{JobContext, JobHandler, JobPayload};
use crate::repositories::MessageSink;
use crate::tenants::StorageLocator;

/// Message sink per tenant name
pub type MessageSinks = Arc<HashMap<String, Arc<dyn MessageSink>>>;

/// Appends a timestamped line to the tenant's `messages` table
pub struct MessageLogHandler {
    sinks: MessageSinks,
}

impl MessageLogHandler {
    pub const HANDLER_ID: &'static str = "message_log";

    pub fn new(sinks: MessageSinks) -> Self {
        Self { sinks }
    }

    /// Register the handler factory under [`Self::HANDLER_ID`]
    pub fn register(registry: &mut HandlerRegistry, sinks: MessageSinks) {
        registry.register(Self::HANDLER_ID, move || {
            Ok(Box::new(MessageLogHandler::new(Arc::clone(&sinks))) as Box<dyn JobHandler>)
        });
    }

    pub fn message_text(now: &jiff::Zoned) -> String {
        format!("Logged at {}", now.strftime("%Y-%m-%d %H:%M:%S"))
    }
}

#[async_trait]
impl JobHandler for MessageLogHandler {
    fn handler_id(&self) -> &str {
        Self::HANDLER_ID
    }

    async fn execute(&self, ctx: JobContext, payload: &JobPayload) -> AppResult<()> {
        let sink = self
            .sinks
            .get(&payload.tenant)
            .ok_or_else(|| JobError::TenantNotFound(payload.tenant.clone()))?;

        let message = Self::message_text(&jiff::Zoned::now());
        let message_id = sink.append(&message).await?;

        let database = StorageLocator::from(payload.storage_locator.as_str())
            .database_name()
            .unwrap_or_default();

        tracing::info!(
            tenant = %ctx.tenant,
            job_id = ctx.job_id,
            generation = ctx.generation,
            message_id,
            database = %database,
            "Message inserted"
        );

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AppError;
    use crate::jobs::activator::JobActivator;
    use crate::repositories::MemoryMessageSink;
    use tokio_util::sync::CancellationToken;

    fn context(tenant: &str) -> JobContext {
        JobContext {
            job_id: 7,
            tenant: tenant.to_string(),
            queue: "queue-alpha".to_string(),
            generation: 0,
            cancellation_token: CancellationToken::new(),
        }
    }

    fn payload(tenant: &str) -> JobPayload {
        JobPayload {
            tenant: tenant.to_string(),
            storage_locator: "Server=.;Database=Alpha".to_string(),
            args: serde_json::Value::Null,
        }
    }

    #[tokio::test]
    async fn test_execute_appends_to_the_tenant_sink() {
        let alpha = MemoryMessageSink::new();
        let beta = MemoryMessageSink::new();
        let mut sinks: HashMap<String, Arc<dyn MessageSink>> = HashMap::new();
        sinks.insert("alpha".to_string(), Arc::new(alpha.clone()));
        sinks.insert("beta".to_string(), Arc::new(beta.clone()));

        let handler = MessageLogHandler::new(Arc::new(sinks));
        handler
            .execute(context("alpha"), &payload("alpha"))
            .await
            .unwrap();

        let rows = alpha.messages();
        assert_eq!(rows.len(), 1);
        assert!(rows[0].1.starts_with("Logged at "));
        assert!(beta.messages().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_tenant_fails() {
        let handler = MessageLogHandler::new(Arc::new(HashMap::new()));
        let err = handler
            .execute(context("ghost"), &payload("ghost"))
            .await
            .unwrap_err();

        assert!(matches!(err, AppError::Job(JobError::TenantNotFound(name)) if name == "ghost"));
    }

    #[test]
    fn test_registers_under_its_handler_id() {
        let mut registry = HandlerRegistry::new();
        MessageLogHandler::register(&mut registry, Arc::new(HashMap::new()));

        let handler = registry.activate("message_log").unwrap();
        assert_eq!(handler.handler_id(), MessageLogHandler::HANDLER_ID);
    }

    #[test]
    fn test_message_text_format() {
        let now: jiff::Zoned = "2026-10-16T09:30:05[UTC]".parse().unwrap();
        assert_eq!(
            MessageLogHandler::message_text(&now),
            "Logged at 2026-10-16 09:30:05"
        );
    }
}
