use std::collections::HashMap;

use crate::jobs::error::{JobError, JobResult};
use crate::jobs::types::JobHandler;

type HandlerFactory = Box<dyn Fn() -> JobResult<Box<dyn JobHandler>> + Send + Sync>;

/// Resolves a stored handler id to a runnable handler
pub trait JobActivator: Send + Sync {
    fn activate(&self, handler_id: &str) -> JobResult<Box<dyn JobHandler>>;
}

/// Explicit handler id to factory map, built once at startup
#[derive(Default)]
pub struct HandlerRegistry {
    factories: HashMap<String, HandlerFactory>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `factory` under `handler_id`, replacing any earlier one
    pub fn register<F>(&mut self, handler_id: impl Into<String>, factory: F) -> &mut Self
    where
        F: Fn() -> JobResult<Box<dyn JobHandler>> + Send + Sync + 'static,
    {
        self.factories.insert(handler_id.into(), Box::new(factory));
        self
    }

    pub fn contains(&self, handler_id: &str) -> bool {
        self.factories.contains_key(handler_id)
    }

    /// Registered ids, sorted
    pub fn handler_ids(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.factories.keys().map(String::as_str).collect();
        ids.sort_unstable();
        ids
    }
}

impl JobActivator for HandlerRegistry {
    fn activate(&self, handler_id: &str) -> JobResult<Box<dyn JobHandler>> {
        let factory = self
            .factories
            .get(handler_id)
            .ok_or_else(|| JobError::UnresolvedHandler {
                handler_id: handler_id.to_string(),
            })?;

        factory()
    }
}
