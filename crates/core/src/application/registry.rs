// Handler Registry - job type -> handler

use crate::application::handler::JobHandler;
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use tracing::{info, warn};

/// Registry shared by the runner and all of its worker loops.
///
/// Registration happens at startup; lookups come concurrently from every loop.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: RwLock<HashMap<String, Arc<dyn JobHandler>>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler. A second registration for the same type replaces the first.
    pub fn register(&self, job_type: impl Into<String>, handler: Arc<dyn JobHandler>) {
        let job_type = job_type.into();
        let mut handlers = self
            .handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner);

        if handlers.insert(job_type.clone(), handler).is_some() {
            warn!(job_type = %job_type, "Handler re-registered, previous handler replaced");
        } else {
            info!(job_type = %job_type, "Handler registered");
        }
    }

    pub fn get(&self, job_type: &str) -> Option<Arc<dyn JobHandler>> {
        self.handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(job_type)
            .cloned()
    }

    /// Registered job types, sorted
    pub fn job_types(&self) -> Vec<String> {
        let mut types: Vec<String> = self
            .handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        types.sort();
        types
    }
}
