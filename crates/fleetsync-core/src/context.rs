//! Explicit sync context.
//!
//! Every sync component borrows a [`SyncContext`] instead of reaching for
//! process-wide state, so tests can run several independent engines side
//! by side.

use std::sync::Arc;

use time::OffsetDateTime;

use crate::cloud::CloudClient;
use crate::config::SyncConfig;
use crate::events::{EventDispatcher, SyncEvent};
use crate::local::LocalStore;
use crate::pictures::PictureCache;

/// Collaborators shared by one sync engine.
#[derive(Clone)]
pub struct SyncContext {
    pub cloud: Arc<dyn CloudClient>,
    pub store: Arc<dyn LocalStore>,
    pub pictures: Option<Arc<dyn PictureCache>>,
    pub events: EventDispatcher,
    pub config: SyncConfig,
}

impl SyncContext {
    /// Create a context with default configuration and no picture cache.
    pub fn new(cloud: Arc<dyn CloudClient>, store: Arc<dyn LocalStore>) -> Self {
        let config = SyncConfig::default();
        Self {
            cloud,
            store,
            pictures: None,
            events: EventDispatcher::new(config.event_capacity),
            config,
        }
    }

    /// Replace the configuration. The event channel is resized accordingly.
    #[must_use]
    pub fn with_config(mut self, config: SyncConfig) -> Self {
        self.events = EventDispatcher::new(config.event_capacity);
        self.config = config;
        self
    }

    /// Attach a picture cache.
    #[must_use]
    pub fn with_pictures(mut self, pictures: Arc<dyn PictureCache>) -> Self {
        self.pictures = Some(pictures);
        self
    }

    /// Emit an event.
    pub fn emit(&self, event: SyncEvent) {
        self.events.send(event);
    }

    pub(crate) fn now(&self) -> OffsetDateTime {
        OffsetDateTime::now_utc()
    }
}

impl std::fmt::Debug for SyncContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncContext")
            .field("has_pictures", &self.pictures.is_some())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
