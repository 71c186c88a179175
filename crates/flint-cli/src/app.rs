//! Application state management.

use crossbeam_channel::Receiver;
use flint_core::{
    ChannelListener, Config, IndexManager, ListenerEvent, LocalFileFetcher, ManagerConfig,
    PlainTextTranslatorFactory,
};
use std::sync::Arc;
use tracing::info;

/// Shared application state.
pub struct App {
    /// Configuration
    pub config: Config,

    /// The indexing pipeline
    pub manager: IndexManager,

    /// Job and batch notifications
    pub events: Receiver<ListenerEvent>,
}

impl App {
    /// Create a new application instance.
    pub fn new(config: Config) -> anyhow::Result<Self> {
        let (listener, events) = ChannelListener::new();
        let manager = IndexManager::new(
            Arc::new(LocalFileFetcher::new()),
            Arc::new(listener),
            ManagerConfig::from(&config),
        )?;
        manager.register_translator_factory(Arc::new(PlainTextTranslatorFactory));

        info!(
            threads = manager.config().threads,
            max_open = manager.config().max_open,
            "Application initialized"
        );

        Ok(App {
            config,
            manager,
            events,
        })
    }
}
