//! live2d-stage - Live2D avatar stage service
//!
//! Manages the lifecycle of Live2D models for a host canvas:
//! - Loads every registered character's model assets concurrently
//! - Tracks the active model and dispatches lip-sync / motion-sync to it
//! - Drives a fixed-cadence render loop and routes pointer interaction
//! - Exposes model metadata and store changes over HTTP/SSE

pub mod config;
pub mod error;
pub mod live2d;
pub mod web;

pub use config::Config;
pub use error::{Live2dStageError, Result};

use std::sync::Arc;
use tokio::sync::{broadcast, RwLock};

use live2d::asset::{reader_for, AssetReader};
use live2d::manager::{Live2dManager, ManagerSettings};
use live2d::native::Live2dModule;
use live2d::store::{MemoryStore, StoreEvent};

/// Application state shared across all components
#[derive(Debug)]
pub struct Live2dApp {
    /// Current configuration
    pub config: RwLock<Config>,
    /// Model metadata and UI flags
    pub store: Arc<MemoryStore>,
    /// Viewer and model lifecycle
    pub manager: Live2dManager,
    /// Shutdown signal
    pub shutdown_tx: broadcast::Sender<()>,
}

impl Live2dApp {
    /// Create the application state, reading assets from the configured source
    pub fn new(config: Config, module: Option<Arc<dyn Live2dModule>>) -> Arc<Self> {
        let reader = reader_for(&config.live2d);
        Self::with_reader(config, module, reader)
    }

    /// Create the application state with an explicit asset reader
    pub fn with_reader(
        config: Config,
        module: Option<Arc<dyn Live2dModule>>,
        reader: Arc<dyn AssetReader>,
    ) -> Arc<Self> {
        let (shutdown_tx, _) = broadcast::channel(1);
        let store = Arc::new(MemoryStore::from_config(&config));
        let manager = Live2dManager::new(
            module,
            store.clone(),
            reader,
            ManagerSettings::from_config(&config.live2d),
        );

        Arc::new(Self {
            config: RwLock::new(config),
            store,
            manager,
            shutdown_tx,
        })
    }

    /// Subscribe to store changes
    pub fn subscribe_store(&self) -> broadcast::Receiver<StoreEvent> {
        self.store.subscribe()
    }

    /// Subscribe to shutdown signal
    pub fn subscribe_shutdown(&self) -> broadcast::Receiver<()> {
        self.shutdown_tx.subscribe()
    }

    /// Signal shutdown
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }
}

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const NAME: &str = env!("CARGO_PKG_NAME");
