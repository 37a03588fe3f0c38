//! Metadata store the manager reads model info from and reports flags to

use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::RwLock;
use tokio::sync::broadcast;

use super::registry::ModelInfo;
use crate::config::Config;

/// Key/value store for model metadata and UI flags
pub trait Live2dStore: Send + Sync {
    /// Model metadata by character name
    fn model_info(&self, name: &str) -> Option<ModelInfo>;
    /// Supersede the metadata stored under `name`
    fn set_model_info(&self, name: &str, info: ModelInfo);
    /// Character names eligible for loading, fixed at store creation
    fn usable_names(&self) -> Vec<String>;

    fn set_core_loaded(&self, loaded: bool);
    fn set_initialized(&self, initialized: bool);
    fn set_latest_character_key(&self, key: &str);
}

/// Change notifications broadcast by [`MemoryStore`]
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum StoreEvent {
    ModelInfo { name: String, info: ModelInfo },
    CoreLoaded { loaded: bool },
    Initialized { initialized: bool },
    LatestCharacterKey { key: String },
    ShowInTalk { show: bool },
}

/// In-process store backed by locks, broadcasting every write
#[derive(Debug)]
pub struct MemoryStore {
    infos: RwLock<HashMap<String, ModelInfo>>,
    names: Vec<String>,
    core_loaded: AtomicBool,
    initialized: AtomicBool,
    show_in_talk: AtomicBool,
    latest_character_key: RwLock<String>,
    events_tx: broadcast::Sender<StoreEvent>,
}

impl MemoryStore {
    /// Create a store holding `entries` in the given order
    pub fn new(entries: Vec<(String, ModelInfo)>) -> Self {
        let (events_tx, _) = broadcast::channel(64);
        let names = entries.iter().map(|(name, _)| name.clone()).collect();

        Self {
            infos: RwLock::new(entries.into_iter().collect()),
            names,
            core_loaded: AtomicBool::new(false),
            initialized: AtomicBool::new(false),
            show_in_talk: AtomicBool::new(false),
            latest_character_key: RwLock::new(String::new()),
            events_tx,
        }
    }

    /// Build the initial metadata for every configured character
    pub fn from_config(config: &Config) -> Self {
        let root = config.live2d.assets_root();
        let entries = config
            .characters
            .iter()
            .map(|c| (c.name.clone(), ModelInfo::from_character(&root, c)))
            .collect();

        Self::new(entries)
    }

    /// Subscribe to store changes
    pub fn subscribe(&self) -> broadcast::Receiver<StoreEvent> {
        self.events_tx.subscribe()
    }

    pub fn is_core_loaded(&self) -> bool {
        self.core_loaded.load(Ordering::Relaxed)
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::Relaxed)
    }

    pub fn latest_character_key(&self) -> String {
        self.latest_character_key
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn is_current_show_in_talk(&self) -> bool {
        self.show_in_talk.load(Ordering::Relaxed)
    }

    pub fn set_current_show_in_talk(&self, show: bool) {
        self.show_in_talk.store(show, Ordering::Relaxed);
        self.emit(StoreEvent::ShowInTalk { show });
    }

    /// Name registered for a speaker id
    pub fn name_for_id(&self, id: &str) -> Option<String> {
        self.infos
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .find(|(_, info)| info.id.as_str() == id)
            .map(|(name, _)| name.clone())
    }

    /// Snapshot of every entry in registry order
    pub fn entries(&self) -> Vec<(String, ModelInfo)> {
        let infos = self.infos.read().unwrap_or_else(|e| e.into_inner());
        self.names
            .iter()
            .filter_map(|name| infos.get(name).map(|info| (name.clone(), info.clone())))
            .collect()
    }

    fn emit(&self, event: StoreEvent) {
        // No subscribers is fine
        let _ = self.events_tx.send(event);
    }
}

impl Live2dStore for MemoryStore {
    fn model_info(&self, name: &str) -> Option<ModelInfo> {
        self.infos
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(name)
            .cloned()
    }

    fn set_model_info(&self, name: &str, info: ModelInfo) {
        self.infos
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(name.to_string(), info.clone());
        self.emit(StoreEvent::ModelInfo {
            name: name.to_string(),
            info,
        });
    }

    fn usable_names(&self) -> Vec<String> {
        self.names.clone()
    }

    fn set_core_loaded(&self, loaded: bool) {
        self.core_loaded.store(loaded, Ordering::Relaxed);
        self.emit(StoreEvent::CoreLoaded { loaded });
    }

    fn set_initialized(&self, initialized: bool) {
        self.initialized.store(initialized, Ordering::Relaxed);
        self.emit(StoreEvent::Initialized { initialized });
    }

    fn set_latest_character_key(&self, key: &str) {
        *self
            .latest_character_key
            .write()
            .unwrap_or_else(|e| e.into_inner()) = key.to_string();
        self.emit(StoreEvent::LatestCharacterKey {
            key: key.to_string(),
        });
    }
}
