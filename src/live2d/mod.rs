//! Live2D model lifecycle
//!
//! The native module is driven through the traits in [`native`]. The
//! [`Live2dManager`] owns the single viewer, loads models into it, and runs the
//! render loop and pointer routing on top of it.

pub mod asset;
pub mod headless;
pub mod interaction;
pub mod manager;
pub mod native;
pub mod registry;
pub mod render;
pub mod scene;
pub mod store;

pub use asset::{reader_for, AssetReader, FileAssetReader, HttpAssetReader, MemoryAssetReader};
pub use headless::HeadlessModule;
pub use interaction::{Canvas, EventCanvas, InteractionRouter, PointerEvent, PointerEventKind};
pub use manager::{Live2dManager, LoadBatch, LoadSummary};
pub use native::{Live2dModule, Model, ModelInstance, MotionSyncModel, Viewer};
pub use registry::{ModelInfo, ModelKind, SpeakerId};
pub use render::RenderLoop;
pub use store::{Live2dStore, MemoryStore, StoreEvent};

use std::sync::{Arc, Mutex, MutexGuard};

/// The viewer slot shared by the manager, the render loop and pointer routing
pub type SharedViewer = Arc<Mutex<Option<Box<dyn Viewer>>>>;

/// Lock the viewer slot, recovering from a poisoned lock
pub(crate) fn lock_viewer(viewer: &SharedViewer) -> MutexGuard<'_, Option<Box<dyn Viewer>>> {
    viewer.lock().unwrap_or_else(|e| e.into_inner())
}
