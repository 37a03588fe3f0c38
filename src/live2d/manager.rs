//! Model lifecycle manager
//!
//! Owns the single viewer slot and everything driven off it: model loading and
//! release, the current-model pointer, lip-sync dispatch, the render loop and
//! pointer routing. When the native module is unavailable every operation
//! degrades to a logged no-op returning an empty default.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::task::JoinSet;

use super::asset::AssetReader;
use super::interaction::{Canvas, InteractionRouter};
use super::native::{Live2dModule, ModelDescriptor, Viewer};
use super::registry::ModelKind;
use super::render::{RenderLoop, DEFAULT_FRAME_INTERVAL};
use super::scene;
use super::store::Live2dStore;
use super::{lock_viewer, SharedViewer};
use crate::config::Live2dConfig;
use crate::error::{ModelError, NativeError, Result};

/// Sentinel heading every expression list
pub const NO_EXPRESSION: &str = "None";

/// Tunables the manager is constructed with
#[derive(Debug, Clone)]
pub struct ManagerSettings {
    /// Working memory handed to the viewer, in bytes
    pub memory_budget: usize,
    pub frame_interval: Duration,
    /// Character name made current once all loads are issued
    pub default_model: Option<String>,
    /// Fixed seed for the touch eye gestures
    pub gesture_seed: Option<u64>,
}

impl Default for ManagerSettings {
    fn default() -> Self {
        Self {
            memory_budget: 32 * 1024 * 1024,
            frame_interval: DEFAULT_FRAME_INTERVAL,
            default_model: None,
            gesture_seed: None,
        }
    }
}

impl ManagerSettings {
    pub fn from_config(config: &Live2dConfig) -> Self {
        Self {
            memory_budget: config.memory_budget(),
            frame_interval: config.frame_interval(),
            default_model: config.default_model.clone(),
            gesture_seed: None,
        }
    }
}

/// Outcome of a settled [`LoadBatch`]
#[derive(Debug, Default, Clone, PartialEq)]
pub struct LoadSummary {
    /// Names that ended registered in the viewer, in completion order
    pub loaded: Vec<String>,
    /// Names that failed, with the reason
    pub failed: Vec<(String, String)>,
}

impl LoadSummary {
    pub fn is_all_loaded(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Model loads issued by [`Live2dManager::load_all_models`]
#[derive(Debug, Default)]
pub struct LoadBatch {
    tasks: JoinSet<(String, Result<bool>)>,
}

impl LoadBatch {
    /// Loads still running
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Wait for every issued load to finish
    pub async fn settled(mut self) -> LoadSummary {
        let mut summary = LoadSummary::default();

        while let Some(joined) = self.tasks.join_next().await {
            match joined {
                Ok((name, Ok(true))) => summary.loaded.push(name),
                Ok((name, Ok(false))) => {
                    summary
                        .failed
                        .push((name, NativeError::Unavailable.to_string()));
                }
                Ok((name, Err(e))) => summary.failed.push((name, e.to_string())),
                Err(e) => tracing::error!("Model load task did not complete: {}", e),
            }
        }

        summary
    }
}

/// Everything a load task needs, detached from the manager
#[derive(Clone)]
struct ModelLoader {
    module: Arc<dyn Live2dModule>,
    store: Arc<dyn Live2dStore>,
    reader: Arc<dyn AssetReader>,
    viewer: SharedViewer,
    generation: Arc<AtomicU64>,
}

impl ModelLoader {
    async fn load(&self, name: &str, kind: ModelKind) -> Result<bool> {
        let Some(mut info) = self.store.model_info(name) else {
            tracing::warn!("No Live2D model registered for {}", name);
            return Err(ModelError::UnknownModel(name.to_string()).into());
        };

        let descriptor = ModelDescriptor {
            dir_path: info.dir_path.clone(),
            model_json_name: info.model_json_name.clone(),
            legacy_param_names: info.uses_legacy_param_names(),
        };

        let (mut instance, generation) = {
            let guard = lock_viewer(&self.viewer);
            let Some(viewer) = guard.as_ref() else {
                return Err(ModelError::ViewerNotInitialized.into());
            };
            let instance = self.module.create_model(
                kind,
                descriptor,
                viewer.as_ref(),
                Arc::clone(&self.reader),
            );
            (instance, self.generation.load(Ordering::Acquire))
        };

        tracing::debug!("Loading {} model {} from {}", kind, name, info.model_json_path());
        if let Err(e) = instance.model_mut().load_assets().await {
            tracing::error!("Error when loading Live2D model assets for {}: {}", name, e);
            instance.model_mut().release();
            return Err(ModelError::LoadFailed {
                name: name.to_string(),
                reason: e.to_string(),
            }
            .into());
        }

        let model = instance.model_mut();
        if let Some(weight) = info.lip_sync_weight {
            model.set_lip_sync_weight(weight);
        }
        if let Some(expression) = &info.default_expression {
            model.set_expression(expression);
        }

        {
            let mut guard = lock_viewer(&self.viewer);
            // The model belongs to the viewer it was created against
            let viewer = match guard.as_mut() {
                Some(viewer) if self.generation.load(Ordering::Acquire) == generation => viewer,
                _ => {
                    tracing::warn!("Viewer released while {} was loading", name);
                    instance.model_mut().release();
                    return Err(ModelError::ViewerNotInitialized.into());
                }
            };
            viewer.add_model(info.id.as_str(), instance);
        }

        info.is_usable = true;
        self.store.set_model_info(name, info);
        tracing::info!("Live2D model {} loaded", name);
        Ok(true)
    }
}

/// Lifecycle manager for the viewer and its models
pub struct Live2dManager {
    module: Option<Arc<dyn Live2dModule>>,
    store: Arc<dyn Live2dStore>,
    reader: Arc<dyn AssetReader>,
    settings: ManagerSettings,
    viewer: SharedViewer,
    /// Bumped whenever the viewer in the slot is replaced or released
    viewer_generation: Arc<AtomicU64>,
    canvas: Mutex<Option<Arc<dyn Canvas>>>,
    core_loaded: AtomicBool,
    unavailable_logged: AtomicBool,
    render: RenderLoop,
    router: InteractionRouter,
}

impl Live2dManager {
    /// Create a manager; `module` is `None` when the native module could not be loaded
    pub fn new(
        module: Option<Arc<dyn Live2dModule>>,
        store: Arc<dyn Live2dStore>,
        reader: Arc<dyn AssetReader>,
        settings: ManagerSettings,
    ) -> Self {
        let viewer: SharedViewer = Arc::new(Mutex::new(None));
        let router = match settings.gesture_seed {
            Some(seed) => InteractionRouter::with_seed(Arc::clone(&viewer), seed),
            None => InteractionRouter::new(Arc::clone(&viewer)),
        };

        Self {
            module,
            store,
            reader,
            render: RenderLoop::new(settings.frame_interval),
            settings,
            viewer,
            viewer_generation: Arc::new(AtomicU64::new(0)),
            canvas: Mutex::new(None),
            core_loaded: AtomicBool::new(false),
            unavailable_logged: AtomicBool::new(false),
            router,
        }
    }

    /// The native module, logging its absence once
    fn module(&self) -> Option<&Arc<dyn Live2dModule>> {
        if self.module.is_none() && !self.unavailable_logged.swap(true, Ordering::Relaxed) {
            tracing::warn!("Live2D native module is unavailable, Live2D features are disabled");
        }
        self.module.as_ref()
    }

    fn loader(&self) -> Option<ModelLoader> {
        self.module().map(|module| ModelLoader {
            module: Arc::clone(module),
            store: Arc::clone(&self.store),
            reader: Arc::clone(&self.reader),
            viewer: Arc::clone(&self.viewer),
            generation: Arc::clone(&self.viewer_generation),
        })
    }

    /// Run `f` against the viewer while it exists and the module is available
    fn with_viewer_unchecked<R>(&self, f: impl FnOnce(&mut dyn Viewer) -> R) -> Option<R> {
        self.module()?;
        let mut guard = lock_viewer(&self.viewer);
        guard.as_mut().map(|viewer| f(viewer.as_mut()))
    }

    pub fn is_available(&self) -> bool {
        self.module.is_some()
    }

    pub fn store(&self) -> &Arc<dyn Live2dStore> {
        &self.store
    }

    /// Construct and initialize the viewer bound to `canvas`.
    ///
    /// Returns false (after logging) when the module is unavailable or the
    /// viewer could not be constructed.
    pub fn initialize_viewer(&self, canvas: Arc<dyn Canvas>, width: u32, height: u32) -> bool {
        let Some(module) = self.module() else {
            return false;
        };

        let mut viewer = match module.create_viewer(Arc::clone(&canvas), width, height) {
            Ok(viewer) => viewer,
            Err(e) => {
                tracing::error!("{}", e);
                return false;
            }
        };
        if let Err(e) = viewer.initialize(self.settings.memory_budget) {
            tracing::error!("{}", e);
            viewer.release();
            return false;
        }

        {
            let mut slot = lock_viewer(&self.viewer);
            self.viewer_generation.fetch_add(1, Ordering::AcqRel);
            if let Some(mut previous) = slot.replace(viewer) {
                tracing::warn!("Replacing an existing Live2D viewer");
                previous.release();
            }
        }
        *self.canvas.lock().unwrap_or_else(|e| e.into_inner()) = Some(canvas);

        self.core_loaded.store(true, Ordering::Relaxed);
        self.store.set_core_loaded(true);
        tracing::info!(
            "Live2D viewer initialized ({}x{}, {} MiB)",
            width,
            height,
            self.settings.memory_budget / (1024 * 1024)
        );
        true
    }

    /// Viewer was initialized successfully
    pub fn is_core_loaded(&self) -> bool {
        self.core_loaded.load(Ordering::Relaxed)
    }

    /// Run `f` against the viewer, only once the core is loaded
    pub fn with_viewer<R>(&self, f: impl FnOnce(&mut dyn Viewer) -> R) -> Option<R> {
        if !self.is_core_loaded() {
            return None;
        }
        self.with_viewer_unchecked(f)
    }

    pub fn resize_viewer(&self, width: u32, height: u32) {
        self.with_viewer_unchecked(|viewer| viewer.resize(width, height));
    }

    /// Load the named character as a standard model
    pub async fn load_model(&self, name: &str) -> Result<bool> {
        self.load_model_as(name, ModelKind::Standard).await
    }

    /// Load the named character as a motion-sync model
    pub async fn load_motion_sync_model(&self, name: &str) -> Result<bool> {
        self.load_model_as(name, ModelKind::MotionSync).await
    }

    async fn load_model_as(&self, name: &str, kind: ModelKind) -> Result<bool> {
        let Some(loader) = self.loader() else {
            return Ok(false);
        };
        loader.load(name, kind).await
    }

    /// Issue a load for every usable character without waiting for any.
    ///
    /// Marks the store initialized and selects the default model as soon as
    /// the loads are issued; await [`LoadBatch::settled`] for completion.
    pub fn load_all_models(&self) -> LoadBatch {
        let mut batch = LoadBatch::default();
        let Some(loader) = self.loader() else {
            return batch;
        };
        if lock_viewer(&self.viewer).is_none() {
            tracing::warn!("Cannot load Live2D models before the viewer is initialized");
            return batch;
        }
        let Ok(runtime) = Handle::try_current() else {
            tracing::error!("Cannot load Live2D models outside an async runtime");
            return batch;
        };

        let names = self.store.usable_names();
        let kinds: HashMap<String, ModelKind> = names
            .iter()
            .map(|name| {
                let kind = self
                    .store
                    .model_info(name)
                    .map(|info| info.kind)
                    .unwrap_or_default();
                (name.clone(), kind)
            })
            .collect();

        for name in names {
            let kind = kinds.get(&name).copied().unwrap_or_default();
            let loader = loader.clone();
            batch.tasks.spawn_on(
                async move {
                    let result = loader.load(&name, kind).await;
                    (name, result)
                },
                &runtime,
            );
        }
        tracing::info!("Issued {} Live2D model loads", batch.len());

        if let Some(default) = &self.settings.default_model {
            match self.store.model_info(default) {
                Some(info) => self.set_current_model(info.id.as_str()),
                None => tracing::warn!("Default Live2D model {} is not registered", default),
            }
        }
        self.store.set_initialized(true);

        batch
    }

    /// Make `key` the current model; the viewer does not validate it
    pub fn set_current_model(&self, key: &str) {
        if self
            .with_viewer_unchecked(|viewer| viewer.set_current_model(key))
            .is_some()
        {
            self.store.set_latest_character_key(key);
        }
    }

    pub fn current_model_key(&self) -> Option<String> {
        self.with_viewer_unchecked(|viewer| viewer.current_model_key())
            .flatten()
    }

    pub fn is_model_present(&self, key: &str) -> bool {
        self.with_viewer_unchecked(|viewer| viewer.model(key).is_some())
            .unwrap_or(false)
    }

    pub fn is_model_setup_complete(&self, key: &str) -> bool {
        self.with_viewer_unchecked(|viewer| {
            viewer
                .model(key)
                .is_some_and(|instance| instance.model().is_complete_setup())
        })
        .unwrap_or(false)
    }

    pub fn motion_names(&self, key: &str) -> Vec<String> {
        self.with_viewer_unchecked(|viewer| {
            viewer
                .model(key)
                .map(|instance| instance.model().motion_file_names())
                .unwrap_or_default()
        })
        .unwrap_or_default()
    }

    /// Expression ids of `key` headed by [`NO_EXPRESSION`]
    pub fn expression_ids(&self, key: &str) -> Vec<String> {
        self.with_viewer_unchecked(|viewer| {
            let mut ids = vec![NO_EXPRESSION.to_string()];
            if let Some(instance) = viewer.model(key) {
                ids.extend(instance.model().expression_ids());
            }
            ids
        })
        .unwrap_or_default()
    }

    /// Start mouth animation on the current model from a WAV buffer
    pub fn start_lip_sync(&self, wav: &[u8]) {
        self.with_current_model(|instance| instance.start_speech(wav));
    }

    pub fn stop_lip_sync(&self) {
        self.with_current_model(|instance| instance.stop_speech());
    }

    fn with_current_model(&self, f: impl FnOnce(&mut super::native::ModelInstance)) {
        self.with_viewer_unchecked(|viewer| {
            let Some(key) = viewer.current_model_key() else {
                return;
            };
            match viewer.model_mut(&key) {
                Some(instance) => f(instance),
                None => tracing::debug!("Current Live2D model {} is not loaded", key),
            }
        });
    }

    /// Release one model; false when it was not loaded
    pub fn release_model(&self, key: &str) -> bool {
        self.with_viewer_unchecked(|viewer| viewer.release_model(key))
            .unwrap_or(false)
    }

    /// Stop rendering and release every loaded model
    pub fn release_all_models(&self) {
        if self.module().is_none() {
            return;
        }
        self.render.cancel();
        self.with_viewer_unchecked(|viewer| viewer.release_all_models());
        tracing::info!("All Live2D models released");
    }

    /// Stop rendering, then release the viewer and everything it holds
    pub fn release_viewer(&self) {
        if self.module().is_none() {
            return;
        }
        self.render.cancel();

        let released = {
            let mut slot = lock_viewer(&self.viewer);
            self.viewer_generation.fetch_add(1, Ordering::AcqRel);
            slot.take()
        };
        if let Some(mut viewer) = released {
            viewer.release();
            self.store.set_initialized(false);
            tracing::info!("Live2D viewer released");
        }
    }

    /// Start (or restart) the render loop on the current viewer
    pub fn start_render(&self) -> bool {
        if self.module().is_none() {
            return false;
        }
        if lock_viewer(&self.viewer).is_none() {
            tracing::warn!("Cannot render before the viewer is initialized");
            return false;
        }
        self.render.start(Arc::clone(&self.viewer), scene::portrait)
    }

    pub fn cancel_render(&self) {
        self.render.cancel();
    }

    pub fn is_rendering(&self) -> bool {
        self.render.is_running()
    }

    /// Route pointer events from the viewer's canvas to the current model
    pub fn attach_interaction(&self) -> bool {
        if self.module().is_none() {
            return false;
        }
        let canvas = self.canvas.lock().unwrap_or_else(|e| e.into_inner()).clone();
        match canvas {
            Some(canvas) => {
                self.router.attach(canvas);
                true
            }
            None => {
                tracing::warn!("No canvas to attach pointer listeners to");
                false
            }
        }
    }

    pub fn detach_interaction(&self) {
        self.router.detach();
    }

    pub fn is_interaction_attached(&self) -> bool {
        self.router.is_attached()
    }
}

impl std::fmt::Debug for Live2dManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Live2dManager")
            .field("available", &self.is_available())
            .field("core_loaded", &self.is_core_loaded())
            .field("rendering", &self.is_rendering())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Live2dStageError;
    use crate::live2d::headless::{sample_model_json, HeadlessModule};
    use crate::live2d::interaction::{EventCanvas, PointerEvent, PointerEventKind};
    use crate::live2d::registry::{ModelInfo, SpeakerId};
    use crate::live2d::store::MemoryStore;
    use crate::live2d::MemoryAssetReader;

    fn info(id: &str, dir: &str, json: &str, kind: ModelKind) -> ModelInfo {
        ModelInfo {
            id: SpeakerId::from(id),
            is_usable: false,
            dir_path: dir.to_string(),
            model_json_name: json.to_string(),
            lip_sync_weight: Some(10.0),
            is_old_param_name: None,
            default_expression: None,
            kind,
        }
    }

    fn insert_model(reader: &MemoryAssetReader, dir: &str, name: &str, delay: Option<Duration>) {
        let json = sample_model_json(name, &["Smile", "Angry"], &["idle_01.motion3.json"]);
        let json_path = format!("{}{}.model3.json", dir, name);
        match delay {
            Some(delay) => reader.insert_delayed(&json_path, json, delay),
            None => reader.insert(&json_path, json),
        }
        reader.insert(&format!("{}{}.moc3", dir, name), b"moc".to_vec());
    }

    struct Fixture {
        module: Arc<HeadlessModule>,
        store: Arc<MemoryStore>,
        reader: Arc<MemoryAssetReader>,
        canvas: Arc<EventCanvas>,
        manager: Live2dManager,
    }

    fn fixture(module: HeadlessModule, entries: Vec<(&str, ModelInfo)>) -> Fixture {
        let module = Arc::new(module);
        let store = Arc::new(MemoryStore::new(
            entries
                .into_iter()
                .map(|(name, info)| (name.to_string(), info))
                .collect(),
        ));
        let reader = Arc::new(MemoryAssetReader::new());
        let settings = ManagerSettings {
            frame_interval: Duration::from_millis(10),
            gesture_seed: Some(3),
            ..ManagerSettings::default()
        };
        let module_dyn: Arc<dyn Live2dModule> = module.clone();
        let manager = Live2dManager::new(Some(module_dyn), store.clone(), reader.clone(), settings);

        Fixture {
            module,
            store,
            reader,
            canvas: Arc::new(EventCanvas::new(800, 800)),
            manager,
        }
    }

    fn ab_fixture(module: HeadlessModule) -> Fixture {
        fixture(
            module,
            vec![
                ("A", info("a", "/a/", "a.model3.json", ModelKind::Standard)),
                ("B", info("b", "/b/", "b.model3.json", ModelKind::Standard)),
            ],
        )
    }

    fn initialized(fx: &Fixture) {
        assert!(fx.manager.initialize_viewer(fx.canvas.clone(), 800, 800));
    }

    #[tokio::test]
    async fn test_model_loads_and_setup_follows_native_flag() {
        let fx = ab_fixture(HeadlessModule::with_deferred_setup());
        initialized(&fx);
        insert_model(&fx.reader, "/a/", "a", None);

        assert!(fx.manager.load_model("A").await.unwrap());
        assert!(fx.manager.is_model_present("a"));
        assert!(!fx.manager.is_model_setup_complete("a"));

        fx.module.model_probe("/a/a.model3.json").unwrap().complete_setup();
        assert!(fx.manager.is_model_setup_complete("a"));

        let stored = fx.store.model_info("A").unwrap();
        assert!(stored.is_usable);
        assert_eq!(
            fx.module.model_probe("/a/a.model3.json").unwrap().lip_sync_weight(),
            10.0
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_interleaved_loads_all_end_present() {
        let fx = fixture(
            HeadlessModule::new(),
            vec![
                ("A", info("a", "/a/", "a.model3.json", ModelKind::Standard)),
                ("B", info("b", "/b/", "b.model3.json", ModelKind::Standard)),
                ("C", info("c", "/c/", "c.model3.json", ModelKind::MotionSync)),
            ],
        );
        initialized(&fx);
        insert_model(&fx.reader, "/a/", "a", Some(Duration::from_millis(300)));
        insert_model(&fx.reader, "/b/", "b", Some(Duration::from_millis(100)));
        insert_model(&fx.reader, "/c/", "c", Some(Duration::from_millis(200)));

        let (a, b, c) = tokio::join!(
            fx.manager.load_model("A"),
            fx.manager.load_model("B"),
            fx.manager.load_motion_sync_model("C"),
        );
        assert!(a.unwrap() && b.unwrap() && c.unwrap());
        for key in ["a", "b", "c"] {
            assert!(fx.manager.is_model_present(key), "{} missing", key);
        }
    }

    #[tokio::test]
    async fn test_failed_load_leaves_model_absent() {
        let fx = ab_fixture(HeadlessModule::new());
        initialized(&fx);
        insert_model(&fx.reader, "/a/", "a", None);

        let (a, b) = tokio::join!(fx.manager.load_model("A"), fx.manager.load_model("B"));
        assert!(a.unwrap());
        assert!(matches!(
            b,
            Err(Live2dStageError::Model(ModelError::LoadFailed { ref name, .. })) if name == "B"
        ));

        assert!(fx.manager.is_model_present("a"));
        assert!(!fx.manager.is_model_present("b"));
        assert!(!fx.store.model_info("B").unwrap().is_usable);
        assert!(fx.module.model_probe("/b/b.model3.json").unwrap().is_released());
    }

    #[tokio::test]
    async fn test_load_all_models_settles_with_partial_failure() {
        let fx = ab_fixture(HeadlessModule::new());
        initialized(&fx);
        insert_model(&fx.reader, "/a/", "a", None);
        let mut events = fx.store.subscribe();

        let batch = fx.manager.load_all_models();
        assert_eq!(batch.len(), 2);
        assert!(fx.store.is_initialized());

        let summary = batch.settled().await;
        assert_eq!(summary.loaded, vec!["A"]);
        assert_eq!(summary.failed.len(), 1);
        assert_eq!(summary.failed[0].0, "B");
        assert!(!summary.is_all_loaded());

        assert!(fx.manager.is_model_present("a"));
        assert!(!fx.manager.is_model_present("b"));
        assert!(events.try_recv().is_ok());
    }

    #[tokio::test]
    async fn test_load_all_models_selects_default() {
        let module = Arc::new(HeadlessModule::new());
        let store = Arc::new(MemoryStore::new(vec![(
            "A".to_string(),
            info("a", "/a/", "a.model3.json", ModelKind::Standard),
        )]));
        let reader = Arc::new(MemoryAssetReader::new());
        insert_model(&reader, "/a/", "a", None);
        let settings = ManagerSettings {
            default_model: Some("A".to_string()),
            ..ManagerSettings::default()
        };
        let module_dyn: Arc<dyn Live2dModule> = module.clone();
        let manager = Live2dManager::new(Some(module_dyn), store.clone(), reader, settings);
        assert!(manager.initialize_viewer(Arc::new(EventCanvas::new(10, 10)), 10, 10));

        let summary = manager.load_all_models().settled().await;
        assert!(summary.is_all_loaded());
        assert_eq!(manager.current_model_key().as_deref(), Some("a"));
        assert_eq!(store.latest_character_key(), "a");
    }

    #[tokio::test]
    async fn test_load_applies_default_expression_and_legacy_names() {
        let mut usagi = info("u", "/u/", "u.model3.json", ModelKind::Standard);
        usagi.default_expression = Some("Inaba".to_string());
        usagi.is_old_param_name = Some(true);
        let fx = fixture(
            HeadlessModule::new(),
            vec![
                ("U", usagi),
                ("A", info("a", "/a/", "a.model3.json", ModelKind::Standard)),
            ],
        );
        initialized(&fx);
        insert_model(&fx.reader, "/u/", "u", None);
        insert_model(&fx.reader, "/a/", "a", None);

        assert!(fx.manager.load_model("U").await.unwrap());
        assert!(fx.manager.load_model("A").await.unwrap());

        let usagi = fx.module.model_probe("/u/u.model3.json").unwrap();
        assert_eq!(usagi.expression().as_deref(), Some("Inaba"));
        assert!(usagi.uses_legacy_param_names());

        let plain = fx.module.model_probe("/a/a.model3.json").unwrap();
        assert_eq!(plain.expression(), None);
        assert!(!plain.uses_legacy_param_names());
    }

    #[tokio::test(start_paused = true)]
    async fn test_load_spanning_viewer_replacement_is_discarded() {
        let fx = ab_fixture(HeadlessModule::new());
        initialized(&fx);
        insert_model(&fx.reader, "/a/", "a", Some(Duration::from_millis(100)));

        let (result, _) = tokio::join!(fx.manager.load_model("A"), async {
            tokio::time::sleep(Duration::from_millis(50)).await;
            fx.manager.release_viewer();
            initialized(&fx);
        });

        assert!(matches!(
            result,
            Err(Live2dStageError::Model(ModelError::ViewerNotInitialized))
        ));
        assert!(!fx.manager.is_model_present("a"));
        assert!(fx.module.model_probe("/a/a.model3.json").unwrap().is_released());
        assert!(!fx.store.model_info("A").unwrap().is_usable);

        // Loads against the replacement viewer still register
        insert_model(&fx.reader, "/a/", "a", None);
        assert!(fx.manager.load_model("A").await.unwrap());
        assert!(fx.manager.is_model_present("a"));
    }

    #[test]
    fn test_failed_viewer_initialize_releases_viewer() {
        let module = Arc::new(HeadlessModule::new());
        let store = Arc::new(MemoryStore::new(Vec::new()));
        let settings = ManagerSettings {
            memory_budget: 0,
            ..ManagerSettings::default()
        };
        let module_dyn: Arc<dyn Live2dModule> = module.clone();
        let manager = Live2dManager::new(
            Some(module_dyn),
            store.clone(),
            Arc::new(MemoryAssetReader::new()),
            settings,
        );

        assert!(!manager.initialize_viewer(Arc::new(EventCanvas::new(10, 10)), 10, 10));
        assert!(module.viewer_probe().unwrap().is_released());
        assert!(!manager.is_core_loaded());
        assert!(!store.is_core_loaded());
    }

    #[tokio::test]
    async fn test_unknown_key_has_no_side_effects() {
        let fx = ab_fixture(HeadlessModule::new());
        initialized(&fx);
        let mut events = fx.store.subscribe();

        let result = fx.manager.load_model("Z").await;
        assert!(matches!(
            result,
            Err(Live2dStageError::Model(ModelError::UnknownModel(_)))
        ));
        assert!(events.try_recv().is_err());
        assert!(fx.module.model_probe("/z/z.model3.json").is_none());
    }

    #[tokio::test]
    async fn test_load_before_viewer_fails() {
        let fx = ab_fixture(HeadlessModule::new());
        let result = fx.manager.load_model("A").await;
        assert!(matches!(
            result,
            Err(Live2dStageError::Model(ModelError::ViewerNotInitialized))
        ));
        assert!(fx.manager.load_all_models().is_empty());
    }

    #[tokio::test]
    async fn test_expression_ids_are_prefixed() {
        let fx = ab_fixture(HeadlessModule::new());
        initialized(&fx);
        insert_model(&fx.reader, "/a/", "a", None);
        fx.manager.load_model("A").await.unwrap();

        assert_eq!(fx.manager.expression_ids("a"), vec!["None", "Smile", "Angry"]);
        assert_eq!(fx.manager.expression_ids("b"), vec!["None"]);
        assert_eq!(fx.manager.motion_names("a"), vec!["idle_01.motion3.json"]);
        assert!(fx.manager.motion_names("b").is_empty());
    }

    #[tokio::test]
    async fn test_lip_sync_dispatch_by_kind() {
        let fx = fixture(
            HeadlessModule::new(),
            vec![
                ("A", info("a", "/a/", "a.model3.json", ModelKind::Standard)),
                ("C", info("c", "/c/", "c.model3.json", ModelKind::MotionSync)),
            ],
        );
        initialized(&fx);

        // No current model yet
        fx.manager.start_lip_sync(b"RIFF");
        fx.manager.stop_lip_sync();

        insert_model(&fx.reader, "/a/", "a", None);
        insert_model(&fx.reader, "/c/", "c", None);
        fx.manager.load_all_models().settled().await;

        let a = fx.module.model_probe("/a/a.model3.json").unwrap();
        let c = fx.module.model_probe("/c/c.model3.json").unwrap();

        fx.manager.set_current_model("a");
        fx.manager.start_lip_sync(b"RIFF");
        assert!(a.is_lip_sync_active());
        assert!(!c.is_motion_sync_active());
        fx.manager.stop_lip_sync();
        assert!(!a.is_lip_sync_active());

        fx.manager.set_current_model("c");
        assert_eq!(fx.store.latest_character_key(), "c");
        fx.manager.start_lip_sync(b"RIFF");
        assert!(c.is_motion_sync_active());
        assert!(!c.is_lip_sync_active());
        fx.manager.stop_lip_sync();
        assert!(!c.is_motion_sync_active());
    }

    #[tokio::test]
    async fn test_lip_sync_with_unloaded_current_model_is_noop() {
        let fx = ab_fixture(HeadlessModule::new());
        initialized(&fx);
        fx.manager.set_current_model("missing");
        fx.manager.start_lip_sync(b"RIFF");
        fx.manager.stop_lip_sync();
        assert!(!fx.manager.is_model_present("missing"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_release_viewer_stops_drawing() {
        let fx = ab_fixture(HeadlessModule::new());
        initialized(&fx);
        insert_model(&fx.reader, "/a/", "a", None);
        fx.manager.load_model("A").await.unwrap();
        fx.manager.set_current_model("a");

        assert!(fx.manager.start_render());
        tokio::time::sleep(Duration::from_millis(35)).await;
        let model = fx.module.model_probe("/a/a.model3.json").unwrap();
        assert!(model.draws() > 0);

        fx.manager.release_viewer();
        assert!(!fx.manager.is_rendering());
        assert!(!fx.store.is_initialized());
        assert!(model.is_released());
        assert!(fx.module.viewer_probe().unwrap().is_released());

        let draws = model.draws();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(model.draws(), draws);
        assert!(!fx.manager.is_model_present("a"));
        assert!(!fx.manager.start_render());
    }

    #[tokio::test]
    async fn test_release_model_and_all_models() {
        let fx = ab_fixture(HeadlessModule::new());
        initialized(&fx);
        insert_model(&fx.reader, "/a/", "a", None);
        insert_model(&fx.reader, "/b/", "b", None);
        fx.manager.load_all_models().settled().await;

        assert!(fx.manager.release_model("a"));
        assert!(!fx.manager.release_model("a"));
        assert!(!fx.manager.is_model_present("a"));

        fx.manager.start_render();
        fx.manager.release_all_models();
        assert!(!fx.manager.is_rendering());
        assert!(!fx.manager.is_model_present("b"));
        assert!(fx.module.model_probe("/b/b.model3.json").unwrap().is_released());
    }

    #[tokio::test]
    async fn test_interaction_attach_and_detach() {
        let fx = ab_fixture(HeadlessModule::new());
        initialized(&fx);

        assert!(fx.manager.attach_interaction());
        fx.canvas
            .dispatch(PointerEvent::new(PointerEventKind::Down, 1.0, 1.0));
        let viewer_probe = fx.module.viewer_probe().unwrap();
        assert_eq!(viewer_probe.touches_began(), 1);

        fx.manager.detach_interaction();
        fx.canvas
            .dispatch(PointerEvent::new(PointerEventKind::Down, 1.0, 1.0));
        assert_eq!(viewer_probe.touches_began(), 1);
        assert!(!fx.manager.is_interaction_attached());
    }

    #[test]
    fn test_attach_without_viewer() {
        let fx = ab_fixture(HeadlessModule::new());
        assert!(!fx.manager.attach_interaction());
    }

    #[test]
    fn test_initialize_viewer_flags() {
        let fx = ab_fixture(HeadlessModule::new());
        assert!(fx.manager.with_viewer(|_| ()).is_none());
        initialized(&fx);

        assert!(fx.manager.is_core_loaded());
        assert!(fx.store.is_core_loaded());
        assert_eq!(
            fx.module.viewer_probe().unwrap().memory_budget(),
            32 * 1024 * 1024
        );

        fx.manager.resize_viewer(640, 480);
        assert_eq!(
            fx.manager.with_viewer(|viewer| viewer.canvas_size()),
            Some((640, 480))
        );
    }

    #[test]
    fn test_viewer_construction_failure() {
        let fx = ab_fixture(HeadlessModule::failing_viewer());
        assert!(!fx.manager.initialize_viewer(fx.canvas.clone(), 800, 800));
        assert!(!fx.manager.is_core_loaded());
        assert!(!fx.store.is_core_loaded());
        assert!(!fx.manager.is_model_present("a"));
        assert!(fx.manager.expression_ids("a").is_empty());
    }

    #[tokio::test]
    async fn test_unavailable_module_degrades() {
        let store = Arc::new(MemoryStore::new(vec![(
            "A".to_string(),
            info("a", "/a/", "a.model3.json", ModelKind::Standard),
        )]));
        let reader = Arc::new(MemoryAssetReader::new());
        insert_model(&reader, "/a/", "a", None);
        let manager = Live2dManager::new(None, store.clone(), reader, ManagerSettings::default());
        let canvas = Arc::new(EventCanvas::new(10, 10));

        assert!(!manager.is_available());
        assert!(!manager.initialize_viewer(canvas, 10, 10));
        assert!(!manager.load_model("A").await.unwrap());
        assert!(!manager.load_motion_sync_model("A").await.unwrap());
        assert!(manager.load_all_models().is_empty());
        assert!(!manager.is_model_present("a"));
        assert!(!manager.is_model_setup_complete("a"));
        assert!(manager.motion_names("a").is_empty());
        assert!(manager.expression_ids("a").is_empty());
        assert!(!manager.release_model("a"));
        assert!(!manager.start_render());
        assert!(!manager.attach_interaction());
        manager.set_current_model("a");
        manager.start_lip_sync(b"RIFF");
        manager.stop_lip_sync();
        manager.resize_viewer(1, 1);
        manager.release_all_models();
        manager.release_viewer();

        assert!(!store.is_core_loaded());
        assert!(!store.is_initialized());
        assert_eq!(store.latest_character_key(), "");
    }

    #[test]
    fn test_settings_from_config() {
        let config = Live2dConfig::default();
        let settings = ManagerSettings::from_config(&config);
        assert_eq!(settings.memory_budget, 32 * 1024 * 1024);
        assert_eq!(settings.default_model.as_deref(), Some("四国めたん"));
    }
}
