//! Software implementation of the native Live2D surface
//!
//! Reads `*.model3.json` settings and the files they reference through the
//! asset reader, but renders nothing. Every call is counted on shared probes so
//! hosts without a GPU (and the tests) can observe what the manager drove.

use futures::future::BoxFuture;
use glam::Mat4;
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use super::asset::AssetReader;
use super::interaction::Canvas;
use super::native::{
    BlendFactor, Capability, ClearMask, DepthFunc, EyeOpenParams, FrameBufferId,
    GraphicsContext, Live2dModule, Model, ModelDescriptor, ModelInstance, MotionSyncModel,
    ProgramId, Viewer, Viewport,
};
use super::registry::ModelKind;
use crate::error::NativeError;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ModelSettings {
    file_references: FileReferences,
    #[serde(default)]
    layout: Option<Layout>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct FileReferences {
    moc: String,
    #[serde(default)]
    textures: Vec<String>,
    #[serde(default)]
    expressions: Vec<ExpressionRef>,
    #[serde(default)]
    motions: BTreeMap<String, Vec<MotionRef>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ExpressionRef {
    name: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct MotionRef {
    file: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct Layout {
    #[serde(default)]
    width: Option<f32>,
}

fn bump(counter: &AtomicUsize) {
    counter.fetch_add(1, Ordering::Relaxed);
}

/// Observable counters for the headless viewer
#[derive(Debug, Default)]
pub struct ViewerProbe {
    frames: AtomicUsize,
    clears: AtomicUsize,
    flushes: AtomicUsize,
    programs_bound: AtomicUsize,
    blend_configured: AtomicBool,
    touches_began: AtomicUsize,
    touches_moved: AtomicUsize,
    touches_ended: AtomicUsize,
    context_lost: AtomicBool,
    released: AtomicBool,
    memory_budget: AtomicUsize,
}

impl ViewerProbe {
    /// Clock advances (one per render tick)
    pub fn frames(&self) -> usize {
        self.frames.load(Ordering::Relaxed)
    }

    pub fn clears(&self) -> usize {
        self.clears.load(Ordering::Relaxed)
    }

    pub fn flushes(&self) -> usize {
        self.flushes.load(Ordering::Relaxed)
    }

    pub fn programs_bound(&self) -> usize {
        self.programs_bound.load(Ordering::Relaxed)
    }

    pub fn blend_configured(&self) -> bool {
        self.blend_configured.load(Ordering::Relaxed)
    }

    pub fn touches_began(&self) -> usize {
        self.touches_began.load(Ordering::Relaxed)
    }

    pub fn touches_moved(&self) -> usize {
        self.touches_moved.load(Ordering::Relaxed)
    }

    pub fn touches_ended(&self) -> usize {
        self.touches_ended.load(Ordering::Relaxed)
    }

    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::Relaxed)
    }

    pub fn memory_budget(&self) -> usize {
        self.memory_budget.load(Ordering::Relaxed)
    }

    /// Simulate losing the graphics context
    pub fn lose_context(&self) {
        self.context_lost.store(true, Ordering::Relaxed);
    }
}

/// Observable state of one headless model
#[derive(Debug, Default)]
pub struct ModelProbe {
    loaded: AtomicBool,
    setup_complete: AtomicBool,
    legacy_param_names: AtomicBool,
    updates: AtomicUsize,
    draws: AtomicUsize,
    lip_sync_weight: AtomicU32,
    expression: Mutex<Option<String>>,
    model_width: Mutex<Option<f32>>,
    last_projection: Mutex<Option<Mat4>>,
    lip_sync_active: AtomicBool,
    motion_sync_active: AtomicBool,
    eyes_closed: AtomicBool,
    eyelid_closes: AtomicUsize,
    eyelid_opens: AtomicUsize,
    eye_hold_active: AtomicBool,
    eye_holds: AtomicUsize,
    eye_hold_stops: AtomicUsize,
    released: AtomicBool,
}

impl ModelProbe {
    /// Finish the deferred setup, making the model drawable
    pub fn complete_setup(&self) {
        self.setup_complete.store(true, Ordering::Relaxed);
    }

    pub fn is_loaded(&self) -> bool {
        self.loaded.load(Ordering::Relaxed)
    }

    pub fn is_setup_complete(&self) -> bool {
        self.setup_complete.load(Ordering::Relaxed)
    }

    pub fn uses_legacy_param_names(&self) -> bool {
        self.legacy_param_names.load(Ordering::Relaxed)
    }

    pub fn updates(&self) -> usize {
        self.updates.load(Ordering::Relaxed)
    }

    pub fn draws(&self) -> usize {
        self.draws.load(Ordering::Relaxed)
    }

    pub fn lip_sync_weight(&self) -> f32 {
        f32::from_bits(self.lip_sync_weight.load(Ordering::Relaxed))
    }

    pub fn expression(&self) -> Option<String> {
        self.expression.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn model_width(&self) -> Option<f32> {
        *self.model_width.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn last_projection(&self) -> Option<Mat4> {
        *self.last_projection.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn is_lip_sync_active(&self) -> bool {
        self.lip_sync_active.load(Ordering::Relaxed)
    }

    pub fn is_motion_sync_active(&self) -> bool {
        self.motion_sync_active.load(Ordering::Relaxed)
    }

    pub fn eyes_closed(&self) -> bool {
        self.eyes_closed.load(Ordering::Relaxed)
    }

    pub fn eyelid_closes(&self) -> usize {
        self.eyelid_closes.load(Ordering::Relaxed)
    }

    pub fn eyelid_opens(&self) -> usize {
        self.eyelid_opens.load(Ordering::Relaxed)
    }

    pub fn eye_hold_active(&self) -> bool {
        self.eye_hold_active.load(Ordering::Relaxed)
    }

    pub fn eye_holds(&self) -> usize {
        self.eye_holds.load(Ordering::Relaxed)
    }

    pub fn eye_hold_stops(&self) -> usize {
        self.eye_hold_stops.load(Ordering::Relaxed)
    }

    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::Relaxed)
    }
}

/// Headless native module
#[derive(Debug, Default)]
pub struct HeadlessModule {
    deferred_setup: bool,
    fail_viewer: bool,
    viewer_probe: Mutex<Option<Arc<ViewerProbe>>>,
    model_probes: Mutex<HashMap<String, Arc<ModelProbe>>>,
}

impl HeadlessModule {
    /// Models become drawable as soon as their assets are loaded
    pub fn new() -> Self {
        Self::default()
    }

    /// Models stay not-setup until [`ModelProbe::complete_setup`] is called
    pub fn with_deferred_setup() -> Self {
        Self {
            deferred_setup: true,
            ..Self::default()
        }
    }

    /// Viewer construction always fails
    pub fn failing_viewer() -> Self {
        Self {
            fail_viewer: true,
            ..Self::default()
        }
    }

    /// Probe of the most recently created viewer
    pub fn viewer_probe(&self) -> Option<Arc<ViewerProbe>> {
        self.viewer_probe
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Probe of the model created for `model_json_path` (dir path + json name)
    pub fn model_probe(&self, model_json_path: &str) -> Option<Arc<ModelProbe>> {
        self.model_probes
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(model_json_path)
            .cloned()
    }
}

impl Live2dModule for HeadlessModule {
    fn create_viewer(
        &self,
        canvas: Arc<dyn Canvas>,
        width: u32,
        height: u32,
    ) -> Result<Box<dyn Viewer>, NativeError> {
        if self.fail_viewer {
            return Err(NativeError::ViewerConstruction(
                "headless viewer construction disabled".to_string(),
            ));
        }

        let probe = Arc::new(ViewerProbe::default());
        *self.viewer_probe.lock().unwrap_or_else(|e| e.into_inner()) = Some(Arc::clone(&probe));

        Ok(Box::new(HeadlessViewer {
            canvas,
            size: (width, height),
            gl: None,
            program: None,
            models: HashMap::new(),
            current: None,
            probe,
        }))
    }

    fn create_model(
        &self,
        kind: ModelKind,
        descriptor: ModelDescriptor,
        _viewer: &dyn Viewer,
        reader: Arc<dyn AssetReader>,
    ) -> ModelInstance {
        let probe = Arc::new(ModelProbe::default());
        probe
            .legacy_param_names
            .store(descriptor.legacy_param_names, Ordering::Relaxed);
        self.model_probes
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(
                format!("{}{}", descriptor.dir_path, descriptor.model_json_name),
                Arc::clone(&probe),
            );

        let model = HeadlessModel {
            descriptor,
            reader,
            probe,
            auto_setup: !self.deferred_setup,
            expressions: Vec::new(),
            motions: Vec::new(),
            has_mesh: false,
            canvas_width: 1.0,
        };

        match kind {
            ModelKind::Standard => ModelInstance::Standard(Box::new(model)),
            ModelKind::MotionSync => ModelInstance::MotionSync(Box::new(model)),
        }
    }
}

struct RecordingGl {
    probe: Arc<ViewerProbe>,
}

impl GraphicsContext for RecordingGl {
    fn clear_color(&mut self, _r: f32, _g: f32, _b: f32, _a: f32) {}

    fn enable(&mut self, capability: Capability) {
        if capability == Capability::Blend {
            self.probe.blend_configured.store(true, Ordering::Relaxed);
        }
    }

    fn depth_func(&mut self, _func: DepthFunc) {}

    fn clear(&mut self, mask: ClearMask) {
        if mask.color {
            bump(&self.probe.clears);
        }
    }

    fn clear_depth(&mut self, _depth: f32) {}

    fn blend_func(&mut self, _src: BlendFactor, _dst: BlendFactor) {}

    fn use_program(&mut self, _program: ProgramId) {
        bump(&self.probe.programs_bound);
    }

    fn flush(&mut self) {
        bump(&self.probe.flushes);
    }
}

struct HeadlessViewer {
    canvas: Arc<dyn Canvas>,
    size: (u32, u32),
    gl: Option<RecordingGl>,
    program: Option<ProgramId>,
    models: HashMap<String, ModelInstance>,
    current: Option<String>,
    probe: Arc<ViewerProbe>,
}

impl Viewer for HeadlessViewer {
    fn initialize(&mut self, memory_budget: usize) -> Result<(), NativeError> {
        if memory_budget == 0 {
            return Err(NativeError::Initialize("memory budget is zero".to_string()));
        }
        self.probe
            .memory_budget
            .store(memory_budget, Ordering::Relaxed);
        self.gl = Some(RecordingGl {
            probe: Arc::clone(&self.probe),
        });
        self.program = Some(ProgramId(1));
        tracing::debug!(
            "Headless viewer initialized ({}x{}, canvas {:?})",
            self.size.0,
            self.size.1,
            self.canvas.size()
        );
        Ok(())
    }

    fn resize(&mut self, width: u32, height: u32) {
        self.size = (width, height);
    }

    fn canvas_size(&self) -> (u32, u32) {
        self.size
    }

    fn gl(&mut self) -> Option<&mut dyn GraphicsContext> {
        if self.probe.context_lost.load(Ordering::Relaxed) {
            return None;
        }
        self.gl.as_mut().map(|gl| gl as &mut dyn GraphicsContext)
    }

    fn program_id(&self) -> Option<ProgramId> {
        self.program
    }

    fn frame_buffer(&self) -> Option<FrameBufferId> {
        None
    }

    fn view_matrix(&self) -> Mat4 {
        Mat4::IDENTITY
    }

    fn update_time(&mut self) {
        bump(&self.probe.frames);
    }

    fn add_model(&mut self, key: &str, model: ModelInstance) {
        if let Some(mut previous) = self.models.insert(key.to_string(), model) {
            previous.model_mut().release();
        }
    }

    fn model(&self, key: &str) -> Option<&ModelInstance> {
        self.models.get(key)
    }

    fn model_mut(&mut self, key: &str) -> Option<&mut ModelInstance> {
        self.models.get_mut(key)
    }

    fn current_model_key(&self) -> Option<String> {
        self.current.clone()
    }

    fn set_current_model(&mut self, key: &str) {
        self.current = Some(key.to_string());
    }

    fn release_model(&mut self, key: &str) -> bool {
        match self.models.remove(key) {
            Some(mut model) => {
                model.model_mut().release();
                true
            }
            None => false,
        }
    }

    fn release_all_models(&mut self) {
        for (_, mut model) in self.models.drain() {
            model.model_mut().release();
        }
    }

    fn release(&mut self) {
        self.release_all_models();
        self.gl = None;
        self.program = None;
        self.current = None;
        self.probe.released.store(true, Ordering::Relaxed);
    }

    fn on_touches_began(&mut self, _x: f32, _y: f32) {
        bump(&self.probe.touches_began);
    }

    fn on_touches_moved(&mut self, _x: f32, _y: f32) {
        bump(&self.probe.touches_moved);
    }

    fn on_touches_ended(&mut self) {
        bump(&self.probe.touches_ended);
    }
}

struct HeadlessModel {
    descriptor: ModelDescriptor,
    reader: Arc<dyn AssetReader>,
    probe: Arc<ModelProbe>,
    auto_setup: bool,
    expressions: Vec<String>,
    motions: Vec<String>,
    has_mesh: bool,
    canvas_width: f32,
}

impl HeadlessModel {
    async fn read_required(&self, file: &str) -> Result<Vec<u8>, NativeError> {
        let path = format!("{}{}", self.descriptor.dir_path, file);
        let bytes = self.reader.read(&path).await;
        if bytes.is_empty() {
            return Err(NativeError::AssetLoad(format!("{} is empty or missing", path)));
        }
        Ok(bytes)
    }

    async fn load(&mut self) -> Result<(), NativeError> {
        let json = self.read_required(&self.descriptor.model_json_name).await?;
        let settings: ModelSettings = serde_json::from_slice(&json).map_err(|e| {
            NativeError::AssetLoad(format!("{}: {}", self.descriptor.model_json_name, e))
        })?;

        let refs = settings.file_references;
        self.read_required(&refs.moc).await?;
        for texture in &refs.textures {
            self.read_required(texture).await?;
        }

        self.expressions = refs.expressions.into_iter().map(|e| e.name).collect();
        self.motions = refs
            .motions
            .into_values()
            .flatten()
            .map(|m| m.file)
            .collect();
        self.canvas_width = settings.layout.and_then(|l| l.width).unwrap_or(1.0);
        self.has_mesh = true;

        self.probe.loaded.store(true, Ordering::Relaxed);
        if self.auto_setup {
            self.probe.complete_setup();
        }
        Ok(())
    }
}

impl Model for HeadlessModel {
    fn load_assets(&mut self) -> BoxFuture<'_, Result<(), NativeError>> {
        Box::pin(self.load())
    }

    fn set_lip_sync_weight(&mut self, weight: f32) {
        self.probe
            .lip_sync_weight
            .store(weight.to_bits(), Ordering::Relaxed);
    }

    fn set_expression(&mut self, expression_id: &str) {
        *self.probe.expression.lock().unwrap_or_else(|e| e.into_inner()) =
            Some(expression_id.to_string());
    }

    fn motion_file_names(&self) -> Vec<String> {
        self.motions.clone()
    }

    fn expression_ids(&self) -> Vec<String> {
        self.expressions.clone()
    }

    fn is_complete_setup(&self) -> bool {
        self.probe.is_setup_complete()
    }

    fn has_mesh(&self) -> bool {
        self.has_mesh
    }

    fn canvas_width(&self) -> f32 {
        self.canvas_width
    }

    fn set_model_width(&mut self, width: f32) {
        *self.probe.model_width.lock().unwrap_or_else(|e| e.into_inner()) = Some(width);
    }

    fn update(&mut self) {
        bump(&self.probe.updates);
    }

    fn draw(&mut self, projection: &Mat4, _viewport: Viewport, _frame_buffer: Option<FrameBufferId>) {
        *self
            .probe
            .last_projection
            .lock()
            .unwrap_or_else(|e| e.into_inner()) = Some(*projection);
        bump(&self.probe.draws);
    }

    fn start_lip_sync(&mut self, _wav: &[u8]) {
        self.probe.lip_sync_active.store(true, Ordering::Relaxed);
    }

    fn stop_lip_sync(&mut self) {
        self.probe.lip_sync_active.store(false, Ordering::Relaxed);
    }

    fn close_eyelids(&mut self) {
        self.probe.eyes_closed.store(true, Ordering::Relaxed);
        bump(&self.probe.eyelid_closes);
    }

    fn open_eyelids(&mut self) {
        self.probe.eyes_closed.store(false, Ordering::Relaxed);
        bump(&self.probe.eyelid_opens);
    }

    fn keep_eye_open(&mut self, _params: EyeOpenParams) {
        self.probe.eye_hold_active.store(true, Ordering::Relaxed);
        bump(&self.probe.eye_holds);
    }

    fn stop_keep_eye_value(&mut self) {
        self.probe.eye_hold_active.store(false, Ordering::Relaxed);
        bump(&self.probe.eye_hold_stops);
    }

    fn release(&mut self) {
        self.has_mesh = false;
        self.probe.released.store(true, Ordering::Relaxed);
    }
}

impl MotionSyncModel for HeadlessModel {
    fn start_motion_sync(&mut self, _wav: &[u8]) {
        self.probe.motion_sync_active.store(true, Ordering::Relaxed);
    }

    fn stop_motion_sync(&mut self) {
        self.probe.motion_sync_active.store(false, Ordering::Relaxed);
    }

    fn as_model(&self) -> &dyn Model {
        self
    }

    fn as_model_mut(&mut self) -> &mut dyn Model {
        self
    }
}

/// Minimal model json referencing `name.moc3` plus the given expressions and motions
pub fn sample_model_json(name: &str, expressions: &[&str], motions: &[&str]) -> String {
    let expressions: Vec<_> = expressions
        .iter()
        .map(|e| serde_json::json!({ "Name": e, "File": format!("expressions/{}.exp3.json", e) }))
        .collect();
    let motions: Vec<_> = motions
        .iter()
        .map(|m| serde_json::json!({ "File": m }))
        .collect();

    serde_json::json!({
        "Version": 3,
        "FileReferences": {
            "Moc": format!("{}.moc3", name),
            "Textures": [],
            "Expressions": expressions,
            "Motions": { "Idle": motions },
        },
    })
    .to_string()
}
