//! Surface of the native Live2D rendering module
//!
//! The manager only drives these primitives; shader setup, mesh deformation
//! and model file formats live behind them.

use futures::future::BoxFuture;
use glam::Mat4;
use std::sync::Arc;

use super::asset::AssetReader;
use super::interaction::Canvas;
use super::registry::ModelKind;
use crate::error::NativeError;

/// Shader program handle owned by the viewer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgramId(pub u32);

/// Offscreen frame buffer handle owned by the viewer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameBufferId(pub u32);

/// Pixel rectangle a model is drawn into
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Viewport {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

/// Capabilities toggled at the start of each frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capability {
    DepthTest,
    Blend,
}

/// Depth comparison used for the frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DepthFunc {
    Less,
    LessOrEqual,
}

/// Blend factors the frame setup selects
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlendFactor {
    SrcAlpha,
    OneMinusSrcAlpha,
}

/// Buffers cleared at the start of each frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClearMask {
    pub color: bool,
    pub depth: bool,
}

impl ClearMask {
    pub const COLOR_AND_DEPTH: Self = Self {
        color: true,
        depth: true,
    };
}

/// Graphics context bound to the viewer's canvas
pub trait GraphicsContext: Send {
    fn clear_color(&mut self, r: f32, g: f32, b: f32, a: f32);
    fn enable(&mut self, capability: Capability);
    fn depth_func(&mut self, func: DepthFunc);
    fn clear(&mut self, mask: ClearMask);
    fn clear_depth(&mut self, depth: f32);
    fn blend_func(&mut self, src: BlendFactor, dst: BlendFactor);
    fn use_program(&mut self, program: ProgramId);
    fn flush(&mut self);
}

/// Target eyelid aperture while an eye hold is active
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EyeOpenParams {
    pub left: f32,
    pub right: f32,
}

/// Construction parameters handed to the native model constructors
#[derive(Debug, Clone, PartialEq)]
pub struct ModelDescriptor {
    pub dir_path: String,
    pub model_json_name: String,
    pub legacy_param_names: bool,
}

/// A loaded (or loading) native model
pub trait Model: Send {
    /// Read and parse every asset the model json references
    fn load_assets(&mut self) -> BoxFuture<'_, Result<(), NativeError>>;

    fn set_lip_sync_weight(&mut self, weight: f32);
    fn set_expression(&mut self, expression_id: &str);
    fn motion_file_names(&self) -> Vec<String>;
    fn expression_ids(&self) -> Vec<String>;

    /// Deferred initialization (GPU upload and friends) has finished
    fn is_complete_setup(&self) -> bool;

    /// Whether the native mesh handle exists
    fn has_mesh(&self) -> bool;
    /// Width of the model's own canvas, in model units
    fn canvas_width(&self) -> f32;
    fn set_model_width(&mut self, width: f32);

    fn update(&mut self);
    fn draw(&mut self, projection: &Mat4, viewport: Viewport, frame_buffer: Option<FrameBufferId>);

    fn start_lip_sync(&mut self, wav: &[u8]);
    fn stop_lip_sync(&mut self);

    fn close_eyelids(&mut self);
    fn open_eyelids(&mut self);
    fn keep_eye_open(&mut self, params: EyeOpenParams);
    fn stop_keep_eye_value(&mut self);

    fn release(&mut self);
}

/// A model whose mouth follows decoded audio analysis
pub trait MotionSyncModel: Model {
    fn start_motion_sync(&mut self, wav: &[u8]);
    fn stop_motion_sync(&mut self);

    fn as_model(&self) -> &dyn Model;
    fn as_model_mut(&mut self) -> &mut dyn Model;
}

/// A model handle tagged with the kind that created it
pub enum ModelInstance {
    Standard(Box<dyn Model>),
    MotionSync(Box<dyn MotionSyncModel>),
}

impl ModelInstance {
    pub fn kind(&self) -> ModelKind {
        match self {
            ModelInstance::Standard(_) => ModelKind::Standard,
            ModelInstance::MotionSync(_) => ModelKind::MotionSync,
        }
    }

    pub fn model(&self) -> &dyn Model {
        match self {
            ModelInstance::Standard(m) => m.as_ref(),
            ModelInstance::MotionSync(m) => m.as_model(),
        }
    }

    pub fn model_mut(&mut self) -> &mut dyn Model {
        match self {
            ModelInstance::Standard(m) => m.as_mut(),
            ModelInstance::MotionSync(m) => m.as_model_mut(),
        }
    }

    /// Start audio-driven mouth animation on whichever path the kind uses
    pub fn start_speech(&mut self, wav: &[u8]) {
        match self {
            ModelInstance::Standard(m) => m.start_lip_sync(wav),
            ModelInstance::MotionSync(m) => m.start_motion_sync(wav),
        }
    }

    pub fn stop_speech(&mut self) {
        match self {
            ModelInstance::Standard(m) => m.stop_lip_sync(),
            ModelInstance::MotionSync(m) => m.stop_motion_sync(),
        }
    }
}

impl std::fmt::Debug for ModelInstance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelInstance")
            .field("kind", &self.kind())
            .field("setup_complete", &self.model().is_complete_setup())
            .finish()
    }
}

/// Native renderer bound to one canvas
pub trait Viewer: Send {
    fn initialize(&mut self, memory_budget: usize) -> Result<(), NativeError>;
    fn resize(&mut self, width: u32, height: u32);
    fn canvas_size(&self) -> (u32, u32);

    /// Graphics context, gone once the canvas is lost or the viewer released
    fn gl(&mut self) -> Option<&mut dyn GraphicsContext>;
    fn program_id(&self) -> Option<ProgramId>;
    fn frame_buffer(&self) -> Option<FrameBufferId>;
    fn view_matrix(&self) -> Mat4;
    fn update_time(&mut self);

    fn add_model(&mut self, key: &str, model: ModelInstance);
    fn model(&self, key: &str) -> Option<&ModelInstance>;
    fn model_mut(&mut self, key: &str) -> Option<&mut ModelInstance>;
    fn current_model_key(&self) -> Option<String>;
    fn set_current_model(&mut self, key: &str);

    /// Release one model; false when the key was not registered
    fn release_model(&mut self, key: &str) -> bool;
    fn release_all_models(&mut self);
    fn release(&mut self);

    fn on_touches_began(&mut self, x: f32, y: f32);
    fn on_touches_moved(&mut self, x: f32, y: f32);
    fn on_touches_ended(&mut self);
}

/// Entry point of the native module
pub trait Live2dModule: Send + Sync {
    fn create_viewer(
        &self,
        canvas: Arc<dyn Canvas>,
        width: u32,
        height: u32,
    ) -> Result<Box<dyn Viewer>, NativeError>;

    fn create_model(
        &self,
        kind: ModelKind,
        descriptor: ModelDescriptor,
        viewer: &dyn Viewer,
        reader: Arc<dyn AssetReader>,
    ) -> ModelInstance;
}
