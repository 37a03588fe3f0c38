//! Render loop driving the viewer at a fixed frame cadence

use std::sync::Mutex;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use super::native::{BlendFactor, Capability, ClearMask, DepthFunc, Viewer};
use super::scene::SceneFn;
use super::{lock_viewer, SharedViewer};

/// Default cadence, about 60 frames per second
pub const DEFAULT_FRAME_INTERVAL: Duration = Duration::from_micros(16_667);

/// A single rescheduling frame task; IDLE when no task is held
#[derive(Debug)]
pub struct RenderLoop {
    frame_interval: Duration,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl Default for RenderLoop {
    fn default() -> Self {
        Self::new(DEFAULT_FRAME_INTERVAL)
    }
}

impl RenderLoop {
    pub fn new(frame_interval: Duration) -> Self {
        Self {
            frame_interval,
            task: Mutex::new(None),
        }
    }

    /// Start ticking `viewer`, restarting if already running.
    ///
    /// Returns false when called outside a tokio runtime.
    pub fn start(&self, viewer: SharedViewer, scene: SceneFn) -> bool {
        let Ok(runtime) = Handle::try_current() else {
            tracing::error!("Cannot start render loop outside an async runtime");
            return false;
        };

        let mut task = self.task.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(previous) = task.take() {
            tracing::debug!("Render loop already running, restarting");
            previous.abort();
        }

        let frame_interval = self.frame_interval;
        *task = Some(runtime.spawn(async move {
            let mut ticker = tokio::time::interval(frame_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                ticker.tick().await;
                if !tick(&viewer, scene) {
                    tracing::info!("Graphics context gone, render loop stopped");
                    break;
                }
            }
        }));

        tracing::info!("Render loop started ({:?} per frame)", frame_interval);
        true
    }

    /// Stop the loop; a no-op while idle
    pub fn cancel(&self) {
        if let Some(task) = self.task.lock().unwrap_or_else(|e| e.into_inner()).take() {
            task.abort();
            tracing::info!("Render loop cancelled");
        }
    }

    /// A frame task is scheduled and has not stopped on its own
    pub fn is_running(&self) -> bool {
        self.task
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
            .is_some_and(|task| !task.is_finished())
    }
}

impl Drop for RenderLoop {
    fn drop(&mut self) {
        self.cancel();
    }
}

/// Run one frame against the shared viewer slot.
///
/// Returns false (and draws nothing) once the viewer or its graphics context
/// is gone.
pub fn tick(viewer: &SharedViewer, scene: SceneFn) -> bool {
    let mut guard = lock_viewer(viewer);
    match guard.as_mut() {
        Some(viewer) => render_frame(viewer.as_mut(), scene),
        None => false,
    }
}

/// Prepare the graphics state for a frame, then hand the viewer to `scene`
pub fn render_frame(viewer: &mut dyn Viewer, scene: SceneFn) -> bool {
    if viewer.gl().is_none() {
        return false;
    }

    viewer.update_time();
    let program = viewer.program_id();

    let Some(gl) = viewer.gl() else {
        return false;
    };
    gl.clear_color(0.0, 0.0, 0.0, 0.0);
    gl.enable(Capability::DepthTest);
    gl.depth_func(DepthFunc::LessOrEqual);
    gl.clear(ClearMask::COLOR_AND_DEPTH);
    gl.clear_depth(1.0);

    gl.enable(Capability::Blend);
    gl.blend_func(BlendFactor::SrcAlpha, BlendFactor::OneMinusSrcAlpha);

    if let Some(program) = program {
        gl.use_program(program);
    }
    gl.flush();

    scene(viewer);
    true
}
