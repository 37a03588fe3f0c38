//! Scene callbacks invoked by the render loop once per frame

use glam::{Mat4, Vec3};

use super::native::{FrameBufferId, Model, Viewer, Viewport};

/// Signature of a per-frame scene callback
pub type SceneFn = fn(&mut dyn Viewer);

/// Projection that keeps a model undistorted on a `width` x `height` canvas.
///
/// Returns the projection and, when the model must be pinned to a fixed
/// width, that width.
pub fn portrait_projection(model_canvas_width: f32, width: u32, height: u32) -> (Mat4, Option<f32>) {
    let (w, h) = (width.max(1) as f32, height.max(1) as f32);

    if model_canvas_width > 1.0 && w < h {
        (Mat4::from_scale(Vec3::new(1.0, w / h, 1.0)), Some(2.0))
    } else {
        (Mat4::from_scale(Vec3::new(h / w, 1.0, 1.0)), None)
    }
}

/// Draw the current model filling the canvas, corrected for its aspect ratio
pub fn portrait(viewer: &mut dyn Viewer) {
    let (width, height) = viewer.canvas_size();
    let view = viewer.view_matrix();
    let frame_buffer = viewer.frame_buffer();

    let Some(key) = viewer.current_model_key() else {
        tracing::error!("No current Live2D model to draw");
        return;
    };
    let Some(instance) = viewer.model_mut(&key) else {
        tracing::error!("Current Live2D model {} is not loaded", key);
        return;
    };

    let model = instance.model_mut();
    if !model.is_complete_setup() || !model.has_mesh() {
        return;
    }

    draw(model, view, width, height, frame_buffer);
}

fn draw(
    model: &mut dyn Model,
    view: Mat4,
    width: u32,
    height: u32,
    frame_buffer: Option<FrameBufferId>,
) {
    let (projection, model_width) = portrait_projection(model.canvas_width(), width, height);
    if let Some(model_width) = model_width {
        model.set_model_width(model_width);
    }

    let viewport = Viewport {
        x: 0,
        y: 0,
        width,
        height,
    };
    model.update();
    model.draw(&(projection * view), viewport, frame_buffer);
}
