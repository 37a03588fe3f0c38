//! Pointer interaction routed from the host canvas to the active model
//!
//! Pointer-down begins a touch, pointer-up/leave ends it, and pointer-move is
//! forwarded only while a touch is down. Each touch-begin also plays one
//! randomly chosen idle eye gesture on the active model.

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use tokio::runtime::Handle;

use super::native::{EyeOpenParams, Model};
use super::{lock_viewer, SharedViewer};

/// Delay before eyelids closed by a blink reopen
pub const BLINK_REOPEN_DELAY: Duration = Duration::from_millis(500);
/// How long a held-open eye gesture lasts
pub const EYE_HOLD_DURATION: Duration = Duration::from_millis(1000);
/// Eyelid aperture used while eyes are held open
pub const EYE_HOLD_APERTURE: f32 = 0.8;

/// Pointer event kinds the router listens to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PointerEventKind {
    Down,
    Up,
    Leave,
    Move,
}

/// A pointer event in page coordinates
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PointerEvent {
    pub kind: PointerEventKind,
    pub page_x: f32,
    pub page_y: f32,
}

impl PointerEvent {
    pub fn new(kind: PointerEventKind, page_x: f32, page_y: f32) -> Self {
        Self {
            kind,
            page_x,
            page_y,
        }
    }
}

pub type PointerListener = Arc<dyn Fn(&PointerEvent) + Send + Sync>;

/// Registration token returned by [`Canvas::add_pointer_listener`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(pub u64);

/// Host surface the viewer draws into and pointer events come from
pub trait Canvas: Send + Sync {
    fn size(&self) -> (u32, u32);
    fn add_pointer_listener(&self, kind: PointerEventKind, listener: PointerListener)
        -> ListenerId;
    /// Remove a listener; false when it was not registered
    fn remove_pointer_listener(&self, id: ListenerId) -> bool;
}

/// In-process canvas that dispatches pointer events to registered listeners
pub struct EventCanvas {
    size: RwLock<(u32, u32)>,
    listeners: Mutex<Vec<(ListenerId, PointerEventKind, PointerListener)>>,
    next_id: AtomicU64,
}

impl EventCanvas {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            size: RwLock::new((width, height)),
            listeners: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn set_size(&self, width: u32, height: u32) {
        *self.size.write().unwrap_or_else(|e| e.into_inner()) = (width, height);
    }

    /// Deliver an event; returns how many listeners received it
    pub fn dispatch(&self, event: PointerEvent) -> usize {
        let targets: Vec<PointerListener> = self
            .listeners
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .filter(|(_, kind, _)| *kind == event.kind)
            .map(|(_, _, listener)| Arc::clone(listener))
            .collect();

        for listener in &targets {
            listener(&event);
        }
        targets.len()
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

impl std::fmt::Debug for EventCanvas {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventCanvas")
            .field("size", &self.size())
            .field("listeners", &self.listener_count())
            .finish()
    }
}

impl Canvas for EventCanvas {
    fn size(&self) -> (u32, u32) {
        *self.size.read().unwrap_or_else(|e| e.into_inner())
    }

    fn add_pointer_listener(
        &self,
        kind: PointerEventKind,
        listener: PointerListener,
    ) -> ListenerId {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.listeners
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push((id, kind, listener));
        id
    }

    fn remove_pointer_listener(&self, id: ListenerId) -> bool {
        let mut listeners = self.listeners.lock().unwrap_or_else(|e| e.into_inner());
        let before = listeners.len();
        listeners.retain(|(existing, _, _)| *existing != id);
        listeners.len() != before
    }
}

/// Idle eye behavior played on touch-begin
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EyeGesture {
    None,
    /// Close the eyelids, reopen after [`BLINK_REOPEN_DELAY`]
    Blink,
    /// Hold both eyes at [`EYE_HOLD_APERTURE`] for [`EYE_HOLD_DURATION`]
    HoldOpen,
}

impl EyeGesture {
    /// Uniform choice among the three gestures
    pub fn pick<R: Rng + ?Sized>(rng: &mut R) -> Self {
        match rng.random_range(0..3u32) {
            1 => EyeGesture::Blink,
            2 => EyeGesture::HoldOpen,
            _ => EyeGesture::None,
        }
    }
}

struct TouchDispatch {
    viewer: SharedViewer,
    is_clicked: AtomicBool,
    rng: Mutex<ChaCha8Rng>,
}

impl TouchDispatch {
    fn touches_began(&self, x: f32, y: f32, runtime: Option<&Handle>) {
        let mut guard = lock_viewer(&self.viewer);
        let Some(viewer) = guard.as_mut() else {
            return;
        };
        self.is_clicked.store(true, Ordering::Relaxed);
        viewer.on_touches_began(x, y);

        let Some(key) = viewer.current_model_key() else {
            return;
        };
        let Some(instance) = viewer.model_mut(&key) else {
            return;
        };
        let model = instance.model_mut();
        model.stop_keep_eye_value();

        let gesture = EyeGesture::pick(&mut *self.rng.lock().unwrap_or_else(|e| e.into_inner()));
        tracing::debug!("Touch began on {} with eye gesture {:?}", key, gesture);

        match gesture {
            EyeGesture::None => {}
            EyeGesture::Blink => {
                model.close_eyelids();
                self.schedule(runtime, key, BLINK_REOPEN_DELAY, |m| m.open_eyelids());
            }
            EyeGesture::HoldOpen => {
                model.keep_eye_open(EyeOpenParams {
                    left: EYE_HOLD_APERTURE,
                    right: EYE_HOLD_APERTURE,
                });
                self.schedule(runtime, key, EYE_HOLD_DURATION, |m| m.stop_keep_eye_value());
            }
        }
    }

    fn touches_moved(&self, x: f32, y: f32) {
        let mut guard = lock_viewer(&self.viewer);
        let Some(viewer) = guard.as_mut() else {
            return;
        };
        if self.is_clicked.load(Ordering::Relaxed) {
            viewer.on_touches_moved(x, y);
        }
    }

    fn touches_ended(&self) {
        let mut guard = lock_viewer(&self.viewer);
        let Some(viewer) = guard.as_mut() else {
            return;
        };
        self.is_clicked.store(false, Ordering::Relaxed);
        viewer.on_touches_ended();
    }

    /// Run `action` on the model registered under `key` after `delay`
    fn schedule(
        &self,
        runtime: Option<&Handle>,
        key: String,
        delay: Duration,
        action: fn(&mut dyn Model),
    ) {
        let Some(runtime) = runtime else {
            tracing::warn!("No async runtime attached, skipping delayed eye update");
            return;
        };
        let viewer = Arc::clone(&self.viewer);
        runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            let mut guard = lock_viewer(&viewer);
            if let Some(instance) = guard.as_mut().and_then(|v| v.model_mut(&key)) {
                action(instance.model_mut());
            }
        });
    }
}

struct Attachment {
    canvas: Arc<dyn Canvas>,
    listeners: Vec<ListenerId>,
}

/// Binds canvas pointer listeners to the viewer's touch entry points
pub struct InteractionRouter {
    dispatch: Arc<TouchDispatch>,
    attachment: Mutex<Option<Attachment>>,
}

impl InteractionRouter {
    pub fn new(viewer: SharedViewer) -> Self {
        Self::with_rng(viewer, ChaCha8Rng::from_rng(&mut rand::rng()))
    }

    /// Router with a deterministic gesture sequence
    pub fn with_seed(viewer: SharedViewer, seed: u64) -> Self {
        Self::with_rng(viewer, ChaCha8Rng::seed_from_u64(seed))
    }

    fn with_rng(viewer: SharedViewer, rng: ChaCha8Rng) -> Self {
        Self {
            dispatch: Arc::new(TouchDispatch {
                viewer,
                is_clicked: AtomicBool::new(false),
                rng: Mutex::new(rng),
            }),
            attachment: Mutex::new(None),
        }
    }

    /// Register the four pointer listeners on `canvas`.
    ///
    /// Re-attaching first detaches from the previous canvas.
    pub fn attach(&self, canvas: Arc<dyn Canvas>) {
        self.detach();

        let runtime = Handle::try_current().ok();
        if runtime.is_none() {
            tracing::warn!("Attaching pointer listeners outside an async runtime");
        }

        let down = {
            let dispatch = Arc::clone(&self.dispatch);
            let runtime = runtime.clone();
            let listener: PointerListener = Arc::new(move |event: &PointerEvent| {
                dispatch.touches_began(event.page_x, event.page_y, runtime.as_ref())
            });
            canvas.add_pointer_listener(PointerEventKind::Down, listener)
        };

        let end_listener: PointerListener = {
            let dispatch = Arc::clone(&self.dispatch);
            Arc::new(move |_: &PointerEvent| dispatch.touches_ended())
        };
        let up = canvas.add_pointer_listener(PointerEventKind::Up, Arc::clone(&end_listener));
        let leave = canvas.add_pointer_listener(PointerEventKind::Leave, end_listener);

        let moved = {
            let dispatch = Arc::clone(&self.dispatch);
            let listener: PointerListener = Arc::new(move |event: &PointerEvent| {
                dispatch.touches_moved(event.page_x, event.page_y)
            });
            canvas.add_pointer_listener(PointerEventKind::Move, listener)
        };

        tracing::debug!("Pointer listeners attached");
        *self.attachment.lock().unwrap_or_else(|e| e.into_inner()) = Some(Attachment {
            canvas,
            listeners: vec![down, up, leave, moved],
        });
    }

    /// Remove every listener registered by [`attach`](Self::attach)
    pub fn detach(&self) {
        let attachment = self
            .attachment
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();

        if let Some(attachment) = attachment {
            for id in attachment.listeners {
                attachment.canvas.remove_pointer_listener(id);
            }
            tracing::debug!("Pointer listeners detached");
        }
        self.dispatch.is_clicked.store(false, Ordering::Relaxed);
    }

    pub fn is_attached(&self) -> bool {
        self.attachment
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .is_some()
    }

    /// A pointer-down is in progress
    pub fn is_clicked(&self) -> bool {
        self.dispatch.is_clicked.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::live2d::headless::{HeadlessModule, ModelProbe};
    use crate::live2d::native::{Live2dModule, ModelDescriptor};
    use crate::live2d::registry::ModelKind;
    use crate::live2d::MemoryAssetReader;
    use std::sync::Mutex as StdMutex;

    fn viewer_with_model(module: &HeadlessModule, canvas: Arc<EventCanvas>) -> SharedViewer {
        let mut viewer = module.create_viewer(canvas, 400, 800).unwrap();
        let descriptor = ModelDescriptor {
            dir_path: "/a/".to_string(),
            model_json_name: "a.model3.json".to_string(),
            legacy_param_names: false,
        };
        let reader = Arc::new(MemoryAssetReader::new());
        let model = module.create_model(ModelKind::Standard, descriptor, viewer.as_ref(), reader);
        viewer.add_model("A", model);
        viewer.set_current_model("A");
        Arc::new(StdMutex::new(Some(viewer)))
    }

    fn probe(module: &HeadlessModule) -> Arc<ModelProbe> {
        module.model_probe("/a/a.model3.json").unwrap()
    }

    #[test]
    fn test_gesture_distribution_is_uniform_enough() {
        let mut rng = ChaCha8Rng::seed_from_u64(7);
        let mut counts = [0usize; 3];
        for _ in 0..3000 {
            match EyeGesture::pick(&mut rng) {
                EyeGesture::None => counts[0] += 1,
                EyeGesture::Blink => counts[1] += 1,
                EyeGesture::HoldOpen => counts[2] += 1,
            }
        }
        for count in counts {
            assert!(count > 800, "skewed gesture counts: {:?}", counts);
        }
    }

    #[tokio::test]
    async fn test_pointer_events_drive_touches() {
        let module = HeadlessModule::new();
        let canvas = Arc::new(EventCanvas::new(400, 800));
        let viewer = viewer_with_model(&module, Arc::clone(&canvas));
        let router = InteractionRouter::with_seed(viewer, 1);
        router.attach(canvas.clone());
        assert_eq!(canvas.listener_count(), 4);

        // Move before down is not forwarded
        canvas.dispatch(PointerEvent::new(PointerEventKind::Move, 5.0, 5.0));
        let viewer_probe = module.viewer_probe().unwrap();
        assert_eq!(viewer_probe.touches_moved(), 0);

        canvas.dispatch(PointerEvent::new(PointerEventKind::Down, 10.0, 20.0));
        assert!(router.is_clicked());
        canvas.dispatch(PointerEvent::new(PointerEventKind::Move, 12.0, 22.0));
        canvas.dispatch(PointerEvent::new(PointerEventKind::Leave, 0.0, 0.0));
        assert!(!router.is_clicked());
        canvas.dispatch(PointerEvent::new(PointerEventKind::Move, 14.0, 24.0));

        assert_eq!(viewer_probe.touches_began(), 1);
        assert_eq!(viewer_probe.touches_moved(), 1);
        assert_eq!(viewer_probe.touches_ended(), 1);
        assert_eq!(probe(&module).eye_hold_stops(), 1);
    }

    #[tokio::test]
    async fn test_detach_stops_dispatch() {
        let module = HeadlessModule::new();
        let canvas = Arc::new(EventCanvas::new(400, 800));
        let viewer = viewer_with_model(&module, Arc::clone(&canvas));
        let router = InteractionRouter::with_seed(viewer, 1);

        router.attach(canvas.clone());
        router.detach();
        assert_eq!(canvas.listener_count(), 0);
        assert!(!router.is_attached());

        assert_eq!(
            canvas.dispatch(PointerEvent::new(PointerEventKind::Down, 1.0, 1.0)),
            0
        );
        assert_eq!(module.viewer_probe().unwrap().touches_began(), 0);
    }

    #[test]
    fn test_detach_without_attach_is_safe() {
        let viewer: SharedViewer = Arc::new(StdMutex::new(None));
        let router = InteractionRouter::new(viewer);
        router.detach();
        router.detach();
        assert!(!router.is_attached());
    }

    #[tokio::test]
    async fn test_reattach_does_not_duplicate_listeners() {
        let viewer: SharedViewer = Arc::new(StdMutex::new(None));
        let router = InteractionRouter::new(viewer);
        let canvas = Arc::new(EventCanvas::new(100, 100));

        router.attach(canvas.clone());
        router.attach(canvas.clone());
        assert_eq!(canvas.listener_count(), 4);
    }

    #[tokio::test]
    async fn test_events_without_viewer_are_ignored() {
        let viewer: SharedViewer = Arc::new(StdMutex::new(None));
        let router = InteractionRouter::new(viewer);
        let canvas = Arc::new(EventCanvas::new(100, 100));
        router.attach(canvas.clone());

        canvas.dispatch(PointerEvent::new(PointerEventKind::Down, 1.0, 1.0));
        assert!(!router.is_clicked());
    }

    #[tokio::test(start_paused = true)]
    async fn test_eye_gestures_are_released() {
        let module = HeadlessModule::new();
        let canvas = Arc::new(EventCanvas::new(400, 800));
        let viewer = viewer_with_model(&module, Arc::clone(&canvas));
        let router = InteractionRouter::with_seed(viewer, 42);
        router.attach(canvas.clone());

        for _ in 0..30 {
            canvas.dispatch(PointerEvent::new(PointerEventKind::Down, 1.0, 1.0));
            canvas.dispatch(PointerEvent::new(PointerEventKind::Up, 1.0, 1.0));
            tokio::time::sleep(EYE_HOLD_DURATION + Duration::from_millis(10)).await;
        }

        let probe = probe(&module);
        assert!(probe.eyelid_closes() > 0);
        assert!(probe.eye_holds() > 0);
        assert_eq!(probe.eyelid_closes(), probe.eyelid_opens());
        assert!(!probe.eyes_closed());
        assert!(!probe.eye_hold_active());
    }
}
