//! Server-Sent Events for store changes

use axum::response::sse::{Event, KeepAlive, Sse};
use futures::stream::Stream;
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::StreamExt;

use crate::live2d::store::StoreEvent;
use crate::Live2dApp;

/// Create an SSE stream of store changes
pub fn create_store_stream(
    app: Arc<Live2dApp>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let rx = app.subscribe_store();

    let stream = BroadcastStream::new(rx).filter_map(|result| match result {
        Ok(event) => store_event_to_sse(&event).map(Ok),
        Err(_) => None, // Skip lagged messages
    });

    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("keep-alive"),
    )
}

/// SSE event name for a store change
pub fn event_name(event: &StoreEvent) -> &'static str {
    match event {
        StoreEvent::ModelInfo { .. } => "model_info",
        StoreEvent::CoreLoaded { .. } => "core_loaded",
        StoreEvent::Initialized { .. } => "initialized",
        StoreEvent::LatestCharacterKey { .. } => "latest_character_key",
        StoreEvent::ShowInTalk { .. } => "show_in_talk",
    }
}

fn store_event_to_sse(event: &StoreEvent) -> Option<Event> {
    match serde_json::to_string(event) {
        Ok(data) => Some(Event::default().event(event_name(event)).data(data)),
        Err(e) => {
            tracing::warn!("Failed to serialize store event: {}", e);
            None
        }
    }
}
