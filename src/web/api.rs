//! REST API endpoints

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::live2d::registry::{ModelInfo, ModelKind};
use crate::live2d::store::Live2dStore;
use crate::Live2dApp;

use super::sse;

/// API response wrapper
#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn success(data: T) -> Json<Self> {
        Json(Self {
            success: true,
            data: Some(data),
            error: None,
        })
    }
}

impl ApiResponse<()> {
    pub fn error(message: &str) -> Json<Self> {
        Json(Self {
            success: false,
            data: None,
            error: Some(message.to_string()),
        })
    }

    pub fn ok() -> Json<Self> {
        Json(Self {
            success: true,
            data: None,
            error: None,
        })
    }
}

fn not_found(message: &str) -> Response {
    (StatusCode::NOT_FOUND, ApiResponse::error(message)).into_response()
}

/// Status response
#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub version: String,
    pub native_available: bool,
    pub core_loaded: bool,
    pub initialized: bool,
    pub rendering: bool,
    pub interaction_attached: bool,
    pub current_model: Option<String>,
    pub latest_character_key: String,
    pub show_in_talk: bool,
}

/// Get current status
pub async fn get_status(State(app): State<Arc<Live2dApp>>) -> impl IntoResponse {
    let manager = &app.manager;

    ApiResponse::success(StatusResponse {
        version: crate::VERSION.to_string(),
        native_available: manager.is_available(),
        core_loaded: manager.is_core_loaded(),
        initialized: app.store.is_initialized(),
        rendering: manager.is_rendering(),
        interaction_attached: manager.is_interaction_attached(),
        current_model: manager.current_model_key(),
        latest_character_key: app.store.latest_character_key(),
        show_in_talk: app.store.is_current_show_in_talk(),
    })
}

/// One registered character with its live model state
#[derive(Debug, Serialize)]
pub struct ModelSummary {
    pub name: String,
    pub id: String,
    pub kind: ModelKind,
    pub is_usable: bool,
    pub present: bool,
    pub setup_complete: bool,
}

impl ModelSummary {
    fn new(app: &Live2dApp, name: String, info: &ModelInfo) -> Self {
        let id = info.id.as_str();
        Self {
            present: app.manager.is_model_present(id),
            setup_complete: app.manager.is_model_setup_complete(id),
            id: id.to_string(),
            kind: info.kind,
            is_usable: info.is_usable,
            name,
        }
    }
}

/// List registered characters in registry order
pub async fn list_models(State(app): State<Arc<Live2dApp>>) -> impl IntoResponse {
    let models: Vec<ModelSummary> = app
        .store
        .entries()
        .into_iter()
        .map(|(name, info)| ModelSummary::new(&app, name, &info))
        .collect();

    ApiResponse::success(models)
}

/// Full detail of one character
#[derive(Debug, Serialize)]
pub struct ModelDetail {
    #[serde(flatten)]
    pub summary: ModelSummary,
    pub info: ModelInfo,
    pub expressions: Vec<String>,
    pub motions: Vec<String>,
}

/// Get one character by name
pub async fn get_model(
    State(app): State<Arc<Live2dApp>>,
    Path(name): Path<String>,
) -> Response {
    let Some(info) = app.store.model_info(&name) else {
        return not_found(&format!("Unknown model: {}", name));
    };
    let id = info.id.as_str().to_string();

    ApiResponse::success(ModelDetail {
        summary: ModelSummary::new(&app, name, &info),
        expressions: app.manager.expression_ids(&id),
        motions: app.manager.motion_names(&id),
        info,
    })
    .into_response()
}

/// Select the current model by character name or speaker id
#[derive(Debug, Deserialize)]
pub struct SetCurrentRequest {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub id: Option<String>,
}

pub async fn set_current_model(
    State(app): State<Arc<Live2dApp>>,
    Json(request): Json<SetCurrentRequest>,
) -> Response {
    let id = match (request.name, request.id) {
        (Some(name), _) => {
            match app.store.model_info(&name) {
                Some(info) => info.id.as_str().to_string(),
                None => return not_found(&format!("Unknown model: {}", name)),
            }
        }
        (None, Some(id)) => id,
        (None, None) => {
            return (
                StatusCode::BAD_REQUEST,
                ApiResponse::error("Either name or id is required"),
            )
                .into_response()
        }
    };

    if !app.manager.is_model_present(&id) {
        return not_found(&format!("Model {} is not loaded", id));
    }

    app.manager.set_current_model(&id);
    ApiResponse::<()>::ok().into_response()
}

/// Stop lip-sync on the current model
pub async fn stop_lip_sync(State(app): State<Arc<Live2dApp>>) -> impl IntoResponse {
    app.manager.stop_lip_sync();
    ApiResponse::<()>::ok()
}

/// SSE stream endpoint
pub async fn store_stream(State(app): State<Arc<Live2dApp>>) -> impl IntoResponse {
    sse::create_store_stream(app)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::live2d::headless::{sample_model_json, HeadlessModule};
    use crate::live2d::interaction::EventCanvas;
    use crate::live2d::native::Live2dModule;
    use crate::live2d::MemoryAssetReader;

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    async fn app_with_metan() -> Arc<Live2dApp> {
        let config = Config::default();
        let root = config.live2d.assets_root();
        let dir = format!("{}/四国めたん_vts/", root.trim_end_matches('/'));

        let reader = Arc::new(MemoryAssetReader::new());
        reader.insert(
            &format!("{}四国めたん.model3.json", dir),
            sample_model_json("四国めたん", &["Smile"], &[]),
        );
        reader.insert(&format!("{}四国めたん.moc3", dir), b"moc".to_vec());

        let module: Arc<dyn Live2dModule> = Arc::new(HeadlessModule::new());
        let app = Live2dApp::with_reader(config, Some(module), reader);
        app.manager
            .initialize_viewer(Arc::new(EventCanvas::new(800, 800)), 800, 800);
        app.manager.load_all_models().settled().await;
        app
    }

    #[tokio::test]
    async fn test_status() {
        let app = app_with_metan().await;
        let json = body_json(get_status(State(app)).await.into_response()).await;

        assert_eq!(json["success"], true);
        assert_eq!(json["data"]["core_loaded"], true);
        assert_eq!(json["data"]["initialized"], true);
        assert_eq!(
            json["data"]["current_model"],
            "7ffcb7ce-00ec-4bdc-82cd-45a8889e43ff"
        );
    }

    #[tokio::test]
    async fn test_list_models() {
        let app = app_with_metan().await;
        let json = body_json(list_models(State(app)).await.into_response()).await;

        let models = json["data"].as_array().unwrap();
        assert_eq!(models.len(), 7);
        assert_eq!(models[0]["name"], "四国めたん");
        assert_eq!(models[0]["present"], true);
        assert_eq!(models[1]["present"], false);
    }

    #[tokio::test]
    async fn test_get_model() {
        let app = app_with_metan().await;
        let response = get_model(State(app.clone()), Path("四国めたん".to_string())).await;
        let json = body_json(response).await;
        assert_eq!(json["data"]["expressions"], serde_json::json!(["None", "Smile"]));
        assert_eq!(json["data"]["info"]["is_usable"], true);

        let response = get_model(State(app), Path("nobody".to_string())).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_set_current_model() {
        let app = app_with_metan().await;

        let request = SetCurrentRequest {
            name: Some("ずんだもん".to_string()),
            id: None,
        };
        let response = set_current_model(State(app.clone()), Json(request)).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let request = SetCurrentRequest {
            name: None,
            id: Some("7ffcb7ce-00ec-4bdc-82cd-45a8889e43ff".to_string()),
        };
        let response = set_current_model(State(app.clone()), Json(request)).await;
        assert_eq!(response.status(), StatusCode::OK);

        let request = SetCurrentRequest {
            name: None,
            id: None,
        };
        let response = set_current_model(State(app), Json(request)).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
