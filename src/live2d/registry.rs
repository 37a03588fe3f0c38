//! Character registry and per-model metadata

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::config::CharacterConfig;

/// Stable identifier correlating a model to a voice/character identity
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SpeakerId(String);

impl SpeakerId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SpeakerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SpeakerId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for SpeakerId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl AsRef<str> for SpeakerId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Which native loader constructs the model
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelKind {
    /// Mouth driven by a plain lip-sync amplitude weight
    Standard,
    /// Mouth driven by decoded audio analysis
    MotionSync,
}

impl Default for ModelKind {
    fn default() -> Self {
        Self::Standard
    }
}

impl fmt::Display for ModelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModelKind::Standard => write!(f, "standard"),
            ModelKind::MotionSync => write!(f, "motion_sync"),
        }
    }
}

/// Metadata about one registered character model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelInfo {
    /// Key the model is registered under in the viewer
    pub id: SpeakerId,
    /// Flipped to true once asset loading completes
    pub is_usable: bool,
    /// Directory holding the model files, always ending in '/'
    pub dir_path: String,
    /// File name of the `*.model3.json` inside `dir_path`
    pub model_json_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lip_sync_weight: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_old_param_name: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_expression: Option<String>,
    #[serde(default)]
    pub kind: ModelKind,
}

impl ModelInfo {
    /// Build the initial (not yet usable) metadata for a configured character.
    ///
    /// `assets_root` is either a filesystem directory or a URL path prefix,
    /// depending on the asset source.
    pub fn from_character(assets_root: &str, character: &CharacterConfig) -> Self {
        Self {
            id: SpeakerId::new(character.id.clone()),
            is_usable: false,
            dir_path: join_dir(assets_root, &character.dir),
            model_json_name: character.model_json.clone(),
            lip_sync_weight: character.lip_sync_weight,
            is_old_param_name: character.legacy_param_names.then_some(true),
            default_expression: character.default_expression.clone(),
            kind: character.kind,
        }
    }

    /// Full path of the model json
    pub fn model_json_path(&self) -> String {
        format!("{}{}", self.dir_path, self.model_json_name)
    }

    pub fn uses_legacy_param_names(&self) -> bool {
        self.is_old_param_name.unwrap_or(false)
    }
}

fn join_dir(root: &str, dir: &str) -> String {
    let root = root.trim_end_matches('/');
    let dir = dir.trim_matches('/');
    match (root.is_empty(), dir.is_empty()) {
        (true, true) => "/".to_string(),
        (true, false) => format!("{}/", dir),
        (false, true) => format!("{}/", root),
        (false, false) => format!("{}/{}/", root, dir),
    }
}

fn character(
    name: &str,
    id: &str,
    dir: &str,
    model_json: &str,
    lip_sync_weight: Option<f32>,
) -> CharacterConfig {
    CharacterConfig {
        name: name.to_string(),
        id: id.to_string(),
        dir: dir.to_string(),
        model_json: model_json.to_string(),
        lip_sync_weight,
        legacy_param_names: false,
        default_expression: None,
        kind: ModelKind::Standard,
    }
}

/// The built-in character roster, in load order
pub fn default_characters() -> Vec<CharacterConfig> {
    let mut tsumugi = character(
        "春日部つむぎ",
        "35b2c544-660e-401e-b503-0e14c635303a",
        "春日部つむぎ公式live2Dモデル",
        "春日部つむぎ公式live2Dモデル.model3.json",
        Some(15.0),
    );
    tsumugi.legacy_param_names = true;

    let mut usagi = character(
        "中国うさぎ",
        "1f18ffc3-47ea-4ce0-9829-0576d03a7ec8",
        "Usagi_vts",
        "usagi.model3.json",
        Some(20.0),
    );
    usagi.default_expression = Some("Inaba".to_string());

    let mut ritsu = character(
        "波音リツ",
        "b1a81618-b27b-40d2-b0ea-27a9ad408c4b",
        "Kei_basic",
        "Kei_basic.model3.json",
        None,
    );
    ritsu.kind = ModelKind::MotionSync;

    vec![
        character(
            "四国めたん",
            "7ffcb7ce-00ec-4bdc-82cd-45a8889e43ff",
            "四国めたん_vts",
            "四国めたん.model3.json",
            Some(10.0),
        ),
        character(
            "ずんだもん",
            "388f246b-8c41-4ac1-8e2d-5d79f3ff56d9",
            "Zundamon_vts",
            "zundamon.model3.json",
            Some(20.0),
        ),
        tsumugi,
        character(
            "九州そら",
            "481fb609-6446-4870-9f46-90c4dd623403",
            "Sora_vts",
            "kyuusyuu_sora.model3.json",
            Some(20.0),
        ),
        usagi,
        character(
            "雨晴はう",
            "3474ee95-c274-47f9-aa1a-8322163d96f1",
            "Mao",
            "Mao.model3.json",
            Some(10.0),
        ),
        ritsu,
    ]
}
