//! Scene files and the report printed after loading one.
//!
//! A scene is a JSON document:
//!
//! ```json
//! {
//!   "schemas": { "<type>": <descriptor>, ... },
//!   "loaders": ["text"],
//!   "components": [{ "entity": "...", "type": "...", "value": ... }]
//! }
//! ```
//!
//! Every key is optional. Each name in `loaders` is backed by a loader that
//! reads the asset URI as a UTF-8 file under the assets directory.

use std::path::{Path, PathBuf};
use std::rc::Rc;

use anyhow::{Context, Result, bail};
use serde::Deserialize;
use serde_json::{Value, json};
use stage_core::{Asset, AssetLoader, ComponentData, Stage, asset_loader};
use tracing::{debug, info};

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Scene {
    pub schemas: Option<Value>,
    pub loaders: Vec<String>,
    pub components: Vec<ComponentData>,
}

impl Scene {
    pub async fn read(path: &Path) -> Result<Self> {
        let text = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("reading scene {}", path.display()))?;
        serde_json::from_str(&text).with_context(|| format!("parsing scene {}", path.display()))
    }

    /// Register schemas and loaders, then add every component.
    pub fn apply(self, stage: &Stage, assets: &Path) -> Result<()> {
        if let Some(schemas) = self.schemas {
            stage.load_schemas(schemas).context("registering schemas")?;
        }
        for kind in &self.loaders {
            stage.register_loader(kind, file_loader(assets.to_path_buf()))?;
        }
        stage.load(self.components).context("adding components")?;
        info!(
            components = stage.components().len(),
            entities = stage.components().entities().len(),
            "scene applied"
        );
        Ok(())
    }
}

/// Reads `uri` relative to `root` as text.
pub fn file_loader(root: PathBuf) -> Rc<dyn AssetLoader> {
    asset_loader(move |uri, signal| {
        let path = root.join(&uri);
        async move {
            debug!(path = %path.display(), "loading asset");
            tokio::select! {
                text = tokio::fs::read_to_string(&path) => {
                    let text = text.with_context(|| format!("reading asset {}", path.display()))?;
                    Ok(Rc::new(text) as Asset)
                }
                () = signal.aborted() => bail!("load of {} aborted", path.display()),
            }
        }
    })
}

/// Components plus the state of every live reference.
pub fn report(stage: &Stage) -> Value {
    let components: Vec<Value> = stage
        .components()
        .iter()
        .map(|c| {
            let references: Vec<Value> = c
                .references()
                .unwrap_or_default()
                .into_iter()
                .map(|(path, r)| json!({ "path": path.to_string(), "state": r.state().as_str() }))
                .collect();
            let mut entry = serde_json::to_value(c.to_json()).unwrap_or(Value::Null);
            if !references.is_empty() {
                entry["references"] = Value::Array(references);
            }
            entry
        })
        .collect();

    let assets: Vec<Value> = stage
        .references()
        .assets()
        .iter()
        .map(|r| {
            json!({
                "uri": r.uri(),
                "type": r.kind(),
                "state": r.state().as_str(),
                "bytes": r.target().and_then(|a| a.downcast_ref::<String>().map(String::len)),
            })
        })
        .collect();

    json!({
        "components": components,
        "references": {
            "components": stage.references().components().len(),
            "assets": assets,
        }
    })
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn scene(value: Value) -> Scene {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_empty_scene_parses() {
        let scene = scene(json!({}));
        assert!(scene.schemas.is_none());
        assert!(scene.components.is_empty());
    }

    #[test]
    fn test_report_lists_reference_states() {
        let stage = Stage::new();
        scene(json!({
            "schemas": {
                "follow": {
                    "type": "object",
                    "properties": { "target": { "type": "string", "component": "anchor" } }
                }
            },
            "components": [
                { "entity": "cam", "type": "follow", "value": { "target": "player" } },
                { "entity": "player", "type": "anchor" }
            ]
        }))
        .apply(&stage, Path::new("."))
        .unwrap();

        let report = report(&stage);
        assert_eq!(report["components"][0]["references"][0]["path"], json!("/target"));
        assert_eq!(report["components"][0]["references"][0]["state"], json!("resolved"));
        assert_eq!(report["references"]["components"], json!(1));
    }

    #[tokio::test]
    async fn test_missing_asset_file_stays_pending() {
        let stage = Stage::new();
        scene(json!({
            "schemas": {
                "note": {
                    "type": "object",
                    "properties": { "body": { "type": "string", "asset": "text" } }
                }
            },
            "loaders": ["text"],
            "components": [{ "entity": "n", "type": "note", "value": { "body": "does-not-exist.txt" } }]
        }))
        .apply(&stage, Path::new("/nonexistent-stage-assets"))
        .unwrap();

        stage.settle().await;
        let report = report(&stage);
        assert_eq!(report["references"]["assets"][0]["state"], json!("pending"));
        assert_eq!(report["references"]["assets"][0]["bytes"], Value::Null);
    }
}
