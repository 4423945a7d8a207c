use crate::error::PipelineError;
use crate::product::Platform;
use anyhow::{anyhow, Result};
use serde_json::{Map, Value};
use stac::Item;
use std::fs::{self, read_to_string};
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tracing::debug;

pub const UPLOAD_FILE_NAME: &str = "upload_item.json";
pub const UPLOAD_LOG_PREFIX: &str = "upload_";
pub const VERIFIED_PREFIX: &str = "verified_";

/// STAC item as produced by the item builder, kept as raw JSON so fields
/// this tool does not know about survive the round trip.
#[derive(Debug, Clone, PartialEq)]
pub struct StacItemDocument {
    value: Value,
}

impl StacItemDocument {
    pub fn from_value(value: Value) -> Result<Self> {
        if !value.is_object() {
            return Err(anyhow!("STAC item must be a JSON object"));
        }
        Ok(Self { value })
    }

    /// Writes the document as compact JSON.
    pub fn write(&self, path: &Path) -> Result<(), PipelineError> {
        fs::write(path, serde_json::to_vec(&self.value)?)?;
        Ok(())
    }

    /// Typed view, fails when the document is not a valid STAC item.
    pub fn to_item(&self) -> std::result::Result<Item, serde_json::Error> {
        serde_json::from_value(self.value.clone())
    }

    pub fn as_value(&self) -> &Value {
        &self.value
    }

    pub fn id(&self) -> Option<&str> {
        self.value.get("id")?.as_str()
    }

    pub fn set_id(&mut self, id: &str) {
        if let Some(object) = self.value.as_object_mut() {
            object.insert("id".to_string(), Value::String(id.to_string()));
        }
    }

    pub fn assets_mut(&mut self) -> Option<&mut Map<String, Value>> {
        self.value.get_mut("assets")?.as_object_mut()
    }
}

/// Reads the builder output at `path` and checks it is a STAC item.
pub fn read_item_from_file(path: &Path) -> Result<StacItemDocument, PipelineError> {
    let content = read_to_string(path)?;
    let value: Value = serde_json::from_str(&content).map_err(|source| PipelineError::InvalidItem {
        path: path.to_path_buf(),
        source,
    })?;
    let document = StacItemDocument { value };
    let item = document.to_item().map_err(|source| PipelineError::InvalidItem {
        path: path.to_path_buf(),
        source,
    })?;
    debug!(id = %item.id, assets = item.assets.len(), "read STAC item");
    Ok(document)
}

fn is_own_output(name: &str) -> bool {
    name == UPLOAD_FILE_NAME || name.starts_with(UPLOAD_LOG_PREFIX) || name.starts_with(VERIFIED_PREFIX)
}

/// Newest `*.json` file in `dir` whose name mentions the two-character
/// mission code, ignoring files this tool writes itself.
pub fn find_newest_item(dir: &Path, platform: Platform) -> Result<Option<PathBuf>> {
    let code = &platform.code()[..2];
    let mut newest: Option<(SystemTime, PathBuf)> = None;
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        if !name.ends_with(".json") || !name.contains(code) || is_own_output(name) {
            continue;
        }
        let meta = entry.metadata()?;
        if !meta.is_file() {
            continue;
        }
        let modified = meta.modified()?;
        let newer = match &newest {
            Some((time, current)) => modified > *time || (modified == *time && path > *current),
            None => true,
        };
        if newer {
            newest = Some((modified, path));
        }
    }
    Ok(newest.map(|(_, path)| path))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Duration;

    fn item_json() -> Value {
        json!({
            "type": "Feature",
            "stac_version": "1.0.0",
            "stac_extensions": ["https://stac-extensions.github.io/eo/v1.1.0/schema.json"],
            "id": "S2A_MSIL2A_20230101T100000_N0509_R122_T33UVP_20230101T120000",
            "geometry": {"type": "Point", "coordinates": [14.5, 50.1]},
            "bbox": [14.5, 50.1, 14.5, 50.1],
            "properties": {"datetime": "2023-01-01T10:00:00Z", "s2:tile_id": "T33UVP"},
            "links": [],
            "assets": {
                "metadata": {"href": "MTD_MSIL2A.xml", "roles": ["metadata"]}
            }
        })
    }

    #[test]
    fn test_write_and_read_preserve_structure() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("S2A_item.json");
        let document = StacItemDocument::from_value(item_json()).unwrap();
        document.write(&path).unwrap();

        let read = read_item_from_file(&path).unwrap();
        assert_eq!(read, document);
        assert_eq!(read.as_value()["properties"]["s2:tile_id"], "T33UVP");
    }

    #[test]
    fn test_read_item_from_file_validates() {
        let dir = tempfile::tempdir().unwrap();
        let good = dir.path().join("S2A_good.json");
        fs::write(&good, item_json().to_string()).unwrap();
        let document = read_item_from_file(&good).unwrap();
        assert_eq!(document.id(), Some("S2A_MSIL2A_20230101T100000_N0509_R122_T33UVP_20230101T120000"));

        let bad = dir.path().join("S2A_bad.json");
        fs::write(&bad, r#"{"collections": []}"#).unwrap();
        assert!(matches!(
            read_item_from_file(&bad),
            Err(PipelineError::InvalidItem { .. })
        ));
    }

    #[test]
    fn test_non_object_documents_are_rejected() {
        assert!(StacItemDocument::from_value(json!([1, 2])).is_err());
    }

    #[test]
    fn test_find_newest_item() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(find_newest_item(dir.path(), Platform::S2).unwrap(), None);

        let old = dir.path().join("S2A_old.json");
        fs::write(&old, "{}").unwrap();
        fs::File::options()
            .write(true)
            .open(&old)
            .unwrap()
            .set_modified(SystemTime::now() - Duration::from_secs(60))
            .unwrap();
        fs::write(dir.path().join("S2A_new.json"), "{}").unwrap();
        fs::write(dir.path().join("S1A_other.json"), "{}").unwrap();
        fs::write(dir.path().join("S2A_notes.txt"), "").unwrap();
        fs::write(dir.path().join(UPLOAD_FILE_NAME), "{}").unwrap();
        fs::write(dir.path().join("upload_S2A_X.log"), "{}").unwrap();
        fs::write(dir.path().join("verified_S2A_X.json"), "{}").unwrap();

        assert_eq!(
            find_newest_item(dir.path(), Platform::S2).unwrap(),
            Some(dir.path().join("S2A_new.json"))
        );
    }
}
