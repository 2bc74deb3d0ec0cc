use crate::types::{BoundingBox, SarError, SarResult};
use serde_json::{json, Value};
use std::io::Write;
use std::path::Path;
use tempfile::NamedTempFile;

/// File name of the GeoJSON sidecar in both input and output directories
pub const METADATA_FILE_NAME: &str = "data.json";

/// Feature property naming the scene directory (input) or raster file (output)
pub const DATA_PATH_PROPERTY: &str = "up42.data_path";

/// GeoJSON sidecar describing the scene footprint.
///
/// The platform delivers either a bare `Feature` or a `FeatureCollection`;
/// both are accepted and the feature matching the scene is picked on demand.
#[derive(Debug, Clone)]
pub struct SceneMetadata {
    document: Value,
}

impl SceneMetadata {
    /// Load a sidecar file. A missing or non-GeoJSON file is `MetadataMissing`.
    pub fn load<P: AsRef<Path>>(path: P) -> SarResult<Self> {
        let path = path.as_ref();
        log::debug!("Loading scene metadata: {}", path.display());

        let content = std::fs::read_to_string(path).map_err(|e| {
            SarError::MetadataMissing(format!("Cannot read {}: {}", path.display(), e))
        })?;
        let document: Value = serde_json::from_str(&content).map_err(|e| {
            SarError::MetadataMissing(format!("{} is not valid JSON: {}", path.display(), e))
        })?;

        Self::from_value(document).map_err(|e| match e {
            SarError::MetadataMissing(msg) => {
                SarError::MetadataMissing(format!("{}: {}", path.display(), msg))
            }
            other => other,
        })
    }

    pub fn from_value(document: Value) -> SarResult<Self> {
        match document.get("type").and_then(Value::as_str) {
            Some("Feature") => Ok(Self { document }),
            Some("FeatureCollection") => {
                let has_features = document
                    .get("features")
                    .and_then(Value::as_array)
                    .map_or(false, |f| !f.is_empty());
                if has_features {
                    Ok(Self { document })
                } else {
                    Err(SarError::MetadataMissing(
                        "FeatureCollection contains no features".to_string(),
                    ))
                }
            }
            other => Err(SarError::MetadataMissing(format!(
                "expected a GeoJSON Feature or FeatureCollection, got type {:?}",
                other
            ))),
        }
    }

    fn features(&self) -> Vec<&Value> {
        match self.document.get("features").and_then(Value::as_array) {
            Some(features) => features.iter().collect(),
            None => vec![&self.document],
        }
    }

    /// Feature whose data path names `scene_id`, falling back to the first feature
    pub fn feature_for(&self, scene_id: &str) -> &Value {
        let features = self.features();
        features
            .iter()
            .find(|f| {
                f.get("properties")
                    .and_then(|p| p.get(DATA_PATH_PROPERTY))
                    .and_then(Value::as_str)
                    == Some(scene_id)
            })
            .or_else(|| features.first())
            .copied()
            .unwrap_or(&self.document)
    }

    /// Footprint of the scene's feature: its `bbox` member, else the extent of its geometry
    pub fn footprint(&self, scene_id: &str) -> Option<BoundingBox> {
        let feature = self.feature_for(scene_id);

        if let Some(values) = feature.get("bbox").and_then(Value::as_array) {
            let numbers: Option<Vec<f64>> = values.iter().map(Value::as_f64).collect();
            if let Some(bbox) = numbers.and_then(|n| BoundingBox::from_geojson_array(&n)) {
                return Some(bbox);
            }
        }

        let mut points = Vec::new();
        collect_positions(feature.get("geometry")?.get("coordinates")?, &mut points);
        BoundingBox::from_points(&points)
    }

    /// Copy of the scene's feature with bbox and geometry replaced by `bbox`
    /// and the data path pointing at `raster_name`
    pub fn reconciled_feature(&self, scene_id: &str, bbox: &BoundingBox, raster_name: &str) -> Value {
        let mut feature = self.feature_for(scene_id).clone();

        if let Some(obj) = feature.as_object_mut() {
            obj.insert("bbox".to_string(), json!(bbox.to_geojson_array()));
            obj.insert(
                "geometry".to_string(),
                json!({
                    "type": "Polygon",
                    "coordinates": [bbox.polygon_ring()],
                }),
            );

            let properties = obj
                .entry("properties")
                .or_insert_with(|| Value::Object(Default::default()));
            if !properties.is_object() {
                *properties = Value::Object(Default::default());
            }
            if let Some(props) = properties.as_object_mut() {
                props.insert(DATA_PATH_PROPERTY.to_string(), json!(raster_name));
            }
        }

        feature
    }
}

fn collect_positions(coordinates: &Value, points: &mut Vec<(f64, f64)>) {
    match coordinates.as_array() {
        Some(items) if items.len() >= 2 && items.iter().all(Value::is_number) => {
            if let (Some(lon), Some(lat)) = (items[0].as_f64(), items[1].as_f64()) {
                points.push((lon, lat));
            }
        }
        Some(items) => {
            for item in items {
                collect_positions(item, points);
            }
        }
        None => {}
    }
}

/// Wrap features into a FeatureCollection document
pub fn feature_collection(features: Vec<Value>) -> Value {
    json!({
        "type": "FeatureCollection",
        "features": features,
    })
}

/// Write a GeoJSON document so that readers never observe a partial file
pub fn write_atomic<P: AsRef<Path>>(path: P, document: &Value) -> SarResult<()> {
    let path = path.as_ref();
    let dir = path.parent().unwrap_or_else(|| Path::new("."));

    let write = || -> std::io::Result<()> {
        let mut tmp = NamedTempFile::new_in(dir)?;
        serde_json::to_writer_pretty(&mut tmp, document)?;
        tmp.write_all(b"\n")?;
        tmp.flush()?;
        tmp.persist(path).map_err(|e| e.error)?;
        Ok(())
    };

    write().map_err(|e| SarError::MetadataWriteFailed(format!("{}: {}", path.display(), e)))?;
    log::debug!("Wrote metadata: {}", path.display());
    Ok(())
}
