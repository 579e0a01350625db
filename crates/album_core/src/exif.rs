//! EXIF metadata summary for the viewer's info panel

use crate::photo::PhotoId;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Raw EXIF record as stored by the server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExifData {
    pub photo_id: PhotoId,
    #[serde(default)]
    pub exif_json: Value,
}

/// Display-ready EXIF fields; absent tags stay `None`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExifSummary {
    pub camera: Option<String>,
    pub focal_length: Option<String>,
    pub aperture: Option<String>,
    pub iso: Option<String>,
}

impl ExifSummary {
    pub fn from_json(exif: &Value) -> Self {
        let camera = tag(exif, "Make").map(|make| match tag(exif, "Model") {
            Some(model) => format!("{} {}", make, model),
            None => make,
        });

        Self {
            camera,
            focal_length: tag(exif, "FocalLength").map(|v| format!("{}mm", v)),
            aperture: tag(exif, "FNumber").map(|v| format!("f/{}", v)),
            iso: tag(exif, "ISO"),
        }
    }

    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }

    /// `(label, value)` pairs in panel order
    pub fn rows(&self) -> Vec<(&'static str, &str)> {
        [
            ("Camera", &self.camera),
            ("Focal Length", &self.focal_length),
            ("Aperture", &self.aperture),
            ("ISO", &self.iso),
        ]
        .into_iter()
        .filter_map(|(label, value)| value.as_deref().map(|v| (label, v)))
        .collect()
    }
}

impl From<&ExifData> for ExifSummary {
    fn from(data: &ExifData) -> Self {
        Self::from_json(&data.exif_json)
    }
}

/// Tag value as display text; empty strings, zeros, null and false count as absent
fn tag(exif: &Value, name: &str) -> Option<String> {
    match exif.get(name)? {
        Value::String(s) => {
            let s = s.trim();
            (!s.is_empty()).then(|| s.to_string())
        }
        Value::Number(n) => (n.as_f64() != Some(0.0)).then(|| n.to_string()),
        Value::Null | Value::Bool(false) => None,
        other => Some(other.to_string()),
    }
}
