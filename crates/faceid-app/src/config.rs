use faceid_core::{CaptureGeometry, TensorLayout, Thresholds};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Application configuration: TOML file (optional) overlaid with
/// `FACEID_*` environment variables.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Camera index, opened as `/dev/video<index>`.
    pub camera_index: u32,
    /// Explicit device path; takes precedence over `camera_index`.
    pub camera_device: Option<String>,
    /// Siamese model artifact (ONNX).
    pub model_path: PathBuf,
    pub model_layout: TensorLayout,
    /// Root of `input_image/` and `verification_images/`.
    pub data_dir: PathBuf,
    pub thresholds: Thresholds,
    pub geometry: CaptureGeometry,
    /// Frames discarded after opening the camera (exposure settling).
    pub warmup_frames: usize,
    /// Live preview tick rate.
    pub preview_fps: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            camera_index: 0,
            camera_device: None,
            model_path: PathBuf::from("siamesemodel.onnx"),
            model_layout: TensorLayout::default(),
            data_dir: PathBuf::from("application_data"),
            thresholds: Thresholds::default(),
            geometry: CaptureGeometry::default(),
            warmup_frames: 4,
            preview_fps: 33,
        }
    }
}

impl Config {
    /// Load from `path` (or defaults), apply environment overrides, validate.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => {
                let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
                    path: path.to_path_buf(),
                    source,
                })?;
                Self::from_toml_str(&text)?
            }
            None => Self::default(),
        };
        config.apply_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    /// Apply `FACEID_*` overrides from `lookup`. Unparsable values are
    /// ignored with a warning.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(v) = parse_var(&lookup, "FACEID_CAMERA_INDEX") {
            self.camera_index = v;
        }
        if let Some(v) = lookup("FACEID_CAMERA_DEVICE") {
            self.camera_device = Some(v);
        }
        if let Some(v) = lookup("FACEID_MODEL_PATH") {
            self.model_path = PathBuf::from(v);
        }
        if let Some(v) = lookup("FACEID_DATA_DIR") {
            self.data_dir = PathBuf::from(v);
        }
        if let Some(v) = parse_var(&lookup, "FACEID_DETECTION_THRESHOLD") {
            self.thresholds.detection = v;
        }
        if let Some(v) = parse_var(&lookup, "FACEID_VERIFICATION_THRESHOLD") {
            self.thresholds.verification = v;
        }
        if let Some(v) = parse_var(&lookup, "FACEID_WARMUP_FRAMES") {
            self.warmup_frames = v;
        }
        if let Some(v) = parse_var(&lookup, "FACEID_PREVIEW_FPS") {
            self.preview_fps = v;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.thresholds.is_valid() {
            return Err(ConfigError::Invalid(format!(
                "thresholds must lie in [0, 1], got detection={} verification={}",
                self.thresholds.detection, self.thresholds.verification
            )));
        }
        if !self.geometry.is_valid() {
            let g = &self.geometry;
            return Err(ConfigError::Invalid(format!(
                "roi {:?} does not fit inside {}x{} capture",
                g.roi, g.frame_width, g.frame_height
            )));
        }
        if self.preview_fps == 0 {
            return Err(ConfigError::Invalid("preview_fps must be positive".into()));
        }
        Ok(())
    }

    /// Captured image, overwritten on every verification.
    pub fn input_image_path(&self) -> PathBuf {
        self.data_dir.join("input_image").join("input_image.jpg")
    }

    /// Directory holding the reference gallery.
    pub fn gallery_dir(&self) -> PathBuf {
        self.data_dir.join("verification_images")
    }
}

fn parse_var<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    let raw = lookup(key)?;
    match raw.trim().parse() {
        Ok(v) => Some(v),
        Err(_) => {
            tracing::warn!(key, value = %raw, "ignoring unparsable environment override");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use faceid_hw::Roi;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let c = Config::default();
        assert_eq!((c.camera_index, c.camera_device.as_deref()), (0, None));
        assert_eq!(
            c.input_image_path(),
            PathBuf::from("application_data/input_image/input_image.jpg")
        );
        assert_eq!(
            c.gallery_dir(),
            PathBuf::from("application_data/verification_images")
        );
        assert_eq!(c.geometry.roi, Roi::new(200, 50, 250, 250));
        assert!(c.validate().is_ok());
    }

    #[test]
    fn test_toml_partial_override() {
        let c = Config::from_toml_str(
            r#"
            camera_index = 2
            model_layout = "nchw"

            [thresholds]
            detection = 0.6

            [geometry.roi]
            x = 100
            y = 20
            width = 200
            height = 200
            "#,
        )
        .unwrap();
        assert_eq!(c.camera_index, 2);
        assert_eq!(c.model_layout, TensorLayout::Nchw);
        assert_eq!(c.thresholds.detection, 0.6);
        assert_eq!(c.thresholds.verification, 0.5);
        assert_eq!(c.geometry.frame_width, 640);
        assert_eq!(c.geometry.roi, Roi::new(100, 20, 200, 200));
    }

    #[test]
    fn test_toml_rejects_garbage() {
        assert!(matches!(
            Config::from_toml_str("camera_index = \"front\""),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_env_overrides() {
        let mut c = Config::default();
        c.apply_overrides(lookup(&[
            ("FACEID_CAMERA_DEVICE", "/dev/video9"),
            ("FACEID_DATA_DIR", "/srv/faceid"),
            ("FACEID_VERIFICATION_THRESHOLD", "0.8"),
            ("FACEID_WARMUP_FRAMES", "not-a-number"),
        ]));
        assert_eq!(c.camera_device.as_deref(), Some("/dev/video9"));
        assert_eq!(c.gallery_dir(), PathBuf::from("/srv/faceid/verification_images"));
        assert_eq!(c.thresholds.verification, 0.8);
        assert_eq!(c.warmup_frames, 4);
    }

    #[test]
    fn test_validate_rejects_bad_threshold() {
        let mut c = Config::default();
        c.thresholds.detection = 1.2;
        assert!(matches!(c.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_validate_rejects_preview_roi() {
        // A y offset of 120 overruns the 360-row capture.
        let mut c = Config::default();
        c.geometry.roi = Roi::new(200, 120, 250, 250);
        assert!(matches!(c.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_validate_rejects_zero_fps() {
        let mut c = Config::default();
        c.preview_fps = 0;
        assert!(c.validate().is_err());
    }

    #[test]
    fn test_load_missing_file() {
        let err = Config::load(Some(Path::new("/nonexistent/faceid.toml"))).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }
}
