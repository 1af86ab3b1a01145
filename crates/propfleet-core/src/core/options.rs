use crate::engine::error::EngineError;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Estimation options passed through to the engine untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestOptions(serde_json::Value);

impl Default for RequestOptions {
    fn default() -> Self {
        Self(serde_json::Value::Object(serde_json::Map::new()))
    }
}

impl RequestOptions {
    pub fn new(value: serde_json::Value) -> Self {
        Self(value)
    }

    pub fn as_value(&self) -> &serde_json::Value {
        &self.0
    }

    pub fn from_json(path: &Path) -> Result<Self, EngineError> {
        if !path.exists() {
            return Err(EngineError::MissingInput {
                path: path.to_path_buf(),
            });
        }
        let content = std::fs::read_to_string(path).map_err(|e| EngineError::io(path, e))?;
        let value = serde_json::from_str(&content).map_err(|e| {
            EngineError::serialization(format!("request options '{}'", path.display()), e)
        })?;
        Ok(Self(value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn options_are_preserved_verbatim() {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, r#"{{"calculation_schemas": {{"Density": {{"SimulationLayer": {{}}}}}}}}"#).unwrap();

        let options = RequestOptions::from_json(file.path()).unwrap();

        assert!(options.as_value()["calculation_schemas"]["Density"].is_object());
    }

    #[test]
    fn missing_options_file_is_reported() {
        let err = RequestOptions::from_json(Path::new("/definitely/not/here.json")).unwrap_err();
        assert!(matches!(err, EngineError::MissingInput { .. }));
    }
}
