use crate::engine::error::EngineError;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use tracing::debug;

/// File name of the serialized force-field bundle inside a force-field directory.
pub const FORCE_FIELD_FILE_NAME: &str = "force-field.json";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForceFieldFile {
    pub name: String,
    pub content: String,
}

/// A combined force field built from a main parameter file and a water model,
/// carried verbatim to the estimation engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForceFieldSource {
    pub files: Vec<ForceFieldFile>,
}

impl ForceFieldSource {
    pub fn from_paths(paths: &[&Path]) -> Result<Self, EngineError> {
        let mut files = Vec::with_capacity(paths.len());
        for path in paths {
            let content = std::fs::read_to_string(path).map_err(|e| EngineError::io(path, e))?;
            let name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| path.display().to_string());
            debug!(file = %name, bytes = content.len(), "Loaded force-field file.");
            files.push(ForceFieldFile { name, content });
        }
        Ok(Self { files })
    }

    pub fn from_json(path: &Path) -> Result<Self, EngineError> {
        let content = std::fs::read_to_string(path).map_err(|e| EngineError::io(path, e))?;
        serde_json::from_str(&content)
            .map_err(|e| EngineError::serialization(format!("force field '{}'", path.display()), e))
    }

    pub fn write_json(&self, path: &Path) -> Result<(), EngineError> {
        let content = serde_json::to_string_pretty(self)
            .map_err(|e| EngineError::serialization("force field", e))?;
        std::fs::write(path, content).map_err(|e| EngineError::io(path, e))
    }

    /// Stable digest of the bundled files, used as part of cache keys.
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        for file in &self.files {
            hasher.update(file.name.as_bytes());
            hasher.update([0u8]);
            hasher.update(file.content.as_bytes());
            hasher.update([0u8]);
        }
        hex::encode(hasher.finalize())
    }
}

/// Version tag of a force-field file: the last `-` separated token of its stem.
///
/// `openff-2.2.1.offxml` yields `2.2.1`; a stem without `-` is returned whole.
pub fn force_field_version(path: &Path) -> String {
    let stem = file_stem(path);
    match stem.rsplit_once('-') {
        Some((_, version)) => version.to_string(),
        None => stem,
    }
}

/// Name of the per-combination output directory, `<water stem>_<version>`.
pub fn force_field_directory_name(forcefield_path: &Path, water_path: &Path) -> String {
    format!("{}_{}", file_stem(water_path), force_field_version(forcefield_path))
}

/// Creates the force-field directory under `base` and writes the bundle into it.
pub fn prepare_force_field_directory(
    base: &Path,
    forcefield_path: &Path,
    water_path: &Path,
) -> Result<(PathBuf, ForceFieldSource), EngineError> {
    let directory = base.join(force_field_directory_name(forcefield_path, water_path));
    std::fs::create_dir_all(&directory).map_err(|e| EngineError::io(&directory, e))?;

    let source = ForceFieldSource::from_paths(&[forcefield_path, water_path])?;
    source.write_json(&directory.join(FORCE_FIELD_FILE_NAME))?;
    Ok((directory, source))
}

fn file_stem(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn version_is_last_dash_token_of_stem() {
        assert_eq!(force_field_version(Path::new("ff/openff-2.2.1.offxml")), "2.2.1");
        assert_eq!(force_field_version(Path::new("custom.offxml")), "custom");
    }

    #[test]
    fn directory_name_combines_water_stem_and_version() {
        let name = force_field_directory_name(
            Path::new("openff-2.1.0.offxml"),
            Path::new("/models/tip3p.offxml"),
        );
        assert_eq!(name, "tip3p_2.1.0");
    }

    #[test]
    fn prepare_writes_bundle_that_reads_back() {
        let dir = tempdir().unwrap();
        let ff = dir.path().join("openff-2.2.1.offxml");
        let water = dir.path().join("opc.offxml");
        std::fs::write(&ff, "<SMIRNOFF/>").unwrap();
        std::fs::write(&water, "<Water/>").unwrap();

        let (directory, source) = prepare_force_field_directory(dir.path(), &ff, &water).unwrap();

        assert_eq!(directory, dir.path().join("opc_2.2.1"));
        let loaded = ForceFieldSource::from_json(&directory.join(FORCE_FIELD_FILE_NAME)).unwrap();
        assert_eq!(loaded, source);
        assert_eq!(loaded.files.len(), 2);
        assert_eq!(loaded.files[1].content, "<Water/>");
    }

    #[test]
    fn fingerprint_changes_with_content() {
        let a = ForceFieldSource {
            files: vec![ForceFieldFile {
                name: "a".into(),
                content: "1".into(),
            }],
        };
        let mut b = a.clone();
        assert_eq!(a.fingerprint(), b.fingerprint());
        b.files[0].content = "2".into();
        assert_ne!(a.fingerprint(), b.fingerprint());
    }

    #[test]
    fn missing_force_field_file_reports_path() {
        let dir = tempdir().unwrap();
        let missing = dir.path().join("nope.offxml");
        let err = ForceFieldSource::from_paths(&[missing.as_path()]).unwrap_err();
        assert!(matches!(err, EngineError::Io { path, .. } if path == missing));
    }
}
