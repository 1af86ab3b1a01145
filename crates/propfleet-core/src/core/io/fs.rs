use crate::engine::error::EngineError;
use std::io::Write;
use std::path::{Path, PathBuf};

/// Writes `content` to a sibling temporary file and renames it over `path`, so
/// readers never observe a partially written file.
pub(crate) fn write_atomically(path: &Path, content: &[u8]) -> Result<(), EngineError> {
    let temp = temp_path(path);
    let mut file = std::fs::File::create(&temp).map_err(|e| EngineError::io(&temp, e))?;
    file.write_all(content)
        .and_then(|()| file.sync_all())
        .map_err(|e| EngineError::io(&temp, e))?;
    drop(file);
    std::fs::rename(&temp, path).map_err(|e| {
        let _ = std::fs::remove_file(&temp);
        EngineError::io(path, e)
    })
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}
