//! Local JSON state files: read if present, replace atomically.

use crate::errors::OpError;
use rand::{distributions::Alphanumeric, Rng};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

fn staging_path(path: &Path) -> PathBuf {
    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    let stem = path.file_name().and_then(|s| s.to_str()).unwrap_or("state");
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(8)
        .map(char::from)
        .collect();
    parent.join(format!(".{}.{}.tmp", stem, suffix))
}

fn replace_file(path: &Path, bytes: &[u8], mode: u32) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let staged = staging_path(path);
    let written = (|| {
        let mut file = fs::OpenOptions::new()
            .create_new(true)
            .write(true)
            .open(&staged)?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&staged, fs::Permissions::from_mode(mode))?;
        }
        #[cfg(not(unix))]
        let _ = mode;
        file.write_all(bytes)?;
        file.sync_all()?;
        fs::rename(&staged, path)
    })();
    if written.is_err() {
        let _ = fs::remove_file(&staged);
    }
    written
}

/// `Ok(None)` when the file does not exist.
pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, OpError> {
    let raw = match fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(err) => {
            return Err(OpError::internal(format!(
                "Failed to read {}: {}",
                path.display(),
                err
            )))
        }
    };
    serde_json::from_str(&raw)
        .map(Some)
        .map_err(|err| OpError::internal(format!("Failed to parse {}: {}", path.display(), err)))
}

/// Pretty-printed JSON, written to a sibling file and renamed over `path`,
/// so readers see either the previous document or the complete new one.
pub fn write_json<T: Serialize>(path: &Path, value: &T, mode: u32) -> Result<(), OpError> {
    let mut data = serde_json::to_vec_pretty(value)
        .map_err(|err| OpError::internal(format!("Failed to serialize {}: {}", path.display(), err)))?;
    data.push(b'\n');
    replace_file(path, &data, mode)
        .map_err(|err| OpError::internal(format!("Failed to save {}: {}", path.display(), err)))
}
