/// File and path helpers.
///
/// These are best-effort: failures are logged and reported through the
/// return value instead of an error.

use std::fs::{self, OpenOptions};
use std::path::Path;

pub const PATH_SEP: char = '/';

/// Read a UTF-8 text file. `None` if the path is not a readable text file.
pub fn get_file_contents(path: impl AsRef<Path>) -> Option<String> {
    let path = path.as_ref();
    if !path.is_file() {
        return None;
    }
    match fs::read_to_string(path) {
        Ok(contents) => Some(contents),
        Err(e) => {
            log::warn!("Failed to read {}: {}", path.display(), e);
            None
        }
    }
}

/// Read a file as raw bytes. `None` if the path is not a readable file.
pub fn get_file_bytes(path: impl AsRef<Path>) -> Option<Vec<u8>> {
    let path = path.as_ref();
    if !path.is_file() {
        return None;
    }
    match fs::read(path) {
        Ok(contents) => Some(contents),
        Err(e) => {
            log::warn!("Failed to read {}: {}", path.display(), e);
            None
        }
    }
}

/// Write `data` to `path`, replacing any existing content.
pub fn write_file(path: impl AsRef<Path>, data: impl AsRef<[u8]>) -> bool {
    let path = path.as_ref();
    match fs::write(path, data) {
        Ok(()) => true,
        Err(e) => {
            log::warn!("Failed to write {}: {}", path.display(), e);
            false
        }
    }
}

/// Truncate `path` to zero length, then unlink it.
///
/// Returns true when the file no longer exists afterwards.
pub fn delete_file(path: impl AsRef<Path>) -> bool {
    let path = path.as_ref();
    if let Err(e) = OpenOptions::new().write(true).truncate(true).open(path) {
        log::warn!("Failed to truncate {}: {}", path.display(), e);
    }
    if let Err(e) = fs::remove_file(path) {
        log::debug!("Failed to unlink {}: {}", path.display(), e);
    }
    !path.is_file()
}

/// Split a request path into its components.
///
/// `/action/param1/param2/` becomes `["action", "param1", "param2"]`.
/// Query strings are not handled.
pub fn uri_to_list(path: &str) -> Vec<String> {
    let path = path.strip_prefix(PATH_SEP).unwrap_or(path);
    let path = path.strip_suffix(PATH_SEP).unwrap_or(path);
    path.split(PATH_SEP).map(str::to_string).collect()
}
