use std::fs::{OpenOptions, create_dir_all};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

/// Write `data` next to `path` and rename it into place once fully synced.
///
/// Readers either see the previous file or the complete new one.
pub fn write_bytes_atomic(path: &Path, data: &[u8]) -> Result<u64> {
    ensure_parent(path)?;

    let tmp_path = temp_path_for(path)?;
    let outcome = (|| -> io::Result<()> {
        let mut file = OpenOptions::new()
            .create(true)
            .truncate(true)
            .write(true)
            .open(&tmp_path)?;
        file.write_all(data)?;
        file.sync_all()?;
        std::fs::rename(&tmp_path, path)?;
        sync_parent(path)
    })();

    if let Err(err) = outcome {
        discard_temp(&tmp_path);
        return Err(Error::Io(err));
    }

    Ok(data.len() as u64)
}

/// Hidden sibling path used while a file is being produced.
pub fn temp_path_for(path: &Path) -> Result<PathBuf> {
    let file_name = path.file_name().ok_or_else(|| {
        Error::Io(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("invalid path for atomic write: {}", path.display()),
        ))
    })?;
    let tmp_name = format!(".{}.tmp", file_name.to_string_lossy());
    Ok(path.with_file_name(tmp_name))
}

/// Best-effort removal of a temporary file that will never be promoted.
pub fn discard_temp(tmp_path: &Path) {
    if tmp_path.exists() {
        let _ = std::fs::remove_file(tmp_path);
    }
}

pub(crate) fn ensure_parent(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            create_dir_all(parent)?;
        }
    }
    Ok(())
}

fn sync_parent(path: &Path) -> io::Result<()> {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => {
            OpenOptions::new().read(true).open(parent)?.sync_all()
        }
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn replaces_existing_file_and_leaves_no_temp() {
        let dir = std::env::temp_dir().join(format!("devseed_atomic_{}", std::process::id()));
        let path = dir.join("nested").join("default.json");

        write_bytes_atomic(&path, b"[1]").expect("first write");
        write_bytes_atomic(&path, b"[2]").expect("second write");

        assert_eq!(std::fs::read(&path).expect("read back"), b"[2]");
        assert!(!temp_path_for(&path).expect("temp path").exists());
        let _ = std::fs::remove_dir_all(&dir);
    }
}
