//! Local filesystem helpers: filename sanitizing and moving finished files

use log::debug;
use std::path::Path;
use tokio::fs::{self, File};
use tokio::io::{AsyncReadExt, AsyncWriteExt};

/// Copy buffer size used when a rename crosses filesystems (1 MB)
const COPY_BUFFER_SIZE: usize = 1024 * 1024;

/// Replace characters that are not portable in local filenames.
pub fn sanitize_file_name(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| match c {
            '\\' | '/' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();
    let trimmed = cleaned.trim_end_matches(|c| c == '.' || c == ' ');
    if trimmed.is_empty() {
        "_".to_string()
    } else {
        trimmed.to_string()
    }
}

/// Length of an existing non-empty file, None otherwise
pub async fn existing_len(path: &Path) -> Option<u64> {
    match fs::metadata(path).await {
        Ok(meta) if meta.is_file() && meta.len() > 0 => Some(meta.len()),
        _ => None,
    }
}

/// Move `from` to `to`, falling back to copy + delete when a plain rename
/// is not possible. `on_progress` receives the copied fraction.
pub async fn move_file<F>(from: &Path, to: &Path, mut on_progress: F) -> Result<(), String>
where
    F: FnMut(f32),
{
    if let Some(parent) = to.parent() {
        fs::create_dir_all(parent)
            .await
            .map_err(|e| format!("Failed to create directory: {}", e))?;
    }

    if fs::rename(from, to).await.is_ok() {
        on_progress(1.0);
        return Ok(());
    }
    debug!("move: rename failed, copying {:?} -> {:?}", from, to);

    let total = fs::metadata(from)
        .await
        .map_err(|e| format!("Failed to stat {:?}: {}", from, e))?
        .len();
    let mut src = File::open(from)
        .await
        .map_err(|e| format!("Failed to open {:?}: {}", from, e))?;
    let mut dst = File::create(to)
        .await
        .map_err(|e| format!("Failed to create {:?}: {}", to, e))?;

    let mut buf = vec![0u8; COPY_BUFFER_SIZE];
    let mut copied: u64 = 0;
    loop {
        let n = src
            .read(&mut buf)
            .await
            .map_err(|e| format!("Failed to read {:?}: {}", from, e))?;
        if n == 0 {
            break;
        }
        dst.write_all(&buf[..n])
            .await
            .map_err(|e| format!("Failed to write {:?}: {}", to, e))?;
        copied += n as u64;
        if total > 0 {
            on_progress((copied as f64 / total as f64) as f32);
        }
    }
    dst.flush()
        .await
        .map_err(|e| format!("Failed to flush {:?}: {}", to, e))?;
    drop(src);

    fs::remove_file(from)
        .await
        .map_err(|e| format!("Failed to remove {:?}: {}", from, e))?;
    on_progress(1.0);
    Ok(())
}
