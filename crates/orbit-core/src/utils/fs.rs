use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;

use crate::plugin_system::error::PluginSystemError;

/// Directory entries the plugin scanner skips: hidden (`.`) and disabled (`-`).
pub fn is_ignored_entry(name: &str) -> bool {
    name.starts_with('.') || name.starts_with('-')
}

/// Parse a links file: one directory per line, lines starting with `#` are
/// comments, blank lines are ignored. Relative entries are resolved against `base`.
pub fn parse_links(text: &str, base: &Path) -> Vec<PathBuf> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(|line| {
            let path = Path::new(line);
            if path.is_absolute() {
                path.to_path_buf()
            } else {
                base.join(path)
            }
        })
        .collect()
}

/// Read and parse the links file at `path`. A missing file means no links.
pub async fn read_links(path: &Path, base: &Path) -> Result<Vec<PathBuf>, PluginSystemError> {
    match tokio::fs::read_to_string(path).await {
        Ok(text) => Ok(parse_links(&text, base)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
        Err(e) => Err(PluginSystemError::io(e, "read_links", path)),
    }
}

/// Copy `source` into `target` recursively, creating `target`.
pub async fn copy_dir_recursive(source: &Path, target: &Path) -> Result<(), PluginSystemError> {
    copy_dir_boxed(source.to_path_buf(), target.to_path_buf()).await
}

/// Helper function that returns a boxed future for recursive copying
fn copy_dir_boxed(
    source: PathBuf,
    target: PathBuf,
) -> Pin<Box<dyn Future<Output = Result<(), PluginSystemError>> + Send>> {
    Box::pin(async move {
        tokio::fs::create_dir_all(&target)
            .await
            .map_err(|e| PluginSystemError::io(e, "create_dir_all", &target))?;
        let mut entries = tokio::fs::read_dir(&source)
            .await
            .map_err(|e| PluginSystemError::io(e, "read_dir", &source))?;

        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| PluginSystemError::io(e, "read_dir", &source))?
        {
            let from = entry.path();
            let to = target.join(entry.file_name());
            let file_type = entry
                .file_type()
                .await
                .map_err(|e| PluginSystemError::io(e, "file_type", &from))?;
            if file_type.is_dir() {
                copy_dir_boxed(from, to).await?;
            } else {
                tokio::fs::copy(&from, &to)
                    .await
                    .map_err(|e| PluginSystemError::io(e, "copy", &from))?;
            }
        }
        Ok(())
    })
}
