use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

/// A directory owned by one plugin, created the first time it is asked for.
#[derive(Debug)]
pub struct ScopedDir {
    path: PathBuf,
    created: AtomicBool,
}

impl ScopedDir {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            created: AtomicBool::new(false),
        }
    }

    /// The path, without touching the filesystem
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The path, creating the directory (and parents) on first use.
    pub fn ensure(&self) -> io::Result<&Path> {
        if !self.created.load(Ordering::Acquire) {
            std::fs::create_dir_all(&self.path)?;
            self.created.store(true, Ordering::Release);
            log::debug!("Created directory {}", self.path.display());
        }
        Ok(&self.path)
    }

    pub fn is_created(&self) -> bool {
        self.created.load(Ordering::Acquire)
    }
}
