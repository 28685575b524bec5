//! Registry configuration.

use std::path::{Path, PathBuf};

/// Where the source and build trees live.  Relative roots are resolved
/// against the working directory when the registry is created.
#[derive(Debug, Clone)]
pub struct Config {
    pub src_root: PathBuf,
    pub build_root: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            src_root: PathBuf::from("."),
            build_root: PathBuf::from("build"),
        }
    }
}

impl Config {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn src_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.src_root = root.into();
        self
    }

    pub fn build_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.build_root = root.into();
        self
    }
}

/// Lexically absolutize `path` against `cwd`.  Does not touch the disk.
pub(crate) fn absolutize(cwd: &Path, path: &Path) -> PathBuf {
    use std::path::Component;

    let mut abs = PathBuf::new();
    for component in cwd.join(path).components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                abs.pop();
            }
            other => abs.push(other),
        }
    }
    abs
}
