//! The kiln database remembers dependencies discovered while running recipes
//! ("postreqs"), so the next process can tell a target is stale without
//! running its recipe again.
//!
//! The record is advisory: if it is missing or unreadable the build starts
//! from an empty one and still produces correct results.

use crate::error::{Error, Result};
use crate::path::{Path, Roots};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use tracing::{debug, warn};

/// Location of the record, relative to the build root.
pub const DB_PATH: &str = ".kiln/postreqs.json";

const VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostreqDb {
    version: u32,
    /// Target (relative build path) to the absolute paths its recipe used.
    targets: BTreeMap<String, BTreeSet<PathBuf>>,
}

impl Default for PostreqDb {
    fn default() -> Self {
        PostreqDb {
            version: VERSION,
            targets: BTreeMap::new(),
        }
    }
}

impl PostreqDb {
    pub fn path(roots: &Roots) -> PathBuf {
        Path::build(DB_PATH).abs(roots)
    }

    /// Read the record at `path`, or start empty.
    pub async fn load(path: &std::path::Path) -> Self {
        let bytes = match tokio::fs::read(path).await {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "no previous build record");
                return Self::default();
            }
            Err(err) => {
                warn!(path = %path.display(), %err, "ignoring unreadable build record");
                return Self::default();
            }
        };
        match serde_json::from_slice::<PostreqDb>(&bytes) {
            Ok(db) if db.version == VERSION => db,
            Ok(db) => {
                warn!(version = db.version, "ignoring build record from another version");
                Self::default()
            }
            Err(err) => {
                warn!(path = %path.display(), %err, "ignoring corrupt build record");
                Self::default()
            }
        }
    }

    /// Write the record, creating its directory first.  Goes through a
    /// temporary file so readers never see a partial record.
    pub async fn save(&self, path: &std::path::Path) -> Result<()> {
        let io_err = |source| Error::Io {
            path: path.to_path_buf(),
            source,
        };
        if let Some(dir) = path.parent() {
            tokio::fs::create_dir_all(dir).await.map_err(io_err)?;
        }
        let json = serde_json::to_vec_pretty(self).map_err(|source| Error::Db {
            path: path.to_path_buf(),
            source,
        })?;
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, json).await.map_err(io_err)?;
        tokio::fs::rename(&tmp, path).await.map_err(io_err)?;
        Ok(())
    }

    pub fn postreqs(&self, target: &str) -> Option<&BTreeSet<PathBuf>> {
        self.targets.get(target)
    }

    /// Replace what is known about `target`.
    pub fn set(&mut self, target: String, postreqs: BTreeSet<PathBuf>) {
        self.targets.insert(target, postreqs);
    }

    /// Fold in freshly discovered postreqs; they win over older entries.
    pub fn merge(&mut self, fresh: impl IntoIterator<Item = (String, BTreeSet<PathBuf>)>) {
        for (target, postreqs) in fresh {
            self.set(target, postreqs);
        }
    }

    pub fn len(&self) -> usize {
        self.targets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }
}
