//! Support code for e2e tests, which drive a Registry against a temp
//! directory.

mod basic;
mod concurrency;

use kiln::{Config, Path, RecipeArgs, Registry, Rule};
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

/// Manages a temporary directory holding a source tree and a build tree.
pub struct TestSpace {
    dir: tempfile::TempDir,
}

impl TestSpace {
    pub fn new() -> anyhow::Result<Self> {
        let dir = tempfile::tempdir()?;
        std::fs::create_dir(dir.path().join("src"))?;
        Ok(TestSpace { dir })
    }

    pub fn src_root(&self) -> PathBuf {
        self.dir.path().join("src")
    }

    pub fn build_root(&self) -> PathBuf {
        self.dir.path().join("build")
    }

    /// A fresh registry over this space, as a new process would create.
    pub fn registry(&self) -> anyhow::Result<Registry> {
        Ok(Registry::new(
            Config::new()
                .src_root(self.src_root())
                .build_root(self.build_root()),
        )?)
    }

    /// Write a file into the source tree.
    pub fn write(&self, path: &str, content: &str) -> std::io::Result<()> {
        let path = self.src_root().join(path);
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)?;
        }
        std::fs::write(path, content)
    }

    /// Read a file from the build tree.
    pub fn read_built(&self, path: &str) -> std::io::Result<String> {
        std::fs::read_to_string(self.build_root().join(path))
    }

    pub fn remove(&self, path: &str) -> std::io::Result<()> {
        std::fs::remove_file(self.src_root().join(path))
    }

    /// Set every file in both trees to two minutes ago.  With `touch`, this
    /// orders mtimes regardless of the filesystem's timestamp granularity.
    pub fn backdate(&self) -> std::io::Result<()> {
        let past = SystemTime::now() - Duration::from_secs(120);
        set_tree_mtime(&self.src_root(), past)?;
        set_tree_mtime(&self.build_root(), past)
    }

    /// Set a source file to one minute ago: newer than anything backdated,
    /// older than anything rebuilt from now on.
    pub fn touch(&self, path: &str) -> std::io::Result<()> {
        let recent = SystemTime::now() - Duration::from_secs(60);
        filetime::set_file_mtime(
            self.src_root().join(path),
            filetime::FileTime::from_system_time(recent),
        )
    }

    /// Persist the temp dir locally and abort the test.  Debugging helper.
    #[allow(dead_code)]
    pub fn eject(self) -> ! {
        panic!("ejected at {:?}", self.dir.into_path());
    }
}

fn set_tree_mtime(dir: &std::path::Path, mtime: SystemTime) -> std::io::Result<()> {
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        if entry.file_type()?.is_dir() {
            set_tree_mtime(&entry.path(), mtime)?;
        } else {
            filetime::set_file_mtime(entry.path(), filetime::FileTime::from_system_time(mtime))?;
        }
    }
    Ok(())
}

/// Counts how many times a recipe ran.
#[derive(Clone, Default)]
pub struct Counter(Arc<AtomicUsize>);

impl Counter {
    pub fn bump(&self) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }

    pub fn get(&self) -> usize {
        self.0.load(Ordering::SeqCst)
    }
}

/// Concatenate the rule's sources into each of its targets.  Build-kind
/// sources without a file (groups) contribute nothing.
pub fn concat(args: &RecipeArgs) -> anyhow::Result<()> {
    let mut content = String::new();
    for src in args.sources().iter() {
        match std::fs::read_to_string(src) {
            Ok(text) => content.push_str(&text),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => return Err(err.into()),
        }
    }
    for target in args.targets().iter() {
        std::fs::write(target, &content)?;
    }
    Ok(())
}

/// A rule whose recipe concatenates its sources, counted by `counter`.
pub fn concat_rule(target: &str, prereqs: Vec<Path>, counter: &Counter) -> Rule {
    let counter = counter.clone();
    Rule::new(target)
        .with_prereqs(prereqs)
        .with_recipe_fn(move |args: RecipeArgs| {
            let counter = counter.clone();
            async move {
                counter.bump();
                concat(&args)
            }
        })
}

pub fn src(path: &str) -> Path {
    Path::src(path)
}

pub fn built(path: &str) -> Path {
    Path::build(path).into_path()
}
