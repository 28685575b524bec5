//! Project-relative paths.
//!
//! A path is a list of components relative to one of two roots: the read-only
//! source tree or the writable build tree.  Paths never hold an absolute root
//! themselves, so the same graph can be resolved against different roots.

use crate::error::{Error, Result};
use crate::shape::{IntoShape, Shape};
use std::fmt;
use std::path::PathBuf;

#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub enum PathKind {
    Src,
    Build,
}

impl PathKind {
    fn as_str(self) -> &'static str {
        match self {
            PathKind::Src => "src",
            PathKind::Build => "build",
        }
    }
}

/// Lexically normalize `path` onto `out`, dropping empty and "." components.
/// A ".." pops the previous component; popping past the root is a no-op.
fn push_components(out: &mut Vec<String>, path: &str) {
    for piece in path.split('/') {
        match piece {
            "" | "." => {}
            ".." => {
                out.pop();
            }
            _ => out.push(piece.to_string()),
        }
    }
}

/// Absolute roots that paths are resolved against.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Roots {
    pub src: PathBuf,
    pub build: PathBuf,
}

impl Roots {
    pub fn new(src: impl Into<PathBuf>, build: impl Into<PathBuf>) -> Self {
        Roots {
            src: src.into(),
            build: build.into(),
        }
    }

    pub fn root(&self, kind: PathKind) -> &std::path::Path {
        match kind {
            PathKind::Src => &self.src,
            PathKind::Build => &self.build,
        }
    }
}

/// Options for `Path::derive`.  Unset fields keep the origin's value.
#[derive(Debug, Clone, Default)]
pub struct DeriveOpts {
    /// Replacement directory, relative to the build root.
    pub dir: Option<String>,
    /// Replacement extension; a leading '.' is added when missing.
    pub ext: Option<String>,
    /// Segment(s) prepended to the directory.
    pub namespace: Option<String>,
}

impl DeriveOpts {
    pub fn ext(ext: impl Into<String>) -> Self {
        DeriveOpts {
            ext: Some(ext.into()),
            ..Default::default()
        }
    }

    pub fn dir(dir: impl Into<String>) -> Self {
        DeriveOpts {
            dir: Some(dir.into()),
            ..Default::default()
        }
    }

    pub fn namespace(namespace: impl Into<String>) -> Self {
        DeriveOpts {
            namespace: Some(namespace.into()),
            ..Default::default()
        }
    }

    pub fn with_ext(mut self, ext: impl Into<String>) -> Self {
        self.ext = Some(ext.into());
        self
    }
}

#[derive(Debug, Clone, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct Path {
    kind: PathKind,
    components: Vec<String>,
}

impl Path {
    fn new(kind: PathKind, path: &str) -> Self {
        let mut components = Vec::new();
        push_components(&mut components, path);
        Path { kind, components }
    }

    /// A path in the source tree.
    pub fn src(path: &str) -> Self {
        Path::new(PathKind::Src, path)
    }

    /// A path in the build tree.
    pub fn build(path: &str) -> BuildPath {
        BuildPath(Path::new(PathKind::Build, path))
    }

    pub fn kind(&self) -> PathKind {
        self.kind
    }

    pub fn is_build(&self) -> bool {
        self.kind == PathKind::Build
    }

    pub fn to_build(&self) -> Option<BuildPath> {
        if self.is_build() {
            Some(BuildPath(self.clone()))
        } else {
            None
        }
    }

    pub fn components(&self) -> &[String] {
        &self.components
    }

    /// The containing directory; the root's directory is the root.
    pub fn dir(&self) -> Path {
        let mut components = self.components.clone();
        components.pop();
        Path {
            kind: self.kind,
            components,
        }
    }

    pub fn basename(&self) -> &str {
        self.components.last().map(String::as_str).unwrap_or("")
    }

    /// Extension of the basename including the leading '.', or "" if none.
    /// A leading '.' alone (".profile") does not start an extension.
    pub fn extname(&self) -> &str {
        let base = self.basename();
        match base.rfind('.') {
            None | Some(0) => "",
            Some(idx) => &base[idx..],
        }
    }

    /// Basename without its extension.
    pub fn stem(&self) -> &str {
        let base = self.basename();
        &base[..base.len() - self.extname().len()]
    }

    pub fn join<I, S>(&self, pieces: I) -> Path
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut components = self.components.clone();
        for piece in pieces {
            push_components(&mut components, piece.as_ref());
        }
        Path {
            kind: self.kind,
            components,
        }
    }

    /// The path relative to its root, '/'-separated.
    pub fn rel(&self) -> String {
        self.components.join("/")
    }

    pub fn abs(&self, roots: &Roots) -> PathBuf {
        self.abs_in(roots.root(self.kind))
    }

    /// Resolve against a single explicit root.
    pub fn abs_in(&self, root: &std::path::Path) -> PathBuf {
        let mut abs = root.to_path_buf();
        abs.extend(&self.components);
        abs
    }

    /// Generate a build path from this one, keeping the directory and stem
    /// unless `opts` replaces them.
    pub fn derive(&self, opts: &DeriveOpts) -> BuildPath {
        let mut components = Vec::new();
        if let Some(ns) = &opts.namespace {
            push_components(&mut components, ns);
        }
        match &opts.dir {
            Some(dir) => push_components(&mut components, dir),
            None => components.extend_from_slice(&self.dir().components),
        }

        let mut base = self.stem().to_string();
        match &opts.ext {
            Some(ext) if ext.is_empty() => {}
            Some(ext) => {
                if !ext.starts_with('.') {
                    base.push('.');
                }
                base.push_str(ext);
            }
            None => base.push_str(self.extname()),
        }
        push_components(&mut components, &base);

        BuildPath(Path {
            kind: PathKind::Build,
            components,
        })
    }
}

impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "@{}", self.kind.as_str())?;
        for c in &self.components {
            write!(f, "/{}", c)?;
        }
        Ok(())
    }
}

/// Plain strings name source paths.
impl From<&str> for Path {
    fn from(path: &str) -> Self {
        Path::src(path)
    }
}

impl From<String> for Path {
    fn from(path: String) -> Self {
        Path::src(&path)
    }
}

impl From<&Path> for Path {
    fn from(path: &Path) -> Self {
        path.clone()
    }
}

/// A path known to be in the build tree; the only kind a rule may produce.
#[derive(Debug, Clone, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct BuildPath(Path);

impl BuildPath {
    pub fn new(path: &str) -> Self {
        Path::build(path)
    }

    pub fn as_path(&self) -> &Path {
        &self.0
    }

    pub fn into_path(self) -> Path {
        self.0
    }

    pub fn dir(&self) -> BuildPath {
        BuildPath(self.0.dir())
    }

    pub fn join<I, S>(&self, pieces: I) -> BuildPath
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        BuildPath(self.0.join(pieces))
    }
}

impl std::ops::Deref for BuildPath {
    type Target = Path;

    fn deref(&self) -> &Path {
        &self.0
    }
}

impl fmt::Display for BuildPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl TryFrom<Path> for BuildPath {
    type Error = Error;

    fn try_from(path: Path) -> Result<Self> {
        if path.is_build() {
            Ok(BuildPath(path))
        } else {
            Err(Error::SourceAsBuildPath { path: path.rel() })
        }
    }
}

impl From<&str> for BuildPath {
    fn from(path: &str) -> Self {
        Path::build(path)
    }
}

impl From<String> for BuildPath {
    fn from(path: String) -> Self {
        Path::build(&path)
    }
}

impl From<&BuildPath> for BuildPath {
    fn from(path: &BuildPath) -> Self {
        path.clone()
    }
}

impl From<BuildPath> for Path {
    fn from(path: BuildPath) -> Self {
        path.0
    }
}

impl From<&BuildPath> for Path {
    fn from(path: &BuildPath) -> Self {
        path.0.clone()
    }
}

macro_rules! scalar_shape {
    ($target:ty: $($src:ty),*) => {
        $(
            impl IntoShape<$target> for $src {
                fn into_shape(self) -> Shape<$target> {
                    Shape::Scalar(self.into())
                }
            }
        )*
    };
}

scalar_shape!(Path: &str, String, Path, &Path, BuildPath, &BuildPath);
scalar_shape!(BuildPath: &str, String, BuildPath, &BuildPath);
