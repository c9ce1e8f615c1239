//! Predicates applied while collecting candidate source files.

use crate::error::{PmpError, Result};
use glob::Pattern;
use path_slash::PathExt;
use std::path::Path;

use crate::utils::{self, PROTO_EXTENSIONS};

/// A predicate over `(root, path)` pairs that decides whether a collected
/// file belongs to a listing.
pub trait SourceFilter {
    /// Returns whether `path`, found under `root`, should be kept.
    fn is_match(&self, root: &Path, path: &Path) -> bool;

    /// Short-circuit conjunction with `other`.
    fn and<F: SourceFilter>(self, other: F) -> And<Self, F>
    where
        Self: Sized,
    {
        And(self, other)
    }
}

impl<F: Fn(&Path, &Path) -> bool> SourceFilter for F {
    fn is_match(&self, root: &Path, path: &Path) -> bool {
        (self)(root, path)
    }
}

/// Conjunction of two filters; matches iff both match.
#[derive(Clone, Copy, Debug, Default)]
pub struct And<A, B>(A, B);

impl<A: SourceFilter, B: SourceFilter> SourceFilter for And<A, B> {
    fn is_match(&self, root: &Path, path: &Path) -> bool {
        self.0.is_match(root, path) && self.1.is_match(root, path)
    }
}

/// Keeps only files whose name ends in `.proto`, case-insensitively.
#[derive(Clone, Copy, Debug, Default)]
pub struct ProtoFileFilter;

impl SourceFilter for ProtoFileFilter {
    fn is_match(&self, _root: &Path, path: &Path) -> bool {
        utils::has_extension(path, PROTO_EXTENSIONS)
    }
}

/// User-supplied include/exclude globs, matched against the path relative to
/// the listing root.
///
/// A path is kept if the includes are empty or any include matches, and no
/// exclude matches.
#[derive(Clone, Debug, Default)]
pub struct GlobFilter {
    includes: Vec<Pattern>,
    excludes: Vec<Pattern>,
}

impl GlobFilter {
    pub fn new(includes: &[String], excludes: &[String]) -> Result<Self> {
        Ok(Self { includes: compile(includes)?, excludes: compile(excludes)? })
    }

    /// A filter that keeps everything.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.includes.is_empty() && self.excludes.is_empty()
    }
}

fn compile(globs: &[String]) -> Result<Vec<Pattern>> {
    globs
        .iter()
        .map(|glob| {
            Pattern::new(glob).map_err(|err| PmpError::msg(format!("invalid glob \"{glob}\": {err}")))
        })
        .collect()
}

impl SourceFilter for GlobFilter {
    fn is_match(&self, root: &Path, path: &Path) -> bool {
        let relative = crate::utils::strip_prefix(path, root).to_slash_lossy();
        let included = self.includes.is_empty()
            || self.includes.iter().any(|pattern| pattern.matches(&relative));
        included && !self.excludes.iter().any(|pattern| pattern.matches(&relative))
    }
}
