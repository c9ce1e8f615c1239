//! Collecting `.proto` sources and descriptor sets from directory trees,
//! loose files and ZIP/JAR archives.

use crate::{
    error::{PmpError, Result},
    tempspace::TempSpace,
    utils::{self, ARCHIVE_EXTENSIONS},
};
use rayon::prelude::*;
use sha1::{Digest as _, Sha1};
use std::{
    collections::HashSet,
    fs,
    io,
    path::{Path, PathBuf},
    time::{Duration, SystemTime, UNIX_EPOCH},
};

pub mod filter;
pub use filter::{GlobFilter, ProtoFileFilter, SourceFilter};

/// The files collected under one root.
///
/// Two listings are equal iff their roots and file sets are equal as ordered
/// sequences.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct SourceListing {
    pub root: PathBuf,
    pub protos: Vec<PathBuf>,
    pub descriptors: Vec<PathBuf>,
}

impl SourceListing {
    pub fn is_empty(&self) -> bool {
        self.protos.is_empty() && self.descriptors.is_empty()
    }

    /// All files of the listing, protos first.
    pub fn files(&self) -> impl Iterator<Item = &PathBuf> {
        self.protos.iter().chain(self.descriptors.iter())
    }
}

/// The complete input set of one generation, grouped by how the files take
/// part in the compilation.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ProjectInputListing {
    /// Sources passed to the compiler for code generation.
    pub compilable_sources: Vec<SourceListing>,
    /// Descriptor sets passed to the compiler alongside the sources.
    pub compilable_descriptors: Vec<SourceListing>,
    /// Sources that only participate in import resolution.
    pub dependency_sources: Vec<SourceListing>,
}

impl ProjectInputListing {
    /// Drops every file that already appeared earlier in the union of all
    /// listings, comparing normalised absolute paths. Listings that become
    /// empty disappear.
    pub fn deduplicated(self) -> Self {
        let mut seen = HashSet::new();
        Self {
            compilable_sources: dedupe_listings(self.compilable_sources, &mut seen),
            compilable_descriptors: dedupe_listings(self.compilable_descriptors, &mut seen),
            dependency_sources: dedupe_listings(self.dependency_sources, &mut seen),
        }
    }

    /// The `.proto` files that will be handed to the compiler, in listing
    /// order.
    pub fn proto_sources(&self) -> impl Iterator<Item = &PathBuf> {
        self.compilable_sources.iter().flat_map(|listing| listing.protos.iter())
    }

    /// Descriptor set files that take part in the compilation.
    pub fn descriptor_files(&self) -> impl Iterator<Item = &PathBuf> {
        self.compilable_descriptors.iter().flat_map(|listing| listing.descriptors.iter())
    }

    /// Roots the compiler should resolve imports under: compilable roots
    /// first, then dependency roots, deduplicated.
    pub fn import_roots(&self) -> Vec<PathBuf> {
        let mut seen = HashSet::new();
        self.compilable_sources
            .iter()
            .chain(self.dependency_sources.iter())
            .map(|listing| listing.root.clone())
            .filter(|root| seen.insert(root.clone()))
            .collect()
    }

    pub fn has_compilable_sources(&self) -> bool {
        self.proto_sources().next().is_some() || self.descriptor_files().next().is_some()
    }
}

fn dedupe_listings(
    listings: Vec<SourceListing>,
    seen: &mut HashSet<PathBuf>,
) -> Vec<SourceListing> {
    listings
        .into_iter()
        .map(|listing| SourceListing {
            root: listing.root,
            protos: listing
                .protos
                .into_iter()
                .filter(|path| seen.insert(utils::canonicalized(path)))
                .collect(),
            descriptors: listing
                .descriptors
                .into_iter()
                .filter(|path| seen.insert(utils::canonicalized(path)))
                .collect(),
        })
        .filter(|listing| !listing.is_empty())
        .collect()
}

/// Walks roots and archives in parallel and produces ordered listings.
pub struct SourceAggregator<'a> {
    space: &'a TempSpace,
    pool: &'a rayon::ThreadPool,
}

impl<'a> SourceAggregator<'a> {
    pub fn new(space: &'a TempSpace, pool: &'a rayon::ThreadPool) -> Self {
        Self { space, pool }
    }

    /// Collects one listing per root that yields at least one match.
    ///
    /// Roots are processed as independent tasks on the worker pool; the
    /// result order is the request order regardless of completion order.
    /// Individual task failures are aggregated into a single error with the
    /// first cause as primary.
    pub fn collect_proto_listings<F>(
        &self,
        roots: &[PathBuf],
        filter: &F,
    ) -> Result<Vec<SourceListing>>
    where
        F: SourceFilter + Sync,
    {
        // identical roots would otherwise race on the same extraction target
        let mut seen_roots = HashSet::new();
        let roots: Vec<&PathBuf> =
            roots.iter().filter(|root| seen_roots.insert(utils::canonicalized(root))).collect();

        let outcomes: Vec<Result<Option<SourceListing>>> = self
            .pool
            .install(|| roots.par_iter().map(|root| self.collect_root(root, filter)).collect());

        let mut listings = Vec::new();
        let mut errors = Vec::new();
        for outcome in outcomes {
            match outcome {
                Ok(Some(listing)) => listings.push(listing),
                Ok(None) => {}
                Err(err) => errors.push(err),
            }
        }
        if !errors.is_empty() {
            return Err(PmpError::aggregate(errors));
        }
        Ok(dedupe_listings(listings, &mut HashSet::new()))
    }

    /// Wraps loose descriptor-set files into listings. Missing paths are
    /// excluded rather than failing the build.
    pub fn collect_descriptor_listings(&self, paths: &[PathBuf]) -> Vec<SourceListing> {
        paths
            .iter()
            .filter_map(|path| {
                if !path.is_file() {
                    debug!(path = %path.display(), "descriptor file does not exist, excluding");
                    return None;
                }
                let path = utils::canonicalized(path);
                let root =
                    path.parent().map(Path::to_path_buf).unwrap_or_else(|| path.clone());
                Some(SourceListing { root, protos: Vec::new(), descriptors: vec![path] })
            })
            .collect()
    }

    fn collect_root<F>(&self, root: &Path, filter: &F) -> Result<Option<SourceListing>>
    where
        F: SourceFilter + Sync,
    {
        if !root.exists() {
            debug!(root = %root.display(), "input root does not exist, excluding");
            return Ok(None);
        }
        if root.is_file() && utils::has_extension(root, ARCHIVE_EXTENSIONS) {
            return self.extract_archive(root, filter);
        }

        let root = utils::canonicalized(root);
        // a loose file is listed under its parent so that the root stays a
        // valid import directory
        let listing_root = if root.is_file() {
            root.parent().map(Path::to_path_buf).unwrap_or_else(|| root.clone())
        } else {
            root.clone()
        };
        let protos: Vec<PathBuf> = utils::files_iter(&root)
            .filter(|path| filter.is_match(&listing_root, path))
            .map(utils::canonicalized)
            .collect();
        trace!(root = %listing_root.display(), files = protos.len(), "walked source root");
        if protos.is_empty() {
            return Ok(None);
        }
        Ok(Some(SourceListing { root: listing_root, protos, descriptors: Vec::new() }))
    }

    /// Opens `archive` as a virtual file system and copies every matching
    /// entry below a stable extraction root, preserving relative paths and
    /// modification times.
    fn extract_archive<F>(&self, archive: &Path, filter: &F) -> Result<Option<SourceListing>>
    where
        F: SourceFilter + Sync,
    {
        let archive = utils::canonicalized(archive);
        let file = fs::File::open(&archive).map_err(|err| PmpError::io(err, &archive))?;
        let mut zip = match zip::ZipArchive::new(file) {
            Ok(zip) => zip,
            Err(err) => {
                // not a defect of the build definition, the root is skipped
                warn!(
                    error = %PmpError::NotAnArchive(archive.clone()),
                    cause = %err,
                    "skipping unreadable archive root"
                );
                return Ok(None);
            }
        };

        let target_root = self.extraction_root(&archive)?;
        let mut names: Vec<String> = zip.file_names().map(str::to_string).collect();
        names.sort();

        let mut protos = Vec::new();
        for name in names {
            let mut entry = zip
                .by_name(&name)
                .map_err(|err| PmpError::msg(format!("{}: {err}", archive.display())))?;
            if entry.is_dir() {
                continue;
            }
            let Some(relative) = entry.enclosed_name() else {
                warn!(name = %name, archive = %archive.display(), "skipping unsafe archive entry");
                continue;
            };
            let target = target_root.join(&relative);
            if !filter.is_match(&target_root, &target) {
                continue;
            }
            if !target.is_file() {
                utils::create_parent_dir_all(&target)?;
                let mut out =
                    fs::File::create(&target).map_err(|err| PmpError::io(err, &target))?;
                io::copy(&mut entry, &mut out).map_err(|err| PmpError::io(err, &target))?;
                if let Some(mtime) = entry.last_modified().and_then(entry_mtime) {
                    out.set_modified(mtime).map_err(|err| PmpError::io(err, &target))?;
                }
            }
            protos.push(target);
        }

        trace!(
            archive = %archive.display(),
            root = %target_root.display(),
            files = protos.len(),
            "extracted archive"
        );
        if protos.is_empty() {
            return Ok(None);
        }
        Ok(Some(SourceListing { root: target_root, protos, descriptors: Vec::new() }))
    }

    /// `<temp>/archives/<basename>-<sha1(absolute path)>`: deterministic per
    /// archive location, disjoint between distinct archives with the same
    /// file name.
    fn extraction_root(&self, archive: &Path) -> Result<PathBuf> {
        let stem = archive
            .file_stem()
            .and_then(|stem| stem.to_str())
            .unwrap_or("archive");
        let hash = hex::encode(Sha1::digest(archive.to_string_lossy().as_bytes()));
        self.space.dir(format!("archives/{stem}-{hash}"))
    }
}

/// Converts an archive entry timestamp to wall-clock time.
fn entry_mtime(dt: zip::DateTime) -> Option<SystemTime> {
    let days = days_from_civil(i64::from(dt.year()), u32::from(dt.month()), u32::from(dt.day()));
    let seconds = days * 86_400
        + i64::from(dt.hour()) * 3_600
        + i64::from(dt.minute()) * 60
        + i64::from(dt.second());
    if seconds < 0 {
        return None;
    }
    Some(UNIX_EPOCH + Duration::from_secs(seconds as u64))
}

// Howard Hinnant's civil-days algorithm.
fn days_from_civil(year: i64, month: u32, day: u32) -> i64 {
    let year = if month <= 2 { year - 1 } else { year };
    let era = if year >= 0 { year } else { year - 399 } / 400;
    let yoe = year - era * 400;
    let doy = i64::from((153 * (if month > 2 { month - 3 } else { month + 9 }) + 2) / 5 + day - 1);
    let doe = yoe * 365 + yoe / 4 - yoe / 100 + doy;
    era * 146_097 + doe - 719_468
}
