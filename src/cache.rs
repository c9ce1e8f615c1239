//! Input fingerprinting and the decision whether a build can be skipped.

use crate::{
    aggregate::ProjectInputListing,
    digest::DigestAlgorithm,
    error::{PmpError, Result},
    tempspace::TempSpace,
    utils,
};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::{
    collections::BTreeMap,
    fs,
    path::PathBuf,
};

/// Cache location segment; bumping it invalidates every cache written by
/// older releases.
const CACHE_FORMAT_VERSION: &str = "3.0";

const NEXT_FILE: &str = "next.json";
const PREVIOUS_FILE: &str = "previous.json";

/// What the current build has to do.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum BuildScope {
    /// Compile every source.
    All,
    /// Inputs are unchanged; skip the compiler entirely.
    None,
}

/// Digests of every input file of one build, keyed by canonical file URI.
///
/// Unknown top-level keys are ignored on read, so caches written under a
/// different schema deserialise to empty maps and force a full rebuild.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct IncrementalCache {
    #[serde(default)]
    pub proto_dependencies: BTreeMap<String, String>,
    #[serde(default)]
    pub proto_sources: BTreeMap<String, String>,
    #[serde(default)]
    pub descriptor_files: BTreeMap<String, String>,
}

impl IncrementalCache {
    pub fn is_empty(&self) -> bool {
        self.proto_dependencies.is_empty()
            && self.proto_sources.is_empty()
            && self.descriptor_files.is_empty()
    }
}

/// Reads, writes and interprets the two-file cache under
/// `<temp>/incremental-build-cache/<format>/`.
pub struct IncrementalCacheManager<'a> {
    space: &'a TempSpace,
    pool: &'a rayon::ThreadPool,
}

impl<'a> IncrementalCacheManager<'a> {
    pub fn new(space: &'a TempSpace, pool: &'a rayon::ThreadPool) -> Self {
        Self { space, pool }
    }

    fn cache_dir(&self) -> Result<PathBuf> {
        self.space.dir(format!("incremental-build-cache/{CACHE_FORMAT_VERSION}"))
    }

    /// Fingerprints the full input listing. Hashing is farmed out to the
    /// worker pool.
    pub fn snapshot(&self, inputs: &ProjectInputListing) -> Result<IncrementalCache> {
        let dependency_files: Vec<&PathBuf> =
            inputs.dependency_sources.iter().flat_map(|listing| listing.files()).collect();
        let source_files: Vec<&PathBuf> = inputs.proto_sources().collect();
        let descriptor_files: Vec<&PathBuf> = inputs.descriptor_files().collect();

        let cache = IncrementalCache {
            proto_dependencies: self.digest_all(&dependency_files)?,
            proto_sources: self.digest_all(&source_files)?,
            descriptor_files: self.digest_all(&descriptor_files)?,
        };
        trace!(
            dependencies = cache.proto_dependencies.len(),
            sources = cache.proto_sources.len(),
            descriptors = cache.descriptor_files.len(),
            "computed input fingerprints"
        );
        Ok(cache)
    }

    fn digest_all(&self, files: &[&PathBuf]) -> Result<BTreeMap<String, String>> {
        let entries: Vec<Result<(String, String)>> = self.pool.install(|| {
            files
                .par_iter()
                .map(|path| {
                    let digest = DigestAlgorithm::Sha512.hash_file(path)?;
                    Ok((utils::file_uri(path), digest))
                })
                .collect()
        });

        let mut map = BTreeMap::new();
        let mut errors = Vec::new();
        for entry in entries {
            match entry {
                Ok((uri, digest)) => {
                    map.insert(uri, digest);
                }
                Err(err) => errors.push(err),
            }
        }
        if !errors.is_empty() {
            return Err(PmpError::aggregate(errors));
        }
        Ok(map)
    }

    /// Persists the fingerprints of the current build as the candidate
    /// cache.
    pub fn write_next(&self, cache: &IncrementalCache) -> Result<()> {
        let path = self.cache_dir()?.join(NEXT_FILE);
        utils::write_json_file(cache, &path)?;
        trace!(path = %path.display(), "wrote candidate cache");
        Ok(())
    }

    /// Decides the scope of the current build by comparing `new` with the
    /// committed cache of the previous successful run.
    ///
    /// Any change to the dependency fingerprints, or to the digest of any
    /// current source or descriptor file, voids the whole cache; there is no
    /// per-file recompilation because generated outputs are interdependent.
    pub fn determine(&self, new: &IncrementalCache) -> Result<BuildScope> {
        let previous_path = self.cache_dir()?.join(PREVIOUS_FILE);
        if !previous_path.is_file() {
            debug!("no previous cache, full build");
            return Ok(BuildScope::All);
        }
        let previous: IncrementalCache = match utils::read_json_file(&previous_path) {
            Ok(previous) => previous,
            Err(err) => {
                debug!(%err, "previous cache is unreadable, full build");
                return Ok(BuildScope::All);
            }
        };

        if previous.proto_dependencies != new.proto_dependencies {
            debug!("dependency fingerprints changed, full build");
            return Ok(BuildScope::All);
        }

        let changed = new
            .proto_sources
            .iter()
            .map(|entry| (entry, &previous.proto_sources))
            .chain(new.descriptor_files.iter().map(|entry| (entry, &previous.descriptor_files)))
            .find(|((uri, digest), previous)| previous.get(*uri) != Some(*digest));
        if let Some(((uri, _), _)) = changed {
            debug!(uri = %uri, "source fingerprint changed, full build");
            return Ok(BuildScope::All);
        }

        debug!("all fingerprints match, nothing to do");
        Ok(BuildScope::None)
    }

    /// Promotes the candidate cache after a successful compiler run. The
    /// rename is atomic, so a failed build can never corrupt the committed
    /// cache.
    pub fn commit(&self) -> Result<()> {
        let dir = self.cache_dir()?;
        let next = dir.join(NEXT_FILE);
        let previous = dir.join(PREVIOUS_FILE);
        fs::rename(&next, &previous).map_err(|err| PmpError::io(err, &next))?;
        debug!(path = %previous.display(), "committed incremental cache");
        Ok(())
    }

    #[cfg(test)]
    fn previous_path(&self) -> PathBuf {
        self.cache_dir().unwrap().join(PREVIOUS_FILE)
    }
}
