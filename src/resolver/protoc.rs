//! Locating the `protoc` executable.

use crate::{
    digest::Digest,
    error::{PmpError, Result},
    fetch::UriFetcher,
    platform::{make_executable, Platform},
    resolver::{ArtifactPathResolver, Coordinate, DependencyResolver},
    utils,
};
use std::path::PathBuf;
use url::Url;

/// The name of the `protoc` binary on the system
pub const PROTOC: &str = "protoc";

/// Where the compiler binary comes from.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ProtocSource {
    /// A repository coordinate, e.g. `com.google.protobuf:protoc:4.28.2`.
    Repository(Coordinate),
    /// A direct download location.
    Uri(Url),
    /// The `PATH` sentinel: take whatever the system provides.
    SystemPath,
}

impl ProtocSource {
    /// Parses the user-facing `protoc` setting: the literal `PATH`, a URI
    /// with a scheme, or a `group:name:version[:type[:classifier]]`
    /// coordinate.
    pub fn parse(spec: &str) -> Result<Self> {
        let spec = spec.trim();
        if spec.is_empty() {
            return Err(PmpError::msg("no protoc source configured"));
        }
        if spec == "PATH" {
            return Ok(Self::SystemPath);
        }
        if spec.contains("://") {
            let uri = Url::parse(spec)
                .map_err(|err| PmpError::Fetch { uri: spec.to_string(), reason: err.to_string() })?;
            return Ok(Self::Uri(uri));
        }

        let parts: Vec<&str> = spec.split(':').collect();
        match parts.as_slice() {
            [group, name, version] => Ok(Self::Repository(
                Coordinate::new(*group, *name, *version).with_kind("exe"),
            )),
            [group, name, version, kind] => {
                Ok(Self::Repository(Coordinate::new(*group, *name, *version).with_kind(*kind)))
            }
            [group, name, version, kind, classifier] => Ok(Self::Repository(
                Coordinate::new(*group, *name, *version)
                    .with_kind(*kind)
                    .with_classifier(*classifier),
            )),
            _ => Err(PmpError::msg(format!("malformed protoc coordinate \"{spec}\""))),
        }
    }
}

/// Resolves the configured [`ProtocSource`] into an executable on disk.
pub struct ProtocResolver<'a> {
    platform: &'a Platform,
    fetcher: &'a UriFetcher<'a>,
    repository: &'a dyn ArtifactPathResolver,
}

impl<'a> ProtocResolver<'a> {
    pub fn new(
        platform: &'a Platform,
        fetcher: &'a UriFetcher<'a>,
        repository: &'a dyn ArtifactPathResolver,
    ) -> Self {
        Self { platform, fetcher, repository }
    }

    /// Resolves the compiler, verifies the optional digest and returns the
    /// absolute, normalised path with the executable bit set.
    pub fn resolve(&self, source: &ProtocSource, digest: Option<&Digest>) -> Result<PathBuf> {
        let path = match source {
            ProtocSource::SystemPath => {
                self.platform.search_path(PROTOC).ok_or_else(|| PmpError::Resolution {
                    coordinate: "PATH".to_string(),
                    source: format!("no executable named \"{PROTOC}\" on the system path").into(),
                })?
            }
            ProtocSource::Uri(uri) => self
                .fetcher
                .fetch(uri, "exe", digest)?
                .ok_or_else(|| PmpError::Fetch {
                    uri: uri.to_string(),
                    reason: "resource not found".to_string(),
                })?,
            ProtocSource::Repository(coordinate) => {
                let mut coordinate = coordinate.clone();
                if coordinate.version.eq_ignore_ascii_case("latest") {
                    // upstream releases are not version-monotonic, so "latest"
                    // rarely means what the user expects
                    warn!(
                        coordinate = %coordinate,
                        "the \"latest\" version is unreliable for protoc releases; \
                         attempting resolution anyway"
                    );
                }
                if coordinate.classifier.is_none() {
                    let classifier = self.platform.classifier(&coordinate.name)?;
                    coordinate = coordinate.with_classifier(classifier);
                }
                let path =
                    DependencyResolver::new(self.repository).resolve_one(&coordinate)?;
                if let Some(digest) = digest {
                    digest.verify(&path)?;
                }
                path
            }
        };

        // file:// sources bypass the fetcher's verification path
        if matches!(source, ProtocSource::SystemPath) {
            if let Some(digest) = digest {
                digest.verify(&path)?;
            }
        }

        make_executable(&path)?;
        let path = utils::canonicalized(path);
        debug!(path = %path.display(), "resolved protoc");
        Ok(path)
    }
}
