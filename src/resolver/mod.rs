//! Turning symbolic artifact references into local file paths.
//!
//! The repository itself is owned by the embedding build tool; it is reached
//! through the [`ArtifactPathResolver`] trait. Everything that gives the
//! resolution deterministic semantics — request ordering, scope filtering,
//! per-coordinate traversal depth, highest-version deduplication and managed
//! version substitution — lives here.

#[cfg(test)]
use crate::error::PmpError;
use crate::error::Result;
use std::{
    collections::{BTreeSet, HashMap},
    fmt,
    path::PathBuf,
};

pub mod plugin;
pub mod protoc;
pub mod version;

pub use version::ArtifactVersion;

/// How far the dependency graph is walked for a coordinate.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash)]
pub enum ResolutionDepth {
    /// Resolve the coordinate itself only.
    Direct,
    /// Resolve the coordinate and its runtime dependency closure.
    #[default]
    Transitive,
}

/// An external reference to a repository artifact.
///
/// Immutable once built; use the `with_*` constructors to refine defaults.
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub struct Coordinate {
    pub group: String,
    pub name: String,
    pub version: String,
    pub kind: String,
    pub classifier: Option<String>,
    pub exclusions: Vec<Exclusion>,
    /// Overrides the request-wide depth when set.
    pub depth: Option<ResolutionDepth>,
}

impl Coordinate {
    pub fn new(
        group: impl Into<String>,
        name: impl Into<String>,
        version: impl Into<String>,
    ) -> Self {
        Self {
            group: group.into(),
            name: name.into(),
            version: version.into(),
            kind: "jar".to_string(),
            classifier: None,
            exclusions: Vec::new(),
            depth: None,
        }
    }

    pub fn with_kind(mut self, kind: impl Into<String>) -> Self {
        self.kind = kind.into();
        self
    }

    pub fn with_classifier(mut self, classifier: impl Into<String>) -> Self {
        self.classifier = Some(classifier.into());
        self
    }

    pub fn with_depth(mut self, depth: ResolutionDepth) -> Self {
        self.depth = Some(depth);
        self
    }

    pub fn with_exclusions(mut self, exclusions: Vec<Exclusion>) -> Self {
        self.exclusions = exclusions;
        self
    }

    /// The deduplication key: everything but the version.
    pub fn key(&self) -> CoordinateKey {
        CoordinateKey {
            group: self.group.clone(),
            name: self.name.clone(),
            kind: self.kind.clone(),
            classifier: self.classifier.clone(),
        }
    }

    pub fn version(&self) -> ArtifactVersion {
        ArtifactVersion::new(self.version.as_str())
    }
}

impl fmt::Display for Coordinate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}:{}", self.group, self.name, self.kind, self.version)?;
        if let Some(classifier) = &self.classifier {
            write!(f, ":{classifier}")?;
        }
        Ok(())
    }
}

/// Identifies one artifact independently of its version.
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub struct CoordinateKey {
    pub group: String,
    pub name: String,
    pub kind: String,
    pub classifier: Option<String>,
}

/// Excludes a child artifact from transitive traversal.
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub struct Exclusion {
    pub group: String,
    pub name: String,
    pub classifier: Option<String>,
    pub kind: Option<String>,
}

impl Exclusion {
    pub fn new(group: impl Into<String>, name: impl Into<String>) -> Self {
        Self { group: group.into(), name: name.into(), classifier: None, kind: None }
    }
}

/// A coordinate the embedder has turned into a local file, together with the
/// scope it was resolved under.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ResolvedArtifact {
    pub coordinate: Coordinate,
    pub path: PathBuf,
    pub scope: String,
}

/// Managed attributes the host project declares for a coordinate key; used
/// to fill in blank versions before resolution.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ManagedArtifact {
    pub version: String,
    pub kind: String,
    pub classifier: Option<String>,
}

/// Supplied by the embedding build tool; all calls are synchronous. The
/// bound allows resolution to run on worker threads.
pub trait ArtifactPathResolver: Send + Sync {
    /// Resolves exactly one artifact, without transitive expansion.
    fn resolve_artifact(&self, coordinate: &Coordinate) -> Result<PathBuf>;

    /// Resolves the coordinate and, when `transitive` is set, its runtime
    /// dependency closure. The coordinate itself comes first.
    fn resolve_graph(
        &self,
        coordinate: &Coordinate,
        transitive: bool,
    ) -> Result<Vec<ResolvedArtifact>>;

    /// The host project's own output roots, in build order.
    fn project_outputs(&self) -> Vec<PathBuf> {
        Vec::new()
    }

    /// Dependency-management attributes for the key, if the host project
    /// declares any.
    fn managed_artifact(&self, _key: &CoordinateKey) -> Option<ManagedArtifact> {
        None
    }
}

/// Core-side dependency resolution semantics layered over an
/// [`ArtifactPathResolver`].
pub struct DependencyResolver<'a> {
    resolver: &'a dyn ArtifactPathResolver,
}

impl<'a> DependencyResolver<'a> {
    pub fn new(resolver: &'a dyn ArtifactPathResolver) -> Self {
        Self { resolver }
    }

    /// Resolves one artifact with managed-version substitution applied.
    pub fn resolve_one(&self, coordinate: &Coordinate) -> Result<PathBuf> {
        let coordinate = self.apply_managed(coordinate.clone());
        self.resolver.resolve_artifact(&coordinate)
    }

    /// Resolves `coordinates` into an ordered, deduplicated list of paths.
    ///
    /// Project outputs come first when requested, then resolved artifacts in
    /// request order. Artifacts outside `scopes` are dropped. When
    /// duplicates share a `(group, name, kind, classifier)` key, the highest
    /// version wins while the first-seen position is kept. With
    /// `fail_on_invalid` unset, unresolvable coordinates are logged and
    /// omitted instead of failing the operation.
    pub fn resolve_dependencies(
        &self,
        coordinates: &[Coordinate],
        default_depth: ResolutionDepth,
        scopes: &BTreeSet<String>,
        include_project: bool,
        fail_on_invalid: bool,
    ) -> Result<Vec<PathBuf>> {
        let mut kept: Vec<ResolvedArtifact> = Vec::new();
        let mut positions: HashMap<CoordinateKey, usize> = HashMap::new();
        let mut failures = 0usize;

        for coordinate in coordinates {
            let coordinate = self.apply_managed(coordinate.clone());
            let transitive =
                coordinate.depth.unwrap_or(default_depth) == ResolutionDepth::Transitive;

            let resolved = match self.resolver.resolve_graph(&coordinate, transitive) {
                Ok(resolved) => resolved,
                Err(err) if !fail_on_invalid => {
                    warn!(coordinate = %coordinate, %err, "skipping unresolvable artifact");
                    failures += 1;
                    continue;
                }
                Err(err) => return Err(err),
            };

            for artifact in resolved {
                if !scopes.contains(&artifact.scope) {
                    trace!(
                        coordinate = %artifact.coordinate,
                        scope = %artifact.scope,
                        "dropping artifact outside requested scopes"
                    );
                    continue;
                }
                match positions.get(&artifact.coordinate.key()) {
                    Some(&at) => {
                        if artifact.coordinate.version() > kept[at].coordinate.version() {
                            kept[at] = artifact;
                        }
                    }
                    None => {
                        positions.insert(artifact.coordinate.key(), kept.len());
                        kept.push(artifact);
                    }
                }
            }
        }

        if failures > 0 {
            warn!(failures, "dependency resolution returned a partial result");
        }

        let mut paths: Vec<PathBuf> =
            if include_project { self.resolver.project_outputs() } else { Vec::new() };
        paths.extend(kept.into_iter().map(|artifact| artifact.path));
        Ok(paths)
    }

    /// Substitutes managed attributes when the coordinate carries no version.
    fn apply_managed(&self, mut coordinate: Coordinate) -> Coordinate {
        if !coordinate.version().is_blank() {
            return coordinate;
        }
        if let Some(managed) = self.resolver.managed_artifact(&coordinate.key()) {
            debug!(
                coordinate = %coordinate,
                version = %managed.version,
                "substituting managed artifact attributes"
            );
            coordinate.version = managed.version;
            coordinate.kind = managed.kind;
            coordinate.classifier = managed.classifier;
        }
        coordinate
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// In-memory resolver that serves a fixed artifact table.
    struct FakeRepo {
        graphs: HashMap<String, Vec<ResolvedArtifact>>,
        managed: HashMap<CoordinateKey, ManagedArtifact>,
        project: Vec<PathBuf>,
    }

    impl FakeRepo {
        fn new() -> Self {
            Self { graphs: HashMap::new(), managed: HashMap::new(), project: Vec::new() }
        }

        fn with(mut self, coordinate: &Coordinate, children: Vec<(&str, &str, &str)>) -> Self {
            let mut graph = vec![artifact(coordinate.clone(), "compile")];
            graph.extend(children.into_iter().map(|(group, name, version)| {
                artifact(Coordinate::new(group, name, version), "compile")
            }));
            self.graphs.insert(coordinate.to_string(), graph);
            self
        }
    }

    fn artifact(coordinate: Coordinate, scope: &str) -> ResolvedArtifact {
        let path = PathBuf::from(format!(
            "/repo/{}/{}-{}.jar",
            coordinate.group, coordinate.name, coordinate.version
        ));
        ResolvedArtifact { coordinate, path, scope: scope.to_string() }
    }

    impl ArtifactPathResolver for FakeRepo {
        fn resolve_artifact(&self, coordinate: &Coordinate) -> Result<PathBuf> {
            self.resolve_graph(coordinate, false).map(|mut graph| graph.remove(0).path)
        }

        fn resolve_graph(
            &self,
            coordinate: &Coordinate,
            transitive: bool,
        ) -> Result<Vec<ResolvedArtifact>> {
            let graph = self.graphs.get(&coordinate.to_string()).ok_or_else(|| {
                PmpError::Resolution {
                    coordinate: coordinate.to_string(),
                    source: "not in repository".into(),
                }
            })?;
            if transitive {
                Ok(graph.clone())
            } else {
                Ok(graph[..1].to_vec())
            }
        }

        fn project_outputs(&self) -> Vec<PathBuf> {
            self.project.clone()
        }

        fn managed_artifact(&self, key: &CoordinateKey) -> Option<ManagedArtifact> {
            self.managed.get(key).cloned()
        }
    }

    fn scopes(names: &[&str]) -> BTreeSet<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn resolves_in_request_order() {
        let a = Coordinate::new("com.example", "a", "1.0");
        let b = Coordinate::new("com.example", "b", "2.0");
        let repo = FakeRepo::new().with(&a, vec![]).with(&b, vec![]);

        let paths = DependencyResolver::new(&repo)
            .resolve_dependencies(
                &[b.clone(), a.clone()],
                ResolutionDepth::Transitive,
                &scopes(&["compile"]),
                false,
                true,
            )
            .unwrap();
        assert_eq!(
            paths,
            vec![PathBuf::from("/repo/com.example/b-2.0.jar"), PathBuf::from("/repo/com.example/a-1.0.jar")]
        );
    }

    #[test]
    fn keeps_highest_version_at_first_position() {
        let grpc_old = Coordinate::new("io.grpc", "grpc-core", "1.58.0");
        let other = Coordinate::new("com.example", "lib", "1.0");
        let repo = FakeRepo::new()
            // `lib` drags in a newer grpc-core transitively
            .with(&grpc_old, vec![])
            .with(&other, vec![("io.grpc", "grpc-core", "1.60.1")]);

        let paths = DependencyResolver::new(&repo)
            .resolve_dependencies(
                &[grpc_old, other],
                ResolutionDepth::Transitive,
                &scopes(&["compile"]),
                false,
                true,
            )
            .unwrap();
        assert_eq!(
            paths,
            vec![
                PathBuf::from("/repo/io.grpc/grpc-core-1.60.1.jar"),
                PathBuf::from("/repo/com.example/lib-1.0.jar"),
            ]
        );
    }

    #[test]
    fn direct_depth_overrides_default() {
        let lib = Coordinate::new("com.example", "lib", "1.0")
            .with_depth(ResolutionDepth::Direct);
        let repo = FakeRepo::new().with(&lib, vec![("io.grpc", "grpc-core", "1.60.1")]);

        let paths = DependencyResolver::new(&repo)
            .resolve_dependencies(
                &[lib],
                ResolutionDepth::Transitive,
                &scopes(&["compile"]),
                false,
                true,
            )
            .unwrap();
        assert_eq!(paths, vec![PathBuf::from("/repo/com.example/lib-1.0.jar")]);
    }

    #[test]
    fn scope_filter_applies_to_every_element() {
        let lib = Coordinate::new("com.example", "lib", "1.0");
        let mut repo = FakeRepo::new().with(&lib, vec![]);
        repo.graphs.get_mut(&lib.to_string()).unwrap().push(artifact(
            Coordinate::new("com.example", "testlib", "1.0"),
            "test",
        ));

        let paths = DependencyResolver::new(&repo)
            .resolve_dependencies(
                &[lib],
                ResolutionDepth::Transitive,
                &scopes(&["compile", "runtime"]),
                false,
                true,
            )
            .unwrap();
        assert_eq!(paths, vec![PathBuf::from("/repo/com.example/lib-1.0.jar")]);
    }

    #[test]
    fn project_outputs_come_first() {
        let lib = Coordinate::new("com.example", "lib", "1.0");
        let mut repo = FakeRepo::new().with(&lib, vec![]);
        repo.project.push(PathBuf::from("/project/target/classes"));

        let paths = DependencyResolver::new(&repo)
            .resolve_dependencies(
                &[lib],
                ResolutionDepth::Transitive,
                &scopes(&["compile"]),
                true,
                true,
            )
            .unwrap();
        assert_eq!(paths[0], PathBuf::from("/project/target/classes"));
        assert_eq!(paths.len(), 2);
    }

    #[test]
    fn managed_version_fills_blank_coordinates() {
        let declared = Coordinate::new("com.example", "lib", "");
        let managed = Coordinate::new("com.example", "lib", "3.1.4");
        let mut repo = FakeRepo::new().with(&managed, vec![]);
        repo.managed.insert(
            declared.key(),
            ManagedArtifact { version: "3.1.4".to_string(), kind: "jar".to_string(), classifier: None },
        );

        let paths = DependencyResolver::new(&repo)
            .resolve_dependencies(
                &[declared],
                ResolutionDepth::Transitive,
                &scopes(&["compile"]),
                false,
                true,
            )
            .unwrap();
        assert_eq!(paths, vec![PathBuf::from("/repo/com.example/lib-3.1.4.jar")]);
    }

    #[test]
    fn partial_results_when_not_failing_on_invalid() {
        let present = Coordinate::new("com.example", "lib", "1.0");
        let missing = Coordinate::new("com.example", "ghost", "9.9");
        let repo = FakeRepo::new().with(&present, vec![]);
        let resolver = DependencyResolver::new(&repo);

        let paths = resolver
            .resolve_dependencies(
                &[missing.clone(), present],
                ResolutionDepth::Transitive,
                &scopes(&["compile"]),
                false,
                false,
            )
            .unwrap();
        assert_eq!(paths, vec![PathBuf::from("/repo/com.example/lib-1.0.jar")]);

        let err = resolver
            .resolve_dependencies(
                &[missing],
                ResolutionDepth::Transitive,
                &scopes(&["compile"]),
                false,
                true,
            )
            .unwrap_err();
        assert!(matches!(err, PmpError::Resolution { .. }));
    }
}
