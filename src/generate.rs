//! The `generate` pipeline: one request in, one classified result out.

use crate::{
    aggregate::{GlobFilter, ProjectInputListing, ProtoFileFilter, SourceAggregator, SourceFilter},
    argfile::{ArgFile, ArgFileInputs, DescriptorSetOptions, Language},
    cache::{BuildScope, IncrementalCacheManager},
    digest::Digest,
    error::{PmpError, Result},
    exec,
    fetch::UriFetcher,
    platform::Platform,
    resolver::{
        plugin::{PluginResolver, PluginSpec},
        protoc::{ProtocResolver, ProtocSource},
        ArtifactPathResolver, Coordinate, DependencyResolver, ResolutionDepth,
    },
    tempspace::TempSpace,
};
use std::{
    collections::{BTreeSet, HashMap},
    fs,
    path::{Path, PathBuf},
};

/// Declares a directory holding generated sources to the host build tool so
/// that downstream compile phases pick it up. Must be idempotent.
pub trait SourceRootRegistrar {
    fn register(&self, path: &Path);
}

/// Attaches a produced file to the host project's artifact set.
pub trait OutputDescriptorAttachmentRegistrar {
    fn attach(&self, path: &Path, kind: &str, classifier: Option<&str>);
}

/// How the request classified, independent of log output.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum GenerationResultKind {
    ProtocSucceeded,
    NothingToDo,
    ProtocFailed,
    NoSources,
    NoTargets,
}

/// What one `generate` call produced.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct GenerationResult {
    pub kind: GenerationResultKind,
    pub message: String,
}

impl GenerationResult {
    fn new(kind: GenerationResultKind, message: impl Into<String>) -> Self {
        Self { kind, message: message.into() }
    }

    /// Whether the embedder should treat the build step as passed.
    pub fn ok(&self) -> bool {
        matches!(
            self.kind,
            GenerationResultKind::ProtocSucceeded | GenerationResultKind::NothingToDo
        )
    }
}

/// The frozen configuration of one generation. Created by the caller,
/// validated on entry, consumed once.
#[derive(Clone, Debug)]
pub struct GenerationRequest {
    /// Coordinate, URI or the `PATH` sentinel.
    pub protoc: String,
    pub protoc_digest: Option<String>,
    pub plugins: Vec<PluginSpec>,
    pub enabled_languages: BTreeSet<Language>,

    pub source_directories: Vec<PathBuf>,
    pub source_dependencies: Vec<Coordinate>,
    pub source_descriptor_paths: Vec<PathBuf>,
    pub source_descriptor_dependencies: Vec<Coordinate>,
    pub import_paths: Vec<PathBuf>,
    pub import_dependencies: Vec<Coordinate>,

    pub dependency_resolution_depth: ResolutionDepth,
    pub dependency_scopes: BTreeSet<String>,
    pub fail_on_invalid_dependencies: bool,

    /// Globs applied to compilable inputs only.
    pub includes: Vec<String>,
    pub excludes: Vec<String>,

    pub incremental_compilation: bool,
    pub clean_output_directories: bool,
    pub output_directory: PathBuf,
    pub output_descriptor_file: Option<PathBuf>,
    pub output_descriptor_attached: bool,
    pub output_descriptor_attachment_type: Option<String>,
    pub output_descriptor_attachment_classifier: Option<String>,
    pub output_descriptor_include_imports: bool,
    pub output_descriptor_include_source_info: bool,
    pub output_descriptor_retain_options: bool,

    pub lite_enabled: bool,
    pub fatal_warnings: bool,
    pub arguments: Vec<String>,
    pub environment_variables: HashMap<String, String>,

    pub fail_on_missing_sources: bool,
    pub fail_on_missing_targets: bool,
    pub skip: bool,
    /// Keep the scratch space on disk after the run.
    pub debug: bool,

    /// Where the scratch space lives, usually the host build directory.
    pub build_directory: PathBuf,
    /// Build step name; executions of different goals get disjoint spaces.
    pub goal: String,
    pub execution_id: String,
}

impl GenerationRequest {
    /// A request with the conventional defaults; callers fill in sources
    /// and targets.
    pub fn new(
        protoc: impl Into<String>,
        output_directory: impl Into<PathBuf>,
        build_directory: impl Into<PathBuf>,
    ) -> Self {
        Self {
            protoc: protoc.into(),
            protoc_digest: None,
            plugins: Vec::new(),
            enabled_languages: BTreeSet::new(),
            source_directories: Vec::new(),
            source_dependencies: Vec::new(),
            source_descriptor_paths: Vec::new(),
            source_descriptor_dependencies: Vec::new(),
            import_paths: Vec::new(),
            import_dependencies: Vec::new(),
            dependency_resolution_depth: ResolutionDepth::Transitive,
            dependency_scopes: ["compile", "provided", "system"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            fail_on_invalid_dependencies: true,
            includes: Vec::new(),
            excludes: Vec::new(),
            incremental_compilation: true,
            clean_output_directories: false,
            output_directory: output_directory.into(),
            output_descriptor_file: None,
            output_descriptor_attached: false,
            output_descriptor_attachment_type: None,
            output_descriptor_attachment_classifier: None,
            output_descriptor_include_imports: true,
            output_descriptor_include_source_info: false,
            output_descriptor_retain_options: false,
            lite_enabled: false,
            fatal_warnings: false,
            arguments: Vec::new(),
            environment_variables: HashMap::new(),
            fail_on_missing_sources: true,
            fail_on_missing_targets: true,
            skip: false,
            debug: false,
            build_directory: build_directory.into(),
            goal: "generate".to_string(),
            execution_id: "default".to_string(),
        }
    }

    /// Incremental builds cannot coexist with descriptor emission: a
    /// skipped run would leave the descriptor stale.
    fn incremental_enabled(&self) -> bool {
        self.incremental_compilation && self.output_descriptor_file.is_none()
    }
}

/// Wires resolution, aggregation, caching, planning and execution into a
/// single pipeline.
pub struct BuildOrchestrator<'a> {
    repository: &'a dyn ArtifactPathResolver,
    source_roots: &'a dyn SourceRootRegistrar,
    attachments: &'a dyn OutputDescriptorAttachmentRegistrar,
}

impl<'a> BuildOrchestrator<'a> {
    pub fn new(
        repository: &'a dyn ArtifactPathResolver,
        source_roots: &'a dyn SourceRootRegistrar,
        attachments: &'a dyn OutputDescriptorAttachmentRegistrar,
    ) -> Self {
        Self { repository, source_roots, attachments }
    }

    /// Runs one generation to completion.
    ///
    /// Resolution and verification failures surface as errors; outcomes the
    /// embedder has to classify (missing sources, unchanged inputs, compiler
    /// exit) surface as a [`GenerationResult`].
    pub fn generate(&self, request: &GenerationRequest) -> Result<GenerationResult> {
        if request.skip {
            info!("code generation is skipped by configuration");
            return Ok(GenerationResult::new(
                GenerationResultKind::NothingToDo,
                "generation skipped by configuration",
            ));
        }

        let validated = ValidatedRequest::check(request)?;
        let platform = Platform::capture();
        let mut space = TempSpace::new(&request.build_directory, &request.goal, &request.execution_id)?;
        space.set_keep(request.debug);
        let pool = build_worker_pool()?;
        let fetcher = UriFetcher::new(&space);

        // binary and plugin resolution are independent, run them side by side
        let protoc_resolver = ProtocResolver::new(&platform, &fetcher, self.repository);
        let plugin_resolver = PluginResolver::new(&platform, &fetcher, self.repository, &space);
        let (protoc, plugins) = pool.install(|| {
            rayon::join(
                || protoc_resolver.resolve(&validated.protoc, validated.protoc_digest.as_ref()),
                || plugin_resolver.resolve_all(&request.plugins),
            )
        });
        let (protoc, plugins) = (protoc?, plugins?);

        if request.enabled_languages.is_empty() && plugins.is_empty() {
            let message = "no languages enabled and no plugins configured";
            return if request.fail_on_missing_targets {
                Ok(GenerationResult::new(GenerationResultKind::NoTargets, message))
            } else {
                warn!("{message}");
                Ok(GenerationResult::new(GenerationResultKind::NothingToDo, message))
            };
        }

        let inputs = self.aggregate_inputs(request, &space, &pool)?;
        if !inputs.has_compilable_sources() {
            let message = "no sources found to compile";
            return if request.fail_on_missing_sources {
                Ok(GenerationResult::new(GenerationResultKind::NoSources, message))
            } else {
                info!("{message}");
                Ok(GenerationResult::new(GenerationResultKind::NothingToDo, message))
            };
        }

        let incremental = request.incremental_enabled();
        let cache = IncrementalCacheManager::new(&space, &pool);
        if incremental {
            let snapshot = cache.snapshot(&inputs)?;
            cache.write_next(&snapshot)?;
            if cache.determine(&snapshot)? == BuildScope::None {
                info!("inputs are unchanged since the previous build");
                return Ok(GenerationResult::new(
                    GenerationResultKind::NothingToDo,
                    "all inputs unchanged since the previous build",
                ));
            }
        }

        self.prepare_outputs(request, incremental)?;
        self.source_roots.register(&request.output_directory);

        let sources: Vec<PathBuf> = inputs.proto_sources().cloned().collect();
        let descriptor_inputs: Vec<PathBuf> = inputs.descriptor_files().cloned().collect();
        let argfile = ArgFile::build(&ArgFileInputs {
            fatal_warnings: request.fatal_warnings,
            descriptor: DescriptorSetOptions {
                output_file: request.output_descriptor_file.clone(),
                include_imports: request.output_descriptor_include_imports,
                include_source_info: request.output_descriptor_include_source_info,
                retain_options: request.output_descriptor_retain_options,
            },
            descriptor_inputs: &descriptor_inputs,
            extra_arguments: &request.arguments,
            languages: &request.enabled_languages,
            lite: request.lite_enabled,
            plugins: &plugins,
            output_directory: &request.output_directory,
            import_roots: &inputs.import_roots(),
            sources: &sources,
        });
        let argfile_path = space.dir("protoc")?.join("args.txt");
        argfile.write_to(&argfile_path)?;

        info!(
            sources = sources.len(),
            languages = request.enabled_languages.len(),
            plugins = plugins.len(),
            "invoking protoc"
        );
        let report = exec::execute(&protoc, &argfile_path, &request.environment_variables)?;
        if !report.success {
            return Ok(GenerationResult::new(
                GenerationResultKind::ProtocFailed,
                format!("protoc returned exit code {:?}", report.exit_code),
            ));
        }

        if incremental {
            cache.commit()?;
        }
        self.attach_descriptor(request);

        Ok(GenerationResult::new(
            GenerationResultKind::ProtocSucceeded,
            format!("generated code for {} sources in {} ms", sources.len(), report.elapsed_ms),
        ))
    }

    /// Collects compilable sources, compilable descriptors and import-only
    /// sources, resolving repository-provided roots first.
    fn aggregate_inputs(
        &self,
        request: &GenerationRequest,
        space: &TempSpace,
        pool: &rayon::ThreadPool,
    ) -> Result<ProjectInputListing> {
        let dependencies = DependencyResolver::new(self.repository);
        let resolve = |coordinates: &[Coordinate]| -> Result<Vec<PathBuf>> {
            if coordinates.is_empty() {
                return Ok(Vec::new());
            }
            dependencies.resolve_dependencies(
                coordinates,
                request.dependency_resolution_depth,
                &request.dependency_scopes,
                false,
                request.fail_on_invalid_dependencies,
            )
        };

        let mut source_roots = request.source_directories.clone();
        source_roots.extend(resolve(&request.source_dependencies)?);

        let mut descriptor_paths = request.source_descriptor_paths.clone();
        descriptor_paths.extend(resolve(&request.source_descriptor_dependencies)?);

        let mut import_roots = request.import_paths.clone();
        import_roots.extend(resolve(&request.import_dependencies)?);

        let aggregator = SourceAggregator::new(space, pool);
        let compilable_filter =
            ProtoFileFilter.and(GlobFilter::new(&request.includes, &request.excludes)?);

        let inputs = ProjectInputListing {
            compilable_sources: aggregator
                .collect_proto_listings(&source_roots, &compilable_filter)?,
            compilable_descriptors: aggregator.collect_descriptor_listings(&descriptor_paths),
            dependency_sources: aggregator
                .collect_proto_listings(&import_roots, &ProtoFileFilter)?,
        }
        .deduplicated();

        debug!(
            compilable = inputs.compilable_sources.len(),
            descriptors = inputs.compilable_descriptors.len(),
            imports = inputs.dependency_sources.len(),
            "aggregated input listings"
        );
        Ok(inputs)
    }

    /// Clears and recreates the sinks. Cleaning is skipped for incremental
    /// builds, which rely on previously generated outputs staying in place.
    fn prepare_outputs(&self, request: &GenerationRequest, incremental: bool) -> Result<()> {
        let output = &request.output_directory;
        if request.clean_output_directories && !incremental && output.is_dir() {
            debug!(path = %output.display(), "cleaning output directory");
            fs::remove_dir_all(output).map_err(|err| PmpError::io(err, output))?;
        }
        fs::create_dir_all(output).map_err(|err| PmpError::io(err, output))?;
        if let Some(descriptor) = &request.output_descriptor_file {
            crate::utils::create_parent_dir_all(descriptor)?;
        }
        Ok(())
    }

    fn attach_descriptor(&self, request: &GenerationRequest) {
        if !request.output_descriptor_attached {
            return;
        }
        let Some(descriptor) = &request.output_descriptor_file else { return };
        let kind = request
            .output_descriptor_attachment_type
            .clone()
            .or_else(|| {
                descriptor.extension().and_then(|ext| ext.to_str()).map(str::to_string)
            })
            .unwrap_or_else(|| "protobin".to_string());
        debug!(path = %descriptor.display(), kind = %kind, "attaching output descriptor");
        self.attachments.attach(
            descriptor,
            &kind,
            request.output_descriptor_attachment_classifier.as_deref(),
        );
    }
}

/// The entry-point checks: everything that can fail before any IO happens.
struct ValidatedRequest {
    protoc: ProtocSource,
    protoc_digest: Option<Digest>,
}

impl ValidatedRequest {
    fn check(request: &GenerationRequest) -> Result<Self> {
        if request.output_directory.as_os_str().is_empty() {
            return Err(PmpError::msg("no output directory configured"));
        }
        if request.build_directory.as_os_str().is_empty() {
            return Err(PmpError::msg("no build directory configured"));
        }
        let protoc = ProtocSource::parse(&request.protoc)?;
        let protoc_digest =
            request.protoc_digest.as_deref().map(str::parse::<Digest>).transpose()?;
        Ok(Self { protoc, protoc_digest })
    }
}

/// One bounded work-stealing pool drives every parallel task of the
/// execution.
fn build_worker_pool() -> Result<rayon::ThreadPool> {
    rayon::ThreadPoolBuilder::new()
        .num_threads(8 * num_cpus::get())
        .thread_name(|index| format!("pmp-worker-{index}"))
        .build()
        .map_err(PmpError::msg)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_rejects_bad_requests() {
        let ok = GenerationRequest::new("PATH", "/tmp/out", "/tmp/build");
        assert!(ValidatedRequest::check(&ok).is_ok());

        let mut no_protoc = ok.clone();
        no_protoc.protoc = String::new();
        assert!(ValidatedRequest::check(&no_protoc).is_err());

        let mut no_output = ok.clone();
        no_output.output_directory = PathBuf::new();
        assert!(ValidatedRequest::check(&no_output).is_err());

        let mut bad_digest = ok;
        bad_digest.protoc_digest = Some("sha256:zz".to_string());
        assert!(ValidatedRequest::check(&bad_digest).is_err());
    }

    #[test]
    fn descriptor_output_disables_incremental_compilation() {
        let mut request = GenerationRequest::new("PATH", "/tmp/out", "/tmp/build");
        request.incremental_compilation = true;
        assert!(request.incremental_enabled());

        request.output_descriptor_file = Some(PathBuf::from("/tmp/out/app.binpb"));
        assert!(!request.incremental_enabled());
    }

    #[test]
    fn result_classification_maps_to_ok() {
        for (kind, ok) in [
            (GenerationResultKind::ProtocSucceeded, true),
            (GenerationResultKind::NothingToDo, true),
            (GenerationResultKind::ProtocFailed, false),
            (GenerationResultKind::NoSources, false),
            (GenerationResultKind::NoTargets, false),
        ] {
            assert_eq!(GenerationResult::new(kind, "").ok(), ok, "{kind:?}");
        }
    }
}
