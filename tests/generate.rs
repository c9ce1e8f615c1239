//! End-to-end tests driving the full pipeline against a fake `protoc`.
#![cfg(unix)]

use pmp_core::{
    ArtifactPathResolver, BuildOrchestrator, Coordinate, GenerationRequest, GenerationResultKind,
    IncrementalCache, Language, OutputDescriptorAttachmentRegistrar, PluginSpec, PmpError,
    ResolvedArtifact, SourceRootRegistrar,
};
use std::{
    fs,
    io::Write as _,
    os::unix::fs::PermissionsExt,
    path::{Path, PathBuf},
    sync::Mutex,
};
use url::Url;

/// A repository façade for tests that never resolves anything.
struct EmptyRepo;

impl ArtifactPathResolver for EmptyRepo {
    fn resolve_artifact(&self, coordinate: &Coordinate) -> pmp_core::Result<PathBuf> {
        Err(PmpError::Resolution {
            coordinate: coordinate.to_string(),
            source: "empty test repository".into(),
        })
    }

    fn resolve_graph(
        &self,
        coordinate: &Coordinate,
        _transitive: bool,
    ) -> pmp_core::Result<Vec<ResolvedArtifact>> {
        self.resolve_artifact(coordinate).map(|_| Vec::new())
    }
}

#[derive(Default)]
struct RecordingRegistrar {
    roots: Mutex<Vec<PathBuf>>,
    attachments: Mutex<Vec<(PathBuf, String, Option<String>)>>,
}

impl SourceRootRegistrar for RecordingRegistrar {
    fn register(&self, path: &Path) {
        self.roots.lock().unwrap().push(path.to_path_buf());
    }
}

impl OutputDescriptorAttachmentRegistrar for RecordingRegistrar {
    fn attach(&self, path: &Path, kind: &str, classifier: Option<&str>) {
        self.attachments.lock().unwrap().push((
            path.to_path_buf(),
            kind.to_string(),
            classifier.map(str::to_string),
        ));
    }
}

/// One disposable project layout with a fake compiler that records every
/// invocation and the argument file it received.
struct TestProject {
    dir: tempfile::TempDir,
    registrar: RecordingRegistrar,
}

impl TestProject {
    fn new() -> Self {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
        Self { dir: tempfile::tempdir().unwrap(), registrar: RecordingRegistrar::default() }
    }

    fn path(&self, relative: &str) -> PathBuf {
        self.dir.path().join(relative)
    }

    fn write(&self, relative: &str, content: &str) -> PathBuf {
        let path = self.path(relative);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, content).unwrap();
        path
    }

    /// Writes the fake compiler. It appends to `invocations.txt` and copies
    /// the received argument file next to it, then exits with `exit_code`.
    fn fake_protoc(&self, exit_code: i32) -> PathBuf {
        let record = self.path("record");
        fs::create_dir_all(&record).unwrap();
        let script = format!(
            "#!/bin/sh\n\
             echo \"$@\" >> {record}/invocations.txt\n\
             argfile=\"${{1#@}}\"\n\
             cp \"$argfile\" {record}/last-args.txt\n\
             exit {exit_code}\n",
            record = record.display(),
        );
        let path = self.path("bin/fake-protoc");
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, script).unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    fn invocations(&self) -> usize {
        fs::read_to_string(self.path("record/invocations.txt"))
            .map(|content| content.lines().count())
            .unwrap_or(0)
    }

    fn last_args(&self) -> Vec<String> {
        fs::read_to_string(self.path("record/last-args.txt"))
            .unwrap()
            .lines()
            .map(str::to_string)
            .collect()
    }

    fn request(&self, protoc: &Path) -> GenerationRequest {
        let uri = Url::from_file_path(protoc).unwrap();
        let mut request =
            GenerationRequest::new(uri.as_str(), self.path("out"), self.path("build"));
        request.enabled_languages.insert(Language::Java);
        request.source_directories.push(self.path("proto"));
        request.incremental_compilation = false;
        request.debug = true;
        request
    }

    fn generate(&self, request: &GenerationRequest) -> pmp_core::Result<pmp_core::GenerationResult> {
        BuildOrchestrator::new(&EmptyRepo, &self.registrar, &self.registrar).generate(request)
    }

    fn previous_cache_path(&self) -> PathBuf {
        self.path("build/pmp-core/generate/default/incremental-build-cache/3.0/previous.json")
    }
}

fn canonical(path: &Path) -> PathBuf {
    dunce::canonicalize(path).unwrap()
}

#[test]
fn compiles_a_single_proto_for_java() {
    let project = TestProject::new();
    project.write("proto/foo.proto", "syntax = \"proto3\";\nmessage Foo {}\n");
    let protoc = project.fake_protoc(0);

    let result = project.generate(&project.request(&protoc)).unwrap();
    assert_eq!(result.kind, GenerationResultKind::ProtocSucceeded);
    assert!(result.ok());
    assert_eq!(project.invocations(), 1);

    let out = project.path("out");
    let root = canonical(&project.path("proto"));
    assert_eq!(
        project.last_args(),
        [
            format!("--java_out={}", out.display()),
            format!("--proto_path={}", root.display()),
            format!("{}", root.join("foo.proto").display()),
        ]
    );

    // output dir exists and was registered as a generated source root
    assert!(project.path("out").is_dir());
    assert_eq!(project.registrar.roots.lock().unwrap().as_slice(), [project.path("out")]);
}

#[test]
fn unchanged_incremental_build_skips_the_compiler() {
    let project = TestProject::new();
    project.write("proto/foo.proto", "syntax = \"proto3\";\nmessage Foo {}\n");
    let protoc = project.fake_protoc(0);
    let mut request = project.request(&protoc);
    request.incremental_compilation = true;

    let first = project.generate(&request).unwrap();
    assert_eq!(first.kind, GenerationResultKind::ProtocSucceeded);
    assert_eq!(project.invocations(), 1);

    let second = project.generate(&request).unwrap();
    assert_eq!(second.kind, GenerationResultKind::NothingToDo);
    assert!(second.ok());
    assert_eq!(project.invocations(), 1, "the compiler must not run again");
}

#[test]
fn modified_source_triggers_a_rebuild_with_a_new_fingerprint() {
    let project = TestProject::new();
    project.write("proto/foo.proto", "syntax = \"proto3\";\nmessage Foo {}\n");
    let protoc = project.fake_protoc(0);
    let mut request = project.request(&protoc);
    request.incremental_compilation = true;

    project.generate(&request).unwrap();
    let before: IncrementalCache =
        serde_json::from_str(&fs::read_to_string(project.previous_cache_path()).unwrap()).unwrap();

    // one byte appended
    let mut file =
        fs::OpenOptions::new().append(true).open(project.path("proto/foo.proto")).unwrap();
    file.write_all(b"\n").unwrap();
    drop(file);

    let second = project.generate(&request).unwrap();
    assert_eq!(second.kind, GenerationResultKind::ProtocSucceeded);
    assert_eq!(project.invocations(), 2);

    let after: IncrementalCache =
        serde_json::from_str(&fs::read_to_string(project.previous_cache_path()).unwrap()).unwrap();
    assert_eq!(before.proto_sources.len(), 1);
    assert_ne!(before.proto_sources, after.proto_sources);
}

#[test]
fn plugin_flags_follow_the_plugin_id() {
    let project = TestProject::new();
    project.write("proto/foo.proto", "syntax = \"proto3\";\n");
    let protoc = project.fake_protoc(0);

    let plugin_bin = project.path("bin/protoc-gen-grpc-java");
    fs::write(&plugin_bin, "#!/bin/sh\nexit 0\n").unwrap();
    fs::set_permissions(&plugin_bin, fs::Permissions::from_mode(0o755)).unwrap();

    let mut request = project.request(&protoc);
    request.plugins.push(PluginSpec::UriBinary {
        uri: Url::from_file_path(&plugin_bin).unwrap(),
        options: Some("jakarta".to_string()),
        order: 0,
        skip: false,
        digest: None,
    });

    let result = project.generate(&request).unwrap();
    assert_eq!(result.kind, GenerationResultKind::ProtocSucceeded);

    let out = project.path("out");
    let args = project.last_args();
    let plugin_path = canonical(&plugin_bin);
    assert!(args.contains(&format!(
        "--plugin=protoc-gen-protoc_gen_grpc_java={}",
        plugin_path.display()
    )));
    assert!(args.contains(&format!("--protoc_gen_grpc_java_out={}", out.display())));
    assert!(args.contains(&"--protoc_gen_grpc_java_opt=jakarta".to_string()));
}

#[test]
fn plugin_digest_mismatch_fails_before_any_plan_is_built() {
    let project = TestProject::new();
    project.write("proto/foo.proto", "syntax = \"proto3\";\n");
    let protoc = project.fake_protoc(0);

    // commit a cache first so we can observe that the failed run leaves it
    // untouched
    let mut request = project.request(&protoc);
    request.incremental_compilation = true;
    project.generate(&request).unwrap();
    let committed = fs::read_to_string(project.previous_cache_path()).unwrap();
    let invocations_before = project.invocations();

    let plugin_bin = project.path("bin/protoc-gen-doc");
    fs::write(&plugin_bin, "#!/bin/sh\nexit 0\n").unwrap();
    fs::set_permissions(&plugin_bin, fs::Permissions::from_mode(0o755)).unwrap();

    request.plugins.push(PluginSpec::UriBinary {
        uri: Url::from_file_path(&plugin_bin).unwrap(),
        options: None,
        order: 0,
        skip: false,
        digest: Some(
            "sha256:0000000000000000000000000000000000000000000000000000000000000000"
                .parse()
                .unwrap(),
        ),
    });

    let err = project.generate(&request).unwrap_err();
    assert!(matches!(err, PmpError::DigestMismatch { .. }), "{err}");
    assert_eq!(project.invocations(), invocations_before, "no compiler run");
    assert_eq!(fs::read_to_string(project.previous_cache_path()).unwrap(), committed);
}

#[test]
fn archive_and_directory_roots_both_contribute() {
    let project = TestProject::new();
    project.write("proto/bar.proto", "syntax = \"proto3\";\nmessage DirBar {}\n");

    // same file name inside an archive root
    let jar = project.path("deps/protos.jar");
    fs::create_dir_all(jar.parent().unwrap()).unwrap();
    let file = fs::File::create(&jar).unwrap();
    let mut writer = zip::ZipWriter::new(file);
    writer
        .start_file("bar.proto", zip::write::SimpleFileOptions::default())
        .unwrap();
    writer.write_all(b"syntax = \"proto3\";\nmessage JarBar {}\n").unwrap();
    writer.finish().unwrap();

    let protoc = project.fake_protoc(0);
    let mut request = project.request(&protoc);
    request.source_directories.push(jar);

    let result = project.generate(&request).unwrap();
    assert_eq!(result.kind, GenerationResultKind::ProtocSucceeded);

    let args = project.last_args();
    let proto_paths: Vec<_> =
        args.iter().filter(|line| line.starts_with("--proto_path=")).collect();
    assert_eq!(proto_paths.len(), 2, "{args:?}");
    let sources: Vec<_> = args.iter().filter(|line| line.ends_with("bar.proto")).collect();
    assert_eq!(sources.len(), 2, "{args:?}");
}

#[test]
fn failing_compiler_classifies_as_protoc_failed() {
    let project = TestProject::new();
    project.write("proto/foo.proto", "syntax = \"proto3\";\n");
    let protoc = project.fake_protoc(1);

    let result = project.generate(&project.request(&protoc)).unwrap();
    assert_eq!(result.kind, GenerationResultKind::ProtocFailed);
    assert!(!result.ok());
}

#[test]
fn missing_sources_classify_by_configuration() {
    let project = TestProject::new();
    let protoc = project.fake_protoc(0);

    let mut request = project.request(&protoc);
    request.fail_on_missing_sources = true;
    let result = project.generate(&request).unwrap();
    assert_eq!(result.kind, GenerationResultKind::NoSources);
    assert!(!result.ok());

    request.fail_on_missing_sources = false;
    let result = project.generate(&request).unwrap();
    assert_eq!(result.kind, GenerationResultKind::NothingToDo);
    assert!(result.ok());
    assert_eq!(project.invocations(), 0);
}

#[test]
fn missing_targets_classify_by_configuration() {
    let project = TestProject::new();
    project.write("proto/foo.proto", "syntax = \"proto3\";\n");
    let protoc = project.fake_protoc(0);

    let mut request = project.request(&protoc);
    request.enabled_languages.clear();
    request.fail_on_missing_targets = true;
    let result = project.generate(&request).unwrap();
    assert_eq!(result.kind, GenerationResultKind::NoTargets);

    request.fail_on_missing_targets = false;
    let result = project.generate(&request).unwrap();
    assert_eq!(result.kind, GenerationResultKind::NothingToDo);
    assert_eq!(project.invocations(), 0);
}

#[test]
fn skip_short_circuits_everything() {
    let project = TestProject::new();
    let protoc = project.fake_protoc(0);
    let mut request = project.request(&protoc);
    request.skip = true;

    let result = project.generate(&request).unwrap();
    assert_eq!(result.kind, GenerationResultKind::NothingToDo);
    assert_eq!(project.invocations(), 0);
}

#[test]
fn descriptor_attachment_reaches_the_registrar() {
    let project = TestProject::new();
    project.write("proto/foo.proto", "syntax = \"proto3\";\n");
    let protoc = project.fake_protoc(0);

    let mut request = project.request(&protoc);
    request.output_descriptor_file = Some(project.path("out/app.binpb"));
    request.output_descriptor_attached = true;
    request.output_descriptor_attachment_classifier = Some("protos".to_string());

    let result = project.generate(&request).unwrap();
    assert_eq!(result.kind, GenerationResultKind::ProtocSucceeded);

    let args = project.last_args();
    assert!(args
        .contains(&format!("--descriptor_set_out={}", project.path("out/app.binpb").display())));
    assert!(args.contains(&"--include_imports".to_string()));

    let attachments = project.registrar.attachments.lock().unwrap();
    assert_eq!(
        attachments.as_slice(),
        [(project.path("out/app.binpb"), "binpb".to_string(), Some("protos".to_string()))]
    );
}
