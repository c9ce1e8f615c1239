//! Locating and materialising `protoc` plugins.

use crate::{
    digest::Digest,
    error::{PmpError, Result},
    fetch::UriFetcher,
    platform::{make_executable, Platform},
    resolver::{ArtifactPathResolver, Coordinate, DependencyResolver, ResolutionDepth},
    tempspace::TempSpace,
    utils,
};
use sha2::{Digest as _, Sha256};
use std::{collections::BTreeSet, fs, path::PathBuf};
use url::Url;

/// A single plugin the compiler should invoke, before resolution.
#[derive(Clone, Debug)]
pub enum PluginSpec {
    /// A native executable published to the repository; the classifier is
    /// defaulted from the host platform when omitted.
    RepoBinary { coordinate: Coordinate, options: Option<String>, order: i32, skip: bool },
    /// An executable found by walking the system path.
    PathBinary {
        name: String,
        options: Option<String>,
        order: i32,
        skip: bool,
        digest: Option<Digest>,
    },
    /// An executable downloaded from a URI.
    UriBinary {
        uri: Url,
        options: Option<String>,
        order: i32,
        skip: bool,
        digest: Option<Digest>,
    },
    /// A JVM plugin resolved transitively from the repository and wrapped in
    /// a launcher script.
    RepoJvm {
        coordinate: Coordinate,
        main_class: String,
        jvm_args: Vec<String>,
        order: i32,
        skip: bool,
    },
}

impl PluginSpec {
    /// The stable identifier used as the `--<id>_out` / `protoc-gen-<id>`
    /// key: the coordinate or executable name, lowercased, with every
    /// non-alphanumeric character folded to `_`.
    pub fn id(&self) -> String {
        let base: &str = match self {
            Self::RepoBinary { coordinate, .. } | Self::RepoJvm { coordinate, .. } => {
                &coordinate.name
            }
            Self::PathBinary { name, .. } => name,
            Self::UriBinary { uri, .. } => uri
                .path_segments()
                .and_then(|mut segments| segments.next_back())
                .filter(|s| !s.is_empty())
                .unwrap_or("plugin"),
        };
        normalize_id(base)
    }

    pub fn order(&self) -> i32 {
        match self {
            Self::RepoBinary { order, .. }
            | Self::PathBinary { order, .. }
            | Self::UriBinary { order, .. }
            | Self::RepoJvm { order, .. } => *order,
        }
    }

    pub fn skip(&self) -> bool {
        match self {
            Self::RepoBinary { skip, .. }
            | Self::PathBinary { skip, .. }
            | Self::UriBinary { skip, .. }
            | Self::RepoJvm { skip, .. } => *skip,
        }
    }

    fn options(&self) -> Option<String> {
        match self {
            Self::RepoBinary { options, .. }
            | Self::PathBinary { options, .. }
            | Self::UriBinary { options, .. } => options.clone(),
            Self::RepoJvm { .. } => None,
        }
    }
}

fn normalize_id(raw: &str) -> String {
    raw.to_lowercase()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect()
}

/// A plugin ready to be written into the compiler invocation.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ResolvedPlugin {
    pub id: String,
    pub path: PathBuf,
    pub options: Option<String>,
    pub order: i32,
}

/// Resolves [`PluginSpec`]s into executables on disk.
pub struct PluginResolver<'a> {
    platform: &'a Platform,
    fetcher: &'a UriFetcher<'a>,
    repository: &'a dyn ArtifactPathResolver,
    space: &'a TempSpace,
}

impl<'a> PluginResolver<'a> {
    pub fn new(
        platform: &'a Platform,
        fetcher: &'a UriFetcher<'a>,
        repository: &'a dyn ArtifactPathResolver,
        space: &'a TempSpace,
    ) -> Self {
        Self { platform, fetcher, repository, space }
    }

    /// Resolves all non-skipped plugins, ordered by `order` with ties broken
    /// by declaration position.
    pub fn resolve_all(&self, specs: &[PluginSpec]) -> Result<Vec<ResolvedPlugin>> {
        let mut resolved = Vec::with_capacity(specs.len());
        for spec in specs {
            if spec.skip() {
                debug!(id = %spec.id(), "plugin skipped by configuration");
                continue;
            }
            resolved.push(self.resolve(spec)?);
        }
        // stable sort keeps declaration order between equal orders
        resolved.sort_by_key(|plugin: &ResolvedPlugin| plugin.order);
        Ok(resolved)
    }

    fn resolve(&self, spec: &PluginSpec) -> Result<ResolvedPlugin> {
        let id = spec.id();
        let path = match spec {
            PluginSpec::RepoBinary { coordinate, .. } => {
                let mut coordinate = coordinate.clone().with_kind("exe".to_string());
                if coordinate.classifier.is_none() {
                    let classifier = self.platform.classifier(&coordinate.name)?;
                    coordinate = coordinate.with_classifier(classifier);
                }
                let path =
                    DependencyResolver::new(self.repository).resolve_one(&coordinate)?;
                make_executable(&path)?;
                path
            }
            PluginSpec::PathBinary { name, digest, .. } => {
                let path =
                    self.platform.search_path(name).ok_or_else(|| PmpError::Resolution {
                        coordinate: name.clone(),
                        source: "no such executable on the system path".into(),
                    })?;
                if let Some(digest) = digest {
                    digest.verify(&path)?;
                }
                path
            }
            PluginSpec::UriBinary { uri, digest, .. } => {
                let path = self.fetcher.fetch(uri, "exe", digest.as_ref())?.ok_or_else(|| {
                    PmpError::Fetch {
                        uri: uri.to_string(),
                        reason: "resource not found".to_string(),
                    }
                })?;
                make_executable(&path)?;
                path
            }
            PluginSpec::RepoJvm { coordinate, main_class, jvm_args, .. } => {
                self.materialize_jvm_launcher(&id, coordinate, main_class, jvm_args)?
            }
        };

        let plugin = ResolvedPlugin {
            id,
            path: utils::canonicalized(path),
            options: spec.options(),
            order: spec.order(),
        };
        debug!(id = %plugin.id, path = %plugin.path.display(), "resolved plugin");
        Ok(plugin)
    }

    /// Resolves the plugin's runtime closure and writes a launcher script
    /// that starts a JVM with the assembled classpath, forwarding the
    /// standard streams to the compiler.
    fn materialize_jvm_launcher(
        &self,
        id: &str,
        coordinate: &Coordinate,
        main_class: &str,
        jvm_args: &[String],
    ) -> Result<PathBuf> {
        let scopes: BTreeSet<String> =
            ["compile", "runtime"].iter().map(|s| s.to_string()).collect();
        let classpath = DependencyResolver::new(self.repository).resolve_dependencies(
            std::slice::from_ref(coordinate),
            ResolutionDepth::Transitive,
            &scopes,
            false,
            true,
        )?;
        if classpath.is_empty() {
            return Err(PmpError::Resolution {
                coordinate: coordinate.to_string(),
                source: "resolved to an empty classpath".into(),
            });
        }

        // the hash keys the script name, so an unchanged classpath reuses
        // the same launcher across invocations
        let mut hasher = Sha256::new();
        for entry in &classpath {
            hasher.update(entry.to_string_lossy().as_bytes());
            hasher.update([0]);
        }
        let hash = hex::encode(&hasher.finalize()[..16]);

        let dir = self.space.dir("plugins")?;
        let script = if self.platform.is_windows() {
            let script = dir.join(format!("{id}-{hash}.bat"));
            fs::write(&script, batch_launcher(&classpath, main_class, jvm_args))
                .map_err(|err| PmpError::io(err, &script))?;
            script
        } else {
            let script = dir.join(format!("{id}-{hash}.sh"));
            fs::write(&script, shell_launcher(&classpath, main_class, jvm_args))
                .map_err(|err| PmpError::io(err, &script))?;
            script
        };
        make_executable(&script)?;
        Ok(script)
    }
}

fn shell_launcher(classpath: &[PathBuf], main_class: &str, jvm_args: &[String]) -> String {
    let classpath = join_classpath(classpath, ':');
    let mut script = String::from("#!/usr/bin/env sh\nset -eu\n");
    script.push_str("JAVA=\"${JAVA_HOME:+${JAVA_HOME}/bin/}java\"\n");
    script.push_str("exec \"${JAVA}\"");
    for arg in jvm_args {
        script.push_str(&format!(" {}", shell_quote(arg)));
    }
    script.push_str(&format!(" -cp {} {} \"$@\"\n", shell_quote(&classpath), main_class));
    script
}

fn batch_launcher(classpath: &[PathBuf], main_class: &str, jvm_args: &[String]) -> String {
    let classpath = join_classpath(classpath, ';');
    let mut script = String::from("@echo off\r\n");
    script.push_str("if defined JAVA_HOME (set \"JAVA=%JAVA_HOME%\\bin\\java\") else (set \"JAVA=java\")\r\n");
    script.push_str("\"%JAVA%\"");
    for arg in jvm_args {
        script.push_str(&format!(" \"{arg}\""));
    }
    script.push_str(&format!(" -cp \"{classpath}\" {main_class} %*\r\n"));
    script
}

fn join_classpath(classpath: &[PathBuf], separator: char) -> String {
    classpath
        .iter()
        .map(|p| p.to_string_lossy().into_owned())
        .collect::<Vec<_>>()
        .join(&separator.to_string())
}

fn shell_quote(raw: &str) -> String {
    format!("'{}'", raw.replace('\'', "'\\''"))
}
