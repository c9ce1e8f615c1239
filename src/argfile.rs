//! Assembling the `@args` file handed to the compiler.

use crate::{
    error::{PmpError, Result},
    resolver::plugin::ResolvedPlugin,
    utils,
};
use itertools::Itertools;
use std::{
    collections::BTreeSet,
    fmt, fs,
    path::{Path, PathBuf},
};

/// The code generators built into the compiler.
///
/// The enum declaration order is the emission order of the corresponding
/// `--<flag>_out` arguments, so it must stay stable.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub enum Language {
    Cpp,
    CSharp,
    Java,
    Kotlin,
    ObjectiveC,
    Php,
    Python,
    PythonStubs,
    Ruby,
}

impl Language {
    /// The flag name understood by the compiler, e.g. `java` for
    /// `--java_out`.
    pub fn flag(&self) -> &'static str {
        match self {
            Self::Cpp => "cpp",
            Self::CSharp => "csharp",
            Self::Java => "java",
            Self::Kotlin => "kotlin",
            Self::ObjectiveC => "objc",
            Self::Php => "php",
            Self::Python => "python",
            Self::PythonStubs => "pyi",
            Self::Ruby => "ruby",
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.flag())
    }
}

/// Descriptor-set emission flags.
#[derive(Clone, Debug, Default)]
pub struct DescriptorSetOptions {
    pub output_file: Option<PathBuf>,
    pub include_imports: bool,
    pub include_source_info: bool,
    pub retain_options: bool,
}

/// Everything the argument file is computed from. The emission is a pure
/// function of this value.
#[derive(Clone, Debug)]
pub struct ArgFileInputs<'a> {
    pub fatal_warnings: bool,
    pub descriptor: DescriptorSetOptions,
    pub descriptor_inputs: &'a [PathBuf],
    pub extra_arguments: &'a [String],
    pub languages: &'a BTreeSet<Language>,
    pub lite: bool,
    pub plugins: &'a [ResolvedPlugin],
    pub output_directory: &'a Path,
    pub import_roots: &'a [PathBuf],
    pub sources: &'a [PathBuf],
}

/// The rendered argument file, retained in memory next to its on-disk copy.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ArgFile {
    lines: Vec<String>,
}

impl ArgFile {
    /// Builds the argument lines in their mandated order: base flags, user
    /// arguments, language outputs in declaration order, plugin triples,
    /// deduplicated import roots, then the bare source paths.
    pub fn build(inputs: &ArgFileInputs<'_>) -> Self {
        let mut lines = Vec::new();

        if inputs.fatal_warnings {
            lines.push("--fatal_warnings".to_string());
        }
        if let Some(descriptor_file) = &inputs.descriptor.output_file {
            lines.push(format!("--descriptor_set_out={}", descriptor_file.display()));
            if inputs.descriptor.include_imports {
                lines.push("--include_imports".to_string());
            }
            if inputs.descriptor.include_source_info {
                lines.push("--include_source_info".to_string());
            }
            if inputs.descriptor.retain_options {
                lines.push("--retain_options".to_string());
            }
        }
        if !inputs.descriptor_inputs.is_empty() {
            let joined = inputs.descriptor_inputs.iter().map(|p| p.display()).join(":");
            lines.push(format!("--descriptor_set_in={joined}"));
        }

        lines.extend(inputs.extra_arguments.iter().cloned());

        let output = inputs.output_directory.display();
        for language in inputs.languages {
            let lite = if inputs.lite { "lite:" } else { "" };
            lines.push(format!("--{}_out={lite}{output}", language.flag()));
        }

        for plugin in inputs.plugins {
            lines.push(format!("--plugin=protoc-gen-{}={}", plugin.id, plugin.path.display()));
            lines.push(format!("--{}_out={output}", plugin.id));
            if let Some(options) = &plugin.options {
                lines.push(format!("--{}_opt={options}", plugin.id));
            }
        }

        let mut seen = BTreeSet::new();
        for root in inputs.import_roots {
            if seen.insert(root.clone()) {
                lines.push(format!("--proto_path={}", root.display()));
            }
        }

        for source in inputs.sources {
            lines.push(source.to_string_lossy().into_owned());
        }

        let argfile = Self { lines };
        trace!(args = %argfile, "assembled compiler arguments");
        argfile
    }

    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    /// Renders the file body: one argument per line, `\n` separators, no
    /// BOM, trailing newline.
    pub fn render(&self) -> String {
        let mut body = self.lines.join("\n");
        body.push('\n');
        body
    }

    /// Writes the UTF-8 argument file to `path`.
    pub fn write_to(&self, path: &Path) -> Result<()> {
        utils::create_parent_dir_all(path)?;
        fs::write(path, self.render()).map_err(|err| PmpError::io(err, path))?;
        debug!(path = %path.display(), arguments = self.lines.len(), "wrote argument file");
        Ok(())
    }
}

impl fmt::Display for ArgFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.lines.join(" "))
    }
}
