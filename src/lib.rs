#![doc = include_str!("../README.md")]
#![warn(rustdoc::all)]
#![deny(unused_must_use, rust_2018_idioms)]
#![cfg_attr(docsrs, feature(doc_cfg, doc_auto_cfg))]

#[macro_use]
extern crate tracing;

pub mod error;
pub use error::{PmpError, PmpIoError, Result};

pub mod digest;
pub use digest::{Digest, DigestAlgorithm};

pub mod platform;
pub use platform::Platform;

pub mod tempspace;
pub use tempspace::TempSpace;

pub mod fetch;

pub mod resolver;
pub use resolver::{
    plugin::{PluginSpec, ResolvedPlugin},
    protoc::ProtocSource,
    ArtifactPathResolver, ArtifactVersion, Coordinate, Exclusion, ResolutionDepth,
    ResolvedArtifact,
};

pub mod aggregate;
pub use aggregate::{GlobFilter, ProjectInputListing, ProtoFileFilter, SourceFilter, SourceListing};

pub mod cache;
pub use cache::IncrementalCache;

pub mod argfile;
pub use argfile::{ArgFile, Language};

pub mod exec;

mod generate;
pub use generate::{
    BuildOrchestrator, GenerationRequest, GenerationResult, GenerationResultKind,
    OutputDescriptorAttachmentRegistrar, SourceRootRegistrar,
};

pub mod utils;
