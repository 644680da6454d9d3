#![cfg_attr(docsrs, feature(doc_cfg))]
//! Protocol schema facade that re-exports the workspace crates and provides
//! helpers to load schema documents and compile them in one call.
//!
//! ```rust,no_run
//! use protoschema::{compile_files, model::CompileOptions, LoadError};
//!
//! # fn run() -> Result<(), LoadError> {
//! let out = compile_files(&["base.xml", "app.xml"], &CompileOptions::default())?;
//! for diagnostic in &out.diagnostics {
//!     eprintln!("{diagnostic}");
//! }
//! if let Some(protocol) = out.model {
//!     println!("{} schemas", protocol.schemas().len());
//! }
//! # Ok(())
//! # }
//! ```

pub use schema_core as model;
pub use schema_xml as xml;

use std::path::{Path, PathBuf};

use schema_core::{compile, Compilation, CompileOptions, SchemaDocument};
use thiserror::Error;
use tracing::debug;

/// Error type produced while loading schema documents.
#[derive(Debug, Error)]
pub enum LoadError {
    /// A schema file could not be read.
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    /// A document is not well-formed XML.
    #[error(transparent)]
    Xml(#[from] xml::XmlError),
}

/// Read and parse every file, keeping the given order.
pub fn load_files<P: AsRef<Path>>(paths: &[P]) -> Result<Vec<SchemaDocument>, LoadError> {
    paths
        .iter()
        .map(|path| {
            let path = path.as_ref();
            let text = std::fs::read_to_string(path).map_err(|source| LoadError::Io {
                path: path.to_path_buf(),
                source,
            })?;
            debug!(path = %path.display(), bytes = text.len(), "loaded schema file");
            Ok(SchemaDocument::parse(path.display().to_string(), &text)?)
        })
        .collect()
}

/// Load `paths` and compile them as one protocol.
///
/// Only I/O and XML syntax problems are returned as `Err`; schema problems
/// are reported through [`Compilation::diagnostics`].
pub fn compile_files<P: AsRef<Path>>(
    paths: &[P],
    options: &CompileOptions,
) -> Result<Compilation, LoadError> {
    let documents = load_files(paths)?;
    Ok(compile(&documents, options))
}

/// Compile in-memory `(file name, text)` pairs.
pub fn compile_sources(
    sources: &[(&str, &str)],
    options: &CompileOptions,
) -> Result<Compilation, LoadError> {
    let documents = sources
        .iter()
        .map(|(file, text)| SchemaDocument::parse(*file, text))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(compile(&documents, options))
}
