use std::path::PathBuf;

use anyhow::{bail, Result};
use protoschema::model::Diagnostic;
use serde::Serialize;

use crate::common::{self, RunOptions};

#[derive(Serialize)]
struct CheckReport<'a> {
    success: bool,
    schemas: Vec<&'a str>,
    diagnostics: &'a [Diagnostic],
}

pub fn run(files: &[PathBuf], options: &RunOptions) -> Result<()> {
    let out = common::compile(files, &options.compile)?;
    if options.json {
        let schemas: Vec<&str> = out
            .model
            .as_ref()
            .map(|model| model.schemas().iter().map(|s| s.name()).collect())
            .unwrap_or_default();
        common::print_json(&CheckReport {
            success: out.success,
            schemas,
            diagnostics: &out.diagnostics,
        })?;
    } else {
        common::print_diagnostics(&out.diagnostics);
    }

    let summary = common::summary(&out.diagnostics);
    let Some(model) = out.model else {
        bail!("check failed: {summary}");
    };
    if !options.json {
        println!("ok: {} schema(s), {summary}", model.schemas().len());
    }
    Ok(())
}
