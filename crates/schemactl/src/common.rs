use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use protoschema::model::{Compilation, CompileOptions, Diagnostic, Field, Protocol, Severity};
use serde::Serialize;
use tracing::info;

/// Flags shared by every subcommand.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub json: bool,
    pub compile: CompileOptions,
}

pub fn compile(files: &[PathBuf], options: &CompileOptions) -> Result<Compilation> {
    if files.is_empty() {
        bail!("at least one schema file is required");
    }
    let out = protoschema::compile_files(files, options).context("load schema files")?;
    info!(
        files = files.len(),
        success = out.success,
        diagnostics = out.diagnostics.len(),
        "compiled"
    );
    Ok(out)
}

/// Compile and hand out the model, printing diagnostics first.
pub fn load_protocol(files: &[PathBuf], options: &RunOptions) -> Result<Protocol> {
    let out = compile(files, &options.compile)?;
    if !options.json || !out.success {
        print_diagnostics(&out.diagnostics);
    }
    match out.model {
        Some(model) => Ok(model),
        None => bail!("{}", summary(&out.diagnostics)),
    }
}

pub fn print_diagnostics(diagnostics: &[Diagnostic]) {
    for diagnostic in diagnostics {
        eprintln!("{diagnostic}");
    }
}

/// "2 errors, 1 warning" style counts.
pub fn summary(diagnostics: &[Diagnostic]) -> String {
    let errors = diagnostics
        .iter()
        .filter(|d| d.severity != Severity::Warning)
        .count();
    let warnings = diagnostics.len() - errors;
    format!("{}, {}", plural(errors, "error"), plural(warnings, "warning"))
}

fn plural(count: usize, word: &str) -> String {
    if count == 1 {
        format!("1 {word}")
    } else {
        format!("{count} {word}s")
    }
}

/// Byte length as printed in tables: fixed, a range, or open ended.
pub fn format_length(field: &Field) -> String {
    match field.length() {
        Some(len) => len.to_string(),
        None if field.max_length() == usize::MAX => format!("{}..", field.min_length()),
        None => format!("{}..={}", field.min_length(), field.max_length()),
    }
}

pub fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let text = serde_json::to_string_pretty(value).context("serialise JSON output")?;
    println!("{text}");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use protoschema::xml::Location;

    fn diagnostic(severity: Severity) -> Diagnostic {
        Diagnostic {
            severity,
            location: Location::new("a.xml", 1, 1),
            message: "m".into(),
        }
    }

    #[test]
    fn summary_counts_by_severity() {
        let diags = [
            diagnostic(Severity::Fatal),
            diagnostic(Severity::Error),
            diagnostic(Severity::Warning),
        ];
        assert_eq!(summary(&diags), "2 errors, 1 warning");
        assert_eq!(summary(&[]), "0 errors, 0 warnings");
    }

    #[test]
    fn lengths_are_formatted() {
        let out = protoschema::compile_sources(
            &[(
                "l.xml",
                r#"<schema name="l"><fields>
                    <int name="A" type="uint32"/>
                    <string name="B"/>
                    <int name="D" type="uintvar" length="3"/>
                </fields></schema>"#,
            )],
            &CompileOptions::default(),
        )
        .expect("well-formed");
        let model = out.model.expect("model");
        let schema = model.main_schema().expect("schema");
        let lengths: Vec<String> = schema.fields().map(|(_, f)| format_length(f)).collect();
        assert_eq!(lengths[0], "4");
        assert_eq!(lengths[1], "0..");
        assert_eq!(lengths[2], "1..=3");
    }
}
