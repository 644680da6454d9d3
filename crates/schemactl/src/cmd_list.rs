use std::path::PathBuf;

use anyhow::Result;
use protoschema::model::{Protocol, Schema};
use serde::Serialize;
use tracing::info;

use crate::common::{self, RunOptions};

#[derive(Serialize)]
struct EntityEntry {
    schema: String,
    kind: &'static str,
    name: String,
    detail: String,
}

fn entries(schema: &Schema) -> Vec<EntityEntry> {
    let entry = |kind: &'static str, name: String, detail: String| EntityEntry {
        schema: schema.name().to_string(),
        kind,
        name,
        detail,
    };
    let mut out = Vec::new();
    for (ns, field) in schema.fields() {
        out.push(entry(
            "field",
            schema.qualified_name(ns, field.name()),
            format!("{} len={}", field.kind(), common::format_length(field)),
        ));
    }
    for message in schema.messages() {
        out.push(entry(
            "message",
            schema.qualified_name(message.namespace(), message.name()),
            format!("id={} fields={}", message.id(), message.fields().len()),
        ));
    }
    for interface in schema.interfaces() {
        out.push(entry(
            "interface",
            schema.qualified_name(interface.namespace(), interface.name()),
            format!("fields={}", interface.fields().len()),
        ));
    }
    for frame in schema.frames() {
        let layers: Vec<&str> = frame.layers().iter().map(|l| l.kind().element()).collect();
        out.push(entry(
            "frame",
            schema.qualified_name(frame.namespace(), frame.name()),
            layers.join(","),
        ));
    }
    out
}

fn collect(protocol: &Protocol) -> Vec<EntityEntry> {
    protocol.schemas().iter().flat_map(entries).collect()
}

pub fn run(files: &[PathBuf], options: &RunOptions) -> Result<()> {
    let protocol = common::load_protocol(files, options)?;
    let rows = collect(&protocol);
    info!(count = rows.len(), "listed entities");

    if options.json {
        common::print_json(&rows)?;
        return Ok(());
    }

    println!("{:<12} {:<10} {:<32} {}", "SCHEMA", "KIND", "NAME", "DETAIL");
    for row in &rows {
        println!(
            "{:<12} {:<10} {:<32} {}",
            row.schema, row.kind, row.name, row.detail
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use protoschema::model::CompileOptions;

    #[test]
    fn lists_every_entity_kind() {
        let out = protoschema::compile_sources(
            &[(
                "p.xml",
                r#"<schema name="p">
                    <fields><int name="Len" type="uint16"/></fields>
                    <namespace name="app">
                        <message name="Ping" id="3"><ref name="len" field="Len"/></message>
                        <interface name="Common"><int name="flags" type="uint8"/></interface>
                        <frame name="Frame">
                            <size name="size" field="Len"/>
                            <payload name="data"/>
                        </frame>
                    </namespace>
                </schema>"#,
            )],
            &CompileOptions::default(),
        )
        .expect("well-formed");
        assert!(out.success, "{:?}", out.diagnostics);
        let rows = collect(&out.model.expect("model"));
        let names: Vec<(&str, &str)> = rows.iter().map(|r| (r.kind, r.name.as_str())).collect();
        assert_eq!(
            names,
            [
                ("field", "Len"),
                ("message", "app.Ping"),
                ("interface", "app.Common"),
                ("frame", "app.Frame"),
            ]
        );
        assert_eq!(rows[0].detail, "int len=2");
        assert_eq!(rows[1].detail, "id=3 fields=1");
        assert_eq!(rows[3].detail, "size,payload");
    }
}
