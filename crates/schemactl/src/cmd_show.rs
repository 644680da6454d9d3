use std::path::PathBuf;

use anyhow::{anyhow, Result};
use protoschema::model::{Entity, Field, FieldKind, Frame, Message, Protocol};
use serde::Serialize;

use crate::common::{self, RunOptions};

#[derive(Serialize)]
struct FieldView {
    name: String,
    kind: String,
    length: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    bits: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    target: Option<String>,
    version_dependent: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    members: Vec<FieldView>,
}

impl FieldView {
    fn new(field: &Field) -> Self {
        let target = match field.details() {
            FieldKind::Ref(reference) => Some(reference.target().to_string()),
            _ => None,
        };
        Self {
            name: field.name().to_string(),
            kind: field.kind().to_string(),
            length: common::format_length(field),
            bits: field.bit_length(),
            target,
            version_dependent: field.is_version_dependent(),
            members: field.nested().into_iter().map(FieldView::new).collect(),
        }
    }

    fn print(&self, depth: usize) {
        let indent = "  ".repeat(depth);
        let target = self
            .target
            .as_deref()
            .map(|t| format!(" -> {t}"))
            .unwrap_or_default();
        println!("{indent}{} : {}{target} [{}]", self.name, self.kind, self.length);
        for member in &self.members {
            member.print(depth + 1);
        }
    }
}

#[derive(Serialize)]
struct LayerView {
    name: String,
    kind: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    field: Option<FieldView>,
}

#[derive(Serialize)]
#[serde(tag = "entity", rename_all = "lowercase")]
enum EntityView {
    Namespace {
        name: String,
        children: Vec<String>,
    },
    Field(FieldView),
    Message {
        name: String,
        id: i128,
        sender: String,
        min_length: usize,
        max_length: Option<usize>,
        fields: Vec<FieldView>,
        aliases: Vec<String>,
    },
    Interface {
        name: String,
        fields: Vec<FieldView>,
    },
    Frame {
        name: String,
        layers: Vec<LayerView>,
    },
    Alias {
        name: String,
        path: String,
    },
}

fn message_view(message: &Message) -> EntityView {
    let max = message.max_length();
    EntityView::Message {
        name: message.name().to_string(),
        id: message.id(),
        sender: format!("{:?}", message.sender()).to_lowercase(),
        min_length: message.min_length(),
        max_length: (max != usize::MAX).then_some(max),
        fields: message.fields().iter().map(FieldView::new).collect(),
        aliases: message.aliases().iter().map(|a| a.name().to_string()).collect(),
    }
}

fn frame_view(frame: &Frame) -> EntityView {
    EntityView::Frame {
        name: frame.name().to_string(),
        layers: frame
            .layers()
            .iter()
            .map(|layer| LayerView {
                name: layer.name().to_string(),
                kind: layer.kind().element(),
                field: layer.field().map(FieldView::new),
            })
            .collect(),
    }
}

fn describe(protocol: &Protocol, name: &str) -> Result<EntityView> {
    let entity = protocol
        .find(name)
        .ok_or_else(|| anyhow!("no entity named '{name}'"))?;
    Ok(match entity {
        Entity::Namespace(ns) => {
            let mut children: Vec<String> = Vec::new();
            children.extend(ns.fields().iter().map(|f| format!("field {}", f.name())));
            children.extend(ns.messages().iter().map(|m| format!("message {}", m.name())));
            children.extend(ns.interfaces().iter().map(|i| format!("interface {}", i.name())));
            children.extend(ns.frames().iter().map(|f| format!("frame {}", f.name())));
            EntityView::Namespace {
                name: ns.name().to_string(),
                children,
            }
        }
        Entity::Field(field) => EntityView::Field(FieldView::new(field)),
        Entity::Message(message) => message_view(message),
        Entity::Interface(interface) => EntityView::Interface {
            name: interface.name().to_string(),
            fields: interface.fields().iter().map(FieldView::new).collect(),
        },
        Entity::Frame(frame) => frame_view(frame),
        Entity::Alias(alias) => EntityView::Alias {
            name: alias.name().to_string(),
            path: alias.path().join("."),
        },
    })
}

fn print_fields(fields: &[FieldView]) {
    for field in fields {
        field.print(1);
    }
}

pub fn run(files: &[PathBuf], name: &str, options: &RunOptions) -> Result<()> {
    let protocol = common::load_protocol(files, options)?;
    let view = describe(&protocol, name)?;
    if options.json {
        return common::print_json(&view);
    }

    match &view {
        EntityView::Namespace { name, children } => {
            println!("namespace {name}");
            for child in children {
                println!("  {child}");
            }
        }
        EntityView::Field(field) => field.print(0),
        EntityView::Message {
            name,
            id,
            sender,
            min_length,
            max_length,
            fields,
            aliases,
        } => {
            let max = max_length.map_or_else(|| "unbounded".to_string(), |m| m.to_string());
            println!("message {name} id={id} sender={sender} length={min_length}..{max}");
            print_fields(fields);
            if !aliases.is_empty() {
                println!("  aliases: {}", aliases.join(", "));
            }
        }
        EntityView::Interface { name, fields } => {
            println!("interface {name}");
            print_fields(fields);
        }
        EntityView::Frame { name, layers } => {
            println!("frame {name}");
            for layer in layers {
                println!("  {} ({})", layer.name, layer.kind);
                if let Some(field) = &layer.field {
                    field.print(2);
                }
            }
        }
        EntityView::Alias { name, path } => println!("alias {name} = ${path}"),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use protoschema::model::CompileOptions;

    const SCHEMA: &str = r#"<schema name="demo">
        <fields><int name="Len" type="uint16"/></fields>
        <message name="Hello" id="7" sender="client">
            <bundle name="hdr">
                <int name="ver" type="uint8"/>
                <ref name="len" field="Len"/>
            </bundle>
            <string name="text"/>
            <alias name="version" field="$hdr.ver"/>
        </message>
    </schema>"#;

    fn protocol() -> Protocol {
        let out = protoschema::compile_sources(&[("demo.xml", SCHEMA)], &CompileOptions::default())
            .expect("well-formed");
        out.model.expect("model")
    }

    #[test]
    fn message_view_lists_nested_fields() {
        let view = describe(&protocol(), "Hello").expect("found");
        let EntityView::Message {
            id,
            sender,
            min_length,
            max_length,
            fields,
            aliases,
            ..
        } = view
        else {
            panic!("message view expected");
        };
        assert_eq!(id, 7);
        assert_eq!(sender, "client");
        assert_eq!(min_length, 3);
        assert_eq!(max_length, None);
        assert_eq!(fields[0].members.len(), 2);
        assert_eq!(fields[0].members[1].target.as_deref(), Some("Len"));
        assert_eq!(aliases, ["version"]);
    }

    #[test]
    fn json_view_is_tagged() {
        let view = describe(&protocol(), "@demo.Len").expect("found");
        let json = serde_json::to_value(&view).expect("json");
        assert_eq!(json["entity"], "field");
        assert_eq!(json["kind"], "int");
        assert_eq!(json["length"], "2");
        assert!(describe(&protocol(), "Nope").is_err());
    }
}
