//! Frames: ordered transport layers wrapping a message.

use std::fmt;

use schema_xml::{Location, XmlNode};
use tracing::debug;

use crate::common::VersionRange;
use crate::context::ParseContext;
use crate::error::{ErrorKind, SchemaError};
use crate::field::{implicit_ref, is_qualified_name, parse_field, Field, FieldScope, Kind};
use crate::namespace::NamespaceId;
use crate::props::Props;

const FRAME_PROPS: &[&str] = &["name", "description"];
const LAYER_PROPS: &[&str] = &["name", "description", "field"];
const VALUE_PROPS: &[&str] = &["interfaceFieldName", "pseudo"];
const CHECKSUM_PROPS: &[&str] = &["alg", "algName", "from", "until", "verifyBeforeRead"];
const CUSTOM_PROPS: &[&str] = &["idReplacement", "semanticLayerType"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChecksumAlg {
    Sum,
    CrcCcitt,
    Crc16,
    Crc32,
    Custom,
}

impl ChecksumAlg {
    fn parse(text: &str) -> Option<Self> {
        Some(match text {
            "sum" => ChecksumAlg::Sum,
            "crc-ccitt" | "crc_ccitt" => ChecksumAlg::CrcCcitt,
            "crc-16" | "crc_16" => ChecksumAlg::Crc16,
            "crc-32" | "crc_32" => ChecksumAlg::Crc32,
            "custom" => ChecksumAlg::Custom,
            _ => return None,
        })
    }

    pub fn name(self) -> &'static str {
        match self {
            ChecksumAlg::Sum => "sum",
            ChecksumAlg::CrcCcitt => "crc-ccitt",
            ChecksumAlg::Crc16 => "crc-16",
            ChecksumAlg::Crc32 => "crc-32",
            ChecksumAlg::Custom => "custom",
        }
    }
}

/// End of the checksummed span that is not the checksum layer itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChecksumBound {
    /// From this earlier layer up to the checksum.
    From(String),
    /// From the checksum up to this later layer.
    Until(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LayerKind {
    Sync,
    Size,
    Id,
    Value {
        interface_field_name: String,
        pseudo: bool,
    },
    Payload,
    Checksum {
        alg: ChecksumAlg,
        alg_name: Option<String>,
        bound: ChecksumBound,
        verify_before_read: bool,
    },
    Custom {
        id_replacement: bool,
        semantic_layer_type: Option<String>,
    },
}

impl LayerKind {
    pub fn element(&self) -> &'static str {
        match self {
            LayerKind::Sync => "sync",
            LayerKind::Size => "size",
            LayerKind::Id => "id",
            LayerKind::Value { .. } => "value",
            LayerKind::Payload => "payload",
            LayerKind::Checksum { .. } => "checksum",
            LayerKind::Custom { .. } => "custom",
        }
    }

    /// Whether the layer identifies the message.
    pub fn is_id(&self) -> bool {
        matches!(
            self,
            LayerKind::Id
                | LayerKind::Custom {
                    id_replacement: true,
                    ..
                }
        )
    }
}

impl fmt::Display for LayerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.element())
    }
}

#[derive(Debug, Clone)]
pub struct Layer {
    name: String,
    description: Option<String>,
    kind: LayerKind,
    pub(crate) field: Option<Field>,
    covers: Option<(usize, usize)>,
    location: Location,
}

impl Layer {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    pub fn kind(&self) -> &LayerKind {
        &self.kind
    }

    /// Field implementing the layer; absent for payload and some custom layers.
    pub fn field(&self) -> Option<&Field> {
        self.field.as_ref()
    }

    /// Inclusive layer index range a checksum is computed over.
    pub fn covers(&self) -> Option<(usize, usize)> {
        self.covers
    }

    pub fn location(&self) -> &Location {
        &self.location
    }
}

#[derive(Debug, Clone)]
pub struct Frame {
    name: String,
    description: Option<String>,
    layers: Vec<Layer>,
    namespace: NamespaceId,
    location: Location,
}

impl Frame {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    /// Layers from the outermost to the payload and beyond.
    pub fn layers(&self) -> &[Layer] {
        &self.layers
    }

    pub(crate) fn layers_mut(&mut self) -> &mut [Layer] {
        &mut self.layers
    }

    pub fn layer(&self, name: &str) -> Option<&Layer> {
        self.layers.iter().find(|l| l.name == name)
    }

    pub fn namespace(&self) -> NamespaceId {
        self.namespace
    }

    pub fn location(&self) -> &Location {
        &self.location
    }

    pub(crate) fn parse(
        node: &XmlNode,
        namespace: NamespaceId,
        cx: &mut ParseContext<'_>,
    ) -> Result<Self, SchemaError> {
        let props = Props::new(node, &[FRAME_PROPS], cx.strict(true))?;
        let name = props
            .identifier("name")?
            .ok_or_else(|| SchemaError::missing(node.location(), "frame", "name"))?;
        let mut layer_nodes: Vec<&XmlNode> = Vec::new();
        for child in props.elements() {
            if child.name() == "layers" {
                layer_nodes.extend(child.children());
            } else {
                layer_nodes.push(child);
            }
        }
        let mut layers: Vec<Layer> = Vec::with_capacity(layer_nodes.len());
        for layer_node in layer_nodes {
            let layer = parse_layer(layer_node, namespace, cx)?;
            if layers.iter().any(|l| l.name == layer.name) {
                return Err(SchemaError::duplicate(&layer.location, "layer", &layer.name));
            }
            layers.push(layer);
        }
        let mut frame = Frame {
            name: name.to_string(),
            description: props.string("description")?,
            layers,
            namespace,
            location: node.location().clone(),
        };
        frame.check_layout()?;
        debug!(frame = name, layers = frame.layers.len(), "parsed frame");
        Ok(frame)
    }

    fn layout_error(&self, location: &Location, message: String) -> SchemaError {
        SchemaError::new(
            location.clone(),
            ErrorKind::FrameLayout {
                frame: self.name.clone(),
                message,
            },
        )
    }

    /// Check layer order and bind checksum spans.
    fn check_layout(&mut self) -> Result<(), SchemaError> {
        let payloads: Vec<usize> = self.positions(|k| matches!(k, LayerKind::Payload));
        let payload = match payloads.as_slice() {
            [single] => *single,
            other => {
                return Err(self.layout_error(
                    &self.location,
                    format!("expected exactly one payload layer, found {}", other.len()),
                ))
            }
        };
        let ids = self.positions(LayerKind::is_id);
        if ids.len() > 1 {
            return Err(self.layout_error(
                &self.layers[ids[1]].location,
                "at most one id layer is allowed".to_string(),
            ));
        }
        for (idx, layer) in self.layers.iter().enumerate() {
            if (layer.kind.is_id() || layer.kind == LayerKind::Size) && idx > payload {
                return Err(self.layout_error(
                    &layer.location,
                    format!("{} layer '{}' must precede the payload", layer.kind, layer.name),
                ));
            }
        }
        let mut spans = Vec::new();
        for (idx, layer) in self.layers.iter().enumerate() {
            let LayerKind::Checksum { bound, .. } = &layer.kind else {
                continue;
            };
            let (target, earlier) = match bound {
                ChecksumBound::From(target) => (target, true),
                ChecksumBound::Until(target) => (target, false),
            };
            let Some(pos) = self.layers.iter().position(|l| &l.name == target) else {
                return Err(SchemaError::dangling(&layer.location, "layer", target));
            };
            let span = match (earlier, pos.cmp(&idx)) {
                (true, std::cmp::Ordering::Less) => (pos, idx - 1),
                (false, std::cmp::Ordering::Greater) => (idx + 1, pos),
                _ => {
                    return Err(self.layout_error(
                        &layer.location,
                        format!(
                            "checksum '{}' must name {} layer, '{target}' is not",
                            layer.name,
                            if earlier { "an earlier" } else { "a later" }
                        ),
                    ))
                }
            };
            spans.push((idx, span));
        }
        for (idx, span) in spans {
            self.layers[idx].covers = Some(span);
        }
        Ok(())
    }

    fn positions(&self, pick: impl Fn(&LayerKind) -> bool) -> Vec<usize> {
        self.layers
            .iter()
            .enumerate()
            .filter(|(_, l)| pick(&l.kind))
            .map(|(idx, _)| idx)
            .collect()
    }
}

fn parse_layer(
    node: &XmlNode,
    namespace: NamespaceId,
    cx: &mut ParseContext<'_>,
) -> Result<Layer, SchemaError> {
    let element = node.name();
    let extra: &[&str] = match element {
        "sync" | "size" | "id" | "payload" => &[],
        "value" => VALUE_PROPS,
        "checksum" => CHECKSUM_PROPS,
        "custom" => CUSTOM_PROPS,
        _ => {
            return Err(SchemaError::new(
                node.location().clone(),
                ErrorKind::UnexpectedElement {
                    element: element.to_string(),
                    parent: "frame".to_string(),
                },
            ))
        }
    };
    let props = Props::new(node, &[LAYER_PROPS, extra], cx.strict(true))?;
    let name = props
        .identifier("name")?
        .ok_or_else(|| SchemaError::missing(node.location(), element, "name"))?;

    let field_nodes: Vec<&XmlNode> = props
        .elements()
        .iter()
        .copied()
        .filter(|n| Kind::from_element(n.name()).is_some())
        .collect();
    if let Some(unexpected) = props.elements().iter().find(|n| Kind::from_element(n.name()).is_none()) {
        return Err(SchemaError::new(
            unexpected.location().clone(),
            ErrorKind::UnexpectedElement {
                element: unexpected.name().to_string(),
                parent: element.to_string(),
            },
        ));
    }
    let field = match (props.get("field")?, field_nodes.as_slice()) {
        (Some(_), [first, ..]) => {
            return Err(SchemaError::new(
                first.location().clone(),
                ErrorKind::DuplicateProperty {
                    property: "field".to_string(),
                },
            ))
        }
        (Some(target), []) if is_qualified_name(target) => Some(implicit_ref(
            name,
            target,
            VersionRange::default(),
            namespace,
            node.location(),
        )),
        (Some(target), []) => return Err(props.bad_value("field", target, "expected a field name")),
        (None, [single]) => {
            let scope = FieldScope::new(VersionRange::default(), cx.endian, namespace);
            Some(parse_field(single, &scope.named(name), cx)?)
        }
        (None, []) => None,
        (None, _) => {
            return Err(SchemaError::invalid(
                node.location(),
                name,
                "a layer holds at most one field",
            ))
        }
    };

    let kind = match element {
        "sync" => LayerKind::Sync,
        "size" => LayerKind::Size,
        "id" => LayerKind::Id,
        "payload" => LayerKind::Payload,
        "value" => LayerKind::Value {
            interface_field_name: props.require("interfaceFieldName")?.to_string(),
            pseudo: props.bool("pseudo", false)?,
        },
        "checksum" => {
            let text = props.require("alg")?;
            let alg = ChecksumAlg::parse(text)
                .ok_or_else(|| props.bad_value("alg", text, "expected sum, crc-ccitt, crc-16, crc-32 or custom"))?;
            let alg_name = props.string("algName")?;
            match (alg, &alg_name) {
                (ChecksumAlg::Custom, None) => return Err(SchemaError::missing(node.location(), element, "algName")),
                (ChecksumAlg::Custom, Some(_)) | (_, None) => {}
                (_, Some(_)) => {
                    return Err(SchemaError::invalid(
                        node.location(),
                        name,
                        "'algName' is only used with alg=\"custom\"",
                    ))
                }
            }
            let bound = match (props.get("from")?, props.get("until")?) {
                (Some(from), None) => ChecksumBound::From(from.to_string()),
                (None, Some(until)) => ChecksumBound::Until(until.to_string()),
                _ => {
                    return Err(SchemaError::invalid(
                        node.location(),
                        name,
                        "exactly one of 'from' and 'until' must be set",
                    ))
                }
            };
            LayerKind::Checksum {
                alg,
                alg_name,
                bound,
                verify_before_read: props.bool("verifyBeforeRead", false)?,
            }
        }
        _ => LayerKind::Custom {
            id_replacement: props.bool("idReplacement", false)?,
            semantic_layer_type: props.string("semanticLayerType")?,
        },
    };

    match (&kind, &field) {
        (LayerKind::Payload, Some(_)) => {
            return Err(SchemaError::invalid(node.location(), name, "a payload layer has no field"))
        }
        (LayerKind::Payload | LayerKind::Custom { .. }, _) | (_, Some(_)) => {}
        (_, None) => return Err(SchemaError::missing(node.location(), element, "field")),
    }
    Ok(Layer {
        name: name.to_string(),
        description: props.string("description")?,
        kind,
        field,
        covers: None,
        location: node.location().clone(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostics::Diagnostics;
    use crate::protocol::CompileOptions;

    fn parse(xml: &str) -> Result<Frame, SchemaError> {
        let node = schema_xml::parse_document(xml, "frame.xml").expect("parse xml");
        let names = vec!["test".to_string()];
        let options = CompileOptions::default();
        let mut diags = Diagnostics::new();
        let mut cx = ParseContext::new(0, &names, &[], &options, &mut diags);
        Frame::parse(&node, NamespaceId::ROOT, &mut cx)
    }

    const FRAME: &str = r#"
        <frame name="Frame">
            <sync name="Sync"><int name="s" type="uint16" defaultValue="0xabcd"/></sync>
            <size name="Size"><int name="len" type="uint16"/></size>
            <id name="Id" field="MsgId"/>
            <payload name="Data"/>
            <checksum name="Crc" alg="crc-16" from="Size"><int name="crc" type="uint16"/></checksum>
        </frame>"#;

    #[test]
    fn layers_are_bound() {
        let frame = parse(FRAME).expect("frame");
        assert_eq!(frame.layers().len(), 5);
        let crc = frame.layer("Crc").expect("checksum");
        assert_eq!(crc.covers(), Some((1, 3)));
        assert!(matches!(crc.kind(), LayerKind::Checksum { alg: ChecksumAlg::Crc16, .. }));
        let id = frame.layer("Id").and_then(Layer::field).expect("id field");
        assert_eq!(id.name(), "Id");
        assert_eq!(id.as_ref_field().map(|r| r.target()), Some("MsgId"));
        assert!(frame.layer("Data").and_then(Layer::field).is_none());
    }

    #[test]
    fn payload_count() {
        let none = parse(r#"<frame name="F"><size name="S"><int name="l" type="uint8"/></size></frame>"#);
        assert!(matches!(none.expect_err("no payload").kind(), ErrorKind::FrameLayout { .. }));
        let two = parse(r#"<frame name="F"><payload name="A"/><payload name="B"/></frame>"#);
        assert!(matches!(two.expect_err("two payloads").kind(), ErrorKind::FrameLayout { .. }));
        assert!(parse(r#"<frame name="F"><layers><payload name="A"/></layers></frame>"#).is_ok());
    }

    #[test]
    fn ordering_rules() {
        let late_size = parse(
            r#"<frame name="F"><payload name="P"/><size name="S"><int name="l" type="uint8"/></size></frame>"#,
        );
        assert!(matches!(late_size.expect_err("size after payload").kind(), ErrorKind::FrameLayout { .. }));
        let two_ids = parse(
            r#"<frame name="F"><id name="A" field="X"/><custom name="B" idReplacement="true"/><payload name="P"/></frame>"#,
        );
        assert!(matches!(two_ids.expect_err("two ids").kind(), ErrorKind::FrameLayout { .. }));
        let backwards = parse(
            r#"<frame name="F"><payload name="P"/><checksum name="C" alg="sum" until="P"><int name="c" type="uint8"/></checksum></frame>"#,
        );
        assert!(matches!(backwards.expect_err("until earlier").kind(), ErrorKind::FrameLayout { .. }));
        let dup = parse(r#"<frame name="F"><payload name="P"/><custom name="P"/></frame>"#);
        assert!(matches!(dup.expect_err("dup").kind(), ErrorKind::Duplicate { .. }));
    }

    #[test]
    fn layer_properties() {
        let err = parse(r#"<frame name="F"><payload name="P"/><checksum name="C" alg="custom" from="P"><int name="c" type="uint8"/></checksum></frame>"#);
        assert!(matches!(err.expect_err("algName").kind(), ErrorKind::MissingProperty { .. }));
        let err = parse(r#"<frame name="F"><size name="S"/><payload name="P"/></frame>"#);
        assert!(matches!(err.expect_err("no field").kind(), ErrorKind::MissingProperty { .. }));
        let err = parse(r#"<frame name="F"><payload name="P" field="X"/></frame>"#);
        assert!(matches!(err.expect_err("payload field").kind(), ErrorKind::Invalid { .. }));
        let err = parse(r#"<frame name="F"><trailer name="T"/><payload name="P"/></frame>"#);
        assert!(matches!(err.expect_err("unknown layer").kind(), ErrorKind::UnexpectedElement { .. }));
    }
}
