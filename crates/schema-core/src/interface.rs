//! Interfaces: fields shared by every message of a transport.

use schema_xml::{Location, XmlNode};
use tracing::debug;

use crate::alias::{parse_aliases, Alias};
use crate::common::VersionRange;
use crate::context::ParseContext;
use crate::error::SchemaError;
use crate::field::{is_qualified_name, parse_members, Field, FieldScope};
use crate::namespace::NamespaceId;
use crate::props::Props;

const PROPS: &[&str] = &["name", "description", "copyFieldsFrom"];

#[derive(Debug, Clone)]
pub struct Interface {
    pub(crate) name: String,
    pub(crate) description: Option<String>,
    pub(crate) copy_fields_from: Option<String>,
    pub(crate) fields: Vec<Field>,
    pub(crate) aliases: Vec<Alias>,
    pub(crate) extra_attributes: Vec<(String, String)>,
    pub(crate) namespace: NamespaceId,
    pub(crate) location: Location,
}

impl Interface {
    pub(crate) fn parse(
        node: &XmlNode,
        namespace: NamespaceId,
        cx: &mut ParseContext<'_>,
    ) -> Result<Self, SchemaError> {
        let props = Props::new(node, &[PROPS], false)?;
        let name = props
            .identifier("name")?
            .ok_or_else(|| SchemaError::missing(node.location(), "interface", "name"))?;
        let copy_fields_from = match props.get("copyFieldsFrom")? {
            Some(source) if is_qualified_name(source) => Some(source.to_string()),
            Some(source) => return Err(props.bad_value("copyFieldsFrom", source, "expected an interface or bundle name")),
            None => None,
        };
        let mut field_nodes: Vec<&XmlNode> = Vec::new();
        let mut alias_nodes: Vec<&XmlNode> = Vec::new();
        for child in props.elements() {
            match child.name() {
                "fields" => field_nodes.extend(child.children()),
                "alias" => alias_nodes.push(child),
                _ => field_nodes.push(child),
            }
        }
        let version = VersionRange::default();
        let scope = FieldScope::new(version, cx.endian, namespace);
        let fields = parse_members(&field_nodes, &scope, node.location(), cx)?;
        let aliases = parse_aliases(&alias_nodes, &[], &version, cx)?;
        debug!(interface = name, fields = fields.len(), "parsed interface");
        Ok(Self {
            name: name.to_string(),
            description: props.string("description")?,
            copy_fields_from,
            fields,
            aliases,
            extra_attributes: props.extra_attributes(),
            namespace,
            location: node.location().clone(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    pub fn copy_fields_from(&self) -> Option<&str> {
        self.copy_fields_from.as_deref()
    }

    /// Fields after copying.
    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    pub fn field(&self, name: &str) -> Option<&Field> {
        self.fields.iter().find(|f| f.name() == name)
    }

    pub fn aliases(&self) -> &[Alias] {
        &self.aliases
    }

    pub fn extra_attributes(&self) -> &[(String, String)] {
        &self.extra_attributes
    }

    pub fn namespace(&self) -> NamespaceId {
        self.namespace
    }

    pub fn location(&self) -> &Location {
        &self.location
    }
}
