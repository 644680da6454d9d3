//! Named shortcuts to nested member fields.

use schema_xml::{Location, XmlNode};
use tracing::trace;

use crate::common::{VersionRange, VERSION_PROPS};
use crate::context::ParseContext;
use crate::error::{ErrorKind, SchemaError};
use crate::field::{Field, FieldKind, FieldStore};
use crate::props::{is_identifier, Props};

const PROPS: &[&str] = &["name", "field", "description"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Alias {
    name: String,
    path: Vec<String>,
    description: Option<String>,
    version: VersionRange,
    location: Location,
}

impl Alias {
    pub(crate) fn parse(
        node: &XmlNode,
        parent: &VersionRange,
        cx: &mut ParseContext<'_>,
    ) -> Result<Self, SchemaError> {
        let props = Props::new(node, &[PROPS, VERSION_PROPS], cx.strict(true))?;
        let name = props
            .identifier("name")?
            .ok_or_else(|| SchemaError::missing(node.location(), "alias", "name"))?;
        let text = props.require("field")?;
        let stripped = text.strip_prefix('$').unwrap_or(text);
        let path: Vec<String> = stripped.split('.').map(str::to_string).collect();
        if path.iter().any(|segment| !is_identifier(segment)) {
            return Err(props.bad_value("field", text, "expected a dotted member path"));
        }
        if let Some(unexpected) = props.elements().first() {
            return Err(SchemaError::new(
                unexpected.location().clone(),
                ErrorKind::UnexpectedElement {
                    element: unexpected.name().to_string(),
                    parent: "alias".to_string(),
                },
            ));
        }
        Ok(Self {
            name: name.to_string(),
            version: VersionRange::parse(&props, name, parent, cx.schema_version)?,
            description: props.string("description")?,
            location: node.location().clone(),
            path,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Member path segments, outermost first.
    pub fn path(&self) -> &[String] {
        &self.path
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    pub fn version(&self) -> &VersionRange {
        &self.version
    }

    pub fn location(&self) -> &Location {
        &self.location
    }

    /// Walk the path through `fields`, following refs, optional wrappers,
    /// bundle and bitfield members.
    pub fn resolve<'a>(
        &self,
        fields: &'a [Field],
        store: &'a dyn FieldStore,
    ) -> Result<&'a Field, SchemaError> {
        let broken = |segment: &str| {
            SchemaError::new(
                self.location.clone(),
                ErrorKind::AliasPath {
                    alias: self.name.clone(),
                    path: self.path.join("."),
                    segment: segment.to_string(),
                },
            )
        };
        let mut segments = self.path.iter();
        let first = segments.next().ok_or_else(|| broken(""))?;
        let mut current = fields
            .iter()
            .find(|f| f.name() == first)
            .ok_or_else(|| broken(first))?;
        for segment in segments {
            let holder = unwrap(current, store);
            let members: &[Field] = match holder.details() {
                FieldKind::Bundle(bundle) => bundle.members(),
                FieldKind::Bitfield(bits) => bits.members(),
                _ => &[],
            };
            current = members
                .iter()
                .find(|m| m.name() == segment)
                .ok_or_else(|| broken(segment))?;
        }
        trace!(alias = %self.name, target = current.name(), "alias resolved");
        Ok(current)
    }
}

fn unwrap<'a>(mut field: &'a Field, store: &'a dyn FieldStore) -> &'a Field {
    loop {
        let resolved = field.resolve_ref(store);
        match resolved.details() {
            FieldKind::Optional(opt) => field = opt.field(),
            _ => return resolved,
        }
    }
}

/// Parse `<alias>` elements, rejecting names already used by `taken` or by
/// an earlier alias.
pub(crate) fn parse_aliases(
    nodes: &[&XmlNode],
    taken: &[&str],
    parent: &VersionRange,
    cx: &mut ParseContext<'_>,
) -> Result<Vec<Alias>, SchemaError> {
    let mut aliases: Vec<Alias> = Vec::with_capacity(nodes.len());
    for node in nodes {
        let alias = Alias::parse(node, parent, cx)?;
        if taken.contains(&alias.name()) {
            return Err(SchemaError::invalid(
                alias.location(),
                alias.name(),
                "alias name clashes with a field of the same name",
            ));
        }
        if aliases.iter().any(|a| a.name == alias.name) {
            return Err(SchemaError::duplicate(alias.location(), "alias", alias.name()));
        }
        aliases.push(alias);
    }
    Ok(aliases)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostics::Diagnostics;
    use crate::field::tests::{bundle_members, NoStore};
    use crate::protocol::CompileOptions;

    const FIELDS: &str = r#"
        <bundle name="msg">
            <bundle name="hdr">
                <bitfield name="bits">
                    <int name="ver" type="uint8" bitLength="4"/>
                    <int name="kind" type="uint8" bitLength="4"/>
                </bitfield>
                <int name="len" type="uint16"/>
            </bundle>
            <optional name="ext" cond="$hdr.len != 0">
                <bundle name="ext"><int name="crc" type="uint32"/></bundle>
            </optional>
        </bundle>"#;

    fn alias(xml: &str) -> Result<Alias, SchemaError> {
        let node = schema_xml::parse_document(xml, "alias.xml").expect("parse xml");
        let names = vec!["test".to_string()];
        let options = CompileOptions::default();
        let mut diags = Diagnostics::new();
        let mut cx = ParseContext::new(0, &names, &[], &options, &mut diags);
        cx.schema_version = 3;
        Alias::parse(&node, &VersionRange::default(), &mut cx)
    }

    #[test]
    fn resolves_through_members() {
        let fields = bundle_members(FIELDS);
        let ver = alias(r#"<alias name="version" field="$hdr.bits.ver"/>"#).expect("alias");
        let target = ver.resolve(&fields, &NoStore).expect("resolves");
        let hdr = fields[0].as_bundle().expect("bundle");
        let bits = hdr.member("bits").expect("bits");
        let FieldKind::Bitfield(bits) = bits.details() else { panic!("bitfield expected") };
        assert!(std::ptr::eq(target, &bits.members()[0]));

        let crc = alias(r#"<alias name="crc" field="ext.crc"/>"#).expect("alias");
        assert_eq!(crc.resolve(&fields, &NoStore).expect("resolves").name(), "crc");
    }

    #[test]
    fn broken_segment_is_named() {
        let fields = bundle_members(FIELDS);
        let bad = alias(r#"<alias name="bad" field="$hdr.size.x"/>"#).expect("alias");
        let err = bad.resolve(&fields, &NoStore).expect_err("broken");
        assert!(matches!(err.kind(), ErrorKind::AliasPath { ref segment, .. } if segment == "size"));
        let leaf = alias(r#"<alias name="bad" field="hdr.len.x"/>"#).expect("alias");
        let err = leaf.resolve(&fields, &NoStore).expect_err("broken");
        assert!(matches!(err.kind(), ErrorKind::AliasPath { ref segment, .. } if segment == "x"));
    }

    #[test]
    fn alias_element_is_strict() {
        let err = alias(r#"<alias name="a" field="x" color="red"/>"#).expect_err("strict");
        assert!(matches!(err.kind(), ErrorKind::UnknownAttribute { .. }));
        let err = alias(r#"<alias name="a" field="$x..y"/>"#).expect_err("path");
        assert!(matches!(err.kind(), ErrorKind::InvalidValue { .. }));
    }
}
