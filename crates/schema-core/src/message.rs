//! Messages: identified payloads composed of own and copied fields.

use schema_xml::{Location, XmlNode};
use tracing::debug;

use crate::alias::{parse_aliases, Alias};
use crate::common::{Overrides, VersionRange, OVERRIDE_PROPS, VERSION_PROPS};
use crate::cond::{is_cond_element, parse_cond_elements, parse_cond_text, OptCond};
use crate::context::ParseContext;
use crate::error::{ErrorKind, SchemaError};
use crate::field::{is_qualified_name, parse_members, Field, FieldScope};
use crate::namespace::NamespaceId;
use crate::props::{parse_number, Props};

const PROPS: &[&str] = &[
    "name",
    "id",
    "order",
    "displayName",
    "description",
    "sender",
    "platforms",
    "customizable",
    "failOnInvalid",
    "validateMinLength",
    "copyFieldsFrom",
    "copyFieldsPosition",
    "copyFieldsAliases",
    "copyAliasesFrom",
    "copyCodeFrom",
    "construct",
    "readCond",
    "validCond",
    "constructAsReadCond",
    "constructAsValidCond",
];

const COND_PROPS: [&str; 3] = ["construct", "readCond", "validCond"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Sender {
    #[default]
    Both,
    Client,
    Server,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CopyPosition {
    /// Copied fields come first.
    #[default]
    Before,
    After,
}

/// `copyFieldsFrom` request, resolved while preparing the message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CopyFields {
    pub source: String,
    pub position: CopyPosition,
    pub with_aliases: bool,
}

/// Platform restriction as written: `a,b` or `!a,b`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum PlatformFilter {
    Only(Vec<String>),
    Except(Vec<String>),
}

#[derive(Debug, Clone)]
pub struct Message {
    pub(crate) name: String,
    pub(crate) display_name: Option<String>,
    pub(crate) description: Option<String>,
    pub(crate) id: i128,
    /// `Enum.value` reference the id is taken from.
    pub(crate) id_ref: Option<String>,
    pub(crate) order: u32,
    pub(crate) version: VersionRange,
    pub(crate) sender: Sender,
    pub(crate) platform_filter: Option<PlatformFilter>,
    pub(crate) platforms: Vec<String>,
    pub(crate) customizable: bool,
    pub(crate) fail_on_invalid: bool,
    pub(crate) validate_min_length: Option<usize>,
    pub(crate) copy_fields: Option<CopyFields>,
    pub(crate) copy_aliases_from: Option<String>,
    pub(crate) overrides: Overrides,
    pub(crate) copy_code_from: Option<String>,
    pub(crate) construct: Option<OptCond>,
    pub(crate) read_cond: Option<OptCond>,
    pub(crate) valid_cond: Option<OptCond>,
    pub(crate) fields: Vec<Field>,
    /// Fields replacing copied fields of the same name.
    pub(crate) replace: Vec<Field>,
    pub(crate) aliases: Vec<Alias>,
    pub(crate) extra_attributes: Vec<(String, String)>,
    pub(crate) namespace: NamespaceId,
    pub(crate) location: Location,
}

impl Message {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn display_name(&self) -> Option<&str> {
        self.display_name.as_deref()
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    pub fn id(&self) -> i128 {
        self.id
    }

    pub fn order(&self) -> u32 {
        self.order
    }

    pub fn version(&self) -> &VersionRange {
        &self.version
    }

    pub fn sender(&self) -> Sender {
        self.sender
    }

    /// Platforms the message is built for; empty means every platform.
    pub fn platforms(&self) -> &[String] {
        &self.platforms
    }

    pub fn is_customizable(&self) -> bool {
        self.customizable
    }

    pub fn fail_on_invalid(&self) -> bool {
        self.fail_on_invalid
    }

    pub fn copy_fields(&self) -> Option<&CopyFields> {
        self.copy_fields.as_ref()
    }

    pub fn overrides(&self) -> &Overrides {
        &self.overrides
    }

    pub fn copy_code_from(&self) -> Option<&str> {
        self.copy_code_from.as_deref()
    }

    pub fn construct(&self) -> Option<&OptCond> {
        self.construct.as_ref()
    }

    pub fn read_cond(&self) -> Option<&OptCond> {
        self.read_cond.as_ref()
    }

    pub fn valid_cond(&self) -> Option<&OptCond> {
        self.valid_cond.as_ref()
    }

    /// Fields after copying and replacement.
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

    pub fn min_length(&self) -> usize {
        self.fields
            .iter()
            .fold(0usize, |total, f| total.saturating_add(f.min_length()))
    }

    pub fn max_length(&self) -> usize {
        self.fields
            .iter()
            .fold(0usize, |total, f| total.saturating_add(f.max_length()))
    }

    pub fn is_version_dependent(&self) -> bool {
        self.fields.iter().any(Field::is_version_dependent)
    }
}

fn parse_sender(props: &Props<'_>) -> Result<Sender, SchemaError> {
    Ok(match props.get("sender")? {
        None | Some("both") => Sender::Both,
        Some("client") => Sender::Client,
        Some("server") => Sender::Server,
        Some(other) => return Err(props.bad_value("sender", other, "expected both, client or server")),
    })
}

fn parse_platforms(props: &Props<'_>) -> Result<Option<PlatformFilter>, SchemaError> {
    let Some(text) = props.get("platforms")? else {
        return Ok(None);
    };
    let (exclude, list) = match text.trim().strip_prefix('!') {
        Some(rest) => (true, rest),
        None => (false, text),
    };
    let names: Vec<String> = list
        .split(',')
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .map(str::to_string)
        .collect();
    if names.is_empty() {
        return Err(props.bad_value("platforms", text, "expected a comma separated platform list"));
    }
    Ok(Some(if exclude {
        PlatformFilter::Except(names)
    } else {
        PlatformFilter::Only(names)
    }))
}

/// Condition given as an attribute, as text, or as a wrapper of
/// `<cond>`/`<and>`/`<or>` elements.
fn parse_condition(
    props: &Props<'_>,
    prop: &str,
    message: &str,
    cx: &ParseContext<'_>,
) -> Result<Option<OptCond>, SchemaError> {
    let context = format!("{prop} of '{message}'");
    let wrapper = props.elements().iter().find(|n| n.name() == prop);
    match (props.get(prop)?, wrapper) {
        (Some(_), Some(node)) => Err(SchemaError::new(
            node.location().clone(),
            ErrorKind::DuplicateProperty {
                property: prop.to_string(),
            },
        )),
        (Some(text), None) => parse_cond_text(text, props.location(), &context).map(Some),
        (None, Some(node)) => {
            let children: Vec<&XmlNode> = node.children().iter().collect();
            if let Some(bad) = children.iter().find(|c| !is_cond_element(c.name())) {
                return Err(SchemaError::new(
                    bad.location().clone(),
                    ErrorKind::UnexpectedElement {
                        element: bad.name().to_string(),
                        parent: prop.to_string(),
                    },
                ));
            }
            parse_cond_elements(&children, node.location(), &context, cx.strict(true)).map(Some)
        }
        (None, None) => Ok(None),
    }
}

fn parse_id(props: &Props<'_>) -> Result<(i128, Option<String>), SchemaError> {
    let text = props.require("id")?;
    if let Some(value) = parse_number(text) {
        if value < 0 {
            return Err(props.bad_value("id", text, "message ids cannot be negative"));
        }
        return Ok((value, None));
    }
    if is_qualified_name(text) && text.contains('.') {
        return Ok((0, Some(text.to_string())));
    }
    Err(props.bad_value("id", text, "expected a number or an enum value reference"))
}

impl Message {
    pub(crate) fn parse(
        node: &XmlNode,
        namespace: NamespaceId,
        parent: &VersionRange,
        cx: &mut ParseContext<'_>,
    ) -> Result<Self, SchemaError> {
        let props = Props::new(node, &[PROPS, VERSION_PROPS, OVERRIDE_PROPS], false)?;
        let name = props
            .identifier("name")?
            .ok_or_else(|| SchemaError::missing(node.location(), "message", "name"))?;
        let version = VersionRange::parse(&props, name, parent, cx.schema_version)?;
        let (id, id_ref) = parse_id(&props)?;

        let mut field_nodes: Vec<&XmlNode> = Vec::new();
        let mut replace_nodes: Vec<&XmlNode> = Vec::new();
        let mut alias_nodes: Vec<&XmlNode> = Vec::new();
        for child in props.elements() {
            match child.name() {
                "fields" => field_nodes.extend(child.children()),
                "replace" => replace_nodes.extend(child.children()),
                "alias" => alias_nodes.push(child),
                cond if COND_PROPS.contains(&cond) => {}
                _ => field_nodes.push(child),
            }
        }
        let scope = FieldScope::new(version, cx.endian, namespace);
        let fields = parse_members(&field_nodes, &scope, node.location(), cx)?;
        let replace = parse_members(&replace_nodes, &scope, node.location(), cx)?;
        let aliases = parse_aliases(&alias_nodes, &[], &version, cx)?;

        let copy_fields = match props.get("copyFieldsFrom")? {
            Some(source) if is_qualified_name(source) => Some(CopyFields {
                source: source.to_string(),
                position: match props.get("copyFieldsPosition")? {
                    None | Some("before") => CopyPosition::Before,
                    Some("after") => CopyPosition::After,
                    Some(other) => return Err(props.bad_value("copyFieldsPosition", other, "expected before or after")),
                },
                with_aliases: props.bool("copyFieldsAliases", true)?,
            }),
            Some(source) => return Err(props.bad_value("copyFieldsFrom", source, "expected a message or bundle name")),
            None => None,
        };
        if copy_fields.is_none() && !replace.is_empty() {
            return Err(SchemaError::invalid(
                node.location(),
                name,
                "<replace> requires 'copyFieldsFrom'",
            ));
        }

        let construct = parse_condition(&props, "construct", name, cx)?;
        let mut read_cond = parse_condition(&props, "readCond", name, cx)?;
        let mut valid_cond = parse_condition(&props, "validCond", name, cx)?;
        for (flag, target, what) in [
            ("constructAsReadCond", &mut read_cond, "readCond"),
            ("constructAsValidCond", &mut valid_cond, "validCond"),
        ] {
            if !props.bool(flag, false)? {
                continue;
            }
            if target.is_some() {
                return Err(SchemaError::invalid(
                    node.location(),
                    name,
                    format!("'{flag}' cannot be combined with an explicit {what}"),
                ));
            }
            match &construct {
                Some(cond) => *target = Some(cond.clone()),
                None => {
                    return Err(SchemaError::invalid(
                        node.location(),
                        name,
                        format!("'{flag}' requires a construct condition"),
                    ))
                }
            }
        }

        let message = Message {
            display_name: props.string("displayName")?,
            description: props.string("description")?,
            id,
            id_ref,
            order: props.unsigned::<u32>("order")?.unwrap_or(0),
            version,
            sender: parse_sender(&props)?,
            platform_filter: parse_platforms(&props)?,
            platforms: Vec::new(),
            customizable: props.bool("customizable", false)?,
            fail_on_invalid: props.bool("failOnInvalid", false)?,
            validate_min_length: props.unsigned::<usize>("validateMinLength")?,
            copy_fields,
            copy_aliases_from: props.string("copyAliasesFrom")?,
            overrides: Overrides::parse(&props)?,
            copy_code_from: props.string("copyCodeFrom")?,
            construct,
            read_cond,
            valid_cond,
            fields,
            replace,
            aliases,
            extra_attributes: props.extra_attributes(),
            namespace,
            location: node.location().clone(),
            name: name.to_string(),
        };
        debug!(message = %message.name, id = message.id, "parsed message");
        Ok(message)
    }
}
