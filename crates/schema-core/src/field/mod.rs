//! Field model: one closed sum type over every serializable field kind.

mod bitfield;
mod bundle;
mod enumeration;
mod float;
mod int;
mod list;
mod optional;
mod reference;
mod set;
mod string;
mod variant;

use std::fmt;

use schema_xml::{Location, XmlNode};
use tracing::debug;

use crate::common::{Endian, Overrides, SemanticType, VersionRange, OVERRIDE_PROPS, VERSION_PROPS};
use crate::context::ParseContext;
use crate::error::{ErrorKind, SchemaError};
use crate::namespace::NamespaceId;
use crate::props::Props;

pub use bitfield::BitfieldField;
pub use bundle::BundleField;
pub use enumeration::{EnumField, EnumValue};
pub use float::{FloatField, FloatSpecial, FloatType};
pub use int::{IntField, IntType, Special};
pub use list::ListField;
pub use optional::{OptionalField, OptionalMode};
pub use reference::{RefField, ResolvedRef};
pub use set::{SetBit, SetField};
pub use string::{DataField, Prefix, StringField};
pub use variant::{VariantField, VariantSelection};

pub(crate) use reference::{implicit_ref, is_qualified_name};

const COMMON_PROPS: &[&str] = &[
    "name",
    "displayName",
    "description",
    "semanticType",
    "pseudo",
    "failOnInvalid",
    "forceGen",
    "customizable",
    "copyCodeFrom",
    "bitLength",
];

/// Field kinds, one per element name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Kind {
    Int,
    Enum,
    Set,
    Float,
    Bitfield,
    Bundle,
    String,
    Data,
    List,
    Ref,
    Optional,
    Variant,
}

impl Kind {
    pub fn from_element(name: &str) -> Option<Self> {
        Some(match name {
            "int" => Kind::Int,
            "enum" => Kind::Enum,
            "set" => Kind::Set,
            "float" => Kind::Float,
            "bitfield" => Kind::Bitfield,
            "bundle" => Kind::Bundle,
            "string" => Kind::String,
            "data" => Kind::Data,
            "list" => Kind::List,
            "ref" => Kind::Ref,
            "optional" => Kind::Optional,
            "variant" => Kind::Variant,
            _ => return None,
        })
    }

    pub fn element(self) -> &'static str {
        match self {
            Kind::Int => "int",
            Kind::Enum => "enum",
            Kind::Set => "set",
            Kind::Float => "float",
            Kind::Bitfield => "bitfield",
            Kind::Bundle => "bundle",
            Kind::String => "string",
            Kind::Data => "data",
            Kind::List => "list",
            Kind::Ref => "ref",
            Kind::Optional => "optional",
            Kind::Variant => "variant",
        }
    }

    fn props(self) -> &'static [&'static str] {
        match self {
            Kind::Int => int::PROPS,
            Kind::Enum => enumeration::PROPS,
            Kind::Set => set::PROPS,
            Kind::Float => float::PROPS,
            Kind::Bitfield => bitfield::PROPS,
            Kind::Bundle => &[],
            Kind::String => string::STRING_PROPS,
            Kind::Data => string::DATA_PROPS,
            Kind::List => list::PROPS,
            Kind::Ref => reference::PROPS,
            Kind::Optional => optional::PROPS,
            Kind::Variant => variant::PROPS,
        }
    }

    /// Child elements with a kind-specific meaning on leaf kinds. Other
    /// children of a leaf kind are kept as extra elements.
    fn structural_children(self) -> Option<&'static [&'static str]> {
        match self {
            Kind::Int | Kind::Float => Some(&["special"]),
            Kind::Enum => Some(&["validValue"]),
            Kind::Set => Some(&["bit"]),
            Kind::String | Kind::Data => Some(&["lengthPrefix"]),
            Kind::List => Some(&["element", "countPrefix", "lengthPrefix", "elemLengthPrefix"]),
            Kind::Ref => Some(&[]),
            Kind::Bitfield | Kind::Bundle | Kind::Optional | Kind::Variant => None,
        }
    }
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.element())
    }
}

/// Stable address of a namespace-level field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FieldHandle {
    /// Schema position in processing order.
    pub schema: usize,
    pub namespace: NamespaceId,
    /// Index into the namespace's field list.
    pub index: usize,
}

/// Lookup of namespace-level fields by handle.
pub trait FieldStore {
    fn field(&self, handle: FieldHandle) -> Option<&Field>;
}

/// Serialized size range in bytes; `max` is `usize::MAX` when unbounded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LengthInfo {
    pub min: usize,
    pub max: usize,
}

impl LengthInfo {
    pub const UNBOUNDED: LengthInfo = LengthInfo {
        min: 0,
        max: usize::MAX,
    };

    pub fn fixed(len: usize) -> Self {
        Self { min: len, max: len }
    }

    pub fn fixed_len(&self) -> Option<usize> {
        (self.min == self.max).then_some(self.min)
    }

    fn then(self, other: LengthInfo) -> Self {
        Self {
            min: self.min.saturating_add(other.min),
            max: self.max.saturating_add(other.max),
        }
    }

    fn times(self, count: usize) -> Self {
        Self {
            min: self.min.saturating_mul(count),
            max: self.max.saturating_mul(count),
        }
    }
}

/// Properties every field kind carries.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldCommon {
    pub name: String,
    pub display_name: Option<String>,
    pub description: Option<String>,
    pub version: VersionRange,
    pub semantic_type: SemanticType,
    pub pseudo: bool,
    pub fail_on_invalid: bool,
    pub force_gen: bool,
    pub customizable: bool,
    pub overrides: Overrides,
    pub copy_code_from: Option<String>,
    /// Width inside a bitfield.
    pub bit_length: Option<u32>,
    pub extra_attributes: Vec<(String, String)>,
    pub extra_children: Vec<String>,
    pub location: Location,
}

impl FieldCommon {
    /// Properties of a field that stands in for a `field="name"` reference.
    pub(crate) fn implicit(name: String, version: VersionRange, location: Location) -> Self {
        Self {
            name,
            display_name: None,
            description: None,
            version,
            semantic_type: SemanticType::None,
            pseudo: false,
            fail_on_invalid: false,
            force_gen: false,
            customizable: false,
            overrides: Overrides::default(),
            copy_code_from: None,
            bit_length: None,
            extra_attributes: Vec::new(),
            extra_children: Vec::new(),
            location,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum FieldKind {
    Int(IntField),
    Enum(EnumField),
    Set(SetField),
    Float(FloatField),
    Bitfield(BitfieldField),
    Bundle(BundleField),
    String(StringField),
    Data(DataField),
    List(ListField),
    Ref(RefField),
    Optional(OptionalField),
    Variant(VariantField),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Field {
    common: FieldCommon,
    kind: FieldKind,
}

impl Field {
    pub(crate) fn new(common: FieldCommon, kind: FieldKind) -> Self {
        Self { common, kind }
    }

    pub fn name(&self) -> &str {
        &self.common.name
    }

    pub fn common(&self) -> &FieldCommon {
        &self.common
    }

    pub fn kind(&self) -> Kind {
        match &self.kind {
            FieldKind::Int(_) => Kind::Int,
            FieldKind::Enum(_) => Kind::Enum,
            FieldKind::Set(_) => Kind::Set,
            FieldKind::Float(_) => Kind::Float,
            FieldKind::Bitfield(_) => Kind::Bitfield,
            FieldKind::Bundle(_) => Kind::Bundle,
            FieldKind::String(_) => Kind::String,
            FieldKind::Data(_) => Kind::Data,
            FieldKind::List(_) => Kind::List,
            FieldKind::Ref(_) => Kind::Ref,
            FieldKind::Optional(_) => Kind::Optional,
            FieldKind::Variant(_) => Kind::Variant,
        }
    }

    /// Kind-specific attributes.
    pub fn details(&self) -> &FieldKind {
        &self.kind
    }

    pub(crate) fn details_mut(&mut self) -> &mut FieldKind {
        &mut self.kind
    }

    pub fn location(&self) -> &Location {
        &self.common.location
    }

    pub fn version(&self) -> &VersionRange {
        &self.common.version
    }

    /// Follow `ref` fields to the field that actually defines the value.
    ///
    /// Stops at the first unresolved reference.
    pub fn resolve_ref<'s>(&'s self, store: &'s dyn FieldStore) -> &'s Field {
        let mut current = self;
        // A resolved chain never loops; the bound only guards partial models.
        for _ in 0..64 {
            let FieldKind::Ref(reference) = &current.kind else {
                return current;
            };
            match reference.resolved().and_then(|r| store.field(r.handle)) {
                Some(target) => current = target,
                None => return current,
            }
        }
        current
    }

    /// Fields owned by this one: members, list elements, wrapped fields and
    /// owned prefixes.
    pub fn nested(&self) -> Vec<&Field> {
        match &self.kind {
            FieldKind::Bitfield(f) => f.members.iter().collect(),
            FieldKind::Bundle(f) => f.members.iter().collect(),
            FieldKind::Variant(f) => f.members.iter().collect(),
            FieldKind::Optional(f) => vec![&*f.field],
            FieldKind::String(f) => f.length_prefix.iter().filter_map(Prefix::field).collect(),
            FieldKind::Data(f) => f.length_prefix.iter().filter_map(Prefix::field).collect(),
            FieldKind::List(f) => std::iter::once(&*f.element)
                .chain(
                    [&f.count_prefix, &f.length_prefix, &f.elem_length_prefix]
                        .into_iter()
                        .filter_map(|p| p.as_ref().and_then(Prefix::field)),
                )
                .collect(),
            FieldKind::Int(_)
            | FieldKind::Enum(_)
            | FieldKind::Set(_)
            | FieldKind::Float(_)
            | FieldKind::Ref(_) => Vec::new(),
        }
    }

    pub(crate) fn nested_mut(&mut self) -> Vec<&mut Field> {
        match &mut self.kind {
            FieldKind::Bitfield(f) => f.members.iter_mut().collect(),
            FieldKind::Bundle(f) => f.members.iter_mut().collect(),
            FieldKind::Variant(f) => f.members.iter_mut().collect(),
            FieldKind::Optional(f) => vec![&mut *f.field],
            FieldKind::String(f) => f.length_prefix.iter_mut().filter_map(Prefix::field_mut).collect(),
            FieldKind::Data(f) => f.length_prefix.iter_mut().filter_map(Prefix::field_mut).collect(),
            FieldKind::List(f) => {
                let mut out = vec![&mut *f.element];
                for prefix in [&mut f.count_prefix, &mut f.length_prefix, &mut f.elem_length_prefix] {
                    if let Some(field) = prefix.as_mut().and_then(Prefix::field_mut) {
                        out.push(field);
                    }
                }
                out
            }
            FieldKind::Int(_)
            | FieldKind::Enum(_)
            | FieldKind::Set(_)
            | FieldKind::Float(_)
            | FieldKind::Ref(_) => Vec::new(),
        }
    }

    /// Visit this field and everything nested in it, parents first.
    pub(crate) fn walk_mut(&mut self, visit: &mut dyn FnMut(&mut Field)) {
        visit(self);
        for nested in self.nested_mut() {
            nested.walk_mut(visit);
        }
    }

    pub fn walk<'s>(&'s self, visit: &mut dyn FnMut(&'s Field)) {
        visit(self);
        for nested in self.nested() {
            nested.walk(visit);
        }
    }

    /// Size range computed with `refs` answering for every `ref` field.
    /// `None` when a reference cannot be measured.
    pub(crate) fn measure(
        &self,
        refs: &mut dyn FnMut(&RefField) -> Option<LengthInfo>,
    ) -> Option<LengthInfo> {
        Some(match &self.kind {
            FieldKind::Int(f) => f.length_info(),
            FieldKind::Enum(f) => f.length_info(),
            FieldKind::Set(f) => LengthInfo::fixed(f.length),
            FieldKind::Float(f) => LengthInfo::fixed(f.ty.width()),
            FieldKind::Bitfield(f) => LengthInfo::fixed(f.total_bits().div_ceil(8) as usize),
            FieldKind::Bundle(f) => {
                let mut total = LengthInfo::fixed(0);
                for member in &f.members {
                    total = total.then(member.measure(refs)?);
                }
                total
            }
            FieldKind::String(f) => match (f.length, &f.length_prefix) {
                (Some(len), _) => LengthInfo::fixed(len),
                (None, Some(_)) => LengthInfo {
                    max: usize::MAX,
                    ..measure_prefix(&f.length_prefix, refs)?
                },
                (None, None) if f.zero_term_suffix => LengthInfo { min: 1, max: usize::MAX },
                (None, None) => LengthInfo::UNBOUNDED,
            },
            FieldKind::Data(f) => match (f.length, &f.length_prefix) {
                (Some(len), _) => LengthInfo::fixed(len),
                (None, Some(_)) => LengthInfo {
                    max: usize::MAX,
                    ..measure_prefix(&f.length_prefix, refs)?
                },
                (None, None) => LengthInfo::UNBOUNDED,
            },
            FieldKind::List(f) => {
                let element = f.element.measure(refs)?.then(measure_prefix(&f.elem_length_prefix, refs)?);
                match f.count {
                    Some(count) => element.times(count),
                    None => {
                        let head = measure_prefix(&f.count_prefix, refs)?
                            .then(measure_prefix(&f.length_prefix, refs)?);
                        LengthInfo {
                            max: usize::MAX,
                            ..head
                        }
                    }
                }
            }
            FieldKind::Ref(f) => refs(f)?,
            FieldKind::Optional(f) => LengthInfo {
                min: 0,
                max: f.field.measure(refs)?.max,
            },
            FieldKind::Variant(f) => {
                let mut min = usize::MAX;
                let mut max = 0;
                for member in &f.members {
                    let len = member.measure(refs)?;
                    min = min.min(len.min);
                    max = max.max(len.max);
                }
                if f.members.is_empty() {
                    LengthInfo::fixed(0)
                } else {
                    LengthInfo { min, max }
                }
            }
        })
    }

    pub fn length_info(&self) -> LengthInfo {
        self.measure(&mut |r| r.resolved().map(|r| r.length))
            .unwrap_or(LengthInfo::UNBOUNDED)
    }

    /// Serialization length in bytes, absent when variable.
    pub fn length(&self) -> Option<usize> {
        self.length_info().fixed_len()
    }

    pub fn min_length(&self) -> usize {
        self.length_info().min
    }

    pub fn max_length(&self) -> usize {
        self.length_info().max
    }

    /// Length in bits: the declared width inside a bitfield, the member sum
    /// for a bitfield, otherwise the fixed byte length times eight.
    pub fn bit_length(&self) -> Option<u32> {
        if let Some(bits) = self.common.bit_length {
            return Some(bits);
        }
        if let FieldKind::Bitfield(f) = &self.kind {
            return Some(f.total_bits());
        }
        self.length().and_then(|len| u32::try_from(len).ok()).map(|len| len * 8)
    }

    pub fn is_version_dependent(&self) -> bool {
        if self.common.version.is_version_dependent() {
            return true;
        }
        if let FieldKind::Ref(f) = &self.kind {
            return f.resolved().is_some_and(|r| r.version_dependent);
        }
        self.nested().iter().any(|f| f.is_version_dependent())
    }

    pub fn has_default_value(&self) -> bool {
        match &self.kind {
            FieldKind::Int(f) => f.default_declared,
            FieldKind::Enum(f) => f.default_declared,
            FieldKind::Set(f) => f.default_declared,
            FieldKind::Float(f) => f.default_declared,
            FieldKind::String(f) => !f.default_value.is_empty(),
            FieldKind::Data(f) => !f.default_value.is_empty(),
            FieldKind::Bundle(f) => f.members.iter().any(Field::has_default_value),
            FieldKind::Bitfield(f) => f.members.iter().any(Field::has_default_value),
            FieldKind::Ref(_) | FieldKind::List(_) | FieldKind::Optional(_) | FieldKind::Variant(_) => false,
        }
    }

    pub fn as_int(&self) -> Option<&IntField> {
        match &self.kind {
            FieldKind::Int(f) => Some(f),
            _ => None,
        }
    }

    pub fn as_enum(&self) -> Option<&EnumField> {
        match &self.kind {
            FieldKind::Enum(f) => Some(f),
            _ => None,
        }
    }

    pub fn as_bundle(&self) -> Option<&BundleField> {
        match &self.kind {
            FieldKind::Bundle(f) => Some(f),
            _ => None,
        }
    }

    pub fn as_ref_field(&self) -> Option<&RefField> {
        match &self.kind {
            FieldKind::Ref(f) => Some(f),
            _ => None,
        }
    }
}

fn measure_prefix(
    prefix: &Option<Prefix>,
    refs: &mut dyn FnMut(&RefField) -> Option<LengthInfo>,
) -> Option<LengthInfo> {
    match prefix {
        Some(Prefix::Field(field)) => field.measure(refs),
        Some(Prefix::Sibling(_)) | None => Some(LengthInfo::fixed(0)),
    }
}

/// Where a field is being declared.
#[derive(Debug, Clone, Copy)]
pub(crate) struct FieldScope<'s> {
    pub(crate) version: VersionRange,
    pub(crate) endian: Endian,
    pub(crate) in_bitfield: bool,
    /// Namespace `ref` targets are looked up from.
    pub(crate) namespace: NamespaceId,
    /// Name used when the element does not set one.
    pub(crate) default_name: Option<&'s str>,
}

impl<'s> FieldScope<'s> {
    pub(crate) fn new(version: VersionRange, endian: Endian, namespace: NamespaceId) -> Self {
        Self {
            version,
            endian,
            in_bitfield: false,
            namespace,
            default_name: None,
        }
    }

    /// Scope for fields owned by the field described by `common`.
    pub(crate) fn nested(&self, common: &FieldCommon) -> FieldScope<'s> {
        FieldScope {
            version: common.version,
            in_bitfield: false,
            default_name: None,
            ..*self
        }
    }

    pub(crate) fn named<'n>(&self, name: &'n str) -> FieldScope<'n>
    where
        's: 'n,
    {
        FieldScope {
            default_name: Some(name),
            ..*self
        }
    }
}

/// Build one field from its element.
pub(crate) fn parse_field(
    node: &XmlNode,
    scope: &FieldScope<'_>,
    cx: &mut ParseContext<'_>,
) -> Result<Field, SchemaError> {
    let kind = Kind::from_element(node.name()).ok_or_else(|| {
        SchemaError::new(
            node.location().clone(),
            ErrorKind::UnknownFieldKind(node.name().to_string()),
        )
    })?;
    let props = Props::new(
        node,
        &[COMMON_PROPS, VERSION_PROPS, OVERRIDE_PROPS, kind.props()],
        false,
    )?;
    let common = parse_common(&props, kind, scope, cx)?;
    let scope = FieldScope {
        endian: Endian::parse(&props, scope.endian)?,
        ..*scope
    };
    let details = match kind {
        Kind::Int => FieldKind::Int(int::parse(&props, &common, &scope, cx)?),
        Kind::Enum => FieldKind::Enum(enumeration::parse(&props, &common, &scope, cx)?),
        Kind::Set => FieldKind::Set(set::parse(&props, &common, &scope, cx)?),
        Kind::Float => FieldKind::Float(float::parse(&props, &common, &scope, cx)?),
        Kind::Bitfield => FieldKind::Bitfield(bitfield::parse(&props, &common, &scope, cx)?),
        Kind::Bundle => FieldKind::Bundle(bundle::parse(&props, &common, &scope, cx)?),
        Kind::String => FieldKind::String(string::parse_string(&props, &common, &scope, cx)?),
        Kind::Data => FieldKind::Data(string::parse_data(&props, &common, &scope, cx)?),
        Kind::List => FieldKind::List(list::parse(&props, &common, &scope, cx)?),
        Kind::Ref => FieldKind::Ref(reference::parse(&props, &common, &scope)?),
        Kind::Optional => FieldKind::Optional(optional::parse(&props, &common, &scope, cx)?),
        Kind::Variant => FieldKind::Variant(variant::parse(&props, &common, &scope, cx)?),
    };
    let mut common = common;
    if let Some(known) = kind.structural_children() {
        common.extra_children = props
            .elements()
            .iter()
            .filter(|child| !known.contains(&child.name()))
            .map(|child| child.name().to_string())
            .collect();
    }
    debug!(field = %common.name, kind = %kind, "parsed field");
    Ok(Field::new(common, details))
}

fn parse_common(
    props: &Props<'_>,
    kind: Kind,
    scope: &FieldScope<'_>,
    cx: &mut ParseContext<'_>,
) -> Result<FieldCommon, SchemaError> {
    let name = match (props.identifier("name")?, scope.default_name) {
        (Some(name), _) | (None, Some(name)) => name.to_string(),
        (None, None) => return Err(SchemaError::missing(props.location(), kind.element(), "name")),
    };
    let version = VersionRange::parse(props, &name, &scope.version, cx.schema_version)?;
    let bit_length = props.unsigned::<u32>("bitLength")?;
    if bit_length.is_some() && !scope.in_bitfield && kind != Kind::Bitfield {
        cx.warn(
            props.location(),
            format!("'bitLength' of '{name}' has no effect outside a bitfield"),
        );
    }
    match bit_length {
        Some(0) => return Err(props.bad_value("bitLength", "0", "bit length must be positive")),
        Some(bits) if bits > 64 && (scope.in_bitfield || kind == Kind::Bitfield) => {
            return Err(props.bad_value("bitLength", &bits.to_string(), "at most 64 bits"))
        }
        _ => {}
    }
    Ok(FieldCommon {
        display_name: props.string("displayName")?,
        description: props.string("description")?,
        version,
        semantic_type: SemanticType::parse(props)?,
        pseudo: props.bool("pseudo", false)?,
        fail_on_invalid: props.bool("failOnInvalid", false)?,
        force_gen: props.bool("forceGen", false)?,
        customizable: props.bool("customizable", false)?,
        overrides: Overrides::parse(props)?,
        copy_code_from: props.string("copyCodeFrom")?,
        bit_length: if scope.in_bitfield || kind == Kind::Bitfield {
            bit_length
        } else {
            None
        },
        extra_attributes: props.extra_attributes(),
        extra_children: Vec::new(),
        location: props.location().clone(),
        name,
    })
}

/// Parse member fields of a container, reporting every failing member.
///
/// Returns the members when all of them are valid and names are unique;
/// otherwise the errors are already in the diagnostics.
pub(crate) fn parse_members(
    nodes: &[&XmlNode],
    scope: &FieldScope<'_>,
    location: &Location,
    cx: &mut ParseContext<'_>,
) -> Result<Vec<Field>, SchemaError> {
    let mut members: Vec<Field> = Vec::with_capacity(nodes.len());
    let mut failed = false;
    for node in nodes {
        match parse_field(node, scope, cx) {
            Ok(field) => {
                if members.iter().any(|m| m.name() == field.name()) {
                    cx.report(SchemaError::duplicate(field.location(), "field", field.name()));
                    failed = true;
                } else {
                    members.push(field);
                }
            }
            Err(err) => {
                cx.report(err);
                failed = true;
            }
        }
    }
    if failed {
        return Err(SchemaError::already_reported(location));
    }
    Ok(members)
}

/// The single field held by a `<field>`-style wrapper element.
pub(crate) fn wrapped_field<'x>(wrapper: &'x XmlNode) -> Result<&'x XmlNode, SchemaError> {
    match wrapper.children() {
        [single] => Ok(single),
        _ => Err(SchemaError::invalid(
            wrapper.location(),
            wrapper.name(),
            "expected exactly one field element",
        )),
    }
}
