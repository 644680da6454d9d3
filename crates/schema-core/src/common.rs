//! Properties shared by several entity kinds.

use std::fmt;

use crate::error::SchemaError;
use crate::props::Props;

pub(crate) const VERSION_PROPS: &[&str] = &["sinceVersion", "deprecated", "deprecatedSince", "removed"];

pub(crate) const OVERRIDE_PROPS: &[&str] = &[
    "readOverride",
    "writeOverride",
    "refreshOverride",
    "lengthOverride",
    "validOverride",
    "nameOverride",
];

/// Version interval an entity exists in: `[since, deprecated)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct VersionRange {
    pub since: u32,
    pub deprecated: Option<u32>,
    pub removed: bool,
}

impl VersionRange {
    /// Read the range of an entity nested in `parent`.
    ///
    /// `sinceVersion` defaults to the parent's value and `deprecated` is
    /// inherited when the entity does not set it.
    pub(crate) fn parse(
        props: &Props<'_>,
        entity: &str,
        parent: &VersionRange,
        schema_version: u32,
    ) -> Result<Self, SchemaError> {
        let location = props.location();
        let since = props.unsigned::<u32>("sinceVersion")?.unwrap_or(parent.since);
        let own_deprecated = match (
            props.unsigned::<u32>("deprecated")?,
            props.unsigned::<u32>("deprecatedSince")?,
        ) {
            (Some(_), Some(_)) => {
                return Err(SchemaError::version(
                    location,
                    entity,
                    "'deprecated' and 'deprecatedSince' are the same property",
                ))
            }
            (value, None) | (None, value) => value,
        };
        let removed = props.bool("removed", false)?;

        if since < parent.since {
            return Err(SchemaError::version(
                location,
                entity,
                format!(
                    "sinceVersion {since} is lower than the enclosing sinceVersion {}",
                    parent.since
                ),
            ));
        }
        if since > schema_version {
            return Err(SchemaError::version(
                location,
                entity,
                format!("sinceVersion {since} is greater than the schema version {schema_version}"),
            ));
        }
        if let Some(limit) = parent.deprecated {
            if since >= limit {
                return Err(SchemaError::version(
                    location,
                    entity,
                    format!("introduced in {since}, after the enclosing entity is deprecated in {limit}"),
                ));
            }
        }
        if let Some(deprecated) = own_deprecated {
            if deprecated <= since {
                return Err(SchemaError::version(
                    location,
                    entity,
                    format!("deprecated version {deprecated} must be greater than sinceVersion {since}"),
                ));
            }
            if deprecated > schema_version {
                return Err(SchemaError::version(
                    location,
                    entity,
                    format!("deprecated version {deprecated} is greater than the schema version {schema_version}"),
                ));
            }
            if let Some(limit) = parent.deprecated {
                if deprecated > limit {
                    return Err(SchemaError::version(
                        location,
                        entity,
                        format!("deprecated in {deprecated}, after the enclosing entity ({limit})"),
                    ));
                }
            }
        }
        let deprecated = own_deprecated.or(parent.deprecated);
        if removed && own_deprecated.is_none() {
            return Err(SchemaError::version(
                location,
                entity,
                "'removed' requires a deprecated version",
            ));
        }
        Ok(Self {
            since,
            deprecated,
            removed,
        })
    }

    pub fn is_version_dependent(&self) -> bool {
        self.since > 0 || self.deprecated.is_some()
    }

    /// True when the entity exists in protocol version `version`.
    pub fn contains(&self, version: u32) -> bool {
        version >= self.since && self.deprecated.map_or(true, |dep| !self.removed || version < dep)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Endian {
    #[default]
    Big,
    Little,
}

impl Endian {
    pub(crate) fn parse(props: &Props<'_>, default: Endian) -> Result<Self, SchemaError> {
        match props.get("endian")? {
            None => Ok(default),
            Some("big") => Ok(Endian::Big),
            Some("little") => Ok(Endian::Little),
            Some(other) => Err(props.bad_value("endian", other, "expected 'big' or 'little'")),
        }
    }
}

impl fmt::Display for Endian {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Endian::Big => "big",
            Endian::Little => "little",
        })
    }
}

/// Customization permission for one generated behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OverrideKind {
    #[default]
    Any,
    Replace,
    Extend,
    Ignore,
}

impl OverrideKind {
    fn parse(props: &Props<'_>, name: &str) -> Result<Self, SchemaError> {
        match props.get(name)? {
            None | Some("any") => Ok(OverrideKind::Any),
            Some("replace") => Ok(OverrideKind::Replace),
            Some("extend") => Ok(OverrideKind::Extend),
            Some("none") | Some("ignore") => Ok(OverrideKind::Ignore),
            Some(other) => Err(props.bad_value(name, other, "expected any, replace, extend or none")),
        }
    }
}

impl fmt::Display for OverrideKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            OverrideKind::Any => "any",
            OverrideKind::Replace => "replace",
            OverrideKind::Extend => "extend",
            OverrideKind::Ignore => "none",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Overrides {
    pub read: OverrideKind,
    pub write: OverrideKind,
    pub refresh: OverrideKind,
    pub length: OverrideKind,
    pub valid: OverrideKind,
    pub name: OverrideKind,
}

impl Overrides {
    pub(crate) fn parse(props: &Props<'_>) -> Result<Self, SchemaError> {
        Ok(Self {
            read: OverrideKind::parse(props, "readOverride")?,
            write: OverrideKind::parse(props, "writeOverride")?,
            refresh: OverrideKind::parse(props, "refreshOverride")?,
            length: OverrideKind::parse(props, "lengthOverride")?,
            valid: OverrideKind::parse(props, "validOverride")?,
            name: OverrideKind::parse(props, "nameOverride")?,
        })
    }

    /// Rules that hold regardless of the entity the flags belong to.
    ///
    /// `variable_length` tells whether the entity has a length that can
    /// actually be customized.
    pub(crate) fn check(&self, variable_length: bool) -> Result<(), String> {
        if self.name == OverrideKind::Extend {
            return Err("nameOverride cannot be 'extend'".into());
        }
        if matches!(self.length, OverrideKind::Replace | OverrideKind::Extend) && !variable_length {
            return Err(format!(
                "lengthOverride '{}' requires a variable serialization length",
                self.length
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SemanticType {
    #[default]
    None,
    Version,
    MessageId,
    Length,
}

impl SemanticType {
    pub(crate) fn parse(props: &Props<'_>) -> Result<Self, SchemaError> {
        match props.get("semanticType")? {
            None | Some("none") => Ok(SemanticType::None),
            Some("version") => Ok(SemanticType::Version),
            Some("messageId") => Ok(SemanticType::MessageId),
            Some("length") => Ok(SemanticType::Length),
            Some(other) => Err(props.bad_value(
                "semanticType",
                other,
                "expected none, version, messageId or length",
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use schema_xml::parse_document;

    fn range(xml: &str, parent: &VersionRange, schema_version: u32) -> Result<VersionRange, SchemaError> {
        let node = parse_document(xml, "v.xml").expect("parse xml");
        let props = Props::new(&node, &[VERSION_PROPS], true).expect("props");
        VersionRange::parse(&props, "f", parent, schema_version)
    }

    #[test]
    fn since_defaults_to_parent() {
        let parent = VersionRange {
            since: 2,
            ..VersionRange::default()
        };
        let parsed = range("<f/>", &parent, 5).expect("range");
        assert_eq!(parsed.since, 2);
        assert!(parsed.is_version_dependent());
    }

    #[test]
    fn version_rules() {
        let root = VersionRange::default();
        assert!(range(r#"<f sinceVersion="6"/>"#, &root, 5).is_err());
        assert!(range(r#"<f sinceVersion="3" deprecated="3"/>"#, &root, 5).is_err());
        assert!(range(r#"<f removed="true"/>"#, &root, 5).is_err());
        let ok = range(r#"<f sinceVersion="1" deprecatedSince="4" removed="1"/>"#, &root, 5).expect("ok");
        assert_eq!(ok.deprecated, Some(4));
        assert!(ok.contains(3));
        assert!(!ok.contains(4));
        let err = range(r#"<f sinceVersion="1"/>"#, &VersionRange { since: 2, ..root }, 5).unwrap_err();
        assert!(matches!(err.kind(), ErrorKind::VersionRange { .. }));
    }

    #[test]
    fn override_consistency() {
        let mut overrides = Overrides::default();
        assert!(overrides.check(false).is_ok());
        overrides.length = OverrideKind::Replace;
        assert!(overrides.check(false).is_err());
        assert!(overrides.check(true).is_ok());
        overrides.name = OverrideKind::Extend;
        assert!(overrides.check(true).is_err());
    }
}
