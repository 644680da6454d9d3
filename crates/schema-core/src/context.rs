use std::collections::HashSet;

use schema_xml::Location;

use crate::common::Endian;
use crate::diagnostics::Diagnostics;
use crate::error::{ErrorKind, SchemaError};
use crate::protocol::CompileOptions;
use crate::schema::Schema;

/// State threaded through every parse and resolve step of one schema.
pub(crate) struct ParseContext<'a> {
    /// Position of the schema being built in processing order.
    pub(crate) schema_index: usize,
    pub(crate) schema_name: &'a str,
    pub(crate) schema_version: u32,
    pub(crate) endian: Endian,
    /// Every schema name in processing order, including later ones.
    pub(crate) schema_names: &'a [String],
    /// Schemas that already reached `Ready`.
    pub(crate) prior: &'a [Schema],
    pub(crate) options: &'a CompileOptions,
    pub(crate) diags: &'a mut Diagnostics,
    failed: HashSet<String>,
}

/// Which schema an `@name` prefix designates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SchemaTarget {
    Current,
    Prior(usize),
}

impl<'a> ParseContext<'a> {
    pub(crate) fn new(
        schema_index: usize,
        schema_names: &'a [String],
        prior: &'a [Schema],
        options: &'a CompileOptions,
        diags: &'a mut Diagnostics,
    ) -> Self {
        let schema_name = schema_names
            .get(schema_index)
            .map_or("", String::as_str);
        Self {
            schema_index,
            schema_name,
            schema_version: 0,
            endian: Endian::Big,
            schema_names,
            prior,
            options,
            diags,
            failed: HashSet::new(),
        }
    }

    /// Whether unknown attributes must be rejected on an element type that
    /// does not keep extra attributes.
    pub(crate) fn strict(&self, strict_element: bool) -> bool {
        strict_element && !self.options.allow_unknown_attributes
    }

    pub(crate) fn report(&mut self, err: SchemaError) {
        self.diags.report(err);
    }

    pub(crate) fn warn(&mut self, location: &Location, message: impl Into<String>) {
        self.diags.warn(location, message);
    }

    /// Remember an entity that failed to build so references to it stay quiet.
    pub(crate) fn mark_failed(&mut self, qualified: String) {
        self.failed.insert(qualified);
    }

    pub(crate) fn is_failed(&self, qualified: &str) -> bool {
        self.failed.contains(qualified)
    }

    /// Map the schema part of an `@schema.path` reference.
    pub(crate) fn schema_target(
        &self,
        name: &str,
        reference: &str,
        location: &Location,
    ) -> Result<SchemaTarget, SchemaError> {
        if name == self.schema_name {
            return Ok(SchemaTarget::Current);
        }
        if let Some(index) = self.prior.iter().position(|schema| schema.name() == name) {
            return Ok(SchemaTarget::Prior(index));
        }
        if self.schema_names.iter().any(|known| known == name) {
            return Err(SchemaError::new(
                location.clone(),
                ErrorKind::SchemaOrder {
                    schema: self.schema_name.to_string(),
                    target: name.to_string(),
                    reference: reference.to_string(),
                },
            ));
        }
        Err(SchemaError::dangling(location, "schema", name))
    }
}
