//! Compilation entry point and the read-only protocol model.

use schema_xml::{parse_document, Location, XmlError, XmlNode};
use tracing::debug;

use crate::alias::Alias;
use crate::context::ParseContext;
use crate::diagnostics::{Diagnostic, Diagnostics};
use crate::error::{ErrorKind, SchemaError};
use crate::field::{Field, FieldHandle, FieldStore};
use crate::frame::Frame;
use crate::interface::Interface;
use crate::message::Message;
use crate::namespace::Namespace;
use crate::props::is_identifier;
use crate::schema::{self, Schema};

/// Knobs for one compilation run.
#[derive(Debug, Clone, Default)]
pub struct CompileOptions {
    /// Explicit processing order of schema names. Schemas not listed follow
    /// in document order.
    pub schema_order: Vec<String>,
    /// Report every warning as an error.
    pub warnings_as_errors: bool,
    /// Keep unknown attributes as extra attributes on every element instead
    /// of rejecting them where the element does not allow them.
    pub allow_unknown_attributes: bool,
}

/// One parsed input document.
#[derive(Debug, Clone)]
pub struct SchemaDocument {
    file: String,
    root: XmlNode,
}

impl SchemaDocument {
    pub fn new(file: impl Into<String>, root: XmlNode) -> Self {
        Self {
            file: file.into(),
            root,
        }
    }

    /// Parse `text`, attributing locations to `file`.
    pub fn parse(file: impl Into<String>, text: &str) -> Result<Self, XmlError> {
        let file = file.into();
        let root = parse_document(text, &file)?;
        Ok(Self { file, root })
    }

    pub fn file(&self) -> &str {
        &self.file
    }

    pub fn root(&self) -> &XmlNode {
        &self.root
    }
}

/// Outcome of [`compile`].
#[derive(Debug)]
pub struct Compilation {
    /// Ordered by document, line and column.
    pub diagnostics: Vec<Diagnostic>,
    pub success: bool,
    /// Present only when `success` is set.
    pub model: Option<Protocol>,
}

/// Group root elements by schema name, keeping first appearance order.
fn group_documents<'d>(
    documents: &'d [SchemaDocument],
    diags: &mut Diagnostics,
) -> Vec<(String, Vec<&'d XmlNode>)> {
    let mut groups: Vec<(String, Vec<&XmlNode>)> = Vec::new();
    for document in documents {
        let root = document.root();
        if root.name() != "schema" {
            diags.report(SchemaError::new(
                root.location().clone(),
                ErrorKind::UnexpectedElement {
                    element: root.name().to_string(),
                    parent: "document".to_string(),
                },
            ));
            continue;
        }
        let name = match root.attribute("name") {
            Some(name) if is_identifier(name) => name,
            Some(name) => {
                diags.report(SchemaError::bad_value(
                    root.location(),
                    "name",
                    name,
                    "expected an identifier",
                ));
                continue;
            }
            None => {
                diags.report(SchemaError::missing(root.location(), "schema", "name"));
                continue;
            }
        };
        match groups.iter_mut().find(|(known, _)| known == name) {
            Some((_, roots)) => roots.push(root),
            None => groups.push((name.to_string(), vec![root])),
        }
    }
    groups
}

/// Apply the explicit schema order, appending unlisted schemas.
fn order_groups<'d>(
    mut groups: Vec<(String, Vec<&'d XmlNode>)>,
    order: &[String],
    diags: &mut Diagnostics,
) -> Vec<(String, Vec<&'d XmlNode>)> {
    let mut ordered = Vec::with_capacity(groups.len());
    for name in order {
        match groups.iter().position(|(known, _)| known == name) {
            Some(pos) => ordered.push(groups.remove(pos)),
            None if ordered.iter().any(|(known, _)| known == name) => {}
            None => diags.report(SchemaError::dangling(&Location::unknown(), "schema", name)),
        }
    }
    ordered.extend(groups);
    ordered
}

/// Build and validate the protocol described by `documents`.
///
/// Every diagnostic of the run is returned together; the model is only
/// handed out when nothing failed.
pub fn compile(documents: &[SchemaDocument], options: &CompileOptions) -> Compilation {
    let mut diags = Diagnostics::new();
    let groups = group_documents(documents, &mut diags);
    let groups = order_groups(groups, &options.schema_order, &mut diags);
    let names: Vec<String> = groups.iter().map(|(name, _)| name.clone()).collect();
    debug!(documents = documents.len(), schemas = ?names, "compiling");

    let mut built: Vec<Schema> = Vec::with_capacity(groups.len());
    for (idx, (name, roots)) in groups.iter().enumerate() {
        let schema = {
            let mut cx = ParseContext::new(idx, &names, &built, options, &mut diags);
            schema::build(name, roots, &mut cx)
        };
        built.push(schema);
    }

    if options.warnings_as_errors {
        diags.promote_warnings();
    }
    let success = !diags.has_failures();
    let diagnostics = diags.into_sorted(|file| {
        documents
            .iter()
            .position(|d| d.file() == file)
            .unwrap_or(usize::MAX)
    });
    debug!(success, diagnostics = diagnostics.len(), "compilation finished");
    Compilation {
        diagnostics,
        success,
        model: success.then_some(Protocol { schemas: built }),
    }
}

/// Any entity addressable by an external reference.
#[derive(Debug, Clone, Copy)]
pub enum Entity<'a> {
    Namespace(&'a Namespace),
    Field(&'a Field),
    Message(&'a Message),
    Interface(&'a Interface),
    Frame(&'a Frame),
    Alias(&'a Alias),
}

impl<'a> Entity<'a> {
    pub fn name(&self) -> &'a str {
        match *self {
            Entity::Namespace(ns) => ns.name(),
            Entity::Field(field) => field.name(),
            Entity::Message(message) => message.name(),
            Entity::Interface(interface) => interface.name(),
            Entity::Frame(frame) => frame.name(),
            Entity::Alias(alias) => alias.name(),
        }
    }

    /// Element name of the entity kind.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Entity::Namespace(_) => "namespace",
            Entity::Field(_) => "field",
            Entity::Message(_) => "message",
            Entity::Interface(_) => "interface",
            Entity::Frame(_) => "frame",
            Entity::Alias(_) => "alias",
        }
    }

    pub fn location(&self) -> &'a Location {
        match *self {
            Entity::Namespace(ns) => ns.location(),
            Entity::Field(field) => field.location(),
            Entity::Message(message) => message.location(),
            Entity::Interface(interface) => interface.location(),
            Entity::Frame(frame) => frame.location(),
            Entity::Alias(alias) => alias.location(),
        }
    }
}

/// Validated model of every schema, in processing order.
#[derive(Debug, Clone)]
pub struct Protocol {
    schemas: Vec<Schema>,
}

impl Protocol {
    pub fn schemas(&self) -> &[Schema] {
        &self.schemas
    }

    pub fn schema(&self, name: &str) -> Option<&Schema> {
        self.schemas.iter().find(|s| s.name() == name)
    }

    /// The last processed schema, which unqualified references address.
    pub fn main_schema(&self) -> Option<&Schema> {
        self.schemas.last()
    }

    pub fn field(&self, handle: FieldHandle) -> Option<&Field> {
        self.schemas
            .get(handle.schema)?
            .field_at(handle.namespace, handle.index)
    }

    /// Follow `ref` fields to the defining field.
    pub fn resolve_ref<'a>(&'a self, field: &'a Field) -> &'a Field {
        field.resolve_ref(self)
    }

    /// Look up `@schema.path.name`, or `path.name` in the main schema.
    pub fn find(&self, external_ref: &str) -> Option<Entity<'_>> {
        let (schema, path) = match external_ref.strip_prefix('@') {
            Some(rest) => {
                let (name, path) = rest.split_once('.').unwrap_or((rest, ""));
                (self.schema(name)?, path)
            }
            None => (self.main_schema()?, external_ref),
        };
        if path.is_empty() {
            return Some(Entity::Namespace(schema.root()));
        }
        if let Some(id) = schema.find_namespace(path) {
            return schema.namespace(id).map(Entity::Namespace);
        }
        let (parent, name) = path.rsplit_once('.').unwrap_or(("", path));
        let ns = schema.namespace(schema.find_namespace(parent)?)?;
        ns.field(name)
            .map(Entity::Field)
            .or_else(|| ns.message(name).map(Entity::Message))
            .or_else(|| ns.interface(name).map(Entity::Interface))
            .or_else(|| ns.frame(name).map(Entity::Frame))
            .or_else(|| ns.aliases().iter().find(|a| a.name() == name).map(Entity::Alias))
    }

    /// Qualified name of a namespace-level field.
    pub fn field_name(&self, handle: FieldHandle) -> Option<String> {
        let schema = self.schemas.get(handle.schema)?;
        let field = schema.field_at(handle.namespace, handle.index)?;
        let local = schema.qualified_name(handle.namespace, field.name());
        Some(format!("@{}.{local}", schema.name()))
    }
}

impl FieldStore for Protocol {
    fn field(&self, handle: FieldHandle) -> Option<&Field> {
        Protocol::field(self, handle)
    }
}
