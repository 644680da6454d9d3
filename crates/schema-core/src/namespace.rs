//! Named scopes holding protocol entities.

use schema_xml::Location;

use crate::alias::Alias;
use crate::field::Field;
use crate::frame::Frame;
use crate::interface::Interface;
use crate::message::Message;

/// Index of a namespace inside its schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NamespaceId(usize);

impl NamespaceId {
    /// The unnamed namespace formed by the schema element itself.
    pub const ROOT: NamespaceId = NamespaceId(0);

    pub(crate) fn new(index: usize) -> Self {
        Self(index)
    }

    pub fn index(self) -> usize {
        self.0
    }
}

#[derive(Debug, Clone)]
pub struct Namespace {
    name: String,
    pub(crate) description: Option<String>,
    parent: Option<NamespaceId>,
    children: Vec<NamespaceId>,
    pub(crate) fields: Vec<Field>,
    pub(crate) aliases: Vec<Alias>,
    pub(crate) messages: Vec<Message>,
    pub(crate) interfaces: Vec<Interface>,
    pub(crate) frames: Vec<Frame>,
    location: Location,
}

impl Namespace {
    pub(crate) fn new(name: String, parent: Option<NamespaceId>, location: Location) -> Self {
        Self {
            name,
            description: None,
            parent,
            children: Vec::new(),
            fields: Vec::new(),
            aliases: Vec::new(),
            messages: Vec::new(),
            interfaces: Vec::new(),
            frames: Vec::new(),
            location,
        }
    }

    /// Empty for the root namespace.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    pub fn parent(&self) -> Option<NamespaceId> {
        self.parent
    }

    pub fn children(&self) -> &[NamespaceId] {
        &self.children
    }

    pub(crate) fn add_child(&mut self, id: NamespaceId) {
        self.children.push(id);
    }

    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    pub fn field(&self, name: &str) -> Option<&Field> {
        self.fields.iter().find(|f| f.name() == name)
    }

    pub(crate) fn field_index(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|f| f.name() == name)
    }

    pub fn aliases(&self) -> &[Alias] {
        &self.aliases
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn message(&self, name: &str) -> Option<&Message> {
        self.messages.iter().find(|m| m.name() == name)
    }

    pub fn interfaces(&self) -> &[Interface] {
        &self.interfaces
    }

    pub fn interface(&self, name: &str) -> Option<&Interface> {
        self.interfaces.iter().find(|i| i.name() == name)
    }

    pub fn frames(&self) -> &[Frame] {
        &self.frames
    }

    pub fn frame(&self, name: &str) -> Option<&Frame> {
        self.frames.iter().find(|f| f.name() == name)
    }

    pub fn location(&self) -> &Location {
        &self.location
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
            && self.messages.is_empty()
            && self.interfaces.is_empty()
            && self.frames.is_empty()
            && self.aliases.is_empty()
            && self.children.is_empty()
    }
}
