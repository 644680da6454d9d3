//! One schema: the namespace tree built from its documents and the phases
//! that fill it.

use schema_xml::{Location, XmlNode};
use tracing::debug;

use crate::alias::Alias;
use crate::common::{Endian, VersionRange};
use crate::context::ParseContext;
use crate::error::{ErrorKind, SchemaError};
use crate::field::{parse_field, Field, FieldScope};
use crate::frame::Frame;
use crate::interface::Interface;
use crate::message::Message;
use crate::namespace::{Namespace, NamespaceId};
use crate::props::Props;
use crate::resolve;

const SCHEMA_PROPS: &[&str] = &[
    "name",
    "id",
    "version",
    "dslVersion",
    "endian",
    "description",
    "nonUniqueMsgIdAllowed",
];

const NAMESPACE_PROPS: &[&str] = &["name", "description"];

const PLATFORM_PROPS: &[&str] = &["name", "description"];

/// Processing state of a schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Phase {
    Unparsed,
    Fields,
    Aliases,
    Messages,
    FramesAndInterfaces,
    Resolving,
    Ready,
}

#[derive(Debug, Clone, Default)]
struct Header {
    id: Option<u32>,
    version: u32,
    dsl_version: Option<u32>,
    endian: Endian,
    description: Option<String>,
    non_unique_msg_id_allowed: bool,
}

impl Header {
    fn parse(props: &Props<'_>) -> Result<Self, SchemaError> {
        Ok(Self {
            id: props.unsigned::<u32>("id")?,
            version: props.unsigned::<u32>("version")?.unwrap_or(0),
            dsl_version: props.unsigned::<u32>("dslVersion")?,
            endian: Endian::parse(props, Endian::Big)?,
            description: props.string("description")?,
            non_unique_msg_id_allowed: props.bool("nonUniqueMsgIdAllowed", false)?,
        })
    }
}

#[derive(Debug, Clone)]
pub struct Schema {
    name: String,
    header: Header,
    platforms: Vec<String>,
    pub(crate) namespaces: Vec<Namespace>,
    phase: Phase,
    location: Location,
}

impl Schema {
    fn new(name: &str, location: Location) -> Self {
        Self {
            name: name.to_string(),
            header: Header::default(),
            platforms: Vec::new(),
            namespaces: vec![Namespace::new(String::new(), None, location.clone())],
            phase: Phase::Unparsed,
            location,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn id(&self) -> Option<u32> {
        self.header.id
    }

    /// Current protocol version.
    pub fn version(&self) -> u32 {
        self.header.version
    }

    pub fn dsl_version(&self) -> Option<u32> {
        self.header.dsl_version
    }

    pub fn endian(&self) -> Endian {
        self.header.endian
    }

    pub fn description(&self) -> Option<&str> {
        self.header.description.as_deref()
    }

    pub fn non_unique_msg_id_allowed(&self) -> bool {
        self.header.non_unique_msg_id_allowed
    }

    pub fn platforms(&self) -> &[String] {
        &self.platforms
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn location(&self) -> &Location {
        &self.location
    }

    /// Every namespace, the root first.
    pub fn namespaces(&self) -> &[Namespace] {
        &self.namespaces
    }

    pub fn namespace(&self, id: NamespaceId) -> Option<&Namespace> {
        self.namespaces.get(id.index())
    }

    pub fn root(&self) -> &Namespace {
        &self.namespaces[NamespaceId::ROOT.index()]
    }

    /// Namespace at a dotted path from the root; `""` is the root.
    pub fn find_namespace(&self, path: &str) -> Option<NamespaceId> {
        if path.is_empty() {
            return Some(NamespaceId::ROOT);
        }
        let names: Vec<&str> = path.split('.').collect();
        self.descend(NamespaceId::ROOT, &names)
    }

    /// Dotted path of a namespace, empty for the root.
    pub fn namespace_path(&self, id: NamespaceId) -> String {
        let mut names = Vec::new();
        let mut current = Some(id);
        while let Some(ns) = current.and_then(|id| self.namespace(id)) {
            if !ns.name().is_empty() {
                names.push(ns.name());
            }
            current = ns.parent();
        }
        names.reverse();
        names.join(".")
    }

    /// Name of an entity declared in namespace `id`, qualified from the root.
    pub fn qualified_name(&self, id: NamespaceId, name: &str) -> String {
        let path = self.namespace_path(id);
        if path.is_empty() {
            name.to_string()
        } else {
            format!("{path}.{name}")
        }
    }

    pub fn messages(&self) -> impl Iterator<Item = &Message> + '_ {
        self.namespaces.iter().flat_map(|ns| ns.messages.iter())
    }

    pub fn interfaces(&self) -> impl Iterator<Item = &Interface> + '_ {
        self.namespaces.iter().flat_map(|ns| ns.interfaces.iter())
    }

    pub fn frames(&self) -> impl Iterator<Item = &Frame> + '_ {
        self.namespaces.iter().flat_map(|ns| ns.frames.iter())
    }

    /// Namespace-level fields with the namespace declaring them.
    pub fn fields(&self) -> impl Iterator<Item = (NamespaceId, &Field)> + '_ {
        self.namespaces.iter().enumerate().flat_map(|(idx, ns)| {
            ns.fields.iter().map(move |f| (NamespaceId::new(idx), f))
        })
    }

    pub(crate) fn field_at(&self, namespace: NamespaceId, index: usize) -> Option<&Field> {
        self.namespace(namespace)?.fields.get(index)
    }

    pub(crate) fn child_namespace(&self, parent: NamespaceId, name: &str) -> Option<NamespaceId> {
        self.namespace(parent)?
            .children()
            .iter()
            .copied()
            .find(|id| self.namespace(*id).is_some_and(|ns| ns.name() == name))
    }

    fn descend(&self, from: NamespaceId, names: &[&str]) -> Option<NamespaceId> {
        names
            .iter()
            .try_fold(from, |ns, name| self.child_namespace(ns, name))
    }

    /// `from` and each enclosing namespace up to the root.
    pub(crate) fn scope_chain(&self, from: NamespaceId) -> Vec<NamespaceId> {
        let mut chain = Vec::new();
        let mut current = Some(from);
        while let Some(id) = current {
            chain.push(id);
            current = self.namespace(id).and_then(Namespace::parent);
        }
        chain
    }

    /// Find an entity by dotted path, searching `from` and then every
    /// enclosing namespace. `pick` finds the entity index by name.
    pub(crate) fn locate(
        &self,
        from: NamespaceId,
        path: &[&str],
        pick: &dyn Fn(&Namespace, &str) -> Option<usize>,
    ) -> Option<(NamespaceId, usize)> {
        let (name, namespaces) = path.split_last()?;
        self.scope_chain(from).into_iter().find_map(|start| {
            let ns = self.descend(start, namespaces)?;
            pick(self.namespace(ns)?, name).map(|idx| (ns, idx))
        })
    }

    /// Visit every field owned by the schema, nested ones included, with the
    /// namespace it was declared in.
    pub(crate) fn walk_fields<'s>(&'s self, visit: &mut dyn FnMut(NamespaceId, &'s Field)) {
        for (idx, ns) in self.namespaces.iter().enumerate() {
            let id = NamespaceId::new(idx);
            let mut visit_one = |f: &'s Field| visit(id, f);
            for field in &ns.fields {
                field.walk(&mut visit_one);
            }
            for message in &ns.messages {
                for field in message.fields.iter().chain(&message.replace) {
                    field.walk(&mut visit_one);
                }
            }
            for interface in &ns.interfaces {
                for field in &interface.fields {
                    field.walk(&mut visit_one);
                }
            }
            for frame in &ns.frames {
                for layer in frame.layers() {
                    if let Some(field) = &layer.field {
                        field.walk(&mut visit_one);
                    }
                }
            }
        }
    }

    /// Same traversal order as [`Schema::walk_fields`].
    pub(crate) fn walk_fields_mut(&mut self, visit: &mut dyn FnMut(&mut Field)) {
        for ns in &mut self.namespaces {
            for field in &mut ns.fields {
                field.walk_mut(visit);
            }
            for message in &mut ns.messages {
                for field in message.fields.iter_mut().chain(message.replace.iter_mut()) {
                    field.walk_mut(visit);
                }
            }
            for interface in &mut ns.interfaces {
                for field in &mut interface.fields {
                    field.walk_mut(visit);
                }
            }
            for frame in &mut ns.frames {
                for layer in frame.layers_mut() {
                    if let Some(field) = &mut layer.field {
                        field.walk_mut(visit);
                    }
                }
            }
        }
    }

    fn enter(&mut self, phase: Phase) {
        debug!(schema = %self.name, ?phase, "schema phase");
        self.phase = phase;
    }

    fn add_namespace(&mut self, parent: NamespaceId, name: &str, location: &Location) -> NamespaceId {
        if let Some(existing) = self.child_namespace(parent, name) {
            return existing;
        }
        let id = NamespaceId::new(self.namespaces.len());
        self.namespaces
            .push(Namespace::new(name.to_string(), Some(parent), location.clone()));
        if let Some(ns) = self.namespaces.get_mut(parent.index()) {
            ns.add_child(id);
        }
        id
    }
}

/// Element holding entities of one namespace: the schema root or a
/// `<namespace>` element.
struct Container<'x> {
    namespace: NamespaceId,
    node: &'x XmlNode,
}

impl<'x> Container<'x> {
    /// Children named `single`, plus the children of `wrapper` elements.
    fn entities(&self, single: Option<&str>, wrapper: Option<&str>) -> Vec<&'x XmlNode> {
        let mut out = Vec::new();
        for child in self.node.children() {
            if Some(child.name()) == single {
                out.push(child);
            } else if Some(child.name()) == wrapper {
                out.extend(child.children());
            }
        }
        out
    }
}

fn unexpected(child: &XmlNode, parent: &XmlNode) -> SchemaError {
    SchemaError::new(
        child.location().clone(),
        ErrorKind::UnexpectedElement {
            element: child.name().to_string(),
            parent: parent.name().to_string(),
        },
    )
}

/// Build and resolve one schema from all documents declaring it.
pub(crate) fn build(name: &str, roots: &[&XmlNode], cx: &mut ParseContext<'_>) -> Schema {
    let location = roots
        .first()
        .map_or_else(Location::unknown, |root| root.location().clone());
    let mut schema = Schema::new(name, location);

    for (idx, root) in roots.iter().enumerate() {
        let header = Props::new(root, &[SCHEMA_PROPS], cx.strict(true)).and_then(|props| Header::parse(&props));
        let Some(header) = cx.diags.check(header) else {
            continue;
        };
        if idx == 0 {
            schema.header = header;
        } else if header.version != schema.header.version || header.endian != schema.header.endian {
            cx.report(SchemaError::invalid(
                root.location(),
                name,
                "documents of one schema disagree on 'version' or 'endian'",
            ));
        }
    }
    cx.schema_version = schema.header.version;
    cx.endian = schema.header.endian;

    let mut containers = Vec::new();
    for root in roots {
        collect(&mut schema, root, NamespaceId::ROOT, true, &mut containers, cx);
    }

    schema.enter(Phase::Fields);
    for container in &containers {
        let scope = FieldScope::new(VersionRange::default(), cx.endian, container.namespace);
        for node in container.entities(None, Some("fields")) {
            let result = parse_field(node, &scope, cx);
            let ns = container.namespace;
            match result {
                Ok(field) => {
                    let Some(namespace) = schema.namespaces.get_mut(ns.index()) else {
                        continue;
                    };
                    if namespace.field(field.name()).is_some() {
                        cx.report(SchemaError::duplicate(field.location(), "field", field.name()));
                    } else {
                        namespace.fields.push(field);
                    }
                }
                Err(err) => {
                    cx.report(err);
                    if let Some(name) = node.attribute("name") {
                        cx.mark_failed(schema.qualified_name(ns, name));
                    }
                }
            }
        }
    }

    schema.enter(Phase::Aliases);
    for container in &containers {
        for node in container.entities(Some("alias"), None) {
            let parsed = Alias::parse(node, &VersionRange::default(), cx);
            let Some(alias) = cx.diags.check(parsed) else {
                continue;
            };
            let Some(namespace) = schema.namespaces.get_mut(container.namespace.index()) else {
                continue;
            };
            if namespace.field(alias.name()).is_some() {
                cx.report(SchemaError::invalid(
                    alias.location(),
                    alias.name(),
                    "alias name clashes with a field of the same name",
                ));
            } else if namespace.aliases.iter().any(|a| a.name() == alias.name()) {
                cx.report(SchemaError::duplicate(alias.location(), "alias", alias.name()));
            } else {
                namespace.aliases.push(alias);
            }
        }
    }

    schema.enter(Phase::Messages);
    for container in &containers {
        for node in container.entities(Some("message"), Some("messages")) {
            let result = Message::parse(node, container.namespace, &VersionRange::default(), cx);
            add_entity(&mut schema, container.namespace, node, result, "message", cx, |ns, message| {
                if ns.message(message.name()).is_some() {
                    return Err(message);
                }
                ns.messages.push(message);
                Ok(())
            });
        }
    }

    schema.enter(Phase::FramesAndInterfaces);
    for container in &containers {
        for node in container.entities(Some("interface"), Some("interfaces")) {
            let result = Interface::parse(node, container.namespace, cx);
            add_entity(&mut schema, container.namespace, node, result, "interface", cx, |ns, interface| {
                if ns.interface(interface.name()).is_some() {
                    return Err(interface);
                }
                ns.interfaces.push(interface);
                Ok(())
            });
        }
    }
    for container in &containers {
        for node in container.entities(Some("frame"), Some("frames")) {
            let result = Frame::parse(node, container.namespace, cx);
            add_entity(&mut schema, container.namespace, node, result, "frame", cx, |ns, frame| {
                if ns.frame(frame.name()).is_some() {
                    return Err(frame);
                }
                ns.frames.push(frame);
                Ok(())
            });
        }
    }

    schema.enter(Phase::Resolving);
    resolve::run(&mut schema, cx);
    schema.enter(Phase::Ready);
    schema
}

/// Store a parsed entity, reporting a duplicate name or the parse failure.
fn add_entity<T>(
    schema: &mut Schema,
    ns: NamespaceId,
    node: &XmlNode,
    result: Result<T, SchemaError>,
    what: &'static str,
    cx: &mut ParseContext<'_>,
    insert: impl FnOnce(&mut Namespace, T) -> Result<(), T>,
) {
    match result {
        Ok(entity) => {
            let Some(namespace) = schema.namespaces.get_mut(ns.index()) else {
                return;
            };
            if insert(namespace, entity).is_err() {
                let name = node.attribute("name").unwrap_or_default();
                cx.report(SchemaError::duplicate(node.location(), what, name));
            }
        }
        Err(err) => {
            cx.report(err);
            if let Some(name) = node.attribute("name") {
                cx.mark_failed(schema.qualified_name(ns, name));
            }
        }
    }
}

/// Register the namespace tree under `node` and remember every container.
fn collect<'x>(
    schema: &mut Schema,
    node: &'x XmlNode,
    namespace: NamespaceId,
    is_root: bool,
    containers: &mut Vec<Container<'x>>,
    cx: &mut ParseContext<'_>,
) {
    containers.push(Container { namespace, node });
    for child in node.children() {
        match child.name() {
            "namespace" => {
                let props = match Props::new(child, &[NAMESPACE_PROPS], cx.strict(true)) {
                    Ok(props) => props,
                    Err(err) => {
                        cx.report(err);
                        continue;
                    }
                };
                let name = match props.identifier("name") {
                    Ok(Some(name)) => name,
                    Ok(None) => {
                        cx.report(SchemaError::missing(child.location(), "namespace", "name"));
                        continue;
                    }
                    Err(err) => {
                        cx.report(err);
                        continue;
                    }
                };
                let id = schema.add_namespace(namespace, name, child.location());
                if let Some(Some(description)) = cx.diags.check(props.string("description")) {
                    if let Some(ns) = schema.namespaces.get_mut(id.index()) {
                        ns.description = Some(description);
                    }
                }
                collect(schema, child, id, false, containers, cx);
            }
            "platform" | "platforms" if is_root => {
                let nodes: Vec<&XmlNode> = if child.name() == "platform" {
                    vec![child]
                } else {
                    child.children().iter().collect()
                };
                for platform in nodes {
                    let parsed = parse_platform(platform, cx);
                    if let Some(name) = cx.diags.check(parsed) {
                        if schema.platforms.contains(&name) {
                            cx.report(SchemaError::duplicate(platform.location(), "platform", &name));
                        } else {
                            schema.platforms.push(name);
                        }
                    }
                }
            }
            "fields" | "message" | "messages" | "frame" | "frames" | "interface" | "interfaces"
            | "alias" | "description" => {}
            _ => cx.report(unexpected(child, node)),
        }
    }
}

fn parse_platform(node: &XmlNode, cx: &ParseContext<'_>) -> Result<String, SchemaError> {
    if node.name() != "platform" {
        return Err(SchemaError::new(
            node.location().clone(),
            ErrorKind::UnexpectedElement {
                element: node.name().to_string(),
                parent: "platforms".to_string(),
            },
        ));
    }
    let props = Props::new(node, &[PLATFORM_PROPS], cx.strict(true))?;
    let name = props
        .identifier("name")?
        .ok_or_else(|| SchemaError::missing(node.location(), "platform", "name"))?;
    Ok(name.to_string())
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::diagnostics::Diagnostics;
    use crate::protocol::CompileOptions;

    /// Build the single schema declared by `xml`.
    pub(crate) fn build_one(xml: &str) -> (Schema, Diagnostics) {
        let root = schema_xml::parse_document(xml, "schema.xml").expect("parse xml");
        let name = root.attribute("name").unwrap_or_default().to_string();
        let names = vec![name.clone()];
        let options = CompileOptions::default();
        let mut diags = Diagnostics::new();
        let schema = {
            let mut cx = ParseContext::new(0, &names, &[], &options, &mut diags);
            build(&name, &[&root], &mut cx)
        };
        (schema, diags)
    }

    #[test]
    fn namespaces_merge_and_nest() {
        let (schema, diags) = build_one(
            r#"<schema name="demo" version="2" endian="little">
                <description>Demo protocol</description>
                <namespace name="a">
                    <fields><int name="x" type="uint8"/></fields>
                    <namespace name="b">
                        <fields><int name="y" type="uint8"/></fields>
                    </namespace>
                </namespace>
                <namespace name="a">
                    <fields><int name="z" type="uint8"/></fields>
                </namespace>
            </schema>"#,
        );
        assert!(!diags.has_failures(), "{:?}", diags.records());
        assert_eq!(schema.phase(), Phase::Ready);
        assert_eq!(schema.version(), 2);
        assert_eq!(schema.endian(), Endian::Little);
        assert_eq!(schema.description(), Some("Demo protocol"));
        assert_eq!(schema.namespaces().len(), 3);
        let a = schema.find_namespace("a").expect("a");
        assert_eq!(schema.namespace(a).expect("a").fields().len(), 2);
        let b = schema.find_namespace("a.b").expect("a.b");
        assert_eq!(schema.namespace_path(b), "a.b");
        assert_eq!(schema.qualified_name(b, "y"), "a.b.y");
        assert_eq!(schema.fields().count(), 3);
    }

    #[test]
    fn lookup_searches_enclosing_namespaces() {
        let (schema, _) = build_one(
            r#"<schema name="demo">
                <fields><int name="top" type="uint8"/></fields>
                <namespace name="a">
                    <namespace name="b">
                        <fields><int name="deep" type="uint8"/></fields>
                    </namespace>
                </namespace>
            </schema>"#,
        );
        let b = schema.find_namespace("a.b").expect("a.b");
        let a = schema.find_namespace("a").expect("a");
        let pick = |ns: &Namespace, name: &str| ns.field_index(name);
        assert_eq!(schema.locate(b, &["top"], &pick), Some((NamespaceId::ROOT, 0)));
        assert_eq!(schema.locate(a, &["b", "deep"], &pick), Some((b, 0)));
        assert_eq!(schema.locate(NamespaceId::ROOT, &["deep"], &pick), None);
        assert_eq!(schema.scope_chain(b), vec![b, a, NamespaceId::ROOT]);
    }

    #[test]
    fn structural_problems_keep_siblings() {
        let (schema, diags) = build_one(
            r#"<schema name="demo" colour="red">
                <widget/>
                <fields>
                    <int name="a" type="uint8"/>
                    <int name="a" type="uint16"/>
                    <int name="b" type="uint8"/>
                </fields>
                <alias name="b" field="$a"/>
                <message name="M" id="1"/>
                <message name="M" id="2"/>
            </schema>"#,
        );
        let messages: Vec<&str> = diags.records().iter().map(|d| d.message.as_str()).collect();
        assert_eq!(messages.len(), 5, "{messages:?}");
        assert!(messages[0].contains("colour"));
        assert!(messages[1].contains("<widget>"));
        assert_eq!(schema.root().fields().len(), 2);
        assert_eq!(schema.root().messages().len(), 1);
    }

    #[test]
    fn namespace_aliases_and_platforms_are_collected() {
        let (schema, diags) = build_one(
            r#"<schema name="demo">
                <platform name="linux"/>
                <platforms><platform name="rtos"/><platform name="linux"/></platforms>
                <fields><int name="a" type="uint8"/></fields>
                <alias name="first" field="$a"/>
            </schema>"#,
        );
        let messages: Vec<&str> = diags.records().iter().map(|d| d.message.as_str()).collect();
        assert_eq!(messages.len(), 1, "{messages:?}");
        assert!(messages[0].contains("linux"));
        assert_eq!(schema.platforms(), ["linux", "rtos"]);
        let aliases = schema.root().aliases();
        assert_eq!(aliases.len(), 1);
        assert_eq!(aliases[0].name(), "first");
        assert_eq!(aliases[0].path(), ["a"]);
    }

    #[test]
    fn walks_visit_every_owner() {
        let (schema, _) = build_one(
            r#"<schema name="demo">
                <fields><bundle name="B"><int name="x" type="uint8"/></bundle></fields>
                <message name="M" id="1"><int name="m" type="uint8"/></message>
                <interface name="I"><int name="i" type="uint8"/></interface>
                <frame name="F">
                    <id name="Id"><int name="f" type="uint8"/></id>
                    <payload name="P"/>
                </frame>
            </schema>"#,
        );
        let mut names = Vec::new();
        schema.walk_fields(&mut |_, f| names.push(f.name().to_string()));
        assert_eq!(names, ["B", "x", "m", "i", "f"]);
    }
}
