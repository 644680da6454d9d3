//! Cross-reference resolution, run once every entity of a schema is built.
//!
//! Passes run in a fixed order: `ref` targets, copied fields and aliases,
//! message ids and platforms, then the checks that need a linked model.

use std::collections::{HashMap, HashSet};

use schema_xml::Location;
use tracing::{debug, trace};

use crate::alias::Alias;
use crate::common::OverrideKind;
use crate::cond::{CondScope, OptCond};
use crate::context::{ParseContext, SchemaTarget};
use crate::error::{ErrorKind, SchemaError};
use crate::field::{
    Field, FieldHandle, FieldKind, FieldStore, Kind, LengthInfo, Prefix, RefField, ResolvedRef,
    VariantSelection,
};
use crate::frame::{Frame, LayerKind};
use crate::interface::Interface;
use crate::message::{CopyPosition, Message, PlatformFilter};
use crate::namespace::{Namespace, NamespaceId};
use crate::schema::Schema;

/// Namespace-level fields of the schema being built and of every prior one.
#[derive(Clone, Copy)]
pub(crate) struct SchemaStore<'a> {
    index: usize,
    current: &'a Schema,
    prior: &'a [Schema],
}

impl<'a> SchemaStore<'a> {
    pub(crate) fn new(index: usize, current: &'a Schema, prior: &'a [Schema]) -> Self {
        Self {
            index,
            current,
            prior,
        }
    }
}

impl FieldStore for SchemaStore<'_> {
    fn field(&self, handle: FieldHandle) -> Option<&Field> {
        let schema = if handle.schema == self.index {
            self.current
        } else {
            self.prior.get(handle.schema)?
        };
        schema.field_at(handle.namespace, handle.index)
    }
}

pub(crate) fn run(schema: &mut Schema, cx: &mut ParseContext<'_>) {
    resolve_refs(schema, cx);
    copy_message_fields(schema, cx);
    copy_interface_fields(schema, cx);
    bind_messages(schema, cx);
    check_copy_code(schema, cx);
    check_message_ids(schema, cx);

    let prior = cx.prior;
    let schema: &Schema = schema;
    let mut checker = Checker {
        store: SchemaStore::new(cx.schema_index, schema, prior),
        schema,
        cx,
    };
    checker.run();
}

/// Entity found by a qualified lookup; `schema` is `None` for the schema
/// being built.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct Found {
    schema: Option<usize>,
    namespace: NamespaceId,
    index: usize,
}

type Pick<'p> = &'p dyn Fn(&Namespace, &str) -> Option<usize>;

fn pick_field(ns: &Namespace, name: &str) -> Option<usize> {
    ns.field_index(name)
}

fn pick_message(ns: &Namespace, name: &str) -> Option<usize> {
    ns.messages.iter().position(|m| m.name() == name)
}

fn pick_interface(ns: &Namespace, name: &str) -> Option<usize> {
    ns.interfaces.iter().position(|i| i.name() == name)
}

/// Look `target` up from `scope`, or from the root of another schema for an
/// `@schema.path` reference.
fn find(
    schema: &Schema,
    cx: &ParseContext<'_>,
    target: &str,
    scope: NamespaceId,
    location: &Location,
    pick: Pick<'_>,
) -> Result<Option<Found>, SchemaError> {
    let Some(external) = target.strip_prefix('@') else {
        let path: Vec<&str> = target.split('.').collect();
        return Ok(schema
            .locate(scope, &path, pick)
            .map(|(namespace, index)| Found {
                schema: None,
                namespace,
                index,
            }));
    };
    let (name, rest) = external
        .split_once('.')
        .ok_or_else(|| SchemaError::invalid(location, target, "expected '@schema.path'"))?;
    let path: Vec<&str> = rest.split('.').collect();
    trace!(target, "external reference");
    Ok(match cx.schema_target(name, target, location)? {
        SchemaTarget::Current => schema
            .locate(NamespaceId::ROOT, &path, pick)
            .map(|(namespace, index)| Found {
                schema: None,
                namespace,
                index,
            }),
        SchemaTarget::Prior(idx) => cx
            .prior
            .get(idx)
            .and_then(|prior| prior.locate(NamespaceId::ROOT, &path, pick))
            .map(|(namespace, index)| Found {
                schema: Some(idx),
                namespace,
                index,
            }),
    })
}

/// Error for a lookup that found nothing. Targets that already failed to
/// build stay quiet.
fn not_found(
    schema: &Schema,
    cx: &ParseContext<'_>,
    what: &'static str,
    target: &str,
    scope: NamespaceId,
    location: &Location,
) -> SchemaError {
    let failed = match target.strip_prefix('@') {
        Some(external) => external
            .split_once('.')
            .is_some_and(|(name, rest)| name == cx.schema_name && cx.is_failed(rest)),
        None => schema
            .scope_chain(scope)
            .into_iter()
            .any(|ns| cx.is_failed(&schema.qualified_name(ns, target))),
    };
    if failed {
        SchemaError::already_reported(location)
    } else {
        SchemaError::dangling(location, what, target)
    }
}

fn schema_of<'a>(current: &'a Schema, prior: &'a [Schema], found: Found) -> Option<&'a Schema> {
    match found.schema {
        None => Some(current),
        Some(idx) => prior.get(idx),
    }
}

struct RefResolver<'a> {
    schema: &'a Schema,
    store: SchemaStore<'a>,
    cx: &'a ParseContext<'a>,
    cache: HashMap<FieldHandle, Option<ResolvedRef>>,
    stack: Vec<FieldHandle>,
}

impl<'a> RefResolver<'a> {
    fn resolve(&mut self, reference: &RefField, location: &Location) -> Result<ResolvedRef, SchemaError> {
        let target = reference.target();
        let found = find(self.schema, self.cx, target, reference.scope(), location, &pick_field)?
            .ok_or_else(|| not_found(self.schema, self.cx, "field", target, reference.scope(), location))?;
        let handle = FieldHandle {
            schema: found.schema.unwrap_or(self.cx.schema_index),
            namespace: found.namespace,
            index: found.index,
        };
        trace!(target, ?handle, "ref target");
        self.describe(handle, location)
    }

    fn describe(&mut self, handle: FieldHandle, location: &Location) -> Result<ResolvedRef, SchemaError> {
        if handle.schema != self.cx.schema_index {
            let field = self
                .store
                .field(handle)
                .ok_or_else(|| SchemaError::already_reported(location))?;
            return Ok(ResolvedRef {
                handle,
                kind: field.resolve_ref(&self.store).kind(),
                length: field.length_info(),
                bits: field.bit_length(),
                version_dependent: field.is_version_dependent(),
                deprecated: field.version().deprecated.is_some(),
            });
        }
        if let Some(cached) = self.cache.get(&handle) {
            return cached
                .clone()
                .ok_or_else(|| SchemaError::already_reported(location));
        }
        let schema = self.schema;
        if let Some(pos) = self.stack.iter().position(|h| *h == handle) {
            let chain: Vec<String> = self.stack[pos..]
                .iter()
                .chain(std::iter::once(&handle))
                .map(|h| self.name_of(*h))
                .collect();
            let at = schema
                .field_at(handle.namespace, handle.index)
                .map_or(location, Field::location);
            return Err(SchemaError::new(
                at.clone(),
                ErrorKind::Cycle {
                    what: "ref",
                    chain: chain.join(" -> "),
                },
            ));
        }
        let Some(field) = schema.field_at(handle.namespace, handle.index) else {
            return Err(SchemaError::already_reported(location));
        };
        self.stack.push(handle);
        let result = self.describe_field(handle, field);
        self.stack.pop();
        self.cache.insert(handle, result.as_ref().ok().cloned());
        result
    }

    fn describe_field(&mut self, handle: FieldHandle, field: &'a Field) -> Result<ResolvedRef, SchemaError> {
        let mut refs: Vec<(&'a RefField, &'a Location)> = Vec::new();
        field.walk(&mut |f| {
            if let FieldKind::Ref(reference) = f.details() {
                refs.push((reference, f.location()));
            }
        });
        let mut nested: Vec<(&'a RefField, ResolvedRef)> = Vec::with_capacity(refs.len());
        for (reference, location) in refs {
            match self.resolve(reference, location) {
                Ok(resolved) => nested.push((reference, resolved)),
                Err(err) if matches!(err.kind(), ErrorKind::Cycle { .. }) => return Err(err),
                // The nested reference reports its own failure when visited.
                Err(_) => return Err(SchemaError::already_reported(field.location())),
            }
        }
        let length = field
            .measure(&mut |r| {
                nested
                    .iter()
                    .find(|(n, _)| std::ptr::eq(*n, r))
                    .map(|(_, resolved)| resolved.length)
            })
            .unwrap_or(LengthInfo::UNBOUNDED);
        let own = field.as_ref_field().and_then(|own| {
            nested
                .iter()
                .find(|(n, _)| std::ptr::eq(*n, own))
                .map(|(_, resolved)| resolved)
        });
        let bits = field.common().bit_length.or_else(|| match field.details() {
            FieldKind::Bitfield(bitfield) => Some(bitfield.total_bits()),
            FieldKind::Ref(_) => own.and_then(|r| r.bits),
            _ => length
                .fixed_len()
                .and_then(|len| u32::try_from(len).ok())
                .map(|len| len * 8),
        });
        let mut version_dependent = nested.iter().any(|(_, r)| r.version_dependent);
        field.walk(&mut |f| version_dependent |= f.version().is_version_dependent());
        Ok(ResolvedRef {
            handle,
            kind: own.map_or(field.kind(), |r| r.kind),
            length,
            bits,
            version_dependent,
            deprecated: field.version().deprecated.is_some(),
        })
    }

    fn name_of(&self, handle: FieldHandle) -> String {
        let name = self
            .schema
            .field_at(handle.namespace, handle.index)
            .map_or("?", Field::name);
        self.schema.qualified_name(handle.namespace, name)
    }
}

/// Order-independent key of a cycle chain.
fn cycle_key(chain: &str) -> Vec<String> {
    let mut names: Vec<String> = chain.split(" -> ").map(str::to_string).collect();
    names.sort();
    names.dedup();
    names
}

fn resolve_refs(schema: &mut Schema, cx: &mut ParseContext<'_>) {
    let (results, errors) = {
        let current: &Schema = schema;
        let mut refs: Vec<(&RefField, &Location)> = Vec::new();
        current.walk_fields(&mut |_, f| {
            if let FieldKind::Ref(reference) = f.details() {
                refs.push((reference, f.location()));
            }
        });
        let mut resolver = RefResolver {
            schema: current,
            store: SchemaStore::new(cx.schema_index, current, cx.prior),
            cx: &*cx,
            cache: HashMap::new(),
            stack: Vec::new(),
        };
        let mut errors = Vec::new();
        let mut cycles = HashSet::new();
        let results: Vec<Option<ResolvedRef>> = refs
            .into_iter()
            .map(|(reference, location)| match resolver.resolve(reference, location) {
                Ok(resolved) => Some(resolved),
                Err(err) => {
                    let fresh = match err.kind() {
                        ErrorKind::Cycle { chain, .. } => cycles.insert(cycle_key(chain)),
                        _ => true,
                    };
                    errors.push(if fresh {
                        err
                    } else {
                        SchemaError::already_reported(location)
                    });
                    None
                }
            })
            .collect();
        (results, errors)
    };
    debug!(
        refs = results.len(),
        failed = errors.len(),
        "resolved references"
    );
    for err in errors {
        cx.report(err);
    }
    let mut results = results.into_iter();
    schema.walk_fields_mut(&mut |f| {
        if let FieldKind::Ref(reference) = f.details_mut() {
            if let Some(Some(resolved)) = results.next() {
                reference.set_resolved(resolved);
            }
        }
    });
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CopyState {
    Active,
    Done,
}

type EntityKey = (usize, usize);

/// Fields and aliases taken from a copy source.
struct Copied {
    fields: Vec<Field>,
    aliases: Vec<Alias>,
}

/// Members of a bundle named `source`, following refs.
fn find_bundle(
    schema: &Schema,
    cx: &ParseContext<'_>,
    source: &str,
    scope: NamespaceId,
    location: &Location,
) -> Result<Option<Copied>, SchemaError> {
    let Some(found) = find(schema, cx, source, scope, location, &pick_field)? else {
        return Ok(None);
    };
    let store = SchemaStore::new(cx.schema_index, schema, cx.prior);
    let field = schema_of(schema, cx.prior, found)
        .and_then(|s| s.field_at(found.namespace, found.index))
        .map(|f| f.resolve_ref(&store))
        .ok_or_else(|| SchemaError::already_reported(location))?;
    match field.as_bundle() {
        Some(bundle) => Ok(Some(Copied {
            fields: bundle.members().to_vec(),
            aliases: bundle.aliases().to_vec(),
        })),
        None => Err(SchemaError::invalid(
            location,
            source,
            format!("copy source must be a bundle, found {}", field.kind()),
        )),
    }
}

fn message_at(schema: &Schema, key: EntityKey) -> Option<&Message> {
    schema.namespaces.get(key.0)?.messages.get(key.1)
}

fn message_at_mut(schema: &mut Schema, key: EntityKey) -> Option<&mut Message> {
    schema.namespaces.get_mut(key.0)?.messages.get_mut(key.1)
}

fn message_keys(schema: &Schema) -> Vec<EntityKey> {
    schema
        .namespaces
        .iter()
        .enumerate()
        .flat_map(|(ns, namespace)| (0..namespace.messages.len()).map(move |idx| (ns, idx)))
        .collect()
}

fn copy_message_fields(schema: &mut Schema, cx: &mut ParseContext<'_>) {
    let mut states = HashMap::new();
    for key in message_keys(schema) {
        prepare_message(schema, key, &mut states, cx);
    }
}

/// Fields and aliases of the message named `source`, preparing it first when
/// it belongs to the schema being built.
fn message_source(
    schema: &mut Schema,
    source: &str,
    requester: &str,
    scope: NamespaceId,
    location: &Location,
    states: &mut HashMap<EntityKey, CopyState>,
    cx: &mut ParseContext<'_>,
) -> Result<Option<Copied>, SchemaError> {
    let Some(found) = find(schema, cx, source, scope, location, &pick_message)? else {
        return Ok(None);
    };
    if found.schema.is_none() {
        let key = (found.namespace.index(), found.index);
        if states.get(&key) == Some(&CopyState::Active) {
            return Err(SchemaError::new(
                location.clone(),
                ErrorKind::Cycle {
                    what: "copy",
                    chain: format!("{requester} -> {source}"),
                },
            ));
        }
        prepare_message(schema, key, states, cx);
    }
    let message = schema_of(schema, cx.prior, found)
        .and_then(|s| s.namespace(found.namespace))
        .and_then(|ns| ns.messages.get(found.index))
        .ok_or_else(|| SchemaError::already_reported(location))?;
    Ok(Some(Copied {
        fields: message.fields.clone(),
        aliases: message.aliases.clone(),
    }))
}

fn prepare_message(
    schema: &mut Schema,
    key: EntityKey,
    states: &mut HashMap<EntityKey, CopyState>,
    cx: &mut ParseContext<'_>,
) {
    if states.contains_key(&key) {
        return;
    }
    states.insert(key, CopyState::Active);
    let Some(message) = message_at(schema, key) else {
        return;
    };
    let name = message.name.clone();
    let scope = message.namespace;
    let location = message.location.clone();
    let copy = message.copy_fields.clone();
    let copy_aliases_from = message.copy_aliases_from.clone();

    let mut copied = None;
    if let Some(copy) = &copy {
        let source = match message_source(schema, &copy.source, &name, scope, &location, states, cx) {
            Ok(Some(found)) => Ok(Some(found)),
            Ok(None) => find_bundle(schema, cx, &copy.source, scope, &location),
            Err(err) => Err(err),
        };
        match source {
            Ok(Some(found)) => copied = Some(found),
            Ok(None) => {
                let err = not_found(schema, cx, "copy source", &copy.source, scope, &location);
                cx.report(err);
            }
            Err(err) => cx.report(err),
        }
    }
    let mut extra_aliases = Vec::new();
    if let Some(source) = &copy_aliases_from {
        match message_source(schema, source, &name, scope, &location, states, cx) {
            Ok(Some(found)) => extra_aliases = found.aliases,
            Ok(None) => {
                let err = not_found(schema, cx, "message", source, scope, &location);
                cx.report(err);
            }
            Err(err) => cx.report(err),
        }
    }

    let Some(message) = message_at_mut(schema, key) else {
        return;
    };
    let own = std::mem::take(&mut message.fields);
    let replace = std::mem::take(&mut message.replace);
    let own_aliases = std::mem::take(&mut message.aliases);
    let (fields, mut inherited) = match (copied, copy) {
        (Some(copied), Some(copy)) => {
            let fields = splice(copied.fields, own, replace, copy.position, cx);
            let inherited = if copy.with_aliases {
                copied.aliases
            } else {
                Vec::new()
            };
            (fields, inherited)
        }
        _ => (own, Vec::new()),
    };
    inherited.extend(extra_aliases);

    let aliases = {
        let store = SchemaStore::new(cx.schema_index, schema, cx.prior);
        merge_aliases(own_aliases, inherited, &fields, &store, cx)
    };
    debug!(message = %name, fields = fields.len(), aliases = aliases.len(), "prepared message");
    if let Some(message) = message_at_mut(schema, key) {
        message.fields = fields;
        message.aliases = aliases;
    }
    states.insert(key, CopyState::Done);
}

/// Place copied fields around own ones, applying `<replace>` entries.
fn splice(
    mut copied: Vec<Field>,
    own: Vec<Field>,
    replace: Vec<Field>,
    position: CopyPosition,
    cx: &mut ParseContext<'_>,
) -> Vec<Field> {
    for field in replace {
        match copied.iter_mut().find(|f| f.name() == field.name()) {
            Some(slot) => *slot = field,
            None => cx.report(SchemaError::invalid(
                field.location(),
                field.name(),
                "replacement does not match any copied field",
            )),
        }
    }
    let ordered = match position {
        CopyPosition::Before => copied.into_iter().chain(own),
        CopyPosition::After => own.into_iter().chain(copied),
    };
    unique_fields(ordered, cx)
}

fn unique_fields(fields: impl IntoIterator<Item = Field>, cx: &mut ParseContext<'_>) -> Vec<Field> {
    let mut out: Vec<Field> = Vec::new();
    for field in fields {
        if out.iter().any(|f| f.name() == field.name()) {
            cx.report(SchemaError::duplicate(field.location(), "field", field.name()));
        } else {
            out.push(field);
        }
    }
    out
}

/// Own aliases plus inherited ones that still resolve and are not shadowed.
fn merge_aliases(
    own: Vec<Alias>,
    inherited: Vec<Alias>,
    fields: &[Field],
    store: &dyn FieldStore,
    cx: &mut ParseContext<'_>,
) -> Vec<Alias> {
    let mut out: Vec<Alias> = Vec::new();
    for alias in own {
        if fields.iter().any(|f| f.name() == alias.name()) {
            cx.report(SchemaError::invalid(
                alias.location(),
                alias.name(),
                "alias name clashes with a field of the same name",
            ));
        } else if out.iter().any(|a| a.name() == alias.name()) {
            cx.report(SchemaError::duplicate(alias.location(), "alias", alias.name()));
        } else {
            out.push(alias);
        }
    }
    for alias in inherited {
        let shadowed = out.iter().any(|a| a.name() == alias.name())
            || fields.iter().any(|f| f.name() == alias.name());
        if !shadowed && alias.resolve(fields, store).is_ok() {
            out.push(alias);
        }
    }
    out
}

fn interface_at(schema: &Schema, key: EntityKey) -> Option<&Interface> {
    schema.namespaces.get(key.0)?.interfaces.get(key.1)
}

fn copy_interface_fields(schema: &mut Schema, cx: &mut ParseContext<'_>) {
    let keys: Vec<EntityKey> = schema
        .namespaces
        .iter()
        .enumerate()
        .flat_map(|(ns, namespace)| (0..namespace.interfaces.len()).map(move |idx| (ns, idx)))
        .collect();
    let mut states = HashMap::new();
    for key in keys {
        prepare_interface(schema, key, &mut states, cx);
    }
}

fn prepare_interface(
    schema: &mut Schema,
    key: EntityKey,
    states: &mut HashMap<EntityKey, CopyState>,
    cx: &mut ParseContext<'_>,
) {
    if states.contains_key(&key) {
        return;
    }
    states.insert(key, CopyState::Active);
    let Some(interface) = interface_at(schema, key) else {
        return;
    };
    let Some(source) = interface.copy_fields_from.clone() else {
        states.insert(key, CopyState::Done);
        return;
    };
    let name = interface.name.clone();
    let scope = interface.namespace;
    let location = interface.location.clone();

    let copied = match find(schema, cx, &source, scope, &location, &pick_interface) {
        Ok(Some(found)) => {
            if found.schema.is_none() {
                let source_key = (found.namespace.index(), found.index);
                if states.get(&source_key) == Some(&CopyState::Active) {
                    cx.report(SchemaError::new(
                        location.clone(),
                        ErrorKind::Cycle {
                            what: "copy",
                            chain: format!("{name} -> {source}"),
                        },
                    ));
                    states.insert(key, CopyState::Done);
                    return;
                }
                prepare_interface(schema, source_key, states, cx);
            }
            schema_of(schema, cx.prior, found)
                .and_then(|s| s.namespace(found.namespace))
                .and_then(|ns| ns.interfaces.get(found.index))
                .map(|i| Copied {
                    fields: i.fields.clone(),
                    aliases: i.aliases.clone(),
                })
                .ok_or_else(|| SchemaError::already_reported(&location))
        }
        Ok(None) => find_bundle(schema, cx, &source, scope, &location).and_then(|found| {
            found.ok_or_else(|| not_found(schema, cx, "copy source", &source, scope, &location))
        }),
        Err(err) => Err(err),
    };
    let copied = match copied {
        Ok(copied) => copied,
        Err(err) => {
            cx.report(err);
            states.insert(key, CopyState::Done);
            return;
        }
    };

    let Some(interface) = schema
        .namespaces
        .get_mut(key.0)
        .and_then(|ns| ns.interfaces.get_mut(key.1))
    else {
        return;
    };
    let own = std::mem::take(&mut interface.fields);
    let own_aliases = std::mem::take(&mut interface.aliases);
    let fields = unique_fields(copied.fields.into_iter().chain(own), cx);
    let aliases = {
        let store = SchemaStore::new(cx.schema_index, schema, cx.prior);
        merge_aliases(own_aliases, copied.aliases, &fields, &store, cx)
    };
    if let Some(interface) = schema
        .namespaces
        .get_mut(key.0)
        .and_then(|ns| ns.interfaces.get_mut(key.1))
    {
        interface.fields = fields;
        interface.aliases = aliases;
    }
    states.insert(key, CopyState::Done);
}

/// Value of an `Enum.value` message id reference.
fn message_id(
    schema: &Schema,
    cx: &ParseContext<'_>,
    message: &Message,
    id_ref: &str,
) -> Result<i128, SchemaError> {
    let dangling = || SchemaError::dangling(&message.location, "message id", id_ref);
    let (path, value) = id_ref.rsplit_once('.').ok_or_else(dangling)?;
    let found = find(schema, cx, path, message.namespace, &message.location, &pick_field)?
        .ok_or_else(dangling)?;
    let store = SchemaStore::new(cx.schema_index, schema, cx.prior);
    let field = schema_of(schema, cx.prior, found)
        .and_then(|s| s.field_at(found.namespace, found.index))
        .ok_or_else(dangling)?
        .resolve_ref(&store);
    field
        .as_enum()
        .and_then(|e| e.value_of(value))
        .ok_or_else(dangling)
}

fn platforms_of(schema: &Schema, message: &Message) -> Result<Vec<String>, SchemaError> {
    let Some(filter) = &message.platform_filter else {
        return Ok(Vec::new());
    };
    let names = match filter {
        PlatformFilter::Only(names) | PlatformFilter::Except(names) => names,
    };
    if let Some(unknown) = names.iter().find(|n| !schema.platforms().contains(n)) {
        return Err(SchemaError::dangling(&message.location, "platform", unknown));
    }
    Ok(match filter {
        PlatformFilter::Only(names) => names.clone(),
        PlatformFilter::Except(names) => schema
            .platforms()
            .iter()
            .filter(|p| !names.contains(p))
            .cloned()
            .collect(),
    })
}

fn bind_messages(schema: &mut Schema, cx: &mut ParseContext<'_>) {
    let mut updates = Vec::new();
    for key in message_keys(schema) {
        let Some(message) = message_at(schema, key) else {
            continue;
        };
        let id = message
            .id_ref
            .as_deref()
            .map(|id_ref| message_id(schema, cx, message, id_ref));
        updates.push((key, id, platforms_of(schema, message)));
    }
    for (key, id, platforms) in updates {
        let id = match id {
            Some(Ok(id)) => Some(id),
            Some(Err(err)) => {
                cx.report(err);
                None
            }
            None => None,
        };
        let platforms = cx.diags.check(platforms).unwrap_or_default();
        if let Some(message) = message_at_mut(schema, key) {
            if let Some(id) = id {
                trace!(message = %message.name, id, "bound message id");
                message.id = id;
                message.id_ref = None;
            }
            message.platforms = platforms;
        }
    }
}

fn check_copy_code(schema: &Schema, cx: &mut ParseContext<'_>) {
    let mut errors = Vec::new();
    for message in schema.messages() {
        if let Some(source) = &message.copy_code_from {
            match find(schema, cx, source, message.namespace, &message.location, &pick_message) {
                Ok(Some(_)) => {}
                Ok(None) => errors.push(SchemaError::dangling(&message.location, "message", source)),
                Err(err) => errors.push(err),
            }
        }
    }
    schema.walk_fields(&mut |ns, field| {
        if let Some(source) = &field.common().copy_code_from {
            match find(schema, cx, source, ns, field.location(), &pick_field) {
                Ok(Some(_)) => {}
                Ok(None) => errors.push(SchemaError::dangling(field.location(), "field", source)),
                Err(err) => errors.push(err),
            }
        }
    });
    for err in errors {
        cx.report(err);
    }
}

fn check_message_ids(schema: &Schema, cx: &mut ParseContext<'_>) {
    let non_unique = schema.non_unique_msg_id_allowed();
    let mut seen: HashMap<(i128, Option<u32>), &str> = HashMap::new();
    for message in schema.messages() {
        if message.id_ref.is_some() {
            continue;
        }
        let key = (message.id, non_unique.then_some(message.order));
        if let Some(first) = seen.get(&key) {
            let message_text = if non_unique {
                format!("id {} with order {} is already used by '{first}'", message.id, message.order)
            } else {
                format!("id {} is already used by '{first}'", message.id)
            };
            cx.report(SchemaError::invalid(&message.location, &message.name, message_text));
        } else {
            seen.insert(key, &message.name);
        }
    }
}

struct Checker<'a, 'c> {
    schema: &'a Schema,
    store: SchemaStore<'a>,
    cx: &'a mut ParseContext<'c>,
}

impl Checker<'_, '_> {
    fn run(&mut self) {
        let schema = self.schema;
        for ns in &schema.namespaces {
            self.fields(&ns.fields, true);
            self.aliases(&ns.aliases, &ns.fields);
            for message in &ns.messages {
                self.message(message);
            }
        }
        self.interfaces();
        for frame in schema.frames() {
            self.frame(frame);
        }
    }

    fn report(&mut self, err: SchemaError) {
        self.cx.report(err);
    }

    fn fields(&mut self, fields: &[Field], namespace_level: bool) {
        for (idx, field) in fields.iter().enumerate() {
            self.field(field, &fields[..idx], namespace_level);
        }
    }

    /// Checks on one field; `before` holds the siblings declared earlier.
    fn field(&mut self, field: &Field, before: &[Field], namespace_level: bool) {
        if let Err(message) = field.common().overrides.check(field.length().is_none()) {
            self.report(SchemaError::new(
                field.location().clone(),
                ErrorKind::Override {
                    entity: field.name().to_string(),
                    message,
                },
            ));
        }
        match field.details() {
            FieldKind::Ref(reference) => {
                if reference.resolved().is_some_and(|r| r.deprecated) {
                    self.cx.warn(
                        field.location(),
                        format!("'{}' refers to deprecated field '{}'", field.name(), reference.target()),
                    );
                }
            }
            FieldKind::Bitfield(bitfield) => {
                for member in bitfield.members() {
                    self.bitfield_member(field, member);
                    self.field(member, &[], false);
                }
            }
            FieldKind::Bundle(bundle) => {
                self.fields(bundle.members(), false);
                self.aliases(bundle.aliases(), bundle.members());
            }
            FieldKind::String(string) => {
                self.prefix(field, string.length_prefix.as_ref(), "lengthPrefix", before, namespace_level);
            }
            FieldKind::Data(data) => {
                self.prefix(field, data.length_prefix.as_ref(), "lengthPrefix", before, namespace_level);
            }
            FieldKind::List(list) => {
                self.prefix(field, list.count_prefix.as_ref(), "countPrefix", before, namespace_level);
                self.prefix(field, list.length_prefix.as_ref(), "lengthPrefix", before, namespace_level);
                self.prefix(
                    field,
                    list.elem_length_prefix.as_ref(),
                    "elemLengthPrefix",
                    before,
                    namespace_level,
                );
                if list.elem_fixed_length && list.element.length().is_none() {
                    self.report(SchemaError::invalid(
                        field.location(),
                        field.name(),
                        "'elemFixedLength' requires an element with a fixed length",
                    ));
                }
                self.field(&list.element, &[], false);
            }
            FieldKind::Optional(optional) => {
                if let Some(cond) = optional.cond() {
                    self.optional_cond(field, cond, before, namespace_level);
                }
                self.field(optional.field(), before, namespace_level);
            }
            FieldKind::Variant(variant) => {
                if let VariantSelection::IndexField(name) = &variant.selection {
                    self.sibling_int(field, name, "indexField", before, namespace_level);
                }
                for member in variant.members() {
                    self.field(member, &[], false);
                }
            }
            FieldKind::Int(_) | FieldKind::Enum(_) | FieldKind::Set(_) | FieldKind::Float(_) => {}
        }
    }

    fn optional_cond(&mut self, field: &Field, cond: &OptCond, before: &[Field], namespace_level: bool) {
        if namespace_level {
            self.cx.warn(
                field.location(),
                format!("condition of '{}' is only checked where the field is used", field.name()),
            );
            return;
        }
        let store = self.store;
        if let Err(err) = cond.validate(&CondScope::new(before, &store)) {
            self.report(SchemaError::condition(
                field.location(),
                &format!("condition of '{}'", field.name()),
                err,
            ));
        }
    }

    fn bitfield_member(&mut self, bitfield: &Field, member: &Field) {
        let FieldKind::Ref(reference) = member.details() else {
            return;
        };
        let Some(resolved) = reference.resolved() else {
            return;
        };
        let bit_length_error = |message: String| {
            SchemaError::new(
                member.location().clone(),
                ErrorKind::BitLength {
                    field: bitfield.name().to_string(),
                    message,
                },
            )
        };
        if !matches!(resolved.kind, Kind::Int | Kind::Enum | Kind::Set) {
            self.report(bit_length_error(format!(
                "member '{}' refers to a {} field",
                member.name(),
                resolved.kind
            )));
            return;
        }
        let store = self.store;
        let target = member.resolve_ref(&store);
        let capacity = match target.details() {
            FieldKind::Int(int) => int.ty.value_bits(),
            FieldKind::Enum(enumeration) => enumeration.ty.value_bits(),
            _ => 64,
        };
        if let Some(bits) = member.common().bit_length {
            if bits > capacity {
                self.report(bit_length_error(format!(
                    "member '{}' is {bits} bits wide but its type holds {capacity}",
                    member.name()
                )));
            }
        }
    }

    fn prefix(
        &mut self,
        owner: &Field,
        prefix: Option<&Prefix>,
        prop: &str,
        before: &[Field],
        namespace_level: bool,
    ) {
        match prefix {
            Some(Prefix::Sibling(name)) => self.sibling_int(owner, name, prop, before, namespace_level),
            Some(Prefix::Field(field)) => self.field(field, &[], false),
            None => {}
        }
    }

    /// A `$name` property must name an earlier sibling of int kind.
    fn sibling_int(&mut self, owner: &Field, name: &str, prop: &str, before: &[Field], namespace_level: bool) {
        if namespace_level {
            self.cx.warn(
                owner.location(),
                format!(
                    "'{prop}' of '{}' names sibling '{name}', which only exists where the field is used",
                    owner.name()
                ),
            );
            return;
        }
        match before.iter().find(|f| f.name() == name) {
            Some(sibling) => {
                let kind = sibling.resolve_ref(&self.store).kind();
                if kind != Kind::Int {
                    self.report(SchemaError::invalid(
                        owner.location(),
                        owner.name(),
                        format!("'{prop}' sibling '{name}' must be an int field, found {kind}"),
                    ));
                }
            }
            None => self.report(SchemaError::dangling(owner.location(), "sibling field", name)),
        }
    }

    fn aliases(&mut self, aliases: &[Alias], fields: &[Field]) {
        let store = self.store;
        for alias in aliases {
            if let Err(err) = alias.resolve(fields, &store) {
                self.report(err);
            }
        }
    }

    fn message(&mut self, message: &Message) {
        self.fields(&message.fields, false);
        self.aliases(&message.aliases, &message.fields);

        let store = self.store;
        let scope = CondScope::new(&message.fields, &store);
        let conditions = [
            ("construct", message.construct.as_ref()),
            ("readCond", message.read_cond.as_ref()),
            ("validCond", message.valid_cond.as_ref()),
        ];
        for (prop, cond) in conditions {
            let Some(cond) = cond else {
                continue;
            };
            let mut result = cond.validate(&scope);
            if prop == "construct" {
                result = result.and_then(|()| cond.check_construct());
            }
            if let Err(err) = result {
                self.report(SchemaError::condition(
                    &message.location,
                    &format!("{prop} of '{}'", message.name),
                    err,
                ));
            }
        }
        if let (Some(cond), Some(last)) = (&message.read_cond, message.fields.last()) {
            if cond.field_paths().iter().any(|path| path.first() == last.name()) {
                self.report(SchemaError::invalid(
                    &message.location,
                    &message.name,
                    format!("readCond cannot refer to the last field '{}'", last.name()),
                ));
            }
        }

        let override_error = |message_text: String| {
            SchemaError::new(
                message.location.clone(),
                ErrorKind::Override {
                    entity: message.name.clone(),
                    message: message_text,
                },
            )
        };
        if message.overrides.read == OverrideKind::Ignore && message.read_cond.is_some() {
            self.report(override_error("readOverride 'none' conflicts with readCond".into()));
        }
        if message.overrides.valid == OverrideKind::Ignore && message.valid_cond.is_some() {
            self.report(override_error("validOverride 'none' conflicts with validCond".into()));
        }
        let min = message.min_length();
        if let Err(text) = message.overrides.check(min != message.max_length()) {
            self.report(override_error(text));
        }
        if let Some(expected) = message.validate_min_length {
            if expected != min {
                self.report(SchemaError::invalid(
                    &message.location,
                    &message.name,
                    format!("validateMinLength is {expected} but the minimal length is {min}"),
                ));
            }
        }
    }

    /// Interface fields, and the rule that a field name means the same kind
    /// and length in every interface.
    fn interfaces(&mut self) {
        let schema = self.schema;
        let mut seen: Vec<(&str, Kind, LengthInfo, &str)> = Vec::new();
        for interface in schema.interfaces() {
            self.fields(&interface.fields, false);
            self.aliases(&interface.aliases, &interface.fields);
            for field in &interface.fields {
                let kind = field.resolve_ref(&self.store).kind();
                let length = field.length_info();
                match seen.iter().find(|(name, ..)| *name == field.name()) {
                    Some((_, first_kind, first_length, owner)) => {
                        if *first_kind != kind || *first_length != length {
                            self.report(SchemaError::invalid(
                                field.location(),
                                field.name(),
                                format!(
                                    "field differs from the field of the same name in interface '{owner}'"
                                ),
                            ));
                        }
                    }
                    None => seen.push((field.name(), kind, length, interface.name())),
                }
            }
        }
    }

    fn frame(&mut self, frame: &Frame) {
        let schema = self.schema;
        let store = self.store;
        let layout_error = |location: &Location, message: String| {
            SchemaError::new(
                location.clone(),
                ErrorKind::FrameLayout {
                    frame: frame.name().to_string(),
                    message,
                },
            )
        };
        for layer in frame.layers() {
            if let LayerKind::Value {
                interface_field_name,
                ..
            } = layer.kind()
            {
                if !schema.interfaces().any(|i| i.field(interface_field_name).is_some()) {
                    self.report(layout_error(
                        layer.location(),
                        format!(
                            "value layer '{}' names unknown interface field '{interface_field_name}'",
                            layer.name()
                        ),
                    ));
                }
            }
            let Some(field) = layer.field() else {
                continue;
            };
            self.field(field, &[], false);
            let target = field.resolve_ref(&store);
            let allowed: &[Kind] = match layer.kind() {
                LayerKind::Size => &[Kind::Int],
                LayerKind::Id => &[Kind::Int, Kind::Enum],
                LayerKind::Checksum { .. } => &[Kind::Int, Kind::Data],
                _ => &[],
            };
            if !allowed.is_empty() && !allowed.contains(&target.kind()) {
                self.report(layout_error(
                    layer.location(),
                    format!(
                        "{} layer '{}' cannot use a {} field",
                        layer.kind(),
                        layer.name(),
                        target.kind()
                    ),
                ));
            }
            if matches!(layer.kind(), LayerKind::Sync) && !target.has_default_value() {
                self.report(layout_error(
                    layer.location(),
                    format!("sync layer '{}' needs a field with a default value", layer.name()),
                ));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::tests::build_one;

    #[test]
    fn refs_resolve_across_namespaces() {
        let (schema, diags) = build_one(
            r#"<schema name="demo" version="3">
                <fields>
                    <int name="Seq" type="uint16" deprecated="2"/>
                </fields>
                <namespace name="inner">
                    <fields>
                        <ref name="Alias" field="Seq"/>
                        <ref name="Twice" field="Alias"/>
                    </fields>
                </namespace>
            </schema>"#,
        );
        assert!(!diags.has_failures(), "{:?}", diags.records());
        let inner = schema.find_namespace("inner").expect("inner");
        let twice = schema.field_at(inner, 1).expect("Twice");
        let resolved = twice.as_ref_field().and_then(RefField::resolved).expect("resolved");
        assert_eq!(resolved.kind, Kind::Int);
        assert_eq!(resolved.length, LengthInfo::fixed(2));
        assert!(resolved.version_dependent);
        assert!(!resolved.deprecated);
        // Only the direct reference to the deprecated field warns.
        assert_eq!(diags.len(), 1);
        assert_eq!(twice.length(), Some(2));
    }

    #[test]
    fn ref_cycle_is_reported_once() {
        let (_, diags) = build_one(
            r#"<schema name="demo">
                <fields>
                    <ref name="A" field="B"/>
                    <ref name="B" field="A"/>
                </fields>
            </schema>"#,
        );
        assert!(diags.has_failures());
        let cycles: Vec<_> = diags
            .records()
            .iter()
            .filter(|d| d.message.contains("cycle"))
            .collect();
        assert_eq!(cycles.len(), 1, "{:?}", diags.records());
    }

    #[test]
    fn dangling_ref_to_failed_field_stays_quiet() {
        let (_, diags) = build_one(
            r#"<schema name="demo">
                <fields>
                    <int name="Broken" type="uint9"/>
                    <ref name="Use" field="Broken"/>
                    <ref name="Missing" field="Nowhere"/>
                </fields>
            </schema>"#,
        );
        assert_eq!(diags.len(), 2, "{:?}", diags.records());
        assert!(diags.records()[1].message.contains("Nowhere"));
    }

    #[test]
    fn copied_fields_respect_position_and_replace() {
        let (schema, diags) = build_one(
            r#"<schema name="demo">
                <message name="Base" id="1">
                    <int name="a" type="uint8"/>
                    <int name="b" type="uint8"/>
                    <alias name="first" field="$a"/>
                </message>
                <message name="Derived" id="2" copyFieldsFrom="Base" copyFieldsPosition="after">
                    <int name="c" type="uint16"/>
                    <replace>
                        <int name="b" type="uint32"/>
                    </replace>
                </message>
            </schema>"#,
        );
        assert!(!diags.has_failures(), "{:?}", diags.records());
        let derived = schema.root().message("Derived").expect("Derived");
        let names: Vec<&str> = derived.fields().iter().map(Field::name).collect();
        assert_eq!(names, ["c", "a", "b"]);
        assert_eq!(derived.fields()[2].length(), Some(4));
        assert_eq!(derived.aliases().len(), 1);
        assert_eq!(derived.min_length(), 7);
    }

    #[test]
    fn copy_cycle_and_duplicates() {
        let (_, diags) = build_one(
            r#"<schema name="demo">
                <message name="A" id="1" copyFieldsFrom="B"/>
                <message name="B" id="2" copyFieldsFrom="A"/>
                <message name="C" id="3" copyFieldsFrom="D">
                    <int name="x" type="uint8"/>
                </message>
                <message name="D" id="4">
                    <int name="x" type="uint8"/>
                </message>
            </schema>"#,
        );
        let messages: Vec<&str> = diags.records().iter().map(|d| d.message.as_str()).collect();
        assert!(messages.iter().any(|m| m.contains("copy cycle")), "{messages:?}");
        assert!(messages.iter().any(|m| m.contains("duplicate field 'x'")), "{messages:?}");
    }

    #[test]
    fn message_ids_from_enum_values() {
        let (schema, diags) = build_one(
            r#"<schema name="demo">
                <fields>
                    <enum name="MsgId" type="uint8">
                        <validValue name="Ping" val="7"/>
                        <validValue name="Pong" val="8"/>
                    </enum>
                </fields>
                <message name="Ping" id="MsgId.Ping"/>
                <message name="Pong" id="MsgId.Pong"/>
                <message name="Other" id="8"/>
                <message name="Lost" id="MsgId.Gone"/>
            </schema>"#,
        );
        assert_eq!(schema.root().message("Ping").expect("Ping").id(), 7);
        let messages: Vec<&str> = diags.records().iter().map(|d| d.message.as_str()).collect();
        assert_eq!(messages.len(), 2, "{messages:?}");
        assert!(messages.iter().any(|m| m.contains("already used by 'Pong'")));
        assert!(messages.iter().any(|m| m.contains("MsgId.Gone")));
    }

    #[test]
    fn platforms_are_checked() {
        let (schema, diags) = build_one(
            r#"<schema name="demo">
                <platform name="linux"/>
                <platforms>
                    <platform name="rtos"/>
                    <platform name="web"/>
                </platforms>
                <message name="A" id="1" platforms="!web"/>
                <message name="B" id="2" platforms="mars"/>
            </schema>"#,
        );
        let a = schema.root().message("A").expect("A");
        assert_eq!(a.platforms(), ["linux".to_string(), "rtos".to_string()]);
        assert_eq!(diags.len(), 1);
        assert!(diags.records()[0].message.contains("mars"));
    }

    #[test]
    fn detached_prefix_must_be_earlier_int() {
        let (_, diags) = build_one(
            r#"<schema name="demo">
                <message name="A" id="1">
                    <string name="s" lengthPrefix="$len"/>
                    <int name="len" type="uint8"/>
                </message>
                <message name="B" id="2">
                    <float name="len" type="float"/>
                    <data name="d" lengthPrefix="$len"/>
                </message>
                <message name="C" id="3">
                    <int name="len" type="uint8"/>
                    <list name="l" countPrefix="$len">
                        <element><int type="uint8"/></element>
                    </list>
                </message>
            </schema>"#,
        );
        assert_eq!(diags.len(), 2, "{:?}", diags.records());
    }

    #[test]
    fn message_condition_checks() {
        let (_, diags) = build_one(
            r#"<schema name="demo">
                <message name="A" id="1" construct="$kind != 1" readCond="$tail = 0" readOverride="none">
                    <int name="kind" type="uint8"/>
                    <int name="tail" type="uint8"/>
                </message>
            </schema>"#,
        );
        let messages: Vec<&str> = diags.records().iter().map(|d| d.message.as_str()).collect();
        assert_eq!(messages.len(), 3, "{messages:?}");
        assert!(messages.iter().any(|m| m.starts_with("construct of 'A'")));
        assert!(messages.iter().any(|m| m.contains("last field 'tail'")));
        assert!(messages.iter().any(|m| m.contains("readOverride")));
    }

    #[test]
    fn frame_layer_fields_are_typed() {
        let (_, diags) = build_one(
            r#"<schema name="demo">
                <interface name="Common">
                    <int name="version" type="uint8"/>
                </interface>
                <frame name="Frame">
                    <sync name="Sync"><int name="s" type="uint16"/></sync>
                    <size name="Size"><string name="n" length="2"/></size>
                    <value name="Ver" interfaceFieldName="flags"><int name="v" type="uint8"/></value>
                    <payload name="Data"/>
                </frame>
            </schema>"#,
        );
        let messages: Vec<&str> = diags.records().iter().map(|d| d.message.as_str()).collect();
        assert_eq!(messages.len(), 3, "{messages:?}");
        assert!(messages.iter().all(|m| m.starts_with("frame 'Frame'")));
    }

    #[test]
    fn interfaces_agree_on_shared_names() {
        let (schema, diags) = build_one(
            r#"<schema name="demo">
                <interface name="A">
                    <int name="version" type="uint8"/>
                </interface>
                <interface name="B" copyFieldsFrom="A">
                    <int name="flags" type="uint16"/>
                </interface>
                <interface name="C">
                    <int name="version" type="uint16"/>
                </interface>
            </schema>"#,
        );
        let b = schema.root().interface("B").expect("B");
        assert_eq!(b.fields().len(), 2);
        assert_eq!(diags.len(), 1, "{:?}", diags.records());
    }
}
