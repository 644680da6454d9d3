//! Semantic model of binary protocol schemas.
//!
//! [`compile`] turns parsed schema documents into a [`Protocol`]: a tree of
//! schemas and namespaces holding typed fields, messages, interfaces, frames
//! and aliases with every cross reference resolved. Problems are collected
//! as [`Diagnostics`] instead of stopping at the first error, so a single
//! run reports everything that is wrong with the input.
//!
//! ```
//! use schema_core::{compile, CompileOptions, SchemaDocument};
//!
//! let doc = SchemaDocument::parse(
//!     "demo.xml",
//!     r#"<schema name="demo">
//!         <fields><int name="Seq" type="uint16"/></fields>
//!         <message name="Ping" id="1">
//!             <ref name="seq" field="Seq"/>
//!         </message>
//!     </schema>"#,
//! )
//! .expect("well-formed xml");
//! let out = compile(&[doc], &CompileOptions::default());
//! assert!(out.success);
//! let protocol = out.model.expect("model");
//! let ping = protocol.main_schema().and_then(|s| s.messages().next()).expect("Ping");
//! assert_eq!(ping.fields()[0].length(), Some(2));
//! ```

mod alias;
mod common;
pub mod cond;
mod context;
mod diagnostics;
mod error;
mod field;
mod frame;
mod interface;
mod message;
mod namespace;
mod props;
mod protocol;
mod resolve;
mod schema;

pub use alias::Alias;
pub use common::{Endian, OverrideKind, Overrides, SemanticType, VersionRange};
pub use cond::{CondError, CondScope, OptCond};
pub use diagnostics::{Diagnostic, Diagnostics, Severity};
pub use error::{ErrorKind, SchemaError};
pub use field::{
    BitfieldField, BundleField, DataField, EnumField, EnumValue, Field, FieldCommon, FieldHandle,
    FieldKind, FieldStore, FloatField, FloatSpecial, FloatType, IntField, IntType, Kind, LengthInfo,
    ListField, OptionalField, OptionalMode, Prefix, RefField, ResolvedRef, SetBit, SetField, Special,
    StringField, VariantField, VariantSelection,
};
pub use frame::{ChecksumAlg, ChecksumBound, Frame, Layer, LayerKind};
pub use interface::Interface;
pub use message::{CopyFields, CopyPosition, Message, Sender};
pub use namespace::{Namespace, NamespaceId};
pub use props::is_identifier;
pub use protocol::{compile, Compilation, CompileOptions, Entity, Protocol, SchemaDocument};
pub use schema::{Phase, Schema};
