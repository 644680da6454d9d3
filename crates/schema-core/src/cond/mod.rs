//! Presence and validity conditions over sibling fields.
//!
//! A condition is either a single comparison or bit test, or an explicit
//! `<and>`/`<or>` list of conditions. Field references are kept as paths and
//! are only checked against the sibling fields they are evaluated with.

pub mod canonical;
mod expr;

use std::fmt;

use schema_xml::{Location, XmlNode};
use thiserror::Error;
use tracing::trace;

use crate::error::{ErrorKind, SchemaError};
use crate::field::{Field, FieldKind, FieldStore, Kind, SetBit};
use crate::props::Props;

pub use expr::parse_expr;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CondError {
    #[error("invalid condition '{expr}': {message}")]
    Syntax { expr: String, message: String },
    #[error("condition '{0}' joins expressions with '&&' or '||'; use <and>/<or> elements")]
    InlineCombinator(String),
    #[error("<or> is mixed with sibling conditions at one level; nest them in an explicit <and> or <or>")]
    MixedCombinators,
    #[error("<{0}> must contain at least one condition")]
    EmptyList(&'static str),
    #[error("'{path}' does not name an accessible field (failed at '{segment}')")]
    UnknownField { path: String, segment: String },
    #[error("'{path}': {message}")]
    Incompatible { path: String, message: String },
    #[error("'{value}' is not a known value of '{path}'")]
    UnknownValue { path: String, value: String },
    #[error("no value supplied for '{0}'")]
    Unbound(String),
    #[error("{0}")]
    Restricted(String),
}

/// Dotted access path to a field, written `$a.b.c` in conditions.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FieldPath(Vec<String>);

impl FieldPath {
    pub fn new(segments: Vec<String>) -> Self {
        Self(segments)
    }

    pub fn segments(&self) -> &[String] {
        &self.0
    }

    pub fn first(&self) -> &str {
        self.0.first().map_or("", String::as_str)
    }

    fn parent(&self) -> FieldPath {
        FieldPath(self.0[..self.0.len().saturating_sub(1)].to_vec())
    }
}

impl fmt::Display for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0.join("."))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl CmpOp {
    /// Operator to use once both operands swap sides.
    pub fn flipped(self) -> Self {
        match self {
            CmpOp::Lt => CmpOp::Gt,
            CmpOp::Le => CmpOp::Ge,
            CmpOp::Gt => CmpOp::Lt,
            CmpOp::Ge => CmpOp::Le,
            other => other,
        }
    }

    pub fn symbol(self) -> &'static str {
        match self {
            CmpOp::Eq => "==",
            CmpOp::Ne => "!=",
            CmpOp::Lt => "<",
            CmpOp::Le => "<=",
            CmpOp::Gt => ">",
            CmpOp::Ge => ">=",
        }
    }

    fn apply<T: PartialOrd>(self, lhs: T, rhs: T) -> bool {
        match self {
            CmpOp::Eq => lhs == rhs,
            CmpOp::Ne => lhs != rhs,
            CmpOp::Lt => lhs < rhs,
            CmpOp::Le => lhs <= rhs,
            CmpOp::Gt => lhs > rhs,
            CmpOp::Ge => lhs >= rhs,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Literal {
    Number(i128),
    /// Enum value or special value name.
    Name(String),
    Str(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operand {
    Field(FieldPath),
    Literal(Literal),
}

/// Leaf condition. The field operand of a comparison is always on the left.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CondExpr {
    Compare {
        left: FieldPath,
        op: CmpOp,
        right: Operand,
    },
    BitTest {
        path: FieldPath,
        negated: bool,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Combinator {
    And,
    Or,
}

impl Combinator {
    fn symbol(self) -> &'static str {
        match self {
            Combinator::And => "&&",
            Combinator::Or => "||",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CondList {
    pub combinator: Combinator,
    pub children: Vec<OptCond>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OptCond {
    Expr(CondExpr),
    List(CondList),
}

/// Fields a condition may refer to, plus the store used to follow refs.
#[derive(Clone, Copy)]
pub struct CondScope<'a> {
    siblings: &'a [Field],
    store: &'a dyn FieldStore,
}

enum Target<'a> {
    Value(&'a Field),
    Bit(&'a SetBit),
}

impl<'a> CondScope<'a> {
    pub fn new(siblings: &'a [Field], store: &'a dyn FieldStore) -> Self {
        Self { siblings, store }
    }

    fn resolve(&self, path: &FieldPath) -> Result<Target<'a>, CondError> {
        let unknown = |segment: &str| CondError::UnknownField {
            path: path.to_string(),
            segment: segment.to_string(),
        };
        let mut segments = path.segments().iter();
        let first = segments.next().ok_or_else(|| unknown(""))?;
        let mut current = self
            .siblings
            .iter()
            .find(|field| field.name() == first)
            .ok_or_else(|| unknown(first))?;
        while let Some(segment) = segments.next() {
            current = self.unwrap(current);
            let next = match current.details() {
                FieldKind::Bundle(bundle) => bundle.members().iter().find(|m| m.name() == segment),
                FieldKind::Bitfield(bits) => bits.members().iter().find(|m| m.name() == segment),
                FieldKind::Set(set) => {
                    let bit = set.bit(segment).ok_or_else(|| unknown(segment))?;
                    if segments.next().is_some() {
                        return Err(CondError::Incompatible {
                            path: path.to_string(),
                            message: format!("'{segment}' is a bit and has no members"),
                        });
                    }
                    return Ok(Target::Bit(bit));
                }
                _ => None,
            };
            current = next.ok_or_else(|| unknown(segment))?;
        }
        Ok(Target::Value(self.unwrap(current)))
    }

    /// Look through refs and optional wrappers to the field holding the value.
    fn unwrap(&self, mut field: &'a Field) -> &'a Field {
        loop {
            let resolved = field.resolve_ref(self.store);
            match resolved.details() {
                FieldKind::Optional(opt) => field = opt.field(),
                _ => return resolved,
            }
        }
    }
}

impl OptCond {
    pub fn from_expr(text: &str) -> Result<Self, CondError> {
        parse_expr(text).map(OptCond::Expr)
    }

    /// Every field path the condition reads, in declaration order.
    pub fn field_paths(&self) -> Vec<&FieldPath> {
        let mut out = Vec::new();
        self.collect_paths(&mut out);
        out
    }

    fn collect_paths<'s>(&'s self, out: &mut Vec<&'s FieldPath>) {
        match self {
            OptCond::Expr(CondExpr::Compare { left, right, .. }) => {
                out.push(left);
                if let Operand::Field(path) = right {
                    out.push(path);
                }
            }
            OptCond::Expr(CondExpr::BitTest { path, .. }) => out.push(path),
            OptCond::List(list) => list.children.iter().for_each(|c| c.collect_paths(out)),
        }
    }

    /// Check every reference resolves to a field of a comparable kind.
    pub fn validate(&self, scope: &CondScope<'_>) -> Result<(), CondError> {
        match self {
            OptCond::List(list) => list.children.iter().try_for_each(|c| c.validate(scope)),
            OptCond::Expr(CondExpr::BitTest { path, .. }) => bit_of(scope, path).map(|_| ()),
            OptCond::Expr(CondExpr::Compare { left, right, .. }) => {
                let field = value_of(scope, left)?;
                match right {
                    Operand::Literal(Literal::Str(_)) => expect_kind(left, field, &[Kind::String]),
                    Operand::Literal(literal) => literal_value(left, field, literal).map(|_| ()),
                    Operand::Field(other) => {
                        let other_field = value_of(scope, other)?;
                        if field.kind() == Kind::String {
                            expect_kind(other, other_field, &[Kind::String])
                        } else {
                            expect_kind(left, field, NUMERIC)?;
                            expect_kind(other, other_field, NUMERIC)
                        }
                    }
                }
            }
        }
    }

    /// `construct` conditions may only use equality and bit tests joined by AND.
    pub fn check_construct(&self) -> Result<(), CondError> {
        match self {
            OptCond::Expr(CondExpr::BitTest { .. }) => Ok(()),
            OptCond::Expr(CondExpr::Compare {
                op: CmpOp::Eq,
                right: Operand::Literal(_),
                ..
            }) => Ok(()),
            OptCond::Expr(CondExpr::Compare { left, .. }) => Err(CondError::Restricted(format!(
                "construct condition on '{left}' must compare with '=' against a constant"
            ))),
            OptCond::List(list) if list.combinator == Combinator::Or => Err(
                CondError::Restricted("construct conditions cannot use <or>".into()),
            ),
            OptCond::List(list) => list.children.iter().try_for_each(OptCond::check_construct),
        }
    }

    /// Render as a C-like boolean expression over field access paths.
    ///
    /// Enum value and special names are replaced by their numeric values.
    pub fn to_canonical_string(&self, scope: &CondScope<'_>) -> Result<String, CondError> {
        match self {
            OptCond::Expr(CondExpr::BitTest { path, negated }) => {
                let bit = bit_of(scope, path)?;
                let mask: u128 = 1u128 << bit.idx;
                let cmp = if *negated { "==" } else { "!=" };
                Ok(format!("(({} & 0x{mask:X}) {cmp} 0)", path.parent()))
            }
            OptCond::Expr(CondExpr::Compare { left, op, right }) => {
                let field = value_of(scope, left)?;
                let rhs = match right {
                    Operand::Field(path) => {
                        value_of(scope, path)?;
                        path.to_string()
                    }
                    Operand::Literal(Literal::Str(text)) => {
                        expect_kind(left, field, &[Kind::String])?;
                        format!("\"{text}\"")
                    }
                    Operand::Literal(literal) => literal_value(left, field, literal)?.to_string(),
                };
                Ok(format!("{left} {} {rhs}", op.symbol()))
            }
            OptCond::List(list) => {
                let parts = list
                    .children
                    .iter()
                    .map(|child| {
                        let text = child.to_canonical_string(scope)?;
                        Ok(match child {
                            OptCond::Expr(CondExpr::BitTest { .. }) => text,
                            _ => format!("({text})"),
                        })
                    })
                    .collect::<Result<Vec<_>, CondError>>()?;
                Ok(parts.join(&format!(" {} ", list.combinator.symbol())))
            }
        }
    }

    /// Evaluate directly against concrete field values keyed by access path.
    ///
    /// Bit tests read the value of the set field that owns the bit.
    pub fn evaluate(
        &self,
        scope: &CondScope<'_>,
        values: &mut dyn FnMut(&str) -> Option<i128>,
    ) -> Result<bool, CondError> {
        match self {
            OptCond::Expr(CondExpr::BitTest { path, negated }) => {
                let bit = bit_of(scope, path)?;
                let set = read(values, &path.parent())?;
                let is_set = (set >> bit.idx) & 1 == 1;
                Ok(is_set != *negated)
            }
            OptCond::Expr(CondExpr::Compare { left, op, right }) => {
                let field = value_of(scope, left)?;
                let rhs = match right {
                    Operand::Field(path) => {
                        value_of(scope, path)?;
                        read(values, path)?
                    }
                    Operand::Literal(Literal::Str(_)) => {
                        return Err(CondError::Incompatible {
                            path: left.to_string(),
                            message: "string comparisons are not evaluated".into(),
                        })
                    }
                    Operand::Literal(literal) => literal_value(left, field, literal)?,
                };
                let lhs = read(values, left)?;
                Ok(op.apply(lhs, rhs))
            }
            OptCond::List(list) => {
                for child in &list.children {
                    let value = child.evaluate(scope, values)?;
                    match (list.combinator, value) {
                        (Combinator::And, false) => return Ok(false),
                        (Combinator::Or, true) => return Ok(true),
                        _ => {}
                    }
                }
                Ok(list.combinator == Combinator::And)
            }
        }
    }
}

impl fmt::Display for OptCond {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OptCond::Expr(CondExpr::BitTest { path, negated }) => {
                write!(f, "{}${path}", if *negated { "!" } else { "" })
            }
            OptCond::Expr(CondExpr::Compare { left, op, right }) => {
                write!(f, "${left} {} ", op.symbol())?;
                match right {
                    Operand::Field(path) => write!(f, "${path}"),
                    Operand::Literal(Literal::Number(value)) => write!(f, "{value}"),
                    Operand::Literal(Literal::Name(name)) => f.write_str(name),
                    Operand::Literal(Literal::Str(text)) => write!(f, "'{text}'"),
                }
            }
            OptCond::List(list) => {
                let word = match list.combinator {
                    Combinator::And => " and ",
                    Combinator::Or => " or ",
                };
                for (idx, child) in list.children.iter().enumerate() {
                    if idx > 0 {
                        f.write_str(word)?;
                    }
                    write!(f, "({child})")?;
                }
                Ok(())
            }
        }
    }
}

fn read(values: &mut dyn FnMut(&str) -> Option<i128>, path: &FieldPath) -> Result<i128, CondError> {
    let key = path.to_string();
    values(&key).ok_or(CondError::Unbound(key))
}

const NUMERIC: &[Kind] = &[Kind::Int, Kind::Enum];

fn value_of<'a>(scope: &CondScope<'a>, path: &FieldPath) -> Result<&'a Field, CondError> {
    match scope.resolve(path)? {
        Target::Value(field) => Ok(field),
        Target::Bit(_) => Err(CondError::Incompatible {
            path: path.to_string(),
            message: "bits are tested with a bare reference, not compared".into(),
        }),
    }
}

fn bit_of<'a>(scope: &CondScope<'a>, path: &FieldPath) -> Result<&'a SetBit, CondError> {
    match scope.resolve(path)? {
        Target::Bit(bit) => Ok(bit),
        Target::Value(_) => Err(CondError::Incompatible {
            path: path.to_string(),
            message: "a bare reference must name a bit of a set field".into(),
        }),
    }
}

fn expect_kind(path: &FieldPath, field: &Field, allowed: &[Kind]) -> Result<(), CondError> {
    if allowed.contains(&field.kind()) {
        return Ok(());
    }
    Err(CondError::Incompatible {
        path: path.to_string(),
        message: format!("{} fields cannot be used in this comparison", field.kind()),
    })
}

fn literal_value(path: &FieldPath, field: &Field, literal: &Literal) -> Result<i128, CondError> {
    expect_kind(path, field, NUMERIC)?;
    match literal {
        Literal::Number(value) => Ok(*value),
        Literal::Name(name) => {
            let value = match field.details() {
                FieldKind::Enum(field) => field.value_of(name),
                FieldKind::Int(field) => field.special(name),
                _ => None,
            };
            value.ok_or_else(|| CondError::UnknownValue {
                path: path.to_string(),
                value: name.clone(),
            })
        }
        Literal::Str(text) => Err(CondError::Incompatible {
            path: path.to_string(),
            message: format!("cannot compare with string '{text}'"),
        }),
    }
}

/// Parse a condition given as text: a single expression.
pub(crate) fn parse_cond_text(
    text: &str,
    location: &Location,
    context: &str,
) -> Result<OptCond, SchemaError> {
    trace!(context, expr = text, "parsing condition");
    OptCond::from_expr(text).map_err(|err| SchemaError::condition(location, context, err))
}

/// Parse `<cond>`, `<and>` and `<or>` elements forming one condition.
///
/// Several top-level elements form an implicit AND, which cannot absorb an
/// `<or>` sibling.
pub(crate) fn parse_cond_elements(
    nodes: &[&XmlNode],
    location: &Location,
    context: &str,
    strict: bool,
) -> Result<OptCond, SchemaError> {
    match nodes {
        [] => Err(SchemaError::condition(location, context, CondError::EmptyList("and"))),
        [single] => parse_cond_node(single, context, strict),
        many => {
            if let Some(or) = many.iter().find(|node| node.name() == "or") {
                return Err(SchemaError::condition(
                    or.location(),
                    context,
                    CondError::MixedCombinators,
                ));
            }
            let children = many
                .iter()
                .map(|node| parse_cond_node(node, context, strict))
                .collect::<Result<Vec<_>, _>>()?;
            Ok(OptCond::List(CondList {
                combinator: Combinator::And,
                children,
            }))
        }
    }
}

pub(crate) fn is_cond_element(name: &str) -> bool {
    matches!(name, "cond" | "and" | "or")
}

fn parse_cond_node(node: &XmlNode, context: &str, strict: bool) -> Result<OptCond, SchemaError> {
    let (combinator, tag) = match node.name() {
        "cond" => {
            let props = Props::new(node, &[&["value", "description"]], strict)?;
            if let Some(unexpected) = props.elements().first() {
                return Err(unexpected_element(unexpected, node));
            }
            let text = match props.get("value")? {
                Some(value) => value,
                None if !node.text().is_empty() => node.text(),
                None => return Err(SchemaError::missing(node.location(), "cond", "value")),
            };
            return parse_cond_text(text, node.location(), context);
        }
        "and" => (Combinator::And, "and"),
        "or" => (Combinator::Or, "or"),
        _ => return Err(SchemaError::invalid(node.location(), context, format!("<{}> is not a condition", node.name()))),
    };
    Props::new(node, &[&["description"]], strict)?;
    let mut children = Vec::new();
    for child in node.children() {
        if child.name() == "description" {
            continue;
        }
        if !is_cond_element(child.name()) {
            return Err(unexpected_element(child, node));
        }
        children.push(parse_cond_node(child, context, strict)?);
    }
    if children.is_empty() {
        return Err(SchemaError::condition(node.location(), context, CondError::EmptyList(tag)));
    }
    Ok(OptCond::List(CondList {
        combinator,
        children,
    }))
}

fn unexpected_element(child: &XmlNode, parent: &XmlNode) -> SchemaError {
    SchemaError::new(
        child.location().clone(),
        ErrorKind::UnexpectedElement {
            element: child.name().to_string(),
            parent: parent.name().to_string(),
        },
    )
}
