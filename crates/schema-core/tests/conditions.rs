use std::collections::BTreeSet;

use schema_core::cond::canonical;
use schema_core::{compile, CompileOptions, CondScope, Entity, FieldKind, SchemaDocument};

const MODES: &str = r#"<schema name="demo">
    <message name="Status" id="1">
        <enum name="mode" type="uint8">
            <validValue name="Off" val="0"/>
            <validValue name="On" val="1"/>
            <validValue name="Auto" val="7"/>
        </enum>
        <set name="flags" length="1">
            <bit name="ack" idx="0"/>
            <bit name="more" idx="3"/>
        </set>
        <optional name="extra" cond="$mode = 1">
            <int name="extra" type="uint16"/>
        </optional>
        <optional name="tail" defaultMode="missing">
            <and>
                <cond value="$mode != Off"/>
                <or>
                    <cond value="$flags.more"/>
                    <cond value="$mode = Auto"/>
                </or>
            </and>
            <int name="tail" type="uint32"/>
        </optional>
    </message>
</schema>"#;

fn check_equivalence(field: &str, values: &[(&str, i128)], expected: Option<bool>) {
    let doc = SchemaDocument::parse("modes.xml", MODES).expect("parse xml");
    let result = compile(&[doc], &CompileOptions::default());
    assert!(result.success, "{:?}", result.diagnostics);
    let model = result.model.expect("model");
    let Some(Entity::Message(status)) = model.find("Status") else {
        panic!("Status not found");
    };
    let FieldKind::Optional(optional) = status.field(field).expect("field").details() else {
        panic!("optional expected");
    };
    let cond = optional.cond().expect("condition");
    let scope = CondScope::new(status.fields(), &model);
    let text = cond.to_canonical_string(&scope).expect("canonical");
    let ast = canonical::parse_expression(&text).expect("canonical parses");
    let mut names = BTreeSet::new();
    canonical::collect_identifiers(&ast, &mut names);
    let expected_names: BTreeSet<String> = cond
        .field_paths()
        .into_iter()
        .map(|path| {
            let segments = path.segments();
            match status.field(path.first()).map(|f| f.details()) {
                Some(FieldKind::Set(_)) => segments[..segments.len() - 1].join("."),
                _ => segments.join("."),
            }
        })
        .collect();
    assert_eq!(names, expected_names, "{text}");

    let lookup = |name: &str| values.iter().find(|(n, _)| *n == name).map(|(_, v)| *v);
    let direct = cond.evaluate(&scope, &mut |name| lookup(name)).expect("evaluate");
    let mut vars = |name: &str| {
        lookup(name).ok_or_else(|| canonical::EvalError::UnknownVariable(name.to_string()))
    };
    let rendered = canonical::evaluate(&ast, &mut vars).expect("evaluate canonical");
    assert_eq!(direct, rendered != 0, "{text} with {values:?}");
    if let Some(expected) = expected {
        assert_eq!(direct, expected, "{text} with {values:?}");
    }
}

#[test]
fn enum_equality_canonical_form() {
    let doc = SchemaDocument::parse("modes.xml", MODES).expect("parse xml");
    let model = compile(&[doc], &CompileOptions::default())
        .model
        .expect("model");
    let Some(Entity::Message(status)) = model.find("Status") else {
        panic!("Status not found");
    };
    let scope = CondScope::new(status.fields(), &model);
    let canonical_of = |name: &str| {
        let FieldKind::Optional(optional) = status.field(name).expect("field").details() else {
            panic!("optional expected");
        };
        optional
            .cond()
            .expect("condition")
            .to_canonical_string(&scope)
            .expect("canonical")
    };
    assert_eq!(canonical_of("extra"), "mode == 1");
    assert_eq!(
        canonical_of("tail"),
        "(mode != 0) && (((flags & 0x8) != 0) || (mode == 7))"
    );
}

#[test]
fn enum_equality_holds_for_random_values() {
    let mut rng = fastrand::Rng::with_seed(0x5eed);
    for mode in [0, 1, 7] {
        check_equivalence("extra", &[("mode", mode)], Some(mode == 1));
    }
    for _ in 0..200 {
        let mode = rng.i128(-4..=260);
        check_equivalence("extra", &[("mode", mode)], Some(mode == 1));
    }
}

#[test]
fn nested_lists_agree_with_canonical_form() {
    let mut rng = fastrand::Rng::with_seed(42);
    for _ in 0..200 {
        let mode = rng.i128(0..=8);
        let flags = rng.i128(0..=255);
        let expected = mode != 0 && ((flags & 0x8) != 0 || mode == 7);
        check_equivalence("tail", &[("mode", mode), ("flags", flags)], Some(expected));
    }
}
