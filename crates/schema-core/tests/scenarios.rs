use schema_core::{
    compile, Compilation, CompileOptions, Entity, FieldKind, Kind, LayerKind, SchemaDocument,
    Severity,
};

fn compile_one(xml: &str) -> Compilation {
    let doc = SchemaDocument::parse("test.xml", xml).expect("parse xml");
    compile(&[doc], &CompileOptions::default())
}

fn errors(result: &Compilation) -> Vec<String> {
    result
        .diagnostics
        .iter()
        .filter(|d| d.severity != Severity::Warning)
        .map(|d| d.message.clone())
        .collect()
}

const FLAGS: &str = r#"<schema name="demo">
    <namespace name="ns">
        <fields>
            <int name="version" type="uint8" sinceVersion="0"/>
            <bitfield name="flags" bitLength="3">
                <set name="a" bitLength="1"><bit name="on" idx="0"/></set>
                <set name="b" bitLength="1"><bit name="on" idx="0"/></set>
            </bitfield>
        </fields>
    </namespace>
</schema>"#;

#[test]
fn bitfield_sum_mismatch_is_one_error() {
    let result = compile_one(FLAGS);
    assert!(!result.success);
    assert!(result.model.is_none());
    let errors = errors(&result);
    assert_eq!(errors.len(), 1, "{errors:?}");
    assert!(errors[0].contains("flags"), "{}", errors[0]);
    assert_eq!(result.diagnostics[0].location.line, 5);
}

#[test]
fn huge_member_widths_are_reported() {
    let result = compile_one(
        r#"<schema name="demo">
    <fields>
        <int name="X" type="uint8"/>
        <bitfield name="B">
            <ref name="a" field="X" bitLength="4294967295"/>
            <ref name="b" field="X" bitLength="4294967295"/>
        </bitfield>
    </fields>
</schema>"#,
    );
    assert!(!result.success);
    let errors = errors(&result);
    assert!(!errors.is_empty());
    assert!(errors.iter().all(|e| e.contains("bitLength")), "{errors:?}");
}

const PING_PONG: &str = r#"<schema name="demo">
    <message name="Ping" id="1" copyFieldsFrom="Pong"/>
    <message name="Pong" id="2">
        <int name="seq" type="uint16"/>
        <int name="ts" type="uint32"/>
    </message>
</schema>"#;

#[test]
fn copied_fields_are_clones() {
    let result = compile_one(PING_PONG);
    assert!(result.success, "{:?}", result.diagnostics);
    let model = result.model.expect("model");
    let Some(Entity::Message(ping)) = model.find("Ping") else {
        panic!("Ping not found");
    };
    let Some(Entity::Message(pong)) = model.find("Pong") else {
        panic!("Pong not found");
    };
    let names: Vec<&str> = ping.fields().iter().map(|f| f.name()).collect();
    assert_eq!(names, ["seq", "ts"]);
    for (copy, source) in ping.fields().iter().zip(pong.fields()) {
        assert!(!std::ptr::eq(copy, source));
        assert_eq!(copy.length(), source.length());
    }
    assert_eq!(ping.min_length(), 6);
    assert_eq!(ping.copy_fields().map(|c| c.source.as_str()), Some("Pong"));
}

const TOUR: &str = r#"<schema name="tour" version="2" endian="little">
    <platform name="linux"/>
    <fields>
        <int name="Len" type="uint16"/>
        <int name="OldId" type="uint8" deprecated="2"/>
        <enum name="MsgId" type="uint8">
            <validValue name="Hello" val="1"/>
            <validValue name="Bye" val="2"/>
        </enum>
    </fields>
    <message name="Hello" id="MsgId.Hello" platforms="linux">
        <bundle name="hdr">
            <int name="ver" type="uint8"/>
            <ref name="len" field="Len"/>
        </bundle>
        <ref name="legacy" field="OldId"/>
        <alias name="version" field="$hdr.ver"/>
    </message>
    <message name="Bye" id="MsgId.Bye"/>
    <interface name="Common">
        <int name="flags" type="uint32"/>
    </interface>
    <frame name="Frame">
        <sync name="sync"><int name="sync" type="uint16" defaultValue="0xabcd"/></sync>
        <size name="size" field="Len"/>
        <id name="id" field="MsgId"/>
        <value name="flags" interfaceFieldName="flags"><int name="flags" type="uint32"/></value>
        <payload name="data"/>
        <checksum name="crc" alg="crc-16" from="size"><int name="crc" type="uint16"/></checksum>
    </frame>
</schema>"#;

#[test]
fn linked_model_is_queryable() {
    let result = compile_one(TOUR);
    assert!(result.success, "{:?}", result.diagnostics);
    // The reference to OldId warns but does not fail.
    assert_eq!(result.diagnostics.len(), 1, "{:?}", result.diagnostics);
    assert!(result.diagnostics[0].message.contains("OldId"));
    let model = result.model.expect("model");

    let Some(Entity::Message(hello)) = model.find("Hello") else {
        panic!("Hello not found");
    };
    assert_eq!(hello.id(), 1);
    assert_eq!(hello.platforms(), ["linux"]);
    assert_eq!(hello.min_length(), 4);
    let alias = &hello.aliases()[0];
    let target = alias.resolve(hello.fields(), &model).expect("alias resolves");
    let hdr = hello.field("hdr").and_then(|f| f.as_bundle()).expect("hdr");
    assert!(std::ptr::eq(target, &hdr.members()[0]));

    let Some(Entity::Message(bye)) = model.find("@tour.Bye") else {
        panic!("Bye not found");
    };
    assert_eq!(bye.id(), 2);

    let Some(Entity::Frame(frame)) = model.find("Frame") else {
        panic!("Frame not found");
    };
    let kinds: Vec<&str> = frame.layers().iter().map(|l| l.kind().element()).collect();
    assert_eq!(kinds, ["sync", "size", "id", "value", "payload", "checksum"]);
    let size = frame.layer("size").and_then(|l| l.field()).expect("size field");
    assert_eq!(model.resolve_ref(size).kind(), Kind::Int);
    assert_eq!(size.length(), Some(2));
    assert_eq!(frame.layer("crc").and_then(|l| l.covers()), Some((1, 4)));
    assert!(matches!(
        frame.layer("flags").map(|l| l.kind()),
        Some(LayerKind::Value { interface_field_name, .. }) if interface_field_name == "flags"
    ));
}

#[test]
fn frames_need_exactly_one_payload() {
    let frame = |layers: &str| {
        format!(
            r#"<schema name="f"><frame name="F"><size name="len"><int name="len" type="uint16"/></size>{layers}</frame></schema>"#
        )
    };
    let result = compile_one(&frame(r#"<payload name="data"/>"#));
    assert!(result.success, "{:?}", result.diagnostics);

    for (layers, found) in [
        ("", 0),
        (r#"<payload name="a"/><payload name="b"/>"#, 2),
    ] {
        let result = compile_one(&frame(layers));
        assert!(!result.success);
        let errors = errors(&result);
        assert_eq!(errors.len(), 1, "{errors:?}");
        assert_eq!(
            errors[0],
            format!("frame 'F': expected exactly one payload layer, found {found}")
        );
    }
}

#[test]
fn independent_problems_are_all_reported() {
    let result = compile_one(
        r#"<schema name="demo">
            <fields>
                <ref name="A" field="Missing"/>
                <int name="B" type="uint8" defaultValue="300"/>
                <enum name="C" type="uint8">
                    <validValue name="X" val="1"/>
                    <validValue name="X" val="2"/>
                </enum>
                <int name="D" type="uint8"/>
            </fields>
            <message name="M" id="1"><ref name="d" field="D"/></message>
            <message name="N" id="1"><ref name="d" field="D"/></message>
        </schema>"#,
    );
    assert!(!result.success);
    let errors = errors(&result);
    assert_eq!(errors.len(), 4, "{errors:?}");
    assert!(errors.iter().any(|e| e.contains("Missing")));
    assert!(errors.iter().any(|e| e.contains("id 1")));
    let lines: Vec<u32> = result.diagnostics.iter().map(|d| d.location.line).collect();
    let mut sorted = lines.clone();
    sorted.sort_unstable();
    assert_eq!(lines, sorted);
}

#[test]
fn repeated_runs_are_identical() {
    for xml in [TOUR, FLAGS, PING_PONG] {
        let first = compile_one(xml);
        let second = compile_one(xml);
        assert_eq!(first.success, second.success);
        assert_eq!(first.diagnostics, second.diagnostics);
        assert_eq!(format!("{:?}", first.model), format!("{:?}", second.model));
    }
}

#[test]
fn schema_order_option_orders_processing() {
    let base = SchemaDocument::parse(
        "base.xml",
        r#"<schema name="base"><fields><int name="Seq" type="uint32"/></fields></schema>"#,
    )
    .expect("base");
    let app = SchemaDocument::parse(
        "app.xml",
        r#"<schema name="app"><message name="M" id="1"><ref name="seq" field="@base.Seq"/></message></schema>"#,
    )
    .expect("app");
    let documents = [app, base];

    let unordered = compile(&documents, &CompileOptions::default());
    assert!(!unordered.success);
    assert!(unordered
        .diagnostics
        .iter()
        .all(|d| d.severity == Severity::Fatal));

    let options = CompileOptions {
        schema_order: vec!["base".to_string()],
        ..CompileOptions::default()
    };
    let ordered = compile(&documents, &options);
    assert!(ordered.success, "{:?}", ordered.diagnostics);
    let model = ordered.model.expect("model");
    let names: Vec<&str> = model.schemas().iter().map(|s| s.name()).collect();
    assert_eq!(names, ["base", "app"]);
    let Some(Entity::Message(m)) = model.find("M") else {
        panic!("M not found");
    };
    let seq = &m.fields()[0];
    let FieldKind::Ref(reference) = seq.details() else {
        panic!("ref expected");
    };
    let handle = reference.resolved().expect("resolved").handle;
    assert_eq!(model.field_name(handle).as_deref(), Some("@base.Seq"));
    assert_eq!(m.min_length(), 4);
}
