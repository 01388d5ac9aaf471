use std::fmt::Write as _;

use url::Url;
use woodlark::{
    ParserOption, XMLError, XMLErrorLevel, XMLEvent, XMLStreamError, XMLStreamReader,
    XMLStreamReaderBuilder, handler::ProblemCollector, resolver::NoExternalResolver,
    source::InputSource,
};

/// Text and entity events of the document, one per line.
fn content(reader: &mut XMLStreamReader) -> Result<String, XMLStreamError> {
    let mut buffer = String::new();
    loop {
        match reader.next_event()? {
            XMLEvent::Characters(text) => writeln!(buffer, "characters({text})").unwrap(),
            XMLEvent::StartElement(start) => {
                write!(buffer, "startElement({}", start.name()).unwrap();
                for att in start.attributes() {
                    write!(buffer, ", {}='{}'", att.qname, att.value).unwrap();
                }
                writeln!(buffer, ")").unwrap();
            }
            XMLEvent::EntityReference(entity) => writeln!(
                buffer,
                "entityReference({}, {})",
                entity.name(),
                entity.replacement_text().unwrap_or("None")
            )
            .unwrap(),
            XMLEvent::EndOfInput => break,
            _ => {}
        }
    }
    Ok(buffer)
}

fn first_error(reader: &mut XMLStreamReader) -> XMLStreamError {
    loop {
        match reader.next_event() {
            Ok(XMLEvent::EndOfInput) => panic!("the document was accepted"),
            Ok(_) => {}
            Err(err) => return err,
        }
    }
}

const NESTED: &str = r#"<!DOCTYPE r [
<!ENTITY e "E&f;">
<!ENTITY f "F">
]>
<r a="&e;">x&e;y</r>"#;

#[test]
fn nested_internal_entities() {
    let mut reader = XMLStreamReaderBuilder::new().build();
    reader.parse_str(NESTED, None).unwrap();
    assert_eq!(
        content(&mut reader).unwrap(),
        "startElement(r, a='EF')
characters(x)
characters(E)
characters(F)
characters(y)
"
    );
    assert_eq!(reader.expansion_budget().count(), 4);
    assert_eq!(reader.expansion_budget().depth(), 0);

    let mut reader = XMLStreamReaderBuilder::new()
        .enable_option(ParserOption::Coalescing)
        .build();
    reader.parse_str(NESTED, None).unwrap();
    assert_eq!(
        content(&mut reader).unwrap(),
        "startElement(r, a='EF')
characters(xEFy)
"
    );
}

#[test]
fn unexpanded_references() {
    let mut reader = XMLStreamReaderBuilder::new()
        .disable_option(ParserOption::ReplaceEntityReferences)
        .build();
    reader
        .parse_str(r#"<!DOCTYPE r [<!ENTITY e "E">]><r>a&e;b&amp;</r>"#, None)
        .unwrap();
    assert_eq!(
        content(&mut reader).unwrap(),
        "startElement(r)
characters(a)
entityReference(e, E)
characters(b&)
"
    );
}

#[test]
fn attribute_value_normalization() {
    let mut reader = XMLStreamReaderBuilder::new().build();
    reader
        .parse_str(
            "<!DOCTYPE r [<!ENTITY t \"a\tb\"><!ATTLIST r tok NMTOKENS #IMPLIED>]><r cdata=\"1&#9;2 3\t4\" ent=\"&t;\" tok=\"  x \n y  \"/>",
            None,
        )
        .unwrap();
    assert_eq!(
        content(&mut reader).unwrap(),
        "startElement(r, cdata='1\t2 3 4', ent='a b', tok='x y')\n"
    );
}

#[test]
fn custom_entities() {
    let mut reader = XMLStreamReaderBuilder::new()
        .add_custom_entity("product", "Woodlark")
        .add_custom_entity("product", "ignored")
        .build();
    reader
        .parse_str(
            r#"<!DOCTYPE r [<!ENTITY product "from the DTD">]><r>&product;</r>"#,
            None,
        )
        .unwrap();
    assert_eq!(
        content(&mut reader).unwrap(),
        "startElement(r)\ncharacters(Woodlark)\n"
    );
}

#[test]
fn external_entities_through_resolver() {
    let mut requested = vec![];
    let resolver = |name: &str,
                    _: Option<&str>,
                    base: Option<&Url>,
                    system_id: &str|
     -> Result<InputSource<'static>, XMLError> {
        requested.push((
            name.to_owned(),
            base.map(|base| base.to_string()),
            system_id.to_owned(),
        ));
        Ok(InputSource::from_content("<?xml encoding='UTF-8'?>Hi"))
    };
    let mut reader = XMLStreamReaderBuilder::new()
        .set_entity_resolver(resolver)
        .build();
    reader
        .parse_str(
            r#"<!DOCTYPE r [<!ENTITY greeting SYSTEM "greeting.txt">]><r>&greeting;</r>"#,
            Some("file:///docs/r.xml"),
        )
        .unwrap();
    assert_eq!(
        content(&mut reader).unwrap(),
        "startElement(r)\ncharacters(Hi)\n"
    );
    drop(reader);
    assert_eq!(
        requested,
        [(
            "greeting".to_owned(),
            Some("file:///docs/r.xml".to_owned()),
            "greeting.txt".to_owned()
        )]
    );
}

#[test]
fn external_entities_disabled() {
    let mut reader = XMLStreamReaderBuilder::new()
        .disable_option(ParserOption::ExternalGeneralEntities)
        .set_entity_resolver(NoExternalResolver)
        .build();
    reader
        .parse_str(
            r#"<!DOCTYPE r [<!ENTITY ext SYSTEM "ext.xml">]><r>&ext;</r>"#,
            None,
        )
        .unwrap();
    assert_eq!(
        content(&mut reader).unwrap(),
        "startElement(r)\nentityReference(ext, None)\n"
    );
}

#[test]
fn unresolvable_external_entity() {
    let mut reader = XMLStreamReaderBuilder::new()
        .set_entity_resolver(NoExternalResolver)
        .build();
    reader
        .parse_str(
            r#"<!DOCTYPE r [<!ENTITY ext SYSTEM "ext.xml">]><r>&ext;</r>"#,
            None,
        )
        .unwrap();
    let err = first_error(&mut reader);
    assert!(matches!(err.error, XMLError::EntityUnresolvable));
}

#[test]
fn reference_errors() {
    let cases = [
        (
            r#"<!DOCTYPE r [<!ENTITY a "&b;"><!ENTITY b "&a;">]><r>&a;</r>"#,
            XMLError::ParserEntityRecursion,
        ),
        (
            r#"<!DOCTYPE r [<!ENTITY a "&b;"><!ENTITY b "&a;">]><r x="&a;"/>"#,
            XMLError::ParserEntityRecursion,
        ),
        ("<r>&undeclared;</r>", XMLError::ParserUndeclaredEntityReference),
        (
            r#"<!DOCTYPE r [<!NOTATION gif SYSTEM "gif"><!ENTITY pic SYSTEM "pic.gif" NDATA gif>]><r>&pic;</r>"#,
            XMLError::ParserUnparsedEntityReference,
        ),
        (
            r#"<!DOCTYPE r [<!ENTITY ext SYSTEM "ext.xml">]><r a="&ext;"/>"#,
            XMLError::ParserExternalEntityInAttribute,
        ),
        (
            r#"<!DOCTYPE r [<!ENTITY lt2 "<">]><r a="&lt2;"/>"#,
            XMLError::ParserInvalidAttValue,
        ),
        (
            r#"<!DOCTYPE r [<!ENTITY open "<a>">]><r>&open;</a></r>"#,
            XMLError::ParserEntityIncorrectNesting,
        ),
        ("<r>&amp</r>", XMLError::ParserInvalidEntityReference),
    ];
    for (source, expected) in cases {
        let mut reader = XMLStreamReaderBuilder::new()
            .set_entity_resolver(NoExternalResolver)
            .build();
        reader.parse_str(source, None).unwrap();
        let err = first_error(&mut reader);
        assert_eq!(
            std::mem::discriminant(&err.error),
            std::mem::discriminant(&expected),
            "{source}: {err}"
        );
    }
}

#[test]
fn problems_inside_entities_name_the_entity() {
    let mut reader = XMLStreamReaderBuilder::new().build();
    reader
        .parse_str(
            "<!DOCTYPE r [<!ENTITY e \"ok\n&undeclared;\">]><r>&e;</r>",
            Some("file:///t/doc.xml"),
        )
        .unwrap();
    let err = first_error(&mut reader);
    assert!(matches!(
        err.error,
        XMLError::ParserUndeclaredEntityReference
    ));
    assert_eq!(err.location.entity.as_deref(), Some("e"));
    assert_eq!(err.location.line, 2);
    assert!(err.to_string().contains("[entity e][line:2,"), "{err}");
}

#[test]
fn undeclared_entity_with_skipped_declarations() {
    let problems = ProblemCollector::default();
    let mut reader = XMLStreamReaderBuilder::new()
        .disable_option(ParserOption::ExternalParameterEntities)
        .set_error_handler(problems.clone())
        .build();
    reader
        .parse_str(r#"<!DOCTYPE r SYSTEM "missing.dtd"><r>&u;</r>"#, None)
        .unwrap();
    assert_eq!(
        content(&mut reader).unwrap(),
        "startElement(r)\nentityReference(u, None)\n"
    );
    let problems = problems.take();
    assert_eq!(problems.len(), 1);
    assert!(matches!(
        problems[0].error,
        XMLError::ParserUndeclaredEntityReference
    ));
    assert_eq!(problems[0].level, XMLErrorLevel::Warning);

    // a standalone document cannot rely on skipped declarations
    let mut reader = XMLStreamReaderBuilder::new()
        .disable_option(ParserOption::ExternalParameterEntities)
        .build();
    reader
        .parse_str(
            r#"<?xml version="1.0" standalone="yes"?><!DOCTYPE r SYSTEM "missing.dtd"><r>&u;</r>"#,
            None,
        )
        .unwrap();
    let err = first_error(&mut reader);
    assert!(matches!(
        err.error,
        XMLError::ParserUndeclaredEntityReference
    ));
}

#[test]
fn entity_depth_limit() {
    let source = r#"<!DOCTYPE r [
<!ENTITY a "&b;">
<!ENTITY b "&c;">
<!ENTITY c "x">
]>
<r>&a;</r>"#;
    let mut reader = XMLStreamReaderBuilder::new()
        .set_max_entity_depth(2)
        .build();
    reader.parse_str(source, None).unwrap();
    let err = first_error(&mut reader);
    assert!(matches!(err.error, XMLError::EntityDepthExceeded));

    let mut reader = XMLStreamReaderBuilder::new()
        .set_max_entity_depth(3)
        .build();
    reader.parse_str(source, None).unwrap();
    assert_eq!(content(&mut reader).unwrap(), "startElement(r)\ncharacters(x)\n");
}

#[test]
fn entity_count_limit() {
    let source = r#"<!DOCTYPE r [<!ENTITY e "x">]><r>&e;&e;&e;&e;&e;&e;</r>"#;
    let mut reader = XMLStreamReaderBuilder::new()
        .set_max_entity_count(5)
        .build();
    reader.parse_str(source, None).unwrap();
    let err = first_error(&mut reader);
    assert!(matches!(err.error, XMLError::EntityCountExceeded));

    // exactly as many expansions as the limit allows
    let source = format!(
        r#"<!DOCTYPE r [<!ENTITY e "x">]><r>{}</r>"#,
        "&e;".repeat(21)
    );
    let mut reader = XMLStreamReaderBuilder::new()
        .set_max_entity_count(21)
        .enable_option(ParserOption::Coalescing)
        .build();
    reader.parse_str(&source, None).unwrap();
    assert_eq!(
        content(&mut reader).unwrap(),
        format!("startElement(r)\ncharacters({})\n", "x".repeat(21))
    );
    assert_eq!(reader.expansion_budget().count(), 21);

    let mut reader = XMLStreamReaderBuilder::new()
        .set_max_entity_count(20)
        .build();
    reader.parse_str(&source, None).unwrap();
    let err = first_error(&mut reader);
    assert!(matches!(err.error, XMLError::EntityCountExceeded));

    // attribute values count too
    let mut reader = XMLStreamReaderBuilder::new()
        .set_max_entity_count(1)
        .build();
    reader
        .parse_str(r#"<!DOCTYPE r [<!ENTITY e "x">]><r a="&e;&e;"/>"#, None)
        .unwrap();
    let err = first_error(&mut reader);
    assert!(matches!(err.error, XMLError::EntityCountExceeded));
}

#[test]
fn expanded_text_limits() {
    let source = r#"<!DOCTYPE r [
<!ENTITY t "0123456789">
<!ENTITY big "&t;&t;&t;">
]>
<r>&big;</r>"#;
    let mut reader = XMLStreamReaderBuilder::new()
        .set_max_text_length(25)
        .build();
    reader.parse_str(source, None).unwrap();
    let err = first_error(&mut reader);
    assert!(matches!(err.error, XMLError::EntityTextTooLarge));

    let mut reader = XMLStreamReaderBuilder::new()
        .set_max_text_length(30)
        .enable_option(ParserOption::Coalescing)
        .build();
    reader.parse_str(source, None).unwrap();
    assert_eq!(
        content(&mut reader).unwrap(),
        "startElement(r)\ncharacters(012345678901234567890123456789)\n"
    );
    assert_eq!(reader.expansion_budget().total_chars(), 30);

    // the text limit applies to each top-level reference, the total to the whole document
    let source = r#"<!DOCTYPE r [<!ENTITY t "0123456789">]><r>&t;&t;</r>"#;
    let mut reader = XMLStreamReaderBuilder::new()
        .set_max_text_length(10)
        .build();
    reader.parse_str(source, None).unwrap();
    assert!(content(&mut reader).is_ok());

    let mut reader = XMLStreamReaderBuilder::new()
        .set_max_text_length(10)
        .set_max_total_expansion(Some(15))
        .build();
    reader.parse_str(source, None).unwrap();
    let err = first_error(&mut reader);
    assert!(matches!(err.error, XMLError::EntityTotalExpansionExceeded));
}

#[test]
fn billion_laughs() {
    let source = r#"<?xml version="1.0"?>
<!DOCTYPE lolz [
 <!ENTITY lol "lol">
 <!ENTITY lol1 "&lol;&lol;&lol;&lol;&lol;&lol;&lol;&lol;&lol;&lol;">
 <!ENTITY lol2 "&lol1;&lol1;&lol1;&lol1;&lol1;&lol1;&lol1;&lol1;&lol1;&lol1;">
 <!ENTITY lol3 "&lol2;&lol2;&lol2;&lol2;&lol2;&lol2;&lol2;&lol2;&lol2;&lol2;">
 <!ENTITY lol4 "&lol3;&lol3;&lol3;&lol3;&lol3;&lol3;&lol3;&lol3;&lol3;&lol3;">
 <!ENTITY lol5 "&lol4;&lol4;&lol4;&lol4;&lol4;&lol4;&lol4;&lol4;&lol4;&lol4;">
 <!ENTITY lol6 "&lol5;&lol5;&lol5;&lol5;&lol5;&lol5;&lol5;&lol5;&lol5;&lol5;">
 <!ENTITY lol7 "&lol6;&lol6;&lol6;&lol6;&lol6;&lol6;&lol6;&lol6;&lol6;&lol6;">
 <!ENTITY lol8 "&lol7;&lol7;&lol7;&lol7;&lol7;&lol7;&lol7;&lol7;&lol7;&lol7;">
 <!ENTITY lol9 "&lol8;&lol8;&lol8;&lol8;&lol8;&lol8;&lol8;&lol8;&lol8;&lol8;">
]>
<lolz>&lol9;</lolz>"#;
    let mut reader = XMLStreamReaderBuilder::new()
        .set_max_entity_count(10_000)
        .enable_option(ParserOption::Coalescing)
        .build();
    reader.parse_str(source, None).unwrap();
    let err = first_error(&mut reader);
    assert!(
        matches!(
            err.error,
            XMLError::EntityCountExceeded | XMLError::EntityTextTooLarge
        ),
        "{err}"
    );
    assert!(err.is_fatal());
}

/// An external subset whose parameter entities grow tenfold per level.
fn amplifying_dtd(levels: usize) -> String {
    let mut dtd = String::from("<!ENTITY % a0 \"0123456789\">\n");
    for level in 1..=levels {
        let reference = format!("%a{};", level - 1);
        writeln!(dtd, "<!ENTITY % a{level} \"{}\">", reference.repeat(10)).unwrap();
    }
    writeln!(dtd, "<!ENTITY big \"%a{levels};\">").unwrap();
    dtd
}

fn with_external_subset(dtd: String, max_text_length: usize) -> XMLStreamReader<'static> {
    let resolver = move |_: &str,
                         _: Option<&str>,
                         _: Option<&Url>,
                         _: &str|
          -> Result<InputSource<'static>, XMLError> {
        Ok(InputSource::from_content(&dtd))
    };
    let mut reader = XMLStreamReaderBuilder::new()
        .set_entity_resolver(resolver)
        .set_max_text_length(max_text_length)
        .enable_option(ParserOption::Coalescing)
        .build();
    reader
        .parse_str(r#"<!DOCTYPE r SYSTEM "amplify.dtd"><r>&big;</r>"#, None)
        .unwrap();
    reader
}

#[test]
fn parameter_entities_in_entity_values_are_bounded() {
    let mut reader = with_external_subset(amplifying_dtd(5), 1000);
    let err = first_error(&mut reader);
    assert!(matches!(err.error, XMLError::EntityTextTooLarge), "{err}");
    assert!(err.is_fatal());

    // a value of exactly the limit is still accepted
    let mut reader = with_external_subset(amplifying_dtd(2), 1000);
    assert_eq!(
        content(&mut reader).unwrap(),
        format!("startElement(r)\ncharacters({})\n", "0123456789".repeat(100))
    );

    let mut reader = with_external_subset(amplifying_dtd(2), 999);
    let err = first_error(&mut reader);
    assert!(matches!(err.error, XMLError::EntityTextTooLarge), "{err}");
}
