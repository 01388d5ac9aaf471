use std::fmt::Write as _;

use woodlark::{
    ParserOption, XMLError, XMLEvent, XMLStreamReader, XMLStreamReaderBuilder,
    handler::ProblemCollector,
};

fn transcript(reader: &mut XMLStreamReader) -> String {
    let mut buffer = String::new();
    loop {
        match reader.next_event().unwrap() {
            XMLEvent::StartDocument(decl) => {
                write!(
                    buffer,
                    "startDocument({}, {}, ",
                    decl.version().map_or("None".to_owned(), |v| format!("{v:?}")),
                    decl.encoding().unwrap_or("None")
                )
                .ok();
                match decl.standalone() {
                    Some(true) => writeln!(buffer, "yes)").ok(),
                    Some(false) => writeln!(buffer, "no)").ok(),
                    None => writeln!(buffer, "None)").ok(),
                };
            }
            XMLEvent::EndDocument => writeln!(buffer, "endDocument()").unwrap(),
            XMLEvent::StartElement(start) => {
                write!(
                    buffer,
                    "startElement({}, {}, {}, {}",
                    start.namespace_uri().unwrap_or("None"),
                    start.prefix().unwrap_or("None"),
                    start.local_name().unwrap_or("None"),
                    start.name()
                )
                .unwrap();
                for att in start.attributes() {
                    write!(buffer, ", ").ok();
                    if let Some(uri) = att.uri.as_deref() {
                        write!(buffer, "{{{uri}}}").ok();
                    }
                    write!(buffer, "{}='{}'", att.qname, att.value).ok();
                }
                writeln!(buffer, ")").ok();
            }
            XMLEvent::EndElement(end) => {
                writeln!(
                    buffer,
                    "endElement({}, {}, {}, {})",
                    end.namespace_uri().unwrap_or("None"),
                    end.prefix().unwrap_or("None"),
                    end.local_name().unwrap_or("None"),
                    end.name()
                )
                .unwrap();
            }
            XMLEvent::DocumentType(doctype) => {
                writeln!(
                    buffer,
                    "documentType({}, {}, {})",
                    doctype.name(),
                    doctype.public_id().unwrap_or("None"),
                    doctype.system_id().unwrap_or("None")
                )
                .ok();
            }
            XMLEvent::Characters(text) => writeln!(buffer, "characters({text})").unwrap(),
            XMLEvent::CData(text) => writeln!(buffer, "cdataSection({text})").unwrap(),
            XMLEvent::Space(text) => writeln!(buffer, "space({text})").unwrap(),
            XMLEvent::Comment(text) => writeln!(buffer, "comment({text})").unwrap(),
            XMLEvent::ProcessingInstruction(pi) => {
                writeln!(
                    buffer,
                    "processingInstruction({}, {})",
                    pi.target(),
                    pi.data().unwrap_or("None")
                )
                .ok();
            }
            XMLEvent::EntityReference(entity) => {
                writeln!(buffer, "entityReference({})", entity.name()).unwrap()
            }
            XMLEvent::EndOfInput => break,
        }
    }
    buffer
}

#[test]
fn namespaces_and_prolog() {
    let mut reader = XMLStreamReaderBuilder::new().build();
    reader
        .parse_str(
            r#"<?xml version="1.0"?><!-- c --><?pi data?><root xmlns="urn:d" xmlns:p="urn:p" p:a="1" b="2"><p:child/>text<![CDATA[<cd>]]></root><!-- after -->"#,
            None,
        )
        .unwrap();
    assert_eq!(
        transcript(&mut reader),
        r#"startDocument(XML10, None, None)
comment( c )
processingInstruction(pi, data)
startElement(urn:d, None, root, root, {urn:p}p:a='1', b='2')
startElement(urn:p, p, child, p:child)
endElement(urn:p, p, child, p:child)
characters(text)
cdataSection(<cd>)
endElement(urn:d, None, root, root)
comment( after )
endDocument()
"#
    );
    // finished readers keep reporting the end
    assert!(matches!(reader.next_event().unwrap(), XMLEvent::EndOfInput));
}

#[test]
fn namespace_processing_disabled() {
    let mut reader = XMLStreamReaderBuilder::new()
        .disable_option(ParserOption::Namespaces)
        .build();
    reader
        .parse_str(r#"<p:a xmlns:p="urn:p" p:x="1"/>"#, None)
        .unwrap();
    assert_eq!(
        transcript(&mut reader),
        r#"startDocument(None, None, None)
startElement(None, None, None, p:a, xmlns:p='urn:p', p:x='1')
endElement(None, None, None, p:a)
endDocument()
"#
    );
}

#[test]
fn declaration_and_doctype() {
    let mut reader = XMLStreamReaderBuilder::new()
        .disable_option(ParserOption::ExternalParameterEntities)
        .build();
    reader
        .parse_str(
            "<?xml version='1.0' encoding='UTF-8' standalone='yes'?>\n<!DOCTYPE doc PUBLIC '-//W//DTD//EN' 'doc.dtd' [\n<!ELEMENT doc (#PCDATA)>\n]>\n<doc/>\n",
            None,
        )
        .unwrap();
    assert_eq!(
        transcript(&mut reader),
        r#"startDocument(XML10, UTF-8, yes)
documentType(doc, -//W//DTD//EN, doc.dtd)
startElement(None, None, doc, doc)
endElement(None, None, doc, doc)
endDocument()
"#
    );
    assert_eq!(reader.standalone(), Some(true));
    assert_eq!(reader.encoding(), Some("UTF-8"));
}

#[test]
fn ignorable_whitespace() {
    let mut reader = XMLStreamReaderBuilder::new().build();
    reader
        .parse_str(
            "<!DOCTYPE r [<!ELEMENT r (a)*><!ELEMENT a EMPTY>]><r>\n <a/>\n</r>",
            None,
        )
        .unwrap();
    assert_eq!(
        transcript(&mut reader),
        "startDocument(None, None, None)
documentType(r, None, None)
startElement(None, None, r, r)
space(\n )
startElement(None, None, a, a)
endElement(None, None, a, a)
space(\n)
endElement(None, None, r, r)
endDocument()
"
    );
}

#[test]
fn coalescing_text() {
    let source = "<r>a<![CDATA[b]]>c<!--x-->d&amp;<?p?>e</r>";

    let mut reader = XMLStreamReaderBuilder::new()
        .enable_option(ParserOption::Coalescing)
        .build();
    reader.parse_str(source, None).unwrap();
    assert_eq!(
        transcript(&mut reader),
        "startDocument(None, None, None)
startElement(None, None, r, r)
characters(abcd&e)
comment(x)
processingInstruction(p, None)
endElement(None, None, r, r)
endDocument()
"
    );

    let mut reader = XMLStreamReaderBuilder::new().build();
    reader.parse_str(source, None).unwrap();
    assert_eq!(
        transcript(&mut reader),
        "startDocument(None, None, None)
startElement(None, None, r, r)
characters(a)
cdataSection(b)
characters(c)
comment(x)
characters(d&)
processingInstruction(p, None)
characters(e)
endElement(None, None, r, r)
endDocument()
"
    );
}

#[test]
fn next_tag_and_element_text() {
    let mut reader = XMLStreamReaderBuilder::new().build();
    reader
        .parse_str(
            "<r>\n  <!-- c -->\n  <a>1 &lt; 2</a>\n  <b> aGVs\n bG8= </b>\n</r>",
            None,
        )
        .unwrap();

    let XMLEvent::StartElement(start) = reader.next_tag().unwrap() else {
        panic!("expected the root element");
    };
    assert_eq!(start.name(), "r");
    let XMLEvent::StartElement(start) = reader.next_tag().unwrap() else {
        panic!("expected 'a'");
    };
    assert_eq!(start.name(), "a");
    assert_eq!(reader.read_element_text().unwrap(), "1 < 2");

    let XMLEvent::StartElement(start) = reader.next_tag().unwrap() else {
        panic!("expected 'b'");
    };
    assert_eq!(start.name(), "b");
    assert_eq!(reader.read_element_binary().unwrap(), b"hello");

    let XMLEvent::EndElement(end) = reader.next_tag().unwrap() else {
        panic!("expected the end of the root element");
    };
    assert_eq!(end.name(), "r");
    assert!(matches!(reader.next_tag().unwrap(), XMLEvent::EndDocument));
    assert!(matches!(reader.next_tag().unwrap(), XMLEvent::EndOfInput));
}

#[test]
fn character_references() {
    let mut reader = XMLStreamReaderBuilder::new().build();
    reader
        .parse_str(
            "<a b='&#x000000000041;'>&#0000000065;&#x1F600;&#10;</a>",
            None,
        )
        .unwrap();
    let XMLEvent::StartElement(start) = reader.next_tag().unwrap() else {
        panic!("expected the root element");
    };
    assert_eq!(start.attributes().get_value_by_qname("b"), Some("A"));
    assert_eq!(reader.read_element_text().unwrap(), "A\u{1F600}\n");

    for source in [
        "<a>&#99999999999999999999;</a>",
        "<a>&#x110000;</a>",
        "<a>&#0;</a>",
        "<a>&#x;</a>",
    ] {
        let mut reader = XMLStreamReaderBuilder::new().build();
        reader.parse_str(source, None).unwrap();
        let err = reader.by_ref().find_map(Result::err).unwrap();
        assert!(
            matches!(err.error, XMLError::ParserInvalidCharacterReference),
            "{source}: {err}"
        );
    }
}

#[test]
fn element_text_misuse() {
    let mut reader = XMLStreamReaderBuilder::new().build();
    reader.parse_str("<r><a/>text</r>", None).unwrap();
    // not positioned on a start tag
    let err = reader.read_element_text().unwrap_err();
    assert!(matches!(err.error, XMLError::StreamInvalidState));

    reader.next_tag().unwrap();
    let err = reader.read_element_text().unwrap_err();
    assert!(matches!(err.error, XMLError::StreamUnexpectedElement));

    let mut reader = XMLStreamReaderBuilder::new().build();
    reader.parse_str("<r>text</r>", None).unwrap();
    reader.next_tag().unwrap();
    let err = reader.next_tag().unwrap_err();
    assert!(matches!(err.error, XMLError::StreamInvalidState));

    let mut reader = XMLStreamReaderBuilder::new().build();
    reader.parse_str("<r>not base64!</r>", None).unwrap();
    reader.next_tag().unwrap();
    let err = reader.read_element_binary().unwrap_err();
    assert!(matches!(err.error, XMLError::StreamInvalidBase64));
}

#[test]
fn event_locations() {
    let mut reader = XMLStreamReaderBuilder::new().build();
    reader
        .parse_str("<a>\n  <b/>\n</a>", Some("file:///tmp/loc.xml"))
        .unwrap();
    reader.next_tag().unwrap();
    reader.next_tag().unwrap();
    let location = reader.location();
    assert_eq!((location.line, location.column), (2, 3));
    assert_eq!(location.system_id.as_deref(), Some("file:///tmp/loc.xml"));
    assert_eq!(
        location.to_string(),
        "file:///tmp/loc.xml[line:2,column:3]"
    );
}

#[test]
fn iterate_events() {
    let mut reader = XMLStreamReaderBuilder::new().build();
    reader.parse_str("<r><a/><b>t</b></r>", None).unwrap();
    let events = reader.by_ref().collect::<Result<Vec<_>, _>>().unwrap();
    let names = events
        .iter()
        .filter_map(|event| match event {
            XMLEvent::StartElement(start) => Some(start.name().to_owned()),
            _ => None,
        })
        .collect::<Vec<_>>();
    assert_eq!(names, ["r", "a", "b"]);
    assert!(matches!(events.last(), Some(XMLEvent::EndDocument)));
}

#[test]
fn well_formedness_errors() {
    let cases = [
        ("<a></b>", XMLError::ParserMismatchElementType),
        ("<a>", XMLError::ParserUnexpectedEOF),
        ("", XMLError::ParserUnexpectedEOF),
        ("<a x='1' x='2'/>", XMLError::ParserDuplicateAttributes),
        ("<a>]]></a>", XMLError::ParserUnacceptablePatternInCharData),
        ("<a/><b/>", XMLError::ParserUnexpectedDocumentContent),
        ("<a><?xml version='1.0'?></a>", XMLError::ParserUnacceptablePITarget),
        ("<a><!-- x -- y --></a>", XMLError::ParserInvalidComment),
        ("<a x=1/>", XMLError::ParserInvalidAttValue),
    ];
    for (source, expected) in cases {
        let problems = ProblemCollector::default();
        let mut reader = XMLStreamReaderBuilder::new()
            .set_error_handler(problems.clone())
            .build();
        reader.parse_str(source, None).unwrap();
        let err = loop {
            match reader.next_event() {
                Ok(XMLEvent::EndOfInput) => panic!("'{source}' was accepted"),
                Ok(_) => {}
                Err(err) => break err,
            }
        };
        assert_eq!(
            std::mem::discriminant(&err.error),
            std::mem::discriminant(&expected),
            "{source}: {err}"
        );
        assert!(err.is_fatal());
        // the handler saw the same error
        assert_eq!(problems.len(), 1);

        let err = reader.next_event().unwrap_err();
        assert!(matches!(err.error, XMLError::StreamFatalErrorOccurred));
    }
}

#[test]
fn undeclared_prefix() {
    let problems = ProblemCollector::default();
    let mut reader = XMLStreamReaderBuilder::new()
        .set_error_handler(problems.clone())
        .build();
    reader.parse_str("<p:a/>", None).unwrap();
    let XMLEvent::StartElement(start) = reader.next_tag().unwrap() else {
        panic!("expected the root element");
    };
    assert_eq!(start.namespace_uri(), None);
    assert_eq!(start.local_name(), Some("a"));
    let problems = problems.take();
    assert_eq!(problems.len(), 1);
    assert!(matches!(
        problems[0].error,
        XMLError::NamespaceUndeclaredPrefix
    ));

    let mut reader = XMLStreamReaderBuilder::new()
        .enable_option(ParserOption::StrictNamespaces)
        .build();
    reader.parse_str("<p:a/>", None).unwrap();
    let err = reader.next_tag().unwrap_err();
    assert!(matches!(err.error, XMLError::NamespaceUndeclaredPrefix));
}

#[test]
fn element_depth_limit() {
    let mut reader = XMLStreamReaderBuilder::new()
        .set_max_element_depth(2)
        .build();
    reader.parse_str("<a><b><c/></b></a>", None).unwrap();
    let err = reader.by_ref().find_map(Result::err).unwrap();
    assert!(matches!(err.error, XMLError::ParserElementDepthExceeded));
}

#[test]
fn reader_reuse() {
    let mut reader = XMLStreamReaderBuilder::new().build();
    let err = reader.next_event().unwrap_err();
    assert!(matches!(err.error, XMLError::StreamNoInput));

    reader.parse_str("<a></b>", None).unwrap();
    assert!(reader.by_ref().any(|event| event.is_err()));

    reader.parse_str("<a>ok</a>", None).unwrap();
    assert_eq!(
        transcript(&mut reader),
        "startDocument(None, None, None)
startElement(None, None, a, a)
characters(ok)
endElement(None, None, a, a)
endDocument()
"
    );
}

#[test]
fn document_from_file() {
    let mut reader = XMLStreamReaderBuilder::new().build();
    reader.parse_uri("tests/resources/note.xml").unwrap();
    assert_eq!(
        transcript(&mut reader),
        "startDocument(None, None, None)
documentType(note, None, dtd/note.dtd)
startElement(None, None, note, note, id='n1', kind='memo')
space(\n)
startElement(None, None, to, to, lang='en')
characters(Ann)
endElement(None, None, to, to)
startElement(None, None, body, body)
characters(Regards)
endElement(None, None, body, body)
endElement(None, None, note, note)
endDocument()
"
    );
    assert_eq!(reader.input_encoding(), "UTF-8");
}
