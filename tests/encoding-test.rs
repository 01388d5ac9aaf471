use woodlark::{
    XMLError, XMLEvent, XMLStreamError, XMLStreamReader, XMLStreamReaderBuilder,
    encoding::{Encoder, IBM037Encoder},
};

/// Reads the text content of the root element.
fn root_text(reader: &mut XMLStreamReader) -> Result<String, XMLStreamError> {
    reader.next_tag()?;
    reader.read_element_text()
}

fn utf16le(s: &str, bom: bool) -> Vec<u8> {
    let mut bytes = if bom { vec![0xFF, 0xFE] } else { vec![] };
    bytes.extend(s.encode_utf16().flat_map(u16::to_le_bytes));
    bytes
}

fn utf16be(s: &str) -> Vec<u8> {
    s.encode_utf16().flat_map(u16::to_be_bytes).collect()
}

#[test]
fn utf16_documents() {
    let doc = r#"<?xml version="1.0" encoding="UTF-16"?><a>café ☕</a>"#;

    let bytes = utf16le(doc, true);
    let mut reader = XMLStreamReaderBuilder::new().build();
    reader.parse_reader(bytes.as_slice(), None, None).unwrap();
    assert_eq!(root_text(&mut reader).unwrap(), "café ☕");
    assert_eq!(reader.input_encoding(), "UTF-16LE");
    assert_eq!(reader.encoding(), Some("UTF-16"));

    // the byte order comes from the first bytes when there is no BOM
    let bytes = utf16be(doc);
    let mut reader = XMLStreamReaderBuilder::new().build();
    reader.parse_reader(bytes.as_slice(), None, None).unwrap();
    assert_eq!(root_text(&mut reader).unwrap(), "café ☕");
    assert_eq!(reader.input_encoding(), "UTF-16BE");
}

#[test]
fn byte_order_mark_without_declaration() {
    let doc = "<a>byte order ☕</a>";
    let mut big_endian = vec![0xFE, 0xFF];
    big_endian.extend(utf16be(doc));
    for (bytes, expected) in [
        (utf16le(doc, true), "UTF-16LE"),
        (big_endian, "UTF-16BE"),
    ] {
        let mut reader = XMLStreamReaderBuilder::new().build();
        reader.parse_reader(bytes.as_slice(), None, None).unwrap();
        assert_eq!(root_text(&mut reader).unwrap(), "byte order ☕");
        assert_eq!(reader.input_encoding(), expected);
        assert_eq!(reader.encoding(), None);
    }
}

#[test]
fn declared_single_byte_encoding() {
    let mut bytes = br#"<?xml version="1.0" encoding="ISO-8859-1"?><a>caf"#.to_vec();
    bytes.extend([0xE9, b'<', b'/', b'a', b'>']);
    let mut reader = XMLStreamReaderBuilder::new().build();
    reader.parse_reader(bytes.as_slice(), None, None).unwrap();
    assert_eq!(root_text(&mut reader).unwrap(), "café");
    assert_eq!(reader.input_encoding(), "ISO-8859-1");

    let mut bytes = vec![];
    IBM037Encoder::default()
        .encode(
            r#"<?xml version="1.0" encoding="IBM037"?><a>EBCDIC text</a>"#,
            &mut bytes,
        )
        .unwrap();
    let mut reader = XMLStreamReaderBuilder::new().build();
    reader.parse_reader(bytes.as_slice(), None, None).unwrap();
    assert_eq!(root_text(&mut reader).unwrap(), "EBCDIC text");
    assert_eq!(reader.input_encoding(), "IBM037");

    let mut bytes = vec![];
    IBM037Encoder::default()
        .encode(
            r#"<?xml version="1.0" encoding="IBM037"?><a>rock &amp; roll!</a>"#,
            &mut bytes,
        )
        .unwrap();
    let mut reader = XMLStreamReaderBuilder::new().build();
    reader.parse_reader(bytes.as_slice(), None, None).unwrap();
    assert_eq!(root_text(&mut reader).unwrap(), "rock & roll!");
}

#[test]
fn caller_supplied_encoding() {
    let mut bytes = br#"<?xml version="1.0" encoding="UTF-8"?><a>caf"#.to_vec();
    bytes.extend([0xE9, b'<', b'/', b'a', b'>']);
    let mut reader = XMLStreamReaderBuilder::new().build();
    reader
        .parse_reader(bytes.as_slice(), Some("latin1"), None)
        .unwrap();
    assert_eq!(root_text(&mut reader).unwrap(), "café");
    assert_eq!(reader.input_encoding(), "ISO-8859-1");

    let mut reader = XMLStreamReaderBuilder::new().build();
    let err = reader
        .parse_reader(bytes.as_slice(), Some("x-unknown"), None)
        .unwrap_err();
    assert!(matches!(err.error, XMLError::ParserUnsupportedEncoding));
}

#[test]
fn encoding_declaration_errors() {
    let cases = [
        // a UTF-16 byte order mark with a single-byte declaration
        (
            utf16le(r#"<?xml version="1.0" encoding="ISO-8859-1"?><a/>"#, true),
            XMLError::ParserInvalidEncodingDecl,
        ),
        // a UTF-8 byte order mark with another declared encoding
        (
            [
                &[0xEF, 0xBB, 0xBF][..],
                br#"<?xml version="1.0" encoding="US-ASCII"?><a/>"#,
            ]
            .concat(),
            XMLError::ParserInvalidEncodingDecl,
        ),
        (
            br#"<?xml version="1.0" encoding="KOI8-R"?><a/>"#.to_vec(),
            XMLError::ParserUnsupportedEncoding,
        ),
    ];
    for (bytes, expected) in cases {
        let mut reader = XMLStreamReaderBuilder::new().build();
        reader.parse_reader(bytes.as_slice(), None, None).unwrap();
        let err = reader.next_event().unwrap_err();
        assert_eq!(
            std::mem::discriminant(&err.error),
            std::mem::discriminant(&expected),
            "{err}"
        );
        assert!(err.is_fatal());
    }
}

#[test]
fn malformed_bytes() {
    let mut reader = XMLStreamReaderBuilder::new().build();
    reader
        .parse_reader(&b"<a>\xFF\xFE</a>"[..], None, None)
        .unwrap();
    let err = reader.by_ref().find_map(Result::err).unwrap();
    assert!(err.is_fatal());
}

#[test]
fn characters_across_buffer_boundaries() {
    let text = "é☕𝄞".repeat(200);
    let doc = format!("<a>{text}</a>");

    let mut reader = XMLStreamReaderBuilder::new()
        .set_input_buffer_size(64)
        .build();
    reader.parse_reader(doc.as_bytes(), None, None).unwrap();
    assert_eq!(root_text(&mut reader).unwrap(), text);

    let bytes = utf16le(&doc, true);
    let mut reader = XMLStreamReaderBuilder::new()
        .set_input_buffer_size(64)
        .build();
    reader.parse_reader(bytes.as_slice(), None, None).unwrap();
    assert_eq!(root_text(&mut reader).unwrap(), text);
}

#[test]
fn line_ends_are_normalized() {
    let mut reader = XMLStreamReaderBuilder::new().build();
    reader
        .parse_reader(&b"<a>1\r\n2\r3\n</a>"[..], None, None)
        .unwrap();
    let mut texts = vec![];
    loop {
        match reader.next_event().unwrap() {
            XMLEvent::Characters(text) => texts.push(text),
            XMLEvent::EndOfInput => break,
            _ => {}
        }
    }
    assert_eq!(texts.concat(), "1\n2\n3\n");
}
