//! A streaming XML writer.
//!
//! The writer produces well-formed markup from a sequence of calls that mirrors the events
//! of [`XMLStreamReader`](crate::XMLStreamReader), so a document can be copied through
//! event by event.
//!
//! # Example
//! ```
//! use woodlark::XMLStreamWriter;
//!
//! let mut writer = XMLStreamWriter::new(vec![]);
//! writer.write_start_element("greeting").unwrap();
//! writer.write_attribute("lang", "en").unwrap();
//! writer.write_characters("a < b").unwrap();
//! writer.write_end_element().unwrap();
//! let out = writer.finish().unwrap();
//! assert_eq!(out, b"<greeting lang=\"en\">a &lt; b</greeting>");
//! ```

use std::{fmt::Write as _, io::Write, sync::Arc};

use log::debug;

use crate::{
    XMLVersion,
    encoding::{Encoder, UTF8_NAME, UTF8Encoder, UTF16_NAME, canonical_name, find_encoder},
    error::XMLError,
};

/// Writes XML markup to a byte sink in a chosen encoding.
///
/// Start tags are kept open until the next call, so attributes and namespace declarations
/// can follow [`write_start_element`](Self::write_start_element). Elements without content
/// written through [`write_empty_element`](Self::write_empty_element) are closed with `/>`.
pub struct XMLStreamWriter<W: Write> {
    out: W,
    encoder: Box<dyn Encoder>,
    /// Canonical name of the requested encoding, as written in the declaration
    encoding: &'static str,
    /// Markup produced by the current call, before encoding
    text: String,
    bytes: Vec<u8>,
    open: Vec<Arc<str>>,
    start_tag_open: bool,
    empty_element: bool,
    /// Attribute names of the open start tag
    attributes: Vec<Arc<str>>,
    started: bool,
    root_closed: bool,
}

impl<W: Write> XMLStreamWriter<W> {
    /// Creates a writer producing UTF-8.
    pub fn new(out: W) -> Self {
        Self::with_encoder(out, Box::new(UTF8Encoder), UTF8_NAME)
    }

    /// Creates a writer producing `encoding`.
    ///
    /// Characters that `encoding` cannot represent are written as character references
    /// where markup allows them, and fail the write elsewhere.
    pub fn with_encoding(out: W, encoding: &str) -> Result<Self, XMLError> {
        let name = canonical_name(encoding).ok_or(XMLError::ParserUnsupportedEncoding)?;
        let encoder = find_encoder(name).ok_or(XMLError::ParserUnsupportedEncoding)?;
        Ok(Self::with_encoder(out, encoder, name))
    }

    fn with_encoder(out: W, encoder: Box<dyn Encoder>, encoding: &'static str) -> Self {
        Self {
            out,
            encoder,
            encoding,
            text: String::new(),
            bytes: vec![],
            open: vec![],
            start_tag_open: false,
            empty_element: false,
            attributes: vec![],
            started: false,
            root_closed: false,
        }
    }

    /// The name of the output encoding.
    pub fn encoding(&self) -> &'static str {
        self.encoding
    }

    /// Number of elements that are open.
    pub fn depth(&self) -> usize {
        self.open.len()
    }

    /// Writes the XML declaration naming the output encoding. Must be the first output.
    ///
    /// `UTF-16` output starts with a byte order mark.
    pub fn write_start_document(&mut self, standalone: Option<bool>) -> Result<(), XMLError> {
        if self.started {
            return Err(XMLError::WriterInvalidState);
        }
        self.started = true;
        let name = self.encoding;
        if name == UTF16_NAME {
            self.encode_char('\u{FEFF}')?;
        }
        self.text.push_str("<?xml version=\"1.0\" encoding=\"");
        self.text.push_str(name);
        self.text.push('"');
        if let Some(standalone) = standalone {
            let value = if standalone { "yes" } else { "no" };
            let _ = write!(self.text, " standalone=\"{value}\"");
        }
        self.text.push_str("?>");
        self.flush_text()
    }

    /// Opens an element. Attributes and namespace declarations may follow.
    pub fn write_start_element(&mut self, qname: &str) -> Result<(), XMLError> {
        self.start_element(qname, false)
    }

    /// Writes an element without content. Attributes and namespace declarations may follow.
    pub fn write_empty_element(&mut self, qname: &str) -> Result<(), XMLError> {
        self.start_element(qname, true)
    }

    fn start_element(&mut self, qname: &str, empty: bool) -> Result<(), XMLError> {
        if self.root_closed && self.open.is_empty() {
            return Err(XMLError::WriterInvalidState);
        }
        if !XMLVersion::XML10.validate_qname(qname) {
            return Err(XMLError::ParserInvalidName);
        }
        self.started = true;
        self.close_start_tag();
        self.text.push('<');
        self.text.push_str(qname);
        self.start_tag_open = true;
        self.empty_element = empty;
        self.attributes.clear();
        if empty {
            if self.open.is_empty() {
                self.root_closed = true;
            }
        } else {
            self.open.push(qname.into());
        }
        self.flush_text()
    }

    /// Adds an attribute to the open start tag.
    pub fn write_attribute(&mut self, qname: &str, value: &str) -> Result<(), XMLError> {
        if !self.start_tag_open {
            return Err(XMLError::WriterInvalidState);
        }
        if !XMLVersion::XML10.validate_qname(qname) {
            return Err(XMLError::ParserInvalidName);
        }
        if self.attributes.iter().any(|name| **name == *qname) {
            return Err(XMLError::ParserDuplicateAttributes);
        }
        self.attributes.push(qname.into());
        let _ = write!(self.text, " {qname}=\"");
        self.flush_text()?;
        self.write_escaped(value, true)?;
        self.text.push('"');
        self.flush_text()
    }

    /// Declares a namespace on the open start tag. `None` declares the default namespace.
    pub fn write_namespace(&mut self, prefix: Option<&str>, uri: &str) -> Result<(), XMLError> {
        match prefix {
            Some(prefix) => {
                if !XMLVersion::XML10.validate_ncname(prefix) {
                    return Err(XMLError::NamespaceInvalidDeclaration);
                }
                self.write_attribute(&format!("xmlns:{prefix}"), uri)
            }
            None => self.write_attribute("xmlns", uri),
        }
    }

    /// Closes the innermost open element.
    pub fn write_end_element(&mut self) -> Result<(), XMLError> {
        let Some(qname) = self.open.pop() else {
            return Err(XMLError::WriterInvalidState);
        };
        if self.start_tag_open && !self.empty_element {
            self.text.push_str("/>");
            self.start_tag_open = false;
        } else {
            self.close_start_tag();
            let _ = write!(self.text, "</{qname}>");
        }
        if self.open.is_empty() {
            self.root_closed = true;
        }
        self.flush_text()
    }

    /// Writes character data, escaping markup characters.
    pub fn write_characters(&mut self, text: &str) -> Result<(), XMLError> {
        if self.open.is_empty() && !text.chars().all(|c| XMLVersion::XML10.is_whitespace(c)) {
            return Err(XMLError::WriterInvalidState);
        }
        self.close_start_tag();
        self.flush_text()?;
        self.write_escaped(text, false)
    }

    /// Writes a CDATA section. Text containing `]]>` is split over two sections.
    pub fn write_cdata(&mut self, text: &str) -> Result<(), XMLError> {
        if self.open.is_empty() {
            return Err(XMLError::WriterInvalidState);
        }
        self.close_start_tag();
        self.text.push_str("<![CDATA[");
        self.text.push_str(&text.replace("]]>", "]]]]><![CDATA[>"));
        self.text.push_str("]]>");
        self.flush_text()
    }

    pub fn write_comment(&mut self, text: &str) -> Result<(), XMLError> {
        if text.contains("--") || text.ends_with('-') {
            return Err(XMLError::ParserInvalidComment);
        }
        self.close_start_tag();
        let _ = write!(self.text, "<!--{text}-->");
        self.flush_text()
    }

    pub fn write_processing_instruction(
        &mut self,
        target: &str,
        data: Option<&str>,
    ) -> Result<(), XMLError> {
        if !XMLVersion::XML10.validate_ncname(target) || target.eq_ignore_ascii_case("xml") {
            return Err(XMLError::ParserUnacceptablePITarget);
        }
        self.close_start_tag();
        self.text.push_str("<?");
        self.text.push_str(target);
        if let Some(data) = data.filter(|data| !data.is_empty()) {
            if data.contains("?>") {
                return Err(XMLError::ParserInvalidProcessingInstruction);
            }
            self.text.push(' ');
            self.text.push_str(data);
        }
        self.text.push_str("?>");
        self.flush_text()
    }

    /// Writes a document type declaration. It must come before the root element.
    pub fn write_dtd(&mut self, doctype: &str) -> Result<(), XMLError> {
        if !self.open.is_empty() || self.root_closed {
            return Err(XMLError::WriterInvalidState);
        }
        self.text.push_str(doctype);
        self.flush_text()
    }

    /// Closes every open element and returns the sink.
    pub fn finish(mut self) -> Result<W, XMLError> {
        while !self.open.is_empty() {
            self.write_end_element()?;
        }
        self.close_start_tag();
        self.flush_text()?;
        self.out.flush()?;
        debug!("writer finished ({})", self.encoding);
        Ok(self.out)
    }

    fn close_start_tag(&mut self) {
        if self.start_tag_open {
            self.text.push_str(if self.empty_element { "/>" } else { ">" });
            self.start_tag_open = false;
        }
    }

    /// Escapes `&`, `<`, `>` and CR in text. Attribute values also escape `"` and the
    /// whitespace characters that normalization would replace.
    fn write_escaped(&mut self, data: &str, attribute: bool) -> Result<(), XMLError> {
        for c in data.chars() {
            match c {
                '&' => self.text.push_str("&amp;"),
                '<' => self.text.push_str("&lt;"),
                '>' => self.text.push_str("&gt;"),
                '"' if attribute => self.text.push_str("&quot;"),
                '\r' => self.text.push_str("&#13;"),
                '\n' if attribute => self.text.push_str("&#10;"),
                '\t' if attribute => self.text.push_str("&#9;"),
                c => {
                    self.flush_text()?;
                    if !self.encode_char(c)? {
                        let _ = write!(self.text, "&#x{:X};", c as u32);
                    }
                }
            }
        }
        self.flush_text()
    }

    /// Returns `false` if `c` has no representation in the output encoding.
    fn encode_char(&mut self, c: char) -> Result<bool, XMLError> {
        self.bytes.clear();
        if !self.encoder.encode_char(c, &mut self.bytes) {
            return Ok(false);
        }
        self.out.write_all(&self.bytes)?;
        Ok(true)
    }

    fn flush_text(&mut self) -> Result<(), XMLError> {
        if self.text.is_empty() {
            return Ok(());
        }
        self.bytes.clear();
        self.encoder.encode(&self.text, &mut self.bytes)?;
        self.text.clear();
        self.out.write_all(&self.bytes)?;
        Ok(())
    }
}

impl XMLStreamWriter<Vec<u8>> {
    /// Creates a writer collecting UTF-8 output in memory.
    pub fn in_memory() -> Self {
        Self::new(vec![])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn output(writer: XMLStreamWriter<Vec<u8>>) -> String {
        String::from_utf8(writer.finish().unwrap()).unwrap()
    }

    #[test]
    fn empty_and_nested_elements() {
        let mut writer = XMLStreamWriter::in_memory();
        writer.write_start_document(None).unwrap();
        writer.write_start_element("a").unwrap();
        writer.write_namespace(Some("p"), "urn:p").unwrap();
        writer.write_empty_element("p:b").unwrap();
        writer.write_attribute("x", "1\t2").unwrap();
        writer.write_start_element("c").unwrap();
        writer.write_end_element().unwrap();
        assert_eq!(
            output(writer),
            "<?xml version=\"1.0\" encoding=\"UTF-8\"?><a xmlns:p=\"urn:p\"><p:b x=\"1&#9;2\"/><c/></a>"
        );
    }

    #[test]
    fn cdata_with_terminator_is_split() {
        let mut writer = XMLStreamWriter::in_memory();
        writer.write_start_element("a").unwrap();
        writer.write_cdata("x]]>y").unwrap();
        assert_eq!(
            output(writer),
            "<a><![CDATA[x]]]]><![CDATA[>y]]></a>"
        );
    }

    #[test]
    fn unmappable_text_becomes_char_ref() {
        let mut writer = XMLStreamWriter::with_encoding(vec![], "US-ASCII").unwrap();
        writer.write_start_element("a").unwrap();
        writer.write_characters("caf\u{E9}").unwrap();
        let out = writer.finish().unwrap();
        assert_eq!(out, b"<a>caf&#xE9;</a>");
    }

    #[test]
    fn utf16_output_starts_with_bom() {
        let mut writer = XMLStreamWriter::with_encoding(vec![], "utf-16").unwrap();
        assert_eq!(writer.encoding(), "UTF-16");
        writer.write_start_document(None).unwrap();
        let out = writer.finish().unwrap();
        assert_eq!(&out[..4], &[0xFE, 0xFF, 0x00, b'<']);
    }

    #[test]
    fn invalid_state() {
        let mut writer = XMLStreamWriter::in_memory();
        assert!(writer.write_attribute("a", "b").is_err());
        assert!(writer.write_end_element().is_err());
        assert!(writer.write_comment("a--b").is_err());
        writer.write_empty_element("root").unwrap();
        assert!(writer.write_start_element("second").is_err());
    }
}
