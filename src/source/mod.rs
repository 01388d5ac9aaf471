//! Readable character sources and the stack that nests them.

mod stack;

use std::{io::Read, sync::Arc};

use log::debug;
use url::Url;

use crate::{
    encoding::{
        DecodeError, Decoder, EncodingFamily, IBM037Decoder, UTF8_NAME, UTF8Decoder,
        UTF16_NAME, UTF16BEDecoder, UTF16LEDecoder, canonical_name, encoding_family,
        find_decoder,
    },
    error::{Location, XMLError},
};

pub use stack::SourceStack;

pub(crate) const INPUT_CHUNK: usize = 4096;

/// What an [`InputSource`] was created for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SourceKind {
    #[default]
    Document,
    GeneralEntity,
    ParameterEntity {
        external: bool,
    },
    ExternalSubset,
}

/// A buffered character source.
///
/// Bytes are pulled from the underlying reader on demand and decoded into an internal
/// `String`. Only the unread tail of the decoded text is kept, so memory usage is bounded
/// by the chunk size and the longest construct a caller looks ahead at.
///
/// Until [`finish_declaration`](InputSource::finish_declaration) is called, characters are
/// decoded one at a time with the encoding guessed from the first bytes. This allows the
/// encoding named by the XML or text declaration to take over exactly after the
/// declaration.
pub struct InputSource<'a> {
    reader: Box<dyn Read + 'a>,
    raw: Vec<u8>,
    /// Start position of the undecoded range of `raw`
    raw_next: usize,
    chunk: usize,
    decoder: Box<dyn Decoder>,
    family: EncodingFamily,
    has_bom: bool,
    /// The encoding was supplied by the caller, or the content was already decoded
    fixed_encoding: bool,
    decoded: String,
    /// Start position of unused data in `decoded`
    decoded_next: usize,
    /// Whether `reader` has reached EOF
    eof: bool,
    normalize_newlines: bool,
    /// The last decoded character was a '\r' that was replaced with '\n'
    pending_cr: bool,
    /// The declaration has not been read yet
    sniffing: bool,
    /// Raw widths of the characters decoded while sniffing
    widths: Vec<usize>,
    line: usize,
    column: usize,
    char_offset: usize,
    system_id: Option<Arc<str>>,
    public_id: Option<Arc<str>>,
    base_uri: Option<Arc<Url>>,
    entity_name: Option<Arc<str>>,
    kind: SourceKind,
    /// Number of open elements when this source was entered
    pub(crate) element_depth_at_entry: usize,
}

impl<'a> InputSource<'a> {
    fn empty() -> Self {
        Self {
            reader: Box::new(std::io::empty()),
            raw: vec![],
            raw_next: 0,
            chunk: INPUT_CHUNK,
            decoder: Box::new(UTF8Decoder),
            family: EncodingFamily::AsciiCompatible,
            has_bom: false,
            fixed_encoding: false,
            decoded: String::new(),
            decoded_next: 0,
            eof: true,
            normalize_newlines: true,
            pending_cr: false,
            sniffing: false,
            widths: vec![],
            line: 1,
            column: 1,
            char_offset: 0,
            system_id: None,
            public_id: None,
            base_uri: None,
            entity_name: None,
            kind: SourceKind::Document,
            element_depth_at_entry: 0,
        }
    }

    /// Creates a source over a byte stream.
    ///
    /// If `encoding` is `None`, the encoding is detected from a byte order mark or the
    /// first bytes of an XML declaration, and may be refined by the declaration itself.
    pub fn from_reader(reader: impl Read + 'a, encoding: Option<&str>) -> Result<Self, XMLError> {
        Self::with_chunk_size(reader, encoding, INPUT_CHUNK)
    }

    pub fn with_chunk_size(
        reader: impl Read + 'a,
        encoding: Option<&str>,
        chunk: usize,
    ) -> Result<Self, XMLError> {
        let mut ret = Self::empty();
        ret.reader = Box::new(reader);
        ret.eof = false;
        ret.chunk = chunk.max(64);
        ret.read_raw(4)?;
        if let Some(encoding) = encoding {
            ret.apply_external_encoding(encoding)?;
        } else {
            ret.detect_encoding()?;
        }
        Ok(ret)
    }

    /// Creates a source over already decoded document text.
    ///
    /// Line endings are normalized and a leading byte order mark is skipped.
    /// Any encoding named by the XML declaration is ignored.
    pub fn from_content(content: &str) -> Self {
        let mut ret = Self::empty();
        let content = content.strip_prefix('\u{FEFF}').unwrap_or(content);
        ret.decoded = if content.contains('\r') {
            content.replace("\r\n", "\n").replace('\r', "\n")
        } else {
            content.to_owned()
        };
        ret.fixed_encoding = true;
        ret
    }

    /// Creates a source over the replacement text of an internal entity.
    ///
    /// The text is read as is: no line-ending normalization, no declaration.
    pub fn from_entity_text(replacement_text: &str) -> Self {
        let mut ret = Self::empty();
        ret.decoded = replacement_text.to_owned();
        ret.fixed_encoding = true;
        ret.normalize_newlines = false;
        ret
    }

    fn detect_encoding(&mut self) -> Result<(), XMLError> {
        let head = &self.raw[self.raw_next..];
        let (decoder, family, skip, sniffing): (Box<dyn Decoder>, _, _, _) = match *head {
            // UCS-4 with or without BOM, in any octet order
            [0x00, 0x00, 0xFE, 0xFF, ..]
            | [0xFF, 0xFE, 0x00, 0x00, ..]
            | [0x00, 0x00, 0xFF, 0xFE, ..]
            | [0xFE, 0xFF, 0x00, 0x00, ..]
            | [0x00, 0x00, 0x00, 0x3C, ..]
            | [0x3C, 0x00, 0x00, 0x00, ..]
            | [0x00, 0x00, 0x3C, 0x00, ..]
            | [0x00, 0x3C, 0x00, 0x00, ..] => return Err(XMLError::ParserUnsupportedEncoding),
            // UTF-16, big-endian
            [0xFE, 0xFF, ..] => (Box::new(UTF16BEDecoder), EncodingFamily::Utf16, 2, true),
            // UTF-16, little-endian
            [0xFF, 0xFE, ..] => (Box::new(UTF16LEDecoder), EncodingFamily::Utf16, 2, true),
            // UTF-8
            [0xEF, 0xBB, 0xBF, ..] => (
                Box::new(UTF8Decoder),
                EncodingFamily::AsciiCompatible,
                3,
                true,
            ),
            // '<?' in UTF-16BE without BOM
            [0x00, 0x3C, 0x00, 0x3F, ..] => {
                (Box::new(UTF16BEDecoder), EncodingFamily::Utf16, 0, true)
            }
            // '<?' in UTF-16LE without BOM
            [0x3C, 0x00, 0x3F, 0x00, ..] => {
                (Box::new(UTF16LEDecoder), EncodingFamily::Utf16, 0, true)
            }
            // '<?xm' in some encoding sharing the ASCII range
            [0x3C, 0x3F, 0x78, 0x6D, ..] => (
                Box::new(UTF8Decoder),
                EncodingFamily::AsciiCompatible,
                0,
                true,
            ),
            // '<?xm' in EBCDIC
            [0x4C, 0x6F, 0xA7, 0x94, ..] => {
                (Box::new(IBM037Decoder), EncodingFamily::Ebcdic, 0, true)
            }
            // No declaration can follow, so this is UTF-8.
            _ => (
                Box::new(UTF8Decoder),
                EncodingFamily::AsciiCompatible,
                0,
                false,
            ),
        };
        debug!("detected encoding {} for {:?}", decoder.name(), self.system_id);
        self.has_bom = skip > 0;
        self.raw_next += skip;
        self.decoder = decoder;
        self.family = family;
        self.sniffing = sniffing;
        Ok(())
    }

    fn apply_external_encoding(&mut self, encoding: &str) -> Result<(), XMLError> {
        let name = canonical_name(encoding).ok_or(XMLError::ParserUnsupportedEncoding)?;
        let family = encoding_family(name).ok_or(XMLError::ParserUnsupportedEncoding)?;
        let head = &self.raw[self.raw_next..];
        let (decoder, skip): (Box<dyn Decoder>, usize) = match (name, head) {
            (UTF16_NAME, [0xFF, 0xFE, ..]) => (Box::new(UTF16LEDecoder), 2),
            (UTF16_NAME, [0xFE, 0xFF, ..]) => (Box::new(UTF16BEDecoder), 2),
            (UTF8_NAME, [0xEF, 0xBB, 0xBF, ..]) => (Box::new(UTF8Decoder), 3),
            _ => (
                find_decoder(name).ok_or(XMLError::ParserUnsupportedEncoding)?,
                0,
            ),
        };
        self.has_bom = skip > 0;
        self.raw_next += skip;
        self.decoder = decoder;
        self.family = family;
        self.fixed_encoding = true;
        self.sniffing = false;
        Ok(())
    }

    /// Reads from the underlying reader until at least `min` undecoded bytes are
    /// buffered or EOF is reached.
    fn read_raw(&mut self, min: usize) -> Result<(), XMLError> {
        while self.raw.len() - self.raw_next < min && !self.eof {
            if !self.sniffing && self.raw_next > 0 {
                self.raw.drain(..self.raw_next);
                self.raw_next = 0;
            }
            let old = self.raw.len();
            self.raw.resize(old + self.chunk, 0);
            let read = loop {
                match self.reader.read(&mut self.raw[old..]) {
                    Ok(read) => break read,
                    Err(err) if err.kind() == std::io::ErrorKind::Interrupted => continue,
                    Err(err) => {
                        self.raw.truncate(old);
                        return Err(err.into());
                    }
                }
            };
            self.raw.truncate(old + read);
            if read == 0 {
                self.eof = true;
            }
        }
        Ok(())
    }

    /// Decodes at least one more character if possible.
    ///
    /// Returns `false` if the source is exhausted.
    fn decode_more(&mut self) -> Result<bool, XMLError> {
        loop {
            if self.raw_next == self.raw.len() {
                if self.eof {
                    return Ok(false);
                }
                self.read_raw(1)?;
                continue;
            }

            let avail = &self.raw[self.raw_next..];
            let mut buf = String::new();
            let result = if self.sniffing {
                // one character at a time
                let mut result = Ok((0, 0));
                for len in 1..=avail.len().min(4) {
                    result = self.decoder.decode(
                        &avail[..len],
                        &mut buf,
                        self.eof && len == avail.len(),
                    );
                    if !matches!(result, Ok((0, _))) {
                        break;
                    }
                }
                result
            } else {
                self.decoder.decode(avail, &mut buf, self.eof)
            };
            let read = match result {
                Ok((read, _)) => read,
                Err(err @ DecodeError::Malformed { .. }) => {
                    let valid = err.valid_up_to();
                    if valid == 0 || buf.is_empty() {
                        return Err(err.into());
                    }
                    // keep what was decoded and fail when the malformed bytes are reached
                    valid
                }
                Err(err) => return Err(err.into()),
            };
            if read == 0 {
                if self.eof {
                    return Err(DecodeError::Malformed {
                        read: avail.len(),
                        write: 0,
                        length: avail.len(),
                        offset: 0,
                    }
                    .into());
                }
                let want = avail.len() + 1;
                self.read_raw(want)?;
                continue;
            }
            self.raw_next += read;
            self.push_decoded(&buf, read);
            return Ok(true);
        }
    }

    fn push_decoded(&mut self, buf: &str, read: usize) {
        let count = buf.chars().count().max(1);
        for c in buf.chars() {
            if self.normalize_newlines {
                if self.pending_cr {
                    self.pending_cr = false;
                    if c == '\n' {
                        if self.sniffing
                            && let Some(last) = self.widths.last_mut()
                        {
                            *last += read / count;
                        }
                        continue;
                    }
                }
                if c == '\r' {
                    self.pending_cr = true;
                    self.decoded.push('\n');
                    if self.sniffing {
                        self.widths.push(read / count);
                    }
                    continue;
                }
            }
            self.decoded.push(c);
            if self.sniffing {
                self.widths.push(read / count);
            }
        }
    }

    /// Makes at least `min` bytes of decoded text available if the source has them.
    ///
    /// Returns the number of available bytes, which is less than `min` only at the end of
    /// the source.
    pub fn fill(&mut self, min: usize) -> Result<usize, XMLError> {
        if !self.sniffing && self.decoded_next >= self.chunk {
            self.decoded.drain(..self.decoded_next);
            self.decoded_next = 0;
        }
        while self.decoded.len() - self.decoded_next < min {
            if !self.decode_more()? {
                break;
            }
        }
        Ok(self.decoded.len() - self.decoded_next)
    }

    /// Switches to the encoding named by the XML or text declaration.
    ///
    /// Must be called once the declaration has been consumed (or found absent).
    /// Characters decoded ahead of the current position are decoded again with the new
    /// encoding.
    pub fn finish_declaration(&mut self, encoding: Option<&str>) -> Result<(), XMLError> {
        let sniffing = std::mem::replace(&mut self.sniffing, false);
        let Some(encoding) = encoding else {
            self.widths.clear();
            return Ok(());
        };
        if self.fixed_encoding {
            return Ok(());
        }
        let name = canonical_name(encoding).ok_or(XMLError::ParserUnsupportedEncoding)?;
        let family = encoding_family(name).ok_or(XMLError::ParserUnsupportedEncoding)?;
        if family != self.family {
            return Err(XMLError::ParserInvalidEncodingDecl);
        }
        if family == EncodingFamily::Utf16 || name == self.decoder.name() {
            // the byte order is already known from the BOM or the first bytes
            self.widths.clear();
            return Ok(());
        }
        if self.has_bom && self.decoder.name() == UTF8_NAME {
            // a UTF-8 BOM cannot be followed by a declaration of another encoding
            return Err(XMLError::ParserInvalidEncodingDecl);
        }
        let decoder = find_decoder(name).ok_or(XMLError::ParserUnsupportedEncoding)?;
        if sniffing {
            let leftover = self.decoded[self.decoded_next..].chars().count();
            let rewind: usize = self.widths[self.widths.len().saturating_sub(leftover)..]
                .iter()
                .sum();
            self.raw_next -= rewind.min(self.raw_next);
            self.decoded.truncate(self.decoded_next);
            self.pending_cr = false;
        }
        self.widths.clear();
        debug!(
            "switch encoding from {} to {} for {:?}",
            self.decoder.name(),
            decoder.name(),
            self.system_id
        );
        self.decoder = decoder;
        Ok(())
    }

    /// The unread part of the decoded text.
    pub fn content_str(&self) -> &str {
        &self.decoded[self.decoded_next..]
    }

    pub fn content_bytes(&self) -> &[u8] {
        self.content_str().as_bytes()
    }

    /// Consumes `len` bytes of decoded text, updating the position.
    ///
    /// `len` is clamped to the available text and must fall on a character boundary.
    pub fn advance(&mut self, len: usize) {
        let end = (self.decoded_next + len).min(self.decoded.len());
        for c in self.decoded[self.decoded_next..end].chars() {
            self.char_offset += 1;
            if c == '\n' {
                self.line += 1;
                self.column = 1;
            } else {
                self.column += 1;
            }
        }
        self.decoded_next = end;
    }

    pub fn peek_char(&mut self) -> Result<Option<char>, XMLError> {
        self.fill(4)?;
        Ok(self.content_str().chars().next())
    }

    pub fn next_char(&mut self) -> Result<Option<char>, XMLError> {
        let c = self.peek_char()?;
        if let Some(c) = c {
            self.advance(c.len_utf8());
        }
        Ok(c)
    }

    pub fn next_char_if(&mut self, f: impl Fn(char) -> bool) -> Result<Option<char>, XMLError> {
        match self.peek_char()? {
            Some(c) if f(c) => {
                self.advance(c.len_utf8());
                Ok(Some(c))
            }
            _ => Ok(None),
        }
    }

    pub fn is_exhausted(&mut self) -> Result<bool, XMLError> {
        Ok(self.fill(1)? == 0)
    }

    pub fn encoding(&self) -> &'static str {
        self.decoder.name()
    }

    pub fn line(&self) -> usize {
        self.line
    }

    pub fn column(&self) -> usize {
        self.column
    }

    pub fn char_offset(&self) -> usize {
        self.char_offset
    }

    pub fn system_id(&self) -> Option<&Arc<str>> {
        self.system_id.as_ref()
    }

    pub fn set_system_id(&mut self, system_id: impl Into<Arc<str>>) {
        self.system_id = Some(system_id.into());
    }

    pub fn public_id(&self) -> Option<&Arc<str>> {
        self.public_id.as_ref()
    }

    pub fn set_public_id(&mut self, public_id: impl Into<Arc<str>>) {
        self.public_id = Some(public_id.into());
    }

    pub fn base_uri(&self) -> Option<&Arc<Url>> {
        self.base_uri.as_ref()
    }

    pub fn set_base_uri(&mut self, base_uri: Arc<Url>) {
        self.base_uri = Some(base_uri);
    }

    pub fn entity_name(&self) -> Option<&Arc<str>> {
        self.entity_name.as_ref()
    }

    pub fn kind(&self) -> SourceKind {
        self.kind
    }

    pub(crate) fn set_entity(&mut self, name: Arc<str>, kind: SourceKind) {
        self.entity_name = Some(name);
        self.kind = kind;
    }

    pub(crate) fn set_kind(&mut self, kind: SourceKind) {
        self.kind = kind;
    }

    pub fn location(&self) -> Location {
        Location {
            system_id: self.system_id.clone(),
            public_id: self.public_id.clone(),
            entity: self.entity_name.clone(),
            line: self.line,
            column: self.column,
            char_offset: self.char_offset,
            source_depth: 0,
        }
    }
}

impl std::fmt::Debug for InputSource<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InputSource")
            .field("encoding", &self.decoder.name())
            .field("system_id", &self.system_id)
            .field("entity", &self.entity_name)
            .field("kind", &self.kind)
            .field("line", &self.line)
            .field("column", &self.column)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn drain(source: &mut InputSource) -> String {
        let mut out = String::new();
        while source.fill(1).unwrap() > 0 {
            let s = source.content_str().to_owned();
            source.advance(s.len());
            out.push_str(&s);
        }
        out
    }

    #[test]
    fn utf16_bom_detection() {
        let mut be = vec![0xFE, 0xFF];
        be.extend("<a>\u{3042}</a>".encode_utf16().flat_map(|u| u.to_be_bytes()));
        let mut source = InputSource::from_reader(be.as_slice(), None).unwrap();
        source.finish_declaration(None).unwrap();
        assert_eq!(drain(&mut source), "<a>\u{3042}</a>");

        let mut le = vec![0xFF, 0xFE];
        le.extend("<a/>".encode_utf16().flat_map(|u| u.to_le_bytes()));
        let mut source = InputSource::from_reader(le.as_slice(), None).unwrap();
        assert_eq!(source.encoding(), "UTF-16LE");
        source.finish_declaration(None).unwrap();
        assert_eq!(drain(&mut source), "<a/>");
    }

    #[test]
    fn declared_encoding_takes_over() {
        let bytes = b"<?xml version=\"1.0\" encoding=\"ISO-8859-1\"?><a>\xE9</a>";
        let mut source = InputSource::from_reader(&bytes[..], None).unwrap();
        // read the declaration with the provisional decoder
        let decl_len = bytes.iter().position(|&b| b == b'>').unwrap() + 1;
        source.fill(decl_len + 3).unwrap();
        source.advance(decl_len);
        source.finish_declaration(Some("ISO-8859-1")).unwrap();
        assert_eq!(drain(&mut source), "<a>\u{E9}</a>");
    }

    #[test]
    fn declaration_conflicting_with_bom() {
        let mut bytes = vec![0xFE, 0xFF];
        bytes.extend("<?xml version='1.0'?><a/>".encode_utf16().flat_map(|u| u.to_be_bytes()));
        let mut source = InputSource::from_reader(bytes.as_slice(), None).unwrap();
        assert!(matches!(
            source.finish_declaration(Some("ISO-8859-1")),
            Err(XMLError::ParserInvalidEncodingDecl)
        ));
    }

    #[test]
    fn newline_normalization_and_position() {
        let mut source = InputSource::from_reader(&b"a\r\nb\rc\n"[..], None).unwrap();
        source.finish_declaration(None).unwrap();
        assert_eq!(drain(&mut source), "a\nb\nc\n");
        assert_eq!(source.line(), 4);
        assert_eq!(source.column(), 1);
        assert_eq!(source.char_offset(), 6);

        let mut source = InputSource::from_entity_text("a\r\nb");
        assert_eq!(drain(&mut source), "a\r\nb");
    }

    #[test]
    fn small_reads_across_multibyte_chars() {
        struct OneByte<'a>(&'a [u8]);
        impl Read for OneByte<'_> {
            fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
                match self.0.split_first() {
                    Some((&b, rest)) if !buf.is_empty() => {
                        buf[0] = b;
                        self.0 = rest;
                        Ok(1)
                    }
                    _ => Ok(0),
                }
            }
        }
        let text = "<r>\u{3042}\u{1F600}\r\n</r>";
        let mut source = InputSource::from_reader(OneByte(text.as_bytes()), None).unwrap();
        source.finish_declaration(None).unwrap();
        assert_eq!(drain(&mut source), "<r>\u{3042}\u{1F600}\n</r>");
    }

    #[test]
    fn unsupported_ucs4() {
        assert!(matches!(
            InputSource::from_reader(&[0x00, 0x00, 0x00, 0x3C][..], None),
            Err(XMLError::ParserUnsupportedEncoding)
        ));
        assert!(matches!(
            InputSource::from_reader(&b"<a/>"[..], Some("KOI8-R")),
            Err(XMLError::ParserUnsupportedEncoding)
        ));
    }
}
