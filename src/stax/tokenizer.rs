use std::{borrow::Cow, sync::Arc};

use memchr::memmem;

use crate::{
    ENCODING_NAME_LIMIT_LENGTH, XML_VERSION_NUM_LIMIT_LENGTH, XMLVersion,
    config::ParserOption,
    error::{XMLError, XMLErrorLevel, XMLStreamError, fatal_error, ns_error, warning},
    source::SourceKind,
    stax::{
        XMLStreamReader,
        events::{Declaration, ProcessingInstruction},
    },
};

/// A system and/or public identifier.
#[derive(Debug, Clone, Default)]
pub(crate) struct ExternalIdentifier {
    pub(crate) public_id: Option<Arc<str>>,
    pub(crate) system_id: Option<Arc<str>>,
}

impl<'a> XMLStreamReader<'a> {
    /// Makes at least `min` bytes of the current source available, if it has them.
    pub(crate) fn fill(&mut self, min: usize) -> Result<usize, XMLStreamError> {
        match self.sources.current_mut().fill(min) {
            Ok(len) => Ok(len),
            Err(err) => Err(self.fail(err)),
        }
    }

    pub(crate) fn content(&self) -> &str {
        self.sources.current().content_str()
    }

    pub(crate) fn advance(&mut self, len: usize) {
        self.sources.current_mut().advance(len);
    }

    pub(crate) fn starts_with(&mut self, prefix: &str) -> Result<bool, XMLStreamError> {
        self.fill(prefix.len())?;
        Ok(self.content().starts_with(prefix))
    }

    /// Consumes `prefix` if the current source starts with it.
    pub(crate) fn consume(&mut self, prefix: &str) -> Result<bool, XMLStreamError> {
        if self.starts_with(prefix)? {
            self.advance(prefix.len());
            Ok(true)
        } else {
            Ok(false)
        }
    }

    pub(crate) fn peek_char(&mut self) -> Result<Option<char>, XMLStreamError> {
        self.fill(4)?;
        Ok(self.content().chars().next())
    }

    /// Whether the current source has no more characters.
    pub(crate) fn at_source_end(&mut self) -> Result<bool, XMLStreamError> {
        Ok(self.fill(1)? == 0)
    }

    /// ```text
    /// [3] S ::= (#x20 | #x9 | #xD | #xA)+
    /// ```
    /// Skips whitespace in the current source and returns the number of characters skipped.
    pub(crate) fn skip_whitespace(&mut self) -> Result<usize, XMLStreamError> {
        let mut skipped = 0;
        loop {
            let avail = self.fill(1)?;
            if avail == 0 {
                return Ok(skipped);
            }
            let len = self
                .content()
                .bytes()
                .take_while(|b| matches!(b, b' ' | b'\t' | b'\n' | b'\r'))
                .count();
            self.advance(len);
            skipped += len;
            if len < avail {
                return Ok(skipped);
            }
        }
    }

    /// Appends characters to `buf` while `f(index, char)` holds, and returns their count.
    pub(crate) fn take_chars(
        &mut self,
        buf: &mut String,
        mut f: impl FnMut(usize, char) -> bool,
    ) -> Result<usize, XMLStreamError> {
        let mut count = 0;
        loop {
            if self.fill(4)? == 0 {
                return Ok(count);
            }
            let content = self.sources.current().content_str();
            let mut len = 0;
            let mut stopped = false;
            for c in content.chars() {
                if !f(count, c) {
                    stopped = true;
                    break;
                }
                len += c.len_utf8();
                count += 1;
            }
            buf.push_str(&content[..len]);
            self.advance(len);
            if stopped {
                return Ok(count);
            }
        }
    }

    /// ```text
    /// [5] Name ::= NameStartChar (NameChar)*
    /// ```
    pub(crate) fn parse_name(&mut self, buf: &mut String) -> Result<(), XMLStreamError> {
        let version = self.version();
        let count = self.take_chars(buf, |i, c| {
            if i == 0 {
                version.is_name_start_char(c)
            } else {
                version.is_name_char(c)
            }
        })?;
        if count == 0 {
            let found = self.peek_char()?;
            return Err(match found {
                Some(c) => fatal_error!(self, ParserInvalidName, "'{}' cannot start a name", c),
                None => fatal_error!(self, ParserUnexpectedEOF, "a name is expected"),
            });
        }
        Ok(())
    }

    /// Parses a name and checks that it is a valid QName when namespaces are enabled.
    pub(crate) fn parse_qualified_name(&mut self, buf: &mut String) -> Result<(), XMLStreamError> {
        self.parse_name(buf)?;
        if self.is_enabled(ParserOption::Namespaces) && !self.version().validate_qname(buf) {
            ns_error!(self, NamespaceInvalidQName, "'{}' is not a qualified name", buf)?;
        }
        Ok(())
    }

    /// ```text
    /// [7] Nmtoken ::= (NameChar)+
    /// ```
    pub(crate) fn parse_nmtoken(&mut self, buf: &mut String) -> Result<(), XMLStreamError> {
        let version = self.version();
        if self.take_chars(buf, |_, c| version.is_name_char(c))? == 0 {
            return Err(fatal_error!(self, ParserInvalidNmtoken, "a name token is expected"));
        }
        Ok(())
    }

    /// Appends text up to `delim` to `buf` and consumes the delimiter.
    ///
    /// Returns `false` if the current source ends first. Every character is checked against
    /// the `Char` production.
    pub(crate) fn read_until(
        &mut self,
        delim: &str,
        buf: &mut String,
    ) -> Result<bool, XMLStreamError> {
        let finder = memmem::Finder::new(delim.as_bytes());
        loop {
            let avail = self.fill(delim.len())?;
            let content = self.sources.current().content_str();
            let (len, found) = match finder.find(content.as_bytes()) {
                Some(pos) => (pos, true),
                None if avail < delim.len() => (avail, false),
                None => {
                    // the delimiter may start within the last bytes
                    let mut len = avail + 1 - delim.len();
                    while !content.is_char_boundary(len) {
                        len -= 1;
                    }
                    (len, false)
                }
            };
            let segment = &content[..len];
            let version = self.version();
            if let Some(c) = segment.chars().find(|&c| !version.is_char(c)) {
                let code = c as u32;
                return Err(fatal_error!(
                    self,
                    ParserInvalidCharacter,
                    "the character U+{:04X} is not allowed",
                    code
                ));
            }
            buf.push_str(segment);
            if found {
                self.advance(len + delim.len());
                return Ok(true);
            }
            self.advance(len);
            if avail < delim.len() {
                return Ok(false);
            }
        }
    }

    /// ```text
    /// [66] CharRef ::= '&#' [0-9]+ ';' | '&#x' [0-9a-fA-F]+ ';'
    /// ```
    /// The current source is positioned at `&#`.
    pub(crate) fn parse_char_ref(&mut self) -> Result<char, XMLStreamError> {
        self.advance(2);
        let hex = self.consume("x")?;
        let radix = if hex { 16 } else { 10 };
        // `None` once the value no longer fits
        let mut code = Some(0u32);
        let mut digits = String::new();
        self.take_chars(&mut digits, |_, c| match c.to_digit(radix) {
            Some(digit) => {
                code = code.and_then(|code| code.checked_mul(radix)?.checked_add(digit));
                true
            }
            None => false,
        })?;
        if digits.is_empty() || !self.consume(";")? {
            return Err(fatal_error!(
                self,
                ParserInvalidCharacterReference,
                "a character reference must be '&#[0-9]+;' or '&#x[0-9a-fA-F]+;'"
            ));
        }
        let version = self.version();
        match code
            .and_then(char::from_u32)
            .filter(|&c| version.is_char(c))
        {
            Some(c) => Ok(c),
            None => Err(fatal_error!(
                self,
                ParserInvalidCharacterReference,
                "the character reference '{}' does not refer to a legal character",
                digits
            )),
        }
    }

    /// Reads an XML declaration (or a text declaration for external entities) if the current
    /// source starts with one, then switches the source to the declared encoding.
    ///
    /// ```text
    /// [23] XMLDecl  ::= '<?xml' VersionInfo EncodingDecl? SDDecl? S? '?>'
    /// [77] TextDecl ::= '<?xml' VersionInfo? EncodingDecl S? '?>'
    /// ```
    pub(crate) fn parse_declaration(
        &mut self,
        text_decl: bool,
    ) -> Result<Option<Declaration>, XMLStreamError> {
        self.fill(6)?;
        let head = self.content().as_bytes();
        let has_decl = head.starts_with(b"<?xml")
            && head
                .get(5)
                .is_some_and(|b| matches!(b, b' ' | b'\t' | b'\n' | b'\r'));
        if !has_decl {
            self.finish_declaration(None)?;
            return Ok(None);
        }
        let invalid = if text_decl {
            XMLError::ParserInvalidTextDecl
        } else {
            XMLError::ParserInvalidXMLDecl
        };
        self.advance(5);

        let mut decl = Declaration::default();
        let mut s = self.skip_whitespace()?;
        if self.starts_with("version")? {
            self.advance(7);
            let version = self.parse_declaration_value(XML_VERSION_NUM_LIMIT_LENGTH)?;
            if version.len() > XML_VERSION_NUM_LIMIT_LENGTH {
                return Err(fatal_error!(
                    self,
                    ParserTooLongXMLVersionNumber,
                    "the version number is too long"
                ));
            }
            decl.version = Some(self.check_version(&version)?);
            s = self.skip_whitespace()?;
        } else if !text_decl {
            return Err(fatal_error!(
                self,
                ParserInvalidXMLDecl,
                "the XML declaration must have a version"
            ));
        }

        if self.starts_with("encoding")? {
            if s == 0 {
                return Err(self.report_fatal(
                    invalid,
                    XMLErrorLevel::FatalError,
                    Cow::Borrowed("whitespace is required before 'encoding'"),
                ));
            }
            self.advance(8);
            let encoding = self.parse_declaration_value(ENCODING_NAME_LIMIT_LENGTH)?;
            if encoding.len() > ENCODING_NAME_LIMIT_LENGTH {
                return Err(fatal_error!(
                    self,
                    ParserTooLongEncodingName,
                    "the encoding name is too long"
                ));
            }
            // [81] EncName ::= [A-Za-z] ([A-Za-z0-9._] | '-')*
            let mut chars = encoding.chars();
            if !chars.next().is_some_and(|c| c.is_ascii_alphabetic())
                || !chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
            {
                return Err(fatal_error!(
                    self,
                    ParserInvalidEncodingDecl,
                    "'{}' is not a valid encoding name",
                    encoding
                ));
            }
            decl.encoding = Some(encoding.into());
            s = self.skip_whitespace()?;
        } else if text_decl {
            return Err(fatal_error!(
                self,
                ParserInvalidTextDecl,
                "a text declaration must have an encoding declaration"
            ));
        }

        if !text_decl && self.starts_with("standalone")? {
            if s == 0 {
                return Err(fatal_error!(
                    self,
                    ParserInvalidXMLDecl,
                    "whitespace is required before 'standalone'"
                ));
            }
            self.advance(10);
            let standalone = self.parse_declaration_value(3)?;
            decl.standalone = match standalone.as_str() {
                "yes" => Some(true),
                "no" => Some(false),
                _ => {
                    return Err(fatal_error!(
                        self,
                        ParserInvalidSDDecl,
                        "standalone must be 'yes' or 'no', but found '{}'",
                        standalone
                    ));
                }
            };
            self.skip_whitespace()?;
        }

        if !self.consume("?>")? {
            return Err(self.report_fatal(
                invalid,
                XMLErrorLevel::FatalError,
                Cow::Borrowed("the declaration is not closed with '?>'"),
            ));
        }
        self.finish_declaration(decl.encoding.as_deref())?;
        Ok(Some(decl))
    }

    fn finish_declaration(&mut self, encoding: Option<&str>) -> Result<(), XMLStreamError> {
        match self.sources.current_mut().finish_declaration(encoding) {
            Ok(()) => Ok(()),
            Err(err) => Err(self.fail(err)),
        }
    }

    /// ```text
    /// [26] VersionNum ::= '1.' [0-9]+
    /// ```
    fn check_version(&mut self, version: &str) -> Result<XMLVersion, XMLStreamError> {
        if version == "1.0" {
            return Ok(XMLVersion::XML10);
        }
        let minor = version.strip_prefix("1.").unwrap_or_default();
        if minor.is_empty() || !minor.bytes().all(|b| b.is_ascii_digit()) {
            return Err(fatal_error!(
                self,
                ParserUnsupportedXMLVersion,
                "'{}' is not a supported XML version",
                version
            ));
        }
        warning!(
            self,
            ParserUnsupportedXMLVersion,
            "XML version '{}' is processed as XML 1.0",
            version
        )?;
        Ok(XMLVersion::Unknown)
    }

    /// ```text
    /// [25] Eq ::= S? '=' S?
    /// ```
    /// followed by a quoted value of at most `limit` characters (one more is read to detect
    /// overlong values).
    fn parse_declaration_value(&mut self, limit: usize) -> Result<String, XMLStreamError> {
        self.skip_whitespace()?;
        if !self.consume("=")? {
            return Err(fatal_error!(
                self,
                ParserInvalidXMLDecl,
                "'=' is expected in the declaration"
            ));
        }
        self.skip_whitespace()?;
        let quote = match self.peek_char()? {
            Some(c @ ('"' | '\'')) => c,
            _ => {
                return Err(fatal_error!(
                    self,
                    ParserInvalidXMLDecl,
                    "a quoted value is expected in the declaration"
                ));
            }
        };
        self.advance(1);
        let mut value = String::new();
        self.take_chars(&mut value, |i, c| i <= limit && c != quote)?;
        if value.len() <= limit && !self.consume(if quote == '"' { "\"" } else { "'" })? {
            return Err(fatal_error!(
                self,
                ParserInvalidXMLDecl,
                "the value in the declaration is not closed"
            ));
        }
        Ok(value)
    }

    /// ```text
    /// [15] Comment ::= '<!--' ((Char - '-') | ('-' (Char - '-')))* '-->'
    /// ```
    /// The current source is positioned at `<!--`.
    pub(crate) fn parse_comment(&mut self) -> Result<String, XMLStreamError> {
        self.advance(4);
        let mut data = String::new();
        if !self.read_until("--", &mut data)? {
            return Err(fatal_error!(self, ParserUnexpectedEOF, "the comment is not closed"));
        }
        if !self.consume(">")? {
            return Err(fatal_error!(
                self,
                ParserInvalidComment,
                "'--' is not allowed in comments"
            ));
        }
        Ok(data)
    }

    /// ```text
    /// [16] PI       ::= '<?' PITarget (S (Char* - (Char* '?>' Char*)))? '?>'
    /// [17] PITarget ::= Name - (('X' | 'x') ('M' | 'm') ('L' | 'l'))
    /// ```
    /// The current source is positioned at `<?`.
    pub(crate) fn parse_pi(&mut self) -> Result<ProcessingInstruction, XMLStreamError> {
        self.advance(2);
        let mut target = String::new();
        self.parse_name(&mut target)?;
        if target.eq_ignore_ascii_case("xml") {
            return Err(fatal_error!(
                self,
                ParserUnacceptablePITarget,
                "the XML declaration is only allowed at the start of an entity"
            ));
        }
        if self.is_enabled(ParserOption::Namespaces) && target.contains(':') {
            ns_error!(
                self,
                NamespaceInvalidQName,
                "the processing instruction target '{}' contains ':'",
                target
            )?;
        }
        let target = self.symbols.intern(&target);
        if self.consume("?>")? {
            return Ok(ProcessingInstruction { target, data: None });
        }
        if self.skip_whitespace()? == 0 {
            return Err(fatal_error!(
                self,
                ParserInvalidProcessingInstruction,
                "whitespace is required after the processing instruction target"
            ));
        }
        let mut data = String::new();
        if !self.read_until("?>", &mut data)? {
            return Err(fatal_error!(
                self,
                ParserUnexpectedEOF,
                "the processing instruction is not closed"
            ));
        }
        Ok(ProcessingInstruction {
            target,
            data: Some(data),
        })
    }

    /// ```text
    /// [18] CDSect ::= CDStart CData CDEnd
    /// ```
    /// The current source is positioned at `<![CDATA[`.
    pub(crate) fn parse_cdata(&mut self, buf: &mut String) -> Result<(), XMLStreamError> {
        self.advance(9);
        if !self.read_until("]]>", buf)? {
            return Err(fatal_error!(self, ParserInvalidCDSect, "the CDATA section is not closed"));
        }
        Ok(())
    }

    /// ```text
    /// [75] ExternalID ::= 'SYSTEM' S SystemLiteral | 'PUBLIC' S PubidLiteral S SystemLiteral
    /// [83] PublicID   ::= 'PUBLIC' S PubidLiteral
    /// ```
    /// Returns `None` if no external identifier starts here. With `public_only`, a public
    /// identifier without a system literal is accepted (notation declarations).
    /// `in_dtd` allows parameter entity references between the parts.
    pub(crate) fn parse_external_id(
        &mut self,
        public_only: bool,
        in_dtd: bool,
    ) -> Result<Option<ExternalIdentifier>, XMLStreamError> {
        let mut id = ExternalIdentifier::default();
        if self.consume("SYSTEM")? {
            if self.skip_separator(in_dtd)? == 0 {
                return Err(fatal_error!(
                    self,
                    ParserInvalidExternalID,
                    "whitespace is required after 'SYSTEM'"
                ));
            }
            id.system_id = Some(self.parse_system_literal()?.into());
        } else if self.consume("PUBLIC")? {
            if self.skip_separator(in_dtd)? == 0 {
                return Err(fatal_error!(
                    self,
                    ParserInvalidExternalID,
                    "whitespace is required after 'PUBLIC'"
                ));
            }
            id.public_id = Some(self.parse_pubid_literal()?.into());
            let s = self.skip_separator(in_dtd)?;
            let next = self.peek_char()?;
            if matches!(next, Some('"' | '\'')) {
                if s == 0 {
                    return Err(fatal_error!(
                        self,
                        ParserInvalidExternalID,
                        "whitespace is required between the public and system identifiers"
                    ));
                }
                id.system_id = Some(self.parse_system_literal()?.into());
            } else if !public_only {
                return Err(fatal_error!(
                    self,
                    ParserInvalidExternalID,
                    "a system identifier is required after the public identifier"
                ));
            }
        } else {
            return Ok(None);
        }
        Ok(Some(id))
    }

    /// Skips whitespace, including parameter entity boundaries inside DTD declarations.
    pub(crate) fn skip_separator(&mut self, in_dtd: bool) -> Result<usize, XMLStreamError> {
        if in_dtd {
            self.skip_decl_spaces()
        } else {
            self.skip_whitespace()
        }
    }

    fn quote(&mut self) -> Result<Option<&'static str>, XMLStreamError> {
        Ok(match self.peek_char()? {
            Some('"') => Some("\""),
            Some('\'') => Some("'"),
            _ => None,
        })
    }

    /// ```text
    /// [11] SystemLiteral ::= ('"' [^"]* '"') | ("'" [^']* "'")
    /// ```
    pub(crate) fn parse_system_literal(&mut self) -> Result<String, XMLStreamError> {
        let Some(quote) = self.quote()? else {
            return Err(fatal_error!(
                self,
                ParserInvalidSystemLiteral,
                "a quoted system identifier is expected"
            ));
        };
        self.advance(1);
        let mut literal = String::new();
        if !self.read_until(quote, &mut literal)? {
            return Err(fatal_error!(
                self,
                ParserInvalidSystemLiteral,
                "the system identifier is not closed"
            ));
        }
        if literal.contains('#') {
            warning!(
                self,
                ParserInvalidSystemLiteral,
                "the system identifier '{}' contains a fragment",
                literal
            )?;
        }
        Ok(literal)
    }

    /// ```text
    /// [12] PubidLiteral ::= '"' PubidChar* '"' | "'" (PubidChar - "'")* "'"
    /// ```
    /// Whitespace in the result is collapsed.
    pub(crate) fn parse_pubid_literal(&mut self) -> Result<String, XMLStreamError> {
        let Some(quote) = self.quote()? else {
            return Err(fatal_error!(
                self,
                ParserInvalidPubidLiteral,
                "a quoted public identifier is expected"
            ));
        };
        self.advance(1);
        let mut literal = String::new();
        if !self.read_until(quote, &mut literal)? {
            return Err(fatal_error!(
                self,
                ParserInvalidPubidLiteral,
                "the public identifier is not closed"
            ));
        }
        let version = self.version();
        if let Some(c) = literal.chars().find(|&c| !version.is_pubid_char(c)) {
            return Err(fatal_error!(
                self,
                ParserInvalidPubidLiteral,
                "'{}' is not allowed in a public identifier",
                c
            ));
        }
        Ok(literal.split_ascii_whitespace().collect::<Vec<_>>().join(" "))
    }

    /// Whether the current source is the replacement text of a general entity.
    pub(crate) fn in_general_entity(&self) -> bool {
        self.sources.current().kind() == SourceKind::GeneralEntity
    }

    /// Accounts for characters produced by entity expansion.
    pub(crate) fn count_expanded_text(&mut self, chars: usize) -> Result<(), XMLStreamError> {
        match self.budget.add_text(chars, &self.limits) {
            Ok(()) => Ok(()),
            Err(XMLError::EntityTextTooLarge) => Err(fatal_error!(
                self,
                EntityTextTooLarge,
                "text produced by entity expansion exceeds {} characters",
                self.limits.max_text_length
            )),
            Err(err) => Err(self.fail(err)),
        }
    }
}
