use std::sync::Arc;

use memchr::memmem;

use crate::{
    XML_NS_NAMESPACE, XML_XML_NAMESPACE,
    config::ParserOption,
    error::{XMLError, XMLStreamError, fatal_error, ns_error, validity_error},
    source::SourceKind,
    stax::{
        OpenElement, ReaderState, XMLStreamReader,
        attributes::{Attribute, Attributes},
        events::{EndElement, Namespace, StartElement, XMLEvent},
        expand::Reference,
    },
};

fn split_qname(qname: &str) -> (Option<&str>, &str) {
    match qname.split_once(':') {
        Some((prefix, local_name)) => (Some(prefix), local_name),
        None => (None, qname),
    }
}

/// Collapses runs of spaces and trims, as done for non-CDATA attribute values.
pub(crate) fn collapse_spaces(value: &str) -> String {
    value
        .split(' ')
        .filter(|token| !token.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

impl<'a> XMLStreamReader<'a> {
    /// ```text
    /// [1] document ::= prolog element Misc*
    /// ```
    pub(crate) fn parse_document_start(&mut self) -> Result<XMLEvent, XMLStreamError> {
        self.event_location = self.sources.location();
        if let Some(declaration) = self.parse_declaration(false)? {
            self.declaration = declaration;
        }
        self.state = ReaderState::Prolog;
        Ok(XMLEvent::StartDocument(self.declaration.clone()))
    }

    /// ```text
    /// [22] prolog ::= XMLDecl? Misc* (doctypedecl Misc*)?
    /// ```
    pub(crate) fn next_in_prolog(&mut self) -> Result<XMLEvent, XMLStreamError> {
        self.skip_whitespace()?;
        self.event_location = self.sources.location();
        if self.at_source_end()? {
            return Err(fatal_error!(
                self,
                ParserUnexpectedEOF,
                "the document has no root element"
            ));
        }
        if self.starts_with("<?")? {
            return Ok(XMLEvent::ProcessingInstruction(self.parse_pi()?));
        }
        if self.starts_with("<!--")? {
            return Ok(XMLEvent::Comment(self.parse_comment()?));
        }
        if self.starts_with("<!DOCTYPE")? {
            if self.seen_doctype {
                return Err(fatal_error!(
                    self,
                    ParserMultipleDoctypeDecl,
                    "only one document type declaration is allowed"
                ));
            }
            self.seen_doctype = true;
            return Ok(XMLEvent::DocumentType(self.parse_doctype()?));
        }
        if self.starts_with("<")? && !self.starts_with("<!")? {
            self.state = ReaderState::Content;
            return self.parse_start_tag();
        }
        Err(fatal_error!(
            self,
            ParserUnexpectedDocumentContent,
            "only comments, processing instructions and the document type declaration may precede the root element"
        ))
    }

    /// ```text
    /// [27] Misc ::= Comment | PI | S
    /// ```
    pub(crate) fn next_in_epilog(&mut self) -> Result<XMLEvent, XMLStreamError> {
        self.skip_whitespace()?;
        self.event_location = self.sources.location();
        if self.at_source_end()? {
            self.state = ReaderState::Finished;
            return Ok(XMLEvent::EndDocument);
        }
        if self.starts_with("<?")? {
            return Ok(XMLEvent::ProcessingInstruction(self.parse_pi()?));
        }
        if self.starts_with("<!--")? {
            return Ok(XMLEvent::Comment(self.parse_comment()?));
        }
        Err(fatal_error!(
            self,
            ParserUnexpectedDocumentContent,
            "only comments and processing instructions may follow the root element"
        ))
    }

    /// ```text
    /// [43] content ::= CharData? ((element | Reference | CDSect | PI | Comment) CharData?)*
    /// ```
    pub(crate) fn next_in_content(&mut self) -> Result<XMLEvent, XMLStreamError> {
        while self.at_source_end()? {
            if self.sources.current().kind() != SourceKind::GeneralEntity {
                let name = self
                    .elements
                    .last()
                    .map(|open| open.qname.to_string())
                    .unwrap_or_default();
                return Err(fatal_error!(
                    self,
                    ParserUnexpectedEOF,
                    "the element '{}' is not closed",
                    name
                ));
            }
            self.pop_entity()?;
        }

        self.event_location = self.sources.location();
        if self.starts_with("</")? {
            return self.parse_end_tag();
        }
        if self.starts_with("<!--")? {
            let comment = self.parse_comment()?;
            self.check_misc_in_content()?;
            return Ok(XMLEvent::Comment(comment));
        }
        if self.starts_with("<?")? {
            let pi = self.parse_pi()?;
            self.check_misc_in_content()?;
            return Ok(XMLEvent::ProcessingInstruction(pi));
        }
        if self.starts_with("<![CDATA[")? {
            if self.is_enabled(ParserOption::Coalescing) {
                return self.parse_text();
            }
            let mut data = String::new();
            self.parse_cdata(&mut data)?;
            if self.in_general_entity() {
                self.count_expanded_text(data.chars().count())?;
            }
            self.check_pcdata_in_content(false)?;
            return Ok(XMLEvent::CData(data));
        }
        if self.starts_with("<!")? {
            return Err(fatal_error!(
                self,
                ParserUnexpectedDocumentContent,
                "markup declarations are not allowed in content"
            ));
        }
        if self.starts_with("<")? {
            return self.parse_start_tag();
        }
        self.parse_text()
    }

    /// Reads a text run.
    ///
    /// Without coalescing, a run ends at markup, at the start of an expanded entity and at
    /// the end of an entity. With coalescing, text continues across CDATA sections and
    /// entity boundaries, and comments or processing instructions found between text
    /// pieces are queued to follow the text.
    fn parse_text(&mut self) -> Result<XMLEvent, XMLStreamError> {
        let coalescing = self.is_enabled(ParserOption::Coalescing);
        let mut text = String::new();
        let mut had_cdata = false;
        loop {
            if self.at_source_end()? {
                if self.sources.current().kind() != SourceKind::GeneralEntity
                    || (!coalescing && !text.is_empty())
                {
                    break;
                }
                self.pop_entity()?;
                continue;
            }
            if self.starts_with("<")? {
                if !coalescing {
                    break;
                }
                if self.starts_with("<![CDATA[")? {
                    let start = text.len();
                    self.parse_cdata(&mut text)?;
                    if self.in_general_entity() {
                        self.count_expanded_text(text[start..].chars().count())?;
                    }
                    had_cdata = true;
                    continue;
                }
                if text.is_empty() {
                    break;
                }
                let location = self.sources.location();
                if self.starts_with("<!--")? {
                    let comment = self.parse_comment()?;
                    self.check_misc_in_content()?;
                    self.pending.push_back((XMLEvent::Comment(comment), location));
                    continue;
                }
                if self.starts_with("<?")? {
                    let pi = self.parse_pi()?;
                    self.check_misc_in_content()?;
                    self.pending
                        .push_back((XMLEvent::ProcessingInstruction(pi), location));
                    continue;
                }
                break;
            }
            if self.starts_with("&")? {
                let location = self.sources.location();
                match self.parse_reference()? {
                    Reference::Char(c) => text.push(c),
                    Reference::Pushed => {
                        if !coalescing && !text.is_empty() {
                            break;
                        }
                    }
                    Reference::Unexpanded(event) => {
                        self.check_misc_in_content()?;
                        if text.is_empty() && self.pending.is_empty() {
                            self.event_location = location;
                            return Ok(event);
                        }
                        self.pending.push_back((event, location));
                        break;
                    }
                }
                continue;
            }
            self.read_char_data(&mut text)?;
        }

        if text.is_empty() {
            if let Some((event, location)) = self.pending.pop_front() {
                self.event_location = location;
                return Ok(event);
            }
            return self.next_in_content();
        }
        let whitespace = !had_cdata
            && text
                .bytes()
                .all(|b| matches!(b, b' ' | b'\t' | b'\n' | b'\r'));
        self.check_pcdata_in_content(whitespace)?;
        if whitespace && self.elements.last().is_some_and(|open| open.element_only) {
            Ok(XMLEvent::Space(text))
        } else {
            Ok(XMLEvent::Characters(text))
        }
    }

    /// ```text
    /// [14] CharData ::= [^<&]* - ([^<&]* ']]>' [^<&]*)
    /// ```
    /// Appends character data from the current source up to markup, a reference or the end
    /// of the source.
    fn read_char_data(&mut self, text: &mut String) -> Result<(), XMLStreamError> {
        let version = self.version();
        let in_entity = self.in_general_entity();
        loop {
            let avail = self.fill(3)?;
            if avail == 0 {
                return Ok(());
            }
            let (mut len, found) = {
                let bytes = self.content().as_bytes();
                match memchr::memchr2(b'<', b'&', bytes) {
                    Some(pos) => (pos, true),
                    None => {
                        // "]]>" may continue in the next chunk
                        let mut len = bytes.len();
                        while len > 0 && bytes[len - 1] == b']' {
                            len -= 1;
                        }
                        (len, false)
                    }
                }
            };
            if !found && len == 0 {
                if self.fill(avail + 3)? > avail {
                    continue;
                }
                len = avail;
            }
            let segment = &self.content()[..len];
            if memmem::find(segment.as_bytes(), b"]]>").is_some() {
                return Err(fatal_error!(
                    self,
                    ParserUnacceptablePatternInCharData,
                    "']]>' is not allowed in character data"
                ));
            }
            if let Some(c) = segment.chars().find(|&c| !version.is_char(c)) {
                let code = c as u32;
                return Err(fatal_error!(
                    self,
                    ParserInvalidCharacter,
                    "the character U+{:04X} is not allowed",
                    code
                ));
            }
            text.push_str(segment);
            let chars = if in_entity { segment.chars().count() } else { 0 };
            self.advance(len);
            if chars > 0 {
                self.count_expanded_text(chars)?;
            }
            if found {
                return Ok(());
            }
        }
    }

    /// ```text
    /// [40] STag         ::= '<' Name (S Attribute)* S? '>'
    /// [44] EmptyElemTag ::= '<' Name (S Attribute)* S? '/>'
    /// [41] Attribute    ::= Name Eq AttValue
    /// ```
    fn parse_start_tag(&mut self) -> Result<XMLEvent, XMLStreamError> {
        if self.elements.len() >= self.limits.max_element_depth {
            return Err(fatal_error!(
                self,
                ParserElementDepthExceeded,
                "elements are nested deeper than {}",
                self.limits.max_element_depth
            ));
        }
        self.advance(1);
        let mut name = String::new();
        self.parse_qualified_name(&mut name)?;
        let qname = self.symbols.intern(&name);

        let dtd = self.dtd.clone();
        let decl = dtd.as_deref().and_then(|dtd| dtd.element(&qname));
        let mut attributes: Vec<Attribute> = vec![];
        let empty = loop {
            let s = self.skip_whitespace()?;
            match self.peek_char()? {
                Some('>') => {
                    self.advance(1);
                    break false;
                }
                Some('/') => {
                    if !self.consume("/>")? {
                        return Err(fatal_error!(
                            self,
                            ParserInvalidStartOrEmptyTag,
                            "'/' in the tag of '{}' must be followed by '>'",
                            qname
                        ));
                    }
                    break true;
                }
                Some(_) => {}
                None => {
                    return Err(fatal_error!(
                        self,
                        ParserUnexpectedEOF,
                        "the start tag of '{}' is not closed",
                        qname
                    ));
                }
            }
            if s == 0 {
                return Err(fatal_error!(
                    self,
                    ParserInvalidStartOrEmptyTag,
                    "whitespace is required before an attribute of '{}'",
                    qname
                ));
            }
            if attributes.len() >= self.limits.max_attribute_count {
                return Err(fatal_error!(
                    self,
                    ParserTooManyAttributes,
                    "the element '{}' has more than {} attributes",
                    qname,
                    self.limits.max_attribute_count
                ));
            }

            let mut att_name = String::new();
            self.parse_qualified_name(&mut att_name)?;
            self.skip_whitespace()?;
            if !self.consume("=")? {
                return Err(fatal_error!(
                    self,
                    ParserInvalidAttValue,
                    "'=' is expected after the attribute name '{}'",
                    att_name
                ));
            }
            self.skip_whitespace()?;
            let mut value = String::new();
            self.parse_att_value(&mut value)?;
            if attributes.iter().any(|att| *att.qname == *att_name) {
                return Err(fatal_error!(
                    self,
                    ParserDuplicateAttributes,
                    "the attribute '{}' is specified twice",
                    att_name
                ));
            }
            if let Some(att_decl) = decl.and_then(|decl| decl.attribute(&att_name))
                && att_decl.att_type.is_tokenized()
            {
                value = collapse_spaces(&value);
            }
            attributes.push(Attribute::specified(self.symbols.intern(&att_name), value));
        };

        if self.is_validating() {
            if self.elements.is_empty() {
                self.check_root_element(&qname)?;
            } else {
                self.check_child_element(&qname)?;
            }
        }
        if self.is_enabled(ParserOption::SupportDTD) && self.dtd.is_some() {
            self.apply_attribute_declarations(&qname, decl, &mut attributes)?;
        }

        self.namespaces.push_scope();
        let (local_name, namespace_name, attributes, declared) =
            if self.is_enabled(ParserOption::Namespaces) {
                self.resolve_namespaces(&qname, attributes)?
            } else {
                let mut list = Attributes::new();
                for attribute in attributes {
                    if let Err((attribute, _)) = list.push(attribute) {
                        return Err(fatal_error!(
                            self,
                            ParserDuplicateAttributes,
                            "the attribute '{}' is specified twice",
                            attribute.qname
                        ));
                    }
                }
                (None, None, list, vec![])
            };

        let content = decl.and_then(|decl| decl.content());
        let validator = if self.is_validating() {
            content.map(|content| content.new_validator())
        } else {
            None
        };
        let source_depth = self.sources.len();
        self.elements.push(OpenElement {
            qname: qname.clone(),
            local_name: local_name.clone(),
            namespace_name: namespace_name.clone(),
            validator,
            element_only: content.is_some_and(|content| content.is_element_only()),
            source_depth,
        });
        self.pending_end = empty;
        Ok(XMLEvent::StartElement(StartElement {
            qname,
            local_name,
            namespace_name,
            attributes,
            namespaces: declared,
            empty,
        }))
    }

    /// Splits namespace declarations off `attributes` and resolves prefixes.
    #[allow(clippy::type_complexity)]
    fn resolve_namespaces(
        &mut self,
        qname: &Arc<str>,
        attributes: Vec<Attribute>,
    ) -> Result<
        (
            Option<Arc<str>>,
            Option<Arc<str>>,
            Attributes,
            Vec<Namespace>,
        ),
        XMLStreamError,
    > {
        let mut declared = vec![];
        let mut plain = Vec::with_capacity(attributes.len());
        for attribute in attributes {
            let prefix = if attribute.qname.as_ref() == "xmlns" {
                None
            } else if let Some(prefix) = attribute.qname.strip_prefix("xmlns:") {
                Some(self.symbols.intern(prefix))
            } else {
                plain.push(attribute);
                continue;
            };
            self.check_namespace_declaration(prefix.as_deref(), &attribute.value)?;
            let uri: Arc<str> = self.symbols.intern(&attribute.value);
            self.namespaces.declare(prefix.clone(), uri.clone());
            declared.push(Namespace { prefix, uri });
        }

        let (prefix, local_name) = split_qname(qname);
        let namespace_name = self.namespaces.resolve_shared(prefix);
        if let Some(prefix) = prefix
            && namespace_name.is_none()
        {
            ns_error!(
                self,
                NamespaceUndeclaredPrefix,
                "the prefix '{}' of the element '{}' is not declared",
                prefix,
                qname
            )?;
        }
        let local_name = self.symbols.intern(local_name);

        let mut list = Attributes::new();
        for mut attribute in plain {
            let qname = attribute.qname.clone();
            let (prefix, local) = split_qname(&qname);
            attribute.local_name = Some(self.symbols.intern(local));
            if let Some(prefix) = prefix {
                attribute.uri = self.namespaces.resolve_shared(Some(prefix));
                if attribute.uri.is_none() {
                    ns_error!(
                        self,
                        NamespaceUndeclaredPrefix,
                        "the prefix '{}' of the attribute '{}' is not declared",
                        prefix,
                        qname
                    )?;
                }
            }
            if let Err((attribute, _)) = list.push(attribute) {
                return Err(fatal_error!(
                    self,
                    ParserDuplicateAttributes,
                    "the attribute '{}' has the same expanded name as another attribute",
                    attribute.qname
                ));
            }
        }
        Ok((Some(local_name), namespace_name, list, declared))
    }

    fn check_namespace_declaration(
        &mut self,
        prefix: Option<&str>,
        uri: &str,
    ) -> Result<(), XMLStreamError> {
        match prefix {
            None if uri == XML_XML_NAMESPACE || uri == XML_NS_NAMESPACE => ns_error!(
                self,
                NamespaceInvalidDeclaration,
                "'{}' cannot be the default namespace",
                uri
            ),
            None => Ok(()),
            Some("xmlns") => ns_error!(
                self,
                NamespaceInvalidDeclaration,
                "the prefix 'xmlns' cannot be declared"
            ),
            Some("xml") if uri != XML_XML_NAMESPACE => ns_error!(
                self,
                NamespaceInvalidDeclaration,
                "the prefix 'xml' cannot be bound to '{}'",
                uri
            ),
            Some(prefix) if prefix != "xml" && uri == XML_XML_NAMESPACE => ns_error!(
                self,
                NamespaceInvalidDeclaration,
                "'{}' can only be bound to the prefix 'xml', not '{}'",
                uri,
                prefix
            ),
            Some(_) if uri == XML_NS_NAMESPACE => ns_error!(
                self,
                NamespaceInvalidDeclaration,
                "'{}' cannot be declared",
                uri
            ),
            Some(prefix) if uri.is_empty() => ns_error!(
                self,
                NamespaceInvalidDeclaration,
                "the prefix '{}' cannot be undeclared",
                prefix
            ),
            Some(_) => Ok(()),
        }
    }

    /// ```text
    /// [42] ETag ::= '</' Name S? '>'
    /// ```
    fn parse_end_tag(&mut self) -> Result<XMLEvent, XMLStreamError> {
        self.advance(2);
        let mut name = String::new();
        self.parse_name(&mut name)?;
        self.skip_whitespace()?;
        if !self.consume(">")? {
            return Err(fatal_error!(
                self,
                ParserInvalidEndTag,
                "the end tag of '{}' is not closed with '>'",
                name
            ));
        }
        let Some(open) = self.elements.last() else {
            return Err(self.fail(XMLError::InternalError));
        };
        if *open.qname != *name {
            let expected = open.qname.clone();
            return Err(fatal_error!(
                self,
                ParserMismatchElementType,
                "the end tag '{}' does not match the start tag '{}'",
                name,
                expected
            ));
        }
        if open.source_depth != self.sources.len() {
            return Err(fatal_error!(
                self,
                ParserEntityIncorrectNesting,
                "the element '{}' starts and ends in different entities",
                name
            ));
        }
        self.close_element(false)
    }

    /// Pops the innermost element and reports its end.
    pub(crate) fn close_element(&mut self, empty: bool) -> Result<XMLEvent, XMLStreamError> {
        let Some(open) = self.elements.pop() else {
            return Err(self.fail(XMLError::InternalError));
        };
        if let Some(validator) = &open.validator
            && validator.finish().is_err()
        {
            let expected = validator.expected().join(" | ");
            validity_error!(
                self,
                ValidContentModelViolation,
                "the content of '{}' ends too early, expecting {}",
                open.qname,
                expected
            )?;
        }
        let namespaces = self.namespaces.pop_scope();
        if self.elements.is_empty() {
            self.state = ReaderState::Epilog;
            if self.is_validating() {
                self.check_id_references()?;
            }
        }
        Ok(XMLEvent::EndElement(EndElement {
            qname: open.qname,
            local_name: open.local_name,
            namespace_name: open.namespace_name,
            namespaces,
            empty,
        }))
    }

    fn check_root_element(&mut self, name: &str) -> Result<(), XMLStreamError> {
        match self.doctype_name.clone() {
            None => validity_error!(
                self,
                ValidMissingDoctype,
                "the document has no document type declaration to validate against"
            ),
            Some(doctype) if *doctype != *name => validity_error!(
                self,
                ValidUnexpectedRootElement,
                "the root element '{}' does not match the document type name '{}'",
                name,
                doctype
            ),
            Some(_) => Ok(()),
        }
    }

    fn check_child_element(&mut self, name: &str) -> Result<(), XMLStreamError> {
        let Some(open) = self.elements.last_mut() else {
            return Ok(());
        };
        let Some(validator) = open.validator.as_mut() else {
            return Ok(());
        };
        if validator.push_name(name).is_ok() {
            return Ok(());
        }
        let parent = open.qname.clone();
        let expected = validator.expected().join(" | ");
        if expected.is_empty() {
            validity_error!(
                self,
                ValidContentModelViolation,
                "the element '{}' is not allowed in '{}'",
                name,
                parent
            )
        } else {
            validity_error!(
                self,
                ValidContentModelViolation,
                "the element '{}' is not allowed in '{}' here, expecting {}",
                name,
                parent,
                expected
            )
        }
    }

    fn check_pcdata_in_content(&mut self, whitespace: bool) -> Result<(), XMLStreamError> {
        let Some(open) = self.elements.last_mut() else {
            return Ok(());
        };
        let Some(validator) = open.validator.as_mut() else {
            return Ok(());
        };
        if validator.push_pcdata(whitespace).is_ok() {
            return Ok(());
        }
        let name = open.qname.clone();
        validity_error!(
            self,
            ValidContentModelViolation,
            "character data is not allowed in '{}'",
            name
        )
    }

    fn check_misc_in_content(&mut self) -> Result<(), XMLStreamError> {
        let Some(open) = self.elements.last_mut() else {
            return Ok(());
        };
        let Some(validator) = open.validator.as_mut() else {
            return Ok(());
        };
        if validator.push_misc().is_ok() {
            return Ok(());
        }
        let name = open.qname.clone();
        validity_error!(
            self,
            ValidContentModelViolation,
            "the element '{}' is declared EMPTY but has content",
            name
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collapse_non_cdata_values() {
        assert_eq!(collapse_spaces("  a   b c "), "a b c");
        assert_eq!(collapse_spaces("   "), "");
        assert_eq!(split_qname("p:local"), (Some("p"), "local"));
        assert_eq!(split_qname("local"), (None, "local"));
    }
}
