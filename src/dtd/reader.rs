//! Reading internal and external DTD subsets.

use std::{collections::HashSet, io::Read, sync::Arc};

use log::debug;

use crate::{
    config::ParserOption,
    dtd::{
        ATTRIBUTE_TYPE_KEYWORDS, AttributeDecl, AttributeType, ContentParticle, ContentSpec,
        DefaultDecl, DtdId, DtdSubset, ElementContent, ElementDecl, NotationDecl, Occurrence,
    },
    entity::{EntityDecl, ExternalId},
    error::{XMLError, XMLStreamError, fatal_error, ns_error, validity_error, warning},
    resolver::resolve_system_id,
    source::{InputSource, SourceKind},
    stax::{ExternalIdentifier, ReaderState, XMLStreamReader, collapse_spaces, events::DocumentType},
};

/// Declarations collected while a DTD is read.
///
/// The internal subset is read first, so its declarations take precedence over those of
/// the external subset when the two are merged.
#[derive(Debug, Default)]
pub(crate) struct DtdBuilder {
    internal: DtdSubset,
    external: Option<DtdSubset>,
    /// The external subset taken from a [`DtdCache`](crate::dtd::DtdCache)
    shared_external: Option<Arc<DtdSubset>>,
    reading_external: bool,
    /// A parameter entity was not read, so later entity and attribute-list declarations
    /// are not recorded.
    skipped: bool,
    /// Source depths at which the open INCLUDE sections started
    includes: Vec<usize>,
}

impl DtdBuilder {
    fn target(&mut self) -> &mut DtdSubset {
        if self.reading_external {
            self.external.get_or_insert_default()
        } else {
            &mut self.internal
        }
    }

    /// The subset being read, if it has any declarations yet.
    ///
    /// Declarations are recorded unless this subset already has them. The external subset
    /// may end up in a shared cache, so what the internal subset declares must not change
    /// what it records.
    fn current(&self) -> Option<&DtdSubset> {
        if self.reading_external {
            self.external.as_ref()
        } else {
            Some(&self.internal)
        }
    }

    fn subsets(&self) -> impl Iterator<Item = &DtdSubset> {
        std::iter::once(&self.internal)
            .chain(self.external.as_ref())
            .chain(self.shared_external.as_deref())
    }

    pub(crate) fn general_entity(&self, name: &str) -> Option<&Arc<EntityDecl>> {
        self.subsets().find_map(|dtd| dtd.general_entity(name))
    }

    fn parameter_entity(&self, name: &str) -> Option<&Arc<EntityDecl>> {
        self.subsets().find_map(|dtd| dtd.parameter_entity(name))
    }

    fn element<'b>(&'b self, name: &'b str) -> impl Iterator<Item = &'b ElementDecl> {
        self.subsets().filter_map(move |dtd| dtd.element(name))
    }

    fn finish(self) -> DtdSubset {
        let mut dtd = self.internal;
        if let Some(external) = self.external.as_ref().or(self.shared_external.as_deref()) {
            dtd.merge(external);
        }
        dtd.finalize();
        dtd
    }
}

impl<'a> XMLStreamReader<'a> {
    /// Reads a standalone DTD, such as an external subset, and returns its declarations.
    ///
    /// Parameter entity references are expanded and conditional sections resolved. The
    /// reader is finished afterwards.
    pub fn read_dtd(
        &mut self,
        reader: impl Read + 'a,
        encoding: Option<&str>,
        uri: Option<&str>,
    ) -> Result<DtdSubset, XMLStreamError> {
        let mut source =
            InputSource::with_chunk_size(reader, encoding, self.limits.input_buffer_size)?;
        self.set_document_uri(&mut source, uri)?;
        source.set_kind(SourceKind::ExternalSubset);
        self.start(source);
        self.dtd_builder = Some(DtdBuilder {
            reading_external: true,
            ..Default::default()
        });
        self.parse_declaration(true)?;
        self.parse_markup_decls(false)?;
        let dtd = self.dtd_builder.take().unwrap_or_default().finish();
        self.state = ReaderState::Finished;
        Ok(dtd)
    }

    /// ```text
    /// [28] doctypedecl ::= '<!DOCTYPE' S Name (S ExternalID)? S? ('[' intSubset ']' S?)? '>'
    /// ```
    /// The current source is positioned at `<!DOCTYPE`.
    pub(crate) fn parse_doctype(&mut self) -> Result<DocumentType, XMLStreamError> {
        self.advance(9);
        if self.skip_whitespace()? == 0 {
            return Err(fatal_error!(
                self,
                ParserInvalidDoctypeDecl,
                "whitespace is required after '<!DOCTYPE'"
            ));
        }
        let mut name = String::new();
        self.parse_qualified_name(&mut name)?;
        let name = self.symbols.intern(&name);

        let s = self.skip_whitespace()?;
        let external_id = match self.peek_char()? {
            None => {
                return Err(fatal_error!(
                    self,
                    ParserUnexpectedEOF,
                    "the document type declaration is not closed"
                ));
            }
            Some('[' | '>') => ExternalIdentifier::default(),
            Some(_) if s == 0 => {
                return Err(fatal_error!(
                    self,
                    ParserInvalidDoctypeDecl,
                    "whitespace is required after the document type name"
                ));
            }
            Some(_) => {
                let Some(id) = self.parse_external_id(false, false)? else {
                    return Err(fatal_error!(
                        self,
                        ParserInvalidDoctypeDecl,
                        "an external identifier, '[' or '>' is expected after '{}'",
                        name
                    ));
                };
                self.skip_whitespace()?;
                id
            }
        };
        self.doctype_name = Some(name.clone());

        let support_dtd = self.is_enabled(ParserOption::SupportDTD);
        if support_dtd {
            self.dtd_builder = Some(DtdBuilder::default());
        }
        if self.consume("[")? {
            if support_dtd {
                self.parse_markup_decls(true)?;
            } else {
                self.skip_internal_subset()?;
            }
            if !self.consume("]")? {
                return Err(fatal_error!(
                    self,
                    ParserInvalidDoctypeDecl,
                    "the internal subset is not closed with ']'"
                ));
            }
            self.skip_whitespace()?;
        }
        if !self.consume(">")? {
            return Err(fatal_error!(
                self,
                ParserInvalidDoctypeDecl,
                "the document type declaration is not closed with '>'"
            ));
        }

        let ExternalIdentifier {
            public_id,
            system_id,
        } = external_id;
        if !support_dtd {
            self.dtd_incomplete = true;
            return Ok(DocumentType {
                name,
                public_id,
                system_id,
                dtd: None,
            });
        }
        if let Some(system_id) = &system_id {
            self.read_external_subset(public_id.clone(), system_id.clone())?;
        }
        let dtd = Arc::new(self.dtd_builder.take().unwrap_or_default().finish());
        debug!(
            "document type '{name}' read (complete: {})",
            !self.dtd_incomplete
        );
        self.dtd = Some(dtd.clone());
        if self.is_validating() && !self.dtd_incomplete {
            self.check_unparsed_entity_notations(&dtd)?;
        }
        Ok(DocumentType {
            name,
            public_id,
            system_id,
            dtd: Some(dtd),
        })
    }

    /// Reads the external subset, or takes it from the DTD cache.
    ///
    /// A subset is neither looked up nor cached when the internal subset declares parameter
    /// entities, since those may change how the external subset reads.
    fn read_external_subset(
        &mut self,
        public_id: Option<Arc<str>>,
        system_id: Arc<str>,
    ) -> Result<(), XMLStreamError> {
        if !self.is_enabled(ParserOption::ExternalParameterEntities) {
            debug!("external subset {system_id} not read");
            self.dtd_incomplete = true;
            return Ok(());
        }
        let base_uri = self.sources.base_uri();
        let resolved = resolve_system_id(base_uri.as_deref(), &system_id)
            .map(|url| Arc::<str>::from(url.as_str()))
            .unwrap_or_else(|_| system_id.clone());
        let id = DtdId::new(
            public_id.clone(),
            Some(resolved),
            self.is_enabled(ParserOption::Namespaces),
        );
        let cache = self.dtd_cache.clone().filter(|_| {
            self.dtd_builder
                .as_ref()
                .is_none_or(|builder| builder.internal.parameter_entities().is_empty())
        });
        if let Some(dtd) = cache.as_ref().and_then(|cache| cache.get(&id)) {
            self.dtd_builder.get_or_insert_default().shared_external = Some(dtd);
            return Ok(());
        }

        let external_id = ExternalId {
            public_id,
            system_id,
        };
        let mut source = self.open_external_entity("[dtd]", &external_id, None)?;
        source.set_kind(SourceKind::ExternalSubset);
        self.sources.push(source);
        self.dtd_builder.get_or_insert_default().reading_external = true;
        self.parse_declaration(true)?;
        self.parse_markup_decls(false)?;
        if let Err(err) = self.sources.pop() {
            return Err(self.fail(err));
        }

        let builder = self.dtd_builder.get_or_insert_default();
        builder.reading_external = false;
        if let Some(cache) = cache
            && !builder.skipped
        {
            let mut external = builder.external.take().unwrap_or_default();
            external.finalize();
            builder.shared_external = Some(cache.insert(id, Arc::new(external)));
        }
        Ok(())
    }

    fn check_unparsed_entity_notations(&mut self, dtd: &DtdSubset) -> Result<(), XMLStreamError> {
        for entity in dtd.general_entities().iter() {
            if let Some(notation) = entity.notation()
                && dtd.notation(notation).is_none()
            {
                validity_error!(
                    self,
                    ValidUndeclaredNotation,
                    "the notation '{}' of the unparsed entity '{}' is not declared",
                    notation,
                    entity.name()
                )?;
            }
        }
        Ok(())
    }

    /// Skips the internal subset without interpreting it. Stops at the closing `]`.
    fn skip_internal_subset(&mut self) -> Result<(), XMLStreamError> {
        let version = self.version();
        let mut skipped = String::new();
        loop {
            skipped.clear();
            self.take_chars(&mut skipped, |_, c| {
                !matches!(c, '"' | '\'' | '<' | ']') && version.is_char(c)
            })?;
            match self.peek_char()? {
                Some(']') => return Ok(()),
                Some(quote @ ('"' | '\'')) => {
                    self.advance(1);
                    let delim = if quote == '"' { "\"" } else { "'" };
                    if !self.read_until(delim, &mut skipped)? {
                        return Err(fatal_error!(
                            self,
                            ParserUnexpectedEOF,
                            "a quoted literal in the internal subset is not closed"
                        ));
                    }
                }
                Some('<') if self.starts_with("<!--")? => {
                    self.parse_comment()?;
                }
                Some('<') if self.starts_with("<?")? => {
                    self.parse_pi()?;
                }
                Some('<') => self.advance(1),
                Some(c) => {
                    let code = c as u32;
                    return Err(fatal_error!(
                        self,
                        ParserInvalidCharacter,
                        "the character U+{:04X} is not allowed",
                        code
                    ));
                }
                None => {
                    return Err(fatal_error!(
                        self,
                        ParserUnexpectedEOF,
                        "the internal subset is not closed"
                    ));
                }
            }
        }
    }

    /// ```text
    /// [28b] intSubset     ::= (markupdecl | DeclSep)*
    /// [29]  markupdecl    ::= elementdecl | AttlistDecl | EntityDecl | NotationDecl | PI | Comment
    /// [31]  extSubsetDecl ::= ( markupdecl | conditionalSect | DeclSep)*
    /// ```
    /// Stops at the `]` closing the internal subset, or at the end of the external subset.
    fn parse_markup_decls(&mut self, internal_subset: bool) -> Result<(), XMLStreamError> {
        let base_len = self.sources.len();
        loop {
            self.skip_whitespace()?;
            if self.at_source_end()? {
                if self.sources.len() > base_len {
                    self.pop_parameter_entity()?;
                    continue;
                }
                if internal_subset {
                    return Err(fatal_error!(
                        self,
                        ParserUnexpectedEOF,
                        "the internal subset is not closed"
                    ));
                }
                if self.in_include_section() {
                    return Err(fatal_error!(
                        self,
                        ParserInvalidConditionalSect,
                        "a conditional section is not closed"
                    ));
                }
                return Ok(());
            }

            if self.starts_with("%")? {
                self.parse_pe_reference()?;
            } else if self.starts_with("<?")? {
                self.parse_pi()?;
            } else if self.starts_with("<!--")? {
                self.parse_comment()?;
            } else if self.starts_with("<!ELEMENT")? {
                self.parse_element_decl()?;
            } else if self.starts_with("<!ATTLIST")? {
                self.parse_attlist_decl()?;
            } else if self.starts_with("<!ENTITY")? {
                self.parse_entity_decl()?;
            } else if self.starts_with("<!NOTATION")? {
                self.parse_notation_decl()?;
            } else if self.starts_with("<![")? {
                self.parse_conditional_sect()?;
            } else if self.in_include_section() && self.starts_with("]]>")? {
                self.advance(3);
                let start = self
                    .dtd_builder
                    .get_or_insert_default()
                    .includes
                    .pop()
                    .unwrap_or_default();
                self.check_nesting(start, "conditional section")?;
            } else if internal_subset && self.sources.len() == base_len && self.starts_with("]")? {
                return Ok(());
            } else {
                return Err(fatal_error!(
                    self,
                    ParserInvalidDoctypeDecl,
                    "a markup declaration is expected in the DTD"
                ));
            }
        }
    }

    fn in_include_section(&self) -> bool {
        self.dtd_builder
            .as_ref()
            .is_some_and(|builder| !builder.includes.is_empty())
    }

    /// Reports a construct that started in one entity and ended in another.
    fn check_nesting(&mut self, start: usize, construct: &str) -> Result<(), XMLStreamError> {
        if start != self.sources.len() && self.is_validating() {
            validity_error!(
                self,
                ValidImproperNesting,
                "the {} does not end in the entity it started in",
                construct
            )?;
        }
        Ok(())
    }

    /// Entity and attribute-list declarations after a skipped parameter entity are not
    /// recorded, unless the document is standalone.
    fn records_declarations(&self) -> bool {
        self.standalone() == Some(true)
            || self
                .dtd_builder
                .as_ref()
                .is_none_or(|builder| !builder.skipped)
    }

    fn skip_remaining_declarations(&mut self) {
        self.dtd_incomplete = true;
        self.dtd_builder.get_or_insert_default().skipped = true;
    }

    /// Skips whitespace inside a markup declaration, leaving exhausted parameter entities
    /// and expanding parameter entity references on the way. Entering or leaving a
    /// parameter entity counts as one space.
    pub(crate) fn skip_decl_spaces(&mut self) -> Result<usize, XMLStreamError> {
        let mut skipped = 0;
        loop {
            skipped += self.skip_whitespace()?;
            if self.at_source_end()? {
                if !matches!(
                    self.sources.current().kind(),
                    SourceKind::ParameterEntity { .. }
                ) {
                    return Ok(skipped);
                }
                self.pop_parameter_entity()?;
                skipped += 1;
                continue;
            }
            if !self.starts_with("%")? {
                return Ok(skipped);
            }
            // '%' followed by whitespace starts a parameter entity declaration
            self.fill(5)?;
            let version = self.version();
            if !self.content()[1..]
                .chars()
                .next()
                .is_some_and(|c| version.is_name_start_char(c))
            {
                return Ok(skipped);
            }
            if !self.sources.in_external_markup() {
                return Err(fatal_error!(
                    self,
                    ParserInvalidPEReference,
                    "parameter entity references are not allowed inside declarations in the internal subset"
                ));
            }
            self.parse_pe_reference()?;
            skipped += 1;
        }
    }

    /// ```text
    /// [69] PEReference ::= '%' Name ';'
    /// ```
    /// The current source is positioned at `%`. Returns `false` if the entity was not read.
    fn parse_pe_reference(&mut self) -> Result<bool, XMLStreamError> {
        self.advance(1);
        let mut name = String::new();
        self.parse_name(&mut name)?;
        if !self.consume(";")? {
            return Err(fatal_error!(
                self,
                ParserInvalidPEReference,
                "the reference to '%{}' is not closed with ';'",
                name
            ));
        }

        let decl = self
            .dtd_builder
            .as_ref()
            .and_then(|builder| builder.parameter_entity(&name))
            .cloned();
        let Some(decl) = decl else {
            if self.standalone() == Some(true) {
                return Err(fatal_error!(
                    self,
                    ParserUndeclaredEntityReference,
                    "the parameter entity '%{}' is not declared",
                    name
                ));
            }
            if self.is_validating() {
                validity_error!(
                    self,
                    ValidUndeclaredEntity,
                    "the parameter entity '%{}' is not declared",
                    name
                )?;
            } else {
                warning!(
                    self,
                    ParserUndeclaredEntityReference,
                    "the parameter entity '%{}' is not declared",
                    name
                )?;
            }
            self.skip_remaining_declarations();
            return Ok(false);
        };

        let entity_name: Arc<str> = format!("%{name}").into();
        if self.sources.is_reading_entity(&entity_name) {
            return Err(fatal_error!(
                self,
                ParserEntityRecursion,
                "the parameter entity '{}' references itself",
                entity_name
            ));
        }
        let external = decl.external_id().is_some();
        if external && !self.is_enabled(ParserOption::ExternalParameterEntities) {
            debug!("external parameter entity '{entity_name}' not read");
            self.skip_remaining_declarations();
            return Ok(false);
        }
        self.enter_entity(&entity_name)?;
        let mut source = match decl.as_ref() {
            EntityDecl::Internal {
                replacement_text,
                base_uri,
                ..
            } => {
                let mut source = InputSource::from_entity_text(replacement_text);
                if let Some(base_uri) = base_uri {
                    source.set_base_uri(base_uri.clone());
                }
                source
            }
            EntityDecl::ExternalParsed {
                external_id,
                base_uri,
                ..
            } => self.open_external_entity(&entity_name, external_id, base_uri.as_deref())?,
            EntityDecl::ExternalUnparsed { .. } => return Err(self.fail(XMLError::InternalError)),
        };
        source.set_entity(entity_name, SourceKind::ParameterEntity { external });
        self.sources.push(source);
        if external {
            self.parse_declaration(true)?;
        }
        Ok(true)
    }

    fn pop_parameter_entity(&mut self) -> Result<(), XMLStreamError> {
        if let Err(err) = self.sources.pop() {
            return Err(self.fail(err));
        }
        self.budget.leave();
        Ok(())
    }

    /// ```text
    /// [61] conditionalSect ::= includeSect | ignoreSect
    /// [62] includeSect     ::= '<![' S? 'INCLUDE' S? '[' extSubsetDecl ']]>'
    /// [63] ignoreSect      ::= '<![' S? 'IGNORE' S? '[' ignoreSectContents* ']]>'
    /// ```
    fn parse_conditional_sect(&mut self) -> Result<(), XMLStreamError> {
        if !self.sources.in_external_markup() {
            return Err(fatal_error!(
                self,
                ParserInvalidConditionalSect,
                "conditional sections are only allowed in the external subset"
            ));
        }
        let start = self.sources.len();
        self.advance(3);
        self.skip_decl_spaces()?;
        let include = if self.consume("INCLUDE")? {
            true
        } else if self.consume("IGNORE")? {
            false
        } else {
            return Err(fatal_error!(
                self,
                ParserInvalidConditionalSect,
                "'INCLUDE' or 'IGNORE' is expected"
            ));
        };
        self.skip_decl_spaces()?;
        if !self.consume("[")? {
            return Err(fatal_error!(
                self,
                ParserInvalidConditionalSect,
                "'[' is expected after the conditional section keyword"
            ));
        }
        if include {
            self.dtd_builder.get_or_insert_default().includes.push(start);
            return Ok(());
        }
        self.skip_ignore_sect()?;
        self.check_nesting(start, "conditional section")
    }

    /// ```text
    /// [64] ignoreSectContents ::= Ignore ('<![' ignoreSectContents ']]>' Ignore)*
    /// ```
    fn skip_ignore_sect(&mut self) -> Result<(), XMLStreamError> {
        let version = self.version();
        let mut depth = 1usize;
        let mut skipped = String::new();
        while depth > 0 {
            skipped.clear();
            self.take_chars(&mut skipped, |_, c| {
                c != '<' && c != ']' && version.is_char(c)
            })?;
            if self.consume("<![")? {
                depth += 1;
            } else if self.consume("]]>")? {
                depth -= 1;
            } else {
                match self.peek_char()? {
                    Some('<' | ']') => self.advance(1),
                    Some(c) => {
                        let code = c as u32;
                        return Err(fatal_error!(
                            self,
                            ParserInvalidCharacter,
                            "the character U+{:04X} is not allowed",
                            code
                        ));
                    }
                    None => {
                        return Err(fatal_error!(
                            self,
                            ParserInvalidConditionalSect,
                            "the IGNORE section is not closed"
                        ));
                    }
                }
            }
        }
        Ok(())
    }

    /// ```text
    /// [45] elementdecl ::= '<!ELEMENT' S Name S contentspec S? '>'
    /// [46] contentspec ::= 'EMPTY' | 'ANY' | Mixed | children
    /// ```
    fn parse_element_decl(&mut self) -> Result<(), XMLStreamError> {
        let start = self.sources.len();
        self.advance(9);
        if self.skip_decl_spaces()? == 0 {
            return Err(fatal_error!(
                self,
                ParserInvalidElementDecl,
                "whitespace is required after '<!ELEMENT'"
            ));
        }
        let mut name = String::new();
        self.parse_qualified_name(&mut name)?;
        let name = self.symbols.intern(&name);
        if self.skip_decl_spaces()? == 0 {
            return Err(fatal_error!(
                self,
                ParserInvalidElementDecl,
                "whitespace is required after the element name '{}'",
                name
            ));
        }
        let content = if self.consume("EMPTY")? {
            ContentSpec::EMPTY
        } else if self.consume("ANY")? {
            ContentSpec::ANY
        } else if self.starts_with("(")? {
            self.parse_content_model(&name)?
        } else {
            return Err(fatal_error!(
                self,
                ParserInvalidElementDecl,
                "'EMPTY', 'ANY' or '(' is expected in the declaration of '{}'",
                name
            ));
        };
        self.skip_decl_spaces()?;
        if !self.consume(">")? {
            return Err(fatal_error!(
                self,
                ParserInvalidElementDecl,
                "the declaration of '{}' is not closed with '>'",
                name
            ));
        }
        self.check_nesting(start, "element declaration")?;

        let (declared, recorded) = self.dtd_builder.as_ref().map_or((false, false), |builder| {
            let has_content = |decl: &ElementDecl| decl.content().is_some();
            (
                builder.element(&name).any(has_content),
                builder
                    .current()
                    .and_then(|dtd| dtd.element(&name))
                    .is_some_and(has_content),
            )
        });
        if declared && self.is_validating() {
            validity_error!(
                self,
                ValidDuplicateElementDecl,
                "the element '{}' is declared more than once",
                name
            )?;
        }
        if recorded {
            return Ok(());
        }
        let _ = self
            .dtd_builder
            .get_or_insert_default()
            .target()
            .declare_element(name, content);
        Ok(())
    }

    /// ```text
    /// [51] Mixed ::= '(' S? '#PCDATA' (S? '|' S? Name)* S? ')*' | '(' S? '#PCDATA' S? ')'
    /// ```
    /// The current source is positioned at `(`.
    fn parse_content_model(&mut self, element: &str) -> Result<ContentSpec, XMLStreamError> {
        let start = self.sources.len();
        self.advance(1);
        self.skip_decl_spaces()?;
        if !self.consume("#PCDATA")? {
            let particle = self.parse_children_group(start)?;
            let content = ElementContent::new(particle);
            if self.is_validating() && !content.is_deterministic() {
                validity_error!(
                    self,
                    ParserAmbiguousContentModel,
                    "the content model of '{}' is not deterministic",
                    element
                )?;
            }
            return Ok(ContentSpec::Children(content));
        }

        let mut names = HashSet::new();
        loop {
            self.skip_decl_spaces()?;
            if !self.consume("|")? {
                break;
            }
            self.skip_decl_spaces()?;
            let mut name = String::new();
            self.parse_qualified_name(&mut name)?;
            let name = self.symbols.intern(&name);
            if !names.insert(name.clone()) && self.is_validating() {
                validity_error!(
                    self,
                    ValidContentModelViolation,
                    "'{}' appears more than once in the mixed content of '{}'",
                    name,
                    element
                )?;
            }
        }
        if !self.consume(")")? {
            return Err(fatal_error!(
                self,
                ParserInvalidElementDecl,
                "the mixed content of '{}' is not closed with ')'",
                element
            ));
        }
        self.check_nesting(start, "content model group")?;
        if !self.consume("*")? && !names.is_empty() {
            return Err(fatal_error!(
                self,
                ParserInvalidElementDecl,
                "mixed content naming elements must end with ')*'"
            ));
        }
        Ok(ContentSpec::Mixed(Arc::new(names)))
    }

    /// ```text
    /// [47] children ::= (choice | seq) ('?' | '*' | '+')?
    /// [48] cp       ::= (Name | choice | seq) ('?' | '*' | '+')?
    /// [49] choice   ::= '(' S? cp ( S? '|' S? cp )+ S? ')'
    /// [50] seq      ::= '(' S? cp ( S? ',' S? cp )* S? ')'
    /// ```
    /// The `(` opening the group has been consumed at source depth `start`.
    fn parse_children_group(&mut self, start: usize) -> Result<ContentParticle, XMLStreamError> {
        let mut items = vec![];
        let mut separator = None;
        loop {
            self.skip_decl_spaces()?;
            let item = if self.starts_with("(")? {
                let inner = self.sources.len();
                self.advance(1);
                self.parse_children_group(inner)?
            } else {
                let mut name = String::new();
                self.parse_qualified_name(&mut name)?;
                let name = self.symbols.intern(&name);
                ContentParticle::Name(name, self.parse_occurrence()?)
            };
            items.push(item);
            self.skip_decl_spaces()?;
            let c = match self.peek_char()? {
                Some(c @ (')' | '|' | ',')) => c,
                _ => {
                    return Err(fatal_error!(
                        self,
                        ParserInvalidElementDecl,
                        "')', '|' or ',' is expected in the content model"
                    ));
                }
            };
            self.advance(1);
            if c == ')' {
                break;
            }
            match separator {
                None => separator = Some(c),
                Some(sep) if sep != c => {
                    return Err(fatal_error!(
                        self,
                        ParserInvalidElementDecl,
                        "'|' and ',' cannot be mixed in one group"
                    ));
                }
                _ => {}
            }
        }
        self.check_nesting(start, "content model group")?;
        let occurrence = self.parse_occurrence()?;
        Ok(if separator == Some('|') {
            ContentParticle::Choice(items, occurrence)
        } else {
            ContentParticle::Sequence(items, occurrence)
        })
    }

    fn parse_occurrence(&mut self) -> Result<Occurrence, XMLStreamError> {
        let occurrence = match self.peek_char()? {
            Some('?') => Occurrence::ZeroOrOne,
            Some('*') => Occurrence::ZeroOrMore,
            Some('+') => Occurrence::OneOrMore,
            _ => return Ok(Occurrence::Once),
        };
        self.advance(1);
        Ok(occurrence)
    }

    /// ```text
    /// [52] AttlistDecl ::= '<!ATTLIST' S Name AttDef* S? '>'
    /// [53] AttDef      ::= S Name S AttType S DefaultDecl
    /// ```
    fn parse_attlist_decl(&mut self) -> Result<(), XMLStreamError> {
        let start = self.sources.len();
        self.advance(9);
        if self.skip_decl_spaces()? == 0 {
            return Err(fatal_error!(
                self,
                ParserInvalidAttlistDecl,
                "whitespace is required after '<!ATTLIST'"
            ));
        }
        let mut element = String::new();
        self.parse_qualified_name(&mut element)?;
        let element = self.symbols.intern(&element);
        let record = self.records_declarations();
        let external_markup = self.sources.in_external_markup();
        loop {
            let s = self.skip_decl_spaces()?;
            if self.consume(">")? {
                break;
            }
            if s == 0 {
                return Err(fatal_error!(
                    self,
                    ParserInvalidAttlistDecl,
                    "whitespace is required before an attribute definition of '{}'",
                    element
                ));
            }
            let mut name = String::new();
            self.parse_qualified_name(&mut name)?;
            let name = self.symbols.intern(&name);
            if self.skip_decl_spaces()? == 0 {
                return Err(fatal_error!(
                    self,
                    ParserInvalidAttlistDecl,
                    "whitespace is required after the attribute name '{}'",
                    name
                ));
            }
            let att_type = self.parse_att_type()?;
            if self.skip_decl_spaces()? == 0 {
                return Err(fatal_error!(
                    self,
                    ParserInvalidAttlistDecl,
                    "whitespace is required after the type of '{}'",
                    name
                ));
            }
            let default_decl = self.parse_default_decl(&att_type)?;
            if record {
                self.declare_attribute(
                    &element,
                    AttributeDecl {
                        name,
                        att_type,
                        default_decl,
                        external_markup,
                    },
                )?;
            }
        }
        self.check_nesting(start, "attribute-list declaration")
    }

    /// ```text
    /// [54] AttType       ::= StringType | TokenizedType | EnumeratedType
    /// [55] StringType    ::= 'CDATA'
    /// [56] TokenizedType ::= 'ID' | 'IDREF' | 'IDREFS' | 'ENTITY' | 'ENTITIES' | 'NMTOKEN' | 'NMTOKENS'
    /// [58] NotationType  ::= 'NOTATION' S '(' S? Name (S? '|' S? Name)* S? ')'
    /// ```
    fn parse_att_type(&mut self) -> Result<AttributeType, XMLStreamError> {
        if self.starts_with("(")? {
            return Ok(AttributeType::Enumeration(self.parse_enumeration(false)?));
        }
        let mut keyword = String::new();
        self.parse_name(&mut keyword)?;
        if !ATTRIBUTE_TYPE_KEYWORDS.contains(&keyword) {
            return Err(fatal_error!(
                self,
                ParserInvalidAttlistDecl,
                "'{}' is not an attribute type",
                keyword
            ));
        }
        if keyword == "NOTATION" {
            if self.skip_decl_spaces()? == 0 {
                return Err(fatal_error!(
                    self,
                    ParserInvalidAttlistDecl,
                    "whitespace is required after 'NOTATION'"
                ));
            }
            return Ok(AttributeType::NOTATION(self.parse_enumeration(true)?));
        }
        match AttributeType::from_keyword(&keyword) {
            Some(att_type) => Ok(att_type),
            None => Err(self.fail(XMLError::InternalError)),
        }
    }

    /// ```text
    /// [59] Enumeration ::= '(' S? Nmtoken (S? '|' S? Nmtoken)* S? ')'
    /// ```
    /// Notation types list names instead of name tokens.
    fn parse_enumeration(&mut self, notation: bool) -> Result<Arc<[Arc<str>]>, XMLStreamError> {
        let start = self.sources.len();
        if !self.consume("(")? {
            return Err(fatal_error!(
                self,
                ParserInvalidAttlistDecl,
                "'(' is expected before the enumerated values"
            ));
        }
        let mut values: Vec<Arc<str>> = vec![];
        loop {
            self.skip_decl_spaces()?;
            let mut value = String::new();
            if notation {
                self.parse_name(&mut value)?;
            } else {
                self.parse_nmtoken(&mut value)?;
            }
            if values.iter().any(|v| **v == *value) && self.is_validating() {
                validity_error!(
                    self,
                    ValidInvalidAttributeValue,
                    "'{}' appears more than once in the enumeration",
                    value
                )?;
            }
            values.push(self.symbols.intern(&value));
            self.skip_decl_spaces()?;
            if self.consume(")")? {
                break;
            }
            if !self.consume("|")? {
                return Err(fatal_error!(
                    self,
                    ParserInvalidAttlistDecl,
                    "'|' or ')' is expected in the enumeration"
                ));
            }
        }
        self.check_nesting(start, "enumeration")?;
        Ok(values.into())
    }

    /// ```text
    /// [60] DefaultDecl ::= '#REQUIRED' | '#IMPLIED' | (('#FIXED' S)? AttValue)
    /// ```
    fn parse_default_decl(
        &mut self,
        att_type: &AttributeType,
    ) -> Result<DefaultDecl, XMLStreamError> {
        if self.consume("#REQUIRED")? {
            return Ok(DefaultDecl::REQUIRED);
        }
        if self.consume("#IMPLIED")? {
            return Ok(DefaultDecl::IMPLIED);
        }
        let fixed = self.consume("#FIXED")?;
        if fixed && self.skip_decl_spaces()? == 0 {
            return Err(fatal_error!(
                self,
                ParserInvalidAttlistDecl,
                "whitespace is required after '#FIXED'"
            ));
        }
        let mut value = String::new();
        self.parse_att_value(&mut value)?;
        if att_type.is_tokenized() {
            value = collapse_spaces(&value);
        }
        let value: Arc<str> = value.into();
        Ok(if fixed {
            DefaultDecl::FIXED(value)
        } else {
            DefaultDecl::None(value)
        })
    }

    /// Records an attribute declaration unless the attribute is already declared for
    /// `element`.
    fn declare_attribute(
        &mut self,
        element: &Arc<str>,
        decl: AttributeDecl,
    ) -> Result<(), XMLStreamError> {
        let builder = self.dtd_builder.get_or_insert_default();
        if builder
            .current()
            .and_then(|dtd| dtd.element(element))
            .is_some_and(|e| e.attribute(&decl.name).is_some())
        {
            return Ok(());
        }
        let id_declared = builder.element(element).any(|e| e.id_attribute().is_some());
        let notation_declared = builder
            .element(element)
            .flat_map(|e| e.attributes())
            .any(|att| matches!(att.att_type, AttributeType::NOTATION(_)));

        if self.is_validating() {
            match &decl.att_type {
                AttributeType::ID if id_declared => {
                    validity_error!(
                        self,
                        ValidMultipleIDAttributes,
                        "'{}' already has an ID attribute",
                        element
                    )?;
                }
                AttributeType::NOTATION(_) if notation_declared => {
                    validity_error!(
                        self,
                        ValidMultipleNotationAttributes,
                        "'{}' already has a NOTATION attribute",
                        element
                    )?;
                }
                _ => {}
            }
            let default = decl.default_decl.default_value();
            if decl.att_type == AttributeType::ID && default.is_some() {
                validity_error!(
                    self,
                    ValidIDAttributeDefault,
                    "the ID attribute '{}' must be #IMPLIED or #REQUIRED",
                    decl.name
                )?;
            }
            if let (
                AttributeType::Enumeration(names) | AttributeType::NOTATION(names),
                Some(value),
            ) = (&decl.att_type, default)
                && !names.contains(value)
            {
                validity_error!(
                    self,
                    ValidInvalidAttributeValue,
                    "the default value '{}' of '{}' is not one of the enumerated values",
                    value,
                    decl.name
                )?;
            }
        }
        self.dtd_builder
            .get_or_insert_default()
            .target()
            .declare_attribute(element.clone(), decl);
        Ok(())
    }

    /// ```text
    /// [70] EntityDecl ::= GEDecl | PEDecl
    /// [71] GEDecl     ::= '<!ENTITY' S Name S EntityDef S? '>'
    /// [72] PEDecl     ::= '<!ENTITY' S '%' S Name S PEDef S? '>'
    /// [73] EntityDef  ::= EntityValue | (ExternalID NDataDecl?)
    /// [74] PEDef      ::= EntityValue | ExternalID
    /// ```
    fn parse_entity_decl(&mut self) -> Result<(), XMLStreamError> {
        let start = self.sources.len();
        self.advance(8);
        if self.skip_decl_spaces()? == 0 {
            return Err(fatal_error!(
                self,
                ParserInvalidEntityDecl,
                "whitespace is required after '<!ENTITY'"
            ));
        }
        let parameter = self.consume("%")?;
        if parameter && self.skip_decl_spaces()? == 0 {
            return Err(fatal_error!(
                self,
                ParserInvalidEntityDecl,
                "whitespace is required after '%'"
            ));
        }
        let mut name = String::new();
        self.parse_name(&mut name)?;
        if self.is_enabled(ParserOption::Namespaces) && name.contains(':') {
            ns_error!(
                self,
                NamespaceInvalidQName,
                "the entity name '{}' contains ':'",
                name
            )?;
        }
        let name = self.symbols.intern(&name);
        if self.skip_decl_spaces()? == 0 {
            return Err(fatal_error!(
                self,
                ParserInvalidEntityDecl,
                "whitespace is required after the entity name '{}'",
                name
            ));
        }

        let base_uri = self.sources.base_uri();
        let external_markup = self.sources.in_external_markup();
        let decl = if matches!(self.peek_char()?, Some('"' | '\'')) {
            EntityDecl::Internal {
                name: name.clone(),
                replacement_text: self.parse_entity_value()?.into(),
                base_uri,
                external_markup,
            }
        } else {
            let Some(ExternalIdentifier {
                public_id,
                system_id: Some(system_id),
            }) = self.parse_external_id(false, true)?
            else {
                return Err(fatal_error!(
                    self,
                    ParserInvalidEntityDecl,
                    "a quoted value or an external identifier is expected for '{}'",
                    name
                ));
            };
            let external_id = ExternalId {
                public_id,
                system_id,
            };
            let s = self.skip_decl_spaces()?;
            if self.starts_with("NDATA")? {
                if parameter {
                    return Err(fatal_error!(
                        self,
                        ParserInvalidEntityDecl,
                        "the parameter entity '{}' cannot be unparsed",
                        name
                    ));
                }
                if s == 0 {
                    return Err(fatal_error!(
                        self,
                        ParserInvalidEntityDecl,
                        "whitespace is required before 'NDATA'"
                    ));
                }
                self.advance(5);
                if self.skip_decl_spaces()? == 0 {
                    return Err(fatal_error!(
                        self,
                        ParserInvalidEntityDecl,
                        "whitespace is required after 'NDATA'"
                    ));
                }
                let mut notation = String::new();
                self.parse_name(&mut notation)?;
                EntityDecl::ExternalUnparsed {
                    name: name.clone(),
                    external_id,
                    notation: self.symbols.intern(&notation),
                    base_uri,
                    external_markup,
                }
            } else {
                EntityDecl::ExternalParsed {
                    name: name.clone(),
                    external_id,
                    base_uri,
                    external_markup,
                }
            }
        };
        self.skip_decl_spaces()?;
        if !self.consume(">")? {
            return Err(fatal_error!(
                self,
                ParserInvalidEntityDecl,
                "the declaration of '{}' is not closed with '>'",
                name
            ));
        }
        self.check_nesting(start, "entity declaration")?;

        if !self.records_declarations() {
            debug!("declaration of entity '{name}' ignored after a skipped parameter entity");
            return Ok(());
        }
        let (declared, recorded) = self.dtd_builder.as_ref().map_or((false, false), |builder| {
            let find = |dtd: &DtdSubset| {
                if parameter {
                    dtd.parameter_entity(&name).is_some()
                } else {
                    dtd.general_entity(&name).is_some()
                }
            };
            (builder.subsets().any(find), builder.current().is_some_and(find))
        });
        if declared {
            let prefix = if parameter { "%" } else { "" };
            warning!(
                self,
                ParserDuplicateEntityDecl,
                "the entity '{}{}' is already declared, so this declaration is ignored",
                prefix,
                name
            )?;
        }
        if recorded {
            return Ok(());
        }
        let target = self.dtd_builder.get_or_insert_default().target();
        let _ = if parameter {
            target.declare_parameter_entity(decl)
        } else {
            target.declare_general_entity(decl)
        };
        Ok(())
    }

    /// ```text
    /// [9] EntityValue ::= '"' ([^%&"] | PEReference | Reference)* '"'
    ///                   | "'" ([^%&'] | PEReference | Reference)* "'"
    /// ```
    /// Parameter entity and character references are replaced. General entity references
    /// are kept and expanded where the entity is used.
    fn parse_entity_value(&mut self) -> Result<String, XMLStreamError> {
        let quote = match self.peek_char()? {
            Some(c @ ('"' | '\'')) => c,
            _ => {
                return Err(fatal_error!(
                    self,
                    ParserInvalidEntityDecl,
                    "a quoted entity value is expected"
                ));
            }
        };
        self.advance(1);
        let depth = self.sources.len();
        let version = self.version();
        let mut value = String::new();
        let mut value_chars = 0;
        loop {
            // quotes inside parameter entity text do not end the value
            let nested = self.sources.len() > depth;
            let taken = self.take_chars(&mut value, |_, c| {
                !matches!(c, '%' | '&') && (nested || c != quote) && version.is_char(c)
            })?;
            if nested {
                self.count_expanded_text(taken)?;
            }
            value_chars += taken;
            if value_chars > self.limits.max_text_length {
                return Err(fatal_error!(
                    self,
                    EntityTextTooLarge,
                    "the entity value exceeds {} characters",
                    self.limits.max_text_length
                ));
            }
            match self.peek_char()? {
                None if nested => self.pop_parameter_entity()?,
                None => {
                    return Err(fatal_error!(
                        self,
                        ParserUnexpectedEOF,
                        "the entity value is not closed"
                    ));
                }
                Some(c) if c == quote && !nested => {
                    self.advance(1);
                    return Ok(value);
                }
                Some('%') => {
                    if !self.sources.in_external_markup() {
                        return Err(fatal_error!(
                            self,
                            ParserInvalidPEReference,
                            "parameter entity references are not allowed in entity values in the internal subset"
                        ));
                    }
                    self.parse_pe_reference()?;
                }
                Some('&') if self.starts_with("&#")? => {
                    let c = self.parse_char_ref()?;
                    value.push(c);
                    value_chars += 1;
                }
                Some('&') => {
                    self.advance(1);
                    let mut name = String::new();
                    self.parse_name(&mut name)?;
                    if !self.consume(";")? {
                        return Err(fatal_error!(
                            self,
                            ParserInvalidEntityReference,
                            "the reference to '{}' is not closed with ';'",
                            name
                        ));
                    }
                    value.push('&');
                    value.push_str(&name);
                    value.push(';');
                    value_chars += name.chars().count() + 2;
                }
                Some(c) => {
                    let code = c as u32;
                    return Err(fatal_error!(
                        self,
                        ParserInvalidCharacter,
                        "the character U+{:04X} is not allowed",
                        code
                    ));
                }
            }
        }
    }

    /// ```text
    /// [82] NotationDecl ::= '<!NOTATION' S Name S (ExternalID | PublicID) S? '>'
    /// ```
    fn parse_notation_decl(&mut self) -> Result<(), XMLStreamError> {
        let start = self.sources.len();
        self.advance(10);
        if self.skip_decl_spaces()? == 0 {
            return Err(fatal_error!(
                self,
                ParserInvalidNotationDecl,
                "whitespace is required after '<!NOTATION'"
            ));
        }
        let mut name = String::new();
        self.parse_name(&mut name)?;
        let name = self.symbols.intern(&name);
        if self.skip_decl_spaces()? == 0 {
            return Err(fatal_error!(
                self,
                ParserInvalidNotationDecl,
                "whitespace is required after the notation name '{}'",
                name
            ));
        }
        let Some(id) = self.parse_external_id(true, true)? else {
            return Err(fatal_error!(
                self,
                ParserInvalidNotationDecl,
                "'SYSTEM' or 'PUBLIC' is expected in the declaration of '{}'",
                name
            ));
        };
        self.skip_decl_spaces()?;
        if !self.consume(">")? {
            return Err(fatal_error!(
                self,
                ParserInvalidNotationDecl,
                "the declaration of '{}' is not closed with '>'",
                name
            ));
        }
        self.check_nesting(start, "notation declaration")?;

        let (declared, recorded) = self.dtd_builder.as_ref().map_or((false, false), |builder| {
            let find = |dtd: &DtdSubset| dtd.notation(&name).is_some();
            (builder.subsets().any(find), builder.current().is_some_and(find))
        });
        if declared && self.is_validating() {
            validity_error!(
                self,
                ValidDuplicateNotationDecl,
                "the notation '{}' is declared more than once",
                name
            )?;
        }
        if recorded {
            return Ok(());
        }
        let _ = self
            .dtd_builder
            .get_or_insert_default()
            .target()
            .declare_notation(NotationDecl {
                name,
                public_id: id.public_id,
                system_id: id.system_id,
            });
        Ok(())
    }
}
