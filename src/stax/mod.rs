//! The pull reader.
//!
//! [`XMLStreamReader`] tokenizes one event per call to
//! [`next_event`](XMLStreamReader::next_event). Entity references are expanded by pushing
//! sources onto the reader's [`SourceStack`], so the tokenizer always reads from the top
//! source and never needs to know whether it is inside an entity.

pub mod attributes;
mod content;
pub mod events;
mod expand;
pub mod namespace;
mod tokenizer;

use std::{borrow::Cow, collections::VecDeque, io::Read, sync::Arc};

use base64::Engine as _;
use log::debug;
use url::Url;

use crate::{
    XMLVersion,
    config::{ParserConfig, ParserLimits, ParserOption},
    dtd::{ContentSpecValidator, DtdBuilder, DtdCache, DtdSubset, ValidationContext},
    entity::{EntityDecl, EntityMap, ExpansionBudget},
    error::{Location, XMLError, XMLErrorLevel, XMLStreamError},
    handler::{DefaultErrorHandler, ErrorHandler},
    resolver::{DefaultEntityResolver, EntityResolver, resolve_system_id},
    source::{InputSource, SourceStack},
    words::SymbolTable,
};

use events::{Declaration, XMLEvent, XMLEventType};
use namespace::NamespaceStack;

pub(crate) use content::collapse_spaces;
pub(crate) use tokenizer::ExternalIdentifier;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ReaderState {
    /// No input has been supplied.
    BeforeStart,
    /// The XML declaration has not been read.
    StartDocument,
    /// Before the document element.
    Prolog,
    /// Inside the document element.
    Content,
    /// After the document element.
    Epilog,
    /// `EndDocument` has been reported.
    Finished,
    /// A fatal error has been reported.
    Failed,
}

#[derive(Debug)]
pub(crate) struct OpenElement {
    pub(crate) qname: Arc<str>,
    pub(crate) local_name: Option<Arc<str>>,
    pub(crate) namespace_name: Option<Arc<str>>,
    /// `None` when not validating or the element is undeclared.
    pub(crate) validator: Option<ContentSpecValidator>,
    /// Whether the declared content is element-only, so whitespace is ignorable.
    pub(crate) element_only: bool,
    /// Number of active sources when the start tag was read.
    pub(crate) source_depth: usize,
}

pub struct XMLStreamReader<'a> {
    pub(crate) sources: SourceStack<'a>,
    pub(crate) config: ParserConfig,
    pub(crate) limits: ParserLimits,
    pub(crate) custom_entities: EntityMap,
    pub(crate) handler: Box<dyn ErrorHandler + 'a>,
    pub(crate) resolver: Box<dyn EntityResolver + 'a>,
    pub(crate) dtd_cache: Option<Arc<DtdCache>>,
    pub(crate) default_base_uri: Option<Arc<Url>>,
    pub(crate) symbols: SymbolTable,
    pub(crate) state: ReaderState,
    pub(crate) budget: ExpansionBudget,
    pub(crate) declaration: Declaration,
    pub(crate) seen_doctype: bool,
    pub(crate) doctype_name: Option<Arc<str>>,
    pub(crate) dtd: Option<Arc<DtdSubset>>,
    /// Declarations read so far, while the DTD is being read
    pub(crate) dtd_builder: Option<DtdBuilder>,
    /// Some declarations may not have been read (skipped external subset or parameter
    /// entities), so undeclared entities are not fatal.
    pub(crate) dtd_incomplete: bool,
    pub(crate) validation: ValidationContext,
    pub(crate) namespaces: NamespaceStack,
    pub(crate) elements: Vec<OpenElement>,
    /// Events already tokenized but not yet returned
    pub(crate) pending: VecDeque<(XMLEvent, Location)>,
    /// The last start tag was an empty-element tag whose end has not been reported
    pub(crate) pending_end: bool,
    pub(crate) last_event: Option<XMLEventType>,
    pub(crate) event_location: Location,
}

impl<'a> XMLStreamReader<'a> {
    /// Starts reading a document from a byte stream.
    ///
    /// `encoding` overrides encoding detection. `uri` is the system identifier of the
    /// document, used as the base URI for external entities.
    pub fn parse_reader(
        &mut self,
        reader: impl Read + 'a,
        encoding: Option<&str>,
        uri: Option<&str>,
    ) -> Result<(), XMLStreamError> {
        let mut source =
            InputSource::with_chunk_size(reader, encoding, self.limits.input_buffer_size)?;
        self.set_document_uri(&mut source, uri)?;
        self.start(source);
        Ok(())
    }

    /// Starts reading a document from already decoded text.
    pub fn parse_str(&mut self, s: &str, uri: Option<&str>) -> Result<(), XMLStreamError> {
        let mut source = InputSource::from_content(s);
        self.set_document_uri(&mut source, uri)?;
        self.start(source);
        Ok(())
    }

    /// Starts reading the document identified by `uri`, opened through the entity resolver.
    pub fn parse_uri(&mut self, uri: &str) -> Result<(), XMLStreamError> {
        let base = self.default_base_uri.clone();
        let source = self
            .resolver
            .resolve_entity("[document]", None, base.as_deref(), uri)?;
        self.start(source);
        Ok(())
    }

    pub(crate) fn set_document_uri(
        &self,
        source: &mut InputSource<'a>,
        uri: Option<&str>,
    ) -> Result<(), XMLError> {
        if let Some(uri) = uri {
            let url = resolve_system_id(self.default_base_uri.as_deref(), uri)?;
            source.set_system_id(url.as_str());
            source.set_base_uri(Arc::new(url));
        } else if let Some(base) = &self.default_base_uri {
            source.set_base_uri(base.clone());
        }
        Ok(())
    }

    pub(crate) fn start(&mut self, source: InputSource<'a>) {
        self.reset();
        debug!("start document {:?}", source.system_id());
        self.sources.reset(source);
        self.state = ReaderState::StartDocument;
    }

    /// Drops the current document and every open source.
    pub fn reset(&mut self) {
        self.sources.reset(InputSource::from_content(""));
        self.state = ReaderState::BeforeStart;
        self.budget.reset();
        self.declaration = Declaration::default();
        self.seen_doctype = false;
        self.doctype_name = None;
        self.dtd = None;
        self.dtd_builder = None;
        self.dtd_incomplete = false;
        self.validation.reset();
        self.namespaces.clear();
        self.elements.clear();
        self.pending.clear();
        self.pending_end = false;
        self.last_event = None;
        self.event_location = Location::default();
        self.symbols.clear();
    }

    /// Reads the next event.
    ///
    /// Once the document is finished, returns [`XMLEvent::EndOfInput`]. Once a fatal error has
    /// been returned, every later call fails with `StreamFatalErrorOccurred`.
    pub fn next_event(&mut self) -> Result<XMLEvent, XMLStreamError> {
        let event = self.read_event()?;
        self.last_event = Some(event.event_type());
        Ok(event)
    }

    fn read_event(&mut self) -> Result<XMLEvent, XMLStreamError> {
        if let Some((event, location)) = self.pending.pop_front() {
            self.event_location = location;
            return Ok(event);
        }
        if self.pending_end {
            self.pending_end = false;
            return self.close_element(true);
        }
        match self.state {
            ReaderState::BeforeStart => Err(XMLError::StreamNoInput.into()),
            ReaderState::Failed => Err(XMLError::StreamFatalErrorOccurred.into()),
            ReaderState::Finished => Ok(XMLEvent::EndOfInput),
            ReaderState::StartDocument => self.parse_document_start(),
            ReaderState::Prolog => self.next_in_prolog(),
            ReaderState::Content => self.next_in_content(),
            ReaderState::Epilog => self.next_in_epilog(),
        }
    }

    /// Skips whitespace, comments and processing instructions up to the next start or end
    /// tag.
    ///
    /// Returns `EndDocument` or `EndOfInput` if no tag remains. Non-whitespace text is an
    /// error.
    pub fn next_tag(&mut self) -> Result<XMLEvent, XMLStreamError> {
        loop {
            let event = self.next_event()?;
            match event {
                XMLEvent::StartElement(_)
                | XMLEvent::EndElement(_)
                | XMLEvent::EndDocument
                | XMLEvent::EndOfInput => return Ok(event),
                XMLEvent::Comment(_)
                | XMLEvent::ProcessingInstruction(_)
                | XMLEvent::Space(_)
                | XMLEvent::StartDocument(_)
                | XMLEvent::DocumentType(_) => {}
                XMLEvent::Characters(_) if event.is_whitespace() => {}
                _ => return Err(self.stream_error(XMLError::StreamInvalidState)),
            }
        }
    }

    /// Reads the text content of the current element through its end tag.
    ///
    /// Must be called right after a `StartElement` event. Comments and processing
    /// instructions are skipped; a child element is an error.
    pub fn read_element_text(&mut self) -> Result<String, XMLStreamError> {
        if self.last_event != Some(XMLEventType::StartElement) {
            return Err(self.stream_error(XMLError::StreamInvalidState));
        }
        let mut text = String::new();
        loop {
            match self.next_event()? {
                XMLEvent::Characters(data) | XMLEvent::CData(data) | XMLEvent::Space(data) => {
                    text.push_str(&data)
                }
                XMLEvent::EntityReference(reference) => {
                    if let Some(replacement_text) = reference.replacement_text() {
                        text.push_str(replacement_text);
                    }
                }
                XMLEvent::Comment(_) | XMLEvent::ProcessingInstruction(_) => {}
                XMLEvent::EndElement(_) => return Ok(text),
                XMLEvent::StartElement(_) => {
                    return Err(self.stream_error(XMLError::StreamUnexpectedElement));
                }
                _ => return Err(self.stream_error(XMLError::StreamInvalidState)),
            }
        }
    }

    /// Reads the base64 encoded content of the current element through its end tag.
    ///
    /// Whitespace anywhere in the content is ignored.
    pub fn read_element_binary(&mut self) -> Result<Vec<u8>, XMLStreamError> {
        let mut text = self.read_element_text()?;
        text.retain(|c| !XMLVersion::XML10.is_whitespace(c));
        base64::engine::general_purpose::STANDARD
            .decode(text.as_bytes())
            .map_err(|err| {
                XMLStreamError::new(
                    XMLError::StreamInvalidBase64,
                    XMLErrorLevel::Error,
                    self.event_location.clone(),
                    err.to_string(),
                )
            })
    }

    /// Location of the start of the most recently returned event.
    pub fn location(&self) -> &Location {
        &self.event_location
    }

    /// Location the tokenizer has reached.
    pub fn current_location(&self) -> Location {
        self.sources.location()
    }

    pub fn namespaces(&self) -> &NamespaceStack {
        &self.namespaces
    }

    /// The DTD of the current document, once its `DocumentType` event has been read.
    pub fn dtd(&self) -> Option<&Arc<DtdSubset>> {
        self.dtd.as_ref()
    }

    /// Number of open elements.
    pub fn depth(&self) -> usize {
        self.elements.len()
    }

    pub fn version(&self) -> XMLVersion {
        self.declaration.version.unwrap_or_default()
    }

    /// The encoding named in the XML declaration.
    pub fn encoding(&self) -> Option<&str> {
        self.declaration.encoding()
    }

    /// The encoding actually used to decode the document entity.
    pub fn input_encoding(&self) -> &'static str {
        self.sources.root().encoding()
    }

    pub fn standalone(&self) -> Option<bool> {
        self.declaration.standalone
    }

    pub fn config(&self) -> ParserConfig {
        self.config
    }

    pub fn limits(&self) -> &ParserLimits {
        &self.limits
    }

    pub fn expansion_budget(&self) -> &ExpansionBudget {
        &self.budget
    }

    pub(crate) fn is_enabled(&self, option: ParserOption) -> bool {
        self.config.is_enable(option)
    }

    pub(crate) fn is_validating(&self) -> bool {
        self.config.is_enable(ParserOption::Validation)
            && self.config.is_enable(ParserOption::SupportDTD)
    }

    /// Reports a fatal error at the current position and moves to the failed state.
    pub(crate) fn report_fatal(
        &mut self,
        code: XMLError,
        level: XMLErrorLevel,
        message: Cow<'static, str>,
    ) -> XMLStreamError {
        let error = XMLStreamError::new(code, level, self.sources.location(), message);
        self.handler.fatal_error(&error);
        self.state = ReaderState::Failed;
        error
    }

    /// Reports a recoverable problem. Fails only if the handler rejects it.
    pub(crate) fn report_problem(
        &mut self,
        code: XMLError,
        level: XMLErrorLevel,
        message: Cow<'static, str>,
    ) -> Result<(), XMLStreamError> {
        let error = XMLStreamError::new(code, level, self.sources.location(), message.clone());
        let result = match level {
            XMLErrorLevel::Warning => self.handler.warning(error),
            _ => self.handler.error(error),
        };
        result.map_err(|code| self.report_fatal(code, XMLErrorLevel::FatalError, message))
    }

    pub(crate) fn report_namespace_problem(
        &mut self,
        code: XMLError,
        level: XMLErrorLevel,
        message: Cow<'static, str>,
    ) -> Result<(), XMLStreamError> {
        if self.is_enabled(ParserOption::StrictNamespaces) {
            Err(self.report_fatal(code, XMLErrorLevel::FatalError, message))
        } else {
            self.report_problem(code, level, message)
        }
    }

    /// Turns an error from a source or a resolver into a located fatal error.
    pub(crate) fn fail(&mut self, code: XMLError) -> XMLStreamError {
        let message = code.to_string();
        self.report_fatal(code, XMLErrorLevel::FatalError, Cow::Owned(message))
    }

    /// An error about the caller's use of the reader. The reader state is not changed.
    fn stream_error(&self, code: XMLError) -> XMLStreamError {
        let message = code.to_string();
        XMLStreamError::new(
            code,
            XMLErrorLevel::Error,
            self.event_location.clone(),
            message,
        )
    }

    /// Looks up a general entity: custom entities first, then the DTD (or the declarations
    /// read so far while the DTD is being read).
    pub(crate) fn general_entity(&self, name: &str) -> Option<Arc<EntityDecl>> {
        self.custom_entities
            .get(name)
            .or_else(|| self.dtd_builder.as_ref()?.general_entity(name))
            .or_else(|| self.dtd.as_ref()?.general_entity(name))
            .cloned()
    }
}

impl Iterator for XMLStreamReader<'_> {
    type Item = Result<XMLEvent, XMLStreamError>;

    fn next(&mut self) -> Option<Self::Item> {
        if matches!(self.state, ReaderState::Failed | ReaderState::BeforeStart) {
            return None;
        }
        match self.next_event() {
            Ok(XMLEvent::EndOfInput) => None,
            other => Some(other),
        }
    }
}

impl Default for XMLStreamReader<'_> {
    fn default() -> Self {
        XMLStreamReaderBuilder::new().build()
    }
}

pub struct XMLStreamReaderBuilder<'a> {
    config: ParserConfig,
    limits: ParserLimits,
    custom_entities: EntityMap,
    handler: Option<Box<dyn ErrorHandler + 'a>>,
    resolver: Option<Box<dyn EntityResolver + 'a>>,
    dtd_cache: Option<Arc<DtdCache>>,
    default_base_uri: Option<Arc<Url>>,
}

impl<'a> XMLStreamReaderBuilder<'a> {
    pub fn new() -> Self {
        Self {
            config: ParserConfig::default(),
            limits: ParserLimits::default(),
            custom_entities: EntityMap::default(),
            handler: None,
            resolver: None,
            dtd_cache: None,
            default_base_uri: None,
        }
    }

    pub fn set_parser_config(mut self, config: ParserConfig) -> Self {
        self.config = config;
        self
    }

    pub fn enable_option(mut self, option: ParserOption) -> Self {
        self.config.set_option(option, true);
        self
    }

    pub fn disable_option(mut self, option: ParserOption) -> Self {
        self.config.set_option(option, false);
        self
    }

    pub fn set_limits(mut self, limits: ParserLimits) -> Self {
        self.limits = limits;
        self
    }

    pub fn set_max_entity_depth(mut self, depth: usize) -> Self {
        self.limits.max_entity_depth = depth;
        self
    }

    pub fn set_max_entity_count(mut self, count: usize) -> Self {
        self.limits.max_entity_count = count;
        self
    }

    pub fn set_max_text_length(mut self, length: usize) -> Self {
        self.limits.max_text_length = length;
        self
    }

    pub fn set_max_total_expansion(mut self, length: Option<usize>) -> Self {
        self.limits.max_total_expansion = length;
        self
    }

    pub fn set_max_element_depth(mut self, depth: usize) -> Self {
        self.limits.max_element_depth = depth;
        self
    }

    pub fn set_input_buffer_size(mut self, size: usize) -> Self {
        self.limits.input_buffer_size = size;
        self
    }

    /// Declares an internal general entity before any document is read.
    ///
    /// Custom entities take precedence over declarations in the document's DTD.
    /// Declaring the same name twice keeps the first replacement text.
    pub fn add_custom_entity(
        mut self,
        name: impl Into<Arc<str>>,
        replacement_text: impl Into<Arc<str>>,
    ) -> Self {
        let _ = self.custom_entities.insert(EntityDecl::Internal {
            name: name.into(),
            replacement_text: replacement_text.into(),
            base_uri: None,
            external_markup: false,
        });
        self
    }

    pub fn set_error_handler(mut self, handler: impl ErrorHandler + 'a) -> Self {
        self.handler = Some(Box::new(handler));
        self
    }

    pub fn set_entity_resolver(mut self, resolver: impl EntityResolver + 'a) -> Self {
        self.resolver = Some(Box::new(resolver));
        self
    }

    pub fn set_dtd_cache(mut self, cache: Arc<DtdCache>) -> Self {
        self.dtd_cache = Some(cache);
        self
    }

    /// Sets the base URI used for documents read without a system identifier.
    pub fn set_default_base_uri(mut self, base_uri: &str) -> Result<Self, XMLError> {
        let url = resolve_system_id(None, base_uri)?;
        self.default_base_uri = Some(Arc::new(url));
        Ok(self)
    }

    pub fn build(self) -> XMLStreamReader<'a> {
        XMLStreamReader {
            sources: SourceStack::new(InputSource::from_content("")),
            config: self.config,
            limits: self.limits,
            custom_entities: self.custom_entities,
            handler: self
                .handler
                .unwrap_or_else(|| Box::new(DefaultErrorHandler)),
            resolver: self
                .resolver
                .unwrap_or_else(|| Box::new(DefaultEntityResolver)),
            dtd_cache: self.dtd_cache,
            default_base_uri: self.default_base_uri,
            symbols: SymbolTable::default(),
            state: ReaderState::BeforeStart,
            budget: ExpansionBudget::default(),
            declaration: Declaration::default(),
            seen_doctype: false,
            doctype_name: None,
            dtd: None,
            dtd_builder: None,
            dtd_incomplete: false,
            validation: ValidationContext::default(),
            namespaces: NamespaceStack::default(),
            elements: vec![],
            pending: VecDeque::new(),
            pending_end: false,
            last_event: None,
            event_location: Location::default(),
        }
    }
}

impl Default for XMLStreamReaderBuilder<'_> {
    fn default() -> Self {
        Self::new()
    }
}

