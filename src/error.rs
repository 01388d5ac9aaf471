use std::{borrow::Cow, sync::Arc};

use crate::encoding::{DecodeError, EncodeError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum XMLErrorLevel {
    FatalError,
    Error,
    Warning,
}

impl std::fmt::Display for XMLErrorLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match *self {
            Self::FatalError => write!(f, "fatal error"),
            Self::Error => write!(f, "error"),
            Self::Warning => write!(f, "warning"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum XMLErrorDomain {
    Parser,
    Namespace,
    DTDValid,
    Entity,
    Encoding,
    IO,
    Writer,
}

impl std::fmt::Display for XMLErrorDomain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match *self {
            Self::Parser => write!(f, "parser"),
            Self::Namespace => write!(f, "namespace"),
            Self::DTDValid => write!(f, "dtd-valid"),
            Self::Entity => write!(f, "entity"),
            Self::Encoding => write!(f, "encoding"),
            Self::IO => write!(f, "io"),
            Self::Writer => write!(f, "writer"),
        }
    }
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum XMLError {
    // general errors
    #[error("internal error")]
    InternalError,
    // parser errors
    #[error("unsupported encoding")]
    ParserUnsupportedEncoding,
    #[error("invalid encoding declaration")]
    ParserInvalidEncodingDecl,
    #[error("unsupported XML version")]
    ParserUnsupportedXMLVersion,
    #[error("too long XML version number")]
    ParserTooLongXMLVersionNumber,
    #[error("too long encoding name")]
    ParserTooLongEncodingName,
    #[error("invalid XML declaration")]
    ParserInvalidXMLDecl,
    #[error("invalid text declaration")]
    ParserInvalidTextDecl,
    #[error("invalid standalone declaration")]
    ParserInvalidSDDecl,
    #[error("invalid name")]
    ParserInvalidName,
    #[error("invalid name token")]
    ParserInvalidNmtoken,
    #[error("invalid character")]
    ParserInvalidCharacter,
    #[error("invalid character reference")]
    ParserInvalidCharacterReference,
    #[error("invalid comment")]
    ParserInvalidComment,
    #[error("invalid processing instruction")]
    ParserInvalidProcessingInstruction,
    #[error("unacceptable processing instruction target")]
    ParserUnacceptablePITarget,
    #[error("invalid CDATA section")]
    ParserInvalidCDSect,
    #[error("']]>' is not allowed in character data")]
    ParserUnacceptablePatternInCharData,
    #[error("invalid document type declaration")]
    ParserInvalidDoctypeDecl,
    #[error("multiple document type declarations")]
    ParserMultipleDoctypeDecl,
    #[error("invalid start or empty-element tag")]
    ParserInvalidStartOrEmptyTag,
    #[error("invalid end tag")]
    ParserInvalidEndTag,
    #[error("mismatched element type")]
    ParserMismatchElementType,
    #[error("invalid attribute value")]
    ParserInvalidAttValue,
    #[error("duplicate attributes")]
    ParserDuplicateAttributes,
    #[error("invalid external ID")]
    ParserInvalidExternalID,
    #[error("invalid system literal")]
    ParserInvalidSystemLiteral,
    #[error("invalid public ID literal")]
    ParserInvalidPubidLiteral,
    #[error("invalid entity reference")]
    ParserInvalidEntityReference,
    #[error("undeclared entity reference")]
    ParserUndeclaredEntityReference,
    #[error("reference to an unparsed entity")]
    ParserUnparsedEntityReference,
    #[error("reference to an external entity in an attribute value")]
    ParserExternalEntityInAttribute,
    #[error("recursive entity reference")]
    ParserEntityRecursion,
    #[error("incorrectly nested entity")]
    ParserEntityIncorrectNesting,
    #[error("unexpected document content")]
    ParserUnexpectedDocumentContent,
    #[error("unexpected end of input")]
    ParserUnexpectedEOF,
    #[error("element nesting too deep")]
    ParserElementDepthExceeded,
    #[error("too many attributes")]
    ParserTooManyAttributes,
    // DTD declaration errors
    #[error("invalid element declaration")]
    ParserInvalidElementDecl,
    #[error("invalid attribute-list declaration")]
    ParserInvalidAttlistDecl,
    #[error("invalid entity declaration")]
    ParserInvalidEntityDecl,
    #[error("invalid notation declaration")]
    ParserInvalidNotationDecl,
    #[error("invalid conditional section")]
    ParserInvalidConditionalSect,
    #[error("invalid parameter-entity reference")]
    ParserInvalidPEReference,
    #[error("duplicate entity declaration")]
    ParserDuplicateEntityDecl,
    #[error("ambiguous content model")]
    ParserAmbiguousContentModel,
    // namespace errors
    #[error("undeclared namespace prefix")]
    NamespaceUndeclaredPrefix,
    #[error("invalid namespace declaration")]
    NamespaceInvalidDeclaration,
    #[error("invalid qualified name")]
    NamespaceInvalidQName,
    // entity expansion limits and resolution
    #[error("entity nesting depth exceeded")]
    EntityDepthExceeded,
    #[error("entity expansion count exceeded")]
    EntityCountExceeded,
    #[error("expanded entity text too large")]
    EntityTextTooLarge,
    #[error("total entity expansion exceeded")]
    EntityTotalExpansionExceeded,
    #[error("external entity cannot be resolved")]
    EntityUnresolvable,
    // validity errors
    #[error("undeclared element")]
    ValidUndeclaredElement,
    #[error("content model violation")]
    ValidContentModelViolation,
    #[error("undeclared attribute")]
    ValidUndeclaredAttribute,
    #[error("required attribute not found")]
    ValidRequiredAttributeNotFound,
    #[error("attribute value does not match #FIXED default")]
    ValidMismatchFixedDefaultAttributeValue,
    #[error("invalid attribute value")]
    ValidInvalidAttributeValue,
    #[error("duplicate ID")]
    ValidDuplicateID,
    #[error("unresolvable IDREF")]
    ValidUnresolvableIDReference,
    #[error("duplicate element declaration")]
    ValidDuplicateElementDecl,
    #[error("duplicate notation declaration")]
    ValidDuplicateNotationDecl,
    #[error("multiple ID attributes")]
    ValidMultipleIDAttributes,
    #[error("multiple NOTATION attributes")]
    ValidMultipleNotationAttributes,
    #[error("ID attribute with default value")]
    ValidIDAttributeDefault,
    #[error("undeclared notation")]
    ValidUndeclaredNotation,
    #[error("undeclared entity")]
    ValidUndeclaredEntity,
    #[error("root element does not match the document type declaration")]
    ValidUnexpectedRootElement,
    #[error("document type declaration not found")]
    ValidMissingDoctype,
    #[error("improperly nested declaration or group")]
    ValidImproperNesting,
    // stream state errors
    #[error("reader is not positioned where the operation requires")]
    StreamInvalidState,
    #[error("unexpected child element")]
    StreamUnexpectedElement,
    #[error("invalid base64 content")]
    StreamInvalidBase64,
    #[error("a fatal error has already occurred")]
    StreamFatalErrorOccurred,
    #[error("no input has been supplied")]
    StreamNoInput,
    // writer errors
    #[error("writer is not in a state that accepts this output")]
    WriterInvalidState,
    // wrapped errors
    #[error("I/O error: {0}")]
    IOError(Arc<std::io::Error>),
    #[error("unsupported URI scheme")]
    IOUnsupportedScheme,
    #[error("decode error: {0}")]
    DecodeError(#[from] DecodeError),
    #[error("encode error: {0}")]
    EncodeError(#[from] EncodeError),
    #[error("invalid URI: {0}")]
    URIParseError(#[from] url::ParseError),
}

impl XMLError {
    pub fn domain(&self) -> XMLErrorDomain {
        use XMLError::*;
        match self {
            NamespaceUndeclaredPrefix | NamespaceInvalidDeclaration | NamespaceInvalidQName => {
                XMLErrorDomain::Namespace
            }
            EntityDepthExceeded
            | EntityCountExceeded
            | EntityTextTooLarge
            | EntityTotalExpansionExceeded
            | EntityUnresolvable => XMLErrorDomain::Entity,
            ValidUndeclaredElement
            | ValidContentModelViolation
            | ValidUndeclaredAttribute
            | ValidRequiredAttributeNotFound
            | ValidMismatchFixedDefaultAttributeValue
            | ValidInvalidAttributeValue
            | ValidDuplicateID
            | ValidUnresolvableIDReference
            | ValidDuplicateElementDecl
            | ValidDuplicateNotationDecl
            | ValidMultipleIDAttributes
            | ValidMultipleNotationAttributes
            | ValidIDAttributeDefault
            | ValidUndeclaredNotation
            | ValidUndeclaredEntity
            | ValidUnexpectedRootElement
            | ValidMissingDoctype
            | ValidImproperNesting => XMLErrorDomain::DTDValid,
            ParserUnsupportedEncoding
            | ParserInvalidEncodingDecl
            | Self::DecodeError(_)
            | Self::EncodeError(_) => XMLErrorDomain::Encoding,
            IOError(_) | IOUnsupportedScheme | URIParseError(_) => XMLErrorDomain::IO,
            WriterInvalidState => XMLErrorDomain::Writer,
            _ => XMLErrorDomain::Parser,
        }
    }
}

impl From<std::io::Error> for XMLError {
    fn from(value: std::io::Error) -> Self {
        Self::IOError(Arc::new(value))
    }
}

/// Where a problem was detected.
///
/// Coordinates are those of the innermost input source, so a problem inside an expanded
/// entity points into the entity's own text. `source_depth` is 0 for the document entity.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct Location {
    pub system_id: Option<Arc<str>>,
    pub public_id: Option<Arc<str>>,
    /// Name of the entity being read, if any. Parameter entities are prefixed with `%`.
    pub entity: Option<Arc<str>>,
    pub line: usize,
    pub column: usize,
    /// Number of characters consumed from the source.
    pub char_offset: usize,
    pub source_depth: usize,
}

impl std::fmt::Display for Location {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match (&self.system_id, &self.entity) {
            (Some(system_id), Some(entity)) => write!(f, "{system_id}[entity {entity}]")?,
            (Some(system_id), None) => write!(f, "{system_id}")?,
            (None, Some(entity)) => write!(f, "[entity {entity}]")?,
            (None, None) => write!(f, "[unknown]")?,
        }
        write!(f, "[line:{},column:{}]", self.line, self.column)
    }
}

/// A located problem, either returned from a reader operation (fatal)
/// or delivered to an [`ErrorHandler`](crate::handler::ErrorHandler).
#[derive(Debug, Clone, thiserror::Error)]
#[error("{location}:{level}:{message}")]
pub struct XMLStreamError {
    #[source]
    pub error: XMLError,
    pub level: XMLErrorLevel,
    pub domain: XMLErrorDomain,
    pub location: Location,
    pub message: Cow<'static, str>,
}

impl XMLStreamError {
    pub fn new(
        error: XMLError,
        level: XMLErrorLevel,
        location: Location,
        message: impl Into<Cow<'static, str>>,
    ) -> Self {
        Self {
            domain: error.domain(),
            error,
            level,
            location,
            message: message.into(),
        }
    }

    pub fn is_fatal(&self) -> bool {
        self.level == XMLErrorLevel::FatalError
    }
}

impl From<XMLError> for XMLStreamError {
    fn from(error: XMLError) -> Self {
        let message = error.to_string();
        Self::new(error, XMLErrorLevel::FatalError, Location::default(), message)
    }
}

macro_rules! generic_error {
    ($method:ident, $reader:expr, $code:ident, $level:expr, $message:literal, $( $args:expr ),+) => {
        $reader.$method(
            $crate::error::XMLError::$code,
            $level,
            ::std::borrow::Cow::Owned(format!($message, $( $args ),+)),
        )
    };
    ($method:ident, $reader:expr, $code:ident, $level:expr, $message:literal) => {
        $reader.$method(
            $crate::error::XMLError::$code,
            $level,
            ::std::borrow::Cow::Borrowed($message),
        )
    };
}

/// Builds a fatal [`XMLStreamError`] located at the reader's current position.
/// The caller decides whether to return it.
macro_rules! fatal_error {
    ($reader:expr, $code:ident, $message:literal $(, $args:expr )* $(,)?) => {
        $crate::error::generic_error!(
            report_fatal, $reader, $code, $crate::error::XMLErrorLevel::FatalError, $message $(, $args )*
        )
    };
}

macro_rules! validity_error {
    ($reader:expr, $code:ident, $message:literal $(, $args:expr )* $(,)?) => {
        $crate::error::generic_error!(
            report_problem, $reader, $code, $crate::error::XMLErrorLevel::Error, $message $(, $args )*
        )
    };
}

/// Namespace problems are recoverable unless strict namespace checking is enabled.
macro_rules! ns_error {
    ($reader:expr, $code:ident, $message:literal $(, $args:expr )* $(,)?) => {
        $crate::error::generic_error!(
            report_namespace_problem, $reader, $code, $crate::error::XMLErrorLevel::Error, $message $(, $args )*
        )
    };
}

macro_rules! warning {
    ($reader:expr, $code:ident, $message:literal $(, $args:expr )* $(,)?) => {
        $crate::error::generic_error!(
            report_problem, $reader, $code, $crate::error::XMLErrorLevel::Warning, $message $(, $args )*
        )
    };
}

pub(crate) use {fatal_error, generic_error, ns_error, validity_error, warning};
