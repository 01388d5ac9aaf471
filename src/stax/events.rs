use std::sync::Arc;

use crate::{XMLVersion, dtd::DtdSubset, stax::attributes::Attributes};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) enum XMLEventType {
    StartDocument,
    EndDocument,
    StartElement,
    EndElement,
    DocumentType,
    Characters,
    CData,
    Space,
    Comment,
    ProcessingInstruction,
    EntityReference,
    EndOfInput,
}

/// One token of the document.
///
/// Events own their data, so they stay valid after the reader advances.
#[derive(Debug, Clone)]
pub enum XMLEvent {
    StartDocument(Declaration),
    EndDocument,
    StartElement(StartElement),
    EndElement(EndElement),
    DocumentType(DocumentType),
    Characters(String),
    CData(String),
    /// Whitespace that the DTD marks as ignorable (element-only content).
    Space(String),
    Comment(String),
    ProcessingInstruction(ProcessingInstruction),
    /// A general entity reference that was not expanded.
    EntityReference(EntityReference),
    /// Returned once the document is finished, and on every call after that.
    EndOfInput,
}

impl XMLEvent {
    pub(crate) fn event_type(&self) -> XMLEventType {
        match self {
            Self::StartDocument(_) => XMLEventType::StartDocument,
            Self::EndDocument => XMLEventType::EndDocument,
            Self::StartElement(_) => XMLEventType::StartElement,
            Self::EndElement(_) => XMLEventType::EndElement,
            Self::DocumentType(_) => XMLEventType::DocumentType,
            Self::Characters(_) => XMLEventType::Characters,
            Self::CData(_) => XMLEventType::CData,
            Self::Space(_) => XMLEventType::Space,
            Self::Comment(_) => XMLEventType::Comment,
            Self::ProcessingInstruction(_) => XMLEventType::ProcessingInstruction,
            Self::EntityReference(_) => XMLEventType::EntityReference,
            Self::EndOfInput => XMLEventType::EndOfInput,
        }
    }

    /// The text of `Characters`, `CData` and `Space` events.
    pub fn text(&self) -> Option<&str> {
        match self {
            Self::Characters(text) | Self::CData(text) | Self::Space(text) => Some(text),
            _ => None,
        }
    }

    /// Whether this is a `Characters` or `Space` event containing only whitespace.
    pub fn is_whitespace(&self) -> bool {
        match self {
            Self::Characters(text) | Self::Space(text) => {
                text.chars().all(|c| XMLVersion::XML10.is_whitespace(c))
            }
            _ => false,
        }
    }
}

/// A namespace binding declared on an element.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Namespace {
    /// `None` for the default namespace.
    pub prefix: Option<Arc<str>>,
    /// Empty if the declaration undeclares the default namespace.
    pub uri: Arc<str>,
}

#[derive(Debug, Clone)]
pub struct StartElement {
    pub(crate) qname: Arc<str>,
    pub(crate) local_name: Option<Arc<str>>,
    pub(crate) namespace_name: Option<Arc<str>>,
    pub(crate) attributes: Attributes,
    pub(crate) namespaces: Vec<Namespace>,
    pub(crate) empty: bool,
}

impl StartElement {
    pub fn name(&self) -> &str {
        &self.qname
    }

    /// `None` if namespace processing is disabled.
    pub fn local_name(&self) -> Option<&str> {
        self.local_name.as_deref()
    }

    pub fn prefix(&self) -> Option<&str> {
        prefix_of(&self.qname, self.local_name.as_deref())
    }

    pub fn namespace_uri(&self) -> Option<&str> {
        self.namespace_name.as_deref()
    }

    pub fn attributes(&self) -> &Attributes {
        &self.attributes
    }

    /// Namespace declarations made on this element.
    pub fn namespaces(&self) -> &[Namespace] {
        &self.namespaces
    }

    /// Whether the element was written as an empty-element tag (`<a/>`).
    pub fn is_empty(&self) -> bool {
        self.empty
    }
}

#[derive(Debug, Clone)]
pub struct EndElement {
    pub(crate) qname: Arc<str>,
    pub(crate) local_name: Option<Arc<str>>,
    pub(crate) namespace_name: Option<Arc<str>>,
    pub(crate) namespaces: Vec<Namespace>,
    pub(crate) empty: bool,
}

impl EndElement {
    pub fn name(&self) -> &str {
        &self.qname
    }

    pub fn local_name(&self) -> Option<&str> {
        self.local_name.as_deref()
    }

    pub fn prefix(&self) -> Option<&str> {
        prefix_of(&self.qname, self.local_name.as_deref())
    }

    pub fn namespace_uri(&self) -> Option<&str> {
        self.namespace_name.as_deref()
    }

    /// Namespace declarations going out of scope.
    pub fn namespaces(&self) -> &[Namespace] {
        &self.namespaces
    }

    /// Whether this end was synthesized for an empty-element tag.
    pub fn is_empty(&self) -> bool {
        self.empty
    }
}

fn prefix_of<'a>(qname: &'a str, local_name: Option<&str>) -> Option<&'a str> {
    let local_name = local_name?;
    let prefix_len = qname.len() - local_name.len();
    (prefix_len > 0).then(|| &qname[..prefix_len - 1])
}

#[derive(Debug, Clone, Default)]
pub struct Declaration {
    pub(crate) version: Option<XMLVersion>,
    pub(crate) encoding: Option<Arc<str>>,
    pub(crate) standalone: Option<bool>,
}

impl Declaration {
    /// `None` if the document has no XML declaration.
    pub fn version(&self) -> Option<XMLVersion> {
        self.version
    }

    /// The encoding name as written in the declaration.
    pub fn encoding(&self) -> Option<&str> {
        self.encoding.as_deref()
    }

    /// If explicitly set to `standalone='yes'`, returns `true`.  \
    /// If `standalone='no'` or no standalone declaration exists, returns `false`.
    pub fn is_standalone(&self) -> bool {
        self.standalone == Some(true)
    }

    /// If the standalone declaration exists, return a `Some` wrapping a Boolean value corresponding
    /// to that declaration.  \
    /// If no standalone declaration exists, return `None`.
    pub fn standalone(&self) -> Option<bool> {
        self.standalone
    }
}

#[derive(Debug, Clone)]
pub struct DocumentType {
    pub(crate) name: Arc<str>,
    pub(crate) public_id: Option<Arc<str>>,
    pub(crate) system_id: Option<Arc<str>>,
    pub(crate) dtd: Option<Arc<DtdSubset>>,
}

impl DocumentType {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn public_id(&self) -> Option<&str> {
        self.public_id.as_deref()
    }

    pub fn system_id(&self) -> Option<&str> {
        self.system_id.as_deref()
    }

    /// The merged internal and external subsets. `None` if DTD processing is disabled.
    pub fn dtd(&self) -> Option<&Arc<DtdSubset>> {
        self.dtd.as_ref()
    }
}

#[derive(Debug, Clone)]
pub struct ProcessingInstruction {
    pub(crate) target: Arc<str>,
    pub(crate) data: Option<String>,
}

impl ProcessingInstruction {
    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn data(&self) -> Option<&str> {
        self.data.as_deref()
    }
}

#[derive(Debug, Clone)]
pub struct EntityReference {
    pub(crate) name: Arc<str>,
    pub(crate) replacement_text: Option<Arc<str>>,
}

impl EntityReference {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The replacement text of an internal entity. `None` for external or undeclared entities.
    pub fn replacement_text(&self) -> Option<&str> {
        self.replacement_text.as_deref()
    }
}
