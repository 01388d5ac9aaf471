//! DTD declarations, the subset reader and the validator.

pub mod content_model;
mod reader;
mod validator;

use std::{
    collections::HashMap,
    fmt::Write as _,
    num::NonZeroUsize,
    sync::{Arc, LazyLock, Mutex, PoisonError},
};

use log::debug;
use lru::LruCache;

use crate::{
    entity::{EntityDecl, EntityMap},
    error::XMLError,
    words::WordResolver,
};

pub use content_model::{
    ContentAutomaton, ContentParticle, ContentSpec, ContentSpecValidationError,
    ContentSpecValidator, ElementContent, Occurrence,
};
pub(crate) use reader::DtdBuilder;
pub(crate) use validator::ValidationContext;

/// Keywords allowed as `AttType` in an attribute-list declaration.
pub(crate) static ATTRIBUTE_TYPE_KEYWORDS: LazyLock<WordResolver> = LazyLock::new(|| {
    WordResolver::new([
        "CDATA", "ID", "IDREF", "IDREFS", "ENTITY", "ENTITIES", "NMTOKEN", "NMTOKENS", "NOTATION",
    ])
});

#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub enum AttributeType {
    #[default]
    CDATA,
    ID,
    IDREF,
    IDREFS,
    ENTITY,
    ENTITIES,
    NMTOKEN,
    NMTOKENS,
    NOTATION(Arc<[Arc<str>]>),
    Enumeration(Arc<[Arc<str>]>),
}

impl AttributeType {
    /// Builds a type from one of [`ATTRIBUTE_TYPE_KEYWORDS`] other than `NOTATION`.
    pub(crate) fn from_keyword(keyword: &str) -> Option<Self> {
        match keyword {
            "CDATA" => Some(Self::CDATA),
            "ID" => Some(Self::ID),
            "IDREF" => Some(Self::IDREF),
            "IDREFS" => Some(Self::IDREFS),
            "ENTITY" => Some(Self::ENTITY),
            "ENTITIES" => Some(Self::ENTITIES),
            "NMTOKEN" => Some(Self::NMTOKEN),
            "NMTOKENS" => Some(Self::NMTOKENS),
            _ => None,
        }
    }

    /// Values of every type except CDATA have their whitespace collapsed.
    pub fn is_tokenized(&self) -> bool {
        !matches!(self, Self::CDATA)
    }
}

impl std::fmt::Display for AttributeType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let (prefix, names) = match self {
            Self::CDATA => return write!(f, "CDATA"),
            Self::ID => return write!(f, "ID"),
            Self::IDREF => return write!(f, "IDREF"),
            Self::IDREFS => return write!(f, "IDREFS"),
            Self::ENTITY => return write!(f, "ENTITY"),
            Self::ENTITIES => return write!(f, "ENTITIES"),
            Self::NMTOKEN => return write!(f, "NMTOKEN"),
            Self::NMTOKENS => return write!(f, "NMTOKENS"),
            Self::NOTATION(names) => ("NOTATION ", names),
            Self::Enumeration(names) => ("", names),
        };
        write!(f, "{prefix}(")?;
        for (i, name) in names.iter().enumerate() {
            if i > 0 {
                write!(f, "|")?;
            }
            write!(f, "{name}")?;
        }
        write!(f, ")")
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum DefaultDecl {
    REQUIRED,
    IMPLIED,
    FIXED(Arc<str>),
    None(Arc<str>),
}

impl DefaultDecl {
    /// The value supplied when the attribute is omitted.
    pub fn default_value(&self) -> Option<&Arc<str>> {
        match self {
            Self::FIXED(value) | Self::None(value) => Some(value),
            _ => None,
        }
    }
}

impl std::fmt::Display for DefaultDecl {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::REQUIRED => write!(f, "#REQUIRED"),
            Self::IMPLIED => write!(f, "#IMPLIED"),
            Self::FIXED(value) => write!(f, "#FIXED {}", quote(value)),
            Self::None(value) => write!(f, "{}", quote(value)),
        }
    }
}

fn quote(value: &str) -> String {
    if value.contains('"') {
        format!("'{}'", value.replace('\'', "&#39;"))
    } else {
        format!("\"{value}\"")
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttributeDecl {
    pub name: Arc<str>,
    pub att_type: AttributeType,
    pub default_decl: DefaultDecl,
    /// Declared in the external subset or an external parameter entity.
    pub external_markup: bool,
}

/// The declarations for one element type.
///
/// An element may have attribute-list declarations without an element declaration, in
/// which case `content` is `None`.
#[derive(Debug, Clone, Default)]
pub struct ElementDecl {
    name: Arc<str>,
    content: Option<ContentSpec>,
    attributes: Vec<AttributeDecl>,
    /// Attribute names in sorted order, valid once the subset is finalized.
    attribute_names: WordResolver,
}

impl ElementDecl {
    fn new(name: Arc<str>) -> Self {
        Self {
            name,
            ..Default::default()
        }
    }

    pub fn name(&self) -> &Arc<str> {
        &self.name
    }

    /// The content specification, if the element type has been declared.
    pub fn content(&self) -> Option<&ContentSpec> {
        self.content.as_ref()
    }

    pub fn attributes(&self) -> &[AttributeDecl] {
        &self.attributes
    }

    pub fn attribute(&self, name: &str) -> Option<&AttributeDecl> {
        if self.attribute_names.len() == self.attributes.len() {
            self.attribute_names
                .index_of(name)
                .map(|index| &self.attributes[index])
        } else {
            self.attributes.iter().find(|att| att.name.as_ref() == name)
        }
    }

    /// The attribute declared with type ID, if any.
    pub fn id_attribute(&self) -> Option<&AttributeDecl> {
        self.attributes
            .iter()
            .find(|att| att.att_type == AttributeType::ID)
    }

    fn finalize(&mut self) {
        self.attributes.sort_by(|l, r| l.name.cmp(&r.name));
        self.attribute_names = WordResolver::new(self.attributes.iter().map(|att| att.name.clone()));
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NotationDecl {
    pub name: Arc<str>,
    pub public_id: Option<Arc<str>>,
    pub system_id: Option<Arc<str>>,
}

/// The declarations read from a DTD.
///
/// Once finalized, a subset is never modified again and may be shared between readers
/// through a [`DtdCache`].
#[derive(Debug, Clone, Default)]
pub struct DtdSubset {
    elements: HashMap<Arc<str>, ElementDecl>,
    general_entities: EntityMap,
    parameter_entities: EntityMap,
    notations: HashMap<Arc<str>, NotationDecl>,
    element_names: WordResolver,
}

impl DtdSubset {
    /// Declares the content of `name`.
    ///
    /// Returns `Err(ValidDuplicateElementDecl)` if the element type already has a content
    /// specification. The first one is kept.
    pub fn declare_element(&mut self, name: Arc<str>, content: ContentSpec) -> Result<(), XMLError> {
        let decl = self
            .elements
            .entry(name.clone())
            .or_insert_with(|| ElementDecl::new(name));
        if decl.content.is_some() {
            return Err(XMLError::ValidDuplicateElementDecl);
        }
        decl.content = Some(content);
        Ok(())
    }

    /// Declares an attribute of `element`.
    ///
    /// Returns `false` if the attribute is already declared, keeping the first declaration.
    pub fn declare_attribute(&mut self, element: Arc<str>, attribute: AttributeDecl) -> bool {
        let decl = self
            .elements
            .entry(element.clone())
            .or_insert_with(|| ElementDecl::new(element));
        if decl.attribute(&attribute.name).is_some() {
            return false;
        }
        decl.attributes.push(attribute);
        true
    }

    pub fn declare_general_entity(&mut self, decl: EntityDecl) -> Result<(), XMLError> {
        self.general_entities.insert(decl)
    }

    pub fn declare_parameter_entity(&mut self, decl: EntityDecl) -> Result<(), XMLError> {
        self.parameter_entities.insert(decl)
    }

    pub fn declare_notation(&mut self, decl: NotationDecl) -> Result<(), XMLError> {
        use std::collections::hash_map::Entry::*;
        match self.notations.entry(decl.name.clone()) {
            Occupied(_) => Err(XMLError::ValidDuplicateNotationDecl),
            Vacant(entry) => {
                entry.insert(decl);
                Ok(())
            }
        }
    }

    pub fn element(&self, name: &str) -> Option<&ElementDecl> {
        self.elements.get(name)
    }

    pub fn elements(&self) -> impl Iterator<Item = &ElementDecl> {
        self.element_names
            .iter()
            .filter_map(|name| self.elements.get(name))
    }

    /// Whether `name` has a content specification.
    pub fn is_element_declared(&self, name: &str) -> bool {
        self.element(name).is_some_and(|decl| decl.content.is_some())
    }

    pub fn general_entity(&self, name: &str) -> Option<&Arc<EntityDecl>> {
        self.general_entities.get(name)
    }

    pub fn parameter_entity(&self, name: &str) -> Option<&Arc<EntityDecl>> {
        self.parameter_entities.get(name)
    }

    pub fn general_entities(&self) -> &EntityMap {
        &self.general_entities
    }

    pub fn parameter_entities(&self) -> &EntityMap {
        &self.parameter_entities
    }

    pub fn notation(&self, name: &str) -> Option<&NotationDecl> {
        self.notations.get(name)
    }

    pub fn notations(&self) -> impl Iterator<Item = &NotationDecl> {
        self.notations.values()
    }

    /// Adds the declarations of `other` that `self` does not already have.
    ///
    /// `self` is read first, so its declarations take precedence.
    pub fn merge(&mut self, other: &DtdSubset) {
        for (name, decl) in &other.elements {
            let target = self
                .elements
                .entry(name.clone())
                .or_insert_with(|| ElementDecl::new(name.clone()));
            if target.content.is_none() {
                target.content = decl.content.clone();
            }
            for att in &decl.attributes {
                if target.attribute(&att.name).is_none() {
                    target.attributes.push(att.clone());
                }
            }
        }
        for decl in other.general_entities.iter() {
            self.general_entities.insert_shared(decl.clone());
        }
        for decl in other.parameter_entities.iter() {
            self.parameter_entities.insert_shared(decl.clone());
        }
        for (name, decl) in &other.notations {
            self.notations
                .entry(name.clone())
                .or_insert_with(|| decl.clone());
        }
    }

    /// Builds the lookup indexes. Called once all declarations have been read.
    pub fn finalize(&mut self) {
        for decl in self.elements.values_mut() {
            decl.finalize();
        }
        self.element_names = WordResolver::new(self.elements.keys().cloned());
    }

    /// Writes the declarations back as DTD text.
    ///
    /// Parameter entity references are already expanded and conditional sections resolved,
    /// so the output is a flat DTD. Parameter entity declarations are omitted.
    pub fn to_dtd_string(&self) -> String {
        let mut out = String::new();
        let mut notations = self.notations.values().collect::<Vec<_>>();
        notations.sort_by(|l, r| l.name.cmp(&r.name));
        for notation in notations {
            let _ = write!(out, "<!NOTATION {}", notation.name);
            match (&notation.public_id, &notation.system_id) {
                (Some(public_id), Some(system_id)) => {
                    let _ = write!(out, " PUBLIC {} {}", quote(public_id), quote(system_id));
                }
                (Some(public_id), None) => {
                    let _ = write!(out, " PUBLIC {}", quote(public_id));
                }
                (None, Some(system_id)) => {
                    let _ = write!(out, " SYSTEM {}", quote(system_id));
                }
                (None, None) => {}
            }
            out.push_str(">\n");
        }
        let mut entities = self.general_entities.iter().collect::<Vec<_>>();
        entities.sort_by(|l, r| l.name().cmp(r.name()));
        for entity in entities {
            let _ = write!(out, "<!ENTITY {} ", entity.name());
            match entity.as_ref() {
                EntityDecl::Internal {
                    replacement_text, ..
                } => {
                    let text = replacement_text.replace('%', "&#37;");
                    out.push_str(&quote(&text));
                }
                EntityDecl::ExternalParsed { external_id, .. }
                | EntityDecl::ExternalUnparsed { external_id, .. } => {
                    match &external_id.public_id {
                        Some(public_id) => {
                            let _ = write!(
                                out,
                                "PUBLIC {} {}",
                                quote(public_id),
                                quote(&external_id.system_id)
                            );
                        }
                        None => {
                            let _ = write!(out, "SYSTEM {}", quote(&external_id.system_id));
                        }
                    }
                    if let Some(notation) = entity.notation() {
                        let _ = write!(out, " NDATA {notation}");
                    }
                }
            }
            out.push_str(">\n");
        }
        for element in self.elements() {
            if let Some(content) = &element.content {
                let _ = writeln!(out, "<!ELEMENT {} {}>", element.name, content);
            }
            if !element.attributes.is_empty() {
                let _ = write!(out, "<!ATTLIST {}", element.name);
                for att in &element.attributes {
                    let _ = write!(out, "\n  {} {} {}", att.name, att.att_type, att.default_decl);
                }
                out.push_str(">\n");
            }
        }
        out
    }
}

/// Identifies an external subset for caching.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DtdId {
    pub public_id: Option<Arc<str>>,
    /// The resolved system identifier.
    pub system_id: Option<Arc<str>>,
    pub namespace_aware: bool,
}

impl DtdId {
    pub fn new(
        public_id: Option<Arc<str>>,
        system_id: Option<Arc<str>>,
        namespace_aware: bool,
    ) -> Self {
        Self {
            public_id,
            system_id,
            namespace_aware,
        }
    }
}

/// A bounded cache of parsed external subsets, shared between readers.
///
/// Entries are inserted once and never modified.
#[derive(Debug)]
pub struct DtdCache {
    entries: Mutex<LruCache<DtdId, Arc<DtdSubset>>>,
}

impl DtdCache {
    pub const DEFAULT_CAPACITY: usize = 16;

    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
        }
    }

    pub fn get(&self, id: &DtdId) -> Option<Arc<DtdSubset>> {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        let found = entries.get(id).cloned();
        debug!(
            "DTD cache {} for {:?}",
            if found.is_some() { "hit" } else { "miss" },
            id.system_id
        );
        found
    }

    /// Caches `dtd` unless an entry for `id` already exists, and returns the cached entry.
    pub fn insert(&self, id: DtdId, dtd: Arc<DtdSubset>) -> Arc<DtdSubset> {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.get_or_insert(id, || dtd).clone()
    }

    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

impl Default for DtdCache {
    fn default() -> Self {
        Self::new(Self::DEFAULT_CAPACITY)
    }
}
