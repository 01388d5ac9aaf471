//! Entity declarations and the bookkeeping that bounds their expansion.

use std::{collections::HashMap, sync::Arc};

use url::Url;

use crate::{config::ParserLimits, error::XMLError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityKind {
    Internal,
    ExternalParsed,
    ExternalUnparsed,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ExternalId {
    pub public_id: Option<Arc<str>>,
    pub system_id: Arc<str>,
}

/// A declared entity.
///
/// `base_uri` is the base URI of the source the declaration was read from. System
/// identifiers are resolved against it. `external_markup` records whether the declaration
/// came from the external subset or an external parameter entity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntityDecl {
    Internal {
        name: Arc<str>,
        replacement_text: Arc<str>,
        base_uri: Option<Arc<Url>>,
        external_markup: bool,
    },
    ExternalParsed {
        name: Arc<str>,
        external_id: ExternalId,
        base_uri: Option<Arc<Url>>,
        external_markup: bool,
    },
    ExternalUnparsed {
        name: Arc<str>,
        external_id: ExternalId,
        notation: Arc<str>,
        base_uri: Option<Arc<Url>>,
        external_markup: bool,
    },
}

impl EntityDecl {
    pub fn kind(&self) -> EntityKind {
        match self {
            Self::Internal { .. } => EntityKind::Internal,
            Self::ExternalParsed { .. } => EntityKind::ExternalParsed,
            Self::ExternalUnparsed { .. } => EntityKind::ExternalUnparsed,
        }
    }

    pub fn name(&self) -> &Arc<str> {
        match self {
            Self::Internal { name, .. }
            | Self::ExternalParsed { name, .. }
            | Self::ExternalUnparsed { name, .. } => name,
        }
    }

    pub fn base_uri(&self) -> Option<&Arc<Url>> {
        match self {
            Self::Internal { base_uri, .. }
            | Self::ExternalParsed { base_uri, .. }
            | Self::ExternalUnparsed { base_uri, .. } => base_uri.as_ref(),
        }
    }

    pub fn replacement_text(&self) -> Option<&Arc<str>> {
        match self {
            Self::Internal {
                replacement_text, ..
            } => Some(replacement_text),
            _ => None,
        }
    }

    pub fn external_id(&self) -> Option<&ExternalId> {
        match self {
            Self::Internal { .. } => None,
            Self::ExternalParsed { external_id, .. }
            | Self::ExternalUnparsed { external_id, .. } => Some(external_id),
        }
    }

    pub fn notation(&self) -> Option<&Arc<str>> {
        match self {
            Self::ExternalUnparsed { notation, .. } => Some(notation),
            _ => None,
        }
    }

    pub fn is_external_markup(&self) -> bool {
        match *self {
            Self::Internal {
                external_markup, ..
            }
            | Self::ExternalParsed {
                external_markup, ..
            }
            | Self::ExternalUnparsed {
                external_markup, ..
            } => external_markup,
        }
    }
}

/// The replacement character of a predefined entity.
pub fn predefined_entity(name: &str) -> Option<char> {
    match name {
        "lt" => Some('<'),
        "gt" => Some('>'),
        "amp" => Some('&'),
        "apos" => Some('\''),
        "quot" => Some('"'),
        _ => None,
    }
}

/// Declarations of one entity namespace (general or parameter).
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct EntityMap(HashMap<Arc<str>, Arc<EntityDecl>>);

impl EntityMap {
    /// Adds `decl` unless an entity with the same name is already declared.
    ///
    /// Returns `Err(ParserDuplicateEntityDecl)` for a redeclaration, which leaves the first
    /// declaration in place.
    pub fn insert(&mut self, decl: EntityDecl) -> Result<(), XMLError> {
        use std::collections::hash_map::Entry::*;
        match self.0.entry(decl.name().clone()) {
            Occupied(_) => Err(XMLError::ParserDuplicateEntityDecl),
            Vacant(entry) => {
                entry.insert(Arc::new(decl));
                Ok(())
            }
        }
    }

    pub(crate) fn insert_shared(&mut self, decl: Arc<EntityDecl>) -> bool {
        use std::collections::hash_map::Entry::*;
        match self.0.entry(decl.name().clone()) {
            Occupied(_) => false,
            Vacant(entry) => {
                entry.insert(decl);
                true
            }
        }
    }

    pub fn get(&self, name: &str) -> Option<&Arc<EntityDecl>> {
        self.0.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.0.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<EntityDecl>> {
        self.0.values()
    }
}

/// Counters checked every time an entity is expanded.
///
/// Reset only when a new document is started.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExpansionBudget {
    depth: usize,
    count: usize,
    segment_chars: usize,
    total_chars: usize,
}

impl ExpansionBudget {
    /// Accounts for entering an entity.
    pub fn enter(&mut self, limits: &ParserLimits) -> Result<(), XMLError> {
        let depth = self.depth + 1;
        if depth > limits.max_entity_depth {
            return Err(XMLError::EntityDepthExceeded);
        }
        let count = self.count + 1;
        if count > limits.max_entity_count {
            return Err(XMLError::EntityCountExceeded);
        }
        self.depth = depth;
        self.count = count;
        Ok(())
    }

    pub fn leave(&mut self) {
        self.depth = self.depth.saturating_sub(1);
    }

    /// Starts counting the text of a new reference made outside any entity.
    pub fn start_segment(&mut self) {
        self.segment_chars = 0;
    }

    /// Accounts for `chars` characters produced by entity expansion.
    pub fn add_text(&mut self, chars: usize, limits: &ParserLimits) -> Result<(), XMLError> {
        self.segment_chars += chars;
        self.total_chars += chars;
        if self.segment_chars > limits.max_text_length {
            return Err(XMLError::EntityTextTooLarge);
        }
        if let Some(max) = limits.max_total_expansion
            && self.total_chars > max
        {
            return Err(XMLError::EntityTotalExpansionExceeded);
        }
        Ok(())
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    pub fn count(&self) -> usize {
        self.count
    }

    pub fn total_chars(&self) -> usize {
        self.total_chars
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn internal(name: &str, text: &str) -> EntityDecl {
        EntityDecl::Internal {
            name: name.into(),
            replacement_text: text.into(),
            base_uri: None,
            external_markup: false,
        }
    }

    #[test]
    fn first_declaration_wins() {
        let mut map = EntityMap::default();
        assert!(map.insert(internal("e", "first")).is_ok());
        assert!(matches!(
            map.insert(internal("e", "second")),
            Err(XMLError::ParserDuplicateEntityDecl)
        ));
        let decl = map.get("e").unwrap();
        assert_eq!(decl.replacement_text().map(|t| t.as_ref()), Some("first"));
        assert_eq!(decl.kind(), EntityKind::Internal);
    }

    #[test]
    fn depth_limit() {
        let limits = ParserLimits {
            max_entity_depth: 2,
            ..Default::default()
        };
        let mut budget = ExpansionBudget::default();
        budget.enter(&limits).unwrap();
        budget.enter(&limits).unwrap();
        assert!(matches!(
            budget.enter(&limits),
            Err(XMLError::EntityDepthExceeded)
        ));
        budget.leave();
        budget.enter(&limits).unwrap();
        assert_eq!(budget.count(), 3);
    }

    #[test]
    fn count_and_text_limits() {
        let limits = ParserLimits {
            max_entity_count: 2,
            max_text_length: 10,
            max_total_expansion: Some(15),
            ..Default::default()
        };
        let mut budget = ExpansionBudget::default();
        budget.enter(&limits).unwrap();
        budget.leave();
        budget.enter(&limits).unwrap();
        budget.leave();
        assert!(matches!(
            budget.enter(&limits),
            Err(XMLError::EntityCountExceeded)
        ));

        budget.add_text(8, &limits).unwrap();
        assert!(matches!(
            budget.add_text(3, &limits),
            Err(XMLError::EntityTextTooLarge)
        ));
        budget.start_segment();
        assert!(matches!(
            budget.add_text(5, &limits),
            Err(XMLError::EntityTotalExpansionExceeded)
        ));
    }

    #[test]
    fn predefined() {
        assert_eq!(predefined_entity("amp"), Some('&'));
        assert_eq!(predefined_entity("nbsp"), None);
    }
}
