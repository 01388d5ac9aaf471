use std::sync::Arc;

use log::debug;
use url::Url;

use crate::{
    error::{Location, XMLError},
    source::{InputSource, SourceKind},
};

/// The chain of active input sources.
///
/// The bottom entry is the document entity. Every other entry is an entity or an external
/// subset entered from the entry below it, and is exclusively owned by its slot.
/// Reads always go to the top entry.
#[derive(Debug)]
pub struct SourceStack<'a> {
    sources: Vec<InputSource<'a>>,
}

impl<'a> SourceStack<'a> {
    pub fn new(root: InputSource<'a>) -> Self {
        Self {
            sources: vec![root],
        }
    }

    /// Makes `source` the active read head.
    pub fn push(&mut self, source: InputSource<'a>) {
        debug!(
            "enter source {:?} (entity {:?}) at depth {}",
            source.system_id(),
            source.entity_name(),
            self.sources.len()
        );
        self.sources.push(source);
    }

    /// Removes the active read head and returns it.
    ///
    /// The document entity cannot be popped.
    pub fn pop(&mut self) -> Result<InputSource<'a>, XMLError> {
        if self.sources.len() <= 1 {
            return Err(XMLError::InternalError);
        }
        let source = self.sources.pop().ok_or(XMLError::InternalError)?;
        debug!(
            "leave source {:?} (entity {:?}) at depth {}",
            source.system_id(),
            source.entity_name(),
            self.sources.len()
        );
        Ok(source)
    }

    pub fn current(&self) -> &InputSource<'a> {
        &self.sources[self.sources.len() - 1]
    }

    pub fn current_mut(&mut self) -> &mut InputSource<'a> {
        let last = self.sources.len() - 1;
        &mut self.sources[last]
    }

    pub fn root(&self) -> &InputSource<'a> {
        &self.sources[0]
    }

    /// Number of sources, including the document entity.
    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }

    /// Number of sources entered above the document entity.
    pub fn depth(&self) -> usize {
        self.sources.len() - 1
    }

    /// Whether an entity with `name` is currently being read.
    pub fn is_reading_entity(&self, name: &str) -> bool {
        self.sources
            .iter()
            .any(|source| source.entity_name().is_some_and(|n| n.as_ref() == name))
    }

    /// Whether any active source is external to the document entity's internal subset.
    pub fn in_external_markup(&self) -> bool {
        self.sources.iter().any(|source| {
            matches!(
                source.kind(),
                SourceKind::ExternalSubset | SourceKind::ParameterEntity { external: true }
            )
        })
    }

    /// The base URI of the innermost source that has one.
    pub fn base_uri(&self) -> Option<Arc<Url>> {
        self.sources
            .iter()
            .rev()
            .find_map(|source| source.base_uri().cloned())
    }

    pub fn location(&self) -> Location {
        let mut location = self.current().location();
        location.source_depth = self.depth();
        if location.system_id.is_none() {
            // internal entities report the document they were read from
            location.system_id = self
                .sources
                .iter()
                .rev()
                .find_map(|source| source.system_id().cloned());
        }
        location
    }

    /// Replaces the whole chain with a new document entity.
    pub fn reset(&mut self, root: InputSource<'a>) {
        self.sources.clear();
        self.sources.push(root);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_and_pop() {
        let mut root = InputSource::from_content("<doc>&e;</doc>");
        root.set_system_id("file:///doc.xml");
        let mut stack = SourceStack::new(root);
        assert!(matches!(stack.pop(), Err(XMLError::InternalError)));

        let mut entity = InputSource::from_entity_text("text");
        entity.set_entity("e".into(), SourceKind::GeneralEntity);
        stack.push(entity);
        assert_eq!(stack.depth(), 1);
        assert!(stack.is_reading_entity("e"));
        assert!(!stack.is_reading_entity("f"));

        let location = stack.location();
        assert_eq!(location.source_depth, 1);
        assert_eq!(location.entity.as_deref(), Some("e"));
        assert_eq!(location.system_id.as_deref(), Some("file:///doc.xml"));

        let popped = stack.pop().unwrap();
        assert_eq!(popped.entity_name().map(|n| n.as_ref()), Some("e"));
        assert_eq!(stack.depth(), 0);
        assert!(stack.pop().is_err());
    }
}
