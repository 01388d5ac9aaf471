use std::sync::Arc;

use crate::{XML_XML_NAMESPACE, stax::events::Namespace};

/// In-scope namespace bindings, one scope per open element.
#[derive(Debug, Clone, Default)]
pub struct NamespaceStack {
    bindings: Vec<Namespace>,
    /// Start index in `bindings` of each open scope
    scopes: Vec<usize>,
}

impl NamespaceStack {
    pub(crate) fn push_scope(&mut self) {
        self.scopes.push(self.bindings.len());
    }

    pub(crate) fn declare(&mut self, prefix: Option<Arc<str>>, uri: Arc<str>) {
        self.bindings.push(Namespace { prefix, uri });
    }

    /// Closes the innermost scope and returns the bindings it declared.
    pub(crate) fn pop_scope(&mut self) -> Vec<Namespace> {
        let start = self.scopes.pop().unwrap_or(0);
        self.bindings.split_off(start)
    }

    /// The bindings declared by the innermost scope.
    pub fn current_scope(&self) -> &[Namespace] {
        let start = self.scopes.last().copied().unwrap_or(0);
        &self.bindings[start..]
    }

    /// Looks up the namespace bound to `prefix` (`None` for the default namespace).
    ///
    /// The `xml` prefix is always bound. An empty binding (`xmlns=""`) resolves to `None`.
    pub fn resolve(&self, prefix: Option<&str>) -> Option<&str> {
        if prefix == Some("xml") {
            return Some(XML_XML_NAMESPACE);
        }
        self.bindings
            .iter()
            .rev()
            .find(|ns| ns.prefix.as_deref() == prefix)
            .map(|ns| ns.uri.as_ref())
            .filter(|uri| !uri.is_empty())
    }

    /// Same as [`resolve`](NamespaceStack::resolve), returning the shared string.
    pub(crate) fn resolve_shared(&self, prefix: Option<&str>) -> Option<Arc<str>> {
        if prefix == Some("xml") {
            return Some(XML_XML_NAMESPACE.into());
        }
        self.bindings
            .iter()
            .rev()
            .find(|ns| ns.prefix.as_deref() == prefix)
            .map(|ns| ns.uri.clone())
            .filter(|uri| !uri.is_empty())
    }

    /// Every binding currently in scope, innermost last. Shadowed bindings are included.
    pub fn iter(&self) -> impl Iterator<Item = &Namespace> {
        self.bindings.iter()
    }

    pub fn depth(&self) -> usize {
        self.scopes.len()
    }

    pub(crate) fn clear(&mut self) {
        self.bindings.clear();
        self.scopes.clear();
    }
}
