use std::{collections::HashMap, ops::Index, sync::Arc};

use crate::error::XMLError;

/// One attribute of a start tag, either written in the document or supplied by a default
/// from an attribute-list declaration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attribute {
    /// Namespace name, set once the prefix has been bound.
    pub uri: Option<Arc<str>>,
    /// Set only when namespace processing is enabled.
    pub local_name: Option<Arc<str>>,
    pub qname: Arc<str>,
    pub value: Box<str>,
    pub(crate) declared: bool,
    pub(crate) specified: bool,
}

impl Attribute {
    /// An attribute written in the start tag.
    pub(crate) fn specified(qname: Arc<str>, value: impl Into<Box<str>>) -> Self {
        Self {
            uri: None,
            local_name: None,
            qname,
            value: value.into(),
            declared: false,
            specified: true,
        }
    }

    /// An attribute added from the default value of its declaration.
    pub(crate) fn defaulted(qname: Arc<str>, value: impl Into<Box<str>>) -> Self {
        Self {
            declared: true,
            specified: false,
            ..Self::specified(qname, value)
        }
    }

    pub fn is_declared(&self) -> bool {
        self.declared
    }

    /// `false` if the value came from a DTD default.
    pub fn is_specified(&self) -> bool {
        self.specified
    }

    pub fn prefix(&self) -> Option<&str> {
        let local_name = self.local_name.as_deref()?;
        self.qname
            .strip_suffix(local_name)?
            .strip_suffix(':')
    }
}

/// The attributes of one start tag in document order, followed by defaulted ones.
///
/// Namespace declarations are not included while namespace processing is enabled.
#[derive(Debug, Clone, Default)]
pub struct Attributes {
    list: Vec<Attribute>,
    by_qname: HashMap<Arc<str>, usize>,
    // local name -> (namespace name or "", index)
    by_local_name: HashMap<Arc<str>, Vec<(Arc<str>, usize)>>,
}

impl Attributes {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.list.len()
    }

    pub fn is_empty(&self) -> bool {
        self.list.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Attribute> {
        self.list.get(index)
    }

    pub fn get_index_by_qname(&self, qname: &str) -> Option<usize> {
        self.by_qname.get(qname).copied()
    }

    pub fn contains_qname(&self, qname: &str) -> bool {
        self.by_qname.contains_key(qname)
    }

    pub fn get_value_by_qname(&self, qname: &str) -> Option<&str> {
        self.get(self.get_index_by_qname(qname)?)
            .map(|att| &*att.value)
    }

    /// Looks up `{namespace_name}local_name`. `None` means no namespace.
    pub fn get_index_by_expanded_name(
        &self,
        namespace_name: Option<&str>,
        local_name: &str,
    ) -> Option<usize> {
        let uri = namespace_name.unwrap_or("");
        self.by_local_name
            .get(local_name)?
            .iter()
            .find(|(bound, _)| &**bound == uri)
            .map(|&(_, index)| index)
    }

    pub fn get_value_by_expanded_name(
        &self,
        namespace_name: Option<&str>,
        local_name: &str,
    ) -> Option<&str> {
        self.get(self.get_index_by_expanded_name(namespace_name, local_name)?)
            .map(|att| &*att.value)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Attribute> {
        self.list.iter()
    }

    /// Fails with the rejected attribute if its QName, or its expanded name once namespaces
    /// are resolved, is already in the list.
    pub(crate) fn push(&mut self, attribute: Attribute) -> Result<usize, (Attribute, XMLError)> {
        if self.by_qname.contains_key(&attribute.qname) {
            return Err((attribute, XMLError::ParserDuplicateAttributes));
        }
        let index = self.list.len();
        if let Some(local_name) = attribute.local_name.clone() {
            let uri = attribute.uri.clone().unwrap_or_default();
            let bucket = self.by_local_name.entry(local_name).or_default();
            if bucket.iter().any(|(bound, _)| *bound == uri) {
                return Err((attribute, XMLError::ParserDuplicateAttributes));
            }
            bucket.push((uri, index));
        }
        self.by_qname.insert(attribute.qname.clone(), index);
        self.list.push(attribute);
        Ok(index)
    }
}

impl Index<usize> for Attributes {
    type Output = Attribute;

    fn index(&self, index: usize) -> &Self::Output {
        &self.list[index]
    }
}

impl<'a> IntoIterator for &'a Attributes {
    type IntoIter = std::slice::Iter<'a, Attribute>;
    type Item = &'a Attribute;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resolved(qname: &str, uri: Option<&str>, local_name: &str) -> Attribute {
        let mut att = Attribute::specified(qname.into(), "v");
        att.uri = uri.map(Arc::from);
        att.local_name = Some(local_name.into());
        att
    }

    #[test]
    fn lookup_by_both_names() {
        let mut atts = Attributes::new();
        atts.push(resolved("a:x", Some("urn:a"), "x")).unwrap();
        atts.push(resolved("x", None, "x")).unwrap();
        assert_eq!(atts.get_index_by_qname("x"), Some(1));
        assert_eq!(atts.get_index_by_expanded_name(Some("urn:a"), "x"), Some(0));
        assert_eq!(atts.get_index_by_expanded_name(None, "x"), Some(1));
        assert_eq!(atts[0].prefix(), Some("a"));
        assert_eq!(atts[1].prefix(), None);
    }

    #[test]
    fn same_expanded_name_under_different_prefixes() {
        let mut atts = Attributes::new();
        atts.push(resolved("a:x", Some("urn:a"), "x")).unwrap();
        let err = atts.push(resolved("b:x", Some("urn:a"), "x")).unwrap_err();
        assert!(matches!(err.1, XMLError::ParserDuplicateAttributes));
        assert_eq!(atts.len(), 1);
    }

    #[test]
    fn defaulted_attributes() {
        let att = Attribute::defaulted("kind".into(), "memo");
        assert!(att.is_declared() && !att.is_specified());
        let att = Attribute::specified("kind".into(), "letter");
        assert!(!att.is_declared() && att.is_specified());
    }
}
