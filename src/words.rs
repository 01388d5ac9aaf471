//! Name lookup structures shared by the DTD reader and the tokenizer.

use std::{collections::HashSet, sync::Arc};

/// An immutable set of words supporting exact-match lookup.
///
/// Words are kept sorted, so lookups are binary searches over whole strings.
/// A word is found only if the query is equal to it: neither a prefix nor an extension
/// of a stored word matches.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WordResolver {
    words: Box<[Arc<str>]>,
}

impl WordResolver {
    pub fn new<I, S>(words: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<Arc<str>>,
    {
        let mut words = words.into_iter().map(Into::into).collect::<Vec<Arc<str>>>();
        words.sort_unstable();
        words.dedup();
        Self {
            words: words.into_boxed_slice(),
        }
    }

    /// Returns the position of `word` in sorted order.
    pub fn index_of(&self, word: &str) -> Option<usize> {
        self.words.binary_search_by(|w| w.as_ref().cmp(word)).ok()
    }

    /// Returns the stored (shared) instance of `word`.
    pub fn find(&self, word: &str) -> Option<&Arc<str>> {
        self.index_of(word).map(|i| &self.words[i])
    }

    pub fn contains(&self, word: &str) -> bool {
        self.index_of(word).is_some()
    }

    pub fn len(&self) -> usize {
        self.words.len()
    }

    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<str>> {
        self.words.iter()
    }
}

/// Interns names so that repeated element and attribute names share one allocation.
#[derive(Debug, Default)]
pub struct SymbolTable {
    symbols: HashSet<Arc<str>>,
}

impl SymbolTable {
    pub fn intern(&mut self, name: &str) -> Arc<str> {
        if let Some(symbol) = self.symbols.get(name) {
            return symbol.clone();
        }
        let symbol: Arc<str> = name.into();
        self.symbols.insert(symbol.clone());
        symbol
    }

    pub fn len(&self) -> usize {
        self.symbols.len()
    }

    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }

    pub fn clear(&mut self) {
        self.symbols.clear();
    }
}
