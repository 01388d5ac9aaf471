//! Reader options and resource limits.

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum ParserOption {
    /// Resolve element and attribute prefixes against in-scope namespace declarations.
    Namespaces = 0,
    /// Merge adjacent text, CDATA sections and expanded entity text into one `Characters` event.
    Coalescing = 1,
    /// Read the internal and external DTD subsets, and apply attribute defaults.
    SupportDTD = 2,
    /// Validate the document against its DTD.
    Validation = 3,
    /// Expand general entity references instead of reporting `EntityReference` events.
    ReplaceEntityReferences = 4,
    /// Load external parsed general entities.
    ExternalGeneralEntities = 5,
    /// Load external parameter entities and the external DTD subset.
    ExternalParameterEntities = 6,
    /// Treat namespace problems (such as undeclared prefixes) as fatal errors.
    StrictNamespaces = 7,
}

impl std::ops::BitOr<Self> for ParserOption {
    type Output = ParserConfig;

    fn bitor(self, rhs: Self) -> Self::Output {
        ParserConfig::empty() | self | rhs
    }
}

impl std::ops::BitOr<ParserConfig> for ParserOption {
    type Output = ParserConfig;

    fn bitor(self, rhs: ParserConfig) -> Self::Output {
        rhs | self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ParserConfig {
    flags: u64,
}

impl ParserConfig {
    /// A configuration with every option disabled.
    pub const fn empty() -> Self {
        Self { flags: 0 }
    }

    pub fn is_enable(&self, option: ParserOption) -> bool {
        self.flags & (1 << option as u32) != 0
    }

    pub fn set_option(&mut self, option: ParserOption, flag: bool) {
        if flag {
            self.flags |= 1 << option as u32;
        } else {
            self.flags &= !(1 << option as u32);
        }
    }
}

impl Default for ParserConfig {
    fn default() -> Self {
        ParserOption::Namespaces
            | ParserOption::SupportDTD
            | ParserOption::ReplaceEntityReferences
            | ParserOption::ExternalGeneralEntities
            | ParserOption::ExternalParameterEntities
    }
}

impl std::ops::BitOr<Self> for ParserConfig {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self::Output {
        ParserConfig {
            flags: self.flags | rhs.flags,
        }
    }
}

impl std::ops::BitOr<ParserOption> for ParserConfig {
    type Output = Self;

    fn bitor(mut self, rhs: ParserOption) -> Self::Output {
        self.set_option(rhs, true);
        self
    }
}

impl std::ops::BitOrAssign<ParserOption> for ParserConfig {
    fn bitor_assign(&mut self, rhs: ParserOption) {
        self.set_option(rhs, true);
    }
}

/// Resource limits enforced while reading.
///
/// The entity limits bound the amplification of nested entity definitions
/// ("billion laughs"). Exceeding any limit is a fatal error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ParserLimits {
    /// Maximum number of entities being expanded at the same time.
    pub max_entity_depth: usize,
    /// Maximum number of entity expansions over the whole document.
    pub max_entity_count: usize,
    /// Maximum number of characters produced by one reference made outside any entity,
    /// nested references included.
    pub max_text_length: usize,
    /// Maximum number of characters produced by entity expansion over the whole document.
    pub max_total_expansion: Option<usize>,
    pub max_element_depth: usize,
    pub max_attribute_count: usize,
    /// Number of bytes requested from the underlying reader at once.
    pub input_buffer_size: usize,
}

impl Default for ParserLimits {
    fn default() -> Self {
        Self {
            max_entity_depth: 32,
            max_entity_count: 100_000,
            max_text_length: 8 * 1024 * 1024,
            max_total_expansion: None,
            max_element_depth: 1000,
            max_attribute_count: 1000,
            input_buffer_size: 4096,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn option_flags() {
        let mut config = ParserOption::Coalescing | ParserOption::Validation;
        assert!(config.is_enable(ParserOption::Coalescing));
        assert!(config.is_enable(ParserOption::Validation));
        assert!(!config.is_enable(ParserOption::Namespaces));
        config.set_option(ParserOption::Coalescing, false);
        assert!(!config.is_enable(ParserOption::Coalescing));

        let config = ParserConfig::default();
        assert!(config.is_enable(ParserOption::Namespaces));
        assert!(config.is_enable(ParserOption::SupportDTD));
        assert!(!config.is_enable(ParserOption::Validation));
        assert!(!config.is_enable(ParserOption::StrictNamespaces));
    }
}
