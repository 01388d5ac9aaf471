#![doc = include_str!("../README.md")]

pub mod config;
pub mod dtd;
pub mod encoding;
pub mod entity;
pub mod error;
pub mod handler;
pub mod resolver;
pub mod source;
pub mod stax;
pub mod words;
pub mod writer;

use std::{convert::Infallible, str::FromStr};

pub use config::{ParserConfig, ParserLimits, ParserOption};
pub use error::{Location, XMLError, XMLErrorLevel, XMLStreamError};
pub use stax::{XMLStreamReader, XMLStreamReaderBuilder, events::XMLEvent};
pub use writer::XMLStreamWriter;

/// Namespace bound to the `xml` prefix.
pub const XML_XML_NAMESPACE: &str = "http://www.w3.org/XML/1998/namespace";
/// Namespace bound to the `xmlns` prefix.
pub const XML_NS_NAMESPACE: &str = "http://www.w3.org/2000/xmlns/";

/// Maximum length of XML version numbers accepted by the reader
const XML_VERSION_NUM_LIMIT_LENGTH: usize = 128;
/// Maximum length of encoding names accepted by the reader
const ENCODING_NAME_LIMIT_LENGTH: usize = 128;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
pub enum XMLVersion {
    /// XML 1.0
    #[default]
    XML10,
    /// Some other `1.x` version. Processed with XML 1.0 rules.
    Unknown,
}

impl XMLVersion {
    /// ```text
    /// [2] Char ::= #x9 | #xA | #xD | [#x20-#xD7FF] | [#xE000-#xFFFD] | [#x10000-#x10FFFF]
    /// ```
    pub fn is_char(&self, c: char) -> bool {
        matches!(c, '\t' | '\n' | '\r' | '\u{20}'..='\u{D7FF}' | '\u{E000}'..='\u{FFFD}' | '\u{10000}'..)
    }

    /// ```text
    /// [4] NameStartChar ::= ":" | [A-Z] | "_" | [a-z] | [#xC0-#xD6] | [#xD8-#xF6]
    ///                     | [#xF8-#x2FF] | [#x370-#x37D] | [#x37F-#x1FFF] | [#x200C-#x200D]
    ///                     | [#x2070-#x218F] | [#x2C00-#x2FEF] | [#x3001-#xD7FF]
    ///                     | [#xF900-#xFDCF] | [#xFDF0-#xFFFD] | [#x10000-#xEFFFF]
    /// ```
    pub fn is_name_start_char(&self, c: char) -> bool {
        if c.is_ascii() {
            return c.is_ascii_alphabetic() || c == ':' || c == '_';
        }
        matches!(c,
            '\u{C0}'..='\u{D6}'
            | '\u{D8}'..='\u{F6}'
            | '\u{F8}'..='\u{2FF}'
            | '\u{370}'..='\u{37D}'
            | '\u{37F}'..='\u{1FFF}'
            | '\u{200C}'..='\u{200D}'
            | '\u{2070}'..='\u{218F}'
            | '\u{2C00}'..='\u{2FEF}'
            | '\u{3001}'..='\u{D7FF}'
            | '\u{F900}'..='\u{FDCF}'
            | '\u{FDF0}'..='\u{FFFD}'
            | '\u{10000}'..='\u{EFFFF}'
        )
    }

    /// ```text
    /// [4a] NameChar ::= NameStartChar | "-" | "." | [0-9] | #xB7 | [#x0300-#x036F] | [#x203F-#x2040]
    /// ```
    pub fn is_name_char(&self, c: char) -> bool {
        if c.is_ascii() {
            return c.is_ascii_alphanumeric() || matches!(c, ':' | '_' | '-' | '.');
        }
        self.is_name_start_char(c)
            || matches!(c, '\u{B7}' | '\u{300}'..='\u{36F}' | '\u{203F}'..='\u{2040}')
    }

    /// ```text
    /// [13] PubidChar ::= #x20 | #xD | #xA | [a-zA-Z0-9] | [-'()+,./:=?;!*#@$_%]
    /// ```
    pub fn is_pubid_char(&self, c: char) -> bool {
        c.is_ascii_alphanumeric() || " \r\n-'()+,./:=?;!*#@$_%".contains(c)
    }

    /// ```text
    /// [3] S ::= (#x20 | #x9 | #xD | #xA)+
    /// ```
    pub fn is_whitespace(&self, c: char) -> bool {
        matches!(c, ' ' | '\t' | '\r' | '\n')
    }

    /// ```text
    /// [5] Name ::= NameStartChar (NameChar)*
    /// ```
    pub fn validate_name(&self, s: &str) -> bool {
        let mut chars = s.chars();
        chars.next().is_some_and(|c| self.is_name_start_char(c))
            && chars.all(|c| self.is_name_char(c))
    }

    /// ```text
    /// [7] Nmtoken ::= (NameChar)+
    /// ```
    pub fn validate_nmtoken(&self, s: &str) -> bool {
        !s.is_empty() && s.chars().all(|c| self.is_name_char(c))
    }

    /// ```text
    /// [4] NCName ::= Name - (Char* ':' Char*)
    /// ```
    pub fn validate_ncname(&self, s: &str) -> bool {
        !s.contains(':') && self.validate_name(s)
    }

    /// ```text
    /// [7]  QName          ::= PrefixedName | UnprefixedName
    /// [8]  PrefixedName   ::= Prefix ':' LocalPart
    /// [9]  UnprefixedName ::= LocalPart
    /// ```
    pub fn validate_qname(&self, s: &str) -> bool {
        match s.split_once(':') {
            Some((prefix, local)) => self.validate_ncname(prefix) && self.validate_ncname(local),
            None => self.validate_ncname(s),
        }
    }
}

impl std::fmt::Display for XMLVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "1.0")
    }
}

impl FromStr for XMLVersion {
    type Err = Infallible;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "1.0" => Ok(XMLVersion::XML10),
            _ => Ok(XMLVersion::Unknown),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn qname_validation() {
        let v = XMLVersion::XML10;
        assert!(v.validate_qname("a"));
        assert!(v.validate_qname("x:a"));
        assert!(!v.validate_qname("x:a:b"));
        assert!(!v.validate_qname(":a"));
        assert!(!v.validate_qname("a:"));
        assert!(!v.validate_name("1a"));
        assert!(v.validate_nmtoken("1a"));
    }
}
