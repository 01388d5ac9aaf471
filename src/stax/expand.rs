//! General entity references in content and in attribute values.

use std::sync::Arc;

use log::{debug, trace};
use url::Url;

use crate::{
    config::ParserOption,
    entity::{EntityDecl, EntityKind, ExternalId, predefined_entity},
    error::{XMLError, XMLStreamError, fatal_error, validity_error, warning},
    resolver::resolve_system_id,
    source::{InputSource, SourceKind},
    stax::{
        XMLStreamReader,
        events::{EntityReference, XMLEvent},
    },
};

/// The outcome of a reference in content.
pub(crate) enum Reference {
    /// A character reference or a predefined entity.
    Char(char),
    /// The replacement text is now the current source.
    Pushed,
    /// The reference is reported as an event.
    Unexpanded(XMLEvent),
}

/// Decodes the part of a character reference between `&#` and `;`.
pub(crate) fn char_from_reference(reference: &str) -> Option<char> {
    let code = match reference.strip_prefix('x') {
        Some(hex) if !hex.is_empty() && hex.bytes().all(|b| b.is_ascii_hexdigit()) => {
            u32::from_str_radix(hex, 16).ok()?
        }
        None if !reference.is_empty() && reference.bytes().all(|b| b.is_ascii_digit()) => {
            reference.parse().ok()?
        }
        _ => return None,
    };
    char::from_u32(code)
}

fn normalize_attribute_char(c: char) -> char {
    if matches!(c, '\t' | '\n' | '\r') { ' ' } else { c }
}

impl<'a> XMLStreamReader<'a> {
    /// ```text
    /// [67] Reference ::= EntityRef | CharRef
    /// [68] EntityRef ::= '&' Name ';'
    /// ```
    /// The current source is positioned at `&`.
    pub(crate) fn parse_reference(&mut self) -> Result<Reference, XMLStreamError> {
        if self.starts_with("&#")? {
            return Ok(Reference::Char(self.parse_char_ref()?));
        }
        self.advance(1);
        let mut name = String::new();
        self.parse_name(&mut name)?;
        if !self.consume(";")? {
            return Err(fatal_error!(
                self,
                ParserInvalidEntityReference,
                "the reference to '{}' is not closed with ';'",
                name
            ));
        }
        if let Some(c) = predefined_entity(&name) {
            return Ok(Reference::Char(c));
        }

        let Some(decl) = self.general_entity(&name) else {
            self.undeclared_entity(&name)?;
            return Ok(Reference::Unexpanded(XMLEvent::EntityReference(
                EntityReference {
                    name: self.symbols.intern(&name),
                    replacement_text: None,
                },
            )));
        };
        self.check_standalone_reference(&decl)?;
        let expand = match decl.kind() {
            EntityKind::ExternalUnparsed => {
                return Err(fatal_error!(
                    self,
                    ParserUnparsedEntityReference,
                    "the unparsed entity '{}' cannot be referenced in content",
                    name
                ));
            }
            EntityKind::Internal => self.is_enabled(ParserOption::ReplaceEntityReferences),
            EntityKind::ExternalParsed => {
                self.is_enabled(ParserOption::ReplaceEntityReferences)
                    && self.is_enabled(ParserOption::ExternalGeneralEntities)
            }
        };
        if !expand {
            return Ok(Reference::Unexpanded(XMLEvent::EntityReference(
                EntityReference {
                    name: decl.name().clone(),
                    replacement_text: decl.replacement_text().cloned(),
                },
            )));
        }
        if self.sources.is_reading_entity(&name) {
            return Err(fatal_error!(
                self,
                ParserEntityRecursion,
                "the entity '{}' references itself",
                name
            ));
        }
        self.push_general_entity(&decl)?;
        Ok(Reference::Pushed)
    }

    /// Makes the replacement text of `decl` the current source.
    fn push_general_entity(&mut self, decl: &EntityDecl) -> Result<(), XMLStreamError> {
        let name = decl.name().clone();
        self.enter_entity(&name)?;
        let (mut source, external) = match decl {
            EntityDecl::Internal {
                replacement_text,
                base_uri,
                ..
            } => {
                let mut source = InputSource::from_entity_text(replacement_text);
                if let Some(base_uri) = base_uri {
                    source.set_base_uri(base_uri.clone());
                }
                (source, false)
            }
            EntityDecl::ExternalParsed {
                external_id,
                base_uri,
                ..
            } => (
                self.open_external_entity(&name, external_id, base_uri.as_deref())?,
                true,
            ),
            EntityDecl::ExternalUnparsed { .. } => return Err(self.fail(XMLError::InternalError)),
        };
        source.set_entity(name, SourceKind::GeneralEntity);
        source.element_depth_at_entry = self.elements.len();
        self.sources.push(source);
        if external {
            self.parse_declaration(true)?;
        }
        Ok(())
    }

    /// Opens an external entity through the resolver.
    ///
    /// `name` is the entity name as passed to the resolver (`%name` for parameter entities).
    pub(crate) fn open_external_entity(
        &mut self,
        name: &str,
        external_id: &ExternalId,
        base_uri: Option<&Url>,
    ) -> Result<InputSource<'static>, XMLStreamError> {
        let base = match base_uri {
            Some(base) => Some(Arc::new(base.clone())),
            None => self.sources.base_uri(),
        };
        debug!(
            "resolve entity '{name}' (public: {:?}, system: {})",
            external_id.public_id, external_id.system_id
        );
        let resolved = self.resolver.resolve_entity(
            name,
            external_id.public_id.as_deref(),
            base.as_deref(),
            &external_id.system_id,
        );
        match resolved {
            Ok(mut source) => {
                if source.system_id().is_none() {
                    source.set_system_id(external_id.system_id.clone());
                }
                if let Some(public_id) = &external_id.public_id
                    && source.public_id().is_none()
                {
                    source.set_public_id(public_id.clone());
                }
                if source.base_uri().is_none()
                    && let Ok(url) = resolve_system_id(base.as_deref(), &external_id.system_id)
                {
                    source.set_base_uri(Arc::new(url));
                }
                Ok(source)
            }
            Err(err) => Err(fatal_error!(
                self,
                EntityUnresolvable,
                "the entity '{}' ({}) cannot be opened: {}",
                name,
                external_id.system_id,
                err
            )),
        }
    }

    /// Accounts for one more entity expansion.
    pub(crate) fn enter_entity(&mut self, name: &str) -> Result<(), XMLStreamError> {
        if self.budget.depth() == 0 {
            self.budget.start_segment();
        }
        match self.budget.enter(&self.limits) {
            Ok(()) => {
                trace!(
                    "expand entity '{name}' (depth {}, count {})",
                    self.budget.depth(),
                    self.budget.count()
                );
                Ok(())
            }
            Err(XMLError::EntityDepthExceeded) => Err(fatal_error!(
                self,
                EntityDepthExceeded,
                "expanding '{}' exceeds the entity nesting limit of {}",
                name,
                self.limits.max_entity_depth
            )),
            Err(XMLError::EntityCountExceeded) => Err(fatal_error!(
                self,
                EntityCountExceeded,
                "expanding '{}' exceeds the limit of {} entity expansions",
                name,
                self.limits.max_entity_count
            )),
            Err(err) => Err(self.fail(err)),
        }
    }

    /// Leaves the exhausted general entity that is the current source.
    pub(crate) fn pop_entity(&mut self) -> Result<(), XMLStreamError> {
        if self.elements.len() != self.sources.current().element_depth_at_entry {
            let name = self
                .sources
                .current()
                .entity_name()
                .map(|name| name.to_string())
                .unwrap_or_default();
            return Err(fatal_error!(
                self,
                ParserEntityIncorrectNesting,
                "the entity '{}' ends inside an element it started",
                name
            ));
        }
        if let Err(err) = self.sources.pop() {
            return Err(self.fail(err));
        }
        self.budget.leave();
        Ok(())
    }

    /// A reference to an undeclared general entity is fatal unless some declarations may
    /// have been skipped.
    pub(crate) fn undeclared_entity(&mut self, name: &str) -> Result<(), XMLStreamError> {
        if !self.dtd_incomplete || self.standalone() == Some(true) {
            return Err(fatal_error!(
                self,
                ParserUndeclaredEntityReference,
                "the entity '{}' is not declared",
                name
            ));
        }
        if self.is_validating() {
            validity_error!(
                self,
                ValidUndeclaredEntity,
                "the entity '{}' is not declared",
                name
            )
        } else {
            warning!(
                self,
                ParserUndeclaredEntityReference,
                "the entity '{}' is not declared, and some declarations were not read",
                name
            )
        }
    }

    fn check_standalone_reference(&mut self, decl: &EntityDecl) -> Result<(), XMLStreamError> {
        if decl.is_external_markup() && self.standalone() == Some(true) {
            return Err(fatal_error!(
                self,
                ParserUndeclaredEntityReference,
                "'{}' is declared in external markup, which a standalone document cannot reference",
                decl.name()
            ));
        }
        Ok(())
    }

    /// ```text
    /// [10] AttValue ::= '"' ([^<&"] | Reference)* '"' | "'" ([^<&'] | Reference)* "'"
    /// ```
    /// Reads a quoted attribute value, expanding references and mapping whitespace
    /// characters to spaces. Collapsing for non-CDATA types is left to the caller.
    pub(crate) fn parse_att_value(&mut self, out: &mut String) -> Result<(), XMLStreamError> {
        let quote = match self.peek_char()? {
            Some(c @ ('"' | '\'')) => c,
            _ => {
                return Err(fatal_error!(
                    self,
                    ParserInvalidAttValue,
                    "an attribute value must be quoted"
                ));
            }
        };
        self.advance(1);
        let version = self.version();
        let mut active = vec![];
        let mut run = String::new();
        loop {
            run.clear();
            self.take_chars(&mut run, |_, c| {
                c != quote && c != '<' && c != '&' && version.is_char(c)
            })?;
            out.extend(run.chars().map(normalize_attribute_char));
            match self.peek_char()? {
                Some(c) if c == quote => {
                    self.advance(1);
                    return Ok(());
                }
                Some('<') => {
                    return Err(fatal_error!(
                        self,
                        ParserInvalidAttValue,
                        "'<' is not allowed in attribute values"
                    ));
                }
                Some('&') if self.starts_with("&#")? => {
                    let c = self.parse_char_ref()?;
                    out.push(c);
                }
                Some('&') => {
                    self.advance(1);
                    let mut name = String::new();
                    self.parse_name(&mut name)?;
                    if !self.consume(";")? {
                        return Err(fatal_error!(
                            self,
                            ParserInvalidEntityReference,
                            "the reference to '{}' is not closed with ';'",
                            name
                        ));
                    }
                    self.expand_in_attribute(&name, out, &mut active)?;
                }
                Some(c) => {
                    let code = c as u32;
                    return Err(fatal_error!(
                        self,
                        ParserInvalidCharacter,
                        "the character U+{:04X} is not allowed",
                        code
                    ));
                }
                None => {
                    return Err(fatal_error!(
                        self,
                        ParserUnexpectedEOF,
                        "the attribute value is not closed"
                    ));
                }
            }
        }
    }

    fn expand_in_attribute(
        &mut self,
        name: &str,
        out: &mut String,
        active: &mut Vec<Arc<str>>,
    ) -> Result<(), XMLStreamError> {
        if let Some(c) = predefined_entity(name) {
            out.push(c);
            return Ok(());
        }
        let Some(decl) = self.general_entity(name) else {
            return self.undeclared_entity(name);
        };
        self.check_standalone_reference(&decl)?;
        let text = match decl.as_ref() {
            EntityDecl::Internal {
                replacement_text, ..
            } => replacement_text.clone(),
            EntityDecl::ExternalParsed { .. } => {
                return Err(fatal_error!(
                    self,
                    ParserExternalEntityInAttribute,
                    "the external entity '{}' cannot be referenced in an attribute value",
                    name
                ));
            }
            EntityDecl::ExternalUnparsed { .. } => {
                return Err(fatal_error!(
                    self,
                    ParserUnparsedEntityReference,
                    "the unparsed entity '{}' cannot be referenced in an attribute value",
                    name
                ));
            }
        };
        if active.iter().any(|n| n.as_ref() == name) || self.sources.is_reading_entity(name) {
            return Err(fatal_error!(
                self,
                ParserEntityRecursion,
                "the entity '{}' references itself",
                name
            ));
        }
        self.enter_entity(name)?;
        active.push(decl.name().clone());
        let result = self.expand_text_in_attribute(name, &text, out, active);
        active.pop();
        self.budget.leave();
        result
    }

    fn expand_text_in_attribute(
        &mut self,
        entity: &str,
        text: &str,
        out: &mut String,
        active: &mut Vec<Arc<str>>,
    ) -> Result<(), XMLStreamError> {
        let mut rest = text;
        while !rest.is_empty() {
            let end = rest.find(['<', '&']).unwrap_or(rest.len());
            let plain = &rest[..end];
            out.extend(plain.chars().map(normalize_attribute_char));
            self.count_expanded_text(plain.chars().count())?;
            rest = &rest[end..];
            if rest.starts_with('<') {
                return Err(fatal_error!(
                    self,
                    ParserInvalidAttValue,
                    "the replacement text of '{}' contains '<' and cannot be used in an attribute value",
                    entity
                ));
            }
            let Some(after) = rest.strip_prefix('&') else {
                break;
            };
            let Some(semicolon) = after.find(';') else {
                return Err(fatal_error!(
                    self,
                    ParserInvalidEntityReference,
                    "a reference in the replacement text of '{}' is not closed with ';'",
                    entity
                ));
            };
            let reference = &after[..semicolon];
            if let Some(digits) = reference.strip_prefix('#') {
                let version = self.version();
                match char_from_reference(digits).filter(|&c| version.is_char(c)) {
                    Some(c) => {
                        out.push(c);
                        self.count_expanded_text(1)?;
                    }
                    None => {
                        return Err(fatal_error!(
                            self,
                            ParserInvalidCharacterReference,
                            "'&{};' in the replacement text of '{}' is not a legal character reference",
                            reference,
                            entity
                        ));
                    }
                }
            } else if self.version().validate_name(reference) {
                self.expand_in_attribute(reference, out, active)?;
            } else {
                return Err(fatal_error!(
                    self,
                    ParserInvalidEntityReference,
                    "'&{};' in the replacement text of '{}' is not a valid reference",
                    reference,
                    entity
                ));
            }
            rest = &after[semicolon + 1..];
        }
        Ok(())
    }
}
