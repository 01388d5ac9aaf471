use std::{collections::HashSet, sync::Arc};

use crate::{
    config::ParserOption,
    dtd::{AttributeDecl, AttributeType, DefaultDecl, ElementDecl},
    entity::EntityKind,
    error::{Location, XMLError, XMLErrorLevel, XMLStreamError, validity_error},
    stax::{XMLStreamReader, attributes::Attribute},
};

/// Document-wide validation state.
#[derive(Debug, Default)]
pub(crate) struct ValidationContext {
    ids: HashSet<Arc<str>>,
    /// IDREF values with the location of the start tag they appeared on
    idrefs: Vec<(Arc<str>, Location)>,
}

impl ValidationContext {
    pub(crate) fn reset(&mut self) {
        self.ids.clear();
        self.idrefs.clear();
    }
}

impl XMLStreamReader<'_> {
    /// Marks declared attributes, appends defaulted ones, and validates the attribute list
    /// when validation is enabled.
    pub(crate) fn apply_attribute_declarations(
        &mut self,
        element: &str,
        decl: Option<&ElementDecl>,
        attributes: &mut Vec<Attribute>,
    ) -> Result<(), XMLStreamError> {
        let validating = self.is_validating();
        if validating && decl.is_none_or(|decl| decl.content().is_none()) {
            validity_error!(
                self,
                ValidUndeclaredElement,
                "the element '{}' is not declared",
                element
            )?;
        }
        let Some(decl) = decl else {
            return Ok(());
        };

        for attribute in attributes.iter_mut() {
            match decl.attribute(&attribute.qname) {
                Some(att_decl) => {
                    attribute.declared = true;
                    if validating {
                        self.validate_attribute_value(element, att_decl, &attribute.value)?;
                    }
                }
                None if validating => {
                    validity_error!(
                        self,
                        ValidUndeclaredAttribute,
                        "the attribute '{}' is not declared for '{}'",
                        attribute.qname,
                        element
                    )?;
                }
                None => {}
            }
        }

        for att_decl in decl.attributes() {
            let present = attributes
                .iter()
                .position(|attribute| attribute.qname == att_decl.name);
            match (&att_decl.default_decl, present) {
                (DefaultDecl::REQUIRED, None) if validating => {
                    validity_error!(
                        self,
                        ValidRequiredAttributeNotFound,
                        "the required attribute '{}' of '{}' is missing",
                        att_decl.name,
                        element
                    )?;
                }
                (DefaultDecl::FIXED(fixed), Some(index))
                    if validating && *attributes[index].value != **fixed =>
                {
                    validity_error!(
                        self,
                        ValidMismatchFixedDefaultAttributeValue,
                        "the attribute '{}' of '{}' must have the fixed value '{}'",
                        att_decl.name,
                        element,
                        fixed
                    )?;
                }
                (DefaultDecl::FIXED(value) | DefaultDecl::None(value), None) => {
                    attributes.push(Attribute::defaulted(att_decl.name.clone(), &**value));
                }
                _ => {}
            }
        }
        Ok(())
    }

    fn validate_attribute_value(
        &mut self,
        element: &str,
        decl: &AttributeDecl,
        value: &str,
    ) -> Result<(), XMLStreamError> {
        let version = self.version();
        let namespaces = self.is_enabled(ParserOption::Namespaces);
        let is_name = |name: &str| {
            if namespaces {
                version.validate_ncname(name)
            } else {
                version.validate_name(name)
            }
        };
        match &decl.att_type {
            AttributeType::CDATA => Ok(()),
            AttributeType::ID => {
                if !is_name(value) {
                    return self.invalid_attribute_value(element, decl, value);
                }
                if !self.validation.ids.insert(value.into()) {
                    return validity_error!(
                        self,
                        ValidDuplicateID,
                        "the ID '{}' is already used",
                        value
                    );
                }
                Ok(())
            }
            AttributeType::IDREF | AttributeType::IDREFS => {
                let multiple = decl.att_type == AttributeType::IDREFS;
                if value.is_empty() || (!multiple && value.contains(' ')) {
                    return self.invalid_attribute_value(element, decl, value);
                }
                for idref in value.split(' ') {
                    if !is_name(idref) {
                        return self.invalid_attribute_value(element, decl, value);
                    }
                    let location = self.event_location.clone();
                    self.validation.idrefs.push((idref.into(), location));
                }
                Ok(())
            }
            AttributeType::ENTITY | AttributeType::ENTITIES => {
                let multiple = decl.att_type == AttributeType::ENTITIES;
                if value.is_empty() || (!multiple && value.contains(' ')) {
                    return self.invalid_attribute_value(element, decl, value);
                }
                for name in value.split(' ') {
                    let unparsed = self
                        .dtd
                        .as_ref()
                        .and_then(|dtd| dtd.general_entity(name))
                        .is_some_and(|entity| entity.kind() == EntityKind::ExternalUnparsed);
                    if !unparsed {
                        validity_error!(
                            self,
                            ValidUndeclaredEntity,
                            "'{}' in the attribute '{}' is not an unparsed entity",
                            name,
                            decl.name
                        )?;
                    }
                }
                Ok(())
            }
            AttributeType::NMTOKEN => {
                if !version.validate_nmtoken(value) {
                    return self.invalid_attribute_value(element, decl, value);
                }
                Ok(())
            }
            AttributeType::NMTOKENS => {
                if value.is_empty()
                    || !value.split(' ').all(|token| version.validate_nmtoken(token))
                {
                    return self.invalid_attribute_value(element, decl, value);
                }
                Ok(())
            }
            AttributeType::NOTATION(names) => {
                if !names.iter().any(|name| name.as_ref() == value) {
                    return self.invalid_attribute_value(element, decl, value);
                }
                let declared = self
                    .dtd
                    .as_ref()
                    .is_some_and(|dtd| dtd.notation(value).is_some());
                if !declared {
                    return validity_error!(
                        self,
                        ValidUndeclaredNotation,
                        "the notation '{}' is not declared",
                        value
                    );
                }
                Ok(())
            }
            AttributeType::Enumeration(names) => {
                if !names.iter().any(|name| name.as_ref() == value) {
                    return self.invalid_attribute_value(element, decl, value);
                }
                Ok(())
            }
        }
    }

    fn invalid_attribute_value(
        &mut self,
        element: &str,
        decl: &AttributeDecl,
        value: &str,
    ) -> Result<(), XMLStreamError> {
        validity_error!(
            self,
            ValidInvalidAttributeValue,
            "'{}' is not a valid value for the attribute '{}' of '{}' (type {})",
            value,
            decl.name,
            element,
            decl.att_type
        )
    }

    /// Reports IDREF values that no ID matches. Called once the root element is closed.
    pub(crate) fn check_id_references(&mut self) -> Result<(), XMLStreamError> {
        let idrefs = std::mem::take(&mut self.validation.idrefs);
        for (idref, location) in idrefs {
            if !self.validation.ids.contains(&idref) {
                let message = format!("no element has the ID '{idref}'");
                let error = XMLStreamError::new(
                    XMLError::ValidUnresolvableIDReference,
                    XMLErrorLevel::Error,
                    location,
                    message.clone(),
                );
                if let Err(code) = self.handler.error(error) {
                    return Err(self.report_fatal(code, XMLErrorLevel::FatalError, message.into()));
                }
            }
        }
        Ok(())
    }
}
