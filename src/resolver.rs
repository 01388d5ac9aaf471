//! Resolution of external identifiers to input sources.

use std::{fs::File, path::Path, sync::Arc};

use log::debug;
use url::Url;

use crate::{error::XMLError, source::InputSource};

/// Resolves a system identifier against `base`.
///
/// Without a base, an absolute URI is used as is and anything else is taken as a file
/// path relative to the current directory.
pub fn resolve_system_id(base: Option<&Url>, system_id: &str) -> Result<Url, XMLError> {
    if let Some(base) = base {
        return Ok(base.join(system_id)?);
    }
    match Url::parse(system_id) {
        Ok(url) => Ok(url),
        Err(url::ParseError::RelativeUrlWithoutBase) => {
            let path = Path::new(system_id);
            let path = if path.is_absolute() {
                path.to_path_buf()
            } else {
                std::env::current_dir()?.join(path)
            };
            Url::from_file_path(&path).map_err(|_| XMLError::EntityUnresolvable)
        }
        Err(err) => Err(err.into()),
    }
}

/// Opens external entities and DTD subsets.
///
/// The default implementation reads `file:` URLs from the local file system.
/// When handling untrusted documents, install a resolver that restricts access, such as
/// [`NoExternalResolver`].
pub trait EntityResolver {
    /// `name` is the entity name (`%name` for parameter entities, `[dtd]` for the external
    /// subset, `[document]` for the document itself).
    fn resolve_entity(
        &mut self,
        name: &str,
        public_id: Option<&str>,
        base_uri: Option<&Url>,
        system_id: &str,
    ) -> Result<InputSource<'static>, XMLError> {
        let _ = public_id;
        let url = resolve_system_id(base_uri, system_id)?;
        debug!("resolve '{name}' to {url}");
        open_url(&url)
    }
}

/// Opens a `file:` URL as an input source with its system identifier and base URI set.
pub fn open_url(url: &Url) -> Result<InputSource<'static>, XMLError> {
    if url.scheme() != "file" {
        return Err(XMLError::IOUnsupportedScheme);
    }
    let path = url
        .to_file_path()
        .map_err(|_| XMLError::EntityUnresolvable)?;
    let file = File::open(path)?;
    let mut source = InputSource::from_reader(file, None)?;
    source.set_system_id(url.as_str());
    source.set_base_uri(Arc::new(url.clone()));
    Ok(source)
}

pub struct DefaultEntityResolver;

impl EntityResolver for DefaultEntityResolver {}

/// Refuses every external entity.
pub struct NoExternalResolver;

impl EntityResolver for NoExternalResolver {
    fn resolve_entity(
        &mut self,
        _name: &str,
        _public_id: Option<&str>,
        _base_uri: Option<&Url>,
        _system_id: &str,
    ) -> Result<InputSource<'static>, XMLError> {
        Err(XMLError::EntityUnresolvable)
    }
}

impl<F> EntityResolver for F
where
    F: FnMut(&str, Option<&str>, Option<&Url>, &str) -> Result<InputSource<'static>, XMLError>,
{
    fn resolve_entity(
        &mut self,
        name: &str,
        public_id: Option<&str>,
        base_uri: Option<&Url>,
        system_id: &str,
    ) -> Result<InputSource<'static>, XMLError> {
        self(name, public_id, base_uri, system_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn relative_resolution() {
        let base = Url::parse("file:///data/docs/a.xml").unwrap();
        let url = resolve_system_id(Some(&base), "../dtd/b.dtd").unwrap();
        assert_eq!(url.as_str(), "file:///data/dtd/b.dtd");

        let url = resolve_system_id(None, "http://example.com/x.dtd").unwrap();
        assert_eq!(url.scheme(), "http");
        assert!(matches!(open_url(&url), Err(XMLError::IOUnsupportedScheme)));

        let url = resolve_system_id(None, "x.dtd").unwrap();
        assert_eq!(url.scheme(), "file");
        assert!(url.path().ends_with("/x.dtd"));
    }
}
