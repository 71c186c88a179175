//! Content translation.
//!
//! A translator turns fetched content into the canonical document stream an
//! index understands. Translators are created per job by factories, selected
//! by the content's media type through the `TranslatorRegistry`.
//!
//! ## Built-in Translators
//!
//! - **`SourceForwarder`**: passes XML content through unchanged
//! - **`PlainTextTranslator`**: wraps plain text into a single document
//!
//! Format extraction for binary documents stays outside Flint; register a
//! factory for those media types.

use crate::content::Content;
use crate::error::{FlintError, Result};
use dashmap::DashMap;
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};
use std::io::{Cursor, Read};
use std::sync::Arc;
use tracing::debug;

/// Converts content into a canonical document stream.
pub trait ContentTranslator: Send + Sync {
    /// Translate content.
    ///
    /// Returns `Ok(None)` when the content yields nothing to index.
    fn translate(
        &self,
        content: &dyn Content,
        parameters: &HashMap<String, String>,
    ) -> anyhow::Result<Option<Box<dyn Read + Send>>>;
}

/// Creates translators for the media types it supports.
pub trait ContentTranslatorFactory: Send + Sync {
    /// Media types this factory can create translators for
    fn supported_media_types(&self) -> Vec<String>;

    /// Create a translator, or `None` if the media type is not handled.
    fn create_translator(&self, media_type: &str) -> Option<Arc<dyn ContentTranslator>>;
}

/// Media types handled by the XML passthrough.
pub const XML_MEDIA_TYPES: [&str; 3] = ["text/xml", "application/xml", "application/xhtml+xml"];

/// Forwards XML content unchanged: XML sources are already canonical.
#[derive(Debug, Default, Clone, Copy)]
pub struct SourceForwarder;

impl ContentTranslator for SourceForwarder {
    fn translate(
        &self,
        content: &dyn Content,
        _parameters: &HashMap<String, String>,
    ) -> anyhow::Result<Option<Box<dyn Read + Send>>> {
        if content.is_deleted()? {
            return Ok(None);
        }
        let media_type = content.media_type()?;
        if !XML_MEDIA_TYPES.contains(&media_type.as_str()) {
            debug!(media_type = %media_type, "Not forwarding non-XML content");
            return Ok(None);
        }
        Ok(Some(content.source()?))
    }
}

/// Factory for `SourceForwarder`, registered by default on every manager.
#[derive(Debug, Default, Clone, Copy)]
pub struct XmlTranslatorFactory;

impl ContentTranslatorFactory for XmlTranslatorFactory {
    fn supported_media_types(&self) -> Vec<String> {
        XML_MEDIA_TYPES.iter().map(|s| s.to_string()).collect()
    }

    fn create_translator(&self, media_type: &str) -> Option<Arc<dyn ContentTranslator>> {
        if XML_MEDIA_TYPES.contains(&media_type) {
            Some(Arc::new(SourceForwarder))
        } else {
            None
        }
    }
}

/// Wraps plain text into one canonical document.
///
/// Each job parameter becomes a field, followed by a `content` field holding
/// the text. Invalid UTF-8 is replaced rather than rejected.
#[derive(Debug, Default, Clone, Copy)]
pub struct PlainTextTranslator;

impl ContentTranslator for PlainTextTranslator {
    fn translate(
        &self,
        content: &dyn Content,
        parameters: &HashMap<String, String>,
    ) -> anyhow::Result<Option<Box<dyn Read + Send>>> {
        if content.is_deleted()? {
            return Ok(None);
        }

        let mut raw = Vec::new();
        content.source()?.read_to_end(&mut raw)?;
        let text = String::from_utf8_lossy(&raw);

        let mut document = String::from("<documents>\n  <document>\n");
        let sorted: BTreeMap<&String, &String> = parameters.iter().collect();
        for (name, value) in sorted {
            document.push_str(&format!(
                "    <field name=\"{}\">{}</field>\n",
                escape_xml(name),
                escape_xml(value)
            ));
        }
        document.push_str(&format!(
            "    <field name=\"content\">{}</field>\n",
            escape_xml(&text)
        ));
        document.push_str("  </document>\n</documents>\n");

        Ok(Some(Box::new(Cursor::new(document.into_bytes()))))
    }
}

/// Factory for `PlainTextTranslator`, handling `text/plain`.
#[derive(Debug, Default, Clone, Copy)]
pub struct PlainTextTranslatorFactory;

impl ContentTranslatorFactory for PlainTextTranslatorFactory {
    fn supported_media_types(&self) -> Vec<String> {
        vec!["text/plain".to_string()]
    }

    fn create_translator(&self, media_type: &str) -> Option<Arc<dyn ContentTranslator>> {
        (media_type == "text/plain").then(|| Arc::new(PlainTextTranslator) as Arc<dyn ContentTranslator>)
    }
}

fn escape_xml(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&apos;"),
            c => escaped.push(c),
        }
    }
    escaped
}

/// Translator factories by media type, plus an optional default translator.
///
/// Later registrations for a media type overwrite earlier ones.
#[derive(Default)]
pub struct TranslatorRegistry {
    factories: DashMap<String, Arc<dyn ContentTranslatorFactory>>,
    default: RwLock<Option<Arc<dyn ContentTranslator>>>,
}

impl TranslatorRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a factory for every media type it advertises.
    pub fn register(&self, factory: Arc<dyn ContentTranslatorFactory>) {
        for media_type in factory.supported_media_types() {
            self.register_for(media_type, factory.clone());
        }
    }

    /// Register a factory for one media type.
    pub fn register_for(&self, media_type: impl Into<String>, factory: Arc<dyn ContentTranslatorFactory>) {
        let media_type = media_type.into();
        debug!(media_type = %media_type, "Registered translator factory");
        self.factories.insert(media_type, factory);
    }

    /// Set the translator used when no factory handles a media type.
    pub fn set_default(&self, translator: Option<Arc<dyn ContentTranslator>>) {
        *self.default.write() = translator;
    }

    /// Whether a default translator is configured
    pub fn has_default(&self) -> bool {
        self.default.read().is_some()
    }

    /// Media types with a registered factory, sorted
    pub fn media_types(&self) -> Vec<String> {
        let mut types: Vec<String> = self.factories.iter().map(|e| e.key().clone()).collect();
        types.sort();
        types
    }

    /// Resolve the translator for a media type.
    ///
    /// A registered factory takes precedence over the default translator.
    /// Resolution is not cached: factories may hand out a new translator per call.
    pub fn resolve(&self, media_type: &str) -> Result<Arc<dyn ContentTranslator>> {
        let factory = self.factories.get(media_type).map(|e| e.value().clone());
        if let Some(factory) = factory {
            return factory
                .create_translator(media_type)
                .ok_or_else(|| FlintError::TranslatorUnavailable {
                    media_type: media_type.to_string(),
                });
        }

        self.default
            .read()
            .clone()
            .ok_or_else(|| FlintError::NoTranslator {
                media_type: media_type.to_string(),
            })
    }
}

impl std::fmt::Debug for TranslatorRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TranslatorRegistry")
            .field("media_types", &self.media_types())
            .field("default", &self.has_default())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::content::{DeleteRule, InMemoryContent};

    fn read_all(stream: Box<dyn Read + Send>) -> String {
        let mut text = String::new();
        let mut stream = stream;
        stream.read_to_string(&mut text).unwrap();
        text
    }

    #[test]
    fn test_source_forwarder() {
        let content = InMemoryContent::new("application/xml", "<doc/>");
        let out = SourceForwarder.translate(&content, &HashMap::new()).unwrap();
        assert_eq!(read_all(out.unwrap()), "<doc/>");

        let deleted = InMemoryContent::deleted("application/xml", DeleteRule::term("id", "1"));
        assert!(SourceForwarder.translate(&deleted, &HashMap::new()).unwrap().is_none());

        let json = InMemoryContent::new("application/json", "{}");
        assert!(SourceForwarder.translate(&json, &HashMap::new()).unwrap().is_none());
    }

    #[test]
    fn test_plain_text_wraps_and_escapes() {
        let content = InMemoryContent::new("text/plain", "a < b & c");
        let mut params = HashMap::new();
        params.insert("title".to_string(), "Notes \"draft\"".to_string());

        let out = PlainTextTranslator.translate(&content, &params).unwrap().unwrap();
        let text = read_all(out);
        assert!(text.contains("<field name=\"title\">Notes &quot;draft&quot;</field>"));
        assert!(text.contains("<field name=\"content\">a &lt; b &amp; c</field>"));
    }

    #[test]
    fn test_resolve_prefers_factory_then_default() {
        let registry = TranslatorRegistry::new();
        registry.register(Arc::new(XmlTranslatorFactory));
        assert!(registry.resolve("text/xml").is_ok());

        let err = registry.resolve("application/foo").err().unwrap();
        assert!(matches!(err, FlintError::NoTranslator { .. }));
        assert!(err.to_string().contains("no translator found"));

        registry.set_default(Some(Arc::new(PlainTextTranslator)));
        assert!(registry.resolve("application/foo").is_ok());
    }

    #[test]
    fn test_factory_declining_is_an_error() {
        let registry = TranslatorRegistry::new();
        // Registered under a media type the factory does not handle
        registry.register_for("application/pdf", Arc::new(XmlTranslatorFactory));
        registry.set_default(Some(Arc::new(PlainTextTranslator)));

        assert!(matches!(
            registry.resolve("application/pdf"),
            Err(FlintError::TranslatorUnavailable { .. })
        ));
    }

    #[test]
    fn test_later_registration_overwrites() {
        let registry = TranslatorRegistry::new();
        registry.register_for("text/plain", Arc::new(XmlTranslatorFactory));
        assert!(registry.resolve("text/plain").is_err());

        registry.register(Arc::new(PlainTextTranslatorFactory));
        assert!(registry.resolve("text/plain").is_ok());
        assert_eq!(registry.media_types(), vec!["text/plain".to_string()]);
    }
}
