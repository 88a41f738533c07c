//! Compiled-template cache.
//!
//! Templates are keyed by their exact source text, so identical templates
//! declared on different methods share one compiled form.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

use crate::error::TemplateError;
use crate::template::Template;

/// Thread-safe cache of compiled templates.
#[derive(Default)]
pub struct TemplateCache {
    templates: RwLock<HashMap<String, Arc<Template>>>,
}

impl TemplateCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the compiled form of `source`, compiling it on first use.
    /// Failed compilations are not cached.
    pub fn get_or_compile(&self, source: &str) -> Result<Arc<Template>, TemplateError> {
        if let Some(template) = self.templates.read().get(source) {
            return Ok(Arc::clone(template));
        }

        let compiled = Arc::new(Template::compile(source)?);
        let mut templates = self.templates.write();
        // Another request may have compiled it meanwhile; keep the first.
        let entry = templates
            .entry(source.to_string())
            .or_insert(compiled);
        Ok(Arc::clone(entry))
    }

    pub fn len(&self) -> usize {
        self.templates.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.templates.read().is_empty()
    }
}
