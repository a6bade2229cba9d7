//! Preprocessor registration and lookup.
//!
//! The registry is an ordinary value owned by one pipeline: it is built by the
//! caller, injected into [`TablePipeline`](crate::core::pipeline::TablePipeline)
//! and dropped with it. There is no process-wide instance.

use crate::consolidate::SsotCell;
use crate::plugins::preprocess::{
    DomainTag, GenericPreprocessor, Preprocessor, ReceiptPreprocessor, SchoolNoticePreprocessor, detect_domain,
};
use crate::plugins::traits::validate_plugin_name;
use crate::{Result, TableFuseError};
use std::collections::HashMap;
use std::sync::Arc;

/// Maps a [`DomainTag`] to the preprocessor handling it.
///
/// # Example
///
/// ```rust
/// use tablefuse::plugins::registry::PreprocessorRegistry;
/// use tablefuse::plugins::preprocess::DomainTag;
///
/// let registry = PreprocessorRegistry::new();
/// assert!(registry.get(DomainTag::Receipt).is_some());
/// ```
pub struct PreprocessorRegistry {
    processors: HashMap<DomainTag, Arc<dyn Preprocessor>>,
}

impl PreprocessorRegistry {
    /// Create a registry with the built-in receipt, school-notice and generic processors.
    pub fn new() -> Self {
        let mut registry = Self::new_empty();
        let builtins: [Arc<dyn Preprocessor>; 3] = [
            Arc::new(ReceiptPreprocessor),
            Arc::new(SchoolNoticePreprocessor),
            Arc::new(GenericPreprocessor),
        ];
        for processor in builtins {
            if let Err(e) = registry.register(processor) {
                tracing::warn!("Failed to register built-in preprocessor: {}", e);
            }
        }
        registry
    }

    /// Create a registry without any processors.
    pub fn new_empty() -> Self {
        Self {
            processors: HashMap::new(),
        }
    }

    /// Register a processor for its domain, replacing (and shutting down) any previous one.
    pub fn register(&mut self, processor: Arc<dyn Preprocessor>) -> Result<()> {
        validate_plugin_name(processor.name())?;
        processor.initialize()?;

        if let Some(previous) = self.processors.insert(processor.domain(), processor)
            && let Err(e) = previous.shutdown()
        {
            tracing::debug!("Replaced preprocessor '{}' failed to shut down: {}", previous.name(), e);
        }
        Ok(())
    }

    pub fn get(&self, domain: DomainTag) -> Option<Arc<dyn Preprocessor>> {
        self.processors.get(&domain).cloned()
    }

    /// Get the processor for `domain`, or fail with a plugin error.
    pub fn require(&self, domain: DomainTag) -> Result<Arc<dyn Preprocessor>> {
        self.get(domain).ok_or_else(|| TableFuseError::Plugin {
            message: format!("No preprocessor registered for domain '{}'", domain),
            plugin_name: domain.to_string(),
        })
    }

    pub fn list(&self) -> Vec<String> {
        self.processors.values().map(|p| p.name().to_string()).collect()
    }

    pub fn remove(&mut self, domain: DomainTag) -> Result<()> {
        if let Some(processor) = self.processors.remove(&domain) {
            processor.shutdown()?;
        }
        Ok(())
    }

    /// Detect the domain (unless `forced`) and run the matching processor.
    ///
    /// Falls back to the generic processor when the detected domain has none,
    /// and to a pass-through when no generic processor is registered either.
    pub fn apply(&self, cells: Vec<SsotCell>, forced: Option<DomainTag>) -> (DomainTag, Vec<SsotCell>) {
        let domain = forced.unwrap_or_else(|| detect_domain(cells.iter().map(|c| c.text.as_str())));

        let processor = self.get(domain).or_else(|| self.get(DomainTag::Generic));
        match processor {
            Some(processor) => {
                tracing::debug!("Applying preprocessor '{}' for domain '{}'", processor.name(), domain);
                (domain, processor.preprocess(cells))
            }
            None => (domain, cells),
        }
    }
}

impl Default for PreprocessorRegistry {
    fn default() -> Self {
        Self::new()
    }
}
