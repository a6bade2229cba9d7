//! Base plugin trait definition.
//!
//! Every pluggable collaborator (AI clients, per-cell OCR backends, domain
//! preprocessors) implements [`Plugin`] for identification and lifecycle.

use crate::Result;

/// Base trait that all plugins must implement.
///
/// # Thread Safety
///
/// Plugins are shared as `Arc<dyn Trait>` across concurrently processed
/// tables and must be `Send + Sync`.
///
/// # Example
///
/// ```rust
/// use tablefuse::plugins::Plugin;
///
/// struct CloudOcr;
///
/// impl Plugin for CloudOcr {
///     fn name(&self) -> &str {
///         "cloud-ocr"
///     }
///
///     fn version(&self) -> String {
///         "1.0.0".to_string()
///     }
/// }
/// ```
pub trait Plugin: Send + Sync {
    /// Unique kebab-case identifier (e.g. `"receipt-preprocessor"`).
    fn name(&self) -> &str;

    /// Semantic version of the plugin.
    fn version(&self) -> String;

    /// Called once when the plugin is registered. Registration fails if this errors.
    ///
    /// Takes `&self` so it works behind `Arc<dyn Plugin>`; use interior
    /// mutability for state that must be set up here.
    fn initialize(&self) -> Result<()> {
        Ok(())
    }

    /// Called when the plugin is removed from its registry.
    fn shutdown(&self) -> Result<()> {
        Ok(())
    }

    fn description(&self) -> &str {
        ""
    }
}

/// Validate a plugin name before registration.
///
/// Names must be non-empty and contain no whitespace.
pub(crate) fn validate_plugin_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(crate::TableFuseError::validation("Plugin name cannot be empty"));
    }

    if name.contains(char::is_whitespace) {
        return Err(crate::TableFuseError::validation(format!(
            "Plugin name '{}' cannot contain whitespace",
            name
        )));
    }

    Ok(())
}
