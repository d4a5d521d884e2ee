use serde::{Deserialize, Serialize};

/// Importer settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImportConfig {
    /// Prefix a top-level `sub` name needs to become an event handler.
    pub handler_prefix: String,
    /// Namespaces recognized as `ns::method(...)` calls.
    pub namespaces: Vec<String>,
}

impl Default for ImportConfig {
    fn default() -> Self {
        ImportConfig {
            handler_prefix: "EVENT_".to_string(),
            namespaces: vec!["quest".to_string(), "plugin".to_string()],
        }
    }
}

/// Diagnostics settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiagnosticsConfig {
    /// Most body blocks the loop-safety pass looks at before giving up.
    pub loop_lookahead: usize,
    /// A `while` condition mentioning this token counts as guarded.
    pub guard_token: String,
}

impl Default for DiagnosticsConfig {
    fn default() -> Self {
        DiagnosticsConfig {
            loop_lookahead: 64,
            guard_token: "$guard".to_string(),
        }
    }
}
