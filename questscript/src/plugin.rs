use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;

use serde::{Deserialize, Deserializer, Serialize};
use tracing::info;

use crate::block::PluginInstance;
use crate::registry::{self, RegistryError};
use crate::template::{Lookup, Segment, Template};

/// Failure to render a plugin instance. Fails that one block only.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RenderError {
    #[error("plugin `{plugin_id}` needs a value for `{missing_param}`")]
    MissingParam {
        plugin_id: String,
        missing_param: String,
    },
    #[error("unknown plugin `{0}`")]
    UnknownPlugin(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamType {
    #[default]
    #[serde(alias = "str")]
    String,
    Int,
    Multiline,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParamSpec {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(rename = "type", default)]
    pub kind: ParamType,
    #[serde(default, deserialize_with = "scalar_text", skip_serializing_if = "Option::is_none")]
    pub default: Option<String>,
}

/// A reusable parameterized code snippet, referenced by id from plugin
/// instance blocks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginDefinition {
    #[serde(alias = "plugin_id")]
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(alias = "perl_template")]
    pub template: String,
    #[serde(default, alias = "params")]
    pub parameters: Vec<ParamSpec>,
}

impl PluginDefinition {
    pub fn param(&self, name: &str) -> Option<&ParamSpec> {
        self.parameters.iter().find(|p| p.name == name)
    }

    /// Substitute `values` (falling back to declared defaults) into the
    /// template. Placeholders that are not declared parameters stay as
    /// written.
    pub fn render(&self, values: &BTreeMap<String, String>) -> Result<String, RenderError> {
        Template::parse(&self.template)
            .render_with(|name| match self.param(name) {
                None => Lookup::Unknown,
                Some(spec) => match values.get(name).or(spec.default.as_ref()) {
                    Some(value) => Lookup::Value(value.as_str()),
                    None => Lookup::Missing,
                },
            })
            .map_err(|missing_param| RenderError::MissingParam {
                plugin_id: self.id.clone(),
                missing_param,
            })
    }

    /// `int` parameters whose supplied value is not an integer literal.
    pub fn non_integer_params<'a>(&self, values: &'a BTreeMap<String, String>) -> Vec<(&str, &'a str)> {
        self.parameters
            .iter()
            .filter(|p| p.kind == ParamType::Int)
            .filter_map(|p| {
                let value = values.get(&p.name)?;
                (!is_integer(value)).then_some((p.name.as_str(), value.as_str()))
            })
            .collect()
    }
}

fn is_integer(text: &str) -> bool {
    let digits = text.trim().strip_prefix('-').unwrap_or(text.trim());
    !digits.is_empty() && digits.chars().all(|c| c.is_ascii_digit())
}

/// Accept `"5"`, `5` or `true` for a default and keep it as text.
fn scalar_text<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match value {
        None | Some(serde_json::Value::Null) => None,
        Some(serde_json::Value::String(s)) => Some(s),
        Some(other) => Some(other.to_string()),
    })
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Serialize, Deserialize)]
struct PluginFile {
    #[serde(default)]
    plugins: Vec<PluginDefinition>,
}

/// Plugin definitions by id, in file order.
#[derive(Debug, Clone, Default)]
pub struct PluginRegistry {
    plugins: Vec<PluginDefinition>,
    index: HashMap<String, usize>,
}

impl PluginRegistry {
    pub fn new() -> Self {
        PluginRegistry::default()
    }

    pub fn from_definitions(
        definitions: impl IntoIterator<Item = PluginDefinition>,
    ) -> Result<Self, RegistryError> {
        let mut registry = PluginRegistry::new();
        for definition in definitions {
            registry.insert(definition)?;
        }
        Ok(registry)
    }

    pub fn from_json(text: &str) -> Result<Self, RegistryError> {
        let file: PluginFile = serde_json::from_str(text)?;
        PluginRegistry::from_definitions(file.plugins)
    }

    /// Load `{"plugins": [...]}` from disk. A missing file is an empty registry.
    pub fn load(path: &Path) -> Result<Self, RegistryError> {
        let file: PluginFile = registry::load_json(path)?.unwrap_or_default();
        let registry = PluginRegistry::from_definitions(file.plugins)?;
        info!(path = %path.display(), count = registry.len(), "loaded plugin definitions");
        Ok(registry)
    }

    pub fn save(&self, path: &Path) -> Result<(), RegistryError> {
        registry::save_json(
            path,
            &PluginFile {
                plugins: self.plugins.clone(),
            },
        )
    }

    pub fn insert(&mut self, definition: PluginDefinition) -> Result<(), RegistryError> {
        if self.index.contains_key(&definition.id) {
            return Err(RegistryError::DuplicateId {
                what: "plugin",
                id: definition.id,
            });
        }
        self.index.insert(definition.id.clone(), self.plugins.len());
        self.plugins.push(definition);
        Ok(())
    }

    pub fn get(&self, id: &str) -> Option<&PluginDefinition> {
        self.index.get(id).map(|&i| &self.plugins[i])
    }

    pub fn iter(&self) -> impl Iterator<Item = &PluginDefinition> {
        self.plugins.iter()
    }

    pub fn len(&self) -> usize {
        self.plugins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.plugins.is_empty()
    }

    pub fn render(&self, instance: &PluginInstance) -> Result<String, RenderError> {
        self.get(&instance.plugin_id)
            .ok_or_else(|| RenderError::UnknownPlugin(instance.plugin_id.clone()))?
            .render(&instance.params)
    }

    /// Try each definition's template against `text` and return the first
    /// whose fixed parts match, with the recovered parameter values.
    ///
    /// A value equal to the parameter's default is still recorded, so the
    /// instance regenerates the same text even if the default later changes.
    pub fn recognize(&self, text: &str) -> Option<PluginInstance> {
        self.plugins.iter().find_map(|definition| {
            let known: HashSet<&str> = definition.parameters.iter().map(|p| p.name.as_str()).collect();
            let template = Template::parse(definition.template.trim_end_matches('\n'));
            // A template of bare placeholders would match any line at all.
            let anchored = template
                .segments()
                .iter()
                .any(|s| matches!(s, Segment::Literal(t) if !t.trim().is_empty()));
            if !anchored {
                return None;
            }
            let params = template.match_text(text, &known)?;
            Some(PluginInstance {
                plugin_id: definition.id.clone(),
                params,
            })
        })
    }

    /// Line count of each template, largest first, for multi-line matching.
    pub fn template_heights(&self) -> Vec<usize> {
        let mut heights: Vec<usize> = self
            .plugins
            .iter()
            .map(|p| p.template.trim_end_matches('\n').lines().count().max(1))
            .collect();
        heights.sort_unstable_by(|a, b| b.cmp(a));
        heights.dedup();
        heights
    }
}
