use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::block::Block;
use crate::document::Document;
use crate::registry::{self, RegistryError};

/// A named, detached subtree that can be stamped into a document any
/// number of times.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockTemplate {
    #[serde(alias = "template_id")]
    pub id: String,
    pub name: String,
    #[serde(alias = "root_block")]
    pub root: Block,
}

impl BlockTemplate {
    /// A copy of the template tree with a fresh uid on every node.
    pub fn stamp(&self) -> Block {
        let mut block = self.root.clone();
        block.refresh_uids();
        block
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct TemplateFile {
    #[serde(default)]
    templates: Vec<BlockTemplate>,
}

#[derive(Debug, Clone, Default)]
pub struct TemplateRegistry {
    templates: Vec<BlockTemplate>,
    index: HashMap<String, usize>,
}

impl TemplateRegistry {
    pub fn new() -> Self {
        TemplateRegistry::default()
    }

    /// Load `{"templates": [...]}`. A missing file is an empty registry.
    pub fn load(path: &Path) -> Result<Self, RegistryError> {
        let file: TemplateFile = registry::load_json(path)?.unwrap_or_default();
        let mut registry = TemplateRegistry::new();
        for template in file.templates {
            registry.insert(template)?;
        }
        info!(path = %path.display(), count = registry.len(), "loaded block templates");
        Ok(registry)
    }

    pub fn save(&self, path: &Path) -> Result<(), RegistryError> {
        registry::save_json(
            path,
            &TemplateFile {
                templates: self.templates.clone(),
            },
        )
    }

    /// Add a template. Its tree must be storable in a document.
    pub fn insert(&mut self, template: BlockTemplate) -> Result<(), RegistryError> {
        if self.index.contains_key(&template.id) {
            return Err(RegistryError::DuplicateId {
                what: "template",
                id: template.id,
            });
        }
        if let Err(source) = Document::from_blocks(vec![template.root.clone()]) {
            return Err(RegistryError::InvalidTemplate {
                id: template.id,
                source,
            });
        }
        self.index.insert(template.id.clone(), self.templates.len());
        self.templates.push(template);
        Ok(())
    }

    /// Save a document subtree as a template under `id`.
    pub fn capture(&mut self, id: &str, name: &str, root: Block) -> Result<(), RegistryError> {
        self.insert(BlockTemplate {
            id: id.to_string(),
            name: name.to_string(),
            root,
        })
    }

    pub fn get(&self, id: &str) -> Option<&BlockTemplate> {
        self.index.get(id).map(|&i| &self.templates[i])
    }

    pub fn stamp(&self, id: &str) -> Option<Block> {
        self.get(id).map(BlockTemplate::stamp)
    }

    pub fn iter(&self) -> impl Iterator<Item = &BlockTemplate> {
        self.templates.iter()
    }

    pub fn len(&self) -> usize {
        self.templates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::BlockKind;

    fn greeting() -> Block {
        Block::new(BlockKind::If {
            condition: "$text=~/hail/i".into(),
        })
        .with_children([Block::new(BlockKind::Comment {
            text: "greet".into(),
        })])
    }

    #[test]
    fn stamp_gives_fresh_uids() {
        let mut reg = TemplateRegistry::new();
        let root = greeting();
        reg.capture("hail", "Hail reply", root.clone()).unwrap();
        let a = reg.stamp("hail").unwrap();
        let b = reg.stamp("hail").unwrap();
        assert_eq!(a.kind, root.kind);
        assert_eq!(a.children[0].kind, root.children[0].kind);
        assert_ne!(a.uid(), root.uid());
        assert_ne!(a.uid(), b.uid());
        assert_ne!(a.children[0].uid(), b.children[0].uid());
    }

    #[test]
    fn invalid_tree_rejected() {
        let mut reg = TemplateRegistry::new();
        let leaf = Block::new(BlockKind::Comment { text: "x".into() })
            .with_children([Block::new(BlockKind::Else)]);
        let err = reg.capture("bad", "Bad", leaf).unwrap_err();
        assert!(matches!(err, RegistryError::InvalidTemplate { .. }));
    }

    #[test]
    fn save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("block_templates.json");
        let mut reg = TemplateRegistry::new();
        reg.capture("hail", "Hail reply", greeting()).unwrap();
        reg.save(&path).unwrap();

        let back = TemplateRegistry::load(&path).unwrap();
        assert_eq!(back.len(), 1);
        assert_eq!(back.get("hail"), reg.get("hail"));
    }
}
