pub mod types;

use std::collections::HashMap;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

pub use types::{match_first, Action, Selector, Step};

/// The validated action table, keyed by action id.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ActionBook {
    pub actions: HashMap<String, Action>,
}

impl ActionBook {
    pub fn from_actions(actions: HashMap<String, Action>) -> Self {
        Self { actions }
    }

    pub fn get(&self, id: &str) -> Option<&Action> {
        self.actions.get(id)
    }
}

/// Load an action book from YAML and validate every action.
pub fn load_action_book(path: &Path) -> Result<ActionBook> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    let book: ActionBook = serde_yaml::from_str(&raw)
        .with_context(|| format!("failed to parse {}", path.display()))?;

    for (id, action) in &book.actions {
        action
            .validate()
            .with_context(|| format!("invalid action '{id}'"))?;
    }

    Ok(book)
}
