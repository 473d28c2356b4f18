use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One subtask entry of a template; instantiation creates a task per entry.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TemplateSubtask {
    pub title: String,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Template {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub default_priority: u8,
    #[serde(default)]
    pub default_labels: BTreeSet<String>,
    #[serde(default)]
    pub subtasks: Vec<TemplateSubtask>,
    pub created_at: DateTime<Utc>,
}

pub fn format_template_id(n: u64) -> String {
    format!("template-{n:03}")
}
