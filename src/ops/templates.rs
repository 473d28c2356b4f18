//! Template records. Instantiation itself happens in the client, which
//! issues ordinary create operations so it works against either backend.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::error::{CoreError, Result};
use crate::model::{
    format_template_id, normalize_labels, validate_priority, Event, EventKind, Template,
    TemplateSubtask, DEFAULT_PRIORITY,
};
use crate::store::Snapshot;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewTemplate {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub default_priority: Option<u8>,
    #[serde(default)]
    pub default_labels: Vec<String>,
    #[serde(default)]
    pub subtasks: Vec<TemplateSubtask>,
}

pub fn create_template(
    snap: &mut Snapshot,
    now: DateTime<Utc>,
    session_id: &str,
    req: NewTemplate,
) -> Result<Template> {
    let name = req.name.trim().to_string();
    if name.is_empty() {
        return Err(CoreError::InvalidArgument(
            "template name must not be empty".to_string(),
        ));
    }
    let default_priority = validate_priority(req.default_priority.unwrap_or(DEFAULT_PRIORITY))?;

    // First free template-NNN slot.
    let mut n = 1;
    while snap
        .templates
        .iter()
        .any(|t| t.id == format_template_id(n))
    {
        n += 1;
    }
    let template = Template {
        id: format_template_id(n),
        name,
        description: req.description,
        default_priority,
        default_labels: normalize_labels(&req.default_labels),
        subtasks: req.subtasks,
        created_at: now,
    };
    snap.dirty.templates = true;
    snap.templates.push(template.clone());
    snap.record(Event::new(
        now,
        EventKind::TemplateCreated,
        session_id,
        json!({ "template_id": template.id, "name": template.name }),
    ));
    Ok(template)
}

pub fn get_template(snap: &Snapshot, template_id: &str) -> Result<Template> {
    snap.templates
        .iter()
        .find(|t| t.id == template_id)
        .cloned()
        .ok_or_else(|| CoreError::NotFound(format!("template '{template_id}' not found")))
}

pub fn delete_template(
    snap: &mut Snapshot,
    now: DateTime<Utc>,
    session_id: &str,
    template_id: &str,
) -> Result<()> {
    let before = snap.templates.len();
    snap.templates.retain(|t| t.id != template_id);
    if snap.templates.len() == before {
        return Err(CoreError::NotFound(format!(
            "template '{template_id}' not found"
        )));
    }
    snap.dirty.templates = true;
    snap.record(Event::new(
        now,
        EventKind::TemplateDeleted,
        session_id,
        json!({ "template_id": template_id }),
    ));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn template_ids_fill_free_slots() {
        let mut snap = Snapshot::empty();
        let now = Utc::now();
        let a = create_template(
            &mut snap,
            now,
            "s",
            NewTemplate {
                name: "bugfix".into(),
                ..NewTemplate::default()
            },
        )
        .unwrap();
        let b = create_template(
            &mut snap,
            now,
            "s",
            NewTemplate {
                name: "feature".into(),
                ..NewTemplate::default()
            },
        )
        .unwrap();
        assert_eq!(a.id, "template-001");
        assert_eq!(b.id, "template-002");

        delete_template(&mut snap, now, "s", &a.id).unwrap();
        let c = create_template(
            &mut snap,
            now,
            "s",
            NewTemplate {
                name: "chore".into(),
                ..NewTemplate::default()
            },
        )
        .unwrap();
        assert_eq!(c.id, "template-001");
    }

    #[test]
    fn delete_unknown_template_fails() {
        let mut snap = Snapshot::empty();
        let err = delete_template(&mut snap, Utc::now(), "s", "template-009").unwrap_err();
        assert!(matches!(err, CoreError::NotFound(_)));
    }
}
