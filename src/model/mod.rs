//! Data model shared by the store, the scheduler, and both client modes.

mod event;
mod session;
mod task;
mod template;

pub use event::{Event, EventKind, UndoHint};
pub use session::{staleness, Session, SessionRole, Staleness};
pub use task::{
    format_task_id, normalize_labels, numeric_suffix, validate_priority, Note, Task, TaskStatus,
    TimeTracking, DEFAULT_PRIORITY,
};
pub use template::{format_template_id, Template, TemplateSubtask};
