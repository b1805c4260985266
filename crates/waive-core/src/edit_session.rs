//! Undoable edit session over an in-memory project

use tracing::{debug, warn};

use crate::error::Result;
use crate::project::Project;
use crate::session::{EditBody, SessionHost, SessionView};

struct UndoStep {
    label: String,
    /// Project state on the other side of this step
    state: Project,
}

/// Owns the project and records one snapshot per undo step
pub struct EditSession {
    project: Project,
    undo_stack: Vec<UndoStep>,
    redo_stack: Vec<UndoStep>,
    /// Label of the last edit, while it may still be coalesced into
    last_edit_label: Option<String>,
    listeners: Vec<Box<dyn Fn(&Project)>>,
}

impl EditSession {
    pub fn new(project: Project) -> Self {
        Self {
            project,
            undo_stack: Vec::new(),
            redo_stack: Vec::new(),
            last_edit_label: None,
            listeners: Vec::new(),
        }
    }

    pub fn project(&self) -> &Project {
        &self.project
    }

    /// Direct mutable access for session commands that bypass undo (loading, selection)
    pub fn project_mut(&mut self) -> &mut Project {
        &mut self.project
    }

    pub fn add_change_listener(&mut self, listener: impl Fn(&Project) + 'static) {
        self.listeners.push(Box::new(listener));
    }

    fn notify(&self) {
        for listener in &self.listeners {
            listener(&self.project);
        }
    }

    pub fn can_undo(&self) -> bool {
        !self.undo_stack.is_empty()
    }

    pub fn can_redo(&self) -> bool {
        !self.redo_stack.is_empty()
    }

    pub fn undo_description(&self) -> Option<&str> {
        self.undo_stack.last().map(|s| s.label.as_str())
    }

    pub fn redo_description(&self) -> Option<&str> {
        self.redo_stack.last().map(|s| s.label.as_str())
    }

    pub fn undo(&mut self) -> bool {
        self.last_edit_label = None;
        let Some(step) = self.undo_stack.pop() else { return false };
        let current = std::mem::replace(&mut self.project, step.state);
        self.redo_stack.push(UndoStep { label: step.label, state: current });
        self.notify();
        true
    }

    pub fn redo(&mut self) -> bool {
        self.last_edit_label = None;
        let Some(step) = self.redo_stack.pop() else { return false };
        let current = std::mem::replace(&mut self.project, step.state);
        self.undo_stack.push(UndoStep { label: step.label, state: current });
        self.notify();
        true
    }

    /// Stop merging further same-label edits into the current undo step
    pub fn end_coalesced_transaction(&mut self) {
        self.last_edit_label = None;
    }
}

impl SessionHost for EditSession {
    fn snapshot(&self) -> SessionView {
        self.project.snapshot()
    }

    fn selection(&self) -> Vec<crate::clip::ClipId> {
        self.project.selection.clone()
    }

    fn perform_edit(&mut self, label: &str, coalesce: bool, body: &mut EditBody<'_>) -> Result<()> {
        let before = self.project.clone();

        if let Err(e) = body(&mut self.project) {
            warn!(label, error = %e, "Edit failed, rolling back");
            self.project = before;
            self.last_edit_label = None;
            return Err(e);
        }

        let merge = coalesce
            && self.last_edit_label.as_deref() == Some(label)
            && !self.undo_stack.is_empty();
        if merge {
            debug!(label, "Coalescing edit into previous undo step");
        } else {
            self.undo_stack.push(UndoStep { label: label.to_string(), state: before });
        }
        self.redo_stack.clear();
        self.last_edit_label = Some(label.to_string());
        self.notify();
        Ok(())
    }
}
