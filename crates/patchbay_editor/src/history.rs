// SPDX-License-Identifier: MIT OR Apache-2.0
//! Undo/redo history for graph commands.
//!
//! The stack owns every executed [`GraphCommand`], grouped into units: a
//! unit is either a single command or a named macro. `push` executes the
//! command immediately; `undo`/`redo` replay whole units, reversing the
//! command order inside a macro on the way back.

use std::collections::VecDeque;
use thiserror::Error;

use patchbay_graph::GraphModel;

use crate::commands::GraphCommand;
use crate::events::EventBus;

/// Maximum undo history depth
const MAX_HISTORY: usize = 100;

/// History errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HistoryError {
    /// Nothing to undo
    #[error("nothing to undo")]
    NothingToUndo,

    /// Nothing to redo
    #[error("nothing to redo")]
    NothingToRedo,

    /// `begin_macro` while another macro is recording
    #[error("macro '{0}' is already open; macros do not nest")]
    NestedMacro(String),

    /// `end_macro` without an open macro
    #[error("no macro is open")]
    NoOpenMacro,

    /// Undo or redo attempted while a macro is recording
    #[error("cannot undo or redo while a macro is recording")]
    MacroRecording,
}

/// One undoable step: a single command or a named macro.
enum CommandUnit {
    Single(Box<dyn GraphCommand>),
    Macro {
        label: String,
        commands: Vec<Box<dyn GraphCommand>>,
    },
}

impl CommandUnit {
    fn label(&self) -> &str {
        match self {
            Self::Single(command) => command.label(),
            Self::Macro { label, .. } => label,
        }
    }

    fn apply(&self, graph: &mut GraphModel, events: &EventBus) {
        match self {
            Self::Single(command) => command.apply(graph, events),
            Self::Macro { commands, .. } => {
                for command in commands {
                    command.apply(graph, events);
                }
            }
        }
    }

    fn revert(&self, graph: &mut GraphModel, events: &EventBus) {
        match self {
            Self::Single(command) => command.revert(graph, events),
            Self::Macro { commands, .. } => {
                for command in commands.iter().rev() {
                    command.revert(graph, events);
                }
            }
        }
    }
}

/// Undo/redo manager for one graph.
///
/// Exactly one macro may be recording at a time; nested `begin_macro`
/// calls are an error rather than a silent merge.
pub struct CommandStack {
    undo_stack: VecDeque<CommandUnit>,
    redo_stack: VecDeque<CommandUnit>,
    recording: Option<(String, Vec<Box<dyn GraphCommand>>)>,
    max_depth: usize,
}

impl CommandStack {
    /// Create a stack with the default depth limit.
    pub fn new() -> Self {
        Self::with_max_depth(MAX_HISTORY)
    }

    /// Create with a custom maximum depth.
    pub fn with_max_depth(max_depth: usize) -> Self {
        Self {
            undo_stack: VecDeque::new(),
            redo_stack: VecDeque::new(),
            recording: None,
            max_depth,
        }
    }

    /// Execute a command and store it for undo.
    ///
    /// While a macro is recording the command joins the open macro;
    /// otherwise it becomes its own unit and any redo history beyond the
    /// cursor is discarded.
    pub fn push(
        &mut self,
        graph: &mut GraphModel,
        events: &EventBus,
        command: impl GraphCommand + 'static,
    ) {
        command.apply(graph, events);
        match &mut self.recording {
            Some((_, commands)) => commands.push(Box::new(command)),
            None => {
                self.redo_stack.clear();
                self.undo_stack.push_back(CommandUnit::Single(Box::new(command)));
                self.trim();
            }
        }
    }

    /// Open a named macro. Commands pushed until [`end_macro`] form one
    /// atomic undo unit. Opening a macro discards redo history.
    ///
    /// [`end_macro`]: Self::end_macro
    pub fn begin_macro(&mut self, label: impl Into<String>) -> Result<(), HistoryError> {
        if let Some((open, _)) = &self.recording {
            return Err(HistoryError::NestedMacro(open.clone()));
        }
        self.redo_stack.clear();
        self.recording = Some((label.into(), Vec::new()));
        Ok(())
    }

    /// Commit the open macro as one unit. An empty macro is committed
    /// too; undoing it is a legal no-op.
    pub fn end_macro(&mut self) -> Result<(), HistoryError> {
        let (label, commands) = self.recording.take().ok_or(HistoryError::NoOpenMacro)?;
        self.undo_stack.push_back(CommandUnit::Macro { label, commands });
        self.trim();
        Ok(())
    }

    /// Revert the most recent unit. Returns its label.
    pub fn undo(&mut self, graph: &mut GraphModel, events: &EventBus) -> Result<String, HistoryError> {
        if self.recording.is_some() {
            return Err(HistoryError::MacroRecording);
        }
        let unit = self
            .undo_stack
            .pop_back()
            .ok_or(HistoryError::NothingToUndo)?;
        unit.revert(graph, events);
        let label = unit.label().to_string();
        self.redo_stack.push_back(unit);
        Ok(label)
    }

    /// Re-apply the most recently undone unit. Returns its label.
    pub fn redo(&mut self, graph: &mut GraphModel, events: &EventBus) -> Result<String, HistoryError> {
        if self.recording.is_some() {
            return Err(HistoryError::MacroRecording);
        }
        let unit = self
            .redo_stack
            .pop_back()
            .ok_or(HistoryError::NothingToRedo)?;
        unit.apply(graph, events);
        let label = unit.label().to_string();
        self.undo_stack.push_back(unit);
        Ok(label)
    }

    /// Whether undo is available.
    pub fn can_undo(&self) -> bool {
        self.recording.is_none() && !self.undo_stack.is_empty()
    }

    /// Whether redo is available.
    pub fn can_redo(&self) -> bool {
        self.recording.is_none() && !self.redo_stack.is_empty()
    }

    /// Whether a macro is currently recording.
    pub fn is_recording(&self) -> bool {
        self.recording.is_some()
    }

    /// Label of the unit `undo` would revert.
    pub fn undo_label(&self) -> Option<&str> {
        self.undo_stack.back().map(CommandUnit::label)
    }

    /// Label of the unit `redo` would re-apply.
    pub fn redo_label(&self) -> Option<&str> {
        self.redo_stack.back().map(CommandUnit::label)
    }

    /// Number of undoable units.
    pub fn undo_depth(&self) -> usize {
        self.undo_stack.len()
    }

    /// Number of redoable units.
    pub fn redo_depth(&self) -> usize {
        self.redo_stack.len()
    }

    /// Discard all history, including an open macro.
    pub fn clear(&mut self) {
        self.undo_stack.clear();
        self.redo_stack.clear();
        self.recording = None;
    }

    fn trim(&mut self) {
        while self.undo_stack.len() > self.max_depth {
            self.undo_stack.pop_front();
        }
    }
}

impl Default for CommandStack {
    fn default() -> Self {
        Self::new()
    }
}
