use crate::errors::OpError;
use crate::utils::listing::{sort_for_display, RemoteEntry};
use crate::utils::remote_path;
use std::collections::BTreeSet;

/// What a copy/move/archive step acts on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Sources {
    Single(String),
    Selection,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferOp {
    Copy,
    Move,
}

impl TransferOp {
    pub fn label(self) -> &'static str {
        match self {
            TransferOp::Copy => "Copy",
            TransferOp::Move => "Move",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NamePurpose {
    Rename { path: String, old_name: String },
    NewFolder,
    Archive { sources: Sources },
}

/// Interactive mode of a file session. Transient step data lives inside the
/// variant that needs it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileMode {
    Browsing,
    Selecting,
    AwaitingDestination { op: TransferOp, sources: Sources },
    AwaitingName(NamePurpose),
    AwaitingSearchQuery,
    AwaitingUpload,
}

impl FileMode {
    pub fn bears_selection(&self) -> bool {
        matches!(
            self,
            FileMode::Selecting
                | FileMode::AwaitingDestination {
                    sources: Sources::Selection,
                    ..
                }
                | FileMode::AwaitingName(NamePurpose::Archive {
                    sources: Sources::Selection
                })
        )
    }

    pub fn expects_text(&self) -> bool {
        matches!(
            self,
            FileMode::AwaitingDestination { .. }
                | FileMode::AwaitingName(_)
                | FileMode::AwaitingSearchQuery
        )
    }

    pub fn expects_upload(&self) -> bool {
        matches!(self, FileMode::AwaitingUpload)
    }

    pub fn label(&self) -> &'static str {
        match self {
            FileMode::Browsing => "browsing",
            FileMode::Selecting => "selecting",
            FileMode::AwaitingDestination { .. } => "awaiting-destination",
            FileMode::AwaitingName(_) => "awaiting-name",
            FileMode::AwaitingSearchQuery => "awaiting-search-query",
            FileMode::AwaitingUpload => "awaiting-upload",
        }
    }
}

/// Per-operator file-flow state. Process lifetime only.
#[derive(Debug, Clone)]
pub struct Session {
    pub operator: String,
    pub host: String,
    pub cwd: String,
    mode: FileMode,
    selection: BTreeSet<String>,
    entries: Vec<RemoteEntry>,
    pub page: usize,
}

impl Session {
    pub fn new(operator: &str, host: &str, cwd: &str) -> Self {
        Self {
            operator: operator.to_string(),
            host: host.to_string(),
            cwd: cwd.to_string(),
            mode: FileMode::Browsing,
            selection: BTreeSet::new(),
            entries: Vec::new(),
            page: 0,
        }
    }

    pub fn mode(&self) -> &FileMode {
        &self.mode
    }

    /// Switches mode, replacing any transient data of the previous one.
    /// The selection survives only into selection-bearing modes.
    pub fn enter(&mut self, mode: FileMode) {
        if !mode.bears_selection() {
            self.selection.clear();
        }
        self.mode = mode;
    }

    pub fn cancel(&mut self) {
        self.enter(FileMode::Browsing);
    }

    pub fn selection(&self) -> &BTreeSet<String> {
        &self.selection
    }

    pub fn selected_paths(&self) -> Vec<String> {
        self.selection.iter().cloned().collect()
    }

    pub fn is_selected(&self, path: &str) -> bool {
        self.selection.contains(path)
    }

    /// Flips membership of `path`; returns whether it is now selected.
    pub fn toggle(&mut self, path: &str) -> Result<bool, OpError> {
        if self.mode != FileMode::Selecting {
            return Err(OpError::validation("Selection mode is not active"));
        }
        if remote_path::parent(path) != self.cwd {
            return Err(OpError::validation(
                "Only entries of the current directory can be selected",
            ));
        }
        if self.selection.remove(path) {
            return Ok(false);
        }
        self.selection.insert(path.to_string());
        Ok(true)
    }

    pub fn select_all(&mut self) -> Result<usize, OpError> {
        if self.mode != FileMode::Selecting {
            return Err(OpError::validation("Selection mode is not active"));
        }
        let paths: Vec<String> = self
            .entries
            .iter()
            .map(|entry| remote_path::join(&self.cwd, &entry.name))
            .collect();
        self.selection.extend(paths);
        Ok(self.selection.len())
    }

    pub fn clear_selection(&mut self) {
        self.selection.clear();
    }

    pub fn entries(&self) -> &[RemoteEntry] {
        &self.entries
    }

    pub fn entry_at(&self, path: &str) -> Option<&RemoteEntry> {
        if remote_path::parent(path) != self.cwd {
            return None;
        }
        let name = remote_path::file_name(path);
        self.entries.iter().find(|entry| entry.name == name)
    }

    /// Moves the view to `dir`. Always lands in browsing mode.
    pub fn show_dir(&mut self, dir: &str, entries: Vec<RemoteEntry>) {
        let changed = dir != self.cwd;
        self.cwd = dir.to_string();
        self.set_entries(entries);
        if changed {
            self.page = 0;
        }
        self.cancel();
    }

    /// Replaces the cached listing of the current directory, keeping mode.
    pub fn set_entries(&mut self, mut entries: Vec<RemoteEntry>) {
        sort_for_display(&mut entries);
        self.entries = entries;
    }

    pub fn page_count(&self, page_size: usize) -> usize {
        let page_size = page_size.max(1);
        std::cmp::max(1, (self.entries.len() + page_size - 1) / page_size)
    }

    pub fn set_page(&mut self, page: usize, page_size: usize) {
        self.page = page.min(self.page_count(page_size) - 1);
    }

    pub fn page_entries(&self, page_size: usize) -> &[RemoteEntry] {
        let page_size = page_size.max(1);
        let start = (self.page * page_size).min(self.entries.len());
        let end = (start + page_size).min(self.entries.len());
        &self.entries[start..end]
    }
}
