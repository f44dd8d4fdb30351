// ABOUTME: Per-run agent state shared by the tool bridge, completion detector and router
// ABOUTME: Holds the generated file snapshot and the task summary once one is reported

use kiln_storage::FileMap;

/// State owned by exactly one run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunState {
    /// Files written during the run, keyed by path; the last write wins
    pub files: FileMap,
    pub summary: Option<String>,
}

impl RunState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_file(&mut self, path: impl Into<String>, content: impl Into<String>) {
        self.files.insert(path.into(), content.into());
    }

    pub fn has_files(&self) -> bool {
        !self.files.is_empty()
    }

    /// A run succeeded when it reported a summary and produced at least one file
    pub fn is_complete(&self) -> bool {
        self.summary.is_some() && self.has_files()
    }
}
