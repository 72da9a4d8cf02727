//! Project registry and session binding

pub mod registry;

use std::sync::Arc;

use crate::task::TaskStore;

pub use registry::{ProjectRecord, ProjectRegistry, ProjectSelector};

/// A session's binding to one project: the registry record plus a task
/// store rooted at the project.
#[derive(Clone)]
pub struct ProjectBinding {
    pub record: ProjectRecord,
    pub store: Arc<TaskStore>,
}

impl ProjectBinding {
    pub fn new(record: ProjectRecord) -> Self {
        let store = Arc::new(TaskStore::new(&record.root));
        Self { record, store }
    }
}
