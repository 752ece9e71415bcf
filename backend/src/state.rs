use std::sync::Arc;

use patchpilot_core::{Backend, RunStore, SessionController};

use crate::files::Workspace;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<RunStore>,
    pub controller: Arc<SessionController>,
    pub workspace: Arc<Workspace>,
}

impl AppState {
    pub fn new(backend: Arc<dyn Backend>, workspace: Workspace) -> Self {
        let store = Arc::new(RunStore::new());
        let controller = Arc::new(SessionController::new(store.clone(), backend));
        Self {
            store,
            controller,
            workspace: Arc::new(workspace),
        }
    }

    pub fn backend(&self) -> &Arc<dyn Backend> {
        self.controller.backend()
    }
}
