use std::sync::Arc;

use application::{Core, EventRouter};

#[derive(Clone)]
pub struct AppState {
    pub core: Arc<Core>,
    pub router: EventRouter,
}

impl AppState {
    pub fn new(core: Arc<Core>) -> Self {
        let router = core.router();
        Self { core, router }
    }
}
