use std::sync::Arc;

use application::ChatServer;

#[derive(Clone)]
pub struct AppState {
    pub server: Arc<ChatServer>,
}

impl AppState {
    pub fn new(server: Arc<ChatServer>) -> Self {
        Self { server }
    }
}
