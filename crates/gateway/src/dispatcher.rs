use std::sync::Arc;

use {
    tracing::{debug, error},
    wabridge_protocol::{Command, Error as ProtocolError},
};

use crate::{handlers::Handlers, tasks::TaskPool};

/// Parses frames and queues one pool task per command.
pub struct Dispatcher {
    handlers: Arc<Handlers>,
    pool: Arc<TaskPool>,
}

impl Dispatcher {
    pub fn new(handlers: Arc<Handlers>, pool: Arc<TaskPool>) -> Self {
        Self { handlers, pool }
    }

    pub fn pool(&self) -> &Arc<TaskPool> {
        &self.pool
    }

    /// Returns the task id when the frame was accepted.
    pub fn dispatch(&self, frame: &str) -> Option<u64> {
        let command = match Command::parse(frame) {
            Ok(command) => command,
            Err(ProtocolError::UnknownVerb { preview }) => {
                debug!(frame = %preview, "ignoring unknown command");
                return None;
            },
            Err(e) => {
                error!(error = %e, "invalid command");
                return None;
            },
        };

        let label = command.label();
        let handlers = Arc::clone(&self.handlers);
        self.pool
            .spawn(label, async move { handlers.handle(command).await })
    }
}
