use std::sync::{
    Arc, PoisonError, RwLock,
    atomic::{AtomicU32, Ordering},
};

use crate::connection::Connection;

/// Process-wide owner of the connection handle and the few mutable fields
/// tied to it.
///
/// The retry counter is written only by the lifecycle manager and the display
/// name once after connecting; everything else just reads.
pub struct Session {
    connection: Arc<dyn Connection>,
    retry_count: AtomicU32,
    display_name: RwLock<Option<String>>,
}

impl Session {
    pub fn new(connection: Arc<dyn Connection>) -> Self {
        Self {
            connection,
            retry_count: AtomicU32::new(0),
            display_name: RwLock::new(None),
        }
    }

    pub fn connection(&self) -> &Arc<dyn Connection> {
        &self.connection
    }

    pub fn retry_count(&self) -> u32 {
        self.retry_count.load(Ordering::SeqCst)
    }

    /// Increment the retry counter, returning the new value.
    pub fn increment_retry(&self) -> u32 {
        self.retry_count.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn reset_retry(&self) {
        self.retry_count.store(0, Ordering::SeqCst);
    }

    pub fn display_name(&self) -> Option<String> {
        self.display_name
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn set_display_name(&self, name: impl Into<String>) {
        *self
            .display_name
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(name.into());
    }
}
