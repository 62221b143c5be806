use std::sync::Arc;

use {tokio::sync::mpsc, tracing::debug};

use crate::output::OutputLine;

/// Anything that accepts output lines.
///
/// Producers (event loop, task handlers, lifecycle) never write to the
/// process streams directly; they hand lines to a sink and move on.
pub trait EventSink: Send + Sync {
    fn emit(&self, line: OutputLine);
}

impl<T: EventSink + ?Sized> EventSink for Arc<T> {
    fn emit(&self, line: OutputLine) {
        (**self).emit(line);
    }
}

impl EventSink for mpsc::UnboundedSender<OutputLine> {
    fn emit(&self, line: OutputLine) {
        if self.send(line).is_err() {
            debug!("output writer closed, dropping line");
        }
    }
}
