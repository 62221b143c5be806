//! Single writer for every output line.
//!
//! Producers hold an [`EventSink`] backed by an unbounded channel; one task
//! owns both output streams, so lines are never interleaved.

use {
    tokio::{
        io::{AsyncWrite, AsyncWriteExt},
        sync::mpsc,
        task::JoinHandle,
    },
    tracing::{debug, error, warn},
    wabridge_protocol::{OutputLine, Routing, Stream},
};

pub struct OutputWriter<P, S> {
    primary: P,
    secondary: S,
    routing: Routing,
}

impl<P, S> OutputWriter<P, S>
where
    P: AsyncWrite + Unpin,
    S: AsyncWrite + Unpin,
{
    pub fn new(primary: P, secondary: S, routing: Routing) -> Self {
        Self {
            primary,
            secondary,
            routing,
        }
    }

    /// Write one rendered line and flush it.
    pub async fn write(&mut self, line: &OutputLine) -> std::io::Result<()> {
        let mut rendered = match line.render() {
            Ok(rendered) => rendered,
            Err(e) => {
                warn!(error = %e, "dropping unserializable output line");
                return Ok(());
            },
        };
        rendered.push('\n');

        match line.stream(self.routing) {
            Stream::Primary => {
                self.primary.write_all(rendered.as_bytes()).await?;
                self.primary.flush().await
            },
            Stream::Secondary => {
                self.secondary.write_all(rendered.as_bytes()).await?;
                self.secondary.flush().await
            },
        }
    }

    /// Drain `lines` until every sender is gone or a stream fails.
    pub async fn run(mut self, mut lines: mpsc::UnboundedReceiver<OutputLine>) {
        while let Some(line) = lines.recv().await {
            if let Err(e) = self.write(&line).await {
                error!(error = %e, "output stream closed, dropping further output");
                return;
            }
        }
        debug!("output writer finished");
    }
}

/// Start the writer task. The returned sender is the process-wide sink.
pub fn spawn_output<P, S>(
    primary: P,
    secondary: S,
    routing: Routing,
) -> (mpsc::UnboundedSender<OutputLine>, JoinHandle<()>)
where
    P: AsyncWrite + Unpin + Send + 'static,
    S: AsyncWrite + Unpin + Send + 'static,
{
    let (tx, rx) = mpsc::unbounded_channel();
    let handle = tokio::spawn(OutputWriter::new(primary, secondary, routing).run(rx));
    (tx, handle)
}
