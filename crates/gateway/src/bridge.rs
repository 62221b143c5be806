//! Top-level wiring: platform events out, commands in.

use std::{future::Future, sync::Arc};

use {
    tokio::io::AsyncRead,
    tokio_util::sync::CancellationToken,
    tracing::{info, warn},
    wabridge_media::MediaPipeline,
    wabridge_protocol::{EventSink, FrameReader},
    wabridge_scrapers::Services,
    wabridge_whatsapp::{LifecycleManager, run_event_loop},
};

use crate::{
    dispatcher::Dispatcher,
    error::{Error, Result},
    handlers::Handlers,
    tasks::TaskPool,
};

pub struct Bridge {
    lifecycle: Arc<LifecycleManager>,
    dispatcher: Dispatcher,
    sink: Arc<dyn EventSink>,
}

impl Bridge {
    pub fn new(
        lifecycle: Arc<LifecycleManager>,
        media: MediaPipeline,
        services: Services,
        pool: TaskPool,
        sink: Arc<dyn EventSink>,
    ) -> Self {
        let handlers = Handlers::new(
            Arc::clone(lifecycle.session()),
            media,
            services,
            Arc::clone(&sink),
        );
        Self {
            dispatcher: Dispatcher::new(Arc::new(handlers), Arc::new(pool)),
            lifecycle,
            sink,
        }
    }

    pub fn lifecycle(&self) -> &Arc<LifecycleManager> {
        &self.lifecycle
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    /// Run until `shutdown` resolves.
    ///
    /// Starts the event loop, brings the session up (pairing if needed),
    /// then feeds every input frame to the dispatcher. End of input stops
    /// command intake only; events keep flowing until shutdown.
    pub async fn run<R, F>(&self, input: R, shutdown: F) -> Result<()>
    where
        R: AsyncRead + Unpin,
        F: Future<Output = ()>,
    {
        let events = self
            .lifecycle
            .session()
            .connection()
            .take_events()
            .ok_or_else(|| Error::message("platform event stream already taken"))?;
        let events_cancel = CancellationToken::new();
        let event_loop = tokio::spawn(run_event_loop(
            events,
            Arc::clone(&self.lifecycle),
            Arc::clone(&self.sink),
            events_cancel.clone(),
        ));
        tokio::pin!(shutdown);

        let stopped_early = tokio::select! {
            result = self.lifecycle.start() => {
                if let Err(e) = result {
                    events_cancel.cancel();
                    self.lifecycle.shutdown().await;
                    return Err(e.into());
                }
                false
            },
            () = &mut shutdown => {
                info!("shutdown requested before the session came up");
                true
            },
        };

        if !stopped_early {
            let mut frames = FrameReader::new(input);
            loop {
                tokio::select! {
                    frame = frames.next_frame() => match frame {
                        Some(frame) => {
                            self.dispatcher.dispatch(&frame);
                        },
                        None => {
                            info!("command input closed, waiting for shutdown");
                            (&mut shutdown).await;
                            break;
                        },
                    },
                    () = &mut shutdown => break,
                }
            }
        }

        info!("shutting down");
        self.dispatcher.pool().shutdown().await;
        self.lifecycle.shutdown().await;
        events_cancel.cancel();
        if let Err(e) = event_loop.await {
            warn!(error = %e, "event loop ended abnormally");
        }
        Ok(())
    }
}
