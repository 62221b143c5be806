//! Connection lifecycle: pairing, connect, one reconnect attempt per drop, shutdown.
//!
//! ```text
//! UNPAIRED ─▶ PAIRING ─▶ CONNECTED ◀─▶ DISCONNECTED ◀─▶ RECONNECTING
//!                              └──────────────┴─────────────┴─▶ TERMINATED
//! ```
//!
//! Only [`LifecycleManager::shutdown`] reaches `Terminated`, and nothing
//! leaves it.

use std::sync::Arc;

use {
    tokio::sync::watch,
    tokio_util::sync::CancellationToken,
    tracing::{debug, error, info, warn},
    wabridge_config::LifecycleConfig,
    wabridge_protocol::{EventSink, OutboundEvent, OutputLine},
};

use crate::{
    error::{Error, Result},
    session::Session,
    types::{PairingEvent, Presence},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Unpaired,
    Pairing,
    Connected,
    Disconnected,
    Reconnecting,
    Terminated,
}

pub struct LifecycleManager {
    session: Arc<Session>,
    sink: Arc<dyn EventSink>,
    settings: LifecycleConfig,
    default_display_name: String,
    state: watch::Sender<LifecycleState>,
    shutdown: CancellationToken,
}

impl LifecycleManager {
    pub fn new(
        session: Arc<Session>,
        sink: Arc<dyn EventSink>,
        settings: LifecycleConfig,
        default_display_name: impl Into<String>,
    ) -> Self {
        let (state, _) = watch::channel(LifecycleState::Unpaired);
        Self {
            session,
            sink,
            settings,
            default_display_name: default_display_name.into(),
            state,
            shutdown: CancellationToken::new(),
        }
    }

    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    pub fn state(&self) -> LifecycleState {
        *self.state.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<LifecycleState> {
        self.state.subscribe()
    }

    fn transition(&self, next: LifecycleState) {
        self.state.send_if_modified(|current| {
            if *current == LifecycleState::Terminated || *current == next {
                return false;
            }
            debug!(from = ?*current, to = ?next, "lifecycle transition");
            *current = next;
            true
        });
    }

    /// Connect with the stored identity, or run pairing when there is none.
    ///
    /// Any error here is fatal for startup: the session store could not be
    /// read, the first connect failed, or the pairing code expired.
    pub async fn start(&self) -> Result<()> {
        let connection = self.session.connection();
        let identity = connection.identity().await?;

        if let Some(identity) = identity {
            if !identity.push_name.is_empty() {
                self.session.set_display_name(identity.push_name);
            }
            info!(jid = %identity.jid, "stored session found, connecting");
            // Connected is entered on the platform's event, not here.
            self.transition(LifecycleState::Reconnecting);
            return connection.connect().await;
        }

        self.transition(LifecycleState::Pairing);
        info!("no stored session, starting pairing");
        let mut pairing = connection.pairing_events().await?;
        connection.connect().await?;

        while let Some(event) = pairing.recv().await {
            match event {
                PairingEvent::Code(code) => {
                    debug!("pairing code received");
                    self.sink.emit(OutputLine::Event(OutboundEvent::qr(&code)));
                },
                PairingEvent::Success => {
                    info!("pairing succeeded");
                    return Ok(());
                },
                PairingEvent::Timeout => {
                    self.transition(LifecycleState::Unpaired);
                    return Err(Error::PairingTimeout);
                },
            }
        }

        self.transition(LifecycleState::Unpaired);
        Err(Error::message("pairing stream ended before pairing completed"))
    }

    /// Platform reported a live connection.
    pub async fn on_connected(&self) {
        if self.state() == LifecycleState::Terminated {
            return;
        }
        self.session.reset_retry();
        self.transition(LifecycleState::Connected);
        info!("connected");

        if self.session.display_name().is_none_or(|name| name.is_empty()) {
            let name = self.default_display_name.clone();
            match self.session.connection().set_push_name(&name).await {
                Ok(()) => info!(name = %name, "display name applied"),
                Err(e) => warn!(error = %e, "failed to apply display name"),
            }
            self.session.set_display_name(name);
        }

        let connection = Arc::clone(self.session.connection());
        let delay = self.settings.presence_delay();
        let cancel = self.shutdown.clone();
        tokio::spawn(async move {
            tokio::select! {
                () = cancel.cancelled() => return,
                () = tokio::time::sleep(delay) => {},
            }
            match connection.send_presence(Presence::Available).await {
                Ok(()) => info!("presence set to available"),
                Err(e) => warn!(error = %e, "failed to announce presence"),
            }
        });
    }

    /// Platform reported the connection dropped.
    ///
    /// One signal buys at most one reconnect attempt, made after the
    /// configured delay. A failed attempt leaves the state `Disconnected`
    /// until the next signal arrives.
    pub async fn on_disconnected(&self) {
        if self.state() == LifecycleState::Terminated {
            return;
        }
        self.transition(LifecycleState::Disconnected);
        warn!("disconnected");

        tokio::select! {
            () = self.shutdown.cancelled() => return,
            () = tokio::time::sleep(self.settings.reconnect_delay()) => {},
        }

        let max_attempts = self.settings.max_reconnect_attempts;
        if self.session.retry_count() >= max_attempts {
            error!(max_attempts, "max reconnect attempts reached, staying disconnected");
            return;
        }
        let attempt = self.session.increment_retry();
        self.transition(LifecycleState::Reconnecting);
        info!(attempt, max_attempts, "reconnecting");

        match self.session.connection().connect().await {
            Ok(()) => debug!(attempt, "reconnect issued"),
            Err(e) => {
                error!(attempt, error = %e, "reconnect failed");
                self.transition(LifecycleState::Disconnected);
            },
        }
    }

    /// Close the connection for good.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        self.state.send_replace(LifecycleState::Terminated);
        match self.session.connection().disconnect().await {
            Ok(()) => info!("connection closed"),
            Err(e) => warn!(error = %e, "error while closing connection"),
        }
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::{
        mock::{Call, MockConnection, RecordingSink},
        types::Identity,
    };

    fn manager(mock: &Arc<MockConnection>) -> (Arc<LifecycleManager>, Arc<RecordingSink>) {
        let sink = Arc::new(RecordingSink::default());
        let session = Arc::new(Session::new(Arc::clone(mock) as _));
        let manager = LifecycleManager::new(
            session,
            Arc::clone(&sink) as _,
            LifecycleConfig::default(),
            "Awara",
        );
        (Arc::new(manager), sink)
    }

    fn paired() -> Identity {
        Identity {
            jid: "123@s.whatsapp.net".parse().unwrap(),
            push_name: String::new(),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn stored_identity_connects_directly() {
        let mock = Arc::new(MockConnection::new());
        mock.set_identity(Some(paired()));
        let (manager, sink) = manager(&mock);

        manager.start().await.unwrap();
        assert_eq!(mock.count(|c| matches!(c, Call::Connect)), 1);
        assert_eq!(mock.count(|c| matches!(c, Call::PairingEvents)), 0);
        assert!(sink.lines().is_empty());
        assert_eq!(manager.state(), LifecycleState::Reconnecting);

        manager.on_connected().await;
        assert_eq!(manager.state(), LifecycleState::Connected);
    }

    #[tokio::test(start_paused = true)]
    async fn pairing_emits_every_code_then_succeeds() {
        let mock = Arc::new(MockConnection::new());
        mock.script_pairing(vec![
            PairingEvent::Code("code-1".into()),
            PairingEvent::Code("code-2".into()),
            PairingEvent::Success,
        ]);
        let (manager, sink) = manager(&mock);

        manager.start().await.unwrap();
        let codes: Vec<_> = sink
            .events()
            .iter()
            .map(|e| e.get("code").unwrap().as_str().unwrap().to_owned())
            .collect();
        assert_eq!(codes, vec!["code-1", "code-2"]);
        assert_eq!(
            sink.events()[0].get("message").unwrap(),
            "Scan QR code with your phone"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn pairing_timeout_is_fatal() {
        let mock = Arc::new(MockConnection::new());
        mock.script_pairing(vec![PairingEvent::Code("c".into()), PairingEvent::Timeout]);
        let (manager, _sink) = manager(&mock);

        assert!(matches!(manager.start().await, Err(Error::PairingTimeout)));
        assert_eq!(manager.state(), LifecycleState::Unpaired);
    }

    #[tokio::test(start_paused = true)]
    async fn unreadable_store_is_fatal() {
        let mock = Arc::new(MockConnection::new());
        mock.fail_identity();
        let (manager, _sink) = manager(&mock);

        assert!(manager.start().await.is_err());
        assert_eq!(mock.count(|c| matches!(c, Call::Connect)), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn connected_resets_retries_and_announces_presence() {
        let mock = Arc::new(MockConnection::new());
        let (manager, _sink) = manager(&mock);
        manager.session().increment_retry();
        manager.session().increment_retry();

        manager.on_connected().await;
        assert_eq!(manager.session().retry_count(), 0);
        assert_eq!(manager.state(), LifecycleState::Connected);
        assert_eq!(manager.session().display_name().as_deref(), Some("Awara"));
        assert!(mock.calls().contains(&Call::SetPushName("Awara".into())));

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(mock.count(|c| matches!(c, Call::Presence(_))), 0);
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(mock.calls().contains(&Call::Presence(Presence::Available)));
    }

    #[tokio::test(start_paused = true)]
    async fn existing_display_name_is_kept() {
        let mock = Arc::new(MockConnection::new());
        mock.set_identity(Some(Identity {
            push_name: "Kirin".into(),
            ..paired()
        }));
        let (manager, _sink) = manager(&mock);

        manager.start().await.unwrap();
        manager.on_connected().await;
        assert_eq!(manager.session().display_name().as_deref(), Some("Kirin"));
        assert_eq!(mock.count(|c| matches!(c, Call::SetPushName(_))), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn presence_failure_is_not_fatal() {
        let mock = Arc::new(MockConnection::new());
        mock.fail_presence(true);
        let (manager, _sink) = manager(&mock);

        manager.on_connected().await;
        tokio::time::sleep(Duration::from_secs(4)).await;
        assert_eq!(mock.count(|c| matches!(c, Call::Presence(_))), 1);
        assert_eq!(manager.state(), LifecycleState::Connected);
    }

    #[tokio::test(start_paused = true)]
    async fn one_disconnect_makes_one_attempt() {
        let mock = Arc::new(MockConnection::new());
        mock.fail_connects(u32::MAX);
        let (manager, _sink) = manager(&mock);

        manager.on_disconnected().await;
        assert_eq!(mock.count(|c| matches!(c, Call::Connect)), 1);
        assert_eq!(manager.session().retry_count(), 1);
        assert_eq!(manager.state(), LifecycleState::Disconnected);
    }

    #[tokio::test(start_paused = true)]
    async fn reconnect_stops_after_five_failures() {
        let mock = Arc::new(MockConnection::new());
        mock.fail_connects(u32::MAX);
        let (manager, _sink) = manager(&mock);

        for expected in 1..=5 {
            manager.on_disconnected().await;
            assert_eq!(mock.count(|c| matches!(c, Call::Connect)), expected);
        }
        assert_eq!(manager.session().retry_count(), 5);
        assert_eq!(manager.state(), LifecycleState::Disconnected);

        // Budget spent: a later disconnect makes no further attempts.
        manager.on_disconnected().await;
        assert_eq!(mock.count(|c| matches!(c, Call::Connect)), 5);
        assert_eq!(manager.state(), LifecycleState::Disconnected);
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_disconnects_each_get_an_attempt() {
        let mock = Arc::new(MockConnection::new());
        mock.fail_connects(u32::MAX);
        let (manager, _sink) = manager(&mock);

        tokio::join!(manager.on_disconnected(), manager.on_disconnected());
        assert_eq!(mock.count(|c| matches!(c, Call::Connect)), 2);
        assert_eq!(manager.session().retry_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn reconnect_succeeds_and_counter_resets_on_connect() {
        let mock = Arc::new(MockConnection::new());
        mock.fail_connects(2);
        let (manager, _sink) = manager(&mock);

        manager.on_disconnected().await;
        manager.on_disconnected().await;
        assert_eq!(manager.state(), LifecycleState::Disconnected);
        manager.on_disconnected().await;
        assert_eq!(mock.count(|c| matches!(c, Call::Connect)), 3);
        assert_eq!(manager.session().retry_count(), 3);
        assert_eq!(manager.state(), LifecycleState::Reconnecting);

        manager.on_connected().await;
        assert_eq!(manager.session().retry_count(), 0);
        assert_eq!(manager.state(), LifecycleState::Connected);
    }

    #[tokio::test(start_paused = true)]
    async fn reconnect_waits_before_each_attempt() {
        let mock = Arc::new(MockConnection::new());
        let (manager, _sink) = manager(&mock);

        let task = tokio::spawn({
            let manager = Arc::clone(&manager);
            async move { manager.on_disconnected().await }
        });
        tokio::time::sleep(Duration::from_millis(4900)).await;
        assert_eq!(mock.count(|c| matches!(c, Call::Connect)), 0);
        task.await.unwrap();
        assert_eq!(mock.count(|c| matches!(c, Call::Connect)), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_is_terminal() {
        let mock = Arc::new(MockConnection::new());
        let (manager, _sink) = manager(&mock);
        manager.on_connected().await;

        manager.shutdown().await;
        assert_eq!(manager.state(), LifecycleState::Terminated);
        assert!(mock.calls().contains(&Call::Disconnect));

        manager.on_disconnected().await;
        manager.on_connected().await;
        assert_eq!(manager.state(), LifecycleState::Terminated);
        assert_eq!(mock.count(|c| matches!(c, Call::Connect)), 0);

        // The pending presence announcement was cancelled.
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(mock.count(|c| matches!(c, Call::Presence(_))), 0);
    }
}
