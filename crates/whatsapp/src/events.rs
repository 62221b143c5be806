//! Inbound platform events: normalization and dispatch.

use std::sync::Arc;

use {
    tokio::sync::mpsc,
    tokio_util::sync::CancellationToken,
    tracing::{debug, info, warn},
    wabridge_protocol::{EventSink, EventType, OutboundEvent, OutputLine},
};

use crate::{
    lifecycle::LifecycleManager,
    types::{InboundMessage, PlatformEvent},
};

/// Turn an inbound platform message into a `message` event.
///
/// Returns `None` for messages the account sent itself.
#[must_use]
pub fn normalize_message(message: &InboundMessage) -> Option<OutboundEvent> {
    let info = &message.info;
    if info.is_from_me {
        return None;
    }

    let context = message.message.context_info();
    let quoted_image = context
        .and_then(|ctx| ctx.quoted_message.as_deref())
        .is_some_and(|quoted| quoted.image.is_some());

    let mut event = OutboundEvent::new(EventType::Message)
        .with("from", info.sender.to_string())
        .with("chat", info.chat.to_string())
        .with("text", message.message.text())
        .with("pushName", info.push_name.as_str())
        .with("isGroup", info.is_group)
        .with("messageId", info.id.as_str())
        .with("isImage", message.message.image.is_some())
        .with("isQuotedImage", quoted_image);

    if quoted_image && let Some(ctx) = context {
        event = event.with(
            "quotedMessage",
            serde_json::json!({
                "messageId": ctx.stanza_id.as_deref().unwrap_or_default(),
                "sender": ctx.participant.as_deref().unwrap_or_default(),
                "isImage": true,
            }),
        );
    }
    Some(event)
}

/// Drain the platform event stream until it closes or `cancel` fires.
///
/// Messages are normalized and emitted in arrival order. Disconnect handling
/// runs on its own task so the stream keeps flowing while reconnecting.
pub async fn run_event_loop(
    mut events: mpsc::UnboundedReceiver<PlatformEvent>,
    lifecycle: Arc<LifecycleManager>,
    sink: Arc<dyn EventSink>,
    cancel: CancellationToken,
) {
    loop {
        let event = tokio::select! {
            () = cancel.cancelled() => break,
            event = events.recv() => match event {
                Some(event) => event,
                None => break,
            },
        };

        match event {
            PlatformEvent::Message(message) => {
                if let Some(event) = normalize_message(&message) {
                    sink.emit(OutputLine::Event(event));
                } else {
                    debug!(id = %message.info.id, "skipping own message");
                }
            },
            PlatformEvent::Connected => lifecycle.on_connected().await,
            PlatformEvent::Disconnected { reason } => {
                warn!(reason = reason.as_deref().unwrap_or("unknown"), "connection lost");
                let lifecycle = Arc::clone(&lifecycle);
                tokio::spawn(async move { lifecycle.on_disconnected().await });
            },
            PlatformEvent::HistorySync { conversations } => {
                info!(conversations, "history sync");
            },
            PlatformEvent::LoggedOut => {
                warn!("session logged out by the platform; delete the session store to pair again");
            },
            PlatformEvent::Other(name) => debug!(event = %name, "ignoring platform event"),
        }
    }
    debug!("platform event loop stopped");
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {super::*, serde_json::json, std::time::Duration};

    use crate::{
        connection::Connection,
        mock::{Call, MockConnection, RecordingSink},
        session::Session,
        types::{ContextInfo, ExtendedText, MediaInfo, MessageContent, MessageInfo},
    };

    fn inbound(content: MessageContent) -> InboundMessage {
        InboundMessage {
            info: MessageInfo {
                id: "MSG1".into(),
                chat: "120363-1@g.us".parse().unwrap(),
                sender: "628111@s.whatsapp.net".parse().unwrap(),
                push_name: "Rin".into(),
                is_group: true,
                is_from_me: false,
            },
            message: content,
        }
    }

    fn quoting(quoted: MessageContent) -> MessageContent {
        MessageContent {
            extended_text: Some(ExtendedText {
                text: Some(".hd".into()),
                context_info: Some(ContextInfo {
                    stanza_id: Some("QUOTED1".into()),
                    participant: Some("628222@s.whatsapp.net".into()),
                    quoted_message: Some(Box::new(quoted)),
                }),
            }),
            ..MessageContent::default()
        }
    }

    #[test]
    fn plain_text_message() {
        let event = normalize_message(&inbound(MessageContent {
            conversation: Some("hello".into()),
            ..MessageContent::default()
        }))
        .unwrap();

        assert_eq!(
            serde_json::to_value(&event).unwrap(),
            json!({
                "type": "message",
                "content": {
                    "from": "628111@s.whatsapp.net",
                    "chat": "120363-1@g.us",
                    "text": "hello",
                    "pushName": "Rin",
                    "isGroup": true,
                    "messageId": "MSG1",
                    "isImage": false,
                    "isQuotedImage": false
                }
            })
        );
    }

    #[test]
    fn own_messages_are_skipped() {
        let mut message = inbound(MessageContent::default());
        message.info.is_from_me = true;
        assert!(normalize_message(&message).is_none());
    }

    #[test]
    fn quoted_image_adds_reference() {
        let event = normalize_message(&inbound(quoting(MessageContent {
            image: Some(MediaInfo::default()),
            ..MessageContent::default()
        })))
        .unwrap();

        assert_eq!(event.get("text").unwrap(), ".hd");
        assert_eq!(event.get("isQuotedImage").unwrap(), true);
        assert_eq!(
            event.get("quotedMessage").unwrap(),
            &json!({"messageId": "QUOTED1", "sender": "628222@s.whatsapp.net", "isImage": true})
        );
    }

    #[test]
    fn quoted_text_has_no_reference() {
        let event = normalize_message(&inbound(quoting(MessageContent {
            conversation: Some("just words".into()),
            ..MessageContent::default()
        })))
        .unwrap();

        assert_eq!(event.get("isQuotedImage").unwrap(), false);
        assert!(event.get("quotedMessage").is_none());
    }

    #[test]
    fn image_message_sets_flag() {
        let event = normalize_message(&inbound(MessageContent {
            image: Some(MediaInfo {
                caption: Some("look".into()),
                mimetype: Some("image/jpeg".into()),
            }),
            ..MessageContent::default()
        }))
        .unwrap();
        assert_eq!(event.get("isImage").unwrap(), true);
        assert_eq!(event.get("text").unwrap(), "");
    }

    #[tokio::test(start_paused = true)]
    async fn loop_routes_messages_and_lifecycle_events() {
        let mock = Arc::new(MockConnection::new());
        let sink = Arc::new(RecordingSink::default());
        let session = Arc::new(Session::new(Arc::clone(&mock) as _));
        let lifecycle = Arc::new(LifecycleManager::new(
            session,
            Arc::clone(&sink) as _,
            wabridge_config::LifecycleConfig::default(),
            "Awara",
        ));
        let events = mock.take_events().unwrap();
        let cancel = CancellationToken::new();
        let task = tokio::spawn(run_event_loop(
            events,
            Arc::clone(&lifecycle),
            Arc::clone(&sink) as _,
            cancel.clone(),
        ));

        mock.push_event(PlatformEvent::Connected);
        mock.push_event(PlatformEvent::HistorySync { conversations: 3 });
        mock.push_event(PlatformEvent::Message(Box::new(inbound(MessageContent {
            conversation: Some("hi".into()),
            ..MessageContent::default()
        }))));
        mock.push_event(PlatformEvent::Other("receipt".into()));
        mock.push_event(PlatformEvent::Disconnected { reason: None });

        tokio::time::sleep(Duration::from_secs(6)).await;
        assert_eq!(sink.events().len(), 1);
        assert_eq!(sink.events()[0].get("text").unwrap(), "hi");
        assert!(mock.calls().contains(&Call::Connect));

        cancel.cancel();
        task.await.unwrap();
    }
}
