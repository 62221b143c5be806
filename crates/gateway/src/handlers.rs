//! One handler per command verb.
//!
//! Handlers never return errors to the caller. Failures of `DOWNLOAD`,
//! `ENHANCE`, `CHATBOT` and `DOWNLOAD_MEDIA` become result lines; everything
//! else is logged.

use std::sync::Arc;

use {
    base64::{Engine, engine::general_purpose::STANDARD},
    serde_json::json,
    tracing::{debug, error, info, warn},
    wabridge_media::{MediaPipeline, decode_inline},
    wabridge_protocol::{
        Command, EventSink, EventType, MediaKind, MediaSource, OutboundEvent, OutputLine,
    },
    wabridge_scrapers::{ChatMessage, EnhanceAction, Services},
    wabridge_whatsapp::{DownloadRequest, Jid, MediaContext, OutgoingMessage, Session},
};

use crate::error::{Error, Result};

const CHATBOT_PUSH_NAME: &str = "User";

pub struct Handlers {
    session: Arc<Session>,
    media: MediaPipeline,
    services: Services,
    sink: Arc<dyn EventSink>,
}

impl Handlers {
    pub fn new(
        session: Arc<Session>,
        media: MediaPipeline,
        services: Services,
        sink: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            session,
            media,
            services,
            sink,
        }
    }

    pub async fn handle(&self, command: Command) {
        let label = command.label();
        let outcome = match command {
            Command::SendText { to, text } => self.send_text(&to, text).await,
            Command::React {
                chat,
                message_id,
                emoji,
                sender,
            } => self.react(&chat, message_id, emoji, &sender).await,
            Command::SendMedia {
                to,
                kind,
                source,
                caption,
            } => self.send_media(&to, kind, &source, caption).await,
            Command::DownloadMedia {
                message_id,
                chat,
                context,
            } => {
                self.download_media(message_id, &chat, &context).await;
                Ok(())
            },
            Command::Download {
                service,
                url,
                format,
            } => {
                self.download(&service, &url, format.as_deref()).await;
                Ok(())
            },
            Command::Enhance {
                action,
                image,
                is_url,
            } => {
                self.enhance(&action, &image, is_url).await;
                Ok(())
            },
            Command::Chatbot {
                chat,
                prompt,
                model,
                history,
            } => self.chatbot(&chat, &prompt, &model, &history).await,
        };

        if let Err(e) = outcome {
            error!(command = label, error = %e, "command failed");
        }
    }

    async fn send_text(&self, to: &str, text: String) -> Result<()> {
        let to: Jid = to.parse()?;
        let id = self
            .session
            .connection()
            .send_message(&to, OutgoingMessage::Text { text })
            .await?;
        debug!(to = %to, id, "text sent");
        Ok(())
    }

    async fn react(&self, chat: &str, message_id: String, emoji: String, sender: &str) -> Result<()> {
        let chat: Jid = chat.parse()?;
        let sender: Jid = sender.parse()?;
        let reaction = OutgoingMessage::Reaction {
            chat: chat.clone(),
            sender,
            message_id,
            emoji,
        };
        self.session
            .connection()
            .send_message(&chat, reaction)
            .await?;
        debug!(chat = %chat, "reaction sent");
        Ok(())
    }

    async fn send_media(
        &self,
        to: &str,
        kind: MediaKind,
        source: &MediaSource,
        caption: Option<String>,
    ) -> Result<()> {
        let to: Jid = to.parse()?;
        self.media
            .send(self.session.connection().as_ref(), &to, source, kind, caption)
            .await?;
        Ok(())
    }

    async fn download_media(&self, message_id: String, chat: &str, context: &str) {
        let request = match (chat.parse::<Jid>(), context.parse::<MediaContext>()) {
            (Ok(chat), Ok(context)) => DownloadRequest {
                message_id,
                chat,
                context,
            },
            (Err(e), _) | (_, Err(e)) => {
                error!(error = %e, "invalid download_media request");
                self.sink.emit(OutputLine::MediaData(None));
                return;
            },
        };

        match self.session.connection().download_media(&request).await {
            Ok(data) => {
                info!(id = %request.message_id, bytes = data.len(), "media downloaded");
                self.sink
                    .emit(OutputLine::MediaData(Some(STANDARD.encode(data))));
            },
            Err(e) => {
                error!(id = %request.message_id, error = %e, "media download failed");
                self.sink.emit(OutputLine::MediaData(None));
            },
        }
    }

    async fn download(&self, service: &str, url: &str, format: Option<&str>) {
        let line = match self.services.download(service, url, format).await {
            Ok(result) => OutputLine::download_success(result),
            Err(e) => {
                warn!(service, url, error = %e, "download failed");
                OutputLine::download_failure(e)
            },
        };
        self.sink.emit(line);
    }

    async fn enhance(&self, action: &str, image: &str, is_url: bool) {
        let line = match self.run_enhance(action, image, is_url).await {
            Ok(data_url) => OutputLine::download_success(json!({ "url": data_url })),
            Err(e) => {
                warn!(action, error = %e, "enhance failed");
                OutputLine::download_failure(e)
            },
        };
        self.sink.emit(line);
    }

    async fn run_enhance(&self, action: &str, image: &str, is_url: bool) -> Result<String> {
        let input = if is_url {
            self.media.fetcher().fetch(image).await?
        } else {
            decode_inline(image)?
        };
        let output = self
            .services
            .enhancer()
            .enhance(&input, EnhanceAction::from_name(action))
            .await?;
        Ok(format!("data:image/jpeg;base64,{}", STANDARD.encode(output)))
    }

    async fn chatbot(&self, chat: &str, prompt: &str, model: &str, history: &str) -> Result<()> {
        let jid: Jid = chat.parse()?;
        let history: Vec<ChatMessage> = serde_json::from_str(history).map_err(Error::History)?;

        let event = match self.services.chat().chat(prompt, history, model).await {
            Ok(reply) => chatbot_result(&jid, reply),
            Err(e) => {
                error!(chat = %jid, error = %e, "chat completion failed");
                OutboundEvent::chatbot_error(&jid.to_string(), &e.to_string())
            },
        };
        self.sink.emit(OutputLine::framed_event(event)?);
        Ok(())
    }
}

fn chatbot_result(jid: &Jid, reply: String) -> OutboundEvent {
    let address = jid.to_string();
    let message_id = format!("cli-{}", chrono::Local::now().format("%Y%m%d-%H%M%S"));
    OutboundEvent::new(EventType::ChatbotResult)
        .with("chat", address.as_str())
        .with("from", address.as_str())
        .with("sender", address.as_str())
        .with("messageId", message_id)
        .with("pushName", CHATBOT_PUSH_NAME)
        .with("isGroup", jid.is_group())
        .with("message", reply)
        .with("command", "")
        .with("query", "")
        .with("caption", "")
}
