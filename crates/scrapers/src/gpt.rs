//! Chat completions through a submit-then-poll task API.

use std::time::Duration;

use {
    async_trait::async_trait,
    reqwest::Client,
    serde::{Deserialize, Serialize},
    serde_json::json,
    tracing::{debug, warn},
};

use crate::{
    ChatCompletion, base_url,
    error::{Error, Result},
    send_json,
};

const POLL_INTERVAL: Duration = Duration::from_secs(1);
const MAX_POLL_ATTEMPTS: u32 = 60;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn new(role: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new("system", content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new("user", content)
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct TaskResponse {
    id: Option<String>,
    status: Option<String>,
    gpt: Option<String>,
    error: Option<String>,
}

#[derive(Clone)]
pub struct GptChat {
    client: Client,
    base_url: String,
    system_prompt: String,
    default_model: String,
    poll_interval: Duration,
}

impl GptChat {
    pub fn new(client: Client, url: &str, system_prompt: &str, default_model: &str) -> Self {
        Self {
            client,
            base_url: base_url(url),
            system_prompt: system_prompt.to_owned(),
            default_model: default_model.to_owned(),
            poll_interval: POLL_INTERVAL,
        }
    }

    #[must_use]
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Prepend the system prompt unless the history already opens with one.
    pub fn prepare_history(&self, mut history: Vec<ChatMessage>) -> Vec<ChatMessage> {
        if history.first().is_none_or(|first| first.role != "system") {
            history.insert(0, ChatMessage::system(&self.system_prompt));
        }
        history
    }

    async fn poll(&self, task_id: &str) -> Result<String> {
        let url = format!("{}/task/{task_id}", self.base_url);
        for attempt in 1..=MAX_POLL_ATTEMPTS {
            let task: TaskResponse = send_json(self.client.get(&url)).await?;
            match task.status.as_deref().unwrap_or_default() {
                "completed" => {
                    debug!(task_id, attempt, "chat task completed");
                    return Ok(task.gpt.unwrap_or_default());
                },
                "pending" => tokio::time::sleep(self.poll_interval).await,
                "error" => {
                    return Err(Error::Remote(
                        task.error.unwrap_or_else(|| "chat task failed".to_owned()),
                    ));
                },
                "not_found" => return Err(Error::TaskNotFound),
                other => return Err(Error::UnknownStatus(other.to_owned())),
            }
        }
        warn!(task_id, "chat task still pending after {MAX_POLL_ATTEMPTS} polls");
        Err(Error::PollExhausted)
    }
}

#[async_trait]
impl ChatCompletion for GptChat {
    async fn chat(&self, prompt: &str, history: Vec<ChatMessage>, model: &str) -> Result<String> {
        if prompt.is_empty() {
            return Err(Error::EmptyPrompt);
        }
        let model = if model.is_empty() {
            self.default_model.as_str()
        } else {
            model
        };

        let mut messages = self.prepare_history(history);
        messages.push(ChatMessage::user(prompt));

        let request = self.client.post(format!("{}/gpt", self.base_url)).json(&json!({
            "messages": messages,
            "prompt": prompt,
            "model": model,
            "markdown": false,
        }));
        let task: TaskResponse = send_json(request).await?;
        let task_id = task
            .id
            .filter(|id| !id.is_empty())
            .ok_or(Error::MissingTaskId)?;
        debug!(task_id, model, turns = messages.len(), "chat task submitted");

        self.poll(&task_id).await
    }
}
