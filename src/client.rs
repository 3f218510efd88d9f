use crate::protocol::{
    ChatRequest, ConversationSummary, SavePartialRequest, StoredMessage, TitleRequest,
};
use reqwest::Client as HttpClient;
use std::error::Error;

type ClientResult<T> = Result<T, Box<dyn Error + Send + Sync>>;

/// HTTP client for the conversation backend. All paths live under a single
/// base URL such as `http://localhost:5000/api`.
#[derive(Debug, Clone)]
pub struct ApiClient {
    base_url: String,
    http: HttpClient,
}

impl ApiClient {
    pub fn new(base_url: &str) -> Self {
        Self {
            base_url: normalize_base_url(base_url),
            http: HttpClient::new(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub async fn list_conversations(&self) -> ClientResult<Vec<ConversationSummary>> {
        let response = self
            .http
            .get(format!("{}/conversations", self.base_url))
            .send()
            .await?;
        let response = ensure_success(response, "list conversations").await?;
        Ok(response.json().await?)
    }

    pub async fn create_conversation(&self) -> ClientResult<ConversationSummary> {
        let response = self
            .http
            .post(format!("{}/conversations", self.base_url))
            .send()
            .await?;
        let response = ensure_success(response, "create conversation").await?;
        Ok(response.json().await?)
    }

    pub async fn delete_conversation(&self, id: &str) -> ClientResult<()> {
        let response = self
            .http
            .delete(format!("{}/conversations/{}", self.base_url, id))
            .send()
            .await?;
        ensure_success(response, "delete conversation").await?;
        Ok(())
    }

    pub async fn set_title(&self, id: &str, title: &str) -> ClientResult<()> {
        let request = TitleRequest {
            title: title.to_string(),
        };
        let response = self
            .http
            .put(format!("{}/conversations/{}/title", self.base_url, id))
            .json(&request)
            .send()
            .await?;
        ensure_success(response, "update title").await?;
        Ok(())
    }

    pub async fn conversation_messages(&self, id: &str) -> ClientResult<Vec<StoredMessage>> {
        let response = self
            .http
            .get(format!("{}/conversations/{}/messages", self.base_url, id))
            .send()
            .await?;
        let response = ensure_success(response, "load messages").await?;
        Ok(response.json().await?)
    }

    /// Opens the streaming chat response. The caller consumes the body with
    /// `bytes_stream()`; dropping the response aborts the request and the
    /// server stops generating once the connection closes.
    pub async fn open_chat_stream(
        &self,
        id: &str,
        message: &str,
    ) -> ClientResult<reqwest::Response> {
        let request = ChatRequest {
            message: message.to_string(),
        };
        let response = self
            .http
            .post(format!("{}/conversations/{}/chat", self.base_url, id))
            .json(&request)
            .send()
            .await?;
        ensure_success(response, "start chat").await
    }

    pub async fn save_partial(&self, id: &str, content: &str) -> ClientResult<()> {
        let request = SavePartialRequest {
            content: content.to_string(),
        };
        let response = self
            .http
            .post(format!("{}/conversations/{}/save-partial", self.base_url, id))
            .json(&request)
            .send()
            .await?;
        ensure_success(response, "save partial response").await?;
        Ok(())
    }
}

async fn ensure_success(
    response: reqwest::Response,
    what: &str,
) -> ClientResult<reqwest::Response> {
    if response.status().is_success() {
        return Ok(response);
    }
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    Err(format!("Failed to {}: {} - {}", what, status, body).into())
}

fn normalize_base_url(value: &str) -> String {
    value.trim_end_matches('/').to_string()
}
