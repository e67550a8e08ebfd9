//! Authoritative REST API for boards.
//!
//! Every mutation is confirmed here; the realtime socket only notifies.
//! Calls carry a bearer token and JSON bodies. There are no client-side
//! retries and no request timeout: the coordinator decides what to do with
//! a failure, and slow answers are superseded rather than cancelled.

use async_trait::async_trait;
use base64::{Engine as _, engine::general_purpose::STANDARD};
use board::{
    Attachment, Board, Card, List, ListPosition,
    protocol::{BoardPatch, CardPatch, ListPatch},
};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use uuid::Uuid;

/// Errors from the authoritative API.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("authentication required")]
    Authentication,
    #[error("forbidden: {0}")]
    Authorization(String),
    #[error("not found")]
    NotFound,
    #[error("api error {status}: {message}")]
    Api { status: u16, message: String },
    #[error("network error: {0}")]
    Network(String),
    #[error("decode error: {0}")]
    Decode(String),
}

/// Body of the authoritative card move call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MoveCardRequest {
    pub board_id: Uuid,
    /// Destination list; present even for same-list reorders.
    pub list_id: Uuid,
    pub position: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_list_id: Option<Uuid>,
}

/// Payload for uploading a card attachment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttachmentUpload {
    pub file_name: String,
    pub mime_type: String,
    pub data_base64: String,
}

impl AttachmentUpload {
    /// Build an upload payload from raw bytes.
    pub fn from_bytes(
        file_name: impl Into<String>,
        mime_type: impl Into<String>,
        data: &[u8],
    ) -> Self {
        Self {
            file_name: file_name.into(),
            mime_type: mime_type.into(),
            data_base64: STANDARD.encode(data),
        }
    }
}

/// The authoritative board API.
///
/// Implementations must be shareable across the coordinator and session
/// tasks.
#[async_trait]
pub trait BoardApi: Send + Sync {
    async fn list_boards(&self, owner: Uuid) -> Result<Vec<Board>, ApiError>;
    async fn fetch_board(&self, board_id: Uuid) -> Result<Board, ApiError>;
    async fn create_list(&self, board_id: Uuid, title: &str) -> Result<List, ApiError>;
    async fn update_list(&self, list_id: Uuid, patch: &ListPatch) -> Result<List, ApiError>;
    async fn delete_list(&self, list_id: Uuid) -> Result<(), ApiError>;
    async fn create_card(&self, list_id: Uuid, title: &str) -> Result<Card, ApiError>;
    async fn update_card(&self, card_id: Uuid, patch: &CardPatch) -> Result<Card, ApiError>;
    async fn move_card(&self, card_id: Uuid, request: &MoveCardRequest) -> Result<Card, ApiError>;
    async fn reorder_lists(
        &self,
        board_id: Uuid,
        orders: &[ListPosition],
    ) -> Result<Vec<ListPosition>, ApiError>;
    async fn update_board(&self, board_id: Uuid, patch: &BoardPatch) -> Result<Board, ApiError>;
    async fn upload_attachment(
        &self,
        card_id: Uuid,
        upload: &AttachmentUpload,
    ) -> Result<Attachment, ApiError>;
}

/// HTTP implementation of [`BoardApi`].
pub struct HttpBoardApi {
    http: reqwest::Client,
    base_url: String,
    token: String,
}

impl HttpBoardApi {
    pub fn new(base_url: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: token.into(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn execute<T: DeserializeOwned>(
        &self,
        request: reqwest::RequestBuilder,
    ) -> Result<T, ApiError> {
        let response = request
            .bearer_auth(&self.token)
            .send()
            .await
            .map_err(|e| ApiError::Network(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            return response
                .json::<T>()
                .await
                .map_err(|e| ApiError::Decode(e.to_string()));
        }

        let body = response.text().await.unwrap_or_default();
        tracing::debug!(status = status.as_u16(), body = %body, "api returned error");
        Err(error_from_status(status.as_u16(), &body))
    }

    async fn execute_no_content(&self, request: reqwest::RequestBuilder) -> Result<(), ApiError> {
        let response = request
            .bearer_auth(&self.token)
            .send()
            .await
            .map_err(|e| ApiError::Network(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }

        let body = response.text().await.unwrap_or_default();
        tracing::debug!(status = status.as_u16(), body = %body, "api returned error");
        Err(error_from_status(status.as_u16(), &body))
    }
}

#[async_trait]
impl BoardApi for HttpBoardApi {
    async fn list_boards(&self, owner: Uuid) -> Result<Vec<Board>, ApiError> {
        self.execute(self.http.get(self.url(&format!("/boards?owner={owner}"))))
            .await
    }

    async fn fetch_board(&self, board_id: Uuid) -> Result<Board, ApiError> {
        self.execute(self.http.get(self.url(&format!("/boards/{board_id}"))))
            .await
    }

    async fn create_list(&self, board_id: Uuid, title: &str) -> Result<List, ApiError> {
        self.execute(
            self.http
                .post(self.url(&format!("/boards/{board_id}/lists")))
                .json(&serde_json::json!({ "title": title })),
        )
        .await
    }

    async fn update_list(&self, list_id: Uuid, patch: &ListPatch) -> Result<List, ApiError> {
        self.execute(
            self.http
                .patch(self.url(&format!("/lists/{list_id}")))
                .json(patch),
        )
        .await
    }

    async fn delete_list(&self, list_id: Uuid) -> Result<(), ApiError> {
        self.execute_no_content(self.http.delete(self.url(&format!("/lists/{list_id}"))))
            .await
    }

    async fn create_card(&self, list_id: Uuid, title: &str) -> Result<Card, ApiError> {
        self.execute(
            self.http
                .post(self.url(&format!("/lists/{list_id}/cards")))
                .json(&serde_json::json!({ "title": title })),
        )
        .await
    }

    async fn update_card(&self, card_id: Uuid, patch: &CardPatch) -> Result<Card, ApiError> {
        self.execute(
            self.http
                .patch(self.url(&format!("/cards/{card_id}")))
                .json(patch),
        )
        .await
    }

    async fn move_card(&self, card_id: Uuid, request: &MoveCardRequest) -> Result<Card, ApiError> {
        self.execute(
            self.http
                .put(self.url(&format!("/cards/{card_id}/move")))
                .json(request),
        )
        .await
    }

    async fn reorder_lists(
        &self,
        board_id: Uuid,
        orders: &[ListPosition],
    ) -> Result<Vec<ListPosition>, ApiError> {
        self.execute(
            self.http
                .put(self.url(&format!("/boards/{board_id}/lists/reorder")))
                .json(&serde_json::json!({ "listOrders": orders })),
        )
        .await
    }

    async fn update_board(&self, board_id: Uuid, patch: &BoardPatch) -> Result<Board, ApiError> {
        self.execute(
            self.http
                .patch(self.url(&format!("/boards/{board_id}")))
                .json(patch),
        )
        .await
    }

    async fn upload_attachment(
        &self,
        card_id: Uuid,
        upload: &AttachmentUpload,
    ) -> Result<Attachment, ApiError> {
        self.execute(
            self.http
                .post(self.url(&format!("/cards/{card_id}/attachments")))
                .json(upload),
        )
        .await
    }
}

#[derive(Deserialize)]
struct ErrorBody {
    error: String,
}

/// Map a non-2xx response onto the error taxonomy. Error bodies are
/// `{ "error": "…" }`; anything else is carried verbatim.
fn error_from_status(status: u16, body: &str) -> ApiError {
    let message = serde_json::from_str::<ErrorBody>(body)
        .map(|b| b.error)
        .unwrap_or_else(|_| body.to_string());

    match status {
        400 => ApiError::Validation(message),
        401 => ApiError::Authentication,
        403 => ApiError::Authorization(message),
        404 => ApiError::NotFound,
        _ => ApiError::Api { status, message },
    }
}
