use std::future::Future;

use axum::{
    http::{header::HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use cuelink_common::protocol::ws::ServerNotice;
use serde_json::{json, Value};
use uuid::Uuid;

pub const REQUEST_ID_HEADER: &str = "x-request-id";

tokio::task_local! {
    static REQUEST_ID: String;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    ValidationFailed,
    InvalidMessage,
    RegisterRequired,
    AlreadyRegistered,
    DeviceReplaced,
    NotFound,
    InternalError,
}

impl ErrorCode {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ValidationFailed => "VALIDATION_FAILED",
            Self::InvalidMessage => "INVALID_MESSAGE",
            Self::RegisterRequired => "REGISTER_REQUIRED",
            Self::AlreadyRegistered => "ALREADY_REGISTERED",
            Self::DeviceReplaced => "DEVICE_REPLACED",
            Self::NotFound => "NOT_FOUND",
            Self::InternalError => "INTERNAL_ERROR",
        }
    }

    pub const fn status(self) -> StatusCode {
        match self {
            Self::ValidationFailed => StatusCode::BAD_REQUEST,
            Self::InvalidMessage => StatusCode::BAD_REQUEST,
            Self::RegisterRequired => StatusCode::PRECONDITION_REQUIRED,
            Self::AlreadyRegistered => StatusCode::CONFLICT,
            Self::DeviceReplaced => StatusCode::CONFLICT,
            Self::NotFound => StatusCode::NOT_FOUND,
            Self::InternalError => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub const fn retryable(self) -> bool {
        matches!(self, Self::RegisterRequired | Self::InternalError)
    }

    pub const fn default_message(self) -> &'static str {
        match self {
            Self::ValidationFailed => "request validation failed",
            Self::InvalidMessage => "invalid websocket frame payload",
            Self::RegisterRequired => "register before sending messages",
            Self::AlreadyRegistered => "connection is already registered",
            Self::DeviceReplaced => "device connected again from another link",
            Self::NotFound => "requested resource not found",
            Self::InternalError => "internal server error",
        }
    }
}

/// Reasons a registration attempt is refused.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistrationError {
    #[error("session_id is required")]
    MissingSessionId,
    #[error("device_id is required")]
    MissingDeviceId,
    #[error("role is required")]
    MissingRole,
    #[error("unsupported role `{0}`, expected `player` or `remote`")]
    UnknownRole(String),
    #[error("connection is already registered as `{device_id}` in session `{session_id}`")]
    AlreadyRegistered { session_id: String, device_id: String },
    #[error("connection is not known to the relay")]
    UnknownConnection,
}

impl RegistrationError {
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::AlreadyRegistered { .. } => ErrorCode::AlreadyRegistered,
            Self::UnknownConnection => ErrorCode::NotFound,
            _ => ErrorCode::ValidationFailed,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RelayError {
    code: ErrorCode,
    message: String,
    details: Value,
    request_id: Option<String>,
}

impl RelayError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self { code, message: message.into(), details: json!({}), request_id: None }
    }

    pub fn from_code(code: ErrorCode) -> Self {
        Self::new(code, code.default_message())
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = details;
        self
    }

    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }

    pub fn code(&self) -> ErrorCode {
        self.code
    }

    /// Socket-side rendering of the error.
    pub fn to_notice(&self) -> ServerNotice {
        ServerNotice::Error {
            code: self.code.as_str().to_string(),
            message: self.message.clone(),
            retryable: self.code.retryable(),
        }
    }
}

impl From<&RegistrationError> for RelayError {
    fn from(error: &RegistrationError) -> Self {
        Self::new(error.code(), error.to_string())
    }
}

impl IntoResponse for RelayError {
    fn into_response(self) -> Response {
        let request_id = self.request_id.or_else(current_request_id);

        let mut response = (
            self.code.status(),
            Json(json!({
                "error": {
                    "code": self.code.as_str(),
                    "message": self.message,
                    "retryable": self.code.retryable(),
                    "request_id": request_id.clone(),
                    "details": self.details,
                }
            })),
        )
            .into_response();

        if let Some(request_id) = request_id {
            attach_request_id_header(&mut response, &request_id);
        }

        response
    }
}

pub async fn with_request_id_scope<F>(request_id: String, future: F) -> F::Output
where
    F: Future,
{
    REQUEST_ID.scope(request_id, future).await
}

pub fn current_request_id() -> Option<String> {
    REQUEST_ID.try_with(Clone::clone).ok()
}

pub fn request_id_from_headers_or_generate(headers: &HeaderMap) -> String {
    headers
        .get(REQUEST_ID_HEADER)
        .and_then(|value| value.to_str().ok())
        .filter(|value| !value.trim().is_empty())
        .map(ToOwned::to_owned)
        .unwrap_or_else(|| Uuid::new_v4().to_string())
}

pub fn attach_request_id_header(response: &mut Response, request_id: &str) {
    if let Ok(header) = HeaderValue::from_str(request_id) {
        response.headers_mut().insert(REQUEST_ID_HEADER, header);
    }
}
