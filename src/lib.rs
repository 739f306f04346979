pub mod config;
pub mod db;
pub mod fallback;
pub mod hub;
pub mod index;
pub mod logging;
pub mod model;
pub mod rooms;
pub mod session;
pub mod store;

use axum::{
    Json, Router,
    extract::FromRef,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use tower_http::trace::TraceLayer;
use tracing::error;

use crate::{hub::Hub, store::StoreError};

#[derive(Clone, FromRef)]
pub struct AppState {
    pub hub: Hub,
}

pub fn app(state: AppState) -> Router {
    Router::new()
        .nest("/chat", rooms::router())
        .nest("/api/chat", fallback::router())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub type AppResult<T> = Result<T, AppError>;

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("{0}")]
    Validation(String),
    #[error("authentication required")]
    AuthenticationRequired,
    #[error("{0}")]
    NotFound(String),
    #[error(transparent)]
    Internal(anyhow::Error),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match &self {
            AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::AuthenticationRequired => StatusCode::UNAUTHORIZED,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Internal(err) => {
                error!("{err}\n\n{}", err.backtrace());
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };

        (
            status,
            Json(json!({
                "status": "error",
                "message": self.to_string(),
            })),
        )
            .into_response()
    }
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Validation(msg) => Self::Validation(msg),
            StoreError::Unavailable(err) => Self::Internal(anyhow::Error::from(err)),
        }
    }
}

macro_rules! apperr_impl {
    ($E:ty) => {
        impl From<$E> for AppError {
            fn from(err: $E) -> Self {
                Self::Internal(anyhow::Error::from(err))
            }
        }
    };
}

apperr_impl!(tower_sessions::session::Error);
