use axum::{
    extract::{FromRef, FromRequestParts},
    http::request::Parts,
};
use tower_sessions::Session;

use crate::{AppError, hub::Hub, model::{User, UserId}};

pub const USER_ID: &str = "user_id";

#[derive(Debug, Clone)]
pub struct Identity(pub User);

impl<S> FromRequestParts<S> for Identity
where
    S: Send + Sync,
    Hub: FromRef<S>,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let session = Session::from_request_parts(parts, state)
            .await
            .map_err(|_| AppError::AuthenticationRequired)?;

        let Some(user_id) = session.get::<UserId>(USER_ID).await? else {
            return Err(AppError::AuthenticationRequired);
        };

        let hub = Hub::from_ref(state);
        let user = hub.users.find(user_id).await?.ok_or(AppError::AuthenticationRequired)?;
        Ok(Identity(user))
    }
}
