use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};

use crate::viewer::signaling::SignalingError;

pub mod signaling;

pub type ApiResult<T> = Result<T, ApiError>;
pub type ApiJsonResult<T> = ApiResult<Json<T>>;

pub struct ApiError(anyhow::Error);

impl ApiError {
    fn status(&self) -> StatusCode {
        match self.0.downcast_ref::<SignalingError>() {
            Some(SignalingError::MalformedOffer(_)) => StatusCode::BAD_REQUEST,
            Some(SignalingError::GatherTimeout(_)) => StatusCode::GATEWAY_TIMEOUT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            log::error!("request failed: {:#}", self.0);
        } else {
            log::warn!("request rejected: {:#}", self.0);
        }
        (status, self.0.to_string()).into_response()
    }
}

impl<E> From<E> for ApiError
where
    E: Into<anyhow::Error>,
{
    fn from(err: E) -> Self {
        Self(err.into())
    }
}
