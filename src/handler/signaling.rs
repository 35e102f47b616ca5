use std::sync::Arc;

use axum::{Json, Router, body::Bytes, extract::State, routing::post};
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;

use crate::handler::ApiJsonResult;
use crate::viewer::signaling::{SignalingError, Signaler};

pub fn signaling_router(signaler: Arc<Signaler>) -> Router {
    Router::new()
        .route("/doSignaling", post(do_signaling))
        .with_state(signaler)
}

/// Takes the viewer's offer as a JSON session description and replies with
/// the complete answer once candidate gathering is done.
async fn do_signaling(
    State(signaler): State<Arc<Signaler>>,
    body: Bytes,
) -> ApiJsonResult<RTCSessionDescription> {
    let offer: RTCSessionDescription = serde_json::from_slice(&body)
        .map_err(|e| SignalingError::MalformedOffer(e.to_string()))?;
    let answer = signaler.negotiate(offer).await?;
    Ok(Json(answer))
}
