use std::future::Future;
use std::sync::{Arc, Weak};
use std::time::Duration;

use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::{APIBuilder, API};
use webrtc::ice_transport::ice_connection_state::RTCIceConnectionState;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::sdp::sdp_type::RTCSdpType;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_sender::RTCRtpSender;

use crate::config::SignalingConfig;
use crate::media::track::OutboundTrack;
use crate::viewer::counter::ConnectionCounter;
use crate::viewer::registry::PeerRegistry;
use crate::viewer::session::{Transition, ViewerSession};

#[derive(Debug, thiserror::Error)]
pub enum SignalingError {
    #[error("malformed offer: {0}")]
    MalformedOffer(String),
    #[error("create peer connection: {0}")]
    PeerConnection(webrtc::Error),
    #[error("negotiation failed: {0}")]
    Negotiation(webrtc::Error),
    #[error("ICE gathering did not complete within {0:?}")]
    GatherTimeout(Duration),
    #[error("peer connection has no local description")]
    NoLocalDescription,
}

/// Answers viewer offers. One instance serves every request; each call to
/// [`Signaler::negotiate`] creates an independent viewer session.
pub struct Signaler {
    api: API,
    config: SignalingConfig,
    track: Arc<OutboundTrack>,
    counter: ConnectionCounter,
    peers: Arc<PeerRegistry<RTCPeerConnection>>,
}

impl Signaler {
    pub fn new(
        config: SignalingConfig,
        track: Arc<OutboundTrack>,
        counter: ConnectionCounter,
    ) -> anyhow::Result<Self> {
        let mut media_engine = MediaEngine::default();
        media_engine.register_default_codecs()?;
        let registry = register_default_interceptors(Default::default(), &mut media_engine)?;
        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build();

        Ok(Self {
            api,
            config,
            track,
            counter,
            peers: Arc::new(PeerRegistry::new()),
        })
    }

    /// Peer connections that have not disconnected yet.
    pub fn live_peers(&self) -> usize {
        self.peers.len()
    }

    /// Turns a viewer offer into a complete answer, candidates included.
    ///
    /// On failure the half-built peer connection is released before
    /// returning; the viewer never reaches the connected count.
    pub async fn negotiate(
        &self,
        offer: RTCSessionDescription,
    ) -> Result<RTCSessionDescription, SignalingError> {
        if offer.sdp_type != RTCSdpType::Offer {
            return Err(SignalingError::MalformedOffer(format!(
                "expected an offer, got {}",
                offer.sdp_type
            )));
        }

        let session = Arc::new(ViewerSession::new(self.counter.clone()));
        let pc = Arc::new(
            self.api
                .new_peer_connection(self.rtc_configuration())
                .await
                .map_err(SignalingError::PeerConnection)?,
        );
        self.peers.insert(session.id(), Arc::clone(&pc));
        watch_connection_state(&pc, Arc::clone(&session), Arc::downgrade(&self.peers));

        match self.handshake(&pc, &session, offer).await {
            Ok(answer) => {
                log::info!(
                    "viewer {} answered ({} live peer connections)",
                    session.id(),
                    self.live_peers()
                );
                Ok(answer)
            }
            Err(e) => {
                log::warn!(
                    "viewer {} negotiation failed while {:?}: {}",
                    session.id(),
                    session.state(),
                    e
                );
                if let Transition::Disconnected { .. } = session.disconnect() {
                    release(&self.peers, &session).await;
                }
                Err(e)
            }
        }
    }

    async fn handshake(
        &self,
        pc: &RTCPeerConnection,
        session: &ViewerSession,
        offer: RTCSessionDescription,
    ) -> Result<RTCSessionDescription, SignalingError> {
        let sender = pc
            .add_track(self.track.track_local())
            .await
            .map_err(SignalingError::Negotiation)?;
        spawn_rtcp_drain(sender);
        session.begin_negotiation();

        pc.set_remote_description(offer)
            .await
            .map_err(SignalingError::Negotiation)?;

        let mut gather_complete = pc.gathering_complete_promise().await;
        let answer = pc
            .create_answer(None)
            .await
            .map_err(SignalingError::Negotiation)?;
        pc.set_local_description(answer)
            .await
            .map_err(SignalingError::Negotiation)?;

        wait_for_gathering(gather_complete.recv(), self.config.gather_timeout).await?;

        pc.local_description()
            .await
            .ok_or(SignalingError::NoLocalDescription)
    }

    fn rtc_configuration(&self) -> RTCConfiguration {
        let ice_servers = if self.config.ice_servers.is_empty() {
            Vec::new()
        } else {
            vec![RTCIceServer {
                urls: self.config.ice_servers.clone(),
                ..Default::default()
            }]
        };
        RTCConfiguration {
            ice_servers,
            ..Default::default()
        }
    }

    /// Closes every live viewer. Used on shutdown.
    pub async fn close_all(&self) {
        for pc in self.peers.drain() {
            if let Err(e) = pc.close().await {
                log::warn!("close peer connection: {}", e);
            }
        }
    }
}

/// Bounds the wait for ICE gathering. Only the calling request waits.
pub(crate) async fn wait_for_gathering<F>(gathered: F, timeout: Duration) -> Result<(), SignalingError>
where
    F: Future,
{
    tokio::time::timeout(timeout, gathered)
        .await
        .map(|_| ())
        .map_err(|_| SignalingError::GatherTimeout(timeout))
}

fn watch_connection_state(
    pc: &RTCPeerConnection,
    session: Arc<ViewerSession>,
    peers: Weak<PeerRegistry<RTCPeerConnection>>,
) {
    pc.on_ice_connection_state_change(Box::new(move |state: RTCIceConnectionState| {
        let session = Arc::clone(&session);
        let peers = peers.clone();
        Box::pin(async move {
            log::debug!("viewer {} ice state {}", session.id(), state);
            if let Transition::Disconnected { .. } = session.on_transport_state(state.into()) {
                if let Some(peers) = peers.upgrade() {
                    // closing re-enters this handler; do it off the callback
                    tokio::spawn(async move { release(&peers, &session).await });
                }
            }
        })
    }));
}

async fn release(peers: &PeerRegistry<RTCPeerConnection>, session: &ViewerSession) {
    if let Some(pc) = peers.remove(&session.id()) {
        if let Err(e) = pc.close().await {
            log::warn!("viewer {} close: {}", session.id(), e);
        }
    }
}

/// Interceptors only run when RTCP is read.
fn spawn_rtcp_drain(sender: Arc<RTCRtpSender>) {
    tokio::spawn(async move {
        let mut rtcp_buf = vec![0u8; 1500];
        while let Ok((_, _)) = sender.read(&mut rtcp_buf).await {}
    });
}
