use std::sync::{Mutex, PoisonError};

use uuid::Uuid;
use webrtc::ice_transport::ice_connection_state::RTCIceConnectionState;

use crate::viewer::counter::ConnectionCounter;

/// Lifecycle of one viewer. `Disconnected` is terminal and reachable from
/// every other state; no state is entered twice.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViewerState {
    New,
    Negotiating,
    Connected,
    Disconnected,
}

/// Connectivity as reported by the peer stack, reduced to what the
/// lifecycle reacts to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportState {
    Connected,
    Disconnected,
    Pending,
}

impl From<RTCIceConnectionState> for TransportState {
    fn from(state: RTCIceConnectionState) -> Self {
        match state {
            RTCIceConnectionState::Connected | RTCIceConnectionState::Completed => {
                TransportState::Connected
            }
            RTCIceConnectionState::Disconnected
            | RTCIceConnectionState::Failed
            | RTCIceConnectionState::Closed => TransportState::Disconnected,
            _ => TransportState::Pending,
        }
    }
}

/// What the caller has to do after feeding an event to a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    None,
    Connected,
    /// Release the peer connection. Returned once per session.
    Disconnected { was_connected: bool },
}

pub struct ViewerSession {
    id: Uuid,
    state: Mutex<ViewerState>,
    counter: ConnectionCounter,
}

impl ViewerSession {
    pub fn new(counter: ConnectionCounter) -> Self {
        Self {
            id: Uuid::new_v4(),
            state: Mutex::new(ViewerState::New),
            counter,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn state(&self) -> ViewerState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// `New → Negotiating`, once the peer connection is attached to the track.
    pub fn begin_negotiation(&self) -> bool {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if *state != ViewerState::New {
            return false;
        }
        *state = ViewerState::Negotiating;
        true
    }

    pub fn on_transport_state(&self, transport: TransportState) -> Transition {
        match transport {
            TransportState::Connected => self.connect(),
            TransportState::Disconnected => self.disconnect(),
            TransportState::Pending => Transition::None,
        }
    }

    fn connect(&self) -> Transition {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if *state != ViewerState::Negotiating {
            return Transition::None;
        }
        *state = ViewerState::Connected;
        let connected = self.counter.increment();
        log::info!("viewer {} connected ({} connected)", self.id, connected);
        Transition::Connected
    }

    /// Moves to `Disconnected` from any live state. Only a session that had
    /// connected gives its slot in the counter back.
    pub fn disconnect(&self) -> Transition {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let previous = *state;
        if previous == ViewerState::Disconnected {
            return Transition::None;
        }
        *state = ViewerState::Disconnected;

        let was_connected = previous == ViewerState::Connected;
        if was_connected {
            let connected = self.counter.decrement();
            log::info!("viewer {} disconnected ({} connected)", self.id, connected);
        } else {
            log::info!("viewer {} disconnected while {:?}", self.id, previous);
        }
        Transition::Disconnected { was_connected }
    }
}
