//! Deferred messages and step outcomes

use super::types::{
    A2dpStartRequest, ClientLock, MicSelection, ScoFwdRxRequest, ScoStartRequest, ToneRequest,
};
use crate::error::KymeraError;
use crate::platform::{Sink, Source};

/// Messages held by the session queue
#[derive(Debug)]
pub(crate) enum Message {
    /// A2DP start waiting out its pre-start delay
    A2dpStart {
        request: A2dpStartRequest,
        resent: bool,
    },
    /// Next construction phase of an A2DP start
    A2dpStarting(A2dpStartRequest),
    A2dpStop {
        seid: u8,
        media: Option<Source>,
        client_lock: Option<ClientLock>,
    },
    A2dpSetVolume(u8),
    ScoStart {
        request: ScoStartRequest,
        resent: bool,
    },
    ScoStop(Option<ClientLock>),
    ScoSetVolume(u8),
    ScoMicMute(bool),
    ScoStartForwarding {
        sink: Sink,
        mic_forwarding: bool,
    },
    ScoStopForwarding,
    ScoFwdRxStart {
        request: ScoFwdRxRequest,
        resent: bool,
    },
    ScoFwdRxStop(Option<ClientLock>),
    MicSelect(MicSelection),
    TonePlay(ToneRequest),
    ToneStop(Option<ClientLock>),
    /// Power down the audio subsystem after the DAC disconnection delay
    AudioSubsystemDisable,
}

/// Kind of request processed by a step
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum RequestKind {
    /// A2DP start (pre-start delay phase)
    A2dpStart,
    /// A2DP construction phase
    A2dpStarting,
    /// A2DP stop
    A2dpStop,
    /// A2DP volume
    A2dpSetVolume,
    /// SCO start
    ScoStart,
    /// SCO stop
    ScoStop,
    /// SCO volume
    ScoSetVolume,
    /// SCO mic mute
    ScoMicMute,
    /// SCO forwarding start
    ScoStartForwarding,
    /// SCO forwarding stop
    ScoStopForwarding,
    /// Forwarded SCO receive start
    ScoFwdRxStart,
    /// Forwarded SCO receive stop
    ScoFwdRxStop,
    /// Forwarded mic selection
    MicSelect,
    /// Tone or prompt
    TonePlay,
    /// Tone stop
    ToneStop,
    /// Audio subsystem power down
    AudioSubsystemDisable,
}

impl Message {
    pub(crate) fn kind(&self) -> RequestKind {
        match self {
            Self::A2dpStart { .. } => RequestKind::A2dpStart,
            Self::A2dpStarting(_) => RequestKind::A2dpStarting,
            Self::A2dpStop { .. } => RequestKind::A2dpStop,
            Self::A2dpSetVolume(_) => RequestKind::A2dpSetVolume,
            Self::ScoStart { .. } => RequestKind::ScoStart,
            Self::ScoStop(_) => RequestKind::ScoStop,
            Self::ScoSetVolume(_) => RequestKind::ScoSetVolume,
            Self::ScoMicMute(_) => RequestKind::ScoMicMute,
            Self::ScoStartForwarding { .. } => RequestKind::ScoStartForwarding,
            Self::ScoStopForwarding => RequestKind::ScoStopForwarding,
            Self::ScoFwdRxStart { .. } => RequestKind::ScoFwdRxStart,
            Self::ScoFwdRxStop(_) => RequestKind::ScoFwdRxStop,
            Self::MicSelect(_) => RequestKind::MicSelect,
            Self::TonePlay(_) => RequestKind::TonePlay,
            Self::ToneStop(_) => RequestKind::ToneStop,
            Self::AudioSubsystemDisable => RequestKind::AudioSubsystemDisable,
        }
    }
}

/// How far a processed request got
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Progress {
    /// Request finished
    Done,
    /// Request re-queued itself (pre-start delay or next construction phase)
    Deferred,
    /// Request had nothing to do in the current state
    Ignored,
}

/// Result of one scheduler step
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Outcome {
    /// Request processed
    pub kind: RequestKind,
    /// What happened
    pub result: Result<Progress, KymeraError>,
}
