#![cfg_attr(not(test), no_std)]
#![doc = include_str!("../README.md")]
#![warn(missing_docs)]
#![allow(clippy::too_many_lines)]

#[macro_use]
mod fmt;

pub mod api;
pub mod chain;
pub mod configure;
pub mod constants;
pub mod error;
mod kymera;
pub mod platform;
pub mod power;
pub mod processor;
pub mod queue;
pub mod volume;

#[cfg(test)]
mod testing;

use crate::chain::{MicCount, ScoForwarding};
use crate::constants::{DEFAULT_DAC_DISCONNECTION_DELAY_MS, DEFAULT_MIC_GAIN, MAX_CHANNELS, TONE_VOLUME};
use crate::error::KymeraError;
use crate::platform::Sink;
use crate::volume::VolumeRange;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::Channel;

pub use kymera::{
    A2dpCodecSettings, A2dpStartRequest, ClientLock, DspEvent, Kymera, MicSelection, Outcome, Progress,
    PromptFormat, RequestKind, ScoCodec, ScoFwdRxRequest, ScoStartRequest, Seid, SeidKind, StartRequest,
    StopRequest, ToneRequest, ToneSource,
};

pub(crate) static REQUEST_CHANNEL: Channel<CriticalSectionRawMutex, Request, MAX_CHANNELS> = Channel::new();

pub(crate) static RESPONSE_CHANNEL: Channel<CriticalSectionRawMutex, Response, MAX_CHANNELS> =
    Channel::new();

pub(crate) static DSP_EVENT_CHANNEL: Channel<CriticalSectionRawMutex, DspEvent, MAX_CHANNELS> =
    Channel::new();

/// Outcomes of processed requests, for whoever wants to observe them
pub(crate) static OUTCOME_CHANNEL: Channel<CriticalSectionRawMutex, Outcome, MAX_CHANNELS> =
    Channel::new();

/// Audio session state
///
/// A2DP starts pass through three construction phases before streaming. Forwarding
/// states are entered from their base state and return to it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum KymeraState {
    /// Nothing running
    #[default]
    Idle,
    /// A2DP output chain being built
    A2dpStartingA,
    /// A2DP decoder chain being built
    A2dpStartingB,
    /// A2DP chains being started
    A2dpStartingC,
    /// A2DP playing
    A2dpStreaming,
    /// A2DP playing and forwarded to the peer
    A2dpStreamingWithForwarding,
    /// SCO call active
    ScoActive,
    /// SCO call active and forwarded to the peer
    ScoActiveWithForwarding,
    /// Playing SCO forwarded by the peer
    ScoFwdRxActive,
    /// Tone or prompt playing
    TonePlaying,
}

impl KymeraState {
    /// Whether an A2DP stream is starting or playing
    #[must_use]
    pub const fn is_a2dp(self) -> bool {
        matches!(
            self,
            Self::A2dpStartingA
                | Self::A2dpStartingB
                | Self::A2dpStartingC
                | Self::A2dpStreaming
                | Self::A2dpStreamingWithForwarding
        )
    }

    /// Whether A2DP audio is playing
    #[must_use]
    pub const fn is_a2dp_streaming(self) -> bool {
        matches!(self, Self::A2dpStreaming | Self::A2dpStreamingWithForwarding)
    }

    /// Whether a voice chain is running
    #[must_use]
    pub const fn is_voice(self) -> bool {
        matches!(
            self,
            Self::ScoActive | Self::ScoActiveWithForwarding | Self::ScoFwdRxActive
        )
    }
}

/// Voice quality reporting
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct VoiceQualityConfig {
    /// Ask CVC for its quality metric
    pub measurement_enabled: bool,
    /// Value reported when measurement is disabled
    pub when_disabled: u8,
    /// Best value reported
    pub best: u8,
    /// Worst value reported
    pub worst: u8,
}

impl Default for VoiceQualityConfig {
    fn default() -> Self {
        Self {
            measurement_enabled: false,
            when_disabled: 15,
            best: 15,
            worst: 0,
        }
    }
}

/// Options for configuring a [`Kymera`] session
///
/// # Examples
///
/// ```rust
/// use budgie::{KymeraOptions, chain::{MicCount, ScoForwarding}};
///
/// let options = KymeraOptions {
///     mics: MicCount::Two,
///     sco_forwarding: ScoForwarding::ScoAndMic,
///     a2dp_forwarding: true,
///     ..KymeraOptions::default()
/// };
/// assert_eq!(options.dac_disconnection_delay_ms, 500);
/// ```
#[derive(Debug, Clone, Copy)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct KymeraOptions {
    /// Gain range mapped onto logical volume 1..=127
    pub volume_range: VolumeRange,
    /// Mic gain in dB
    pub mic_gain: u32,
    /// Mics used for voice
    pub mics: MicCount,
    /// Forwarding built into local SCO chains started with forwarding allowed
    pub sco_forwarding: ScoForwarding,
    /// Send this device's mic back when playing SCO forwarded by the peer
    pub mic_forwarding: bool,
    /// Build A2DP sink chains with a forwarding branch
    pub a2dp_forwarding: bool,
    /// Include the parametric EQ in the output chain
    pub output_peq: bool,
    /// Voice quality reporting
    pub voice_quality: VoiceQualityConfig,
    /// SCO time-to-play in microseconds; 0 disables it
    pub sco_ttp_us: u32,
    /// Delay between amplifier off and audio subsystem power down
    pub dac_disconnection_delay_ms: u32,
    /// Logical volume of tones and prompts
    pub tone_volume: u8,
}

impl Default for KymeraOptions {
    fn default() -> Self {
        Self {
            volume_range: VolumeRange::default(),
            mic_gain: DEFAULT_MIC_GAIN,
            mics: MicCount::One,
            sco_forwarding: ScoForwarding::Disabled,
            mic_forwarding: false,
            a2dp_forwarding: false,
            output_peq: false,
            voice_quality: VoiceQualityConfig::default(),
            sco_ttp_us: 0,
            dac_disconnection_delay_ms: DEFAULT_DAC_DISCONNECTION_DELAY_MS,
            tone_volume: TONE_VOLUME,
        }
    }
}

/// Requests accepted by the processor
#[derive(Debug, Clone, Copy)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Request {
    /// Start a use case
    Start(StartRequest),
    /// Stop a use case
    Stop(StopRequest, Option<ClientLock>),
    /// Set A2DP volume (0..=127)
    A2dpSetVolume(u8),
    /// Set HFP volume (0..=15)
    ScoSetVolume(u8),
    /// Mute or unmute the call mic
    ScoMicMute(bool),
    /// Forward the active call to the peer
    ScoStartForwarding {
        /// Peer link sink
        sink: Sink,
        /// Also receive the peer's mic
        mic_forwarding: bool,
    },
    /// Stop forwarding the call
    ScoStopForwarding,
    /// Pause or resume call forwarding
    ScoForwardingPause(bool),
    /// Select the mic used while forwarding
    SelectMic(MicSelection),
    /// Read the current voice quality
    VoiceQuality,
    /// Read the current state
    GetState,
    /// Advance the delayed request clock
    Elapsed(u32),
}

/// Responses sent back to the API
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Response {
    /// Request accepted
    Accepted,
    /// Voice quality
    VoiceQuality(u8),
    /// Session state
    State(KymeraState),
    /// Request rejected
    Error(KymeraError),
}
