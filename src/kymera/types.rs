//! Request parameters and session value types

use crate::constants::TONE_GEN_RATE;
use crate::error::ConfigurationError;
use crate::platform::{MediaCodec, PromptId, RingtoneNote, Sink, Source};
use core::sync::atomic::{AtomicU16, Ordering};

/// A2DP stream endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum Seid {
    /// SBC from the handset
    SbcSink = 0x01,
    /// AAC from the handset
    AacSink = 0x02,
    /// aptX from the handset
    AptxSink = 0x03,
    /// Mono SBC from the peer
    SbcMonoTwsSink = 0x04,
    /// Stereo AAC from the peer
    AacStereoTwsSink = 0x05,
    /// Mono aptX from the peer
    AptxMonoTwsSink = 0x06,
    /// Mono SBC to the peer
    SbcMonoTwsSource = 0x08,
    /// Stereo AAC to the peer
    AacStereoTwsSource = 0x09,
    /// Mono aptX to the peer
    AptxMonoTwsSource = 0x0A,
}

/// Direction of a stream endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SeidKind {
    /// Media from the handset; this device is the master
    Sink,
    /// Media from the peer; this device is the slave
    TwsSink,
    /// Media to the peer
    Source,
}

impl Seid {
    /// Parse a raw stream endpoint id
    #[must_use]
    pub const fn from_raw(raw: u8) -> Option<Self> {
        match raw {
            0x01 => Some(Self::SbcSink),
            0x02 => Some(Self::AacSink),
            0x03 => Some(Self::AptxSink),
            0x04 => Some(Self::SbcMonoTwsSink),
            0x05 => Some(Self::AacStereoTwsSink),
            0x06 => Some(Self::AptxMonoTwsSink),
            0x08 => Some(Self::SbcMonoTwsSource),
            0x09 => Some(Self::AacStereoTwsSource),
            0x0A => Some(Self::AptxMonoTwsSource),
            _ => None,
        }
    }

    /// Parse a raw stream endpoint id, reporting unknown ids
    ///
    /// # Errors
    ///
    /// Returns [`ConfigurationError::UnsupportedSeid`] for unknown ids.
    pub const fn parse(raw: u8) -> Result<Self, ConfigurationError> {
        match Self::from_raw(raw) {
            Some(seid) => Ok(seid),
            None => Err(ConfigurationError::UnsupportedSeid(raw)),
        }
    }

    /// Raw id
    #[must_use]
    pub const fn raw(self) -> u8 {
        self as u8
    }

    /// Direction
    #[must_use]
    pub const fn kind(self) -> SeidKind {
        match self {
            Self::SbcSink | Self::AacSink | Self::AptxSink => SeidKind::Sink,
            Self::SbcMonoTwsSink | Self::AacStereoTwsSink | Self::AptxMonoTwsSink => {
                SeidKind::TwsSink
            }
            Self::SbcMonoTwsSource | Self::AacStereoTwsSource | Self::AptxMonoTwsSource => {
                SeidKind::Source
            }
        }
    }

    /// Codec carried
    #[must_use]
    pub const fn codec(self) -> MediaCodec {
        match self {
            Self::SbcSink | Self::SbcMonoTwsSink | Self::SbcMonoTwsSource => MediaCodec::Sbc,
            Self::AacSink | Self::AacStereoTwsSink | Self::AacStereoTwsSource => MediaCodec::Aac,
            Self::AptxSink | Self::AptxMonoTwsSink | Self::AptxMonoTwsSource => MediaCodec::Aptx,
        }
    }
}

/// SCO air codec
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ScoCodec {
    /// CVSD, narrowband
    Cvsd,
    /// mSBC, wideband
    Msbc,
}

impl ScoCodec {
    /// Audio sample rate
    #[must_use]
    pub const fn sample_rate(self) -> u32 {
        match self {
            Self::Cvsd => crate::constants::SCO_NB_RATE,
            Self::Msbc => crate::constants::SCO_WB_RATE,
        }
    }

    /// Whether the codec is narrowband
    #[must_use]
    pub const fn is_narrowband(self) -> bool {
        matches!(self, Self::Cvsd)
    }
}

/// Mic used for the call while SCO is forwarded
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum MicSelection {
    /// This device's mic
    #[default]
    Local,
    /// The peer's mic, received over the peer link
    Remote,
}

impl MicSelection {
    /// Switch input selecting this mic
    #[must_use]
    pub const fn switch_input(self) -> u16 {
        match self {
            Self::Local => 1,
            Self::Remote => 2,
        }
    }
}

/// Completion signal shared with a caller
///
/// The caller sets bits in its lock word before issuing a request and waits for them
/// to clear. The session clears `mask` once the request finished, whether it succeeded
/// or failed.
///
/// The word is updated with plain loads and stores inside a critical section, so it
/// works on cores without atomic read-modify-write (thumbv6m). Callers sharing the word
/// between contexts must set their bits under `critical_section::with` too.
#[derive(Debug, Clone, Copy)]
pub struct ClientLock {
    lock: &'static AtomicU16,
    mask: u16,
}

impl ClientLock {
    /// Signal completion by clearing `mask` in `lock`
    #[must_use]
    pub const fn new(lock: &'static AtomicU16, mask: u16) -> Self {
        Self { lock, mask }
    }

    /// Bits cleared on completion
    #[must_use]
    pub const fn mask(&self) -> u16 {
        self.mask
    }

    /// Clear the bits
    pub fn release(self) {
        critical_section::with(|_| {
            let word = self.lock.load(Ordering::Acquire);
            self.lock.store(word & !self.mask, Ordering::Release);
        });
    }
}

#[cfg(feature = "defmt")]
impl defmt::Format for ClientLock {
    fn format(&self, f: defmt::Formatter) {
        defmt::write!(f, "ClientLock(mask={=u16:#x})", self.mask);
    }
}

/// A2DP stream parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct A2dpCodecSettings {
    /// Raw stream endpoint id
    pub seid: u8,
    /// Sample rate in Hz
    pub rate: u32,
    /// Media from the handset or peer; required for sink endpoints
    pub media: Option<Source>,
    /// Peer link sink; required for source endpoints
    pub forwarding_sink: Option<Sink>,
}

/// Start an A2DP stream or A2DP forwarding
#[derive(Debug, Clone, Copy)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct A2dpStartRequest {
    /// Stream parameters
    pub settings: A2dpCodecSettings,
    /// Initial logical volume
    pub volume: u8,
    /// Times the request yields before construction starts
    pub pre_start_delay: u8,
    /// Completion signal
    pub client_lock: Option<ClientLock>,
}

/// Start a SCO call
#[derive(Debug, Clone, Copy)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ScoStartRequest {
    /// SCO link sink; its paired source carries the handset audio
    pub sink: Sink,
    /// Air codec
    pub codec: ScoCodec,
    /// Retransmission window in slots
    pub wesco: u8,
    /// Initial HFP volume (0..=15)
    pub volume: u8,
    /// Times the request yields before construction starts
    pub pre_start_delay: u8,
    /// Build the chain so that SCO can later be forwarded to the peer
    pub allow_forwarding: bool,
    /// Completion signal
    pub client_lock: Option<ClientLock>,
}

/// Start playing SCO audio forwarded by the peer
#[derive(Debug, Clone, Copy)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ScoFwdRxRequest {
    /// Peer link source carrying the forwarded audio
    pub link_source: Source,
    /// Initial HFP volume (0..=15)
    pub volume: u8,
    /// Send this device's mic back to the peer
    pub mic_forwarding: bool,
    /// Times the request yields before construction starts
    pub pre_start_delay: u8,
    /// Completion signal
    pub client_lock: Option<ClientLock>,
}

/// What a tone request plays
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ToneSource {
    /// Ringtone sequence played by the tone generator
    Tone(&'static [RingtoneNote]),
    /// SBC encoded prompt file
    SbcPrompt(PromptId),
    /// PCM prompt file
    PcmPrompt(PromptId),
}

/// Prompt file encoding
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PromptFormat {
    /// Raw PCM
    Pcm,
    /// SBC
    Sbc,
}

/// Play a tone or prompt
#[derive(Debug, Clone, Copy)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ToneRequest {
    /// What to play
    pub source: ToneSource,
    /// Rate of the tone or prompt in Hz
    pub rate: u32,
    /// Whether a later request may cut the tone short
    pub interruptible: bool,
    /// Completion signal, cleared when the tone finishes
    pub client_lock: Option<ClientLock>,
}

impl ToneRequest {
    /// Ringtone played by the tone generator
    #[must_use]
    pub const fn tone(notes: &'static [RingtoneNote], interruptible: bool) -> Self {
        Self {
            source: ToneSource::Tone(notes),
            rate: TONE_GEN_RATE,
            interruptible,
            client_lock: None,
        }
    }

    /// Prompt played from a file
    #[must_use]
    pub const fn prompt(prompt: PromptId, format: PromptFormat, rate: u32, interruptible: bool) -> Self {
        let source = match format {
            PromptFormat::Pcm => ToneSource::PcmPrompt(prompt),
            PromptFormat::Sbc => ToneSource::SbcPrompt(prompt),
        };
        Self {
            source,
            rate,
            interruptible,
            client_lock: None,
        }
    }

    /// Signal completion through `lock`
    #[must_use]
    pub const fn with_client_lock(mut self, lock: ClientLock) -> Self {
        self.client_lock = Some(lock);
        self
    }
}

/// Use case start
#[derive(Debug, Clone, Copy)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum StartRequest {
    /// A2DP stream or forwarding
    A2dp(A2dpStartRequest),
    /// SCO call
    Sco(ScoStartRequest),
    /// Forwarded SCO receive
    ScoFwdRx(ScoFwdRxRequest),
    /// Tone or prompt
    Tone(ToneRequest),
}

impl StartRequest {
    pub(crate) fn client_lock(&self) -> Option<ClientLock> {
        match self {
            Self::A2dp(request) => request.client_lock,
            Self::Sco(request) => request.client_lock,
            Self::ScoFwdRx(request) => request.client_lock,
            Self::Tone(request) => request.client_lock,
        }
    }
}

/// Use case stop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum StopRequest {
    /// Stop an A2DP stream (sink endpoint) or A2DP forwarding (source endpoint)
    A2dp {
        /// Raw stream endpoint id
        seid: u8,
        /// Media source to disconnect
        media: Option<Source>,
    },
    /// Stop the SCO call
    Sco,
    /// Stop playing forwarded SCO
    ScoFwdRx,
    /// Stop the playing tone and drop queued ones
    Tone,
}

/// Event raised by the DSP or stream layer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum DspEvent {
    /// Tone generator reached the end of its sequence
    ToneEnd,
    /// A stream source was disconnected (e.g. prompt file exhausted)
    StreamDisconnected(Source),
}
