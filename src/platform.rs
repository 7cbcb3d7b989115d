//! Platform collaborators
//!
//! The session never touches hardware or the DSP directly. Everything goes through three
//! traits, implemented by the board support layer:
//!
//! * [`OperatorFramework`] - chains and operators on the audio DSP
//! * [`StreamTransport`] - sources and sinks (mics, DAC, SCO, peer link, prompt files)
//! * [`Packetiser`] - transforms that pack/unpack forwarded audio for the peer link
//!
//! [`Platform`] is the union of the three and has a blanket implementation.
//!
//! All handles are opaque ids owned by the platform.

use crate::chain::{ChainTemplate, EndpointRole, OperatorRole};
use crate::error::PlatformError;
use crate::power::DspPowerMode;
use crate::volume::Gain;

/// DSP operator instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Operator(pub u16);

/// Stream source (produces audio)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Source(pub u16);

/// Stream sink (consumes audio)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Sink(pub u16);

/// Instantiated chain
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ChainHandle(pub u16);

/// Packetiser transform
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Transform(pub u16);

/// Analogue/digital microphone channel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum MicChannel {
    /// First (or only) microphone
    A,
    /// Second microphone
    B,
}

/// Stream configuration keys
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum StreamKey {
    /// ADC sample rate
    CodecInputRate,
    /// ADC gain
    CodecInputGain,
    /// DAC sample rate
    CodecOutputRate,
}

/// Prompt stored in the file system
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct PromptId(pub u16);

/// Which forwarding stream a packetiser transform carries
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PacketiserKind {
    /// A2DP frames sent to the peer
    A2dpTransmit,
    /// A2DP frames received from the peer
    A2dpReceive,
    /// SCO audio sent to the peer
    ScoTransmit,
    /// SCO audio received from the peer
    ScoReceive,
}

/// Microphone forwarding endpoint handed to the packetiser
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum MicForwarding {
    /// Encoded mic audio to send to the peer
    Send(Source),
    /// Encoded mic audio arriving from the peer
    Receive(Sink),
}

/// A2DP codec carried by the RTP decoder
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum MediaCodec {
    /// SBC
    Sbc,
    /// AAC
    Aac,
    /// aptX classic
    Aptx,
}

/// Mode of a switched passthrough consumer (SPC)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SpcMode {
    /// Discard input
    Consume,
    /// Pass input to output
    Passthrough,
}

/// Data format on an operator terminal
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum DataFormat {
    /// Linear PCM
    Pcm,
    /// Encoded frames without framing metadata
    GenericEncoded,
    /// 16 bit words carrying metadata
    Encoded16BitWithMetadata,
}

/// Note of a ringtone sequence, in the tone generator's encoding
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct RingtoneNote(pub u16);

/// Parameters of the SBC encoder used to forward AAC streams
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct SbcEncoderParams {
    /// Sample rate in Hz
    pub sample_rate: u32,
    /// Bitpool
    pub bitpool: u8,
}

/// Route configured on the source sync operator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct SourceSyncRoute {
    /// Input terminal
    pub input: u16,
    /// Output terminal
    pub output: u16,
    /// Sample rate in Hz
    pub sample_rate: u32,
    /// Gain in 1/60th dB
    pub gain: i32,
}

/// Parameter message sent to a single operator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum OperatorMessage {
    /// Set the operator sample rate
    SampleRate(u32),
    /// Set the operator buffer size in words
    BufferSize(u32),
    /// Select a tuning profile
    Ucid(u16),
    /// Set the main channel gain of a volume operator
    MainGain(Gain),
    /// Set the auxiliary channel gain of a volume operator
    AuxGain(Gain),
    /// Set the time-to-play latency in microseconds
    TimeToPlayLatency(u32),
    /// Codec carried by an RTP decoder
    RtpCodec(MediaCodec),
    /// Source sync sink groups, one per input terminal mask
    SourceSyncSinkGroups(&'static [u32]),
    /// Source sync source groups, one per output terminal mask
    SourceSyncSourceGroups(&'static [u32]),
    /// Source sync route
    SourceSyncRoute(SourceSyncRoute),
    /// Switched passthrough mode
    SpcMode(SpcMode),
    /// Switched passthrough data format
    SpcDataFormat(DataFormat),
    /// Select the active input of a switched passthrough
    SpcSelectInput(u16),
    /// Splitter data format
    SplitterDataFormat(DataFormat),
    /// AWBS encoder or decoder bitpool
    AwbsBitpool(u16),
    /// Resampler conversion
    ResamplerConversion {
        /// Input rate in Hz
        from: u32,
        /// Output rate in Hz
        to: u32,
    },
    /// AEC sample rates
    AecSampleRate {
        /// Input (mic) rate in Hz
        input: u32,
        /// Output (speaker) rate in Hz
        output: u32,
    },
    /// AEC terminal buffer size
    AecTerminalBuffer {
        /// Buffer size in words
        size: u32,
        /// Input terminal mask
        inputs: u16,
        /// Output terminal mask
        outputs: u16,
    },
    /// AEC time-to-play gate
    AecTtpGate {
        /// Gate enabled
        enable: bool,
        /// Initial gate timeout in milliseconds
        timeout_ms: u16,
    },
    /// Run AEC reference and mic on the same IO clock
    AecSameIoClockSource,
    /// Mute the AEC mic path
    AecMuteMic(bool),
    /// Load a ringtone sequence into a tone generator
    ToneSequence(&'static [RingtoneNote]),
    /// SBC encoder parameters
    SbcEncoder(SbcEncoderParams),
}

/// Operator queries answered synchronously
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum OperatorQuery {
    /// Voice quality metric of a CVC send operator
    VoiceQuality,
}

/// Chains and operators on the audio DSP
pub trait OperatorFramework {
    /// Instantiate a chain from a template
    ///
    /// # Errors
    ///
    /// Returns an error if the DSP cannot create the operators.
    fn create_chain(&mut self, template: &'static ChainTemplate) -> Result<ChainHandle, PlatformError>;

    /// Operator playing `role` in `chain`
    fn operator(&self, chain: ChainHandle, role: OperatorRole) -> Option<Operator>;

    /// Chain input for endpoint `role`
    fn chain_input(&self, chain: ChainHandle, role: EndpointRole) -> Option<Sink>;

    /// Chain output for endpoint `role`
    fn chain_output(&self, chain: ChainHandle, role: EndpointRole) -> Option<Source>;

    /// Connect the operators of a chain to each other
    ///
    /// # Errors
    ///
    /// Returns an error if the internal connections fail.
    fn connect_chain(&mut self, chain: ChainHandle) -> Result<(), PlatformError>;

    /// Start a chain
    ///
    /// # Errors
    ///
    /// Returns an error if the DSP refuses to start the chain.
    fn start_chain(&mut self, chain: ChainHandle) -> Result<(), PlatformError>;

    /// Stop a chain
    fn stop_chain(&mut self, chain: ChainHandle);

    /// Destroy a stopped chain
    fn destroy_chain(&mut self, chain: ChainHandle);

    /// Send a parameter message to an operator
    ///
    /// # Errors
    ///
    /// Returns an error if the operator rejects the message.
    fn operator_message(
        &mut self,
        operator: Operator,
        message: OperatorMessage,
    ) -> Result<(), PlatformError>;

    /// Query an operator
    ///
    /// # Errors
    ///
    /// Returns an error if the operator does not answer the query.
    fn operator_query(&mut self, operator: Operator, query: OperatorQuery)
    -> Result<u16, PlatformError>;

    /// Set DSP clock and power save mode
    ///
    /// # Errors
    ///
    /// Returns an error if the mode cannot be applied.
    fn set_power_mode(&mut self, mode: DspPowerMode) -> Result<(), PlatformError>;

    /// Power the audio subsystem up or down
    fn set_audio_subsystem(&mut self, enabled: bool);
}

/// Sources and sinks outside the DSP
pub trait StreamTransport {
    /// Microphone source
    ///
    /// # Errors
    ///
    /// Returns an error if the mic is not available.
    fn mic_source(&mut self, channel: MicChannel) -> Result<Source, PlatformError>;

    /// Speaker (DAC) sink
    ///
    /// # Errors
    ///
    /// Returns an error if the DAC is not available.
    fn speaker_sink(&mut self) -> Result<Sink, PlatformError>;

    /// Source paired with a bidirectional sink (e.g. the receive side of a SCO link)
    fn source_from_sink(&self, sink: Sink) -> Option<Source>;

    /// Configure a source
    ///
    /// # Errors
    ///
    /// Returns an error if the key or value is rejected.
    fn configure_source(&mut self, source: Source, key: StreamKey, value: u32)
    -> Result<(), PlatformError>;

    /// Configure a sink
    ///
    /// # Errors
    ///
    /// Returns an error if the key or value is rejected.
    fn configure_sink(&mut self, sink: Sink, key: StreamKey, value: u32) -> Result<(), PlatformError>;

    /// Synchronise two sources so they are sampled together
    ///
    /// # Errors
    ///
    /// Returns an error if the sources cannot be synchronised.
    fn synchronise(&mut self, first: Source, second: Source) -> Result<(), PlatformError>;

    /// Connect a source to a sink
    ///
    /// # Errors
    ///
    /// Returns an error if the connection is refused.
    fn connect(&mut self, source: Source, sink: Sink) -> Result<(), PlatformError>;

    /// Break connections of a source and/or a sink
    fn disconnect(&mut self, source: Option<Source>, sink: Option<Sink>);

    /// Open a prompt file as a source
    ///
    /// # Errors
    ///
    /// Returns an error if the prompt does not exist.
    fn prompt_source(&mut self, prompt: PromptId) -> Result<Source, PlatformError>;

    /// Close a file source
    fn close_source(&mut self, source: Source);

    /// Enable or disable mic bias
    fn set_mic_bias(&mut self, enabled: bool);

    /// Enable or disable the external amplifier
    fn set_external_amp(&mut self, enabled: bool);
}

/// Transforms packing audio for the peer link
pub trait Packetiser {
    /// Create a forwarding transform between `source` and `sink`
    ///
    /// # Errors
    ///
    /// Returns an error if the transform cannot be created.
    fn create_transform(
        &mut self,
        kind: PacketiserKind,
        source: Source,
        sink: Sink,
    ) -> Result<Transform, PlatformError>;

    /// Destroy a transform
    fn destroy_transform(&mut self, transform: Transform);

    /// Hand a mic forwarding endpoint to the peer link
    ///
    /// # Errors
    ///
    /// Returns an error if the endpoint cannot be mapped.
    fn attach_mic(&mut self, endpoint: MicForwarding) -> Result<(), PlatformError>;
}

/// Everything the session needs from the platform
pub trait Platform: OperatorFramework + StreamTransport + Packetiser {}

impl<T: OperatorFramework + StreamTransport + Packetiser> Platform for T {}
