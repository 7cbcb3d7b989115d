//! Chain templates
//!
//! One static [`ChainTemplate`] per [`ChainId`], held in an immutable table indexed by the
//! id. The `for_*` constructors on [`ChainId`] pick the template for a use case variant
//! (codec, mic count, forwarding) and are the only place variant rules live.

use super::{ChainTemplate, EndpointRole as E, EndpointSpec, OperatorRole as O};
use crate::error::ConfigurationError;
use crate::kymera::{ScoCodec, Seid, SeidKind, ToneSource};
use crate::platform::MediaCodec;

/// Identifier of a chain template
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ChainId {
    /// Source sync + volume output chain
    OutputVolume,
    /// Output chain with parametric EQ
    OutputVolumePeq,
    /// SBC decoded locally, stereo mixed
    InputSbcStereo,
    /// AAC decoded locally, stereo mixed
    InputAacStereo,
    /// aptX decoded locally, stereo mixed
    InputAptxStereo,
    /// SBC decoded locally, frames forwarded to the peer
    InputSbcForwarding,
    /// AAC decoded locally, re-encoded as SBC for the peer
    InputAacForwarding,
    /// aptX demuxed, one channel decoded, the other forwarded
    InputAptxForwarding,
    /// SBC received from the peer
    InputTwsSbcMono,
    /// AAC received from the peer
    InputTwsAacStereo,
    /// aptX received from the peer
    InputTwsAptxMono,
    /// SCO narrowband, one mic
    ScoNb,
    /// SCO wideband, one mic
    ScoWb,
    /// SCO narrowband, two mics
    ScoNb2Mic,
    /// SCO wideband, two mics
    ScoWb2Mic,
    /// SCO narrowband with SCO forwarding, one mic
    ScofwdNb,
    /// SCO wideband with SCO forwarding, one mic
    ScofwdWb,
    /// SCO narrowband with SCO forwarding, two mics
    ScofwdNb2Mic,
    /// SCO wideband with SCO forwarding, two mics
    ScofwdWb2Mic,
    /// SCO narrowband with SCO and mic forwarding, one mic
    MicfwdNb,
    /// SCO wideband with SCO and mic forwarding, one mic
    MicfwdWb,
    /// SCO narrowband with SCO and mic forwarding, two mics
    MicfwdNb2Mic,
    /// SCO wideband with SCO and mic forwarding, two mics
    MicfwdWb2Mic,
    /// Forwarded SCO receive, one mic
    ScofwdRecv,
    /// Forwarded SCO receive, two mics
    ScofwdRecv2Mic,
    /// Forwarded SCO receive with mic forwarding back, one mic
    MicfwdSend,
    /// Forwarded SCO receive with mic forwarding back, two mics
    MicfwdSend2Mic,
    /// Tone generator at the output rate
    ToneGen,
    /// Tone generator with resampler
    ToneGenResampled,
    /// SBC prompt decoder at the output rate
    PromptDecoder,
    /// SBC prompt decoder with resampler
    PromptDecoderResampled,
    /// PCM prompt with resampler
    PromptPcmResampled,
}

/// Number of microphones used for voice
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum MicCount {
    /// Single mic
    One,
    /// Two mic beamforming
    Two,
}

/// Forwarding features built into a SCO chain
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ScoForwarding {
    /// Local call only
    Disabled,
    /// SCO audio forwarded to the peer
    Sco,
    /// SCO audio forwarded and peer mic received
    ScoAndMic,
}

impl ChainId {
    /// Every template id, in table order
    pub const ALL: [Self; 32] = [
        Self::OutputVolume,
        Self::OutputVolumePeq,
        Self::InputSbcStereo,
        Self::InputAacStereo,
        Self::InputAptxStereo,
        Self::InputSbcForwarding,
        Self::InputAacForwarding,
        Self::InputAptxForwarding,
        Self::InputTwsSbcMono,
        Self::InputTwsAacStereo,
        Self::InputTwsAptxMono,
        Self::ScoNb,
        Self::ScoWb,
        Self::ScoNb2Mic,
        Self::ScoWb2Mic,
        Self::ScofwdNb,
        Self::ScofwdWb,
        Self::ScofwdNb2Mic,
        Self::ScofwdWb2Mic,
        Self::MicfwdNb,
        Self::MicfwdWb,
        Self::MicfwdNb2Mic,
        Self::MicfwdWb2Mic,
        Self::ScofwdRecv,
        Self::ScofwdRecv2Mic,
        Self::MicfwdSend,
        Self::MicfwdSend2Mic,
        Self::ToneGen,
        Self::ToneGenResampled,
        Self::PromptDecoder,
        Self::PromptDecoderResampled,
        Self::PromptPcmResampled,
    ];

    /// Output chain, with or without EQ
    #[must_use]
    pub const fn for_output(peq: bool) -> Self {
        if peq {
            Self::OutputVolumePeq
        } else {
            Self::OutputVolume
        }
    }

    /// A2DP input chain for a sink endpoint
    ///
    /// `forwarding` selects the variant that can also feed the peer; it only applies to
    /// master (non-TWS) sinks.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigurationError::WrongSeidRole`] for source endpoints, which have no
    /// input chain of their own.
    pub fn for_a2dp_input(seid: Seid, forwarding: bool) -> Result<Self, ConfigurationError> {
        let id = match (seid.kind(), seid.codec(), forwarding) {
            (SeidKind::Source, _, _) => return Err(ConfigurationError::WrongSeidRole),
            (SeidKind::Sink, MediaCodec::Sbc, false) => Self::InputSbcStereo,
            (SeidKind::Sink, MediaCodec::Aac, false) => Self::InputAacStereo,
            (SeidKind::Sink, MediaCodec::Aptx, false) => Self::InputAptxStereo,
            (SeidKind::Sink, MediaCodec::Sbc, true) => Self::InputSbcForwarding,
            (SeidKind::Sink, MediaCodec::Aac, true) => Self::InputAacForwarding,
            (SeidKind::Sink, MediaCodec::Aptx, true) => Self::InputAptxForwarding,
            (SeidKind::TwsSink, MediaCodec::Sbc, _) => Self::InputTwsSbcMono,
            (SeidKind::TwsSink, MediaCodec::Aac, _) => Self::InputTwsAacStereo,
            (SeidKind::TwsSink, MediaCodec::Aptx, _) => Self::InputTwsAptxMono,
        };
        Ok(id)
    }

    /// SCO chain
    #[must_use]
    pub const fn for_sco(codec: ScoCodec, mics: MicCount, forwarding: ScoForwarding) -> Self {
        let wideband = matches!(codec, ScoCodec::Msbc);
        let two_mic = matches!(mics, MicCount::Two);
        match (forwarding, wideband, two_mic) {
            (ScoForwarding::Disabled, false, false) => Self::ScoNb,
            (ScoForwarding::Disabled, true, false) => Self::ScoWb,
            (ScoForwarding::Disabled, false, true) => Self::ScoNb2Mic,
            (ScoForwarding::Disabled, true, true) => Self::ScoWb2Mic,
            (ScoForwarding::Sco, false, false) => Self::ScofwdNb,
            (ScoForwarding::Sco, true, false) => Self::ScofwdWb,
            (ScoForwarding::Sco, false, true) => Self::ScofwdNb2Mic,
            (ScoForwarding::Sco, true, true) => Self::ScofwdWb2Mic,
            (ScoForwarding::ScoAndMic, false, false) => Self::MicfwdNb,
            (ScoForwarding::ScoAndMic, true, false) => Self::MicfwdWb,
            (ScoForwarding::ScoAndMic, false, true) => Self::MicfwdNb2Mic,
            (ScoForwarding::ScoAndMic, true, true) => Self::MicfwdWb2Mic,
        }
    }

    /// Forwarded SCO receive chain
    #[must_use]
    pub const fn for_sco_forwarding_receive(mics: MicCount, mic_forwarding: bool) -> Self {
        match (mic_forwarding, mics) {
            (false, MicCount::One) => Self::ScofwdRecv,
            (false, MicCount::Two) => Self::ScofwdRecv2Mic,
            (true, MicCount::One) => Self::MicfwdSend,
            (true, MicCount::Two) => Self::MicfwdSend2Mic,
        }
    }

    /// Tone or prompt chain
    ///
    /// Returns `None` for a PCM prompt already at the output rate, which is played
    /// straight from its file source.
    #[must_use]
    pub const fn for_tone(source: &ToneSource, resample: bool) -> Option<Self> {
        match (source, resample) {
            (ToneSource::Tone(_), false) => Some(Self::ToneGen),
            (ToneSource::Tone(_), true) => Some(Self::ToneGenResampled),
            (ToneSource::SbcPrompt(_), false) => Some(Self::PromptDecoder),
            (ToneSource::SbcPrompt(_), true) => Some(Self::PromptDecoderResampled),
            (ToneSource::PcmPrompt(_), false) => None,
            (ToneSource::PcmPrompt(_), true) => Some(Self::PromptPcmResampled),
        }
    }

    /// Whether this is a SCO chain built with SCO forwarding
    #[must_use]
    pub const fn forwards_sco(self) -> bool {
        matches!(
            self,
            Self::ScofwdNb
                | Self::ScofwdWb
                | Self::ScofwdNb2Mic
                | Self::ScofwdWb2Mic
                | Self::MicfwdNb
                | Self::MicfwdWb
                | Self::MicfwdNb2Mic
                | Self::MicfwdWb2Mic
        )
    }

    /// Whether this chain carries forwarded mic audio
    #[must_use]
    pub const fn forwards_mic(self) -> bool {
        matches!(
            self,
            Self::MicfwdNb
                | Self::MicfwdWb
                | Self::MicfwdNb2Mic
                | Self::MicfwdWb2Mic
                | Self::MicfwdSend
                | Self::MicfwdSend2Mic
        )
    }

    /// Whether the chain uses two mics
    #[must_use]
    pub const fn two_mic(self) -> bool {
        matches!(
            self,
            Self::ScoNb2Mic
                | Self::ScoWb2Mic
                | Self::ScofwdNb2Mic
                | Self::ScofwdWb2Mic
                | Self::MicfwdNb2Mic
                | Self::MicfwdWb2Mic
                | Self::ScofwdRecv2Mic
                | Self::MicfwdSend2Mic
        )
    }
}

/// Immutable table of chain templates
pub struct ChainRegistry;

impl ChainRegistry {
    /// Template for `id`
    #[must_use]
    pub fn template(id: ChainId) -> &'static ChainTemplate {
        &TEMPLATES[id as usize]
    }

    /// Check every template: table order matches ids and roles are unique
    ///
    /// # Errors
    ///
    /// Returns the first template inconsistency found.
    pub fn validate() -> Result<(), ConfigurationError> {
        for (index, template) in TEMPLATES.iter().enumerate() {
            if template.id as usize != index {
                return Err(ConfigurationError::DuplicateRole);
            }
            template.validate()?;
        }
        Ok(())
    }
}

const fn req(role: E) -> EndpointSpec {
    EndpointSpec::required(role)
}

const fn opt(role: E) -> EndpointSpec {
    EndpointSpec::optional(role)
}

// main input stays open while the chain only plays tones
const OUTPUT_INPUTS: &[EndpointSpec] = &[opt(E::SinkMixerMainIn), opt(E::VolumeAux)];
const OUTPUT_OUTPUTS: &[EndpointSpec] = &[req(E::SourceMixerOut)];

const A2DP_INPUTS: &[EndpointSpec] = &[req(E::SinkMedia)];
const A2DP_OUTPUTS: &[EndpointSpec] = &[req(E::SourceDecodedPcm)];
const A2DP_FORWARDING_OUTPUTS: &[EndpointSpec] =
    &[req(E::SourceDecodedPcm), opt(E::SourceForwardingMedia)];

const SCO_INPUTS: &[EndpointSpec] = &[req(E::ScoFromAir), req(E::ScoMic1), opt(E::VolumeAux)];
const SCO_INPUTS_2MIC: &[EndpointSpec] = &[
    req(E::ScoFromAir),
    req(E::ScoMic1),
    req(E::ScoMic2),
    opt(E::VolumeAux),
];
const SCO_OUTPUTS: &[EndpointSpec] = &[req(E::ScoToAir), req(E::ScoSpeaker)];
const SCOFWD_OUTPUTS: &[EndpointSpec] =
    &[req(E::ScoToAir), req(E::ScoSpeaker), opt(E::ScofwdTxOta)];
const MICFWD_INPUTS: &[EndpointSpec] = &[
    req(E::ScoFromAir),
    req(E::ScoMic1),
    opt(E::VolumeAux),
    opt(E::MicfwdRxOta),
];
const MICFWD_INPUTS_2MIC: &[EndpointSpec] = &[
    req(E::ScoFromAir),
    req(E::ScoMic1),
    req(E::ScoMic2),
    opt(E::VolumeAux),
    opt(E::MicfwdRxOta),
];

const SCOFWD_RECV_INPUTS: &[EndpointSpec] =
    &[req(E::ScofwdRxOta), req(E::ScoMic1), opt(E::VolumeAux)];
const SCOFWD_RECV_INPUTS_2MIC: &[EndpointSpec] = &[
    req(E::ScofwdRxOta),
    req(E::ScoMic1),
    req(E::ScoMic2),
    opt(E::VolumeAux),
];
const SCOFWD_RECV_OUTPUTS: &[EndpointSpec] = &[req(E::ScoSpeaker)];
const MICFWD_SEND_OUTPUTS: &[EndpointSpec] = &[req(E::ScoSpeaker), req(E::MicfwdTxOta)];

const TONE_OUTPUTS: &[EndpointSpec] = &[req(E::TonePromptChainOut)];
const PROMPT_INPUTS: &[EndpointSpec] = &[req(E::PromptIn)];

const SCO_OPERATORS: &[O] = &[
    O::ScoReceive,
    O::ScoSend,
    O::CvcReceive,
    O::CvcSend,
    O::ScoAec,
    O::SourceSync,
    O::VolumeControl,
];

const SCOFWD_NB_OPERATORS: &[O] = &[
    O::ScoReceive,
    O::ScoSend,
    O::CvcReceive,
    O::CvcSend,
    O::ScoAec,
    O::SourceSync,
    O::VolumeControl,
    O::ScoUpSample,
    O::ScofwdSplitter,
    O::ScofwdSend,
    O::SwitchedPassthroughConsumer,
];

const SCOFWD_WB_OPERATORS: &[O] = &[
    O::ScoReceive,
    O::ScoSend,
    O::CvcReceive,
    O::CvcSend,
    O::ScoAec,
    O::SourceSync,
    O::VolumeControl,
    O::ScofwdBasicPass,
    O::ScofwdSplitter,
    O::ScofwdSend,
    O::SwitchedPassthroughConsumer,
];

const MICFWD_NB_OPERATORS: &[O] = &[
    O::ScoReceive,
    O::ScoSend,
    O::CvcReceive,
    O::CvcSend,
    O::ScoAec,
    O::SourceSync,
    O::VolumeControl,
    O::ScoUpSample,
    O::ScofwdSplitter,
    O::ScofwdSend,
    O::SwitchedPassthroughConsumer,
    O::MicfwdRecv,
    O::MicfwdRecvSpc,
    O::MicfwdSpcSwitch,
    O::MicDownSample,
];

const MICFWD_WB_OPERATORS: &[O] = &[
    O::ScoReceive,
    O::ScoSend,
    O::CvcReceive,
    O::CvcSend,
    O::ScoAec,
    O::SourceSync,
    O::VolumeControl,
    O::ScofwdBasicPass,
    O::ScofwdSplitter,
    O::ScofwdSend,
    O::SwitchedPassthroughConsumer,
    O::MicfwdRecv,
    O::MicfwdRecvSpc,
    O::MicfwdSpcSwitch,
];

const SCOFWD_RECV_OPERATORS: &[O] = &[O::ScofwdRecv, O::SourceSync, O::VolumeControl, O::ScoAec];

const MICFWD_SEND_OPERATORS: &[O] = &[
    O::ScofwdRecv,
    O::SourceSync,
    O::VolumeControl,
    O::ScoAec,
    O::CvcSend,
    O::MicfwdSend,
    O::SwitchedPassthroughConsumer,
];

static TEMPLATES: [ChainTemplate; ChainId::ALL.len()] = [
    ChainTemplate {
        id: ChainId::OutputVolume,
        operators: &[O::SourceSync, O::VolumeControl],
        inputs: OUTPUT_INPUTS,
        outputs: OUTPUT_OUTPUTS,
    },
    ChainTemplate {
        id: ChainId::OutputVolumePeq,
        operators: &[O::SourceSync, O::VolumeControl, O::Peq],
        inputs: OUTPUT_INPUTS,
        outputs: OUTPUT_OUTPUTS,
    },
    ChainTemplate {
        id: ChainId::InputSbcStereo,
        operators: &[O::RtpDecoder, O::SbcDecoder],
        inputs: A2DP_INPUTS,
        outputs: A2DP_OUTPUTS,
    },
    ChainTemplate {
        id: ChainId::InputAacStereo,
        operators: &[O::RtpDecoder, O::AacDecoder],
        inputs: A2DP_INPUTS,
        outputs: A2DP_OUTPUTS,
    },
    ChainTemplate {
        id: ChainId::InputAptxStereo,
        operators: &[O::RtpDecoder, O::AptxDecoder],
        inputs: A2DP_INPUTS,
        outputs: A2DP_OUTPUTS,
    },
    ChainTemplate {
        id: ChainId::InputSbcForwarding,
        operators: &[
            O::RtpDecoder,
            O::Splitter,
            O::SwitchedPassthroughConsumer,
            O::SbcDecoder,
        ],
        inputs: A2DP_INPUTS,
        outputs: A2DP_FORWARDING_OUTPUTS,
    },
    ChainTemplate {
        id: ChainId::InputAacForwarding,
        operators: &[
            O::RtpDecoder,
            O::AacDecoder,
            O::Splitter,
            O::SbcEncoder,
            O::SwitchedPassthroughConsumer,
        ],
        inputs: A2DP_INPUTS,
        outputs: A2DP_FORWARDING_OUTPUTS,
    },
    ChainTemplate {
        id: ChainId::InputAptxForwarding,
        operators: &[
            O::RtpDecoder,
            O::AptxDemux,
            O::SwitchedPassthroughConsumer,
            O::AptxMonoDecoder,
        ],
        inputs: A2DP_INPUTS,
        outputs: A2DP_FORWARDING_OUTPUTS,
    },
    ChainTemplate {
        id: ChainId::InputTwsSbcMono,
        operators: &[O::RtpDecoder, O::SbcDecoder],
        inputs: A2DP_INPUTS,
        outputs: A2DP_OUTPUTS,
    },
    ChainTemplate {
        id: ChainId::InputTwsAacStereo,
        operators: &[O::RtpDecoder, O::AacDecoder],
        inputs: A2DP_INPUTS,
        outputs: A2DP_OUTPUTS,
    },
    ChainTemplate {
        id: ChainId::InputTwsAptxMono,
        operators: &[O::RtpDecoder, O::AptxMonoDecoder],
        inputs: A2DP_INPUTS,
        outputs: A2DP_OUTPUTS,
    },
    ChainTemplate {
        id: ChainId::ScoNb,
        operators: SCO_OPERATORS,
        inputs: SCO_INPUTS,
        outputs: SCO_OUTPUTS,
    },
    ChainTemplate {
        id: ChainId::ScoWb,
        operators: SCO_OPERATORS,
        inputs: SCO_INPUTS,
        outputs: SCO_OUTPUTS,
    },
    ChainTemplate {
        id: ChainId::ScoNb2Mic,
        operators: SCO_OPERATORS,
        inputs: SCO_INPUTS_2MIC,
        outputs: SCO_OUTPUTS,
    },
    ChainTemplate {
        id: ChainId::ScoWb2Mic,
        operators: SCO_OPERATORS,
        inputs: SCO_INPUTS_2MIC,
        outputs: SCO_OUTPUTS,
    },
    ChainTemplate {
        id: ChainId::ScofwdNb,
        operators: SCOFWD_NB_OPERATORS,
        inputs: SCO_INPUTS,
        outputs: SCOFWD_OUTPUTS,
    },
    ChainTemplate {
        id: ChainId::ScofwdWb,
        operators: SCOFWD_WB_OPERATORS,
        inputs: SCO_INPUTS,
        outputs: SCOFWD_OUTPUTS,
    },
    ChainTemplate {
        id: ChainId::ScofwdNb2Mic,
        operators: SCOFWD_NB_OPERATORS,
        inputs: SCO_INPUTS_2MIC,
        outputs: SCOFWD_OUTPUTS,
    },
    ChainTemplate {
        id: ChainId::ScofwdWb2Mic,
        operators: SCOFWD_WB_OPERATORS,
        inputs: SCO_INPUTS_2MIC,
        outputs: SCOFWD_OUTPUTS,
    },
    ChainTemplate {
        id: ChainId::MicfwdNb,
        operators: MICFWD_NB_OPERATORS,
        inputs: MICFWD_INPUTS,
        outputs: SCOFWD_OUTPUTS,
    },
    ChainTemplate {
        id: ChainId::MicfwdWb,
        operators: MICFWD_WB_OPERATORS,
        inputs: MICFWD_INPUTS,
        outputs: SCOFWD_OUTPUTS,
    },
    ChainTemplate {
        id: ChainId::MicfwdNb2Mic,
        operators: MICFWD_NB_OPERATORS,
        inputs: MICFWD_INPUTS_2MIC,
        outputs: SCOFWD_OUTPUTS,
    },
    ChainTemplate {
        id: ChainId::MicfwdWb2Mic,
        operators: MICFWD_WB_OPERATORS,
        inputs: MICFWD_INPUTS_2MIC,
        outputs: SCOFWD_OUTPUTS,
    },
    ChainTemplate {
        id: ChainId::ScofwdRecv,
        operators: SCOFWD_RECV_OPERATORS,
        inputs: SCOFWD_RECV_INPUTS,
        outputs: SCOFWD_RECV_OUTPUTS,
    },
    ChainTemplate {
        id: ChainId::ScofwdRecv2Mic,
        operators: SCOFWD_RECV_OPERATORS,
        inputs: SCOFWD_RECV_INPUTS_2MIC,
        outputs: SCOFWD_RECV_OUTPUTS,
    },
    ChainTemplate {
        id: ChainId::MicfwdSend,
        operators: MICFWD_SEND_OPERATORS,
        inputs: SCOFWD_RECV_INPUTS,
        outputs: MICFWD_SEND_OUTPUTS,
    },
    ChainTemplate {
        id: ChainId::MicfwdSend2Mic,
        operators: MICFWD_SEND_OPERATORS,
        inputs: SCOFWD_RECV_INPUTS_2MIC,
        outputs: MICFWD_SEND_OUTPUTS,
    },
    ChainTemplate {
        id: ChainId::ToneGen,
        operators: &[O::ToneGen],
        inputs: &[],
        outputs: TONE_OUTPUTS,
    },
    ChainTemplate {
        id: ChainId::ToneGenResampled,
        operators: &[O::ToneGen, O::TonePromptResampler],
        inputs: &[],
        outputs: TONE_OUTPUTS,
    },
    ChainTemplate {
        id: ChainId::PromptDecoder,
        operators: &[O::PromptDecoder],
        inputs: PROMPT_INPUTS,
        outputs: TONE_OUTPUTS,
    },
    ChainTemplate {
        id: ChainId::PromptDecoderResampled,
        operators: &[O::PromptDecoder, O::TonePromptResampler],
        inputs: PROMPT_INPUTS,
        outputs: TONE_OUTPUTS,
    },
    ChainTemplate {
        id: ChainId::PromptPcmResampled,
        operators: &[O::TonePromptResampler],
        inputs: PROMPT_INPUTS,
        outputs: TONE_OUTPUTS,
    },
];
