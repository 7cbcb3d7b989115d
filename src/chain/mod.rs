//! Chain Builder
//!
//! A chain is a graph of DSP operators built from a static [`ChainTemplate`]. Templates
//! name every operator by [`OperatorRole`] and every external connection point by
//! [`EndpointRole`]; the session only ever talks to a chain through those roles.
//!
//! ## Architecture
//!
//! * [`templates`] - the template table, [`ChainId`] and variant selection
//! * [`Chain`] - an instantiated chain that remembers which endpoints are wired
//! * [`SharedChain`] - the slot holding either the output/volume chain or the SCO chain
//!
//! ## Usage
//!
//! ```rust,ignore
//! let id = ChainId::for_sco(ScoCodec::Msbc, MicCount::Two, ScoForwarding::Disabled);
//! let mut chain = Chain::build(&mut platform, id)?;
//! chain.connect_input(&mut platform, EndpointRole::ScoFromAir, sco_source)?;
//! chain.connect(&mut platform)?;
//! chain.ensure_connected()?;
//! ```

pub mod templates;

pub use templates::{ChainId, ChainRegistry, MicCount, ScoForwarding};

use crate::constants::{MAX_CHAIN_ENDPOINTS, MAX_CHAIN_OPERATORS};
use crate::error::{ConfigurationError, KymeraError, PlatformError};
use crate::platform::{ChainHandle, Operator, OperatorFramework, Sink, Source, StreamTransport};
use heapless::Vec;

/// Role of an operator inside a chain
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum OperatorRole {
    /// Depacketises A2DP media
    RtpDecoder,
    /// Splits aptX stereo into two mono streams
    AptxDemux,
    /// Switched passthrough consumer gating the forwarded stream
    SwitchedPassthroughConsumer,
    /// aptX mono decoder without autosync
    AptxMonoDecoder,
    /// aptX stereo decoder
    AptxDecoder,
    /// SBC decoder
    SbcDecoder,
    /// SBC encoder
    SbcEncoder,
    /// AAC decoder
    AacDecoder,
    /// Splitter
    Splitter,
    /// SCO receive
    ScoReceive,
    /// SCO send
    ScoSend,
    /// CVC receive
    CvcReceive,
    /// CVC send
    CvcSend,
    /// Acoustic echo canceller
    ScoAec,
    /// Splitter feeding the SCO forwarding encoder
    ScofwdSplitter,
    /// SCO forwarding encoder
    ScofwdSend,
    /// SCO forwarding decoder
    ScofwdRecv,
    /// 8k to 16k upsampler for narrowband forwarding
    ScoUpSample,
    /// 16k to 8k downsampler for narrowband mic forwarding
    MicDownSample,
    /// Passthrough for wideband forwarding
    ScofwdBasicPass,
    /// Local/remote mic switch
    MicfwdSpcSwitch,
    /// Mic forwarding encoder
    MicfwdSend,
    /// Mic forwarding decoder
    MicfwdRecv,
    /// Switched passthrough on the mic forwarding decoder output
    MicfwdRecvSpc,
    /// Source sync
    SourceSync,
    /// Volume control
    VolumeControl,
    /// Parametric EQ
    Peq,
    /// Tone/prompt resampler
    TonePromptResampler,
    /// Tone generator
    ToneGen,
    /// SBC prompt decoder
    PromptDecoder,
}

impl OperatorRole {
    /// Roles whose sample rate follows the chain rate
    #[must_use]
    pub const fn follows_chain_rate(self) -> bool {
        matches!(self, Self::VolumeControl | Self::Peq | Self::ToneGen)
    }
}

/// External connection point of a chain
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum EndpointRole {
    /// A2DP media in
    SinkMedia,
    /// Decoded PCM out
    SourceDecodedPcm,
    /// Encoded media out to the peer
    SourceForwardingMedia,
    /// Output chain main input
    SinkMixerMainIn,
    /// Output chain auxiliary (tone) input
    VolumeAux,
    /// Output chain output
    SourceMixerOut,
    /// SCO audio from the handset
    ScoFromAir,
    /// SCO audio to the handset
    ScoToAir,
    /// First mic in
    ScoMic1,
    /// Second mic in
    ScoMic2,
    /// Speaker out
    ScoSpeaker,
    /// Forwarded SCO from the peer
    ScofwdRxOta,
    /// Forwarded SCO to the peer
    ScofwdTxOta,
    /// Forwarded mic from the peer
    MicfwdRxOta,
    /// Forwarded mic to the peer
    MicfwdTxOta,
    /// Tone/prompt out
    TonePromptChainOut,
    /// Prompt file in
    PromptIn,
}

/// Endpoint declared by a template
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct EndpointSpec {
    /// Role of the endpoint
    pub role: EndpointRole,
    /// Endpoint may stay unconnected
    pub optional: bool,
}

impl EndpointSpec {
    /// Endpoint that must be connected before the chain starts
    #[must_use]
    pub const fn required(role: EndpointRole) -> Self {
        Self {
            role,
            optional: false,
        }
    }

    /// Endpoint that may stay unconnected
    #[must_use]
    pub const fn optional(role: EndpointRole) -> Self {
        Self {
            role,
            optional: true,
        }
    }
}

/// Static description of a chain
#[derive(Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ChainTemplate {
    /// Template identifier
    pub id: ChainId,
    /// Operators, one per role
    pub operators: &'static [OperatorRole],
    /// Input endpoints
    pub inputs: &'static [EndpointSpec],
    /// Output endpoints
    pub outputs: &'static [EndpointSpec],
}

impl ChainTemplate {
    /// Whether the template contains an operator with `role`
    #[must_use]
    pub fn has_operator(&self, role: OperatorRole) -> bool {
        self.operators.contains(&role)
    }

    /// Whether the template declares endpoint `role`
    #[must_use]
    pub fn has_endpoint(&self, role: EndpointRole) -> bool {
        self.endpoints().any(|spec| spec.role == role)
    }

    /// All endpoints, inputs first
    pub fn endpoints(&self) -> impl Iterator<Item = &'static EndpointSpec> + use<> {
        self.inputs.iter().chain(self.outputs.iter())
    }

    /// Endpoints that must be connected
    pub fn required_endpoints(&self) -> impl Iterator<Item = EndpointRole> + use<> {
        self.endpoints()
            .filter(|spec| !spec.optional)
            .map(|spec| spec.role)
    }

    /// Check that role identifiers are unique and the template fits a [`Chain`]
    ///
    /// # Errors
    ///
    /// Returns [`ConfigurationError::DuplicateRole`] if an operator or endpoint role
    /// appears twice, or [`ConfigurationError::TemplateTooLarge`] if it has too many
    /// operators or endpoints.
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if self.operators.len() > MAX_CHAIN_OPERATORS
            || self.inputs.len() + self.outputs.len() > MAX_CHAIN_ENDPOINTS
        {
            return Err(ConfigurationError::TemplateTooLarge);
        }
        for (i, role) in self.operators.iter().enumerate() {
            if self.operators[i + 1..].contains(role) {
                return Err(ConfigurationError::DuplicateRole);
            }
        }
        for (i, spec) in self.endpoints().enumerate() {
            if self.endpoints().skip(i + 1).any(|other| other.role == spec.role) {
                return Err(ConfigurationError::DuplicateRole);
            }
        }
        Ok(())
    }
}

/// Instantiated chain
#[derive(Debug)]
pub struct Chain {
    handle: ChainHandle,
    template: &'static ChainTemplate,
    connected: Vec<EndpointRole, MAX_CHAIN_ENDPOINTS>,
}

impl Chain {
    /// Create a chain from the template registered for `id`
    ///
    /// Every operator role of the template must resolve to an instance; otherwise the
    /// half-built chain is destroyed and the missing role is reported.
    ///
    /// # Errors
    ///
    /// Returns [`PlatformError::ChainCreate`] if the DSP cannot create the chain, or
    /// [`ConfigurationError::MissingOperator`] if a role did not resolve.
    pub fn build<P: OperatorFramework>(platform: &mut P, id: ChainId) -> Result<Self, KymeraError> {
        let template = ChainRegistry::template(id);
        let handle = platform.create_chain(template)?;
        if let Some(missing) = template
            .operators
            .iter()
            .copied()
            .find(|role| platform.operator(handle, *role).is_none())
        {
            error!("[CHAIN] {:?} has no operator for {:?}", id, missing);
            platform.destroy_chain(handle);
            return Err(ConfigurationError::MissingOperator(missing).into());
        }
        debug!("[CHAIN] Built {:?}", id);
        Ok(Self {
            handle,
            template,
            connected: Vec::new(),
        })
    }

    /// Platform handle
    #[must_use]
    pub fn handle(&self) -> ChainHandle {
        self.handle
    }

    /// Template the chain was built from
    #[must_use]
    pub fn template(&self) -> &'static ChainTemplate {
        self.template
    }

    /// Template identifier
    #[must_use]
    pub fn id(&self) -> ChainId {
        self.template.id
    }

    /// Endpoint roles wired so far
    #[must_use]
    pub fn connected_roles(&self) -> &[EndpointRole] {
        &self.connected
    }

    /// Whether endpoint `role` has been wired
    #[must_use]
    pub fn is_connected(&self, role: EndpointRole) -> bool {
        self.connected.contains(&role)
    }

    /// Resolve the operator playing `role`
    ///
    /// # Errors
    ///
    /// Returns [`ConfigurationError::MissingOperator`] if the chain has no such operator.
    pub fn operator<P: OperatorFramework>(
        &self,
        platform: &P,
        role: OperatorRole,
    ) -> Result<Operator, ConfigurationError> {
        self.optional_operator(platform, role)
            .ok_or(ConfigurationError::MissingOperator(role))
    }

    /// Resolve the operator playing `role`, if the template has one
    pub fn optional_operator<P: OperatorFramework>(
        &self,
        platform: &P,
        role: OperatorRole,
    ) -> Option<Operator> {
        if self.template.has_operator(role) {
            platform.operator(self.handle, role)
        } else {
            None
        }
    }

    /// Chain input for `role`
    ///
    /// # Errors
    ///
    /// Returns [`ConfigurationError::UnknownEndpoint`] if the role is not an input.
    pub fn input<P: OperatorFramework>(&self, platform: &P, role: EndpointRole) -> Result<Sink, ConfigurationError> {
        if !self.template.inputs.iter().any(|spec| spec.role == role) {
            return Err(ConfigurationError::UnknownEndpoint(role));
        }
        platform
            .chain_input(self.handle, role)
            .ok_or(ConfigurationError::UnknownEndpoint(role))
    }

    /// Chain output for `role`
    ///
    /// # Errors
    ///
    /// Returns [`ConfigurationError::UnknownEndpoint`] if the role is not an output.
    pub fn output<P: OperatorFramework>(&self, platform: &P, role: EndpointRole) -> Result<Source, ConfigurationError> {
        if !self.template.outputs.iter().any(|spec| spec.role == role) {
            return Err(ConfigurationError::UnknownEndpoint(role));
        }
        platform
            .chain_output(self.handle, role)
            .ok_or(ConfigurationError::UnknownEndpoint(role))
    }

    /// Wire an external source into input `role`
    ///
    /// # Errors
    ///
    /// Returns an error if the role is unknown or the connection is refused.
    pub fn connect_input<P: OperatorFramework + StreamTransport>(
        &mut self,
        platform: &mut P,
        role: EndpointRole,
        source: Source,
    ) -> Result<(), KymeraError> {
        let sink = self.input(platform, role)?;
        platform.connect(source, sink)?;
        self.mark(role);
        Ok(())
    }

    /// Wire output `role` into an external sink
    ///
    /// # Errors
    ///
    /// Returns an error if the role is unknown or the connection is refused.
    pub fn connect_output<P: OperatorFramework + StreamTransport>(
        &mut self,
        platform: &mut P,
        role: EndpointRole,
        sink: Sink,
    ) -> Result<(), KymeraError> {
        let source = self.output(platform, role)?;
        platform.connect(source, sink)?;
        self.mark(role);
        Ok(())
    }

    /// Record that endpoint `role` was wired by someone else (packetiser, another chain)
    ///
    /// # Errors
    ///
    /// Returns [`ConfigurationError::UnknownEndpoint`] if the template has no such role.
    pub fn attach(&mut self, role: EndpointRole) -> Result<(), ConfigurationError> {
        if !self.template.has_endpoint(role) {
            return Err(ConfigurationError::UnknownEndpoint(role));
        }
        self.mark(role);
        Ok(())
    }

    /// Forget that endpoint `role` is wired
    pub fn detach(&mut self, role: EndpointRole) {
        self.connected.retain(|connected| *connected != role);
    }

    fn mark(&mut self, role: EndpointRole) {
        if !self.connected.contains(&role) {
            // templates never declare more endpoints than the capacity
            self.connected.push(role).ok();
        }
    }

    /// Connect the chain operators to each other
    ///
    /// # Errors
    ///
    /// Returns an error if the platform cannot connect the chain.
    pub fn connect<P: OperatorFramework>(&self, platform: &mut P) -> Result<(), PlatformError> {
        platform.connect_chain(self.handle)
    }

    /// Check that every required endpoint is wired
    ///
    /// # Errors
    ///
    /// Returns [`ConfigurationError::UnconnectedEndpoint`] naming the first dangling role.
    pub fn ensure_connected(&self) -> Result<(), ConfigurationError> {
        match self
            .template
            .required_endpoints()
            .find(|role| !self.is_connected(*role))
        {
            Some(role) => Err(ConfigurationError::UnconnectedEndpoint(role)),
            None => Ok(()),
        }
    }

    /// Start the chain
    ///
    /// # Errors
    ///
    /// Returns an error if a required endpoint is dangling or the DSP refuses to start.
    pub fn start<P: OperatorFramework>(&self, platform: &mut P) -> Result<(), KymeraError> {
        self.ensure_connected()?;
        platform.start_chain(self.handle)?;
        Ok(())
    }

    /// Stop the chain
    pub fn stop<P: OperatorFramework>(&self, platform: &mut P) {
        platform.stop_chain(self.handle);
    }

    /// Disconnect all wired endpoints and destroy the chain
    ///
    /// The chain must already be stopped.
    pub fn destroy<P: OperatorFramework + StreamTransport>(self, platform: &mut P) {
        for role in &self.connected {
            if let Some(sink) = platform.chain_input(self.handle, *role) {
                platform.disconnect(None, Some(sink));
            } else if let Some(source) = platform.chain_output(self.handle, *role) {
                platform.disconnect(Some(source), None);
            }
        }
        platform.destroy_chain(self.handle);
        debug!("[CHAIN] Destroyed {:?}", self.template.id);
    }
}

/// Slot shared by the output/volume chain and the SCO chain
///
/// Both chains drive the same speaker path, so at most one of them exists.
#[derive(Debug, Default)]
pub enum SharedChain {
    /// Slot empty
    #[default]
    None,
    /// Output chain used by A2DP and tones
    OutputVolume(Chain),
    /// SCO (or forwarded SCO receive) chain
    Sco(Chain),
}

impl SharedChain {
    /// Whether the slot is empty
    #[must_use]
    pub fn is_vacant(&self) -> bool {
        matches!(self, Self::None)
    }

    /// Fail unless the slot is empty
    ///
    /// # Errors
    ///
    /// Returns [`KymeraError::SlotOccupied`] if a chain is installed.
    pub fn ensure_vacant(&self) -> Result<(), KymeraError> {
        if self.is_vacant() {
            Ok(())
        } else {
            Err(KymeraError::SlotOccupied)
        }
    }

    /// Output/volume chain
    ///
    /// # Errors
    ///
    /// Returns [`KymeraError::NoChain`] if the slot does not hold the output chain.
    pub fn output_volume(&self) -> Result<&Chain, KymeraError> {
        match self {
            Self::OutputVolume(chain) => Ok(chain),
            _ => Err(KymeraError::NoChain),
        }
    }

    /// Mutable output/volume chain
    ///
    /// # Errors
    ///
    /// Returns [`KymeraError::NoChain`] if the slot does not hold the output chain.
    pub fn output_volume_mut(&mut self) -> Result<&mut Chain, KymeraError> {
        match self {
            Self::OutputVolume(chain) => Ok(chain),
            _ => Err(KymeraError::NoChain),
        }
    }

    /// SCO chain
    ///
    /// # Errors
    ///
    /// Returns [`KymeraError::NoChain`] if the slot does not hold the SCO chain.
    pub fn sco(&self) -> Result<&Chain, KymeraError> {
        match self {
            Self::Sco(chain) => Ok(chain),
            _ => Err(KymeraError::NoChain),
        }
    }

    /// Mutable SCO chain
    ///
    /// # Errors
    ///
    /// Returns [`KymeraError::NoChain`] if the slot does not hold the SCO chain.
    pub fn sco_mut(&mut self) -> Result<&mut Chain, KymeraError> {
        match self {
            Self::Sco(chain) => Ok(chain),
            _ => Err(KymeraError::NoChain),
        }
    }

    /// Whichever chain is installed; both carry the volume and aux input
    #[must_use]
    pub fn any(&self) -> Option<&Chain> {
        match self {
            Self::None => None,
            Self::OutputVolume(chain) | Self::Sco(chain) => Some(chain),
        }
    }

    /// Mutable access to whichever chain is installed
    pub fn any_mut(&mut self) -> Option<&mut Chain> {
        match self {
            Self::None => None,
            Self::OutputVolume(chain) | Self::Sco(chain) => Some(chain),
        }
    }

    /// Install a chain into an empty slot
    pub fn install(&mut self, chain: Self) {
        debug_assert!(self.is_vacant(), "shared chain slot already occupied");
        *self = chain;
    }

    /// Remove and return the installed chain
    pub fn take(&mut self) -> Option<Chain> {
        match core::mem::take(self) {
            Self::None => None,
            Self::OutputVolume(chain) | Self::Sco(chain) => Some(chain),
        }
    }
}
