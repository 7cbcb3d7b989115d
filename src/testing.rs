//! Recording platform for unit tests

use crate::chain::{Chain, ChainTemplate, EndpointRole, OperatorRole};
use crate::error::PlatformError;
use crate::kymera::ClientLock;
use crate::platform::{
    ChainHandle, MicChannel, MicForwarding, Operator, OperatorFramework, OperatorMessage,
    OperatorQuery, PacketiserKind, Packetiser, PromptId, Sink, Source, StreamKey, StreamTransport,
    Transform,
};
use crate::power::DspPowerMode;
use core::sync::atomic::AtomicU16;
use std::boxed::Box;
use std::collections::HashMap;
use std::vec::Vec;

/// Ids per chain handle; operators and endpoints are numbered inside this block
const IDS_PER_CHAIN: u16 = 64;
/// Chain endpoints live above everything the tests hand in directly
const ENDPOINT_BASE: u16 = 0x4000;

pub(crate) const MIC_A: Source = Source(0x0100);
pub(crate) const MIC_B: Source = Source(0x0101);
pub(crate) const SPEAKER: Sink = Sink(0x0200);
const PROMPT_BASE: u16 = 0x0300;

#[derive(Debug)]
struct ChainRecord {
    template: &'static ChainTemplate,
    started: bool,
}

/// Platform that accepts everything and records what it was asked to do
#[derive(Debug, Default)]
pub(crate) struct MockPlatform {
    next_chain: u16,
    next_transform: u16,
    chains: HashMap<ChainHandle, ChainRecord>,
    /// Operator messages in order
    pub messages: Vec<(Operator, OperatorMessage)>,
    /// Live stream connections
    pub connections: Vec<(Source, Sink)>,
    /// Live packetiser transforms
    pub transforms: Vec<(Transform, PacketiserKind, Source, Sink)>,
    /// Mic forwarding endpoints handed out
    pub mic_forwarding: Vec<MicForwarding>,
    /// Stream configuration in order
    pub stream_config: Vec<(u16, StreamKey, u32)>,
    /// Applied power modes in order
    pub power_modes: Vec<DspPowerMode>,
    /// Prompt sources currently open
    pub open_prompts: Vec<Source>,
    pub audio_subsystem: bool,
    pub external_amp: bool,
    pub mic_bias: bool,
    /// Answer to voice quality queries
    pub voice_quality: u16,
    /// Role left unresolved in every chain built
    pub missing_operator: Option<OperatorRole>,
    /// Fail every chain start
    pub fail_start: bool,
    /// Fail every transform creation
    pub fail_packetiser: bool,
}

impl MockPlatform {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn live_chains(&self) -> usize {
        self.chains.len()
    }

    pub(crate) fn started_chains(&self) -> usize {
        self.chains.values().filter(|record| record.started).count()
    }

    /// Messages sent to the operator playing `role` in `chain`
    pub(crate) fn messages_to(&self, chain: &Chain, role: OperatorRole) -> Vec<OperatorMessage> {
        let Some(index) = chain.template().operators.iter().position(|r| *r == role) else {
            return Vec::new();
        };
        let operator = operator_id(chain.handle(), index);
        self.messages
            .iter()
            .filter(|(to, _)| *to == operator)
            .map(|(_, message)| *message)
            .collect()
    }

    /// Every message of one kind, whoever received it
    pub(crate) fn messages_matching(&self, predicate: impl Fn(&OperatorMessage) -> bool) -> Vec<OperatorMessage> {
        self.messages
            .iter()
            .map(|(_, message)| *message)
            .filter(|message| predicate(message))
            .collect()
    }

    pub(crate) fn is_connected(&self, source: Source, sink: Sink) -> bool {
        self.connections.contains(&(source, sink))
    }

    pub(crate) fn stream_value(&self, id: u16, key: StreamKey) -> Option<u32> {
        self.stream_config
            .iter()
            .rev()
            .find(|(stream, k, _)| *stream == id && *k == key)
            .map(|(_, _, value)| *value)
    }
}

/// Client lock backed by a leaked lock word with `mask` already set
pub(crate) fn client_lock(mask: u16) -> (ClientLock, &'static AtomicU16) {
    let word: &'static AtomicU16 = Box::leak(Box::new(AtomicU16::new(mask)));
    (ClientLock::new(word, mask), word)
}

fn operator_id(chain: ChainHandle, index: usize) -> Operator {
    let index = u16::try_from(index).unwrap_or(u16::MAX);
    Operator(chain.0 * IDS_PER_CHAIN + index)
}

fn endpoint_id(chain: ChainHandle, index: usize) -> u16 {
    let index = u16::try_from(index).unwrap_or(u16::MAX);
    ENDPOINT_BASE + chain.0 * IDS_PER_CHAIN + index
}

impl OperatorFramework for MockPlatform {
    fn create_chain(&mut self, template: &'static ChainTemplate) -> Result<ChainHandle, PlatformError> {
        self.next_chain += 1;
        let handle = ChainHandle(self.next_chain);
        self.chains.insert(
            handle,
            ChainRecord {
                template,
                started: false,
            },
        );
        Ok(handle)
    }

    fn operator(&self, chain: ChainHandle, role: OperatorRole) -> Option<Operator> {
        if self.missing_operator == Some(role) {
            return None;
        }
        let record = self.chains.get(&chain)?;
        let index = record.template.operators.iter().position(|r| *r == role)?;
        Some(operator_id(chain, index))
    }

    fn chain_input(&self, chain: ChainHandle, role: EndpointRole) -> Option<Sink> {
        let record = self.chains.get(&chain)?;
        let index = record.template.inputs.iter().position(|spec| spec.role == role)?;
        Some(Sink(endpoint_id(chain, index)))
    }

    fn chain_output(&self, chain: ChainHandle, role: EndpointRole) -> Option<Source> {
        let record = self.chains.get(&chain)?;
        let index = record.template.outputs.iter().position(|spec| spec.role == role)?;
        Some(Source(endpoint_id(chain, record.template.inputs.len() + index)))
    }

    fn connect_chain(&mut self, _chain: ChainHandle) -> Result<(), PlatformError> {
        Ok(())
    }

    fn start_chain(&mut self, chain: ChainHandle) -> Result<(), PlatformError> {
        if self.fail_start {
            return Err(PlatformError::Start);
        }
        let record = self.chains.get_mut(&chain).ok_or(PlatformError::Start)?;
        record.started = true;
        Ok(())
    }

    fn stop_chain(&mut self, chain: ChainHandle) {
        if let Some(record) = self.chains.get_mut(&chain) {
            record.started = false;
        }
    }

    fn destroy_chain(&mut self, chain: ChainHandle) {
        self.chains.remove(&chain);
    }

    fn operator_message(&mut self, operator: Operator, message: OperatorMessage) -> Result<(), PlatformError> {
        self.messages.push((operator, message));
        Ok(())
    }

    fn operator_query(&mut self, _operator: Operator, query: OperatorQuery) -> Result<u16, PlatformError> {
        match query {
            OperatorQuery::VoiceQuality => Ok(self.voice_quality),
        }
    }

    fn set_power_mode(&mut self, mode: DspPowerMode) -> Result<(), PlatformError> {
        self.power_modes.push(mode);
        Ok(())
    }

    fn set_audio_subsystem(&mut self, enabled: bool) {
        self.audio_subsystem = enabled;
    }
}

impl StreamTransport for MockPlatform {
    fn mic_source(&mut self, channel: MicChannel) -> Result<Source, PlatformError> {
        Ok(match channel {
            MicChannel::A => MIC_A,
            MicChannel::B => MIC_B,
        })
    }

    fn speaker_sink(&mut self) -> Result<Sink, PlatformError> {
        Ok(SPEAKER)
    }

    fn source_from_sink(&self, sink: Sink) -> Option<Source> {
        Some(Source(sink.0))
    }

    fn configure_source(&mut self, source: Source, key: StreamKey, value: u32) -> Result<(), PlatformError> {
        self.stream_config.push((source.0, key, value));
        Ok(())
    }

    fn configure_sink(&mut self, sink: Sink, key: StreamKey, value: u32) -> Result<(), PlatformError> {
        self.stream_config.push((sink.0, key, value));
        Ok(())
    }

    fn synchronise(&mut self, _first: Source, _second: Source) -> Result<(), PlatformError> {
        Ok(())
    }

    fn connect(&mut self, source: Source, sink: Sink) -> Result<(), PlatformError> {
        self.connections.push((source, sink));
        Ok(())
    }

    fn disconnect(&mut self, source: Option<Source>, sink: Option<Sink>) {
        self.connections
            .retain(|(so, si)| Some(*so) != source && Some(*si) != sink);
    }

    fn prompt_source(&mut self, prompt: PromptId) -> Result<Source, PlatformError> {
        let source = Source(PROMPT_BASE + prompt.0);
        self.open_prompts.push(source);
        Ok(source)
    }

    fn close_source(&mut self, source: Source) {
        self.open_prompts.retain(|open| *open != source);
    }

    fn set_mic_bias(&mut self, enabled: bool) {
        self.mic_bias = enabled;
    }

    fn set_external_amp(&mut self, enabled: bool) {
        self.external_amp = enabled;
    }
}

impl Packetiser for MockPlatform {
    fn create_transform(&mut self, kind: PacketiserKind, source: Source, sink: Sink) -> Result<Transform, PlatformError> {
        if self.fail_packetiser {
            return Err(PlatformError::Packetiser);
        }
        self.next_transform += 1;
        let transform = Transform(self.next_transform);
        self.transforms.push((transform, kind, source, sink));
        Ok(transform)
    }

    fn destroy_transform(&mut self, transform: Transform) {
        self.transforms.retain(|(t, ..)| *t != transform);
    }

    fn attach_mic(&mut self, endpoint: MicForwarding) -> Result<(), PlatformError> {
        self.mic_forwarding.push(endpoint);
        Ok(())
    }
}
