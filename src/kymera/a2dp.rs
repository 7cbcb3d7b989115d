//! A2DP streaming and forwarding
//!
//! Sink endpoints build two chains in three queued phases: the output chain (A), the
//! decoder input chain wired into it (B), then media connection and start (C). TWS sink
//! endpoints receive their media from the peer through the packetiser. Source endpoints
//! only switch forwarding of an already running stream on and off.

use super::{A2dpCodecSettings, A2dpStartRequest, Kymera, Message, Progress, Seid, SeidKind};
use crate::KymeraState;
use crate::chain::{Chain, ChainId, EndpointRole, OperatorRole, SharedChain};
use crate::configure;
use crate::constants::{
    FORWARDING_SBC_BITPOOL, KICK_PERIOD_MASTER_AAC, KICK_PERIOD_MASTER_APTX,
    KICK_PERIOD_MASTER_SBC, KICK_PERIOD_SLAVE, PRE_DECODER_BUFFER_SIZE, TWS_STANDARD_LATENCY_US,
};
use crate::error::{ConfigurationError, KymeraError};
use crate::platform::{
    DataFormat, MediaCodec, OperatorMessage, PacketiserKind, Platform, SbcEncoderParams, Source,
    SpcMode,
};

/// Sample rates accepted for A2DP streams
const A2DP_SAMPLE_RATES: [u32; 4] = [16_000, 32_000, 44_100, 48_000];

const fn kick_period(seid: Seid) -> u32 {
    match (seid.kind(), seid.codec()) {
        (SeidKind::TwsSink, _) => KICK_PERIOD_SLAVE,
        (_, MediaCodec::Sbc) => KICK_PERIOD_MASTER_SBC,
        (_, MediaCodec::Aac) => KICK_PERIOD_MASTER_AAC,
        (_, MediaCodec::Aptx) => KICK_PERIOD_MASTER_APTX,
    }
}

impl<P: Platform> Kymera<P> {
    pub(super) fn handle_a2dp_start(&mut self, request: A2dpStartRequest) -> Result<Progress, KymeraError> {
        let client_lock = request.client_lock;
        if request.pre_start_delay > 0 {
            debug!("[A2DP] Start deferred, {} left", request.pre_start_delay);
            let request = A2dpStartRequest {
                pre_start_delay: request.pre_start_delay - 1,
                ..request
            };
            return self.defer_start(
                Message::A2dpStart {
                    request,
                    resent: true,
                },
                client_lock,
            );
        }

        let seid = match Seid::parse(request.settings.seid) {
            Ok(seid) => seid,
            Err(e) => return self.finish_start(client_lock, Err(e.into())),
        };
        if seid.kind() == SeidKind::Source {
            let result = self.a2dp_start_forwarding(&request.settings);
            return self.finish_start(client_lock, result);
        }
        if let Err(e) = self.a2dp_prepare(seid, &request.settings) {
            return self.finish_start(client_lock, Err(e));
        }
        self.defer_start(Message::A2dpStarting(request), client_lock)
    }

    /// Validate a sink start and enter the first construction phase
    ///
    /// Nothing is touched unless every check passes.
    fn a2dp_prepare(&mut self, seid: Seid, settings: &A2dpCodecSettings) -> Result<(), KymeraError> {
        if self.state != KymeraState::Idle {
            return Err(KymeraError::InvalidState(self.state));
        }
        if !A2DP_SAMPLE_RATES.contains(&settings.rate) {
            return Err(ConfigurationError::UnsupportedRate(settings.rate).into());
        }
        if settings.media.is_none() {
            return Err(ConfigurationError::MissingMediaEndpoint.into());
        }
        self.tone_prompt_stop();
        self.shared.ensure_vacant()?;

        info!("[A2DP] Start {:?} at {} Hz", seid, settings.rate);
        self.a2dp_seid = Some(seid);
        self.output_rate = settings.rate;
        self.set_state(KymeraState::A2dpStartingA);
        if let Err(e) = self.apply_power_mode() {
            self.a2dp_teardown();
            return Err(e);
        }
        Ok(())
    }

    pub(super) fn handle_a2dp_starting(&mut self, request: A2dpStartRequest) -> Result<Progress, KymeraError> {
        let client_lock = request.client_lock;
        let Some(seid) = self.a2dp_seid else {
            return self.finish_start(client_lock, Err(KymeraError::InvalidState(self.state)));
        };
        let result = match self.state {
            KymeraState::A2dpStartingA => self
                .a2dp_build_output(seid, &request)
                .map(|()| KymeraState::A2dpStartingB),
            KymeraState::A2dpStartingB => self
                .a2dp_build_input(seid, &request.settings)
                .map(|()| KymeraState::A2dpStartingC),
            KymeraState::A2dpStartingC => self
                .a2dp_start_chains(seid, &request.settings)
                .map(|()| KymeraState::A2dpStreaming),
            state => {
                return self.finish_start(client_lock, Err(KymeraError::InvalidState(state)));
            }
        };
        match result {
            Ok(KymeraState::A2dpStreaming) => {
                self.set_state(KymeraState::A2dpStreaming);
                info!("[A2DP] Streaming");
                self.finish_start(client_lock, Ok(Progress::Done))
            }
            Ok(next) => {
                self.set_state(next);
                self.defer_start(Message::A2dpStarting(request), client_lock)
            }
            Err(e) => {
                error!("[A2DP] Start failed: {}", e);
                self.a2dp_teardown();
                self.finish_start(client_lock, Err(e))
            }
        }
    }

    /// Phase A: output chain configured and wired to the DAC
    fn a2dp_build_output(&mut self, seid: Seid, request: &A2dpStartRequest) -> Result<(), KymeraError> {
        let mut chain = Chain::build(&mut self.platform, ChainId::for_output(self.options.output_peq))?;
        if let Err(e) = self.a2dp_configure_output(&mut chain, seid, request) {
            chain.destroy(&mut self.platform);
            return Err(e);
        }
        self.shared.install(SharedChain::OutputVolume(chain));
        self.external_amp(true);
        Ok(())
    }

    fn a2dp_configure_output(
        &mut self,
        chain: &mut Chain,
        seid: Seid,
        request: &A2dpStartRequest,
    ) -> Result<(), KymeraError> {
        let rate = request.settings.rate;
        let gain = configure::configure_output_chain(
            &mut self.platform,
            chain,
            &self.options.volume_range,
            rate,
            kick_period(seid),
            request.volume,
        )?;
        trace!("[A2DP] Output gain {}", gain.0);
        configure::set_operator_ucids(&mut self.platform, chain, false, false)?;
        let speaker = self.speaker(rate)?;
        chain.connect_output(&mut self.platform, EndpointRole::SourceMixerOut, speaker)?;
        chain.connect(&mut self.platform)?;
        Ok(())
    }

    /// Phase B: decoder chain configured and feeding the output chain
    fn a2dp_build_input(&mut self, seid: Seid, settings: &A2dpCodecSettings) -> Result<(), KymeraError> {
        let id = ChainId::for_a2dp_input(seid, self.options.a2dp_forwarding)?;
        let mut chain = Chain::build(&mut self.platform, id)?;
        if let Err(e) = self.a2dp_configure_input(&mut chain, seid, settings) {
            chain.destroy(&mut self.platform);
            return Err(e);
        }
        self.input = Some(chain);
        Ok(())
    }

    fn a2dp_configure_input(
        &mut self,
        chain: &mut Chain,
        seid: Seid,
        settings: &A2dpCodecSettings,
    ) -> Result<(), KymeraError> {
        let platform = &mut self.platform;
        configure::send(platform, chain, OperatorRole::RtpDecoder, OperatorMessage::RtpCodec(seid.codec()))?;
        configure::send(
            platform,
            chain,
            OperatorRole::RtpDecoder,
            OperatorMessage::TimeToPlayLatency(TWS_STANDARD_LATENCY_US),
        )?;
        configure::set_buffer_size(platform, chain, OperatorRole::RtpDecoder, PRE_DECODER_BUFFER_SIZE)?;

        // AAC is split after decoding and re-encoded, SBC frames are split as they are
        let split_format = match seid.codec() {
            MediaCodec::Aac => DataFormat::Pcm,
            MediaCodec::Sbc | MediaCodec::Aptx => DataFormat::GenericEncoded,
        };
        configure::send_optional(
            platform,
            chain,
            OperatorRole::Splitter,
            OperatorMessage::SplitterDataFormat(split_format),
        )?;
        configure::send_optional(
            platform,
            chain,
            OperatorRole::SwitchedPassthroughConsumer,
            OperatorMessage::SpcDataFormat(DataFormat::GenericEncoded),
        )?;
        configure::send_optional(
            platform,
            chain,
            OperatorRole::SbcEncoder,
            OperatorMessage::SbcEncoder(SbcEncoderParams {
                sample_rate: settings.rate,
                bitpool: FORWARDING_SBC_BITPOOL,
            }),
        )?;
        chain.connect(platform)?;

        let output = self.shared.output_volume_mut()?;
        let mixer_in = output.input(&self.platform, EndpointRole::SinkMixerMainIn)?;
        chain.connect_output(&mut self.platform, EndpointRole::SourceDecodedPcm, mixer_in)?;
        output.attach(EndpointRole::SinkMixerMainIn)?;
        Ok(())
    }

    /// Phase C: media connected, chains started
    fn a2dp_start_chains(&mut self, seid: Seid, settings: &A2dpCodecSettings) -> Result<(), KymeraError> {
        let media = settings
            .media
            .ok_or(ConfigurationError::MissingMediaEndpoint)?;
        let input = self.input.as_mut().ok_or(KymeraError::NoChain)?;
        if seid.kind() == SeidKind::TwsSink {
            let sink = input.input(&self.platform, EndpointRole::SinkMedia)?;
            let transform = self
                .platform
                .create_transform(PacketiserKind::A2dpReceive, media, sink)?;
            self.packetiser = Some(transform);
            input.attach(EndpointRole::SinkMedia)?;
        } else {
            input.connect_input(&mut self.platform, EndpointRole::SinkMedia, media)?;
        }
        self.shared.output_volume()?.start(&mut self.platform)?;
        input.start(&mut self.platform)?;
        Ok(())
    }

    /// Start forwarding the running stream to the peer
    fn a2dp_start_forwarding(&mut self, settings: &A2dpCodecSettings) -> Result<Progress, KymeraError> {
        match self.state {
            KymeraState::A2dpStreaming => {}
            KymeraState::A2dpStreamingWithForwarding => return Ok(Progress::Ignored),
            state => return Err(KymeraError::InvalidState(state)),
        }
        let sink = settings
            .forwarding_sink
            .ok_or(ConfigurationError::MissingMediaEndpoint)?;
        let input = self.input.as_mut().ok_or(KymeraError::NoChain)?;
        let source = input
            .output(&self.platform, EndpointRole::SourceForwardingMedia)
            .map_err(|_| ConfigurationError::ForwardingUnavailable)?;
        let transform = self
            .platform
            .create_transform(PacketiserKind::A2dpTransmit, source, sink)?;
        if let Err(e) = configure::set_spc_mode(
            &mut self.platform,
            input,
            OperatorRole::SwitchedPassthroughConsumer,
            SpcMode::Passthrough,
        ) {
            self.platform.destroy_transform(transform);
            return Err(e);
        }
        input.attach(EndpointRole::SourceForwardingMedia)?;
        self.packetiser = Some(transform);
        info!("[A2DP] Forwarding started");
        self.set_state(KymeraState::A2dpStreamingWithForwarding);
        Ok(Progress::Done)
    }

    fn a2dp_stop_forwarding(&mut self) -> Progress {
        if self.state != KymeraState::A2dpStreamingWithForwarding {
            return Progress::Ignored;
        }
        if let Some(input) = self.input.as_mut() {
            if let Err(e) = configure::set_spc_mode(
                &mut self.platform,
                input,
                OperatorRole::SwitchedPassthroughConsumer,
                SpcMode::Consume,
            ) {
                warn!("[A2DP] Forwarding switch failed: {}", e);
            }
            input.detach(EndpointRole::SourceForwardingMedia);
        }
        if let Some(transform) = self.packetiser.take() {
            self.platform.destroy_transform(transform);
        }
        info!("[A2DP] Forwarding stopped");
        self.set_state(KymeraState::A2dpStreaming);
        Progress::Done
    }

    pub(super) fn handle_a2dp_stop(&mut self, seid: u8, media: Option<Source>) -> Result<Progress, KymeraError> {
        let seid = Seid::parse(seid)?;
        if seid.kind() == SeidKind::Source {
            return Ok(self.a2dp_stop_forwarding());
        }
        if !self.state.is_a2dp() {
            debug!("[A2DP] Stop ignored in {:?}", self.state);
            return Ok(Progress::Ignored);
        }
        self.a2dp_stop_forwarding();
        self.tone_prompt_stop();
        if media.is_some() {
            self.platform.disconnect(media, None);
        }
        self.a2dp_teardown();
        info!("[A2DP] Stopped");
        Ok(Progress::Done)
    }

    pub(super) fn handle_a2dp_set_volume(&mut self, volume: u8) -> Result<Progress, KymeraError> {
        match self.state {
            KymeraState::A2dpStreaming | KymeraState::A2dpStreamingWithForwarding => {
                let chain = self.shared.output_volume()?;
                let gain = configure::set_volume(&mut self.platform, chain, &self.options.volume_range, volume)?;
                debug!("[A2DP] Volume {} ({})", volume, gain.0);
                Ok(Progress::Done)
            }
            _ => Ok(Progress::Ignored),
        }
    }

    /// Release everything an A2DP session may hold and return to idle
    ///
    /// Works on partially built sessions.
    fn a2dp_teardown(&mut self) {
        if let Some(transform) = self.packetiser.take() {
            self.platform.destroy_transform(transform);
        }
        let input = self.input.take();
        if let Some(input) = &input {
            input.stop(&mut self.platform);
        }
        let output = self.shared.take();
        if let Some(output) = &output {
            output.stop(&mut self.platform);
        }
        if let Some(input) = input {
            input.destroy(&mut self.platform);
        }
        if let Some(output) = output {
            output.destroy(&mut self.platform);
            self.external_amp(false);
        }
        self.a2dp_seid = None;
        self.output_rate = 0;
        self.set_state(KymeraState::Idle);
        self.refresh_power_mode();
    }
}
