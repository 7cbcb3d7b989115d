//! SCO voice calls and SCO forwarding to the peer

use super::{Kymera, Message, MicSelection, Progress, ScoStartRequest};
use crate::KymeraState;
use crate::chain::{Chain, ChainId, EndpointRole, OperatorRole, ScoForwarding, SharedChain};
use crate::configure;
use crate::constants::{
    AEC_TERMINAL_BUFFER_MS, KICK_PERIOD_VOICE, SCO_NB_RATE, SCO_WB_RATE, SFWD_MICFWD_RECV_CHAIN_BUFFER_SIZE,
    SFWD_MSBC_BITPOOL, SFWD_SEND_CHAIN_BUFFER_SIZE, SFWD_TTP_DELAY_US, SFWD_WB_PASSTHROUGH_BUFFER_SIZE,
};
use crate::error::{ConfigurationError, KymeraError};
use crate::platform::{
    DataFormat, MicForwarding, OperatorMessage, OperatorQuery, PacketiserKind, Platform, Sink, Source, SpcMode,
};
use crate::volume::hfp_to_logical;

/// AEC terminal gate timeout used when time-to-play is enabled
const AEC_TTP_GATE_TIMEOUT_MS: u16 = 50;

impl<P: Platform> Kymera<P> {
    pub(super) fn handle_sco_start(&mut self, request: ScoStartRequest) -> Result<Progress, KymeraError> {
        let client_lock = request.client_lock;
        if request.pre_start_delay > 0 {
            debug!("[SCO] Start deferred, {} left", request.pre_start_delay);
            let request = ScoStartRequest {
                pre_start_delay: request.pre_start_delay - 1,
                ..request
            };
            return self.defer_start(
                Message::ScoStart {
                    request,
                    resent: true,
                },
                client_lock,
            );
        }
        let result = self.sco_start(&request);
        self.finish_start(client_lock, result)
    }

    fn sco_start(&mut self, request: &ScoStartRequest) -> Result<Progress, KymeraError> {
        if self.state != KymeraState::Idle {
            return Err(KymeraError::InvalidState(self.state));
        }
        let audio_source = self
            .platform
            .source_from_sink(request.sink)
            .ok_or(ConfigurationError::MissingMediaEndpoint)?;
        self.tone_prompt_stop();
        self.shared.ensure_vacant()?;

        let forwarding = if request.allow_forwarding {
            self.options.sco_forwarding
        } else {
            ScoForwarding::Disabled
        };
        let id = ChainId::for_sco(request.codec, self.options.mics, forwarding);
        let rate = request.codec.sample_rate();
        info!("[SCO] Start {:?} at {} Hz, wesco {}", id, rate, request.wesco);

        let mut chain = Chain::build(&mut self.platform, id)?;
        if let Err(e) = self.sco_configure(&chain, request, rate) {
            chain.destroy(&mut self.platform);
            return Err(e);
        }
        if let Err(e) = self.sco_connect(&mut chain, request.sink, audio_source, rate) {
            chain.destroy(&mut self.platform);
            return Err(e);
        }

        self.shared.install(SharedChain::Sco(chain));
        self.set_state(KymeraState::ScoActive);
        self.external_amp(true);
        self.platform.set_mic_bias(true);
        if let Err(e) = self.voice_run(rate, request.volume) {
            error!("[SCO] Chain failed to start: {}", e);
            self.voice_teardown();
            return Err(e);
        }
        Ok(Progress::Done)
    }

    fn sco_configure(&mut self, chain: &Chain, request: &ScoStartRequest, rate: u32) -> Result<(), KymeraError> {
        let platform = &mut self.platform;
        let id = chain.id();
        let narrowband = request.codec.is_narrowband();

        configure::send(
            platform,
            chain,
            OperatorRole::ScoAec,
            OperatorMessage::AecSampleRate {
                input: rate,
                output: rate,
            },
        )?;
        configure::send(
            platform,
            chain,
            OperatorRole::ScoAec,
            OperatorMessage::AecTerminalBuffer {
                size: configure::mono_pcm_buffer_size(AEC_TERMINAL_BUFFER_MS * 1000, rate),
                inputs: 1 << 0,
                outputs: 0,
            },
        )?;

        if id.forwards_sco() {
            configure::send(
                platform,
                chain,
                OperatorRole::ScofwdSend,
                OperatorMessage::AwbsBitpool(SFWD_MSBC_BITPOOL),
            )?;
            if narrowband {
                configure::send(
                    platform,
                    chain,
                    OperatorRole::ScoUpSample,
                    OperatorMessage::ResamplerConversion {
                        from: SCO_NB_RATE,
                        to: SCO_WB_RATE,
                    },
                )?;
            } else {
                configure::set_buffer_size(
                    platform,
                    chain,
                    OperatorRole::ScofwdBasicPass,
                    SFWD_WB_PASSTHROUGH_BUFFER_SIZE,
                )?;
            }
            if id.forwards_mic() {
                configure::send(
                    platform,
                    chain,
                    OperatorRole::MicfwdRecvSpc,
                    OperatorMessage::SpcDataFormat(DataFormat::Encoded16BitWithMetadata),
                )?;
                configure::send(
                    platform,
                    chain,
                    OperatorRole::MicfwdRecv,
                    OperatorMessage::AwbsBitpool(SFWD_MSBC_BITPOOL),
                )?;
                configure::set_buffer_size(
                    platform,
                    chain,
                    OperatorRole::MicfwdRecv,
                    SFWD_MICFWD_RECV_CHAIN_BUFFER_SIZE,
                )?;
                configure::send(
                    platform,
                    chain,
                    OperatorRole::MicfwdSpcSwitch,
                    OperatorMessage::SpcDataFormat(DataFormat::Pcm),
                )?;
                if narrowband {
                    configure::send(
                        platform,
                        chain,
                        OperatorRole::MicDownSample,
                        OperatorMessage::ResamplerConversion {
                            from: SCO_WB_RATE,
                            to: SCO_NB_RATE,
                        },
                    )?;
                }
            }
            configure::set_buffer_size(platform, chain, OperatorRole::ScofwdSplitter, SFWD_SEND_CHAIN_BUFFER_SIZE)?;
            configure::send(
                platform,
                chain,
                OperatorRole::ScofwdSplitter,
                OperatorMessage::SplitterDataFormat(DataFormat::Pcm),
            )?;
            configure::send(
                platform,
                chain,
                OperatorRole::SwitchedPassthroughConsumer,
                OperatorMessage::SpcDataFormat(DataFormat::GenericEncoded),
            )?;
            configure::send(
                platform,
                chain,
                OperatorRole::ScoReceive,
                OperatorMessage::TimeToPlayLatency(SFWD_TTP_DELAY_US),
            )?;
        } else if self.options.sco_ttp_us != 0 {
            configure::send(
                platform,
                chain,
                OperatorRole::ScoReceive,
                OperatorMessage::TimeToPlayLatency(self.options.sco_ttp_us),
            )?;
            configure::send(
                platform,
                chain,
                OperatorRole::ScoAec,
                OperatorMessage::AecTtpGate {
                    enable: true,
                    timeout_ms: AEC_TTP_GATE_TIMEOUT_MS,
                },
            )?;
        }

        configure::configure_output_chain(platform, chain, &self.options.volume_range, rate, KICK_PERIOD_VOICE, 0)?;
        configure::set_operator_ucids(platform, chain, true, narrowband)?;
        Ok(())
    }

    fn sco_connect(&mut self, chain: &mut Chain, sink: Sink, audio_source: Source, rate: u32) -> Result<(), KymeraError> {
        self.connect_voice_io(chain, rate)?;
        chain.connect_output(&mut self.platform, EndpointRole::ScoToAir, sink)?;
        chain.connect_input(&mut self.platform, EndpointRole::ScoFromAir, audio_source)?;
        chain.connect(&mut self.platform)?;
        if chain.id().forwards_mic() {
            configure::send(
                &mut self.platform,
                chain,
                OperatorRole::MicfwdSpcSwitch,
                OperatorMessage::SpcSelectInput(MicSelection::Local.switch_input()),
            )?;
        }
        Ok(())
    }

    /// Power up and start the installed voice chain, then apply the call volume
    pub(super) fn voice_run(&mut self, rate: u32, volume: u8) -> Result<(), KymeraError> {
        self.apply_power_mode()?;
        self.shared.sco()?.start(&mut self.platform)?;
        self.output_rate = rate;
        self.voice_set_volume(volume)
    }

    fn voice_set_volume(&mut self, volume: u8) -> Result<(), KymeraError> {
        let chain = self.shared.sco()?;
        let gain = configure::set_main_volume(
            &mut self.platform,
            chain,
            &self.options.volume_range,
            hfp_to_logical(volume),
        )?;
        debug!("[SCO] Volume {} ({})", volume, gain.0);
        Ok(())
    }

    /// Stop and destroy the voice chain and release the voice hardware
    pub(super) fn voice_teardown(&mut self) {
        self.tone_prompt_stop();
        self.destroy_shared_chain();
        self.external_amp(false);
        self.platform.set_mic_bias(false);
        self.output_rate = 0;
        self.set_state(KymeraState::Idle);
        self.refresh_power_mode();
    }

    pub(super) fn handle_sco_stop(&mut self) -> Result<Progress, KymeraError> {
        match self.state {
            KymeraState::ScoActiveWithForwarding => {
                self.sco_disable_forwarding()?;
            }
            KymeraState::ScoActive => {}
            state => {
                debug!("[SCO] Stop ignored in {:?}", state);
                return Ok(Progress::Ignored);
            }
        }
        self.voice_teardown();
        info!("[SCO] Stopped");
        Ok(Progress::Done)
    }

    pub(super) fn handle_sco_set_volume(&mut self, volume: u8) -> Result<Progress, KymeraError> {
        match self.state {
            KymeraState::ScoActive | KymeraState::ScoActiveWithForwarding | KymeraState::ScoFwdRxActive => {
                self.voice_set_volume(volume)?;
                Ok(Progress::Done)
            }
            _ => Ok(Progress::Ignored),
        }
    }

    pub(super) fn handle_sco_mic_mute(&mut self, mute: bool) -> Result<Progress, KymeraError> {
        if self.state != KymeraState::ScoActive {
            return Ok(Progress::Ignored);
        }
        let chain = self.shared.sco()?;
        configure::send_optional(&mut self.platform, chain, OperatorRole::ScoAec, OperatorMessage::AecMuteMic(mute))?;
        debug!("[SCO] Mic mute {}", mute);
        Ok(Progress::Done)
    }

    /// Voice quality reported by CVC, clamped to the configured range
    ///
    /// Returns the configured fallback when measurement is disabled, and the worst value
    /// when there is no CVC to ask.
    pub fn sco_voice_quality(&mut self) -> u8 {
        let config = self.options.voice_quality;
        if !config.measurement_enabled {
            return config.when_disabled;
        }
        let operator = self
            .shared
            .sco()
            .ok()
            .and_then(|chain| chain.optional_operator(&self.platform, OperatorRole::CvcSend));
        let quality = match operator {
            Some(operator) => match self.platform.operator_query(operator, OperatorQuery::VoiceQuality) {
                Ok(raw) => u8::try_from(raw).unwrap_or(u8::MAX).min(config.best).max(config.worst),
                Err(e) => {
                    warn!("[SCO] Voice quality query failed: {}", e);
                    config.worst
                }
            },
            None => config.worst,
        };
        trace!("[SCO] Voice quality {}", quality);
        quality
    }

    pub(super) fn handle_sco_start_forwarding(
        &mut self,
        sink: Sink,
        mic_forwarding: bool,
    ) -> Result<Progress, KymeraError> {
        if self.state != KymeraState::ScoActive {
            debug!("[SFWD] Forwarding start ignored in {:?}", self.state);
            return Ok(Progress::Ignored);
        }
        let chain = self.shared.sco_mut()?;
        if !chain.id().forwards_sco() {
            return Err(ConfigurationError::ForwardingUnavailable.into());
        }
        let source = chain.output(&self.platform, EndpointRole::ScofwdTxOta)?;
        let transform = self
            .platform
            .create_transform(PacketiserKind::ScoTransmit, source, sink)?;
        chain.attach(EndpointRole::ScofwdTxOta)?;
        self.packetiser = Some(transform);

        let result = self.sco_enable_forwarding(mic_forwarding);
        if let Err(e) = result {
            error!("[SFWD] Forwarding start failed: {}", e);
            if let Ok(chain) = self.shared.sco_mut() {
                chain.detach(EndpointRole::ScofwdTxOta);
            }
            if let Some(transform) = self.packetiser.take() {
                self.platform.destroy_transform(transform);
            }
            return Err(e);
        }
        info!("[SFWD] Forwarding started");
        self.set_state(KymeraState::ScoActiveWithForwarding);
        Ok(Progress::Done)
    }

    fn sco_enable_forwarding(&mut self, mic_forwarding: bool) -> Result<(), KymeraError> {
        let mic = self.mic;
        let chain = self.shared.sco_mut()?;
        configure::set_spc_mode(
            &mut self.platform,
            chain,
            OperatorRole::SwitchedPassthroughConsumer,
            SpcMode::Passthrough,
        )?;
        if mic_forwarding && chain.id().forwards_mic() {
            let sink = chain.input(&self.platform, EndpointRole::MicfwdRxOta)?;
            self.platform.attach_mic(MicForwarding::Receive(sink))?;
            chain.attach(EndpointRole::MicfwdRxOta)?;
            configure::send(
                &mut self.platform,
                chain,
                OperatorRole::MicfwdSpcSwitch,
                OperatorMessage::SpcSelectInput(mic.switch_input()),
            )?;
            configure::set_spc_mode(&mut self.platform, chain, OperatorRole::MicfwdRecvSpc, SpcMode::Passthrough)?;
        }
        Ok(())
    }

    /// Stop forwarding the call; returns whether forwarding was active
    fn sco_disable_forwarding(&mut self) -> Result<bool, KymeraError> {
        if self.state != KymeraState::ScoActiveWithForwarding {
            return Ok(false);
        }
        let chain = self.shared.sco_mut()?;
        configure::set_spc_mode(
            &mut self.platform,
            chain,
            OperatorRole::SwitchedPassthroughConsumer,
            SpcMode::Consume,
        )?;
        if chain.is_connected(EndpointRole::MicfwdRxOta) {
            configure::set_spc_mode(&mut self.platform, chain, OperatorRole::MicfwdRecvSpc, SpcMode::Consume)?;
            chain.detach(EndpointRole::MicfwdRxOta);
        }
        chain.detach(EndpointRole::ScofwdTxOta);
        if let Some(transform) = self.packetiser.take() {
            self.platform.destroy_transform(transform);
        }
        info!("[SFWD] Forwarding stopped");
        self.set_state(KymeraState::ScoActive);
        Ok(true)
    }

    pub(super) fn handle_sco_stop_forwarding(&mut self) -> Result<Progress, KymeraError> {
        if self.sco_disable_forwarding()? {
            Ok(Progress::Done)
        } else {
            Ok(Progress::Ignored)
        }
    }

    /// Pause or resume forwarding without rebuilding the chain
    ///
    /// # Errors
    ///
    /// Returns [`KymeraError::NoChain`] without a SCO chain, or
    /// [`ConfigurationError::ForwardingUnavailable`] if it was built without forwarding.
    pub fn sco_forwarding_pause(&mut self, pause: bool) -> Result<(), KymeraError> {
        let chain = self.shared.sco()?;
        let mode = if pause { SpcMode::Consume } else { SpcMode::Passthrough };
        debug!("[SFWD] Pause {}", pause);
        configure::set_spc_mode(&mut self.platform, chain, OperatorRole::SwitchedPassthroughConsumer, mode)
    }

    pub(super) fn handle_mic_select(&mut self, mic: MicSelection) -> Result<Progress, KymeraError> {
        self.mic = mic;
        if self.state != KymeraState::ScoActiveWithForwarding {
            debug!("[SFWD] Mic {:?} remembered", mic);
            return Ok(Progress::Ignored);
        }
        let chain = self.shared.sco()?;
        let switched = configure::send_optional(
            &mut self.platform,
            chain,
            OperatorRole::MicfwdSpcSwitch,
            OperatorMessage::SpcSelectInput(mic.switch_input()),
        )?;
        if !switched {
            warn!("[SFWD] No mic switch in chain");
            return Ok(Progress::Ignored);
        }
        debug!("[SFWD] Mic {:?} selected", mic);
        Ok(Progress::Done)
    }
}
