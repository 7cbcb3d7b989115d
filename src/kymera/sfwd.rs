//! Playing SCO audio forwarded by the peer

use super::{Kymera, Message, Progress, ScoFwdRxRequest};
use crate::KymeraState;
use crate::chain::{Chain, ChainId, EndpointRole, OperatorRole, SharedChain};
use crate::configure;
use crate::constants::{
    KICK_PERIOD_VOICE, SCO_WB_RATE, SFWD_MSBC_BITPOOL, SFWD_RECV_CHAIN_BUFFER_SIZE, SFWD_TTP_DELAY_US,
};
use crate::error::KymeraError;
use crate::platform::{MicForwarding, OperatorMessage, PacketiserKind, Platform, SpcMode};

impl<P: Platform> Kymera<P> {
    pub(super) fn handle_sco_fwd_rx_start(&mut self, request: ScoFwdRxRequest) -> Result<Progress, KymeraError> {
        let client_lock = request.client_lock;
        if request.pre_start_delay > 0 {
            debug!("[SFWD] Receive start deferred, {} left", request.pre_start_delay);
            let request = ScoFwdRxRequest {
                pre_start_delay: request.pre_start_delay - 1,
                ..request
            };
            return self.defer_start(
                Message::ScoFwdRxStart {
                    request,
                    resent: true,
                },
                client_lock,
            );
        }
        let result = self.sco_fwd_rx_start(&request);
        self.finish_start(client_lock, result)
    }

    fn sco_fwd_rx_start(&mut self, request: &ScoFwdRxRequest) -> Result<Progress, KymeraError> {
        if self.state != KymeraState::Idle {
            return Err(KymeraError::InvalidState(self.state));
        }
        self.tone_prompt_stop();
        self.shared.ensure_vacant()?;

        let mic_forwarding = request.mic_forwarding && self.options.mic_forwarding;
        let id = ChainId::for_sco_forwarding_receive(self.options.mics, mic_forwarding);
        info!("[SFWD] Receive start {:?}", id);

        let mut chain = Chain::build(&mut self.platform, id)?;
        let built = self
            .sco_fwd_rx_configure(&chain)
            .and_then(|()| self.sco_fwd_rx_connect(&mut chain, request));
        if let Err(e) = built {
            error!("[SFWD] Receive chain setup failed: {}", e);
            if let Some(transform) = self.packetiser.take() {
                self.platform.destroy_transform(transform);
            }
            chain.destroy(&mut self.platform);
            return Err(e);
        }

        self.shared.install(SharedChain::Sco(chain));
        self.set_state(KymeraState::ScoFwdRxActive);
        self.external_amp(true);
        self.platform.set_mic_bias(true);
        let started = self.voice_run(SCO_WB_RATE, request.volume).and_then(|()| {
            if mic_forwarding {
                let chain = self.shared.sco()?;
                configure::set_spc_mode(
                    &mut self.platform,
                    chain,
                    OperatorRole::SwitchedPassthroughConsumer,
                    SpcMode::Passthrough,
                )?;
            }
            Ok(())
        });
        if let Err(e) = started {
            error!("[SFWD] Receive chain failed to start: {}", e);
            self.sco_fwd_rx_teardown();
            return Err(e);
        }
        Ok(Progress::Done)
    }

    fn sco_fwd_rx_configure(&mut self, chain: &Chain) -> Result<(), KymeraError> {
        let platform = &mut self.platform;
        configure::send(
            platform,
            chain,
            OperatorRole::ScoAec,
            OperatorMessage::AecSampleRate {
                input: SCO_WB_RATE,
                output: SCO_WB_RATE,
            },
        )?;
        configure::send(
            platform,
            chain,
            OperatorRole::ScoAec,
            OperatorMessage::TimeToPlayLatency(SFWD_TTP_DELAY_US),
        )?;
        configure::send(platform, chain, OperatorRole::ScoAec, OperatorMessage::AecSameIoClockSource)?;
        configure::send(
            platform,
            chain,
            OperatorRole::ScofwdRecv,
            OperatorMessage::AwbsBitpool(SFWD_MSBC_BITPOOL),
        )?;
        configure::set_buffer_size(platform, chain, OperatorRole::ScofwdRecv, SFWD_RECV_CHAIN_BUFFER_SIZE)?;
        if chain.id().forwards_mic() {
            configure::send(
                platform,
                chain,
                OperatorRole::MicfwdSend,
                OperatorMessage::AwbsBitpool(SFWD_MSBC_BITPOOL),
            )?;
        }
        configure::configure_output_chain(
            platform,
            chain,
            &self.options.volume_range,
            SCO_WB_RATE,
            KICK_PERIOD_VOICE,
            0,
        )?;
        configure::set_operator_ucids(platform, chain, true, false)?;
        Ok(())
    }

    /// Wire the peer link, mics and speaker into the receive chain
    ///
    /// The receive transform is left in `packetiser` so a failure can destroy it.
    fn sco_fwd_rx_connect(&mut self, chain: &mut Chain, request: &ScoFwdRxRequest) -> Result<(), KymeraError> {
        let ota = chain.input(&self.platform, EndpointRole::ScofwdRxOta)?;
        let transform = self
            .platform
            .create_transform(PacketiserKind::ScoReceive, request.link_source, ota)?;
        self.packetiser = Some(transform);
        chain.attach(EndpointRole::ScofwdRxOta)?;

        if chain.id().forwards_mic() {
            let mic_out = chain.output(&self.platform, EndpointRole::MicfwdTxOta)?;
            self.platform.attach_mic(MicForwarding::Send(mic_out))?;
            chain.attach(EndpointRole::MicfwdTxOta)?;
        }

        self.connect_voice_io(chain, SCO_WB_RATE)?;
        chain.connect(&mut self.platform)?;
        Ok(())
    }

    pub(super) fn handle_sco_fwd_rx_stop(&mut self) -> Result<Progress, KymeraError> {
        if self.state != KymeraState::ScoFwdRxActive {
            debug!("[SFWD] Receive stop ignored in {:?}", self.state);
            return Ok(Progress::Ignored);
        }
        self.sco_fwd_rx_teardown();
        info!("[SFWD] Receive stopped");
        Ok(Progress::Done)
    }

    fn sco_fwd_rx_teardown(&mut self) {
        self.tone_prompt_stop();
        if let Some(chain) = self.shared.take() {
            chain.stop(&mut self.platform);
            if let Some(transform) = self.packetiser.take() {
                self.platform.destroy_transform(transform);
            }
            chain.destroy(&mut self.platform);
        }
        self.external_amp(false);
        self.platform.set_mic_bias(false);
        self.output_rate = 0;
        self.set_state(KymeraState::Idle);
        self.refresh_power_mode();
    }
}
