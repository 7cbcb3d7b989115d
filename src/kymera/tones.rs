//! Tones and voice prompts
//!
//! A tone is mixed into the aux input of whichever chain drives the speaker. With no
//! use case active, an output chain is created at the tone's rate just for the tone and
//! destroyed with it.

use super::{Kymera, Progress, ToneRequest, ToneSession, ToneSource, release};
use crate::KymeraState;
use crate::chain::{Chain, ChainId, EndpointRole, OperatorRole, SharedChain};
use crate::configure;
use crate::constants::{KICK_PERIOD_TONES, LOCK_TONE};
use crate::error::{ConfigurationError, KymeraError};
use crate::platform::{OperatorMessage, Platform, Source};

impl<P: Platform> Kymera<P> {
    pub(super) fn handle_tone_play(&mut self, request: ToneRequest) -> Result<Progress, KymeraError> {
        let result = self.tone_start(&request);
        if let Err(e) = &result {
            error!("[TONE] Failed to play: {}", e);
            release(request.client_lock);
        }
        result
    }

    fn tone_start(&mut self, request: &ToneRequest) -> Result<Progress, KymeraError> {
        self.tone_prompt_stop();
        if matches!(
            self.state,
            KymeraState::A2dpStartingA | KymeraState::A2dpStartingB | KymeraState::A2dpStartingC
        ) {
            return Err(KymeraError::InvalidState(self.state));
        }
        if self.state == KymeraState::Idle {
            self.shared.ensure_vacant()?;
            self.tone_build_output(request.rate)?;
        }
        let session = match self.tone_open(request) {
            Ok(session) => session,
            Err(e) => {
                self.tone_release_output();
                return Err(e);
            }
        };
        self.tone = Some(session);
        if let Err(e) = self.tone_run() {
            self.tone_prompt_stop();
            return Err(e);
        }
        if !request.interruptible {
            self.lock |= LOCK_TONE;
        }
        info!("[TONE] Playing at {} Hz, output {} Hz", request.rate, self.output_rate);
        Ok(Progress::Done)
    }

    /// Output chain owned by the tone, used when nothing else drives the speaker
    fn tone_build_output(&mut self, rate: u32) -> Result<(), KymeraError> {
        let mut chain = Chain::build(&mut self.platform, ChainId::for_output(self.options.output_peq))?;
        if let Err(e) = self.tone_configure_output(&mut chain, rate) {
            chain.destroy(&mut self.platform);
            return Err(e);
        }
        self.shared.install(SharedChain::OutputVolume(chain));
        self.external_amp(true);
        self.output_rate = rate;
        Ok(())
    }

    fn tone_configure_output(&mut self, chain: &mut Chain, rate: u32) -> Result<(), KymeraError> {
        configure::configure_output_chain(
            &mut self.platform,
            chain,
            &self.options.volume_range,
            rate,
            KICK_PERIOD_TONES,
            self.options.tone_volume,
        )?;
        configure::set_operator_ucids(&mut self.platform, chain, false, false)?;
        let speaker = self.speaker(rate)?;
        chain.connect_output(&mut self.platform, EndpointRole::SourceMixerOut, speaker)?;
        chain.connect(&mut self.platform)?;
        Ok(())
    }

    /// Destroy the output chain if the tone owned it
    fn tone_release_output(&mut self) {
        if self.state == KymeraState::Idle && !self.shared.is_vacant() {
            self.destroy_shared_chain();
            self.external_amp(false);
            self.output_rate = 0;
        }
    }

    /// Open the prompt file and build the tone chain, if one is needed
    fn tone_open(&mut self, request: &ToneRequest) -> Result<ToneSession, KymeraError> {
        let prompt_source = match request.source {
            ToneSource::Tone(_) => None,
            ToneSource::SbcPrompt(prompt) | ToneSource::PcmPrompt(prompt) => {
                Some(self.platform.prompt_source(prompt)?)
            }
        };
        let resample = request.rate != self.output_rate;
        let (chain, output) = match (ChainId::for_tone(&request.source, resample), prompt_source) {
            (Some(id), _) => match self.tone_build_chain(id, request, prompt_source) {
                Ok((chain, output)) => (Some(chain), output),
                Err(e) => {
                    if let Some(source) = prompt_source {
                        self.platform.close_source(source);
                    }
                    return Err(e);
                }
            },
            (None, Some(source)) => (None, source),
            (None, None) => return Err(ConfigurationError::MissingMediaEndpoint.into()),
        };
        Ok(ToneSession {
            chain,
            output,
            prompt_source,
            interruptible: request.interruptible,
            client_lock: request.client_lock,
        })
    }

    fn tone_build_chain(
        &mut self,
        id: ChainId,
        request: &ToneRequest,
        prompt_source: Option<Source>,
    ) -> Result<(Chain, Source), KymeraError> {
        debug!("[TONE] Building {:?}", id);
        let mut chain = Chain::build(&mut self.platform, id)?;
        match self.tone_configure(&mut chain, request, prompt_source) {
            Ok(output) => Ok((chain, output)),
            Err(e) => {
                chain.destroy(&mut self.platform);
                Err(e)
            }
        }
    }

    fn tone_configure(
        &mut self,
        chain: &mut Chain,
        request: &ToneRequest,
        prompt_source: Option<Source>,
    ) -> Result<Source, KymeraError> {
        let platform = &mut self.platform;
        if chain.template().has_operator(OperatorRole::TonePromptResampler) {
            configure::send(
                platform,
                chain,
                OperatorRole::TonePromptResampler,
                OperatorMessage::ResamplerConversion {
                    from: request.rate,
                    to: self.output_rate,
                },
            )?;
        }
        if let ToneSource::Tone(notes) = request.source {
            configure::set_operator_sample_rate(platform, chain, OperatorRole::ToneGen, request.rate)?;
            configure::send(platform, chain, OperatorRole::ToneGen, OperatorMessage::ToneSequence(notes))?;
        }
        if let Some(source) = prompt_source {
            chain.connect_input(platform, EndpointRole::PromptIn, source)?;
        }
        chain.connect(platform)?;
        Ok(chain.output(platform, EndpointRole::TonePromptChainOut)?)
    }

    /// Mix the installed tone into the shared chain and start everything
    fn tone_run(&mut self) -> Result<(), KymeraError> {
        let tone = self.tone.as_mut().ok_or(KymeraError::NoChain)?;
        let shared = self.shared.any_mut().ok_or(KymeraError::NoChain)?;
        configure::send(
            &mut self.platform,
            shared,
            OperatorRole::VolumeControl,
            OperatorMessage::AuxGain(self.options.volume_range.gain(self.options.tone_volume)),
        )?;
        let aux = shared.input(&self.platform, EndpointRole::VolumeAux)?;
        self.platform.connect(tone.output, aux)?;
        shared.attach(EndpointRole::VolumeAux)?;
        if let Some(chain) = tone.chain.as_mut() {
            chain.attach(EndpointRole::TonePromptChainOut)?;
            chain.start(&mut self.platform)?;
        }
        if self.state == KymeraState::Idle {
            shared.start(&mut self.platform)?;
        }
        self.apply_power_mode()
    }

    /// Stop the playing tone or prompt and release its client lock
    ///
    /// Does nothing when no tone is playing.
    pub(super) fn tone_prompt_stop(&mut self) {
        let Some(tone) = self.tone.take() else {
            return;
        };
        debug!("[TONE] Stop");
        self.platform.disconnect(Some(tone.output), None);
        if let Some(source) = tone.prompt_source {
            self.platform.close_source(source);
        }
        if let Some(chain) = tone.chain {
            chain.stop(&mut self.platform);
            chain.destroy(&mut self.platform);
        }
        if let Some(shared) = self.shared.any_mut() {
            shared.detach(EndpointRole::VolumeAux);
        }
        self.tone_release_output();
        self.lock &= !LOCK_TONE;
        self.refresh_power_mode();
        release(tone.client_lock);
    }
}
