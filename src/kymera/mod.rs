//! Kymera Session
//!
//! [`Kymera`] owns every DSP chain used for audio and sequences all changes to them.
//! Callers never touch chains directly: they queue start/stop/volume requests, and the
//! owning task calls [`Kymera::step`] (or [`Kymera::run_pending`]) to process whatever
//! has become eligible.
//!
//! ## Architecture
//!
//! * **Queue**: start, stop and parameter requests are queued conditionally on the
//!   session lock. While a start sequence or a non-interruptible tone holds the lock,
//!   they wait. Pre-start delays and A2DP construction phases re-queue themselves.
//! * **Use cases**: A2DP ([`a2dp`](self)), SCO, forwarded SCO receive and tones live in
//!   their own files as separate `impl` blocks over the same session.
//! * **Completion**: every start and stop carries an optional [`ClientLock`] which is
//!   cleared when the request finishes, successfully or not.
//!
//! ## Usage
//!
//! ```rust,ignore
//! let mut kymera = Kymera::new(platform, KymeraOptions::default());
//! kymera.request_start(StartRequest::A2dp(A2dpStartRequest {
//!     settings: A2dpCodecSettings { seid: 2, rate: 44_100, media: Some(media), forwarding_sink: None },
//!     volume: 80,
//!     pre_start_delay: 0,
//!     client_lock: Some(ClientLock::new(&AV_LOCK, 1)),
//! }))?;
//! kymera.run_pending(|outcome| defmt::info!("{}", outcome));
//! ```

mod a2dp;
mod message;
mod sco;
mod sfwd;
mod tones;
mod types;

#[cfg(test)]
mod tests;

pub use message::{Outcome, Progress, RequestKind};
pub use types::{
    A2dpCodecSettings, A2dpStartRequest, ClientLock, DspEvent, MicSelection, PromptFormat,
    ScoCodec, ScoFwdRxRequest, ScoStartRequest, Seid, SeidKind, StartRequest, StopRequest,
    ToneRequest, ToneSource,
};

pub(crate) use message::Message;

use crate::chain::{Chain, ChainRegistry, EndpointRole, SharedChain};
use crate::constants::{LOCK_STARTING, QUEUE_DEPTH};
use crate::error::KymeraError;
use crate::platform::{MicChannel, Platform, Sink, Source, StreamKey, Transform};
use crate::power::dsp_power_mode;
use crate::queue::MessageQueue;
use crate::{KymeraOptions, KymeraState, Request, Response};

/// Tone or prompt currently playing
#[derive(Debug)]
pub(crate) struct ToneSession {
    /// Tone chain; `None` when a PCM prompt feeds the output directly
    chain: Option<Chain>,
    /// Stream feeding the output chain's aux input
    output: Source,
    /// Prompt file, closed when the tone stops
    prompt_source: Option<Source>,
    interruptible: bool,
    client_lock: Option<ClientLock>,
}

/// Audio session: chains, state and the deferred request queue
#[derive(Debug)]
pub struct Kymera<P: Platform> {
    platform: P,
    options: KymeraOptions,
    /// Use case state; a playing tone is tracked separately in `tone`
    state: KymeraState,
    input: Option<Chain>,
    shared: SharedChain,
    tone: Option<ToneSession>,
    packetiser: Option<Transform>,
    output_rate: u32,
    lock: u16,
    a2dp_seid: Option<Seid>,
    mic: MicSelection,
    queue: MessageQueue<Message, QUEUE_DEPTH>,
}

impl<P: Platform> Kymera<P> {
    /// Create an idle session
    #[must_use]
    pub fn new(platform: P, options: KymeraOptions) -> Self {
        debug_assert!(ChainRegistry::validate().is_ok(), "chain templates corrupt");
        info!("[KYMERA] Init");
        Self {
            platform,
            options,
            state: KymeraState::Idle,
            input: None,
            shared: SharedChain::None,
            tone: None,
            packetiser: None,
            output_rate: 0,
            lock: 0,
            a2dp_seid: None,
            mic: MicSelection::Local,
            queue: MessageQueue::new(),
        }
    }

    /// Current state; [`KymeraState::TonePlaying`] while a tone or prompt plays
    #[must_use]
    pub fn state(&self) -> KymeraState {
        if self.tone.is_some() {
            KymeraState::TonePlaying
        } else {
            self.state
        }
    }

    /// Use case state underneath any playing tone
    #[must_use]
    pub fn use_case_state(&self) -> KymeraState {
        self.state
    }

    /// Whether a tone or prompt is playing
    #[must_use]
    pub fn is_tone_playing(&self) -> bool {
        self.tone.is_some()
    }

    /// Sample rate of the output hardware, 0 when idle
    #[must_use]
    pub fn output_rate(&self) -> u32 {
        self.output_rate
    }

    /// Session lock bits
    #[must_use]
    pub fn lock(&self) -> u16 {
        self.lock
    }

    /// Active A2DP stream endpoint
    #[must_use]
    pub fn a2dp_seid(&self) -> Option<Seid> {
        self.a2dp_seid
    }

    /// Mic selected for forwarded calls
    #[must_use]
    pub fn mic_selection(&self) -> MicSelection {
        self.mic
    }

    /// A2DP input chain
    #[must_use]
    pub fn input_chain(&self) -> Option<&Chain> {
        self.input.as_ref()
    }

    /// Output/volume or SCO chain
    #[must_use]
    pub fn shared_chain(&self) -> &SharedChain {
        &self.shared
    }

    /// Tone chain
    #[must_use]
    pub fn tone_chain(&self) -> Option<&Chain> {
        self.tone.as_ref().and_then(|tone| tone.chain.as_ref())
    }

    /// Forwarding transform
    #[must_use]
    pub fn packetiser(&self) -> Option<Transform> {
        self.packetiser
    }

    /// Number of queued requests
    #[must_use]
    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    /// Session options
    #[must_use]
    pub fn options(&self) -> &KymeraOptions {
        &self.options
    }

    /// Platform
    #[must_use]
    pub fn platform(&self) -> &P {
        &self.platform
    }

    /// Mutable platform
    pub fn platform_mut(&mut self) -> &mut P {
        &mut self.platform
    }

    /// Queue a use case start
    ///
    /// The request runs once the session lock is clear. Its client lock, if any, is
    /// cleared when it completes or fails.
    ///
    /// # Errors
    ///
    /// Returns [`KymeraError::QueueFull`] if the request could not be queued; the client
    /// lock is cleared in that case too.
    pub fn request_start(&mut self, request: StartRequest) -> Result<(), KymeraError> {
        let client_lock = request.client_lock();
        let message = match request {
            StartRequest::A2dp(request) => Message::A2dpStart {
                request,
                resent: false,
            },
            StartRequest::Sco(request) => Message::ScoStart {
                request,
                resent: false,
            },
            StartRequest::ScoFwdRx(request) => Message::ScoFwdRxStart {
                request,
                resent: false,
            },
            StartRequest::Tone(request) => Message::TonePlay(request),
        };
        debug!("[KYMERA] Queue {:?}", message.kind());
        if self.queue.push_conditional(message).is_err() {
            error!("[KYMERA] Queue full, start dropped");
            release(client_lock);
            return Err(KymeraError::QueueFull);
        }
        Ok(())
    }

    /// Queue a use case stop
    ///
    /// A start for the same use case that is still waiting in the queue is cancelled
    /// first. If nothing of the use case is running after that, the stop completes
    /// immediately. Stopping an idle use case is a no-op that still clears the lock.
    ///
    /// # Errors
    ///
    /// Returns [`KymeraError::QueueFull`] if the stop could not be queued; the client
    /// lock is cleared in that case too.
    pub fn request_stop(
        &mut self,
        request: StopRequest,
        client_lock: Option<ClientLock>,
    ) -> Result<(), KymeraError> {
        let cancelled = self.cancel_pending_starts(request);
        if cancelled && !self.is_running(request) {
            info!("[KYMERA] {:?} cancelled before starting", request);
            release(client_lock);
            return Ok(());
        }
        let message = match request {
            StopRequest::A2dp { seid, media } => Message::A2dpStop {
                seid,
                media,
                client_lock,
            },
            StopRequest::Sco => Message::ScoStop(client_lock),
            StopRequest::ScoFwdRx => Message::ScoFwdRxStop(client_lock),
            StopRequest::Tone => Message::ToneStop(client_lock),
        };
        self.enqueue(message).inspect_err(|_| release(client_lock))
    }

    /// Queue an A2DP volume change
    ///
    /// # Errors
    ///
    /// Returns [`KymeraError::QueueFull`] if the request could not be queued.
    pub fn a2dp_set_volume(&mut self, volume: u8) -> Result<(), KymeraError> {
        self.enqueue(Message::A2dpSetVolume(volume))
    }

    /// Queue an HFP volume change (0..=15)
    ///
    /// # Errors
    ///
    /// Returns [`KymeraError::QueueFull`] if the request could not be queued.
    pub fn sco_set_volume(&mut self, volume: u8) -> Result<(), KymeraError> {
        self.enqueue(Message::ScoSetVolume(volume))
    }

    /// Queue a mic mute change
    ///
    /// Mute is not held back by the session lock.
    ///
    /// # Errors
    ///
    /// Returns [`KymeraError::QueueFull`] if the request could not be queued.
    pub fn sco_mic_mute(&mut self, mute: bool) -> Result<(), KymeraError> {
        self.queue
            .push(Message::ScoMicMute(mute))
            .map_err(|_| KymeraError::QueueFull)
    }

    /// Queue forwarding of the active call to the peer over `sink`
    ///
    /// # Errors
    ///
    /// Returns [`KymeraError::QueueFull`] if the request could not be queued.
    pub fn sco_start_forwarding(&mut self, sink: Sink, mic_forwarding: bool) -> Result<(), KymeraError> {
        self.enqueue(Message::ScoStartForwarding {
            sink,
            mic_forwarding,
        })
    }

    /// Stop forwarding the call
    ///
    /// Runs at once when forwarding is active and nothing is pending; otherwise queued
    /// behind whatever is in flight.
    ///
    /// # Errors
    ///
    /// Returns an error if the request could not be queued.
    pub fn sco_stop_forwarding(&mut self) -> Result<(), KymeraError> {
        if self.lock == 0 && self.state == KymeraState::ScoActiveWithForwarding {
            return self.handle_sco_stop_forwarding().map(|_| ());
        }
        self.enqueue(Message::ScoStopForwarding)
    }

    /// Use this device's mic for the forwarded call
    ///
    /// # Errors
    ///
    /// Returns [`KymeraError::QueueFull`] if the request could not be queued.
    pub fn sco_use_local_mic(&mut self) -> Result<(), KymeraError> {
        self.enqueue(Message::MicSelect(MicSelection::Local))
    }

    /// Use the peer's mic for the forwarded call
    ///
    /// # Errors
    ///
    /// Returns [`KymeraError::QueueFull`] if the request could not be queued.
    pub fn sco_use_remote_mic(&mut self) -> Result<(), KymeraError> {
        self.enqueue(Message::MicSelect(MicSelection::Remote))
    }

    /// Queue a tone or prompt
    ///
    /// # Errors
    ///
    /// Returns [`KymeraError::QueueFull`] if the request could not be queued.
    pub fn tone_play(&mut self, request: ToneRequest) -> Result<(), KymeraError> {
        self.request_start(StartRequest::Tone(request))
    }

    /// Apply a request received from the async front-end
    pub(crate) fn submit(&mut self, request: Request) -> Response {
        let result = match request {
            Request::Start(start) => self.request_start(start),
            Request::Stop(stop, client_lock) => self.request_stop(stop, client_lock),
            Request::A2dpSetVolume(volume) => self.a2dp_set_volume(volume),
            Request::ScoSetVolume(volume) => self.sco_set_volume(volume),
            Request::ScoMicMute(mute) => self.sco_mic_mute(mute),
            Request::ScoStartForwarding {
                sink,
                mic_forwarding,
            } => self.sco_start_forwarding(sink, mic_forwarding),
            Request::ScoStopForwarding => self.sco_stop_forwarding(),
            Request::ScoForwardingPause(pause) => self.sco_forwarding_pause(pause),
            Request::SelectMic(MicSelection::Local) => self.sco_use_local_mic(),
            Request::SelectMic(MicSelection::Remote) => self.sco_use_remote_mic(),
            Request::VoiceQuality => return Response::VoiceQuality(self.sco_voice_quality()),
            Request::GetState => return Response::State(self.state()),
            Request::Elapsed(elapsed_ms) => {
                self.elapse(elapsed_ms);
                Ok(())
            }
        };
        match result {
            Ok(()) => Response::Accepted,
            Err(e) => Response::Error(e),
        }
    }

    /// React to a DSP or stream event
    pub fn handle_dsp_event(&mut self, event: DspEvent) {
        match event {
            DspEvent::ToneEnd => {
                debug!("[TONE] Tone end");
                self.tone_prompt_stop();
            }
            DspEvent::StreamDisconnected(source) => {
                let prompt = self.tone.as_ref().and_then(|tone| tone.prompt_source);
                if prompt == Some(source) {
                    debug!("[TONE] Prompt source exhausted");
                    self.tone_prompt_stop();
                }
            }
        }
    }

    /// Advance the clock used for delayed requests
    pub fn elapse(&mut self, elapsed_ms: u32) {
        self.queue.advance(elapsed_ms);
    }

    /// Process the oldest eligible request
    ///
    /// Returns `None` when nothing can run.
    pub fn step(&mut self) -> Option<Outcome> {
        let message = self.queue.pop_eligible(self.lock)?;
        let kind = message.kind();
        trace!("[QUEUE] Processing {:?}", kind);
        let result = match message {
            Message::A2dpStart { request, .. } => self.handle_a2dp_start(request),
            Message::A2dpStarting(request) => self.handle_a2dp_starting(request),
            Message::A2dpStop {
                seid,
                media,
                client_lock,
            } => signal(client_lock, self.handle_a2dp_stop(seid, media)),
            Message::A2dpSetVolume(volume) => self.handle_a2dp_set_volume(volume),
            Message::ScoStart { request, .. } => self.handle_sco_start(request),
            Message::ScoStop(client_lock) => signal(client_lock, self.handle_sco_stop()),
            Message::ScoSetVolume(volume) => self.handle_sco_set_volume(volume),
            Message::ScoMicMute(mute) => self.handle_sco_mic_mute(mute),
            Message::ScoStartForwarding {
                sink,
                mic_forwarding,
            } => self.handle_sco_start_forwarding(sink, mic_forwarding),
            Message::ScoStopForwarding => self.handle_sco_stop_forwarding(),
            Message::ScoFwdRxStart { request, .. } => self.handle_sco_fwd_rx_start(request),
            Message::ScoFwdRxStop(client_lock) => {
                signal(client_lock, self.handle_sco_fwd_rx_stop())
            }
            Message::MicSelect(mic) => self.handle_mic_select(mic),
            Message::TonePlay(request) => self.handle_tone_play(request),
            Message::ToneStop(client_lock) => {
                self.tone_prompt_stop();
                signal(client_lock, Ok(Progress::Done))
            }
            Message::AudioSubsystemDisable => {
                debug!("[KYMERA] Audio subsystem off");
                self.platform.set_audio_subsystem(false);
                Ok(Progress::Done)
            }
        };
        if let Err(e) = &result {
            warn!("[KYMERA] {:?} failed: {}", kind, e);
        }
        Some(Outcome { kind, result })
    }

    /// Process requests until none is eligible, reporting each outcome
    ///
    /// Returns the number of steps taken.
    pub fn run_pending(&mut self, mut on_outcome: impl FnMut(&Outcome)) -> usize {
        let mut steps = 0;
        while let Some(outcome) = self.step() {
            on_outcome(&outcome);
            steps += 1;
        }
        steps
    }

    fn enqueue(&mut self, message: Message) -> Result<(), KymeraError> {
        trace!("[QUEUE] Queue {:?}", message.kind());
        self.queue
            .push_conditional(message)
            .map_err(|_| KymeraError::QueueFull)
    }

    /// Remove queued starts of the use case `request` stops
    fn cancel_pending_starts(&mut self, request: StopRequest) -> bool {
        let mut cancelled = false;
        while let Some(message) = self.queue.cancel_first(|message| is_start_of(message, request)) {
            let (resent, client_lock) = match message {
                Message::A2dpStart { request, resent } => (resent, request.client_lock),
                Message::ScoStart { request, resent } => (resent, request.client_lock),
                Message::ScoFwdRxStart { request, resent } => (resent, request.client_lock),
                Message::TonePlay(request) => (false, request.client_lock),
                _ => (false, None),
            };
            if resent {
                self.lock &= !LOCK_STARTING;
            }
            release(client_lock);
            cancelled = true;
        }
        cancelled
    }

    /// Whether anything of the use case `request` stops is built or being built
    fn is_running(&self, request: StopRequest) -> bool {
        match request {
            StopRequest::A2dp { seid, .. } => match Seid::from_raw(seid).map(Seid::kind) {
                Some(SeidKind::Source) => self.state == KymeraState::A2dpStreamingWithForwarding,
                _ => {
                    self.state.is_a2dp()
                        || self
                            .queue
                            .contains(|message| matches!(message, Message::A2dpStarting(_)))
                }
            },
            StopRequest::Sco => matches!(
                self.state,
                KymeraState::ScoActive | KymeraState::ScoActiveWithForwarding
            ),
            StopRequest::ScoFwdRx => self.state == KymeraState::ScoFwdRxActive,
            StopRequest::Tone => self.tone.is_some(),
        }
    }

    /// Re-queue a start that still has pre-start delay to wait out
    ///
    /// The STARTING lock keeps conditional requests behind it until it runs.
    fn defer_start(
        &mut self,
        message: Message,
        client_lock: Option<ClientLock>,
    ) -> Result<Progress, KymeraError> {
        self.lock |= LOCK_STARTING;
        if self.queue.push(message).is_err() {
            return self.finish_start(client_lock, Err(KymeraError::QueueFull));
        }
        Ok(Progress::Deferred)
    }

    /// End a start sequence: release the STARTING lock and signal the caller
    fn finish_start(
        &mut self,
        client_lock: Option<ClientLock>,
        result: Result<Progress, KymeraError>,
    ) -> Result<Progress, KymeraError> {
        self.lock &= !LOCK_STARTING;
        release(client_lock);
        result
    }

    fn set_state(&mut self, state: KymeraState) {
        debug!("[KYMERA] {:?} -> {:?}", self.state, state);
        self.state = state;
    }

    /// Apply the power mode for the current state
    fn apply_power_mode(&mut self) -> Result<(), KymeraError> {
        let mode = dsp_power_mode(self.state, self.tone.is_some(), self.a2dp_seid);
        trace!("[KYMERA] Power mode {:?}", mode);
        self.platform.set_power_mode(mode)?;
        Ok(())
    }

    /// Apply the power mode during teardown, where failure is only logged
    fn refresh_power_mode(&mut self) {
        if let Err(e) = self.apply_power_mode() {
            warn!("[KYMERA] Power mode change failed: {}", e);
        }
    }

    /// Switch the external amplifier
    ///
    /// Turning it off schedules the audio subsystem power down after the DAC
    /// disconnection delay; turning it on again in the meantime cancels that.
    fn external_amp(&mut self, enable: bool) {
        self.platform.set_external_amp(enable);
        if enable {
            let pending = self
                .queue
                .cancel_first(|message| matches!(message, Message::AudioSubsystemDisable));
            if pending.is_none() {
                self.platform.set_audio_subsystem(true);
            }
        } else if self
            .queue
            .push_later(
                Message::AudioSubsystemDisable,
                self.options.dac_disconnection_delay_ms,
            )
            .is_err()
        {
            warn!("[KYMERA] Queue full, audio subsystem off now");
            self.platform.set_audio_subsystem(false);
        }
    }

    /// Open and configure a mic for voice
    fn voice_mic(&mut self, channel: MicChannel, rate: u32) -> Result<Source, KymeraError> {
        let mic = self.platform.mic_source(channel)?;
        self.platform
            .configure_source(mic, StreamKey::CodecInputRate, rate)?;
        self.platform
            .configure_source(mic, StreamKey::CodecInputGain, self.options.mic_gain)?;
        Ok(mic)
    }

    /// Wire mics and speaker into a voice chain
    fn connect_voice_io(&mut self, chain: &mut Chain, rate: u32) -> Result<(), KymeraError> {
        let mic1 = self.voice_mic(MicChannel::A, rate)?;
        if chain.id().two_mic() {
            let mic2 = self.voice_mic(MicChannel::B, rate)?;
            self.platform.synchronise(mic1, mic2)?;
            chain.connect_input(&mut self.platform, EndpointRole::ScoMic2, mic2)?;
        }
        chain.connect_input(&mut self.platform, EndpointRole::ScoMic1, mic1)?;
        let speaker = self.speaker(rate)?;
        chain.connect_output(&mut self.platform, EndpointRole::ScoSpeaker, speaker)?;
        Ok(())
    }

    /// Open and configure the DAC
    fn speaker(&mut self, rate: u32) -> Result<Sink, KymeraError> {
        let speaker = self.platform.speaker_sink()?;
        self.platform
            .configure_sink(speaker, StreamKey::CodecOutputRate, rate)?;
        Ok(speaker)
    }

    /// Destroy the shared chain, stopping it first
    fn destroy_shared_chain(&mut self) {
        if let Some(chain) = self.shared.take() {
            chain.stop(&mut self.platform);
            chain.destroy(&mut self.platform);
        }
    }
}

fn release(client_lock: Option<ClientLock>) {
    if let Some(lock) = client_lock {
        lock.release();
    }
}

fn signal(
    client_lock: Option<ClientLock>,
    result: Result<Progress, KymeraError>,
) -> Result<Progress, KymeraError> {
    release(client_lock);
    result
}

fn is_start_of(message: &Message, request: StopRequest) -> bool {
    match (message, request) {
        (Message::A2dpStart { request, .. }, StopRequest::A2dp { seid, .. }) => {
            let forwarding = |raw| Seid::from_raw(raw).map(Seid::kind) == Some(SeidKind::Source);
            forwarding(request.settings.seid) == forwarding(seid)
        }
        (Message::ScoStart { .. }, StopRequest::Sco)
        | (Message::ScoFwdRxStart { .. }, StopRequest::ScoFwdRx)
        | (Message::TonePlay(_), StopRequest::Tone) => true,
        _ => false,
    }
}
