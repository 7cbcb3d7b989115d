//! `Budgie` API Functions
//!
//! This module provides the public API functions for driving the audio session owned by
//! the processor task. They communicate with it through static channels and can be
//! called from any task.
//!
//! Every function returns once the request has been queued, not once it has run. Use a
//! [`ClientLock`] on starts and stops to learn when they finish, or watch
//! [`next_outcome`].
//!
//! # Usage
//!
//! ```rust,ignore
//! use budgie::api::{start, stop, sco_set_volume};
//!
//! start(StartRequest::Sco(request)).await?;
//! sco_set_volume(10).await?;
//! stop(StopRequest::Sco, None).await?;
//! ```

use crate::{
    ClientLock, DSP_EVENT_CHANNEL, DspEvent, KymeraState, MicSelection, OUTCOME_CHANNEL, Outcome,
    REQUEST_CHANNEL, RESPONSE_CHANNEL, Request, Response, StartRequest, StopRequest, ToneRequest,
    error::KymeraError, platform::Sink,
};

async fn submit(request: Request) -> Result<Response, KymeraError> {
    REQUEST_CHANNEL.sender().send(request).await;
    match RESPONSE_CHANNEL.receiver().receive().await {
        Response::Error(e) => Err(e),
        response => Ok(response),
    }
}

async fn submit_accepted(request: Request) -> Result<(), KymeraError> {
    match submit(request).await? {
        Response::Accepted => Ok(()),
        _ => Err(KymeraError::UnexpectedResponse),
    }
}

/// Start a use case.
///
/// # Errors
///
/// Returns an error if the session queue is full.
pub async fn start(request: StartRequest) -> Result<(), KymeraError> {
    submit_accepted(Request::Start(request)).await
}

/// Stop a use case; `client_lock` is cleared once it has stopped.
///
/// # Errors
///
/// Returns an error if the session queue is full.
pub async fn stop(request: StopRequest, client_lock: Option<ClientLock>) -> Result<(), KymeraError> {
    submit_accepted(Request::Stop(request, client_lock)).await
}

/// Play a tone or prompt.
///
/// # Errors
///
/// Returns an error if the session queue is full.
pub async fn play_tone(request: ToneRequest) -> Result<(), KymeraError> {
    start(StartRequest::Tone(request)).await
}

/// Set the A2DP volume (0..=127).
///
/// # Errors
///
/// Returns an error if the session queue is full.
pub async fn a2dp_set_volume(volume: u8) -> Result<(), KymeraError> {
    submit_accepted(Request::A2dpSetVolume(volume)).await
}

/// Set the HFP volume (0..=15).
///
/// # Errors
///
/// Returns an error if the session queue is full.
pub async fn sco_set_volume(volume: u8) -> Result<(), KymeraError> {
    submit_accepted(Request::ScoSetVolume(volume)).await
}

/// Mute or unmute the call mic.
///
/// # Errors
///
/// Returns an error if the session queue is full.
pub async fn sco_mic_mute(mute: bool) -> Result<(), KymeraError> {
    submit_accepted(Request::ScoMicMute(mute)).await
}

/// Forward the active call to the peer.
///
/// # Errors
///
/// Returns an error if the session queue is full.
pub async fn sco_start_forwarding(sink: Sink, mic_forwarding: bool) -> Result<(), KymeraError> {
    submit_accepted(Request::ScoStartForwarding {
        sink,
        mic_forwarding,
    })
    .await
}

/// Stop forwarding the call.
///
/// # Errors
///
/// Returns an error if forwarding could not be stopped or the queue is full.
pub async fn sco_stop_forwarding() -> Result<(), KymeraError> {
    submit_accepted(Request::ScoStopForwarding).await
}

/// Pause or resume call forwarding without rebuilding anything.
///
/// # Errors
///
/// Returns an error if there is no call chain or it was built without forwarding.
pub async fn sco_forwarding_pause(pause: bool) -> Result<(), KymeraError> {
    submit_accepted(Request::ScoForwardingPause(pause)).await
}

/// Select the mic used while the call is forwarded.
///
/// # Errors
///
/// Returns an error if the session queue is full.
pub async fn select_mic(mic: MicSelection) -> Result<(), KymeraError> {
    submit_accepted(Request::SelectMic(mic)).await
}

/// Read the current voice quality.
///
/// # Errors
///
/// Returns an error if the response is unexpected.
pub async fn voice_quality() -> Result<u8, KymeraError> {
    match submit(Request::VoiceQuality).await? {
        Response::VoiceQuality(quality) => Ok(quality),
        _ => Err(KymeraError::UnexpectedResponse),
    }
}

/// Get the current session state.
///
/// # Errors
///
/// Returns an error if the response is unexpected.
pub async fn get_state() -> Result<KymeraState, KymeraError> {
    match submit(Request::GetState).await? {
        Response::State(state) => Ok(state),
        _ => Err(KymeraError::UnexpectedResponse),
    }
}

/// Advance the clock used for delayed requests (DAC power down).
///
/// # Errors
///
/// Returns an error if the response is unexpected.
pub async fn elapsed(elapsed_ms: u32) -> Result<(), KymeraError> {
    submit_accepted(Request::Elapsed(elapsed_ms)).await
}

/// Report a DSP or stream event.
pub async fn dsp_event(event: DspEvent) {
    DSP_EVENT_CHANNEL.sender().send(event).await;
}

/// Wait for the next processed request.
pub async fn next_outcome() -> Outcome {
    OUTCOME_CHANNEL.receiver().receive().await
}
