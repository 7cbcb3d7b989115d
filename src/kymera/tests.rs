use super::*;
use crate::VoiceQualityConfig;
use crate::chain::{ChainId, MicCount, OperatorRole, ScoForwarding};
use crate::configure::mono_pcm_buffer_size;
use crate::constants::{AEC_TERMINAL_BUFFER_MS, LOCK_STARTING, LOCK_TONE, SFWD_TTP_DELAY_US};
use crate::error::{ConfigurationError, PlatformError};
use crate::platform::{MicForwarding, OperatorMessage, PacketiserKind, PromptId, RingtoneNote, SpcMode};
use crate::power::DspPowerMode;
use crate::testing::{MIC_A, MIC_B, MockPlatform, SPEAKER, client_lock};
use crate::volume::{hfp_to_logical, volume_to_gain};
use core::sync::atomic::Ordering;
use std::vec::Vec;

const MEDIA: Source = Source(0x0010);
const SCO_LINK: Sink = Sink(0x0020);
const PEER_SINK: Sink = Sink(0x0030);
const PEER_SOURCE: Source = Source(0x0031);

static BEEP: [RingtoneNote; 2] = [RingtoneNote(0x0440), RingtoneNote(0x0880)];

fn session() -> Kymera<MockPlatform> {
    session_with(KymeraOptions::default())
}

fn session_with(options: KymeraOptions) -> Kymera<MockPlatform> {
    Kymera::new(MockPlatform::new(), options)
}

fn a2dp(seid: u8, rate: u32, volume: u8) -> A2dpStartRequest {
    A2dpStartRequest {
        settings: A2dpCodecSettings {
            seid,
            rate,
            media: Some(MEDIA),
            forwarding_sink: None,
        },
        volume,
        pre_start_delay: 0,
        client_lock: None,
    }
}

fn sco(codec: ScoCodec) -> ScoStartRequest {
    ScoStartRequest {
        sink: SCO_LINK,
        codec,
        wesco: 0,
        volume: 10,
        pre_start_delay: 0,
        allow_forwarding: false,
        client_lock: None,
    }
}

fn sco_fwd_rx(mic_forwarding: bool) -> ScoFwdRxRequest {
    ScoFwdRxRequest {
        link_source: PEER_SOURCE,
        volume: 10,
        mic_forwarding,
        pre_start_delay: 0,
        client_lock: None,
    }
}

fn outcomes(kymera: &mut Kymera<MockPlatform>) -> Vec<Outcome> {
    let mut results = Vec::new();
    kymera.run_pending(|outcome| results.push(*outcome));
    results
}

fn streaming(seid: u8) -> Kymera<MockPlatform> {
    let mut kymera = session();
    kymera.request_start(StartRequest::A2dp(a2dp(seid, 44_100, 80))).unwrap();
    outcomes(&mut kymera);
    assert_eq!(kymera.state(), KymeraState::A2dpStreaming);
    kymera
}

fn sco_active(options: KymeraOptions, request: ScoStartRequest) -> Kymera<MockPlatform> {
    let mut kymera = session_with(options);
    kymera.request_start(StartRequest::Sco(request)).unwrap();
    let results = outcomes(&mut kymera);
    assert_eq!(results[0].result, Ok(Progress::Done));
    kymera
}

#[test]
fn test_a2dp_start_runs_three_phases() {
    let mut kymera = session();
    let (lock, word) = client_lock(1);
    kymera
        .request_start(StartRequest::A2dp(A2dpStartRequest {
            client_lock: Some(lock),
            ..a2dp(Seid::AacSink.raw(), 44_100, 80)
        }))
        .unwrap();

    let first = kymera.step().unwrap();
    assert_eq!(first.kind, RequestKind::A2dpStart);
    assert_eq!(first.result, Ok(Progress::Deferred));
    assert_eq!(kymera.state(), KymeraState::A2dpStartingA);
    assert_ne!(kymera.lock() & LOCK_STARTING, 0);
    assert_eq!(word.load(Ordering::Acquire), 1);

    let rest = outcomes(&mut kymera);
    assert_eq!(rest.len(), 3);
    assert!(rest.iter().all(|outcome| outcome.kind == RequestKind::A2dpStarting));
    assert_eq!(rest[2].result, Ok(Progress::Done));

    assert_eq!(kymera.state(), KymeraState::A2dpStreaming);
    assert_eq!(kymera.output_rate(), 44_100);
    assert_eq!(kymera.lock(), 0);
    assert_eq!(word.load(Ordering::Acquire), 0);
    assert_eq!(kymera.a2dp_seid(), Some(Seid::AacSink));

    let platform = kymera.platform();
    assert_eq!(platform.started_chains(), 2);
    let output = kymera.shared_chain().output_volume().unwrap();
    assert!(platform
        .messages_to(output, OperatorRole::VolumeControl)
        .contains(&OperatorMessage::MainGain(volume_to_gain(80))));
    let input = kymera.input_chain().unwrap();
    assert_eq!(input.id(), ChainId::InputAacStereo);
    assert!(platform.is_connected(MEDIA, input.input(platform, EndpointRole::SinkMedia).unwrap()));
    assert_eq!(platform.stream_value(SPEAKER.0, crate::platform::StreamKey::CodecOutputRate), Some(44_100));
    assert!(platform.external_amp);
    assert!(platform.audio_subsystem);
    assert_eq!(platform.power_modes.last(), Some(&DspPowerMode::LOW_POWER));
}

#[test]
fn test_volume_waits_for_start_to_finish() {
    let mut kymera = session();
    kymera.request_start(StartRequest::A2dp(a2dp(Seid::SbcSink.raw(), 48_000, 40))).unwrap();
    kymera.a2dp_set_volume(100).unwrap();

    let kinds: Vec<RequestKind> = outcomes(&mut kymera).iter().map(|outcome| outcome.kind).collect();
    assert_eq!(
        kinds,
        [
            RequestKind::A2dpStart,
            RequestKind::A2dpStarting,
            RequestKind::A2dpStarting,
            RequestKind::A2dpStarting,
            RequestKind::A2dpSetVolume,
        ]
    );
    let output = kymera.shared_chain().output_volume().unwrap();
    let gains = kymera.platform().messages_to(output, OperatorRole::VolumeControl);
    assert_eq!(gains.last(), Some(&OperatorMessage::AuxGain(volume_to_gain(100))));
}

#[test]
fn test_pre_start_delay_is_waited_out() {
    let mut kymera = session();
    kymera
        .request_start(StartRequest::A2dp(A2dpStartRequest {
            pre_start_delay: 3,
            ..a2dp(Seid::SbcSink.raw(), 44_100, 80)
        }))
        .unwrap();

    for _ in 0..3 {
        let outcome = kymera.step().unwrap();
        assert_eq!(outcome.kind, RequestKind::A2dpStart);
        assert_eq!(outcome.result, Ok(Progress::Deferred));
        assert_eq!(kymera.state(), KymeraState::Idle);
        assert_ne!(kymera.lock() & LOCK_STARTING, 0);
        assert_eq!(kymera.platform().live_chains(), 0);
    }
    kymera.step().unwrap();
    assert_eq!(kymera.state(), KymeraState::A2dpStartingA);
}

#[test]
fn test_unsupported_a2dp_start_touches_nothing() {
    let mut kymera = session();
    let (lock, word) = client_lock(1);
    kymera
        .request_start(StartRequest::A2dp(A2dpStartRequest {
            client_lock: Some(lock),
            ..a2dp(Seid::SbcSink.raw(), 22_050, 80)
        }))
        .unwrap();
    let outcome = kymera.step().unwrap();
    assert_eq!(
        outcome.result,
        Err(KymeraError::Configuration(ConfigurationError::UnsupportedRate(22_050)))
    );
    assert_eq!(word.load(Ordering::Acquire), 0);

    kymera.request_start(StartRequest::A2dp(a2dp(0x42, 44_100, 80))).unwrap();
    let outcome = kymera.step().unwrap();
    assert_eq!(
        outcome.result,
        Err(KymeraError::Configuration(ConfigurationError::UnsupportedSeid(0x42)))
    );

    assert_eq!(kymera.state(), KymeraState::Idle);
    assert_eq!(kymera.lock(), 0);
    assert_eq!(kymera.platform().live_chains(), 0);
    assert!(kymera.platform().messages.is_empty());
}

#[test]
fn test_stop_when_idle_is_noop() {
    let mut kymera = session();
    let (lock, word) = client_lock(4);
    kymera.request_stop(StopRequest::Sco, Some(lock)).unwrap();
    let outcome = kymera.step().unwrap();
    assert_eq!(outcome.result, Ok(Progress::Ignored));
    assert_eq!(word.load(Ordering::Acquire), 0);

    let (lock, word) = client_lock(2);
    kymera
        .request_stop(
            StopRequest::A2dp {
                seid: Seid::SbcSink.raw(),
                media: None,
            },
            Some(lock),
        )
        .unwrap();
    let outcome = kymera.step().unwrap();
    assert_eq!(outcome.result, Ok(Progress::Ignored));
    assert_eq!(word.load(Ordering::Acquire), 0);
    assert_eq!(kymera.state(), KymeraState::Idle);
    assert_eq!(kymera.platform().live_chains(), 0);
}

#[test]
fn test_stop_cancels_queued_start() {
    let mut kymera = session();
    let (start_lock, start_word) = client_lock(1);
    let (stop_lock, stop_word) = client_lock(2);
    kymera
        .request_start(StartRequest::ScoFwdRx(ScoFwdRxRequest {
            client_lock: Some(start_lock),
            ..sco_fwd_rx(false)
        }))
        .unwrap();
    kymera.request_stop(StopRequest::ScoFwdRx, Some(stop_lock)).unwrap();

    assert_eq!(start_word.load(Ordering::Acquire), 0);
    assert_eq!(stop_word.load(Ordering::Acquire), 0);
    assert_eq!(kymera.pending(), 0);
    assert_eq!(kymera.run_pending(|_| {}), 0);
    assert_eq!(kymera.state(), KymeraState::Idle);
    assert_eq!(kymera.platform().live_chains(), 0);
}

#[test]
fn test_stop_cancels_start_waiting_out_delay() {
    let mut kymera = session();
    let (lock, word) = client_lock(1);
    kymera
        .request_start(StartRequest::A2dp(A2dpStartRequest {
            pre_start_delay: 2,
            client_lock: Some(lock),
            ..a2dp(Seid::SbcSink.raw(), 44_100, 80)
        }))
        .unwrap();
    kymera.step().unwrap();
    assert_ne!(kymera.lock() & LOCK_STARTING, 0);

    kymera
        .request_stop(
            StopRequest::A2dp {
                seid: Seid::SbcSink.raw(),
                media: Some(MEDIA),
            },
            None,
        )
        .unwrap();
    assert_eq!(kymera.lock(), 0);
    assert_eq!(word.load(Ordering::Acquire), 0);
    assert_eq!(kymera.pending(), 0);
    assert_eq!(kymera.state(), KymeraState::Idle);
}

#[test]
fn test_a2dp_stop_tears_down() {
    let mut kymera = streaming(Seid::SbcSink.raw());
    let (lock, word) = client_lock(1);
    kymera
        .request_stop(
            StopRequest::A2dp {
                seid: Seid::SbcSink.raw(),
                media: Some(MEDIA),
            },
            Some(lock),
        )
        .unwrap();
    let outcome = kymera.step().unwrap();
    assert_eq!(outcome.kind, RequestKind::A2dpStop);
    assert_eq!(outcome.result, Ok(Progress::Done));
    assert_eq!(word.load(Ordering::Acquire), 0);
    assert_eq!(kymera.state(), KymeraState::Idle);
    assert_eq!(kymera.output_rate(), 0);
    assert!(kymera.shared_chain().is_vacant());
    assert!(kymera.input_chain().is_none());
    assert_eq!(kymera.platform().live_chains(), 0);
    assert!(kymera.platform().connections.iter().all(|(source, _)| *source != MEDIA));
    assert!(!kymera.platform().external_amp);
}

#[test]
fn test_tws_sink_receives_through_packetiser() {
    let mut kymera = streaming(Seid::SbcMonoTwsSink.raw());
    let input = kymera.input_chain().unwrap();
    assert_eq!(input.id(), ChainId::InputTwsSbcMono);
    let platform = kymera.platform();
    assert_eq!(platform.transforms.len(), 1);
    assert_eq!(platform.transforms[0].1, PacketiserKind::A2dpReceive);
    assert_eq!(platform.transforms[0].2, MEDIA);
    assert!(kymera.packetiser().is_some());

    kymera
        .request_stop(
            StopRequest::A2dp {
                seid: Seid::SbcMonoTwsSink.raw(),
                media: None,
            },
            None,
        )
        .unwrap();
    kymera.step().unwrap();
    assert!(kymera.platform().transforms.is_empty());
    assert!(kymera.packetiser().is_none());
}

#[test]
fn test_a2dp_forwarding_on_and_off() {
    let mut kymera = session_with(KymeraOptions {
        a2dp_forwarding: true,
        ..KymeraOptions::default()
    });
    kymera.request_start(StartRequest::A2dp(a2dp(Seid::SbcSink.raw(), 44_100, 80))).unwrap();
    outcomes(&mut kymera);
    assert_eq!(kymera.input_chain().map(Chain::id), Some(ChainId::InputSbcForwarding));

    let forward = A2dpStartRequest {
        settings: A2dpCodecSettings {
            seid: Seid::SbcMonoTwsSource.raw(),
            rate: 44_100,
            media: None,
            forwarding_sink: Some(PEER_SINK),
        },
        ..a2dp(Seid::SbcMonoTwsSource.raw(), 44_100, 80)
    };
    kymera.request_start(StartRequest::A2dp(forward)).unwrap();
    assert_eq!(kymera.step().unwrap().result, Ok(Progress::Done));
    assert_eq!(kymera.state(), KymeraState::A2dpStreamingWithForwarding);
    let platform = kymera.platform();
    assert_eq!(platform.transforms.len(), 1);
    assert_eq!(platform.transforms[0].1, PacketiserKind::A2dpTransmit);
    assert_eq!(platform.transforms[0].3, PEER_SINK);
    let input = kymera.input_chain().unwrap();
    assert_eq!(
        platform.messages_to(input, OperatorRole::SwitchedPassthroughConsumer).last(),
        Some(&OperatorMessage::SpcMode(SpcMode::Passthrough))
    );

    kymera.request_start(StartRequest::A2dp(forward)).unwrap();
    assert_eq!(kymera.step().unwrap().result, Ok(Progress::Ignored));

    kymera
        .request_stop(
            StopRequest::A2dp {
                seid: Seid::SbcMonoTwsSource.raw(),
                media: None,
            },
            None,
        )
        .unwrap();
    assert_eq!(kymera.step().unwrap().result, Ok(Progress::Done));
    assert_eq!(kymera.state(), KymeraState::A2dpStreaming);
    assert!(kymera.platform().transforms.is_empty());
    assert_eq!(kymera.platform().live_chains(), 2);
}

#[test]
fn test_a2dp_forwarding_needs_a_stream() {
    let mut kymera = session();
    let mut forward = a2dp(Seid::AacStereoTwsSource.raw(), 44_100, 80);
    forward.settings.forwarding_sink = Some(PEER_SINK);
    kymera.request_start(StartRequest::A2dp(forward)).unwrap();
    assert_eq!(
        kymera.step().unwrap().result,
        Err(KymeraError::InvalidState(KymeraState::Idle))
    );

    let mut kymera = streaming(Seid::SbcSink.raw());
    kymera.request_start(StartRequest::A2dp(forward)).unwrap();
    assert_eq!(
        kymera.step().unwrap().result,
        Err(KymeraError::Configuration(ConfigurationError::ForwardingUnavailable))
    );
    assert_eq!(kymera.state(), KymeraState::A2dpStreaming);
    assert!(kymera.platform().transforms.is_empty());
}

#[test]
fn test_a2dp_forwarding_rejected_while_receiving_sco() {
    let mut kymera = session();
    kymera.request_start(StartRequest::ScoFwdRx(sco_fwd_rx(false))).unwrap();
    kymera.step().unwrap();
    let transforms = kymera.platform().transforms.len();

    let mut forward = a2dp(Seid::SbcMonoTwsSource.raw(), 44_100, 80);
    forward.settings.forwarding_sink = Some(PEER_SINK);
    kymera.request_start(StartRequest::A2dp(forward)).unwrap();
    assert_eq!(
        kymera.step().unwrap().result,
        Err(KymeraError::InvalidState(KymeraState::ScoFwdRxActive))
    );
    assert_eq!(kymera.state(), KymeraState::ScoFwdRxActive);
    assert_eq!(kymera.platform().transforms.len(), transforms);
}

#[test]
fn test_conflicting_start_rejected_without_side_effects() {
    let mut kymera = sco_active(KymeraOptions::default(), sco(ScoCodec::Msbc));
    let messages = kymera.platform().messages.len();
    let (lock, word) = client_lock(1);
    kymera
        .request_start(StartRequest::A2dp(A2dpStartRequest {
            client_lock: Some(lock),
            ..a2dp(Seid::SbcSink.raw(), 44_100, 80)
        }))
        .unwrap();
    let outcome = kymera.step().unwrap();
    assert_eq!(outcome.result, Err(KymeraError::InvalidState(KymeraState::ScoActive)));
    assert_eq!(word.load(Ordering::Acquire), 0);
    assert_eq!(kymera.lock(), 0);
    assert_eq!(kymera.state(), KymeraState::ScoActive);
    assert_eq!(kymera.platform().live_chains(), 1);
    assert_eq!(kymera.platform().messages.len(), messages);

    kymera.request_start(StartRequest::ScoFwdRx(sco_fwd_rx(false))).unwrap();
    assert_eq!(
        kymera.step().unwrap().result,
        Err(KymeraError::InvalidState(KymeraState::ScoActive))
    );
    assert_eq!(kymera.platform().live_chains(), 1);
}

#[test]
fn test_queue_full_releases_lock() {
    let mut kymera = session();
    for volume in 0..16 {
        kymera.a2dp_set_volume(volume).unwrap();
    }
    assert_eq!(kymera.a2dp_set_volume(1), Err(KymeraError::QueueFull));

    let (lock, word) = client_lock(1);
    let request = ToneRequest::tone(&BEEP, true).with_client_lock(lock);
    assert_eq!(kymera.tone_play(request), Err(KymeraError::QueueFull));
    assert_eq!(word.load(Ordering::Acquire), 0);
}

#[test]
fn test_failed_sco_start_cleans_up() {
    let mut kymera = session();
    kymera.platform_mut().fail_start = true;
    let (lock, word) = client_lock(1);
    kymera
        .request_start(StartRequest::Sco(ScoStartRequest {
            client_lock: Some(lock),
            ..sco(ScoCodec::Cvsd)
        }))
        .unwrap();
    let outcome = kymera.step().unwrap();
    assert_eq!(outcome.result, Err(KymeraError::Platform(PlatformError::Start)));
    assert_eq!(word.load(Ordering::Acquire), 0);
    assert_eq!(kymera.lock(), 0);
    assert_eq!(kymera.state(), KymeraState::Idle);
    assert_eq!(kymera.output_rate(), 0);
    let platform = kymera.platform();
    assert_eq!(platform.live_chains(), 0);
    assert!(!platform.mic_bias);
    assert!(!platform.external_amp);
}

#[test]
fn test_failed_a2dp_start_cleans_up() {
    let mut kymera = session();
    kymera.platform_mut().fail_start = true;
    let (lock, word) = client_lock(1);
    kymera
        .request_start(StartRequest::A2dp(A2dpStartRequest {
            client_lock: Some(lock),
            ..a2dp(Seid::SbcSink.raw(), 44_100, 80)
        }))
        .unwrap();
    let results = outcomes(&mut kymera);
    assert_eq!(results.len(), 4);
    assert_eq!(results[3].result, Err(KymeraError::Platform(PlatformError::Start)));
    assert_eq!(word.load(Ordering::Acquire), 0);
    assert_eq!(kymera.lock(), 0);
    assert_eq!(kymera.state(), KymeraState::Idle);
    assert_eq!(kymera.platform().live_chains(), 0);
    assert!(kymera.input_chain().is_none());
}

#[test]
fn test_missing_operator_fails_build() {
    let mut kymera = session();
    kymera.platform_mut().missing_operator = Some(OperatorRole::ScoAec);
    kymera.request_start(StartRequest::Sco(sco(ScoCodec::Msbc))).unwrap();
    let outcome = kymera.step().unwrap();
    assert!(outcome.result.is_err());
    assert_eq!(kymera.state(), KymeraState::Idle);
    assert_eq!(kymera.platform().live_chains(), 0);
}

#[test]
fn test_sco_wideband_two_mic_start() {
    let kymera = sco_active(
        KymeraOptions {
            mics: MicCount::Two,
            ..KymeraOptions::default()
        },
        sco(ScoCodec::Msbc),
    );
    assert_eq!(kymera.state(), KymeraState::ScoActive);
    assert_eq!(kymera.output_rate(), 16_000);
    let chain = kymera.shared_chain().sco().unwrap();
    assert_eq!(chain.id(), ChainId::ScoWb2Mic);

    let platform = kymera.platform();
    assert!(platform.mic_bias);
    assert!(platform.external_amp);
    assert_eq!(platform.started_chains(), 1);
    for mic in [MIC_A, MIC_B] {
        assert_eq!(platform.stream_value(mic.0, crate::platform::StreamKey::CodecInputRate), Some(16_000));
        assert_eq!(platform.stream_value(mic.0, crate::platform::StreamKey::CodecInputGain), Some(18));
    }
    assert!(platform.is_connected(Source(SCO_LINK.0), chain.input(platform, EndpointRole::ScoFromAir).unwrap()));

    let aec = platform.messages_to(chain, OperatorRole::ScoAec);
    assert!(aec.contains(&OperatorMessage::AecSampleRate {
        input: 16_000,
        output: 16_000,
    }));
    assert!(aec.contains(&OperatorMessage::AecTerminalBuffer {
        size: mono_pcm_buffer_size(AEC_TERMINAL_BUFFER_MS * 1000, 16_000),
        inputs: 1,
        outputs: 0,
    }));
    assert_eq!(
        platform.messages_to(chain, OperatorRole::VolumeControl).last(),
        Some(&OperatorMessage::MainGain(volume_to_gain(hfp_to_logical(10))))
    );
    assert_eq!(platform.power_modes.last(), Some(&DspPowerMode::FULL));
}

#[test]
fn test_sco_time_to_play_gate() {
    let kymera = sco_active(
        KymeraOptions {
            sco_ttp_us: 30_000,
            ..KymeraOptions::default()
        },
        sco(ScoCodec::Cvsd),
    );
    let chain = kymera.shared_chain().sco().unwrap();
    assert_eq!(chain.id(), ChainId::ScoNb);
    let platform = kymera.platform();
    assert_eq!(
        platform.messages_to(chain, OperatorRole::ScoReceive),
        [OperatorMessage::TimeToPlayLatency(30_000)]
    );
    assert!(platform
        .messages_to(chain, OperatorRole::ScoAec)
        .contains(&OperatorMessage::AecTtpGate {
            enable: true,
            timeout_ms: 50,
        }));
}

#[test]
fn test_sco_stop_tears_down() {
    let mut kymera = sco_active(KymeraOptions::default(), sco(ScoCodec::Cvsd));
    let (lock, word) = client_lock(8);
    kymera.request_stop(StopRequest::Sco, Some(lock)).unwrap();
    let outcome = kymera.step().unwrap();
    assert_eq!(outcome.result, Ok(Progress::Done));
    assert_eq!(word.load(Ordering::Acquire), 0);
    assert_eq!(kymera.state(), KymeraState::Idle);
    assert_eq!(kymera.output_rate(), 0);
    let platform = kymera.platform();
    assert_eq!(platform.live_chains(), 0);
    assert!(!platform.mic_bias);
    assert!(!platform.external_amp);
}

#[test]
fn test_sco_volume_and_mute() {
    let mut kymera = sco_active(KymeraOptions::default(), sco(ScoCodec::Msbc));
    kymera.sco_set_volume(15).unwrap();
    kymera.sco_mic_mute(true).unwrap();
    let results = outcomes(&mut kymera);
    assert!(results.iter().all(|outcome| outcome.result == Ok(Progress::Done)));

    let chain = kymera.shared_chain().sco().unwrap();
    let platform = kymera.platform();
    assert_eq!(
        platform.messages_to(chain, OperatorRole::VolumeControl).last(),
        Some(&OperatorMessage::MainGain(volume_to_gain(127)))
    );
    assert_eq!(
        platform.messages_to(chain, OperatorRole::ScoAec).last(),
        Some(&OperatorMessage::AecMuteMic(true))
    );

    let mut idle = session();
    idle.sco_set_volume(3).unwrap();
    idle.sco_mic_mute(true).unwrap();
    assert!(outcomes(&mut idle).iter().all(|outcome| outcome.result == Ok(Progress::Ignored)));
}

#[test]
fn test_mute_is_not_held_by_tone() {
    let mut kymera = sco_active(KymeraOptions::default(), sco(ScoCodec::Msbc));
    kymera.tone_play(ToneRequest::tone(&BEEP, false)).unwrap();
    kymera.step().unwrap();
    assert_ne!(kymera.lock() & LOCK_TONE, 0);

    kymera.sco_set_volume(5).unwrap();
    kymera.sco_mic_mute(true).unwrap();
    let outcome = kymera.step().unwrap();
    assert_eq!(outcome.kind, RequestKind::ScoMicMute);
    assert_eq!(outcome.result, Ok(Progress::Done));
    assert!(kymera.step().is_none());

    kymera.handle_dsp_event(DspEvent::ToneEnd);
    assert_eq!(kymera.step().unwrap().kind, RequestKind::ScoSetVolume);
}

#[test]
fn test_sco_forwarding_with_mic() {
    let options = KymeraOptions {
        sco_forwarding: ScoForwarding::ScoAndMic,
        ..KymeraOptions::default()
    };
    let mut kymera = sco_active(
        options,
        ScoStartRequest {
            allow_forwarding: true,
            ..sco(ScoCodec::Cvsd)
        },
    );
    let chain = kymera.shared_chain().sco().unwrap();
    assert_eq!(chain.id(), ChainId::MicfwdNb);
    let platform = kymera.platform();
    assert_eq!(
        platform.messages_to(chain, OperatorRole::ScoUpSample),
        [OperatorMessage::ResamplerConversion {
            from: 8_000,
            to: 16_000,
        }]
    );
    assert_eq!(
        platform.messages_to(chain, OperatorRole::ScoReceive),
        [OperatorMessage::TimeToPlayLatency(SFWD_TTP_DELAY_US)]
    );

    kymera.sco_use_remote_mic().unwrap();
    assert_eq!(kymera.step().unwrap().result, Ok(Progress::Ignored));
    assert_eq!(kymera.mic_selection(), MicSelection::Remote);

    kymera.sco_start_forwarding(PEER_SINK, true).unwrap();
    assert_eq!(kymera.step().unwrap().result, Ok(Progress::Done));
    assert_eq!(kymera.state(), KymeraState::ScoActiveWithForwarding);
    assert!(kymera.packetiser().is_some());
    let chain = kymera.shared_chain().sco().unwrap();
    let platform = kymera.platform();
    assert_eq!(platform.transforms.len(), 1);
    assert_eq!(platform.transforms[0].1, PacketiserKind::ScoTransmit);
    assert_eq!(platform.transforms[0].3, PEER_SINK);
    let mic_in = chain.input(platform, EndpointRole::MicfwdRxOta).unwrap();
    assert_eq!(platform.mic_forwarding, [MicForwarding::Receive(mic_in)]);
    assert_eq!(
        platform.messages_to(chain, OperatorRole::MicfwdSpcSwitch).last(),
        Some(&OperatorMessage::SpcSelectInput(2))
    );
    assert_eq!(
        platform.messages_to(chain, OperatorRole::SwitchedPassthroughConsumer).last(),
        Some(&OperatorMessage::SpcMode(SpcMode::Passthrough))
    );

    kymera.sco_forwarding_pause(true).unwrap();
    let chain = kymera.shared_chain().sco().unwrap();
    assert_eq!(
        kymera.platform().messages_to(chain, OperatorRole::SwitchedPassthroughConsumer).last(),
        Some(&OperatorMessage::SpcMode(SpcMode::Consume))
    );

    kymera.sco_use_local_mic().unwrap();
    assert_eq!(kymera.step().unwrap().result, Ok(Progress::Done));
    let chain = kymera.shared_chain().sco().unwrap();
    assert_eq!(
        kymera.platform().messages_to(chain, OperatorRole::MicfwdSpcSwitch).last(),
        Some(&OperatorMessage::SpcSelectInput(1))
    );

    kymera.sco_stop_forwarding().unwrap();
    assert_eq!(kymera.pending(), 0);
    assert_eq!(kymera.state(), KymeraState::ScoActive);
    assert!(kymera.platform().transforms.is_empty());
    assert!(kymera.packetiser().is_none());
    assert_eq!(kymera.platform().live_chains(), 1);
}

#[test]
fn test_sco_stop_while_forwarding() {
    let options = KymeraOptions {
        sco_forwarding: ScoForwarding::Sco,
        ..KymeraOptions::default()
    };
    let mut kymera = sco_active(
        options,
        ScoStartRequest {
            allow_forwarding: true,
            ..sco(ScoCodec::Msbc)
        },
    );
    assert_eq!(kymera.shared_chain().sco().map(Chain::id), Ok(ChainId::ScofwdWb));
    kymera.sco_start_forwarding(PEER_SINK, false).unwrap();
    kymera.step().unwrap();
    assert_eq!(kymera.state(), KymeraState::ScoActiveWithForwarding);

    kymera.request_stop(StopRequest::Sco, None).unwrap();
    assert_eq!(kymera.step().unwrap().result, Ok(Progress::Done));
    assert_eq!(kymera.state(), KymeraState::Idle);
    assert!(kymera.platform().transforms.is_empty());
    assert_eq!(kymera.platform().live_chains(), 0);
}

#[test]
fn test_sco_stop_forwarding_when_not_forwarding_is_ignored() {
    let mut kymera = sco_active(KymeraOptions::default(), sco(ScoCodec::Msbc));
    kymera.sco_stop_forwarding().unwrap();
    assert_eq!(kymera.pending(), 1);
    assert_eq!(kymera.step().unwrap().result, Ok(Progress::Ignored));
    assert_eq!(kymera.state(), KymeraState::ScoActive);
    assert_eq!(kymera.platform().live_chains(), 1);
}

#[test]
fn test_sco_forwarding_unavailable_on_plain_chain() {
    let mut kymera = sco_active(KymeraOptions::default(), sco(ScoCodec::Msbc));
    kymera.sco_start_forwarding(PEER_SINK, false).unwrap();
    assert_eq!(
        kymera.step().unwrap().result,
        Err(KymeraError::Configuration(ConfigurationError::ForwardingUnavailable))
    );
    assert_eq!(kymera.state(), KymeraState::ScoActive);
    assert!(kymera.platform().transforms.is_empty());
    assert_eq!(
        kymera.sco_forwarding_pause(true),
        Err(KymeraError::Configuration(ConfigurationError::ForwardingUnavailable))
    );
}

#[test]
fn test_sco_forwarding_packetiser_failure() {
    let options = KymeraOptions {
        sco_forwarding: ScoForwarding::Sco,
        ..KymeraOptions::default()
    };
    let mut kymera = sco_active(
        options,
        ScoStartRequest {
            allow_forwarding: true,
            ..sco(ScoCodec::Cvsd)
        },
    );
    kymera.platform_mut().fail_packetiser = true;
    kymera.sco_start_forwarding(PEER_SINK, false).unwrap();
    assert_eq!(
        kymera.step().unwrap().result,
        Err(KymeraError::Platform(PlatformError::Packetiser))
    );
    assert_eq!(kymera.state(), KymeraState::ScoActive);
    let chain = kymera.shared_chain().sco().unwrap();
    assert!(!chain.is_connected(EndpointRole::ScofwdTxOta));
}

#[test]
fn test_forwarding_disallowed_builds_plain_chain() {
    let options = KymeraOptions {
        sco_forwarding: ScoForwarding::ScoAndMic,
        ..KymeraOptions::default()
    };
    let kymera = sco_active(options, sco(ScoCodec::Msbc));
    assert_eq!(kymera.shared_chain().sco().map(Chain::id), Ok(ChainId::ScoWb));
}

#[test]
fn test_voice_quality() {
    let options = KymeraOptions {
        voice_quality: VoiceQualityConfig {
            measurement_enabled: true,
            when_disabled: 15,
            best: 9,
            worst: 1,
        },
        ..KymeraOptions::default()
    };
    let mut idle = session_with(options);
    assert_eq!(idle.sco_voice_quality(), 1);

    let mut kymera = sco_active(options, sco(ScoCodec::Msbc));
    for (raw, expected) in [(20, 9), (5, 5), (0, 1)] {
        kymera.platform_mut().voice_quality = raw;
        assert_eq!(kymera.sco_voice_quality(), expected);
    }

    let mut unmeasured = sco_active(KymeraOptions::default(), sco(ScoCodec::Msbc));
    unmeasured.platform_mut().voice_quality = 3;
    assert_eq!(unmeasured.sco_voice_quality(), 15);
}

#[test]
fn test_sco_forwarding_receive_with_mic() {
    let options = KymeraOptions {
        mic_forwarding: true,
        ..KymeraOptions::default()
    };
    let mut kymera = session_with(options);
    let (lock, word) = client_lock(1);
    kymera
        .request_start(StartRequest::ScoFwdRx(ScoFwdRxRequest {
            client_lock: Some(lock),
            ..sco_fwd_rx(true)
        }))
        .unwrap();
    assert_eq!(kymera.step().unwrap().result, Ok(Progress::Done));
    assert_eq!(word.load(Ordering::Acquire), 0);
    assert_eq!(kymera.state(), KymeraState::ScoFwdRxActive);
    assert_eq!(kymera.output_rate(), 16_000);

    let chain = kymera.shared_chain().sco().unwrap();
    assert_eq!(chain.id(), ChainId::MicfwdSend);
    let platform = kymera.platform();
    assert_eq!(platform.transforms.len(), 1);
    assert_eq!(platform.transforms[0].1, PacketiserKind::ScoReceive);
    assert_eq!(platform.transforms[0].2, PEER_SOURCE);
    let mic_out = chain.output(platform, EndpointRole::MicfwdTxOta).unwrap();
    assert_eq!(platform.mic_forwarding, [MicForwarding::Send(mic_out)]);
    let aec = platform.messages_to(chain, OperatorRole::ScoAec);
    assert!(aec.contains(&OperatorMessage::TimeToPlayLatency(SFWD_TTP_DELAY_US)));
    assert!(aec.contains(&OperatorMessage::AecSameIoClockSource));
    assert_eq!(
        platform.messages_to(chain, OperatorRole::SwitchedPassthroughConsumer).last(),
        Some(&OperatorMessage::SpcMode(SpcMode::Passthrough))
    );

    kymera.sco_set_volume(8).unwrap();
    assert_eq!(kymera.step().unwrap().result, Ok(Progress::Done));

    kymera.request_stop(StopRequest::ScoFwdRx, None).unwrap();
    assert_eq!(kymera.step().unwrap().result, Ok(Progress::Done));
    assert_eq!(kymera.state(), KymeraState::Idle);
    let platform = kymera.platform();
    assert!(platform.transforms.is_empty());
    assert_eq!(platform.live_chains(), 0);
    assert!(!platform.mic_bias);
}

#[test]
fn test_sco_forwarding_receive_without_mic_option() {
    let mut kymera = session_with(KymeraOptions {
        mics: MicCount::Two,
        ..KymeraOptions::default()
    });
    kymera.request_start(StartRequest::ScoFwdRx(sco_fwd_rx(true))).unwrap();
    kymera.step().unwrap();
    assert_eq!(kymera.shared_chain().sco().map(Chain::id), Ok(ChainId::ScofwdRecv2Mic));
    assert!(kymera.platform().mic_forwarding.is_empty());
}

#[test]
fn test_non_interruptible_tone_over_a2dp() {
    let mut kymera = streaming(Seid::SbcSink.raw());
    let (lock, word) = client_lock(8);
    kymera
        .tone_play(ToneRequest::tone(&BEEP, false).with_client_lock(lock))
        .unwrap();
    kymera.a2dp_set_volume(30).unwrap();

    let outcome = kymera.step().unwrap();
    assert_eq!(outcome.kind, RequestKind::TonePlay);
    assert_eq!(outcome.result, Ok(Progress::Done));
    assert_eq!(kymera.state(), KymeraState::TonePlaying);
    assert_eq!(kymera.use_case_state(), KymeraState::A2dpStreaming);
    assert_ne!(kymera.lock() & LOCK_TONE, 0);
    assert_eq!(word.load(Ordering::Acquire), 8);
    assert!(kymera.step().is_none());

    let tone = kymera.tone_chain().unwrap();
    assert_eq!(tone.id(), ChainId::ToneGenResampled);
    let platform = kymera.platform();
    assert_eq!(
        platform.messages_to(tone, OperatorRole::TonePromptResampler),
        [OperatorMessage::ResamplerConversion {
            from: 8_000,
            to: 44_100,
        }]
    );
    assert!(platform
        .messages_to(tone, OperatorRole::ToneGen)
        .contains(&OperatorMessage::ToneSequence(&BEEP)));
    assert_eq!(platform.power_modes.last(), Some(&DspPowerMode::FULL));
    assert_eq!(platform.started_chains(), 3);

    kymera.handle_dsp_event(DspEvent::ToneEnd);
    assert_eq!(kymera.state(), KymeraState::A2dpStreaming);
    assert_eq!(kymera.output_rate(), 44_100);
    assert_eq!(kymera.lock(), 0);
    assert_eq!(word.load(Ordering::Acquire), 0);
    assert!(kymera.tone_chain().is_none());
    let output = kymera.shared_chain().output_volume().unwrap();
    assert!(!output.is_connected(EndpointRole::VolumeAux));
    assert_eq!(kymera.platform().live_chains(), 2);
    assert_eq!(kymera.platform().power_modes.last(), Some(&DspPowerMode::LOW_POWER));

    let outcome = kymera.step().unwrap();
    assert_eq!(outcome.kind, RequestKind::A2dpSetVolume);
    assert_eq!(outcome.result, Ok(Progress::Done));
}

#[test]
fn test_tone_from_idle_owns_output_chain() {
    let mut kymera = session();
    kymera.tone_play(ToneRequest::tone(&BEEP, true)).unwrap();
    assert_eq!(kymera.step().unwrap().result, Ok(Progress::Done));
    assert_eq!(kymera.state(), KymeraState::TonePlaying);
    assert_eq!(kymera.use_case_state(), KymeraState::Idle);
    assert_eq!(kymera.output_rate(), 8_000);
    assert_eq!(kymera.tone_chain().map(Chain::id), Some(ChainId::ToneGen));
    assert_eq!(kymera.platform().started_chains(), 2);
    assert!(kymera.platform().external_amp);

    kymera.handle_dsp_event(DspEvent::ToneEnd);
    assert_eq!(kymera.state(), KymeraState::Idle);
    assert_eq!(kymera.output_rate(), 0);
    assert!(kymera.shared_chain().is_vacant());
    assert_eq!(kymera.platform().live_chains(), 0);
    assert!(!kymera.platform().external_amp);
}

#[test]
fn test_audio_subsystem_off_after_dac_delay() {
    let mut kymera = session();
    kymera.tone_play(ToneRequest::tone(&BEEP, true)).unwrap();
    kymera.step().unwrap();
    kymera.handle_dsp_event(DspEvent::ToneEnd);
    assert!(kymera.platform().audio_subsystem);

    kymera.elapse(499);
    assert!(kymera.step().is_none());
    assert!(kymera.platform().audio_subsystem);

    kymera.elapse(1);
    let outcome = kymera.step().unwrap();
    assert_eq!(outcome.kind, RequestKind::AudioSubsystemDisable);
    assert!(!kymera.platform().audio_subsystem);
}

#[test]
fn test_amp_on_cancels_pending_power_down() {
    let mut kymera = session();
    kymera.tone_play(ToneRequest::tone(&BEEP, true)).unwrap();
    kymera.step().unwrap();
    kymera.handle_dsp_event(DspEvent::ToneEnd);
    kymera.elapse(200);

    kymera.request_start(StartRequest::Sco(sco(ScoCodec::Msbc))).unwrap();
    assert_eq!(kymera.step().unwrap().kind, RequestKind::ScoStart);
    assert_eq!(kymera.pending(), 0);
    kymera.elapse(1_000);
    assert!(kymera.step().is_none());
    assert!(kymera.platform().audio_subsystem);
}

#[test]
fn test_interruptible_tone_is_replaced() {
    let mut kymera = session();
    let (first, first_word) = client_lock(1);
    let (second, second_word) = client_lock(2);
    kymera.tone_play(ToneRequest::tone(&BEEP, true).with_client_lock(first)).unwrap();
    kymera.step().unwrap();
    kymera.tone_play(ToneRequest::tone(&BEEP, true).with_client_lock(second)).unwrap();
    assert_eq!(kymera.step().unwrap().result, Ok(Progress::Done));

    assert_eq!(first_word.load(Ordering::Acquire), 0);
    assert_eq!(second_word.load(Ordering::Acquire), 2);
    assert_eq!(kymera.state(), KymeraState::TonePlaying);
    assert_eq!(kymera.platform().live_chains(), 2);
    assert_eq!(kymera.pending(), 0);
}

#[test]
fn test_sco_start_interrupts_idle_tone() {
    let mut kymera = session();
    let (lock, word) = client_lock(1);
    kymera.tone_play(ToneRequest::tone(&BEEP, true).with_client_lock(lock)).unwrap();
    kymera.step().unwrap();

    kymera.request_start(StartRequest::Sco(sco(ScoCodec::Cvsd))).unwrap();
    assert_eq!(kymera.step().unwrap().result, Ok(Progress::Done));
    assert_eq!(word.load(Ordering::Acquire), 0);
    assert_eq!(kymera.state(), KymeraState::ScoActive);
    assert_eq!(kymera.platform().live_chains(), 1);
}

#[test]
fn test_pcm_prompt_at_output_rate_needs_no_chain() {
    let mut kymera = session();
    let prompt = ToneRequest::prompt(PromptId(7), PromptFormat::Pcm, 16_000, true);
    kymera.tone_play(prompt).unwrap();
    assert_eq!(kymera.step().unwrap().result, Ok(Progress::Done));
    assert!(kymera.tone_chain().is_none());
    assert_eq!(kymera.platform().live_chains(), 1);

    let source = Source(0x0307);
    assert_eq!(kymera.platform().open_prompts, [source]);
    let output = kymera.shared_chain().output_volume().unwrap();
    let aux = output.input(kymera.platform(), EndpointRole::VolumeAux).unwrap();
    assert!(kymera.platform().is_connected(source, aux));

    kymera.handle_dsp_event(DspEvent::StreamDisconnected(MEDIA));
    assert!(kymera.is_tone_playing());

    kymera.handle_dsp_event(DspEvent::StreamDisconnected(source));
    assert!(!kymera.is_tone_playing());
    assert!(kymera.platform().open_prompts.is_empty());
    assert_eq!(kymera.platform().live_chains(), 0);
}

#[test]
fn test_sbc_prompt_over_sco_is_decoded_and_resampled() {
    let mut kymera = sco_active(KymeraOptions::default(), sco(ScoCodec::Cvsd));
    let prompt = ToneRequest::prompt(PromptId(3), PromptFormat::Sbc, 48_000, true);
    kymera.tone_play(prompt).unwrap();
    assert_eq!(kymera.step().unwrap().result, Ok(Progress::Done));
    let tone = kymera.tone_chain().unwrap();
    assert_eq!(
        kymera.platform().messages_to(tone, OperatorRole::TonePromptResampler),
        [OperatorMessage::ResamplerConversion {
            from: 48_000,
            to: 8_000,
        }]
    );

    kymera.request_stop(StopRequest::Tone, None).unwrap();
    assert_eq!(kymera.step().unwrap().kind, RequestKind::ToneStop);
    assert!(!kymera.is_tone_playing());
    assert!(kymera.platform().open_prompts.is_empty());
    assert_eq!(kymera.state(), KymeraState::ScoActive);
    assert_eq!(kymera.platform().live_chains(), 1);
}

#[test]
fn test_a2dp_stop_ends_tone() {
    let mut kymera = streaming(Seid::SbcSink.raw());
    let (lock, word) = client_lock(4);
    kymera.tone_play(ToneRequest::tone(&BEEP, true).with_client_lock(lock)).unwrap();
    kymera.step().unwrap();
    kymera
        .request_stop(
            StopRequest::A2dp {
                seid: Seid::SbcSink.raw(),
                media: Some(MEDIA),
            },
            None,
        )
        .unwrap();
    assert_eq!(kymera.step().unwrap().result, Ok(Progress::Done));
    assert_eq!(word.load(Ordering::Acquire), 0);
    assert_eq!(kymera.state(), KymeraState::Idle);
    assert_eq!(kymera.platform().live_chains(), 0);
}

#[test]
fn test_submit_answers_queries() {
    let mut kymera = session();
    assert_eq!(kymera.submit(Request::GetState), Response::State(KymeraState::Idle));
    assert_eq!(kymera.submit(Request::VoiceQuality), Response::VoiceQuality(15));
    assert_eq!(kymera.submit(Request::A2dpSetVolume(3)), Response::Accepted);
    assert_eq!(
        kymera.submit(Request::ScoForwardingPause(false)),
        Response::Error(KymeraError::NoChain)
    );
}
