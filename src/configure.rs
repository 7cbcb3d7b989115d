//! Operator Configurator
//!
//! Post-construction parameters applied to chains by role: sample rates, buffer sizes,
//! gains, tuning profiles (UCIDs) and switched passthrough modes. Every helper resolves
//! roles through [`Chain`] so a role missing from the template is reported as
//! [`ConfigurationError::MissingOperator`] instead of being silently skipped, unless the
//! helper is explicitly about an optional operator.

use crate::chain::{Chain, OperatorRole};
use crate::constants::{
    SOURCE_SYNC_KICK_MULTIPLE, UCID_AEC_NB, UCID_AEC_WB, UCID_CVC_RECEIVE, UCID_CVC_SEND,
    UCID_PEQ, UCID_SOURCE_SYNC, UCID_VOLUME_CONTROL,
};
use crate::error::{ConfigurationError, KymeraError};
use crate::platform::{OperatorFramework, OperatorMessage, SourceSyncRoute, SpcMode};
use crate::volume::{Gain, VolumeRange};

const MICROSECONDS_PER_SECOND: u64 = 1_000_000;

/// Source sync sink group: single input terminal 0
static SOURCE_SYNC_SINK_GROUPS: [u32; 1] = [0b1];

/// Source sync source group: single output terminal 0
static SOURCE_SYNC_SOURCE_GROUPS: [u32; 1] = [0b1];

/// Number of mono PCM samples covering `time_us` at `sample_rate`, rounded up
#[must_use]
pub fn mono_pcm_buffer_size(time_us: u32, sample_rate: u32) -> u32 {
    let samples = (u64::from(time_us) * u64::from(sample_rate)).div_ceil(MICROSECONDS_PER_SECOND);
    u32::try_from(samples).unwrap_or(u32::MAX)
}

/// Source sync output buffer size for a kick period
///
/// The buffer holds [`SOURCE_SYNC_KICK_MULTIPLE`] kick periods of audio.
#[must_use]
pub fn source_sync_buffer_size(kick_period_us: u32, sample_rate: u32) -> u32 {
    mono_pcm_buffer_size(kick_period_us * SOURCE_SYNC_KICK_MULTIPLE, sample_rate)
}

/// Send one message to the operator playing `role`
///
/// # Errors
///
/// Returns an error if the role is missing or the operator rejects the message.
pub fn send<P: OperatorFramework>(
    platform: &mut P,
    chain: &Chain,
    role: OperatorRole,
    message: OperatorMessage,
) -> Result<(), KymeraError> {
    let operator = chain.operator(platform, role)?;
    platform.operator_message(operator, message)?;
    Ok(())
}

/// Send one message to the operator playing `role`, if the chain has one
///
/// Returns whether the operator exists.
///
/// # Errors
///
/// Returns an error if the operator rejects the message.
pub fn send_optional<P: OperatorFramework>(
    platform: &mut P,
    chain: &Chain,
    role: OperatorRole,
    message: OperatorMessage,
) -> Result<bool, KymeraError> {
    match chain.optional_operator(platform, role) {
        Some(operator) => {
            platform.operator_message(operator, message)?;
            Ok(true)
        }
        None => Ok(false),
    }
}

/// Set the sample rate of every operator that follows the chain rate
///
/// # Errors
///
/// Returns an error if an operator rejects the rate.
pub fn set_sample_rate<P: OperatorFramework>(
    platform: &mut P,
    chain: &Chain,
    rate: u32,
) -> Result<(), KymeraError> {
    for role in chain.template().operators {
        if role.follows_chain_rate() {
            send(platform, chain, *role, OperatorMessage::SampleRate(rate))?;
        }
    }
    Ok(())
}

/// Set the sample rate of a single operator
///
/// # Errors
///
/// Returns an error if the role is missing or the operator rejects the rate.
pub fn set_operator_sample_rate<P: OperatorFramework>(
    platform: &mut P,
    chain: &Chain,
    role: OperatorRole,
    rate: u32,
) -> Result<(), KymeraError> {
    send(platform, chain, role, OperatorMessage::SampleRate(rate))
}

/// Set the buffer size of the operator playing `role`
///
/// # Errors
///
/// Returns an error if the role is missing or the operator rejects the size.
pub fn set_buffer_size<P: OperatorFramework>(
    platform: &mut P,
    chain: &Chain,
    role: OperatorRole,
    size: u32,
) -> Result<(), KymeraError> {
    send(platform, chain, role, OperatorMessage::BufferSize(size))
}

/// Select the tuning profile of the operator playing `role`
///
/// # Errors
///
/// Returns an error if the role is missing or the operator rejects the profile.
pub fn set_operator_profile<P: OperatorFramework>(
    platform: &mut P,
    chain: &Chain,
    role: OperatorRole,
    ucid: u16,
) -> Result<(), KymeraError> {
    send(platform, chain, role, OperatorMessage::Ucid(ucid))
}

/// Set main and auxiliary gain from a logical volume
///
/// # Errors
///
/// Returns an error if the chain has no volume operator.
pub fn set_volume<P: OperatorFramework>(
    platform: &mut P,
    chain: &Chain,
    range: &VolumeRange,
    volume: u8,
) -> Result<Gain, KymeraError> {
    let gain = range.gain(volume);
    send(platform, chain, OperatorRole::VolumeControl, OperatorMessage::MainGain(gain))?;
    send(platform, chain, OperatorRole::VolumeControl, OperatorMessage::AuxGain(gain))?;
    Ok(gain)
}

/// Set the main gain only from a logical volume
///
/// # Errors
///
/// Returns an error if the chain has no volume operator.
pub fn set_main_volume<P: OperatorFramework>(
    platform: &mut P,
    chain: &Chain,
    range: &VolumeRange,
    volume: u8,
) -> Result<Gain, KymeraError> {
    let gain = range.gain(volume);
    send(platform, chain, OperatorRole::VolumeControl, OperatorMessage::MainGain(gain))?;
    Ok(gain)
}

/// Configure the source sync operator for `rate`
///
/// # Errors
///
/// Returns an error if the operator rejects any of the settings.
pub fn configure_source_sync<P: OperatorFramework>(
    platform: &mut P,
    chain: &Chain,
    rate: u32,
    kick_period_us: u32,
) -> Result<(), KymeraError> {
    let operator = chain.operator(platform, OperatorRole::SourceSync)?;
    let messages = [
        OperatorMessage::SampleRate(rate),
        OperatorMessage::SourceSyncSinkGroups(&SOURCE_SYNC_SINK_GROUPS),
        OperatorMessage::SourceSyncSourceGroups(&SOURCE_SYNC_SOURCE_GROUPS),
        OperatorMessage::SourceSyncRoute(SourceSyncRoute {
            input: 0,
            output: 0,
            sample_rate: rate,
            gain: 0,
        }),
        OperatorMessage::BufferSize(source_sync_buffer_size(kick_period_us, rate)),
    ];
    for message in messages {
        platform.operator_message(operator, message)?;
    }
    Ok(())
}

/// Configure the operators shared by the output chain and the voice chains
///
/// Source sync and EQ are configured when present; the volume operator is required.
///
/// # Errors
///
/// Returns an error if the volume operator is missing or any operator rejects a setting.
pub fn configure_output_chain<P: OperatorFramework>(
    platform: &mut P,
    chain: &Chain,
    range: &VolumeRange,
    rate: u32,
    kick_period_us: u32,
    volume: u8,
) -> Result<Gain, KymeraError> {
    if chain.template().has_operator(OperatorRole::SourceSync) {
        configure_source_sync(platform, chain, rate, kick_period_us)?;
    }
    set_sample_rate(platform, chain, rate)?;
    send_optional(platform, chain, OperatorRole::Peq, OperatorMessage::Ucid(UCID_PEQ))?;
    set_volume(platform, chain, range, volume)
}

/// Select tuning profiles for voice and output operators
///
/// AEC profile follows the SCO bandwidth. AEC is required on voice chains; CVC and the
/// output operators are profiled when present.
///
/// # Errors
///
/// Returns an error if a voice chain lacks AEC or an operator rejects its profile.
pub fn set_operator_ucids<P: OperatorFramework>(
    platform: &mut P,
    chain: &Chain,
    voice: bool,
    narrowband: bool,
) -> Result<(), KymeraError> {
    if voice {
        let aec = if narrowband { UCID_AEC_NB } else { UCID_AEC_WB };
        set_operator_profile(platform, chain, OperatorRole::ScoAec, aec)?;
        send_optional(platform, chain, OperatorRole::CvcSend, OperatorMessage::Ucid(UCID_CVC_SEND))?;
        send_optional(
            platform,
            chain,
            OperatorRole::CvcReceive,
            OperatorMessage::Ucid(UCID_CVC_RECEIVE),
        )?;
    }
    set_operator_profile(platform, chain, OperatorRole::VolumeControl, UCID_VOLUME_CONTROL)?;
    send_optional(
        platform,
        chain,
        OperatorRole::SourceSync,
        OperatorMessage::Ucid(UCID_SOURCE_SYNC),
    )?;
    Ok(())
}

/// Set a switched passthrough operator's mode
///
/// # Errors
///
/// Returns [`ConfigurationError::ForwardingUnavailable`] if the chain has no such
/// operator, or an error if the operator rejects the mode.
pub fn set_spc_mode<P: OperatorFramework>(
    platform: &mut P,
    chain: &Chain,
    role: OperatorRole,
    mode: SpcMode,
) -> Result<(), KymeraError> {
    let operator = chain
        .optional_operator(platform, role)
        .ok_or(ConfigurationError::ForwardingUnavailable)?;
    platform.operator_message(operator, OperatorMessage::SpcMode(mode))?;
    Ok(())
}
