//! DSP clock and power mode selection
//!
//! Voice processing and tone mixing need the full DSP clock. Everything else can run
//! from the slow clock with aggressive power saving, except aptX which is too heavy for
//! it.

use crate::KymeraState;
use crate::kymera::Seid;

/// DSP clock
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum DspClock {
    /// Reduced clock
    Slow,
    /// Full clock
    Base,
}

/// DSP power save mode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PowerSaveMode {
    /// Minimal power saving
    Mode1,
    /// Aggressive power saving
    Mode3,
}

/// Clock and power save mode applied together
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct DspPowerMode {
    /// DSP clock
    pub clock: DspClock,
    /// Power save mode
    pub power_save: PowerSaveMode,
}

impl DspPowerMode {
    /// Full clock, minimal power saving
    pub const FULL: Self = Self {
        clock: DspClock::Base,
        power_save: PowerSaveMode::Mode1,
    };

    /// Slow clock, aggressive power saving
    pub const LOW_POWER: Self = Self {
        clock: DspClock::Slow,
        power_save: PowerSaveMode::Mode3,
    };
}

/// Power mode for a session state
///
/// `state` is the use case state, not [`KymeraState::TonePlaying`]; whether a tone is
/// mixed in is passed separately.
#[must_use]
pub fn dsp_power_mode(state: KymeraState, tone_playing: bool, seid: Option<Seid>) -> DspPowerMode {
    let voice = matches!(
        state,
        KymeraState::ScoActive | KymeraState::ScoActiveWithForwarding | KymeraState::ScoFwdRxActive
    );
    if voice || tone_playing || seid == Some(Seid::AptxSink) {
        DspPowerMode::FULL
    } else {
        DspPowerMode::LOW_POWER
    }
}
