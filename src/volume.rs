//! Volume to gain mapping
//!
//! Logical volume is a 0..=127 step count (A2DP/AVRCP absolute volume). HFP speaker
//! volume is 0..=15 and is rescaled to the same range first. The DSP volume operator
//! takes gain in 1/60th dB units.

use crate::constants::{
    DB_SCALE, DEFAULT_MAX_VOLUME_DB, DEFAULT_MIN_VOLUME_DB, MAX_HFP_VOLUME, MAX_VOLUME,
    MUTE_FLOOR_DB,
};

/// Gain in 1/60th dB, as understood by the volume operator
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Gain(pub i32);

impl Gain {
    /// Gain applied at logical volume 0
    pub const MUTE: Self = Self(MUTE_FLOOR_DB * DB_SCALE);

    /// Gain in whole dB, truncated towards zero
    #[must_use]
    pub const fn as_db(self) -> i32 {
        self.0 / DB_SCALE
    }
}

/// Range of gains covered by logical volumes 1..=127
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct VolumeRange {
    /// Gain at volume 1, in dB
    pub min_db: i32,
    /// Gain at volume 127, in dB
    pub max_db: i32,
}

impl Default for VolumeRange {
    fn default() -> Self {
        Self {
            min_db: DEFAULT_MIN_VOLUME_DB,
            max_db: DEFAULT_MAX_VOLUME_DB,
        }
    }
}

impl VolumeRange {
    /// Map a logical volume to DSP gain
    ///
    /// Volume 0 always maps to [`Gain::MUTE`]. Values above 127 are treated as 127.
    /// Range ends below the mute floor are raised to it.
    #[must_use]
    pub fn gain(&self, volume: u8) -> Gain {
        let volume = i32::from(volume.min(MAX_VOLUME));
        if volume == 0 {
            return Gain::MUTE;
        }
        let min_db = self.min_db.max(MUTE_FLOOR_DB);
        let max_db = self.max_db.max(min_db);
        let db = volume * (max_db - min_db) / i32::from(MAX_VOLUME) + min_db;
        Gain(db * DB_SCALE)
    }
}

/// Map a logical volume to DSP gain using the default range
#[must_use]
pub fn volume_to_gain(volume: u8) -> Gain {
    VolumeRange::default().gain(volume)
}

/// Rescale an HFP speaker volume (0..=15) to the logical 0..=127 range
#[must_use]
pub fn hfp_to_logical(volume: u8) -> u8 {
    let volume = u16::from(volume.min(MAX_HFP_VOLUME));
    u8::try_from(volume * u16::from(MAX_VOLUME) / u16::from(MAX_HFP_VOLUME)).unwrap_or(MAX_VOLUME)
}
