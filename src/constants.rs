//! `Budgie` Constants
//!
//! This module contains the tunables used throughout the `Budgie` library: queue and
//! channel depths, DSP kick periods, latencies, buffer sizes, operator profile ids and
//! the default volume/gain limits.

/// Depth of the static request/event/outcome channels
pub const MAX_CHANNELS: usize = 8;

/// Maximum number of deferred messages held by the session queue
pub const QUEUE_DEPTH: usize = 16;

/// Maximum number of operators in a chain template
pub const MAX_CHAIN_OPERATORS: usize = 16;

/// Maximum number of endpoints (inputs + outputs) in a chain template
pub const MAX_CHAIN_ENDPOINTS: usize = 8;

/// Scale of the DSP gain representation (1/60th dB)
pub const DB_SCALE: i32 = 60;

/// Gain applied for logical volume 0, in dB, regardless of the configured range
pub const MUTE_FLOOR_DB: i32 = -90;

/// Maximum logical volume
pub const MAX_VOLUME: u8 = 127;

/// Maximum HFP speaker volume
pub const MAX_HFP_VOLUME: u8 = 15;

/// Default minimum volume in dB (logical volume 1)
pub const DEFAULT_MIN_VOLUME_DB: i32 = -45;

/// Default maximum volume in dB (logical volume 127)
pub const DEFAULT_MAX_VOLUME_DB: i32 = 0;

/// Default microphone gain in dB
pub const DEFAULT_MIC_GAIN: u32 = 18;

/// Volume used on the output chain when it is created only to play a tone
pub const TONE_VOLUME: u8 = MAX_VOLUME;

/// Fast DSP kick period in microseconds
pub const KICK_PERIOD_FAST: u32 = 2000;

/// Slow DSP kick period in microseconds
pub const KICK_PERIOD_SLOW: u32 = 7500;

/// Kick period for voice chains
pub const KICK_PERIOD_VOICE: u32 = KICK_PERIOD_FAST;

/// Kick period for the output chain while only a tone is playing
pub const KICK_PERIOD_TONES: u32 = KICK_PERIOD_SLOW;

/// Kick period for an SBC master stream
pub const KICK_PERIOD_MASTER_SBC: u32 = KICK_PERIOD_SLOW;

/// Kick period for an AAC master stream
pub const KICK_PERIOD_MASTER_AAC: u32 = KICK_PERIOD_SLOW;

/// Kick period for an aptX master stream
pub const KICK_PERIOD_MASTER_APTX: u32 = KICK_PERIOD_FAST;

/// Kick period for a slave (TWS sink) stream
pub const KICK_PERIOD_SLAVE: u32 = KICK_PERIOD_FAST;

/// Source sync output buffer length, in kick periods
pub const SOURCE_SYNC_KICK_MULTIPLE: u32 = 4;

/// Minimum source sync output buffer length, in kick periods
pub const SOURCE_SYNC_MIN_KICK_MULTIPLE: u32 = 2;

/// Maximum source sync output buffer length, in kick periods
pub const SOURCE_SYNC_MAX_KICK_MULTIPLE: u32 = 5;

const _: () = assert!(
    SOURCE_SYNC_KICK_MULTIPLE >= SOURCE_SYNC_MIN_KICK_MULTIPLE
        && SOURCE_SYNC_KICK_MULTIPLE <= SOURCE_SYNC_MAX_KICK_MULTIPLE
);

/// Sample rate of the tone generator
pub const TONE_GEN_RATE: u32 = 8000;

/// Narrowband SCO sample rate (CVSD)
pub const SCO_NB_RATE: u32 = 8000;

/// Wideband SCO sample rate (mSBC)
pub const SCO_WB_RATE: u32 = 16000;

/// AEC terminal buffer length in milliseconds
pub const AEC_TERMINAL_BUFFER_MS: u32 = 15;

/// Time-to-play delay of TWS audio in microseconds
pub const TWS_STANDARD_LATENCY_US: u32 = 300_000;

/// Buffer size of the RTP decoder, in words
pub const PRE_DECODER_BUFFER_SIZE: u32 = 2048;

/// SBC bitpool used when re-encoding AAC for the peer
pub const FORWARDING_SBC_BITPOOL: u8 = 35;

/// Bitpool of the aptX-wideband-speech (AWBS) codec used for SCO forwarding
pub const SFWD_MSBC_BITPOOL: u16 = 26;

/// Time-to-play delay of forwarded SCO audio in microseconds
pub const SFWD_TTP_DELAY_US: u32 = 45_000;

/// Buffer size of the forwarded-SCO decoder, in words
pub const SFWD_RECV_CHAIN_BUFFER_SIZE: u32 = 1024;

/// Buffer size of the forwarded-mic decoder, in words
pub const SFWD_MICFWD_RECV_CHAIN_BUFFER_SIZE: u32 = 1024;

/// Buffer size of the SCO forwarding splitter, in words
pub const SFWD_SEND_CHAIN_BUFFER_SIZE: u32 = 512;

/// Buffer size of the wideband basic passthrough, in words
pub const SFWD_WB_PASSTHROUGH_BUFFER_SIZE: u32 = 512;

/// Default DAC disconnection delay in milliseconds
pub const DEFAULT_DAC_DISCONNECTION_DELAY_MS: u32 = 500;

/// Lock bit held while a start sequence is in progress
pub const LOCK_STARTING: u16 = 1 << 0;

/// Lock bit held while a non-interruptible tone is playing
pub const LOCK_TONE: u16 = 1 << 1;

/// Operator profile (UCID) for narrowband AEC
pub const UCID_AEC_NB: u16 = 0;

/// Operator profile (UCID) for wideband AEC
pub const UCID_AEC_WB: u16 = 1;

/// Operator profile (UCID) for CVC send
pub const UCID_CVC_SEND: u16 = 0;

/// Operator profile (UCID) for CVC receive
pub const UCID_CVC_RECEIVE: u16 = 0;

/// Operator profile (UCID) for volume control
pub const UCID_VOLUME_CONTROL: u16 = 0;

/// Operator profile (UCID) for source sync
pub const UCID_SOURCE_SYNC: u16 = 0;

/// Operator profile (UCID) for the parametric EQ
pub const UCID_PEQ: u16 = 0;
