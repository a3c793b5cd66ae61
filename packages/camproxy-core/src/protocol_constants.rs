//! Fixed protocol constants that should NOT be changed.
//!
//! These values are mandated by the spec's wire contract and grace-period
//! timings; changing them would break interoperability with existing
//! subscribers or the testable invariants in the design document.

// ─────────────────────────────────────────────────────────────────────────────
// fMP4 box format
// ─────────────────────────────────────────────────────────────────────────────

/// Minimum legal box size: 4-byte size + 4-byte type.
pub const MIN_BOX_SIZE: u32 = 8;

/// FourCC for the file-type box.
pub const BOX_TYPE_FTYP: [u8; 4] = *b"ftyp";
/// FourCC for the movie (init) box.
pub const BOX_TYPE_MOOV: [u8; 4] = *b"moov";
/// FourCC for the movie-fragment box.
pub const BOX_TYPE_MOOF: [u8; 4] = *b"moof";
/// FourCC for the media-data box.
pub const BOX_TYPE_MDAT: [u8; 4] = *b"mdat";

// ─────────────────────────────────────────────────────────────────────────────
// Keyframe heuristic (§4.3)
// ─────────────────────────────────────────────────────────────────────────────

/// Number of most-recent fragment sizes tracked for the `largestSeen` heuristic.
pub const FRAGMENT_SIZE_HISTORY: usize = 20;

/// While fewer than this many fragments have been observed, any fragment
/// larger than `EARLY_KEYFRAME_SIZE_FLOOR` is treated as a keyframe.
pub const EARLY_KEYFRAME_COUNT: usize = 5;

/// Size floor (bytes) used by the early-session keyframe heuristic.
pub const EARLY_KEYFRAME_SIZE_FLOOR: usize = 300 * 1024;

/// Fraction of `largestSeen` a fragment must reach to be tagged a keyframe.
pub const KEYFRAME_SIZE_RATIO: f64 = 0.70;

// ─────────────────────────────────────────────────────────────────────────────
// Encoder contract (§4.2)
// ─────────────────────────────────────────────────────────────────────────────

/// Closed-GOP interval for "short" keyframe mode (frames).
pub const GOP_SIZE_SHORT: u32 = 15;
/// Closed-GOP interval for "standard" keyframe mode (frames).
pub const GOP_SIZE_STANDARD: u32 = 30;
/// Fragment target duration for "short" keyframe mode (ms).
pub const FRAGMENT_DURATION_SHORT_MS: u32 = 500;
/// Fragment target duration for "standard" keyframe mode (ms).
pub const FRAGMENT_DURATION_STANDARD_MS: u32 = 1000;

/// Video output profile.
pub const VIDEO_PROFILE: &str = "main";
/// Video output level.
pub const VIDEO_LEVEL: &str = "3.1";
/// Video output pixel format.
pub const VIDEO_PIX_FMT: &str = "yuv420p";

/// Default audio sample rate (Hz) when not overridden by config.
pub const DEFAULT_AUDIO_SAMPLE_RATE: u32 = 48_000;
/// Default audio bit rate (bits/sec) when not overridden by config.
pub const DEFAULT_AUDIO_BITRATE: u32 = 64_000;
/// Audio is always mono per spec.
pub const AUDIO_CHANNELS: u16 = 1;

/// Bounded wait before the encoder supervisor force-terminates a draining process.
pub const ENCODER_DRAIN_GRACE_MS: u64 = 2_000;

// ─────────────────────────────────────────────────────────────────────────────
// Session controller timers (§4.5, §5)
// ─────────────────────────────────────────────────────────────────────────────

/// Grace period after the last subscriber leaves before the encoder/driver stop.
pub const DRAIN_TIMER_SECS: u64 = 5;
/// Grace period after drain before `currentDevice` is released.
pub const RELEASE_TIMER_SECS: u64 = 2;
/// Maximum time an HTTP subscriber waits for the init segment before `503`.
pub const SUBSCRIBER_INIT_TIMEOUT_SECS: u64 = 10;

// ─────────────────────────────────────────────────────────────────────────────
// WebSocket broker (§4.7)
// ─────────────────────────────────────────────────────────────────────────────

/// Upgrade path for the JSON WebSocket API.
pub const WS_PATH: &str = "/api";
/// Capacity of the event broadcast channel fanned out to WebSocket peers.
pub const EVENT_CHANNEL_CAPACITY: usize = 100;
/// WebSocket heartbeat timeout (seconds).
pub const WS_HEARTBEAT_TIMEOUT_SECS: u64 = 30;
/// Interval between WebSocket heartbeat checks (seconds).
pub const WS_HEARTBEAT_CHECK_INTERVAL_SECS: u64 = 5;

// ─────────────────────────────────────────────────────────────────────────────
// Application identity
// ─────────────────────────────────────────────────────────────────────────────

/// Service identifier reported on `/health`.
pub const SERVICE_ID: &str = "camproxy";
