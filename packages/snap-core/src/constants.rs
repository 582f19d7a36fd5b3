//! Protocol constants that should NOT be changed casually.
//!
//! Wire-format values (message type tags, header width) are fixed by the
//! Snapcast wire protocol and must stay stable for interoperability. Timeouts
//! and buffer bounds are tunable defaults, grouped here so call sites never
//! hardcode a bare number.

// ─────────────────────────────────────────────────────────────────────────────
// Wire Framing
// ─────────────────────────────────────────────────────────────────────────────

/// Default TCP port for the streaming protocol.
pub const DEFAULT_PORT: u16 = 1704;

/// Byte width of the fixed message header: 3×u16 + 4×i32 + 1×u32.
pub const HEADER_SIZE: usize = 26;

/// Largest payload a single message may declare. A message with `size` above
/// this fails the connection with a protocol error rather than attempting to
/// allocate an attacker- or bug-controlled amount of memory.
pub const MAX_PAYLOAD_SIZE: u32 = 16 * 1024 * 1024;

// ─────────────────────────────────────────────────────────────────────────────
// Time Synchronization
// ─────────────────────────────────────────────────────────────────────────────

/// Number of burst `Time` requests sent immediately after the handshake to
/// seed the estimator before steady-state operation begins.
pub const TIME_SYNC_BURST_COUNT: usize = 50;

/// Spacing between burst requests, in microseconds.
pub const TIME_SYNC_BURST_SPACING_US: u64 = 100;

/// Interval between steady-state `Time` requests once the burst completes.
pub const TIME_SYNC_STEADY_INTERVAL_MS: u64 = 5_000;

/// Minimum spacing between opportunistic time requests piggybacked on other
/// traffic, to avoid flooding the connection when many messages arrive.
pub const TIME_SYNC_OPPORTUNISTIC_MIN_INTERVAL_MS: u64 = 1_000;

/// Size of the estimator's ring buffer of `half_diff_us` samples.
pub const TIME_ESTIMATOR_BUFFER_SIZE: usize = 200;

/// If no sample lands within this window, the estimator clears and rebases
/// rather than keep serving a stale offset through a network outage.
pub const TIME_ESTIMATOR_STALE_AFTER_SECS: u64 = 60;

/// A single `Time` sample whose offset jumps by more than this from the
/// current estimate is treated as a clock step and clears the estimator
/// immediately instead of waiting out [`TIME_ESTIMATOR_STALE_AFTER_SECS`].
/// See DESIGN.md open-question #1.
pub const TIME_ESTIMATOR_STEP_THRESHOLD_US: i64 = 1_000_000;

// ─────────────────────────────────────────────────────────────────────────────
// Request Correlation
// ─────────────────────────────────────────────────────────────────────────────

/// Per-request wait timeout before a pending request is considered lost.
pub const REQUEST_TIMEOUT_MS: u64 = 1_000;

/// Cumulative timeout across a connection's lifetime; once exceeded the
/// connection is declared broken and the client reconnects.
pub const REQUEST_CUMULATIVE_TIMEOUT_MS: u64 = 10_000;

/// Request ids wrap in `[1, REQUEST_ID_WRAP)`; 0 is reserved to mean "no
/// reply expected" on unsolicited messages.
pub const REQUEST_ID_WRAP: u16 = 10_000;

// ─────────────────────────────────────────────────────────────────────────────
// Streaming Buffer
// ─────────────────────────────────────────────────────────────────────────────

/// Minimum negotiable end-to-end buffer size (ms).
pub const MIN_BUFFER_MS: u64 = 100;

/// Maximum negotiable end-to-end buffer size (ms).
pub const MAX_BUFFER_MS: u64 = 10_000;

/// Default end-to-end buffer size (ms) when not overridden by config.
pub const DEFAULT_BUFFER_MS: u64 = 1_000;

/// Grace period added to `buffer_ms` before an incoming chunk whose start
/// time is too far in the future gets dropped instead of enqueued.
pub const JITTER_BUFFER_FUTURE_GRACE_MS: i64 = 1_000;

/// Soft cap on a server session's outbound queue (entries, not bytes).
pub const SESSION_QUEUE_SOFT_CAP: usize = 2_000;

/// Server write timeout per session; exceeding it tears the session down.
pub const SESSION_WRITE_TIMEOUT_SECS: u64 = 5;

// ─────────────────────────────────────────────────────────────────────────────
// PCM Source
// ─────────────────────────────────────────────────────────────────────────────

/// Default period length a source reads and paces itself against.
pub const DEFAULT_PCM_READ_MS: u64 = 20;

// ─────────────────────────────────────────────────────────────────────────────
// Decode
// ─────────────────────────────────────────────────────────────────────────────

/// Consecutive chunk decode failures before the error is escalated from
/// "drop and continue" to a fatal, reconnect-triggering one.
pub const DECODE_FAILURE_STREAK_LIMIT: u32 = 3;

// ─────────────────────────────────────────────────────────────────────────────
// Jitter Buffer Windows
// ─────────────────────────────────────────────────────────────────────────────

/// Width of the in-window tolerance before silence-fill or seek kicks in (ms).
pub const PLAYOUT_WINDOW_MS: i64 = 5;

/// Short rolling-median window (samples) — detects sudden drift.
pub const JITTER_WINDOW_SHORT: usize = 100;

/// Medium rolling-median window (samples) — source of steady-state drift
/// correction.
pub const JITTER_WINDOW_MEDIUM: usize = 1_000;

/// Long rolling-median window (samples) — governs coarse resync decisions.
pub const JITTER_WINDOW_LONG: usize = 5_000;

/// `|long_median|` beyond this (µs) forces a coarse resync.
pub const COARSE_RESYNC_THRESHOLD_US: i64 = 100_000;

// ─────────────────────────────────────────────────────────────────────────────
// Sink / Reconnect
// ─────────────────────────────────────────────────────────────────────────────

/// Consecutive seconds of "failed to get a chunk" before the sink is torn
/// down and reopened.
pub const SINK_FAILURE_TEARDOWN_SECS: u64 = 5;

/// Grace period between tearing down a broken connection and reconnecting.
pub const RECONNECT_GRACE_MS: u64 = 1_000;
