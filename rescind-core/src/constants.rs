//! Default tuning constants for the revocation guard.
//!
//! Every value here can be overridden through `GuardConfig`; these are the
//! values used when nothing is configured.

// ═══════════════════════════════════════════════════════════════════════════════
// RECLAIMER
// ═══════════════════════════════════════════════════════════════════════════════

/// Interval between two reclaimer ticks, in milliseconds.
pub const DEFAULT_SWEEP_INTERVAL_MS: u64 = 1_000;

/// Hard retention ceiling for revoke events and entries, in seconds.
///
/// Events older than this are reclaimed even when a long-running call
/// holds the safe watermark back.
pub const DEFAULT_RETENTION_CEILING_SECS: u64 = 60 * 60;

/// Lag applied to `now` to derive the safe watermark when no outgoing call
/// is pending, in milliseconds.
pub const DEFAULT_IDLE_WATERMARK_LAG_MS: u64 = 1_000;

// ═══════════════════════════════════════════════════════════════════════════════
// INPUT WINDOWS
// ═══════════════════════════════════════════════════════════════════════════════

/// How far in the past a dispatch time may lie, in seconds.
pub const DEFAULT_DISPATCH_WINDOW_SECS: u64 = 5 * 60;

/// Forward tolerance for revoke receive times (clock skew across nodes), in seconds.
pub const DEFAULT_REVOKE_SKEW_SECS: u64 = 5 * 60;

// ═══════════════════════════════════════════════════════════════════════════════
// ENVIRONMENT
// ═══════════════════════════════════════════════════════════════════════════════

/// Prefix shared by every environment variable the guard reads.
pub const ENV_PREFIX: &str = "RESCIND_";
