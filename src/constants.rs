//! Shared constants for message validation, delegation, and storage.

// =============================================================================
// Delegation
// =============================================================================

/// One day in milliseconds.
pub const DAY_MS: u64 = 24 * 60 * 60 * 1000;

/// Length of the random delegation nonce in bytes (hex-encoded on the wire).
pub const DELEGATION_NONCE_BYTES: usize = 16;

// =============================================================================
// Timestamp Validation
// =============================================================================

/// Messages older than this get a staleness warning (24 hours in milliseconds).
pub const STALE_MESSAGE_AGE_MS: u64 = DAY_MS;

/// Maximum allowed clock skew for timestamps (5 minutes in milliseconds).
pub const MAX_CLOCK_SKEW_MS: u64 = 5 * 60 * 1000;

// =============================================================================
// Batch Validation
// =============================================================================

/// Default number of in-flight signature verifications in batch validation.
pub const DEFAULT_MAX_CONCURRENT_VERIFICATIONS: usize = 10;

// =============================================================================
// Transport
// =============================================================================

/// Default content topic for forum messages.
pub const DEFAULT_CONTENT_TOPIC: &str = "/opchan/1/messages/json";

/// Maximum encoded frame size accepted from the transport (1MB).
pub const MAX_FRAME_SIZE: usize = 1024 * 1024;
