//! Bor consensus constants for header `extraData` parsing and system calls.

use alloy_primitives::Address;

/// Fixed 32-byte vanity prefix present in every header.
pub const EXTRA_VANITY: usize = 32;
/// Fixed 65-byte ECDSA signature suffix (r,s,v).
pub const EXTRA_SEAL: usize = 65;
/// Size of one serialized validator (20-byte address + 20-byte power).
pub const VALIDATOR_BYTES_LEN: usize = 40;

/// Maximum clock skew tolerated before a header is a future block, seconds.
pub const ALLOWED_FUTURE_BLOCK_TIME: u64 = 3;

/// Number of recent snapshots kept in memory.
pub const SNAPSHOT_CACHE_SIZE: u32 = 128;

/// Gas allotted to a system message. Never charged; bounds EVM execution.
pub const SYSTEM_MESSAGE_GAS: u64 = u64::MAX / 2;

/// Reserved sender of system messages
/// (`0xffffFFFfFFffffffffffffffFfFFFfffFFFfFFfE`).
pub const SYSTEM_ADDRESS: Address = Address::new([
    0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff,
    0xff, 0xff, 0xff, 0xff, 0xfe,
]);
