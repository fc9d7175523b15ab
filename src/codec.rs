//! Fixed-width encoding of counter values.

use std::convert::TryFrom;

/// Size of an encoded counter value and of every operand.
pub const COUNTER_SIZE: usize = std::mem::size_of::<u64>();

pub fn serialize_counter(counter: u64) -> [u8; COUNTER_SIZE] {
    counter.to_ne_bytes()
}

/// Returns `None` when `counter` is not exactly [`COUNTER_SIZE`] bytes long.
pub fn deserialize_counter(counter: &[u8]) -> Option<u64> {
    <[u8; COUNTER_SIZE]>::try_from(counter)
        .ok()
        .map(u64::from_ne_bytes)
}
