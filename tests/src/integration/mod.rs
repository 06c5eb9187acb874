//! Cross-crate scenarios.

#[cfg(test)]
mod harness;

pub mod blocking;
pub mod failures;
pub mod round_trip;
