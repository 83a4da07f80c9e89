//! Flashing targets.
//!
//! Each target bundles the control-line sequence, bootloader dialogue and
//! transfer settings of one bootloader family.

pub mod gecko;

pub use gecko::{BootTiming, FlasherConfig, GeckoFlasher, MenuConfig};
