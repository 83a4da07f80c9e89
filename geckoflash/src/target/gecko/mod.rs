//! Silicon Labs Gecko bootloader target.

pub mod flasher;
pub mod menu;
pub mod reset;

pub use flasher::{FlasherConfig, GeckoFlasher};
pub use menu::MenuConfig;
pub use reset::BootTiming;
