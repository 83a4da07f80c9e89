//! Protocol implementations.

pub mod crc;
pub mod xmodem;

// Re-export common types
pub use xmodem::{Block, BlockCheck, TransferSession, XmodemConfig, XmodemTransfer};
