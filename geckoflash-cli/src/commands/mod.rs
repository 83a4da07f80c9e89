//! Command implementations.
//!
//! Each subcommand is implemented in its own module for clean separation.

pub(crate) mod boot;
pub(crate) mod flash;
pub(crate) mod ports;
