//! TTCP - codec and transport for the TTCP chat protocol
//!
//! The [`protocol`] module converts between typed packets and their byte
//! representation. [`network`] moves those packets over tokio streams and
//! [`config`] holds the settings shared by the command-line tool.

pub mod config;
pub mod network;
pub mod protocol;
