//! Library crate for lan-deepscan: deep port scanning and service fingerprinting of one LAN host.
pub mod classifier;
pub mod config;
pub mod error;
pub mod forensics;
pub mod ports;
pub mod prober;
pub mod scanner;
pub mod server;
pub mod session;
pub mod tls;
pub mod types;
