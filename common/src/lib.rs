//! Types shared across the latprobe workspace: configuration, the measurement
//! model and subnet enumeration.

pub mod config;
pub mod measurement;
pub mod network;
