//! QPGSn serial protocol: device discovery, framed queries and telemetry
//! decoding for SOLAX-compatible inverter banks.

pub mod link;
pub mod port;
pub mod telemetry;
