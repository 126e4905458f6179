//! Extension-facing message contract and its stdio transport.

pub mod channel;
pub mod contract;
pub mod stdio;
