//! A Modbus/TCP toolkit: the MBAP frame codec, a thread-safe register store,
//! and the building blocks of the reference `modbus-server` and
//! `modbus-client` binaries.

pub mod client;
pub mod codec;
pub mod commands;
pub mod frame;
pub mod logging;
pub mod output;
pub mod service;
pub mod store;
