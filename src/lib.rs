//! h2channel - server-side HTTP/2 connection multiplexing
//!
//! This crate provides a sans-IO HTTP/2 server connection (`H2Connection`)
//! that multiplexes many request streams over one transport, plus the
//! frame layer, protocol engine and priority scheduler it is built on.

pub mod http;
