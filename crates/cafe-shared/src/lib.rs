//! # cafe-shared
//!
//! Wire types shared between the cafe node and its clients: content
//! identifiers, envelopes, structured DAG nodes and the length-prefixed
//! frame codec used by the streaming search protocol.

pub mod constants;
pub mod dag;
pub mod error;
pub mod framing;
pub mod protocol;
pub mod types;
