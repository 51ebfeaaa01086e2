//! Message contract between the transport and the generator.
//!
//! - [`ToGenerator`] - State sync, buffer requests, flushes, lifecycle
//! - [`FromGenerator`] - Notes, ticks and error reports
//! - [`sync_channel`] - A connected [`TransportEnd`]/[`GeneratorEnd`] pair

mod channel;
mod messages;

pub use channel::{sync_channel, GeneratorEnd, TransportEnd};
pub use messages::{
    FlushScope, FromGenerator, Generation, NoteEvent, SyncPayload, Timestamp, ToGenerator,
};
