//! # Cordon payload serialization.
//!
//! The event store treats payloads as opaque bytes on disk and as typed
//! values in application code. A [`Serde`] implementation bridges the two:
//! it is configured once on the store and used for every write and read.
mod serde;

pub use crate::serde::{Deserializer, Error, Serde, Serializer};

#[cfg(feature = "json")]
pub use crate::serde::json;
#[cfg(feature = "messagepack")]
pub use crate::serde::messagepack;
