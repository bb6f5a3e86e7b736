use std::marker::PhantomData;

use serde::{Deserialize, Serialize};

use crate::serde::{Deserializer, Error, Serializer};

/// A MessagePack serialization and deserialization module.
#[derive(Debug, Clone, Copy)]
pub struct MessagePack<T>(PhantomData<T>);

impl<T> Default for MessagePack<T> {
    fn default() -> Self {
        Self(PhantomData)
    }
}

impl<T> Serializer<T> for MessagePack<T>
where
    T: Serialize,
{
    /// Serializes the given value to MessagePack and returns the serialized bytes.
    fn serialize(&self, value: &T) -> Result<Vec<u8>, Error> {
        rmp_serde::to_vec(value).map_err(|e| Error::Serialization(Box::new(e)))
    }
}

impl<T> Deserializer<T> for MessagePack<T>
where
    for<'d> T: Deserialize<'d>,
{
    /// Deserializes the given MessagePack bytes to produce a value of type `T`.
    fn deserialize(&self, data: &[u8]) -> Result<T, Error> {
        rmp_serde::from_slice(data).map_err(|e| Error::Deserialization(Box::new(e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
    struct Reading {
        sensor: String,
        value: i64,
    }

    #[test]
    fn it_serializes_and_deserializes_messagepack_data() {
        let serde = MessagePack::<Reading>::default();
        let reading = Reading {
            sensor: String::from("s-1"),
            value: 42,
        };

        let bytes = serde.serialize(&reading).unwrap();
        let decoded = serde.deserialize(&bytes).unwrap();

        assert_eq!(reading, decoded);
    }
}
