use std::marker::PhantomData;

use serde::{Deserialize, Serialize};

use crate::serde::{Deserializer, Error, Serializer};

/// A JSON serialization and deserialization module.
#[derive(Debug, Clone, Copy)]
pub struct Json<T>(PhantomData<T>);

impl<T> Default for Json<T> {
    fn default() -> Self {
        Self(PhantomData)
    }
}

impl<T> Serializer<T> for Json<T>
where
    T: Serialize,
{
    /// Serializes the given value to JSON and returns the serialized bytes.
    fn serialize(&self, value: &T) -> Result<Vec<u8>, Error> {
        serde_json::to_vec(value).map_err(|e| Error::Serialization(Box::new(e)))
    }
}

impl<T> Deserializer<T> for Json<T>
where
    for<'d> T: Deserialize<'d>,
{
    /// Deserializes the given JSON bytes to produce a value of type `T`.
    fn deserialize(&self, data: &[u8]) -> Result<T, Error> {
        serde_json::from_slice(data).map_err(|e| Error::Deserialization(Box::new(e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
    struct Person {
        name: String,
        age: u32,
    }

    #[test]
    fn it_serializes_and_deserializes_json_data() {
        let json_serializer = Json::<Person>::default();
        let person = Person {
            name: String::from("Some Name"),
            age: 30,
        };

        let serialized_data = json_serializer.serialize(&person).unwrap();
        let deserialized_person = json_serializer.deserialize(&serialized_data).unwrap();

        assert_eq!(person, deserialized_person);
    }

    #[test]
    fn it_fails_to_deserialize_malformed_data() {
        let json_serializer = Json::<Person>::default();
        let err = json_serializer.deserialize(b"not json").unwrap_err();
        assert!(matches!(err, Error::Deserialization(_)));
    }
}
