#[cfg(feature = "json")]
pub mod json;
#[cfg(feature = "messagepack")]
pub mod messagepack;

/// Serialization and deserialization error.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// an error occurred during the serialization of the value
    #[error("serialization error: {0}")]
    Serialization(#[source] Box<dyn std::error::Error + Sync + Send>),
    /// an error occurred during the deserialization of the data
    #[error("deserialization error: {0}")]
    Deserialization(#[source] Box<dyn std::error::Error + Sync + Send>),
}

/// Defines the behavior for serializing values of type `T`.
pub trait Serializer<T> {
    /// Serializes a value of type `T` into a byte vector.
    ///
    /// # Arguments
    ///
    /// * `value` - The value to be serialized.
    ///
    /// # Returns
    ///
    /// A `Result` containing the serialized bytes on success, or an error
    /// on failure. Failures are surfaced to the caller as storage errors
    /// and never retried by the store.
    fn serialize(&self, value: &T) -> Result<Vec<u8>, Error>;
}

/// Defines the behavior for deserializing values of type `T`.
pub trait Deserializer<T> {
    /// Deserializes a byte slice into a value of type `T`.
    ///
    /// # Arguments
    ///
    /// * `data` - The bytes to be deserialized.
    ///
    /// # Returns
    ///
    /// A `Result` containing the deserialized value on success, or an error on failure.
    fn deserialize(&self, data: &[u8]) -> Result<T, Error>;
}

/// Combines the `Serializer` and `Deserializer` traits for convenience.
pub trait Serde<T>: Serializer<T> + Deserializer<T> {}

impl<K, T> Serde<T> for K where K: Serializer<T> + Deserializer<T> {}
