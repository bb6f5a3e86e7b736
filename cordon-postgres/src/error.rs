use thiserror::Error;

/// Represents all the ways a method can fail within Cordon Postgres.
#[derive(Error, Debug)]
pub enum Error {
    /// Error returned from the database.
    #[error(transparent)]
    Database(#[from] sqlx::Error),
    /// An error occurred while serializing or deserializing an event payload.
    #[error(transparent)]
    Serialization(#[from] cordon_serde::Error),
    /// A stored row could not be decoded into an event.
    #[error("unable to decode stored event: {0}")]
    Decode(String),
    /// The call was malformed: empty event list, invalid tag or event type.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    /// The database call exceeded its deadline.
    #[error("database call timed out")]
    Timeout,
    /// An error occurred while attempting to persist events using an
    /// outdated view of the event stream.
    ///
    /// This error indicates that another process has committed an event that
    /// matches the append condition after the cursor it was scoped to. The
    /// caller may re-project its decision model and retry.
    #[error("concurrent modification error")]
    Concurrency,
}
