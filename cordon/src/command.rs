//! Commands and their execution outcomes.
//!
//! A [`Command`] is the tagged serialized form of an application request:
//! a `type` discriminator, an opaque JSON payload, and free-form metadata.
//! Handlers are resolved by the discriminator from a registry, so the
//! command taxonomy lives in data rather than in a class hierarchy.
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::condition::AppendCondition;
use crate::event::AppendEvent;

/// The serialized form of a command.
///
/// The `type` field is the discriminator used for handler dispatch and is
/// required to be non-empty; executors reject a command with an empty
/// discriminator before opening a transaction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Command {
    /// The command type discriminator.
    #[serde(rename = "type")]
    pub command_type: String,
    /// The command payload.
    #[serde(default)]
    pub payload: Value,
    /// Free-form metadata persisted with the command audit row.
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub metadata: Map<String, Value>,
}

impl Command {
    /// Creates a command from a type name and a serializable payload.
    ///
    /// # Errors
    ///
    /// Returns a `serde_json::Error` if the payload cannot be represented
    /// as JSON.
    pub fn new(
        command_type: impl Into<String>,
        payload: impl Serialize,
    ) -> Result<Self, serde_json::Error> {
        Ok(Self {
            command_type: command_type.into(),
            payload: serde_json::to_value(payload)?,
            metadata: Map::new(),
        })
    }

    /// Attaches a metadata entry.
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Deserializes the payload into a typed value.
    pub fn payload_as<T: serde::de::DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_value(self.payload.clone())
    }
}

/// The outcome a handler reports back to the executor.
#[derive(Debug, Clone, PartialEq)]
pub enum CommandResult<P> {
    /// Candidate events to append under the given condition.
    Append {
        events: Vec<AppendEvent<P>>,
        condition: AppendCondition,
    },
    /// The state already reflects the command; nothing to append.
    NoOp { reason: String },
}

impl<P> CommandResult<P> {
    /// Creates the appending outcome.
    pub fn append(events: Vec<AppendEvent<P>>, condition: AppendCondition) -> Self {
        Self::Append { events, condition }
    }

    /// Creates the no-op outcome with the reason the command was idempotent.
    pub fn empty(reason: impl Into<String>) -> Self {
        Self::NoOp {
            reason: reason.into(),
        }
    }
}

/// The observable result of executing a command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Execution {
    /// New events were appended; carries their shared transaction id.
    Created { transaction_id: String },
    /// The handler reported a no-op; carries its reason.
    Idempotent { reason: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct OpenWallet {
        wallet_id: String,
        owner: String,
        initial_balance: i64,
    }

    #[test]
    fn it_serializes_with_a_type_discriminator() {
        let command = Command::new(
            "OpenWallet",
            OpenWallet {
                wallet_id: "w1".into(),
                owner: "alice".into(),
                initial_balance: 1000,
            },
        )
        .unwrap();

        let json = serde_json::to_value(&command).unwrap();
        assert_eq!(json["type"], "OpenWallet");
        assert_eq!(json["payload"]["wallet_id"], "w1");
    }

    #[test]
    fn it_round_trips_the_payload() {
        let payload = OpenWallet {
            wallet_id: "w1".into(),
            owner: "alice".into(),
            initial_balance: 1000,
        };
        let command = Command::new("OpenWallet", &payload).unwrap();
        assert_eq!(command.payload_as::<OpenWallet>().unwrap(), payload);
    }

    #[test]
    fn it_deserializes_a_command_without_metadata() {
        let command: Command =
            serde_json::from_str(r#"{"type": "OpenWallet", "payload": {}}"#).unwrap();
        assert_eq!(command.command_type, "OpenWallet");
        assert!(command.metadata.is_empty());
    }

    #[test]
    fn it_carries_metadata() {
        let command = Command::new("OpenWallet", ())
            .unwrap()
            .with_metadata("correlation_id", "abc-1");
        assert_eq!(
            command.metadata.get("correlation_id"),
            Some(&Value::String("abc-1".into()))
        );
    }
}
