//! Message broker primitives the agents publish through.

use crate::prelude::*;

/// Payload schema version, sent as a message property next to the body.
pub const SCHEMA_VERSION: &str = "1";

pub const CONTENT_TYPE: &str = "application/json";

/// One outbound device-to-cloud message.
#[derive(Debug, Clone, PartialEq)]
pub struct Payload {
    pub body: String,

    /// Application properties, sent alongside the body and not inside it.
    /// Names are lowercase, HTTP transports do not preserve the case.
    pub properties: Vec<(&'static str, String)>,
}

impl Payload {
    /// Serializes the reading into a versioned JSON message.
    pub fn from_reading(reading: &Reading) -> Result<Self, Error> {
        let body = reading
            .to_json()
            .map_err(|error| Error::publish(format!("could not serialize the reading: {}", error)))?;
        Ok(Self {
            body,
            properties: vec![("schema-version", SCHEMA_VERSION.into())],
        })
    }
}

/// Opens sessions to the broker.
pub trait Broker: Send + Sync {
    fn connect(&self, identity: &DeviceIdentity) -> Result<Box<dyn Connection>, Error>;
}

/// A session owned exclusively by one agent.
pub trait Connection: Send {
    fn send(&mut self, payload: &Payload) -> Result<(), Error>;

    /// Releases the session. The agent calls this exactly once.
    fn disconnect(&mut self) -> Result<(), Error>;
}
