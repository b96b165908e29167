//! Device identity and the IoT Hub connection string.

use std::fmt::{Debug, Formatter};
use std::str::FromStr;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;

use crate::prelude::*;

/// Parsed IoT Hub device connection string:
/// `HostName=<host>;DeviceId=<id>;SharedAccessKey=<base64>`.
///
/// Unknown segments such as `GatewayHostName` are accepted and ignored.
#[derive(Clone, PartialEq)]
pub struct ConnectionString {
    host_name: String,
    device_id: String,
    key_name: Option<String>,
    key: Vec<u8>,
}

impl ConnectionString {
    pub fn host_name(&self) -> &str {
        &self.host_name
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    /// Shared access policy name, present for policy-scoped credentials only.
    pub fn key_name(&self) -> Option<&str> {
        self.key_name.as_deref()
    }

    /// Decoded shared access key.
    pub fn key(&self) -> &[u8] {
        &self.key
    }
}

impl FromStr for ConnectionString {
    type Err = Error;

    fn from_str(string: &str) -> Result<Self, Self::Err> {
        let mut host_name = None;
        let mut device_id = None;
        let mut key_name = None;
        let mut key = None;

        for (index, segment) in string.trim().split(';').filter(|segment| !segment.is_empty()).enumerate() {
            // The key itself may end with `=` padding, so only the first `=` separates.
            let (name, value) = segment
                .split_once('=')
                .ok_or_else(|| Error::configuration(format!("connection string segment #{} is malformed", index + 1)))?;
            if value.is_empty() {
                return Err(Error::configuration(format!("`{}` is empty", name)));
            }
            match name {
                "HostName" => host_name = Some(value.to_string()),
                "DeviceId" => device_id = Some(value.to_string()),
                "SharedAccessKeyName" => key_name = Some(value.to_string()),
                "SharedAccessKey" => {
                    key = Some(
                        BASE64
                            .decode(value)
                            .map_err(|error| Error::configuration(format!("`SharedAccessKey` is not base64: {}", error)))?,
                    )
                }
                _ => debug!("Ignoring connection string segment `{}`.", name),
            }
        }

        Ok(Self {
            host_name: host_name.ok_or_else(|| missing("HostName"))?,
            device_id: device_id.ok_or_else(|| missing("DeviceId"))?,
            key_name,
            key: key.ok_or_else(|| missing("SharedAccessKey"))?,
        })
    }
}

/// Never reveals the key, connection strings end up in logs via `{:?}`.
impl Debug for ConnectionString {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionString")
            .field("host_name", &self.host_name)
            .field("device_id", &self.device_id)
            .field("key_name", &self.key_name)
            .field("key", &"<redacted>")
            .finish()
    }
}

fn missing(name: &str) -> Error {
    Error::configuration(format!("connection string has no `{}`", name))
}

/// A device name and its credential. Loaded once at agent start and never changed.
#[derive(Clone, Debug, PartialEq)]
pub struct DeviceIdentity {
    name: String,
    credential: ConnectionString,
}

impl DeviceIdentity {
    /// Builds the identity and checks that the credential belongs to the device.
    pub fn new<N: Into<String>>(name: N, connection_string: &str) -> Result<Self, Error> {
        let name = name.into();
        let credential: ConnectionString = connection_string
            .parse()
            .map_err(|error: Error| Error::configuration(format!("device `{}`: {}", name, error.message())))?;
        if credential.device_id() != name {
            return Err(Error::configuration(format!(
                "device `{}`: connection string is issued for `{}`",
                name,
                credential.device_id()
            )));
        }
        Ok(Self { name, credential })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn credential(&self) -> &ConnectionString {
        &self.credential
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    type Result = crate::prelude::Result<()>;

    const CONNECTION_STRING: &str = "HostName=example-hub.azure-devices.net;DeviceId=NAC;SharedAccessKey=cmlkZWF1LWNhbmFsLXRlc3Qta2V5LTAxMjM0NTY3ODk=";

    #[test]
    fn parse_ok() -> Result {
        let credential: ConnectionString = CONNECTION_STRING.parse()?;
        assert_eq!(credential.host_name(), "example-hub.azure-devices.net");
        assert_eq!(credential.device_id(), "NAC");
        assert_eq!(credential.key_name(), None);
        assert_eq!(credential.key(), b"rideau-canal-test-key-0123456789");
        Ok(())
    }

    #[test]
    fn parse_ignores_unknown_segments_and_trailing_separator() -> Result {
        let credential: ConnectionString = format!("{};GatewayHostName=edge.local;", CONNECTION_STRING).parse()?;
        assert_eq!(credential.device_id(), "NAC");
        Ok(())
    }

    #[test]
    fn parse_missing_key_fails() {
        let error = "HostName=example-hub.azure-devices.net;DeviceId=NAC"
            .parse::<ConnectionString>()
            .unwrap_err();
        assert!(matches!(error, Error::Configuration(_)));
        assert!(error.to_string().contains("SharedAccessKey"));
    }

    #[test]
    fn parse_malformed_segment_fails() {
        assert!("HostName=example-hub.azure-devices.net;garbage".parse::<ConnectionString>().is_err());
    }

    #[test]
    fn parse_invalid_base64_fails() {
        assert!("HostName=h;DeviceId=NAC;SharedAccessKey=not base64!"
            .parse::<ConnectionString>()
            .is_err());
    }

    #[test]
    fn debug_redacts_key() -> Result {
        let credential: ConnectionString = CONNECTION_STRING.parse()?;
        let rendered = format!("{:?}", credential);
        assert!(rendered.contains("<redacted>"));
        assert!(!rendered.contains("cmlkZWF1"));
        Ok(())
    }

    #[test]
    fn identity_ok() -> Result {
        let identity = DeviceIdentity::new("NAC", CONNECTION_STRING)?;
        assert_eq!(identity.name(), "NAC");
        assert_eq!(identity.credential().host_name(), "example-hub.azure-devices.net");
        Ok(())
    }

    #[test]
    fn identity_for_another_device_fails() {
        let error = DeviceIdentity::new("DowsLake", CONNECTION_STRING).unwrap_err();
        assert!(matches!(error, Error::Configuration(_)));
        assert!(error.to_string().contains("issued for `NAC`"));
    }
}
