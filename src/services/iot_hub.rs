//! [Azure IoT Hub](https://docs.microsoft.com/azure/iot-hub/) device-to-cloud messages over HTTPS.
//!
//! Every request carries a shared access signature derived from the device key.
//! The signature is renewed when less than a fifth of its lifetime is left.

use std::net::{TcpStream, ToSocketAddrs};

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use hmac::{Hmac, Mac};
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use reqwest::blocking::{Client, ClientBuilder, RequestBuilder};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use sha2::Sha256;
use structopt::clap::crate_version;

use crate::core::broker::CONTENT_TYPE as PAYLOAD_CONTENT_TYPE;
use crate::core::identity::ConnectionString;
use crate::prelude::*;

pub const USER_AGENT: &str = concat!(
    "Rideau Telemetry / ",
    crate_version!(),
    " (Rust)"
);

pub const HTTPS_PORT: u16 = 443;

/// Longest accepted shared access signature lifetime, one year.
pub const MAX_TOKEN_TTL_SECS: u64 = 365 * 24 * 60 * 60;

/// Characters left as is when encoding a URI component: alphanumerics and `-._~`.
const URI_COMPONENT: &AsciiSet = &NON_ALPHANUMERIC.remove(b'-').remove(b'.').remove(b'_').remove(b'~');

#[derive(Deserialize, Debug, Clone, Serialize, PartialEq)]
pub struct IotHub {
    #[serde(default = "default_api_version")]
    pub api_version: String,

    /// Shared access signature lifetime in seconds, clamped to `1..=MAX_TOKEN_TTL_SECS`.
    #[serde(default = "default_token_ttl_secs")]
    pub token_ttl_secs: u64,

    /// Connect and request timeout in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_api_version() -> String {
    "2020-03-13".into()
}

const fn default_token_ttl_secs() -> u64 {
    3600
}

const fn default_timeout_secs() -> u64 {
    10
}

impl Default for IotHub {
    fn default() -> Self {
        Self {
            api_version: default_api_version(),
            token_ttl_secs: default_token_ttl_secs(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl IotHub {
    fn token_ttl_secs(&self) -> i64 {
        self.token_ttl_secs.clamp(1, MAX_TOKEN_TTL_SECS) as i64
    }
}

impl Broker for IotHub {
    fn connect(&self, identity: &DeviceIdentity) -> Result<Box<dyn Connection>, Error> {
        let credential = identity.credential();
        let timeout = Duration::from_secs(self.timeout_secs);

        debug!("[{}] Probing {}…", identity.name(), credential.host_name());
        probe(credential.host_name(), HTTPS_PORT, timeout)?;
        let client = client_builder(timeout)
            .build()
            .map_err(|error| Error::connection(format!("could not build the HTTP client: {}", error)))?;
        info!("[{}] Connected to {}.", identity.name(), credential.host_name());

        Ok(Box::new(IotHubConnection {
            device: identity.name().to_string(),
            client: Some(client),
            url: events_url(credential, &self.api_version),
            credential: credential.clone(),
            token_ttl_secs: self.token_ttl_secs(),
            token: None,
        }))
    }
}

struct IotHubConnection {
    device: String,

    /// `None` once disconnected.
    client: Option<Client>,

    url: String,
    credential: ConnectionString,
    token_ttl_secs: i64,
    token: Option<SasToken>,
}

struct SasToken {
    value: String,

    /// Unix time.
    expires_at: i64,
}

impl IotHubConnection {
    /// Returns the current token, renewing it if it is about to expire.
    fn token(&mut self) -> Result<String, Error> {
        let now = Utc::now().timestamp();
        let is_fresh =
            matches!(&self.token, Some(token) if now.saturating_add(self.token_ttl_secs / 5) < token.expires_at);
        if !is_fresh {
            let expires_at = now.saturating_add(self.token_ttl_secs);
            debug!("[{}] Signing a new token valid until {}.", self.device, expires_at);
            self.token = Some(SasToken {
                value: sas_token(&self.credential, expires_at)?,
                expires_at,
            });
        }
        self.token
            .as_ref()
            .map(|token| token.value.clone())
            .ok_or_else(|| Error::publish("no token"))
    }

    /// Builds the device-to-cloud request for the payload.
    fn request(&mut self, payload: &Payload) -> Result<RequestBuilder, Error> {
        let token = self.token()?;
        let client = self
            .client
            .as_ref()
            .ok_or_else(|| Error::publish("the connection is closed"))?;

        let mut request = client
            .post(&self.url)
            .header(AUTHORIZATION, token)
            .header(CONTENT_TYPE, PAYLOAD_CONTENT_TYPE)
            .header("iothub-contenttype", PAYLOAD_CONTENT_TYPE)
            .header("iothub-contentencoding", "utf-8");
        for (name, value) in payload.properties.iter() {
            request = request.header(format!("iothub-app-{}", name), value.as_str());
        }
        Ok(request.body(payload.body.clone()))
    }
}

impl Connection for IotHubConnection {
    fn send(&mut self, payload: &Payload) -> Result<(), Error> {
        self.request(payload)?
            .send()
            .and_then(|response| response.error_for_status())
            .map_err(|error| Error::publish(error.to_string()))?;
        Ok(())
    }

    fn disconnect(&mut self) -> Result<(), Error> {
        if self.client.take().is_some() {
            debug!("[{}] HTTP client dropped.", self.device);
        }
        Ok(())
    }
}

fn client_builder(timeout: Duration) -> ClientBuilder {
    let mut headers = HeaderMap::new();
    headers.insert(reqwest::header::USER_AGENT, HeaderValue::from_static(USER_AGENT));
    Client::builder()
        .gzip(true)
        .use_rustls_tls()
        .default_headers(headers)
        .connect_timeout(timeout)
        .timeout(timeout)
}

/// Checks that the endpoint accepts TCP connections.
pub fn probe(host: &str, port: u16, timeout: Duration) -> Result<(), Error> {
    let addresses = (host, port)
        .to_socket_addrs()
        .map_err(|error| Error::connection(format!("could not resolve `{}`: {}", host, error)))?;
    let mut last_error = None;
    for address in addresses {
        match TcpStream::connect_timeout(&address, timeout) {
            Ok(_) => return Ok(()),
            Err(error) => last_error = Some(error),
        }
    }
    Err(Error::connection(match last_error {
        Some(error) => format!("`{}:{}` is unreachable: {}", host, port, error),
        None => format!("`{}` resolves to no address", host),
    }))
}

/// `https://<host>/devices/<device>/messages/events?api-version=<version>`
fn events_url(credential: &ConnectionString, api_version: &str) -> String {
    format!(
        "https://{}/devices/{}/messages/events?api-version={}",
        credential.host_name(),
        utf8_percent_encode(credential.device_id(), URI_COMPONENT),
        api_version,
    )
}

/// Signs the device resource URI until the given Unix time.
pub fn sas_token(credential: &ConnectionString, expires_at: i64) -> Result<String, Error> {
    let resource = format!("{}/devices/{}", credential.host_name(), credential.device_id());
    let resource = utf8_percent_encode(&resource, URI_COMPONENT).to_string();

    let mut mac = Hmac::<Sha256>::new_from_slice(credential.key())
        .map_err(|error| Error::configuration(format!("unusable `SharedAccessKey`: {}", error)))?;
    mac.update(format!("{}\n{}", resource, expires_at).as_bytes());
    let signature = BASE64.encode(mac.finalize().into_bytes());

    let mut token = format!(
        "SharedAccessSignature sr={}&sig={}&se={}",
        resource,
        utf8_percent_encode(&signature, URI_COMPONENT),
        expires_at,
    );
    if let Some(key_name) = credential.key_name() {
        token.push_str("&skn=");
        token.push_str(&utf8_percent_encode(key_name, URI_COMPONENT).to_string());
    }
    Ok(token)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::collections::BTreeSet;
    use std::net::TcpListener;

    type Result = crate::prelude::Result<()>;

    const CONNECTION_STRING: &str =
        "HostName=example-hub.azure-devices.net;DeviceId=NAC;SharedAccessKey=cmlkZWF1LWNhbmFsLXRlc3Qta2V5LTAxMjM0NTY3ODk=";

    #[test]
    fn sas_token_ok() -> Result {
        let credential: ConnectionString = CONNECTION_STRING.parse()?;
        assert_eq!(
            sas_token(&credential, 1_700_000_000)?,
            "SharedAccessSignature sr=example-hub.azure-devices.net%2Fdevices%2FNAC&sig=vvNpUEIKBEvkGfzxlAq9awzgyug%2BJ2W%2FyqZ3BJKvW3Y%3D&se=1700000000",
        );
        Ok(())
    }

    #[test]
    fn sas_token_with_policy_name() -> Result {
        let credential: ConnectionString = format!("{};SharedAccessKeyName=device policy", CONNECTION_STRING).parse()?;
        assert!(sas_token(&credential, 1_700_000_000)?.ends_with("&se=1700000000&skn=device%20policy"));
        Ok(())
    }

    #[test]
    fn events_url_ok() -> Result {
        let credential: ConnectionString = CONNECTION_STRING.parse()?;
        assert_eq!(
            events_url(&credential, "2020-03-13"),
            "https://example-hub.azure-devices.net/devices/NAC/messages/events?api-version=2020-03-13",
        );
        Ok(())
    }

    #[test]
    fn probe_reachable_ok() -> Result {
        let listener = TcpListener::bind("127.0.0.1:0")?;
        let port = listener.local_addr()?.port();
        probe("127.0.0.1", port, Duration::from_secs(1))?;
        Ok(())
    }

    #[test]
    fn probe_unreachable_is_connection_error() -> Result {
        let port = TcpListener::bind("127.0.0.1:0")?.local_addr()?.port();
        let error = probe("127.0.0.1", port, Duration::from_secs(1)).unwrap_err();
        assert!(matches!(error, Error::Connection(_)));
        assert!(error.is_transient());
        Ok(())
    }

    #[test]
    fn token_is_reused_until_renewal() -> Result {
        let mut connection = IotHubConnection {
            device: "NAC".into(),
            client: None,
            url: String::new(),
            credential: CONNECTION_STRING.parse()?,
            token_ttl_secs: 3600,
            token: None,
        };
        let first = connection.token()?;
        assert_eq!(connection.token()?, first);

        if let Some(token) = connection.token.as_mut() {
            token.expires_at = Utc::now().timestamp() + 60;
        }
        let renewed = connection.token()?;
        assert!(connection.token.as_ref().map_or(false, |token| token.expires_at > Utc::now().timestamp() + 3000));
        assert!(renewed.starts_with("SharedAccessSignature sr="));
        Ok(())
    }

    fn connection(client: Option<Client>) -> crate::prelude::Result<IotHubConnection> {
        let credential: ConnectionString = CONNECTION_STRING.parse()?;
        Ok(IotHubConnection {
            device: "NAC".into(),
            client,
            url: events_url(&credential, "2020-03-13"),
            credential,
            token_ttl_secs: 3600,
            token: None,
        })
    }

    #[test]
    fn request_ok() -> Result {
        let mut connection = connection(Some(client_builder(Duration::from_secs(1)).build()?))?;
        let reading = Reading::generate("NAC", &mut StdRng::seed_from_u64(1));
        let payload = Payload::from_reading(&reading)?;

        let request = connection.request(&payload)?.build()?;

        assert_eq!(request.method(), &reqwest::Method::POST);
        assert_eq!(
            request.url().as_str(),
            "https://example-hub.azure-devices.net/devices/NAC/messages/events?api-version=2020-03-13",
        );
        let headers = request.headers();
        let names: BTreeSet<_> = headers
            .keys()
            .map(|name| name.as_str())
            .filter(|name| *name != "user-agent")
            .collect();
        assert_eq!(
            names,
            [
                "authorization",
                "content-type",
                "iothub-app-schema-version",
                "iothub-contentencoding",
                "iothub-contenttype",
            ]
            .iter()
            .copied()
            .collect::<BTreeSet<_>>(),
        );
        assert!(headers["authorization"]
            .to_str()?
            .starts_with("SharedAccessSignature sr=example-hub.azure-devices.net%2Fdevices%2FNAC&sig="));
        assert_eq!(headers["content-type"], "application/json");
        assert_eq!(headers["iothub-contenttype"], "application/json");
        assert_eq!(headers["iothub-contentencoding"], "utf-8");
        assert_eq!(headers["iothub-app-schema-version"], "1");
        assert_eq!(
            request.body().and_then(|body| body.as_bytes()),
            Some(payload.body.as_bytes()),
        );
        Ok(())
    }

    fn hub_ttl(token_ttl_secs: u64) -> i64 {
        IotHub {
            token_ttl_secs,
            ..Default::default()
        }
        .token_ttl_secs()
    }

    #[test]
    fn token_ttl_is_clamped() -> Result {
        assert_eq!(hub_ttl(u64::MAX), MAX_TOKEN_TTL_SECS as i64);
        assert_eq!(hub_ttl(0), 1);

        let mut connection = connection(None)?;
        connection.token_ttl_secs = hub_ttl(u64::MAX);
        connection.token()?;
        assert!(connection.token.as_ref().map_or(false, |token| token.expires_at > Utc::now().timestamp()));
        Ok(())
    }

    #[test]
    fn send_after_disconnect_fails() -> Result {
        let mut connection = IotHubConnection {
            device: "NAC".into(),
            client: None,
            url: String::new(),
            credential: CONNECTION_STRING.parse()?,
            token_ttl_secs: 3600,
            token: None,
        };
        connection.disconnect()?;
        let payload = Payload {
            body: "{}".into(),
            properties: Vec::new(),
        };
        assert!(matches!(connection.send(&payload), Err(Error::Publish(_))));
        Ok(())
    }
}
