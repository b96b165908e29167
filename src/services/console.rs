//! Dry-run transport: logs the messages instead of sending them anywhere.

use crate::prelude::*;

#[derive(Debug, Default, Clone, Copy)]
pub struct Console;

impl Broker for Console {
    fn connect(&self, identity: &DeviceIdentity) -> Result<Box<dyn Connection>, Error> {
        info!("[{}] Dry run, nothing leaves this machine.", identity.name());
        Ok(Box::new(ConsoleConnection {
            device: identity.name().to_string(),
            sent: 0,
        }))
    }
}

struct ConsoleConnection {
    device: String,
    sent: u64,
}

impl ConsoleConnection {
    /// The log line for the latest message.
    fn describe(&self, payload: &Payload) -> String {
        format!("[{}] Dry run #{}: {} {:?}", self.device, self.sent, payload.body, payload.properties)
    }
}

impl Connection for ConsoleConnection {
    fn send(&mut self, payload: &Payload) -> Result<(), Error> {
        self.sent += 1;
        info!("{}", self.describe(payload));
        Ok(())
    }

    fn disconnect(&mut self) -> Result<(), Error> {
        debug!("[{}] Dry run finished after {} messages.", self.device, self.sent);
        Ok(())
    }
}
