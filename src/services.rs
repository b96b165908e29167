//! Broker transports.

use crate::prelude::*;
use crate::settings::Settings;

pub mod console;
pub mod iot_hub;

/// Picks the transport shared by all the agents.
pub fn new(settings: &Settings, dry_run: bool) -> Arc<dyn Broker> {
    if dry_run {
        Arc::new(console::Console)
    } else {
        Arc::new(settings.iot_hub.clone())
    }
}
