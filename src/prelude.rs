pub use crate::core::broker::{Broker, Connection, Payload};
pub use crate::core::error::Error;
pub use crate::core::identity::DeviceIdentity;
pub use crate::core::reading::Reading;
pub use crate::core::shutdown::Signal;
pub use anyhow::{anyhow, Context};
pub use chrono::prelude::*;
pub use crossbeam_channel::{Receiver, Sender};
pub use log::{debug, error, info, warn};
pub use serde::{Deserialize, Serialize};
pub use std::sync::{Arc, Mutex};
pub use std::thread;
pub use std::time::Duration;

pub type Result<T = (), E = anyhow::Error> = std::result::Result<T, E>;
