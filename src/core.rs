pub mod agent;
pub mod backoff;
pub mod broker;
pub mod error;
pub mod identity;
pub mod reading;
pub mod shutdown;
pub mod supervisor;
