//! Telemetry agent.
//!
//! An agent owns a single device: it connects with the device identity, then
//! generates, publishes and waits until it is told to stop. Agents share nothing
//! with each other besides the shutdown signal.

use rand::rngs::StdRng;
use rand::SeedableRng;

use crate::core::backoff::Backoff;
use crate::prelude::*;

/// Default publish interval.
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(10);

/// Agent life cycle: `Connecting -> Running -> Stopping -> Disconnected`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum State {
    Connecting,
    Running,
    Stopping,
    Disconnected,
}

/// Publish statistics of a finished run.
#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub struct Report {
    pub sent: u64,
    pub failed: u64,
}

pub struct Agent {
    identity: DeviceIdentity,
    location: String,
    interval: Duration,
    ticks: Option<u64>,
    backoff: Backoff,
    rng: StdRng,
}

impl Agent {
    pub fn new<L: Into<String>>(identity: DeviceIdentity, location: L) -> Self {
        Self {
            identity,
            location: location.into(),
            interval: DEFAULT_INTERVAL,
            ticks: None,
            backoff: Backoff::default(),
            rng: StdRng::from_entropy(),
        }
    }

    pub fn interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Stops the agent after the given number of ticks instead of running until shutdown.
    pub fn ticks(mut self, ticks: Option<u64>) -> Self {
        self.ticks = ticks;
        self
    }

    pub fn backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    /// Makes the readings reproducible.
    pub fn seed(mut self, seed: u64) -> Self {
        self.rng = StdRng::seed_from_u64(seed);
        self
    }

    pub fn name(&self) -> &str {
        self.identity.name()
    }

    /// Runs the agent until the shutdown signal or the tick limit.
    ///
    /// Fails only if the connection could not be established. The connection,
    /// once established, gets released exactly once whatever path leads to `Disconnected`.
    pub fn run(mut self, broker: &dyn Broker, signal: &Signal) -> Result<Report, Error> {
        let mut state = State::Connecting;
        let mut session: Option<Session> = None;
        let mut report = Report::default();
        let mut outcome = Ok(());

        loop {
            debug!("[{}] {:?}", self.name(), state);
            state = match state {
                State::Connecting => match self.connect(broker, signal) {
                    Ok(Some(connection)) => {
                        info!("[{}] Sending telemetry for {}…", self.name(), self.location);
                        session = Some(Session::new(self.name(), connection));
                        State::Running
                    }
                    Ok(None) => State::Disconnected,
                    Err(error) => {
                        error!("[{}] Giving up: {}", self.name(), error);
                        outcome = Err(error);
                        State::Disconnected
                    }
                },
                State::Running => {
                    if let Some(session) = session.as_mut() {
                        self.run_ticks(session.connection.as_mut(), signal, &mut report);
                    }
                    State::Stopping
                }
                State::Stopping => {
                    info!("[{}] Stopped sending messages: {} sent, {} failed.", self.name(), report.sent, report.failed);
                    if let Some(mut session) = session.take() {
                        session.release();
                    }
                    State::Disconnected
                }
                State::Disconnected => break,
            };
        }

        outcome.map(|_| report)
    }

    /// Connects with bounded exponential backoff.
    ///
    /// Returns `None` if the shutdown came before the connection was established.
    fn connect(&mut self, broker: &dyn Broker, signal: &Signal) -> Result<Option<Box<dyn Connection>>, Error> {
        let attempts = self.backoff.attempts.max(1);
        let mut attempt = 0;
        loop {
            if signal.is_triggered() {
                return Ok(None);
            }
            debug!("[{}] Connecting, attempt {}/{}…", self.name(), attempt + 1, attempts);
            match connect(broker, &self.identity) {
                Ok(connection) => return Ok(Some(connection)),
                Err(error) if !error.is_transient() || attempt + 1 >= attempts => return Err(error),
                Err(error) => {
                    let delay = self.backoff.delay(attempt, &mut self.rng);
                    warn!("[{}] {}, retrying in {:?}.", self.name(), error, delay);
                    if signal.wait(delay) {
                        return Ok(None);
                    }
                    attempt += 1;
                }
            }
        }
    }

    fn run_ticks(&mut self, connection: &mut dyn Connection, signal: &Signal, report: &mut Report) {
        let mut tick = 0;
        while !signal.is_triggered() && self.ticks.map_or(true, |limit| tick < limit) {
            tick += 1;
            let reading = self.generate_reading();
            match publish(connection, &reading) {
                Ok(payload) => {
                    info!("[{}] Sent message: {}", self.name(), payload.body);
                    report.sent += 1;
                }
                Err(error) => {
                    warn!("[{}] Tick #{} skipped: {}", self.name(), tick, error);
                    report.failed += 1;
                }
            }
            if self.ticks == Some(tick) {
                break;
            }
            if signal.wait(self.interval) {
                break;
            }
        }
    }

    pub fn generate_reading(&mut self) -> Reading {
        Reading::generate(&self.location, &mut self.rng)
    }
}

/// Opens a single session, no retries.
pub fn connect(broker: &dyn Broker, identity: &DeviceIdentity) -> Result<Box<dyn Connection>, Error> {
    broker.connect(identity)
}

/// Serializes the reading and sends it as one message. Returns what has been sent.
pub fn publish(connection: &mut dyn Connection, reading: &Reading) -> Result<Payload, Error> {
    let payload = Payload::from_reading(reading)?;
    connection.send(&payload)?;
    Ok(payload)
}

/// Owns an established connection and releases it exactly once, on drop at the latest.
struct Session {
    device: String,
    connection: Box<dyn Connection>,
    is_released: bool,
}

impl Session {
    fn new(device: &str, connection: Box<dyn Connection>) -> Self {
        Self {
            device: device.to_string(),
            connection,
            is_released: false,
        }
    }

    fn release(&mut self) {
        if self.is_released {
            return;
        }
        self.is_released = true;
        match self.connection.disconnect() {
            Ok(()) => info!("[{}] Disconnected.", self.device),
            Err(error) => warn!("[{}] Could not disconnect cleanly: {}", self.device, error),
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.release();
    }
}
