//! Builds one agent per configured device and runs each in its own named thread.

use std::collections::BTreeSet;
use std::thread::JoinHandle;

use crate::core::agent::{Agent, Report};
use crate::core::shutdown::Trigger;
use crate::logging::Log;
use crate::prelude::*;
use crate::settings::Settings;

/// Command-line adjustments applied on top of the settings.
#[derive(Debug, Default, Clone)]
pub struct Overrides {
    /// Run only these devices.
    pub device_ids: Option<Vec<String>>,

    pub ticks: Option<u64>,
    pub interval: Option<Duration>,
}

/// How an agent has finished.
#[derive(Debug)]
pub struct Outcome {
    pub device_id: String,
    pub result: Result<Report>,
}

/// Builds all the enabled agents.
///
/// Fails on the first configuration error so that nothing is started with a broken setup.
pub fn build_agents(settings: &Settings, overrides: &Overrides) -> Result<Vec<Agent>, Error> {
    if let Some(device_ids) = &overrides.device_ids {
        let unknown: BTreeSet<_> = device_ids
            .iter()
            .filter(|device_id| !settings.devices.contains_key(device_id.as_str()))
            .collect();
        if !unknown.is_empty() {
            return Err(Error::configuration(format!("unknown devices: {:?}", unknown)));
        }
    }

    let mut agents = Vec::new();
    for (device_id, device) in settings.devices.iter() {
        if let Some(device_ids) = &overrides.device_ids {
            if !device_ids.contains(device_id) {
                debug!("[{}] Not selected.", device_id);
                continue;
            }
        }
        if device.disabled {
            warn!("[{}] Device is disabled.", device_id);
            continue;
        }
        if device.location.trim().is_empty() {
            return Err(Error::configuration(format!("device `{}`: `location` is empty", device_id)));
        }

        let identity = DeviceIdentity::new(device_id.as_str(), &device.connection_string(device_id)?)?;
        let interval = overrides.interval.unwrap_or_else(|| {
            Duration::from_secs(device.interval_secs.unwrap_or(settings.defaults.interval_secs))
        });
        debug!("[{}] {:?} every {:?}", device_id, identity, interval);

        let mut agent = Agent::new(identity, device.location.as_str())
            .interval(interval)
            .ticks(overrides.ticks)
            .backoff(settings.retry);
        if let Some(seed) = device.seed {
            agent = agent.seed(seed);
        }
        agents.push(agent);
    }

    if agents.is_empty() {
        return Err(Error::configuration("no devices to run"));
    }
    Ok(agents)
}

/// A running agent thread and its device ID.
pub type Handle = (String, JoinHandle<Result<Report, Error>>);

/// Spawns every agent in a thread named after its device.
///
/// If a thread cannot be spawned, the agents started so far are stopped and joined.
pub fn spawn_all(agents: Vec<Agent>, broker: Arc<dyn Broker>, trigger: &Trigger, signal: &Signal) -> Result<Vec<Handle>> {
    spawn_each(agents, trigger, |agent| spawn(agent, broker.clone(), signal.clone()))
}

fn spawn(agent: Agent, broker: Arc<dyn Broker>, signal: Signal) -> Result<Handle> {
    let device_id = agent.name().to_string();
    info!("Spawning agent `{}`…", device_id);
    let handle = thread::Builder::new()
        .name(format!("agent::{}", device_id))
        .spawn(move || agent.run(broker.as_ref(), &signal))
        .with_context(|| format!("could not spawn agent `{}`", device_id))?;
    Ok((device_id, handle))
}

fn spawn_each<S>(agents: Vec<Agent>, trigger: &Trigger, mut spawn: S) -> Result<Vec<Handle>>
where
    S: FnMut(Agent) -> Result<Handle>,
{
    let mut handles = Vec::with_capacity(agents.len());
    for agent in agents {
        match spawn(agent) {
            Ok(handle) => handles.push(handle),
            Err(error) => {
                error!("Stopping {} spawned agents: {:#}", handles.len(), error);
                trigger.trigger();
                join(handles);
                return Err(error);
            }
        }
    }
    Ok(handles)
}

/// Waits until every agent has released its connection.
pub fn join(handles: Vec<Handle>) -> Vec<Outcome> {
    handles
        .into_iter()
        .map(|(device_id, handle)| {
            let result = match handle.join() {
                Ok(result) => result.map_err(anyhow::Error::from),
                Err(_) => Err(anyhow!("the agent thread has panicked")),
            }
            .log(|| format!("[{}] Agent has failed", device_id));
            Outcome { device_id, result }
        })
        .collect()
}

/// Logs the totals and fails if any agent has failed.
pub fn summarize(outcomes: &[Outcome]) -> Result {
    let mut failed = Vec::new();
    let mut total = Report::default();
    for outcome in outcomes {
        match &outcome.result {
            Ok(report) => {
                total.sent += report.sent;
                total.failed += report.failed;
            }
            Err(_) => failed.push(outcome.device_id.as_str()),
        }
    }
    info!("Finished: {} messages sent, {} failed.", total.sent, total.failed);
    if failed.is_empty() {
        Ok(())
    } else {
        Err(anyhow!("{} of {} agents failed: {}", failed.len(), outcomes.len(), failed.join(", ")))
    }
}
