//! Entry point.

use structopt::StructOpt;

use crate::core::shutdown;
use crate::core::supervisor::{self, Overrides};
use crate::opts::Opts;
use crate::prelude::*;

pub mod core;
pub mod logging;
pub mod opts;
pub mod prelude;
pub mod services;
pub mod settings;

fn main() -> Result {
    let opts: Opts = Opts::from_args();
    logging::init(&opts)?;

    info!("Reading settings…");
    let settings = settings::read(&opts.settings)?;
    debug!("Devices: {:?}", settings.devices.keys().collect::<Vec<_>>());

    let overrides = Overrides {
        device_ids: opts.device_ids.clone(),
        ticks: opts.ticks,
        interval: opts.interval_secs.map(Duration::from_secs),
    };
    let agents = supervisor::build_agents(&settings, &overrides)?;
    let broker = services::new(&settings, opts.dry_run);

    let (trigger, signal) = shutdown::channel();
    let handler_trigger = trigger.clone();
    ctrlc::set_handler(move || {
        info!("Interrupted, stopping the agents…");
        handler_trigger.trigger();
    })
    .context("could not set the interruption handler")?;

    info!("Starting {} agents…", agents.len());
    let handles = supervisor::spawn_all(agents, broker, &trigger, &signal)?;
    let outcomes = supervisor::join(handles);
    supervisor::summarize(&outcomes)
}
