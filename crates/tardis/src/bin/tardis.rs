use std::rc::Rc;

use chrono::{DateTime, TimeDelta, Utc};
use clap::Parser;
use serde::Serialize;
use serde_json::json;

use tardis::batchsystem::BatchSystemAdapter;
use tardis::batchsystem::htcondor::HTCondorBatchSystem;
use tardis::common::cli::{
    BatchSystemCommand, BatchSystemOpts, CommonOpts, DroneOpts, RootOptions, SiteCommand,
    SiteOpts, SubCommand,
};
use tardis::common::config::Configuration;
use tardis::common::error::handle_exceptions;
use tardis::common::executor::{CommandRunner, ShellExecutor};
use tardis::common::setup::setup_logging;
use tardis::site::htcondor::HTCondorSiteAdapter;
use tardis::site::{DroneDescriptor, SiteAdapter};

fn print_json<T: Serialize>(value: &T) -> tardis::Result<()> {
    let output = serde_json::to_string_pretty(value)
        .map_err(|error| tardis::Error::GenericError(error.into()))?;
    println!("{output}");
    Ok(())
}

fn drone_descriptor(opts: &DroneOpts) -> DroneDescriptor {
    let created = TimeDelta::from_std(opts.age)
        .ok()
        .and_then(|age| Utc::now().checked_sub_signed(age))
        .unwrap_or(DateTime::<Utc>::MIN_UTC);
    DroneDescriptor::new(opts.drone_uuid.as_str())
        .with_remote_resource_uuid(opts.remote_id.as_str())
        .with_created(created)
}

async fn command_site(
    common: &CommonOpts,
    config: &Configuration,
    opts: SiteOpts,
) -> tardis::Result<()> {
    let executor: Rc<dyn CommandRunner> = Rc::new(ShellExecutor::new(common.shell.as_str()));
    let adapter = HTCondorSiteAdapter::new(
        &opts.site,
        config.site(&opts.site)?,
        &opts.machine_type,
        executor,
    )?;

    let drone = match opts.subcmd {
        SiteCommand::Deploy(deploy) => {
            let drone = DroneDescriptor::new(deploy.drone_uuid);
            handle_exceptions(adapter.deploy_resource(&drone)).await?
        }
        SiteCommand::Status(opts) => {
            let drone = drone_descriptor(&opts);
            handle_exceptions(adapter.resource_status(&drone)).await?
        }
        SiteCommand::Stop(opts) => {
            let drone = drone_descriptor(&opts);
            handle_exceptions(adapter.stop_resource(&drone)).await?
        }
        SiteCommand::Terminate(opts) => {
            let drone = drone_descriptor(&opts);
            handle_exceptions(adapter.terminate_resource(&drone)).await?
        }
    };
    print_json(&drone)
}

async fn command_batch_system(
    common: &CommonOpts,
    config: &Configuration,
    opts: BatchSystemOpts,
) -> tardis::Result<()> {
    let executor: Rc<dyn CommandRunner> = Rc::new(ShellExecutor::new(common.shell.as_str()));
    let batch_system = HTCondorBatchSystem::new(config.batch_system()?, executor);

    match opts.subcmd {
        BatchSystemCommand::Status(opts) => {
            let status = batch_system.get_machine_status(&opts.drone_uuid).await?;
            print_json(&json!({
                "drone_uuid": opts.drone_uuid,
                "machine_status": status,
            }))
        }
        BatchSystemCommand::Ratios(opts) => {
            let ratios = batch_system.get_resource_ratios(&opts.drone_uuid).await?;
            let allocation = batch_system.get_allocation(&opts.drone_uuid).await?;
            let utilization = batch_system.get_utilization(&opts.drone_uuid).await?;
            print_json(&json!({
                "drone_uuid": opts.drone_uuid,
                "ratios": ratios,
                "allocation": allocation,
                "utilization": utilization,
            }))
        }
        BatchSystemCommand::Drain(opts) => batch_system.drain_machine(&opts.drone_uuid).await,
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> tardis::Result<()> {
    let top_opts = RootOptions::parse();

    setup_logging(top_opts.common.debug);

    let result = match Configuration::load(&top_opts.common.config) {
        Ok(config) => match top_opts.subcmd {
            SubCommand::Site(opts) => command_site(&top_opts.common, &config, opts).await,
            SubCommand::BatchSystem(opts) => {
                command_batch_system(&top_opts.common, &config, opts).await
            }
        },
        Err(error) => Err(error),
    };

    if let Err(e) = result {
        log::error!("{e}");
        std::process::exit(1);
    }

    Ok(())
}
