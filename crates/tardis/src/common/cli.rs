use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

// Common CLI options
#[derive(Parser)]
pub struct CommonOpts {
    /// Path to the TOML configuration file
    #[arg(
        long,
        value_hint = clap::ValueHint::FilePath,
        global = true,
        env = "TARDIS_CONFIG",
        default_value = "tardis.toml",
        help_heading("GLOBAL OPTIONS")
    )]
    pub config: PathBuf,

    /// Shell used to run HTCondor commands
    #[arg(
        long,
        global = true,
        default_value = "sh",
        help_heading("GLOBAL OPTIONS"),
        hide_short_help(true)
    )]
    pub shell: String,

    /// Enables more detailed log output
    #[arg(
        long,
        env = "TARDIS_DEBUG",
        global = true,
        help_heading("GLOBAL OPTIONS"),
        hide_short_help(true)
    )]
    pub debug: bool,
}

// Root CLI options
#[derive(Parser)]
#[command(
    author,
    about,
    version(crate::TARDIS_VERSION),
    disable_help_subcommand(true),
    help_expected(true)
)]
pub struct RootOptions {
    #[clap(flatten)]
    pub common: CommonOpts,

    #[clap(subcommand)]
    pub subcmd: SubCommand,
}

#[derive(Parser)]
pub enum SubCommand {
    /// Manage drones of a site
    Site(SiteOpts),
    /// Query the overlay batch system
    BatchSystem(BatchSystemOpts),
}

#[derive(Parser)]
pub struct SiteOpts {
    /// Name of the site in the configuration file
    pub site: String,

    /// Machine type of the drone
    #[arg(long)]
    pub machine_type: String,

    #[clap(subcommand)]
    pub subcmd: SiteCommand,
}

#[derive(Parser)]
pub enum SiteCommand {
    /// Submit a new drone
    Deploy(DeployOpts),
    /// Print the current status of a drone
    Status(DroneOpts),
    /// Stop a drone
    Stop(DroneOpts),
    /// Terminate a drone
    Terminate(DroneOpts),
}

#[derive(Parser)]
pub struct DeployOpts {
    /// Uuid of the new drone
    #[arg(long)]
    pub drone_uuid: String,
}

#[derive(Parser)]
pub struct DroneOpts {
    /// Uuid of the drone
    #[arg(long)]
    pub drone_uuid: String,

    /// Job id assigned to the drone at deployment
    #[arg(long)]
    pub remote_id: String,

    /// Time elapsed since the drone was deployed, e.g. `5m` or `1h 30m`
    #[arg(long, value_parser = parse_age, default_value = "0s")]
    pub age: Duration,
}

fn parse_age(value: &str) -> Result<Duration, humantime::DurationError> {
    humantime::parse_duration(value)
}

#[derive(Parser)]
pub struct BatchSystemOpts {
    #[clap(subcommand)]
    pub subcmd: BatchSystemCommand,
}

#[derive(Parser)]
pub enum BatchSystemCommand {
    /// Print the machine status of a drone
    Status(MachineOpts),
    /// Print resource ratios, allocation and utilization of a drone
    Ratios(MachineOpts),
    /// Drain the machine of a drone
    Drain(MachineOpts),
}

#[derive(Parser)]
pub struct MachineOpts {
    /// Uuid of the drone
    #[arg(long)]
    pub drone_uuid: String,
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use clap::Parser;

    use super::{BatchSystemCommand, RootOptions, SiteCommand, SubCommand};

    #[test]
    fn parse_site_command() {
        let opts = RootOptions::try_parse_from([
            "tardis",
            "--config",
            "test.toml",
            "site",
            "TestSite",
            "--machine-type",
            "test2large",
            "status",
            "--drone-uuid",
            "test-123",
            "--remote-id",
            "1351043",
            "--age",
            "12m",
        ])
        .unwrap();
        assert_eq!(opts.common.config.to_str(), Some("test.toml"));
        let SubCommand::Site(site) = opts.subcmd else {
            panic!("Expected site command");
        };
        assert_eq!(site.site, "TestSite");
        assert_eq!(site.machine_type, "test2large");
        match site.subcmd {
            SiteCommand::Status(drone) => {
                assert_eq!(drone.drone_uuid, "test-123");
                assert_eq!(drone.remote_id, "1351043");
                assert_eq!(drone.age, Duration::from_secs(720));
            }
            _ => panic!("Expected status command"),
        }
    }

    #[test]
    fn parse_batch_system_command() {
        let opts =
            RootOptions::try_parse_from(["tardis", "batch-system", "drain", "--drone-uuid", "x"])
                .unwrap();
        assert!(matches!(
            opts.subcmd,
            SubCommand::BatchSystem(batch_system)
                if matches!(&batch_system.subcmd, BatchSystemCommand::Drain(m) if m.drone_uuid == "x")
        ));
    }

    #[test]
    fn invalid_age() {
        let result = RootOptions::try_parse_from([
            "tardis",
            "site",
            "TestSite",
            "--machine-type",
            "test2large",
            "stop",
            "--drone-uuid",
            "test-123",
            "--remote-id",
            "1",
            "--age",
            "yesterday",
        ]);
        assert!(result.is_err());
    }
}
