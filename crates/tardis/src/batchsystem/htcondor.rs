use std::rc::Rc;

use crate::batchsystem::{BatchSystemAdapter, MachineStatus};
use crate::common::cache::{QueueCache, SnapshotRows, SnapshotUpdater};
use crate::common::config::BatchSystemConfiguration;
use crate::common::executor::CommandRunner;
use crate::common::manager::htcondor::{
    UNDEFINED_AS_NONE, format_options, parse_records, quote_argument,
};
use crate::site::AdapterFuture;

const STATUS_COMMAND: &str = "condor_status";
const DRAIN_COMMAND: &str = "condor_drain";

/// Attributes listed for every slot before the configured ratio expressions.
const SLOT_ATTRIBUTES: [&str; 4] = ["Machine", "State", "Activity", "TardisDroneUuid"];

/// Exit code of `condor_drain` when the machine is no longer part of the pool.
const DRAIN_MACHINE_MISSING: i32 = 1;

/// One partitionable slot of the overlay pool.
#[derive(Debug, Clone, PartialEq)]
pub struct SlotRow {
    pub machine: String,
    pub state: Option<String>,
    pub activity: Option<String>,
    /// Values of the configured ratio expressions, undefined values are left out.
    pub ratios: Vec<f64>,
}

impl SlotRow {
    pub fn machine_status(&self) -> MachineStatus {
        match (self.state.as_deref(), self.activity.as_deref()) {
            (Some("Unclaimed"), Some("Idle")) => MachineStatus::Available,
            (Some("Drained"), Some("Retiring")) => MachineStatus::Draining,
            (Some("Drained"), Some("Idle")) => MachineStatus::Drained,
            _ => MachineStatus::NotAvailable,
        }
    }
}

fn parse_status(output: &str, attributes: &[String]) -> SnapshotRows<SlotRow> {
    let field_names: Vec<&str> = attributes.iter().map(String::as_str).collect();
    let ratio_names = &field_names[SLOT_ATTRIBUTES.len()..];

    let mut rows = SnapshotRows::default();
    for record in parse_records(output, &field_names, UNDEFINED_AS_NONE) {
        let field = |name: &str| record.get(name).copied().flatten();
        let Some(machine) = field("Machine") else {
            log::warn!("Skipping HTCondor slot without machine name: {record:?}");
            continue;
        };
        // Drones not started by us are identified by their host name
        let key = field("TardisDroneUuid")
            .unwrap_or_else(|| machine.split_once('.').map_or(machine, |(host, _)| host));
        let ratios: Vec<f64> = ratio_names
            .iter()
            .filter_map(|name| field(*name))
            .filter_map(|value| match value.parse() {
                Ok(ratio) => Some(ratio),
                Err(_) => {
                    log::warn!("Invalid resource ratio {value} of machine {machine}");
                    None
                }
            })
            .collect();
        rows.insert(
            key.to_string(),
            SlotRow {
                machine: machine.to_string(),
                state: field("State").map(|state| state.to_string()),
                activity: field("Activity").map(|activity| activity.to_string()),
                ratios,
            },
        );
    }
    rows
}

fn status_updater(
    executor: Rc<dyn CommandRunner>,
    command: Rc<str>,
    attributes: Rc<[String]>,
) -> SnapshotUpdater<SlotRow> {
    Box::new(move || {
        let executor = executor.clone();
        let command = command.clone();
        let attributes = attributes.clone();
        Box::pin(async move {
            let output = executor.run_command(&command).await.inspect_err(|failure| {
                log::error!("{STATUS_COMMAND} could not be executed: {failure}")
            })?;
            Ok(parse_status(&output.stdout, &attributes))
        })
    })
}

/// Integrates drones as worker nodes of an HTCondor overlay pool.
pub struct HTCondorBatchSystem {
    executor: Rc<dyn CommandRunner>,
    /// Options shared by every HTCondor command, already formatted.
    options: String,
    status_command: Rc<str>,
    status: QueueCache<SlotRow>,
}

impl HTCondorBatchSystem {
    pub fn new(configuration: &BatchSystemConfiguration, executor: Rc<dyn CommandRunner>) -> Self {
        let options = configuration.options();
        let options = format_options(
            options
                .iter()
                .map(|(key, value)| (key.as_str(), value.as_deref())),
        );

        let ratios = configuration.ratios();
        let attributes: Rc<[String]> = SLOT_ATTRIBUTES
            .iter()
            .map(|name| name.to_string())
            .chain(ratios.iter().map(|(name, _)| name.clone()))
            .collect();
        let projection: Vec<String> = SLOT_ATTRIBUTES
            .iter()
            .map(|name| name.to_string())
            .chain(ratios.iter().map(|(_, expression)| quote_argument(expression)))
            .collect();

        let mut status_command = format!(
            "{STATUS_COMMAND} -af:t {} -constraint PartitionableSlot=?=True",
            projection.join(" ")
        );
        if !options.is_empty() {
            status_command.push(' ');
            status_command.push_str(&options);
        }
        let status_command: Rc<str> = status_command.into();

        Self {
            status: QueueCache::new(
                configuration.max_age(),
                status_updater(executor.clone(), status_command.clone(), attributes),
            ),
            executor,
            options,
            status_command,
        }
    }

    pub fn status_command(&self) -> &str {
        &self.status_command
    }

    pub async fn slot(&self, drone_uuid: &str) -> crate::Result<Option<SlotRow>> {
        Ok(self.status.get(drone_uuid).await?)
    }

    fn drain_command(&self, machine: &str) -> String {
        if self.options.is_empty() {
            format!("{DRAIN_COMMAND} -graceful {machine}")
        } else {
            format!("{DRAIN_COMMAND} {} -graceful {machine}", self.options)
        }
    }
}

impl BatchSystemAdapter for HTCondorBatchSystem {
    fn integrate_machine<'a>(&'a self, _drone_uuid: &'a str) -> AdapterFuture<'a, ()> {
        Box::pin(async { Ok(()) })
    }

    fn disintegrate_machine<'a>(&'a self, _drone_uuid: &'a str) -> AdapterFuture<'a, ()> {
        Box::pin(async { Ok(()) })
    }

    fn drain_machine<'a>(&'a self, drone_uuid: &'a str) -> AdapterFuture<'a, ()> {
        Box::pin(async move {
            let Some(slot) = self.slot(drone_uuid).await? else {
                log::debug!("Drone {drone_uuid} is not part of the pool, nothing to drain");
                return Ok(());
            };
            match self
                .executor
                .run_command(&self.drain_command(&slot.machine))
                .await
            {
                Ok(_) => {
                    log::info!("Draining of drone {drone_uuid} ({}) started", slot.machine);
                    Ok(())
                }
                Err(failure) if failure.exit_code == Some(DRAIN_MACHINE_MISSING) => {
                    log::warn!(
                        "Drone {drone_uuid} ({}) has already left the pool: {failure}",
                        slot.machine
                    );
                    Ok(())
                }
                Err(failure) => Err(failure.into()),
            }
        })
    }

    fn get_resource_ratios<'a>(&'a self, drone_uuid: &'a str) -> AdapterFuture<'a, Vec<f64>> {
        Box::pin(async move {
            Ok(self
                .slot(drone_uuid)
                .await?
                .map(|slot| slot.ratios)
                .unwrap_or_default())
        })
    }

    fn get_allocation<'a>(&'a self, drone_uuid: &'a str) -> AdapterFuture<'a, f64> {
        Box::pin(async move {
            let ratios = self.get_resource_ratios(drone_uuid).await?;
            Ok(ratios.into_iter().reduce(f64::max).unwrap_or(0.0))
        })
    }

    fn get_utilization<'a>(&'a self, drone_uuid: &'a str) -> AdapterFuture<'a, f64> {
        Box::pin(async move {
            let ratios = self.get_resource_ratios(drone_uuid).await?;
            Ok(ratios.into_iter().reduce(f64::min).unwrap_or(0.0))
        })
    }

    fn get_machine_status<'a>(&'a self, drone_uuid: &'a str) -> AdapterFuture<'a, MachineStatus> {
        Box::pin(async move {
            Ok(self
                .slot(drone_uuid)
                .await?
                .map_or(MachineStatus::NotAvailable, |slot| slot.machine_status()))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::HTCondorBatchSystem;
    use crate::batchsystem::{BatchSystemAdapter, MachineStatus};
    use crate::common::config::{BatchSystemConfiguration, Configuration};
    use crate::common::error::TardisError;
    use crate::tests::utils::{MockRunner, command_failure};

    const STATUS_COMMAND: &str = "condor_status -af:t Machine State Activity TardisDroneUuid \
        'Real(TotalSlotCpus-Cpus)/TotalSlotCpus' 'Real(TotalSlotCpus-Cpus)/TotalSlotCpus' \
        -constraint PartitionableSlot=?=True -pool my-htcondor.local -test";

    const STATUS_COMMAND_WITHOUT_OPTIONS: &str = "condor_status -af:t Machine State Activity \
        TardisDroneUuid 'Real(TotalSlotCpus-Cpus)/TotalSlotCpus' \
        'Real(TotalSlotCpus-Cpus)/TotalSlotCpus' -constraint PartitionableSlot=?=True";

    fn configuration(with_options: bool) -> BatchSystemConfiguration {
        let mut content = r#"
[batch_system]
max_age = 10

[batch_system.ratios]
cpu_ratio = "Real(TotalSlotCpus-Cpus)/TotalSlotCpus"
memory_ratio = "Real(TotalSlotCpus-Cpus)/TotalSlotCpus"
"#
        .to_string();
        if with_options {
            content.push_str("\n[batch_system.options]\npool = \"my-htcondor.local\"\ntest = true\n");
        }
        Configuration::parse(&content)
            .unwrap()
            .batch_system()
            .unwrap()
            .clone()
    }

    fn status_output() -> String {
        [
            "test\tUnclaimed\tIdle\tundefined\t0.9\t0.8",
            "test_drain\tDrained\tRetiring\tundefined\t0.9\t0.8",
            "test_drained\tDrained\tIdle\tundefined\t0.9\t0.8",
            "test_owner\tOwner\tIdle\tundefined\t0.9\t0.8",
            "test_uuid_plus\tUnclaimed\tIdle\ttest_uuid\t0.9\t0.8",
            "exoscale-26d361290f.example.com\tUnclaimed\tIdle\tundefined\t0.125\tundefined",
        ]
        .join("\n")
    }

    fn create_adapter(with_options: bool) -> (HTCondorBatchSystem, MockRunner) {
        let runner = MockRunner::with_stdout(status_output());
        let adapter = HTCondorBatchSystem::new(&configuration(with_options), runner.as_runner());
        (adapter, runner)
    }

    #[tokio::test]
    async fn integrate_and_disintegrate_are_noops() {
        let (adapter, runner) = create_adapter(true);
        adapter.integrate_machine("test").await.unwrap();
        adapter.disintegrate_machine("test").await.unwrap();
        assert!(runner.commands().is_empty());
    }

    #[tokio::test]
    async fn get_resource_ratios() {
        let (adapter, runner) = create_adapter(true);
        assert_eq!(adapter.get_resource_ratios("test").await.unwrap(), vec![0.9, 0.8]);
        assert_eq!(runner.commands(), vec![STATUS_COMMAND]);
        assert!(adapter.get_resource_ratios("not_exists").await.unwrap().is_empty());
        // Undefined ratios are left out
        assert_eq!(
            adapter.get_resource_ratios("exoscale-26d361290f").await.unwrap(),
            vec![0.125]
        );
        assert_eq!(runner.commands().len(), 1);
    }

    #[tokio::test]
    async fn get_resource_ratios_without_options() {
        let (adapter, runner) = create_adapter(false);
        assert_eq!(adapter.get_resource_ratios("test").await.unwrap(), vec![0.9, 0.8]);
        assert_eq!(runner.commands(), vec![STATUS_COMMAND_WITHOUT_OPTIONS]);
        assert_eq!(adapter.status_command(), STATUS_COMMAND_WITHOUT_OPTIONS);
    }

    #[tokio::test]
    async fn get_allocation_and_utilization() {
        let (adapter, _runner) = create_adapter(true);
        assert_eq!(adapter.get_allocation("test").await.unwrap(), 0.9);
        assert_eq!(adapter.get_utilization("test").await.unwrap(), 0.8);
        assert_eq!(adapter.get_allocation("not_exists").await.unwrap(), 0.0);
        assert_eq!(adapter.get_utilization("not_exists").await.unwrap(), 0.0);
    }

    #[tokio::test]
    async fn get_machine_status() {
        let (adapter, runner) = create_adapter(true);
        let expected = [
            ("test", MachineStatus::Available),
            ("not_exists", MachineStatus::NotAvailable),
            ("test_drain", MachineStatus::Draining),
            ("test_drained", MachineStatus::Drained),
            ("test_owner", MachineStatus::NotAvailable),
            ("test_uuid", MachineStatus::Available),
            ("test_uuid_plus", MachineStatus::NotAvailable),
        ];
        for (drone_uuid, status) in expected {
            assert_eq!(
                adapter.get_machine_status(drone_uuid).await.unwrap(),
                status,
                "{drone_uuid}"
            );
        }
        assert_eq!(runner.commands(), vec![STATUS_COMMAND]);
    }

    #[tokio::test]
    async fn status_listing_failure() {
        let runner = MockRunner::failing(command_failure(123));
        let adapter = HTCondorBatchSystem::new(&configuration(true), runner.as_runner());
        let result = adapter.get_machine_status("test").await;
        assert!(matches!(
            result,
            Err(TardisError::CommandExecutionFailure(failure)) if failure.exit_code == Some(123)
        ));
        assert_eq!(runner.commands(), vec![STATUS_COMMAND]);
    }

    #[tokio::test]
    async fn drain_machine() {
        let (adapter, runner) = create_adapter(true);
        adapter.drain_machine("test").await.unwrap();
        assert_eq!(
            runner.last_command().unwrap(),
            "condor_drain -pool my-htcondor.local -test -graceful test"
        );

        adapter.drain_machine("test_uuid").await.unwrap();
        assert_eq!(
            runner.last_command().unwrap(),
            "condor_drain -pool my-htcondor.local -test -graceful test_uuid_plus"
        );

        let issued = runner.commands().len();
        adapter.drain_machine("not_exists").await.unwrap();
        assert_eq!(runner.commands().len(), issued);
    }

    #[tokio::test]
    async fn drain_machine_without_options() {
        let (adapter, runner) = create_adapter(false);
        adapter.drain_machine("test").await.unwrap();
        assert_eq!(runner.last_command().unwrap(), "condor_drain -graceful test");
    }

    #[tokio::test]
    async fn drain_machine_failures() {
        let (adapter, runner) = create_adapter(true);
        // Fill the snapshot first
        adapter.get_machine_status("test").await.unwrap();

        runner.push_failure(command_failure(1));
        adapter.drain_machine("test").await.unwrap();

        runner.push_failure(command_failure(2));
        let result = adapter.drain_machine("test").await;
        assert!(matches!(
            result,
            Err(TardisError::CommandExecutionFailure(failure)) if failure.exit_code == Some(2)
        ));
    }
}
