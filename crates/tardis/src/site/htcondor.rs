use std::fmt::Write;
use std::rc::Rc;

use chrono::Utc;

use crate::common::cache::{QueueCache, SnapshotRows, SnapshotUpdater};
use crate::common::config::{
    MachineMetaData, MachineTypeConfiguration, SiteConfiguration, UnreachableDronePolicy,
};
use crate::common::error::{CommandExecutionFailure, TardisError, error};
use crate::common::executor::CommandRunner;
use crate::common::manager::htcondor::{
    Record, UNDEFINED_AS_NONE, parse_records, parse_submit_job_id,
};
use crate::site::{AdapterFuture, DroneDescriptor, ResourceStatus, SiteAdapter};

const SUBMIT_COMMAND: &str = "condor_submit";
const QUEUE_COMMAND: &str = "condor_q";
const REMOVE_COMMAND: &str = "condor_rm";

/// Attributes listed for every job of the queue, in the order of the output columns.
const QUEUE_ATTRIBUTES: [&str; 4] = ["Owner", "JobStatus", "ClusterId", "ProcId"];

/// One job of the HTCondor queue.
#[derive(Debug, Clone, PartialEq)]
pub struct QueueRow {
    /// Cluster id, i.e. the remote resource uuid of the drone.
    pub job_id: String,
    pub status_code: Option<i32>,
    pub owner: Option<String>,
    pub proc_id: Option<String>,
}

impl QueueRow {
    fn from_record(record: &Record) -> Option<Self> {
        let field = |name: &str| record.get(name).copied().flatten();
        Some(Self {
            job_id: field("ClusterId")?.to_string(),
            status_code: field("JobStatus").and_then(|code| code.parse().ok()),
            owner: field("Owner").map(|owner| owner.to_string()),
            proc_id: field("ProcId").map(|id| id.to_string()),
        })
    }

    pub fn resource_status(&self) -> crate::Result<ResourceStatus> {
        match self.status_code.and_then(translate_job_status) {
            Some(status) => Ok(status),
            None => error(format!(
                "Unknown HTCondor job status {:?} of job {}",
                self.status_code, self.job_id
            )),
        }
    }
}

/// Maps the `JobStatus` ClassAd attribute to the drone lifecycle.
pub fn translate_job_status(code: i32) -> Option<ResourceStatus> {
    let status = match code {
        // Unexpanded
        0 => ResourceStatus::Error,
        // Idle
        1 => ResourceStatus::Booting,
        2 => ResourceStatus::Running,
        // Removed
        3 => ResourceStatus::Error,
        // Completed
        4 => ResourceStatus::Stopped,
        // Held
        5 => ResourceStatus::Error,
        // Submission error
        6 => ResourceStatus::Error,
        _ => return None,
    };
    Some(status)
}

fn parse_queue(output: &str) -> SnapshotRows<QueueRow> {
    let mut rows = SnapshotRows::default();
    for record in parse_records(output, &QUEUE_ATTRIBUTES, UNDEFINED_AS_NONE) {
        match QueueRow::from_record(&record) {
            Some(row) => {
                rows.insert(row.job_id.clone(), row);
            }
            None => log::warn!("Skipping HTCondor queue entry without cluster id: {record:?}"),
        }
    }
    rows
}

fn queue_updater(executor: Rc<dyn CommandRunner>) -> SnapshotUpdater<QueueRow> {
    Box::new(move || {
        let executor = executor.clone();
        Box::pin(async move {
            let command = format!("{QUEUE_COMMAND} -af:t {}", QUEUE_ATTRIBUTES.join(" "));
            let output = executor.run_command(&command).await.inspect_err(|failure| {
                log::error!("Listing of the HTCondor queue failed: {failure}")
            })?;
            Ok(parse_queue(&output.stdout))
        })
    })
}

/// Outcome of a status query.
#[derive(Debug)]
pub enum StatusResolution {
    /// The status is backed by a fresh queue snapshot.
    Confirmed(ResourceStatus),
    /// The queue could not be listed and the status was concluded from the drone age.
    Presumed {
        status: ResourceStatus,
        cause: CommandExecutionFailure,
    },
}

impl StatusResolution {
    pub fn status(&self) -> ResourceStatus {
        match self {
            StatusResolution::Confirmed(status) => *status,
            StatusResolution::Presumed { status, .. } => *status,
        }
    }
}

/// Runs drones of one machine type as jobs of an HTCondor pool.
pub struct HTCondorSiteAdapter {
    site_name: String,
    machine_type: String,
    configuration: MachineTypeConfiguration,
    meta_data: MachineMetaData,
    unreachable_drone_policy: UnreachableDronePolicy,
    executor: Rc<dyn CommandRunner>,
    queue: QueueCache<QueueRow>,
}

impl HTCondorSiteAdapter {
    pub fn new(
        site_name: &str,
        site: &SiteConfiguration,
        machine_type: &str,
        executor: Rc<dyn CommandRunner>,
    ) -> crate::Result<Self> {
        let (configuration, meta_data) = site.machine_type(machine_type)?;
        Ok(Self {
            site_name: site_name.to_string(),
            machine_type: machine_type.to_string(),
            configuration: configuration.clone(),
            meta_data: meta_data.clone(),
            unreachable_drone_policy: site.unreachable_drone_policy,
            queue: QueueCache::new(site.max_age(), queue_updater(executor.clone()))
                .with_stale_snapshot_policy(site.stale_snapshot_policy),
            executor,
        })
    }

    pub fn build_submit_command(&self, drone_uuid: &str) -> crate::Result<String> {
        if let Some(resource) = self.meta_data.extra.keys().next() {
            log::error!(
                "Machine type {} requests resource {resource}, which HTCondor drones cannot provide",
                self.machine_type
            );
            return Err(TardisError::UnsupportedResource {
                machine_type: self.machine_type.clone(),
                resource: resource.clone(),
            });
        }

        let cores = self.meta_data.cores;
        let memory = self.meta_data.memory_mib();
        let mut command = format!(
            "{SUBMIT_COMMAND} -append \"environment = TardisDroneUuid={drone_uuid};\
             TardisDroneCores={cores};TardisDroneMemory={memory}\" \
             -a \"request_cpus = {cores}\" -a \"request_memory = {memory}\""
        );
        for (key, value) in self.configuration.submit_options() {
            write!(command, " -a \"{key} = {value}\"").unwrap();
        }
        write!(command, " {}", self.configuration.jdl.display()).unwrap();
        Ok(command)
    }

    /// Finds out the status of a deployed drone.
    ///
    /// A drone missing from a fresh snapshot has left the queue and is deleted. When the queue
    /// cannot be listed, a drone younger than the snapshot lifetime may simply not be
    /// registered yet, so the update fails. Older drones are presumed deleted, unless the
    /// site is configured to keep retrying.
    pub async fn resolve_status(&self, drone: &DroneDescriptor) -> crate::Result<StatusResolution> {
        let job_id = remote_id(drone)?;
        match self.queue.get(job_id).await {
            Ok(Some(row)) => Ok(StatusResolution::Confirmed(row.resource_status()?)),
            Ok(None) => Ok(StatusResolution::Confirmed(ResourceStatus::Deleted)),
            Err(cause) => {
                let within_grace_window = Utc::now() - drone.created < self.queue.max_age();
                if within_grace_window
                    || self.unreachable_drone_policy == UnreachableDronePolicy::KeepRetrying
                {
                    Err(TardisError::ResourceStatusUpdateFailed {
                        drone_uuid: drone.drone_uuid.clone(),
                        source: cause,
                    })
                } else {
                    Ok(StatusResolution::Presumed {
                        status: ResourceStatus::Deleted,
                        cause,
                    })
                }
            }
        }
    }

    async fn remove(&self, drone: &DroneDescriptor) -> crate::Result<DroneDescriptor> {
        let job_id = remote_id(drone)?;
        let output = self
            .executor
            .run_command(&format!("{REMOVE_COMMAND} {job_id}"))
            .await?;
        log::debug!("{REMOVE_COMMAND} output: {}", output.stdout);
        Ok(drone.touched())
    }
}

fn remote_id(drone: &DroneDescriptor) -> crate::Result<&str> {
    match drone.remote_resource_uuid.as_deref() {
        Some(job_id) => Ok(job_id),
        None => error(format!("Drone {} has not been deployed", drone.drone_uuid)),
    }
}

impl SiteAdapter for HTCondorSiteAdapter {
    fn site_name(&self) -> &str {
        &self.site_name
    }

    fn machine_type(&self) -> &str {
        &self.machine_type
    }

    fn machine_meta_data(&self) -> &MachineMetaData {
        &self.meta_data
    }

    fn deploy_resource<'a>(
        &'a self,
        drone: &'a DroneDescriptor,
    ) -> AdapterFuture<'a, DroneDescriptor> {
        Box::pin(async move {
            let command = self.build_submit_command(&drone.drone_uuid)?;
            let output = self.executor.run_command(&command).await?;
            let job_id = parse_submit_job_id(&output.stdout).ok_or_else(|| {
                anyhow::anyhow!("Missing cluster id in {SUBMIT_COMMAND} output\n{}", output.stdout)
            })?;
            log::info!(
                "Drone {} submitted to {} as HTCondor job {job_id}",
                drone.drone_uuid,
                self.site_name
            );

            let now = Utc::now();
            Ok(DroneDescriptor {
                remote_resource_uuid: Some(job_id.to_string()),
                resource_status: Some(ResourceStatus::Booting),
                created: now,
                updated: now,
                ..drone.clone()
            })
        })
    }

    fn resource_status<'a>(
        &'a self,
        drone: &'a DroneDescriptor,
    ) -> AdapterFuture<'a, DroneDescriptor> {
        Box::pin(async move {
            let status = match self.resolve_status(drone).await? {
                StatusResolution::Confirmed(status) => status,
                StatusResolution::Presumed { status, cause } => {
                    log::error!(
                        "Status of drone {} is unknown since the HTCondor queue cannot be listed, \
                         assuming {status}: {cause}",
                        drone.drone_uuid
                    );
                    status
                }
            };
            if drone.resource_status == Some(status) {
                return Ok(drone.clone());
            }
            Ok(DroneDescriptor {
                resource_status: Some(status),
                ..drone.touched()
            })
        })
    }

    fn stop_resource<'a>(
        &'a self,
        drone: &'a DroneDescriptor,
    ) -> AdapterFuture<'a, DroneDescriptor> {
        Box::pin(self.remove(drone))
    }

    fn terminate_resource<'a>(
        &'a self,
        drone: &'a DroneDescriptor,
    ) -> AdapterFuture<'a, DroneDescriptor> {
        Box::pin(self.remove(drone))
    }
}
