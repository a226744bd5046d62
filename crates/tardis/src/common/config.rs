use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::Map;
use crate::common::cache::StaleSnapshotPolicy;
use crate::common::error::{TardisError, error};

/// Default lifetime of a queue snapshot, in minutes.
const DEFAULT_MAX_AGE: u64 = 1;

fn default_max_age() -> u64 {
    DEFAULT_MAX_AGE
}

fn minutes(value: u64) -> Duration {
    Duration::from_secs(value.saturating_mul(60))
}

/// Contents of the TOML configuration file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Configuration {
    #[serde(default)]
    pub sites: Map<String, SiteConfiguration>,
    #[serde(default)]
    pub batch_system: Option<BatchSystemConfiguration>,
}

impl Configuration {
    pub fn load(path: &Path) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> crate::Result<Self> {
        Ok(toml::from_str(content)?)
    }

    pub fn site(&self, name: &str) -> crate::Result<&SiteConfiguration> {
        match self.sites.get(name) {
            Some(site) => Ok(site),
            None => error(format!("Site {name} is not configured")),
        }
    }

    pub fn batch_system(&self) -> crate::Result<&BatchSystemConfiguration> {
        match &self.batch_system {
            Some(batch_system) => Ok(batch_system),
            None => error("Batch system is not configured".to_string()),
        }
    }
}

/// What to conclude about a drone that is missing from the queue while the queue cannot be
/// listed, once the drone is older than one refresh interval.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum UnreachableDronePolicy {
    /// The drone is reported as deleted and the failure is only logged.
    #[default]
    AssumeDeleted,
    /// The status update keeps failing until the queue can be listed again.
    KeepRetrying,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SiteConfiguration {
    /// Maximum age of the queue snapshot in minutes.
    #[serde(default = "default_max_age")]
    pub max_age: u64,
    #[serde(default)]
    pub unreachable_drone_policy: UnreachableDronePolicy,
    #[serde(default)]
    pub stale_snapshot_policy: StaleSnapshotPolicy,
    #[serde(default)]
    pub machine_type_configuration: Map<String, MachineTypeConfiguration>,
    #[serde(default)]
    pub machine_meta_data: Map<String, MachineMetaData>,
}

impl SiteConfiguration {
    pub fn max_age(&self) -> Duration {
        minutes(self.max_age)
    }

    /// Resolves both configuration tables of a machine type.
    pub fn machine_type(
        &self,
        machine_type: &str,
    ) -> crate::Result<(&MachineTypeConfiguration, &MachineMetaData)> {
        match (
            self.machine_type_configuration.get(machine_type),
            self.machine_meta_data.get(machine_type),
        ) {
            (Some(configuration), Some(meta_data)) => Ok((configuration, meta_data)),
            _ => {
                log::error!("Machine type {machine_type} is missing in the site configuration");
                Err(TardisError::UnknownMachineType(machine_type.to_string()))
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MachineTypeConfiguration {
    /// Submit description file used as the template of every drone.
    pub jdl: PathBuf,
    /// Additional `-a "<key> = <value>"` arguments of `condor_submit`.
    #[serde(default)]
    pub submit_options: toml::Table,
}

impl MachineTypeConfiguration {
    pub fn new(jdl: impl Into<PathBuf>) -> Self {
        Self {
            jdl: jdl.into(),
            submit_options: Default::default(),
        }
    }

    pub fn submit_options(&self) -> impl Iterator<Item = (&str, String)> {
        self.submit_options
            .iter()
            .map(|(key, value)| (key.as_str(), value_to_string(value)))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MachineMetaData {
    pub cores: u32,
    /// Memory in GB.
    pub memory: f64,
    /// Any other resource, HTCondor drones cannot request these.
    #[serde(flatten)]
    pub extra: toml::Table,
}

impl MachineMetaData {
    pub fn new(cores: u32, memory: f64) -> Self {
        Self {
            cores,
            memory,
            extra: Default::default(),
        }
    }

    /// Memory in MiB, as HTCondor expects it.
    pub fn memory_mib(&self) -> u64 {
        (self.memory * 1024.0).round() as u64
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchSystemConfiguration {
    /// Maximum age of the `condor_status` snapshot in minutes.
    #[serde(default = "default_max_age")]
    pub max_age: u64,
    /// Named ClassAd expressions evaluated for every slot, e.g.
    /// `cpu_ratio = "Real(TotalSlotCpus-Cpus)/TotalSlotCpus"`.
    #[serde(default)]
    pub ratios: toml::Table,
    /// Options passed to every HTCondor command; `true` stands for a flag without a value.
    #[serde(default)]
    pub options: toml::Table,
}

impl BatchSystemConfiguration {
    pub fn max_age(&self) -> Duration {
        minutes(self.max_age)
    }

    pub fn ratios(&self) -> Vec<(String, String)> {
        self.ratios
            .iter()
            .map(|(name, expression)| (name.clone(), value_to_string(expression)))
            .collect()
    }

    pub fn options(&self) -> Vec<(String, Option<String>)> {
        self.options
            .iter()
            .filter_map(|(key, value)| match value {
                toml::Value::Boolean(true) => Some((key.clone(), None)),
                toml::Value::Boolean(false) => None,
                value => Some((key.clone(), Some(value_to_string(value)))),
            })
            .collect()
    }
}

fn value_to_string(value: &toml::Value) -> String {
    match value {
        toml::Value::String(value) => value.clone(),
        value => value.to_string(),
    }
}
