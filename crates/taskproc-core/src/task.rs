//! Task configs and launch descriptors.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::ids::TASK_ID_SEPARATOR;
use crate::{CoreError, Resources, SlaveId, TaskId};

/// Access mode of a volume mounted into the task's container.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum VolumeMode {
    #[default]
    Ro,
    Rw,
}

/// Host path mounted into the container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Volume {
    #[serde(rename = "containerPath")]
    pub container_path: String,
    #[serde(rename = "hostPath")]
    pub host_path: String,
    #[serde(default)]
    pub mode: VolumeMode,
}

/// Extra `docker run` parameter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DockerParameter {
    pub key: String,
    pub value: String,
}

/// An unlaunched unit of work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskConfig {
    /// Logical name; prefixes every id generated for this task.
    pub name: String,

    /// Container image reference.
    pub image: String,

    /// Command to run inside the container.
    pub cmd: String,

    pub cpus: f64,
    pub mem: f64,
    #[serde(default)]
    pub disk: f64,

    /// Number of host ports the task needs.
    #[serde(default)]
    pub ports: u32,

    /// Pool the task must be placed in, if any.
    #[serde(default)]
    pub pool: Option<String>,

    #[serde(default)]
    pub environment: BTreeMap<String, String>,

    #[serde(default)]
    pub volumes: Vec<Volume>,

    #[serde(default)]
    pub docker_parameters: Vec<DockerParameter>,
}

impl TaskConfig {
    /// Create a new TaskConfig with no disk, ports or extras.
    pub fn new(
        name: impl Into<String>,
        image: impl Into<String>,
        cmd: impl Into<String>,
        cpus: f64,
        mem: f64,
    ) -> Self {
        Self {
            name: name.into(),
            image: image.into(),
            cmd: cmd.into(),
            cpus,
            mem,
            disk: 0.0,
            ports: 0,
            pool: None,
            environment: BTreeMap::new(),
            volumes: Vec::new(),
            docker_parameters: Vec::new(),
        }
    }

    /// Builder method to set the disk requirement.
    pub fn with_disk(mut self, disk: f64) -> Self {
        self.disk = disk;
        self
    }

    /// Builder method to request host ports.
    pub fn with_ports(mut self, ports: u32) -> Self {
        self.ports = ports;
        self
    }

    /// Builder method to pin the task to a pool.
    pub fn with_pool(mut self, pool: impl Into<String>) -> Self {
        self.pool = Some(pool.into());
        self
    }

    /// Builder method to add an environment variable.
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.environment.insert(key.into(), value.into());
        self
    }

    /// Builder method to add a volume.
    pub fn with_volume(mut self, volume: Volume) -> Self {
        self.volumes.push(volume);
        self
    }

    /// Builder method to add a docker parameter.
    pub fn with_docker_parameter(
        mut self,
        key: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        self.docker_parameters.push(DockerParameter {
            key: key.into(),
            value: value.into(),
        });
        self
    }

    /// Check the config can be scheduled at all.
    pub fn validate(&self) -> Result<(), CoreError> {
        let invalid = |reason: &str| CoreError::InvalidTaskConfig {
            name: self.name.clone(),
            reason: reason.to_string(),
        };

        if self.name.is_empty() {
            return Err(invalid("name must not be empty"));
        }
        if self.name.contains(TASK_ID_SEPARATOR) {
            return Err(invalid("name must not contain '.'"));
        }
        for (resource, value) in [("cpus", self.cpus), ("mem", self.mem), ("disk", self.disk)] {
            if !value.is_finite() || value < 0.0 {
                return Err(invalid(&format!("{resource} must be a finite value >= 0")));
            }
        }
        Ok(())
    }
}

/// Launch descriptor for one admitted task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskInfo {
    pub task_id: TaskId,
    pub name: String,
    pub slave_id: SlaveId,
    pub image: String,
    pub command: String,
    pub resources: Resources,
    /// Host ports assigned out of the offer.
    pub host_ports: Vec<u16>,
    pub environment: BTreeMap<String, String>,
    pub volumes: Vec<Volume>,
    pub docker_parameters: Vec<DockerParameter>,
}

impl TaskInfo {
    /// Build the launch descriptor for `config` placed on `slave_id`.
    pub fn from_config(
        config: &TaskConfig,
        task_id: TaskId,
        slave_id: SlaveId,
        host_ports: Vec<u16>,
    ) -> Self {
        Self {
            task_id,
            name: config.name.clone(),
            slave_id,
            image: config.image.clone(),
            command: config.cmd.clone(),
            resources: Resources::new(config.cpus, config.mem, config.disk),
            host_ports,
            environment: config.environment.clone(),
            volumes: config.volumes.clone(),
            docker_parameters: config.docker_parameters.clone(),
        }
    }
}

/// Registration payload describing this framework to the manager.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameworkInfo {
    pub name: String,
    /// Empty lets the manager fill in the current user.
    pub user: String,
    pub checkpoint: bool,
}

impl FrameworkInfo {
    /// Create the registration payload for a framework name.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            user: String::new(),
            checkpoint: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_accepts_plain_config() {
        let config = TaskConfig::new("job", "busybox", "true", 0.5, 128.0);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_configs() {
        let negative = TaskConfig::new("job", "busybox", "true", -1.0, 128.0);
        assert!(matches!(
            negative.validate(),
            Err(CoreError::InvalidTaskConfig { .. })
        ));

        let nan = TaskConfig::new("job", "busybox", "true", 1.0, f64::NAN);
        assert!(nan.validate().is_err());

        let dotted = TaskConfig::new("job.v2", "busybox", "true", 1.0, 1.0);
        assert!(dotted.validate().is_err());

        let unnamed = TaskConfig::new("", "busybox", "true", 1.0, 1.0);
        assert!(unnamed.validate().is_err());
    }

    #[test]
    fn test_task_info_from_config() {
        let config = TaskConfig::new("web", "nginx:1", "nginx", 1.0, 256.0)
            .with_disk(10.0)
            .with_env("MODE", "prod")
            .with_docker_parameter("ulimit", "nofile=1024");
        let id = TaskId::generate("web");

        let info = TaskInfo::from_config(&config, id.clone(), SlaveId::new("s1"), vec![31000]);

        assert_eq!(info.task_id, id);
        assert_eq!(info.slave_id.as_str(), "s1");
        assert_eq!(info.command, "nginx");
        assert_eq!(info.resources, Resources::new(1.0, 256.0, 10.0));
        assert_eq!(info.host_ports, vec![31000]);
        assert_eq!(info.environment.get("MODE").map(String::as_str), Some("prod"));
        assert_eq!(info.docker_parameters.len(), 1);
    }

    #[test]
    fn test_config_from_json() {
        let json = r#"{
            "name": "report",
            "image": "reports:latest",
            "cmd": "make report",
            "cpus": 0.25,
            "mem": 512,
            "volumes": [{"containerPath": "/data", "hostPath": "/srv/data", "mode": "RW"}]
        }"#;
        let config: TaskConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.disk, 0.0);
        assert_eq!(config.ports, 0);
        assert_eq!(config.volumes[0].mode, VolumeMode::Rw);
    }
}
