//! Resource offers granted by the cluster manager.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::{OfferId, SlaveId};

/// Offer attribute naming the pool a host belongs to.
pub const POOL_ATTRIBUTE: &str = "pool";

/// Inclusive range of host ports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortRange {
    pub begin: u16,
    pub end: u16,
}

impl PortRange {
    /// Create a new inclusive range.
    pub fn new(begin: u16, end: u16) -> Self {
        Self { begin, end }
    }

    /// Number of ports in the range.
    pub fn len(&self) -> usize {
        if self.end < self.begin {
            0
        } else {
            usize::from(self.end - self.begin) + 1
        }
    }

    /// Returns true if the range holds no port.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A bundle of resources on one host.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Resources {
    pub cpus: f64,
    pub mem: f64,
    #[serde(default)]
    pub disk: f64,
    #[serde(default)]
    pub ports: Vec<PortRange>,
}

impl Resources {
    /// Create scalar resources with no ports.
    pub fn new(cpus: f64, mem: f64, disk: f64) -> Self {
        Self {
            cpus,
            mem,
            disk,
            ports: Vec::new(),
        }
    }

    /// Builder method to add a port range.
    pub fn with_ports(mut self, range: PortRange) -> Self {
        self.ports.push(range);
        self
    }

    /// Every individual port in the offered ranges.
    pub fn port_set(&self) -> BTreeSet<u16> {
        self.ports
            .iter()
            .filter(|r| !r.is_empty())
            .flat_map(|r| r.begin..=r.end)
            .collect()
    }

    /// Total number of offered ports.
    pub fn port_count(&self) -> usize {
        self.ports.iter().map(PortRange::len).sum()
    }
}

/// A host's advertised resources at a point in time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Offer {
    /// Unique offer identifier.
    pub id: OfferId,

    /// Host the resources live on.
    pub slave_id: SlaveId,

    /// Hostname of the agent machine.
    pub hostname: String,

    /// Offered resources.
    pub resources: Resources,

    /// Host attributes (pool, region, etc.).
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
}

impl Offer {
    /// Create a new Offer.
    pub fn new(
        id: impl Into<OfferId>,
        slave_id: impl Into<SlaveId>,
        hostname: impl Into<String>,
        resources: Resources,
    ) -> Self {
        Self {
            id: id.into(),
            slave_id: slave_id.into(),
            hostname: hostname.into(),
            resources,
            attributes: BTreeMap::new(),
        }
    }

    /// Builder method to add an attribute.
    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    /// Pool the host belongs to, if it advertises one.
    pub fn pool(&self) -> Option<&str> {
        self.attributes.get(POOL_ATTRIBUTE).map(String::as_str)
    }
}
