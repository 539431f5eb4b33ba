// src/lock/reference.rs

use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;

/// Kind of domain object a lock (or a job/task record) refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ObjectType {
    VirtualizationConnector,
    ApplianceManagerConnector,
    DistributedAppliance,
    VirtualSystem,
    DeploymentSpec,
    DistributedApplianceInstance,
    SecurityGroup,
    SecurityGroupInterface,
    SslConfiguration,
    Job,
    Email,
    Network,
    Archive,
    Alert,
}

impl ObjectType {
    pub const ALL: [ObjectType; 14] = [
        ObjectType::VirtualizationConnector,
        ObjectType::ApplianceManagerConnector,
        ObjectType::DistributedAppliance,
        ObjectType::VirtualSystem,
        ObjectType::DeploymentSpec,
        ObjectType::DistributedApplianceInstance,
        ObjectType::SecurityGroup,
        ObjectType::SecurityGroupInterface,
        ObjectType::SslConfiguration,
        ObjectType::Job,
        ObjectType::Email,
        ObjectType::Network,
        ObjectType::Archive,
        ObjectType::Alert,
    ];

    /// Stable code used in persisted rows.
    pub fn as_str(self) -> &'static str {
        match self {
            ObjectType::VirtualizationConnector => "VIRTUALIZATION_CONNECTOR",
            ObjectType::ApplianceManagerConnector => "APPLIANCE_MANAGER_CONNECTOR",
            ObjectType::DistributedAppliance => "DISTRIBUTED_APPLIANCE",
            ObjectType::VirtualSystem => "VIRTUAL_SYSTEM",
            ObjectType::DeploymentSpec => "DEPLOYMENT_SPEC",
            ObjectType::DistributedApplianceInstance => "DISTRIBUTED_APPLIANCE_INSTANCE",
            ObjectType::SecurityGroup => "SECURITY_GROUP",
            ObjectType::SecurityGroupInterface => "SECURITY_GROUP_INTERFACE",
            ObjectType::SslConfiguration => "SSL_CONFIGURATION",
            ObjectType::Job => "JOB",
            ObjectType::Email => "EMAIL",
            ObjectType::Network => "NETWORK",
            ObjectType::Archive => "ARCHIVE",
            ObjectType::Alert => "ALERT",
        }
    }

    /// Human-readable label for log lines and CLI output.
    pub fn label(self) -> &'static str {
        match self {
            ObjectType::VirtualizationConnector => "Virtualization Connector",
            ObjectType::ApplianceManagerConnector => "Manager Connector",
            ObjectType::DistributedAppliance => "Distributed Appliance",
            ObjectType::VirtualSystem => "Virtual System",
            ObjectType::DeploymentSpec => "Deployment Specification",
            ObjectType::DistributedApplianceInstance => "Distributed Appliance Instance",
            ObjectType::SecurityGroup => "Security Group",
            ObjectType::SecurityGroupInterface => "Security Group Interface",
            ObjectType::SslConfiguration => "SSL Configuration",
            ObjectType::Job => "Job",
            ObjectType::Email => "Email",
            ObjectType::Network => "Network",
            ObjectType::Archive => "Archive",
            ObjectType::Alert => "Alert",
        }
    }
}

impl fmt::Display for ObjectType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for ObjectType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let code = s.trim().to_uppercase();
        ObjectType::ALL
            .into_iter()
            .find(|t| t.as_str() == code)
            .ok_or_else(|| format!("unknown object type: {s}"))
    }
}

/// Logical identity of a lockable domain object.
///
/// Two references are the same lock target when their `(object_type, id)`
/// match; `name` is carried for display only.
#[derive(Debug, Clone)]
pub struct LockObjectReference {
    pub object_type: ObjectType,
    pub id: i64,
    pub name: String,
}

impl LockObjectReference {
    pub fn new(object_type: ObjectType, id: i64, name: impl Into<String>) -> Self {
        Self {
            object_type,
            id,
            name: name.into(),
        }
    }
}

impl PartialEq for LockObjectReference {
    fn eq(&self, other: &Self) -> bool {
        self.object_type == other.object_type && self.id == other.id
    }
}

impl Eq for LockObjectReference {}

impl Hash for LockObjectReference {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.object_type.hash(state);
        self.id.hash(state);
    }
}

impl fmt::Display for LockObjectReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} '{}' (id {})", self.object_type, self.name, self.id)
    }
}
