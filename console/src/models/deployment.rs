//! Deployment models

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use openapi_client::models::{DeploymentDto, StatusUpdatePayload};
use openapi_server::models::DeploymentView;
use serde::{Deserialize, Serialize};

use crate::errors::ConsoleError;

const LOCAL_ID_PREFIX: &str = "local-";

/// Deployment identifier.
///
/// Server ids are numeric. Speculative records carry a `local-<uuid>` placeholder
/// until an authoritative record replaces them, so the two can never collide.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RecordId {
    Server(i64),
    Local(String),
}

impl RecordId {
    /// Generate a fresh placeholder id for a speculative record
    pub fn local() -> Self {
        RecordId::Local(format!("{}{}", LOCAL_ID_PREFIX, uuid::Uuid::new_v4()))
    }

    pub fn is_local(&self) -> bool {
        matches!(self, RecordId::Local(_))
    }
}

impl From<i64> for RecordId {
    fn from(id: i64) -> Self {
        RecordId::Server(id)
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecordId::Server(id) => write!(f, "{}", id),
            RecordId::Local(id) => f.write_str(id),
        }
    }
}

/// Deployment status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DeploymentStatus {
    Pending,
    InProgress,
    Success,
    Failed,
}

impl DeploymentStatus {
    /// SUCCESS and FAILED admit no further transition
    pub fn is_terminal(&self) -> bool {
        matches!(self, DeploymentStatus::Success | DeploymentStatus::Failed)
    }

    fn rank(&self) -> u8 {
        match self {
            DeploymentStatus::Pending => 0,
            DeploymentStatus::InProgress => 1,
            DeploymentStatus::Success | DeploymentStatus::Failed => 2,
        }
    }

    /// Whether a record in this status may move to `next`.
    ///
    /// Staying put is always allowed; terminal statuses never change.
    pub fn can_advance_to(&self, next: DeploymentStatus) -> bool {
        if *self == next {
            return true;
        }
        !self.is_terminal() && next.rank() > self.rank()
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DeploymentStatus::Pending => "PENDING",
            DeploymentStatus::InProgress => "IN_PROGRESS",
            DeploymentStatus::Success => "SUCCESS",
            DeploymentStatus::Failed => "FAILED",
        }
    }
}

impl FromStr for DeploymentStatus {
    type Err = ConsoleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "PENDING" => Ok(DeploymentStatus::Pending),
            "IN_PROGRESS" => Ok(DeploymentStatus::InProgress),
            "SUCCESS" => Ok(DeploymentStatus::Success),
            "FAILED" => Ok(DeploymentStatus::Failed),
            _ => Err(ConsoleError::ValidationError(format!(
                "Unknown deployment status: {}",
                s
            ))),
        }
    }
}

impl fmt::Display for DeploymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where a record came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RecordOrigin {
    /// Created locally right after a trigger call
    Speculative,

    /// Returned by the backing store of record
    Authoritative,
}

/// Project or environment reference with its display name
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct EntityRef {
    pub id: Option<i64>,
    pub name: String,
}

impl EntityRef {
    pub fn new(id: i64, name: impl Into<String>) -> Self {
        Self {
            id: Some(id),
            name: name.into(),
        }
    }

    pub fn named(name: impl Into<String>) -> Self {
        Self {
            id: None,
            name: name.into(),
        }
    }

    /// Whether both references denote the same entity.
    ///
    /// Ids decide when both sides know them; otherwise the display names must
    /// match and be non-empty.
    pub fn same_as(&self, other: &EntityRef) -> bool {
        match (self.id, other.id) {
            (Some(a), Some(b)) => a == b,
            _ => !self.name.is_empty() && self.name == other.name,
        }
    }

    /// Fill in whatever `other` knows that this reference does not
    fn absorb(&mut self, other: &EntityRef) {
        if other.id.is_some() {
            self.id = other.id;
        }
        if !other.name.is_empty() {
            self.name = other.name.clone();
        }
    }
}

/// A deployment as tracked by the console
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeploymentRecord {
    pub id: RecordId,
    pub version: String,
    pub status: DeploymentStatus,
    pub environment: EntityRef,
    pub project: EntityRef,
    pub build_number: Option<u64>,
    pub triggered_by: String,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub origin: RecordOrigin,

    /// `created_at` is a status-change time standing in for the unknown creation
    /// time; the first full record of the deployment corrects it
    #[serde(default)]
    pub created_at_provisional: bool,
}

impl DeploymentRecord {
    pub fn is_speculative(&self) -> bool {
        self.origin == RecordOrigin::Speculative
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Overwrite this record with a newer view of the same deployment.
    ///
    /// Status only moves forward. Optional fields the incoming view lacks keep
    /// their known values. Returns true if anything changed.
    pub fn absorb(&mut self, incoming: &DeploymentRecord, now: DateTime<Utc>) -> bool {
        let before = self.clone();

        if incoming.origin == RecordOrigin::Authoritative {
            self.id = incoming.id.clone();
            self.origin = RecordOrigin::Authoritative;
            if self.created_at_provisional && !incoming.created_at_provisional {
                self.created_at = incoming.created_at;
                self.created_at_provisional = false;
            }
        }
        if !incoming.version.is_empty() {
            self.version = incoming.version.clone();
        }
        if !incoming.triggered_by.is_empty() {
            self.triggered_by = incoming.triggered_by.clone();
        }
        if incoming.build_number.is_some() {
            self.build_number = incoming.build_number;
        }
        self.environment.absorb(&incoming.environment);
        self.project.absorb(&incoming.project);

        if self.status.can_advance_to(incoming.status) {
            self.status = incoming.status;
            if self.status.is_terminal() && self.completed_at.is_none() {
                self.completed_at = Some(incoming.completed_at.unwrap_or(now));
            }
        } else {
            tracing::debug!(
                "Ignoring stale transition for deployment {}: {} -> {}",
                self.id,
                self.status,
                incoming.status
            );
        }

        *self != before
    }

    pub fn to_view(&self) -> DeploymentView {
        DeploymentView {
            id: self.id.to_string(),
            version: self.version.clone(),
            status: self.status.to_string(),
            environment_id: self.environment.id,
            environment_name: self.environment.name.clone(),
            project_id: self.project.id,
            project_name: self.project.name.clone(),
            build_number: self.build_number,
            triggered_by: self.triggered_by.clone(),
            created_at: self.created_at,
            completed_at: self.completed_at,
        }
    }
}

impl TryFrom<DeploymentDto> for DeploymentRecord {
    type Error = ConsoleError;

    fn try_from(dto: DeploymentDto) -> Result<Self, Self::Error> {
        let status: DeploymentStatus = dto.status.parse()?;
        let completed_at = match dto.completed_at {
            Some(at) => Some(at),
            None if status.is_terminal() => Some(dto.created_at),
            None => None,
        };

        Ok(Self {
            id: RecordId::Server(dto.id),
            version: dto.version,
            status,
            environment: EntityRef {
                id: dto.environment_id,
                name: dto.environment_name.unwrap_or_default(),
            },
            project: EntityRef {
                id: dto.project_id,
                name: dto.project_name.unwrap_or_default(),
            },
            build_number: dto.build_number,
            triggered_by: dto.triggered_by.unwrap_or_default(),
            created_at: dto.created_at,
            completed_at,
            origin: RecordOrigin::Authoritative,
            created_at_provisional: false,
        })
    }
}

/// Normalize a pushed status update. `received_at` stands in for a missing timestamp.
pub fn record_from_status_update(
    update: StatusUpdatePayload,
    received_at: DateTime<Utc>,
) -> Result<DeploymentRecord, ConsoleError> {
    let status: DeploymentStatus = update.status.parse()?;
    let at = update.timestamp.unwrap_or(received_at);

    Ok(DeploymentRecord {
        id: RecordId::Server(update.deployment_id),
        version: update.version,
        status,
        environment: EntityRef::named(update.environment_name.unwrap_or_default()),
        project: EntityRef::named(update.project_name.unwrap_or_default()),
        build_number: update.build_number,
        triggered_by: update.triggered_by.unwrap_or_default(),
        created_at: at,
        completed_at: status.is_terminal().then_some(at),
        origin: RecordOrigin::Authoritative,
        created_at_provisional: true,
    })
}
