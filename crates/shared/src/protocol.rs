use serde::{Deserialize, Serialize};

use crate::{domain::ScenarioId, error::CommandParseError};

pub const START_SIMULATION: &str = "start_simulation";

/// Inbound control-channel payload before the `action` tag is resolved.
#[derive(Debug, Clone, Deserialize)]
struct CommandEnvelope {
    action: String,
    #[serde(default)]
    scenario_id: Option<ScenarioId>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    StartSimulation { scenario_id: Option<ScenarioId> },
    Unknown { action: String },
}

impl Command {
    pub fn parse(raw: &str) -> Result<Self, CommandParseError> {
        let envelope: CommandEnvelope = serde_json::from_str(raw)?;
        Ok(match envelope.action.as_str() {
            START_SIMULATION => Self::StartSimulation {
                scenario_id: envelope.scenario_id,
            },
            _ => Self::Unknown {
                action: envelope.action,
            },
        })
    }

    pub fn action(&self) -> &str {
        match self {
            Self::StartSimulation { .. } => START_SIMULATION,
            Self::Unknown { action } => action,
        }
    }

    pub fn scenario_id(&self) -> Option<&ScenarioId> {
        match self {
            Self::StartSimulation { scenario_id } => scenario_id.as_ref(),
            Self::Unknown { .. } => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PullImageRequest {
    pub image_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunContainerRequest {
    pub image_name: String,
    pub host_port: u16,
    pub container_port: u16,
}
