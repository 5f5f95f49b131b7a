use serde::Serialize;
use shared::{
    domain::{DisplayTarget, ProvisioningStep, ScenarioId},
    error::ErrorCategory,
};

/// Everything the controller reports to its event sinks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum ControllerEvent {
    Connected,
    Disconnected {
        code: u16,
        reason: String,
    },
    CommandReceived {
        action: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        scenario_id: Option<ScenarioId>,
    },
    ProvisioningFailed {
        step: ProvisioningStep,
        message: String,
    },
    ProvisioningSucceeded {
        display_target: DisplayTarget,
    },
    Error {
        category: ErrorCategory,
        message: String,
    },
}
