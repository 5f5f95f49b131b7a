//! Event sink: renders controller events for the operator.

use client_core::ControllerEvent;
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SinkFormat {
    Text,
    Json,
}

pub fn status_line(event: &ControllerEvent) -> String {
    match event {
        ControllerEvent::Connected => "Connected to orchestrator".to_string(),
        ControllerEvent::Disconnected { code, reason } if reason.is_empty() => {
            format!("Disconnected (code {code})")
        }
        ControllerEvent::Disconnected { code, reason } => {
            format!("Disconnected (code {code}): {reason}")
        }
        ControllerEvent::CommandReceived {
            action,
            scenario_id: Some(scenario_id),
        } => format!("Command received: {action} (scenario {scenario_id})"),
        ControllerEvent::CommandReceived { action, .. } => format!("Command received: {action}"),
        ControllerEvent::ProvisioningFailed { step, message } => {
            format!("Provisioning failed during {step}: {message}")
        }
        ControllerEvent::ProvisioningSucceeded { display_target } => {
            format!("Simulation ready; attach display at {display_target}")
        }
        ControllerEvent::Error { category, message } => format!("Error ({category}): {message}"),
    }
}

fn render(event: &ControllerEvent, format: SinkFormat) {
    if format == SinkFormat::Json {
        match serde_json::to_string(event) {
            Ok(line) => println!("{line}"),
            Err(err) => error!(error = %err, "sink: failed to encode event"),
        }
        return;
    }

    let line = status_line(event);
    match event {
        ControllerEvent::ProvisioningFailed { .. } | ControllerEvent::Error { .. } => {
            warn!("{line}")
        }
        ControllerEvent::ProvisioningSucceeded { display_target } => {
            info!("{line}");
            println!("{display_target}");
        }
        _ => info!("{line}"),
    }
}

pub async fn run(mut events: broadcast::Receiver<ControllerEvent>, format: SinkFormat) {
    loop {
        match events.recv().await {
            Ok(event) => render(&event, format),
            Err(RecvError::Lagged(skipped)) => warn!(skipped, "sink: dropped lagging events"),
            Err(RecvError::Closed) => break,
        }
    }
}
