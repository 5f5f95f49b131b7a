use std::time::Duration;

use shared::domain::{DisplayTarget, ScenarioId, SessionState};

use crate::backoff::BackoffPolicy;

pub const CONTROL_PORT: u16 = 8000;
pub const BACKEND_ADDR: &str = "127.0.0.1:8001";
pub const DISPLAY_HOST: &str = "127.0.0.1";
pub const HOST_PORT: u16 = 8080;
pub const CONTAINER_VNC_PORT: u16 = 5900;
pub const SETTLE_DELAY: Duration = Duration::from_secs(3);
pub const PROVISIONING_TIMEOUT: Duration = Duration::from_secs(60);
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_IMAGE_REF: &str = "dorowu/ubuntu-desktop-lxde-vnc:latest";

#[derive(Debug, Clone)]
pub struct ControllerConfig {
    pub control_port: u16,
    /// Base URL of the provisioning backend.
    pub backend_url: String,
    pub image_ref: String,
    /// Host side of the launch port mapping; also the display target port.
    pub host_port: u16,
    pub container_port: u16,
    pub display_host: String,
    pub settle_delay: Duration,
    pub backoff: BackoffPolicy,
    /// Ceiling for each backend request.
    pub provisioning_timeout: Duration,
    pub connect_timeout: Duration,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            control_port: CONTROL_PORT,
            backend_url: format!("http://{BACKEND_ADDR}"),
            image_ref: DEFAULT_IMAGE_REF.into(),
            host_port: HOST_PORT,
            container_port: CONTAINER_VNC_PORT,
            display_host: DISPLAY_HOST.into(),
            settle_delay: SETTLE_DELAY,
            backoff: BackoffPolicy::default(),
            provisioning_timeout: PROVISIONING_TIMEOUT,
            connect_timeout: CONNECT_TIMEOUT,
        }
    }
}

/// Point-in-time view of the session for status displays.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSnapshot {
    pub state: SessionState,
    pub identity: Option<String>,
    pub endpoint: Option<String>,
    pub attempt: u32,
    pub reconnect_pending: bool,
    /// A provisioning run still has a backend call outstanding.
    pub provisioning_in_flight: bool,
    pub last_reconnect_delay: Option<Duration>,
    pub scenario_id: Option<ScenarioId>,
    pub display_target: Option<DisplayTarget>,
}
