//! Session controller: owns the single control-channel session and drives
//! provisioning when the orchestrator asks for a simulation.
//!
//! All transitions happen under one lock. Channel signals are tagged with the
//! generation of the channel that produced them, and provisioning results with
//! the run that started them, so anything arriving for a superseded channel or
//! run is logged and dropped.

use std::{sync::Arc, time::Duration};

use shared::{
    domain::{DisplayTarget, ProvisioningStep, ScenarioId, SessionState},
    error::ErrorCategory,
    protocol::Command,
};
use tokio::{
    sync::{broadcast, Mutex},
    task::JoinHandle,
};
use tracing::{debug, info, warn};
use url::Url;

use crate::{
    error::{ChannelError, ProvisioningError, SessionError},
    events::ControllerEvent,
    provisioning::ProvisioningBackend,
    transport::{ChannelSignal, ControlChannelConnector},
    types::{ControllerConfig, SessionSnapshot},
};

pub const OPERATOR_CLOSE_CODE: u16 = 1000;
const EVENT_BUFFER: usize = 256;

#[derive(Default)]
struct Session {
    identity: Option<String>,
    endpoint: Option<String>,
    url: Option<Url>,
    state: SessionState,
    attempt: u32,
    generation: u64,
    run: u64,
    /// Set while a run has a backend call outstanding, even after the run
    /// itself was superseded. Cleared under the lock once its last call returns.
    provisioning_in_flight: bool,
    channel_task: Option<JoinHandle<()>>,
    reconnect_timer: Option<JoinHandle<()>>,
    last_reconnect_delay: Option<Duration>,
    settle_timer: Option<JoinHandle<()>>,
    scenario_id: Option<ScenarioId>,
    display_target: Option<DisplayTarget>,
}

impl Session {
    fn is_current_run(&self, run: u64) -> bool {
        self.state == SessionState::Provisioning && self.run == run
    }

    fn identity(&self) -> &str {
        self.identity.as_deref().unwrap_or_default()
    }

    fn cancel_timers(&mut self) {
        if let Some(timer) = self.reconnect_timer.take() {
            timer.abort();
        }
        if let Some(timer) = self.settle_timer.take() {
            timer.abort();
        }
    }
}

pub struct SessionController {
    config: ControllerConfig,
    connector: Arc<dyn ControlChannelConnector>,
    backend: Arc<dyn ProvisioningBackend>,
    inner: Mutex<Session>,
    events: broadcast::Sender<ControllerEvent>,
}

fn control_url(endpoint: &str, port: u16, identity: &str) -> Result<Url, SessionError> {
    let mut url = Url::parse("ws://localhost/")
        .map_err(|err| SessionError::InvalidInput(err.to_string()))?;
    url.set_host(Some(endpoint))
        .map_err(|err| SessionError::InvalidInput(format!("endpoint '{endpoint}': {err}")))?;
    url.set_port(Some(port))
        .map_err(|()| SessionError::InvalidInput(format!("endpoint '{endpoint}' takes no port")))?;
    url.path_segments_mut()
        .map_err(|()| SessionError::InvalidInput(format!("endpoint '{endpoint}' has no path")))?
        .clear()
        .push("ws")
        .push(identity);
    Ok(url)
}

impl SessionController {
    pub fn new(
        config: ControllerConfig,
        connector: Arc<dyn ControlChannelConnector>,
        backend: Arc<dyn ProvisioningBackend>,
    ) -> Arc<Self> {
        let (events, _) = broadcast::channel(EVENT_BUFFER);
        Arc::new(Self {
            config,
            connector,
            backend,
            inner: Mutex::new(Session::default()),
            events,
        })
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<ControllerEvent> {
        self.events.subscribe()
    }

    pub fn config(&self) -> &ControllerConfig {
        &self.config
    }

    pub async fn status(&self) -> SessionSnapshot {
        let session = self.inner.lock().await;
        SessionSnapshot {
            state: session.state,
            identity: session.identity.clone(),
            endpoint: session.endpoint.clone(),
            attempt: session.attempt,
            reconnect_pending: session.reconnect_timer.is_some(),
            provisioning_in_flight: session.provisioning_in_flight,
            last_reconnect_delay: session.last_reconnect_delay,
            scenario_id: session.scenario_id.clone(),
            display_target: session.display_target.clone(),
        }
    }

    /// Starts a session for `identity` against the orchestrator at `endpoint`.
    ///
    /// Only accepted from `Disconnected`. Every accepted call gets a fresh
    /// reconnect budget and cancels a reconnect that is still pending.
    pub async fn open(
        self: &Arc<Self>,
        identity: &str,
        endpoint: &str,
    ) -> Result<(), SessionError> {
        let endpoint = endpoint.trim();
        if identity.trim().is_empty() {
            return Err(SessionError::InvalidInput("identity must not be empty".into()));
        }
        if endpoint.is_empty() {
            return Err(SessionError::InvalidInput("endpoint must not be empty".into()));
        }
        let url = control_url(endpoint, self.config.control_port, identity)?;

        let mut session = self.inner.lock().await;
        if session.state != SessionState::Disconnected {
            return Err(SessionError::AlreadyActive(session.state));
        }
        if session.reconnect_timer.is_some() {
            info!(
                identity = session.identity(),
                "session: cancelling pending reconnect for manual open"
            );
        }
        session.cancel_timers();
        session.identity = Some(identity.to_string());
        session.endpoint = Some(endpoint.to_string());
        session.url = Some(url);
        session.attempt = 0;
        session.last_reconnect_delay = None;
        session.scenario_id = None;
        session.display_target = None;

        info!(identity, endpoint, "session: opening control channel");
        self.start_channel(&mut session);
        Ok(())
    }

    /// Ends the session on operator request and cancels everything pending.
    pub async fn close(&self) {
        let mut session = self.inner.lock().await;
        let had_pending = session.reconnect_timer.is_some();
        session.cancel_timers();
        if let Some(task) = session.channel_task.take() {
            task.abort();
        }
        session.generation += 1;
        session.attempt = 0;
        session.last_reconnect_delay = None;

        let previous = session.state;
        session.state = SessionState::Disconnected;
        if previous != SessionState::Disconnected {
            info!(identity = session.identity(), %previous, "session: closed by operator");
            self.emit(ControllerEvent::Disconnected {
                code: OPERATOR_CLOSE_CODE,
                reason: "closed by operator".into(),
            });
        } else if had_pending {
            info!(identity = session.identity(), "session: pending reconnect cancelled");
        }
    }

    pub async fn on_connected(&self) {
        let mut session = self.inner.lock().await;
        self.handle_connected(&mut session);
    }

    pub async fn on_message(self: &Arc<Self>, raw: &str) {
        let mut session = self.inner.lock().await;
        self.handle_message(&mut session, raw);
    }

    pub async fn on_closed(self: &Arc<Self>, was_clean: bool, code: u16, reason: &str) {
        let mut session = self.inner.lock().await;
        self.handle_closed(&mut session, was_clean, code, reason);
    }

    pub async fn on_channel_error(&self, err: ChannelError) {
        let session = self.inner.lock().await;
        self.handle_channel_error(&session, err);
    }

    fn emit(&self, event: ControllerEvent) {
        let _ = self.events.send(event);
    }

    fn start_channel(self: &Arc<Self>, session: &mut Session) {
        let Some(url) = session.url.clone() else {
            warn!("session: no control url recorded, cannot open channel");
            return;
        };
        if let Some(task) = session.channel_task.take() {
            task.abort();
        }
        session.generation += 1;
        session.state = SessionState::Connecting;

        let generation = session.generation;
        let mut signals = self.connector.open(&url);
        let controller = Arc::clone(self);
        debug!(generation, %url, "session: channel opening");
        session.channel_task = Some(tokio::spawn(async move {
            while let Some(signal) = signals.recv().await {
                controller.dispatch(generation, signal).await;
            }
            debug!(generation, "session: channel signal stream ended");
        }));
    }

    async fn dispatch(self: &Arc<Self>, generation: u64, signal: ChannelSignal) {
        let mut session = self.inner.lock().await;
        if session.generation != generation {
            warn!(
                generation,
                current = session.generation,
                ?signal,
                "session: dropping signal from superseded channel"
            );
            return;
        }
        match signal {
            ChannelSignal::Connected => self.handle_connected(&mut session),
            ChannelSignal::Message(raw) => self.handle_message(&mut session, &raw),
            ChannelSignal::Error(err) => self.handle_channel_error(&session, err),
            ChannelSignal::Closed {
                was_clean,
                code,
                reason,
            } => self.handle_closed(&mut session, was_clean, code, &reason),
        }
    }

    fn handle_connected(&self, session: &mut Session) {
        if session.state != SessionState::Connecting {
            warn!(state = %session.state, "session: connected callback outside connecting state");
            return;
        }
        session.attempt = 0;
        session.last_reconnect_delay = None;
        session.state = SessionState::Connected;
        info!(identity = session.identity(), "session: control channel connected");
        self.emit(ControllerEvent::Connected);
    }

    fn handle_message(self: &Arc<Self>, session: &mut Session, raw: &str) {
        if !session.state.channel_open() {
            warn!(state = %session.state, "session: message callback without an open channel");
            return;
        }
        let command = match Command::parse(raw) {
            Ok(command) => command,
            Err(err) => {
                warn!(error = %err, "session: malformed command");
                self.emit(ControllerEvent::Error {
                    category: ErrorCategory::Parse,
                    message: err.to_string(),
                });
                return;
            }
        };

        self.emit(ControllerEvent::CommandReceived {
            action: command.action().to_string(),
            scenario_id: command.scenario_id().cloned(),
        });

        match command {
            Command::StartSimulation { scenario_id } => {
                if session.state != SessionState::Connected {
                    info!(
                        state = %session.state,
                        "session: provisioning already started, ignoring start_simulation"
                    );
                    return;
                }
                if session.provisioning_in_flight {
                    info!(
                        run = session.run,
                        "session: previous run still has a backend call outstanding, \
                         ignoring start_simulation"
                    );
                    return;
                }
                session.state = SessionState::Provisioning;
                session.provisioning_in_flight = true;
                session.run += 1;
                session.scenario_id = scenario_id;
                session.display_target = None;

                let run = session.run;
                info!(
                    run,
                    scenario_id = session.scenario_id.as_ref().map(ScenarioId::as_str),
                    "session: starting provisioning"
                );
                let controller = Arc::clone(self);
                tokio::spawn(async move { controller.provision(run).await });
            }
            Command::Unknown { action } => {
                info!(%action, "session: ignoring unrecognized action");
            }
        }
    }

    fn handle_channel_error(&self, session: &Session, err: ChannelError) {
        warn!(
            identity = session.identity(),
            category = %err.category,
            message = %err.message,
            "session: control channel error"
        );
        self.emit(ControllerEvent::Error {
            category: err.category,
            message: err.message,
        });
    }

    fn handle_closed(
        self: &Arc<Self>,
        session: &mut Session,
        was_clean: bool,
        code: u16,
        reason: &str,
    ) {
        if session.state == SessionState::Disconnected {
            warn!(code, "session: close callback while already disconnected");
            return;
        }
        let previous = session.state;
        session.state = SessionState::Disconnected;
        session.channel_task = None;
        if let Some(timer) = session.settle_timer.take() {
            timer.abort();
        }
        info!(
            identity = session.identity(),
            %previous,
            was_clean,
            code,
            reason,
            "session: control channel closed"
        );
        self.emit(ControllerEvent::Disconnected {
            code,
            reason: reason.to_string(),
        });

        if was_clean {
            return;
        }
        let backoff = self.config.backoff;
        if !backoff.allows_retry_after(session.attempt) {
            warn!(
                attempt = session.attempt,
                max_retries = backoff.max_retries,
                "session: reconnect attempts exhausted, waiting for operator"
            );
            return;
        }

        session.attempt += 1;
        let attempt = session.attempt;
        let delay = backoff.delay(attempt);
        session.last_reconnect_delay = Some(delay);
        let generation = session.generation;
        info!(attempt, ?delay, "session: scheduling reconnect");
        let controller = Arc::clone(self);
        session.reconnect_timer = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            controller.fire_reconnect(generation).await;
        }));
    }

    async fn fire_reconnect(self: &Arc<Self>, generation: u64) {
        let mut session = self.inner.lock().await;
        if session.generation != generation
            || session.state != SessionState::Disconnected
            || session.reconnect_timer.is_none()
        {
            debug!(generation, "session: stale reconnect timer fired");
            return;
        }
        session.reconnect_timer = None;
        info!(
            identity = session.identity(),
            attempt = session.attempt,
            "session: reconnecting"
        );
        self.start_channel(&mut session);
    }

    async fn provision(self: Arc<Self>, run: u64) {
        let image = self.config.image_ref.as_str();
        let host_port = self.config.host_port;
        let container_port = self.config.container_port;

        info!(run, image, "provisioning: acquiring image");
        if let Err(err) = self.backend.acquire_image(image).await {
            self.finish_failed(run, ProvisioningStep::Acquire, err).await;
            return;
        }

        {
            let mut session = self.inner.lock().await;
            if !session.is_current_run(run) {
                session.provisioning_in_flight = false;
                warn!(run, "provisioning: run superseded after acquire, skipping launch");
                return;
            }
        }

        info!(run, image, host_port, container_port, "provisioning: launching instance");
        if let Err(err) = self
            .backend
            .launch_instance(image, host_port, container_port)
            .await
        {
            self.finish_failed(run, ProvisioningStep::Launch, err).await;
            return;
        }

        let mut session = self.inner.lock().await;
        session.provisioning_in_flight = false;
        if !session.is_current_run(run) {
            warn!(run, "provisioning: run superseded after launch");
            return;
        }
        let delay = self.config.settle_delay;
        debug!(run, ?delay, "provisioning: waiting for instance to settle");
        let controller = Arc::clone(&self);
        session.settle_timer = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            controller.finish_ready(run).await;
        }));
    }

    async fn finish_failed(&self, run: u64, step: ProvisioningStep, err: ProvisioningError) {
        let mut session = self.inner.lock().await;
        session.provisioning_in_flight = false;
        if !session.is_current_run(run) {
            warn!(run, %step, error = %err, "provisioning: dropping result of superseded run");
            return;
        }
        session.state = SessionState::Connected;
        warn!(run, %step, error = %err, "provisioning: step failed");
        self.emit(ControllerEvent::ProvisioningFailed {
            step,
            message: err.to_string(),
        });
    }

    async fn finish_ready(&self, run: u64) {
        let mut session = self.inner.lock().await;
        session.settle_timer = None;
        if !session.is_current_run(run) {
            warn!(run, "provisioning: settle finished for superseded run");
            return;
        }
        let target = DisplayTarget::websocket(&self.config.display_host, self.config.host_port);
        session.state = SessionState::Ready;
        session.display_target = Some(target.clone());
        info!(run, display_target = %target, "provisioning: instance ready");
        self.emit(ControllerEvent::ProvisioningSucceeded {
            display_target: target,
        });
    }
}

#[cfg(test)]
#[path = "tests/controller_tests.rs"]
mod tests;
