//! The plugin context: one per gateway process
//!
//! Owns the session registry, the signaling queue and the runtime that drives
//! the signaling worker and the watchdog. Every gateway hook is a method here.
//! The hooks are synchronous and must be called from gateway threads, not from
//! inside an async runtime.

use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tokio::runtime::Runtime;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::forward::{self, Verdict};
use crate::gateway::{Gateway, PluginResult, SessionHandle};
use crate::handler::{self, Outcome};
use crate::registry::SessionRegistry;
use crate::session::Session;
use crate::signaling::{self, SignalingCommand, SignalingMessage, SignalingSender};
use crate::{logging, watchdog};

/// Identification reported to the gateway
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PluginMetadata {
    pub version: u32,
    pub version_string: &'static str,
    pub description: &'static str,
    pub name: &'static str,
    pub author: &'static str,
    pub package: &'static str,
}

pub const METADATA: PluginMetadata = PluginMetadata {
    version: 1,
    version_string: env!("CARGO_PKG_VERSION"),
    description: "Forwards RTP and RTCP to an external UDP receiver/decoder",
    name: "rtpforward",
    author: env!("CARGO_PKG_AUTHORS"),
    package: "janus.plugin.rtpforward",
};

/// How long shutdown waits for runtime tasks that did not stop on their own
const RUNTIME_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(1);

struct Workers {
    runtime: Runtime,
    signaling: JoinHandle<()>,
    watchdog: JoinHandle<()>,
    shutdown: watch::Sender<bool>,
}

pub struct RtpForward {
    config: Config,
    gateway: Arc<dyn Gateway>,
    registry: Arc<SessionRegistry>,
    signaling: SignalingSender,
    initialized: AtomicBool,
    stopping: AtomicBool,
    workers: Mutex<Option<Workers>>,
}

impl RtpForward {
    /// Load configuration from the gateway's configuration directory and start.
    pub fn from_config_dir(config_dir: Option<&Path>, gateway: Arc<dyn Gateway>) -> anyhow::Result<Self> {
        let config = Config::load(config_dir)?;
        Ok(Self::init(config, gateway)?)
    }

    /// Start the signaling worker and the watchdog.
    pub fn init(config: Config, gateway: Arc<dyn Gateway>) -> Result<Self> {
        logging::init(&config.log_filter);

        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .thread_name("rtpforward")
            .enable_all()
            .build()
            .map_err(Error::Startup)?;

        let registry = Arc::new(SessionRegistry::new());
        let (signaling_tx, signaling_rx) = signaling::channel();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let relay_poll = config.feedback_relay.then(|| config.feedback_poll());
        let signaling = runtime.spawn(signaling::run(signaling_rx, gateway.clone(), relay_poll));
        let watchdog = runtime.spawn(watchdog::run(
            registry.clone(),
            config.gc_interval(),
            config.grace_period(),
            shutdown_rx,
        ));

        tracing::info!(
            "{} {} initialized (gc every {:?}, grace {:?}, feedback relay {})",
            METADATA.name,
            METADATA.version_string,
            config.gc_interval(),
            config.grace_period(),
            if config.feedback_relay { "on" } else { "off" }
        );

        Ok(Self {
            config,
            gateway,
            registry,
            signaling: signaling_tx,
            initialized: AtomicBool::new(true),
            stopping: AtomicBool::new(false),
            workers: Mutex::new(Some(Workers {
                runtime,
                signaling,
                watchdog,
                shutdown: shutdown_tx,
            })),
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    fn ensure_running(&self) -> Result<()> {
        if self.stopping.load(Ordering::Acquire) {
            Err(Error::ShuttingDown)
        } else if !self.initialized.load(Ordering::Acquire) {
            Err(Error::NotInitialized)
        } else {
            Ok(())
        }
    }

    /// Stop the workers and free every session. Idempotent.
    pub fn destroy(&self) {
        if !self.initialized.load(Ordering::Acquire) || self.stopping.swap(true, Ordering::AcqRel) {
            return;
        }
        let Some(workers) = self.workers.lock().take() else {
            return;
        };

        tracing::info!("{} shutting down", METADATA.name);

        if self.signaling.send(SignalingCommand::Shutdown).is_err() {
            tracing::warn!("Signaling worker already gone");
        }
        if let Err(e) = workers.runtime.block_on(workers.signaling) {
            tracing::error!("Signaling worker failed: {}", e);
        }

        workers.shutdown.send_replace(true);
        if let Err(e) = workers.runtime.block_on(workers.watchdog) {
            tracing::error!("Watchdog failed: {}", e);
        }
        workers.runtime.shutdown_timeout(RUNTIME_SHUTDOWN_TIMEOUT);

        watchdog::reclaim(self.registry.drain());

        self.initialized.store(false, Ordering::Release);
        self.stopping.store(false, Ordering::Release);
        tracing::info!("{} destroyed", METADATA.name);
    }

    // Session lifecycle

    /// Register a session for a new gateway handle. The returned session is
    /// what the gateway passes back to the media hooks.
    pub fn create_session(&self, handle: SessionHandle) -> Result<Arc<Session>> {
        self.ensure_running()?;
        let session = Arc::new(Session::new(handle));
        self.registry.insert(session.clone(), Instant::now());
        tracing::info!("Session {} created", handle);
        Ok(session)
    }

    /// Hang up and retire a session. It stays allocated for the grace period.
    pub fn destroy_session(&self, handle: SessionHandle) -> Result<()> {
        self.ensure_running()?;
        if let Some(session) = self.registry.get(handle) {
            self.hang_up(&session);
        }
        self.registry.retire(handle, Instant::now())?;
        tracing::info!("Session {} destroyed", handle);
        Ok(())
    }

    pub fn session(&self, handle: SessionHandle) -> Option<Arc<Session>> {
        self.registry.get(handle)
    }

    /// Forwarding state of a session, for the gateway's admin API
    pub fn query_session(&self, handle: SessionHandle) -> Result<Value> {
        self.ensure_running()?;
        let session = self.registry.get(handle).ok_or(Error::NoSession(handle))?;
        Ok(session.snapshot())
    }

    // Control

    pub fn handle_message(
        &self,
        handle: SessionHandle,
        transaction: Option<String>,
        body: Option<Value>,
        jsep: Option<Value>,
    ) -> PluginResult {
        if let Err(e) = self.ensure_running() {
            return PluginResult::Error(e.to_string());
        }
        let Some(session) = self.registry.get(handle) else {
            tracing::error!("No session associated with handle {}", handle);
            return PluginResult::Ok(Error::NoSession(handle).to_event().to_value());
        };

        match handler::handle_message(
            &self.gateway,
            &self.config,
            &session,
            body.as_ref(),
            jsep.is_some(),
        ) {
            Ok(Outcome::Reply(event)) => PluginResult::Ok(event.to_value()),
            Ok(Outcome::Deferred) => {
                let msg = SignalingMessage {
                    session,
                    transaction,
                    body: body.unwrap_or_default(),
                    jsep,
                };
                if self.signaling.send(SignalingCommand::Message(msg)).is_err() {
                    return PluginResult::Error(Error::ShuttingDown.to_string());
                }
                PluginResult::OkWait("Processing asynchronously".to_string())
            }
            Err(e) => {
                tracing::error!("Session {}: {}", handle, e);
                PluginResult::Ok(e.to_event().to_value())
            }
        }
    }

    // Media hooks

    pub fn setup_media(&self, session: &Session) {
        tracing::info!("Session {}: WebRTC media is now available", session.handle());
    }

    pub fn hangup_media(&self, session: &Session) {
        if self.ensure_running().is_err() {
            return;
        }
        self.hang_up(session);
    }

    /// Feedback relays stop here and come back with the next answer or
    /// `configure`.
    fn hang_up(&self, session: &Session) {
        if session.hang_up() {
            tracing::info!("Session {}: hanging up", session.handle());
            session.stop_relays();
        }
    }

    pub fn incoming_rtp(&self, session: &Session, video: bool, buf: &[u8]) -> Verdict {
        forward::forward_rtp(session, video, buf)
    }

    pub fn incoming_rtcp(&self, session: &Session, video: bool, buf: &[u8]) -> Verdict {
        forward::forward_rtcp(session, video, buf)
    }

    /// Data channels are never negotiated, so anything arriving here is only logged
    pub fn incoming_data(&self, session: &Session, buf: &[u8]) {
        tracing::info!("Session {}: got a DataChannel message ({} bytes)", session.handle(), buf.len());
    }

    pub fn slow_link(&self, session: &Session, uplink: bool, video: bool) {
        tracing::info!(
            "Session {}: slow link ({} {})",
            session.handle(),
            if uplink { "uplink" } else { "downlink" },
            if video { "video" } else { "audio" }
        );
    }
}

impl Drop for RtpForward {
    fn drop(&mut self) {
        self.destroy();
    }
}
