//! [`CommandChannel`] – the operator connection server.
//!
//! Serves one connection at a time.  For each connection two activities run
//! side by side:
//!
//! * the **receive loop** decodes JSON frames, classifies them and submits
//!   jobs to the actuation worker, in arrival order;
//! * the **telemetry task** writes `BATTERY:` and `PROGRESS:` tokens once
//!   immediately and then every interval, whether or not a pattern runs.
//!
//! When the client goes away the connection's cancel token is raised (so an
//! in-flight pattern emergency-stops and aborts) and an emergency stop is
//! queued behind it, which also halts a manual button the operator was
//! still holding.  Then the telemetry task is stopped and the server
//! returns to accepting.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use fieldbot_hal::BatterySource;
use fieldbot_kernel::SafetyState;
use fieldbot_runtime::{ActuationHandle, RunResult};
use fieldbot_types::{FieldError, ParserConfig, TelemetrySnapshot};
use serde_json::Value;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, ToSocketAddrs};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::frame::{DEFAULT_MAX_FRAME_BYTES, JsonFrameDecoder};
use crate::protocol::{Inbound, classify, telemetry_tokens};

const READ_CHUNK: usize = 1024;

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct ChannelConfig {
    pub telemetry_interval: Duration,
    pub max_frame_bytes: usize,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            telemetry_interval: Duration::from_secs(10),
            max_frame_bytes: DEFAULT_MAX_FRAME_BYTES,
        }
    }
}

// ---------------------------------------------------------------------------
// CommandChannel
// ---------------------------------------------------------------------------

/// Accepts operator connections and bridges them to the actuation worker.
///
/// # Example
///
/// ```rust,no_run
/// # use std::sync::Arc;
/// # use fieldbot_middleware::{ChannelConfig, CommandChannel};
/// # async fn demo(
/// #     actuation: fieldbot_runtime::ActuationHandle,
/// #     safety: Arc<fieldbot_kernel::SafetyState>,
/// #     battery: Arc<dyn fieldbot_hal::BatterySource>,
/// # ) -> Result<(), fieldbot_types::FieldError> {
/// let channel = CommandChannel::new(
///     ChannelConfig::default(),
///     Default::default(),
///     actuation,
///     safety,
///     battery,
/// );
/// channel.bind_and_serve("0.0.0.0:8765", std::future::pending()).await
/// # }
/// ```
pub struct CommandChannel {
    config: ChannelConfig,
    parser: ParserConfig,
    actuation: ActuationHandle,
    safety: Arc<SafetyState>,
    battery: Arc<dyn BatterySource>,
    shutdown: CancellationToken,
}

impl CommandChannel {
    pub fn new(
        config: ChannelConfig,
        parser: ParserConfig,
        actuation: ActuationHandle,
        safety: Arc<SafetyState>,
        battery: Arc<dyn BatterySource>,
    ) -> Self {
        Self {
            config,
            parser,
            actuation,
            safety,
            battery,
            shutdown: CancellationToken::new(),
        }
    }

    /// Parent of every per-connection cancel token.  Cancelling it aborts
    /// whatever the current connection is running.
    pub fn with_shutdown_token(mut self, token: CancellationToken) -> Self {
        self.shutdown = token;
        self
    }

    /// Bind `addr` and [`serve`](Self::serve) until `shutdown` resolves.
    ///
    /// # Errors
    ///
    /// Returns [`FieldError::Config`] if the address cannot be bound.
    pub async fn bind_and_serve(
        self,
        addr: impl ToSocketAddrs,
        shutdown: impl Future<Output = ()>,
    ) -> Result<(), FieldError> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| FieldError::Config(format!("cannot bind command channel: {e}")))?;
        self.serve(listener, shutdown).await
    }

    /// Accept connections one at a time until `shutdown` resolves.
    pub async fn serve(self, listener: TcpListener, shutdown: impl Future<Output = ()>) -> Result<(), FieldError> {
        if let Ok(addr) = listener.local_addr() {
            info!(%addr, "command channel listening");
        }
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        tokio::select! {
                            _ = self.serve_connection(stream, peer.to_string()) => {}
                            _ = &mut shutdown => break,
                        }
                    }
                    Err(e) => warn!(error = %e, "accept failed"),
                },
            }
        }

        info!("command channel shutting down");
        self.shutdown.cancel();
        Ok(())
    }

    /// Run one connection to completion.
    ///
    /// Generic over the transport so any byte stream (TCP, a serial radio
    /// bridge, an in-memory pipe) can carry the protocol.
    #[instrument(skip(self, stream))]
    pub async fn serve_connection<S>(&self, stream: S, peer: String)
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        info!("client connected");
        let (mut reader, writer) = tokio::io::split(stream);
        let session = Session {
            cancel: self.shutdown.child_token(),
            actuation: self.actuation.clone(),
            telemetry: tokio::spawn(telemetry_loop(
                writer,
                Arc::clone(&self.safety),
                Arc::clone(&self.battery),
                self.config.telemetry_interval,
            )),
        };
        let cancel = session.cancel.clone();

        let mut decoder = JsonFrameDecoder::new(self.config.max_frame_bytes);
        let mut chunk = vec![0u8; READ_CHUNK];
        loop {
            let n = match reader.read(&mut chunk).await {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) => {
                    warn!(error = %e, "read failed");
                    break;
                }
            };
            for frame in decoder.push(&chunk[..n]) {
                match frame {
                    Ok(value) => self.dispatch(&value, &cancel).await,
                    Err(e) => warn!(error = %e, "dropping inbound bytes"),
                }
            }
        }
        info!("client disconnected");
        drop(session);
    }

    async fn dispatch(&self, value: &Value, cancel: &CancellationToken) {
        let inbound = match classify(value, &self.parser) {
            Ok(inbound) => inbound,
            Err(e) => {
                warn!(error = %e, "ignoring message");
                return;
            }
        };

        match inbound {
            Inbound::Pattern(pattern) => {
                info!(steps = pattern.len(), "pattern received");
                match self.actuation.run_pattern(pattern, cancel.clone()).await {
                    Ok(done) => {
                        tokio::spawn(async move {
                            match done.await {
                                Ok(RunResult::Completed) => info!("pattern finished"),
                                Ok(RunResult::AbortedAt(order)) => warn!(order, "pattern aborted"),
                                Err(_) => warn!("actuation worker dropped the pattern"),
                            }
                        });
                    }
                    Err(e) => warn!(error = %e, "pattern not queued"),
                }
            }
            Inbound::Manual(action) => {
                debug!(?action, "manual command received");
                if let Err(e) = self.actuation.manual(action).await {
                    warn!(error = %e, "manual command not queued");
                }
            }
        }
    }
}

/// Per-connection resources, released when the connection ends for any
/// reason (including the serving future being dropped).
struct Session {
    cancel: CancellationToken,
    actuation: ActuationHandle,
    telemetry: JoinHandle<()>,
}

impl Drop for Session {
    fn drop(&mut self) {
        self.cancel.cancel();
        if let Err(e) = self.actuation.request_emergency_stop() {
            warn!(error = %e, "could not queue emergency stop for closed connection");
        }
        self.telemetry.abort();
    }
}

// ---------------------------------------------------------------------------
// Telemetry
// ---------------------------------------------------------------------------

async fn telemetry_loop<W>(
    mut writer: W,
    safety: Arc<SafetyState>,
    battery: Arc<dyn BatterySource>,
    interval: Duration,
) where
    W: AsyncWrite + Unpin,
{
    let mut ticker = tokio::time::interval(interval.max(Duration::from_millis(1)));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        // The first tick completes immediately: initial status on connect.
        ticker.tick().await;
        let battery_percent = match battery.battery_percent() {
            Ok(pct) => pct,
            Err(e) => {
                warn!(error = %e, "battery read failed, reporting 0");
                0.0
            }
        };
        let snapshot = TelemetrySnapshot {
            battery_percent,
            progress: safety.progress(),
        };
        for token in telemetry_tokens(&snapshot) {
            if let Err(e) = writer.write_all(token.as_bytes()).await {
                debug!(error = %e, "telemetry write failed, stopping");
                return;
            }
        }
        if writer.flush().await.is_err() {
            return;
        }
    }
}
