//! Client runtime: one TCP connection to the router, reconnecting on loss.
//!
//! The runtime owns the [`TerminalEngine`] behind an async mutex. Each session
//! announces the engine, lets every device re-assert its outputs, then pumps
//! routed messages into the engine and the engine's outbound queue onto the
//! socket. Code outside the session changes terminals through a
//! [`ClientHandle`], which wakes the writer.

use std::{io::ErrorKind, sync::Arc, time::Duration};

use bytes::BytesMut;
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{TcpStream, tcp::OwnedWriteHalf},
    sync::{Mutex, Notify},
};
use wirenet_core::{Environment, SystemEnv};
use wirenet_proto::LineCodec;

use crate::{
    engine::TerminalEngine,
    error::{ConnectionError, EngineError},
    reaction::Device,
};

/// Client connection settings.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Router address (e.g., "127.0.0.1:23456")
    pub server_address: String,
    /// Group label sent in `clientname`
    pub client_name: String,
    /// Delay between connection attempts
    pub retry_interval: Duration,
    /// Reconnect after the connection is lost
    pub reconnect: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_address: "127.0.0.1:23456".to_string(),
            client_name: "default".to_string(),
            retry_interval: Duration::from_millis(500),
            reconnect: true,
        }
    }
}

/// Shared access to a running client's engine.
#[derive(Clone)]
pub struct ClientHandle {
    engine: Arc<Mutex<TerminalEngine>>,
    flush: Arc<Notify>,
}

impl ClientHandle {
    /// Run `f` against the engine and flush whatever it queued.
    pub async fn update<R>(&self, f: impl FnOnce(&mut TerminalEngine) -> R) -> R {
        let result = f(&mut *self.engine.lock().await);
        self.flush.notify_one();
        result
    }
}

impl std::fmt::Debug for ClientHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientHandle").finish_non_exhaustive()
    }
}

/// Drives a [`TerminalEngine`] over TCP.
pub struct ClientRuntime<E: Environment = SystemEnv> {
    env: E,
    config: ClientConfig,
    engine: Arc<Mutex<TerminalEngine>>,
    devices: Vec<Arc<dyn Device>>,
    flush: Arc<Notify>,
}

impl ClientRuntime<SystemEnv> {
    /// Runtime on the system clock.
    pub fn new(config: ClientConfig) -> Self {
        Self::with_env(SystemEnv::new(), config)
    }
}

impl<E: Environment> ClientRuntime<E> {
    /// Runtime on a caller-supplied environment.
    pub fn with_env(env: E, config: ClientConfig) -> Self {
        let engine = TerminalEngine::new(config.client_name.clone());
        Self {
            env,
            config,
            engine: Arc::new(Mutex::new(engine)),
            devices: Vec::new(),
            flush: Arc::new(Notify::new()),
        }
    }

    /// Install a device on the engine and keep it for reconnect hooks.
    ///
    /// # Errors
    ///
    /// Returns whatever `install` returns; nothing is kept on failure.
    pub async fn install<D, F>(&mut self, install: F) -> Result<Arc<D>, EngineError>
    where
        D: Device + 'static,
        F: FnOnce(&mut TerminalEngine) -> Result<Arc<D>, EngineError>,
    {
        let device = install(&mut *self.engine.lock().await)?;
        self.devices.push(device.clone());
        Ok(device)
    }

    /// Handle for changing terminals while the runtime runs.
    pub fn handle(&self) -> ClientHandle {
        ClientHandle { engine: Arc::clone(&self.engine), flush: Arc::clone(&self.flush) }
    }

    /// Settings in use.
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Connect and serve until a fatal error, or until the first
    /// disconnect when reconnecting is turned off.
    ///
    /// # Errors
    ///
    /// Fatal device errors (e.g., a short circuit) and connect failures other
    /// than the retryable ones.
    pub async fn run(self) -> Result<(), ConnectionError> {
        loop {
            let stream = self.connect().await?;
            let outcome = self.session(stream).await;
            self.engine.lock().await.on_disconnected();

            match outcome {
                Ok(()) => tracing::info!("Server closed the connection"),
                Err(e) if e.is_fatal() => {
                    tracing::error!("Client halted: {}", e);
                    return Err(e);
                },
                Err(e) => tracing::warn!("Connection lost: {}", e),
            }

            if !self.config.reconnect {
                return Ok(());
            }
            self.env.sleep(self.config.retry_interval).await;
        }
    }

    async fn connect(&self) -> Result<TcpStream, ConnectionError> {
        loop {
            match TcpStream::connect(&self.config.server_address).await {
                Ok(stream) => {
                    stream.set_nodelay(true)?;
                    tracing::info!("Connected to {}", self.config.server_address);
                    return Ok(stream);
                },
                Err(e) if is_retryable(e.kind()) => {
                    tracing::debug!(
                        "Connect to {} failed ({}), retrying in {:?}",
                        self.config.server_address,
                        e,
                        self.config.retry_interval
                    );
                    self.env.sleep(self.config.retry_interval).await;
                },
                Err(e) => return Err(e.into()),
            }
        }
    }

    async fn session(&self, stream: TcpStream) -> Result<(), ConnectionError> {
        let (mut reader, mut writer) = stream.into_split();
        let codec = LineCodec::new();
        let mut read_buf = BytesMut::with_capacity(4096);

        {
            let mut engine = self.engine.lock().await;
            engine.on_connected();
            for device in &self.devices {
                contain(device.on_connected(&mut engine))?;
            }
        }
        self.write_outbound(&codec, &mut writer).await?;

        loop {
            tokio::select! {
                read = reader.read_buf(&mut read_buf) => {
                    if read? == 0 {
                        return Ok(());
                    }
                    while let Some(message) = codec.decode(&mut read_buf)? {
                        let mut engine = self.engine.lock().await;
                        contain(engine.handle_message(message))?;
                    }
                },
                () = self.flush.notified() => {},
            }

            self.write_outbound(&codec, &mut writer).await?;
        }
    }

    async fn write_outbound(
        &self,
        codec: &LineCodec,
        writer: &mut OwnedWriteHalf,
    ) -> Result<(), ConnectionError> {
        let messages = self.engine.lock().await.take_outbound();
        if messages.is_empty() {
            return Ok(());
        }

        let mut buf = BytesMut::new();
        for message in &messages {
            codec.encode(message, &mut buf)?;
        }
        writer.write_all(&buf).await?;
        Ok(())
    }
}

impl<E: Environment> std::fmt::Debug for ClientRuntime<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientRuntime")
            .field("config", &self.config)
            .field("devices", &self.devices.len())
            .finish_non_exhaustive()
    }
}

/// Log contained engine errors and surface fatal ones.
fn contain(result: Result<(), EngineError>) -> Result<(), ConnectionError> {
    match result {
        Ok(()) => Ok(()),
        Err(e) if e.is_fatal() => Err(e.into()),
        Err(e) => {
            tracing::warn!("Ignoring message: {}", e);
            Ok(())
        },
    }
}

fn is_retryable(kind: ErrorKind) -> bool {
    matches!(
        kind,
        ErrorKind::ConnectionRefused
            | ErrorKind::ConnectionReset
            | ErrorKind::ConnectionAborted
            | ErrorKind::TimedOut
    )
}
