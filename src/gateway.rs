// SPDX-FileCopyrightText: Copyright (c) 2017-2024 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Lifecycle of the gateway module as seen by its host.

use std::{
    io,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread,
};

use thiserror::Error;
use tokio::{
    runtime::{self, Runtime},
    sync::{Mutex, Notify},
};

use crate::{
    config::{parse_config, Options, ServerConfig},
    error::ConfigError,
    message::{Message, Publish},
    registry::Registry,
    scheduler::Scheduler,
    writeback::{self, WriteBackError},
};

const WORKER_THREAD_NAME: &str = "modbus-poll";

/// Failed to create a [`Gateway`].
#[derive(Debug, Error)]
pub enum StartupError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("failed to set up the runtime: {0}")]
    Runtime(#[from] io::Error),
}

/// A running gateway module.
///
/// Owns the async runtime, the configured servers and the poll worker.
/// All methods are blocking and must not be called from within an async
/// context.
pub struct Gateway {
    runtime: Runtime,
    registry: Arc<Mutex<Registry>>,
    publisher: Arc<dyn Publish>,
    options: Options,
    stop: Arc<AtomicBool>,
    wake: Arc<Notify>,
    worker: Option<thread::JoinHandle<()>>,
}

impl Gateway {
    /// Sets up the module without connecting to any server.
    pub fn create(
        servers: Vec<ServerConfig>,
        publisher: Arc<dyn Publish>,
        options: Options,
    ) -> io::Result<Self> {
        let registry = Registry::new(servers);
        if registry.is_empty() {
            log::warn!("No servers configured");
        }
        let runtime = runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .thread_name("modbus-io")
            .enable_all()
            .build()?;
        Ok(Self {
            runtime,
            registry: Arc::new(Mutex::new(registry)),
            publisher,
            options,
            stop: Arc::new(AtomicBool::new(false)),
            wake: Arc::new(Notify::new()),
            worker: None,
        })
    }

    /// Parses a JSON configuration and sets up the module.
    pub fn from_json(
        json: &str,
        publisher: Arc<dyn Publish>,
        options: Options,
    ) -> Result<Self, StartupError> {
        let servers = parse_config(json)?;
        Ok(Self::create(servers, publisher, options)?)
    }

    /// Starts polling in a background thread.
    ///
    /// Calling this more than once has no effect.
    pub fn start(&mut self) -> io::Result<()> {
        if self.worker.is_some() {
            return Ok(());
        }
        let scheduler = Scheduler::new(
            Arc::clone(&self.registry),
            Arc::clone(&self.publisher),
            self.options,
        );
        let handle = self.runtime.handle().clone();
        let stop = Arc::clone(&self.stop);
        let wake = Arc::clone(&self.wake);
        let worker = thread::Builder::new()
            .name(WORKER_THREAD_NAME.into())
            .spawn(move || handle.block_on(scheduler.run(&stop, &wake)))?;
        self.worker = Some(worker);
        log::info!("Gateway started");
        Ok(())
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.worker.is_some()
    }

    /// Handles an inbound message, forwarding write commands to their server.
    ///
    /// Messages that are not write commands are rejected with
    /// [`WriteBackError::Command`].
    pub fn receive(&self, message: &Message) -> Result<(), WriteBackError> {
        let res = self.runtime.block_on(writeback::handle_message(
            &self.registry,
            message,
            &self.options,
        ));
        match &res {
            Ok(()) => log::info!("Write command forwarded"),
            Err(WriteBackError::Command(err)) => log::warn!("Dropping message: {err}"),
            Err(err) => log::error!("Write-back failed: {err}"),
        }
        res
    }

    /// Stops polling and closes all connections.
    pub fn destroy(self) {
        drop(self);
    }

    fn shutdown(&mut self) {
        self.stop.store(true, Ordering::Release);
        self.wake.notify_one();
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                log::error!("Poll worker panicked");
            }
        }
        let registry = Arc::clone(&self.registry);
        self.runtime.block_on(async move {
            registry.lock().await.close_all().await;
        });
        log::info!("Gateway stopped");
    }
}

impl Drop for Gateway {
    fn drop(&mut self) {
        self.shutdown();
    }
}
