// SPDX-FileCopyrightText: Copyright (c) 2017-2024 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The fixed-period poll loop.

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use tokio::sync::{Mutex, Notify};

use crate::{
    config::Options,
    message::{persistence_message, record_message, Publish},
    registry::Registry,
};

/// Polls every due server once per tick and publishes the results.
pub struct Scheduler {
    registry: Arc<Mutex<Registry>>,
    publisher: Arc<dyn Publish>,
    options: Options,
}

impl Scheduler {
    #[must_use]
    pub fn new(registry: Arc<Mutex<Registry>>, publisher: Arc<dyn Publish>, options: Options) -> Self {
        Self {
            registry,
            publisher,
            options,
        }
    }

    /// Advances all sessions by one tick.
    ///
    /// The registry is locked per server, so write-backs can interleave
    /// between servers. Failures of one server never affect the others.
    pub async fn tick(&self) {
        let count = self.registry.lock().await.len();
        for index in 0..count {
            let (device_id, persist, res) = {
                let mut registry = self.registry.lock().await;
                let Some(session) = registry.get_mut(index) else {
                    break;
                };
                if !session.advance(self.options.tick) {
                    continue;
                }
                let device_id = session.device_id().clone();
                let persist = session.config().persist;
                log::debug!("Polling {device_id}");
                let res = session.poll(self.options.io_timeout).await;
                (device_id, persist, res)
            };
            match res {
                Ok(Ok(record)) => {
                    self.publisher.publish(record_message(&record));
                    let persisted = persist.then(|| persistence_message(&record)).flatten();
                    if let Some(message) = persisted {
                        self.publisher.publish(message);
                    }
                }
                Ok(Err(exception)) => {
                    log::warn!("Polling {device_id} failed with exception: {exception}");
                }
                Err(err) => {
                    log::error!("Polling {device_id} failed: {err}");
                }
            }
        }
    }

    /// Ticks until `stop` is set.
    ///
    /// `wake` interrupts the pause between two ticks.
    pub async fn run(&self, stop: &AtomicBool, wake: &Notify) {
        log::debug!("Poll loop started");
        loop {
            tokio::select! {
                () = tokio::time::sleep(self.options.tick) => {}
                () = wake.notified() => {}
            }
            if stop.load(Ordering::Acquire) {
                break;
            }
            self.tick().await;
        }
        log::debug!("Poll loop stopped");
    }
}
