// SPDX-FileCopyrightText: Copyright (c) 2017-2024 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::{
    config::{DeviceId, ServerConfig},
    session::Session,
};

/// All configured servers in configuration order.
#[derive(Debug, Default)]
pub struct Registry {
    sessions: Vec<Session>,
}

impl Registry {
    #[must_use]
    pub fn new(configs: Vec<ServerConfig>) -> Self {
        Self {
            sessions: configs.into_iter().map(Session::new).collect(),
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    #[must_use]
    pub fn get(&self, index: usize) -> Option<&Session> {
        self.sessions.get(index)
    }

    pub fn get_mut(&mut self, index: usize) -> Option<&mut Session> {
        self.sessions.get_mut(index)
    }

    /// Looks up the session of a device, ignoring case.
    ///
    /// The first match wins if a device is configured more than once.
    pub fn find_mut(&mut self, device_id: &str) -> Option<&mut Session> {
        let index = self.position(device_id)?;
        self.sessions.get_mut(index)
    }

    fn position(&self, device_id: &str) -> Option<usize> {
        let device_id = DeviceId::normalize(device_id);
        if device_id.is_empty() {
            return None;
        }
        self.sessions
            .iter()
            .position(|session| session.device_id().as_str() == device_id)
    }

    pub async fn close_all(&mut self) {
        for session in &mut self.sessions {
            session.close().await;
        }
    }
}
