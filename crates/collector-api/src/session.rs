// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Lifecycle of the agent run as seen by the collector API.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Connecting,
    Connected,
    /// The collector permanently rejected the agent. Terminal.
    Terminated,
}

#[derive(Debug)]
struct Session {
    state: SessionState,
    run_id: Option<String>,
    request_headers: Option<HashMap<String, String>>,
    /// Bumped every time a new run is established.
    generation: u64,
}

/// Copy of the session taken before a send so the response can be matched
/// back to the run it was sent under.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionSnapshot {
    pub run_id: Option<String>,
    pub request_headers: Option<HashMap<String, String>>,
    pub generation: u64,
}

/// Shared session state. Many sends read it concurrently; only connect,
/// shutdown, and restart write to it.
#[derive(Debug)]
pub struct SessionContext {
    inner: RwLock<Session>,
}

impl Default for SessionContext {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionContext {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Session {
                state: SessionState::Disconnected,
                run_id: None,
                request_headers: None,
                generation: 0,
            }),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, Session> {
        match self.inner.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn write(&self) -> RwLockWriteGuard<'_, Session> {
        match self.inner.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub fn state(&self) -> SessionState {
        self.read().state
    }

    pub fn is_connected(&self) -> bool {
        self.read().run_id.is_some()
    }

    pub fn run_id(&self) -> Option<String> {
        self.read().run_id.clone()
    }

    pub fn generation(&self) -> u64 {
        self.read().generation
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        let session = self.read();
        SessionSnapshot {
            run_id: session.run_id.clone(),
            request_headers: session.request_headers.clone(),
            generation: session.generation,
        }
    }

    /// Snapshot of the live run, or `None` when not connected.
    pub fn connected_snapshot(&self) -> Option<SessionSnapshot> {
        let snapshot = self.snapshot();
        snapshot.run_id.is_some().then_some(snapshot)
    }

    /// Enters `Connecting` and drops headers left over from an earlier run.
    /// Returns false when the session has been terminated.
    pub fn begin_connecting(&self) -> bool {
        let mut session = self.write();
        if session.state == SessionState::Terminated {
            return false;
        }
        session.state = SessionState::Connecting;
        session.request_headers = None;
        true
    }

    /// Records a granted run and returns its generation.
    pub fn establish(
        &self,
        run_id: String,
        request_headers: Option<HashMap<String, String>>,
    ) -> u64 {
        let mut session = self.write();
        session.state = SessionState::Connected;
        session.run_id = Some(run_id);
        session.request_headers = request_headers;
        session.generation = session.generation.wrapping_add(1);
        session.generation
    }

    /// Clears the run and returns the run id that was cleared.
    pub fn disconnect(&self) -> Option<String> {
        let mut session = self.write();
        if session.state != SessionState::Terminated {
            session.state = SessionState::Disconnected;
        }
        session.request_headers = None;
        session.run_id.take()
    }

    pub fn terminate(&self) -> Option<String> {
        let mut session = self.write();
        session.state = SessionState::Terminated;
        session.request_headers = None;
        session.run_id.take()
    }
}
