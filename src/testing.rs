//! Test doubles for the container engine and readiness probes.
//!
//! Provides:
//! - [`FakeRuntime`]: an in-memory [`ContainerRuntime`] that records every
//!   call, can be told to fail, and can enforce host-port exclusivity
//! - [`ScriptedProbe`]: a probe that fails a fixed number of times
//!
//! # Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use tempsvc::config::EngineConfig;
//! use tempsvc::provisioner::Provisioner;
//! use tempsvc::testing::FakeRuntime;
//!
//! let runtime = Arc::new(FakeRuntime::new());
//! let provisioner = Provisioner::new(runtime.clone(), EngineConfig::default());
//! ```

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;

use crate::launch::LaunchSpec;
use crate::probe::{ProbeError, ReadinessProbe};
use crate::runtime::{ContainerHandle, ContainerRuntime, RuntimeError};

/// A call observed by [`FakeRuntime`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuntimeCall {
    Start { id: String },
    SetTtl { id: String, ttl: Duration },
    Stop { id: String },
}

#[derive(Default)]
struct FakeState {
    next_id: u64,
    running: HashMap<String, LaunchSpec>,
    bound_ports: HashSet<u16>,
    calls: Vec<RuntimeCall>,
}

/// In-memory container engine.
#[derive(Default)]
pub struct FakeRuntime {
    state: Mutex<FakeState>,
    fail_start: AtomicBool,
    fail_stop: AtomicBool,
    fail_ttl: AtomicBool,
    exclusive_ports: AtomicBool,
}

impl FakeRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject starts whose host ports are held by a running container, the
    /// way a real engine fails to bind an occupied port.
    pub fn with_exclusive_ports(self) -> Self {
        self.exclusive_ports.store(true, Ordering::SeqCst);
        self
    }

    pub fn fail_start(&self, fail: bool) {
        self.fail_start.store(fail, Ordering::SeqCst);
    }

    pub fn fail_stop(&self, fail: bool) {
        self.fail_stop.store(fail, Ordering::SeqCst);
    }

    pub fn fail_ttl(&self, fail: bool) {
        self.fail_ttl.store(fail, Ordering::SeqCst);
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, FakeState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn calls(&self) -> Vec<RuntimeCall> {
        self.lock().calls.clone()
    }

    /// Stop calls recorded against one container.
    pub fn stop_count(&self, id: &str) -> usize {
        self.lock()
            .calls
            .iter()
            .filter(|call| matches!(call, RuntimeCall::Stop { id: stopped } if stopped == id))
            .count()
    }

    pub fn total_stops(&self) -> usize {
        self.lock()
            .calls
            .iter()
            .filter(|call| matches!(call, RuntimeCall::Stop { .. }))
            .count()
    }

    pub fn started_count(&self) -> usize {
        self.lock()
            .calls
            .iter()
            .filter(|call| matches!(call, RuntimeCall::Start { .. }))
            .count()
    }

    /// Containers started and not yet stopped.
    pub fn running_count(&self) -> usize {
        self.lock().running.len()
    }

    /// Launch description of a running container.
    pub fn spec_of(&self, id: &str) -> Option<LaunchSpec> {
        self.lock().running.get(id).cloned()
    }
}

#[async_trait]
impl ContainerRuntime for FakeRuntime {
    async fn start(&self, spec: &LaunchSpec) -> Result<ContainerHandle, RuntimeError> {
        let name = format!("fake-{}", spec.service());
        if self.fail_start.load(Ordering::SeqCst) {
            return Err(RuntimeError::Start {
                name,
                reason: "start refused".to_string(),
            });
        }

        let mut state = self.lock();
        if self.exclusive_ports.load(Ordering::SeqCst)
            && let Some(port) = spec
                .port_bindings()
                .values()
                .find(|port| state.bound_ports.contains(*port))
        {
            return Err(RuntimeError::Start {
                name,
                reason: format!("port {port} is already allocated"),
            });
        }

        state.next_id += 1;
        let id = format!("fake-{}", state.next_id);
        state.bound_ports.extend(spec.port_bindings().values().copied());
        state.running.insert(id.clone(), spec.clone());
        state.calls.push(RuntimeCall::Start { id: id.clone() });

        Ok(ContainerHandle::new(id, format!("{}-{}", name, state.next_id)))
    }

    async fn stop(&self, handle: &ContainerHandle) -> Result<(), RuntimeError> {
        let mut state = self.lock();
        state.calls.push(RuntimeCall::Stop {
            id: handle.id().to_string(),
        });

        if self.fail_stop.load(Ordering::SeqCst) {
            return Err(RuntimeError::Stop {
                id: handle.id().to_string(),
                reason: "stop refused".to_string(),
            });
        }

        if let Some(spec) = state.running.remove(handle.id()) {
            for port in spec.port_bindings().values() {
                state.bound_ports.remove(port);
            }
        }
        Ok(())
    }

    async fn set_ttl(&self, handle: &ContainerHandle, ttl: Duration) -> Result<(), RuntimeError> {
        let mut state = self.lock();
        state.calls.push(RuntimeCall::SetTtl {
            id: handle.id().to_string(),
            ttl,
        });

        if self.fail_ttl.load(Ordering::SeqCst) {
            return Err(RuntimeError::Expire {
                id: handle.id().to_string(),
                reason: "exec refused".to_string(),
            });
        }
        Ok(())
    }
}

/// A probe that fails a fixed number of times before succeeding.
pub struct ScriptedProbe {
    failures: Option<u32>,
    latency: Duration,
    calls: AtomicU32,
}

impl ScriptedProbe {
    pub fn succeeding() -> Self {
        Self::failing_times(0)
    }

    pub fn failing_times(failures: u32) -> Self {
        Self {
            failures: Some(failures),
            latency: Duration::ZERO,
            calls: AtomicU32::new(0),
        }
    }

    pub fn always_failing() -> Self {
        Self {
            failures: None,
            latency: Duration::ZERO,
            calls: AtomicU32::new(0),
        }
    }

    /// Make every check take `latency` before answering.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ReadinessProbe for ScriptedProbe {
    async fn check(&self) -> Result<(), ProbeError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        match self.failures {
            Some(failures) if call > failures => Ok(()),
            _ => Err(ProbeError::msg(format!("not ready (attempt {call})"))),
        }
    }
}
