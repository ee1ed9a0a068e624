//! The provisioning state machine.
//!
//! ```text
//! Building ──▶ Starting ──▶ Probing ──▶ Ready
//!                 │            │
//!                 ▼            ▼
//!            (StartError)   Failed ──▶ Cleaned
//! ```
//!
//! Every exit after the container starts goes through one cleanup call, so a
//! started container is either handed to the caller inside a
//! [`Resource`] or has had exactly one removal attempt.

use std::sync::Arc;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::error::{CleanupError, ProvisionError};
use crate::launch::LaunchSpec;
use crate::ports::PortLease;
use crate::probe::{ProbeError, ReadinessProbe};
use crate::resource::{Endpoint, Resource};
use crate::retry::{RetryPolicy, RetryState};
use crate::runtime::{ContainerHandle, ContainerRuntime};

/// Phase of one provisioning call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LaunchState {
    Building,
    Starting,
    Probing,
    Ready,
    Failed,
    Cleaned,
}

/// Everything needed to start one container and hand it back.
#[derive(Debug)]
pub struct ProvisionRequest<S> {
    spec: LaunchSpec,
    settings: S,
    endpoint: Endpoint,
    leases: Vec<PortLease>,
}

impl<S> ProvisionRequest<S> {
    pub fn new(spec: LaunchSpec, settings: S, endpoint: Endpoint) -> Self {
        Self {
            spec,
            settings,
            endpoint,
            leases: Vec::new(),
        }
    }

    /// Keep these port reservations alive until the engine has bound them.
    pub fn with_leases(mut self, leases: Vec<PortLease>) -> Self {
        self.leases = leases;
        self
    }

    pub fn spec(&self) -> &LaunchSpec {
        &self.spec
    }
}

impl ProvisionRequest<()> {
    /// Request with no service settings; the endpoint is the first bound port.
    pub fn bare(spec: LaunchSpec) -> Self {
        let ports = spec
            .port_bindings()
            .iter()
            .map(|(c, h)| (*c, *h))
            .collect();
        let primary = spec.port_bindings().values().next().copied().unwrap_or(0);
        let endpoint = Endpoint::new(spec.host_ip(), primary, ports);
        Self::new(spec, (), endpoint)
    }
}

enum Failure {
    TimedOut,
    Cancelled,
}

/// Runs provisioning transactions against one container engine.
#[derive(Clone)]
pub struct Launcher {
    runtime: Arc<dyn ContainerRuntime>,
}

impl Launcher {
    pub fn new(runtime: Arc<dyn ContainerRuntime>) -> Self {
        Self { runtime }
    }

    pub fn runtime(&self) -> &Arc<dyn ContainerRuntime> {
        &self.runtime
    }

    /// Start a container, arm its expiry and wait for `probe` to pass.
    ///
    /// Suspends the calling task while probing. Cancelling `cancel` takes
    /// the same cleanup path as running out of time.
    pub async fn provision<S>(
        &self,
        request: ProvisionRequest<S>,
        probe: &dyn ReadinessProbe,
        policy: &RetryPolicy,
        cancel: &CancellationToken,
    ) -> Result<Resource<S>, ProvisionError> {
        let ProvisionRequest {
            spec,
            settings,
            endpoint,
            leases,
        } = request;

        transition(spec.service(), LaunchState::Starting);
        let started = self.runtime.start(&spec).await;
        drop(leases);
        let handle = started.map_err(|source| ProvisionError::Start {
            image: spec.image().to_string(),
            source,
        })?;
        tracing::info!("Started {} container: {}", spec.service(), handle);

        if let Err(e) = self.runtime.set_ttl(&handle, spec.ttl()).await {
            tracing::warn!(
                "Could not arm expiry on {}: {}; it is removed by the next reap once its expiry label passes",
                handle,
                e
            );
        }

        transition(spec.service(), LaunchState::Probing);
        let mut state = RetryState::new();
        let mut last = None;
        let failure = match self
            .probe_until_ready(probe, policy, cancel, &mut state, &mut last)
            .await
        {
            Ok(()) => {
                transition(spec.service(), LaunchState::Ready);
                tracing::info!(
                    "{} ready at {} after {} attempts",
                    spec.service(),
                    endpoint,
                    state.attempts()
                );
                return Ok(Resource::new(
                    handle,
                    spec,
                    settings,
                    endpoint,
                    Arc::clone(&self.runtime),
                ));
            }
            Err(failure) => failure,
        };

        transition(spec.service(), LaunchState::Failed);
        let cleanup = self.abandon(&handle).await;
        if cleanup.is_none() {
            transition(spec.service(), LaunchState::Cleaned);
        }

        let id = handle.id().to_string();
        Err(match failure {
            Failure::TimedOut => ProvisionError::ReadinessTimeout {
                id,
                attempts: state.attempts(),
                elapsed: state.elapsed(),
                last,
                cleanup,
            },
            Failure::Cancelled => ProvisionError::Cancelled {
                id,
                attempts: state.attempts(),
                last,
                cleanup,
            },
        })
    }

    async fn probe_until_ready(
        &self,
        probe: &dyn ReadinessProbe,
        policy: &RetryPolicy,
        cancel: &CancellationToken,
        state: &mut RetryState,
        last: &mut Option<ProbeError>,
    ) -> Result<(), Failure> {
        let deadline = state.started() + policy.deadline();

        loop {
            if cancel.is_cancelled() {
                return Err(Failure::Cancelled);
            }

            let attempt = state.record_attempt();
            let outcome = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(Failure::Cancelled),
                outcome = tokio::time::timeout_at(deadline, probe.check()) => outcome,
            };

            match outcome {
                Ok(Ok(())) => return Ok(()),
                Ok(Err(e)) => {
                    tracing::debug!(attempt, "Not ready yet: {}", e);
                    *last = Some(e);
                }
                Err(_) => {
                    tracing::debug!(attempt, "Probe still running at the deadline");
                    *last = Some(ProbeError::msg("probe did not finish before the deadline"));
                    return Err(Failure::TimedOut);
                }
            }

            if policy.attempts_exhausted(attempt) {
                return Err(Failure::TimedOut);
            }

            let now = Instant::now();
            if now >= deadline {
                return Err(Failure::TimedOut);
            }
            let wake = (now + policy.delay_for(attempt)).min(deadline);

            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(Failure::Cancelled),
                _ = tokio::time::sleep_until(wake) => {}
            }

            if Instant::now() >= deadline {
                return Err(Failure::TimedOut);
            }
        }
    }

    async fn abandon(&self, handle: &ContainerHandle) -> Option<CleanupError> {
        match self.runtime.stop(handle).await {
            Ok(()) => {
                tracing::info!("Removed container that never became ready: {}", handle);
                None
            }
            Err(source) => {
                tracing::warn!(
                    "Failed to remove {}; it remains until expiry: {}",
                    handle,
                    source
                );
                Some(CleanupError {
                    id: handle.id().to_string(),
                    source,
                })
            }
        }
    }
}

fn transition(service: &str, state: LaunchState) {
    tracing::debug!(service, ?state, "launch state");
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::error::ProvisionOutcome;
    use crate::launch::ImageRef;
    use crate::testing::{FakeRuntime, RuntimeCall, ScriptedProbe};

    fn spec() -> LaunchSpec {
        LaunchSpec::builder("redis", ImageRef::new("redis", "6.0.9-alpine"))
            .bind_port(6379, 50001)
            .ttl(Duration::from_secs(90))
            .build()
            .unwrap()
    }

    fn policy(attempts: u32) -> RetryPolicy {
        RetryPolicy::fixed(Duration::from_millis(100), Duration::from_secs(10))
            .with_max_attempts(attempts)
    }

    #[tokio::test(start_paused = true)]
    async fn test_ready_after_retries() {
        let runtime = Arc::new(FakeRuntime::new());
        let launcher = Launcher::new(runtime.clone());
        let probe = ScriptedProbe::failing_times(2);

        let res = launcher
            .provision(
                ProvisionRequest::bare(spec()),
                &probe,
                &policy(3),
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(probe.calls(), 3);
        assert_eq!(runtime.stop_count(res.id()), 0);
        assert_eq!(res.endpoint().primary_port(), 50001);
        res.close().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_calls_are_ordered() {
        let runtime = Arc::new(FakeRuntime::new());
        let launcher = Launcher::new(runtime.clone());

        let err = launcher
            .provision(
                ProvisionRequest::bare(spec()),
                &ScriptedProbe::always_failing(),
                &policy(2),
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();

        let id = match &err {
            ProvisionError::ReadinessTimeout { id, attempts, .. } => {
                assert_eq!(*attempts, 2);
                id.clone()
            }
            other => panic!("expected timeout, got {other:?}"),
        };
        assert_eq!(
            runtime.calls(),
            vec![
                RuntimeCall::Start { id: id.clone() },
                RuntimeCall::SetTtl {
                    id: id.clone(),
                    ttl: Duration::from_secs(90)
                },
                RuntimeCall::Stop { id },
            ]
        );
        assert_eq!(err.outcome(), ProvisionOutcome::CreatedAndRemoved);
        assert!(err.last_probe_error().is_some());
    }

    #[tokio::test]
    async fn test_start_failure_needs_no_cleanup() {
        let runtime = Arc::new(FakeRuntime::new());
        runtime.fail_start(true);
        let launcher = Launcher::new(runtime.clone());

        let err = launcher
            .provision(
                ProvisionRequest::bare(spec()),
                &ScriptedProbe::succeeding(),
                &policy(3),
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();

        assert!(matches!(err, ProvisionError::Start { .. }));
        assert_eq!(err.outcome(), ProvisionOutcome::NothingCreated);
        assert!(runtime.calls().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_ttl_failure_is_not_fatal() {
        let runtime = Arc::new(FakeRuntime::new());
        runtime.fail_ttl(true);
        let launcher = Launcher::new(runtime.clone());

        let res = launcher
            .provision(
                ProvisionRequest::bare(spec()),
                &ScriptedProbe::succeeding(),
                &policy(1),
                &CancellationToken::new(),
            )
            .await
            .unwrap();
        res.close().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_cleanup_failure_reported_with_timeout() {
        let runtime = Arc::new(FakeRuntime::new());
        runtime.fail_stop(true);
        let launcher = Launcher::new(runtime.clone());

        let err = launcher
            .provision(
                ProvisionRequest::bare(spec()),
                &ScriptedProbe::always_failing(),
                &policy(2),
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();

        assert!(err.is_timeout());
        assert!(err.cleanup_error().is_some());
        assert_eq!(err.outcome(), ProvisionOutcome::CreatedRemovalFailed);
        assert_eq!(runtime.total_stops(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_cleans_up() {
        let runtime = Arc::new(FakeRuntime::new());
        let launcher = Launcher::new(runtime.clone());
        let cancel = CancellationToken::new();

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(250)).await;
            trigger.cancel();
        });

        let err = launcher
            .provision(
                ProvisionRequest::bare(spec()),
                &ScriptedProbe::always_failing(),
                &RetryPolicy::fixed(Duration::from_millis(100), Duration::from_secs(30)),
                &cancel,
            )
            .await
            .unwrap_err();

        assert!(matches!(err, ProvisionError::Cancelled { .. }));
        assert_eq!(err.outcome(), ProvisionOutcome::CreatedAndRemoved);
        assert_eq!(runtime.total_stops(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_lands_inside_retry_window() {
        for policy in [
            policy(4),
            RetryPolicy::fixed(Duration::from_millis(100), Duration::from_secs(1)),
            RetryPolicy::exponential(Duration::from_millis(50), Duration::from_secs(3)),
        ] {
            let runtime = Arc::new(FakeRuntime::new());
            let launcher = Launcher::new(runtime.clone());

            let started = Instant::now();
            let err = launcher
                .provision(
                    ProvisionRequest::bare(spec()),
                    &ScriptedProbe::always_failing(),
                    &policy,
                    &CancellationToken::new(),
                )
                .await
                .unwrap_err();
            let elapsed = started.elapsed();

            assert!(err.is_timeout());
            assert!(elapsed >= policy.minimum_window(), "{policy:?}: {elapsed:?}");
            assert!(elapsed <= policy.deadline(), "{policy:?}: {elapsed:?}");
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_hung_probe_bounded_by_deadline() {
        let runtime = Arc::new(FakeRuntime::new());
        let launcher = Launcher::new(runtime.clone());
        let probe = ScriptedProbe::always_failing().with_latency(Duration::from_secs(3600));
        let policy = RetryPolicy::fixed(Duration::from_millis(100), Duration::from_secs(2));

        let started = Instant::now();
        let err = launcher
            .provision(
                ProvisionRequest::bare(spec()),
                &probe,
                &policy,
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();

        assert!(err.is_timeout());
        assert!(started.elapsed() <= Duration::from_secs(2) + Duration::from_millis(10));
        assert_eq!(runtime.total_stops(), 1);
    }
}
