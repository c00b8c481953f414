//! Lifecycle coordination
//!
//! [`Coordinator::run`] owns the serve tasks of both servers and the
//! multiplexer accept loop. The first of "shutdown requested" or "a task
//! ended" starts the one teardown sequence:
//!
//! 1. gRPC graceful stop
//! 2. debug HTTP graceful stop
//! 3. tracer close
//!
//! Each step runs even when an earlier one failed; step failures are logged
//! and counted, never returned. The multiplexer is stopped last and every task
//! is joined before `run` returns the first task failure, if any.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::{Id, JoinError, JoinSet};
use tokio_util::sync::CancellationToken;

use crate::error::{BootstrapError, BootstrapResult};
use crate::metrics;
use crate::mux::{Mux, MuxListener};
use crate::server::Serve;

/// How long stragglers get to exit once teardown has finished
pub const DEFAULT_JOIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Coarse runtime state, only ever moves forward
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Phase {
    Initialized,
    Serving,
    ShuttingDown,
    Stopped,
}

/// Resource released during the final teardown step
pub trait Closer: Send + Sync {
    fn close(&self) -> BootstrapResult<()>;
}

type Supervised = Pin<Box<dyn Future<Output = BootstrapResult<()>> + Send + 'static>>;

/// Runs the servers and the multiplexer as one first-failure-wins group
pub struct Coordinator {
    grpc: Arc<dyn Serve>,
    debug: Arc<dyn Serve>,
    closer: Arc<dyn Closer>,
    supervised: Vec<(&'static str, Supervised)>,
    join_timeout: Duration,
    phase: watch::Sender<Phase>,
}

impl Coordinator {
    pub fn new(grpc: Arc<dyn Serve>, debug: Arc<dyn Serve>, closer: Arc<dyn Closer>) -> Self {
        let (phase, _) = watch::channel(Phase::Initialized);
        Self {
            grpc,
            debug,
            closer,
            supervised: Vec::new(),
            join_timeout: DEFAULT_JOIN_TIMEOUT,
            phase,
        }
    }

    pub fn with_join_timeout(mut self, timeout: Duration) -> Self {
        self.join_timeout = timeout;
        self
    }

    /// Run an auxiliary task in the group. Its failure, or its return while
    /// serving, starts shutdown like a server failure would.
    pub fn supervise<F>(&mut self, name: &'static str, task: F)
    where
        F: Future<Output = BootstrapResult<()>> + Send + 'static,
    {
        self.supervised.push((name, Box::pin(task)));
    }

    pub fn phase(&self) -> Phase {
        *self.phase.borrow()
    }

    /// Watch phase changes; subscribe before calling [`Coordinator::run`]
    pub fn subscribe(&self) -> watch::Receiver<Phase> {
        self.phase.subscribe()
    }

    /// Serve until `shutdown` fires or a task ends, then tear down.
    ///
    /// `shutdown` is cancelled once teardown begins so anything else
    /// watching it stops too.
    pub async fn run(
        self,
        mux: Mux,
        grpc_listener: MuxListener,
        debug_listener: MuxListener,
        shutdown: CancellationToken,
    ) -> BootstrapResult<()> {
        let Coordinator {
            grpc,
            debug,
            closer,
            supervised,
            join_timeout,
            phase,
        } = self;

        let mux_stop = CancellationToken::new();
        let mut tasks = JoinSet::new();
        let mut names: HashMap<Id, &'static str> = HashMap::new();

        let server = grpc.clone();
        let handle = tasks.spawn(async move { server.serve(grpc_listener).await });
        names.insert(handle.id(), grpc.name());

        let server = debug.clone();
        let handle = tasks.spawn(async move { server.serve(debug_listener).await });
        names.insert(handle.id(), debug.name());

        let handle = tasks.spawn(mux.serve(mux_stop.clone()));
        names.insert(handle.id(), "mux");

        for (name, task) in supervised {
            let stop = mux_stop.clone();
            let handle = tasks.spawn(async move {
                tokio::select! {
                    _ = stop.cancelled() => Ok(()),
                    result = task => result,
                }
            });
            names.insert(handle.id(), name);
        }

        advance(&phase, Phase::Serving);

        let mut first_error = None;
        tokio::select! {
            _ = shutdown.cancelled() => {
                tracing::info!("Shutdown requested");
            }
            Some(joined) = tasks.join_next_with_id() => {
                let err = serving_exit(&names, joined);
                tracing::error!(error = %err, "Task ended while serving, shutting down");
                first_error = Some(err);
            }
        }

        advance(&phase, Phase::ShuttingDown);
        shutdown.cancel();

        step("grpc_stop", grpc.graceful_stop().await);
        step("debug_stop", debug.graceful_stop().await);
        step("tracer_close", closer.close());

        mux_stop.cancel();

        let joined = tokio::time::timeout(join_timeout, async {
            while let Some(joined) = tasks.join_next_with_id().await {
                if let Some(err) = draining_exit(&names, joined) {
                    tracing::warn!(error = %err, "Task failed during shutdown");
                    first_error.get_or_insert(err);
                }
            }
        })
        .await;

        if joined.is_err() {
            tracing::warn!(
                remaining = tasks.len(),
                timeout_ms = join_timeout.as_millis() as u64,
                "Tasks still running after teardown, aborting"
            );
            tasks.shutdown().await;
        }

        advance(&phase, Phase::Stopped);

        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

fn advance(phase: &watch::Sender<Phase>, next: Phase) {
    let previous = phase.send_replace(next);
    tracing::info!(from = ?previous, to = ?next, "Lifecycle phase changed");
}

fn step(name: &'static str, result: BootstrapResult<()>) {
    match result {
        Ok(()) => tracing::debug!(step = name, "Shutdown step completed"),
        Err(e) => {
            tracing::error!(step = name, error = %e, "Shutdown step failed");
            metrics::record_shutdown_step_failure(name);
        }
    }
}

fn task_name(names: &HashMap<Id, &'static str>, id: Id) -> &'static str {
    names.get(&id).copied().unwrap_or("unknown")
}

/// Any task ending while serving is a failure, even with `Ok`
fn serving_exit(
    names: &HashMap<Id, &'static str>,
    joined: Result<(Id, BootstrapResult<()>), JoinError>,
) -> BootstrapError {
    match joined {
        Ok((id, Ok(()))) => BootstrapError::UnexpectedExit {
            server: task_name(names, id),
        },
        Ok((_, Err(e))) => e,
        Err(e) => join_failure(names, e),
    }
}

/// During teardown only real failures count
fn draining_exit(
    names: &HashMap<Id, &'static str>,
    joined: Result<(Id, BootstrapResult<()>), JoinError>,
) -> Option<BootstrapError> {
    match joined {
        Ok((id, Ok(()))) => {
            tracing::debug!(task = task_name(names, id), "Task stopped");
            None
        }
        Ok((_, Err(e))) => Some(e),
        Err(e) if e.is_cancelled() => None,
        Err(e) => Some(join_failure(names, e)),
    }
}

fn join_failure(names: &HashMap<Id, &'static str>, err: JoinError) -> BootstrapError {
    BootstrapError::Join {
        task: task_name(names, err.id()),
        message: err.to_string(),
    }
}
