//! Memoized dispatch of shell tasks over a channel
//!
//! For every invocation the dispatcher derives a cache key, claims it in the
//! memo cache and either runs the command (owner) or waits for the outcome of
//! whoever owns it (waiter). Invocations that opt out of memoization always run.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use conduit_channels::{Channel, EnvOverlay, ExecutionResult};
use conduit_core::Config;
use tokio::sync::Semaphore;
use tracing::{debug, error};

use crate::error::{FailureKind, HashError, TaskFailure};
use crate::key::CacheKey;
use crate::memo::{Claim, MemoCache, Outcome};
use crate::registry::HashRegistry;
use crate::reporter::{TaskEvent, TaskReporter};
use crate::task::{Invocation, TaskRecord, TaskState};

/// Options for the dispatcher
#[derive(Debug, Clone)]
pub struct DispatchOptions {
    /// Walltime for invocations that do not set their own
    pub walltime: Duration,
    /// Overlay applied before each invocation's own environment
    pub env: EnvOverlay,
    /// Whether memoization is enabled at all
    pub memoize: bool,
    /// Maximum commands running at once
    pub concurrency: usize,
}

impl DispatchOptions {
    /// Build options from loaded configuration
    pub fn from_config(config: &Config) -> Self {
        Self {
            walltime: Duration::from_secs(config.channel.walltime),
            env: EnvOverlay::new(),
            memoize: config.memo.enabled,
            concurrency: config.dispatch.concurrency.max(1),
        }
    }
}

impl Default for DispatchOptions {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

/// Runs invocations with at most one execution per cache key
pub struct Dispatcher {
    channel: Arc<dyn Channel>,
    registry: Arc<HashRegistry>,
    cache: MemoCache<ExecutionResult>,
    options: DispatchOptions,
    semaphore: Semaphore,
    reporter: Arc<dyn TaskReporter>,
    next_id: AtomicU64,
}

impl Dispatcher {
    /// Create a dispatcher using the process-wide hash registry
    pub fn new(
        channel: Arc<dyn Channel>,
        options: DispatchOptions,
        reporter: Arc<dyn TaskReporter>,
    ) -> Self {
        let semaphore = Semaphore::new(options.concurrency.max(1));
        Self {
            channel,
            registry: HashRegistry::global(),
            cache: MemoCache::new(),
            options,
            semaphore,
            reporter,
            next_id: AtomicU64::new(1),
        }
    }

    /// Use a specific hash registry instead of the global one
    pub fn with_registry(mut self, registry: Arc<HashRegistry>) -> Self {
        self.registry = registry;
        self
    }

    pub fn channel(&self) -> &Arc<dyn Channel> {
        &self.channel
    }

    pub fn cache(&self) -> &MemoCache<ExecutionResult> {
        &self.cache
    }

    pub fn options(&self) -> &DispatchOptions {
        &self.options
    }

    /// Cache key for an invocation
    pub fn derive_key(&self, invocation: &Invocation) -> Result<CacheKey, HashError> {
        CacheKey::derive(
            &self.registry,
            &invocation.task,
            &invocation.args,
            &invocation.kwargs,
        )
    }

    /// Forget every memoized outcome
    pub fn clear(&self) {
        self.cache.clear();
    }

    /// Run one invocation, or wait for the identical invocation already running
    pub async fn submit(&self, invocation: &Invocation) -> TaskRecord {
        let start = Instant::now();
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let memoize = invocation.memoize && self.options.memoize;
        let mut record = TaskRecord::new(id, invocation.task.clone(), memoize);

        if !memoize {
            self.report_submitted(&record);
            let outcome = self.execute(&mut record, invocation).await;
            self.finish(&mut record, outcome, false, start);
            return record;
        }

        // An argument without a stable identity fails the invocation up front
        let key = match self.derive_key(invocation) {
            Ok(key) => key,
            Err(err) => {
                error!(id, task = %invocation.task, error = %err, "cannot derive cache key");
                self.report_submitted(&record);
                self.finish(&mut record, Err(err.into()), false, start);
                return record;
            }
        };
        record.hashsum = Some(key);
        self.report_submitted(&record);

        match self.cache.get_or_create(key) {
            Claim::Owner(ticket) => {
                let outcome = self.execute(&mut record, invocation).await;
                ticket.complete(outcome.clone());
                self.finish(&mut record, outcome, false, start);
            }
            Claim::Waiter(slot) => {
                debug!(id, key = %key.short(), "waiting on memoized outcome");
                self.reporter.report(&TaskEvent::Memoized {
                    id,
                    task: record.task.clone(),
                    key,
                });
                let outcome = slot.wait().await;
                self.finish(&mut record, outcome, true, start);
            }
        }

        record
    }

    /// Submit every invocation concurrently and return records in input order
    pub async fn submit_all(self: &Arc<Self>, invocations: Vec<Invocation>) -> Vec<TaskRecord> {
        let start = Instant::now();
        let mut handles = Vec::with_capacity(invocations.len());

        for invocation in invocations {
            let dispatcher = Arc::clone(self);
            let task = invocation.task.clone();
            let handle = tokio::spawn(async move { dispatcher.submit(&invocation).await });
            handles.push((task, handle));
        }

        let mut records = Vec::with_capacity(handles.len());
        for (task, handle) in handles {
            match handle.await {
                Ok(record) => records.push(record),
                Err(e) => {
                    let id = self.next_id.fetch_add(1, Ordering::SeqCst);
                    let mut record = TaskRecord::new(id, task, false);
                    record.finish(
                        Err(TaskFailure::new(
                            FailureKind::Channel,
                            format!("Task panicked: {}", e),
                        )),
                        false,
                    );
                    records.push(record);
                }
            }
        }

        let succeeded = records.iter().filter(|r| r.is_success()).count();
        let cached = records
            .iter()
            .filter(|r| r.status == TaskState::Memoized)
            .count();
        self.reporter.report(&TaskEvent::AllCompleted {
            total: records.len(),
            succeeded,
            failed: records.len() - succeeded,
            cached,
            duration: start.elapsed(),
        });

        records
    }

    async fn execute(
        &self,
        record: &mut TaskRecord,
        invocation: &Invocation,
    ) -> Outcome<ExecutionResult> {
        let command = invocation.render()?;
        let _permit = self
            .semaphore
            .acquire()
            .await
            .map_err(|_| TaskFailure::new(FailureKind::Channel, "dispatcher is shut down"))?;

        record.status = TaskState::Launched;
        self.reporter.report(&TaskEvent::Started {
            id: record.id,
            task: record.task.clone(),
            command: command.clone(),
        });

        let mut env = self.options.env.clone();
        env.extend(invocation.env.iter().map(|(k, v)| (k.clone(), v.clone())));
        let walltime = invocation.walltime.unwrap_or(self.options.walltime);

        match self.channel.execute_wait(&command, walltime, &env).await {
            Ok(result) if result.success() => Ok(result),
            Ok(result) => Err(TaskFailure::from_exit(&result)),
            Err(err) => Err(TaskFailure::from_channel(&err)),
        }
    }

    fn report_submitted(&self, record: &TaskRecord) {
        self.reporter.report(&TaskEvent::Submitted {
            id: record.id,
            task: record.task.clone(),
            key: record.hashsum,
        });
    }

    fn finish(
        &self,
        record: &mut TaskRecord,
        outcome: Outcome<ExecutionResult>,
        cached: bool,
        start: Instant,
    ) {
        let duration = start.elapsed();
        let event = match &outcome {
            Ok(_) => TaskEvent::Completed {
                id: record.id,
                task: record.task.clone(),
                duration,
                cached,
            },
            Err(failure) => TaskEvent::Failed {
                id: record.id,
                task: record.task.clone(),
                duration,
                error: failure.to_string(),
            },
        };
        self.reporter.report(&event);
        record.finish(outcome, cached);
    }
}
