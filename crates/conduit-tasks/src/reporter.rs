//! Task dispatch reporting

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use crate::key::CacheKey;
use crate::task::TaskId;

/// Events emitted while dispatching tasks
#[derive(Debug, Clone)]
pub enum TaskEvent {
    /// An invocation was accepted
    Submitted {
        id: u64,
        task: TaskId,
        key: Option<CacheKey>,
    },
    /// An invocation owns its key and is starting execution
    Started {
        id: u64,
        task: TaskId,
        command: String,
    },
    /// An invocation found its key already claimed and is waiting on it
    Memoized {
        id: u64,
        task: TaskId,
        key: CacheKey,
    },
    /// An invocation completed successfully
    Completed {
        id: u64,
        task: TaskId,
        duration: Duration,
        cached: bool,
    },
    /// An invocation failed
    Failed {
        id: u64,
        task: TaskId,
        duration: Duration,
        error: String,
    },
    /// A batch finished
    AllCompleted {
        total: usize,
        succeeded: usize,
        failed: usize,
        cached: usize,
        duration: Duration,
    },
}

/// Trait for reporting dispatch progress
pub trait TaskReporter: Send + Sync {
    /// Handle a task event
    fn report(&self, event: &TaskEvent);
}

/// Reporter that logs to tracing
#[derive(Debug, Default)]
pub struct TracingReporter;

impl TaskReporter for TracingReporter {
    fn report(&self, event: &TaskEvent) {
        match event {
            TaskEvent::Submitted { id, task, key } => match key {
                Some(key) => tracing::debug!(id, key = %key.short(), "Submitted {}", task),
                None => tracing::debug!(id, "Submitted {} (not memoized)", task),
            },
            TaskEvent::Started { id, task, command } => {
                tracing::info!(id, "Starting {}: {}", task, command);
            }
            TaskEvent::Memoized { id, task, key } => {
                tracing::info!(id, key = %key.short(), "{} memoized", task);
            }
            TaskEvent::Completed {
                id,
                task,
                duration,
                cached,
            } => {
                if *cached {
                    tracing::info!(id, "{} completed (cached) in {:.1}s", task, duration.as_secs_f64());
                } else {
                    tracing::info!(id, "{} completed in {:.1}s", task, duration.as_secs_f64());
                }
            }
            TaskEvent::Failed {
                id,
                task,
                duration,
                error,
            } => {
                tracing::error!(
                    id,
                    "{} failed after {:.1}s: {}",
                    task,
                    duration.as_secs_f64(),
                    error
                );
            }
            TaskEvent::AllCompleted {
                total,
                succeeded,
                failed,
                cached,
                duration,
            } => {
                tracing::info!(
                    "All tasks complete: {}/{} succeeded, {} failed, {} cached ({:.1}s)",
                    succeeded,
                    total,
                    failed,
                    cached,
                    duration.as_secs_f64()
                );
            }
        }
    }
}

/// Reporter that collects events for later inspection
#[derive(Debug, Default)]
pub struct CollectingReporter {
    events: Mutex<Vec<TaskEvent>>,
}

impl CollectingReporter {
    /// Get all collected events
    pub fn events(&self) -> Vec<TaskEvent> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Count events matching a predicate
    pub fn count(&self, predicate: impl Fn(&TaskEvent) -> bool) -> usize {
        self.events().iter().filter(|e| predicate(e)).count()
    }
}

impl TaskReporter for CollectingReporter {
    fn report(&self, event: &TaskEvent) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event.clone());
    }
}

/// Fan-out to several reporters
pub struct TaskReporterRegistry {
    reporters: Vec<Arc<dyn TaskReporter>>,
}

impl TaskReporterRegistry {
    pub fn new() -> Self {
        Self {
            reporters: vec![Arc::new(TracingReporter)],
        }
    }

    pub fn empty() -> Self {
        Self {
            reporters: Vec::new(),
        }
    }

    pub fn register(&mut self, reporter: Arc<dyn TaskReporter>) {
        self.reporters.push(reporter);
    }

    pub fn all(&self) -> &[Arc<dyn TaskReporter>] {
        &self.reporters
    }
}

impl TaskReporter for TaskReporterRegistry {
    fn report(&self, event: &TaskEvent) {
        for reporter in &self.reporters {
            reporter.report(event);
        }
    }
}

impl Default for TaskReporterRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collecting_reporter() {
        let reporter = CollectingReporter::default();
        let task = TaskId::new("build", "make");

        reporter.report(&TaskEvent::Started {
            id: 1,
            task: task.clone(),
            command: "make".to_string(),
        });
        reporter.report(&TaskEvent::Completed {
            id: 1,
            task,
            duration: Duration::from_secs(5),
            cached: false,
        });

        assert_eq!(reporter.events().len(), 2);
        assert_eq!(
            reporter.count(|e| matches!(e, TaskEvent::Completed { .. })),
            1
        );
    }

    #[test]
    fn test_tracing_reporter() {
        let reporter = TracingReporter;
        let task = TaskId::new("build", "make");

        // Just verify it doesn't panic
        reporter.report(&TaskEvent::Submitted {
            id: 1,
            task: task.clone(),
            key: None,
        });
        reporter.report(&TaskEvent::Failed {
            id: 1,
            task,
            duration: Duration::from_secs(1),
            error: "exit 1".to_string(),
        });
    }

    #[test]
    fn test_registry_fans_out() {
        let first = Arc::new(CollectingReporter::default());
        let second = Arc::new(CollectingReporter::default());
        let mut registry = TaskReporterRegistry::empty();
        assert!(registry.all().is_empty());

        registry.register(first.clone());
        registry.register(second.clone());
        registry.report(&TaskEvent::AllCompleted {
            total: 0,
            succeeded: 0,
            failed: 0,
            cached: 0,
            duration: Duration::ZERO,
        });

        assert_eq!(first.events().len(), 1);
        assert_eq!(second.events().len(), 1);
    }

    #[test]
    fn test_default_registry_traces() {
        assert_eq!(TaskReporterRegistry::default().all().len(), 1);
    }
}
