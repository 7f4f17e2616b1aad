//! In-process memoization cache
//!
//! Each key moves through `Absent -> Pending -> Done` exactly once. The first
//! caller to claim a key becomes its owner and must run the task; everyone
//! else waits on the shared slot and receives the owner's outcome verbatim,
//! failures included.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::watch;
use tracing::{debug, warn};

use crate::error::TaskFailure;
use crate::key::CacheKey;

/// Recorded result of one execution
pub type Outcome<T> = Result<T, TaskFailure>;

/// Shared state for one key
pub struct Slot<T> {
    key: CacheKey,
    state: watch::Sender<Option<Outcome<T>>>,
}

impl<T: Clone> Slot<T> {
    fn new(key: CacheKey) -> Self {
        let (state, _) = watch::channel(None);
        Self { key, state }
    }

    pub fn key(&self) -> &CacheKey {
        &self.key
    }

    /// Whether the owner has recorded an outcome
    pub fn is_done(&self) -> bool {
        self.state.borrow().is_some()
    }

    /// The outcome, if already recorded
    pub fn peek(&self) -> Option<Outcome<T>> {
        self.state.borrow().clone()
    }

    /// Wait until the owner completes the slot, then return its outcome
    pub async fn wait(&self) -> Outcome<T> {
        let mut rx = self.state.subscribe();
        let outcome = rx
            .wait_for(Option::is_some)
            .await
            .map(|state| (*state).clone());

        match outcome {
            Ok(Some(outcome)) => outcome,
            // The sender lives in this slot, so this only guards against misuse
            _ => Err(TaskFailure::abandoned(&self.key)),
        }
    }

    /// Record the outcome; returns false if one was already recorded
    fn finish(&self, outcome: Outcome<T>) -> bool {
        self.state.send_if_modified(|state| {
            if state.is_some() {
                return false;
            }
            *state = Some(outcome);
            true
        })
    }
}

impl<T> fmt::Debug for Slot<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Slot")
            .field("key", &self.key)
            .field("done", &self.state.borrow().is_some())
            .finish()
    }
}

/// Proof of ownership of a pending key.
///
/// Completing consumes the ticket, so only the owner can complete a slot and it
/// can do so once. A ticket dropped without completing records an
/// [`Abandoned`](crate::error::FailureKind::Abandoned) failure so waiters never
/// hang.
pub struct OwnerTicket<T: Clone> {
    slot: Arc<Slot<T>>,
    completed: bool,
}

impl<T: Clone> OwnerTicket<T> {
    pub fn key(&self) -> &CacheKey {
        self.slot.key()
    }

    /// The slot this ticket owns
    pub fn slot(&self) -> &Arc<Slot<T>> {
        &self.slot
    }

    /// Transition the slot from Pending to Done
    pub fn complete(mut self, outcome: Outcome<T>) {
        self.completed = true;
        if !self.slot.finish(outcome) {
            panic!(
                "memo slot {} completed twice; only the owner may complete a slot",
                self.slot.key
            );
        }
        debug!(key = %self.slot.key.short(), "memo slot completed");
    }
}

impl<T: Clone> Drop for OwnerTicket<T> {
    fn drop(&mut self) {
        if self.completed {
            return;
        }
        warn!(key = %self.slot.key.short(), "memo owner dropped without an outcome");
        self.slot.finish(Err(TaskFailure::abandoned(&self.slot.key)));
    }
}

impl<T: Clone> fmt::Debug for OwnerTicket<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OwnerTicket")
            .field("key", &self.slot.key)
            .field("completed", &self.completed)
            .finish()
    }
}

/// Result of claiming a key
#[derive(Debug)]
pub enum Claim<T: Clone> {
    /// The caller created the entry and must run the task
    Owner(OwnerTicket<T>),
    /// The entry already existed (Pending or Done)
    Waiter(Arc<Slot<T>>),
}

impl<T: Clone> Claim<T> {
    pub fn is_owner(&self) -> bool {
        matches!(self, Self::Owner(_))
    }

    pub fn slot(&self) -> &Arc<Slot<T>> {
        match self {
            Self::Owner(ticket) => ticket.slot(),
            Self::Waiter(slot) => slot,
        }
    }
}

/// Key to outcome store with at most one execution per key
pub struct MemoCache<T: Clone> {
    entries: Mutex<HashMap<CacheKey, Arc<Slot<T>>>>,
}

impl<T: Clone> MemoCache<T> {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<CacheKey, Arc<Slot<T>>>> {
        // The map is only mutated while the guard is held
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Atomically look up `key`, creating a pending entry if it is absent
    pub fn get_or_create(&self, key: CacheKey) -> Claim<T> {
        match self.entries().entry(key) {
            Entry::Occupied(entry) => {
                debug!(key = %key.short(), "memo hit");
                Claim::Waiter(Arc::clone(entry.get()))
            }
            Entry::Vacant(entry) => {
                debug!(key = %key.short(), "memo miss");
                let slot = Arc::new(Slot::new(key));
                entry.insert(Arc::clone(&slot));
                Claim::Owner(OwnerTicket {
                    slot,
                    completed: false,
                })
            }
        }
    }

    /// Record the owner's outcome for its key
    pub fn complete(&self, ticket: OwnerTicket<T>, outcome: Outcome<T>) {
        ticket.complete(outcome);
    }

    /// Get the recorded outcome for a key, if it is Done
    pub fn lookup(&self, key: &CacheKey) -> Option<Outcome<T>> {
        let slot = self.entries().get(key).cloned()?;
        slot.peek()
    }

    pub fn contains(&self, key: &CacheKey) -> bool {
        self.entries().contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries().is_empty()
    }

    /// Drop every entry.
    ///
    /// Pending owners and waiters keep their slots; only new claims see the
    /// cleared map.
    pub fn clear(&self) {
        let mut entries = self.entries();
        debug!(count = entries.len(), "clearing memo cache");
        entries.clear();
    }
}

impl<T: Clone> Default for MemoCache<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone> fmt::Debug for MemoCache<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoCache")
            .field("entries", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FailureKind;
    use crate::registry::HashRegistry;
    use crate::task::TaskId;
    use crate::value::Value;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn key(n: i64) -> CacheKey {
        CacheKey::derive(
            &HashRegistry::new(),
            &TaskId::new("memo", "echo {0}"),
            &[Value::Int(n)],
            &[],
        )
        .unwrap()
    }

    #[test]
    fn test_first_claim_owns() {
        let cache: MemoCache<i32> = MemoCache::new();

        let first = cache.get_or_create(key(1));
        let second = cache.get_or_create(key(1));
        let other = cache.get_or_create(key(2));

        assert!(first.is_owner());
        assert!(!second.is_owner());
        assert!(other.is_owner());
        assert!(Arc::ptr_eq(first.slot(), second.slot()));
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn test_claim_after_done_is_waiter() {
        let cache: MemoCache<i32> = MemoCache::new();
        let Claim::Owner(ticket) = cache.get_or_create(key(1)) else {
            panic!("expected owner");
        };
        cache.complete(ticket, Ok(7));

        let claim = cache.get_or_create(key(1));
        assert!(!claim.is_owner());
        assert_eq!(claim.slot().peek(), Some(Ok(7)));
        assert_eq!(cache.lookup(&key(1)), Some(Ok(7)));
    }

    #[tokio::test]
    async fn test_waiter_receives_owner_outcome() {
        let cache: Arc<MemoCache<String>> = Arc::new(MemoCache::new());
        let Claim::Owner(ticket) = cache.get_or_create(key(1)) else {
            panic!("expected owner");
        };
        let waiter = cache.get_or_create(key(1));
        let slot = Arc::clone(waiter.slot());

        let handle = tokio::spawn(async move { slot.wait().await });
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!handle.is_finished());

        ticket.complete(Ok("done".to_string()));
        assert_eq!(handle.await.unwrap(), Ok("done".to_string()));
    }

    #[tokio::test]
    async fn test_failure_replayed_to_waiters() {
        let cache: MemoCache<i32> = MemoCache::new();
        let Claim::Owner(ticket) = cache.get_or_create(key(1)) else {
            panic!("expected owner");
        };
        let failure = TaskFailure::new(FailureKind::NonZeroExit, "exit 1");
        ticket.complete(Err(failure.clone()));

        for _ in 0..3 {
            let claim = cache.get_or_create(key(1));
            assert!(!claim.is_owner());
            assert_eq!(claim.slot().wait().await, Err(failure.clone()));
        }
    }

    #[tokio::test]
    async fn test_dropped_owner_releases_waiters() {
        let cache: MemoCache<i32> = MemoCache::new();
        let owner = cache.get_or_create(key(1));
        let waiter = cache.get_or_create(key(1));

        drop(owner);

        let outcome = waiter.slot().wait().await;
        assert_eq!(outcome.unwrap_err().kind, FailureKind::Abandoned);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_claims_run_once() {
        let cache: Arc<MemoCache<usize>> = Arc::new(MemoCache::new());
        let runs = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..16 {
            let cache = Arc::clone(&cache);
            let runs = Arc::clone(&runs);
            handles.push(tokio::spawn(async move {
                match cache.get_or_create(key(42)) {
                    Claim::Owner(ticket) => {
                        tokio::time::sleep(Duration::from_millis(20)).await;
                        let n = runs.fetch_add(1, Ordering::SeqCst) + 1;
                        ticket.complete(Ok(n));
                        Ok(n)
                    }
                    Claim::Waiter(slot) => slot.wait().await,
                }
            }));
        }

        for handle in handles {
            assert_eq!(handle.await.unwrap(), Ok(1));
        }
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[test]
    #[should_panic(expected = "completed twice")]
    fn test_double_complete_panics() {
        let cache: MemoCache<i32> = MemoCache::new();
        let Claim::Owner(ticket) = cache.get_or_create(key(1)) else {
            panic!("expected owner");
        };
        let slot = Arc::clone(ticket.slot());
        assert!(slot.finish(Ok(1)));
        ticket.complete(Ok(2));
    }

    #[test]
    fn test_clear() {
        let cache: MemoCache<i32> = MemoCache::new();
        if let Claim::Owner(ticket) = cache.get_or_create(key(1)) {
            ticket.complete(Ok(1));
        }
        assert!(cache.contains(&key(1)));

        cache.clear();
        assert!(cache.is_empty());
        assert!(cache.get_or_create(key(1)).is_owner());
    }
}
