//! In-process broker.
//!
//! Mirrors the Redis layout (ready list, per-consumer in-flight lists,
//! delayed set, heartbeats, markers) inside one process. Time comes from
//! `tokio::time`, so tests running with a paused clock see delays and TTLs
//! elapse deterministically. [`MemoryBroker::set_available`] simulates an
//! outage and [`MemoryBroker::fail_next`] a single failed call.

use crate::broker::Broker;
use crate::error::{JobError, JobResult};
use crate::job::{JobId, JobRecord};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;

#[derive(Default)]
struct QueueState {
    ready: VecDeque<JobId>,
    in_flight: HashMap<String, Vec<JobId>>,
    delayed: Vec<(Instant, JobId)>,
    consumers: HashSet<String>,
}

#[derive(Default)]
struct State {
    records: HashMap<JobId, (JobRecord, Option<Instant>)>,
    queues: HashMap<String, QueueState>,
    heartbeats: HashMap<String, Instant>,
    markers: HashMap<String, Instant>,
}

impl State {
    fn queue(&mut self, name: &str) -> &mut QueueState {
        self.queues.entry(name.to_string()).or_default()
    }
}

/// Broker keeping everything in memory.
pub struct MemoryBroker {
    state: Mutex<State>,
    ready: Notify,
    available: AtomicBool,
    faults: Mutex<HashMap<&'static str, usize>>,
}

impl Default for MemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBroker {
    /// Creates an empty, reachable broker.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State::default()),
            ready: Notify::new(),
            available: AtomicBool::new(true),
            faults: Mutex::new(HashMap::new()),
        }
    }

    /// Switches simulated reachability.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Number of ids waiting in the ready list.
    pub fn ready_len(&self, queue: &str) -> usize {
        self.state.lock().queue(queue).ready.len()
    }

    /// Number of ids in the delayed set.
    pub fn delayed_len(&self, queue: &str) -> usize {
        self.state.lock().queue(queue).delayed.len()
    }

    /// Number of stored records, expired ones included.
    pub fn records_len(&self) -> usize {
        self.state.lock().records.len()
    }

    /// Number of ids held by one consumer.
    pub fn in_flight_len(&self, queue: &str, consumer: &str) -> usize {
        self.state
            .lock()
            .queue(queue)
            .in_flight
            .get(consumer)
            .map_or(0, Vec::len)
    }

    /// Makes the next `times` calls of one broker operation, named as the
    /// trait method (`"load"`, `"retry_later"`...), fail as unreachable.
    pub fn fail_next(&self, operation: &'static str, times: usize) {
        *self.faults.lock().entry(operation).or_default() += times;
    }

    fn check(&self, operation: &'static str) -> JobResult<()> {
        if !self.available.load(Ordering::SeqCst) {
            return Err(JobError::QueueUnavailable(
                "memory broker is offline".to_string(),
            ));
        }

        let mut faults = self.faults.lock();
        match faults.get_mut(operation) {
            Some(remaining) if *remaining > 0 => {
                *remaining -= 1;
                Err(JobError::QueueUnavailable(format!(
                    "memory broker dropped {operation}"
                )))
            }
            _ => Ok(()),
        }
    }

    fn try_reserve(&self, queue: &str, consumer: &str) -> Option<JobId> {
        let mut state = self.state.lock();
        let queue = state.queue(queue);
        let id = queue.ready.pop_front()?;
        queue
            .in_flight
            .entry(consumer.to_string())
            .or_default()
            .push(id.clone());
        Some(id)
    }
}


fn store(state: &mut State, record: &JobRecord, ttl: Option<Duration>) {
    let expires_at = ttl.map(|ttl| Instant::now() + ttl);
    state
        .records
        .insert(record.id.clone(), (record.clone(), expires_at));
}

fn remove_in_flight(queue: &mut QueueState, consumer: &str, id: &JobId) -> bool {
    let Some(held) = queue.in_flight.get_mut(consumer) else {
        return false;
    };
    let before = held.len();
    held.retain(|held_id| held_id != id);
    held.len() != before
}

#[async_trait]
impl Broker for MemoryBroker {
    async fn ping(&self) -> JobResult<()> {
        self.check("ping")
    }

    async fn save(&self, record: &JobRecord, ttl: Option<Duration>) -> JobResult<()> {
        self.check("save")?;
        store(&mut self.state.lock(), record, ttl);
        Ok(())
    }

    async fn load(&self, id: &JobId) -> JobResult<Option<JobRecord>> {
        self.check("load")?;
        let mut state = self.state.lock();
        let expired = match state.records.get(id) {
            None => return Ok(None),
            Some((_, Some(expires_at))) => *expires_at <= Instant::now(),
            Some((_, None)) => false,
        };
        if expired {
            state.records.remove(id);
            return Ok(None);
        }
        Ok(state.records.get(id).map(|(record, _)| record.clone()))
    }

    async fn enqueue(&self, queue: &str, record: &JobRecord) -> JobResult<()> {
        self.check("enqueue")?;
        let mut state = self.state.lock();
        store(&mut state, record, None);
        state.queue(queue).ready.push_back(record.id.clone());
        drop(state);
        self.ready.notify_waiters();
        Ok(())
    }

    async fn due(&self, queue: &str, limit: usize) -> JobResult<Vec<JobId>> {
        self.check("due")?;
        let now = Instant::now();
        let mut state = self.state.lock();
        let queue = state.queue(queue);

        queue.delayed.sort_by_key(|(due, _)| *due);
        Ok(queue
            .delayed
            .iter()
            .take(limit)
            .take_while(|(due, _)| *due <= now)
            .map(|(_, id)| id.clone())
            .collect())
    }

    async fn promote(&self, queue: &str, record: &JobRecord) -> JobResult<bool> {
        self.check("promote")?;
        let mut state = self.state.lock();
        let delayed = &mut state.queue(queue).delayed;
        let Some(position) = delayed.iter().position(|(_, id)| *id == record.id) else {
            return Ok(false);
        };
        delayed.remove(position);

        store(&mut state, record, None);
        state.queue(queue).ready.push_back(record.id.clone());
        drop(state);
        self.ready.notify_waiters();
        Ok(true)
    }

    async fn unschedule(&self, queue: &str, id: &JobId) -> JobResult<()> {
        self.check("unschedule")?;
        self.state
            .lock()
            .queue(queue)
            .delayed
            .retain(|(_, delayed_id)| delayed_id != id);
        Ok(())
    }

    async fn reserve(
        &self,
        queue: &str,
        consumer: &str,
        wait: Duration,
    ) -> JobResult<Option<JobId>> {
        let deadline = Instant::now() + wait;
        loop {
            self.check("reserve")?;

            let notified = self.ready.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(id) = self.try_reserve(queue, consumer) {
                return Ok(Some(id));
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return Ok(None);
            }
        }
    }

    async fn ack(&self, queue: &str, consumer: &str, id: &JobId) -> JobResult<()> {
        self.check("ack")?;
        remove_in_flight(self.state.lock().queue(queue), consumer, id);
        Ok(())
    }

    async fn settle(
        &self,
        queue: &str,
        consumer: &str,
        record: &JobRecord,
        ttl: Option<Duration>,
    ) -> JobResult<()> {
        self.check("settle")?;
        let mut state = self.state.lock();
        store(&mut state, record, ttl);
        remove_in_flight(state.queue(queue), consumer, &record.id);
        Ok(())
    }

    async fn retry_later(
        &self,
        queue: &str,
        consumer: &str,
        record: &JobRecord,
        delay: Duration,
    ) -> JobResult<()> {
        self.check("retry_later")?;
        let due = Instant::now() + delay;
        let mut state = self.state.lock();
        store(&mut state, record, None);

        let queue = state.queue(queue);
        queue.delayed.retain(|(_, id)| *id != record.id);
        queue.delayed.push((due, record.id.clone()));
        remove_in_flight(queue, consumer, &record.id);
        Ok(())
    }

    async fn release(&self, queue: &str, consumer: &str, id: &JobId) -> JobResult<()> {
        self.check("release")?;
        let mut state = self.state.lock();
        let queue = state.queue(queue);
        if remove_in_flight(queue, consumer, id) {
            queue.ready.push_front(id.clone());
        }
        drop(state);
        self.ready.notify_waiters();
        Ok(())
    }

    async fn heartbeat(&self, queue: &str, consumer: &str, ttl: Duration) -> JobResult<()> {
        self.check("heartbeat")?;
        let mut state = self.state.lock();
        state.queue(queue).consumers.insert(consumer.to_string());
        state
            .heartbeats
            .insert(consumer.to_string(), Instant::now() + ttl);
        Ok(())
    }

    async fn requeue_orphans(&self, queue: &str) -> JobResult<usize> {
        self.check("requeue_orphans")?;
        let now = Instant::now();
        let mut guard = self.state.lock();
        let state = &mut *guard;

        let live: HashSet<String> = state
            .heartbeats
            .iter()
            .filter(|(_, expires_at)| **expires_at > now)
            .map(|(consumer, _)| consumer.clone())
            .collect();

        let queue = state.queues.entry(queue.to_string()).or_default();
        let dead: Vec<String> = queue
            .consumers
            .iter()
            .filter(|consumer| !live.contains(*consumer))
            .cloned()
            .collect();

        let mut moved = 0;
        for consumer in dead {
            queue.consumers.remove(&consumer);
            if let Some(held) = queue.in_flight.remove(&consumer) {
                moved += held.len();
                queue.ready.extend(held);
            }
        }
        drop(guard);

        if moved > 0 {
            self.ready.notify_waiters();
        }
        Ok(moved)
    }

    async fn deregister(&self, queue: &str, consumer: &str) -> JobResult<()> {
        self.check("deregister")?;
        let mut state = self.state.lock();
        state.heartbeats.remove(consumer);
        let queue = state.queue(queue);
        queue.consumers.remove(consumer);
        if let Some(held) = queue.in_flight.remove(consumer) {
            queue.ready.extend(held);
        }
        drop(state);
        self.ready.notify_waiters();
        Ok(())
    }

    async fn set_marker(&self, key: &str, ttl: Duration) -> JobResult<bool> {
        self.check("set_marker")?;
        let now = Instant::now();
        let mut state = self.state.lock();
        match state.markers.get(key) {
            Some(expires_at) if *expires_at > now => Ok(false),
            _ => {
                state.markers.insert(key.to_string(), now + ttl);
                Ok(true)
            }
        }
    }

    async fn has_marker(&self, key: &str) -> JobResult<bool> {
        self.check("has_marker")?;
        let now = Instant::now();
        Ok(self
            .state
            .lock()
            .markers
            .get(key)
            .is_some_and(|expires_at| *expires_at > now))
    }
}
