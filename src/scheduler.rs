//! The alarm engine.
//!
//! A [`Scheduler`] owns the trigger collection and a background poll thread.
//! Once a second the thread snapshots the collection, lets go of the lock,
//! and asks every trigger whether it fires at the current local time. Fired
//! triggers are handed to the registered [`NotificationSink`].
//!
//! Lock order is always collection, then trigger. No scheduler lock is held
//! while a sink runs.

use std::{
    collections::HashMap,
    sync::{
        mpsc::{self, Receiver, RecvTimeoutError, Sender},
        Arc, Mutex, MutexGuard, PoisonError, RwLock, Weak,
    },
    thread::{self, JoinHandle},
    time::Duration,
};

use chrono::NaiveDateTime;
use log::{debug, error, info, warn};

use crate::{
    sink::{self, NotificationSink},
    store::{LoadWarning, Store},
    trigger::{NewTrigger, Trigger, TriggerEdit, TriggerId},
};

/// Time between poll ticks. Alarms have minute resolution, so a fixed
/// second is plenty.
pub const TICK_INTERVAL: Duration = Duration::from_secs(1);

/// How long [`Scheduler::stop`] waits for the poll thread by default.
pub const DEFAULT_STOP_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SchedulerError {
    #[error("no trigger with id {0}")]
    NotFound(TriggerId),
}

pub type Result<T> = core::result::Result<T, SchedulerError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RunState {
    #[default]
    Stopped,
    Running,
    /// the poll thread is alive but skips evaluation
    Paused,
}

/// What [`Scheduler::load`] found.
#[derive(Debug, Default)]
pub struct LoadReport {
    pub loaded: usize,
    pub warnings: Vec<LoadWarning>,
}

type SharedTrigger = Arc<Mutex<Trigger>>;

/// Where the poll loop reads the time. Defaults to local wall clock time.
pub type Clock = dyn Fn() -> NaiveDateTime + Send + Sync;

fn local_now() -> NaiveDateTime {
    chrono::Local::now().naive_local()
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    // sinks run outside every lock, so a poisoned lock still holds
    // consistent data
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

struct Worker {
    handle: JoinHandle<()>,
    /// dropping this wakes the poll thread and tells it to exit
    stop_tx: Sender<()>,
    /// disconnects once the poll thread has returned
    done_rx: Receiver<()>,
}

struct Inner {
    triggers: Mutex<HashMap<TriggerId, SharedTrigger>>,
    state: Mutex<RunState>,
    sink: RwLock<Option<Arc<dyn NotificationSink>>>,
    clock: RwLock<Arc<Clock>>,
    store: Box<dyn Store>,
    /// held across every mutation and its save, and across `load`
    persist_lock: Mutex<()>,
    worker: Mutex<Option<Worker>>,
    stop_timeout: Duration,
}

/// Handle to a scheduler. Cloning is cheap and every clone drives the same
/// engine.
#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("state", &self.state())
            .field("triggers", &self.len())
            .finish_non_exhaustive()
    }
}

impl Scheduler {
    /// Creates a stopped scheduler with no triggers. Call [`Self::load`] to
    /// pick up what the store already holds.
    #[must_use]
    pub fn new(store: impl Store + 'static) -> Self {
        Self::with_stop_timeout(store, DEFAULT_STOP_TIMEOUT)
    }

    #[must_use]
    pub fn with_stop_timeout(store: impl Store + 'static, stop_timeout: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                triggers: Mutex::new(HashMap::new()),
                state: Mutex::new(RunState::Stopped),
                sink: RwLock::new(None),
                clock: RwLock::new(Arc::new(local_now) as Arc<Clock>),
                store: Box::new(store),
                persist_lock: Mutex::new(()),
                worker: Mutex::new(None),
                stop_timeout,
            }),
        }
    }

    /// Registers the sink, replacing any previous one.
    pub fn set_sink(&self, sink: impl NotificationSink + 'static) {
        *self
            .inner
            .sink
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(Arc::new(sink));
    }

    pub fn clear_sink(&self) {
        *self
            .inner
            .sink
            .write()
            .unwrap_or_else(PoisonError::into_inner) = None;
    }

    /// Replaces the time source the poll loop reads once per tick.
    pub fn set_clock(&self, clock: impl Fn() -> NaiveDateTime + Send + Sync + 'static) {
        *self
            .inner
            .clock
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Arc::new(clock);
    }

    fn now(&self) -> NaiveDateTime {
        let clock = self
            .inner
            .clock
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        clock()
    }

    fn sink(&self) -> Option<Arc<dyn NotificationSink>> {
        self.inner
            .sink
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn triggers(&self) -> MutexGuard<'_, HashMap<TriggerId, SharedTrigger>> {
        lock(&self.inner.triggers)
    }

    // ── Collection ──

    /// Replaces the collection with what the store holds.
    ///
    /// Never fails: a missing store loads nothing, a corrupt one loads
    /// nothing with a warning, and an unreadable one leaves the current
    /// collection untouched with a warning. Mutations are saved under the
    /// same lock, so one running alongside a load is either already in the
    /// store or applied on top of the loaded set.
    pub fn load(&self) -> LoadReport {
        let _persist = lock(&self.inner.persist_lock);
        let loaded = match self.inner.store.load() {
            Ok(loaded) => loaded,
            Err(e) => {
                warn!("couldn't load triggers, keeping current set: {e}");
                return LoadReport {
                    loaded: 0,
                    warnings: vec![LoadWarning::Unreadable {
                        reason: e.to_string(),
                    }],
                };
            }
        };

        let mut warnings = loaded.warnings;
        let mut triggers = HashMap::with_capacity(loaded.triggers.len());
        for trigger in loaded.triggers {
            if !trigger.has_valid_time() {
                let warning = LoadWarning::InvalidTime {
                    id: trigger.id().clone(),
                    time_str: trigger.time_str().to_string(),
                };
                warn!("{warning}");
                warnings.push(warning);
            }
            if triggers.contains_key(trigger.id()) {
                warn!("duplicate trigger id {}, keeping the last one", trigger.id());
            }
            triggers.insert(trigger.id().clone(), Arc::new(Mutex::new(trigger)));
        }

        let report = LoadReport {
            loaded: triggers.len(),
            warnings,
        };
        *self.triggers() = triggers;
        info!("loaded {} triggers", report.loaded);
        report
    }

    /// Adds a trigger and returns its new id.
    ///
    /// A malformed time is accepted (it reads as midnight) and logged.
    pub fn add(&self, fields: NewTrigger) -> TriggerId {
        let id = TriggerId::fresh();
        let trigger = Trigger::new(id.clone(), fields);
        if !trigger.has_valid_time() {
            warn!(
                "trigger {id} added with invalid time {:?}, it will ring at 00:00",
                trigger.time_str()
            );
        }
        debug!("adding trigger {id}: {trigger}");
        let _persist = lock(&self.inner.persist_lock);
        self.triggers()
            .insert(id.clone(), Arc::new(Mutex::new(trigger)));
        self.save();
        id
    }

    /// Removes a trigger. Returns false if there was nothing to remove.
    pub fn remove(&self, id: &TriggerId) -> bool {
        let _persist = lock(&self.inner.persist_lock);
        let removed = self.triggers().remove(id).is_some();
        if removed {
            debug!("removed trigger {id}");
            self.save();
        }
        removed
    }

    /// Flips `enabled` and returns the new value.
    pub fn toggle(&self, id: &TriggerId) -> Result<bool> {
        let _persist = lock(&self.inner.persist_lock);
        let enabled = {
            let triggers = self.triggers();
            let trigger = triggers
                .get(id)
                .ok_or_else(|| SchedulerError::NotFound(id.clone()))?;
            let enabled = lock(trigger).toggle();
            enabled
        };
        self.save();
        Ok(enabled)
    }

    /// Applies the given edits; fields without an edit keep their value.
    pub fn update(
        &self,
        id: &TriggerId,
        edits: impl IntoIterator<Item = TriggerEdit>,
    ) -> Result<()> {
        let _persist = lock(&self.inner.persist_lock);
        {
            let triggers = self.triggers();
            let trigger = triggers
                .get(id)
                .ok_or_else(|| SchedulerError::NotFound(id.clone()))?;
            let mut trigger = lock(trigger);
            for edit in edits {
                trigger.apply(edit);
            }
            if !trigger.has_valid_time() {
                warn!(
                    "trigger {id} updated with invalid time {:?}, it will ring at 00:00",
                    trigger.time_str()
                );
            }
        }
        self.save();
        Ok(())
    }

    /// Removes every trigger and returns how many there were.
    pub fn clear(&self) -> usize {
        let _persist = lock(&self.inner.persist_lock);
        let removed = {
            let mut triggers = self.triggers();
            let removed = triggers.len();
            triggers.clear();
            removed
        };
        self.save();
        removed
    }

    #[must_use]
    pub fn get(&self, id: &TriggerId) -> Option<Trigger> {
        self.triggers().get(id).map(|trigger| lock(trigger).clone())
    }

    /// A copy of every trigger, in no particular order.
    #[must_use]
    pub fn list(&self) -> Vec<Trigger> {
        self.triggers()
            .values()
            .map(|trigger| lock(trigger).clone())
            .collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.triggers().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.triggers().is_empty()
    }

    /// A copy of every trigger, earliest time of day first. Malformed times
    /// sort as midnight.
    #[must_use]
    pub fn list_by_time(&self) -> Vec<Trigger> {
        let mut triggers = self.list();
        triggers.sort_by_cached_key(Trigger::scheduled_time);
        triggers
    }

    /// Writes the whole collection to the store. A failure is logged; the
    /// in-memory collection stays authoritative.
    ///
    /// The caller holds `persist_lock` across its change and this save, so
    /// the last write always holds the newest state.
    fn save(&self) {
        let snapshot = self.list();
        if let Err(e) = self.inner.store.save(&snapshot) {
            warn!("couldn't save triggers, keeping them in memory: {e}");
        }
    }

    // ── Evaluation ──

    /// Runs one tick against `now` and returns the ids that fired.
    ///
    /// The collection lock is held only long enough to copy out the trigger
    /// handles; every trigger then sees the same `now`, and the sink is
    /// called with no scheduler lock held.
    pub fn evaluate_tick(&self, now: NaiveDateTime) -> Vec<TriggerId> {
        let snapshot: Vec<SharedTrigger> = self.triggers().values().cloned().collect();
        let sink = self.sink();

        let mut fired = Vec::new();
        for trigger in snapshot {
            let fired_trigger = {
                let mut trigger = lock(&trigger);
                trigger.should_fire(now).then(|| trigger.clone())
            };
            let Some(trigger) = fired_trigger else {
                continue;
            };
            info!("trigger {} fired at {now}: {trigger}", trigger.id());
            if let Some(sink) = &sink {
                sink::dispatch(sink.as_ref(), &trigger);
            }
            fired.push(trigger.id().clone());
        }
        fired
    }

    // ── Lifecycle ──

    #[must_use]
    pub fn state(&self) -> RunState {
        *lock(&self.inner.state)
    }

    /// Starts the poll thread. Does nothing unless the scheduler is stopped.
    pub fn start(&self) {
        let mut worker = lock(&self.inner.worker);
        {
            let mut state = lock(&self.inner.state);
            if *state != RunState::Stopped {
                return;
            }
            *state = RunState::Running;
        }

        let (stop_tx, stop_rx) = mpsc::channel();
        let (done_tx, done_rx) = mpsc::channel();
        let inner = Arc::downgrade(&self.inner);
        let spawned = thread::Builder::new()
            .name("reminder-poll".to_string())
            .spawn(move || {
                // held until the loop returns so `stop` can tell it's gone
                let _done = done_tx;
                poll_loop(&inner, &stop_rx);
            });

        match spawned {
            Ok(handle) => {
                info!("scheduler started");
                *worker = Some(Worker {
                    handle,
                    stop_tx,
                    done_rx,
                });
            }
            Err(e) => {
                error!("couldn't spawn the poll thread: {e}");
                *lock(&self.inner.state) = RunState::Stopped;
            }
        }
    }

    /// Keeps the poll thread alive but skips evaluation until [`Self::resume`].
    pub fn pause(&self) {
        let mut state = lock(&self.inner.state);
        if *state == RunState::Running {
            *state = RunState::Paused;
            info!("scheduler paused");
        }
    }

    pub fn resume(&self) {
        let mut state = lock(&self.inner.state);
        if *state == RunState::Paused {
            *state = RunState::Running;
            info!("scheduler resumed");
        }
    }

    /// Stops the poll thread and waits, up to the stop timeout, for it to
    /// exit. Safe to call in any state, including from inside a sink.
    pub fn stop(&self) {
        let worker = {
            // same order as `start`, so a racing start sees either the old
            // worker still running or no worker at all
            let mut worker = lock(&self.inner.worker);
            *lock(&self.inner.state) = RunState::Stopped;
            worker.take()
        };
        let Some(worker) = worker else {
            return;
        };

        drop(worker.stop_tx);
        if worker.handle.thread().id() == thread::current().id() {
            // called from a sink; the loop exits once this tick returns
            debug!("scheduler stopped from its own poll thread");
            return;
        }

        match worker.done_rx.recv_timeout(self.inner.stop_timeout) {
            Err(RecvTimeoutError::Disconnected) | Ok(()) => {
                if worker.handle.join().is_err() {
                    error!("poll thread panicked");
                }
                info!("scheduler stopped");
            }
            Err(RecvTimeoutError::Timeout) => {
                warn!(
                    "poll thread still busy after {:?}, leaving it to exit on its own",
                    self.inner.stop_timeout
                );
            }
        }
    }
}

/// The poll thread only holds a weak handle, so dropping every
/// [`Scheduler`] without calling stop still ends it.
fn poll_loop(inner: &Weak<Inner>, stop_rx: &Receiver<()>) {
    loop {
        let Some(inner) = inner.upgrade() else {
            break;
        };
        let scheduler = Scheduler { inner };
        if scheduler.state() == RunState::Running {
            scheduler.evaluate_tick(scheduler.now());
        }
        drop(scheduler);
        match stop_rx.recv_timeout(TICK_INTERVAL) {
            Err(RecvTimeoutError::Timeout) => {}
            Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
        }
    }
    debug!("poll loop exited");
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use chrono::NaiveDate;

    use super::*;
    use crate::{
        sink::SinkResult,
        store::{MemoryStore, StoreError},
    };

    fn at(day: u32, hour: u32, minute: u32, second: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 5, day)
            .unwrap()
            .and_hms_opt(hour, minute, second)
            .unwrap()
    }

    fn counting_sink(scheduler: &Scheduler) -> Arc<AtomicUsize> {
        let count = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&count);
        scheduler.set_sink(move |_: &Trigger| -> SinkResult {
            seen.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
        count
    }

    struct BrokenStore;

    impl Store for BrokenStore {
        fn save(&self, _: &[Trigger]) -> crate::store::Result<()> {
            Err(StoreError::InvalidRecord {
                index: 0,
                reason: "read only".to_string(),
            })
        }

        fn load(&self) -> crate::store::Result<crate::store::Loaded> {
            Err(StoreError::Io {
                path: "nowhere".into(),
                source: std::io::Error::from(std::io::ErrorKind::PermissionDenied),
            })
        }
    }

    #[test]
    fn daily_scenario() {
        let scheduler = Scheduler::new(MemoryStore::new());
        let count = counting_sink(&scheduler);
        let id = scheduler.add(NewTrigger::daily("14:30"));

        assert_eq!(scheduler.evaluate_tick(at(2, 14, 30, 5)), vec![id.clone()]);
        assert!(scheduler.evaluate_tick(at(2, 14, 30, 45)).is_empty());
        assert!(scheduler.evaluate_tick(at(2, 14, 31, 5)).is_empty());
        assert_eq!(scheduler.evaluate_tick(at(3, 14, 30, 10)), vec![id]);
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn one_shot_scenario() {
        let scheduler = Scheduler::new(MemoryStore::new());
        let count = counting_sink(&scheduler);
        scheduler.add(NewTrigger::once("06:00"));

        assert_eq!(scheduler.evaluate_tick(at(2, 6, 0, 0)).len(), 1);
        assert!(scheduler.evaluate_tick(at(3, 6, 0, 0)).is_empty());
        assert!(scheduler.evaluate_tick(at(4, 6, 0, 0)).is_empty());
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn failing_sink_does_not_stop_the_tick() {
        let scheduler = Scheduler::new(MemoryStore::new());
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&calls);
        scheduler.set_sink(move |t: &Trigger| -> SinkResult {
            seen.fetch_add(1, Ordering::SeqCst);
            match t.message() {
                "fail" => Err("no audio device".into()),
                "panic" => panic!("dialog crashed"),
                _ => Ok(()),
            }
        });
        scheduler.add(NewTrigger::daily("12:00").with_message("fail"));
        scheduler.add(NewTrigger::daily("12:00").with_message("panic"));
        scheduler.add(NewTrigger::daily("12:00").with_message("ok"));

        assert_eq!(scheduler.evaluate_tick(at(2, 12, 0, 0)).len(), 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        // still usable afterwards
        assert_eq!(scheduler.len(), 3);
        scheduler.add(NewTrigger::daily("12:01"));
        assert_eq!(scheduler.evaluate_tick(at(2, 12, 1, 0)).len(), 1);
    }

    #[test]
    fn last_registered_sink_wins() {
        let scheduler = Scheduler::new(MemoryStore::new());
        let first = counting_sink(&scheduler);
        let second = counting_sink(&scheduler);
        scheduler.add(NewTrigger::daily("09:00"));

        scheduler.evaluate_tick(at(2, 9, 0, 0));
        assert_eq!(first.load(Ordering::SeqCst), 0);
        assert_eq!(second.load(Ordering::SeqCst), 1);

        scheduler.clear_sink();
        assert_eq!(scheduler.evaluate_tick(at(3, 9, 0, 0)).len(), 1);
        assert_eq!(second.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn sink_can_call_back_into_the_scheduler() {
        let scheduler = Scheduler::new(MemoryStore::new());
        let handle = scheduler.clone();
        scheduler.set_sink(move |t: &Trigger| -> SinkResult {
            handle.toggle(t.id())?;
            handle.add(NewTrigger::daily("23:59"));
            Ok(())
        });
        let id = scheduler.add(NewTrigger::daily("08:00"));

        assert_eq!(scheduler.evaluate_tick(at(2, 8, 0, 0)).len(), 1);
        assert!(!scheduler.get(&id).unwrap().enabled());
        assert_eq!(scheduler.len(), 2);
    }

    #[test]
    fn mutations_persist() {
        let store = Arc::new(MemoryStore::new());
        let scheduler = Scheduler::new(Arc::clone(&store));

        let id = scheduler.add(NewTrigger::daily("10:00").with_message("stand up"));
        assert!(store.contents().unwrap().contains("stand up"));

        scheduler
            .update(&id, [TriggerEdit::Message("sit down".to_string())])
            .unwrap();
        assert!(store.contents().unwrap().contains("sit down"));

        assert!(!scheduler.toggle(&id).unwrap());
        assert!(store.contents().unwrap().contains(r#""enabled":false"#));

        assert!(scheduler.remove(&id));
        assert_eq!(store.contents().unwrap(), "[]");
    }

    #[test]
    fn unknown_ids_are_not_found() {
        let scheduler = Scheduler::new(MemoryStore::new());
        let missing = TriggerId::from("missing");

        assert!(!scheduler.remove(&missing));
        assert_eq!(
            scheduler.toggle(&missing),
            Err(SchedulerError::NotFound(missing.clone()))
        );
        assert_eq!(
            scheduler.update(&missing, [TriggerEdit::Repeat(false)]),
            Err(SchedulerError::NotFound(missing))
        );
    }

    #[test]
    fn remove_is_idempotent() {
        let scheduler = Scheduler::new(MemoryStore::new());
        let id = scheduler.add(NewTrigger::daily("10:00"));

        assert!(scheduler.remove(&id));
        assert!(!scheduler.remove(&id));
        assert!(scheduler.is_empty());
    }

    #[test]
    fn update_leaves_other_fields_alone() {
        let scheduler = Scheduler::new(MemoryStore::new());
        let id = scheduler.add(
            NewTrigger::once("10:00")
                .with_message("pills")
                .with_audio("chime.wav"),
        );

        scheduler
            .update(&id, [TriggerEdit::Time("10:30".to_string())])
            .unwrap();
        let trigger = scheduler.get(&id).unwrap();
        assert_eq!(trigger.time_str(), "10:30");
        assert_eq!(trigger.message(), "pills");
        assert_eq!(trigger.audio_file(), Some("chime.wav"));
        assert!(!trigger.repeat_daily());
        assert!(trigger.enabled());
    }

    #[test]
    fn lenient_add_rings_at_midnight() {
        let scheduler = Scheduler::new(MemoryStore::new());
        let id = scheduler.add(NewTrigger::daily("7 o'clock"));

        assert_eq!(scheduler.evaluate_tick(at(2, 0, 0, 30)), vec![id]);
    }

    #[test]
    fn clear_removes_everything() {
        let store = Arc::new(MemoryStore::new());
        let scheduler = Scheduler::new(Arc::clone(&store));
        scheduler.add(NewTrigger::daily("01:00"));
        scheduler.add(NewTrigger::daily("02:00"));

        assert_eq!(scheduler.clear(), 2);
        assert!(scheduler.is_empty());
        assert_eq!(store.contents().unwrap(), "[]");
    }

    #[test]
    fn save_failure_keeps_memory() {
        let scheduler = Scheduler::new(BrokenStore);
        let id = scheduler.add(NewTrigger::daily("05:00"));

        assert!(scheduler.get(&id).is_some());
        assert!(scheduler.toggle(&id).is_ok());
    }

    #[test]
    fn unreadable_store_keeps_current_set() {
        let scheduler = Scheduler::new(BrokenStore);
        scheduler.add(NewTrigger::daily("05:00"));

        let report = scheduler.load();
        assert_eq!(report.loaded, 0);
        assert!(matches!(report.warnings[..], [LoadWarning::Unreadable { .. }]));
        assert_eq!(scheduler.len(), 1);
    }

    #[test]
    fn load_flags_invalid_times() {
        let store = MemoryStore::with_contents(
            r#"[
                {"id": "bad", "time_str": "25:99", "message": "odd"},
                {"id": "good", "time_str": "08:00"}
            ]"#,
        );
        let scheduler = Scheduler::new(store);

        let report = scheduler.load();
        assert_eq!(report.loaded, 2);
        assert_eq!(
            report.warnings,
            vec![LoadWarning::InvalidTime {
                id: TriggerId::from("bad"),
                time_str: "25:99".to_string(),
            }]
        );
        let bad = scheduler.get(&TriggerId::from("bad")).unwrap();
        assert_eq!(bad.time_of_day(), chrono::NaiveTime::MIN);
        assert_eq!(bad.time_str(), "25:99");
    }

    #[test]
    fn lifecycle_transitions() {
        let scheduler = Scheduler::new(MemoryStore::new());
        assert_eq!(scheduler.state(), RunState::Stopped);

        scheduler.pause();
        assert_eq!(scheduler.state(), RunState::Stopped);

        scheduler.start();
        scheduler.start();
        assert_eq!(scheduler.state(), RunState::Running);

        scheduler.pause();
        assert_eq!(scheduler.state(), RunState::Paused);
        scheduler.start();
        assert_eq!(scheduler.state(), RunState::Paused);

        scheduler.resume();
        assert_eq!(scheduler.state(), RunState::Running);

        scheduler.stop();
        assert_eq!(scheduler.state(), RunState::Stopped);
        scheduler.stop();

        scheduler.start();
        assert_eq!(scheduler.state(), RunState::Running);
        scheduler.stop();
        assert_eq!(scheduler.state(), RunState::Stopped);
    }

    #[test]
    fn racing_start_and_stop_keep_state_and_worker_in_step() {
        let scheduler = Scheduler::new(MemoryStore::new());
        for round in 0..50 {
            scheduler.start();
            let stopper = {
                let scheduler = scheduler.clone();
                thread::spawn(move || scheduler.stop())
            };
            let starter = {
                let scheduler = scheduler.clone();
                thread::spawn(move || scheduler.start())
            };
            stopper.join().unwrap();
            starter.join().unwrap();

            {
                let worker = lock(&scheduler.inner.worker);
                let alive = worker.as_ref().is_some_and(|w| !w.handle.is_finished());
                match scheduler.state() {
                    RunState::Stopped => assert!(worker.is_none(), "round {round}"),
                    _ => assert!(alive, "round {round}: running without a poll thread"),
                }
            }
            scheduler.stop();
            assert_eq!(scheduler.state(), RunState::Stopped);
        }
    }

    #[test]
    fn add_during_load_is_kept() {
        let scheduler = Scheduler::new(MemoryStore::new());
        let loader = {
            let scheduler = scheduler.clone();
            thread::spawn(move || {
                for _ in 0..200 {
                    scheduler.load();
                }
            })
        };
        let ids: Vec<TriggerId> = (0..200)
            .map(|_| scheduler.add(NewTrigger::daily("10:00")))
            .collect();
        loader.join().unwrap();

        assert_eq!(scheduler.len(), ids.len());
        assert!(ids.iter().all(|id| scheduler.get(id).is_some()));
    }

    #[test]
    fn list_by_time_sorts_malformed_as_midnight() {
        let scheduler = Scheduler::new(MemoryStore::new());
        scheduler.add(NewTrigger::daily("18:00"));
        scheduler.add(NewTrigger::daily("soon"));
        scheduler.add(NewTrigger::daily("7:15"));

        let times: Vec<String> = scheduler
            .list_by_time()
            .iter()
            .map(|t| t.time_str().to_string())
            .collect();
        assert_eq!(times, ["soon", "7:15", "18:00"]);
    }
}
