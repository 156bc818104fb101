//! End-to-end behaviour of PriorityLockedQueue: exclusion, parallelism,
//! delays, release semantics and lifecycle.

use std::collections::HashSet;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use rand::Rng;
use tokio::time::Instant;

use super::{PriorityLockedQueue, QueueBuilder, Ticket};
use crate::domain::{KeyedTask, ResourceTask, TaskId, TaskState};
use crate::error::QueueError;
use crate::ports::{Processor, TaskListener};

type Task = KeyedTask<&'static str>;

#[derive(Debug, Clone)]
struct Interval {
    name: String,
    start: Instant,
    end: Instant,
}

/// Records what ran when, and flags any key used by two tasks at once.
#[derive(Default)]
struct Recorder {
    active: Mutex<HashSet<&'static str>>,
    processed: Mutex<HashSet<&'static str>>,
    started: Mutex<Vec<(String, Instant)>>,
    intervals: Mutex<Vec<Interval>>,
    overlap: AtomicBool,
}

impl Recorder {
    fn start(&self, task: &Task) -> Instant {
        let now = Instant::now();
        let mut active = self.active.lock().unwrap();
        for key in task.resources() {
            if !active.insert(*key) {
                self.overlap.store(true, Ordering::SeqCst);
            }
        }
        self.started
            .lock()
            .unwrap()
            .push((task.name().to_string(), now));
        now
    }

    fn finish(&self, task: &Task, start: Instant) {
        let mut active = self.active.lock().unwrap();
        let mut processed = self.processed.lock().unwrap();
        for key in task.resources() {
            active.remove(key);
            processed.insert(*key);
        }
        self.intervals.lock().unwrap().push(Interval {
            name: task.name().to_string(),
            start,
            end: Instant::now(),
        });
    }

    fn processed(&self) -> HashSet<&'static str> {
        self.processed.lock().unwrap().clone()
    }

    fn start_order(&self) -> Vec<String> {
        self.started
            .lock()
            .unwrap()
            .iter()
            .map(|(name, _)| name.clone())
            .collect()
    }

    fn interval(&self, name: &str) -> Interval {
        self.intervals
            .lock()
            .unwrap()
            .iter()
            .find(|i| i.name == name)
            .cloned()
            .unwrap_or_else(|| panic!("no interval for {name}"))
    }

    fn saw_overlap(&self) -> bool {
        self.overlap.load(Ordering::SeqCst)
    }
}

/// Processor that finishes work inline, before `process` returns.
fn inline_processor(recorder: Arc<Recorder>) -> impl Processor<Task> {
    move |ticket: Ticket<Task>| {
        let start = recorder.start(ticket.task());
        recorder.finish(ticket.task(), start);
        ticket.processed();
    }
}

/// Processor that simulates `work` of asynchronous I/O per task.
fn sleeping_processor(recorder: Arc<Recorder>, work: Duration) -> impl Processor<Task> {
    move |ticket: Ticket<Task>| {
        let recorder = Arc::clone(&recorder);
        let start = recorder.start(ticket.task());
        tokio::spawn(async move {
            tokio::time::sleep(work).await;
            recorder.finish(ticket.task(), start);
            ticket.processed();
        });
    }
}

/// Processor that parks tickets so the test decides when tasks finish.
#[derive(Default, Clone)]
struct Held {
    tickets: Arc<Mutex<Vec<Ticket<Task>>>>,
}

impl Held {
    fn processor(&self) -> impl Processor<Task> {
        let tickets = Arc::clone(&self.tickets);
        move |ticket: Ticket<Task>| tickets.lock().unwrap().push(ticket)
    }

    fn names(&self) -> Vec<String> {
        self.tickets
            .lock()
            .unwrap()
            .iter()
            .map(|t| t.task().name().to_string())
            .collect()
    }

    /// Take the ticket for `name` out of the parked set.
    fn take(&self, name: &str) -> Ticket<Task> {
        let mut tickets = self.tickets.lock().unwrap();
        let pos = tickets
            .iter()
            .position(|t| t.task().name() == name)
            .unwrap_or_else(|| panic!("{name} is not running"));
        tickets.remove(pos)
    }

    /// Parks the ticket for `name`; every other task runs `work` and is
    /// marked processed before `process` returns.
    fn parking_only(
        &self,
        name: &'static str,
        work: impl Fn(&Task) + Send + Sync + 'static,
    ) -> impl Processor<Task> {
        let tickets = Arc::clone(&self.tickets);
        move |ticket: Ticket<Task>| {
            if ticket.task().name() == name {
                tickets.lock().unwrap().push(ticket);
            } else {
                work(ticket.task());
                ticket.processed();
            }
        }
    }
}

/// Listener that records `start <name>` / `stop <name>` lines.
#[derive(Default, Clone)]
struct EventLog {
    events: Arc<Mutex<Vec<String>>>,
}

impl EventLog {
    fn push(&self, event: String) {
        self.events.lock().unwrap().push(event);
    }

    fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }
}

impl TaskListener<Task> for EventLog {
    fn on_start(&self, _id: TaskId, task: &Task) {
        self.push(format!("start {}", task.name()));
    }

    fn on_stop(&self, _id: TaskId, task: &Task) {
        self.push(format!("stop {}", task.name()));
    }
}

struct ExplodingListener;

impl TaskListener<Task> for ExplodingListener {
    fn on_start(&self, _id: TaskId, task: &Task) {
        panic!("listener failed on {}", task.name());
    }
}

fn queue_with(processor: impl Processor<Task>) -> PriorityLockedQueue<Task> {
    QueueBuilder::new(processor).build().unwrap()
}

fn task(name: &str, keys: &[&'static str]) -> Task {
    KeyedTask::new(name, keys.iter().copied())
}

#[test]
fn process_item_without_blocking_runs_synchronously() {
    let recorder = Arc::new(Recorder::default());
    let queue = queue_with(inline_processor(Arc::clone(&recorder)));

    assert!(queue.process_item(task("a", &["A"])));

    assert!(recorder.processed().contains("A"));
    assert!(queue.counts_by_state().live() == 0);
}

#[test]
fn inline_release_chains_through_conflicting_waiters() {
    // processed() が process() の中から同期的に呼ばれてもデッドロックしない
    let held = Held::default();
    let recorder = Arc::new(Recorder::default());
    let work = Arc::clone(&recorder);
    let queue = queue_with(held.parking_only("holder", move |task| {
        let start = work.start(task);
        work.finish(task, start);
    }));

    assert!(queue.process_item(task("holder", &["E"])));
    for name in ["e1", "e2", "e3"] {
        assert!(queue.process_item(task(name, &["E"])));
    }
    assert_eq!(queue.counts_by_state().waiting, 3);
    assert!(recorder.start_order().is_empty());

    held.take("holder").processed();

    assert_eq!(recorder.start_order(), vec!["e1", "e2", "e3"]);
    let counts = queue.counts_by_state();
    assert_eq!(counts.completed, 4);
    assert_eq!(counts.live(), 0);
    assert!(!recorder.saw_overlap());
}

#[test]
fn long_inline_release_chain_runs_without_recursion() {
    const WAITERS: usize = 100_000;

    let held = Held::default();
    let next = Arc::new(AtomicUsize::new(0));
    let in_order = Arc::new(AtomicBool::new(true));
    let (seen, ordered) = (Arc::clone(&next), Arc::clone(&in_order));
    let queue = queue_with(held.parking_only("holder", move |task| {
        let n = seen.fetch_add(1, Ordering::SeqCst);
        if task.name() != format!("w{n}") {
            ordered.store(false, Ordering::SeqCst);
        }
    }));

    queue.process_item(task("holder", &["A"]));
    for n in 0..WAITERS {
        queue.process_item(task(&format!("w{n}"), &["A"]));
    }
    assert_eq!(queue.counts_by_state().waiting, WAITERS);

    // every waiter finishes inside this call
    held.take("holder").processed();

    assert_eq!(next.load(Ordering::SeqCst), WAITERS);
    assert!(in_order.load(Ordering::SeqCst));
    let counts = queue.counts_by_state();
    assert_eq!(counts.completed, WAITERS as u64 + 1);
    assert_eq!(counts.live(), 0);
    assert_eq!(counts.held_keys, 0);
}

#[test]
fn processor_panic_defers_the_rest_of_the_batch() {
    let held = Held::default();
    let tickets = Arc::clone(&held.tickets);
    let queue = queue_with(move |ticket: Ticket<Task>| {
        if ticket.task().name() == "w1" {
            panic!("processor failed on w1");
        }
        tickets.lock().unwrap().push(ticket);
    });

    queue.process_item(task("holder", &["A", "B"]));
    let w1 = queue.schedule(task("w1", &["A"]), Duration::ZERO).unwrap();
    let w2 = queue.schedule(task("w2", &["B"]), Duration::ZERO).unwrap();

    // releasing holder admits w1 and w2 in one batch; w1 panics first
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| held.take("holder").processed()));
    assert!(outcome.is_err());

    // w1's ticket was dropped during unwinding; w2 was never handed over
    assert!(queue.task(w1).is_none());
    assert_eq!(queue.task(w2).unwrap().state, TaskState::Running);
    assert!(held.names().is_empty());
    let counts = queue.counts_by_state();
    assert_eq!(counts.completed, 2);
    assert_eq!(counts.running, 1);

    // the next dispatch on any thread drains the deferred task first
    queue.process_item(task("next", &[]));
    assert_eq!(held.names(), vec!["w2", "next"]);
}

#[test]
fn listeners_bracket_processing_outside_the_lock() {
    let held = Held::default();
    let log = EventLog::default();
    let tickets = Arc::clone(&held.tickets);
    let seen = log.clone();
    let queue = QueueBuilder::new(move |ticket: Ticket<Task>| {
        seen.push(format!("process {}", ticket.task().name()));
        tickets.lock().unwrap().push(ticket);
    })
    .listener(log.clone())
    .build()
    .unwrap();

    queue.process_item(task("a1", &["A"]));
    queue.process_item(task("a2", &["A"]));
    assert_eq!(log.events(), vec!["start a1", "process a1"]);

    held.take("a1").processed();
    assert_eq!(
        log.events(),
        vec!["start a1", "process a1", "stop a1", "start a2", "process a2"]
    );
}

#[test]
fn panicking_listener_does_not_disturb_the_queue() {
    let recorder = Arc::new(Recorder::default());
    let log = EventLog::default();
    let queue = QueueBuilder::new(inline_processor(Arc::clone(&recorder)))
        .listener(ExplodingListener)
        .listener(log.clone())
        .build()
        .unwrap();

    assert!(queue.process_item(task("a", &["A"])));
    assert!(queue.process_item(task("b", &["A"])));

    assert_eq!(recorder.start_order(), vec!["a", "b"]);
    assert_eq!(log.events(), vec!["start a", "stop a", "start b", "stop b"]);
    assert_eq!(queue.counts_by_state().held_keys, 0);
}

#[tokio::test(start_paused = true)]
async fn disjoint_tasks_run_in_parallel() {
    let recorder = Arc::new(Recorder::default());
    let queue = queue_with(sleeping_processor(
        Arc::clone(&recorder),
        Duration::from_millis(100),
    ));
    queue.start().unwrap();

    queue.schedule(task("c", &["C"]), Duration::ZERO).unwrap();
    queue
        .schedule(task("d", &["D"]), Duration::from_millis(10))
        .unwrap();

    tokio::time::sleep(Duration::from_millis(2000)).await;

    let processed = recorder.processed();
    assert!(processed.contains("C"));
    assert!(processed.contains("D"));

    let c = recorder.interval("c");
    let d = recorder.interval("d");
    assert!(d.start < c.end, "d should start while c is still running");
}

#[tokio::test(start_paused = true)]
async fn conflicting_tasks_never_overlap() {
    let recorder = Arc::new(Recorder::default());
    let queue = queue_with(sleeping_processor(
        Arc::clone(&recorder),
        Duration::from_millis(100),
    ));
    queue.start().unwrap();

    queue.schedule(task("e1", &["E"]), Duration::ZERO).unwrap();
    queue
        .schedule(task("e2", &["E"]), Duration::from_millis(500))
        .unwrap();

    tokio::time::sleep(Duration::from_millis(1600)).await;

    assert!(recorder.processed().contains("E"));
    let first = recorder.interval("e1");
    let second = recorder.interval("e2");
    assert!(first.end <= second.start);
    assert!(!recorder.saw_overlap());
    assert_eq!(queue.counts_by_state().completed, 2);
}

#[tokio::test(start_paused = true)]
async fn second_task_waits_for_busy_key() {
    let recorder = Arc::new(Recorder::default());
    let queue = queue_with(sleeping_processor(
        Arc::clone(&recorder),
        Duration::from_millis(300),
    ));
    queue.start().unwrap();

    queue.schedule(task("e1", &["E"]), Duration::ZERO).unwrap();
    let second = queue
        .schedule(task("e2", &["E"]), Duration::from_millis(50))
        .unwrap();

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(queue.task(second).unwrap().state, TaskState::Waiting);

    queue.wait_idle().await;
    let first = recorder.interval("e1");
    let second = recorder.interval("e2");
    assert!(first.end <= second.start);
}

#[tokio::test(start_paused = true)]
async fn disjoint_multi_key_tasks_all_complete() {
    let recorder = Arc::new(Recorder::default());
    let queue = queue_with(sleeping_processor(
        Arc::clone(&recorder),
        Duration::from_millis(100),
    ));
    queue.start().unwrap();

    queue
        .schedule(task("ghi", &["G", "H", "I"]), Duration::ZERO)
        .unwrap();
    queue
        .schedule(task("jkl", &["J", "K", "L"]), Duration::from_millis(500))
        .unwrap();

    tokio::time::sleep(Duration::from_millis(1600)).await;

    let processed = recorder.processed();
    for key in ["G", "H", "I", "J", "K", "L"] {
        assert!(processed.contains(key), "{key} was not processed");
    }
}

#[test]
fn multi_key_task_waits_for_every_key() {
    let held = Held::default();
    let queue = queue_with(held.processor());

    queue.process_item(task("x", &["X"]));
    queue.process_item(task("y", &["Y"]));
    queue.process_item(task("xyz", &["X", "Y", "Z"]));
    assert_eq!(held.names(), vec!["x", "y"]);

    // X だけ解放しても Y がまだ保持されている
    held.take("x").processed();
    assert_eq!(held.names(), vec!["y"]);
    assert_eq!(queue.counts_by_state().waiting, 1);

    held.take("y").processed();
    assert_eq!(held.names(), vec!["xyz"]);
    assert_eq!(queue.counts_by_state().held_keys, 3);
}

#[test]
fn waiters_are_admitted_in_arrival_order_skipping_blocked_ones() {
    let held = Held::default();
    let queue = queue_with(held.processor());

    queue.process_item(task("hold-a", &["A"]));
    queue.process_item(task("hold-b", &["B"]));
    queue.process_item(task("needs-ab", &["A", "B"]));
    queue.process_item(task("needs-a", &["A"]));
    queue.process_item(task("needs-a-again", &["A"]));

    held.take("hold-a").processed();
    // needs-ab は B 待ちでスキップ、needs-a が入る、needs-a-again は needs-a 待ち
    assert_eq!(held.names(), vec!["hold-b", "needs-a"]);
    assert_eq!(queue.counts_by_state().waiting, 2);

    held.take("needs-a").processed();
    assert_eq!(held.names(), vec!["hold-b", "needs-a-again"]);
}

#[test]
fn repeated_processed_is_a_no_op() {
    let held = Held::default();
    let queue = queue_with(held.processor());

    let first = queue.schedule(task("a1", &["A"]), Duration::ZERO).unwrap();
    assert!(queue.processed(first));
    assert!(!queue.processed(first));

    // the ticket still parked for a1 releases nothing when dropped
    drop(held.take("a1"));

    queue.process_item(task("a2", &["A"]));
    queue.process_item(task("a3", &["A"]));
    assert_eq!(held.names(), vec!["a2"]);

    // a stale release for a1 must not free a2's key
    assert!(!queue.processed(first));
    assert_eq!(held.names(), vec!["a2"]);
    assert_eq!(queue.counts_by_state().waiting, 1);
    assert_eq!(queue.counts_by_state().completed, 1);
}

#[test]
fn processed_for_a_waiting_task_releases_nothing() {
    let held = Held::default();
    let queue = queue_with(held.processor());

    queue.process_item(task("owner", &["A"]));
    let waiter = queue.schedule(task("waiter", &["A"]), Duration::ZERO).unwrap();

    assert!(!queue.processed(waiter));
    assert_eq!(queue.task(waiter).unwrap().state, TaskState::Waiting);
    assert_eq!(held.names(), vec!["owner"]);
}

#[test]
fn dropped_ticket_releases_keys() {
    let held = Held::default();
    let queue = queue_with(held.processor());

    queue.process_item(task("first", &["K"]));
    queue.process_item(task("second", &["K"]));

    drop(held.take("first"));
    assert_eq!(held.names(), vec!["second"]);
}

#[test]
fn empty_resource_set_is_always_admitted() {
    let held = Held::default();
    let queue = queue_with(held.processor());

    queue.process_item(task("owner", &["A", "B"]));
    queue.process_item(task("free", &[]));
    assert_eq!(held.names(), vec!["owner", "free"]);

    held.take("free").processed();
    assert_eq!(queue.counts_by_state().held_keys, 2);
}

#[tokio::test(start_paused = true)]
async fn shorter_delay_runs_first_even_if_scheduled_later() {
    let recorder = Arc::new(Recorder::default());
    let queue = queue_with(sleeping_processor(
        Arc::clone(&recorder),
        Duration::from_millis(50),
    ));
    queue.start().unwrap();

    let begin = Instant::now();
    queue
        .schedule(task("late", &["K"]), Duration::from_millis(300))
        .unwrap();
    queue.schedule(task("now", &["K"]), Duration::ZERO).unwrap();

    queue.wait_idle().await;
    assert_eq!(recorder.start_order(), vec!["now", "late"]);
    assert!(recorder.interval("now").start < begin + Duration::from_millis(300));
}

#[tokio::test(start_paused = true)]
async fn earlier_deadline_rearms_the_driver() {
    let recorder = Arc::new(Recorder::default());
    let queue = queue_with(sleeping_processor(
        Arc::clone(&recorder),
        Duration::from_millis(10),
    ));
    queue.start().unwrap();

    let begin = Instant::now();
    queue
        .schedule(task("far", &["F"]), Duration::from_secs(10))
        .unwrap();
    queue
        .schedule(task("near", &["N"]), Duration::from_millis(20))
        .unwrap();

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(recorder.processed().contains("N"));
    assert!(!recorder.processed().contains("F"));
    assert!(recorder.interval("near").start < begin + Duration::from_secs(1));
}

#[tokio::test(start_paused = true)]
async fn snapshot_reports_states() {
    let held = Held::default();
    let queue = queue_with(held.processor());
    queue.start().unwrap();

    let running = queue.schedule(task("running", &["A"]), Duration::ZERO).unwrap();
    let waiting = queue.schedule(task("waiting", &["A"]), Duration::ZERO).unwrap();
    let sleeping = queue
        .schedule(task("sleeping", &["B"]), Duration::from_secs(60))
        .unwrap();

    let tasks = queue.tasks();
    let view: Vec<_> = tasks.iter().map(|info| (info.id, info.state)).collect();
    assert_eq!(
        view,
        vec![
            (running, TaskState::Running),
            (waiting, TaskState::Waiting),
            (sleeping, TaskState::Sleeping),
        ]
    );
    assert!(tasks[0].started_at.is_some());
    assert!(tasks[2].started_at.is_none());
    assert_eq!(tasks[0].name, "running");
}

#[tokio::test(start_paused = true)]
async fn shutdown_rejects_new_tasks_but_runs_sleeping_ones() {
    let recorder = Arc::new(Recorder::default());
    let queue = queue_with(sleeping_processor(
        Arc::clone(&recorder),
        Duration::from_millis(10),
    ));
    queue.start().unwrap();

    queue
        .schedule(task("delayed", &["S"]), Duration::from_millis(200))
        .unwrap();
    queue.shutdown();

    assert!(!queue.process_item(task("rejected", &["R"])));
    assert!(queue.schedule(task("rejected", &["R"]), Duration::ZERO).is_err());
    assert!(queue.start().is_err());

    queue.shutdown_and_join().await;
    queue.wait_idle().await;
    assert!(recorder.processed().contains("S"));
    assert!(!recorder.processed().contains("R"));
}

#[tokio::test(start_paused = true)]
async fn delayed_schedule_starts_the_driver() {
    let recorder = Arc::new(Recorder::default());
    let queue = queue_with(inline_processor(Arc::clone(&recorder)));

    queue
        .schedule(task("later", &["L"]), Duration::from_millis(200))
        .unwrap();

    tokio::time::timeout(Duration::from_secs(1), queue.wait_idle())
        .await
        .unwrap();
    assert!(recorder.processed().contains("L"));
}

#[test]
fn delayed_schedule_outside_a_runtime_is_rejected() {
    let held = Held::default();
    let queue = queue_with(held.processor());

    let result = queue.schedule(task("later", &["L"]), Duration::from_millis(200));
    assert!(matches!(result, Err(QueueError::NoRuntime(_))));
    assert_eq!(queue.counts_by_state().live(), 0);

    // zero delay needs no driver
    assert!(queue.process_item(task("now", &["L"])));
    assert_eq!(held.names(), vec!["now"]);
}

/// Factory producing `tick0`, `tick1`, ... on key `P`.
fn ticks(counter: &Arc<AtomicUsize>) -> impl Fn() -> Task + Send + 'static {
    let counter = Arc::clone(counter);
    move || {
        let n = counter.fetch_add(1, Ordering::SeqCst);
        KeyedTask::new(format!("tick{n}"), ["P"])
    }
}

#[tokio::test(start_paused = true)]
async fn fixed_rate_schedule_submits_every_interval() {
    let recorder = Arc::new(Recorder::default());
    let queue = queue_with(inline_processor(Arc::clone(&recorder)));
    let counter = Arc::new(AtomicUsize::new(0));

    let handle = queue
        .schedule_at_fixed_rate(
            ticks(&counter),
            Duration::from_millis(10),
            Duration::from_millis(100),
        )
        .unwrap();

    // ticks at 10, 110, 210, 310
    tokio::time::sleep(Duration::from_millis(350)).await;
    assert_eq!(
        recorder.start_order(),
        vec!["tick0", "tick1", "tick2", "tick3"]
    );
    assert_eq!(queue.counts_by_state().completed, 4);
    handle.cancel();
}

#[tokio::test(start_paused = true)]
async fn fixed_rate_instances_wait_for_the_previous_one() {
    let recorder = Arc::new(Recorder::default());
    let queue = queue_with(sleeping_processor(
        Arc::clone(&recorder),
        Duration::from_millis(150),
    ));
    let counter = Arc::new(AtomicUsize::new(0));

    let handle = queue
        .schedule_at_fixed_rate(ticks(&counter), Duration::ZERO, Duration::from_millis(100))
        .unwrap();

    tokio::time::sleep(Duration::from_millis(120)).await;
    // tick1 was submitted at 100 but tick0 still holds P
    assert_eq!(queue.counts_by_state().waiting, 1);
    assert_eq!(recorder.start_order(), vec!["tick0"]);

    handle.cancel();
    tokio::time::timeout(Duration::from_secs(5), queue.wait_idle())
        .await
        .unwrap();
    assert!(!recorder.saw_overlap());
    assert!(recorder.interval("tick0").end <= recorder.interval("tick1").start);
}

#[tokio::test(start_paused = true)]
async fn cancelled_fixed_rate_schedule_stops_submitting() {
    let recorder = Arc::new(Recorder::default());
    let queue = queue_with(inline_processor(Arc::clone(&recorder)));
    let counter = Arc::new(AtomicUsize::new(0));

    let handle = queue
        .schedule_at_fixed_rate(ticks(&counter), Duration::ZERO, Duration::from_millis(100))
        .unwrap();

    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(counter.load(Ordering::SeqCst), 2);

    handle.cancel();
    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(counter.load(Ordering::SeqCst), 2);
    assert!(handle.is_finished());
}

#[tokio::test(start_paused = true)]
async fn shutdown_stops_fixed_rate_schedules() {
    let recorder = Arc::new(Recorder::default());
    let queue = queue_with(inline_processor(Arc::clone(&recorder)));
    let counter = Arc::new(AtomicUsize::new(0));

    let handle = queue
        .schedule_at_fixed_rate(ticks(&counter), Duration::ZERO, Duration::from_millis(100))
        .unwrap();

    tokio::time::sleep(Duration::from_millis(50)).await;
    queue.shutdown();
    tokio::time::sleep(Duration::from_millis(500)).await;

    assert_eq!(counter.load(Ordering::SeqCst), 1);
    assert!(handle.is_finished());
    assert!(matches!(
        queue.schedule_at_fixed_rate(ticks(&counter), Duration::ZERO, Duration::from_millis(100)),
        Err(QueueError::ShutDown(_))
    ));
}

#[test]
fn fixed_rate_needs_a_positive_interval_and_a_runtime() {
    let queue = queue_with(Held::default().processor());
    let counter = Arc::new(AtomicUsize::new(0));

    let zero = queue.schedule_at_fixed_rate(ticks(&counter), Duration::ZERO, Duration::ZERO);
    assert!(matches!(zero, Err(QueueError::InvalidSchedule(_))));

    let outside = queue.schedule_at_fixed_rate(
        ticks(&counter),
        Duration::ZERO,
        Duration::from_millis(100),
    );
    assert!(matches!(outside, Err(QueueError::NoRuntime(_))));
    assert_eq!(counter.load(Ordering::SeqCst), 0);
}

#[tokio::test(start_paused = true)]
async fn wait_idle_returns_immediately_when_empty() {
    let held = Held::default();
    let queue = queue_with(held.processor());
    tokio::time::timeout(Duration::from_millis(1), queue.wait_idle())
        .await
        .unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn random_workload_keeps_exclusion_and_finishes() {
    const KEYS: [&str; 6] = ["p1", "p2", "p3", "p4", "p5", "p6"];

    let recorder = Arc::new(Recorder::default());
    let queue = Arc::new(queue_with(sleeping_processor(
        Arc::clone(&recorder),
        Duration::from_millis(2),
    )));
    queue.start().unwrap();

    let mut submitters = Vec::new();
    for worker in 0..4 {
        let queue = Arc::clone(&queue);
        submitters.push(tokio::spawn(async move {
            for n in 0..25 {
                let (keys, delay) = {
                    let mut rng = rand::thread_rng();
                    let count = rng.gen_range(1..=3);
                    let keys: Vec<&'static str> = (0..count)
                        .map(|_| KEYS[rng.gen_range(0..KEYS.len())])
                        .collect();
                    (keys, Duration::from_millis(rng.gen_range(0..5)))
                };
                queue
                    .schedule(task(&format!("w{worker}-{n}"), &keys), delay)
                    .unwrap();
            }
        }));
    }
    for submitter in submitters {
        submitter.await.unwrap();
    }

    tokio::time::timeout(Duration::from_secs(30), queue.wait_idle())
        .await
        .unwrap();
    assert_eq!(queue.counts_by_state().completed, 100);
    assert_eq!(queue.counts_by_state().held_keys, 0);
    assert!(!recorder.saw_overlap());
}
