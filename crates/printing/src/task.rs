//! Task queues that stand in for the UI, I/O and printing worker threads.
//!
//! A [`TaskRunner`] is a cloneable handle to a FIFO queue of closures. The
//! thread that pumps it (via [`TaskRunner::run`], [`TaskRunner::run_until`]
//! or [`TaskRunner::run_until_idle`]) is the thread that owns the objects
//! whose callbacks are posted to it. Delayed tasks are kept in a min-heap and
//! become runnable once their deadline passes.

use std::cmp::Ordering as CmpOrdering;
use std::collections::BinaryHeap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, ThreadId};
use std::time::{Duration, Instant};

use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender, TryRecvError};
use tracing::trace;

/// Unit of work posted to a [`TaskRunner`].
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// Locks a mutex, recovering the data if a panicking thread poisoned it.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

enum Message {
    Run(Task),
    Wake,
    Quit,
}

struct DelayedTask {
    run_at: Instant,
    sequence: u64,
    task: Task,
}

impl PartialEq for DelayedTask {
    fn eq(&self, other: &Self) -> bool {
        self.run_at == other.run_at && self.sequence == other.sequence
    }
}

impl Eq for DelayedTask {}

impl PartialOrd for DelayedTask {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl Ord for DelayedTask {
    // Reversed so the BinaryHeap pops the earliest deadline first.
    fn cmp(&self, other: &Self) -> CmpOrdering {
        other
            .run_at
            .cmp(&self.run_at)
            .then_with(|| other.sequence.cmp(&self.sequence))
    }
}

struct RunnerInner {
    name: String,
    sender: Sender<Message>,
    receiver: Receiver<Message>,
    delayed: Mutex<BinaryHeap<DelayedTask>>,
    sequence: AtomicU64,
    bound_thread: Mutex<Option<ThreadId>>,
}

enum Step {
    Ran,
    Idle,
    Quit,
}

/// Cloneable handle to a single-threaded task queue.
#[derive(Clone)]
pub struct TaskRunner {
    inner: Arc<RunnerInner>,
}

impl fmt::Debug for TaskRunner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskRunner")
            .field("name", &self.inner.name)
            .finish()
    }
}

impl TaskRunner {
    /// Creates a queue that is bound to whichever thread pumps it first.
    pub fn new(name: impl Into<String>) -> Self {
        let (sender, receiver) = unbounded();
        Self {
            inner: Arc::new(RunnerInner {
                name: name.into(),
                sender,
                receiver,
                delayed: Mutex::new(BinaryHeap::new()),
                sequence: AtomicU64::new(0),
                bound_thread: Mutex::new(None),
            }),
        }
    }

    /// Creates a queue owned by the calling thread.
    pub fn for_current_thread(name: impl Into<String>) -> Self {
        let runner = Self::new(name);
        runner.bind_to_current_thread();
        runner
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Returns true when both handles point at the same queue.
    pub fn same_queue(&self, other: &TaskRunner) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    pub fn runs_tasks_on_current_thread(&self) -> bool {
        *lock(&self.inner.bound_thread) == Some(thread::current().id())
    }

    pub fn post_task<F>(&self, task: F) -> bool
    where
        F: FnOnce() + Send + 'static,
    {
        self.inner.sender.send(Message::Run(Box::new(task))).is_ok()
    }

    pub fn post_delayed_task<F>(&self, delay: Duration, task: F) -> bool
    where
        F: FnOnce() + Send + 'static,
    {
        if delay.is_zero() {
            return self.post_task(task);
        }
        let sequence = self.inner.sequence.fetch_add(1, Ordering::Relaxed);
        lock(&self.inner.delayed).push(DelayedTask {
            run_at: Instant::now() + delay,
            sequence,
            task: Box::new(task),
        });
        // Wakes a pump blocked on the channel so it recomputes its deadline.
        self.inner.sender.send(Message::Wake).is_ok()
    }

    /// Asks [`TaskRunner::run`] to return once the tasks queued so far ran.
    pub fn quit(&self) {
        let _ = self.inner.sender.send(Message::Quit);
    }

    /// Pumps the queue on the calling thread until [`TaskRunner::quit`].
    ///
    /// Tasks still queued when the loop exits are dropped.
    pub fn run(&self) {
        self.bind_to_current_thread();
        trace!(runner = %self.inner.name, "task runner started");
        loop {
            if let Step::Quit = self.step(None) {
                break;
            }
        }
        self.discard_pending();
        trace!(runner = %self.inner.name, "task runner stopped");
    }

    /// Runs every task that is ready right now and returns how many ran.
    pub fn run_until_idle(&self) -> usize {
        self.bind_if_unbound();
        let mut ran = 0;
        loop {
            if let Some(task) = self.take_due_task() {
                task();
                ran += 1;
                continue;
            }
            match self.inner.receiver.try_recv() {
                Ok(Message::Run(task)) => {
                    task();
                    ran += 1;
                }
                Ok(Message::Wake) => {}
                Ok(Message::Quit) => {
                    // Left for the enclosing `run`.
                    self.quit();
                    return ran;
                }
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => {
                    return ran;
                }
            }
        }
    }

    /// Pumps the queue until `condition` holds or `deadline` passes.
    ///
    /// Nested calls are allowed: a task run from here may pump again. Returns
    /// whether the condition was met.
    pub fn run_until<F>(&self, deadline: Instant, mut condition: F) -> bool
    where
        F: FnMut() -> bool,
    {
        self.bind_if_unbound();
        loop {
            if condition() {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            if let Step::Quit = self.step(Some(deadline)) {
                // Left for the enclosing `run`.
                self.quit();
                return condition();
            }
        }
    }

    /// Pumps the queue until `completion` fires or `deadline` passes.
    pub fn wait_for(&self, completion: &Completion, deadline: Instant) -> bool {
        self.run_until(deadline, || completion.is_complete())
    }

    fn step(&self, deadline: Option<Instant>) -> Step {
        if let Some(task) = self.take_due_task() {
            task();
            return Step::Ran;
        }

        let wake_at = match (self.next_delayed_at(), deadline) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        };
        let message = match wake_at {
            Some(at) => match self.inner.receiver.recv_deadline(at) {
                Ok(message) => message,
                Err(RecvTimeoutError::Timeout) => return Step::Idle,
                Err(RecvTimeoutError::Disconnected) => return Step::Quit,
            },
            None => match self.inner.receiver.recv() {
                Ok(message) => message,
                Err(_) => return Step::Quit,
            },
        };

        match message {
            Message::Run(task) => {
                task();
                Step::Ran
            }
            Message::Wake => Step::Idle,
            Message::Quit => Step::Quit,
        }
    }

    fn take_due_task(&self) -> Option<Task> {
        let mut delayed = lock(&self.inner.delayed);
        let due = delayed
            .peek()
            .is_some_and(|next| next.run_at <= Instant::now());
        if due {
            delayed.pop().map(|entry| entry.task)
        } else {
            None
        }
    }

    fn next_delayed_at(&self) -> Option<Instant> {
        lock(&self.inner.delayed).peek().map(|entry| entry.run_at)
    }

    fn discard_pending(&self) {
        let queued: Vec<Message> = self.inner.receiver.try_iter().collect();
        let delayed = std::mem::take(&mut *lock(&self.inner.delayed));
        if !queued.is_empty() || !delayed.is_empty() {
            trace!(
                runner = %self.inner.name,
                queued = queued.len(),
                delayed = delayed.len(),
                "dropping tasks left on a stopped runner"
            );
        }
        drop(queued);
        drop(delayed);
    }

    fn bind_to_current_thread(&self) {
        *lock(&self.inner.bound_thread) = Some(thread::current().id());
    }

    fn bind_if_unbound(&self) {
        let mut bound = lock(&self.inner.bound_thread);
        if bound.is_none() {
            *bound = Some(thread::current().id());
        }
    }
}

/// One-shot signal used to bound a synchronous wait on a [`TaskRunner`].
#[derive(Debug, Clone, Default)]
pub struct Completion {
    done: Arc<AtomicBool>,
}

impl Completion {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn complete(&self) {
        self.done.store(true, Ordering::SeqCst);
    }

    pub fn is_complete(&self) -> bool {
        self.done.load(Ordering::SeqCst)
    }

    /// True when both handles refer to the same signal.
    pub fn same_as(&self, other: &Completion) -> bool {
        Arc::ptr_eq(&self.done, &other.done)
    }
}

/// The long-lived runners of the embedding application.
///
/// `ui` owns print jobs, the job-event bus and dialogs; `io` owns printer
/// queries while their settings resolve. Both may be the same queue.
#[derive(Debug, Clone)]
pub struct PrintThreads {
    pub ui: TaskRunner,
    pub io: TaskRunner,
}

impl PrintThreads {
    pub fn new(ui: TaskRunner, io: TaskRunner) -> Self {
        Self { ui, io }
    }

    /// Uses one queue for both roles.
    pub fn single(runner: TaskRunner) -> Self {
        Self {
            ui: runner.clone(),
            io: runner,
        }
    }
}
