//! Job-event notifications.
//!
//! A print job broadcasts its lifecycle through a [`JobEventBus`] that lives
//! on the UI runner. Observers register with a scope (one job or all jobs)
//! and hold a [`Subscription`] that unregisters them when dropped.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard, Weak};

use tracing::trace;

use crate::document::{PrintedDocument, PrintedPage};
use crate::print_job::{PrintJob, PrintJobId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobEventKind {
    /// Settings were chosen by the user.
    UserInitDone,
    UserInitCanceled,
    DefaultInitDone,
    /// The worker started spooling a document.
    NewDoc,
    NewPage,
    PageDone,
    DocDone,
    /// The job finished and released its worker.
    JobDone,
    AllPagesRequested,
    Failed,
}

impl fmt::Display for JobEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            JobEventKind::UserInitDone => "USER_INIT_DONE",
            JobEventKind::UserInitCanceled => "USER_INIT_CANCELED",
            JobEventKind::DefaultInitDone => "DEFAULT_INIT_DONE",
            JobEventKind::NewDoc => "NEW_DOC",
            JobEventKind::NewPage => "NEW_PAGE",
            JobEventKind::PageDone => "PAGE_DONE",
            JobEventKind::DocDone => "DOC_DONE",
            JobEventKind::JobDone => "JOB_DONE",
            JobEventKind::AllPagesRequested => "ALL_PAGES_REQUESTED",
            JobEventKind::Failed => "FAILED",
        };
        f.write_str(name)
    }
}

/// Payload of one job event. Document and page are shared, never copied.
#[derive(Clone)]
pub struct JobEventDetails {
    kind: JobEventKind,
    document: Option<Arc<PrintedDocument>>,
    page: Option<Arc<PrintedPage>>,
}

impl fmt::Debug for JobEventDetails {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobEventDetails")
            .field("kind", &self.kind)
            .field("cookie", &self.document.as_ref().map(|d| d.cookie()))
            .field("page", &self.page_number())
            .finish()
    }
}

impl JobEventDetails {
    pub fn new(
        kind: JobEventKind,
        document: Option<Arc<PrintedDocument>>,
        page: Option<Arc<PrintedPage>>,
    ) -> Self {
        Self {
            kind,
            document,
            page,
        }
    }

    pub fn kind(&self) -> JobEventKind {
        self.kind
    }

    pub fn document(&self) -> Option<&Arc<PrintedDocument>> {
        self.document.as_ref()
    }

    pub fn page(&self) -> Option<&Arc<PrintedPage>> {
        self.page.as_ref()
    }

    pub fn page_number(&self) -> Option<u32> {
        self.page.as_ref().map(|page| page.page_number())
    }
}

/// Receives job events on the UI runner.
pub trait JobEventObserver: Send + Sync {
    fn on_job_event(&self, job: &Arc<PrintJob>, details: &JobEventDetails);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventScope {
    AllJobs,
    Job(PrintJobId),
}

impl EventScope {
    fn matches(self, job: PrintJobId) -> bool {
        match self {
            EventScope::AllJobs => true,
            EventScope::Job(id) => id == job,
        }
    }
}

struct Registration {
    id: u64,
    scope: EventScope,
    observer: Weak<dyn JobEventObserver>,
}

/// Typed publish/subscribe channel for job events.
pub struct JobEventBus {
    next_id: AtomicU64,
    registrations: RwLock<Vec<Registration>>,
}

impl fmt::Debug for JobEventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobEventBus")
            .field("observers", &self.observer_count())
            .finish()
    }
}

impl JobEventBus {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            next_id: AtomicU64::new(1),
            registrations: RwLock::new(Vec::new()),
        })
    }

    pub fn subscribe(
        self: &Arc<Self>,
        scope: EventScope,
        observer: Weak<dyn JobEventObserver>,
    ) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.write().push(Registration {
            id,
            scope,
            observer,
        });
        trace!(subscription = id, ?scope, "job event observer registered");
        Subscription {
            id,
            bus: Arc::downgrade(self),
        }
    }

    /// Delivers `details` synchronously to every live observer in scope.
    ///
    /// Observers may subscribe or unsubscribe while being notified; one that
    /// unsubscribes before its turn is skipped.
    pub fn notify(&self, job: &Arc<PrintJob>, details: JobEventDetails) {
        let targets: Vec<(u64, Weak<dyn JobEventObserver>)> = self
            .read()
            .iter()
            .filter(|registration| registration.scope.matches(job.id()))
            .map(|registration| (registration.id, registration.observer.clone()))
            .collect();

        trace!(job = %job.id(), event = %details.kind(), observers = targets.len(), "job event");

        let mut dead = Vec::new();
        for (id, observer) in targets {
            if !self.is_registered(id) {
                continue;
            }
            match observer.upgrade() {
                Some(observer) => observer.on_job_event(job, &details),
                None => dead.push(id),
            }
        }

        if !dead.is_empty() {
            trace!(count = dead.len(), "removing dropped job event observers");
            self.write().retain(|registration| !dead.contains(&registration.id));
        }
    }

    pub fn observer_count(&self) -> usize {
        self.read().len()
    }

    fn is_registered(&self, id: u64) -> bool {
        self.read().iter().any(|registration| registration.id == id)
    }

    fn unsubscribe(&self, id: u64) {
        self.write().retain(|registration| registration.id != id);
        trace!(subscription = id, "job event observer unregistered");
    }

    fn read(&self) -> RwLockReadGuard<'_, Vec<Registration>> {
        self.registrations.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Vec<Registration>> {
        self.registrations.write().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Keeps an observer registered; dropping it unregisters.
#[must_use = "dropping a Subscription unregisters the observer"]
pub struct Subscription {
    id: u64,
    bus: Weak<JobEventBus>,
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription").field("id", &self.id).finish()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(bus) = self.bus.upgrade() {
            bus.unsubscribe(self.id);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::config::PipelineConfig;
    use crate::task::TaskRunner;

    #[derive(Default)]
    struct Recorder {
        seen: Mutex<Vec<(PrintJobId, JobEventKind)>>,
    }

    impl JobEventObserver for Recorder {
        fn on_job_event(&self, job: &Arc<PrintJob>, details: &JobEventDetails) {
            self.seen
                .lock()
                .expect("lock poisoned")
                .push((job.id(), details.kind()));
        }
    }

    fn job(bus: &Arc<JobEventBus>) -> Arc<PrintJob> {
        let runner = TaskRunner::for_current_thread("ui");
        PrintJob::new(runner, bus.clone(), PipelineConfig::default().shutdown_policy())
    }

    #[test]
    fn scoped_observer_only_sees_its_job() {
        let bus = JobEventBus::new();
        let first = job(&bus);
        let second = job(&bus);

        let all = Arc::new(Recorder::default());
        let only_first = Arc::new(Recorder::default());
        let all_weak: Weak<dyn JobEventObserver> = Arc::downgrade(&all) as Weak<dyn JobEventObserver>;
        let first_weak: Weak<dyn JobEventObserver> =
            Arc::downgrade(&only_first) as Weak<dyn JobEventObserver>;
        let _all = bus.subscribe(EventScope::AllJobs, all_weak);
        let _first = bus.subscribe(EventScope::Job(first.id()), first_weak);

        bus.notify(&first, JobEventDetails::new(JobEventKind::NewDoc, None, None));
        bus.notify(&second, JobEventDetails::new(JobEventKind::JobDone, None, None));

        assert_eq!(
            *all.seen.lock().unwrap(),
            vec![(first.id(), JobEventKind::NewDoc), (second.id(), JobEventKind::JobDone)]
        );
        assert_eq!(
            *only_first.seen.lock().unwrap(),
            vec![(first.id(), JobEventKind::NewDoc)]
        );
    }

    #[test]
    fn dropping_subscription_unregisters() {
        let bus = JobEventBus::new();
        let source = job(&bus);
        let recorder = Arc::new(Recorder::default());
        let weak: Weak<dyn JobEventObserver> = Arc::downgrade(&recorder) as Weak<dyn JobEventObserver>;
        let subscription = bus.subscribe(EventScope::AllJobs, weak);
        assert_eq!(bus.observer_count(), 1);

        drop(subscription);
        bus.notify(&source, JobEventDetails::new(JobEventKind::Failed, None, None));

        assert_eq!(bus.observer_count(), 0);
        assert!(recorder.seen.lock().unwrap().is_empty());
    }

    #[test]
    fn dead_observers_are_pruned_on_notify() {
        let bus = JobEventBus::new();
        let source = job(&bus);
        let recorder = Arc::new(Recorder::default());
        let weak: Weak<dyn JobEventObserver> = Arc::downgrade(&recorder) as Weak<dyn JobEventObserver>;
        let subscription = bus.subscribe(EventScope::AllJobs, weak);
        drop(recorder);

        bus.notify(&source, JobEventDetails::new(JobEventKind::NewDoc, None, None));

        assert_eq!(bus.observer_count(), 0);
        drop(subscription);
    }

    #[test]
    fn kinds_display_as_wire_names() {
        assert_eq!(JobEventKind::AllPagesRequested.to_string(), "ALL_PAGES_REQUESTED");
        assert_eq!(JobEventKind::NewDoc.to_string(), "NEW_DOC");
    }
}
