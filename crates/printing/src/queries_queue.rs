use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tracing::{debug, warn};

use crate::config::PipelineConfig;
use crate::context::{PrintingContextFactory, RenderTarget};
use crate::printer_query::PrinterQuery;
use crate::settings::DocumentCookie;
use crate::task::{lock, PrintThreads};

/// Alternative output target (for example "Save as PDF") applied to every
/// query the queue creates. While one is set the system dialog is skipped.
pub trait PrintDestination: Send + Sync + fmt::Debug {
    fn name(&self) -> &str;
}

#[derive(Default)]
struct QueueState {
    queries: Vec<Arc<PrinterQuery>>,
    destination: Option<Arc<dyn PrintDestination>>,
    is_shut_down: bool,
}

/// Settled printer queries waiting for the renderer to start printing.
///
/// Safe to use from any thread.
pub struct PrintQueriesQueue {
    threads: PrintThreads,
    context_factory: Arc<dyn PrintingContextFactory>,
    page_poll_interval: Duration,
    state: Mutex<QueueState>,
}

impl fmt::Debug for PrintQueriesQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = lock(&self.state);
        f.debug_struct("PrintQueriesQueue")
            .field("queued", &state.queries.len())
            .field("destination", &state.destination)
            .field("is_shut_down", &state.is_shut_down)
            .finish()
    }
}

impl PrintQueriesQueue {
    pub fn new(
        threads: PrintThreads,
        context_factory: Arc<dyn PrintingContextFactory>,
        config: &PipelineConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            threads,
            context_factory,
            page_poll_interval: config.page_poll_interval(),
            state: Mutex::new(QueueState::default()),
        })
    }

    /// Parks a settled query until [`PrintQueriesQueue::pop_printer_query`].
    pub fn queue_printer_query(&self, query: Arc<PrinterQuery>) {
        debug_assert!(query.is_valid(), "queued query has no worker");
        let rejected = {
            let mut state = lock(&self.state);
            if state.is_shut_down {
                Some(query)
            } else {
                debug!(cookie = %query.cookie(), "printer query queued");
                state.queries.push(query);
                None
            }
        };
        if let Some(query) = rejected {
            warn!(cookie = %query.cookie(), "queue is shut down, dropping printer query");
            query.stop_worker();
        }
    }

    /// Removes and returns the settled query holding `cookie`.
    ///
    /// Queries whose settings callback is still pending are never returned.
    pub fn pop_printer_query(&self, cookie: DocumentCookie) -> Option<Arc<PrinterQuery>> {
        if !cookie.is_valid() {
            return None;
        }
        let mut state = lock(&self.state);
        let index = state
            .queries
            .iter()
            .position(|query| query.cookie() == cookie && !query.is_callback_pending())?;
        Some(state.queries.remove(index))
    }

    /// Builds a fresh query for the frame, carrying the current destination.
    pub fn create_printer_query(&self, target: RenderTarget) -> Arc<PrinterQuery> {
        let context = self.context_factory.create_context(target);
        let query = PrinterQuery::new(&self.threads, target, context, self.page_poll_interval);
        let destination = lock(&self.state).destination.clone();
        query.set_destination(destination);
        query
    }

    pub fn set_destination(&self, destination: Option<Arc<dyn PrintDestination>>) {
        lock(&self.state).destination = destination;
    }

    pub fn destination(&self) -> Option<Arc<dyn PrintDestination>> {
        lock(&self.state).destination.clone()
    }

    pub fn len(&self) -> usize {
        lock(&self.state).queries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drops every queued query and the destination. Later queries are
    /// refused.
    pub fn shutdown(&self) {
        let queries = {
            let mut state = lock(&self.state);
            state.is_shut_down = true;
            state.destination = None;
            std::mem::take(&mut state.queries)
        };
        debug!(count = queries.len(), "shutting down printer query queue");
        // Dropped outside the lock; each query stops its worker on drop.
        drop(queries);
    }
}
