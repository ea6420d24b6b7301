//! Async driver around [`ChartController`].
//!
//! Fetch cycles run as tokio tasks in a [`JoinSet`]. Completions are applied
//! one at a time on the owner's task, so the controller itself never needs a
//! lock. A cycle whose task panics completes as a failed fetch.

use super::{ChartController, FetchOutcome, FetchTicket, Section};
use crate::models::{MetricKey, ProductMetricsBundle, TimeRange};
use crate::pipeline::{fetch_bundle, FetchError};
use crate::source::MetricsSource;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::{Id, JoinSet};
use tokio::time::{sleep, Instant};
use tracing::{debug, error};

type Completion = (FetchTicket, Result<ProductMetricsBundle, FetchError>);

pub struct ChartSession<S: MetricsSource + 'static> {
    source: Arc<S>,
    controller: ChartController,
    min_transition: Duration,
    tasks: JoinSet<Completion>,
    tickets: HashMap<Id, FetchTicket>,
}

impl<S: MetricsSource + 'static> ChartSession<S> {
    pub fn new(source: Arc<S>, controller: ChartController) -> Self {
        Self {
            source,
            controller,
            min_transition: Duration::ZERO,
            tasks: JoinSet::new(),
            tickets: HashMap::new(),
        }
    }

    /// Hold each completion back until at least `min` has passed since
    /// dispatch, so fast responses do not flicker the loading state.
    pub fn with_min_transition(mut self, min: Duration) -> Self {
        self.min_transition = min;
        self
    }

    pub fn controller(&self) -> &ChartController {
        &self.controller
    }

    pub fn in_flight(&self) -> usize {
        self.tasks.len()
    }

    pub fn load(&mut self) -> FetchTicket {
        let ticket = self.controller.load();
        self.dispatch(ticket.clone());
        ticket
    }

    pub fn set_time_range(&mut self, range: TimeRange) -> FetchTicket {
        let ticket = self.controller.set_time_range(range);
        self.dispatch(ticket.clone());
        ticket
    }

    pub fn refresh(&mut self) -> FetchTicket {
        let ticket = self.controller.refresh();
        self.dispatch(ticket.clone());
        ticket
    }

    pub fn toggle_metric_visibility(&mut self, key: &MetricKey) -> bool {
        self.controller.toggle_metric_visibility(key)
    }

    pub fn toggle_close_up(&mut self, section: Section) -> bool {
        self.controller.toggle_close_up(section)
    }

    fn dispatch(&mut self, ticket: FetchTicket) {
        let source = Arc::clone(&self.source);
        let min_transition = self.min_transition;
        let task_ticket = ticket.clone();

        let handle = self.tasks.spawn(async move {
            let started = Instant::now();
            let result = fetch_bundle(source.as_ref(), &task_ticket.key).await;

            let elapsed = started.elapsed();
            if elapsed < min_transition {
                sleep(min_transition - elapsed).await;
            }
            (task_ticket, result)
        });

        self.tickets.insert(handle.id(), ticket);
    }

    /// Wait for the next fetch cycle to finish and apply it.
    /// `None` when nothing is in flight.
    pub async fn next_completion(&mut self) -> Option<FetchOutcome> {
        loop {
            let (ticket, result) = match self.tasks.join_next_with_id().await? {
                Ok((id, completion)) => {
                    self.tickets.remove(&id);
                    completion
                }
                Err(e) => {
                    let Some(ticket) = self.tickets.remove(&e.id()) else {
                        error!("untracked fetch task failed: {}", e);
                        continue;
                    };
                    error!("Task panic for cycle {} ({}): {}", ticket.generation, ticket.key, e);
                    let result = Err(FetchError::Aborted {
                        key: ticket.key.clone(),
                        message: e.to_string(),
                    });
                    (ticket, result)
                }
            };

            let generation = ticket.generation;
            let outcome = self.controller.complete_fetch(ticket, result);
            debug!("cycle {} completed: {:?}", generation, outcome);
            return Some(outcome);
        }
    }

    /// Drain every in-flight cycle.
    pub async fn settle(&mut self) {
        while self.next_completion().await.is_some() {}
    }
}
