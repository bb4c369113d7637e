//! Bounded-concurrency batch execution.
//!
//! Every step fans its AI calls out through [`TaskRunner::run_all`]. At most
//! `concurrency` tasks are in flight; results come back in input order no
//! matter which task finished first, so artifacts written afterwards are
//! deterministic.
//!
//! The batch is all-or-nothing. The first failure (by completion time) stops
//! dispatch of tasks that have not started, drops the in-flight ones, and
//! fails the batch with [`PipelineError::PartialBatchFailure`]. Callers write
//! nothing until `run_all` has returned `Ok`.

use crate::error::{PipelineError, Result};
use futures::stream::{self, StreamExt};
use std::future::Future;

#[derive(Debug, Clone, Copy)]
pub struct TaskRunner {
    concurrency: usize,
}

impl TaskRunner {
    pub fn new(concurrency: usize) -> Self {
        Self {
            concurrency: concurrency.max(1),
        }
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// Run `work` over every input and return the results in input order.
    pub async fn run_all<I, T, F, Fut>(&self, inputs: Vec<I>, work: F) -> Result<Vec<T>>
    where
        F: Fn(usize, I) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.run_with_progress(inputs, work, |_, _| {}).await
    }

    /// Like [`Self::run_all`], calling `on_progress(completed, total)` after
    /// each task succeeds.
    pub async fn run_with_progress<I, T, F, Fut, P>(
        &self,
        inputs: Vec<I>,
        work: F,
        on_progress: P,
    ) -> Result<Vec<T>>
    where
        F: Fn(usize, I) -> Fut,
        Fut: Future<Output = Result<T>>,
        P: Fn(usize, usize),
    {
        let total = inputs.len();
        let mut slots: Vec<Option<T>> = (0..total).map(|_| None).collect();

        // `map` is lazy: `work` is only invoked when buffer_unordered has a
        // free slot, so nothing starts after the stream is dropped.
        let mut in_flight = stream::iter(inputs.into_iter().enumerate().map(|(index, input)| {
            let task = work(index, input);
            async move { (index, task.await) }
        }))
        .buffer_unordered(self.concurrency);

        let mut completed = 0;
        while let Some((index, result)) = in_flight.next().await {
            match result {
                Ok(value) => {
                    slots[index] = Some(value);
                    completed += 1;
                    on_progress(completed, total);
                }
                Err(source) => {
                    return Err(PipelineError::PartialBatchFailure {
                        index,
                        total,
                        source: Box::new(source),
                    });
                }
            }
        }

        slots
            .into_iter()
            .enumerate()
            .map(|(i, slot)| {
                slot.ok_or_else(|| PipelineError::Internal(format!("task {i} produced no result")))
            })
            .collect()
    }
}
