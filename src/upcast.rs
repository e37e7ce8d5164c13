//! Upcast pipeline: deterministic transformation of older event schema
//! versions into the current one, applied lazily as a stream is read.

use crate::domain::entities::Event;
use crate::error::{EventStoreError, Result};
use std::sync::Arc;

/// One step in the pipeline. `can_upcast` decides applicability; `upcast`
/// produces the replacement event(s) (1-to-N fan-out; never fewer than one).
pub trait Upcaster: Send + Sync {
    fn can_upcast(&self, event: &Event) -> bool;
    fn upcast(&self, event: &Event) -> Result<Vec<Event>>;
}

/// A function-backed upcaster for the common case of a pure 1-to-1 transform,
/// so callers don't need to hand-write a struct + impl for every schema bump.
pub struct FnUpcaster<F>
where
    F: Fn(&Event) -> bool + Send + Sync,
{
    matcher: F,
    transform: Box<dyn Fn(&Event) -> Result<Vec<Event>> + Send + Sync>,
}

impl<F> FnUpcaster<F>
where
    F: Fn(&Event) -> bool + Send + Sync,
{
    pub fn new(
        matcher: F,
        transform: impl Fn(&Event) -> Result<Vec<Event>> + Send + Sync + 'static,
    ) -> Self {
        Self {
            matcher,
            transform: Box::new(transform),
        }
    }
}

impl<F> Upcaster for FnUpcaster<F>
where
    F: Fn(&Event) -> bool + Send + Sync,
{
    fn can_upcast(&self, event: &Event) -> bool {
        (self.matcher)(event)
    }

    fn upcast(&self, event: &Event) -> Result<Vec<Event>> {
        (self.transform)(event)
    }
}

/// An ordered chain of upcasters, applied to a fixed point.
#[derive(Clone)]
pub struct UpcastPipeline {
    steps: Vec<Arc<dyn Upcaster>>,
}

impl UpcastPipeline {
    pub fn new() -> Self {
        Self { steps: Vec::new() }
    }

    pub fn push(&mut self, step: Arc<dyn Upcaster>) -> &mut Self {
        self.steps.push(step);
        self
    }

    /// Apply the pipeline to one event until no step matches any output
    /// (the fixed point). Each pass must strictly advance (schema_version,
    /// event_type) or the call fails with `UpcastNonTerminating` once the
    /// iteration bound is exceeded.
    pub fn apply(&self, event: Event) -> Result<Vec<Event>> {
        let bound = (self.steps.len() + 1) * 64;
        let mut frontier = vec![event];
        let mut settled = Vec::new();

        for _ in 0..bound {
            let mut next_frontier = Vec::new();
            let mut changed = false;

            for candidate in frontier {
                match self.first_match(&candidate) {
                    Some(step) => {
                        changed = true;
                        let outputs = step.upcast(&candidate)?;
                        if outputs.is_empty() {
                            return Err(EventStoreError::UpcastNonTerminating(
                                candidate.event_type_str().to_string(),
                            ));
                        }
                        next_frontier.extend(outputs);
                    }
                    None => settled.push(candidate),
                }
            }

            if !changed {
                return Ok(settled);
            }
            frontier = next_frontier;
        }

        Err(EventStoreError::UpcastNonTerminating(
            "pipeline exceeded iteration bound without converging".to_string(),
        ))
    }

    /// Apply the pipeline to a whole ordered batch, preserving relative order.
    pub fn apply_all(&self, events: Vec<Event>) -> Result<Vec<Event>> {
        let mut out = Vec::with_capacity(events.len());
        for event in events {
            out.extend(self.apply(event)?);
        }
        Ok(out)
    }

    fn first_match(&self, event: &Event) -> Option<&Arc<dyn Upcaster>> {
        self.steps.iter().find(|step| step.can_upcast(event))
    }
}

impl Default for UpcastPipeline {
    fn default() -> Self {
        Self::new()
    }
}
