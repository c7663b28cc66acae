//! A generic forward worklist fixed-point engine.
//!
//! Implementors describe a single analysis step (`entry_fact`,
//! `analyze_location`, `merge_facts`); the driver owns the worklist so that
//! both the bytecode-level `AbstractInterpreter` and any other dataflow
//! pass in this crate can reuse the same engine.

use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use thiserror::Error;

/// A cooperative cancellation token for long-running analyses.
///
/// The worklist driver polls this at each dequeue and, if set, discards
/// partial state and aborts with [`Cancellable::Cancelled`].
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    /// Creates a token that has not been cancelled.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests cancellation. Idempotent.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    /// Whether cancellation has been requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Wraps an analyzer's own error type with the driver-level cancellation
/// outcome, so `Analyzer::Err` need not know about cancellation at all.
#[derive(Debug, Error)]
pub enum Cancellable<E> {
    /// The analysis was cooperatively cancelled before reaching a fixed
    /// point; partial state has been discarded.
    #[error("analysis cancelled")]
    Cancelled,
    /// The analyzer itself failed.
    #[error(transparent)]
    Failed(#[from] E),
}

/// A generic forward dataflow analyzer driven to a fixed point by
/// [`Analyzer::analyze`].
///
/// Implementors describe one step of the analysis (`analyze_location`) and
/// how two facts merge (`merge_facts`); the driver owns the worklist,
/// entry-state seeding, and re-enqueue-on-change logic.
pub trait Analyzer {
    /// The location at which a fact is recorded — a program point (bci) for
    /// an instruction-level analysis, or a block-entry point for a
    /// block-level one.
    type Location: Ord + Copy;
    /// The abstract fact (frame, lattice value, ...) recorded per location.
    type Fact;
    /// The analyzer's own error type.
    type Err;
    /// The collection of `(successor_location, fact)` pairs produced by
    /// analyzing one location.
    type AffectedLocations: IntoIterator<Item = (Self::Location, Self::Fact)>;

    /// Produces the single entry location and its seed fact.
    fn entry_fact(&self) -> Result<(Self::Location, Self::Fact), Self::Err>;

    /// Analyzes one location given its currently-stored fact, returning the
    /// facts propagated to each successor location.
    fn analyze_location(
        &mut self,
        location: &Self::Location,
        fact: &Self::Fact,
    ) -> Result<Self::AffectedLocations, Self::Err>;

    /// Merges a newly-propagated fact into the fact already stored at a
    /// location.
    fn merge_facts(
        &self,
        current_fact: &Self::Fact,
        incoming_fact: Self::Fact,
    ) -> Result<Self::Fact, Self::Err>;

    /// Drives the analysis to a fixed point and returns the final
    /// per-location facts.
    ///
    /// # Errors
    /// Propagates any error from `entry_fact`, `analyze_location`, or
    /// `merge_facts`; a failure discards partial results (the engine
    /// returns before any caller sees a partial map).
    fn analyze(&mut self) -> Result<BTreeMap<Self::Location, Self::Fact>, Self::Err> {
        self.analyze_cancellable(&CancellationToken::new())
            .map_err(|e| match e {
                Cancellable::Cancelled => unreachable!("no cancellation requested"),
                Cancellable::Failed(e) => e,
            })
    }

    /// As [`Analyzer::analyze`], but cooperatively cancellable via `token`.
    ///
    /// # Errors
    /// As `analyze`, plus [`Cancellable::Cancelled`] if `token` is
    /// cancelled before the fixed point is reached.
    fn analyze_cancellable(
        &mut self,
        token: &CancellationToken,
    ) -> Result<BTreeMap<Self::Location, Self::Fact>, Cancellable<Self::Err>>
    where
        Self::Fact: Clone + PartialEq,
    {
        let mut facts: BTreeMap<Self::Location, Self::Fact> = BTreeMap::new();
        let mut queue: VecDeque<Self::Location> = VecDeque::new();
        let mut queued: std::collections::BTreeSet<Self::Location> = std::collections::BTreeSet::new();

        let (entry_loc, entry_fact) = self.entry_fact()?;
        facts.insert(entry_loc, entry_fact);
        queue.push_back(entry_loc);
        queued.insert(entry_loc);

        while let Some(location) = queue.pop_front() {
            if token.is_cancelled() {
                return Err(Cancellable::Cancelled);
            }
            queued.remove(&location);
            let fact = facts
                .get(&location)
                .expect("a queued location always has a stored fact")
                .clone();
            let affected = self.analyze_location(&location, &fact)?;
            for (succ_loc, succ_fact) in affected {
                let next_fact = match facts.get(&succ_loc) {
                    None => succ_fact,
                    Some(prior) => {
                        let merged = self.merge_facts(prior, succ_fact)?;
                        if &merged == prior {
                            // No change: skip re-enqueue.
                            continue;
                        }
                        merged
                    }
                };
                facts.insert(succ_loc, next_fact);
                if queued.insert(succ_loc) {
                    queue.push_back(succ_loc);
                }
            }
        }
        Ok(facts)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    /// A trivial analyzer over a two-node diamond-shaped graph whose fact
    /// is just an integer "visit count", used to exercise the engine's
    /// merge/re-enqueue logic independent of any bytecode semantics.
    struct DiamondAnalyzer {
        edges: BTreeMap<u32, Vec<u32>>,
    }

    impl Analyzer for DiamondAnalyzer {
        type Location = u32;
        type Fact = i32;
        type Err = std::convert::Infallible;
        type AffectedLocations = Vec<(u32, i32)>;

        fn entry_fact(&self) -> Result<(u32, i32), Self::Err> {
            Ok((0, 1))
        }

        fn analyze_location(
            &mut self,
            location: &u32,
            fact: &i32,
        ) -> Result<Self::AffectedLocations, Self::Err> {
            Ok(self
                .edges
                .get(location)
                .cloned()
                .unwrap_or_default()
                .into_iter()
                .map(|succ| (succ, *fact))
                .collect())
        }

        fn merge_facts(&self, current: &i32, incoming: i32) -> Result<i32, Self::Err> {
            Ok((*current).max(incoming))
        }
    }

    #[test]
    fn reaches_fixed_point_on_diamond() {
        let mut edges = BTreeMap::new();
        edges.insert(0, vec![1, 2]);
        edges.insert(1, vec![3]);
        edges.insert(2, vec![3]);
        let mut analyzer = DiamondAnalyzer { edges };
        let facts = analyzer.analyze().unwrap();
        assert_eq!(facts[&0], 1);
        assert_eq!(facts[&3], 1);
    }

    #[test]
    fn cancellation_aborts() {
        let mut edges = BTreeMap::new();
        edges.insert(0, vec![1]);
        edges.insert(1, vec![0]);
        let mut analyzer = DiamondAnalyzer { edges };
        let token = CancellationToken::new();
        token.cancel();
        let result = analyzer.analyze_cancellable(&token);
        assert!(matches!(result, Err(Cancellable::Cancelled)));
    }
}
