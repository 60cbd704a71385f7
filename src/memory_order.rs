//! The memory-order oracle: which write does a given read observe?
//!
//! Memory-SSA construction itself happens outside this crate. The inference
//! core only ever asks one question, at each load: "which memory-writing
//! operation defines the bytes this load reads?" The answer feeds the
//! load/store unification of
//! [`InferenceContext`](crate::inference_context::InferenceContext).

use crate::containers::unordered::UnorderedMap;
use crate::il::ValueId;

/// The defining access for a memory read.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum DefiningAccess {
    /// The unique store whose written bytes the read observes.
    Store(ValueId),
    /// A call clobbers memory between the read and any earlier store.
    Call(ValueId),
    /// The memory is live on entry to the function.
    LiveOnEntry,
}

/// Answers defining-access queries for the loads of one function.
pub trait MemoryOracle {
    fn defining_access(&self, load: ValueId) -> DefiningAccess;
}

/// An oracle that knows nothing: every load observes function-entry memory.
#[derive(Default)]
pub struct LiveOnEntryOracle;

impl MemoryOracle for LiveOnEntryOracle {
    fn defining_access(&self, _load: ValueId) -> DefiningAccess {
        DefiningAccess::LiveOnEntry
    }
}

/// An oracle backed by a precomputed map, for embedders that run their own
/// memory-SSA pass (and for tests).
#[derive(Default)]
pub struct RecordedOracle {
    accesses: UnorderedMap<ValueId, DefiningAccess>,
}

impl RecordedOracle {
    pub fn new() -> Self {
        Self {
            accesses: UnorderedMap::new(),
        }
    }

    /// Record the defining access for `load`.
    pub fn record(&mut self, load: ValueId, access: DefiningAccess) {
        self.accesses.insert(load, access);
    }
}

impl MemoryOracle for RecordedOracle {
    fn defining_access(&self, load: ValueId) -> DefiningAccess {
        self.accesses
            .get(&load)
            .copied()
            .unwrap_or(DefiningAccess::LiveOnEntry)
    }
}
