use crate::velostate::processing::GroupedBatch;
use std::collections::HashMap;
use std::hash::Hash;

/// Outcome of processing one key: its new state (or deletion) and derived outputs.
#[derive(Debug, Clone, PartialEq)]
pub struct StateUpdate<S, O> {
    /// `None` deletes the key's state
    pub state: Option<S>,
    pub outputs: Vec<O>,
}

impl<S, O> StateUpdate<S, O> {
    pub fn set(state: S) -> Self {
        Self {
            state: Some(state),
            outputs: Vec::new(),
        }
    }

    pub fn delete() -> Self {
        Self {
            state: None,
            outputs: Vec::new(),
        }
    }

    pub fn with_output(mut self, output: O) -> Self {
        self.outputs.push(output);
        self
    }

    pub fn with_outputs(mut self, outputs: impl IntoIterator<Item = O>) -> Self {
        self.outputs.extend(outputs);
        self
    }
}

/// Everything one emit writes for a batch: per-key state, outputs and the commit offset.
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessedBatch<K, S, O>
where
    K: Eq + Hash,
{
    /// New state per key; `None` writes a tombstone
    pub states: HashMap<K, Option<S>>,
    pub outputs: Vec<O>,
    /// Offset of the last input record of the batch
    pub commit_offset: i64,
}

impl<K, S, O> ProcessedBatch<K, S, O>
where
    K: Eq + Hash,
{
    pub fn new(commit_offset: i64) -> Self {
        Self {
            states: HashMap::new(),
            outputs: Vec::new(),
            commit_offset,
        }
    }

    pub fn with_state(mut self, key: K, state: S) -> Self {
        self.states.insert(key, Some(state));
        self
    }

    pub fn with_deletion(mut self, key: K) -> Self {
        self.states.insert(key, None);
        self
    }

    pub fn with_output(mut self, output: O) -> Self {
        self.outputs.push(output);
        self
    }
}

impl<K, S, O> GroupedBatch<K, StateUpdate<S, O>>
where
    K: Eq + Hash,
{
    /// Split per-key updates into the state map and a flat list of outputs.
    ///
    /// Outputs of one key keep their order; the order across keys is unspecified.
    pub fn into_processed(self) -> ProcessedBatch<K, S, O> {
        let mut states = HashMap::with_capacity(self.results.len());
        let mut outputs = Vec::new();
        for (key, update) in self.results {
            states.insert(key, update.state);
            outputs.extend(update.outputs);
        }
        ProcessedBatch {
            states,
            outputs,
            commit_offset: self.commit_offset,
        }
    }
}
