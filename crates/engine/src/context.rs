//! Execution context: the per-run key/value store node outputs merge into.
//!
//! Writes lock one key at a time (the map is sharded), so nodes completing
//! concurrently only contend when they touch the same key. Reads copy the
//! requested values out and never hold a lock across an await point.
//!
//! Every key remembers which node wrote it and in which completion sequence.
//! Run inputs are kept apart from node outputs: root nodes always receive
//! the caller's inputs, and inputs never take part in merging. In the final
//! snapshot a node output shadows a run input of the same name.

use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use operators::Payload;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

use crate::MergePolicy;

/// Writer ID reported for run inputs in a snapshot.
pub const INPUT_WRITER: &str = "$input";

/// Who wrote a key, and when relative to other writes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Provenance {
    pub writer: String,
    pub sequence: u64,
}

#[derive(Debug, Clone)]
struct Slot {
    value: Value,
    provenance: Provenance,
}

/// A write refused by the merge policy.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MergeError {
    #[error("key '{key}' was already written by '{writer}'")]
    Collision { key: String, writer: String },
}

/// Frozen copy of a context, read by the aggregator at the end of a run.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ContextSnapshot {
    pub values: BTreeMap<String, Value>,
    pub provenance: BTreeMap<String, Provenance>,
}

impl ContextSnapshot {
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }
}

/// One run's accumulating result store.
#[derive(Debug)]
pub struct ExecutionContext {
    entries: DashMap<String, Slot>,
    produced: DashMap<String, Vec<String>>,
    inputs: Payload,
    sequence: AtomicU64,
    policy: MergePolicy,
}

impl ExecutionContext {
    pub fn new(policy: MergePolicy) -> Self {
        Self {
            entries: DashMap::new(),
            produced: DashMap::new(),
            inputs: Payload::new(),
            sequence: AtomicU64::new(0),
            policy,
        }
    }

    /// A context for a run started with `inputs`.
    pub fn seeded(policy: MergePolicy, inputs: Payload) -> Self {
        Self {
            inputs,
            ..Self::new(policy)
        }
    }

    /// The run inputs, exactly as the caller supplied them.
    pub fn inputs(&self) -> &Payload {
        &self.inputs
    }

    fn next_provenance(&self, writer: &str) -> Provenance {
        Provenance {
            writer: writer.to_owned(),
            sequence: self.sequence.fetch_add(1, Ordering::SeqCst) + 1,
        }
    }

    fn rank(&self, writer: &str) -> usize {
        match &self.policy {
            MergePolicy::Precedence { order } => {
                order.iter().position(|w| w == writer).unwrap_or(usize::MAX)
            }
            _ => usize::MAX,
        }
    }

    /// Merge `result` into the context on behalf of `node_id`.
    ///
    /// Under [`MergePolicy::FailOnCollision`] a refused write leaves none of
    /// `result` behind.
    pub fn write(&self, node_id: &str, result: Payload) -> Result<(), MergeError> {
        let keys: Vec<String> = result.keys().cloned().collect();
        let mut inserted: Vec<String> = Vec::with_capacity(keys.len());

        for (key, value) in result {
            let provenance = self.next_provenance(node_id);
            match self.entries.entry(key.clone()) {
                Entry::Vacant(slot) => {
                    slot.insert(Slot { value, provenance });
                    inserted.push(key);
                }
                Entry::Occupied(mut slot) => {
                    let existing = &slot.get().provenance.writer;
                    match &self.policy {
                        MergePolicy::LastWriterWins => {
                            slot.insert(Slot { value, provenance });
                        }
                        MergePolicy::Precedence { .. } => {
                            if self.rank(node_id) <= self.rank(existing) {
                                slot.insert(Slot { value, provenance });
                            }
                        }
                        MergePolicy::FailOnCollision => {
                            let writer = existing.clone();
                            drop(slot);
                            for key in &inserted {
                                self.entries.remove(key);
                            }
                            return Err(MergeError::Collision { key, writer });
                        }
                    }
                }
            }
        }

        self.produced.entry(node_id.to_owned()).or_default().extend(keys);
        Ok(())
    }

    /// Point-in-time copy of the requested keys; absent keys are left out.
    pub fn read_subset<'a, I>(&self, keys: I) -> Payload
    where
        I: IntoIterator<Item = &'a str>,
    {
        keys.into_iter()
            .filter_map(|key| {
                self.entries
                    .get(key)
                    .map(|slot| (key.to_owned(), slot.value.clone()))
            })
            .collect()
    }

    /// Keys `node_id` produced (whether or not it still owns them).
    pub fn keys_written_by(&self, node_id: &str) -> Vec<String> {
        self.produced
            .get(node_id)
            .map(|keys| keys.value().clone())
            .unwrap_or_default()
    }

    /// The input for a node with the given direct dependencies: the current
    /// values of every key those dependencies produced. Root nodes see the
    /// run inputs.
    pub fn input_for(&self, dependencies: &[String]) -> Payload {
        if dependencies.is_empty() {
            return self.inputs.clone();
        }

        let mut seen = HashSet::new();
        let keys: Vec<String> = dependencies
            .iter()
            .flat_map(|w| self.keys_written_by(w))
            .filter(|k| seen.insert(k.clone()))
            .collect();

        self.read_subset(keys.iter().map(String::as_str))
    }

    pub fn provenance(&self, key: &str) -> Option<Provenance> {
        self.entries.get(key).map(|slot| slot.provenance.clone())
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        self.entries.get(key).map(|slot| slot.value.clone())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Freeze the current contents. Run inputs appear with sequence 0 unless
    /// a node wrote the same key.
    pub fn snapshot(&self) -> ContextSnapshot {
        let mut snapshot = ContextSnapshot::default();
        for (key, value) in &self.inputs {
            snapshot.values.insert(key.clone(), value.clone());
            snapshot.provenance.insert(
                key.clone(),
                Provenance {
                    writer: INPUT_WRITER.to_owned(),
                    sequence: 0,
                },
            );
        }
        for entry in self.entries.iter() {
            snapshot.values.insert(entry.key().clone(), entry.value().value.clone());
            snapshot
                .provenance
                .insert(entry.key().clone(), entry.value().provenance.clone());
        }
        snapshot
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Arc;

    fn map(v: Value) -> Payload {
        v.as_object().cloned().unwrap()
    }

    #[test]
    fn last_writer_wins_by_completion_order() {
        let ctx = ExecutionContext::new(MergePolicy::LastWriterWins);
        ctx.write("classify", map(json!({ "tags": ["privileged"] }))).unwrap();
        ctx.write("extract", map(json!({ "tags": ["contract"] }))).unwrap();

        assert_eq!(ctx.get("tags"), Some(json!(["contract"])));
        assert_eq!(ctx.provenance("tags").unwrap().writer, "extract");
    }

    #[test]
    fn precedence_keeps_higher_ranked_writer() {
        let ctx = ExecutionContext::new(MergePolicy::Precedence {
            order: vec!["classify".into(), "extract".into()],
        });
        ctx.write("classify", map(json!({ "tags": ["privileged"] }))).unwrap();
        ctx.write("extract", map(json!({ "tags": ["contract"], "entities": [] })))
            .unwrap();
        ctx.write("unlisted", map(json!({ "entities": ["ACME"] }))).unwrap();

        assert_eq!(ctx.get("tags"), Some(json!(["privileged"])));
        assert_eq!(ctx.provenance("entities").unwrap().writer, "extract");
    }

    #[test]
    fn fail_on_collision_rolls_back_the_whole_write() {
        let ctx = ExecutionContext::new(MergePolicy::FailOnCollision);
        ctx.write("summarize", map(json!({ "summary": "a" }))).unwrap();

        let err = ctx
            .write("rewrite", map(json!({ "aaa_fresh": 1, "summary": "b" })))
            .unwrap_err();
        assert_eq!(
            err,
            MergeError::Collision { key: "summary".into(), writer: "summarize".into() }
        );
        assert_eq!(ctx.get("summary"), Some(json!("a")));
        assert_eq!(ctx.get("aaa_fresh"), None);
        assert!(ctx.keys_written_by("rewrite").is_empty());
    }

    #[test]
    fn input_for_is_restricted_to_dependency_keys() {
        let ctx = ExecutionContext::seeded(MergePolicy::default(), map(json!({ "text": "memo" })));
        ctx.write("summarize", map(json!({ "summary": "s" }))).unwrap();
        ctx.write("classify", map(json!({ "classification": {} }))).unwrap();

        assert_eq!(ctx.input_for(&[]), map(json!({ "text": "memo" })));
        assert_eq!(
            ctx.input_for(&["summarize".to_string()]),
            map(json!({ "summary": "s" }))
        );
    }

    #[test]
    fn node_outputs_never_replace_run_inputs_for_roots() {
        let ctx = ExecutionContext::seeded(
            MergePolicy::FailOnCollision,
            map(json!({ "text": "memo" })),
        );
        ctx.write("rewrite", map(json!({ "text": "REWRITTEN" }))).unwrap();

        assert_eq!(ctx.input_for(&[]), map(json!({ "text": "memo" })));
        assert_eq!(ctx.inputs(), &map(json!({ "text": "memo" })));
        assert_eq!(
            ctx.input_for(&["rewrite".to_string()]),
            map(json!({ "text": "REWRITTEN" }))
        );

        let snap = ctx.snapshot();
        assert_eq!(snap.get("text"), Some(&json!("REWRITTEN")));
        assert_eq!(snap.provenance["text"].writer, "rewrite");
    }

    #[test]
    fn snapshot_reports_untouched_inputs() {
        let ctx = ExecutionContext::seeded(
            MergePolicy::default(),
            map(json!({ "document_id": "doc-7" })),
        );
        let snap = ctx.snapshot();
        assert_eq!(snap.get("document_id"), Some(&json!("doc-7")));
        assert_eq!(
            snap.provenance["document_id"],
            Provenance { writer: INPUT_WRITER.into(), sequence: 0 }
        );
        assert!(ctx.is_empty());
    }

    #[test]
    fn snapshot_is_detached_from_later_writes() {
        let ctx = ExecutionContext::new(MergePolicy::default());
        ctx.write("a", map(json!({ "k": 1 }))).unwrap();
        let snap = ctx.snapshot();
        ctx.write("b", map(json!({ "k": 2 }))).unwrap();

        assert_eq!(snap.get("k"), Some(&json!(1)));
        assert_eq!(snap.provenance["k"].writer, "a");
    }

    #[test]
    fn concurrent_writers_to_distinct_keys() {
        let ctx = Arc::new(ExecutionContext::new(MergePolicy::FailOnCollision));
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let ctx = Arc::clone(&ctx);
                std::thread::spawn(move || {
                    let mut out = Payload::new();
                    out.insert(format!("key_{i}"), json!(i));
                    ctx.write(&format!("node_{i}"), out)
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap().unwrap();
        }
        assert_eq!(ctx.len(), 8);
        let mut sequences: Vec<u64> = (0..8)
            .map(|i| ctx.provenance(&format!("key_{i}")).unwrap().sequence)
            .collect();
        sequences.sort_unstable();
        sequences.dedup();
        assert_eq!(sequences.len(), 8);
    }
}
