//! Property-based test generators using proptest.
//!
//! Provides strategies for generating records and journal operation
//! sequences, plus a reference model the journal is checked against.

use brokerlog_core::{Journal, JournalError, Record, RecordKind};
use proptest::prelude::*;
use std::collections::BTreeMap;

/// Strategy for generating valid record ids.
pub fn record_id_strategy(max_id: i64) -> impl Strategy<Value = i64> {
    0..max_id
}

/// Strategy for generating record bodies.
pub fn body_strategy(max_len: usize) -> impl Strategy<Value = Vec<u8>> {
    prop::collection::vec(any::<u8>(), 0..max_len)
}

/// Strategy for generating records, some of them transactional.
pub fn record_strategy(max_id: i64, max_len: usize) -> impl Strategy<Value = Record> {
    (
        record_id_strategy(max_id),
        any::<u8>(),
        body_strategy(max_len),
        prop::option::of(any::<i64>()),
    )
        .prop_map(|(id, record_type, body, tx_id)| {
            let record = Record::new(id, record_type, body);
            match tx_id {
                Some(tx_id) => record.with_tx(tx_id),
                None => record,
            }
        })
}

/// One operation against a journal.
#[derive(Debug, Clone)]
pub enum JournalOp {
    /// Append an add record.
    Add(Record),
    /// Append an update record.
    Update(Record),
    /// Append a delete record.
    Delete(i64),
    /// Compact the closed files.
    Compact,
}

/// Strategy for generating operation sequences over ids `0..max_id`.
///
/// Updates and deletes may name ids that are not live; the journal must
/// reject those without changing state.
pub fn journal_ops_strategy(
    max_id: i64,
    max_body: usize,
    len: usize,
) -> impl Strategy<Value = Vec<JournalOp>> {
    let op = prop_oneof![
        5 => record_strategy(max_id, max_body).prop_map(JournalOp::Add),
        2 => record_strategy(max_id, max_body).prop_map(JournalOp::Update),
        3 => record_id_strategy(max_id).prop_map(JournalOp::Delete),
        1 => Just(JournalOp::Compact),
    ];
    prop::collection::vec(op, 1..len)
}

/// Reference model: live id to latest body.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct JournalModel {
    /// Live records by id.
    pub live: BTreeMap<i64, Vec<u8>>,
}

impl JournalModel {
    /// Applies `op` to the model and the journal and checks that both agree
    /// on whether it was accepted.
    pub fn apply(&mut self, journal: &Journal, op: &JournalOp) {
        match op {
            JournalOp::Add(record) => {
                journal
                    .append_add(record.clone())
                    .expect("Add must succeed");
                self.live.insert(record.id, record.body.to_vec());
            }
            JournalOp::Update(record) => {
                let result = journal.append_update(record.clone());
                if self.live.contains_key(&record.id) {
                    result.expect("Update of a live id must succeed");
                    self.live.insert(record.id, record.body.to_vec());
                } else {
                    assert!(matches!(result, Err(JournalError::RecordNotFound { .. })));
                }
            }
            JournalOp::Delete(id) => {
                let result = journal.append_delete(*id);
                if self.live.remove(id).is_some() {
                    result.expect("Delete of a live id must succeed");
                } else {
                    assert!(matches!(result, Err(JournalError::RecordNotFound { .. })));
                }
            }
            JournalOp::Compact => {
                journal.compact().expect("Compaction must succeed");
            }
        }
    }

    /// Rebuilds the latest body of every live record by replaying the
    /// journal's files.
    pub fn replay(journal: &Journal) -> BTreeMap<i64, Vec<u8>> {
        let mut live = BTreeMap::new();
        for info in journal.read_all().expect("Failed to read journal") {
            match info.kind {
                RecordKind::Add | RecordKind::Update => {
                    live.insert(info.id(), info.record.body.to_vec());
                }
                RecordKind::Delete => {
                    live.remove(&info.id());
                }
            }
        }
        live
    }

    /// Asserts that the journal's live state matches the model.
    pub fn verify(&self, journal: &Journal) {
        assert_eq!(journal.live_records(), self.live.len());
        for id in self.live.keys() {
            assert!(journal.contains(*id), "id {id} should be live");
        }
        assert_eq!(Self::replay(journal), self.live);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::TestJournal;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]

        #[test]
        fn test_journal_matches_model(ops in journal_ops_strategy(40, 120, 200)) {
            let test_journal = TestJournal::memory();
            let mut model = JournalModel::default();

            for op in &ops {
                model.apply(&test_journal, op);
            }
            model.verify(&test_journal);

            let test_journal = test_journal.reopen();
            model.verify(&test_journal);
        }

        #[test]
        fn test_compaction_preserves_live_state(ops in journal_ops_strategy(30, 80, 150)) {
            let test_journal = TestJournal::memory();
            let mut model = JournalModel::default();
            for op in &ops {
                model.apply(&test_journal, op);
            }

            let result = test_journal.compact().unwrap();
            prop_assert_eq!(result.records_read, result.records_kept + result.records_dropped);
            model.verify(&test_journal);
        }

        #[test]
        fn test_generated_ids_in_range(id in record_id_strategy(10)) {
            prop_assert!((0..10).contains(&id));
        }
    }
}
