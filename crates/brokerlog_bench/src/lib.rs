//! Benchmark utilities.

use brokerlog_core::{Journal, JournalConfig, Record};
use brokerlog_storage::InMemoryFactory;
use rand::seq::SliceRandom;
use rand::Rng;
use std::sync::Arc;

/// Generate random record body of the specified size.
pub fn random_data(size: usize) -> Vec<u8> {
    let mut rng = rand::thread_rng();
    (0..size).map(|_| rng.gen()).collect()
}

/// Generate `count` distinct record ids in random order.
pub fn shuffled_ids(count: usize) -> Vec<i64> {
    let mut ids: Vec<i64> = (0..count as i64).collect();
    ids.shuffle(&mut rand::thread_rng());
    ids
}

/// Generate records with ids `0..count` and the specified body size.
pub fn generate_records(count: usize, body_size: usize) -> Vec<Record> {
    (0..count as i64)
        .map(|id| Record::new(id, 0, random_data(body_size)))
        .collect()
}

/// Opens an in-memory journal holding `count` records, of which only every
/// `keep_every`th is still live.
pub fn churned_journal(config: JournalConfig, count: usize, keep_every: usize) -> Journal {
    let journal = Journal::open(Arc::new(InMemoryFactory::new()), config)
        .expect("Failed to open journal");
    for record in generate_records(count, 64) {
        journal.append_add(record).expect("Failed to append");
    }
    for id in (0..count as i64).filter(|id| id % keep_every as i64 != 0) {
        journal.append_delete(id).expect("Failed to delete");
    }
    journal
}
