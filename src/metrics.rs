//! Lightweight global metrics.
//!
//! Потокобезопасные атомарные счётчики для подсистем:
//! - Compaction (orchestrator + compactor)
//! - Journals / checkpoints
//! - Read transactions
//! - Landlord (load/unload)

use std::sync::atomic::{AtomicU64, Ordering};

// ----- Compaction -----
static COMPACTIONS_STARTED: AtomicU64 = AtomicU64::new(0);
static COMPACTIONS_COMPLETED: AtomicU64 = AtomicU64::new(0);
static COMPACTIONS_FAILED: AtomicU64 = AtomicU64::new(0);
static COMPACTIONS_CANCELLED: AtomicU64 = AtomicU64::new(0);
static COMPACTION_TREES_COPIED: AtomicU64 = AtomicU64::new(0);
static COMPACTION_ENTRIES_COPIED: AtomicU64 = AtomicU64::new(0);
static COMPACTION_BYTES_RECLAIMED: AtomicU64 = AtomicU64::new(0);

// ----- Journals -----
static JOURNALS_CREATED: AtomicU64 = AtomicU64::new(0);
static JOURNAL_CHECKPOINTS: AtomicU64 = AtomicU64::new(0);

// ----- Read transactions -----
static READ_TX_ACTIVE: AtomicU64 = AtomicU64::new(0);

// ----- Landlord -----
static DATABASE_LOADS: AtomicU64 = AtomicU64::new(0);
static DATABASE_UNLOADS: AtomicU64 = AtomicU64::new(0);

#[derive(Debug, Clone, Default)]
pub struct MetricsSnapshot {
    // Compaction
    pub compactions_started: u64,
    pub compactions_completed: u64,
    pub compactions_failed: u64,
    pub compactions_cancelled: u64,
    pub compaction_trees_copied: u64,
    pub compaction_entries_copied: u64,
    pub compaction_bytes_reclaimed: u64,

    // Journals
    pub journals_created: u64,
    pub journal_checkpoints: u64,

    // Read transactions
    pub read_tx_active: u64,

    // Landlord
    pub database_loads: u64,
    pub database_unloads: u64,
}

// ----- Recorders (Compaction) -----
pub fn record_compaction_started() {
    COMPACTIONS_STARTED.fetch_add(1, Ordering::Relaxed);
}

pub fn record_compaction_completed(bytes_before: u64, bytes_after: u64) {
    COMPACTIONS_COMPLETED.fetch_add(1, Ordering::Relaxed);
    COMPACTION_BYTES_RECLAIMED.fetch_add(bytes_before.saturating_sub(bytes_after), Ordering::Relaxed);
}

pub fn record_compaction_failed() {
    COMPACTIONS_FAILED.fetch_add(1, Ordering::Relaxed);
}

pub fn record_compaction_cancelled() {
    COMPACTIONS_CANCELLED.fetch_add(1, Ordering::Relaxed);
}

pub fn record_compaction_tree_copied(entries: u64) {
    COMPACTION_TREES_COPIED.fetch_add(1, Ordering::Relaxed);
    COMPACTION_ENTRIES_COPIED.fetch_add(entries, Ordering::Relaxed);
}

// ----- Recorders (Journals) -----
pub fn record_journal_created() {
    JOURNALS_CREATED.fetch_add(1, Ordering::Relaxed);
}

pub fn record_journal_checkpoint() {
    JOURNAL_CHECKPOINTS.fetch_add(1, Ordering::Relaxed);
}

// ----- Recorders (Read transactions) -----
pub fn record_read_tx_begin() {
    READ_TX_ACTIVE.fetch_add(1, Ordering::Relaxed);
}

pub fn record_read_tx_end() {
    READ_TX_ACTIVE
        .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |v| Some(v.saturating_sub(1)))
        .ok();
}

// ----- Recorders (Landlord) -----
pub fn record_database_load() {
    DATABASE_LOADS.fetch_add(1, Ordering::Relaxed);
}

pub fn record_database_unload() {
    DATABASE_UNLOADS.fetch_add(1, Ordering::Relaxed);
}

// ----- Snapshot / Reset -----
pub fn snapshot() -> MetricsSnapshot {
    MetricsSnapshot {
        compactions_started: COMPACTIONS_STARTED.load(Ordering::Relaxed),
        compactions_completed: COMPACTIONS_COMPLETED.load(Ordering::Relaxed),
        compactions_failed: COMPACTIONS_FAILED.load(Ordering::Relaxed),
        compactions_cancelled: COMPACTIONS_CANCELLED.load(Ordering::Relaxed),
        compaction_trees_copied: COMPACTION_TREES_COPIED.load(Ordering::Relaxed),
        compaction_entries_copied: COMPACTION_ENTRIES_COPIED.load(Ordering::Relaxed),
        compaction_bytes_reclaimed: COMPACTION_BYTES_RECLAIMED.load(Ordering::Relaxed),

        journals_created: JOURNALS_CREATED.load(Ordering::Relaxed),
        journal_checkpoints: JOURNAL_CHECKPOINTS.load(Ordering::Relaxed),

        read_tx_active: READ_TX_ACTIVE.load(Ordering::Relaxed),

        database_loads: DATABASE_LOADS.load(Ordering::Relaxed),
        database_unloads: DATABASE_UNLOADS.load(Ordering::Relaxed),
    }
}

pub fn reset() {
    COMPACTIONS_STARTED.store(0, Ordering::Relaxed);
    COMPACTIONS_COMPLETED.store(0, Ordering::Relaxed);
    COMPACTIONS_FAILED.store(0, Ordering::Relaxed);
    COMPACTIONS_CANCELLED.store(0, Ordering::Relaxed);
    COMPACTION_TREES_COPIED.store(0, Ordering::Relaxed);
    COMPACTION_ENTRIES_COPIED.store(0, Ordering::Relaxed);
    COMPACTION_BYTES_RECLAIMED.store(0, Ordering::Relaxed);

    JOURNALS_CREATED.store(0, Ordering::Relaxed);
    JOURNAL_CHECKPOINTS.store(0, Ordering::Relaxed);

    READ_TX_ACTIVE.store(0, Ordering::Relaxed);

    DATABASE_LOADS.store(0, Ordering::Relaxed);
    DATABASE_UNLOADS.store(0, Ordering::Relaxed);
}
