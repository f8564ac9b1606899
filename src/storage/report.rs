//! storage/report — structural report of an environment (sizes per file, per-tree counts).

use serde::Serialize;

#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct DataFileReport {
    pub allocated_space_in_bytes: u64,
    /// Bytes of live keys/values as seen by the report's read transaction.
    pub live_payload_bytes: u64,
}

#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct JournalReport {
    pub number: u64,
    pub allocated_space_in_bytes: u64,
}

#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct TreeReport {
    pub name: String,
    pub entries: u64,
    pub payload_bytes: u64,
}

#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct StorageReport {
    pub data_file: DataFileReport,
    pub journals: Vec<JournalReport>,
    pub trees: Vec<TreeReport>,
}

impl StorageReport {
    pub fn journals_allocated_bytes(&self) -> u64 {
        self.journals.iter().map(|j| j.allocated_space_in_bytes).sum()
    }

    /// Data file plus every journal: what the environment occupies on disk.
    pub fn allocated_bytes(&self) -> u64 {
        self.data_file.allocated_space_in_bytes + self.journals_allocated_bytes()
    }
}
