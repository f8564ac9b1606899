//! Общие константы форматов (meta, data file, journals) и раскладки каталогов.

// -------- Meta --------
pub const META_FILE: &str = "meta";
pub const META_MAGIC: &[u8; 8] = b"DVENVMET";
pub const META_VERSION: u32 = 1;

// -------- Lock --------
pub const LOCK_FILE: &str = "LOCK";

// -------- Data file --------
pub const DATA_FILE: &str = "data.dvs";
pub const DATA_MAGIC: &[u8; 8] = b"DVDATA01";
pub const DATA_HDR_SIZE: usize = 16; // magic8 + env_id u64

// -------- Journals --------
pub const JOURNALS_DIR: &str = "Journals";
pub const JOURNAL_PREFIX: &str = "journal-";
pub const JOURNAL_EXT: &str = "log";
pub const JOURNAL_MAGIC: &[u8; 8] = b"DVJRNL01";
pub const JOURNAL_HDR_SIZE: usize = 16; // magic8 + env_id u64
/// Размер преаллоцированного журнала по умолчанию (байт).
pub const DEFAULT_JOURNAL_SIZE: u64 = 1024 * 1024;

// Формат записи (общий для data file и журналов):
// [kind u8][flags u8][tree_len u16][key_len u32][value_len u32][lsn u64][crc32c u32]
// + tree + key + value
//
// CRC32C считается по header[0..20] + tree + key + value.
pub const REC_HDR_SIZE: usize = 24;
pub const REC_OFF_KIND: usize = 0;
pub const REC_OFF_FLAGS: usize = 1;
pub const REC_OFF_TREE_LEN: usize = 2;
pub const REC_OFF_KEY_LEN: usize = 4;
pub const REC_OFF_VALUE_LEN: usize = 8;
pub const REC_OFF_LSN: usize = 12;
pub const REC_OFF_CRC32: usize = 20;

// kind == 0 в журнале означает преаллоцированный (нулевой) хвост.
pub const REC_KIND_END: u8 = 0;
pub const REC_KIND_PUT: u8 = 1;
pub const REC_KIND_DELETE: u8 = 2;

// -------- Server layout --------
pub const DATABASES_DIR: &str = "Databases";
pub const INDEXES_DIR: &str = "Indexes";

// -------- Compaction sibling directories --------
pub const COMPACTING_SUFFIX: &str = "-Compacting";
pub const OLD_SUFFIX: &str = "-old";

/// Число записей, копируемых компактором за один батч по умолчанию.
pub const DEFAULT_COMPACT_BATCH: usize = 1024;

pub const BYTES_PER_MB: u64 = 1024 * 1024;
