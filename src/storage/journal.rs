//! storage/journal — преаллоцированные журналы (write-ahead log) окружения.
//!
//! Файл: `<env>/Journals/journal-NNNNNN.log`
//! - [0..8)   MAGIC "DVJRNL01"
//! - [8..16)  env_id u64 (LE) — защищает от подмешивания чужих журналов
//! - далее записи в формате storage/record.rs; хвост файла заполнен нулями (fs2 allocate).
//!
//! Аллоцированный размер журнала = длина файла; он учитывается в отчёте о размере окружения.
//! Реплей идёт до первой нулевой/оборванной записи. Повреждённая запись в журнале трактуется
//! как оборванный хвост (запись не была подтверждена вызывающему коду).

use anyhow::{anyhow, Context, Result};
use byteorder::{ByteOrder, LittleEndian};
use fs2::FileExt;
use log::{debug, warn};
use std::fs::{self, File, OpenOptions};
use std::io::{Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use crate::consts::{JOURNALS_DIR, JOURNAL_EXT, JOURNAL_HDR_SIZE, JOURNAL_MAGIC, JOURNAL_PREFIX};
use crate::dirs::fsync_dir;
use crate::metrics::record_journal_created;

use super::record::{decode_at, Decoded, WriteOp};

pub fn journals_dir(root: &Path) -> PathBuf {
    root.join(JOURNALS_DIR)
}

pub fn journal_path(root: &Path, number: u64) -> PathBuf {
    journals_dir(root).join(format!("{}{:06}.{}", JOURNAL_PREFIX, number, JOURNAL_EXT))
}

fn parse_journal_number(name: &str) -> Option<u64> {
    let stem = name.strip_prefix(JOURNAL_PREFIX)?;
    let digits = stem.strip_suffix(&format!(".{}", JOURNAL_EXT))?;
    digits.parse::<u64>().ok()
}

/// Все журналы окружения, отсортированные по номеру. Отсутствующий каталог — пустой список.
pub fn list_journals(root: &Path) -> Result<Vec<(u64, PathBuf)>> {
    let dir = journals_dir(root);
    let rd = match fs::read_dir(&dir) {
        Ok(rd) => rd,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e).with_context(|| format!("read_dir {}", dir.display())),
    };

    let mut out = Vec::new();
    for entry in rd {
        let entry = entry?;
        let name = entry.file_name();
        if let Some(n) = name.to_str().and_then(parse_journal_number) {
            out.push((n, entry.path()));
        }
    }
    out.sort_by_key(|(n, _)| *n);
    Ok(out)
}

/// Активный журнал на запись.
pub struct JournalWriter {
    pub number: u64,
    pub path: PathBuf,
    file: File,
    pos: u64,
    capacity: u64,
}

impl JournalWriter {
    /// Создать новый журнал с преаллокацией `capacity` байт (минимум заголовок).
    pub fn create(root: &Path, number: u64, env_id: u64, capacity: u64) -> Result<Self> {
        let dir = journals_dir(root);
        fs::create_dir_all(&dir).with_context(|| format!("create {}", dir.display()))?;

        let path = journal_path(root, number);
        let mut file = OpenOptions::new()
            .create_new(true)
            .read(true)
            .write(true)
            .open(&path)
            .with_context(|| format!("create journal {}", path.display()))?;

        let capacity = capacity.max(JOURNAL_HDR_SIZE as u64);
        file.allocate(capacity)
            .with_context(|| format!("preallocate {} bytes for {}", capacity, path.display()))?;
        // allocate() не обязан менять длину файла на всех платформах — фиксируем явно.
        if file.metadata()?.len() < capacity {
            file.set_len(capacity)?;
        }

        let mut hdr = [0u8; JOURNAL_HDR_SIZE];
        hdr[0..8].copy_from_slice(JOURNAL_MAGIC);
        LittleEndian::write_u64(&mut hdr[8..16], env_id);
        file.seek(SeekFrom::Start(0))?;
        file.write_all(&hdr)?;
        file.sync_all()?;
        let _ = fsync_dir(&dir);

        record_journal_created();
        debug!(
            "journal: created {} (capacity={} bytes)",
            path.display(),
            capacity
        );

        Ok(Self {
            number,
            path,
            file,
            pos: JOURNAL_HDR_SIZE as u64,
            capacity,
        })
    }

    #[inline]
    pub fn remaining(&self) -> u64 {
        self.capacity.saturating_sub(self.pos)
    }

    /// Записать готовые байты записей по текущей позиции (без fsync).
    pub fn append(&mut self, bytes: &[u8]) -> Result<()> {
        if bytes.len() as u64 > self.remaining() {
            return Err(anyhow!(
                "journal {} overflow: need {} bytes, remaining {}",
                self.path.display(),
                bytes.len(),
                self.remaining()
            ));
        }
        self.file.seek(SeekFrom::Start(self.pos))?;
        self.file.write_all(bytes)?;
        self.pos += bytes.len() as u64;
        Ok(())
    }

    pub fn sync(&mut self) -> Result<()> {
        self.file
            .sync_data()
            .with_context(|| format!("fsync journal {}", self.path.display()))
    }
}

/// Прочитать все подтверждённые записи журнала.
pub fn replay_journal(path: &Path, env_id: u64) -> Result<Vec<(WriteOp, u64)>> {
    let bytes = fs::read(path).with_context(|| format!("read journal {}", path.display()))?;
    if bytes.len() < JOURNAL_HDR_SIZE {
        warn!("journal: {} has no header, skipping", path.display());
        return Ok(Vec::new());
    }
    if &bytes[0..8] != JOURNAL_MAGIC {
        return Err(anyhow!("bad journal magic in {}", path.display()));
    }
    let owner = LittleEndian::read_u64(&bytes[8..16]);
    if owner != env_id {
        return Err(anyhow!(
            "journal {} belongs to another environment (env_id={}, expected {})",
            path.display(),
            owner,
            env_id
        ));
    }

    let mut out = Vec::new();
    let mut pos = JOURNAL_HDR_SIZE;
    loop {
        match decode_at(&bytes[pos..]) {
            Decoded::Record { op, lsn, len } => {
                out.push((op, lsn));
                pos += len;
            }
            Decoded::End => break,
            Decoded::Torn => {
                warn!(
                    "journal: torn tail in {} at offset {}, ignoring the rest",
                    path.display(),
                    pos
                );
                break;
            }
            Decoded::Corrupt(why) => {
                warn!(
                    "journal: unreadable record in {} at offset {} ({}), ignoring the rest",
                    path.display(),
                    pos,
                    why
                );
                break;
            }
        }
    }
    Ok(out)
}
