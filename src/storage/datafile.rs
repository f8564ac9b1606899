//! storage/datafile — основной файл данных окружения (append-only лог записей).
//!
//! Формат `<env>/data.dvs`:
//! - [0..8)   MAGIC "DVDATA01"
//! - [8..16)  env_id u64 (LE)
//! - далее записи storage/record.rs в порядке возрастания LSN.
//!
//! Перезаписанные и удалённые ключи остаются в файле мёртвыми записями — именно это место
//! возвращает компактация.

use anyhow::{anyhow, Context, Result};
use byteorder::{ByteOrder, LittleEndian};
use std::fs::{self, File, OpenOptions};
use std::io::{Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use crate::consts::{DATA_FILE, DATA_HDR_SIZE, DATA_MAGIC};

use super::record::{decode_at, Decoded, WriteOp};

pub fn data_file_path(root: &Path) -> PathBuf {
    root.join(DATA_FILE)
}

/// Result of scanning the data file.
#[derive(Debug, Default)]
pub struct DataScan {
    /// Length of the valid prefix (header + complete records).
    pub valid_len: u64,
    pub file_len: u64,
    /// LSN of the last valid record (0 if there is none).
    pub last_lsn: u64,
    /// Structural corruption: a complete record that fails validation, garbage after the
    /// end marker, or a "tail" that cuts off records meta says were written.
    pub corruption: Option<String>,
}

impl DataScan {
    pub fn has_torn_tail(&self) -> bool {
        self.corruption.is_none() && self.valid_len < self.file_len
    }
}

pub fn create_data_file(root: &Path, env_id: u64) -> Result<()> {
    let path = data_file_path(root);
    let mut f = OpenOptions::new()
        .create_new(true)
        .write(true)
        .open(&path)
        .with_context(|| format!("create data file {}", path.display()))?;
    let mut hdr = [0u8; DATA_HDR_SIZE];
    hdr[0..8].copy_from_slice(DATA_MAGIC);
    LittleEndian::write_u64(&mut hdr[8..16], env_id);
    f.write_all(&hdr)?;
    f.sync_all()?;
    Ok(())
}

/// Прочитать data file и отдать каждую валидную запись в `apply`.
///
/// `durable_lsn` — последний LSN, который meta считает записанным в data file (чекпоинт или
/// clean shutdown). Оборванный хвост допустим только после него: обрыв раньше значит, что
/// повреждена середина файла, и отрезать её нельзя.
pub fn scan_data_file<F>(
    root: &Path,
    env_id: u64,
    durable_lsn: u64,
    mut apply: F,
) -> Result<DataScan>
where
    F: FnMut(WriteOp, u64),
{
    let path = data_file_path(root);
    let bytes = fs::read(&path).with_context(|| format!("read data file {}", path.display()))?;
    if bytes.len() < DATA_HDR_SIZE || &bytes[0..8] != DATA_MAGIC {
        return Ok(DataScan {
            valid_len: 0,
            file_len: bytes.len() as u64,
            last_lsn: 0,
            corruption: Some(format!("bad data file header in {}", path.display())),
        });
    }
    let owner = LittleEndian::read_u64(&bytes[8..16]);
    if owner != env_id {
        return Ok(DataScan {
            valid_len: DATA_HDR_SIZE as u64,
            file_len: bytes.len() as u64,
            last_lsn: 0,
            corruption: Some(format!(
                "data file {} belongs to env_id={}, meta says {}",
                path.display(),
                owner,
                env_id
            )),
        });
    }

    let mut pos = DATA_HDR_SIZE;
    let mut last_lsn = 0u64;
    let mut corruption = None;
    loop {
        match decode_at(&bytes[pos..]) {
            Decoded::Record { op, lsn, len } => {
                apply(op, lsn);
                last_lsn = last_lsn.max(lsn);
                pos += len;
            }
            // Нулевой kind — конец данных, но только если за ним одни нули.
            Decoded::End => {
                if let Some(off) = bytes[pos..].iter().position(|b| *b != 0) {
                    corruption = Some(format!(
                        "non-zero byte at offset {} after end marker at offset {} in {}",
                        pos + off,
                        pos,
                        path.display()
                    ));
                }
                break;
            }
            Decoded::Torn => break,
            Decoded::Corrupt(why) => {
                corruption = Some(format!("{} at offset {} in {}", why, pos, path.display()));
                break;
            }
        }
    }

    if corruption.is_none() && last_lsn < durable_lsn {
        corruption = Some(format!(
            "data file {} ends at lsn={} (offset {} of {}), meta records lsn={}",
            path.display(),
            last_lsn,
            pos,
            bytes.len(),
            durable_lsn
        ));
    }

    Ok(DataScan {
        valid_len: pos as u64,
        file_len: bytes.len() as u64,
        last_lsn,
        corruption,
    })
}

/// Хэндл на дозапись data file (только read-write окружения).
pub struct DataFileWriter {
    path: PathBuf,
    file: File,
    len: u64,
}

impl DataFileWriter {
    /// Открыть на дозапись; если `valid_len` меньше длины файла — оборванный хвост отрезается.
    pub fn open(root: &Path, valid_len: u64) -> Result<Self> {
        let path = data_file_path(root);
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(&path)
            .with_context(|| format!("open data file {}", path.display()))?;
        let cur = file.metadata()?.len();
        if valid_len > cur {
            return Err(anyhow!(
                "data file {} shorter than its valid prefix ({} < {})",
                path.display(),
                cur,
                valid_len
            ));
        }
        if valid_len < cur {
            file.set_len(valid_len)
                .with_context(|| format!("truncate torn tail of {}", path.display()))?;
            file.sync_all()?;
        }
        Ok(Self {
            path,
            file,
            len: valid_len,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn append(&mut self, bytes: &[u8]) -> Result<()> {
        self.file.seek(SeekFrom::Start(self.len))?;
        self.file
            .write_all(bytes)
            .with_context(|| format!("append {} bytes to {}", bytes.len(), self.path.display()))?;
        self.len += bytes.len() as u64;
        Ok(())
    }

    pub fn sync(&mut self) -> Result<()> {
        self.file
            .sync_data()
            .with_context(|| format!("fsync data file {}", self.path.display()))
    }
}
