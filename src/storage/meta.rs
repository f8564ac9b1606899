// src/storage/meta.rs — meta окружения хранения
//
// Формат <env>/meta (LE):
// MAGIC8 = "DVENVMET"
// u32 version         = 1
// u64 env_id          (случайный, генерируется при создании окружения)
// u64 last_lsn        (последний LSN, попавший в data file)
// u8  clean_shutdown  (1=clean, 0=unclean)
// u32 crc32           (crc32 по всем предыдущим байтам)
//
// Политика:
// - Атомарная запись: tmp+rename, затем fsync каталога (best‑effort).

use anyhow::{anyhow, Context, Result};
use byteorder::{ByteOrder, LittleEndian, ReadBytesExt, WriteBytesExt};
use crc32fast::Hasher as Crc32;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::consts::{META_FILE, META_MAGIC, META_VERSION};
use crate::dirs::fsync_dir;

const META_BODY_LEN: usize = 8 + 4 + 8 + 8 + 1;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvMeta {
    pub version: u32,
    pub env_id: u64,
    pub last_lsn: u64,
    pub clean_shutdown: bool,
}

impl EnvMeta {
    pub fn new(env_id: u64) -> Self {
        Self {
            version: META_VERSION,
            env_id,
            last_lsn: 0,
            clean_shutdown: true,
        }
    }
}

#[inline]
fn meta_path(root: &Path) -> PathBuf {
    root.join(META_FILE)
}

fn encode_meta(m: &EnvMeta) -> Result<Vec<u8>> {
    let mut buf = Vec::with_capacity(META_BODY_LEN + 4);
    buf.write_all(META_MAGIC)?;
    buf.write_u32::<LittleEndian>(m.version)?;
    buf.write_u64::<LittleEndian>(m.env_id)?;
    buf.write_u64::<LittleEndian>(m.last_lsn)?;
    buf.write_u8(if m.clean_shutdown { 1 } else { 0 })?;

    let mut h = Crc32::new();
    h.update(&buf);
    buf.write_u32::<LittleEndian>(h.finalize())?;
    Ok(buf)
}

fn write_meta_atomic(root: &Path, m: &EnvMeta) -> Result<()> {
    let path = meta_path(root);
    let tmp = root.join(format!("{}.tmp", META_FILE));
    let _ = fs::remove_file(&tmp);

    let bytes = encode_meta(m)?;
    let mut f = OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(&tmp)
        .with_context(|| format!("open meta tmp {}", tmp.display()))?;
    f.write_all(&bytes)?;
    f.sync_all()?;

    fs::rename(&tmp, &path)
        .with_context(|| format!("rename {} -> {}", tmp.display(), path.display()))?;
    let _ = fsync_dir(root);
    Ok(())
}

/// Создать новый meta. Ошибка, если уже существует.
pub fn write_meta_new(root: &Path, m: &EnvMeta) -> Result<()> {
    let path = meta_path(root);
    if path.exists() {
        return Err(anyhow!("meta already exists at {}", path.display()));
    }
    write_meta_atomic(root, m)
}

/// Перезаписать meta через tmp+rename.
pub fn write_meta_overwrite(root: &Path, m: &EnvMeta) -> Result<()> {
    write_meta_atomic(root, m)
}

pub fn meta_exists(root: &Path) -> bool {
    meta_path(root).is_file()
}

pub fn read_meta(root: &Path) -> Result<EnvMeta> {
    let path = meta_path(root);
    let bytes = fs::read(&path).with_context(|| format!("read meta {}", path.display()))?;
    if bytes.len() < META_BODY_LEN + 4 {
        return Err(anyhow!(
            "meta at {} is truncated ({} bytes)",
            path.display(),
            bytes.len()
        ));
    }
    if &bytes[0..8] != META_MAGIC {
        return Err(anyhow!("bad meta magic at {}", path.display()));
    }

    let stored = LittleEndian::read_u32(&bytes[META_BODY_LEN..META_BODY_LEN + 4]);
    let mut h = Crc32::new();
    h.update(&bytes[..META_BODY_LEN]);
    let calc = h.finalize();
    if stored != calc {
        return Err(anyhow!(
            "meta CRC mismatch at {} (stored={}, calc={})",
            path.display(),
            stored,
            calc
        ));
    }

    let mut rd = &bytes[8..META_BODY_LEN];
    let version = rd.read_u32::<LittleEndian>()?;
    if version != META_VERSION {
        return Err(anyhow!(
            "unsupported meta version {} at {}",
            version,
            path.display()
        ));
    }
    let env_id = rd.read_u64::<LittleEndian>()?;
    let last_lsn = rd.read_u64::<LittleEndian>()?;
    let clean_shutdown = rd.read_u8()? == 1;

    Ok(EnvMeta {
        version,
        env_id,
        last_lsn,
        clean_shutdown,
    })
}
