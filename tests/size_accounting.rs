use anyhow::Result;
use std::fs;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use docvault::compaction::{bytes_to_mb, calculate_storage_size_in_bytes};
use docvault::storage::{DataFileReport, JournalReport, StorageReport};
use docvault::{
    CatastrophicFailureNotification, IoChangesNotifications, OpenMode, StorageEnvironment,
    StorageEnvironmentOptions,
};

static NEXT_ID: AtomicU64 = AtomicU64::new(0);

fn unique_root(prefix: &str) -> PathBuf {
    let pid = std::process::id();
    let t = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();
    let id = NEXT_ID.fetch_add(1, Ordering::Relaxed);
    std::env::temp_dir().join(format!("dvtest-size-{prefix}-{pid}-{t}-{id}"))
}

fn open(root: &PathBuf, journal_size: u64) -> Result<Arc<StorageEnvironment>> {
    Ok(Arc::new(StorageEnvironment::open(
        StorageEnvironmentOptions::for_path(root, OpenMode::ReadWrite)
            .with_journal_size(journal_size),
        IoChangesNotifications::new(),
        CatastrophicFailureNotification::default(),
    )?))
}

fn allocated(env: &StorageEnvironment) -> Result<u64> {
    let tx = env.read_transaction()?;
    Ok(env
        .generate_report(&tx)
        .map(|r| r.allocated_bytes())
        .unwrap_or(0))
}

#[test]
fn total_is_sum_over_units_and_skips_closed_ones() -> Result<()> {
    let a_root = unique_root("a");
    let b_root = unique_root("b");
    let a = open(&a_root, 200_000)?;
    let b = open(&b_root, 300_000)?;
    a.put("t", b"k", &vec![1u8; 50_000])?;
    b.put("t", b"k", &vec![2u8; 70_000])?;

    let a_bytes = allocated(&a)?;
    let b_bytes = allocated(&b)?;
    // data file (только заголовок до чекпоинта) + один преаллоцированный журнал
    assert_eq!(a_bytes, 16 + 200_000);
    assert_eq!(b_bytes, 16 + 300_000);

    let total = calculate_storage_size_in_bytes(&[a.clone(), b.clone()]);
    assert_eq!(total, a_bytes + b_bytes);
    assert_eq!(bytes_to_mb(total), 0);

    // закрытое окружение пропускается, подсчёт не падает
    b.close()?;
    assert_eq!(calculate_storage_size_in_bytes(&[a.clone(), b.clone()]), a_bytes);

    drop(a);
    drop(b);
    let _ = fs::remove_dir_all(&a_root);
    let _ = fs::remove_dir_all(&b_root);
    Ok(())
}

fn report(data: u64, journals: &[u64]) -> StorageReport {
    StorageReport {
        data_file: DataFileReport {
            allocated_space_in_bytes: data,
            live_payload_bytes: 0,
        },
        journals: journals
            .iter()
            .enumerate()
            .map(|(i, &len)| JournalReport {
                number: i as u64 + 1,
                allocated_space_in_bytes: len,
            })
            .collect(),
        trees: Vec::new(),
    }
}

#[test]
fn unit_with_data_file_and_two_journals_is_one_megabyte() {
    let unit = report(1_000_000, &[200_000, 300_000]);
    assert_eq!(unit.allocated_bytes(), 1_500_000);
    assert_eq!(bytes_to_mb(unit.allocated_bytes()), 1);

    // две такие единицы: 3_000_000 байт, усечение до 2 MB
    let units = [unit.clone(), report(1_000_000, &[200_000, 300_000])];
    let total: u64 = units.iter().map(|r| r.allocated_bytes()).sum();
    assert_eq!(total, 3_000_000);
    assert_eq!(bytes_to_mb(total), 2);
}
