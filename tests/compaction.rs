use anyhow::Result;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use docvault::compaction::{calculate_storage_size_in_bytes, CompactionState};
use docvault::{
    CancellationToken, CompactDatabaseTask, CompactionOperation, CompactionProgress,
    DatabasesLandlord, ServerConfigBuilder, WriteOp,
};

static NEXT_ID: AtomicU64 = AtomicU64::new(0);

fn unique_root(prefix: &str) -> PathBuf {
    let pid = std::process::id();
    let t = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();
    let id = NEXT_ID.fetch_add(1, Ordering::Relaxed);
    std::env::temp_dir().join(format!("dvtest-compaction-{prefix}-{pid}-{t}-{id}"))
}

fn init_logger() {
    let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .is_test(true)
        .try_init();
}

fn landlord_at(root: &Path) -> Arc<DatabasesLandlord> {
    let cfg = ServerConfigBuilder::from_default()
        .data_root(root)
        .journal_fsync(false)
        .data_fsync(false)
        .compact_batch(64)
        .build();
    Arc::new(DatabasesLandlord::new(cfg))
}

fn payload(rng: &mut oorandom::Rand32, len: usize) -> Vec<u8> {
    let mut v = Vec::with_capacity(len);
    while v.len() < len {
        v.extend_from_slice(&rng.rand_u32().to_le_bytes());
    }
    v.truncate(len);
    v
}

/// Пишет `keys` документов по 4 KiB в `rounds` проходов (перезаписи раздувают data file),
/// плюс немного удалений. Возвращает ожидаемое итоговое содержимое дерева "docs".
fn bloat(
    landlord: &DatabasesLandlord,
    name: &str,
    keys: usize,
    rounds: usize,
) -> Result<BTreeMap<Vec<u8>, Vec<u8>>> {
    let db = landlord.create_database(name)?;
    let env = db.documents().clone();
    let mut rng = oorandom::Rand32::new(0xD0C5 + keys as u64);
    let mut expected = BTreeMap::new();

    for _ in 0..rounds {
        for chunk in (0..keys).collect::<Vec<_>>().chunks(32) {
            let ops: Vec<WriteOp> = chunk
                .iter()
                .map(|i| {
                    let key = format!("docs/{:05}", i).into_bytes();
                    let value = payload(&mut rng, 4096);
                    expected.insert(key.clone(), value.clone());
                    WriteOp::put("docs", key, value)
                })
                .collect();
            env.write_batch(&ops)?;
        }
        env.flush()?;
    }
    for i in (0..keys).step_by(10) {
        let key = format!("docs/{:05}", i).into_bytes();
        env.delete("docs", &key)?;
        expected.remove(&key);
    }
    env.put("meta", b"schema", b"v1")?;
    Ok(expected)
}

fn siblings(root: &Path, name: &str) -> (PathBuf, PathBuf, PathBuf) {
    let base = root.join("Databases");
    (
        base.join(name),
        base.join(format!("{}-Compacting", name)),
        base.join(format!("{}-old", name)),
    )
}

#[test]
fn compaction_shrinks_database_and_preserves_data() -> Result<()> {
    init_logger();
    let root = unique_root("e2e");
    let landlord = landlord_at(&root);
    let expected = bloat(&landlord, "orders", 640, 5)?;
    {
        let db = landlord.try_get_or_create("orders")?.expect("loaded");
        db.create_index("by_customer")?
            .put("idx", b"customer/1", b"docs/00001")?;
    }

    let mut events: Vec<CompactionProgress> = Vec::new();
    let mut observe = |p: &CompactionProgress| events.push(p.clone());
    let result = CompactDatabaseTask::new(landlord.clone(), "orders", CancellationToken::new())
        .execute(Some(&mut observe))?;

    // ~12.5 MiB мёртвых перезаписей против ~2.3 MiB живых данных
    assert!(
        result.size_before_mb > result.size_after_mb,
        "expected shrink, got {}",
        result
    );
    assert!(result.size_before_mb >= 12, "{}", result);
    assert!(result.size_after_mb <= 4, "{}", result);

    let (live, compacting, old) = siblings(&root, "orders");
    assert!(live.is_dir());
    assert!(!compacting.exists());
    assert!(!old.exists());

    // прогресс: processed <= total, последнее событие с известным total завершено
    assert!(events[0].message.contains("Started compaction for orders"));
    let with_total: Vec<&CompactionProgress> = events.iter().filter(|p| p.total > 0).collect();
    assert!(!with_total.is_empty());
    for p in &with_total {
        assert!(p.processed <= p.total, "{:?}", p);
        assert!(p.tree_progress <= p.tree_total, "{:?}", p);
    }
    let last = with_total[with_total.len() - 1];
    assert_eq!(last.processed, last.total);
    assert_eq!(last.total, expected.len() as u64 + 1);
    let mut prev = 0;
    for p in &with_total {
        assert!(p.processed >= prev, "progress went backwards");
        prev = p.processed;
    }

    // данные и индекс на месте
    let db = landlord.try_get_or_create("orders")?.expect("loaded after compaction");
    let tx = db.documents().read_transaction()?;
    assert_eq!(tx.tree_len("docs"), expected.len() as u64);
    for (k, v) in &expected {
        assert_eq!(tx.get("docs", k), Some(v.as_slice()));
    }
    assert_eq!(tx.get("meta", b"schema"), Some(&b"v1"[..]));
    drop(tx);
    assert_eq!(
        db.index("by_customer")
            .expect("index survives")
            .get("idx", b"customer/1")?
            .as_deref(),
        Some(&b"docs/00001"[..])
    );

    // размер после совпадает с независимым подсчётом
    let after = calculate_storage_size_in_bytes(&db.get_all_storage_environments());
    assert_eq!(after / (1024 * 1024), result.size_after_mb);
    drop(db);

    drop(landlord);
    let _ = fs::remove_dir_all(&root);
    Ok(())
}

#[test]
fn compacting_twice_keeps_only_live_directory() -> Result<()> {
    init_logger();
    let root = unique_root("twice");
    let landlord = landlord_at(&root);
    let expected = bloat(&landlord, "orders", 64, 2)?;

    for _ in 0..2 {
        CompactDatabaseTask::new(landlord.clone(), "orders", CancellationToken::new())
            .execute(None)?;
        let (live, compacting, old) = siblings(&root, "orders");
        assert!(live.is_dir() && !compacting.exists() && !old.exists());
    }

    let db = landlord.try_get_or_create("orders")?.expect("loaded");
    assert_eq!(
        db.documents().read_transaction()?.tree_len("docs"),
        expected.len() as u64
    );
    drop(db);

    drop(landlord);
    let _ = fs::remove_dir_all(&root);
    Ok(())
}

#[test]
fn empty_database_compacts_to_empty() -> Result<()> {
    init_logger();
    let root = unique_root("empty");
    let landlord = landlord_at(&root);
    landlord.create_database("blank")?;

    let result = CompactDatabaseTask::new(landlord.clone(), "blank", CancellationToken::new())
        .execute(None)?;
    assert_eq!(result.size_before_mb, 0);
    assert_eq!(result.size_after_mb, 0);
    let db = landlord.try_get_or_create("blank")?.expect("loaded");
    assert_eq!(db.documents().read_transaction()?.total_entries(), 0);
    drop(db);

    drop(landlord);
    let _ = fs::remove_dir_all(&root);
    Ok(())
}

#[test]
fn operation_streams_progress_and_joins() -> Result<()> {
    init_logger();
    let root = unique_root("operation");
    let landlord = landlord_at(&root);
    let expected = bloat(&landlord, "orders", 256, 2)?;

    let task = CompactDatabaseTask::new(landlord.clone(), "orders", CancellationToken::new());
    assert_eq!(task.state(), CompactionState::Init);
    let op = CompactionOperation::spawn(task)?;
    assert_eq!(op.database_name(), "orders");

    let mut events = Vec::new();
    for p in op.progress().iter() {
        events.push(p);
    }
    let result = op.join()?;
    assert!(result.size_before_mb >= result.size_after_mb);

    assert!(events.len() >= 3, "got {} event(s)", events.len());
    let last = events
        .iter()
        .rev()
        .find(|p| p.total > 0)
        .expect("events with totals");
    assert_eq!(last.processed, expected.len() as u64 + 1);
    assert!(events
        .last()
        .map(|p| p.message.contains("finished"))
        .unwrap_or(false));

    drop(landlord);
    let _ = fs::remove_dir_all(&root);
    Ok(())
}

#[test]
fn result_serializes_as_json() -> Result<()> {
    let r = docvault::CompactionResult::from_bytes(10_485_760, 6_291_456);
    let v = serde_json::to_value(r)?;
    assert_eq!(v["size_before_mb"], 10);
    assert_eq!(v["size_after_mb"], 6);
    Ok(())
}
