use anyhow::Result;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};

use docvault::storage::journal::list_journals;
use docvault::storage::StorageCorruption;
use docvault::{
    CatastrophicFailureNotification, IoChange, IoChangesNotifications, OpenMode,
    OperationCancelled, StorageEnvironment, StorageEnvironmentOptions, WriteOp,
};

static NEXT_ID: AtomicU64 = AtomicU64::new(0);

fn unique_root(prefix: &str) -> PathBuf {
    let pid = std::process::id();
    let t = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();
    let id = NEXT_ID.fetch_add(1, Ordering::Relaxed);
    std::env::temp_dir().join(format!("dvtest-env-{prefix}-{pid}-{t}-{id}"))
}

fn init_logger() {
    let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn"))
        .is_test(true)
        .try_init();
}

/// Handler that records instead of aborting the test process.
fn recording_handler() -> (CatastrophicFailureNotification, Arc<Mutex<Vec<String>>>) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    let handler = CatastrophicFailureNotification::new(move |path, msg| {
        sink.lock()
            .unwrap()
            .push(format!("{}: {}", path.display(), msg));
    });
    (handler, seen)
}

fn open_rw(root: &Path) -> Result<StorageEnvironment> {
    StorageEnvironment::open(
        StorageEnvironmentOptions::for_path(root, OpenMode::ReadWrite),
        IoChangesNotifications::new(),
        CatastrophicFailureNotification::default(),
    )
}

fn copy_dir(from: &Path, to: &Path) -> Result<()> {
    fs::create_dir_all(to)?;
    for e in fs::read_dir(from)? {
        let e = e?;
        let target = to.join(e.file_name());
        if e.file_type()?.is_dir() {
            copy_dir(&e.path(), &target)?;
        } else {
            fs::copy(e.path(), target)?;
        }
    }
    Ok(())
}

#[test]
fn write_read_reopen() -> Result<()> {
    init_logger();
    let root = unique_root("reopen");

    {
        let env = open_rw(&root)?;
        env.put("users", b"users/1", b"alice")?;
        env.put("users", b"users/2", b"bob")?;
        env.put("orders", b"orders/1", b"{}")?;
        env.delete("users", b"users/2")?;
        assert_eq!(env.get("users", b"users/1")?.as_deref(), Some(&b"alice"[..]));
        assert_eq!(env.get("users", b"users/2")?, None);
        env.close()?;
        // повторный close — no-op
        env.close()?;
    }

    let env = open_rw(&root)?;
    let tx = env.read_transaction()?;
    assert_eq!(tx.tree_names(), vec!["orders".to_string(), "users".to_string()]);
    assert_eq!(tx.get("users", b"users/1"), Some(&b"alice"[..]));
    assert_eq!(tx.get("users", b"users/2"), None);
    assert_eq!(tx.total_entries(), 2);
    assert_eq!(tx.last_lsn(), 4);
    drop(tx);
    drop(env);

    let _ = fs::remove_dir_all(&root);
    Ok(())
}

#[test]
fn journals_rotate_and_checkpoint_removes_them() -> Result<()> {
    init_logger();
    let root = unique_root("rotate");

    let notifications = IoChangesNotifications::new();
    let events = Arc::new(Mutex::new(Vec::new()));
    {
        let sink = events.clone();
        notifications.subscribe(move |c: &IoChange| sink.lock().unwrap().push(c.clone()));
    }

    let env = StorageEnvironment::open(
        StorageEnvironmentOptions::for_path(&root, OpenMode::ReadWrite).with_journal_size(8 * 1024),
        notifications.clone(),
        CatastrophicFailureNotification::default(),
    )?;

    let value = vec![0x5Au8; 1000];
    for i in 0..40u32 {
        env.put("t", format!("k{:03}", i).as_bytes(), &value)?;
    }
    let journals = list_journals(&root)?;
    assert!(journals.len() >= 4, "expected rotation, got {} journal(s)", journals.len());
    for (_, p) in &journals {
        assert_eq!(fs::metadata(p)?.len(), 8 * 1024, "journals are preallocated");
    }

    let tx = env.read_transaction()?;
    let report = env.generate_report(&tx).expect("report while open");
    assert_eq!(report.journals.len(), journals.len());
    assert_eq!(report.trees.len(), 1);
    assert_eq!(report.trees[0].entries, 40);
    assert_eq!(
        report.allocated_bytes(),
        report.data_file.allocated_space_in_bytes + 8 * 1024 * journals.len() as u64
    );
    drop(tx);

    env.flush()?;
    assert!(list_journals(&root)?.is_empty());
    assert_eq!(env.get("t", b"k039")?.map(|v| v.len()), Some(1000));

    let ev = events.lock().unwrap().clone();
    let created = ev.iter().filter(|e| matches!(e, IoChange::JournalCreated(_))).count();
    let removed = ev.iter().filter(|e| matches!(e, IoChange::JournalRemoved(_))).count();
    assert_eq!(created, journals.len());
    assert_eq!(removed, journals.len());
    assert!(ev.iter().any(|e| matches!(e, IoChange::DataFileSynced(_))));

    drop(env);
    let _ = fs::remove_dir_all(&root);
    Ok(())
}

#[test]
fn journal_replay_after_crash() -> Result<()> {
    init_logger();
    let root = unique_root("crash-src");
    let crashed = unique_root("crash-copy");

    let env = open_rw(&root)?;
    env.write_batch(&[
        WriteOp::put("docs", b"a".to_vec(), b"1".to_vec()),
        WriteOp::put("docs", b"b".to_vec(), b"2".to_vec()),
    ])?;
    env.delete("docs", b"a")?;
    // Снимок каталога «на лету»: записи только в журнале, data file пуст.
    copy_dir(&root, &crashed)?;
    drop(env);

    assert_eq!(list_journals(&crashed)?.len(), 1);
    let env = open_rw(&crashed)?;
    assert_eq!(env.get("docs", b"a")?, None);
    assert_eq!(env.get("docs", b"b")?.as_deref(), Some(&b"2"[..]));
    // проигранные журналы сразу перенесены в data file
    assert!(list_journals(&crashed)?.is_empty());
    assert_eq!(env.last_lsn(), 3);
    drop(env);

    let _ = fs::remove_dir_all(&root);
    let _ = fs::remove_dir_all(&crashed);
    Ok(())
}

#[test]
fn torn_tail_is_truncated() -> Result<()> {
    init_logger();
    let root = unique_root("torn");
    {
        let env = open_rw(&root)?;
        env.put("t", b"k", b"v")?;
    }
    let data = root.join("data.dvs");
    let clean_len = fs::metadata(&data)?.len();
    {
        let mut f = OpenOptions::new().append(true).open(&data)?;
        f.write_all(&[1, 0, 0])?;
    }

    let notifications = IoChangesNotifications::new();
    let truncated = Arc::new(Mutex::new(None));
    {
        let sink = truncated.clone();
        notifications.subscribe(move |c: &IoChange| {
            if let IoChange::DataFileTruncated { len, .. } = c {
                *sink.lock().unwrap() = Some(*len);
            }
        });
    }

    let env = StorageEnvironment::open(
        StorageEnvironmentOptions::for_path(&root, OpenMode::ReadWrite),
        notifications,
        CatastrophicFailureNotification::default(),
    )?;
    assert_eq!(env.get("t", b"k")?.as_deref(), Some(&b"v"[..]));
    assert_eq!(fs::metadata(&data)?.len(), clean_len);
    assert_eq!(*truncated.lock().unwrap(), Some(clean_len));
    drop(env);

    let _ = fs::remove_dir_all(&root);
    Ok(())
}

#[test]
fn corrupted_record_raises_catastrophic_failure() -> Result<()> {
    init_logger();
    let root = unique_root("corrupt");
    {
        let env = open_rw(&root)?;
        env.put("t", b"k", b"some value")?;
    }
    let data = root.join("data.dvs");
    let mut bytes = fs::read(&data)?;
    let last = bytes.len() - 1;
    bytes[last] ^= 0xFF;
    fs::write(&data, &bytes)?;

    let (handler, seen) = recording_handler();
    let err = StorageEnvironment::open(
        StorageEnvironmentOptions::for_path(&root, OpenMode::ReadWrite),
        IoChangesNotifications::new(),
        handler,
    )
    .expect_err("corruption must fail open");

    assert!(err.downcast_ref::<StorageCorruption>().is_some(), "{:#}", err);
    let seen = seen.lock().unwrap();
    assert_eq!(seen.len(), 1);
    assert!(seen[0].contains("CRC"), "{}", seen[0]);

    let _ = fs::remove_dir_all(&root);
    Ok(())
}

#[test]
fn read_only_open_leaves_files_untouched() -> Result<()> {
    init_logger();
    let root = unique_root("ro");
    {
        let env = open_rw(&root)?;
        env.put("t", b"k", b"v")?;
    }
    let meta_before = fs::read(root.join("meta"))?;
    let data_before = fs::read(root.join("data.dvs"))?;

    let env = StorageEnvironment::open(
        StorageEnvironmentOptions::for_path(&root, OpenMode::ReadOnly),
        IoChangesNotifications::new(),
        CatastrophicFailureNotification::default(),
    )?;
    assert!(env.is_read_only());
    assert_eq!(env.get("t", b"k")?.as_deref(), Some(&b"v"[..]));
    assert!(env.put("t", b"k2", b"v2").is_err());
    // второй читатель совместим, писатель — нет
    let env2 = StorageEnvironment::open(
        StorageEnvironmentOptions::for_path(&root, OpenMode::ReadOnly),
        IoChangesNotifications::new(),
        CatastrophicFailureNotification::default(),
    )?;
    assert!(open_rw(&root).is_err());
    drop(env2);
    drop(env);

    assert_eq!(fs::read(root.join("meta"))?, meta_before);
    assert_eq!(fs::read(root.join("data.dvs"))?, data_before);

    // RO на пустом каталоге — ошибка, каталог не создаётся
    let missing = unique_root("ro-missing");
    assert!(StorageEnvironment::open(
        StorageEnvironmentOptions::for_path(&missing, OpenMode::ReadOnly),
        IoChangesNotifications::new(),
        CatastrophicFailureNotification::default(),
    )
    .is_err());
    assert!(!missing.exists());

    let _ = fs::remove_dir_all(&root);
    Ok(())
}

#[test]
fn closed_environment_refuses_snapshots_and_reports() -> Result<()> {
    init_logger();
    let root = unique_root("closed");
    let env = open_rw(&root)?;
    env.put("t", b"k", b"v")?;

    let tx = env.read_transaction()?;
    env.close()?;
    // снапшот, взятый до close, остаётся читаемым
    assert_eq!(tx.get("t", b"k"), Some(&b"v"[..]));
    assert!(env.generate_report(&tx).is_none());

    let err = env.read_transaction().err().expect("closed env");
    assert!(err.is::<OperationCancelled>());
    assert!(env.put("t", b"k", b"v").is_err());
    drop(tx);
    drop(env);

    let _ = fs::remove_dir_all(&root);
    Ok(())
}

#[test]
fn load_unload_cycle_without_writes_is_byte_stable() -> Result<()> {
    init_logger();
    let root = unique_root("stable");
    {
        let env = open_rw(&root)?;
        env.put("t", b"k", b"v")?;
    }
    let snapshot = |p: &Path| -> Result<Vec<(String, Vec<u8>)>> {
        let mut out = Vec::new();
        for name in ["meta", "data.dvs", "LOCK"] {
            out.push((name.to_string(), fs::read(p.join(name))?));
        }
        Ok(out)
    };
    let before = snapshot(&root)?;
    for _ in 0..2 {
        let env = open_rw(&root)?;
        drop(env);
    }
    assert_eq!(snapshot(&root)?, before);
    assert!(list_journals(&root)?.is_empty());

    let _ = fs::remove_dir_all(&root);
    Ok(())
}

#[test]
fn damaged_first_record_is_corruption_not_torn_tail() -> Result<()> {
    init_logger();
    // [16] — kind первой записи, [23] — старший байт key_len
    for (case, offset, byte) in [("kind", 16usize, 0u8), ("key-len", 23usize, 0x7f)] {
        let root = unique_root(&format!("mid-{case}"));
        {
            let env = open_rw(&root)?;
            env.put("t", b"k1", b"v1")?;
            env.put("t", b"k2", b"v2")?;
            env.put("t", b"k3", b"v3")?;
        }
        let data = root.join("data.dvs");
        let mut bytes = fs::read(&data)?;
        let len_before = bytes.len();
        bytes[offset] = byte;
        fs::write(&data, &bytes)?;

        let (handler, seen) = recording_handler();
        let err = StorageEnvironment::open(
            StorageEnvironmentOptions::for_path(&root, OpenMode::ReadWrite),
            IoChangesNotifications::new(),
            handler,
        )
        .expect_err("damaged record in the middle must fail open");

        assert!(err.downcast_ref::<StorageCorruption>().is_some(), "{case}: {:#}", err);
        assert_eq!(seen.lock().unwrap().len(), 1, "{case}");
        // ничего не отрезано
        assert_eq!(fs::metadata(&data)?.len(), len_before as u64, "{case}");

        let _ = fs::remove_dir_all(&root);
    }
    Ok(())
}

#[test]
fn garbage_after_zero_marker_is_corruption() -> Result<()> {
    init_logger();
    let root = unique_root("zero-garbage");
    {
        let env = open_rw(&root)?;
        env.put("t", b"k", b"v")?;
    }
    let data = root.join("data.dvs");
    {
        let mut f = OpenOptions::new().append(true).open(&data)?;
        f.write_all(&[0, 0, 0, 0, 7, 0])?;
    }

    let (handler, seen) = recording_handler();
    let err = StorageEnvironment::open(
        StorageEnvironmentOptions::for_path(&root, OpenMode::ReadWrite),
        IoChangesNotifications::new(),
        handler,
    )
    .expect_err("non-zero bytes after the end marker");
    assert!(err.downcast_ref::<StorageCorruption>().is_some(), "{:#}", err);
    assert_eq!(seen.lock().unwrap().len(), 1);

    let _ = fs::remove_dir_all(&root);
    Ok(())
}
