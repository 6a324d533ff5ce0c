use std::fs::{self, OpenOptions};
use std::path::Path;
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::{Duration, Instant};

use tempfile::tempdir;

use crate::backends::FileBackend;
use crate::config::BackendConfig;
use crate::plugin_system::traits::{Backend, BackendErrorKind, Version};

fn backend_in(root: &Path, timeout: Duration) -> FileBackend {
    FileBackend::new("file/test", root.to_path_buf(), timeout).unwrap()
}

#[test]
fn test_put_get_overwrite() {
    let temp_dir = tempdir().unwrap();
    let backend = backend_in(temp_dir.path(), Duration::from_secs(1));

    backend.put("production/app/key", b"a much longer first value").unwrap();
    assert_eq!(backend.get("production/app/key").unwrap(), b"a much longer first value");

    // Shorter second write leaves no trailing bytes behind
    backend.put("production/app/key", b"short").unwrap();
    assert_eq!(backend.get("production/app/key").unwrap(), b"short");
    assert_eq!(fs::read(temp_dir.path().join("production/app/key")).unwrap(), b"short");
}

#[cfg(unix)]
#[test]
fn test_put_normalizes_permissions() {
    use std::os::unix::fs::PermissionsExt;

    let temp_dir = tempdir().unwrap();
    let backend = backend_in(temp_dir.path(), Duration::from_secs(1));
    backend.put("k", b"{}").unwrap();

    let mode = fs::metadata(temp_dir.path().join("k")).unwrap().permissions().mode() & 0o777;
    assert_eq!(mode, 0o640);
}

#[test]
fn test_get_failures_are_classified() {
    let temp_dir = tempdir().unwrap();
    let backend = backend_in(temp_dir.path(), Duration::from_secs(1));
    backend.put("folder/child", b"x").unwrap();

    assert_eq!(backend.get("missing").unwrap_err().kind, BackendErrorKind::NotFound);
    assert_eq!(backend.get("folder").unwrap_err().kind, BackendErrorKind::IsFolder);
    assert_eq!(backend.put("folder", b"y").unwrap_err().kind, BackendErrorKind::IsFolder);
    assert_eq!(backend.delete("folder").unwrap_err().kind, BackendErrorKind::IsFolder);
}

#[test]
fn test_lock_timeout_leaves_file_unmodified() {
    let temp_dir = tempdir().unwrap();
    let backend = backend_in(temp_dir.path(), Duration::from_millis(200));
    backend.put("locked", b"original").unwrap();

    // Hold the lock through an independent handle, as another process would
    let holder = OpenOptions::new().read(true).open(temp_dir.path().join("locked")).unwrap();
    fs2::FileExt::lock_exclusive(&holder).unwrap();

    let started = Instant::now();
    let err = backend.put("locked", b"replacement").unwrap_err();
    assert_eq!(err.kind, BackendErrorKind::LockTimeout);
    assert!(err.message.contains("timed out waiting for lock"));
    assert!(err.is_retryable());
    assert!(started.elapsed() >= Duration::from_millis(200));

    let err = backend.get("locked").unwrap_err();
    assert_eq!(err.kind, BackendErrorKind::LockTimeout);

    assert_eq!(fs::read(temp_dir.path().join("locked")).unwrap(), b"original");

    drop(holder);
    backend.put("locked", b"replacement").unwrap();
    assert_eq!(backend.get("locked").unwrap(), b"replacement");
}

#[test]
fn test_concurrent_puts_never_interleave() {
    let temp_dir = tempdir().unwrap();
    let backend = Arc::new(backend_in(temp_dir.path(), Duration::from_secs(5)));
    let barrier = Arc::new(Barrier::new(4));

    let handles: Vec<_> = (0..4u8)
        .map(|i| {
            let backend = Arc::clone(&backend);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                let value = vec![b'a' + i; 64 * 1024];
                barrier.wait();
                for _ in 0..10 {
                    backend.put("contended", &value).unwrap();
                    let read = backend.get("contended").unwrap();
                    assert_eq!(read.len(), 64 * 1024);
                    assert!(read.iter().all(|b| *b == read[0]), "value mixes two writes");
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }
}

#[test]
fn test_delete_is_idempotent() {
    let temp_dir = tempdir().unwrap();
    let backend = backend_in(temp_dir.path(), Duration::from_secs(1));

    backend.put("k", b"v").unwrap();
    backend.delete("k").unwrap();
    assert!(!backend.exists("k").unwrap());
    backend.delete("k").unwrap();
    backend.delete("never/existed").unwrap();
}

#[test]
fn test_deletetree() {
    let temp_dir = tempdir().unwrap();
    let backend = backend_in(temp_dir.path(), Duration::from_secs(1));

    backend.put("tree/a", b"1").unwrap();
    backend.put("tree/sub/b", b"2").unwrap();
    backend.deletetree("tree").unwrap();
    assert!(!backend.exists("tree").unwrap());

    // Already gone
    backend.deletetree("tree").unwrap();
}

#[test]
fn test_list_single_level() {
    let temp_dir = tempdir().unwrap();
    let backend = backend_in(temp_dir.path(), Duration::from_secs(1));

    backend.put("app1/x", b"1").unwrap();
    backend.put("app1/y", b"2").unwrap();
    backend.put("app1/sub/z", b"3").unwrap();

    let listing = backend.list("app1").unwrap();
    assert_eq!(listing.keys.keys().cloned().collect::<Vec<_>>(), vec!["x", "y"]);
    assert_eq!(listing.keys["x"], b"1");
    assert_eq!(listing.folders, vec!["sub".to_string()]);

    assert_eq!(backend.list("nope").unwrap_err().kind, BackendErrorKind::NotFound);
}

#[test]
fn test_list_skips_locked_entries() {
    let temp_dir = tempdir().unwrap();
    let backend = backend_in(temp_dir.path(), Duration::from_millis(50));

    backend.put("dir/free", b"1").unwrap();
    backend.put("dir/held", b"2").unwrap();

    let holder = OpenOptions::new().read(true).open(temp_dir.path().join("dir/held")).unwrap();
    fs2::FileExt::lock_exclusive(&holder).unwrap();

    let listing = backend.list("dir").unwrap();
    assert_eq!(listing.keys.len(), 1);
    assert!(listing.keys.contains_key("free"));
}

#[test]
fn test_no_atomic_support() {
    let temp_dir = tempdir().unwrap();
    let backend = backend_in(temp_dir.path(), Duration::from_secs(1));

    assert!(!backend.supports_atomic());
    let err = backend.atomic_put("k", b"v", Version::ABSENT).unwrap_err();
    assert_eq!(err.kind, BackendErrorKind::Unsupported);
    assert!(err.message.contains("file/test"));
}

#[test]
fn test_explicit_root_must_be_creatable() {
    let temp_dir = tempdir().unwrap();
    let blocker = temp_dir.path().join("not_a_dir");
    fs::write(&blocker, b"").unwrap();

    let config = BackendConfig::new("file", "x").with_setting("root_path", blocker.join("root").to_str().unwrap());
    let err = FileBackend::from_config("file/x", "x", &config).unwrap_err();
    assert_eq!(err.kind, BackendErrorKind::InvalidConfig);
}

#[test]
fn test_root_falls_back_when_preferred_missing() {
    let temp_dir = tempdir().unwrap();
    let preferred = temp_dir.path().join("does_not_exist");
    let fallback = temp_dir.path().join("fallback");

    let config = BackendConfig::new("file", "main")
        .with_setting("preferred_root", preferred.to_str().unwrap())
        .with_setting("fallback_root", fallback.to_str().unwrap());
    let backend = FileBackend::from_config("file/main", "main", &config).unwrap();
    assert_eq!(backend.root(), fallback.join("file").join("main"));
    assert!(!preferred.exists());
}

#[test]
fn test_root_uses_existing_preferred() {
    let temp_dir = tempdir().unwrap();
    let config = BackendConfig::new("file", "main")
        .with_setting("preferred_root", temp_dir.path().to_str().unwrap())
        .with_setting("lock_timeout_seconds", 0.5);
    let backend = FileBackend::from_config("file/main", "main", &config).unwrap();
    assert_eq!(backend.root(), temp_dir.path().join("file").join("main"));
    assert_eq!(backend.lock_timeout(), Duration::from_millis(500));
}

#[test]
fn test_invalid_timeout_setting() {
    let temp_dir = tempdir().unwrap();
    let config = BackendConfig::new("file", "main")
        .with_setting("root_path", temp_dir.path().to_str().unwrap())
        .with_setting("lock_timeout_seconds", "soon");
    let err = FileBackend::from_config("file/main", "main", &config).unwrap_err();
    assert_eq!(err.kind, BackendErrorKind::InvalidConfig);
    assert!(err.message.contains("lock_timeout_seconds"));
}
