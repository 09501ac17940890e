//! Persistence backend tests (file sidecar locks and shared-table locks)

#[cfg(test)]
mod tests {
    use std::fs;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;
    use tempfile::TempDir;
    use worldstore::backend::{
        Backend, BackendError, FileBackend, LockPolicy, MemoryTable, OwnerId, TableBackend,
        WorldTable,
    };

    const BLOB: &[u8] = b"not decoded at this layer";

    fn policy(ms: u64) -> LockPolicy {
        LockPolicy {
            stale_after: Duration::from_millis(ms),
        }
    }

    /// Two file backends ("processes") sharing one directory.
    fn file_pair(stale_ms: u64) -> (TempDir, FileBackend, FileBackend) {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("alpha.world"), BLOB).unwrap();
        let a = FileBackend::new(dir.path())
            .unwrap()
            .with_owner(OwnerId::new("server-a"))
            .with_policy(policy(stale_ms));
        let b = FileBackend::new(dir.path())
            .unwrap()
            .with_owner(OwnerId::new("server-b"))
            .with_policy(policy(stale_ms));
        (dir, a, b)
    }

    /// Two table backends sharing one table.
    fn table_pair(stale_ms: u64) -> (Arc<MemoryTable>, TableBackend, TableBackend) {
        let table = Arc::new(MemoryTable::new());
        table.insert_world("alpha", BLOB.to_vec());
        let a = TableBackend::new(table.clone())
            .with_owner(OwnerId::new("server-a"))
            .with_policy(policy(stale_ms));
        let b = TableBackend::new(table.clone())
            .with_owner(OwnerId::new("server-b"))
            .with_policy(policy(stale_ms));
        (table, a, b)
    }

    // -----------------------------------------------------------------------
    // Shared behaviour
    // -----------------------------------------------------------------------

    fn locked_read_excludes_other_owner(a: &dyn Backend, b: &dyn Backend) {
        let read = a.read_world_bytes("alpha", false).unwrap();
        assert_eq!(read.bytes.as_ref(), BLOB);
        let token = read.token.expect("locked read returns a token");
        assert_eq!(token.world, "alpha");

        match b.read_world_bytes("alpha", false) {
            Err(BackendError::WorldInUse { holder }) => assert_eq!(holder, "server-a"),
            other => panic!("expected WorldInUse, got {other:?}"),
        }
        assert_eq!(
            a.lock_info("alpha").unwrap().map(|i| i.owner),
            Some(OwnerId::new("server-a"))
        );

        a.release_lock("alpha", &token).unwrap();
        assert_eq!(a.lock_info("alpha").unwrap(), None);
        let again = b.read_world_bytes("alpha", false).unwrap();
        b.release_lock("alpha", &again.token.unwrap()).unwrap();
    }

    fn read_only_never_locks(a: &dyn Backend, b: &dyn Backend) {
        let held = a.read_world_bytes("alpha", false).unwrap();
        let ro = b.read_world_bytes("alpha", true).unwrap();
        assert!(ro.token.is_none());
        assert_eq!(ro.bytes.as_ref(), BLOB);
        // The read-only read left the holder untouched.
        assert_eq!(
            b.lock_info("alpha").unwrap().map(|i| i.owner),
            Some(OwnerId::new("server-a"))
        );
        a.release_lock("alpha", &held.token.unwrap()).unwrap();
    }

    fn write_requires_the_lock(a: &dyn Backend, b: &dyn Backend) {
        let read = a.read_world_bytes("alpha", false).unwrap();
        let token = read.token.unwrap();
        a.write_world_bytes("alpha", &token, b"updated").unwrap();
        assert_eq!(b.read_world_bytes("alpha", true).unwrap().bytes.as_ref(), b"updated");

        // A released token: rejected with or without a current holder.
        let b_token = {
            a.release_lock("alpha", &token).unwrap();
            let t = b.acquire_lock("alpha").unwrap();
            b.release_lock("alpha", &t).unwrap();
            t
        };
        assert_eq!(
            b.write_world_bytes("alpha", &b_token, b"stale token"),
            Err(BackendError::NotLockHolder)
        );
        let fresh = a.acquire_lock("alpha").unwrap();
        assert!(matches!(
            b.write_world_bytes("alpha", &b_token, b"stale token"),
            Err(BackendError::WorldInUse { .. })
        ));
        a.release_lock("alpha", &fresh).unwrap();
    }

    fn missing_world_is_unknown(a: &dyn Backend) {
        assert_eq!(
            a.read_world_bytes("nowhere", false).unwrap_err(),
            BackendError::UnknownWorld
        );
        assert_eq!(
            a.read_world_bytes("nowhere", true).unwrap_err(),
            BackendError::UnknownWorld
        );
        assert!(!a.world_exists("nowhere").unwrap());
        assert!(a.world_exists("alpha").unwrap());
        // A failed locked read leaves no lock behind.
        assert_eq!(a.lock_info("nowhere").unwrap(), None);
    }

    fn force_unlock_reports_presence(a: &dyn Backend, b: &dyn Backend) {
        let token = a.acquire_lock("alpha").unwrap();
        assert!(b.force_unlock("alpha").unwrap());
        assert!(!b.force_unlock("alpha").unwrap());
        assert_eq!(
            a.release_lock("alpha", &token),
            Err(BackendError::NotLockHolder)
        );
        let t = b.read_world_bytes("alpha", false).unwrap().token.unwrap();
        b.release_lock("alpha", &t).unwrap();
    }

    fn stale_lock_is_reclaimed(a: &dyn Backend, b: &dyn Backend) {
        let old = a.acquire_lock("alpha").unwrap();
        thread::sleep(Duration::from_millis(150));
        let taken = b.read_world_bytes("alpha", false).unwrap().token.unwrap();
        assert_eq!(taken.owner, OwnerId::new("server-b"));
        // The previous holder learns it lost the lock.
        assert!(matches!(
            a.heartbeat("alpha", &old),
            Err(BackendError::WorldInUse { .. })
        ));
        b.release_lock("alpha", &taken).unwrap();
    }

    fn heartbeat_keeps_lock_fresh(a: &dyn Backend, b: &dyn Backend) {
        let token = a.acquire_lock("alpha").unwrap();
        thread::sleep(Duration::from_millis(600));
        a.heartbeat("alpha", &token).unwrap();
        thread::sleep(Duration::from_millis(600));
        assert!(matches!(
            b.acquire_lock("alpha"),
            Err(BackendError::WorldInUse { .. })
        ));
        a.release_lock("alpha", &token).unwrap();
    }

    fn heartbeat_after_takeover_leaves_new_holder(a: &dyn Backend, b: &dyn Backend) {
        let old = a.acquire_lock("alpha").unwrap();
        assert!(b.force_unlock("alpha").unwrap());
        let taken = b.acquire_lock("alpha").unwrap();

        assert!(matches!(
            a.heartbeat("alpha", &old),
            Err(BackendError::WorldInUse { .. })
        ));
        let info = b.lock_info("alpha").unwrap().unwrap();
        assert_eq!(info.owner, OwnerId::new("server-b"));
        b.heartbeat("alpha", &taken).unwrap();
        b.release_lock("alpha", &taken).unwrap();
        assert_eq!(
            a.heartbeat("alpha", &old),
            Err(BackendError::NotLockHolder)
        );
    }

    fn rejects_escaping_names(a: &dyn Backend) {
        for name in ["", ".", "..", ".hidden", "a/b", "a\\b", "bad\nname"] {
            assert_eq!(
                a.read_world_bytes(name, true).unwrap_err(),
                BackendError::InvalidName(name.to_string())
            );
        }
    }

    // -----------------------------------------------------------------------
    // File backend
    // -----------------------------------------------------------------------

    #[test]
    fn file_locked_read_excludes_other_owner() {
        let (_dir, a, b) = file_pair(300_000);
        locked_read_excludes_other_owner(&a, &b);
    }

    #[test]
    fn file_read_only_never_locks() {
        let (_dir, a, b) = file_pair(300_000);
        read_only_never_locks(&a, &b);
    }

    #[test]
    fn file_write_requires_the_lock() {
        let (_dir, a, b) = file_pair(300_000);
        write_requires_the_lock(&a, &b);
    }

    #[test]
    fn file_missing_world_is_unknown() {
        let (_dir, a, _b) = file_pair(300_000);
        missing_world_is_unknown(&a);
    }

    #[test]
    fn file_force_unlock_reports_presence() {
        let (_dir, a, b) = file_pair(300_000);
        force_unlock_reports_presence(&a, &b);
    }

    #[test]
    fn file_stale_lock_is_reclaimed() {
        let (_dir, a, b) = file_pair(50);
        stale_lock_is_reclaimed(&a, &b);
    }

    #[test]
    fn file_fresh_lock_is_not_reclaimed() {
        let (_dir, a, b) = file_pair(300_000);
        let token = a.acquire_lock("alpha").unwrap();
        thread::sleep(Duration::from_millis(100));
        assert!(matches!(
            b.acquire_lock("alpha"),
            Err(BackendError::WorldInUse { .. })
        ));
        a.release_lock("alpha", &token).unwrap();
    }

    #[test]
    fn file_heartbeat_keeps_lock_fresh() {
        let (_dir, a, b) = file_pair(1_000);
        heartbeat_keeps_lock_fresh(&a, &b);
    }

    #[test]
    fn file_heartbeat_after_takeover_leaves_new_holder() {
        let (_dir, a, b) = file_pair(300_000);
        heartbeat_after_takeover_leaves_new_holder(&a, &b);
    }

    #[test]
    fn file_rejects_escaping_names() {
        let (_dir, a, _b) = file_pair(300_000);
        rejects_escaping_names(&a);
    }

    #[test]
    fn file_unreadable_lock_counts_as_held() {
        let (dir, a, _b) = file_pair(300_000);
        fs::write(dir.path().join("alpha.world.lock"), b"{ not json").unwrap();
        match a.read_world_bytes("alpha", false) {
            Err(BackendError::WorldInUse { holder }) => {
                assert_eq!(holder, "<unreadable lock file>")
            }
            other => panic!("expected WorldInUse, got {other:?}"),
        }
        assert!(a.force_unlock("alpha").unwrap());
        assert!(a.read_world_bytes("alpha", false).is_ok());
    }

    #[test]
    fn file_list_skips_locks_and_temp_files() {
        let (dir, a, _b) = file_pair(300_000);
        fs::write(dir.path().join("beta.world"), BLOB).unwrap();
        fs::write(dir.path().join(".beta.data.x.1.tmp"), BLOB).unwrap();
        fs::write(dir.path().join("notes.txt"), BLOB).unwrap();
        let token = a.acquire_lock("beta").unwrap();

        assert_eq!(a.list_worlds().unwrap(), vec!["alpha", "beta"]);
        a.release_lock("beta", &token).unwrap();
    }

    #[test]
    fn file_lock_sidecar_is_json() {
        let (dir, a, _b) = file_pair(300_000);
        let token = a.acquire_lock("alpha").unwrap();
        let raw = fs::read(dir.path().join("alpha.world.lock")).unwrap();
        let record: serde_json::Value = serde_json::from_slice(&raw).unwrap();
        assert_eq!(record["owner"], "server-a");
        assert_eq!(record["nonce"], token.nonce);
        a.release_lock("alpha", &token).unwrap();
        assert!(!dir.path().join("alpha.world.lock").exists());
    }

    // -----------------------------------------------------------------------
    // Table backend
    // -----------------------------------------------------------------------

    #[test]
    fn table_locked_read_excludes_other_owner() {
        let (_t, a, b) = table_pair(300_000);
        locked_read_excludes_other_owner(&a, &b);
    }

    #[test]
    fn table_read_only_never_locks() {
        let (_t, a, b) = table_pair(300_000);
        read_only_never_locks(&a, &b);
    }

    #[test]
    fn table_write_requires_the_lock() {
        let (_t, a, b) = table_pair(300_000);
        write_requires_the_lock(&a, &b);
    }

    #[test]
    fn table_missing_world_is_unknown() {
        let (_t, a, _b) = table_pair(300_000);
        missing_world_is_unknown(&a);
    }

    #[test]
    fn table_force_unlock_reports_presence() {
        let (_t, a, b) = table_pair(300_000);
        force_unlock_reports_presence(&a, &b);
    }

    #[test]
    fn table_stale_lock_is_reclaimed() {
        let (_t, a, b) = table_pair(50);
        stale_lock_is_reclaimed(&a, &b);
    }

    #[test]
    fn table_heartbeat_keeps_lock_fresh() {
        let (_t, a, b) = table_pair(1_000);
        heartbeat_keeps_lock_fresh(&a, &b);
    }

    #[test]
    fn table_heartbeat_after_takeover_leaves_new_holder() {
        let (_t, a, b) = table_pair(300_000);
        heartbeat_after_takeover_leaves_new_holder(&a, &b);
    }

    #[test]
    fn table_rejects_escaping_names() {
        let (_t, a, _b) = table_pair(300_000);
        rejects_escaping_names(&a);
    }

    #[test]
    fn table_lock_on_unsaved_world_leaves_no_row() {
        let (table, a, _b) = table_pair(300_000);
        let token = a.acquire_lock("fresh").unwrap();
        assert!(!a.world_exists("fresh").unwrap());
        a.write_world_bytes("fresh", &token, BLOB).unwrap();
        assert_eq!(a.list_worlds().unwrap(), vec!["alpha", "fresh"]);
        a.release_lock("fresh", &token).unwrap();

        let other = a.acquire_lock("ghost").unwrap();
        a.release_lock("ghost", &other).unwrap();
        assert_eq!(table.names().unwrap(), vec!["alpha", "fresh"]);
    }
}
