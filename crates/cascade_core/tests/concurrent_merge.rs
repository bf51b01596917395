use cascade_core::db::open_db;
use cascade_core::{
    MergeLocks, Parent, ParentService, ReferencedChild, RepoError, SqliteParentRepository,
};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;

type Service<'conn> = ParentService<ReferencedChild, SqliteParentRepository<'conn, ReferencedChild>>;

fn children(ids: &[i64], label: &str) -> Vec<ReferencedChild> {
    ids.iter()
        .map(|id| ReferencedChild::new(*id, format!("{label}-{id}")))
        .collect()
}

/// Root and children all carry `label`, so a mixed read is detectable.
fn uniform(label: &str, ids: &[i64]) -> Parent<ReferencedChild> {
    Parent::with_children(
        1,
        label,
        ids.iter().map(|id| ReferencedChild::new(*id, label)),
    )
}

fn seed(path: &Path) {
    let conn = open_db(path).unwrap();
    let service: Service<'_> = ParentService::new(SqliteParentRepository::try_new(&conn).unwrap());
    service
        .save(&Parent::with_children(1, "p1desc", children(&[1, 2], "seed")))
        .unwrap();
    service
        .save(&Parent::with_children(2, "p2desc", children(&[10], "seed")))
        .unwrap();
}

#[test]
fn merge_on_locked_parent_reports_concurrent_modification() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("locked.db");
    seed(&path);

    let locks = Arc::new(MergeLocks::new(Duration::from_millis(50)));
    let conn = open_db(&path).unwrap();
    let service: Service<'_> =
        ParentService::with_locks(SqliteParentRepository::try_new(&conn).unwrap(), Arc::clone(&locks));

    let _held = locks.acquire(1).unwrap();
    let err = service
        .merge(&Parent::with_children(1, "blocked", children(&[1], "x")))
        .unwrap_err();
    assert!(matches!(err, RepoError::ConcurrentModification(1)));
    assert!(matches!(
        service.delete(1),
        Err(RepoError::ConcurrentModification(1))
    ));

    // Other parents are not blocked.
    let outcome = service
        .merge(&Parent::with_children(2, "free", children(&[10, 11], "y")))
        .unwrap();
    assert_eq!(outcome.parent.children.len(), 2);
}

#[test]
fn concurrent_merges_on_one_parent_never_interleave() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("race.db");
    seed(&path);

    let locks = Arc::new(MergeLocks::default());
    let barrier = Arc::new(Barrier::new(2));
    let candidates = [
        children(&[1, 3, 5], "left"),
        children(&[2, 4, 6], "right"),
    ];

    let handles: Vec<_> = candidates
        .iter()
        .cloned()
        .map(|incoming| {
            let path = path.clone();
            let locks = Arc::clone(&locks);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                let conn = open_db(&path).unwrap();
                let service: Service<'_> = ParentService::with_locks(
                    SqliteParentRepository::try_new(&conn).unwrap(),
                    locks,
                );
                barrier.wait();
                for _ in 0..20 {
                    service
                        .merge(&Parent::with_children(1, "raced", incoming.clone()))
                        .unwrap();
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }

    let conn = open_db(&path).unwrap();
    let service: Service<'_> = ParentService::new(SqliteParentRepository::try_new(&conn).unwrap());
    let merged = service.get(1).unwrap();
    assert!(
        candidates.iter().any(|set| *set == merged.children),
        "children must match exactly one merge, got {:?}",
        merged.children
    );
    assert_eq!(service.get(2).unwrap().children, children(&[10], "seed"));
}

#[test]
fn merge_blocked_by_another_connection_reports_concurrent_modification() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("busy.db");
    seed(&path);

    let conn = open_db(&path).unwrap();
    conn.busy_timeout(Duration::from_millis(50)).unwrap();
    let service: Service<'_> = ParentService::new(SqliteParentRepository::try_new(&conn).unwrap());

    let blocker = open_db(&path).unwrap();
    blocker.execute_batch("BEGIN IMMEDIATE;").unwrap();

    let err = service
        .merge(&Parent::with_children(1, "blocked", children(&[1], "x")))
        .unwrap_err();
    assert!(matches!(err, RepoError::ConcurrentModification(1)));
    assert!(matches!(
        service.delete(1),
        Err(RepoError::ConcurrentModification(1))
    ));
    // Readers still see the last committed state.
    assert_eq!(
        service.get(1).unwrap().description.as_deref(),
        Some("p1desc")
    );

    blocker.execute_batch("ROLLBACK;").unwrap();
    let outcome = service
        .merge(&Parent::with_children(1, "unblocked", children(&[1], "x")))
        .unwrap();
    assert_eq!(outcome.parent.description.as_deref(), Some("unblocked"));
}

#[test]
fn get_from_another_connection_never_sees_a_partial_merge() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("snapshot.db");
    {
        let conn = open_db(&path).unwrap();
        let service: Service<'_> =
            ParentService::new(SqliteParentRepository::try_new(&conn).unwrap());
        service.save(&uniform("L", &[1, 2])).unwrap();
    }

    let done = Arc::new(AtomicBool::new(false));
    let writer = {
        let path = path.clone();
        let done = Arc::clone(&done);
        thread::spawn(move || {
            let conn = open_db(&path).unwrap();
            let service: Service<'_> =
                ParentService::new(SqliteParentRepository::try_new(&conn).unwrap());
            for round in 0..200 {
                let next = if round % 2 == 0 {
                    uniform("R", &[2, 3, 4])
                } else {
                    uniform("L", &[1, 2])
                };
                service.merge(&next).unwrap();
            }
            done.store(true, Ordering::SeqCst);
        })
    };

    let conn = open_db(&path).unwrap();
    let service: Service<'_> = ParentService::new(SqliteParentRepository::try_new(&conn).unwrap());
    let mut mixed = Vec::new();
    loop {
        let finished = done.load(Ordering::SeqCst);
        let loaded = service.get(1).unwrap();
        if loaded
            .children
            .iter()
            .any(|child| child.description != loaded.description)
        {
            mixed.push(loaded);
        }
        if finished {
            break;
        }
    }
    writer.join().unwrap();

    assert!(mixed.is_empty(), "mixed snapshots: {mixed:?}");
}
