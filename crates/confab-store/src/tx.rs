//! Session-scoped units of work.
//!
//! A [`TransactionManager`] is created per logical request over exclusive
//! access to the [`Database`], so concurrent requests needing isolation each
//! get their own manager.  [`TransactionManager::run`] is the preferred
//! entry point: it opens a unit of work, runs the caller's closure against a
//! [`StoreCtx`], commits on success, and rolls back on failure while
//! re-raising the closure's error unchanged.  An abandoned unit of work
//! (early return, panic) is rolled back on drop, so partial writes are never
//! observable outside a successful commit.

use rusqlite::Connection;

use crate::database::Database;
use crate::error::{Result, StoreError};

/// Handle through which every typed store operation runs.
///
/// Obtained from [`Database::ctx`] for autocommit reads and standalone
/// writes, or from [`TransactionManager::ctx`] inside an open unit of work.
/// The CRUD modules (`rooms`, `messages`, `reactions`, `calls`) attach their
/// operations to this type, so transactional and autocommit callers share
/// one surface.
pub struct StoreCtx<'a> {
    conn: &'a Connection,
}

impl<'a> StoreCtx<'a> {
    pub(crate) fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    pub(crate) fn conn(&self) -> &Connection {
        self.conn
    }
}

/// Coordinates at most one open unit of work over a database handle.
pub struct TransactionManager<'db> {
    db: &'db mut Database,
    active: bool,
}

impl<'db> TransactionManager<'db> {
    pub fn new(db: &'db mut Database) -> Self {
        Self { db, active: false }
    }

    /// Open a new unit of work.
    ///
    /// Fails with [`StoreError::SessionUnavailable`] if one is already open
    /// on this manager or the store cannot start a transaction (e.g. the
    /// database is locked by another writer).
    pub fn begin(&mut self) -> Result<()> {
        if self.active {
            return Err(StoreError::SessionUnavailable(
                "a unit of work is already open on this manager".to_string(),
            ));
        }
        self.db
            .conn()
            .execute_batch("BEGIN IMMEDIATE")
            .map_err(|e| StoreError::SessionUnavailable(e.to_string()))?;
        self.active = true;
        Ok(())
    }

    /// Store operations scoped to the current session.
    ///
    /// Outside an open unit of work the returned context runs in autocommit
    /// mode; prefer [`Database::ctx`] for that case to keep intent clear.
    pub fn ctx(&self) -> StoreCtx<'_> {
        StoreCtx::new(self.db.conn())
    }

    /// Commit the open unit of work.
    pub fn commit(&mut self) -> Result<()> {
        if !self.active {
            return Err(StoreError::NoActiveSession);
        }
        self.db.conn().execute_batch("COMMIT")?;
        self.active = false;
        Ok(())
    }

    /// Roll back the open unit of work.
    pub fn rollback(&mut self) -> Result<()> {
        if !self.active {
            return Err(StoreError::NoActiveSession);
        }
        self.active = false;
        self.db.conn().execute_batch("ROLLBACK")?;
        Ok(())
    }

    /// Run `work` inside a unit of work: commit on `Ok`, roll back on `Err`
    /// and propagate the closure's error to the caller unchanged.
    pub fn run<T, E>(
        &mut self,
        work: impl FnOnce(&StoreCtx<'_>) -> std::result::Result<T, E>,
    ) -> std::result::Result<T, E>
    where
        E: From<StoreError>,
    {
        self.begin().map_err(E::from)?;
        let outcome = {
            let ctx = self.ctx();
            work(&ctx)
        };
        match outcome {
            Ok(value) => {
                self.commit().map_err(E::from)?;
                Ok(value)
            }
            Err(err) => {
                if let Err(rb) = self.rollback() {
                    tracing::warn!(error = %rb, "rollback failed after aborted unit of work");
                }
                Err(err)
            }
        }
    }
}

impl Drop for TransactionManager<'_> {
    fn drop(&mut self) {
        // Covers early returns and panics inside `run`'s closure.
        if self.active {
            if let Err(e) = self.db.conn().execute_batch("ROLLBACK") {
                tracing::warn!(error = %e, "failed to roll back abandoned unit of work");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open_db() -> (tempfile::TempDir, Database) {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open_at(&dir.path().join("tx.db")).unwrap();
        (dir, db)
    }

    fn count_reactions(db: &Database) -> i64 {
        db.conn()
            .query_row("SELECT COUNT(*) FROM reactions", [], |row| row.get(0))
            .unwrap()
    }

    fn insert_dummy_reaction(ctx: &StoreCtx<'_>) -> Result<()> {
        ctx.conn().execute(
            "INSERT INTO reactions (subject_id, user_id, kind, created_at)
             VALUES ('s', 'u', 'like', '2024-01-01T00:00:00+00:00')",
            [],
        )?;
        Ok(())
    }

    #[test]
    fn commit_without_begin_fails() {
        let (_dir, mut db) = open_db();
        let mut txm = TransactionManager::new(&mut db);
        assert!(matches!(txm.commit(), Err(StoreError::NoActiveSession)));
        assert!(matches!(txm.rollback(), Err(StoreError::NoActiveSession)));
    }

    #[test]
    fn begin_twice_fails() {
        let (_dir, mut db) = open_db();
        let mut txm = TransactionManager::new(&mut db);
        txm.begin().unwrap();
        assert!(matches!(
            txm.begin(),
            Err(StoreError::SessionUnavailable(_))
        ));
        txm.rollback().unwrap();
    }

    #[test]
    fn run_commits_on_success() {
        let (_dir, mut db) = open_db();
        let mut txm = TransactionManager::new(&mut db);
        txm.run(|ctx| insert_dummy_reaction(ctx)).unwrap();
        drop(txm);
        assert_eq!(count_reactions(&db), 1);
    }

    #[test]
    fn run_rolls_back_on_failure_and_propagates_error() {
        let (_dir, mut db) = open_db();
        let mut txm = TransactionManager::new(&mut db);
        let result: std::result::Result<(), StoreError> = txm.run(|ctx| {
            insert_dummy_reaction(ctx)?;
            Err(StoreError::NotFound)
        });
        assert!(matches!(result, Err(StoreError::NotFound)));
        drop(txm);
        assert_eq!(count_reactions(&db), 0);
    }

    #[test]
    fn drop_rolls_back_open_session() {
        let (_dir, mut db) = open_db();
        {
            let mut txm = TransactionManager::new(&mut db);
            txm.begin().unwrap();
            insert_dummy_reaction(&txm.ctx()).unwrap();
            // Dropped without commit.
        }
        assert_eq!(count_reactions(&db), 0);
    }
}
