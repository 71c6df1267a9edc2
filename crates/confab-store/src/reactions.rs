//! Reaction toggle engine.
//!
//! One reaction kind per user per subject, enforced by the primary key
//! `(subject_id, user_id)`.  Toggling the held kind removes it; toggling the
//! opposite kind replaces it in place.  Aggregates are always computed from
//! set membership, never from a stored counter that could drift.

use chrono::{DateTime, Utc};
use rusqlite::params;
use uuid::Uuid;

use confab_shared::{ReactionKind, UserId};

use crate::error::Result;
use crate::models::ReactionSummary;
use crate::tx::StoreCtx;

impl<'a> StoreCtx<'a> {
    /// Flip the user's `kind` reaction on a subject and return the resulting
    /// aggregate.  Calling twice with the same arguments restores the
    /// original state exactly.
    pub fn toggle_reaction(
        &self,
        subject_id: Uuid,
        user: UserId,
        kind: ReactionKind,
        at: DateTime<Utc>,
    ) -> Result<ReactionSummary> {
        let existing = self.user_reaction(subject_id, user)?;

        match existing {
            None => {
                self.conn().execute(
                    "INSERT INTO reactions (subject_id, user_id, kind, created_at)
                     VALUES (?1, ?2, ?3, ?4)",
                    params![
                        subject_id.to_string(),
                        user.to_string(),
                        kind.as_str(),
                        at.to_rfc3339(),
                    ],
                )?;
            }
            Some(held) if held == kind => {
                self.conn().execute(
                    "DELETE FROM reactions WHERE subject_id = ?1 AND user_id = ?2",
                    params![subject_id.to_string(), user.to_string()],
                )?;
            }
            Some(_) => {
                // Opposite kind held: replace in place, keeping the
                // one-reaction-per-user invariant.
                self.conn().execute(
                    "UPDATE reactions SET kind = ?3, created_at = ?4
                     WHERE subject_id = ?1 AND user_id = ?2",
                    params![
                        subject_id.to_string(),
                        user.to_string(),
                        kind.as_str(),
                        at.to_rfc3339(),
                    ],
                )?;
            }
        }

        self.reaction_summary(subject_id, user)
    }

    /// Aggregate counts and the querying user's own reaction for a subject.
    pub fn reaction_summary(&self, subject_id: Uuid, user: UserId) -> Result<ReactionSummary> {
        let (like_count, dislike_count): (i64, i64) = self.conn().query_row(
            "SELECT
                 COALESCE(SUM(CASE WHEN kind = 'like' THEN 1 ELSE 0 END), 0),
                 COALESCE(SUM(CASE WHEN kind = 'dislike' THEN 1 ELSE 0 END), 0)
             FROM reactions WHERE subject_id = ?1",
            params![subject_id.to_string()],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;

        Ok(ReactionSummary {
            subject_id,
            like_count: like_count.max(0) as u64,
            dislike_count: dislike_count.max(0) as u64,
            user_reaction: self.user_reaction(subject_id, user)?,
        })
    }

    /// Remove every reaction on a subject (moderation delete path).
    pub fn clear_reactions(&self, subject_id: Uuid) -> Result<usize> {
        let affected = self.conn().execute(
            "DELETE FROM reactions WHERE subject_id = ?1",
            params![subject_id.to_string()],
        )?;
        Ok(affected)
    }

    fn user_reaction(&self, subject_id: Uuid, user: UserId) -> Result<Option<ReactionKind>> {
        let kind: Option<String> = self
            .conn()
            .query_row(
                "SELECT kind FROM reactions WHERE subject_id = ?1 AND user_id = ?2",
                params![subject_id.to_string(), user.to_string()],
                |row| row.get(0),
            )
            .map(Some)
            .or_else(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => Ok(None),
                other => Err(other),
            })?;
        Ok(kind.as_deref().and_then(ReactionKind::parse))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::Database;

    fn open_db() -> (tempfile::TempDir, Database) {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open_at(&dir.path().join("reactions.db")).unwrap();
        (dir, db)
    }

    #[test]
    fn toggle_pair_restores_original_state() {
        let (_dir, db) = open_db();
        let subject = Uuid::new_v4();
        let user = UserId::new();
        let now = Utc::now();

        let before = db.ctx().reaction_summary(subject, user).unwrap();

        let on = db
            .ctx()
            .toggle_reaction(subject, user, ReactionKind::Like, now)
            .unwrap();
        assert_eq!(on.like_count, 1);
        assert_eq!(on.user_reaction, Some(ReactionKind::Like));

        let off = db
            .ctx()
            .toggle_reaction(subject, user, ReactionKind::Like, now)
            .unwrap();
        assert_eq!(off, before);
        assert_eq!(off.like_count, 0);
        assert_eq!(off.user_reaction, None);
    }

    #[test]
    fn opposite_kind_replaces_existing_reaction() {
        let (_dir, db) = open_db();
        let subject = Uuid::new_v4();
        let user = UserId::new();
        let now = Utc::now();

        db.ctx()
            .toggle_reaction(subject, user, ReactionKind::Like, now)
            .unwrap();
        let summary = db
            .ctx()
            .toggle_reaction(subject, user, ReactionKind::Dislike, now)
            .unwrap();

        assert_eq!(summary.like_count, 0);
        assert_eq!(summary.dislike_count, 1);
        assert_eq!(summary.user_reaction, Some(ReactionKind::Dislike));
    }

    #[test]
    fn counts_come_from_set_membership() {
        let (_dir, db) = open_db();
        let subject = Uuid::new_v4();
        let now = Utc::now();

        let (a, b, c) = (UserId::new(), UserId::new(), UserId::new());
        db.ctx()
            .toggle_reaction(subject, a, ReactionKind::Like, now)
            .unwrap();
        db.ctx()
            .toggle_reaction(subject, b, ReactionKind::Like, now)
            .unwrap();
        let summary = db
            .ctx()
            .toggle_reaction(subject, c, ReactionKind::Dislike, now)
            .unwrap();

        assert_eq!(summary.like_count, 2);
        assert_eq!(summary.dislike_count, 1);

        // Clearing the subject drops every row at once.
        assert_eq!(db.ctx().clear_reactions(subject).unwrap(), 3);
        let empty = db.ctx().reaction_summary(subject, a).unwrap();
        assert_eq!(empty.like_count, 0);
        assert_eq!(empty.dislike_count, 0);
    }
}
