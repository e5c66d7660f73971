//! Fallible access to the cache tables.

use crate::error::{ErrorKind, Result};
use crate::models::{CourseRow, ResourceRow};
use crate::{CacheRecord, Database, Lookup};
use exn::ResultExt;
use lectern_model::{Course, CourseId, MediaKind};
use sqlx::SqlitePool;
use time::UtcDateTime;

/// Repository for resources, known-bad URLs and courses.
///
/// Every method surfaces errors. Callers that must not fail on a broken
/// store should go through [`Cache`](crate::Cache) instead.
#[derive(Debug, Clone)]
pub struct Repository {
    pool: SqlitePool,
}
impl From<&Database> for Repository {
    fn from(db: &Database) -> Self {
        Self { pool: db.pool().clone() }
    }
}
impl Repository {
    fn course_id(course: CourseId) -> Result<i64> {
        i64::try_from(course.0).or_raise(|| ErrorKind::InvalidData("course id"))
    }

    // =========================================================================
    // Resources
    // =========================================================================

    /// Look up what previous runs know about `url` within `course`.
    ///
    /// A known-bad URL wins over any stored record: the URL is bad no matter
    /// which course it shows up in.
    pub async fn lookup(&self, url: impl AsRef<str>, course: CourseId) -> Result<Lookup> {
        let url = url.as_ref();
        let bad: bool = sqlx::query_scalar(include_str!("../queries/is_bad_url.sql"))
            .bind(url)
            .fetch_one(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        if bad {
            return Ok(Lookup::KnownBad);
        }
        let row: Option<ResourceRow> = sqlx::query_as(include_str!("../queries/get_resource.sql"))
            .bind(url)
            .bind(Self::course_id(course)?)
            .fetch_optional(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        match row {
            Some(row) => Ok(Lookup::Record(row.try_into()?)),
            None => Ok(Lookup::Unknown),
        }
    }

    /// Insert or replace the record for `(record.url, record.course)`.
    ///
    /// Last writer wins; each resource is owned by exactly one worker.
    pub async fn upsert(&self, record: &CacheRecord) -> Result<()> {
        let row = ResourceRow::try_from(record)?;
        sqlx::query(include_str!("../queries/upsert_resource.sql"))
            .bind(row.url)
            .bind(row.course_id)
            .bind(row.download_url)
            .bind(row.name)
            .bind(row.directory)
            .bind(row.kind)
            .bind(row.size_unit)
            .bind(row.size_value)
            .bind(row.modified_at)
            .bind(row.checksum)
            .bind(row.corrupted)
            .bind(UtcDateTime::now().unix_timestamp())
            .execute(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        Ok(())
    }

    // =========================================================================
    // Known-bad URLs
    // =========================================================================

    /// Record `url` as known-bad. `kind` is the data kind the resource was
    /// discovered as, which is what [`evict_bad_for_kinds`](Self::evict_bad_for_kinds)
    /// matches against.
    pub async fn mark_bad(&self, url: impl AsRef<str>, kind: MediaKind) -> Result<()> {
        sqlx::query(include_str!("../queries/insert_bad_url.sql"))
            .bind(url.as_ref())
            .bind(kind.to_string())
            .bind(UtcDateTime::now().unix_timestamp())
            .execute(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        Ok(())
    }

    /// Forget that `url` was bad. Returns `true` if a marker was removed.
    pub async fn evict_bad(&self, url: impl AsRef<str>) -> Result<bool> {
        let result = sqlx::query(include_str!("../queries/delete_bad_url.sql"))
            .bind(url.as_ref())
            .execute(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        Ok(result.rows_affected() > 0)
    }

    /// Forget every known-bad URL recorded for any of `kinds`, returning how
    /// many markers were removed.
    pub async fn evict_bad_for_kinds(&self, kinds: &[MediaKind]) -> Result<u64> {
        if kinds.is_empty() {
            return Ok(0);
        }
        let mut tx = self.pool.begin().await.or_raise(|| ErrorKind::Database)?;
        let mut removed = 0;
        for kind in kinds {
            let result = sqlx::query(include_str!("../queries/delete_bad_urls_for_kind.sql"))
                .bind(kind.to_string())
                .execute(&mut *tx)
                .await
                .or_raise(|| ErrorKind::Database)?;
            removed += result.rows_affected();
        }
        tx.commit().await.or_raise(|| ErrorKind::Database)?;
        Ok(removed)
    }

    // =========================================================================
    // Courses
    // =========================================================================

    pub async fn list_courses(&self) -> Result<Vec<Course>> {
        let rows: Vec<CourseRow> = sqlx::query_as(include_str!("../queries/list_courses.sql"))
            .fetch_all(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        rows.into_iter().map(Course::try_from).collect()
    }

    /// Insert a course, or rename it if the id is already known.
    pub async fn add_course(&self, course: &Course) -> Result<()> {
        let row = CourseRow::try_from(course)?;
        sqlx::query(include_str!("../queries/upsert_course.sql"))
            .bind(row.id)
            .bind(row.name)
            .execute(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        Ok(())
    }
}
