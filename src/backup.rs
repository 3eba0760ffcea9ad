// SPDX-FileCopyrightText: 2025 Hyperpolymath
// SPDX-License-Identifier: PMPL-1.0-or-later

//! Backup persistence of accepted submissions.
//!
//! Every record is stored under its own id; a per-day index lists the ids
//! created that day so the admin endpoint can enumerate them. The index
//! append is a read-modify-write and may lose an id under concurrent
//! writes, which only affects listing, never the record itself.

use crate::models::{index_key, BackupRecord, Submission};
use crate::store::{get_json, put_json, KvStore, StoreError};
use chrono::{DateTime, Days, NaiveDate, Utc};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Records and daily indexes on top of a [`KvStore`].
#[derive(Clone)]
pub struct BackupStore {
    store: Arc<dyn KvStore>,
    retention: Duration,
}

impl BackupStore {
    /// Create a backup store keeping entries for `retention`.
    pub fn new(store: Arc<dyn KvStore>, retention: Duration) -> Self {
        Self { store, retention }
    }

    /// Persist a submission as a new pending record.
    ///
    /// Succeeds once the record itself is written; a failed index update is
    /// logged but does not fail the save.
    pub async fn save(
        &self,
        submission: Submission,
        now: DateTime<Utc>,
    ) -> Result<BackupRecord, StoreError> {
        let record = BackupRecord::new(submission, now);
        put_json(self.store.as_ref(), &record.id, &record, self.retention).await?;

        if let Err(err) = self.append_to_index(record.date(), &record.id).await {
            warn!(id = %record.id, error = %err, "Failed to update daily index");
        }

        debug!(id = %record.id, store = self.store.kind(), "Submission backed up");
        Ok(record)
    }

    async fn append_to_index(&self, date: NaiveDate, id: &str) -> Result<(), StoreError> {
        let key = index_key(date);
        let mut ids: Vec<String> = get_json(self.store.as_ref(), &key)
            .await?
            .unwrap_or_default();
        ids.push(id.to_string());
        put_json(self.store.as_ref(), &key, &ids, self.retention).await
    }

    /// Fetch a single record.
    pub async fn get(&self, id: &str) -> Result<Option<BackupRecord>, StoreError> {
        get_json(self.store.as_ref(), id).await
    }

    /// Record ids created on `date`, in creation order.
    pub async fn ids_for_date(&self, date: NaiveDate) -> Result<Vec<String>, StoreError> {
        Ok(get_json(self.store.as_ref(), &index_key(date))
            .await?
            .unwrap_or_default())
    }

    /// Records created on `date`. Ids whose record has expired are skipped.
    pub async fn list_for_date(&self, date: NaiveDate) -> Result<Vec<BackupRecord>, StoreError> {
        let mut records = Vec::new();
        for id in self.ids_for_date(date).await? {
            if let Some(record) = self.get(&id).await? {
                records.push(record);
            }
        }
        Ok(records)
    }

    /// Records of the last `days` calendar days ending with `today`,
    /// newest first.
    pub async fn list_recent(
        &self,
        today: NaiveDate,
        days: u32,
    ) -> Result<Vec<BackupRecord>, StoreError> {
        let mut records = Vec::new();
        for offset in 0..days {
            let Some(date) = today.checked_sub_days(Days::new(u64::from(offset))) else {
                break;
            };
            records.extend(self.list_for_date(date).await?);
        }
        records.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        Ok(records)
    }

    /// Number of records indexed for `date`.
    pub async fn count_for_date(&self, date: NaiveDate) -> Result<usize, StoreError> {
        Ok(self.ids_for_date(date).await?.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{BackupStatus, CaptchaMethod, SUBMISSION_SOURCE};
    use crate::store::MemoryStore;
    use chrono::TimeZone;

    fn submission(name: &str) -> Submission {
        Submission {
            name: name.to_string(),
            phone: "0123456789".to_string(),
            email: "max@example.com".to_string(),
            message: "Bitte um Rückruf wegen Videoüberwachung.".to_string(),
            client_ip: "198.51.100.4".to_string(),
            user_agent: "Mozilla/5.0".to_string(),
            captcha_method: CaptchaMethod::None,
            source: SUBMISSION_SOURCE.to_string(),
        }
    }

    fn backup_store() -> BackupStore {
        BackupStore::new(
            Arc::new(MemoryStore::new(100)),
            Duration::from_secs(90 * 86_400),
        )
    }

    #[tokio::test]
    async fn test_save_and_get() {
        let backups = backup_store();
        let now = Utc.with_ymd_and_hms(2025, 12, 1, 10, 0, 0).unwrap();

        let record = backups.save(submission("Max"), now).await.unwrap();
        assert_eq!(record.status, BackupStatus::Pending);

        let fetched = backups.get(&record.id).await.unwrap().unwrap();
        assert_eq!(fetched, record);
        assert_eq!(
            backups.ids_for_date(now.date_naive()).await.unwrap(),
            vec![record.id.clone()]
        );
    }

    #[tokio::test]
    async fn test_list_recent_newest_first() {
        let backups = backup_store();
        let day1 = Utc.with_ymd_and_hms(2025, 12, 1, 10, 0, 0).unwrap();
        let day3 = Utc.with_ymd_and_hms(2025, 12, 3, 8, 0, 0).unwrap();
        let old = Utc.with_ymd_and_hms(2025, 11, 1, 8, 0, 0).unwrap();

        backups.save(submission("first"), day1).await.unwrap();
        backups.save(submission("second"), day3).await.unwrap();
        backups.save(submission("too old"), old).await.unwrap();

        let records = backups
            .list_recent(day3.date_naive(), 7)
            .await
            .unwrap();
        let names: Vec<_> = records.iter().map(|r| r.submission.name.as_str()).collect();
        assert_eq!(names, vec!["second", "first"]);
    }

    #[tokio::test]
    async fn test_count_for_date() {
        let backups = backup_store();
        let now = Utc.with_ymd_and_hms(2025, 12, 1, 10, 0, 0).unwrap();

        assert_eq!(backups.count_for_date(now.date_naive()).await.unwrap(), 0);
        backups.save(submission("a"), now).await.unwrap();
        backups.save(submission("b"), now).await.unwrap();
        assert_eq!(backups.count_for_date(now.date_naive()).await.unwrap(), 2);
    }
}
