use super::{encode_timestamp, now_micros, timestamp_or_now, SqlitePool};
use crate::model::{
    ActivityDraft, ActivityId, ActivityPatch, ActivityStatus, Category, NaturalKey, ScheduledActivity,
};
use anyhow::Context;
use chrono::{NaiveDate, NaiveTime};
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{params, OptionalExtension, Row, ToSql};
use std::sync::Arc;
use tracing::{debug, info};

const ACTIVITY_COLUMNS: &str = "id, date, time_start, time_end, activity, category, status, \
     description, location, has_images, has_videos, created_at, updated_at";

const DATE_FORMAT: &str = "%Y-%m-%d";
const TIME_FORMAT: &str = "%H:%M:%S";

pub(crate) fn encode_date(date: NaiveDate) -> String {
    date.format(DATE_FORMAT).to_string()
}

pub(crate) fn encode_time(time: NaiveTime) -> String {
    time.format(TIME_FORMAT).to_string()
}

pub struct ActivityStore {
    pool: Arc<SqlitePool>,
}

impl ActivityStore {
    pub fn new(pool: Arc<SqlitePool>) -> Self {
        Self { pool }
    }

    fn get_conn(&self) -> anyhow::Result<r2d2::PooledConnection<SqliteConnectionManager>> {
        self.pool
            .get()
            .map_err(|e| anyhow::anyhow!("Failed to get connection from pool: {}", e))
    }

    pub fn insert(&self, draft: &ActivityDraft) -> anyhow::Result<String> {
        let conn = self.get_conn()?;
        let id = ActivityId::generate().into_inner();
        let now = encode_timestamp(now_micros());

        conn.execute(
            &format!(
                "INSERT INTO activities ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?12)",
                ACTIVITY_COLUMNS
            ),
            params![
                id,
                encode_date(draft.date),
                encode_time(draft.time_start),
                encode_time(draft.time_end),
                draft.activity,
                draft.category.as_str(),
                draft.status.as_str(),
                draft.description,
                draft.location,
                draft.has_images,
                draft.has_videos,
                now,
            ],
        )
        .context("Failed to insert activity")?;

        info!("Created activity {} ({} on {})", id, draft.activity, draft.date);
        Ok(id)
    }

    pub fn get(&self, id: &str) -> anyhow::Result<Option<ScheduledActivity>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(&format!("SELECT {} FROM activities WHERE id = ?1", ACTIVITY_COLUMNS))?;
        let mut rows = stmt.query([id])?;
        match rows.next()? {
            Some(row) => Ok(Some(row_to_activity(row)?)),
            None => Ok(None),
        }
    }

    pub fn find_by_natural_key(&self, key: &NaturalKey) -> anyhow::Result<Option<String>> {
        let conn = self.get_conn()?;
        let id = conn
            .query_row(
                "SELECT id FROM activities
                 WHERE date = ?1 AND time_start = ?2 AND activity = ?3 AND category = ?4
                 ORDER BY created_at
                 LIMIT 1",
                params![
                    encode_date(key.date),
                    encode_time(key.time_start),
                    key.activity,
                    key.category.as_str(),
                ],
                |row| row.get(0),
            )
            .optional()?;
        Ok(id)
    }

    /// Writes only the fields present in the patch. Returns false when the id is unknown.
    pub fn update(&self, id: &str, patch: &ActivityPatch) -> anyhow::Result<bool> {
        let mut columns: Vec<&'static str> = Vec::new();
        let mut values: Vec<Box<dyn ToSql>> = Vec::new();

        if let Some(date) = patch.date {
            columns.push("date");
            values.push(Box::new(encode_date(date)));
        }
        if let Some(start) = patch.time_start {
            columns.push("time_start");
            values.push(Box::new(encode_time(start)));
        }
        if let Some(end) = patch.time_end {
            columns.push("time_end");
            values.push(Box::new(encode_time(end)));
        }
        if let Some(activity) = &patch.activity {
            columns.push("activity");
            values.push(Box::new(activity.clone()));
        }
        if let Some(category) = patch.category {
            columns.push("category");
            values.push(Box::new(category.as_str()));
        }
        if let Some(status) = patch.status {
            columns.push("status");
            values.push(Box::new(status.as_str()));
        }
        if let Some(description) = &patch.description {
            columns.push("description");
            values.push(Box::new(description.clone()));
        }
        if let Some(location) = &patch.location {
            columns.push("location");
            values.push(Box::new(location.clone()));
        }
        if let Some(images) = patch.has_images {
            columns.push("has_images");
            values.push(Box::new(images));
        }
        if let Some(videos) = patch.has_videos {
            columns.push("has_videos");
            values.push(Box::new(videos));
        }
        columns.push("updated_at");
        values.push(Box::new(encode_timestamp(now_micros())));

        let assignments = columns
            .iter()
            .enumerate()
            .map(|(i, column)| format!("{} = ?{}", column, i + 1))
            .collect::<Vec<_>>()
            .join(", ");
        values.push(Box::new(id.to_string()));
        let sql = format!("UPDATE activities SET {} WHERE id = ?{}", assignments, values.len());

        let conn = self.get_conn()?;
        let changed = conn
            .execute(&sql, rusqlite::params_from_iter(values.iter()))
            .context("Failed to update activity")?;
        debug!("Updated activity {} ({} fields)", id, columns.len() - 1);
        Ok(changed > 0)
    }

    pub fn delete(&self, id: &str) -> anyhow::Result<bool> {
        let conn = self.get_conn()?;
        let changed = conn.execute("DELETE FROM activities WHERE id = ?1", [id])?;
        if changed > 0 {
            info!("Deleted activity {}", id);
        }
        Ok(changed > 0)
    }
}

fn row_to_activity(row: &Row) -> anyhow::Result<ScheduledActivity> {
    let date: String = row.get(1)?;
    let time_start: String = row.get(2)?;
    let time_end: String = row.get(3)?;
    let category: String = row.get(5)?;
    let status: String = row.get(6)?;

    Ok(ScheduledActivity {
        id: ActivityId::new(row.get::<_, String>(0)?),
        date: NaiveDate::parse_from_str(&date, DATE_FORMAT)
            .with_context(|| format!("Bad activity date: {}", date))?,
        time_start: NaiveTime::parse_from_str(&time_start, TIME_FORMAT)
            .with_context(|| format!("Bad activity time_start: {}", time_start))?,
        time_end: NaiveTime::parse_from_str(&time_end, TIME_FORMAT)
            .with_context(|| format!("Bad activity time_end: {}", time_end))?,
        activity: row.get(4)?,
        category: Category::from_str_opt(&category)
            .ok_or_else(|| anyhow::anyhow!("Unknown activity category: {}", category))?,
        status: ActivityStatus::from_str_opt(&status).unwrap_or_default(),
        description: row.get(7)?,
        location: row.get(8)?,
        has_images: row.get(9)?,
        has_videos: row.get(10)?,
        created_at: timestamp_or_now(&row.get::<_, String>(11)?, "activity created_at"),
        updated_at: timestamp_or_now(&row.get::<_, String>(12)?, "activity updated_at"),
    })
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::store::primary::SqlitePrimary;

    pub(crate) fn sample_draft() -> ActivityDraft {
        ActivityDraft {
            date: NaiveDate::from_ymd_opt(2025, 3, 10).unwrap(),
            time_start: NaiveTime::from_hms_opt(7, 0, 0).unwrap(),
            time_end: NaiveTime::from_hms_opt(8, 0, 0).unwrap(),
            activity: "Corrida no parque".into(),
            category: Category::Fitness,
            status: ActivityStatus::Upcoming,
            description: Some("5km leve".into()),
            location: None,
            has_images: false,
            has_videos: true,
        }
    }

    #[test]
    fn test_insert_and_get_round_trip() {
        let primary = SqlitePrimary::open_in_memory().unwrap();
        let store = primary.activities();
        let draft = sample_draft();

        let id = store.insert(&draft).unwrap();
        let stored = store.get(&id).unwrap().unwrap();

        assert_eq!(stored.to_draft(), draft);
        assert_eq!(stored.id.as_str(), id);
    }

    #[test]
    fn test_update_touches_only_given_fields() {
        let primary = SqlitePrimary::open_in_memory().unwrap();
        let store = primary.activities();
        let id = store.insert(&sample_draft()).unwrap();

        let patch = ActivityPatch {
            status: Some(ActivityStatus::Completed),
            location: Some("Ibirapuera".into()),
            ..Default::default()
        };
        assert!(store.update(&id, &patch).unwrap());

        let stored = store.get(&id).unwrap().unwrap();
        assert_eq!(stored.status, ActivityStatus::Completed);
        assert_eq!(stored.location.as_deref(), Some("Ibirapuera"));
        assert_eq!(stored.description.as_deref(), Some("5km leve"));
        assert_eq!(stored.activity, "Corrida no parque");
    }

    #[test]
    fn test_update_unknown_id_reports_no_match() {
        let primary = SqlitePrimary::open_in_memory().unwrap();
        let patch = ActivityPatch {
            has_images: Some(true),
            ..Default::default()
        };
        assert!(!primary.activities().update("missing", &patch).unwrap());
    }

    #[test]
    fn test_inverted_time_range_is_rejected_by_schema() {
        let primary = SqlitePrimary::open_in_memory().unwrap();
        let mut draft = sample_draft();
        draft.time_end = NaiveTime::from_hms_opt(6, 0, 0).unwrap();
        assert!(primary.activities().insert(&draft).is_err());
    }

    #[test]
    fn test_natural_key_lookup_and_delete() {
        let primary = SqlitePrimary::open_in_memory().unwrap();
        let store = primary.activities();
        let draft = sample_draft();
        let id = store.insert(&draft).unwrap();

        assert_eq!(store.find_by_natural_key(&draft.natural_key()).unwrap(), Some(id.clone()));
        assert!(store.delete(&id).unwrap());
        assert!(!store.delete(&id).unwrap());
        assert_eq!(store.find_by_natural_key(&draft.natural_key()).unwrap(), None);
    }
}
