//! Raw activity fields as submitted by the admin surface, and their parsing.
//!
//! Everything here fails with [`SyncError::Validation`] before any store is
//! touched.

use crate::error::SyncError;
use crate::model::{ActivityDraft, ActivityPatch, ActivityStatus, Category};
use chrono::{NaiveDate, NaiveTime};
use serde::{Deserialize, Serialize};
use validator::Validate;

const DEFAULT_START: &str = "00:00";
const DEFAULT_END: &str = "23:59";

/// A new activity. `date`, `activity` and `category` are required.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, Validate)]
pub struct ActivityInput {
    /// `YYYY-MM-DD`.
    #[validate(length(min = 1, message = "date is required"))]
    pub date: String,
    /// `HH:MM` or `HH:MM:SS`. Defaults to the start of the day.
    #[serde(default)]
    pub time_start: Option<String>,
    /// Defaults to 23:59.
    #[serde(default)]
    pub time_end: Option<String>,
    #[validate(length(min = 1, max = 200, message = "activity is required"))]
    pub activity: String,
    #[validate(length(min = 1, message = "category is required"))]
    pub category: String,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub has_images: bool,
    #[serde(default)]
    pub has_videos: bool,
}

impl ActivityInput {
    pub fn new(date: impl Into<String>, activity: impl Into<String>, category: impl Into<String>) -> Self {
        Self {
            date: date.into(),
            activity: activity.into(),
            category: category.into(),
            ..Default::default()
        }
    }

    pub fn with_times(mut self, start: &str, end: &str) -> Self {
        self.time_start = Some(start.to_string());
        self.time_end = Some(end.to_string());
        self
    }

    pub fn into_draft(self) -> Result<ActivityDraft, SyncError> {
        self.validate()?;

        let activity = self.activity.trim().to_string();
        if activity.is_empty() {
            return Err(SyncError::Validation("activity is required".to_string()));
        }
        let time_start = parse_time(present(self.time_start.as_deref()).unwrap_or(DEFAULT_START))?;
        let time_end = parse_time(present(self.time_end.as_deref()).unwrap_or(DEFAULT_END))?;

        let draft = ActivityDraft {
            date: parse_date(&self.date)?,
            time_start,
            time_end,
            activity,
            category: parse_category(&self.category)?,
            status: match present(self.status.as_deref()) {
                Some(status) => parse_status(status)?,
                None => ActivityStatus::default(),
            },
            description: present(self.description.as_deref()).map(str::to_string),
            location: present(self.location.as_deref()).map(str::to_string),
            has_images: self.has_images,
            has_videos: self.has_videos,
        };

        if !draft.has_valid_time_range() {
            return Err(SyncError::Validation(format!(
                "time_start {} is after time_end {}",
                draft.time_start, draft.time_end
            )));
        }
        Ok(draft)
    }
}

/// A partial update. Absent fields stay as they are.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ActivityChanges {
    pub date: Option<String>,
    pub time_start: Option<String>,
    pub time_end: Option<String>,
    pub activity: Option<String>,
    pub category: Option<String>,
    pub status: Option<String>,
    pub description: Option<String>,
    pub location: Option<String>,
    pub has_images: Option<bool>,
    pub has_videos: Option<bool>,
}

impl ActivityChanges {
    pub fn into_patch(self) -> Result<ActivityPatch, SyncError> {
        let activity = match self.activity {
            Some(activity) if activity.trim().is_empty() => {
                return Err(SyncError::Validation("activity cannot be blank".to_string()))
            }
            Some(activity) => Some(activity.trim().to_string()),
            None => None,
        };

        Ok(ActivityPatch {
            date: self.date.as_deref().map(parse_date).transpose()?,
            time_start: self.time_start.as_deref().map(parse_time).transpose()?,
            time_end: self.time_end.as_deref().map(parse_time).transpose()?,
            activity,
            category: self.category.as_deref().map(parse_category).transpose()?,
            status: self.status.as_deref().map(parse_status).transpose()?,
            description: self.description,
            location: self.location,
            has_images: self.has_images,
            has_videos: self.has_videos,
        })
    }
}

fn present(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

fn parse_date(value: &str) -> Result<NaiveDate, SyncError> {
    NaiveDate::parse_from_str(value.trim(), "%Y-%m-%d")
        .map_err(|_| SyncError::Validation(format!("invalid date '{}', expected YYYY-MM-DD", value)))
}

fn parse_time(value: &str) -> Result<NaiveTime, SyncError> {
    let value = value.trim();
    NaiveTime::parse_from_str(value, "%H:%M:%S")
        .or_else(|_| NaiveTime::parse_from_str(value, "%H:%M"))
        .map_err(|_| SyncError::Validation(format!("invalid time '{}', expected HH:MM or HH:MM:SS", value)))
}

fn parse_category(value: &str) -> Result<Category, SyncError> {
    Category::from_str_opt(value).ok_or_else(|| {
        let allowed: Vec<&str> = Category::ALL.iter().map(|c| c.as_str()).collect();
        SyncError::Validation(format!("unknown category '{}', expected one of {}", value, allowed.join(", ")))
    })
}

fn parse_status(value: &str) -> Result<ActivityStatus, SyncError> {
    ActivityStatus::from_str_opt(value)
        .ok_or_else(|| SyncError::Validation(format!("unknown status '{}'", value)))
}
