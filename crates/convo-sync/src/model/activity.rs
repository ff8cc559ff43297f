//! Scheduled activities edited by operators and mirrored to the secondary store.

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

pub use super::session::ActivityId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Category {
    #[serde(rename = "fitness")]
    Fitness,
    #[serde(rename = "trabalho")]
    Work,
    #[serde(rename = "reunião")]
    Meeting,
    #[serde(rename = "social")]
    Social,
    #[serde(rename = "pessoal")]
    Personal,
}

impl Category {
    pub const ALL: [Category; 5] = [
        Category::Fitness,
        Category::Work,
        Category::Meeting,
        Category::Social,
        Category::Personal,
    ];

    /// Wire name shared by both stores.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Fitness => "fitness",
            Self::Work => "trabalho",
            Self::Meeting => "reunião",
            Self::Social => "social",
            Self::Personal => "pessoal",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str_opt(value: &str) -> Option<Self> {
        let value = value.trim().to_lowercase();
        Self::ALL.into_iter().find(|c| c.as_str() == value)
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActivityStatus {
    Completed,
    Current,
    #[default]
    Upcoming,
}

impl ActivityStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::Current => "current",
            Self::Upcoming => "upcoming",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str_opt(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "completed" => Some(Self::Completed),
            "current" => Some(Self::Current),
            "upcoming" => Some(Self::Upcoming),
            _ => None,
        }
    }
}

/// Fields that identify the same activity in both stores when no id link exists.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NaturalKey {
    pub date: NaiveDate,
    pub time_start: NaiveTime,
    pub activity: String,
    pub category: Category,
}

/// A fully validated activity ready to be written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivityDraft {
    pub date: NaiveDate,
    pub time_start: NaiveTime,
    pub time_end: NaiveTime,
    pub activity: String,
    pub category: Category,
    pub status: ActivityStatus,
    pub description: Option<String>,
    pub location: Option<String>,
    pub has_images: bool,
    pub has_videos: bool,
}

impl ActivityDraft {
    pub fn natural_key(&self) -> NaturalKey {
        NaturalKey {
            date: self.date,
            time_start: self.time_start,
            activity: self.activity.clone(),
            category: self.category,
        }
    }

    pub fn has_valid_time_range(&self) -> bool {
        self.time_start <= self.time_end
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduledActivity {
    pub id: ActivityId,
    pub date: NaiveDate,
    pub time_start: NaiveTime,
    pub time_end: NaiveTime,
    pub activity: String,
    pub category: Category,
    pub status: ActivityStatus,
    pub description: Option<String>,
    pub location: Option<String>,
    pub has_images: bool,
    pub has_videos: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ScheduledActivity {
    pub fn natural_key(&self) -> NaturalKey {
        NaturalKey {
            date: self.date,
            time_start: self.time_start,
            activity: self.activity.clone(),
            category: self.category,
        }
    }

    pub fn to_draft(&self) -> ActivityDraft {
        ActivityDraft {
            date: self.date,
            time_start: self.time_start,
            time_end: self.time_end,
            activity: self.activity.clone(),
            category: self.category,
            status: self.status,
            description: self.description.clone(),
            location: self.location.clone(),
            has_images: self.has_images,
            has_videos: self.has_videos,
        }
    }
}

/// Partial update. Absent fields are left untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ActivityPatch {
    pub date: Option<NaiveDate>,
    pub time_start: Option<NaiveTime>,
    pub time_end: Option<NaiveTime>,
    pub activity: Option<String>,
    pub category: Option<Category>,
    pub status: Option<ActivityStatus>,
    pub description: Option<String>,
    pub location: Option<String>,
    pub has_images: Option<bool>,
    pub has_videos: Option<bool>,
}

impl ActivityPatch {
    pub fn is_empty(&self) -> bool {
        self.date.is_none()
            && self.time_start.is_none()
            && self.time_end.is_none()
            && self.activity.is_none()
            && self.category.is_none()
            && self.status.is_none()
            && self.description.is_none()
            && self.location.is_none()
            && self.has_images.is_none()
            && self.has_videos.is_none()
    }

    /// The activity as it would look once this patch is applied.
    pub fn merged_with(&self, current: &ScheduledActivity) -> ActivityDraft {
        let mut draft = current.to_draft();
        if let Some(date) = self.date {
            draft.date = date;
        }
        if let Some(start) = self.time_start {
            draft.time_start = start;
        }
        if let Some(end) = self.time_end {
            draft.time_end = end;
        }
        if let Some(activity) = &self.activity {
            draft.activity = activity.clone();
        }
        if let Some(category) = self.category {
            draft.category = category;
        }
        if let Some(status) = self.status {
            draft.status = status;
        }
        if let Some(description) = &self.description {
            draft.description = Some(description.clone());
        }
        if let Some(location) = &self.location {
            draft.location = Some(location.clone());
        }
        if let Some(images) = self.has_images {
            draft.has_images = images;
        }
        if let Some(videos) = self.has_videos {
            draft.has_videos = videos;
        }
        draft
    }
}
