use chrono::{DateTime, SubsecRound, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

/// What a page currently has selected, as seen by the observer or a one-shot
/// extraction. `text` is already trimmed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct SelectionSnapshot {
    pub text: String,
    pub url: String,
    pub title: String,
}

impl SelectionSnapshot {
    pub fn new(text: &str, url: &str, title: &str) -> Self {
        Self {
            text: text.trim().to_string(),
            url: url.to_string(),
            title: title.to_string(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }
}

/// The single persisted "latest highlight".
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HighlightRecord {
    pub text: String,
    #[serde(default)]
    pub source_url: String,
    #[serde(default)]
    pub source_title: String,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub created_at: DateTime<Utc>,
}

impl HighlightRecord {
    pub fn capture(text: &str, url: &str, title: &str) -> Self {
        Self {
            text: text.to_string(),
            source_url: url.to_string(),
            source_title: title.to_string(),
            created_at: now_millis(),
        }
    }
}

/// Timestamps travel as epoch milliseconds. Sub-millisecond remainders round
/// up, so the result is never earlier than the moment of the call.
pub fn now_millis() -> DateTime<Utc> {
    ceil_millis(Utc::now())
}

fn ceil_millis(at: DateTime<Utc>) -> DateTime<Utc> {
    let truncated = at.trunc_subsecs(3);
    if truncated < at {
        truncated + TimeDelta::milliseconds(1)
    } else {
        truncated
    }
}

impl From<SelectionSnapshot> for HighlightRecord {
    fn from(snapshot: SelectionSnapshot) -> Self {
        Self::capture(&snapshot.text, &snapshot.url, &snapshot.title)
    }
}

pub const DEFAULT_PROJECT: &str = "default";

/// An authenticated user of the item store, working inside one project.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    pub uid: String,
    #[serde(default = "default_project")]
    pub project: String,
}

fn default_project() -> String {
    DEFAULT_PROJECT.to_string()
}

impl Principal {
    pub fn new(uid: &str) -> Self {
        Self {
            uid: uid.to_string(),
            project: default_project(),
        }
    }

    /// Switches to `project`, falling back to the default one when blank.
    pub fn in_project(mut self, project: &str) -> Self {
        let project = project.trim();
        self.project = if project.is_empty() {
            default_project()
        } else {
            project.to_string()
        };
        self
    }
}

/// Fields that seed a new research item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemSeed {
    pub text: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub note: String,
    #[serde(default)]
    pub source_url: String,
    #[serde(default)]
    pub source_title: String,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub created_at: DateTime<Utc>,
}

impl ItemSeed {
    pub fn from_selection(text: &str, url: &str, title: &str) -> Self {
        Self {
            text: text.to_string(),
            tags: Vec::new(),
            note: String::new(),
            source_url: url.to_string(),
            source_title: title.to_string(),
            created_at: now_millis(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResearchItem {
    pub id: String,
    pub project_id: String,
    pub text: String,
    pub tags: Vec<String>,
    pub note: String,
    pub source_url: String,
    pub source_title: String,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateItem {
    pub tags: Option<Vec<String>>,
    pub note: Option<String>,
}
