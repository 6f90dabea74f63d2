//! Diary entries.

use super::{null_as_default, read_record, to_fields};
use crate::{
    error::{Result, ValidationError},
    CollectionSchema, FieldDef, FieldType, Fields, Record, RecordId, Timestamp,
};
use serde::{Deserialize, Serialize};

pub const COLLECTION: &str = "diary";

/// How the day felt.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mood {
    #[default]
    Happy,
    Sad,
    Neutral,
    Loving,
    Angry,
}

impl Mood {
    pub const ALL: [Mood; 5] = [Mood::Happy, Mood::Sad, Mood::Neutral, Mood::Loving, Mood::Angry];

    pub fn as_str(&self) -> &'static str {
        match self {
            Mood::Happy => "happy",
            Mood::Sad => "sad",
            Mood::Neutral => "neutral",
            Mood::Loving => "loving",
            Mood::Angry => "angry",
        }
    }
}

pub fn schema() -> CollectionSchema {
    let moods: Vec<&str> = Mood::ALL.iter().map(Mood::as_str).collect();
    CollectionSchema::new(
        COLLECTION,
        vec![
            FieldDef::required("title", FieldType::String).non_empty(),
            FieldDef::required("content", FieldType::String).non_empty(),
            FieldDef::required("mood", FieldType::String)
                .one_of(&moods)
                .with_default(Mood::default().as_str()),
        ],
    )
}

/// A diary entry as shown in the list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiaryEntry {
    pub id: RecordId,
    pub created_at: Timestamp,
    pub title: String,
    pub content: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub mood: Mood,
}

impl DiaryEntry {
    pub fn from_record(record: &Record) -> Result<Self> {
        read_record(record)
    }
}

/// A new diary entry. Mood defaults to happy when omitted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiaryDraft {
    pub title: String,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mood: Option<Mood>,
}

impl DiaryDraft {
    pub fn new(title: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            content: content.into(),
            mood: None,
        }
    }

    pub fn with_mood(mut self, mood: Mood) -> Self {
        self.mood = Some(mood);
        self
    }

    pub fn to_fields(&self) -> std::result::Result<Fields, ValidationError> {
        to_fields(self)
    }
}
