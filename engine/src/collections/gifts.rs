//! The gift wishlist.
//!
//! Gifts are grouped into categories shown as tabs. Rows written before
//! categories existed carry no category and are listed under
//! [`Category::Others`].

use super::{null_as_default, read_record, to_fields};
use crate::{
    error::{Result, ValidationError},
    view::{FieldEq, Filter},
    CollectionSchema, FieldDef, FieldType, Fields, Record, RecordId, Selector, Timestamp,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::str::FromStr;

pub const COLLECTION: &str = "gifts";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GiftStatus {
    #[default]
    Wanted,
    Purchased,
}

impl GiftStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            GiftStatus::Wanted => "wanted",
            GiftStatus::Purchased => "purchased",
        }
    }

    /// The status a checkbox click switches to.
    pub fn toggled(&self) -> Self {
        match self {
            GiftStatus::Wanted => GiftStatus::Purchased,
            GiftStatus::Purchased => GiftStatus::Wanted,
        }
    }
}

#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Clothes,
    Bags,
    Cosmetics,
    Electronics,
    Shoes,
    #[default]
    Others,
}

impl Category {
    pub const ALL: [Category; 6] = [
        Category::Clothes,
        Category::Bags,
        Category::Cosmetics,
        Category::Electronics,
        Category::Shoes,
        Category::Others,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Clothes => "clothes",
            Category::Bags => "bags",
            Category::Cosmetics => "cosmetics",
            Category::Electronics => "electronics",
            Category::Shoes => "shoes",
            Category::Others => "others",
        }
    }
}

impl FromStr for Category {
    type Err = ValidationError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Category::ALL
            .into_iter()
            .find(|c| c.as_str() == s)
            .ok_or_else(|| ValidationError::InvalidEnumValue {
                field: "category".into(),
                value: s.to_string(),
            })
    }
}

pub fn schema() -> CollectionSchema {
    let categories: Vec<&str> = Category::ALL.iter().map(Category::as_str).collect();
    CollectionSchema::new(
        COLLECTION,
        vec![
            FieldDef::required("name", FieldType::String).non_empty(),
            FieldDef::optional("link", FieldType::String),
            FieldDef::optional("image", FieldType::String),
            FieldDef::required("status", FieldType::String)
                .one_of(&["wanted", "purchased"])
                .with_default(GiftStatus::default().as_str()),
            FieldDef::optional("category", FieldType::String)
                .one_of(&categories)
                .with_default(Category::default().as_str()),
            FieldDef::optional("note", FieldType::String),
        ],
    )
}

/// A wishlist entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GiftItem {
    pub id: RecordId,
    pub created_at: Timestamp,
    pub name: String,
    #[serde(default)]
    pub link: Option<String>,
    #[serde(default)]
    pub image: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub status: GiftStatus,
    #[serde(default, deserialize_with = "null_as_default")]
    pub category: Category,
    #[serde(default)]
    pub note: Option<String>,
}

impl GiftItem {
    pub fn from_record(record: &Record) -> Result<Self> {
        read_record(record)
    }

    pub fn is_purchased(&self) -> bool {
        self.status == GiftStatus::Purchased
    }
}

/// A new wishlist entry.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GiftDraft {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub link: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<Category>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

impl GiftDraft {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn in_category(mut self, category: Category) -> Self {
        self.category = Some(category);
        self
    }

    pub fn with_link(mut self, link: impl Into<String>) -> Self {
        self.link = Some(link.into());
        self
    }

    pub fn to_fields(&self) -> std::result::Result<Fields, ValidationError> {
        to_fields(self)
    }
}

/// Patch setting a gift's status.
pub fn status_patch(status: GiftStatus) -> Fields {
    let mut patch = Fields::new();
    patch.insert("status".into(), Value::from(status.as_str()));
    patch
}

/// Tab selection on the wishlist screen.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum CategoryFilter {
    #[default]
    All,
    Only(Category),
}

impl FromStr for CategoryFilter {
    type Err = ValidationError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "" | "all" => Ok(CategoryFilter::All),
            other => other.parse().map(CategoryFilter::Only),
        }
    }
}

impl Selector for CategoryFilter {
    type Output = Vec<Record>;

    fn select(&self, records: &[Record]) -> Vec<Record> {
        match self {
            CategoryFilter::All => records.to_vec(),
            CategoryFilter::Only(category) => Filter(
                FieldEq::new("category", category.as_str())
                    .or_missing_as(Category::default().as_str()),
            )
            .select(records),
        }
    }
}

/// Number of gifts per category, for the tab badges.
pub fn by_category(records: &[Record]) -> BTreeMap<Category, usize> {
    let mut counts = BTreeMap::new();
    for record in records {
        let category = record
            .get_str("category")
            .and_then(|c| c.parse::<Category>().ok())
            .unwrap_or_default();
        *counts.entry(category).or_insert(0) += 1;
    }
    counts
}
