//! Core data models for flowcache
//!
//! This module contains the types shared by the Webflow API client, the
//! on-disk store and the cache manager: CMS item records with their open
//! field maps, complete collection snapshots and single API pages.

pub mod webflow;

pub use webflow::{ApiError, CollectionSource, WebflowClient, WebflowConfig};

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A single CMS field value
///
/// The CMS schema is defined remotely and may grow at any time, so field data
/// is kept as an open value rather than a fixed struct. Reference fields are
/// stored as `Text` holding the opaque item id they point at.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    /// Explicit null from the API
    Null,
    /// Switch fields
    Bool(bool),
    /// Number fields, kept as the exact JSON number
    Number(serde_json::Number),
    /// Plain text, rich text, slugs, options and single references
    Text(String),
    /// Multi-references and other repeated values
    List(Vec<FieldValue>),
    /// Structured values such as images and links
    Object(BTreeMap<String, FieldValue>),
}

impl FieldValue {
    /// Returns the text value, if this is a text field
    pub fn as_str(&self) -> Option<&str> {
        match self {
            FieldValue::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Returns the boolean value, if this is a switch field
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            FieldValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Returns the numeric value as f64, if this is a number field
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            FieldValue::Number(n) => n.as_f64(),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, FieldValue::Null)
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        FieldValue::Text(value.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(value: String) -> Self {
        FieldValue::Text(value)
    }
}

impl From<bool> for FieldValue {
    fn from(value: bool) -> Self {
        FieldValue::Bool(value)
    }
}

impl From<i64> for FieldValue {
    fn from(value: i64) -> Self {
        FieldValue::Number(value.into())
    }
}

/// One CMS item as returned by the Webflow items endpoint
///
/// Serialized with the API's own camelCase field names so cached snapshots
/// keep the shape they arrived in. Unknown top-level keys are ignored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemRecord {
    /// Unique item identifier within its collection
    pub id: String,
    /// Locale the item belongs to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cms_locale_id: Option<String>,
    /// When the item was last published, if ever
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_published: Option<DateTime<Utc>>,
    /// When the item was last edited
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_updated: Option<DateTime<Utc>>,
    /// When the item was created
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_on: Option<DateTime<Utc>>,
    /// Archived items are hidden from the live site
    #[serde(default)]
    pub is_archived: bool,
    /// Draft items have never been published
    #[serde(default)]
    pub is_draft: bool,
    /// CMS-defined fields keyed by field slug
    #[serde(default)]
    pub field_data: BTreeMap<String, FieldValue>,
}

impl ItemRecord {
    /// Creates a record with only an id and no fields
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            cms_locale_id: None,
            last_published: None,
            last_updated: None,
            created_on: None,
            is_archived: false,
            is_draft: false,
            field_data: BTreeMap::new(),
        }
    }

    /// Builder-style helper to set a field
    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        self.field_data.insert(name.into(), value.into());
        self
    }

    /// Looks up a raw field value
    pub fn field(&self, name: &str) -> Option<&FieldValue> {
        self.field_data.get(name)
    }

    /// Looks up a text field
    pub fn field_str(&self, name: &str) -> Option<&str> {
        self.field(name).and_then(FieldValue::as_str)
    }

    /// The item's display name (Webflow's required `name` field)
    pub fn name(&self) -> Option<&str> {
        self.field_str("name")
    }

    /// The item's URL slug
    pub fn slug(&self) -> Option<&str> {
        self.field_str("slug")
    }
}

/// Exact-match filter on a single field
///
/// Matching compares raw stored values, so filtering on a reference field
/// requires the referenced item's id, not its readable label.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldFilter {
    /// Field slug to compare
    pub field: String,
    /// Value the field must equal
    pub value: FieldValue,
}

impl FieldFilter {
    pub fn new(field: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        Self {
            field: field.into(),
            value: value.into(),
        }
    }

    /// Returns true if the item stores exactly this value in the field
    pub fn matches(&self, item: &ItemRecord) -> bool {
        item.field(&self.field) == Some(&self.value)
    }
}

/// The complete contents of one collection from a single refresh cycle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectionSnapshot {
    /// Collection name (e.g. "bands")
    pub collection: String,
    /// When the refresh cycle that produced this snapshot started
    pub fetched_at: DateTime<Utc>,
    /// Number of items in the snapshot
    pub item_count: usize,
    /// Items in API return order
    pub items: Vec<ItemRecord>,
}

impl CollectionSnapshot {
    pub fn new(
        collection: impl Into<String>,
        items: Vec<ItemRecord>,
        fetched_at: DateTime<Utc>,
    ) -> Self {
        Self {
            collection: collection.into(),
            fetched_at,
            item_count: items.len(),
            items,
        }
    }
}

/// One page of items from the API
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Page {
    /// Items in API return order
    pub items: Vec<ItemRecord>,
    /// Whether another page follows this one
    pub has_more: bool,
}
