// SPDX-FileCopyrightText: 2025 Hyperpolymath
// SPDX-License-Identifier: PMPL-1.0-or-later

//! Data models for board items and live change events.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Identifier assigned by the content store.
pub type ItemId = u64;

/// What an item carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentKind {
    /// Inline text
    #[default]
    Text,
    /// Image blob, rendered inline
    Image,
    /// Video blob in a browser-playable container
    Video,
    /// Audio blob in a browser-playable container
    Audio,
    /// Any other blob, offered as a download
    File,
}

impl ContentKind {
    /// Whether items of this kind must reference a blob.
    pub fn is_blob_backed(&self) -> bool {
        !matches!(self, Self::Text)
    }
}

impl std::fmt::Display for ContentKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Text => "text",
            Self::Image => "image",
            Self::Video => "video",
            Self::Audio => "audio",
            Self::File => "file",
        };
        f.write_str(name)
    }
}

/// Reference to a blob owned by an item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlobRef {
    /// Object key in the blob store
    pub object_name: String,
    /// Original file name shown to users
    pub file_name: String,
    /// Size in bytes as reported by the blob store
    pub file_size: u64,
    /// Public download link
    pub file_url: String,
}

/// Where an item came from.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Origin {
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
}

/// A stored board item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContentItem {
    pub id: ItemId,
    #[serde(rename = "type")]
    pub kind: ContentKind,
    /// Inline text for text items, optional caption otherwise
    pub content: Option<String>,
    pub blob: Option<BlobRef>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub origin: Origin,
}

impl ContentItem {
    /// An item is visible strictly before its expiry instant.
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        self.expires_at > now
    }
}

/// An item that has not been persisted yet.
#[derive(Debug, Clone)]
pub struct NewItem {
    pub kind: ContentKind,
    pub content: Option<String>,
    pub blob: Option<BlobRef>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub origin: Origin,
}

impl NewItem {
    /// Attach the store-assigned identifier.
    pub fn into_item(self, id: ItemId) -> ContentItem {
        ContentItem {
            id,
            kind: self.kind,
            content: self.content,
            blob: self.blob,
            created_at: self.created_at,
            expires_at: self.expires_at,
            origin: self.origin,
        }
    }
}

/// Change pushed to every live observer.
///
/// Encodes as `{"type": "new_card", "data": {...}}`, `{"type": "delete_card",
/// "data": 7}` or `{"type": "clear_cards"}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum ChangeEvent {
    NewCard(ContentItem),
    DeleteCard(ItemId),
    ClearCards,
}

impl ChangeEvent {
    /// Wire discriminator of this event.
    pub fn type_tag(&self) -> &'static str {
        match self {
            Self::NewCard(_) => "new_card",
            Self::DeleteCard(_) => "delete_card",
            Self::ClearCards => "clear_cards",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use serde_json::json;

    fn text_item(created_at: DateTime<Utc>, ttl: Duration) -> ContentItem {
        NewItem {
            kind: ContentKind::Text,
            content: Some("hello".to_string()),
            blob: None,
            created_at,
            expires_at: created_at + ttl,
            origin: Origin::default(),
        }
        .into_item(1)
    }

    #[test]
    fn test_active_until_expiry_instant() {
        let created = Utc::now();
        let item = text_item(created, Duration::minutes(1));

        assert!(item.is_active(created));
        assert!(item.is_active(item.expires_at - Duration::milliseconds(1)));
        assert!(!item.is_active(item.expires_at));
        assert!(!item.is_active(item.expires_at + Duration::seconds(1)));
    }

    #[test]
    fn test_event_wire_format() {
        let delete = serde_json::to_value(ChangeEvent::DeleteCard(7)).unwrap();
        assert_eq!(delete, json!({"type": "delete_card", "data": 7}));

        let clear = serde_json::to_value(ChangeEvent::ClearCards).unwrap();
        assert_eq!(clear, json!({"type": "clear_cards"}));

        let item = text_item(Utc::now(), Duration::minutes(5));
        let created = serde_json::to_value(ChangeEvent::NewCard(item)).unwrap();
        assert_eq!(created["type"], "new_card");
        assert_eq!(created["data"]["type"], "text");
        assert_eq!(created["data"]["content"], "hello");
        assert!(created["data"]["expiresAt"].is_string());
    }

    #[test]
    fn test_blob_backed_kinds() {
        assert!(!ContentKind::Text.is_blob_backed());
        assert!(ContentKind::Image.is_blob_backed());
        assert!(ContentKind::File.is_blob_backed());
    }
}
