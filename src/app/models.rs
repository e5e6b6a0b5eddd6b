//! Data models shared across the gateway
//!
//! Identity of remote objects, the metadata the provider reports for them,
//! and the cache key derivation used to name their local copies.

use serde::{Deserialize, Serialize};

/// Metadata the remote provider reports for a message carrying a file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectMetadata {
    /// Total size in bytes
    pub size: u64,
    /// MIME type as reported by the provider
    pub mime_type: String,
    /// Original file name
    pub file_name: String,
}

/// Immutable identity of a fetchable remote object
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RemoteObjectRef {
    /// Channel the message lives in
    pub channel_id: i64,
    /// Message carrying the file
    pub message_id: i64,
    /// Total size in bytes
    pub size: u64,
    /// MIME type
    pub mime_type: String,
    /// File name reported by the provider
    pub file_name: String,
}

impl RemoteObjectRef {
    /// Build a reference from provider metadata
    pub fn from_metadata(channel_id: i64, message_id: i64, metadata: ObjectMetadata) -> Self {
        Self {
            channel_id,
            message_id,
            size: metadata.size,
            mime_type: metadata.mime_type,
            file_name: metadata.file_name,
        }
    }

    /// Name to present to clients, preferring an explicit display name
    pub fn display_name<'a>(&'a self, requested: Option<&'a str>) -> &'a str {
        match requested {
            Some(name) if !name.trim().is_empty() => name,
            _ => &self.file_name,
        }
    }

    /// Cache key for this object under the given display name
    pub fn cache_key(&self, requested: Option<&str>) -> String {
        cache_key(self.channel_id, self.message_id, self.display_name(requested))
    }
}

/// Derive the cache key for an object: `{channel}-{message}-{name}`
///
/// The name is sanitized so the key can be used directly as a file name.
pub fn cache_key(channel_id: i64, message_id: i64, name: &str) -> String {
    format!("{}-{}-{}", channel_id, message_id, sanitize_file_name(name))
}

/// Replace characters that are not safe in a single path component
pub fn sanitize_file_name(name: &str) -> String {
    let cleaned: String = name
        .trim()
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();

    // Leading dots would hide the file or walk up the tree
    let cleaned = cleaned.trim_start_matches('.');
    if cleaned.is_empty() {
        "file".to_string()
    } else {
        cleaned.to_string()
    }
}
