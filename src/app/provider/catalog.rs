//! Memoized object metadata
//!
//! Stream requests arrive in bursts of small ranges for the same object. The
//! catalog resolves `(channel, message)` to a [`RemoteObjectRef`] once and
//! serves later lookups from memory, so a fully cached object never causes a
//! provider call.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::debug;

use crate::app::models::RemoteObjectRef;
use crate::errors::ProviderResult;

use super::RemoteProvider;

/// Metadata cache in front of a [`RemoteProvider`]
pub struct ObjectCatalog {
    provider: Arc<dyn RemoteProvider>,
    objects: RwLock<HashMap<(i64, i64), RemoteObjectRef>>,
}

impl ObjectCatalog {
    pub fn new(provider: Arc<dyn RemoteProvider>) -> Self {
        Self {
            provider,
            objects: RwLock::new(HashMap::new()),
        }
    }

    /// Resolve an object, asking the provider only on the first lookup
    pub async fn resolve(&self, channel_id: i64, message_id: i64) -> ProviderResult<RemoteObjectRef> {
        if let Some(object) = self.objects.read().await.get(&(channel_id, message_id)) {
            return Ok(object.clone());
        }

        let metadata = self.provider.fetch_metadata(channel_id, message_id).await?;
        let object = RemoteObjectRef::from_metadata(channel_id, message_id, metadata);
        debug!(
            "Resolved {}/{} -> {} ({} bytes)",
            channel_id, message_id, object.file_name, object.size
        );

        self.objects
            .write()
            .await
            .insert((channel_id, message_id), object.clone());
        Ok(object)
    }

    /// Record an object learned elsewhere, such as a restored task
    pub async fn remember(&self, object: RemoteObjectRef) {
        self.objects
            .write()
            .await
            .insert((object.channel_id, object.message_id), object);
    }

    /// Drop a memoized object that turned out to be gone upstream
    pub async fn forget(&self, channel_id: i64, message_id: i64) {
        if self
            .objects
            .write()
            .await
            .remove(&(channel_id, message_id))
            .is_some()
        {
            debug!("Forgot {}/{}", channel_id, message_id);
        }
    }

    /// The underlying provider
    pub fn provider(&self) -> &Arc<dyn RemoteProvider> {
        &self.provider
    }
}
