use std::{collections::HashMap, sync::Mutex};

use anyhow::Result;
use async_trait::async_trait;
use tracing::debug;

use super::{document::RemoteUsageDocument, RemoteStore};

/// In-process [RemoteStore] with the same merge rules as the Firestore one. Used when no
/// remote project is configured, so the host still runs the full sync path.
#[derive(Default)]
pub struct MemoryRemoteStore {
    documents: Mutex<HashMap<String, RemoteUsageDocument>>,
}

impl MemoryRemoteStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn document(&self, doc_id: &str) -> Option<RemoteUsageDocument> {
        self.documents
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(doc_id)
            .cloned()
    }
}

#[async_trait]
impl RemoteStore for MemoryRemoteStore {
    async fn get_document(&self, doc_id: &str) -> Result<Option<RemoteUsageDocument>> {
        Ok(self.document(doc_id))
    }

    async fn merge_document(&self, doc_id: &str, document: &RemoteUsageDocument) -> Result<()> {
        debug!("Merging into in-memory document {doc_id}");
        let mut documents = self.documents.lock().unwrap_or_else(|e| e.into_inner());
        match documents.get_mut(doc_id) {
            Some(existing) => {
                existing.date.clone_from(&document.date);
                existing.user_id.clone_from(&document.user_id);
                existing.total_time = document.total_time;
                existing.last_updated.clone_from(&document.last_updated);
                existing
                    .sites
                    .extend(document.sites.iter().map(|(k, v)| (k.clone(), *v)));
            }
            None => {
                documents.insert(doc_id.to_owned(), document.clone());
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use anyhow::Result;

    use super::*;

    fn document(sites: &[(&str, u64)]) -> RemoteUsageDocument {
        RemoteUsageDocument {
            date: "2025-05-21".into(),
            user_id: "uid".into(),
            sites: sites.iter().map(|(d, ms)| (d.to_string(), *ms)).collect(),
            total_time: sites.iter().map(|(_, ms)| ms).sum(),
            last_updated: "2025-05-21T10:00:00.000Z".into(),
        }
    }

    #[tokio::test]
    async fn test_merge_keeps_untouched_sites() -> Result<()> {
        let store = MemoryRemoteStore::new();
        assert_eq!(store.get_document("uid_2025-05-21").await?, None);

        store
            .merge_document("uid_2025-05-21", &document(&[("a.com", 10), ("b.com", 20)]))
            .await?;
        store
            .merge_document("uid_2025-05-21", &document(&[("b.com", 30)]))
            .await?;

        let stored = store.get_document("uid_2025-05-21").await?.unwrap();
        assert_eq!(stored.sites["a.com"], 10);
        assert_eq!(stored.sites["b.com"], 30);
        assert_eq!(stored.total_time, 30);
        Ok(())
    }
}
