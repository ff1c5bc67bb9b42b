use std::{collections::BTreeMap, sync::Arc};

use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::{
    persistence::{JsonFile, PersistFailureHandler},
    types::UserId,
};

/// Per-user blacklist hit counters. A user without an entry has zero
/// violations; entries are removed, never set to zero.
pub struct ViolationLedger {
    counts: RwLock<BTreeMap<UserId, u32>>,
    file: JsonFile,
    failures: Arc<dyn PersistFailureHandler>,
}

impl ViolationLedger {
    pub async fn open(file: JsonFile, failures: Arc<dyn PersistFailureHandler>) -> Self {
        let mut counts = match file.load::<BTreeMap<UserId, u32>>().await {
            Ok(stored) => stored.unwrap_or_default(),
            Err(error) => {
                failures.load_failed(file.path(), &error);
                BTreeMap::new()
            }
        };
        counts.retain(|_, count| *count > 0);
        info!(
            path = %file.path().display(),
            users = counts.len(),
            "loaded violation counters"
        );

        Self {
            counts: RwLock::new(counts),
            file,
            failures,
        }
    }

    /// Returns the count after the increment, read under the same lock.
    pub async fn add_violation(&self, user_id: UserId) -> u32 {
        let mut counts = self.counts.write().await;
        let count = counts.entry(user_id).or_insert(0);
        *count = count.saturating_add(1);
        let violations = *count;
        debug!(user_id, violations, "recorded violation");
        self.persist(&counts).await;
        violations
    }

    pub async fn get_violations(&self, user_id: UserId) -> u32 {
        self.counts
            .read()
            .await
            .get(&user_id)
            .copied()
            .unwrap_or(0)
    }

    /// Returns whether the user had an entry. Nothing is written when there
    /// was none.
    pub async fn clear_violations(&self, user_id: UserId) -> bool {
        let mut counts = self.counts.write().await;
        if counts.remove(&user_id).is_none() {
            return false;
        }
        debug!(user_id, "cleared violations");
        self.persist(&counts).await;
        true
    }

    pub async fn snapshot(&self) -> BTreeMap<UserId, u32> {
        self.counts.read().await.clone()
    }

    async fn persist(&self, counts: &BTreeMap<UserId, u32>) {
        if let Err(error) = self.file.save(counts).await {
            self.failures.save_failed(self.file.path(), &error);
        }
    }
}
