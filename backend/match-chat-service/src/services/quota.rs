//! Discovery quota collaborator.
//!
//! Billing and tier logic live elsewhere; discovery only asks whether a
//! scan is allowed for the user right now.

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use uuid::Uuid;

#[async_trait]
pub trait QuotaChecker: Send + Sync {
    /// `false` means the scan must not run.
    async fn check_quota(&self, user_id: Uuid) -> bool;
}

/// Always allows.
#[derive(Debug, Default, Clone, Copy)]
pub struct UnlimitedQuota;

#[async_trait]
impl QuotaChecker for UnlimitedQuota {
    async fn check_quota(&self, _user_id: Uuid) -> bool {
        true
    }
}

/// `limit` scans per user per `window`; premium users are exempt.
pub struct FixedWindowQuota {
    limit: u32,
    window: Duration,
    premium: HashSet<Uuid>,
    usage: Mutex<Usage>,
}

struct Usage {
    /// Window start and scans counted, per user
    windows: HashMap<Uuid, (Instant, u32)>,
    pruned_at: Instant,
}

impl FixedWindowQuota {
    pub fn new(limit: u32, window: Duration, premium: impl IntoIterator<Item = Uuid>) -> Self {
        Self {
            limit,
            window,
            premium: premium.into_iter().collect(),
            usage: Mutex::new(Usage {
                windows: HashMap::new(),
                pruned_at: Instant::now(),
            }),
        }
    }

    #[cfg(test)]
    async fn tracked_users(&self) -> usize {
        self.usage.lock().await.windows.len()
    }
}

#[async_trait]
impl QuotaChecker for FixedWindowQuota {
    async fn check_quota(&self, user_id: Uuid) -> bool {
        if self.premium.contains(&user_id) {
            return true;
        }

        let now = Instant::now();
        let mut usage = self.usage.lock().await;

        // Elapsed windows carry no state, so drop them once per window
        if now.duration_since(usage.pruned_at) >= self.window {
            let window = self.window;
            usage
                .windows
                .retain(|_, (start, _)| now.duration_since(*start) < window);
            usage.pruned_at = now;
        }

        let entry = usage.windows.entry(user_id).or_insert((now, 0));

        if now.duration_since(entry.0) >= self.window {
            *entry = (now, 0);
        }

        if entry.1 >= self.limit {
            tracing::debug!(user_id = %user_id, limit = self.limit, "discovery quota exhausted");
            return false;
        }

        entry.1 += 1;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_fixed_window_limits_and_resets() {
        let quota = FixedWindowQuota::new(2, Duration::from_secs(60), []);
        let user = Uuid::new_v4();

        assert!(quota.check_quota(user).await);
        assert!(quota.check_quota(user).await);
        assert!(!quota.check_quota(user).await);

        // Other users have their own budget
        assert!(quota.check_quota(Uuid::new_v4()).await);

        tokio::time::advance(Duration::from_secs(61)).await;
        assert!(quota.check_quota(user).await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_elapsed_windows_are_pruned() {
        let quota = FixedWindowQuota::new(1, Duration::from_secs(60), []);
        for _ in 0..5 {
            assert!(quota.check_quota(Uuid::new_v4()).await);
        }
        assert_eq!(quota.tracked_users().await, 5);

        tokio::time::advance(Duration::from_secs(61)).await;
        let user = Uuid::new_v4();
        assert!(quota.check_quota(user).await);
        assert_eq!(quota.tracked_users().await, 1);

        // Pruning never resets a window still in progress
        assert!(!quota.check_quota(user).await);
    }

    #[tokio::test]
    async fn test_premium_users_are_exempt() {
        let premium = Uuid::new_v4();
        let quota = FixedWindowQuota::new(0, Duration::from_secs(60), [premium]);

        for _ in 0..10 {
            assert!(quota.check_quota(premium).await);
        }
        assert!(!quota.check_quota(Uuid::new_v4()).await);
    }

    #[tokio::test]
    async fn test_unlimited() {
        assert!(UnlimitedQuota.check_quota(Uuid::new_v4()).await);
    }
}
