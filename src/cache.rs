use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::models::Lead;

type ContextKey = (String, String);

/// Short-lived cache of listed lead pages, keyed by (user, resume) and page.
/// Any write to a context drops every cached page of that context and bumps
/// its generation; a page read under an older generation is never stored.
pub struct LeadCache {
    ttl: Duration,
    inner: Mutex<Inner>,
}

#[derive(Default)]
struct Inner {
    pages: HashMap<ContextKey, HashMap<usize, (Instant, Vec<Lead>)>>,
    generations: HashMap<ContextKey, u64>,
}

fn key(user: &str, resume: &str) -> ContextKey {
    (user.to_string(), resume.to_string())
}

impl LeadCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            inner: Mutex::new(Inner::default()),
        }
    }

    pub fn get(&self, user: &str, resume: &str, page: usize) -> Option<Vec<Lead>> {
        let mut inner = self.inner.lock().ok()?;
        let pages = inner.pages.get_mut(&key(user, resume))?;
        match pages.get(&page) {
            Some((stored, leads)) if stored.elapsed() < self.ttl => Some(leads.clone()),
            Some(_) => {
                pages.remove(&page);
                None
            }
            None => None,
        }
    }

    /// Read before querying the database; pass the value back to `put`.
    pub fn generation(&self, user: &str, resume: &str) -> u64 {
        self.inner
            .lock()
            .map(|inner| inner.generations.get(&key(user, resume)).copied().unwrap_or(0))
            .unwrap_or(0)
    }

    /// Stores a page read under `generation`. Dropped if the context was
    /// invalidated since.
    pub fn put(&self, user: &str, resume: &str, page: usize, generation: u64, leads: Vec<Lead>) {
        let Ok(mut inner) = self.inner.lock() else {
            return;
        };
        let key = key(user, resume);
        if inner.generations.get(&key).copied().unwrap_or(0) != generation {
            return;
        }
        inner
            .pages
            .entry(key)
            .or_default()
            .insert(page, (Instant::now(), leads));
    }

    pub fn invalidate_context(&self, user: &str, resume: &str) {
        if let Ok(mut inner) = self.inner.lock() {
            let key = key(user, resume);
            inner.pages.remove(&key);
            *inner.generations.entry(key).or_insert(0) += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::LeadStatus;

    fn lead(id: i64) -> Lead {
        Lead {
            id,
            user_id: "u".to_string(),
            resume_id: "r".to_string(),
            url: format!("https://jobs.lever.co/acme/{}", id),
            title: "Backend Engineer".to_string(),
            company: "Acme".to_string(),
            snippet: None,
            query_source: None,
            match_score: 80,
            match_reason: None,
            status: LeadStatus::New,
            created_at: String::new(),
            updated_at: String::new(),
        }
    }

    #[test]
    fn test_hit_within_ttl() {
        let cache = LeadCache::new(Duration::from_secs(60));
        cache.put("u", "r", 0, 0, vec![lead(1)]);
        assert_eq!(cache.get("u", "r", 0).map(|l| l.len()), Some(1));
        assert!(cache.get("u", "r", 1).is_none());
        assert!(cache.get("u", "other", 0).is_none());
    }

    #[test]
    fn test_expired_entries_miss() {
        let cache = LeadCache::new(Duration::ZERO);
        cache.put("u", "r", 0, 0, vec![lead(1)]);
        assert!(cache.get("u", "r", 0).is_none());
    }

    #[test]
    fn test_invalidation_is_scoped_to_context() {
        let cache = LeadCache::new(Duration::from_secs(60));
        cache.put("u", "r", 0, 0, vec![lead(1)]);
        cache.put("u", "r", 1, 0, vec![lead(2)]);
        cache.put("u", "r2", 0, 0, vec![lead(3)]);

        cache.invalidate_context("u", "r");

        assert!(cache.get("u", "r", 0).is_none());
        assert!(cache.get("u", "r", 1).is_none());
        assert!(cache.get("u", "r2", 0).is_some());
    }

    #[test]
    fn test_page_read_before_invalidation_is_not_stored() {
        let cache = LeadCache::new(Duration::from_secs(60));
        let generation = cache.generation("u", "r");
        let snapshot = vec![lead(1)];

        // A status write lands between the read and the store
        cache.invalidate_context("u", "r");
        cache.put("u", "r", 0, generation, snapshot);
        assert!(cache.get("u", "r", 0).is_none());

        let generation = cache.generation("u", "r");
        let mut fresh = lead(1);
        fresh.status = LeadStatus::Applying;
        cache.put("u", "r", 0, generation, vec![fresh]);
        assert_eq!(cache.get("u", "r", 0).unwrap()[0].status, LeadStatus::Applying);
    }
}
