use anyhow::{anyhow, Context, Result};
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSqlOutput, ValueRef};
use rusqlite::{params, Connection, OptionalExtension, ToSql};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tracing::{debug, info};

use crate::cache::LeadCache;
use crate::errors::StoreError;
use crate::models::{CandidateProfile, Lead, LeadStatus, ResearchStatus, ScoredLead};
use crate::profile;

const LEAD_COLUMNS: &str = "id, user_id, resume_id, url, title, company, snippet, query_source,
     match_score, match_reason, status, created_at, updated_at";

/// How a caller names a lead when changing its status.
#[derive(Debug, Clone)]
pub enum LeadRef {
    Id(i64),
    Url(String),
}

#[derive(Debug, Clone)]
pub struct ResearchState {
    pub status: ResearchStatus,
    pub message: Option<String>,
    pub updated_at: Option<String>,
}

/// SQLite-backed lead store. One connection behind a mutex is shared by
/// every pipeline in the process; the page cache sits in front of `list`.
pub struct LeadStore {
    conn: Mutex<Connection>,
    path: PathBuf,
    cache: LeadCache,
    page_size: usize,
}

impl ToSql for LeadStatus {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(self.as_str().into())
    }
}

impl FromSql for LeadStatus {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        value
            .as_str()?
            .parse()
            .map_err(|e: anyhow::Error| FromSqlError::Other(e.into()))
    }
}

impl ToSql for ResearchStatus {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(self.as_str().into())
    }
}

impl FromSql for ResearchStatus {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        value
            .as_str()?
            .parse()
            .map_err(|e: anyhow::Error| FromSqlError::Other(e.into()))
    }
}

impl LeadStore {
    pub fn open(path: &Path, cache_ttl: Duration, page_size: usize) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create {}", parent.display()))?;
            }
        }
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open database at {}", path.display()))?;
        conn.busy_timeout(Duration::from_secs(5))?;
        Ok(Self {
            conn: Mutex::new(conn),
            path: path.to_path_buf(),
            cache: LeadCache::new(cache_ttl),
            page_size: page_size.max(1),
        })
    }

    /// A fresh, initialized in-memory store.
    pub fn open_in_memory(cache_ttl: Duration, page_size: usize) -> Result<Self> {
        let store = Self {
            conn: Mutex::new(Connection::open_in_memory()?),
            path: PathBuf::from(":memory:"),
            cache: LeadCache::new(cache_ttl),
            page_size: page_size.max(1),
        };
        store.init()?;
        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| anyhow!("Lead store connection lock poisoned"))
    }

    pub fn init(&self) -> Result<()> {
        self.conn()?.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS leads (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id TEXT NOT NULL,
                resume_id TEXT NOT NULL,
                url TEXT NOT NULL,
                title TEXT NOT NULL,
                company TEXT NOT NULL DEFAULT '',
                snippet TEXT,
                query_source TEXT,
                match_score INTEGER NOT NULL DEFAULT 0,
                match_reason TEXT,
                status TEXT NOT NULL DEFAULT 'NEW'
                    CHECK (status IN ('NEW', 'APPLYING', 'APPLIED', 'FAILED', 'CANCELLED', 'DRY_RUN')),
                created_at TEXT NOT NULL DEFAULT (datetime('now')),
                updated_at TEXT NOT NULL DEFAULT (datetime('now')),
                UNIQUE (user_id, resume_id, url)
            );

            CREATE TABLE IF NOT EXISTS research_status (
                user_id TEXT NOT NULL,
                resume_id TEXT NOT NULL,
                status TEXT NOT NULL,
                message TEXT,
                updated_at TEXT NOT NULL DEFAULT (datetime('now')),
                PRIMARY KEY (user_id, resume_id)
            );

            CREATE TABLE IF NOT EXISTS profiles (
                user_id TEXT NOT NULL,
                resume_id TEXT NOT NULL,
                profile_json TEXT NOT NULL,
                updated_at TEXT NOT NULL DEFAULT (datetime('now')),
                PRIMARY KEY (user_id, resume_id)
            );

            CREATE INDEX IF NOT EXISTS idx_leads_context ON leads(user_id, resume_id);
            CREATE INDEX IF NOT EXISTS idx_leads_status ON leads(status);
            "#,
        )?;
        Ok(())
    }

    pub fn ensure_initialized(&self) -> Result<()> {
        let tables: i64 = self.conn()?.query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name='leads'",
            [],
            |row| row.get(0),
        )?;
        if tables == 0 {
            return Err(anyhow!("Database not initialized. Run 'leadhunt init' first."));
        }
        Ok(())
    }

    fn row_to_lead(row: &rusqlite::Row) -> rusqlite::Result<Lead> {
        Ok(Lead {
            id: row.get(0)?,
            user_id: row.get(1)?,
            resume_id: row.get(2)?,
            url: row.get(3)?,
            title: row.get(4)?,
            company: row.get(5)?,
            snippet: row.get(6)?,
            query_source: row.get(7)?,
            match_score: row.get(8)?,
            match_reason: row.get(9)?,
            status: row.get(10)?,
            created_at: row.get(11)?,
            updated_at: row.get(12)?,
        })
    }

    // --- Lead writes ---

    /// Inserts the leads whose URL is not already stored for this context.
    /// Existing rows are left untouched. Returns how many rows were added.
    pub fn insert_if_absent(&self, user: &str, resume: &str, leads: &[ScoredLead]) -> Result<usize> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;

        let mut known: HashSet<String> = {
            let mut stmt = tx.prepare("SELECT url FROM leads WHERE user_id = ?1 AND resume_id = ?2")?;
            let urls = stmt
                .query_map(params![user, resume], |row| row.get::<_, String>(0))?
                .collect::<Result<Vec<_>, _>>()?;
            urls.into_iter().map(|u| u.to_lowercase()).collect()
        };

        let mut inserted = 0;
        for scored in leads {
            let url = scored.lead.url.trim();
            if url.is_empty() || !known.insert(url.to_lowercase()) {
                continue;
            }
            let snippet = Some(scored.lead.snippet.as_str()).filter(|s| !s.is_empty());
            let query_source = Some(scored.lead.query_source.as_str()).filter(|s| !s.is_empty());
            inserted += tx.execute(
                "INSERT OR IGNORE INTO leads
                    (user_id, resume_id, url, title, company, snippet, query_source, match_score, match_reason, status)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                params![
                    user,
                    resume,
                    url,
                    scored.lead.title,
                    scored.lead.company,
                    snippet,
                    query_source,
                    scored.score as i64,
                    scored.reason,
                    LeadStatus::New,
                ],
            )?;
        }
        tx.commit()?;
        drop(conn);

        self.cache.invalidate_context(user, resume);
        info!("Stored {} new leads ({} offered) for {}/{}", inserted, leads.len(), user, resume);
        Ok(inserted)
    }

    /// Moves a lead to `status`. Writing the status a lead already has is a
    /// no-op; anything the lifecycle forbids is an `InvalidTransition`.
    pub fn update_status(&self, user: &str, resume: &str, lead: &LeadRef, status: LeadStatus) -> Result<Lead> {
        let current = self.lookup(user, resume, lead)?;

        if current.status == status {
            debug!("Lead {} already {}", current.id, status);
            return Ok(current);
        }
        if !current.status.can_transition_to(status) {
            return Err(StoreError::InvalidTransition {
                from: current.status,
                to: status,
            }
            .into());
        }

        self.conn()?.execute(
            "UPDATE leads SET status = ?1, updated_at = datetime('now') WHERE id = ?2",
            params![status, current.id],
        )?;
        self.cache.invalidate_context(user, resume);
        info!("Lead {} moved {} -> {}", current.id, current.status, status);

        self.get_by_id(current.id)?
            .ok_or_else(|| StoreError::LeadNotFound(current.id.to_string()).into())
    }

    /// Claims a lead for one application attempt. A lead already APPLYING
    /// is refused, including when another writer claims it first.
    pub fn begin_apply(&self, user: &str, resume: &str, lead: &LeadRef) -> Result<Lead> {
        let current = self.lookup(user, resume, lead)?;
        if current.status == LeadStatus::Applying {
            return Err(StoreError::ApplyInProgress(current.id).into());
        }
        if !current.status.can_transition_to(LeadStatus::Applying) {
            return Err(StoreError::InvalidTransition {
                from: current.status,
                to: LeadStatus::Applying,
            }
            .into());
        }

        let claimed = self.conn()?.execute(
            "UPDATE leads SET status = ?1, updated_at = datetime('now') WHERE id = ?2 AND status = ?3",
            params![LeadStatus::Applying, current.id, current.status],
        )?;
        if claimed == 0 {
            return Err(StoreError::ApplyInProgress(current.id).into());
        }
        self.cache.invalidate_context(user, resume);
        info!("Lead {} moved {} -> {}", current.id, current.status, LeadStatus::Applying);

        self.get_by_id(current.id)?
            .ok_or_else(|| StoreError::LeadNotFound(current.id.to_string()).into())
    }

    fn lookup(&self, user: &str, resume: &str, lead: &LeadRef) -> Result<Lead> {
        match lead {
            LeadRef::Id(id) => self.get_by_id(*id)?.filter(|l| l.user_id == user && l.resume_id == resume),
            LeadRef::Url(url) => self.get_by_url(user, resume, url)?,
        }
        .ok_or_else(|| StoreError::LeadNotFound(describe_ref(lead)).into())
    }

    pub fn delete_lead(&self, user: &str, resume: &str, id: i64) -> Result<bool> {
        let removed = self.conn()?.execute(
            "DELETE FROM leads WHERE id = ?1 AND user_id = ?2 AND resume_id = ?3",
            params![id, user, resume],
        )?;
        self.cache.invalidate_context(user, resume);
        Ok(removed > 0)
    }

    // --- Lead reads ---

    pub fn get_by_id(&self, id: i64) -> Result<Option<Lead>> {
        let sql = format!("SELECT {} FROM leads WHERE id = ?1", LEAD_COLUMNS);
        Ok(self.conn()?.query_row(&sql, [id], Self::row_to_lead).optional()?)
    }

    pub fn get_by_url(&self, user: &str, resume: &str, url: &str) -> Result<Option<Lead>> {
        let sql = format!(
            "SELECT {} FROM leads WHERE user_id = ?1 AND resume_id = ?2 AND LOWER(url) = LOWER(?3)",
            LEAD_COLUMNS
        );
        Ok(self
            .conn()?
            .query_row(&sql, params![user, resume, url.trim()], Self::row_to_lead)
            .optional()?)
    }

    /// Finds a lead from a human reference: a URL, "Title at Company", or a
    /// bare title. A requested company is never swapped for another one.
    pub fn find_by_reference(&self, user: &str, resume: &str, reference: &str) -> Result<Option<Lead>> {
        let reference = reference.trim();
        if reference.is_empty() {
            return Ok(None);
        }
        if reference.starts_with("http://") || reference.starts_with("https://") {
            return self.get_by_url(user, resume, reference);
        }

        let (title, company) = split_reference(reference);
        let conn = self.conn()?;

        if let Some(company) = company {
            let sql = format!(
                "SELECT {} FROM leads
                 WHERE user_id = ?1 AND resume_id = ?2 AND LOWER(title) = LOWER(?3) AND LOWER(company) = LOWER(?4)
                 ORDER BY match_score DESC, id LIMIT 1",
                LEAD_COLUMNS
            );
            let exact = conn
                .query_row(&sql, params![user, resume, title, company], Self::row_to_lead)
                .optional()?;
            if exact.is_some() {
                return Ok(exact);
            }
        }

        let sql = format!(
            "SELECT {} FROM leads WHERE user_id = ?1 AND resume_id = ?2 AND LOWER(title) LIKE ?3 ESCAPE '\\'
             ORDER BY match_score DESC, id",
            LEAD_COLUMNS
        );
        let pattern = format!("%{}%", escape_like(&title.to_lowercase()));
        let mut stmt = conn.prepare(&sql)?;
        let candidates = stmt
            .query_map(params![user, resume, pattern], Self::row_to_lead)?
            .collect::<Result<Vec<_>, _>>()?;

        let wanted = title.to_lowercase();
        let mut best: Option<(f64, Lead)> = None;
        for lead in candidates {
            if let Some(company) = company {
                if !same_company(&lead.company, company) {
                    continue;
                }
            }
            let similarity = strsim::jaro_winkler(&lead.title.to_lowercase(), &wanted);
            if best.as_ref().map_or(true, |(s, _)| similarity > *s) {
                best = Some((similarity, lead));
            }
        }
        Ok(best.map(|(_, lead)| lead))
    }

    /// One page of leads for a context, best match first. Served from the
    /// page cache while fresh.
    pub fn list(&self, user: &str, resume: &str, page: usize) -> Result<Vec<Lead>> {
        if let Some(leads) = self.cache.get(user, resume, page) {
            debug!("Cache hit for {}/{} page {}", user, resume, page);
            return Ok(leads);
        }
        let generation = self.cache.generation(user, resume);

        let sql = format!(
            "SELECT {} FROM leads WHERE user_id = ?1 AND resume_id = ?2
             ORDER BY match_score DESC, id LIMIT ?3 OFFSET ?4",
            LEAD_COLUMNS
        );
        let leads = {
            let conn = self.conn()?;
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(
                params![user, resume, self.page_size as i64, (page * self.page_size) as i64],
                Self::row_to_lead,
            )?;
            rows.collect::<Result<Vec<_>, _>>()
                .context("Failed to list leads")?
        };

        self.cache.put(user, resume, page, generation, leads.clone());
        Ok(leads)
    }

    pub fn lead_counts(&self, user: &str, resume: &str) -> Result<Vec<(LeadStatus, i64)>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT status, COUNT(*) FROM leads WHERE user_id = ?1 AND resume_id = ?2
             GROUP BY status ORDER BY COUNT(*) DESC",
        )?;
        let rows = stmt.query_map(params![user, resume], |row| Ok((row.get(0)?, row.get(1)?)))?;
        rows.collect::<Result<Vec<_>, _>>()
            .context("Failed to count leads")
    }

    // --- Research status ---

    pub fn research_state(&self, user: &str, resume: &str) -> Result<ResearchState> {
        let state = self
            .conn()?
            .query_row(
                "SELECT status, message, updated_at FROM research_status WHERE user_id = ?1 AND resume_id = ?2",
                params![user, resume],
                |row| {
                    Ok(ResearchState {
                        status: row.get(0)?,
                        message: row.get(1)?,
                        updated_at: row.get(2)?,
                    })
                },
            )
            .optional()?;
        Ok(state.unwrap_or(ResearchState {
            status: ResearchStatus::Idle,
            message: None,
            updated_at: None,
        }))
    }

    pub fn research_status(&self, user: &str, resume: &str) -> Result<ResearchStatus> {
        Ok(self.research_state(user, resume)?.status)
    }

    pub fn set_research_status(
        &self,
        user: &str,
        resume: &str,
        status: ResearchStatus,
        message: Option<&str>,
    ) -> Result<()> {
        self.conn()?.execute(
            "INSERT INTO research_status (user_id, resume_id, status, message, updated_at)
             VALUES (?1, ?2, ?3, ?4, datetime('now'))
             ON CONFLICT (user_id, resume_id)
             DO UPDATE SET status = excluded.status, message = excluded.message, updated_at = excluded.updated_at",
            params![user, resume, status, message],
        )?;
        debug!("Research {}/{} -> {}", user, resume, status);
        Ok(())
    }

    /// Flips the context to SEARCHING unless a run is already in flight.
    pub fn begin_research(&self, user: &str, resume: &str, force: bool) -> Result<()> {
        let current = self.research_status(user, resume)?;
        if current.is_running() && !force {
            return Err(StoreError::AlreadyRunning(format!("{}/{}", user, resume)).into());
        }
        self.set_research_status(user, resume, ResearchStatus::Searching, Some("Research started"))
    }

    /// Records a cancellation request. Returns false when nothing is running.
    pub fn request_cancel(&self, user: &str, resume: &str) -> Result<bool> {
        let updated = self.conn()?.execute(
            "UPDATE research_status SET status = ?3, message = 'Cancellation requested', updated_at = datetime('now')
             WHERE user_id = ?1 AND resume_id = ?2 AND status = ?4",
            params![user, resume, ResearchStatus::CancelRequested, ResearchStatus::Searching],
        )?;
        Ok(updated > 0 || self.research_status(user, resume)? == ResearchStatus::CancelRequested)
    }

    // --- Profiles ---

    /// Replaces the stored profile for this context as a whole.
    pub fn save_profile(&self, user: &str, resume: &str, profile: &CandidateProfile) -> Result<()> {
        let json = serde_json::to_string(profile)?;
        self.conn()?.execute(
            "INSERT OR REPLACE INTO profiles (user_id, resume_id, profile_json, updated_at)
             VALUES (?1, ?2, ?3, datetime('now'))",
            params![user, resume, json],
        )?;
        Ok(())
    }

    pub fn load_profile(&self, user: &str, resume: &str) -> Result<Option<CandidateProfile>> {
        let json: Option<String> = self
            .conn()?
            .query_row(
                "SELECT profile_json FROM profiles WHERE user_id = ?1 AND resume_id = ?2",
                params![user, resume],
                |row| row.get(0),
            )
            .optional()?;
        match json {
            Some(json) => {
                let mut profile: CandidateProfile =
                    serde_json::from_str(&json).context("Stored profile is not valid JSON")?;
                profile.seniority = profile::infer_seniority(&profile.experience);
                Ok(Some(profile))
            }
            None => Ok(None),
        }
    }
}

fn describe_ref(lead: &LeadRef) -> String {
    match lead {
        LeadRef::Id(id) => format!("#{}", id),
        LeadRef::Url(url) => url.clone(),
    }
}

/// Splits "Title at Company" on the last " at ".
fn split_reference(reference: &str) -> (&str, Option<&str>) {
    let lower = reference.to_ascii_lowercase();
    match lower.rfind(" at ") {
        Some(idx) => {
            let title = reference[..idx].trim();
            let company = reference[idx + 4..].trim();
            if title.is_empty() || company.is_empty() {
                (reference, None)
            } else {
                (title, Some(company))
            }
        }
        None => (reference, None),
    }
}

/// Escapes LIKE wildcards; pair with `ESCAPE '\\'`.
fn escape_like(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        if matches!(c, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

fn normalize_company(name: &str) -> String {
    const SUFFIXES: &[&str] = &["inc", "llc", "ltd", "corp", "corporation", "co", "company", "gmbh"];
    name.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty() && !SUFFIXES.contains(t))
        .collect::<Vec<_>>()
        .join(" ")
}

fn same_company(stored: &str, requested: &str) -> bool {
    let a = normalize_company(stored);
    let b = normalize_company(requested);
    !a.is_empty() && (a == b || strsim::jaro_winkler(&a, &b) >= 0.95)
}
