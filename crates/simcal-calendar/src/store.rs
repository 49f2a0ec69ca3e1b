//! Collaborators a grouped feed reads from: persisted calendar settings and
//! member calendar resolution.

use parking_lot::RwLock;
use serde_json::Value;
use simcal_core::Config;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::types::{CalendarId, MemberCalendar};

/// Persisted field holding the source mode (`"ids"` or `"category"`).
pub const SOURCE_FIELD: &str = "_grouped_calendars_source";
/// Persisted field holding the explicit member id list.
pub const IDS_FIELD: &str = "_grouped_calendars_ids";
/// Persisted field holding the category term id list.
pub const CATEGORY_FIELD: &str = "_grouped_calendars_category";

pub const CALENDAR_POST_TYPE: &str = "calendar";
pub const FEED_CATEGORY_TAXONOMY: &str = "events_feed_category";

/// Read access to persisted calendar settings and taxonomy lookups.
pub trait CalendarStore: Send + Sync {
    /// Raw persisted value of `field` for a calendar, if any.
    fn load_field(&self, calendar_id: CalendarId, field: &str) -> Option<Value>;

    /// Ids of every post of `post_type` tagged with any of `term_ids` in `taxonomy`.
    fn query_by_taxonomy(&self, post_type: &str, taxonomy: &str, term_ids: &[u64])
        -> Vec<CalendarId>;
}

/// Looks up member calendars by id.
pub trait CalendarResolver: Send + Sync {
    fn resolve(&self, id: CalendarId) -> Option<MemberCalendar>;
}

#[derive(Debug, Default)]
struct PostRecord {
    post_type: String,
    terms: HashMap<String, Vec<u64>>,
}

/// In-process calendar store.
#[derive(Debug, Default)]
pub struct MemoryCalendarStore {
    fields: RwLock<HashMap<(CalendarId, String), Value>>,
    posts: RwLock<BTreeMap<CalendarId, PostRecord>>,
}

impl MemoryCalendarStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed persisted grouped-feed fields from configured feeds.
    pub fn from_config(config: &Config) -> Self {
        let store = Self::new();
        for feed in &config.feeds {
            let id = CalendarId(feed.calendar_id);
            store.add_post(id, CALENDAR_POST_TYPE);
            store.set_field(id, SOURCE_FIELD, Value::from(feed.source.as_str()));
            store.set_field(id, IDS_FIELD, Value::from(feed.ids.clone()));
            store.set_field(id, CATEGORY_FIELD, Value::from(feed.categories.clone()));
        }
        tracing::debug!("Seeded calendar store with {} feeds", config.feeds.len());
        store
    }

    pub fn set_field(&self, calendar_id: CalendarId, field: &str, value: Value) {
        self.fields
            .write()
            .insert((calendar_id, field.to_string()), value);
    }

    /// Register a post so taxonomy queries can find it.
    pub fn add_post(&self, id: CalendarId, post_type: &str) {
        let mut posts = self.posts.write();
        let record = posts.entry(id).or_default();
        record.post_type = post_type.to_string();
    }

    /// Tag a post with a term, registering it as a calendar post if unknown.
    pub fn tag(&self, id: CalendarId, taxonomy: &str, term_id: u64) {
        let mut posts = self.posts.write();
        let record = posts.entry(id).or_insert_with(|| PostRecord {
            post_type: CALENDAR_POST_TYPE.to_string(),
            terms: HashMap::new(),
        });
        let terms = record.terms.entry(taxonomy.to_string()).or_default();
        if !terms.contains(&term_id) {
            terms.push(term_id);
        }
    }
}

impl CalendarStore for MemoryCalendarStore {
    fn load_field(&self, calendar_id: CalendarId, field: &str) -> Option<Value> {
        self.fields
            .read()
            .get(&(calendar_id, field.to_string()))
            .cloned()
    }

    fn query_by_taxonomy(
        &self,
        post_type: &str,
        taxonomy: &str,
        term_ids: &[u64],
    ) -> Vec<CalendarId> {
        self.posts
            .read()
            .iter()
            .filter(|(_, post)| post.post_type == post_type)
            .filter(|(_, post)| {
                post.terms
                    .get(taxonomy)
                    .is_some_and(|terms| terms.iter().any(|t| term_ids.contains(t)))
            })
            .map(|(id, _)| *id)
            .collect()
    }
}

/// In-process resolver that counts lookups.
#[derive(Debug, Default)]
pub struct MemoryCalendarResolver {
    calendars: RwLock<HashMap<CalendarId, MemberCalendar>>,
    lookups: AtomicUsize,
}

impl MemoryCalendarResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, calendar: MemberCalendar) {
        self.calendars.write().insert(calendar.id, calendar);
    }

    /// Number of `resolve` calls made so far.
    pub fn lookups(&self) -> usize {
        self.lookups.load(Ordering::Relaxed)
    }
}

impl CalendarResolver for MemoryCalendarResolver {
    fn resolve(&self, id: CalendarId) -> Option<MemberCalendar> {
        self.lookups.fetch_add(1, Ordering::Relaxed);
        self.calendars.read().get(&id).cloned()
    }
}
