//! Grouped calendars feed: a feed made of several member calendars.
//!
//! Member calendars are picked either from an explicit id list or from the
//! calendars tagged with a set of feed categories. Their events are merged
//! (first member wins on a shared key), trimmed to the feed's time window
//! and cached under the feed's [`CacheKey`].

use serde_json::Value;
use tracing::instrument;

use crate::cache::FeedCache;
use crate::store::{
    CalendarResolver, CalendarStore, CALENDAR_POST_TYPE, CATEGORY_FIELD, FEED_CATEGORY_TAXONOMY,
    IDS_FIELD, SOURCE_FIELD,
};
use crate::types::{
    CacheKey, CalendarId, EventCollection, FeedSettings, FeedType, MemberCalendar, SourceMode,
};

/// Collaborators a grouped feed needs to resolve and compute its events.
#[derive(Clone, Copy)]
pub struct FeedServices<'a> {
    pub store: &'a dyn CalendarStore,
    pub resolver: &'a dyn CalendarResolver,
    pub cache: &'a dyn FeedCache,
}

/// Where the events of an [`Aggregation`] came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventsOrigin {
    /// Served from a cache entry
    Cache,
    /// Merged from member calendars
    Computed,
    /// Cache miss and no member calendars to merge
    NoMembers,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    NotFound,
    NoEvents,
}

/// A member calendar that contributed nothing to the merge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SkippedMember {
    pub id: CalendarId,
    pub reason: SkipReason,
}

/// Events of a grouped feed together with how they were obtained.
#[derive(Debug, Clone)]
pub struct Aggregation {
    pub events: EventCollection,
    pub origin: EventsOrigin,
    pub skipped: Vec<SkippedMember>,
}

impl Aggregation {
    fn empty(origin: EventsOrigin) -> Self {
        Self {
            events: EventCollection::new(),
            origin,
            skipped: Vec::new(),
        }
    }

    /// True when at least one member calendar could not contribute.
    pub fn is_degraded(&self) -> bool {
        !self.skipped.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct GroupedCalendars {
    settings: FeedSettings,
    ids: Vec<CalendarId>,
    events: EventCollection,
}

impl GroupedCalendars {
    pub const FEED_TYPE: FeedType = FeedType::GroupedCalendars;

    /// Build the feed, resolving members and events when the calendar id is set.
    pub fn new(settings: FeedSettings, services: FeedServices<'_>) -> Self {
        let mut feed = Self::unresolved(settings);
        if settings.calendar_id.is_valid() {
            feed.set_source(services.store, &[]);
            feed.events = feed.get_events(services);
        }
        feed
    }

    /// A feed with no members and no events.
    pub fn unresolved(settings: FeedSettings) -> Self {
        Self {
            settings,
            ids: Vec::new(),
            events: EventCollection::new(),
        }
    }

    /// Resolve member calendar ids from the persisted source settings.
    ///
    /// `override_ids` replaces the persisted id list in explicit-id mode when
    /// non-empty. In category mode an empty or missing category list, and any
    /// unknown source mode, leave the current members untouched.
    pub fn set_source(&mut self, store: &dyn CalendarStore, override_ids: &[CalendarId]) {
        let calendar_id = self.settings.calendar_id;
        let source = store
            .load_field(calendar_id, SOURCE_FIELD)
            .and_then(|v| SourceMode::from_value(&v));

        match source {
            Some(SourceMode::ExplicitIds) => {
                self.ids = if override_ids.is_empty() {
                    store
                        .load_field(calendar_id, IDS_FIELD)
                        .map(|v| coerce_ids(&v))
                        .unwrap_or_default()
                } else {
                    normalize_ids(override_ids.iter().copied())
                };
            }
            Some(SourceMode::Category) => {
                let terms: Vec<u64> = store
                    .load_field(calendar_id, CATEGORY_FIELD)
                    .map(|v| list_entries(&v).into_iter().map(absint).collect())
                    .unwrap_or_default();

                if terms.is_empty() {
                    tracing::debug!("Feed {} has no categories, members unchanged", calendar_id);
                    return;
                }

                let found =
                    store.query_by_taxonomy(CALENDAR_POST_TYPE, FEED_CATEGORY_TAXONOMY, &terms);
                self.ids = normalize_ids(found);
            }
            None => {
                tracing::debug!("Feed {} has no usable source mode", calendar_id);
                return;
            }
        }

        tracing::debug!(
            "Feed {} resolved {} member calendars",
            calendar_id,
            self.ids.len()
        );
    }

    /// Merged, time-windowed events of every member calendar.
    pub fn get_events(&self, services: FeedServices<'_>) -> EventCollection {
        self.aggregate(services).events
    }

    /// Like [`get_events`](Self::get_events), also reporting the cache outcome
    /// and the members that were skipped.
    #[instrument(
        skip(self, services),
        fields(calendar_id = %self.settings.calendar_id),
        level = "debug"
    )]
    pub fn aggregate(&self, services: FeedServices<'_>) -> Aggregation {
        let key = self.cache_key();

        match services.cache.get(&key) {
            Ok(Some(cached)) if !cached.is_empty() => {
                tracing::debug!("Cache hit for {} ({} events)", key, cached.len());
                return Aggregation {
                    events: cached,
                    origin: EventsOrigin::Cache,
                    skipped: Vec::new(),
                };
            }
            Ok(_) => tracing::debug!("Cache miss for {}", key),
            Err(e) => tracing::warn!("Feed cache read failed for {}: {}", key, e),
        }

        if self.ids.is_empty() {
            return Aggregation::empty(EventsOrigin::NoMembers);
        }

        let mut events = EventCollection::new();
        let mut skipped = Vec::new();

        for &id in &self.ids {
            match services.resolver.resolve(id) {
                Some(MemberCalendar {
                    events: Some(member_events),
                    ..
                }) => {
                    let added = events.merge_missing(&member_events);
                    tracing::debug!(
                        "Merged {} of {} events from {}",
                        added,
                        member_events.len(),
                        id
                    );
                }
                Some(_) => skipped.push(SkippedMember {
                    id,
                    reason: SkipReason::NoEvents,
                }),
                None => skipped.push(SkippedMember {
                    id,
                    reason: SkipReason::NotFound,
                }),
            }
        }

        if !skipped.is_empty() {
            tracing::debug!("Skipped {} member calendars of {}", skipped.len(), key);
        }

        let window = self.settings.window();
        if window.is_bounded() {
            events.retain_window(&window);
        }

        if !events.is_empty() {
            if let Err(e) = services
                .cache
                .set(&key, &events, self.settings.cache_ttl_seconds)
            {
                tracing::warn!("Feed cache write failed for {}: {}", key, e);
            }
        }

        Aggregation {
            events,
            origin: EventsOrigin::Computed,
            skipped,
        }
    }

    pub fn cache_key(&self) -> CacheKey {
        CacheKey::new(self.settings.calendar_id, Self::FEED_TYPE)
    }

    pub fn calendar_id(&self) -> CalendarId {
        self.settings.calendar_id
    }

    pub fn name(&self) -> &'static str {
        Self::FEED_TYPE.display_name()
    }

    pub fn settings(&self) -> &FeedSettings {
        &self.settings
    }

    pub fn member_ids(&self) -> &[CalendarId] {
        &self.ids
    }

    /// Events computed when the feed was built.
    pub fn events(&self) -> &EventCollection {
        &self.events
    }
}

/// Entries of a persisted list. Maps count as lists of their values; any
/// other value is not a list.
fn list_entries(value: &Value) -> Vec<&Value> {
    match value {
        Value::Array(items) => items.iter().collect(),
        Value::Object(map) => map.values().collect(),
        _ => Vec::new(),
    }
}

fn coerce_ids(value: &Value) -> Vec<CalendarId> {
    normalize_ids(list_entries(value).into_iter().map(|v| CalendarId(absint(v))))
}

/// Ordered, de-duplicated ids with the zero id removed.
fn normalize_ids(ids: impl IntoIterator<Item = CalendarId>) -> Vec<CalendarId> {
    let mut out: Vec<CalendarId> = Vec::new();
    for id in ids {
        if id.is_valid() && !out.contains(&id) {
            out.push(id);
        }
    }
    out
}

/// Absolute integer reading of a loosely typed value.
fn absint(value: &Value) -> u64 {
    match value {
        Value::Number(n) => n
            .as_i64()
            .map(i64::unsigned_abs)
            .or_else(|| n.as_u64())
            .or_else(|| n.as_f64().map(|f| f.trunc().abs() as u64))
            .unwrap_or(0),
        Value::String(s) => leading_int(s),
        Value::Bool(b) => u64::from(*b),
        _ => 0,
    }
}

fn leading_int(s: &str) -> u64 {
    let s = s.trim_start();
    let digits = s.strip_prefix(|c: char| c == '-' || c == '+').unwrap_or(s);
    let end = digits
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(digits.len());
    let digits = &digits[..end];
    if digits.is_empty() {
        return 0;
    }
    // Out-of-range readings clamp to the largest id the host can store.
    digits.parse::<i64>().unwrap_or(i64::MAX).unsigned_abs()
}
