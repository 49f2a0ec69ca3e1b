//! Feed types and data structures.

use serde::{Deserialize, Serialize};
use simcal_core::{CacheConfig, FeedConfig, FeedSource};
use std::collections::BTreeMap;
use std::fmt;

/// Identifier of a calendar post. Zero means "no calendar".
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct CalendarId(pub u64);

impl CalendarId {
    pub fn get(self) -> u64 {
        self.0
    }

    pub fn is_valid(self) -> bool {
        self.0 > 0
    }
}

impl fmt::Display for CalendarId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for CalendarId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

/// A single calendar event as exposed by a member calendar.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Calendar the event came from
    pub calendar_id: CalendarId,
    pub title: String,
    /// Start time, Unix seconds
    pub start: i64,
    /// End time, Unix seconds
    #[serde(default)]
    pub end: Option<i64>,
    #[serde(default)]
    pub all_day: bool,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

impl Event {
    pub fn new(calendar_id: CalendarId, title: impl Into<String>, start: i64) -> Self {
        Self {
            calendar_id,
            title: title.into(),
            start,
            end: None,
            all_day: false,
            location: None,
            description: None,
        }
    }
}

/// Events keyed by a key that is unique within a feed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventCollection(BTreeMap<String, Event>);

impl EventCollection {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, key: &str) -> Option<&Event> {
        self.0.get(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    /// Insert an event, replacing any event under the same key.
    pub fn insert(&mut self, key: impl Into<String>, event: Event) -> Option<Event> {
        self.0.insert(key.into(), event)
    }

    /// Add every event of `other` whose key is not already present.
    ///
    /// Returns how many events were added.
    pub fn merge_missing(&mut self, other: &EventCollection) -> usize {
        let mut added = 0;
        for (key, event) in &other.0 {
            if !self.0.contains_key(key) {
                self.0.insert(key.clone(), event.clone());
                added += 1;
            }
        }
        added
    }

    /// Drop every event whose start falls outside `window`.
    pub fn retain_window(&mut self, window: &TimeWindow) {
        self.0.retain(|_, event| window.contains(event.start));
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Event)> {
        self.0.iter()
    }

    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.0.keys()
    }

    /// Events ordered by start time.
    pub fn chronological(&self) -> Vec<&Event> {
        let mut events: Vec<&Event> = self.0.values().collect();
        events.sort_by_key(|e| e.start);
        events
    }
}

impl<K: Into<String>> FromIterator<(K, Event)> for EventCollection {
    fn from_iter<I: IntoIterator<Item = (K, Event)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, e)| (k.into(), e)).collect())
    }
}

/// Kind of feed, used to namespace cache entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FeedType {
    GroupedCalendars,
    Google,
}

impl FeedType {
    pub fn tag(&self) -> &'static str {
        match self {
            FeedType::GroupedCalendars => "grouped-calendars",
            FeedType::Google => "google",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            FeedType::GroupedCalendars => "Grouped Calendars",
            FeedType::Google => "Google Calendar",
        }
    }
}

impl fmt::Display for FeedType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

/// Cache key of a computed feed: `<calendar id>_<feed type>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub calendar_id: CalendarId,
    pub feed_type: FeedType,
}

impl CacheKey {
    pub fn new(calendar_id: CalendarId, feed_type: FeedType) -> Self {
        Self {
            calendar_id,
            feed_type,
        }
    }

    /// Storage key with a backend namespace in front.
    pub fn with_prefix(&self, prefix: &str) -> String {
        format!("{}{}", prefix, self)
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", self.calendar_id, self.feed_type)
    }
}

/// How member calendars of a grouped feed are selected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceMode {
    ExplicitIds,
    Category,
}

impl SourceMode {
    /// Read the persisted source field. Unknown values yield `None`.
    pub fn from_value(value: &serde_json::Value) -> Option<Self> {
        match value.as_str()? {
            "ids" => Some(Self::ExplicitIds),
            "category" => Some(Self::Category),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SourceMode::ExplicitIds => "ids",
            SourceMode::Category => "category",
        }
    }
}

impl From<FeedSource> for SourceMode {
    fn from(source: FeedSource) -> Self {
        match source {
            FeedSource::Ids => SourceMode::ExplicitIds,
            FeedSource::Category => SourceMode::Category,
        }
    }
}

/// Exclusive bounds on event start times. A bound of 0 or less is open.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TimeWindow {
    pub min: i64,
    pub max: i64,
}

impl TimeWindow {
    pub fn new(min: i64, max: i64) -> Self {
        Self { min, max }
    }

    pub fn unbounded() -> Self {
        Self::default()
    }

    pub fn contains(&self, timestamp: i64) -> bool {
        (self.min <= 0 || timestamp > self.min) && (self.max <= 0 || timestamp < self.max)
    }

    pub fn is_bounded(&self) -> bool {
        self.min > 0 || self.max > 0
    }
}

/// Settings shared by every feed kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeedSettings {
    pub calendar_id: CalendarId,
    pub time_min: i64,
    pub time_max: i64,
    /// 0 disables expiry
    pub cache_ttl_seconds: u64,
}

impl FeedSettings {
    pub fn new(calendar_id: CalendarId) -> Self {
        Self {
            calendar_id,
            time_min: 0,
            time_max: 0,
            cache_ttl_seconds: simcal_core::config::DEFAULT_CACHE_TTL_SECONDS,
        }
    }

    pub fn from_config(feed: &FeedConfig, cache: &CacheConfig) -> Self {
        Self {
            calendar_id: CalendarId(feed.calendar_id),
            time_min: feed.time_min,
            time_max: feed.time_max,
            cache_ttl_seconds: feed.effective_ttl(cache),
        }
    }

    pub fn window(&self) -> TimeWindow {
        TimeWindow::new(self.time_min, self.time_max)
    }
}

/// A calendar resolved by id. `events` is `None` when it exposes no event map.
#[derive(Debug, Clone, Default)]
pub struct MemberCalendar {
    pub id: CalendarId,
    pub events: Option<EventCollection>,
}

impl MemberCalendar {
    pub fn new(id: CalendarId, events: EventCollection) -> Self {
        Self {
            id,
            events: Some(events),
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
    use super::*;

    fn ev(start: i64) -> Event {
        Event::new(CalendarId(1), "Event", start)
    }

    #[test]
    fn test_cache_key_format() {
        let key = CacheKey::new(CalendarId(42), FeedType::GroupedCalendars);
        assert_eq!(key.to_string(), "42_grouped-calendars");
        assert_eq!(
            key.with_prefix("_simple-calendar_feed_id_"),
            "_simple-calendar_feed_id_42_grouped-calendars"
        );
    }

    #[test]
    fn test_cache_keys_differ_by_feed_type() {
        let grouped = CacheKey::new(CalendarId(7), FeedType::GroupedCalendars);
        let google = CacheKey::new(CalendarId(7), FeedType::Google);
        assert_ne!(grouped.to_string(), google.to_string());
    }

    #[test]
    fn test_time_window_strict_bounds() {
        let window = TimeWindow::new(100, 200);
        assert!(!window.contains(100));
        assert!(window.contains(150));
        assert!(!window.contains(200));
    }

    #[test]
    fn test_time_window_open_bounds() {
        assert!(TimeWindow::unbounded().contains(-5));
        assert!(TimeWindow::new(0, 200).contains(1));
        assert!(TimeWindow::new(100, 0).contains(i64::MAX));
        assert!(!TimeWindow::unbounded().is_bounded());
    }

    #[test]
    fn test_merge_missing_keeps_existing() {
        let mut acc: EventCollection = [("a", ev(1)), ("b", ev(2))].into_iter().collect();
        let other: EventCollection = [("b", ev(99)), ("c", ev(3))].into_iter().collect();

        let added = acc.merge_missing(&other);

        assert_eq!(added, 1);
        assert_eq!(acc.get("b").unwrap().start, 2);
        assert_eq!(acc.get("c").unwrap().start, 3);
    }

    #[test]
    fn test_source_mode_from_value() {
        use serde_json::json;
        assert_eq!(SourceMode::from_value(&json!("ids")), Some(SourceMode::ExplicitIds));
        assert_eq!(SourceMode::from_value(&json!("category")), Some(SourceMode::Category));
        assert_eq!(SourceMode::from_value(&json!("google")), None);
        assert_eq!(SourceMode::from_value(&json!(1)), None);
    }

    #[test]
    fn test_collection_serializes_as_map() {
        let events: EventCollection = [("e1", ev(50))].into_iter().collect();
        let json = serde_json::to_value(&events).unwrap();
        assert_eq!(json["e1"]["start"], 50);

        let back: EventCollection = serde_json::from_value(json).unwrap();
        assert_eq!(back, events);
    }

    #[test]
    fn test_chronological_order() {
        let events: EventCollection = [("z", ev(10)), ("a", ev(30)), ("m", ev(20))]
            .into_iter()
            .collect();
        let starts: Vec<i64> = events.chronological().iter().map(|e| e.start).collect();
        assert_eq!(starts, vec![10, 20, 30]);
    }
}
