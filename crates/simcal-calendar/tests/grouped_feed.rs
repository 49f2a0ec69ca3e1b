//! Integration tests for grouped feeds built from configuration.
//!
//! These tests wire the in-memory store and resolver to an on-disk SQLite
//! cache, the way a host would.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use simcal_calendar::cache::from_config;
use simcal_calendar::store::FEED_CATEGORY_TAXONOMY;
use simcal_calendar::{
    CalendarId, Event, EventCollection, EventsOrigin, FeedServices, FeedSettings,
    GroupedCalendars, MemberCalendar, MemoryCalendarResolver, MemoryCalendarStore,
};
use simcal_core::{CacheBackend, Config, FeedConfig, FeedSource};

/// Helper to create a member calendar from (key, start) pairs
fn member(id: u64, events: &[(&str, i64)]) -> MemberCalendar {
    let collection: EventCollection = events
        .iter()
        .map(|(key, start)| (*key, Event::new(CalendarId(id), *key, *start)))
        .collect();
    MemberCalendar::new(CalendarId(id), collection)
}

fn config_with(feed: FeedConfig, db: &std::path::Path) -> Config {
    let mut config = Config::default();
    config.cache.backend = CacheBackend::Sqlite;
    config.cache.sqlite_path = Some(db.to_path_buf());
    config.feeds.push(feed);
    config
}

#[test]
fn test_explicit_feed_merges_filters_and_caches() {
    let dir = tempfile::tempdir().unwrap();
    let config = config_with(
        FeedConfig {
            calendar_id: 10,
            source: FeedSource::Ids,
            ids: vec![1, 2],
            categories: vec![],
            time_min: 100,
            time_max: 200,
            cache_ttl_seconds: Some(600),
        },
        &dir.path().join("cache.db"),
    );
    assert!(config.validate().is_valid());

    let store = MemoryCalendarStore::from_config(&config);
    let resolver = MemoryCalendarResolver::new();
    resolver.insert(member(1, &[("e1", 50), ("e2", 150)]));
    resolver.insert(member(2, &[("e2", 999), ("e3", 180)]));
    let cache = from_config(&config).unwrap();

    let services = FeedServices {
        store: &store,
        resolver: &resolver,
        cache: cache.as_ref(),
    };
    let settings = FeedSettings::from_config(config.feed(10).unwrap(), &config.cache);
    let feed = GroupedCalendars::new(settings, services);

    let events = feed.events();
    assert_eq!(events.keys().collect::<Vec<_>>(), vec!["e2", "e3"]);
    assert_eq!(events.get("e2").unwrap().start, 150);
    assert_eq!(events.get("e3").unwrap().start, 180);

    // A second build is served from the cache.
    let lookups = resolver.lookups();
    let again = GroupedCalendars::new(settings, services);
    assert_eq!(again.events(), events);
    assert_eq!(resolver.lookups(), lookups);
    assert_eq!(again.aggregate(services).origin, EventsOrigin::Cache);
}

#[test]
fn test_category_feed_resolves_tagged_calendars() {
    let dir = tempfile::tempdir().unwrap();
    let config = config_with(
        FeedConfig {
            calendar_id: 20,
            source: FeedSource::Category,
            ids: vec![],
            categories: vec![7],
            time_min: 0,
            time_max: 0,
            cache_ttl_seconds: None,
        },
        &dir.path().join("cache.db"),
    );

    let store = MemoryCalendarStore::from_config(&config);
    store.tag(CalendarId(3), FEED_CATEGORY_TAXONOMY, 7);
    store.tag(CalendarId(4), FEED_CATEGORY_TAXONOMY, 8);

    let resolver = MemoryCalendarResolver::new();
    resolver.insert(member(3, &[("a", 10)]));
    resolver.insert(member(4, &[("b", 20)]));
    let cache = from_config(&config).unwrap();

    let services = FeedServices {
        store: &store,
        resolver: &resolver,
        cache: cache.as_ref(),
    };
    let settings = FeedSettings::from_config(config.feed(20).unwrap(), &config.cache);
    let feed = GroupedCalendars::new(settings, services);

    assert_eq!(feed.member_ids(), &[CalendarId(3)]);
    assert_eq!(feed.events().keys().collect::<Vec<_>>(), vec!["a"]);
}

#[test]
fn test_cache_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let config = config_with(
        FeedConfig {
            calendar_id: 30,
            source: FeedSource::Ids,
            ids: vec![5],
            categories: vec![],
            time_min: 0,
            time_max: 0,
            cache_ttl_seconds: Some(0),
        },
        &dir.path().join("cache.db"),
    );

    let store = MemoryCalendarStore::from_config(&config);
    let resolver = MemoryCalendarResolver::new();
    resolver.insert(member(5, &[("x", 1)]));
    let settings = FeedSettings::from_config(config.feed(30).unwrap(), &config.cache);

    {
        let cache = from_config(&config).unwrap();
        let services = FeedServices {
            store: &store,
            resolver: &resolver,
            cache: cache.as_ref(),
        };
        assert_eq!(GroupedCalendars::new(settings, services).events().len(), 1);
    }

    // Member calendars are gone, but the cached feed remains.
    let empty_resolver = MemoryCalendarResolver::new();
    let cache = from_config(&config).unwrap();
    let services = FeedServices {
        store: &store,
        resolver: &empty_resolver,
        cache: cache.as_ref(),
    };
    let feed = GroupedCalendars::new(settings, services);
    assert_eq!(feed.events().len(), 1);
    assert_eq!(empty_resolver.lookups(), 0);
}
