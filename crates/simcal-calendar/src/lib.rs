//! Grouped calendar feeds for simcal.
//!
//! Merges the events of several member calendars into one cached,
//! time-windowed collection.

pub mod admin;
pub mod cache;
pub mod error;
pub mod grouped;
pub mod store;
pub mod types;

pub use admin::{attach_admin, AdminHook, RequestContext};
pub use cache::{FeedCache, MemoryFeedCache, SqliteFeedCache};
pub use error::CalendarError;
pub use grouped::{
    Aggregation, EventsOrigin, FeedServices, GroupedCalendars, SkipReason, SkippedMember,
};
pub use store::{CalendarResolver, CalendarStore, MemoryCalendarResolver, MemoryCalendarStore};
pub use types::{
    CacheKey, CalendarId, Event, EventCollection, FeedSettings, FeedType, MemberCalendar,
    SourceMode, TimeWindow,
};
