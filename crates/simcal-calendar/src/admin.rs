//! Admin screen setup, kept out of feed construction.

use crate::grouped::GroupedCalendars;

/// The kind of request a feed is being built for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RequestContext {
    pub is_admin: bool,
    pub doing_ajax: bool,
}

impl RequestContext {
    pub fn admin() -> Self {
        Self {
            is_admin: true,
            doing_ajax: false,
        }
    }

    pub fn ajax() -> Self {
        Self {
            is_admin: true,
            doing_ajax: true,
        }
    }

    pub fn frontend() -> Self {
        Self::default()
    }

    /// Admin screens are only set up for full, non-AJAX admin requests.
    pub fn wants_admin_ui(&self) -> bool {
        self.is_admin && !self.doing_ajax
    }
}

/// Admin-side extension that registers settings screens for a feed.
pub trait AdminHook: Send + Sync {
    /// Unique identifier for this hook
    fn id(&self) -> &str;

    /// Register admin UI for the feed. Nothing is returned to the caller.
    fn attach(&self, feed: &GroupedCalendars);
}

/// Attach `hook` to `feed` when the request is a full admin request.
///
/// Returns whether the hook ran.
pub fn attach_admin(feed: &GroupedCalendars, hook: &dyn AdminHook, ctx: RequestContext) -> bool {
    if !ctx.wants_admin_ui() {
        return false;
    }

    tracing::debug!("Attaching admin hook {} to feed {}", hook.id(), feed.calendar_id());
    hook.attach(feed);
    true
}
