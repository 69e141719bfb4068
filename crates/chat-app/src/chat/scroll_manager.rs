use super::events::SessionChange;

/// Distance from the bottom edge, in content pixels, that still counts as "at the bottom".
pub const FOLLOW_TOLERANCE: f32 = 5.0;

/// Viewport geometry reported by the display, measured from the top of the content.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ScrollMetrics {
    pub scroll_top: f32,
    pub content_height: f32,
    pub viewport_height: f32,
}

impl ScrollMetrics {
    pub fn new(scroll_top: f32, content_height: f32, viewport_height: f32) -> Self {
        Self {
            scroll_top,
            content_height,
            viewport_height,
        }
    }

    /// Largest reachable `scroll_top`.
    pub fn bottom_offset(&self) -> f32 {
        (self.content_height - self.viewport_height).max(0.0)
    }

    pub fn distance_from_bottom(&self) -> f32 {
        (self.bottom_offset() - self.scroll_top).abs()
    }

    pub fn is_near_bottom(&self) -> bool {
        self.distance_from_bottom() <= FOLLOW_TOLERANCE
    }
}

/// Who moved the viewport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScrollOrigin {
    User,
    /// A scroll the display performed because of [`ScrollManager::take_scroll_request`].
    Programmatic,
}

/// Tracks follow mode independent from message content.
#[derive(Debug, Clone)]
pub struct ScrollManager {
    pending_scroll_to_bottom: bool,
    follow_bottom: bool,
    last_metrics: ScrollMetrics,
}

impl ScrollManager {
    pub fn new() -> Self {
        Self {
            pending_scroll_to_bottom: false,
            follow_bottom: true,
            last_metrics: ScrollMetrics::default(),
        }
    }

    pub fn is_following_bottom(&self) -> bool {
        self.follow_bottom
    }

    pub fn request_scroll_to_bottom(&mut self) {
        self.pending_scroll_to_bottom = true;
        self.follow_bottom = true;
    }

    /// Returns whether a scroll was requested.
    pub fn request_scroll_to_bottom_if_following(&mut self) -> bool {
        if self.follow_bottom {
            self.pending_scroll_to_bottom = true;
        }
        self.follow_bottom
    }

    pub fn reset(&mut self) {
        self.last_metrics = ScrollMetrics::default();
        self.follow_bottom = true;
        self.pending_scroll_to_bottom = true;
    }

    /// Decides whether `change` forces the display to the newest content.
    pub fn observe_change(&mut self, change: &SessionChange) -> bool {
        match change {
            // A new user turn always re-enables follow mode.
            SessionChange::UserAppended { .. } => {
                self.request_scroll_to_bottom();
                true
            }
            SessionChange::Reset => {
                self.reset();
                true
            }
            SessionChange::ModelUpdated { .. }
            | SessionChange::Completed
            | SessionChange::Failed { .. }
            | SessionChange::Stopped => self.request_scroll_to_bottom_if_following(),
        }
    }

    /// Feeds one scroll observation from the display.
    pub fn observe_scroll(&mut self, metrics: ScrollMetrics, origin: ScrollOrigin) {
        if origin == ScrollOrigin::Programmatic {
            // Forced scrolls must never toggle follow mode themselves.
            self.last_metrics = metrics;
            return;
        }

        let scrolled_up = metrics.scroll_top < self.last_metrics.scroll_top;
        let near_bottom = metrics.is_near_bottom();

        if scrolled_up && !near_bottom {
            if self.follow_bottom {
                tracing::trace!(
                    distance = metrics.distance_from_bottom(),
                    "user scrolled away from the tail; pausing follow mode"
                );
            }
            self.follow_bottom = false;
        } else if near_bottom && !self.follow_bottom {
            self.follow_bottom = true;
        }

        self.last_metrics = metrics;
    }

    /// Returns the offset to scroll to when a scroll is pending, clearing the request.
    ///
    /// `current` is the geometry as laid out now; content growth emits no scroll, so the
    /// last observation may be stale. The display should report the resulting scroll with
    /// [`ScrollOrigin::Programmatic`].
    pub fn take_scroll_request(&mut self, current: ScrollMetrics) -> Option<f32> {
        // Geometry only; follow mode is decided by scroll observations.
        self.last_metrics = current;
        if !self.pending_scroll_to_bottom {
            return None;
        }

        self.pending_scroll_to_bottom = false;
        Some(current.bottom_offset())
    }
}

impl Default for ScrollManager {
    fn default() -> Self {
        Self::new()
    }
}
