//! Visibility-driven activity policy.
//!
//! The explicit study toggle and the page-visibility signal combine into the
//! single `is_active` bit that gets published. The policy is a pure function
//! of its inputs so it is testable without any transport.

/// State machine combining `study_toggle` and `page_visible`.
///
/// Setters return `Some(new_output)` only when the emitted value changes;
/// `None` means the publish would be a no-op and should be skipped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActivityPolicy {
    study_toggle: bool,
    page_visible: bool,
}

impl Default for ActivityPolicy {
    // A fresh participant starts not studying, with the page in foreground.
    fn default() -> Self {
        Self {
            study_toggle: false,
            page_visible: true,
        }
    }
}

impl ActivityPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    /// The published activity bit: studying AND foregrounded.
    pub fn is_active(&self) -> bool {
        self.study_toggle && self.page_visible
    }

    pub fn is_studying(&self) -> bool {
        self.study_toggle
    }

    pub fn is_visible(&self) -> bool {
        self.page_visible
    }

    /// Explicit user action: start or pause studying.
    pub fn set_studying(&mut self, studying: bool) -> Option<bool> {
        self.transition(|p| p.study_toggle = studying)
    }

    /// Implicit environment signal: page moved to fore-/background.
    pub fn set_visible(&mut self, visible: bool) -> Option<bool> {
        self.transition(|p| p.page_visible = visible)
    }

    fn transition(&mut self, apply: impl FnOnce(&mut Self)) -> Option<bool> {
        let before = self.is_active();
        apply(self);
        let after = self.is_active();
        (before != after).then_some(after)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn active_requires_both_inputs() {
        let mut policy = ActivityPolicy::new();
        assert!(!policy.is_active());

        assert_eq!(policy.set_studying(true), Some(true));
        assert!(policy.is_active());

        assert_eq!(policy.set_visible(false), Some(false));
        assert_eq!(policy.set_visible(true), Some(true));
    }

    #[test]
    fn hiding_while_not_studying_skips_the_publish() {
        let mut policy = ActivityPolicy::new();
        // Output is already false; no transition, no publish.
        assert_eq!(policy.set_visible(false), None);
        assert_eq!(policy.set_visible(true), None);
        assert_eq!(policy.set_studying(false), None);
    }

    #[test]
    fn rapid_tab_switching_emits_one_publish_per_transition() {
        let mut policy = ActivityPolicy::new();
        policy.set_studying(true);

        let mut publishes = 0;
        for visible in [false, true, false, true] {
            if policy.set_visible(visible).is_some() {
                publishes += 1;
            }
        }
        assert_eq!(publishes, 4);
    }

    #[test]
    fn visibility_restore_resumes_studying_iff_toggled() {
        let mut policy = ActivityPolicy::new();
        policy.set_studying(true);
        policy.set_visible(false);
        // Pausing while hidden: output stays false, nothing to publish.
        assert_eq!(policy.set_studying(false), None);
        // Coming back no longer reactivates.
        assert_eq!(policy.set_visible(true), None);
        assert!(!policy.is_active());
    }
}
