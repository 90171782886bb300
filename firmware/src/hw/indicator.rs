//! Blink and timeout bookkeeping for one indicator LED.

#![cfg_attr(not(target_os = "none"), allow(dead_code))]

use node_core::ports::{IndicatorRequest, LedPattern, LedPriority};

use crate::instant::FirmwareInstant;

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
struct Active {
    pattern: LedPattern,
    priority: LedPriority,
    lit: bool,
    next_toggle: Option<FirmwareInstant>,
    expires: Option<FirmwareInstant>,
}

/// What one LED is currently showing.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct LedTrack {
    active: Option<Active>,
}

impl LedTrack {
    pub const fn new() -> Self {
        Self { active: None }
    }

    /// Starts `request` unless a higher-priority pattern is running.
    /// Returns whether the request took effect.
    pub fn show(&mut self, request: IndicatorRequest, now: FirmwareInstant) -> bool {
        if let Some(active) = &self.active
            && active.priority > request.priority
        {
            return false;
        }

        self.active = Some(Active {
            pattern: request.pattern,
            priority: request.priority,
            lit: true,
            next_toggle: request.pattern.half_period().map(|half| now + half),
            expires: (!request.is_indefinite()).then(|| now + request.duration),
        });
        true
    }

    pub fn cancel(&mut self) {
        self.active = None;
    }

    /// Applies every toggle and expiry due at `now`; returns the LED level.
    pub fn advance(&mut self, now: FirmwareInstant) -> bool {
        let Some(active) = &mut self.active else {
            return false;
        };

        if active.expires.is_some_and(|expires| now >= expires) {
            self.active = None;
            return false;
        }

        if let (Some(half), Some(mut toggle)) = (active.pattern.half_period(), active.next_toggle) {
            while now >= toggle {
                active.lit = !active.lit;
                toggle = toggle + half;
            }
            active.next_toggle = Some(toggle);
        }
        active.lit
    }

    pub fn is_lit(&self) -> bool {
        self.active.is_some_and(|active| active.lit)
    }

    /// Earliest instant at which [`advance`](Self::advance) changes something.
    pub fn next_wake(&self) -> Option<FirmwareInstant> {
        let active = self.active.as_ref()?;
        match (active.next_toggle, active.expires) {
            (Some(toggle), Some(expires)) => Some(toggle.min(expires)),
            (toggle, expires) => toggle.or(expires),
        }
    }
}

#[cfg(test)]
mod tests {
    use core::time::Duration;

    use node_core::ports::Led;

    use super::*;

    fn at(millis: u64) -> FirmwareInstant {
        FirmwareInstant::from_micros(millis * 1_000)
    }

    #[test]
    fn solid_light_expires_after_duration() {
        let mut track = LedTrack::new();
        let request = IndicatorRequest::new(Led::Red, LedPattern::Solid, Duration::from_secs(30));

        assert!(track.show(request, at(0)));
        assert!(track.advance(at(29_999)));
        assert_eq!(track.next_wake(), Some(at(30_000)));
        assert!(!track.advance(at(30_000)));
        assert_eq!(track.next_wake(), None);
    }

    #[test]
    fn four_hertz_flash_toggles_every_125ms() {
        let mut track = LedTrack::new();
        let request = IndicatorRequest::new(Led::Orange, LedPattern::Flash4Hz, Duration::ZERO);
        track.show(request, at(0));

        assert!(track.advance(at(100)));
        assert!(!track.advance(at(125)));
        assert!(track.advance(at(250)));
        assert_eq!(track.next_wake(), Some(at(375)));
        assert!(track.advance(at(1_000)), "catches up over missed toggles");
        assert!(track.is_lit());
    }

    #[test]
    fn cancel_turns_the_led_off() {
        let mut track = LedTrack::new();
        track.show(
            IndicatorRequest::new(Led::Red, LedPattern::Flash4Hz, Duration::ZERO),
            at(0),
        );

        track.cancel();

        assert!(!track.advance(at(10)));
        assert_eq!(track.next_wake(), None);
    }

    #[test]
    fn background_request_does_not_replace_interrupt() {
        let mut track = LedTrack::new();
        track.show(
            IndicatorRequest::new(Led::Orange, LedPattern::Solid, Duration::from_secs(10)),
            at(0),
        );
        let mut background =
            IndicatorRequest::new(Led::Orange, LedPattern::FlashHalfHz, Duration::ZERO);
        background.priority = LedPriority::Background;

        assert!(!track.show(background, at(1)));
        assert_eq!(track.next_wake(), Some(at(10_000)));
    }
}
