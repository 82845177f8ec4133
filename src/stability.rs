// =============================================================================
// Stability Manager — No-flip-flop guarantee for published decisions
// =============================================================================
//
// A decision slot is in one of two states:
//
//   UNLOCKED — free to adopt whatever the resolver produced this cycle.
//   LOCKED   — verdict fixed until `locked_until` elapses, unless the
//              consecutive-confirmation override fires first.
//
// Adoption locks the slot for a hold period tiered by confidence (higher
// conviction holds longer).  While locked, a contradicting verdict must
// repeat for `confirmation_threshold` consecutive cycles before it wins; a
// single agreeing cycle breaks the streak.  This keeps one noisy evaluation
// from flipping a published recommendation while still letting sustained
// evidence through.
//
// Hold periods are measured in trading days — weekends do not count toward
// a recommendation's hold.
// =============================================================================

use chrono::{DateTime, Datelike, Duration, Utc, Weekday};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::StabilityParams;
use crate::decision::Decision;
use crate::resolver::Resolution;
use crate::types::DecisionKey;

/// Advance `start` by `days` trading days, skipping Saturdays and Sundays.
pub fn add_trading_days(start: DateTime<Utc>, days: u32) -> DateTime<Utc> {
    let mut current = start;
    let mut remaining = days;
    while remaining > 0 {
        current = current + Duration::days(1);
        match current.weekday() {
            Weekday::Sat | Weekday::Sun => {}
            _ => remaining -= 1,
        }
    }
    current
}

/// What the stability manager did with this cycle's resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StabilityAction {
    /// The slot was unlocked (or empty) and the new verdict was adopted.
    Adopted,
    /// Locked and the verdict agreed — only `updated_at` moved.
    Refreshed,
    /// Locked and contradicted, but the confirmation streak is still short.
    PendingChange,
    /// The contradiction reached the confirmation threshold and replaced
    /// the locked verdict.
    Overridden,
}

impl std::fmt::Display for StabilityAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Adopted => write!(f, "adopted"),
            Self::Refreshed => write!(f, "refreshed"),
            Self::PendingChange => write!(f, "pending_change"),
            Self::Overridden => write!(f, "overridden"),
        }
    }
}

pub struct StabilityManager {
    params: StabilityParams,
}

impl StabilityManager {
    pub fn new(params: StabilityParams) -> Self {
        Self { params }
    }

    /// Hold period in trading days for a resolved confidence.
    fn hold_days(&self, confidence: f64) -> u32 {
        if confidence >= self.params.strong_hold_confidence {
            self.params.strong_hold_days
        } else if confidence >= self.params.moderate_hold_confidence {
            self.params.moderate_hold_days
        } else {
            self.params.weak_hold_days
        }
    }

    /// Apply this cycle's resolution to the slot's prior decision.
    ///
    /// Returns the decision to persist and what happened.  Adoption and
    /// override mint a new decision generation (fresh id) so the store
    /// archives the predecessor; refresh and pending updates mutate the
    /// existing generation in place.
    pub fn apply(
        &self,
        prior: Option<Decision>,
        key: &DecisionKey,
        resolution: &Resolution,
        now: DateTime<Utc>,
    ) -> (Decision, StabilityAction) {
        let prior = match prior {
            Some(p) => p,
            None => {
                let decision = self.adopt(key, resolution, now);
                info!(
                    key = %key,
                    verdict = %decision.verdict,
                    locked_until = ?decision.locked_until,
                    "first decision adopted"
                );
                return (decision, StabilityAction::Adopted);
            }
        };

        // Lock elapsed: the slot is UNLOCKED before this cycle's verdict is
        // applied, so adoption (and lock renewal) happens even when the
        // verdict is unchanged.
        if !prior.is_locked(now) {
            let decision = self.adopt(key, resolution, now);
            info!(
                key = %key,
                old_verdict = %prior.verdict,
                new_verdict = %decision.verdict,
                "lock elapsed, verdict adopted"
            );
            return (decision, StabilityAction::Adopted);
        }

        // LOCKED + agreement: refresh, and break any contradiction streak.
        if resolution.verdict == prior.verdict {
            let mut decision = prior;
            decision.updated_at = now;
            decision.pending_verdict = None;
            decision.pending_count = 0;
            debug!(key = %key, verdict = %decision.verdict, "locked verdict reconfirmed");
            return (decision, StabilityAction::Refreshed);
        }

        // LOCKED + contradiction: count consecutive sightings of the same
        // challenger verdict.
        let mut decision = prior;
        if decision.pending_verdict == Some(resolution.verdict) {
            decision.pending_count += 1;
        } else {
            decision.pending_verdict = Some(resolution.verdict);
            decision.pending_count = 1;
        }
        decision.updated_at = now;

        if decision.pending_count >= self.params.confirmation_threshold {
            let adopted = self.adopt(key, resolution, now);
            info!(
                key = %key,
                old_verdict = %decision.verdict,
                new_verdict = %adopted.verdict,
                confirmations = decision.pending_count,
                "confirmation threshold reached, locked verdict overridden"
            );
            return (adopted, StabilityAction::Overridden);
        }

        debug!(
            key = %key,
            verdict = %decision.verdict,
            challenger = %resolution.verdict,
            pending_count = decision.pending_count,
            threshold = self.params.confirmation_threshold,
            "contradiction noted, verdict held"
        );
        (decision, StabilityAction::PendingChange)
    }

    /// Build a fresh decision generation from a resolution.
    fn adopt(&self, key: &DecisionKey, resolution: &Resolution, now: DateTime<Utc>) -> Decision {
        let hold = self.hold_days(resolution.confidence);
        Decision {
            id: uuid::Uuid::new_v4().to_string(),
            instrument_id: key.instrument_id.clone(),
            horizon: key.horizon,
            verdict: resolution.verdict,
            confidence: resolution.confidence,
            reasons: resolution.reasons.clone(),
            conflicts: resolution.conflicts.clone(),
            contested: resolution.contested,
            locked_until: Some(add_trading_days(now, hold)),
            pending_verdict: None,
            pending_count: 0,
            created_at: now,
            updated_at: now,
            history: Vec::new(),
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Horizon, Verdict};
    use chrono::TimeZone;

    fn manager() -> StabilityManager {
        StabilityManager::new(StabilityParams::default())
    }

    fn key() -> DecisionKey {
        DecisionKey::new("RELIANCE", Horizon::D5)
    }

    fn resolution(verdict: Verdict, confidence: f64) -> Resolution {
        Resolution {
            direction: crate::types::Direction::Up,
            verdict,
            confidence,
            contested: false,
            reasons: vec!["technical: UP @ 0.90 (weight 0.50)".to_string()],
            conflicts: Vec::new(),
        }
    }

    /// Monday 2025-06-02 09:30 UTC.
    fn monday() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 2, 9, 30, 0).unwrap()
    }

    #[test]
    fn trading_days_skip_weekends() {
        // Friday + 1 trading day lands on Monday.
        let friday = Utc.with_ymd_and_hms(2025, 6, 6, 12, 0, 0).unwrap();
        let next = add_trading_days(friday, 1);
        assert_eq!(next.weekday(), Weekday::Mon);
        assert_eq!(next.day(), 9);

        // Monday + 5 trading days lands on the following Monday.
        let week_later = add_trading_days(monday(), 5);
        assert_eq!(week_later.weekday(), Weekday::Mon);
        assert_eq!(week_later.day(), 9);
    }

    #[test]
    fn first_verdict_is_adopted_and_locked() {
        let now = monday();
        let (decision, action) =
            manager().apply(None, &key(), &resolution(Verdict::StrongBuy, 0.9), now);

        assert_eq!(action, StabilityAction::Adopted);
        assert_eq!(decision.verdict, Verdict::StrongBuy);
        assert!(decision.is_locked(now));
        // Strong tier: 30 trading days.
        assert_eq!(decision.locked_until, Some(add_trading_days(now, 30)));
    }

    #[test]
    fn hold_tiers_follow_confidence() {
        let m = manager();
        let now = monday();

        let (strong, _) = m.apply(None, &key(), &resolution(Verdict::StrongBuy, 0.9), now);
        let (moderate, _) = m.apply(None, &key(), &resolution(Verdict::Buy, 0.75), now);
        let (weak, _) = m.apply(None, &key(), &resolution(Verdict::Hold, 0.4), now);

        assert_eq!(strong.locked_until, Some(add_trading_days(now, 30)));
        assert_eq!(moderate.locked_until, Some(add_trading_days(now, 5)));
        assert_eq!(weak.locked_until, Some(add_trading_days(now, 1)));
    }

    #[test]
    fn hold_period_is_monotonic_in_confidence() {
        let m = manager();
        let now = monday();

        let confidences = [0.1, 0.4, 0.69, 0.70, 0.84, 0.85, 0.99];
        let mut last = None;
        for &c in &confidences {
            let (d, _) = m.apply(None, &key(), &resolution(Verdict::Buy, c), now);
            let until = d.locked_until.unwrap();
            if let Some(prev) = last {
                assert!(until >= prev, "hold shrank as confidence rose at {}", c);
            }
            last = Some(until);
        }
    }

    #[test]
    fn locked_agreement_refreshes_in_place() {
        let m = manager();
        let now = monday();
        let (decision, _) = m.apply(None, &key(), &resolution(Verdict::Buy, 0.75), now);
        let id = decision.id.clone();

        let later = now + Duration::hours(1);
        let (refreshed, action) =
            m.apply(Some(decision), &key(), &resolution(Verdict::Buy, 0.8), later);

        assert_eq!(action, StabilityAction::Refreshed);
        assert_eq!(refreshed.id, id, "refresh must not mint a new generation");
        assert_eq!(refreshed.updated_at, later);
        assert_eq!(refreshed.pending_count, 0);
    }

    #[test]
    fn contradiction_below_threshold_never_changes_verdict() {
        let m = manager();
        let now = monday();
        let (mut decision, _) = m.apply(None, &key(), &resolution(Verdict::StrongBuy, 0.9), now);

        for cycle in 1..3u32 {
            let at = now + Duration::hours(cycle as i64);
            let (next, action) =
                m.apply(Some(decision), &key(), &resolution(Verdict::Avoid, 0.9), at);
            assert_eq!(action, StabilityAction::PendingChange);
            assert_eq!(next.verdict, Verdict::StrongBuy, "verdict flipped early");
            assert_eq!(next.pending_count, cycle);
            decision = next;
        }
    }

    #[test]
    fn contradiction_at_threshold_overrides_exactly_once() {
        let m = manager();
        let now = monday();
        let (mut decision, _) = m.apply(None, &key(), &resolution(Verdict::StrongBuy, 0.9), now);
        let original_id = decision.id.clone();

        let mut overrides = 0;
        for cycle in 1..=3u32 {
            let at = now + Duration::hours(cycle as i64);
            let (next, action) =
                m.apply(Some(decision), &key(), &resolution(Verdict::Avoid, 0.9), at);
            if action == StabilityAction::Overridden {
                overrides += 1;
                assert_eq!(next.verdict, Verdict::Avoid);
                assert_ne!(next.id, original_id);
                assert_eq!(next.pending_count, 0);
                assert!(next.is_locked(at));
            }
            decision = next;
        }
        assert_eq!(overrides, 1, "threshold must fire exactly once");
    }

    #[test]
    fn different_challenger_restarts_the_streak() {
        let m = manager();
        let now = monday();
        let (decision, _) = m.apply(None, &key(), &resolution(Verdict::StrongBuy, 0.9), now);

        let (d1, _) = m.apply(
            Some(decision),
            &key(),
            &resolution(Verdict::Avoid, 0.9),
            now + Duration::hours(1),
        );
        assert_eq!(d1.pending_count, 1);

        let (d2, _) = m.apply(
            Some(d1),
            &key(),
            &resolution(Verdict::Hold, 0.3),
            now + Duration::hours(2),
        );
        assert_eq!(d2.pending_verdict, Some(Verdict::Hold));
        assert_eq!(d2.pending_count, 1, "new challenger must restart at 1");
    }

    #[test]
    fn agreement_breaks_the_contradiction_streak() {
        let m = manager();
        let now = monday();
        let (decision, _) = m.apply(None, &key(), &resolution(Verdict::StrongBuy, 0.9), now);

        let (d1, _) = m.apply(
            Some(decision),
            &key(),
            &resolution(Verdict::Avoid, 0.9),
            now + Duration::hours(1),
        );
        let (d2, _) = m.apply(
            Some(d1),
            &key(),
            &resolution(Verdict::Avoid, 0.9),
            now + Duration::hours(2),
        );
        assert_eq!(d2.pending_count, 2);

        // An agreeing cycle interrupts the streak entirely.
        let (d3, action) = m.apply(
            Some(d2),
            &key(),
            &resolution(Verdict::StrongBuy, 0.9),
            now + Duration::hours(3),
        );
        assert_eq!(action, StabilityAction::Refreshed);
        assert_eq!(d3.pending_count, 0);
        assert_eq!(d3.pending_verdict, None);

        // The next contradiction starts over, so no override yet.
        let (d4, action) = m.apply(
            Some(d3),
            &key(),
            &resolution(Verdict::Avoid, 0.9),
            now + Duration::hours(4),
        );
        assert_eq!(action, StabilityAction::PendingChange);
        assert_eq!(d4.pending_count, 1);
        assert_eq!(d4.verdict, Verdict::StrongBuy);
    }

    #[test]
    fn elapsed_lock_adopts_new_verdict_without_confirmation() {
        let m = manager();
        let now = monday();
        let (decision, _) = m.apply(None, &key(), &resolution(Verdict::Hold, 0.4), now);

        // Weak tier holds 1 trading day; two days later the lock is gone.
        let later = now + Duration::days(2);
        let (next, action) = m.apply(
            Some(decision),
            &key(),
            &resolution(Verdict::Buy, 0.75),
            later,
        );
        assert_eq!(action, StabilityAction::Adopted);
        assert_eq!(next.verdict, Verdict::Buy);
        assert!(next.is_locked(later));
    }

    #[test]
    fn no_data_hold_gets_weak_lock_on_fresh_key() {
        let m = manager();
        let now = monday();
        let (decision, action) = m.apply(None, &key(), &Resolution::no_data(), now);

        assert_eq!(action, StabilityAction::Adopted);
        assert_eq!(decision.verdict, Verdict::Hold);
        assert!((decision.confidence - 0.0).abs() < f64::EPSILON);
        assert_eq!(decision.locked_until, Some(add_trading_days(now, 1)));
    }
}
