// =============================================================================
// Explainer — Renders a Decision into a human-readable summary
// =============================================================================
//
// A pure mapping from the decision record to a short natural-language
// string for the dashboard: no side effects, no clock reads, no external
// calls.  Everything it says is already on the Decision.
// =============================================================================

use serde::{Deserialize, Serialize};

use crate::decision::Decision;
use crate::resolver::NO_DATA_REASON;
use crate::types::{Horizon, Verdict};

/// Display-ready summary of one decision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HumanSummary {
    pub instrument_id: String,
    pub horizon: Horizon,
    pub verdict: Verdict,
    pub text: String,
}

/// Render `decision` into a short explanation of what was recommended and
/// why, including the strongest dissent when there was any.
pub fn explain(decision: &Decision) -> HumanSummary {
    let text = render(decision);
    HumanSummary {
        instrument_id: decision.instrument_id.clone(),
        horizon: decision.horizon,
        verdict: decision.verdict,
        text,
    }
}

fn render(decision: &Decision) -> String {
    let subject = format!("{} ({})", decision.instrument_id, decision.horizon);
    let confidence_pct = (decision.confidence * 100.0).round() as u32;

    if decision.reasons.iter().any(|r| r == NO_DATA_REASON) {
        return format!(
            "No usable predictor data for {}; holding at {} until sources recover.",
            subject, decision.verdict
        );
    }

    let lead = decision
        .reasons
        .first()
        .cloned()
        .unwrap_or_else(|| "no supporting signals recorded".to_string());

    let mut text = if decision.contested {
        format!(
            "Sources disagree on {}: {} leads the vote, but {} signal{} point the other way; \
             recommendation capped at {} pending clearer consensus.",
            subject,
            lead,
            decision.conflicts.len(),
            plural(decision.conflicts.len()),
            decision.verdict
        )
    } else if decision.conflicts.is_empty() {
        format!(
            "All sources agree on {}: {}. Recommendation {} at {}% confidence.",
            subject, lead, decision.verdict, confidence_pct
        )
    } else {
        let strongest = &decision.conflicts[0];
        format!(
            "Despite {} dissenting signal{} (led by {} at {} @ {:.2}), {} carries the vote on {}; \
             recommendation {} at {}% confidence.",
            decision.conflicts.len(),
            plural(decision.conflicts.len()),
            strongest.source_id,
            strongest.direction,
            strongest.confidence,
            lead,
            subject,
            decision.verdict,
            confidence_pct
        )
    };

    if let (Some(pending), count) = (decision.pending_verdict, decision.pending_count) {
        if count > 0 {
            text.push_str(&format!(
                " A change to {} has now been signalled for {} consecutive cycle{}.",
                pending,
                count,
                plural(count as usize)
            ));
        }
    }

    text
}

fn plural(n: usize) -> &'static str {
    if n == 1 {
        ""
    } else {
        "s"
    }
}

// =============================================================================
// Tests
// =============================================================================
