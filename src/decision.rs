//! Rule-based decisions over extracted fields.

use tracing::{debug, warn};

use crate::schema::{Decision, DecisionLabel, DocumentType, FieldSet};

/// Invoices strictly below this total are approved.
const AUTO_APPROVE_BELOW: f64 = 1000.0;
/// Invoices strictly above this total are rejected.
const AUTO_REJECT_ABOVE: f64 = 50000.0;

/// Skills that shortlist a resume (compared case-insensitively).
const SHORTLIST_SKILLS: &[&str] = &["ai", "machine learning"];

const CURRENCY_CODES: &[&str] = &["rs.", "rs", "inr", "usd", "eur"];

pub fn decide(doc_type: DocumentType, fields: &FieldSet) -> Decision {
    let decision = match doc_type {
        DocumentType::Invoice => decide_invoice(fields),
        DocumentType::Resume => decide_resume(fields),
        DocumentType::Report => Decision::new(DecisionLabel::Analyzed, 0.88),
        DocumentType::Unknown => Decision::fallback(),
    };

    debug!(
        "Decision for {}: {} ({:.2})",
        doc_type, decision.label, decision.confidence
    );
    decision
}

fn decide_invoice(fields: &FieldSet) -> Decision {
    let Some(raw) = fields.get("total_amount").and_then(|v| v.as_text()) else {
        return Decision::fallback();
    };

    let Some(amount) = parse_amount(raw) else {
        warn!("Invalid amount: {:?}", raw);
        return Decision::fallback();
    };

    if amount < AUTO_APPROVE_BELOW {
        Decision::new(DecisionLabel::Approved, 0.95)
    } else if amount > AUTO_REJECT_ABOVE {
        Decision::new(DecisionLabel::Rejected, 0.90)
    } else {
        Decision::new(DecisionLabel::NeedsReview, 0.85)
    }
}

fn decide_resume(fields: &FieldSet) -> Decision {
    let shortlisted = fields
        .get("skills")
        .map(|skills| {
            skills
                .items()
                .iter()
                .any(|s| SHORTLIST_SKILLS.contains(&s.trim().to_lowercase().as_str()))
        })
        .unwrap_or(false);

    if shortlisted {
        Decision::new(DecisionLabel::Shortlisted, 0.92)
    } else {
        Decision::new(DecisionLabel::NeedsReview, 0.70)
    }
}

/// Parse a monetary amount, ignoring thousands separators and currency marks.
/// Returns `None` for anything that is not a finite, non-negative number.
fn parse_amount(raw: &str) -> Option<f64> {
    let mut cleaned: String = raw
        .chars()
        .filter(|c| !matches!(c, ',' | '₹' | '$' | '€' | '£') && !c.is_whitespace())
        .collect::<String>()
        .to_lowercase();

    if let Some(code) = CURRENCY_CODES.iter().find(|code| cleaned.starts_with(*code)) {
        cleaned.replace_range(..code.len(), "");
    }

    let amount: f64 = cleaned.parse().ok()?;
    (amount.is_finite() && amount >= 0.0).then_some(amount)
}
