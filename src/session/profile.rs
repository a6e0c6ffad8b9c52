//! Best-effort classification of user text into session-preference hints.
//!
//! This is a lossy heuristic scan: it produces *suggestions* the UI layer
//! may surface (e.g. "switch to trusting mode?"), never decisions. The
//! orchestrator has no correctness dependency on its output.

use std::sync::OnceLock;

use regex::Regex;

use crate::approval::ApprovalMode;

/// Partial update extracted from one user message.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProfileUpdate {
    /// Approval mode the user's phrasing hints at, if any.
    pub suggested_mode: Option<ApprovalMode>,
}

fn trusting_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(?i)\b(stop asking|don'?t ask( me)?( again| every time)?|quit asking|just do it|trust me)\b")
            .expect("trusting pattern is valid")
    })
}

fn paranoid_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(?i)\b(always ask|ask (me )?(before|first)|check with me|double.?check everything)\b")
            .expect("paranoid pattern is valid")
    })
}

/// Scan one user message for session-preference signals.
pub fn classify(text: &str) -> ProfileUpdate {
    // Paranoid wins on conflicting signals: the cautious reading of an
    // ambiguous message is the safe default.
    if paranoid_pattern().is_match(text) {
        return ProfileUpdate {
            suggested_mode: Some(ApprovalMode::Paranoid),
        };
    }
    if trusting_pattern().is_match(text) {
        return ProfileUpdate {
            suggested_mode: Some(ApprovalMode::Trusting),
        };
    }
    ProfileUpdate::default()
}
