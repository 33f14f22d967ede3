//! Pure severity classification for detection events.
//!
//! Classification is a total, deterministic function of the event kind and
//! the decoy's category: no state, no side effects, no error cases. This
//! keeps every detection reproducible in tests and audits.

use crate::models::{EventKind, Severity, TokenCategory};

/// Baseline severity for a move before escalation.
const MOVE_BASELINE: Severity = Severity::Medium;

/// Map an event kind and decoy category to an alert severity.
///
/// Policy:
/// - open/read and content modification are `HIGH` (active access to fake
///   credentials)
/// - moves are escalated one level above the `MEDIUM` baseline: relocating a
///   decoy indicates deliberate tampering, not passive access
/// - deletion is `MEDIUM`
/// - metadata-only changes (permissions, timestamps) are `LOW`
///
/// The category parameter is part of the contract so policies can be refined
/// per credential type; the current table is category-independent.
#[must_use]
pub fn classify(kind: &EventKind, _category: TokenCategory) -> Severity {
    match *kind {
        EventKind::Opened | EventKind::Modified => Severity::High,
        EventKind::Moved(_) => MOVE_BASELINE.escalate(),
        EventKind::Deleted => Severity::Medium,
        EventKind::Metadata => Severity::Low,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn policy_table() {
        let cat = TokenCategory::Aws;
        assert_eq!(classify(&EventKind::Opened, cat), Severity::High);
        assert_eq!(classify(&EventKind::Modified, cat), Severity::High);
        assert_eq!(classify(&EventKind::Deleted, cat), Severity::Medium);
        assert_eq!(classify(&EventKind::Metadata, cat), Severity::Low);
    }

    #[test]
    fn moves_escalate_above_baseline() {
        let kind = EventKind::Moved(Some(PathBuf::from("/tmp/exfil")));
        assert_eq!(classify(&kind, TokenCategory::Ssh), Severity::High);
        assert!(classify(&kind, TokenCategory::Ssh) > Severity::Medium);
    }

    #[test]
    fn classification_is_deterministic() {
        for kind in [
            EventKind::Opened,
            EventKind::Modified,
            EventKind::Moved(None),
            EventKind::Deleted,
            EventKind::Metadata,
        ] {
            for cat in [
                TokenCategory::Aws,
                TokenCategory::Ssh,
                TokenCategory::Database,
                TokenCategory::Api,
            ] {
                assert_eq!(classify(&kind, cat), classify(&kind, cat));
            }
        }
    }
}
