//! Import decision for discovered candidates
//!
//! Pure functions only: everything needed to decide arrives as arguments.

use std::{collections::BTreeSet, fmt};

use crate::{account::MissingField, discovery::Candidate};

/// Minimum confidence for direct import without `--auto-import`
pub const IMPORT_THRESHOLD: u8 = 6;
/// Minimum confidence for keeping an incomplete candidate as pending
pub const PENDING_THRESHOLD: u8 = 6;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Thresholds {
    pub import: u8,
    pub pending: u8,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            import: IMPORT_THRESHOLD,
            pending: PENDING_THRESHOLD,
        }
    }
}

/// Why a candidate was skipped
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum SkipReason {
    LowConfidence,
    MissingNameAndEmail,
    MissingUsernameAndKey,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::LowConfidence => f.write_str("low confidence"),
            SkipReason::MissingNameAndEmail => f.write_str("missing both name and email"),
            SkipReason::MissingUsernameAndKey => {
                f.write_str("missing both platform username and SSH key")
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Import,
    Pending(BTreeSet<MissingField>),
    Skip(Vec<SkipReason>),
}

/// Decides with the default thresholds
pub fn decide(candidate: &Candidate, dry_run: bool, auto_import: bool) -> Decision {
    decide_with(candidate, dry_run, auto_import, Thresholds::default())
}

pub fn decide_with(
    candidate: &Candidate,
    dry_run: bool,
    auto_import: bool,
    thresholds: Thresholds,
) -> Decision {
    let has_identity = candidate.has_name() || candidate.has_email();
    let has_credential = candidate.has_username() || candidate.has_ssh_key();

    if !dry_run
        && (auto_import || candidate.confidence >= thresholds.import)
        && has_identity
        && has_credential
    {
        return Decision::Import;
    }

    if candidate.confidence >= thresholds.pending && (has_identity || has_credential) {
        let mut missing = BTreeSet::new();
        if !candidate.has_name() {
            missing.insert(MissingField::Name);
        }
        if !candidate.has_email() {
            missing.insert(MissingField::Email);
        }
        return Decision::Pending(missing);
    }

    let mut reasons = Vec::new();
    if candidate.confidence < thresholds.pending {
        reasons.push(SkipReason::LowConfidence);
    }
    if !has_identity {
        reasons.push(SkipReason::MissingNameAndEmail);
    }
    if !has_credential {
        reasons.push(SkipReason::MissingUsernameAndKey);
    }
    Decision::Skip(reasons)
}
