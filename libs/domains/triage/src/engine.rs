//! Eligibility evaluation.
//!
//! Pure function of (record, compiled rules, now). Every rule is looked at,
//! so the verdict and the reasons do not depend on rule order; only the
//! sector override picks the highest-priority match.

use chrono::{DateTime, Duration, Utc};
use domain_occurrences::{time_remaining, window_expires_at};

use crate::models::{EligibleRecord, Evaluation};
use crate::rules::{RuleAction, RuleKind, TriageRule};

pub const REASON_AGE: &str = "age above limit";
pub const REASON_WINDOW: &str = "outside capture window";
pub const REASON_UNKNOWN_IDENTITY: &str = "unknown identity";
const REASON_CAUSE_PREFIX: &str = "excluded cause of death: ";

pub const MAX_SCORE: i32 = 100;
const OTHER_SECTOR_SCORE: i32 = 40;

/// Default sector scores, matched as substrings of the normalized sector.
const SECTOR_SCORES: &[(&[&str], i32)] = &[
    (&["uti", "icu", "terapia intensiva", "intensive care"], 100),
    (&["emergencia", "emergency", "pronto-socorro", "pronto socorro"], 80),
    (&["centro cirurgico", "surgical", "cirurg"], 70),
    (&["enfermaria", "ward"], 50),
];

pub fn evaluate(record: &EligibleRecord, rules: &[TriageRule], now: DateTime<Utc>) -> Evaluation {
    let mut reasons = Vec::new();
    let mut alerts = Vec::new();
    let mut rules_applied = Vec::new();
    let mut sector_override: Option<(i32, i32)> = None;

    let sector = record.sector.as_deref().map(normalize);

    for rule in rules {
        let finding = match &rule.kind {
            RuleKind::MaxAge(max) => {
                (record.age_at_death() > *max as i32).then(|| REASON_AGE.to_string())
            }
            RuleKind::ExcludedCauses(causes) => {
                let cause = normalize(&record.cause_of_death);
                causes
                    .iter()
                    .find(|term| cause.contains(&normalize(term)))
                    .map(|term| format!("{REASON_CAUSE_PREFIX}{term}"))
            }
            RuleKind::WindowHours(hours) => (record.elapsed_since_death(now)
                >= Duration::hours(i64::from(*hours)))
            .then(|| REASON_WINDOW.to_string()),
            RuleKind::RejectUnknownIdentity(reject) => {
                (*reject && record.identity_unknown).then(|| REASON_UNKNOWN_IDENTITY.to_string())
            }
            RuleKind::SectorPriority(scores) => {
                if let Some(sector) = &sector {
                    let matched = scores
                        .iter()
                        .filter(|(name, _)| sector.contains(&normalize(name)))
                        .map(|(_, score)| *score)
                        .max();
                    if let Some(score) = matched {
                        let wins = sector_override.is_none_or(|(priority, _)| rule.priority > priority);
                        if wins {
                            sector_override = Some((rule.priority, score));
                        }
                        rules_applied.push(rule.name.clone());
                    }
                }
                continue;
            }
        };

        let Some(finding) = finding else {
            continue;
        };
        rules_applied.push(rule.name.clone());
        match rule.action {
            RuleAction::Reject => reasons.push(finding),
            RuleAction::Alert => alerts.push(finding),
            RuleAction::Prioritize => {}
        }
    }

    if !reasons.is_empty() {
        return Evaluation {
            eligible: false,
            score: 0,
            reasons,
            alerts,
            rules_applied,
        };
    }

    let sector_score = sector_override
        .map(|(_, score)| score)
        .unwrap_or_else(|| sector.as_deref().map_or(OTHER_SECTOR_SCORE, default_sector_score));
    let remaining = time_remaining(window_expires_at(record.death_time), now);
    let score = (sector_score + urgency_bonus(remaining)).min(MAX_SCORE);

    Evaluation {
        eligible: true,
        score,
        reasons,
        alerts,
        rules_applied,
    }
}

/// Bonus while the window is still open; nothing once it has expired.
pub fn urgency_bonus(remaining: Duration) -> i32 {
    if remaining <= Duration::zero() {
        0
    } else if remaining <= Duration::hours(1) {
        20
    } else if remaining <= Duration::hours(2) {
        10
    } else if remaining <= Duration::hours(3) {
        5
    } else {
        0
    }
}

/// Score for an already normalized sector name.
fn default_sector_score(sector: &str) -> i32 {
    SECTOR_SCORES
        .iter()
        .find(|(needles, _)| needles.iter().any(|n| sector.contains(n)))
        .map_or(OTHER_SECTOR_SCORE, |(_, score)| *score)
}

/// Lowercase and fold the Portuguese diacritics.
pub fn normalize(value: &str) -> String {
    value
        .trim()
        .chars()
        .flat_map(char::to_lowercase)
        .map(|c| match c {
            'á' | 'à' | 'â' | 'ã' | 'ä' => 'a',
            'é' | 'è' | 'ê' | 'ë' => 'e',
            'í' | 'ì' | 'î' | 'ï' => 'i',
            'ó' | 'ò' | 'ô' | 'õ' | 'ö' => 'o',
            'ú' | 'ù' | 'û' | 'ü' => 'u',
            'ç' => 'c',
            other => other,
        })
        .collect()
}
