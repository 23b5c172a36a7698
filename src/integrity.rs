//! The three-part assignment integrity audit.
//!
//! Only a question that explicitly asks whether assignments are correct or
//! valid unlocks the audit. The audit always answers with three rows, one per
//! sub-check, in a fixed order.

use serde_json::Value;

use crate::domain::QueryRow;

pub const PASS: &str = "PASS";
pub const FAIL: &str = "FAIL";

const ASSIGNMENT_TERMS: &[&str] = &[
    "assign",
    "assigned",
    "assigning",
    "assignment",
    "assignments",
    "misassigned",
];
/// How many words may separate the assignment term from the correctness term.
const INTENT_WINDOW: usize = 3;

const CORRECTNESS_TERMS: &[&str] = &[
    "correct",
    "correctly",
    "correctness",
    "incorrect",
    "incorrectly",
    "valid",
    "validity",
    "validate",
    "invalid",
    "wrong",
    "properly",
    "consistent",
    "inconsistent",
    "integrity",
    "compliant",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntegrityCheck {
    CrossProductCoAssignment,
    SecurityCompanion,
    ManagedFileTransferCompanion,
}

impl IntegrityCheck {
    pub const ORDERED: [IntegrityCheck; 3] = [
        IntegrityCheck::CrossProductCoAssignment,
        IntegrityCheck::SecurityCompanion,
        IntegrityCheck::ManagedFileTransferCompanion,
    ];

    pub fn describe(&self, passed: bool) -> &'static str {
        match (self, passed) {
            (IntegrityCheck::CrossProductCoAssignment, true) => {
                "Every entity that holds the product is also co-assigned across the related products."
            }
            (IntegrityCheck::CrossProductCoAssignment, false) => {
                "Some entities hold the product without the required co-assignment across the related products."
            }
            (IntegrityCheck::SecurityCompanion, true) => {
                "Every assignment has its required security companion."
            }
            (IntegrityCheck::SecurityCompanion, false) => {
                "Some assignments are missing their required security companion."
            }
            (IntegrityCheck::ManagedFileTransferCompanion, true) => {
                "Every assignment has its required managed file transfer companion."
            }
            (IntegrityCheck::ManagedFileTransferCompanion, false) => {
                "Some assignments are missing their required managed file transfer companion."
            }
        }
    }
}

fn words(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(|w| w.to_lowercase())
        .collect()
}

fn positions(words: &[String], terms: &[&str]) -> Vec<usize> {
    words
        .iter()
        .enumerate()
        .filter(|(_, w)| terms.contains(&w.as_str()))
        .map(|(i, _)| i)
        .collect()
}

/// True only when the question asks about correctness of assignments, not
/// when it merely mentions the subject. The correctness word has to qualify
/// the assignment word, so both must sit within a few words of each other.
pub fn asks_for_integrity_check(question: &str) -> bool {
    let words = words(question);
    let assignments = positions(&words, ASSIGNMENT_TERMS);
    let judgements = positions(&words, CORRECTNESS_TERMS);
    assignments
        .iter()
        .any(|a| judgements.iter().any(|j| a.abs_diff(*j) <= INTENT_WINDOW))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IntegrityReport {
    pub outcomes: [(IntegrityCheck, bool); 3],
}

impl IntegrityReport {
    /// Reads the audit rows, ordered by `check_order` when present.
    pub fn from_rows(rows: &[QueryRow]) -> Option<Self> {
        if rows.len() != 3 {
            return None;
        }

        let mut tokens: Vec<(i64, bool)> = Vec::with_capacity(3);
        for (position, row) in rows.iter().enumerate() {
            let order = row
                .get("check_order")
                .and_then(Value::as_i64)
                .unwrap_or(position as i64 + 1);
            let token = row
                .get("result")
                .or_else(|| if row.len() == 1 { row.values().next() } else { None })
                .and_then(Value::as_str)?;
            let passed = match token.trim().to_ascii_uppercase().as_str() {
                PASS => true,
                FAIL => false,
                _ => return None,
            };
            tokens.push((order, passed));
        }
        tokens.sort_by_key(|(order, _)| *order);

        let mut outcomes = [(IntegrityCheck::CrossProductCoAssignment, false); 3];
        for (slot, (check, (_, passed))) in outcomes
            .iter_mut()
            .zip(IntegrityCheck::ORDERED.iter().zip(tokens))
        {
            *slot = (*check, passed);
        }
        Some(Self { outcomes })
    }

    pub fn statements(&self) -> Vec<&'static str> {
        self.outcomes
            .iter()
            .map(|(check, passed)| check.describe(*passed))
            .collect()
    }
}
