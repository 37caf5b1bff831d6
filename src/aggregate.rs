//! Per-student views that read the store directly, without the analytics
//! snapshot.

use crate::calc::{round_off_2_decimal, rollup, CalcError, Components, RollupPolicy};
use crate::store::{ScoreEntry, ScoreStore};
use crate::taxonomy::{Category, Composite, Derived, Item, WorkKey, WEEK_COUNT};
use serde::Serialize;
use std::collections::HashMap;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubjectFinal {
    pub subject: String,
    pub final_score: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentFinals {
    pub student_id: i64,
    pub finals: Vec<SubjectFinal>,
    pub average: f64,
}

/// Live-preview finals: recomputed from the raw components with
/// `RollupPolicy::RawValues`, ignoring any stored totals. Ordered by subject.
pub fn finals_for_student<S: ScoreStore + ?Sized>(
    store: &S,
    student_id: i64,
) -> Result<Vec<SubjectFinal>, CalcError> {
    let mut out = Vec::new();
    for subject in store.list_subjects(student_id)? {
        let c = Components::from_entries(&store.list_subject_entries(student_id, &subject)?);
        let totals = rollup(&c, RollupPolicy::RawValues);
        out.push(SubjectFinal {
            subject,
            final_score: totals.final_score,
        });
    }
    Ok(out)
}

/// Unweighted mean of the subject finals; 0.0 when there are none.
pub fn average_of(finals: &[SubjectFinal]) -> f64 {
    if finals.is_empty() {
        return 0.0;
    }
    let sum: f64 = finals.iter().map(|f| f.final_score).sum();
    round_off_2_decimal(sum / finals.len() as f64)
}

pub fn average_for_student<S: ScoreStore + ?Sized>(
    store: &S,
    student_id: i64,
) -> Result<f64, CalcError> {
    Ok(average_of(&finals_for_student(store, student_id)?))
}

pub fn student_finals<S: ScoreStore + ?Sized>(
    store: &S,
    student_id: i64,
) -> Result<StudentFinals, CalcError> {
    let finals = finals_for_student(store, student_id)?;
    let average = average_of(&finals);
    Ok(StudentFinals {
        student_id,
        finals,
        average,
    })
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JournalCell {
    pub work_key: String,
    pub value: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JournalRow {
    pub subject: String,
    pub cells: Vec<JournalCell>,
}

/// Report column order: each category across the weeks, then the totals in
/// term order.
fn report_columns() -> Vec<WorkKey> {
    let mut cols = Vec::new();
    for category in Category::ALL {
        for week in 1..=WEEK_COUNT {
            cols.push(WorkKey::Value(Item::week(week, category)));
        }
    }
    cols.extend([
        WorkKey::Derived(Derived::Tk1),
        WorkKey::Value(Item::Composite(Composite::Rk1)),
        WorkKey::Derived(Derived::R1),
        WorkKey::Derived(Derived::Tk2),
        WorkKey::Value(Item::Composite(Composite::Rk2)),
        WorkKey::Derived(Derived::R2),
        WorkKey::Derived(Derived::Dopusk),
        WorkKey::Value(Item::Composite(Composite::Exam)),
        WorkKey::Derived(Derived::Final),
    ]);
    cols
}

/// The stored journal as-is, one row per subject; unset cells are `None`.
pub fn stored_journal<S: ScoreStore + ?Sized>(
    store: &S,
    student_id: i64,
) -> Result<Vec<JournalRow>, CalcError> {
    let mut by_subject: HashMap<String, Vec<ScoreEntry>> = HashMap::new();
    for e in store.list_entries(student_id)? {
        by_subject.entry(e.subject.clone()).or_default().push(e);
    }

    let columns = report_columns();
    let mut rows = Vec::new();
    for subject in store.list_subjects(student_id)? {
        let entries = by_subject.remove(&subject).unwrap_or_default();
        let c = Components::from_entries(&entries);
        let cells = columns
            .iter()
            .map(|k| JournalCell {
                work_key: k.to_string(),
                value: c.stored(*k),
            })
            .collect();
        rows.push(JournalRow { subject, cells });
    }
    Ok(rows)
}
