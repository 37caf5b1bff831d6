//! Cross-student analytics over a process-held snapshot of every score.
//!
//! The snapshot is built on the first analytics read and shared read-only
//! until `invalidate()`. Writes do not invalidate on their own: the write
//! path calls it (recalc does), and anything that edits the store without
//! going through recalc must call it before the next analytics read.

use crate::calc::{round_off_2_decimal, CalcError};
use crate::store::{ScoreEntry, ScoreStore, StudentRecord};
use crate::taxonomy::{normalize_key, Derived, ABSENT_SENTINEL};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};

pub const DEFAULT_RANKING_SIZE: usize = 5;
pub const ABSENCE_LEADER_COUNT: usize = 5;

/// `student -> subject -> workKey -> value`.
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    generation: u64,
    students: HashMap<i64, HashMap<String, HashMap<String, f64>>>,
}

impl Snapshot {
    pub fn build(entries: Vec<ScoreEntry>, generation: u64) -> Snapshot {
        let mut students: HashMap<i64, HashMap<String, HashMap<String, f64>>> = HashMap::new();
        for e in entries {
            students
                .entry(e.student_id)
                .or_default()
                .entry(normalize_key(&e.subject))
                .or_default()
                .insert(normalize_key(&e.work_key), e.value);
        }
        Snapshot {
            generation,
            students,
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn subjects_for(&self, student_id: i64) -> Vec<String> {
        let mut out: Vec<String> = self
            .students
            .get(&student_id)
            .map(|m| m.keys().cloned().collect())
            .unwrap_or_default();
        out.sort();
        out
    }

    /// Stored FINAL per subject, sorted by subject; `None` where never recalculated.
    pub fn final_grades(&self, student_id: i64) -> Vec<(String, Option<f64>)> {
        let Some(subjects) = self.students.get(&student_id) else {
            return Vec::new();
        };
        let mut out: Vec<(String, Option<f64>)> = subjects
            .iter()
            .map(|(subject, values)| {
                (
                    subject.clone(),
                    values
                        .get(Derived::Final.as_str())
                        .copied()
                        .map(round_off_2_decimal),
                )
            })
            .collect();
        out.sort_by(|a, b| a.0.cmp(&b.0));
        out
    }

    /// All-or-nothing: one subject without a positive FINAL means no average.
    pub fn final_average(&self, student_id: i64) -> Option<f64> {
        let subjects = self.students.get(&student_id)?;
        let mut sum = 0.0_f64;
        let mut count = 0_usize;
        for values in subjects.values() {
            let fin = values.get(Derived::Final.as_str()).copied()?;
            if fin <= 0.0 {
                return None;
            }
            sum += fin;
            count += 1;
        }
        if count == 0 {
            None
        } else {
            Some(round_off_2_decimal(sum / count as f64))
        }
    }

    /// Admin-view average: mean of the positive FINAL values, 0.0 when there
    /// are none. Ungraded subjects are skipped instead of disqualifying the
    /// student, which is what sets it apart from `final_average`.
    pub fn lenient_average(&self, student_id: i64) -> f64 {
        let finals: Vec<f64> = self
            .students
            .get(&student_id)
            .into_iter()
            .flat_map(|subjects| subjects.values())
            .filter_map(|values| values.get(Derived::Final.as_str()).copied())
            .filter(|v| *v > 0.0)
            .collect();
        if finals.is_empty() {
            0.0
        } else {
            round_off_2_decimal(finals.iter().sum::<f64>() / finals.len() as f64)
        }
    }

    /// Number of stored values equal to the absence sentinel, whatever key
    /// they sit under. `None` when the student has no entries at all.
    pub fn absence_count(&self, student_id: i64) -> Option<usize> {
        let subjects = self.students.get(&student_id)?;
        Some(
            subjects
                .values()
                .flat_map(|values| values.values())
                .filter(|v| **v == ABSENT_SENTINEL)
                .count(),
        )
    }

    pub fn subjects(&self) -> Vec<String> {
        let set: BTreeSet<&String> = self
            .students
            .values()
            .flat_map(|subjects| subjects.keys())
            .collect();
        set.into_iter().cloned().collect()
    }

    /// Mean of positive FINAL values for one subject across students.
    pub fn subject_average(&self, subject: &str) -> Option<f64> {
        let finals: Vec<f64> = self
            .students
            .values()
            .filter_map(|subjects| subjects.get(subject))
            .filter_map(|values| values.get(Derived::Final.as_str()).copied())
            .filter(|v| *v > 0.0)
            .collect();
        if finals.is_empty() {
            None
        } else {
            Some(round_off_2_decimal(
                finals.iter().sum::<f64>() / finals.len() as f64,
            ))
        }
    }
}

#[derive(Debug, Default)]
struct CacheState {
    snapshot: Option<Arc<Snapshot>>,
    generation: u64,
}

/// Empty -> Built on the first read, Built -> Empty on `invalidate()`.
///
/// The store scan runs outside the lock. A build only installs its result if
/// no invalidation happened since the scan started, so an invalidate that
/// races a build can never be overwritten by the older data.
#[derive(Debug, Default)]
pub struct AnalyticsCache {
    state: Mutex<CacheState>,
}

impl AnalyticsCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, CacheState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn is_built(&self) -> bool {
        self.lock().snapshot.is_some()
    }

    pub fn invalidate(&self) {
        let mut state = self.lock();
        state.generation += 1;
        if state.snapshot.take().is_some() {
            tracing::debug!(generation = state.generation, "analytics snapshot invalidated");
        }
    }

    pub fn snapshot<S: ScoreStore + ?Sized>(&self, store: &S) -> Result<Arc<Snapshot>, CalcError> {
        let generation = {
            let state = self.lock();
            if let Some(s) = &state.snapshot {
                return Ok(Arc::clone(s));
            }
            state.generation
        };

        let entries = store.list_all_entries()?;
        let entry_count = entries.len();
        let built = Arc::new(Snapshot::build(entries, generation));

        let mut state = self.lock();
        if state.generation != generation {
            // Invalidated mid-build; serve this read but do not keep it.
            return Ok(built);
        }
        if let Some(existing) = &state.snapshot {
            return Ok(Arc::clone(existing));
        }
        state.snapshot = Some(Arc::clone(&built));
        tracing::info!(
            generation,
            entries = entry_count,
            students = built.students.len(),
            "analytics snapshot built"
        );
        Ok(built)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RankedStudent {
    pub student_id: i64,
    pub full_name: String,
    pub group_label: String,
    pub final_score: f64,
}

fn ranked(snapshot: &Snapshot, students: &[StudentRecord]) -> Vec<RankedStudent> {
    students
        .iter()
        .filter_map(|s| {
            snapshot.final_average(s.id).map(|avg| RankedStudent {
                student_id: s.id,
                full_name: s.full_name.clone(),
                group_label: s.group_label.clone(),
                final_score: avg,
            })
        })
        .collect()
}

/// Highest final averages first; ties keep directory order.
pub fn top_students(snapshot: &Snapshot, students: &[StudentRecord], n: usize) -> Vec<RankedStudent> {
    let mut rows = ranked(snapshot, students);
    rows.sort_by(|a, b| b.final_score.total_cmp(&a.final_score));
    rows.truncate(n);
    rows
}

/// Lowest final averages first; ties keep directory order.
pub fn bottom_students(
    snapshot: &Snapshot,
    students: &[StudentRecord],
    n: usize,
) -> Vec<RankedStudent> {
    let mut rows = ranked(snapshot, students);
    rows.sort_by(|a, b| a.final_score.total_cmp(&b.final_score));
    rows.truncate(n);
    rows
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AbsenceLeader {
    pub student_id: i64,
    pub full_name: String,
    pub group_label: String,
    pub absences: usize,
}

pub fn absence_leaders(
    snapshot: &Snapshot,
    students: &[StudentRecord],
    n: usize,
) -> Vec<AbsenceLeader> {
    let mut rows: Vec<AbsenceLeader> = students
        .iter()
        .filter_map(|s| {
            snapshot.absence_count(s.id).map(|absences| AbsenceLeader {
                student_id: s.id,
                full_name: s.full_name.clone(),
                group_label: s.group_label.clone(),
                absences,
            })
        })
        .collect();
    rows.sort_by(|a, b| b.absences.cmp(&a.absences));
    rows.truncate(n);
    rows
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HistogramBin {
    pub label: &'static str,
    pub min: f64,
    pub max: f64,
    pub count: usize,
}

/// Half-open buckets, except the last which includes 100.
const HISTOGRAM_BINS: [(&str, f64, f64); 6] = [
    ("0-50", 0.0, 50.0),
    ("50-60", 50.0, 60.0),
    ("60-70", 60.0, 70.0),
    ("70-80", 70.0, 80.0),
    ("80-90", 80.0, 90.0),
    ("90-100", 90.0, 100.0),
];

pub fn histogram(snapshot: &Snapshot, students: &[StudentRecord]) -> Vec<HistogramBin> {
    let averages: Vec<f64> = students
        .iter()
        .filter_map(|s| snapshot.final_average(s.id))
        .collect();
    let last = HISTOGRAM_BINS.len() - 1;
    HISTOGRAM_BINS
        .iter()
        .enumerate()
        .map(|(i, (label, min, max))| {
            let count = averages
                .iter()
                .filter(|v| **v >= *min && (**v < *max || (i == last && **v <= *max)))
                .count();
            HistogramBin {
                label: *label,
                min: *min,
                max: *max,
                count,
            }
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PieSlice {
    pub label: &'static str,
    pub count: usize,
}

/// Coarser grade bands for the summary chart. Upper bounds are inclusive, so
/// exactly 50 lands in the first slice and exactly 85 in the third.
const PIE_SLICES: [(&str, f64); 3] = [("0-50", 50.0), ("50-70", 70.0), ("70-85", 85.0)];
const PIE_TOP_LABEL: &str = "85-100";

pub fn pie(snapshot: &Snapshot, students: &[StudentRecord]) -> Vec<PieSlice> {
    let mut counts = [0_usize; PIE_SLICES.len() + 1];
    for avg in students.iter().filter_map(|s| snapshot.final_average(s.id)) {
        let slot = PIE_SLICES
            .iter()
            .position(|(_, upper)| avg <= *upper)
            .unwrap_or(PIE_SLICES.len());
        counts[slot] += 1;
    }
    PIE_SLICES
        .iter()
        .map(|(label, _)| *label)
        .chain(std::iter::once(PIE_TOP_LABEL))
        .zip(counts)
        .map(|(label, count)| PieSlice { label, count })
        .collect()
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupAggregate {
    pub group_label: String,
    pub student_count: usize,
    pub students_with_finals: usize,
    pub average: Option<f64>,
    pub absences: usize,
}

/// One row per distinct group label, sorted by label. Students without a
/// final average are left out of the group average rather than counted as 0.
pub fn group_aggregates(snapshot: &Snapshot, students: &[StudentRecord]) -> Vec<GroupAggregate> {
    let mut groups: BTreeMap<&str, Vec<&StudentRecord>> = BTreeMap::new();
    for s in students {
        groups.entry(s.group_label.as_str()).or_default().push(s);
    }
    groups
        .into_iter()
        .map(|(label, members)| {
            let finals: Vec<f64> = members
                .iter()
                .filter_map(|s| snapshot.final_average(s.id))
                .collect();
            let average = if finals.is_empty() {
                None
            } else {
                Some(round_off_2_decimal(
                    finals.iter().sum::<f64>() / finals.len() as f64,
                ))
            };
            let absences = members
                .iter()
                .filter_map(|s| snapshot.absence_count(s.id))
                .sum();
            GroupAggregate {
                group_label: label.to_string(),
                student_count: members.len(),
                students_with_finals: finals.len(),
                average,
                absences,
            }
        })
        .collect()
}

/// Highest group average; groups without any finals are not eligible.
/// On a tie the first label wins.
pub fn best_group(groups: &[GroupAggregate]) -> Option<&GroupAggregate> {
    let mut best: Option<&GroupAggregate> = None;
    for g in groups {
        let Some(avg) = g.average else {
            continue;
        };
        if best.and_then(|b| b.average).map(|b| avg > b).unwrap_or(true) {
            best = Some(g);
        }
    }
    best
}

pub fn overall_average(snapshot: &Snapshot, students: &[StudentRecord]) -> Option<f64> {
    let finals: Vec<f64> = students
        .iter()
        .filter_map(|s| snapshot.final_average(s.id))
        .collect();
    if finals.is_empty() {
        None
    } else {
        Some(round_off_2_decimal(
            finals.iter().sum::<f64>() / finals.len() as f64,
        ))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubjectAverage {
    pub subject: String,
    pub average: Option<f64>,
}

pub fn subject_averages(snapshot: &Snapshot) -> Vec<SubjectAverage> {
    snapshot
        .subjects()
        .into_iter()
        .map(|subject| {
            let average = snapshot.subject_average(&subject);
            SubjectAverage { subject, average }
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Dashboard {
    pub has_finals: bool,
    pub overall_average: Option<f64>,
    pub students_with_finals: usize,
    pub subjects_count: usize,
    pub histogram: Vec<HistogramBin>,
    pub pie: Vec<PieSlice>,
    pub subjects: Vec<SubjectAverage>,
    pub top: Vec<RankedStudent>,
    pub bottom: Vec<RankedStudent>,
    pub absence_leaders: Vec<AbsenceLeader>,
    pub groups: Vec<GroupAggregate>,
    pub best_group: Option<GroupAggregate>,
}

pub fn dashboard(snapshot: &Snapshot, students: &[StudentRecord], ranking_size: usize) -> Dashboard {
    let students_with_finals = students
        .iter()
        .filter(|s| snapshot.final_average(s.id).is_some())
        .count();
    let groups = group_aggregates(snapshot, students);
    let best_group = best_group(&groups).cloned();
    Dashboard {
        has_finals: students_with_finals > 0,
        overall_average: overall_average(snapshot, students),
        students_with_finals,
        subjects_count: snapshot.subjects().len(),
        histogram: histogram(snapshot, students),
        pie: pie(snapshot, students),
        subjects: subject_averages(snapshot),
        top: top_students(snapshot, students, ranking_size),
        bottom: bottom_students(snapshot, students, ranking_size),
        absence_leaders: absence_leaders(snapshot, students, ABSENCE_LEADER_COUNT),
        groups,
        best_group,
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentAverage {
    pub student_id: i64,
    pub full_name: String,
    pub group_label: String,
    pub average: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupAverage {
    pub group_label: String,
    pub average: f64,
}

/// Directory-wide view on the lenient policy: every student has an average
/// (0.0 when ungraded), ranks, and counts toward their group.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AdminOverview {
    pub students: Vec<StudentAverage>,
    pub top: Vec<StudentAverage>,
    pub worst: Vec<StudentAverage>,
    pub groups: Vec<GroupAverage>,
}

pub fn lenient_averages(snapshot: &Snapshot, students: &[StudentRecord]) -> Vec<StudentAverage> {
    students
        .iter()
        .map(|s| StudentAverage {
            student_id: s.id,
            full_name: s.full_name.clone(),
            group_label: s.group_label.clone(),
            average: snapshot.lenient_average(s.id),
        })
        .collect()
}

pub fn admin_overview(
    snapshot: &Snapshot,
    students: &[StudentRecord],
    ranking_size: usize,
) -> AdminOverview {
    let averages = lenient_averages(snapshot, students);

    let mut top = averages.clone();
    top.sort_by(|a, b| b.average.total_cmp(&a.average));
    top.truncate(ranking_size);

    let mut worst = averages.clone();
    worst.sort_by(|a, b| a.average.total_cmp(&b.average));
    worst.truncate(ranking_size);

    let mut by_group: BTreeMap<&str, Vec<f64>> = BTreeMap::new();
    for a in &averages {
        by_group.entry(a.group_label.as_str()).or_default().push(a.average);
    }
    let groups = by_group
        .into_iter()
        .map(|(label, values)| GroupAverage {
            group_label: label.to_string(),
            average: round_off_2_decimal(values.iter().sum::<f64>() / values.len() as f64),
        })
        .collect();

    AdminOverview {
        students: averages,
        top,
        worst,
        groups,
    }
}
