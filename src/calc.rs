use crate::store::ScoreEntry;
use crate::taxonomy::{
    Category, Composite, Derived, Flag, Item, WorkKey, FIRST_TERM_WEEKS, SECOND_TERM_WEEKS,
};
use serde::Serialize;
use std::collections::HashMap;
use std::ops::RangeInclusive;

pub const TERM_WEIGHT: f64 = 0.6;
pub const CHECKPOINT_WEIGHT: f64 = 0.4;
pub const ADMISSION_WEIGHT: f64 = 0.6;
pub const EXAM_WEIGHT: f64 = 0.4;

/// Half-up rounding to 2 decimals: `floor(100*x + 0.5) / 100`.
pub fn round_off_2_decimal(x: f64) -> f64 {
    ((100.0 * x) + 0.5).floor() / 100.0
}

#[derive(Debug, Clone, Serialize)]
pub struct CalcError {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl CalcError {
    pub fn new(code: &str, message: impl Into<String>) -> Self {
        Self {
            code: code.to_string(),
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }
}

impl std::fmt::Display for CalcError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for CalcError {}

/// Raw stored values for one student+subject, keyed by the typed taxonomy.
/// Keys outside the taxonomy are dropped on the way in.
#[derive(Debug, Clone, Default)]
pub struct Components {
    values: HashMap<WorkKey, f64>,
}

impl Components {
    pub fn from_entries(entries: &[ScoreEntry]) -> Self {
        let mut values = HashMap::new();
        for e in entries {
            match e.work_key.parse::<WorkKey>() {
                Ok(key) => {
                    values.insert(key, e.value);
                }
                Err(err) => tracing::debug!(
                    student_id = e.student_id,
                    subject = %e.subject,
                    "skipping stored entry: {}",
                    err
                ),
            }
        }
        Self { values }
    }

    pub fn stored(&self, key: WorkKey) -> Option<f64> {
        self.values.get(&key).copied()
    }

    pub fn raw_flag(&self, item: Item) -> f64 {
        self.stored(WorkKey::Flag(item)).unwrap_or(0.0)
    }

    pub fn flag(&self, item: Item) -> Flag {
        Flag::from_raw(self.raw_flag(item))
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Which exclusion rules a rollup applies.
///
/// `Flagged` is the recalculation policy: flags decide what counts, and a
/// missing value reads as a stored 0. `RawValues` is the live preview used
/// by the per-student view: flags are ignored, only values that are present
/// and non-negative count, and negative composites read as 0. The two are
/// kept separate on purpose; they disagree on absent-flagged items.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RollupPolicy {
    Flagged,
    RawValues,
}

impl RollupPolicy {
    fn week_item(self, c: &Components, item: Item) -> Option<f64> {
        match self {
            RollupPolicy::Flagged => match c.flag(item) {
                Flag::Excluded => None,
                Flag::Absent => Some(0.0),
                Flag::Normal => {
                    let v = c.stored(WorkKey::Value(item)).unwrap_or(0.0);
                    (v >= 0.0).then_some(v)
                }
            },
            RollupPolicy::RawValues => c
                .stored(WorkKey::Value(item))
                .filter(|v| *v >= 0.0),
        }
    }

    fn composite(self, c: &Components, composite: Composite) -> f64 {
        let item = Item::Composite(composite);
        let v = c.stored(WorkKey::Value(item)).unwrap_or(0.0);
        match self {
            RollupPolicy::Flagged => {
                if c.flag(item) != Flag::Normal || v < 0.0 {
                    0.0
                } else {
                    v
                }
            }
            RollupPolicy::RawValues => v.max(0.0),
        }
    }
}

/// Mean of the counted items of one week; `None` when nothing counted.
pub fn week_average(c: &Components, policy: RollupPolicy, week: u8) -> Option<f64> {
    let mut sum = 0.0_f64;
    let mut counted = 0_usize;
    for category in Category::ALL {
        if let Some(v) = policy.week_item(c, Item::week(week, category)) {
            sum += v;
            counted += 1;
        }
    }
    if counted > 0 {
        Some(sum / counted as f64)
    } else {
        None
    }
}

/// Mean of the week averages in range; weeks with nothing counted are skipped.
pub fn term_average(c: &Components, policy: RollupPolicy, weeks: RangeInclusive<u8>) -> f64 {
    let averages: Vec<f64> = weeks
        .filter_map(|w| week_average(c, policy, w))
        .collect();
    if averages.is_empty() {
        0.0
    } else {
        averages.iter().sum::<f64>() / averages.len() as f64
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Totals {
    pub tk1: f64,
    pub tk2: f64,
    pub r1: f64,
    pub r2: f64,
    pub dopusk: f64,
    #[serde(rename = "FINAL")]
    pub final_score: f64,
}

impl Totals {
    pub fn get(&self, d: Derived) -> f64 {
        match d {
            Derived::Tk1 => self.tk1,
            Derived::Tk2 => self.tk2,
            Derived::R1 => self.r1,
            Derived::R2 => self.r2,
            Derived::Dopusk => self.dopusk,
            Derived::Final => self.final_score,
        }
    }

    fn rounded(self) -> Self {
        Totals {
            tk1: round_off_2_decimal(self.tk1),
            tk2: round_off_2_decimal(self.tk2),
            r1: round_off_2_decimal(self.r1),
            r2: round_off_2_decimal(self.r2),
            dopusk: round_off_2_decimal(self.dopusk),
            final_score: round_off_2_decimal(self.final_score),
        }
    }
}

/// The weighted subject rollup. Every total is rounded independently from
/// unrounded intermediates.
pub fn rollup(c: &Components, policy: RollupPolicy) -> Totals {
    let tk1 = term_average(c, policy, FIRST_TERM_WEEKS);
    let tk2 = term_average(c, policy, SECOND_TERM_WEEKS);

    let rk1 = policy.composite(c, Composite::Rk1);
    let rk2 = policy.composite(c, Composite::Rk2);
    let exam = policy.composite(c, Composite::Exam);

    let r1 = tk1 * TERM_WEIGHT + rk1 * CHECKPOINT_WEIGHT;
    let r2 = tk2 * TERM_WEIGHT + rk2 * CHECKPOINT_WEIGHT;
    let dopusk = (r1 + r2) / 2.0;
    let final_score = dopusk * ADMISSION_WEIGHT + exam * EXAM_WEIGHT;

    Totals {
        tk1,
        tk2,
        r1,
        r2,
        dopusk,
        final_score,
    }
    .rounded()
}
