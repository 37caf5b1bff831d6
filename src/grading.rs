//! Single-subject journal operations: resolving the stored components into
//! the full journal view, writing items and flags, and recalculating totals.

use crate::analytics::AnalyticsCache;
use crate::calc::{rollup, CalcError, Components, RollupPolicy, Totals};
use crate::store::ScoreStore;
use crate::taxonomy::{Composite, Derived, Flag, Item, Mark, WorkKey};
use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};
use serde_json::json;

/// Every key of the fixed taxonomy with its display value. Gaps are 0.0.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedView {
    entries: Vec<(WorkKey, f64)>,
}

impl ResolvedView {
    pub fn get(&self, key: WorkKey) -> f64 {
        self.entries
            .iter()
            .find(|(k, _)| *k == key)
            .map(|(_, v)| *v)
            .unwrap_or(0.0)
    }

    pub fn iter(&self) -> impl Iterator<Item = &(WorkKey, f64)> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Serialize for ResolvedView {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (k, v) in &self.entries {
            map.serialize_entry(&k.to_string(), v)?;
        }
        map.end()
    }
}

/// Builds the journal view for one student+subject.
///
/// Flagged items show their sentinel regardless of the stored number; the
/// exam has no excluded state, so an exam flag of 2 reads as 1.
pub fn resolve<S: ScoreStore + ?Sized>(
    store: &S,
    student_id: i64,
    subject: &str,
) -> Result<ResolvedView, CalcError> {
    let c = Components::from_entries(&store.list_subject_entries(student_id, subject)?);
    Ok(resolve_components(&c))
}

pub fn resolve_components(c: &Components) -> ResolvedView {
    let mut entries = Vec::with_capacity(WorkKey::all().count());

    for item in Item::all() {
        let mut raw_flag = c.raw_flag(item);
        if item == Item::Composite(Composite::Exam) && Flag::from_raw(raw_flag) == Flag::Excluded {
            raw_flag = Flag::Absent.to_raw();
        }
        let value = match Mark::for_flag(Flag::from_raw(raw_flag)) {
            Some(mark) => mark.to_stored(),
            None => c
                .stored(WorkKey::Value(item))
                .map(|v| Mark::from_input(v).to_stored())
                .unwrap_or(0.0),
        };
        entries.push((WorkKey::Flag(item), raw_flag));
        entries.push((WorkKey::Value(item), value));
    }

    for d in Derived::ALL {
        entries.push((
            WorkKey::Derived(d),
            c.stored(WorkKey::Derived(d)).unwrap_or(0.0),
        ));
    }

    ResolvedView { entries }
}

fn gradable_item(work_key: &str) -> Result<Item, CalcError> {
    let key = work_key.parse::<WorkKey>().map_err(|e| {
        CalcError::new("unknown_work_key", e.to_string())
            .with_details(json!({ "workKey": work_key }))
    })?;
    match key {
        WorkKey::Value(item) => Ok(item),
        WorkKey::Derived(d) => Err(CalcError::new(
            "read_only_work_key",
            format!("{} is recalculated, not entered", d.as_str()),
        )
        .with_details(json!({ "workKey": work_key }))),
        WorkKey::Flag(_) => Err(CalcError::new(
            "bad_params",
            "flag keys are written through setFlag with the item key",
        )
        .with_details(json!({ "workKey": work_key }))),
    }
}

/// Free-text score input. Comma decimals are accepted; blank or unparseable
/// input becomes the absence sentinel instead of an error.
pub fn parse_component_text(raw: &str) -> f64 {
    let t = raw.trim();
    if t.is_empty() {
        return Mark::Absent.to_stored();
    }
    match t.replace(',', ".").parse::<f64>() {
        Ok(v) if v.is_finite() => v,
        _ => Mark::Absent.to_stored(),
    }
}

/// Writes one item value. `None` writes nothing. Returns what was stored.
pub fn set_component<S: ScoreStore + ?Sized>(
    store: &S,
    student_id: i64,
    subject: &str,
    work_key: &str,
    value: Option<f64>,
) -> Result<Option<f64>, CalcError> {
    let item = gradable_item(work_key)?;
    let Some(value) = value else {
        return Ok(None);
    };
    let stored = Mark::from_input(value).to_stored();
    store.upsert(student_id, subject, &WorkKey::Value(item).to_string(), stored)?;
    Ok(Some(stored))
}

/// Writes the raw flag under `{workKey}_flag`. The flag value itself is not
/// range-checked: readers treat anything but 1 and 2 as a normal item.
pub fn set_flag<S: ScoreStore + ?Sized>(
    store: &S,
    student_id: i64,
    subject: &str,
    work_key: &str,
    flag: f64,
) -> Result<(), CalcError> {
    let item = gradable_item(work_key)?;
    store.upsert(student_id, subject, &WorkKey::Flag(item).to_string(), flag)
}

/// Re-derives and stores every total for the subject, then drops the
/// analytics snapshot so the next report sees the new totals.
pub fn recalc<S: ScoreStore + ?Sized>(
    store: &S,
    cache: &AnalyticsCache,
    student_id: i64,
    subject: &str,
) -> Result<Totals, CalcError> {
    let c = Components::from_entries(&store.list_subject_entries(student_id, subject)?);
    let totals = rollup(&c, RollupPolicy::Flagged);
    for d in Derived::ALL {
        store.upsert(student_id, subject, d.as_str(), totals.get(d))?;
    }
    cache.invalidate();
    tracing::info!(
        student_id,
        subject,
        tk1 = totals.tk1,
        tk2 = totals.tk2,
        dopusk = totals.dopusk,
        final_score = totals.final_score,
        "recalculated subject totals"
    );
    Ok(totals)
}

#[derive(Debug, Clone, PartialEq)]
pub enum ComponentInput {
    Missing,
    Number(f64),
    Text(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct JournalEdit {
    pub work_key: String,
    pub value: ComponentInput,
    pub flag: f64,
}

/// The batch edit path of the journal form: per item the flag goes first,
/// then the value (flagged items get their sentinel), then one recalc.
pub fn save_journal<S: ScoreStore + ?Sized>(
    store: &S,
    cache: &AnalyticsCache,
    student_id: i64,
    subject: &str,
    edits: &[JournalEdit],
) -> Result<Totals, CalcError> {
    // Validate the whole batch before the first write.
    for e in edits {
        gradable_item(&e.work_key)?;
    }
    for e in edits {
        set_flag(store, student_id, subject, &e.work_key, e.flag)?;
        let value = match Mark::for_flag(Flag::from_raw(e.flag)) {
            Some(mark) => mark.to_stored(),
            None => match &e.value {
                ComponentInput::Number(v) => *v,
                ComponentInput::Text(s) => parse_component_text(s),
                ComponentInput::Missing => Mark::Absent.to_stored(),
            },
        };
        set_component(store, student_id, subject, &e.work_key, Some(value))?;
    }
    recalc(store, cache, student_id, subject)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use crate::taxonomy::Category;
    use rusqlite::Connection;

    fn conn() -> Connection {
        let conn = Connection::open_in_memory().expect("open in-memory db");
        db::init_schema(&conn).expect("init schema");
        conn
    }

    fn read_back(conn: &Connection, key: &str) -> Option<f64> {
        conn.list_subject_entries(1, "Math")
            .expect("list")
            .into_iter()
            .find(|e| e.work_key == key)
            .map(|e| e.value)
    }

    #[test]
    fn resolve_fills_every_key_for_unknown_subject() {
        let conn = conn();
        let view = resolve(&conn, 42, "Nothing").expect("resolve");
        assert_eq!(view.len(), WorkKey::all().count());
        assert!(view.iter().all(|(_, v)| *v == 0.0));
    }

    #[test]
    fn resolve_applies_flag_sentinels_over_stored_numbers() {
        let conn = conn();
        let lab = Item::week(2, Category::Lab);
        conn.upsert(1, "Math", "week2_lab", 88.0).expect("upsert");
        conn.upsert(1, "Math", "week2_lab_flag", 1.0).expect("upsert");
        conn.upsert(1, "Math", "week3_sro", 40.0).expect("upsert");
        conn.upsert(1, "Math", "week3_sro_flag", 2.0).expect("upsert");
        conn.upsert(1, "Math", "exam", 90.0).expect("upsert");
        conn.upsert(1, "Math", "exam_flag", 2.0).expect("upsert");
        conn.upsert(1, "Math", "rk1_flag", 2.0).expect("upsert");
        conn.upsert(1, "Math", "FINAL", 55.5).expect("upsert");

        let view = resolve(&conn, 1, "Math").expect("resolve");
        assert_eq!(view.get(WorkKey::Value(lab)), -1.0);
        assert_eq!(view.get(WorkKey::Flag(lab)), 1.0);
        assert_eq!(
            view.get(WorkKey::Value(Item::week(3, Category::Sro))),
            -2.0
        );
        let exam = Item::Composite(Composite::Exam);
        assert_eq!(view.get(WorkKey::Flag(exam)), 1.0);
        assert_eq!(view.get(WorkKey::Value(exam)), -1.0);
        let rk1 = Item::Composite(Composite::Rk1);
        assert_eq!(view.get(WorkKey::Flag(rk1)), 2.0);
        assert_eq!(view.get(WorkKey::Value(rk1)), -2.0);
        assert_eq!(view.get(WorkKey::Derived(Derived::Final)), 55.5);
    }

    #[test]
    fn set_component_clamps_and_coerces() {
        let conn = conn();
        for (input, expected) in [
            (0.0, 0.0),
            (55.5, 55.5),
            (100.0, 100.0),
            (250.0, 100.0),
            (-1.0, -1.0),
            (-0.01, -1.0),
            (-9.0, -1.0),
            (-2.0, -2.0),
        ] {
            set_component(&conn, 1, "Math", "week1_lecture", Some(input)).expect("set");
            assert_eq!(read_back(&conn, "week1_lecture"), Some(expected), "input {}", input);
        }
    }

    #[test]
    fn set_component_none_is_a_no_op() {
        let conn = conn();
        assert_eq!(
            set_component(&conn, 1, "Math", "rk1", None).expect("set"),
            None
        );
        assert_eq!(read_back(&conn, "rk1"), None);
    }

    #[test]
    fn set_component_rejects_out_of_taxonomy_keys() {
        let conn = conn();
        let err = set_component(&conn, 1, "Math", "week99_lab", Some(1.0)).expect_err("reject");
        assert_eq!(err.code, "unknown_work_key");
        let err = set_component(&conn, 1, "Math", "FINAL", Some(1.0)).expect_err("reject");
        assert_eq!(err.code, "read_only_work_key");
        assert!(conn.list_all_entries().expect("all").is_empty());
    }

    #[test]
    fn set_flag_passes_raw_values_through() {
        let conn = conn();
        set_flag(&conn, 1, "Math", "week4_sro", 7.0).expect("flag");
        assert_eq!(read_back(&conn, "week4_sro_flag"), Some(7.0));
        let view = resolve(&conn, 1, "Math").expect("resolve");
        // Out-of-range flags read as normal.
        assert_eq!(
            view.get(WorkKey::Value(Item::week(4, Category::Sro))),
            0.0
        );
    }

    #[test]
    fn parse_component_text_fails_soft() {
        assert_eq!(parse_component_text("72,5"), 72.5);
        assert_eq!(parse_component_text(" 80 "), 80.0);
        assert_eq!(parse_component_text(""), -1.0);
        assert_eq!(parse_component_text("abc"), -1.0);
        assert_eq!(parse_component_text("NaN"), -1.0);
    }

    #[test]
    fn recalc_is_idempotent_and_invalidates() {
        let conn = conn();
        let cache = AnalyticsCache::new();
        conn.upsert(1, "Math", "week1_lecture", 70.0).expect("upsert");
        conn.upsert(1, "Math", "rk1", 60.0).expect("upsert");
        cache.snapshot(&conn).expect("build");
        assert!(cache.is_built());

        let first = recalc(&conn, &cache, 1, "Math").expect("recalc");
        assert!(!cache.is_built());
        let second = recalc(&conn, &cache, 1, "Math").expect("recalc");
        assert_eq!(first, second);
        assert_eq!(read_back(&conn, "FINAL"), Some(first.final_score));
    }

    #[test]
    fn recalc_writes_zero_totals_for_empty_subject() {
        let conn = conn();
        let cache = AnalyticsCache::new();
        let totals = recalc(&conn, &cache, 5, "History").expect("recalc");
        assert_eq!(totals, Totals::default());
        let stored = conn.list_subject_entries(5, "History").expect("list");
        assert_eq!(stored.len(), Derived::ALL.len());
        assert!(stored.iter().all(|e| e.value == 0.0));
    }

    #[test]
    fn save_journal_writes_sentinels_for_flagged_items() {
        let conn = conn();
        let cache = AnalyticsCache::new();
        let edits = vec![
            JournalEdit {
                work_key: "week1_lecture".to_string(),
                value: ComponentInput::Number(95.0),
                flag: 1.0,
            },
            JournalEdit {
                work_key: "week1_sro".to_string(),
                value: ComponentInput::Text("60,5".to_string()),
                flag: 0.0,
            },
            JournalEdit {
                work_key: "week1_lab".to_string(),
                value: ComponentInput::Missing,
                flag: 0.0,
            },
            JournalEdit {
                work_key: "rk2".to_string(),
                value: ComponentInput::Number(80.0),
                flag: 2.0,
            },
        ];
        save_journal(&conn, &cache, 1, "Math", &edits).expect("save");
        assert_eq!(read_back(&conn, "week1_lecture"), Some(-1.0));
        assert_eq!(read_back(&conn, "week1_lecture_flag"), Some(1.0));
        assert_eq!(read_back(&conn, "week1_sro"), Some(60.5));
        assert_eq!(read_back(&conn, "week1_lab"), Some(-1.0));
        assert_eq!(read_back(&conn, "rk2"), Some(-2.0));
        // Week 1: absent lecture counts 0, sro 60.5, blank lab does not count,
        // so 30.25; weeks 2..=7 have no entries and read as zeros.
        assert_eq!(read_back(&conn, "tk1"), Some(4.32));
    }

    #[test]
    fn save_journal_rejects_bad_batch_before_writing() {
        let conn = conn();
        let cache = AnalyticsCache::new();
        let edits = vec![
            JournalEdit {
                work_key: "week1_lecture".to_string(),
                value: ComponentInput::Number(95.0),
                flag: 0.0,
            },
            JournalEdit {
                work_key: "week1_essay".to_string(),
                value: ComponentInput::Number(95.0),
                flag: 0.0,
            },
        ];
        let err = save_journal(&conn, &cache, 1, "Math", &edits).expect_err("reject");
        assert_eq!(err.code, "unknown_work_key");
        assert!(conn.list_all_entries().expect("all").is_empty());
    }
}
