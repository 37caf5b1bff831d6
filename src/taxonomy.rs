use std::fmt;
use std::ops::RangeInclusive;
use std::str::FromStr;

pub const WEEK_COUNT: u8 = 15;
pub const FIRST_TERM_WEEKS: RangeInclusive<u8> = 1..=7;
pub const SECOND_TERM_WEEKS: RangeInclusive<u8> = 8..=15;

pub const ABSENT_SENTINEL: f64 = -1.0;
pub const EXCLUDED_SENTINEL: f64 = -2.0;

const FLAG_SUFFIX: &str = "_flag";

/// Removes non-breaking and zero-width characters wherever they occur, then
/// trims surrounding whitespace. Free-text journal forms tend to smuggle them
/// into subject names and keys.
pub fn normalize_key(raw: &str) -> String {
    raw.chars()
        .filter(|c| !matches!(c, '\u{00A0}' | '\u{200B}' | '\u{2060}' | '\u{FEFF}'))
        .collect::<String>()
        .trim()
        .to_string()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Category {
    Lecture,
    Sro,
    Lab,
}

impl Category {
    pub const ALL: [Category; 3] = [Category::Lecture, Category::Sro, Category::Lab];

    pub fn as_str(self) -> &'static str {
        match self {
            Category::Lecture => "lecture",
            Category::Sro => "sro",
            Category::Lab => "lab",
        }
    }
}

/// Term composites: the two checkpoints and the exam.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Composite {
    Rk1,
    Rk2,
    Exam,
}

impl Composite {
    pub const ALL: [Composite; 3] = [Composite::Rk1, Composite::Rk2, Composite::Exam];

    pub fn as_str(self) -> &'static str {
        match self {
            Composite::Rk1 => "rk1",
            Composite::Rk2 => "rk2",
            Composite::Exam => "exam",
        }
    }
}

/// Totals written back by recalculation. Never entered by hand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Derived {
    Tk1,
    Tk2,
    R1,
    R2,
    Dopusk,
    Final,
}

impl Derived {
    pub const ALL: [Derived; 6] = [
        Derived::Tk1,
        Derived::Tk2,
        Derived::R1,
        Derived::R2,
        Derived::Dopusk,
        Derived::Final,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Derived::Tk1 => "tk1",
            Derived::Tk2 => "tk2",
            Derived::R1 => "r1",
            Derived::R2 => "r2",
            Derived::Dopusk => "dopusk",
            Derived::Final => "FINAL",
        }
    }
}

/// A gradable item: something that carries both a value and a flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Item {
    Week { week: u8, category: Category },
    Composite(Composite),
}

impl Item {
    /// Journal order: every week item, then the term composites.
    pub fn all() -> impl Iterator<Item = Item> {
        (1..=WEEK_COUNT)
            .flat_map(|week| {
                Category::ALL
                    .into_iter()
                    .map(move |category| Item::Week { week, category })
            })
            .chain(Composite::ALL.into_iter().map(Item::Composite))
    }

    pub fn week(week: u8, category: Category) -> Item {
        Item::Week { week, category }
    }
}

impl fmt::Display for Item {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Item::Week { week, category } => write!(f, "week{}_{}", week, category.as_str()),
            Item::Composite(c) => f.write_str(c.as_str()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum WorkKey {
    Value(Item),
    Flag(Item),
    Derived(Derived),
}

impl WorkKey {
    /// The complete fixed key set, in journal order.
    pub fn all() -> impl Iterator<Item = WorkKey> {
        Item::all()
            .flat_map(|item| [WorkKey::Flag(item), WorkKey::Value(item)])
            .chain(Derived::ALL.into_iter().map(WorkKey::Derived))
    }
}

impl fmt::Display for WorkKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkKey::Value(item) => write!(f, "{}", item),
            WorkKey::Flag(item) => write!(f, "{}{}", item, FLAG_SUFFIX),
            WorkKey::Derived(d) => f.write_str(d.as_str()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownWorkKey(pub String);

impl fmt::Display for UnknownWorkKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown work key: {:?}", self.0)
    }
}

impl std::error::Error for UnknownWorkKey {}

fn parse_item(raw: &str) -> Option<Item> {
    if let Some(c) = Composite::ALL.into_iter().find(|c| c.as_str() == raw) {
        return Some(Item::Composite(c));
    }
    let rest = raw.strip_prefix("week")?;
    let (week, category) = rest.split_once('_')?;
    // Reject "week01" and friends: the stored keys never carry leading zeros.
    if week.starts_with('0') {
        return None;
    }
    let week: u8 = week.parse().ok()?;
    if !(1..=WEEK_COUNT).contains(&week) {
        return None;
    }
    let category = Category::ALL
        .into_iter()
        .find(|c| c.as_str() == category)?;
    Some(Item::Week { week, category })
}

impl FromStr for WorkKey {
    type Err = UnknownWorkKey;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let key = normalize_key(s);
        if let Some(d) = Derived::ALL.into_iter().find(|d| d.as_str() == key) {
            return Ok(WorkKey::Derived(d));
        }
        let parsed = match key.strip_suffix(FLAG_SUFFIX) {
            Some(base) => parse_item(base).map(WorkKey::Flag),
            None => parse_item(&key).map(WorkKey::Value),
        };
        parsed.ok_or(UnknownWorkKey(key))
    }
}

/// Per-item state that governs how the item counts toward averages.
///
/// Stored flags are raw numbers; anything other than exactly 1 or 2 reads as
/// `Normal`, which is how out-of-range flag writes are tolerated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flag {
    Normal,
    Absent,
    Excluded,
}

impl Flag {
    pub fn from_raw(raw: f64) -> Flag {
        if raw == 1.0 {
            Flag::Absent
        } else if raw == 2.0 {
            Flag::Excluded
        } else {
            Flag::Normal
        }
    }

    pub fn to_raw(self) -> f64 {
        match self {
            Flag::Normal => 0.0,
            Flag::Absent => 1.0,
            Flag::Excluded => 2.0,
        }
    }
}

/// An item value with the absence sentinels made explicit. The numeric
/// sentinels only exist at the storage boundary.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Mark {
    Normal(f64),
    Absent,
    Excluded,
}

impl Mark {
    /// Setter semantics: any negative other than exactly -2 means absent,
    /// everything else is clamped onto the 0..=100 scale.
    pub fn from_input(value: f64) -> Mark {
        if value.is_nan() {
            Mark::Absent
        } else if value == EXCLUDED_SENTINEL {
            Mark::Excluded
        } else if value < 0.0 {
            Mark::Absent
        } else {
            Mark::Normal(value.min(100.0))
        }
    }

    pub fn to_stored(self) -> f64 {
        match self {
            Mark::Normal(v) => v,
            Mark::Absent => ABSENT_SENTINEL,
            Mark::Excluded => EXCLUDED_SENTINEL,
        }
    }

    pub fn for_flag(flag: Flag) -> Option<Mark> {
        match flag {
            Flag::Normal => None,
            Flag::Absent => Some(Mark::Absent),
            Flag::Excluded => Some(Mark::Excluded),
        }
    }
}
