use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Deserializer, Serialize};

use std::collections::BTreeMap;
use std::convert::TryFrom;
use std::fmt;
use std::str::FromStr;

pub type TaskID = i64;

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(try_from = "u8", into = "u8")]
pub enum Priority {
    Low,
    Medium,
    High,
}

impl TryFrom<u8> for Priority {
    type Error = String;

    fn try_from(value: u8) -> Result<Priority, String> {
        match value {
            0 => Ok(Priority::Low),
            1 => Ok(Priority::Medium),
            2 => Ok(Priority::High),
            other => Err(format!("unknown priority {}", other)),
        }
    }
}

impl From<Priority> for u8 {
    fn from(priority: Priority) -> u8 {
        match priority {
            Priority::Low => 0,
            Priority::Medium => 1,
            Priority::High => 2,
        }
    }
}

impl Default for Priority {
    fn default() -> Priority {
        Priority::Medium
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(try_from = "u8", into = "u8")]
pub enum TaskStatus {
    Open,
    Done,
}

impl TryFrom<u8> for TaskStatus {
    type Error = String;

    fn try_from(value: u8) -> Result<TaskStatus, String> {
        match value {
            0 => Ok(TaskStatus::Open),
            1 => Ok(TaskStatus::Done),
            other => Err(format!("unknown task status {}", other)),
        }
    }
}

impl From<TaskStatus> for u8 {
    fn from(status: TaskStatus) -> u8 {
        match status {
            TaskStatus::Open => 0,
            TaskStatus::Done => 1,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: TaskID,
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub deadline: NaiveDate,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default)]
    pub category: String,
    pub status: TaskStatus,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
}

impl Task {
    pub fn is_done(&self) -> bool {
        self.status == TaskStatus::Done
    }

    pub fn is_overdue(&self, today: NaiveDate) -> bool {
        !self.is_done() && self.deadline < today
    }

    pub fn is_due_today(&self, today: NaiveDate) -> bool {
        !self.is_done() && self.deadline == today
    }
}

/// Editable fields of a task, shared by creation and update.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct TaskFields {
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub deadline: NaiveDate,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default)]
    pub category: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum CefrLevel {
    A1,
    A2,
    B1,
    B2,
    C1,
}

impl CefrLevel {
    pub const ALL: [CefrLevel; 5] = [
        CefrLevel::A1,
        CefrLevel::A2,
        CefrLevel::B1,
        CefrLevel::B2,
        CefrLevel::C1,
    ];

    pub fn name(self) -> &'static str {
        match self {
            CefrLevel::A1 => "A1",
            CefrLevel::A2 => "A2",
            CefrLevel::B1 => "B1",
            CefrLevel::B2 => "B2",
            CefrLevel::C1 => "C1",
        }
    }
}

pub const LESSONS_PER_LEVEL: u8 = 50;

/// Addresses one vocabulary lesson, written as `A1.1` … `C1.50`.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(try_from = "String", into = "String")]
pub struct LessonKey {
    level: CefrLevel,
    lesson: u8,
}

impl LessonKey {
    pub fn new(level: CefrLevel, lesson: u8) -> Option<LessonKey> {
        if (1..=LESSONS_PER_LEVEL).contains(&lesson) {
            Some(LessonKey { level, lesson })
        } else {
            None
        }
    }

    pub fn level(&self) -> CefrLevel {
        self.level
    }

    pub fn lesson(&self) -> u8 {
        self.lesson
    }
}

impl Default for LessonKey {
    fn default() -> LessonKey {
        LessonKey {
            level: CefrLevel::A1,
            lesson: 1,
        }
    }
}

impl fmt::Display for LessonKey {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}.{}", self.level.name(), self.lesson)
    }
}

impl FromStr for LessonKey {
    type Err = String;

    fn from_str(s: &str) -> Result<LessonKey, String> {
        let (level, lesson) = s
            .split_once('.')
            .ok_or_else(|| format!("invalid lesson key {:?}", s))?;
        let level = CefrLevel::ALL
            .iter()
            .copied()
            .find(|l| l.name() == level)
            .ok_or_else(|| format!("unknown level in lesson key {:?}", s))?;
        let lesson = lesson
            .parse::<u8>()
            .map_err(|_| format!("invalid lesson number in {:?}", s))?;

        LessonKey::new(level, lesson).ok_or_else(|| format!("lesson out of range in {:?}", s))
    }
}

impl TryFrom<String> for LessonKey {
    type Error = String;

    fn try_from(value: String) -> Result<LessonKey, String> {
        value.parse()
    }
}

impl From<LessonKey> for String {
    fn from(key: LessonKey) -> String {
        key.to_string()
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct VocabularyEntry {
    pub word: String,
    #[serde(default)]
    pub translation: String,
}

pub type Vocabulary = BTreeMap<LessonKey, Vec<VocabularyEntry>>;

pub struct Gospel {
    pub name: &'static str,
    pub chapters: u8,
}

pub const GOSPELS: [Gospel; 4] = [
    Gospel {
        name: "Gospel of Mark",
        chapters: 16,
    },
    Gospel {
        name: "Gospel of Matthew",
        chapters: 28,
    },
    Gospel {
        name: "Gospel of Luke",
        chapters: 24,
    },
    Gospel {
        name: "Gospel of John",
        chapters: 21,
    },
];

/// Addresses one gospel chapter, written as `<gospel>_<chapter>`.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(try_from = "String", into = "String")]
pub struct ChapterImageKey {
    gospel: u8,
    chapter: u8,
}

impl ChapterImageKey {
    pub fn new(gospel: u8, chapter: u8) -> Option<ChapterImageKey> {
        let chapters = GOSPELS.get(usize::from(gospel))?.chapters;
        if (1..=chapters).contains(&chapter) {
            Some(ChapterImageKey { gospel, chapter })
        } else {
            None
        }
    }

    pub fn gospel(&self) -> &'static Gospel {
        // `new` only admits indexes inside GOSPELS.
        &GOSPELS[usize::from(self.gospel)]
    }

    pub fn chapter(&self) -> u8 {
        self.chapter
    }
}

impl Default for ChapterImageKey {
    fn default() -> ChapterImageKey {
        ChapterImageKey {
            gospel: 0,
            chapter: 1,
        }
    }
}

impl fmt::Display for ChapterImageKey {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}_{}", self.gospel, self.chapter)
    }
}

impl FromStr for ChapterImageKey {
    type Err = String;

    fn from_str(s: &str) -> Result<ChapterImageKey, String> {
        let (gospel, chapter) = s
            .split_once('_')
            .ok_or_else(|| format!("invalid chapter key {:?}", s))?;
        let gospel = gospel
            .parse::<u8>()
            .map_err(|_| format!("invalid gospel index in {:?}", s))?;
        let chapter = chapter
            .parse::<u8>()
            .map_err(|_| format!("invalid chapter number in {:?}", s))?;

        ChapterImageKey::new(gospel, chapter)
            .ok_or_else(|| format!("chapter out of range in {:?}", s))
    }
}

impl TryFrom<String> for ChapterImageKey {
    type Error = String;

    fn try_from(value: String) -> Result<ChapterImageKey, String> {
        value.parse()
    }
}

impl From<ChapterImageKey> for String {
    fn from(key: ChapterImageKey) -> String {
        key.to_string()
    }
}

pub type ChapterImages = BTreeMap<ChapterImageKey, String>;

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct GameStats {
    pub xp: u64,
    pub level: u32,
    pub streak: u32,
    #[serde(deserialize_with = "lenient_date")]
    pub last_completed_date: Option<NaiveDate>,
}

impl Default for GameStats {
    fn default() -> GameStats {
        GameStats {
            xp: 0,
            level: 1,
            streak: 0,
            last_completed_date: None,
        }
    }
}

/// Older documents store a missing date as `""`.
fn lenient_date<'de, D>(deserializer: D) -> Result<Option<NaiveDate>, D::Error>
where
    D: Deserializer<'de>,
{
    let text: Option<String> = Option::deserialize(deserializer)?;
    Ok(text.and_then(|t| NaiveDate::parse_from_str(&t, "%Y-%m-%d").ok()))
}

/// The full synchronisable state: every collection plus the id counter.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    pub tasks: Vec<Task>,
    pub english: Vocabulary,
    pub game_stats: GameStats,
    pub prayer_images: ChapterImages,
    pub next_id: TaskID,
}

/// What changed, as reported to the renderer.
#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum Change {
    Tasks,
    Vocabulary,
    GameStats,
    ChapterImages,
    Everything,
}

#[derive(Deserialize, Debug)]
pub struct SetTaskRequest {
    pub task_id: TaskID,
    pub task: TaskFields,
}

#[derive(Deserialize, Debug)]
pub struct SetTaskStatusRequest {
    pub task_id: TaskID,
    pub done: bool,
}

#[derive(Deserialize, Debug)]
pub struct AddWordRequest {
    pub lesson: LessonKey,
    pub word: String,
    #[serde(default)]
    pub translation: String,
}

#[derive(Deserialize, Debug)]
pub struct RemoveWordRequest {
    pub lesson: LessonKey,
    pub index: usize,
}
