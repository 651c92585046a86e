//! Tolerant decoding of collections that arrive as loose JSON: from the
//! local store, from the remote document, or from a backup file.
//!
//! The JSON type of a field decides whether it is applied at all (`None`
//! means "leave the local copy alone"). Inside an accepted collection,
//! elements that do not decode are dropped with a warning.

use serde_json::Value;

use std::collections::HashSet;

use super::data::{ChapterImageKey, ChapterImages, GameStats, LessonKey, Task, Vocabulary, VocabularyEntry};
use super::gamification;
use super::ids;

pub fn tasks(value: &Value) -> Option<Vec<Task>> {
    let items = value.as_array()?;
    let mut seen = HashSet::new();
    let mut tasks = Vec::with_capacity(items.len());

    for item in items {
        let task = match serde_json::from_value::<Task>(item.clone()) {
            Ok(task) => task,
            Err(e) => {
                tracing::warn!(error = %e, "skipping malformed task");
                continue;
            }
        };

        if !ids::is_valid_id(task.id) {
            tracing::warn!(task_id = task.id, "skipping task with out-of-range id");
        } else if !seen.insert(task.id) {
            tracing::warn!(task_id = task.id, "skipping task with duplicate id");
        } else {
            tasks.push(task);
        }
    }

    Some(tasks)
}

pub fn vocabulary(value: &Value) -> Option<Vocabulary> {
    let lessons = value.as_object()?;
    let mut english = Vocabulary::new();

    for (key, words) in lessons {
        let lesson: LessonKey = match key.parse() {
            Ok(lesson) => lesson,
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "skipping unknown lesson");
                continue;
            }
        };

        match serde_json::from_value::<Vec<VocabularyEntry>>(words.clone()) {
            Ok(words) => {
                english.insert(lesson, words);
            }
            Err(e) => tracing::warn!(key = %key, error = %e, "skipping malformed lesson words"),
        }
    }

    Some(english)
}

pub fn game_stats(value: &Value) -> Option<GameStats> {
    if !value.is_object() {
        return None;
    }

    match serde_json::from_value::<GameStats>(value.clone()) {
        Ok(stats) => Some(gamification::normalize(stats)),
        Err(e) => {
            tracing::warn!(error = %e, "ignoring malformed game stats");
            None
        }
    }
}

pub fn chapter_images(value: &Value) -> Option<ChapterImages> {
    let entries = value.as_object()?;
    let mut images = ChapterImages::new();

    for (key, image) in entries {
        let chapter: ChapterImageKey = match key.parse() {
            Ok(chapter) => chapter,
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "skipping unknown chapter");
                continue;
            }
        };

        match image.as_str() {
            Some(data) => {
                images.insert(chapter, data.to_string());
            }
            None => tracing::warn!(key = %key, "skipping chapter image that is not a string"),
        }
    }

    Some(images)
}
