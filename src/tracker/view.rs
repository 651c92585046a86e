use chrono::{DateTime, Datelike, Duration, Local, NaiveDate};
use serde::Serialize;

use std::collections::BTreeMap;

use super::data::*;
use super::gamification::{self, LevelProgress};
use super::state::Tracker;

#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct TaskView {
    #[serde(flatten)]
    pub task: Task,
    pub overdue: bool,
    pub due_today: bool,
}

#[derive(Serialize, Debug)]
pub struct WordRow {
    pub index: usize,
    pub word: String,
    pub translation: String,
}

#[derive(Serialize, Debug)]
pub struct LessonView {
    pub key: LessonKey,
    pub words: Vec<WordRow>,
}

#[derive(Serialize, Debug)]
pub struct ChapterView {
    pub key: ChapterImageKey,
    pub gospel: &'static str,
    pub chapter: u8,
    pub image: Option<String>,
    pub placeholder: Option<String>,
}

/// Everything a client needs to draw one screen.
#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct TrackerView {
    pub date: NaiveDate,
    pub date_label: Option<&'static str>,
    pub tasks: Vec<TaskView>,
    pub lesson: LessonView,
    pub game: LevelProgress,
    pub chapter: ChapterView,
}

#[derive(Serialize, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Statistics {
    pub completed_today: usize,
    pub completed_this_week: usize,
    pub overdue: usize,
    pub by_category: BTreeMap<String, usize>,
}

impl Tracker {
    pub fn tasks_on(&self, date: NaiveDate) -> Vec<&Task> {
        self.tasks().iter().filter(|t| t.deadline == date).collect()
    }

    pub fn view(
        &self,
        date: NaiveDate,
        lesson: LessonKey,
        chapter: ChapterImageKey,
        today: NaiveDate,
    ) -> TrackerView {
        let date_label = if date == today {
            Some("Today")
        } else if Some(date) == today.succ_opt() {
            Some("Tomorrow")
        } else {
            None
        };

        let tasks = self
            .tasks_on(date)
            .into_iter()
            .map(|task| TaskView {
                overdue: task.is_overdue(today),
                due_today: task.is_due_today(today),
                task: task.clone(),
            })
            .collect();

        let words = self
            .words(lesson)
            .iter()
            .enumerate()
            .map(|(index, entry)| WordRow {
                index,
                word: entry.word.clone(),
                translation: entry.translation.clone(),
            })
            .collect();

        let image = self.chapter_image(chapter).map(str::to_string);
        let placeholder = match image {
            Some(_) => None,
            None => Some(format!("Chapter {} image (add a photo)", chapter.chapter())),
        };

        TrackerView {
            date,
            date_label,
            tasks,
            lesson: LessonView { key: lesson, words },
            game: gamification::progress(self.game_stats()),
            chapter: ChapterView {
                key: chapter,
                gospel: chapter.gospel().name,
                chapter: chapter.chapter(),
                image,
                placeholder,
            },
        }
    }

    pub fn categories(&self) -> Vec<String> {
        let mut categories: Vec<String> = self
            .tasks()
            .iter()
            .filter(|t| !t.category.is_empty())
            .map(|t| t.category.clone())
            .collect();
        categories.sort();
        categories.dedup();
        categories
    }

    pub fn statistics(&self, now: DateTime<Local>) -> Statistics {
        let today = now.date_naive();
        let week_start = today - Duration::days(i64::from(today.weekday().num_days_from_monday()));

        let completed_on = |task: &Task| {
            task.completed_at
                .filter(|_| task.is_done())
                .map(|at| at.with_timezone(&Local).date_naive())
        };

        let mut by_category = BTreeMap::new();
        for task in self.tasks() {
            let category = if task.category.is_empty() {
                "Uncategorized".to_string()
            } else {
                task.category.clone()
            };
            *by_category.entry(category).or_insert(0) += 1;
        }

        Statistics {
            completed_today: self
                .tasks()
                .iter()
                .filter(|t| completed_on(*t) == Some(today))
                .count(),
            completed_this_week: self
                .tasks()
                .iter()
                .filter(|t| completed_on(*t).map_or(false, |d| d >= week_start && d <= today))
                .count(),
            overdue: self.tasks().iter().filter(|t| t.is_overdue(today)).count(),
            by_category,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::SqliteStore;
    use crate::sync::SyncHandle;
    use crate::tracker::state::Renderer;
    use chrono::TimeZone;

    struct Quiet;

    impl Renderer for Quiet {
        fn render(&self, _change: Change) {}
    }

    fn tracker_at(now: DateTime<Local>) -> Tracker {
        Tracker::load(
            Box::new(SqliteStore::open_in_memory().unwrap()),
            SyncHandle::Offline,
            Box::new(Quiet),
            now,
        )
        .unwrap()
    }

    fn fields(title: &str, deadline: NaiveDate, category: &str) -> TaskFields {
        TaskFields {
            title: title.to_string(),
            description: String::new(),
            deadline,
            priority: Priority::Medium,
            category: category.to_string(),
        }
    }

    #[test]
    fn view_filters_tasks_by_date_and_labels_it() {
        // Wednesday.
        let now = Local.with_ymd_and_hms(2024, 5, 15, 12, 0, 0).unwrap();
        let today = now.date_naive();
        let mut tracker = tracker_at(now);
        tracker
            .create_task(fields("Tomorrow's", today.succ_opt().unwrap(), ""), now)
            .unwrap();

        let view = tracker.view(today, LessonKey::default(), ChapterImageKey::default(), today);
        assert_eq!(view.date_label, Some("Today"));
        assert_eq!(view.tasks.len(), 2);
        assert!(view.tasks.iter().all(|t| t.due_today && !t.overdue));

        let tomorrow = today.succ_opt().unwrap();
        let view = tracker.view(tomorrow, LessonKey::default(), ChapterImageKey::default(), today);
        assert_eq!(view.date_label, Some("Tomorrow"));
        assert_eq!(view.tasks.len(), 1);

        let later = view.tasks[0].task.id;
        assert_eq!(later, 3);
    }

    #[test]
    fn view_shows_placeholder_until_an_image_is_set() {
        let now = Local.with_ymd_and_hms(2024, 5, 15, 12, 0, 0).unwrap();
        let today = now.date_naive();
        let mut tracker = tracker_at(now);
        let chapter = ChapterImageKey::new(1, 5).unwrap();

        let view = tracker.view(today, LessonKey::default(), chapter, today);
        assert_eq!(view.chapter.gospel, "Gospel of Matthew");
        assert!(view.chapter.image.is_none());
        assert_eq!(view.chapter.placeholder.as_deref(), Some("Chapter 5 image (add a photo)"));

        tracker
            .set_chapter_image(chapter, "data:image/png;base64,AA==".into())
            .unwrap();
        let view = tracker.view(today, LessonKey::default(), chapter, today);
        assert!(view.chapter.placeholder.is_none());
        assert!(view.chapter.image.is_some());
    }

    #[test]
    fn view_numbers_lesson_words() {
        let now = Local.with_ymd_and_hms(2024, 5, 15, 12, 0, 0).unwrap();
        let today = now.date_naive();
        let mut tracker = tracker_at(now);
        let lesson: LessonKey = "C1.3".parse().unwrap();
        tracker.add_word(lesson, "brisk", "бодрый").unwrap();
        tracker.add_word(lesson, "dwell", "жить").unwrap();

        let view = tracker.view(today, lesson, ChapterImageKey::default(), today);
        let rows: Vec<(usize, &str)> = view
            .lesson
            .words
            .iter()
            .map(|w| (w.index, w.word.as_str()))
            .collect();
        assert_eq!(rows, vec![(0, "brisk"), (1, "dwell")]);
        assert_eq!(view.game.level, 1);
        assert_eq!(view.game.xp_for_level, 10);
    }

    #[test]
    fn categories_are_sorted_and_distinct() {
        let now = Local.with_ymd_and_hms(2024, 5, 15, 12, 0, 0).unwrap();
        let mut tracker = tracker_at(now);
        tracker
            .create_task(fields("Gym", now.date_naive(), "Health"), now)
            .unwrap();
        tracker
            .create_task(fields("Misc", now.date_naive(), ""), now)
            .unwrap();

        assert_eq!(tracker.categories(), vec!["English", "Health", "Prayer"]);
    }

    #[test]
    fn statistics_count_completions_and_overdue_tasks() {
        let monday = Local.with_ymd_and_hms(2024, 5, 13, 9, 0, 0).unwrap();
        let wednesday = Local.with_ymd_and_hms(2024, 5, 15, 18, 0, 0).unwrap();
        let mut tracker = tracker_at(monday);

        tracker.set_task_status(1, true, monday).unwrap();
        tracker.set_task_status(2, true, wednesday).unwrap();
        tracker
            .create_task(fields("Late", monday.date_naive(), ""), monday)
            .unwrap();

        let stats = tracker.statistics(wednesday);
        assert_eq!(stats.completed_today, 1);
        assert_eq!(stats.completed_this_week, 2);
        assert_eq!(stats.overdue, 1);
        assert_eq!(stats.by_category.get("Uncategorized"), Some(&1));
        assert_eq!(stats.by_category.get("Prayer"), Some(&1));
    }
}
