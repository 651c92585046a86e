use chrono::{DateTime, Local, Utc};
use serde::Serialize;
use serde_json::{Map, Value};

use crate::internal_error::{InternalError, InternalResult};
use crate::store::{self, Store};
use crate::sync::SyncHandle;

use super::data::*;
use super::decode;
use super::gamification;
use super::ids::{self, IdAllocator};

/// Receives a notification after every change so views can be redrawn.
pub trait Renderer: Send {
    fn render(&self, change: Change);
}

/// Which collections a document replaced.
#[derive(Serialize, Debug, Default, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Applied {
    pub tasks: bool,
    pub english: bool,
    pub game_stats: bool,
    pub prayer_images: bool,
    pub next_id: bool,
}

impl Applied {
    pub fn any(&self) -> bool {
        self.tasks || self.english || self.game_stats || self.prayer_images || self.next_id
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteOutcome {
    /// The remote document was empty and was seeded with local state.
    Seeded,
    Merged(Applied),
}

/// Owns every collection. Each mutation persists the touched collection,
/// queues a push to the remote and notifies the renderer, in that order.
pub struct Tracker {
    store: Box<dyn Store>,
    ids: IdAllocator,
    tasks: Vec<Task>,
    english: Vocabulary,
    game_stats: GameStats,
    prayer_images: ChapterImages,
    sync: SyncHandle,
    renderer: Box<dyn Renderer>,
}

impl Tracker {
    pub fn load(
        store: Box<dyn Store>,
        sync: SyncHandle,
        renderer: Box<dyn Renderer>,
        now: DateTime<Local>,
    ) -> InternalResult<Tracker> {
        let tasks = read(&*store, store::TASKS, decode::tasks)?.unwrap_or_default();
        let english = read(&*store, store::ENGLISH, decode::vocabulary)?.unwrap_or_default();
        let game_stats = read(&*store, store::GAME_STATS, decode::game_stats)?.unwrap_or_default();
        let prayer_images =
            read(&*store, store::PRAYER_IMAGES, decode::chapter_images)?.unwrap_or_default();
        let ids = IdAllocator::load(&*store)?;

        let mut tracker = Tracker {
            store,
            ids,
            tasks,
            english,
            game_stats,
            prayer_images,
            sync,
            renderer,
        };

        let next = tracker.ids.settle(tracker.ids.peek(), tracker.max_task_id());
        if next != tracker.ids.peek() {
            tracing::warn!(next_id = next, "stored id counter was behind the tasks");
            tracker.commit_next_id(next)?;
        }

        if tracker.tasks.is_empty() {
            tracker.seed(now)?;
        }

        tracing::info!(
            tasks = tracker.tasks.len(),
            lessons = tracker.english.len(),
            images = tracker.prayer_images.len(),
            next_id = tracker.ids.peek(),
            "tracker state loaded"
        );

        Ok(tracker)
    }

    fn seed(&mut self, now: DateTime<Local>) -> InternalResult<()> {
        let today = now.date_naive();
        let created_at = now.with_timezone(&Utc);

        let starters = [
            TaskFields {
                title: "English".to_string(),
                description: "English practice: words, grammar or reading".to_string(),
                deadline: today,
                priority: Priority::Medium,
                category: "English".to_string(),
            },
            TaskFields {
                title: "Prayer".to_string(),
                description: "Morning or evening prayer".to_string(),
                deadline: today,
                priority: Priority::High,
                category: "Prayer".to_string(),
            },
        ];

        let mut tasks = self.tasks.clone();
        for fields in starters {
            let id = self.ids.next(&mut *self.store)?;
            tasks.push(new_task(id, fields, created_at));
        }
        self.commit_tasks(tasks)?;

        tracing::info!("seeded starter tasks");
        self.changed(Change::Tasks);

        Ok(())
    }

    pub fn tasks(&self) -> &[Task] {
        &self.tasks
    }

    pub fn task(&self, task_id: TaskID) -> Option<&Task> {
        self.tasks.iter().find(|t| t.id == task_id)
    }

    pub fn english(&self) -> &Vocabulary {
        &self.english
    }

    pub fn words(&self, lesson: LessonKey) -> &[VocabularyEntry] {
        self.english.get(&lesson).map_or(&[], |words| words.as_slice())
    }

    pub fn game_stats(&self) -> &GameStats {
        &self.game_stats
    }

    pub fn prayer_images(&self) -> &ChapterImages {
        &self.prayer_images
    }

    pub fn chapter_image(&self, chapter: ChapterImageKey) -> Option<&str> {
        self.prayer_images.get(&chapter).map(String::as_str)
    }

    pub fn next_id(&self) -> TaskID {
        self.ids.peek()
    }

    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            tasks: self.tasks.clone(),
            english: self.english.clone(),
            game_stats: self.game_stats.clone(),
            prayer_images: self.prayer_images.clone(),
            next_id: self.ids.peek(),
        }
    }

    pub fn create_task(&mut self, fields: TaskFields, now: DateTime<Local>) -> InternalResult<Task> {
        let fields = clean_fields(fields)?;
        let id = self.ids.next(&mut *self.store)?;
        let task = new_task(id, fields, now.with_timezone(&Utc));

        let mut tasks = self.tasks.clone();
        tasks.push(task.clone());
        self.commit_tasks(tasks)?;
        self.changed(Change::Tasks);

        tracing::debug!(task_id = id, "task created");
        Ok(task)
    }

    pub fn update_task(&mut self, task_id: TaskID, fields: TaskFields) -> InternalResult<Task> {
        let fields = clean_fields(fields)?;
        let mut tasks = self.tasks.clone();
        let task = task_mut(&mut tasks, task_id)?;

        task.title = fields.title;
        task.description = fields.description;
        task.deadline = fields.deadline;
        task.priority = fields.priority;
        task.category = fields.category;
        let task = task.clone();

        self.commit_tasks(tasks)?;
        self.changed(Change::Tasks);

        Ok(task)
    }

    /// Marks a task done or open. Only the open-to-done transition counts
    /// towards XP and streak.
    ///
    /// When the task is saved but the stats are not, the saved task is still
    /// pushed and rendered before the error is returned.
    pub fn set_task_status(
        &mut self,
        task_id: TaskID,
        done: bool,
        now: DateTime<Local>,
    ) -> InternalResult<Task> {
        let mut tasks = self.tasks.clone();
        let task = task_mut(&mut tasks, task_id)?;
        if task.is_done() == done {
            return Ok(task.clone());
        }

        if done {
            task.status = TaskStatus::Done;
            task.completed_at = Some(now.with_timezone(&Utc));
        } else {
            task.status = TaskStatus::Open;
            task.completed_at = None;
        }
        let task = task.clone();
        self.commit_tasks(tasks)?;

        let stats_changed = if done {
            let stats = gamification::apply_completion(&self.game_stats, now.date_naive());
            self.commit_game_stats(stats)
        } else {
            Ok(false)
        };

        self.push_remote();
        self.renderer.render(Change::Tasks);
        if stats_changed? {
            self.renderer.render(Change::GameStats);
        }

        Ok(task)
    }

    pub fn add_word(
        &mut self,
        lesson: LessonKey,
        word: &str,
        translation: &str,
    ) -> InternalResult<VocabularyEntry> {
        let word = word.trim();
        if word.is_empty() {
            return Err(InternalError::bad_request("Word must not be empty"));
        }

        let entry = VocabularyEntry {
            word: word.to_string(),
            translation: translation.trim().to_string(),
        };
        let mut english = self.english.clone();
        english.entry(lesson).or_default().push(entry.clone());
        self.commit_english(english)?;
        self.changed(Change::Vocabulary);

        Ok(entry)
    }

    /// Removes the word at `index`. A stale index leaves the lesson as it is
    /// and returns `None`.
    pub fn remove_word(
        &mut self,
        lesson: LessonKey,
        index: usize,
    ) -> InternalResult<Option<VocabularyEntry>> {
        let mut english = self.english.clone();
        let removed = match english.get_mut(&lesson) {
            Some(words) if index < words.len() => words.remove(index),
            _ => {
                tracing::debug!(lesson = %lesson, index, "ignoring stale word index");
                return Ok(None);
            }
        };

        self.commit_english(english)?;
        self.changed(Change::Vocabulary);

        Ok(Some(removed))
    }

    pub fn set_chapter_image(
        &mut self,
        chapter: ChapterImageKey,
        data_uri: String,
    ) -> InternalResult<()> {
        // Images are large; patch in place and undo on failure instead of
        // copying the whole map.
        let previous = self.prayer_images.insert(chapter, data_uri);
        if let Err(e) = save(&mut *self.store, store::PRAYER_IMAGES, &self.prayer_images) {
            match previous {
                Some(image) => self.prayer_images.insert(chapter, image),
                None => self.prayer_images.remove(&chapter),
            };
            return Err(e);
        }
        self.changed(Change::ChapterImages);

        Ok(())
    }

    /// Replaces every collection that `document` carries in the expected
    /// shape and that differs from the local copy. Persists what it
    /// replaced; pushing and rendering are left to the caller.
    pub fn apply_document(&mut self, document: &Map<String, Value>) -> InternalResult<Applied> {
        let mut applied = Applied::default();

        if let Some(tasks) = field(document, "tasks", decode::tasks) {
            if tasks != self.tasks {
                self.commit_tasks(tasks)?;
                applied.tasks = true;
            }
        }

        if let Some(english) = field(document, "english", decode::vocabulary) {
            if english != self.english {
                self.commit_english(english)?;
                applied.english = true;
            }
        }

        if let Some(stats) = field(document, "gameStats", decode::game_stats) {
            applied.game_stats = self.commit_game_stats(stats)?;
        }

        if let Some(images) = field(document, "prayerImages", decode::chapter_images) {
            if images != self.prayer_images {
                save(&mut *self.store, store::PRAYER_IMAGES, &images)?;
                self.prayer_images = images;
                applied.prayer_images = true;
            }
        }

        let candidate = field(document, "nextId", ids::decode_counter).unwrap_or(self.ids.peek());
        let next = self.ids.settle(candidate, self.max_task_id());
        if next != self.ids.peek() {
            self.commit_next_id(next)?;
            applied.next_id = true;
        }

        Ok(applied)
    }

    /// Handles one remote change notification. An empty remote document is
    /// seeded with the local state; anything else is merged field by field
    /// and never pushed back.
    pub fn receive_remote(&mut self, document: Option<&Value>) -> InternalResult<RemoteOutcome> {
        let document = match document {
            None | Some(Value::Null) => {
                tracing::info!("remote document is empty, seeding it with local state");
                self.push_remote();
                return Ok(RemoteOutcome::Seeded);
            }
            Some(document) => document,
        };

        let Some(document) = document.as_object() else {
            tracing::warn!("remote document is not an object, ignoring it");
            return Ok(RemoteOutcome::Merged(Applied::default()));
        };

        let applied = self.apply_document(document)?;
        if applied.any() {
            tracing::info!(?applied, "merged remote changes");
            self.renderer.render(Change::Everything);
        }

        Ok(RemoteOutcome::Merged(applied))
    }

    /// Pushes and re-renders after a local bulk replacement such as an import.
    pub fn publish(&self) {
        self.changed(Change::Everything);
    }

    fn changed(&self, change: Change) {
        self.push_remote();
        self.renderer.render(change);
    }

    fn push_remote(&self) {
        if !self.sync.is_online() {
            return;
        }

        if let Err(e) = self.sync.push(self.snapshot()) {
            tracing::warn!(error = %e, "could not queue snapshot for the remote");
        }
    }

    fn max_task_id(&self) -> Option<TaskID> {
        self.tasks.iter().map(|t| t.id).max()
    }

    // Each commit persists first and only then replaces the in-memory copy,
    // so a failed write leaves memory matching the store.

    fn commit_tasks(&mut self, tasks: Vec<Task>) -> InternalResult<()> {
        save(&mut *self.store, store::TASKS, &tasks)?;
        self.tasks = tasks;
        Ok(())
    }

    fn commit_english(&mut self, english: Vocabulary) -> InternalResult<()> {
        save(&mut *self.store, store::ENGLISH, &english)?;
        self.english = english;
        Ok(())
    }

    /// Returns whether the stats actually changed.
    fn commit_game_stats(&mut self, stats: GameStats) -> InternalResult<bool> {
        if stats == self.game_stats {
            return Ok(false);
        }

        save(&mut *self.store, store::GAME_STATS, &stats)?;
        if stats.level > self.game_stats.level {
            tracing::info!(level = stats.level, "level up");
        }
        self.game_stats = stats;
        Ok(true)
    }

    fn commit_next_id(&mut self, next: TaskID) -> InternalResult<()> {
        save(&mut *self.store, store::NEXT_ID, &next)?;
        self.ids.set(next);
        Ok(())
    }

}

fn save<T: Serialize>(store: &mut dyn Store, key: &str, value: &T) -> InternalResult<()> {
    let value = serde_json::to_value(value)?;
    store.set(key, &value)
}

fn task_mut(tasks: &mut [Task], task_id: TaskID) -> InternalResult<&mut Task> {
    tasks
        .iter_mut()
        .find(|t| t.id == task_id)
        .ok_or_else(|| InternalError::not_found(format!("No task with id {}", task_id)))
}

fn read<T>(
    store: &dyn Store,
    key: &str,
    decode: fn(&Value) -> Option<T>,
) -> InternalResult<Option<T>> {
    let Some(value) = store.get(key)? else {
        return Ok(None);
    };

    let decoded = decode(&value);
    if decoded.is_none() {
        tracing::warn!(key, "stored collection has the wrong shape, using the default");
    }

    Ok(decoded)
}

fn field<T>(
    document: &Map<String, Value>,
    name: &str,
    decode: fn(&Value) -> Option<T>,
) -> Option<T> {
    let value = document.get(name)?;
    let decoded = decode(value);
    if decoded.is_none() {
        tracing::warn!(field = name, "ignoring field with unexpected shape");
    }

    decoded
}

fn clean_fields(fields: TaskFields) -> InternalResult<TaskFields> {
    let title = fields.title.trim().to_string();
    if title.is_empty() {
        return Err(InternalError::bad_request("Task title must not be empty"));
    }

    Ok(TaskFields {
        title,
        description: fields.description.trim().to_string(),
        category: fields.category.trim().to_string(),
        ..fields
    })
}

fn new_task(id: TaskID, fields: TaskFields, created_at: DateTime<Utc>) -> Task {
    Task {
        id,
        title: fields.title,
        description: fields.description,
        deadline: fields.deadline,
        priority: fields.priority,
        category: fields.category,
        status: TaskStatus::Open,
        created_at,
        completed_at: None,
    }
}
