use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chrono::{Local, NaiveDate};
use rocket::data::Data;
use rocket::http::ContentType;
use rocket::serde::json::{self, Json};
use rocket::{get, post, State};
use rocket_multipart_form_data::{
    mime, MultipartFormData, MultipartFormDataField, MultipartFormDataOptions,
};

use std::str::FromStr;

use crate::data::SharedTracker;
use crate::internal_error::{InternalError, InternalResult};

use super::data::*;
use super::view::{Statistics, TrackerView};

type Body<'r, T> = Result<Json<T>, json::Error<'r>>;

fn body<T>(request: Body<'_, T>) -> InternalResult<T> {
    request
        .map(Json::into_inner)
        .map_err(|e| InternalError::bad_request(e.to_string()))
}

fn param<T: FromStr<Err = String> + Default>(value: Option<&str>) -> InternalResult<T> {
    value
        .map_or(Ok(T::default()), str::parse)
        .map_err(InternalError::bad_request)
}

fn date_param(value: Option<&str>, today: NaiveDate) -> InternalResult<NaiveDate> {
    match value {
        None => Ok(today),
        Some(text) => NaiveDate::parse_from_str(text, "%Y-%m-%d")
            .map_err(|_| InternalError::bad_request(format!("Invalid date {:?}", text))),
    }
}

#[get("/tasks?<date>")]
pub fn get_tasks(
    date: Option<&str>,
    tracker: &State<SharedTracker>,
) -> InternalResult<Json<Vec<Task>>> {
    let tracker = tracker.lock()?;

    let tasks = match date {
        Some(_) => {
            let date = date_param(date, Local::now().date_naive())?;
            tracker.tasks_on(date).into_iter().cloned().collect()
        }
        None => tracker.tasks().to_vec(),
    };

    Ok(Json(tasks))
}

#[get("/categories")]
pub fn get_categories(tracker: &State<SharedTracker>) -> InternalResult<Json<Vec<String>>> {
    let tracker = tracker.lock()?;
    Ok(Json(tracker.categories()))
}

#[get("/stats")]
pub fn get_statistics(tracker: &State<SharedTracker>) -> InternalResult<Json<Statistics>> {
    let tracker = tracker.lock()?;
    Ok(Json(tracker.statistics(Local::now())))
}

#[get("/view?<date>&<lesson>&<chapter>")]
pub fn get_view(
    date: Option<&str>,
    lesson: Option<&str>,
    chapter: Option<&str>,
    tracker: &State<SharedTracker>,
) -> InternalResult<Json<TrackerView>> {
    let today = Local::now().date_naive();
    let date = date_param(date, today)?;
    let lesson: LessonKey = param(lesson)?;
    let chapter: ChapterImageKey = param(chapter)?;

    let tracker = tracker.lock()?;
    Ok(Json(tracker.view(date, lesson, chapter, today)))
}

#[post("/add_task", format = "json", data = "<task>")]
pub fn add_task(
    task: Body<'_, TaskFields>,
    tracker: &State<SharedTracker>,
) -> InternalResult<Json<Task>> {
    let task = body(task)?;
    let mut tracker = tracker.lock()?;

    tracker.create_task(task, Local::now()).map(Json)
}

#[post("/set_task", format = "json", data = "<set_task_request>")]
pub fn set_task(
    set_task_request: Body<'_, SetTaskRequest>,
    tracker: &State<SharedTracker>,
) -> InternalResult<Json<Task>> {
    let SetTaskRequest { task_id, task } = body(set_task_request)?;
    let mut tracker = tracker.lock()?;

    tracker.update_task(task_id, task).map(Json)
}

#[post("/set_task_status", format = "json", data = "<set_task_status_request>")]
pub fn set_task_status(
    set_task_status_request: Body<'_, SetTaskStatusRequest>,
    tracker: &State<SharedTracker>,
) -> InternalResult<Json<Task>> {
    let request = body(set_task_status_request)?;
    let mut tracker = tracker.lock()?;

    tracker
        .set_task_status(request.task_id, request.done, Local::now())
        .map(Json)
}

#[post("/add_word", format = "json", data = "<add_word_request>")]
pub fn add_word(
    add_word_request: Body<'_, AddWordRequest>,
    tracker: &State<SharedTracker>,
) -> InternalResult<Json<VocabularyEntry>> {
    let request = body(add_word_request)?;
    let mut tracker = tracker.lock()?;

    tracker
        .add_word(request.lesson, &request.word, &request.translation)
        .map(Json)
}

#[post("/remove_word", format = "json", data = "<remove_word_request>")]
pub fn remove_word(
    remove_word_request: Body<'_, RemoveWordRequest>,
    tracker: &State<SharedTracker>,
) -> InternalResult<Json<VocabularyEntry>> {
    let request = body(remove_word_request)?;
    let mut tracker = tracker.lock()?;

    tracker
        .remove_word(request.lesson, request.index)?
        .map(Json)
        .ok_or_else(|| {
            InternalError::not_found(format!(
                "No word at index {} in lesson {}",
                request.index, request.lesson
            ))
        })
}

const MAX_IMAGE_SIZE_MIB: u64 = 8;

#[post("/upload_chapter_image/<key>", data = "<data>")]
pub async fn upload_chapter_image(
    key: &str,
    content_type: &ContentType,
    data: Data<'_>,
    tracker: &State<SharedTracker>,
) -> InternalResult<Json<ChapterImageKey>> {
    let chapter: ChapterImageKey = key.parse().map_err(InternalError::bad_request)?;

    let options = MultipartFormDataOptions::with_multipart_form_data_fields(vec![
        MultipartFormDataField::raw("image")
            .size_limit(MAX_IMAGE_SIZE_MIB * 1024 * 1024)
            .content_type(Some(mime::IMAGE_STAR)),
    ]);
    let mut form = MultipartFormData::parse(content_type, data, options).await?;

    let image = form
        .raw
        .remove("image")
        .and_then(|mut fields| fields.pop())
        .ok_or_else(|| InternalError::bad_request("Missing image field"))?;
    let mime_type = image
        .content_type
        .as_ref()
        .map_or("image/jpeg", |m| m.essence_str())
        .to_string();
    let data_uri = format!("data:{};base64,{}", mime_type, STANDARD.encode(&image.raw));

    tracing::debug!(chapter = %chapter, bytes = image.raw.len(), "storing chapter image");
    store_image(tracker, chapter, data_uri)?;

    Ok(Json(chapter))
}

fn store_image(
    tracker: &SharedTracker,
    chapter: ChapterImageKey,
    data_uri: String,
) -> InternalResult<()> {
    let mut tracker = tracker.lock()?;
    tracker.set_chapter_image(chapter, data_uri)
}
