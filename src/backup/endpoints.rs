use chrono::{Local, Utc};
use rocket::data::{Data, ToByteUnit};
use rocket::http::Header;
use rocket::serde::json::Json;
use rocket::{get, post, Responder, State};

use crate::data::SharedTracker;
use crate::internal_error::{InternalError, InternalResult};
use crate::tracker::Applied;

use super::codec::{self, BackupError};

const MAX_BACKUP_SIZE_MIB: usize = 64;

#[derive(Responder)]
#[response(content_type = "json")]
pub struct BackupDownload {
    body: String,
    disposition: Header<'static>,
}

#[get("/backup")]
pub fn download_backup(tracker: &State<SharedTracker>) -> InternalResult<BackupDownload> {
    let tracker = tracker.lock()?;

    let now = Utc::now();
    let document = codec::export(&tracker, now);
    let body = serde_json::to_string_pretty(&document)?;
    let file_name = codec::file_name(now.with_timezone(&Local).date_naive());

    Ok(BackupDownload {
        body,
        disposition: Header::new(
            "Content-Disposition",
            format!("attachment; filename=\"{}\"", file_name),
        ),
    })
}

#[post("/restore", data = "<data>")]
pub async fn restore_backup(
    data: Data<'_>,
    tracker: &State<SharedTracker>,
) -> InternalResult<Json<Applied>> {
    let text = data.open(MAX_BACKUP_SIZE_MIB.mebibytes()).into_string().await?;
    if !text.is_complete() {
        return Err(InternalError::bad_request("Backup file is too large"));
    }

    apply_backup(tracker, &text).map(Json)
}

fn apply_backup(tracker: &SharedTracker, text: &str) -> InternalResult<Applied> {
    let mut tracker = tracker.lock()?;

    codec::import(&mut tracker, text).map_err(|e| match e {
        BackupError::Local(e) => e,
        e => {
            tracing::warn!(error = %e, "rejected backup file");
            InternalError::bad_request(e.to_string())
        }
    })
}
