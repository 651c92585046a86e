use rocket::serde::json::Json;
use rocket::{get, State};

use std::sync::Arc;

use super::{SyncReport, SyncStatus};

#[get("/sync")]
pub fn get_sync_status(status: &State<Arc<SyncStatus>>) -> Json<SyncReport> {
    Json(status.report())
}
