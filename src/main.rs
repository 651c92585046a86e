use chrono::Local;
use rocket::figment::Figment;
use rocket::{Build, Rocket};
use tracing_subscriber::EnvFilter;

use std::error::Error;
use std::sync::{Arc, Mutex};

mod backup;
mod config;
mod data;
mod events;
mod internal_error;
mod store;
mod sync;
mod tracker;


#[macro_use]
extern crate rocket;

use backup::endpoints as backup_endpoints;
use config::AppConfig;
use data::SharedTracker;
use events::ChangeFeed;
use store::SqliteStore;
use sync::{endpoints as sync_endpoints, SyncLink, SyncStatus};
use tracker::{endpoints, Tracker};

pub fn build_rocket(
    figment: Figment,
    tracker: SharedTracker,
    feed: ChangeFeed,
    sync_status: Arc<SyncStatus>,
) -> Rocket<Build> {
    rocket::custom(figment)
        .manage(tracker)
        .manage(feed)
        .manage(sync_status)
        .mount(
            "/api",
            routes![
                endpoints::get_tasks,
                endpoints::get_categories,
                endpoints::get_statistics,
                endpoints::get_view,
                endpoints::add_task,
                endpoints::set_task,
                endpoints::set_task_status,
                endpoints::add_word,
                endpoints::remove_word,
                endpoints::upload_chapter_image,
                backup_endpoints::download_backup,
                backup_endpoints::restore_backup,
                sync_endpoints::get_sync_status,
                events::events,
            ],
        )
}

#[rocket::main]
async fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let figment = rocket::Config::figment();
    let config: AppConfig = figment.extract()?;

    let store = SqliteStore::open(&config.database)?;
    tracing::info!(database = %config.database.display(), "opened local store");

    let feed = ChangeFeed::new();
    let link = SyncLink::connect(config.remote.as_ref());
    let sync_status = link.status();

    let tracker = Tracker::load(
        Box::new(store),
        link.handle(),
        Box::new(feed.clone()),
        Local::now(),
    )?;
    let tracker: SharedTracker = Arc::new(Mutex::new(tracker));
    link.spawn(tracker.clone());

    build_rocket(figment, tracker, feed, sync_status)
        .launch()
        .await?;

    Ok(())
}
