mod data;
mod decode;
pub mod endpoints;
pub mod gamification;
mod ids;
mod state;
mod view;

pub use data::*;
pub use state::{Applied, RemoteOutcome, Renderer, Tracker};
pub use view::{Statistics, TrackerView};
