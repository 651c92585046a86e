use std::sync::{Arc, Mutex};

use crate::tracker::Tracker;

pub type SharedTracker = Arc<Mutex<Tracker>>;
