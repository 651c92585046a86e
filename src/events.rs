use rocket::response::stream::{Event, EventStream};
use rocket::tokio::select;
use rocket::tokio::sync::broadcast::{self, error::RecvError, Receiver, Sender};
use rocket::{get, Shutdown, State};

use crate::tracker::{Change, Renderer};

const FEED_CAPACITY: usize = 64;

/// Fans every change out to the clients following `/api/events`.
#[derive(Clone)]
pub struct ChangeFeed {
    sender: Sender<Change>,
}

impl ChangeFeed {
    pub fn new() -> ChangeFeed {
        let (sender, _) = broadcast::channel(FEED_CAPACITY);
        ChangeFeed { sender }
    }

    pub fn subscribe(&self) -> Receiver<Change> {
        self.sender.subscribe()
    }
}

impl Renderer for ChangeFeed {
    fn render(&self, change: Change) {
        // No subscribers is not an error, nobody is looking.
        let watching = self.sender.send(change).unwrap_or(0);
        tracing::trace!(?change, watching, "change published");
    }
}

#[get("/events")]
pub fn events(feed: &State<ChangeFeed>, mut end: Shutdown) -> EventStream![] {
    let mut changes = feed.subscribe();

    EventStream! {
        loop {
            let change = select! {
                change = changes.recv() => match change {
                    Ok(change) => change,
                    Err(RecvError::Closed) => break,
                    // Missed some; the client has to redraw everything anyway.
                    Err(RecvError::Lagged(_)) => Change::Everything,
                },
                _ = &mut end => break,
            };

            yield Event::json(&change).event("change");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rendered_changes_reach_every_subscriber() {
        let feed = ChangeFeed::new();
        let mut first = feed.subscribe();
        let mut second = feed.subscribe();

        feed.render(Change::Vocabulary);
        feed.render(Change::Everything);

        assert_eq!(first.try_recv().unwrap(), Change::Vocabulary);
        assert_eq!(first.try_recv().unwrap(), Change::Everything);
        assert_eq!(second.try_recv().unwrap(), Change::Vocabulary);
    }

    #[test]
    fn rendering_without_subscribers_is_fine() {
        let feed = ChangeFeed::new();
        feed.render(Change::Tasks);

        let mut late = feed.subscribe();
        assert!(late.try_recv().is_err());
    }
}
