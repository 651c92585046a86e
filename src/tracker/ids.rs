use serde_json::Value;

use crate::internal_error::{InternalError, InternalResult};
use crate::store::{self, Store};

use super::data::TaskID;

/// Largest id ever handed out or accepted from outside. Every client that
/// reads the documents can represent it exactly, and the counter after it
/// still fits in a `TaskID`.
pub const MAX_TASK_ID: TaskID = 1 << 53;

/// Hands out task ids. The counter is persisted on every allocation so ids
/// are never reused, even after the task list is emptied.
#[derive(Debug)]
pub struct IdAllocator {
    next: TaskID,
}

impl IdAllocator {
    pub fn load(store: &dyn Store) -> InternalResult<IdAllocator> {
        let next = store
            .get(store::NEXT_ID)?
            .as_ref()
            .and_then(decode_counter)
            .unwrap_or(1);

        Ok(IdAllocator { next })
    }

    pub fn peek(&self) -> TaskID {
        self.next
    }

    pub fn next(&mut self, store: &mut dyn Store) -> InternalResult<TaskID> {
        let id = self.next;
        if id > MAX_TASK_ID {
            return Err(InternalError::internal("Task ids are exhausted"));
        }

        store.set(store::NEXT_ID, &Value::from(id + 1))?;
        self.next = id + 1;

        Ok(id)
    }

    /// The counter `candidate` settles on once raised past `max_task_id`.
    pub fn settle(&self, candidate: TaskID, max_task_id: Option<TaskID>) -> TaskID {
        let floor = max_task_id.map_or(1, |max| max.saturating_add(1));
        candidate.max(floor).clamp(1, MAX_TASK_ID + 1)
    }

    /// Moves the counter. Persisting it first is up to the caller.
    pub fn set(&mut self, next: TaskID) {
        self.next = next;
    }
}

/// Accepts a positive integer no larger than the counter after
/// [`MAX_TASK_ID`].
pub fn decode_counter(value: &Value) -> Option<TaskID> {
    value.as_i64().filter(|n| (1..=MAX_TASK_ID + 1).contains(n))
}

/// Whether `id` may appear on a stored or received task.
pub fn is_valid_id(id: TaskID) -> bool {
    (1..=MAX_TASK_ID).contains(&id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::SqliteStore;
    use serde_json::json;

    #[test]
    fn starts_at_one_on_an_empty_store() {
        let store = SqliteStore::open_in_memory().unwrap();
        let ids = IdAllocator::load(&store).unwrap();
        assert_eq!(ids.peek(), 1);
    }

    #[test]
    fn ids_strictly_increase_across_a_restart() {
        let mut store = SqliteStore::open_in_memory().unwrap();
        let mut ids = IdAllocator::load(&store).unwrap();

        let mut issued = vec![];
        for _ in 0..3 {
            issued.push(ids.next(&mut store).unwrap());
        }

        let mut restarted = IdAllocator::load(&store).unwrap();
        for _ in 0..3 {
            issued.push(restarted.next(&mut store).unwrap());
        }

        assert_eq!(issued, vec![1, 2, 3, 4, 5, 6]);
        assert_eq!(store.get(store::NEXT_ID).unwrap(), Some(json!(7)));
    }

    #[test]
    fn garbage_counter_falls_back_to_one() {
        let mut store = SqliteStore::open_in_memory().unwrap();
        store.set(store::NEXT_ID, &json!("seven")).unwrap();
        assert_eq!(IdAllocator::load(&store).unwrap().peek(), 1);

        store.set(store::NEXT_ID, &json!(-4)).unwrap();
        assert_eq!(IdAllocator::load(&store).unwrap().peek(), 1);
    }

    #[test]
    fn settle_never_falls_below_existing_ids() {
        let store = SqliteStore::open_in_memory().unwrap();
        let ids = IdAllocator::load(&store).unwrap();

        assert_eq!(ids.settle(2, Some(9)), 10);
        assert_eq!(ids.settle(10, Some(9)), 10);
        assert_eq!(ids.settle(15, None), 15);
        assert_eq!(ids.settle(-3, None), 1);
    }

    #[test]
    fn out_of_range_counters_are_rejected() {
        assert_eq!(decode_counter(&json!(i64::MAX)), None);
        assert_eq!(decode_counter(&json!(MAX_TASK_ID + 2)), None);
        assert_eq!(decode_counter(&json!(MAX_TASK_ID + 1)), Some(MAX_TASK_ID + 1));
        assert_eq!(decode_counter(&json!(0)), None);

        assert!(is_valid_id(MAX_TASK_ID));
        assert!(!is_valid_id(MAX_TASK_ID + 1));
        assert!(!is_valid_id(0));
    }

    #[test]
    fn settle_saturates_instead_of_overflowing() {
        let store = SqliteStore::open_in_memory().unwrap();
        let ids = IdAllocator::load(&store).unwrap();

        assert_eq!(ids.settle(i64::MAX, Some(i64::MAX)), MAX_TASK_ID + 1);
        assert_eq!(ids.settle(1, Some(MAX_TASK_ID)), MAX_TASK_ID + 1);
    }

    #[test]
    fn exhausted_counter_is_an_error_not_a_panic() {
        let mut store = SqliteStore::open_in_memory().unwrap();
        let mut ids = IdAllocator::load(&store).unwrap();
        ids.set(MAX_TASK_ID);

        assert_eq!(ids.next(&mut store).unwrap(), MAX_TASK_ID);
        let err = ids.next(&mut store).unwrap_err();
        assert_eq!(err.status(), rocket::http::Status::InternalServerError);
        assert_eq!(ids.peek(), MAX_TASK_ID + 1);
        assert_eq!(store.get(store::NEXT_ID).unwrap(), Some(json!(MAX_TASK_ID + 1)));
    }
}
