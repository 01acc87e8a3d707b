//! Deterministic candidate selection over the backlog.

use crate::task::Task;

/// Pick the first task for which `is_ready` holds, falling back to the first
/// task overall. Returns `None` only for an empty backlog.
pub fn select_candidate<F>(backlog: &[Task], mut is_ready: F) -> Option<&Task>
where
    F: FnMut(&Task) -> bool,
{
    backlog
        .iter()
        .find(|task| is_ready(task))
        .or_else(|| backlog.first())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefers_first_ready_task() {
        let backlog = vec![Task::new("a", "a"), Task::new("b", "b"), Task::new("c", "c")];
        let selected = select_candidate(&backlog, |task| task.id != "a").expect("candidate");
        assert_eq!(selected.id, "b");
    }

    #[test]
    fn falls_back_to_first_when_none_ready() {
        let backlog = vec![Task::new("a", "a"), Task::new("b", "b")];
        let selected = select_candidate(&backlog, |_| false).expect("candidate");
        assert_eq!(selected.id, "a");
    }

    #[test]
    fn empty_backlog_selects_nothing() {
        assert!(select_candidate(&[], |_| true).is_none());
    }
}
