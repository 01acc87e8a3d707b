//! Cross-collection invariants that no single document can enforce.

use std::collections::HashMap;

use crate::task::{Collection, Task};

/// Check invariants over all collections:
/// - A task id (including sub-task ids) appears at most once across the union
/// - A top-level task's `status` agrees with its collection
pub fn validate_collections(collections: &[(Collection, &[Task])]) -> Vec<String> {
    let mut errors = Vec::new();
    let mut seen: HashMap<&str, String> = HashMap::new();

    for (collection, tasks) in collections {
        for task in *tasks {
            if task.status != collection.status() {
                errors.push(format!(
                    "{}: task '{}' has status {} but resides in {}",
                    collection, task.id, task.status, collection
                ));
            }
            record_ids(task, &collection.to_string(), &mut seen, &mut errors);
        }
    }

    errors
}

fn record_ids<'a>(
    task: &'a Task,
    location: &str,
    seen: &mut HashMap<&'a str, String>,
    errors: &mut Vec<String>,
) {
    if let Some(first) = seen.get(task.id.as_str()) {
        errors.push(format!(
            "duplicate id '{}' in {} (first seen in {})",
            task.id, location, first
        ));
    } else {
        seen.insert(task.id.as_str(), location.to_string());
    }
    let nested = format!("{}/{}", location, task.id);
    for sub in &task.subtasks {
        record_ids(sub, &nested, seen, errors);
    }
}
