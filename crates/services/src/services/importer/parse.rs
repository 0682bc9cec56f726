//! Turning fetched CSV or JSON documents into tasks.
//!
//! A handful of column (or key) names are reserved: they set the task's own
//! fields instead of ending up in `info`.

use std::collections::HashSet;

use db::models::task::{CreateTask, TaskState};
use serde_json::{Map, Value};

use super::ImportError;

pub const RESERVED_FIELDS: &[&str] = &["state", "quorum", "calibration", "priority_0", "n_answers"];

fn blank_task() -> CreateTask {
    CreateTask::with_info(Value::Object(Map::new()))
}

fn invalid(column: &str, value: impl ToString) -> ImportError {
    ImportError::InvalidValue {
        column: column.to_string(),
        value: value.to_string(),
    }
}

/// Applies one reserved field. Returns `false` when `name` is not reserved.
fn apply_reserved(task: &mut CreateTask, name: &str, value: &Value) -> Result<bool, ImportError> {
    let as_text = || match value {
        Value::String(s) => s.trim().to_string(),
        other => other.to_string(),
    };
    match name {
        "state" => {
            task.state = Some(match as_text().as_str() {
                "ongoing" => TaskState::Ongoing,
                "completed" => TaskState::Completed,
                other => return Err(invalid(name, other)),
            });
        }
        "priority_0" => {
            let text = as_text();
            task.priority_0 = text.parse().map_err(|_| invalid(name, text))?;
        }
        "quorum" | "calibration" | "n_answers" => {
            let text = as_text();
            let number: i64 = text.parse().map_err(|_| invalid(name, &text))?;
            match name {
                "quorum" => task.quorum = number,
                "calibration" => task.calibration = number,
                _ => task.n_answers = Some(number),
            }
        }
        _ => return Ok(false),
    }
    Ok(true)
}

/// First row is the header. Every following row becomes one task whose
/// `info` maps header names to the cell strings.
pub fn tasks_from_csv(content: &str) -> Result<Vec<CreateTask>, ImportError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .trim(csv::Trim::Headers)
        .from_reader(content.as_bytes());

    let headers: Vec<String> = reader.headers()?.iter().map(str::to_string).collect();
    let mut seen = HashSet::new();
    if headers.iter().any(|h| !seen.insert(h.as_str())) {
        return Err(ImportError::DuplicateHeader);
    }

    let mut tasks = Vec::new();
    for record in reader.records() {
        let record = record?;
        if record.iter().all(|cell| cell.is_empty()) {
            continue;
        }
        let mut task = blank_task();
        let mut info = Map::new();
        for (name, cell) in headers.iter().zip(record.iter()) {
            let value = Value::String(cell.to_string());
            if !apply_reserved(&mut task, name, &value)? {
                info.insert(name.clone(), value);
            }
        }
        task.info = Value::Object(info);
        tasks.push(task);
    }

    if tasks.is_empty() {
        return Err(ImportError::EmptyFile);
    }
    Ok(tasks)
}

/// A JSON array of objects, one task per object.
pub fn tasks_from_json(content: &str) -> Result<Vec<CreateTask>, ImportError> {
    let value: Value =
        serde_json::from_str(content).map_err(|e| ImportError::InvalidJson(e.to_string()))?;
    let Value::Array(items) = value else {
        return Err(ImportError::InvalidJson("expected a list of objects".to_string()));
    };

    let mut tasks = Vec::with_capacity(items.len());
    for item in items {
        let Value::Object(fields) = item else {
            return Err(ImportError::InvalidJson("expected a list of objects".to_string()));
        };
        let mut task = blank_task();
        let mut info = Map::new();
        for (name, value) in fields {
            if !apply_reserved(&mut task, &name, &value)? {
                info.insert(name, value);
            }
        }
        task.info = Value::Object(info);
        tasks.push(task);
    }

    if tasks.is_empty() {
        return Err(ImportError::EmptyFile);
    }
    Ok(tasks)
}

/// Order-independent key for a task `info`, used to detect duplicates.
pub fn canonical_key(value: &Value) -> String {
    fn write(value: &Value, out: &mut String) {
        match value {
            Value::Object(map) => {
                let mut keys: Vec<&String> = map.keys().collect();
                keys.sort();
                out.push('{');
                for (i, key) in keys.into_iter().enumerate() {
                    if i > 0 {
                        out.push(',');
                    }
                    out.push_str(&Value::String(key.clone()).to_string());
                    out.push(':');
                    write(&map[key], out);
                }
                out.push('}');
            }
            Value::Array(items) => {
                out.push('[');
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        out.push(',');
                    }
                    write(item, out);
                }
                out.push(']');
            }
            scalar => out.push_str(&scalar.to_string()),
        }
    }
    let mut out = String::new();
    write(value, &mut out);
    out
}
