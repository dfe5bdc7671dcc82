//! Minimal `.env` updater.
//!
//! Existing `KEY=value` lines keep their order; updated keys are replaced in
//! place and new keys are appended. Comments and blank lines are not kept.

use std::{fs, io, path::Path};

/// Apply `updates` to the env file at `path`, creating it if needed.
pub fn update(path: &Path, updates: &[(&str, &str)]) -> io::Result<()> {
    let existing = match fs::read_to_string(path) {
        Ok(text) => text,
        Err(err) if err.kind() == io::ErrorKind::NotFound => String::new(),
        Err(err) => return Err(err),
    };

    let mut entries: Vec<(String, String)> = Vec::new();
    for line in existing.lines() {
        if line.trim_start().starts_with('#') {
            continue;
        }
        let Some((key, value)) = line.split_once('=') else {
            continue;
        };
        upsert(&mut entries, key, value);
    }
    for (key, value) in updates {
        upsert(&mut entries, key, value);
    }

    let mut out = String::new();
    for (key, value) in &entries {
        out.push_str(key);
        out.push('=');
        out.push_str(value);
        out.push('\n');
    }
    fs::write(path, out)
}

fn upsert(entries: &mut Vec<(String, String)>, key: &str, value: &str) {
    match entries.iter_mut().find(|(k, _)| k == key) {
        Some(entry) => entry.1 = value.to_string(),
        None => entries.push((key.to_string(), value.to_string())),
    }
}
