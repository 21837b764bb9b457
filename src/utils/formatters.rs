/// Converts bytes to human-readable file size format
pub fn format_file_size(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.2} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}

/// First 8 characters of an id, enough to tell peers and transfers apart.
pub fn short_id(id: &str) -> &str {
    match id.char_indices().nth(8) {
        Some((idx, _)) => &id[..idx],
        None => id,
    }
}

/// Whole-number percentage of `done` out of `total`; an empty total is 100%.
pub fn percent(done: u32, total: u32) -> u32 {
    if total == 0 {
        return 100;
    }
    ((done as u64 * 100) / total as u64) as u32
}

/// Local wall-clock time of a message, as shown next to chat lines.
pub fn clock(ts: &chrono::DateTime<chrono::Utc>) -> String {
    ts.with_timezone(&chrono::Local).format("%H:%M").to_string()
}
