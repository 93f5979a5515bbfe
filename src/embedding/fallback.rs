//! Deterministic offline embedding
//!
//! Used when no provider credential is configured. Quality is far below a
//! real model but identical text always yields the same unit vector, so
//! discovery keeps working offline.

/// Length of fallback vectors
pub const FALLBACK_DIMENSIONS: usize = 100;

/// Weight added at the hashed position for every token
const HASH_WEIGHT: f32 = 0.1;

/// Domain keywords; a match increments the dimension at the keyword's position
const VOCABULARY: &[&str] = &[
    "file", "files", "read", "write", "create", "delete", "update", "list", "search", "find",
    "get", "set", "directory", "folder", "path", "database", "query", "sql", "table", "api",
    "http", "request", "url", "web", "browser", "page", "git", "commit", "branch", "repository",
    "code", "run", "execute", "command", "shell", "process", "image", "email", "message", "send",
    "user", "config", "settings", "data", "json", "text", "time", "date", "weather", "location",
    "map", "calendar", "event", "task", "issue", "document", "memory", "store", "cache", "log",
];

/// Java-style 32-bit string hash over UTF-16 code units
fn token_hash(token: &str) -> u32 {
    token
        .encode_utf16()
        .fold(0i32, |hash, unit| {
            hash.wrapping_shl(5).wrapping_sub(hash).wrapping_add(unit as i32)
        })
        .unsigned_abs()
}

/// Scale to unit length; the zero vector is returned unchanged
pub fn l2_normalize(mut vector: Vec<f32>) -> Vec<f32> {
    let magnitude = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
    if magnitude > 0.0 {
        for x in vector.iter_mut() {
            *x /= magnitude;
        }
    }
    vector
}

pub fn fallback_embedding(text: &str) -> Vec<f32> {
    let mut vector = vec![0.0f32; FALLBACK_DIMENSIONS];
    let lowered = text.to_lowercase();

    for token in lowered.split_whitespace() {
        if let Some(position) = VOCABULARY.iter().position(|word| *word == token) {
            vector[position] += 1.0;
        }
        let slot = token_hash(token) as usize % FALLBACK_DIMENSIONS;
        vector[slot] += HASH_WEIGHT;
    }

    l2_normalize(vector)
}
