//! Single-node in-process key-value store
//!
//! Implements the same command surface as a Redis server for one process:
//! string and list values, per-key expiry on the tokio clock and glob
//! matching for `KEYS`. Expired keys are dropped lazily when touched.

use crate::core::error::{Result, VodError};
use crate::kv::KvClient;
use async_trait::async_trait;
use regex::Regex;
use std::collections::{HashMap, VecDeque};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

const WRONGTYPE: &str =
    "WRONGTYPE Operation against a key holding the wrong kind of value";

#[derive(Debug, Clone)]
enum Value {
    Str(String),
    List(VecDeque<String>),
}

#[derive(Debug, Clone)]
struct Entry {
    value: Value,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.map_or(false, |at| at <= now)
    }
}

/// In-process KV backend
pub struct MemoryClient {
    label: String,
    entries: Mutex<HashMap<String, Entry>>,
}

impl MemoryClient {
    pub fn new() -> Self {
        Self::with_label("Memory")
    }

    pub fn with_label(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Number of live keys
    pub async fn len(&self) -> usize {
        let now = Instant::now();
        let entries = self.entries.lock().await;
        entries.values().filter(|e| !e.is_expired(now)).count()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

impl Default for MemoryClient {
    fn default() -> Self {
        Self::new()
    }
}

/// Look up a key, evicting it first if its TTL has passed
fn live_entry<'a>(entries: &'a mut HashMap<String, Entry>, key: &str) -> Option<&'a mut Entry> {
    let now = Instant::now();
    if entries.get(key).map_or(false, |e| e.is_expired(now)) {
        entries.remove(key);
    }
    entries.get_mut(key)
}

fn list_mut<'a>(
    entries: &'a mut HashMap<String, Entry>,
    key: &str,
) -> Result<Option<&'a mut VecDeque<String>>> {
    match live_entry(entries, key) {
        None => Ok(None),
        Some(Entry { value: Value::List(list), .. }) => Ok(Some(list)),
        Some(_) => Err(VodError::BackendError(WRONGTYPE.to_string())),
    }
}

/// Resolve Redis-style inclusive indices (negative counts from the tail)
fn resolve_range(len: usize, start: i64, stop: i64) -> Option<(usize, usize)> {
    let len = len as i64;
    let start = if start < 0 { (len + start).max(0) } else { start };
    let stop = if stop < 0 { len + stop } else { stop.min(len - 1) };

    if len == 0 || start > stop || start >= len || stop < 0 {
        None
    } else {
        Some((start as usize, stop as usize))
    }
}

fn lpush_entry(entries: &mut HashMap<String, Entry>, key: &str, value: &str) -> Result<u64> {
    match list_mut(entries, key)? {
        Some(list) => {
            list.push_front(value.to_string());
            Ok(list.len() as u64)
        }
        None => {
            entries.insert(
                key.to_string(),
                Entry {
                    value: Value::List(VecDeque::from(vec![value.to_string()])),
                    expires_at: None,
                },
            );
            Ok(1)
        }
    }
}

fn lrem_entry(entries: &mut HashMap<String, Entry>, key: &str, count: i64, value: &str) -> Result<u64> {
    let Some(list) = list_mut(entries, key)? else {
        return Ok(0);
    };

    let limit = if count == 0 { usize::MAX } else { count.unsigned_abs() as usize };
    let mut removed = 0usize;

    if count >= 0 {
        let mut i = 0;
        while i < list.len() && removed < limit {
            if list[i] == value {
                list.remove(i);
                removed += 1;
            } else {
                i += 1;
            }
        }
    } else {
        let mut i = list.len();
        while i > 0 && removed < limit {
            i -= 1;
            if list[i] == value {
                list.remove(i);
                removed += 1;
            }
        }
    }

    if list.is_empty() {
        entries.remove(key);
    }
    Ok(removed as u64)
}

fn ltrim_entry(entries: &mut HashMap<String, Entry>, key: &str, start: i64, stop: i64) -> Result<()> {
    let Some(list) = list_mut(entries, key)? else {
        return Ok(());
    };

    match resolve_range(list.len(), start, stop) {
        Some((from, to)) => {
            list.truncate(to + 1);
            list.drain(..from);
        }
        None => list.clear(),
    }

    if list.is_empty() {
        entries.remove(key);
    }
    Ok(())
}

/// Translate a Redis glob into an anchored regex
///
/// Supports `*`, `?`, `[...]` (with `^` negation and ranges) and `\` escapes.
pub(crate) fn glob_to_regex(pattern: &str) -> Result<Regex> {
    let mut out = String::from("(?s)^");
    let mut chars = pattern.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '*' => out.push_str(".*"),
            '?' => out.push('.'),
            '\\' => match chars.next() {
                Some(next) => out.push_str(&regex::escape(&next.to_string())),
                None => out.push_str(r"\\"),
            },
            '[' => {
                let mut class = String::from("[");
                if chars.peek() == Some(&'^') {
                    chars.next();
                    class.push('^');
                }
                let mut closed = false;
                while let Some(c) = chars.next() {
                    match c {
                        ']' => {
                            closed = true;
                            break;
                        }
                        '\\' => {
                            if let Some(next) = chars.next() {
                                push_class_char(&mut class, next);
                            }
                        }
                        '-' => class.push('-'),
                        other => push_class_char(&mut class, other),
                    }
                }
                if !closed {
                    return Err(VodError::BackendError(format!(
                        "ERR unterminated character class in pattern '{}'",
                        pattern
                    )));
                }
                class.push(']');
                out.push_str(&class);
            }
            other => out.push_str(&regex::escape(&other.to_string())),
        }
    }
    out.push('$');

    Regex::new(&out)
        .map_err(|e| VodError::BackendError(format!("ERR invalid pattern '{}': {}", pattern, e)))
}

fn push_class_char(class: &mut String, c: char) {
    if matches!(c, '[' | ']' | '\\' | '^' | '&' | '~' | '-') {
        class.push('\\');
    }
    class.push(c);
}

#[async_trait]
impl KvClient for MemoryClient {
    fn label(&self) -> &str {
        &self.label
    }

    fn is_open(&self) -> bool {
        true
    }

    async fn connect(&self) -> Result<()> {
        Ok(())
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut entries = self.entries.lock().await;
        match live_entry(&mut entries, key) {
            None => Ok(None),
            Some(Entry { value: Value::Str(s), .. }) => Ok(Some(s.clone())),
            Some(_) => Err(VodError::BackendError(WRONGTYPE.to_string())),
        }
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        let mut entries = self.entries.lock().await;
        entries.insert(
            key.to_string(),
            Entry { value: Value::Str(value.to_string()), expires_at: None },
        );
        Ok(())
    }

    async fn set_ex(&self, key: &str, seconds: u64, value: &str) -> Result<()> {
        if seconds == 0 {
            return Err(VodError::BackendError(
                "ERR invalid expire time in 'setex' command".to_string(),
            ));
        }

        let mut entries = self.entries.lock().await;
        entries.insert(
            key.to_string(),
            Entry {
                value: Value::Str(value.to_string()),
                expires_at: Some(Instant::now() + Duration::from_secs(seconds)),
            },
        );
        Ok(())
    }

    async fn del(&self, keys: &[String]) -> Result<u64> {
        let mut entries = self.entries.lock().await;
        let mut removed = 0;
        for key in keys {
            if live_entry(&mut entries, key).is_some() {
                entries.remove(key);
                removed += 1;
            }
        }
        Ok(removed)
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        let mut entries = self.entries.lock().await;
        Ok(live_entry(&mut entries, key).is_some())
    }

    async fn keys(&self, pattern: &str) -> Result<Vec<String>> {
        let matcher = glob_to_regex(pattern)?;
        let now = Instant::now();

        let mut entries = self.entries.lock().await;
        entries.retain(|_, e| !e.is_expired(now));

        let mut keys: Vec<String> = entries
            .keys()
            .filter(|k| matcher.is_match(k))
            .cloned()
            .collect();
        keys.sort();
        Ok(keys)
    }

    async fn mget(&self, keys: &[String]) -> Result<Vec<Option<String>>> {
        let mut entries = self.entries.lock().await;
        Ok(keys
            .iter()
            .map(|key| match live_entry(&mut entries, key) {
                Some(Entry { value: Value::Str(s), .. }) => Some(s.clone()),
                _ => None,
            })
            .collect())
    }

    async fn lrange(&self, key: &str, start: i64, stop: i64) -> Result<Vec<String>> {
        let mut entries = self.entries.lock().await;
        let Some(list) = list_mut(&mut entries, key)? else {
            return Ok(Vec::new());
        };

        Ok(match resolve_range(list.len(), start, stop) {
            Some((from, to)) => list.range(from..=to).cloned().collect(),
            None => Vec::new(),
        })
    }

    async fn lrem(&self, key: &str, count: i64, value: &str) -> Result<u64> {
        let mut entries = self.entries.lock().await;
        lrem_entry(&mut entries, key, count, value)
    }

    async fn lpush(&self, key: &str, value: &str) -> Result<u64> {
        let mut entries = self.entries.lock().await;
        lpush_entry(&mut entries, key, value)
    }

    async fn ltrim(&self, key: &str, start: i64, stop: i64) -> Result<()> {
        let mut entries = self.entries.lock().await;
        ltrim_entry(&mut entries, key, start, stop)
    }

    async fn push_capped(&self, key: &str, value: &str, max_len: usize) -> Result<()> {
        let mut entries = self.entries.lock().await;
        lrem_entry(&mut entries, key, 0, value)?;
        lpush_entry(&mut entries, key, value)?;
        ltrim_entry(&mut entries, key, 0, max_len as i64 - 1)
    }
}
