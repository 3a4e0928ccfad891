//! Key-space codec
//!
//! Maps (entity kind, user, composite id) to backend keys and back.
//!
//! ```text
//! u:{user}:pr:{source}+{id}      play record
//! u:{user}:fav:{source}+{id}     favorite
//! u:{user}:skip:{source}+{id}    skip config
//! u:{user}:pwd                   password
//! u:{user}:sh                    search history (list)
//! admin:config                   admin config
//! cache:{key}                    generic cache entry
//! ```
//!
//! Known limitations of the key space: a username containing `:` can make a
//! scan pattern for one user match keys of another (`a` vs `a:pr:x`), and a
//! source containing `+` makes [`split_storage_key`] split at the wrong place.
//! Glob metacharacters in usernames and prefixes are escaped.

use lazy_static::lazy_static;
use regex::Regex;

pub const ADMIN_CONFIG_KEY: &str = "admin:config";

/// Matches every password key, one per registered user
pub const PASSWORD_PATTERN: &str = "u:*:pwd";

const CACHE_PREFIX: &str = "cache:";

lazy_static! {
    static ref PASSWORD_KEY_RE: Regex = Regex::new(r"^u:(.+?):pwd$").unwrap();
}

/// Per-user namespaces holding one value per composite id
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Namespace {
    PlayRecord,
    Favorite,
    SkipConfig,
}

impl Namespace {
    pub fn as_str(&self) -> &'static str {
        match self {
            Namespace::PlayRecord => "pr",
            Namespace::Favorite => "fav",
            Namespace::SkipConfig => "skip",
        }
    }

    /// `u:{user}:{ns}:`
    pub fn prefix(&self, user: &str) -> String {
        format!("u:{}:{}:", user, self.as_str())
    }

    pub fn key(&self, user: &str, composite: &str) -> String {
        format!("{}{}", self.prefix(user), composite)
    }

    /// Glob matching every key of this namespace for `user`
    pub fn pattern(&self, user: &str) -> String {
        format!("u:{}:{}:*", escape_glob(user), self.as_str())
    }

    /// Recover the composite id from a full key of this namespace
    pub fn strip<'a>(&self, user: &str, full_key: &'a str) -> Option<&'a str> {
        full_key.strip_prefix(&self.prefix(user))
    }
}

/// Composite identifier of a title on a source
pub fn storage_key(source: &str, id: &str) -> String {
    format!("{}+{}", source, id)
}

/// Split a composite key at its first `+`
pub fn split_storage_key(key: &str) -> Option<(&str, &str)> {
    key.split_once('+')
}

pub fn play_record_key(user: &str, composite: &str) -> String {
    Namespace::PlayRecord.key(user, composite)
}

pub fn favorite_key(user: &str, composite: &str) -> String {
    Namespace::Favorite.key(user, composite)
}

pub fn skip_config_key(user: &str, source: &str, id: &str) -> String {
    Namespace::SkipConfig.key(user, &storage_key(source, id))
}

pub fn password_key(user: &str) -> String {
    format!("u:{}:pwd", user)
}

pub fn search_history_key(user: &str) -> String {
    format!("u:{}:sh", user)
}

pub fn cache_key(key: &str) -> String {
    format!("{}{}", CACHE_PREFIX, key)
}

/// Glob over cache entries, optionally restricted to a key prefix
pub fn cache_pattern(prefix: Option<&str>) -> String {
    match prefix.filter(|p| !p.is_empty()) {
        Some(prefix) => format!("{}{}*", CACHE_PREFIX, escape_glob(prefix)),
        None => format!("{}*", CACHE_PREFIX),
    }
}

/// Username from a password key found by scanning [`PASSWORD_PATTERN`]
pub fn parse_username(password_key: &str) -> Option<&str> {
    PASSWORD_KEY_RE
        .captures(password_key)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str())
}

/// Escape glob metacharacters so the text only matches itself
pub fn escape_glob(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        if matches!(c, '*' | '?' | '[' | ']' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}
