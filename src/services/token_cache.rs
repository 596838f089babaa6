use crate::constants::tokens::{DIGEST_CHARS, TOKEN_PREFIX};
use crate::services::logger::Logger;
use crate::services::settings::Settings;
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::Mutex;

struct TokenEntry {
    identifier: String,
    created_at_ms: i64,
    last_used: u64,
}

#[derive(Default)]
struct TokenTable {
    entries: HashMap<String, TokenEntry>,
    tick: u64,
}

#[derive(Default)]
struct TokenStats {
    hits: u64,
    misses: u64,
    inserts: u64,
    evictions: u64,
}

/// Maps oversized action identifiers to short digests and back.
///
/// The table is bounded: entries expire after `ttl_ms` and the least
/// recently used entry is evicted once `capacity` is exceeded. An evicted or
/// unknown token resolves to itself.
pub struct TokenCache {
    logger: Logger,
    budget: usize,
    capacity: usize,
    ttl_ms: u64,
    table: Mutex<TokenTable>,
    stats: Mutex<TokenStats>,
}

impl TokenCache {
    pub fn new(logger: Logger, budget: usize, capacity: usize, ttl_ms: u64) -> Self {
        Self {
            logger: logger.child("tokens"),
            budget,
            capacity: capacity.max(1),
            ttl_ms,
            table: Mutex::new(TokenTable::default()),
            stats: Mutex::new(TokenStats::default()),
        }
    }

    pub fn from_settings(logger: Logger, settings: &Settings) -> Self {
        Self::new(
            logger,
            settings.token_budget,
            settings.token_capacity,
            settings.token_ttl_ms,
        )
    }

    pub fn budget(&self) -> usize {
        self.budget
    }

    pub fn is_token(value: &str) -> bool {
        value.len() == DIGEST_CHARS + TOKEN_PREFIX.len_utf8()
            && value.starts_with(TOKEN_PREFIX)
            && value[TOKEN_PREFIX.len_utf8()..]
                .chars()
                .all(|c| c.is_ascii_hexdigit())
    }

    fn digest(identifier: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(identifier.as_bytes());
        let hex = hex::encode(hasher.finalize());
        format!("{}{}", TOKEN_PREFIX, &hex[..DIGEST_CHARS])
    }

    pub fn compact(&self, identifier: &str) -> String {
        if identifier.len() <= self.budget {
            return identifier.to_string();
        }
        let token = Self::digest(identifier);
        let now = chrono::Utc::now().timestamp_millis();
        let mut table = self.table.lock().unwrap_or_else(|err| err.into_inner());
        table.tick += 1;
        let tick = table.tick;
        let fresh = !table.entries.contains_key(&token);
        table.entries.insert(
            token.clone(),
            TokenEntry {
                identifier: identifier.to_string(),
                created_at_ms: now,
                last_used: tick,
            },
        );
        let evicted = self.evict(&mut table, now);
        drop(table);
        if let Ok(mut stats) = self.stats.lock() {
            if fresh {
                stats.inserts += 1;
            }
            stats.evictions += evicted;
        }
        token
    }

    pub fn resolve(&self, token: &str) -> String {
        let now = chrono::Utc::now().timestamp_millis();
        let mut table = self.table.lock().unwrap_or_else(|err| err.into_inner());
        table.tick += 1;
        let tick = table.tick;
        let ttl_ms = self.ttl_ms as i64;
        let resolved = match table.entries.get_mut(token) {
            Some(entry) if now - entry.created_at_ms <= ttl_ms => {
                entry.last_used = tick;
                Some(entry.identifier.clone())
            }
            Some(_) => {
                table.entries.remove(token);
                None
            }
            None => None,
        };
        drop(table);
        if let Ok(mut stats) = self.stats.lock() {
            if resolved.is_some() {
                stats.hits += 1;
            } else if Self::is_token(token) {
                stats.misses += 1;
            }
        }
        if resolved.is_none() && Self::is_token(token) {
            self.logger.debug(
                "Unknown or expired action token",
                Some(&serde_json::json!({"token": token})),
            );
        }
        resolved.unwrap_or_else(|| token.to_string())
    }

    fn evict(&self, table: &mut TokenTable, now: i64) -> u64 {
        let ttl_ms = self.ttl_ms as i64;
        let before = table.entries.len();
        table
            .entries
            .retain(|_, entry| now - entry.created_at_ms <= ttl_ms);
        let mut evicted = (before - table.entries.len()) as u64;
        while table.entries.len() > self.capacity {
            let oldest = table
                .entries
                .iter()
                .min_by_key(|(_, entry)| entry.last_used)
                .map(|(key, _)| key.clone());
            match oldest {
                Some(key) => {
                    table.entries.remove(&key);
                    evicted += 1;
                }
                None => break,
            }
        }
        evicted
    }

    pub fn len(&self) -> usize {
        self.table
            .lock()
            .map(|table| table.entries.len())
            .unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> Value {
        let stats = self.stats.lock().unwrap_or_else(|err| err.into_inner());
        serde_json::json!({
            "hits": stats.hits,
            "misses": stats.misses,
            "inserts": stats.inserts,
            "evictions": stats.evictions,
            "live": self.len(),
            "capacity": self.capacity,
            "ttl_ms": self.ttl_ms,
        })
    }
}
