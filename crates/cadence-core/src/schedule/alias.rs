//! AliasTable - 人が読める名前から 5 フィールドの cron 式への置換表

use std::collections::BTreeMap;

const DEFAULT_ALIASES: &[(&str, &str)] = &[
    ("@yearly", "0 0 1 1 *"),
    ("@annually", "0 0 1 1 *"),
    ("@monthly", "0 0 1 * *"),
    ("@weekly", "0 0 * * 0"),
    ("@daily", "0 0 * * *"),
    ("@midnight", "0 0 * * *"),
    ("@hourly", "0 * * * *"),
    ("@EveryMinute", "* * * * *"),
    ("@EveryMinute5", "*/5 * * * *"),
    ("@EveryMinute10", "*/10 * * * *"),
    ("@EveryMinute15", "*/15 * * * *"),
    ("@EveryMinute30", "*/30 * * * *"),
    ("every minute", "* * * * *"),
    ("every 5 minutes", "*/5 * * * *"),
    ("every 10 minutes", "*/10 * * * *"),
    ("every 15 minutes", "*/15 * * * *"),
    ("every 30 minutes", "*/30 * * * *"),
    ("yearly", "0 0 1 1 *"),
    ("monthly", "0 0 1 * *"),
    ("weekly", "0 0 * * 0"),
    ("daily", "0 0 * * *"),
    ("hourly", "0 * * * *"),
];

/// Case-insensitive alias lookup.
///
/// Populated at startup; `register` never overwrites an existing name.
#[derive(Debug, Clone)]
pub struct AliasTable {
    entries: BTreeMap<String, String>,
}

fn normalize(name: &str) -> String {
    name.trim().to_lowercase()
}

impl AliasTable {
    pub fn empty() -> Self {
        Self {
            entries: BTreeMap::new(),
        }
    }

    pub fn with_defaults() -> Self {
        let mut table = Self::empty();
        for (alias, expression) in DEFAULT_ALIASES {
            table.register(alias, expression);
        }
        table
    }

    /// Returns `false` (and changes nothing) when the alias already exists.
    pub fn register(&mut self, alias: &str, expression: &str) -> bool {
        let key = normalize(alias);
        if self.entries.contains_key(&key) {
            return false;
        }
        self.entries.insert(key, expression.trim().to_string());
        true
    }

    pub fn get(&self, alias: &str) -> Option<&str> {
        self.entries.get(&normalize(alias)).map(String::as_str)
    }

    /// Substitutes a known alias; anything else is returned as-is.
    pub fn resolve<'a>(&'a self, expression: &'a str) -> &'a str {
        self.get(expression).unwrap_or(expression)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for AliasTable {
    fn default() -> Self {
        Self::with_defaults()
    }
}
