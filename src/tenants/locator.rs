//! Storage locator parsing
//!
//! A locator is either a Postgres URL (`postgres://user:pw@host:5432/db?opts`)
//! or a `key=value` connection string in libpq (`host=h dbname=db`) or
//! ADO.NET (`Server=h;Database=db` / `Initial Catalog=db`) form.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Keys naming the database in `key=value` connection strings
const DATABASE_KEYS: &[&str] = &["initial catalog", "database", "dbname"];

/// Keys whose values are hidden by [`StorageLocator::redacted`]
const SECRET_KEYS: &[&str] = &["password", "pwd"];

/// Opaque connection descriptor of one tenant's database
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StorageLocator(String);

impl StorageLocator {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into().trim().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_url(&self) -> bool {
        self.url_rest().is_some()
    }

    /// Database name the locator points at, if it names one
    pub fn database_name(&self) -> Option<String> {
        match self.url_rest() {
            Some(rest) => url_database(rest),
            None => keyed_value(&self.0, DATABASE_KEYS),
        }
    }

    /// The locator with any password replaced by `***`, for logs
    pub fn redacted(&self) -> String {
        match self.url_rest() {
            Some(rest) => {
                let scheme = &self.0[..self.0.len() - rest.len()];
                let authority_end = rest.find('/').unwrap_or(rest.len());
                let (authority, tail) = rest.split_at(authority_end);
                match authority.rsplit_once('@') {
                    Some((userinfo, host)) => match userinfo.split_once(':') {
                        Some((user, _)) => format!("{scheme}{user}:***@{host}{tail}"),
                        None => self.0.clone(),
                    },
                    None => self.0.clone(),
                }
            }
            None => self
                .0
                .split(';')
                .map(|segment| match segment.split_once('=') {
                    Some((key, _)) if SECRET_KEYS.contains(&key.trim().to_lowercase().as_str()) => {
                        format!("{key}=***")
                    }
                    _ => segment.to_string(),
                })
                .collect::<Vec<_>>()
                .join(";"),
        }
    }

    /// The locator in a form libpq accepts
    ///
    /// URLs and libpq `key=value` strings pass through; `;`-separated
    /// ADO.NET strings are translated key by key. Unknown keys are dropped.
    pub fn to_conninfo(&self) -> String {
        if self.is_url() || !self.0.contains(';') {
            return self.0.clone();
        }

        self.0
            .split(';')
            .filter_map(|segment| {
                let (key, value) = segment.split_once('=')?;
                let value = value.trim().trim_matches(|c| c == '\'' || c == '"');
                let key = match key.trim().to_lowercase().as_str() {
                    "host" | "server" | "data source" => "host",
                    "port" => "port",
                    "database" | "initial catalog" | "dbname" => "dbname",
                    "user" | "username" | "user id" | "uid" => "user",
                    "password" | "pwd" => "password",
                    "timeout" | "connect timeout" => "connect_timeout",
                    "sslmode" | "ssl mode" => "sslmode",
                    _ => return None,
                };
                Some(format!("{key}='{}'", value.replace('\\', "\\\\").replace('\'', "\\'")))
            })
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Everything after `scheme://` for Postgres URLs
    fn url_rest(&self) -> Option<&str> {
        self.0
            .strip_prefix("postgres://")
            .or_else(|| self.0.strip_prefix("postgresql://"))
    }
}

impl fmt::Display for StorageLocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.redacted())
    }
}

impl From<&str> for StorageLocator {
    fn from(raw: &str) -> Self {
        Self::new(raw)
    }
}

fn url_database(rest: &str) -> Option<String> {
    let (_, path) = rest.split_once('/')?;
    let end = path.find(['?', '#']).unwrap_or(path.len());
    let name = urlencoding::decode(path[..end].trim_matches('/')).ok()?;
    (!name.is_empty()).then(|| name.into_owned())
}

/// First value of any of `keys`, matched case-insensitively at a segment boundary
fn keyed_value(raw: &str, keys: &[&str]) -> Option<String> {
    // ASCII lowercasing keeps byte offsets aligned with `raw`
    let lower = raw.to_ascii_lowercase();

    for key in keys {
        let mut from = 0;
        while let Some(pos) = lower[from..].find(key) {
            let start = from + pos;
            from = start + key.len();

            let at_boundary = start == 0
                || matches!(lower.as_bytes()[start - 1], b';' | b' ' | b'\t' | b'\n');
            let Some(value) = raw[from..].trim_start().strip_prefix('=') else {
                continue;
            };
            if !at_boundary {
                continue;
            }

            let value = value.trim_start();
            let end = value
                .find(|c: char| c == ';' || c.is_whitespace())
                .unwrap_or(value.len());
            let value = value[..end].trim_matches(|c| c == '\'' || c == '"');
            if !value.is_empty() {
                return Some(value.to_string());
            }
        }
    }

    None
}
