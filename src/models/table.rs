use std::fmt;
use std::str::FromStr;

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Logical table reference with an optional database qualifier.
///
/// Parsed once from configuration (`"db.table"` or `"table"`) and immutable
/// afterwards. The database falls back to the task's default database when
/// the reference carries none.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableTarget {
    pub database: Option<String>,
    pub table: String,
}

impl TableTarget {
    pub fn new(database: Option<String>, table: impl Into<String>) -> Self {
        Self {
            database,
            table: table.into(),
        }
    }

    /// Database this target resolves to, given the task's default database.
    pub fn database_or<'a>(&'a self, default: &'a str) -> &'a str {
        self.database.as_deref().unwrap_or(default)
    }

    /// Escaped name for Presto statements.
    ///
    /// Plain identifiers pass through unquoted so generated DDL stays
    /// readable in job listings; anything else is double-quoted with embedded
    /// quotes doubled.
    pub fn escaped_presto(&self) -> String {
        match &self.database {
            Some(db) => format!("{}.{}", escape_presto_ident(db), escape_presto_ident(&self.table)),
            None => escape_presto_ident(&self.table),
        }
    }

    /// Escaped name for Hive statements. Components are always backquoted.
    pub fn escaped_hive(&self) -> String {
        match &self.database {
            Some(db) => format!("{}.{}", escape_hive_ident(db), escape_hive_ident(&self.table)),
            None => escape_hive_ident(&self.table),
        }
    }
}

fn is_plain_ident(ident: &str) -> bool {
    let mut chars = ident.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn escape_presto_ident(ident: &str) -> String {
    if is_plain_ident(ident) {
        ident.to_string()
    } else {
        format!("\"{}\"", ident.replace('"', "\"\""))
    }
}

fn escape_hive_ident(ident: &str) -> String {
    format!("`{}`", ident.replace('`', "``"))
}

impl fmt::Display for TableTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.database {
            Some(db) => write!(f, "{}.{}", db, self.table),
            None => write!(f, "{}", self.table),
        }
    }
}

impl FromStr for TableTarget {
    type Err = String;

    /// Splits at the first `.`; everything after it is the table name.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (database, table) = match s.split_once('.') {
            Some((db, table)) => (Some(db.to_string()), table.to_string()),
            None => (None, s.to_string()),
        };
        if table.is_empty() || database.as_deref() == Some("") {
            return Err(format!("Invalid table reference: '{}'", s));
        }
        Ok(Self { database, table })
    }
}

impl Serialize for TableTarget {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for TableTarget {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(D::Error::custom)
    }
}
