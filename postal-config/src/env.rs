// Environment variable loading

use crate::{ConfigError, Result};
use std::collections::HashMap;
use std::env;
use std::str::FromStr;

/// Where variables are read from.
#[derive(Debug, Clone)]
enum Source {
    Process,
    Map(HashMap<String, String>),
}

/// Environment variable loader.
///
/// Empty values are treated the same as unset ones, so `SMTP_USER=` falls
/// back to the default instead of producing an empty setting.
#[derive(Debug, Clone)]
pub struct EnvLoader {
    prefix: Option<String>,
    source: Source,
}

impl EnvLoader {
    /// Create a loader over the process environment.
    pub fn new(prefix: Option<String>) -> Self {
        Self {
            prefix,
            source: Source::Process,
        }
    }

    /// Create a loader over a fixed set of variables.
    pub fn from_map<I, K, V>(vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            prefix: None,
            source: Source::Map(
                vars.into_iter()
                    .map(|(k, v)| (k.into(), v.into()))
                    .collect(),
            ),
        }
    }

    /// Load variables from a `.env` file into the process environment.
    ///
    /// A missing default `.env` is not an error; a missing explicit path is.
    pub fn load_dotenv(path: Option<&str>) -> Result<()> {
        match path {
            Some(path) => {
                dotenvy::from_path(path).map_err(|e| ConfigError::LoadError(e.to_string()))?;
            }
            None => {
                if let Err(e) = dotenvy::dotenv()
                    && !e.not_found()
                {
                    return Err(ConfigError::LoadError(e.to_string()));
                }
            }
        }
        Ok(())
    }

    fn full_key(&self, key: &str) -> String {
        match self.prefix {
            Some(ref prefix) => format!("{}_{}", prefix, key.to_uppercase()),
            None => key.to_uppercase(),
        }
    }

    fn lookup(&self, key: &str) -> Option<String> {
        let value = match &self.source {
            Source::Process => env::var(key).ok(),
            Source::Map(map) => map.get(key).cloned(),
        };
        value.filter(|v| !v.is_empty())
    }

    /// Load a specific variable.
    pub fn load_var(&self, key: &str) -> Result<String> {
        let full_key = self.full_key(key);
        self.lookup(&full_key)
            .ok_or(ConfigError::KeyNotFound(full_key))
    }

    /// Load with default value.
    pub fn load_var_or(&self, key: &str, default: &str) -> String {
        self.load_var(key).unwrap_or_else(|_| default.to_string())
    }

    /// Load and parse a variable, using `default` when it is unset.
    ///
    /// A value that is set but does not parse is an error rather than a
    /// silent fallback.
    pub fn parse_var_or<T>(&self, key: &str, default: T) -> Result<T>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        match self.load_var(key) {
            Ok(raw) => raw.trim().parse().map_err(|e: T::Err| ConfigError::ParseError {
                key: self.full_key(key),
                message: e.to_string(),
            }),
            Err(_) => Ok(default),
        }
    }

    /// Load a comma-separated list, trimming entries and dropping empty ones.
    pub fn list_var_or(&self, key: &str, default: &str) -> Vec<String> {
        self.load_var_or(key, default)
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(String::from)
            .collect()
    }
}

impl Default for EnvLoader {
    fn default() -> Self {
        Self::new(None)
    }
}
