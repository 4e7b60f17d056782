//! Wiki configuration.
//!
//! Every field has a default, so a config file only names what it changes:
//!
//! ```toml
//! path = "/srv/wiki/pages"
//! default_author = "guest"
//! email_domain = "wiki.example.org"
//! max_commit_retries = 5
//! ```

use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::storage::CommitMessage;

/// Configuration for a [`Wiki`](crate::wiki::Wiki).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct WikiConfig {
    /// Path to the page store (a bare git repository).
    pub path: PathBuf,
    /// Create the store if it doesn't exist.
    pub create_if_missing: bool,
    /// Author recorded when a request carries no identity.
    pub default_author: String,
    /// Commit emails are `<author>@<email_domain>`.
    pub email_domain: String,
    /// Extension appended to page names, without the dot.
    pub page_extension: String,
    /// Retries after losing a race for the head.
    pub max_commit_retries: usize,
    /// Message recorded when an edit comes without one.
    pub empty_message: String,
}

impl Default for WikiConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from(".gitwiki"),
            create_if_missing: true,
            default_author: "anonymous".to_string(),
            email_domain: "localhost".to_string(),
            page_extension: "md".to_string(),
            max_commit_retries: 3,
            empty_message: CommitMessage::PLACEHOLDER.to_string(),
        }
    }
}

impl WikiConfig {
    /// Create a new configuration with the given path.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            ..Default::default()
        }
    }

    /// Set create_if_missing flag.
    pub fn create_if_missing(mut self, value: bool) -> Self {
        self.create_if_missing = value;
        self
    }

    pub fn default_author(mut self, author: impl Into<String>) -> Self {
        self.default_author = author.into();
        self
    }

    pub fn email_domain(mut self, domain: impl Into<String>) -> Self {
        self.email_domain = domain.into();
        self
    }

    pub fn page_extension(mut self, extension: impl Into<String>) -> Self {
        self.page_extension = extension.into();
        self
    }

    pub fn max_commit_retries(mut self, retries: usize) -> Self {
        self.max_commit_retries = retries;
        self
    }

    pub fn empty_message(mut self, message: impl Into<String>) -> Self {
        self.empty_message = message.into();
        self
    }

    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|e| ConfigError {
            path: Some(path.to_owned()),
            message: format!("could not read file: {e}"),
        })?;
        Self::parse(&contents).map_err(|mut e| {
            e.path = Some(path.to_owned());
            e
        })
    }

    /// Parse and validate configuration from a TOML string.
    pub fn parse(toml_str: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(toml_str).map_err(|e| {
            let mut message = e.message().to_owned();
            if let Some(span) = e.span() {
                let line = toml_str[..span.start].chars().filter(|&c| c == '\n').count() + 1;
                message = format!("line {line}: {message}");
            }
            ConfigError {
                path: None,
                message,
            }
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Check the values that can't be expressed in the types.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |message: String| Err(ConfigError { path: None, message });

        if self.page_extension.is_empty()
            || self.page_extension.contains(['.', '/', '\\'])
        {
            return invalid(format!("invalid page_extension {:?}", self.page_extension));
        }
        if self.email_domain.trim().is_empty() || self.email_domain.contains(['<', '>', '@']) {
            return invalid(format!("invalid email_domain {:?}", self.email_domain));
        }
        if self.default_author.trim().is_empty() {
            return invalid("default_author must not be empty".to_string());
        }
        if self.empty_message.trim().is_empty() {
            return invalid("empty_message must not be empty".to_string());
        }
        Ok(())
    }
}

/// A configuration file that could not be read or parsed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigError {
    /// the file, when loaded from one
    pub path: Option<PathBuf>,
    pub message: String,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.path {
            Some(path) => write!(f, "{}: {}", path.display(), self.message),
            None => write!(f, "{}", self.message),
        }
    }
}

impl std::error::Error for ConfigError {}
