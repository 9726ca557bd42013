//! Universe definitions.
//!
//! A universe is a named, owned screening definition. Its current criteria
//! may be replaced at any time; snapshots taken under earlier criteria keep
//! their own copy and are never touched.

use crate::domain::criteria::ScreeningCriteria;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Universe {
    pub id: String,
    pub owner: String,
    pub criteria: ScreeningCriteria,
    pub created_at: DateTime<Utc>,
}

impl Universe {
    pub fn new(
        id: impl Into<String>,
        owner: impl Into<String>,
        criteria: ScreeningCriteria,
        created_at: DateTime<Utc>,
    ) -> Result<Self, UniverseError> {
        let id = id.into();
        validate_universe_id(&id)?;
        criteria.validate().map_err(UniverseError::InvalidCriteria)?;
        Ok(Self {
            id,
            owner: owner.into(),
            criteria,
            created_at,
        })
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum UniverseError {
    #[error("empty token in symbol list")]
    EmptyToken,

    #[error("duplicate symbol: {0}")]
    DuplicateSymbol(String),

    #[error("invalid universe id {0:?}: use letters, digits, '-' or '_'")]
    InvalidId(String),

    #[error("invalid criteria: {0}")]
    InvalidCriteria(String),
}

pub fn validate_universe_id(id: &str) -> Result<(), UniverseError> {
    let ok = !id.is_empty()
        && id.len() <= 64
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if ok {
        Ok(())
    } else {
        Err(UniverseError::InvalidId(id.to_string()))
    }
}

/// Parse a comma-separated symbol list, uppercasing and rejecting duplicates.
pub fn parse_symbols(input: &str) -> Result<Vec<String>, UniverseError> {
    let mut symbols = Vec::new();
    let mut seen = HashSet::new();

    for token in input.split(',') {
        let trimmed = token.trim();
        if trimmed.is_empty() {
            return Err(UniverseError::EmptyToken);
        }
        let symbol = trimmed.to_uppercase();
        if !seen.insert(symbol.clone()) {
            return Err(UniverseError::DuplicateSymbol(symbol));
        }
        symbols.push(symbol);
    }

    Ok(symbols)
}
