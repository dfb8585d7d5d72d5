//! Run configuration: lossiness scores, redaction settings and the names of
//! the special columns.

use std::{collections::BTreeMap, path::Path};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::{error::CopyError, types::TypeKey, yaml_provider};

pub const DEFAULT_FILTER_COLUMN: &str = "READ_FILTER";
pub const DEFAULT_READ_COUNT_COLUMN: &str = "NREADS";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RedactValue {
    #[serde(rename = "type")]
    pub type_name: String,
    pub value: String,
    #[serde(default = "default_pattern_len")]
    pub len: usize,
}

fn default_pattern_len() -> usize {
    1
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct CopyConfig {
    pub filter_column: String,
    pub read_count_column: Option<String>,
    pub type_scores: BTreeMap<String, u32>,
    pub redactable_types: Vec<String>,
    pub redactable_columns: Vec<String>,
    pub do_not_redact: Vec<String>,
    pub excluded_columns: Vec<String>,
    pub redact_values: Vec<RedactValue>,
}

impl Default for CopyConfig {
    fn default() -> Self {
        CopyConfig {
            filter_column: DEFAULT_FILTER_COLUMN.to_string(),
            read_count_column: Some(DEFAULT_READ_COUNT_COLUMN.to_string()),
            type_scores: BTreeMap::new(),
            redactable_types: Vec::new(),
            redactable_columns: Vec::new(),
            do_not_redact: Vec::new(),
            excluded_columns: Vec::new(),
            redact_values: Vec::new(),
        }
    }
}

impl CopyConfig {
    /// Loads a YAML (or `.json`) configuration file and validates it.
    pub fn load(path: &Path) -> Result<Self> {
        let config: CopyConfig = yaml_provider::load_from_path(path)
            .with_context(|| format!("Loading configuration {path:?}"))?;
        config.validate()?;
        Ok(config)
    }

    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::load(path),
            None => Ok(Self::default()),
        }
    }

    pub fn validate(&self) -> Result<(), CopyError> {
        validate_column_name("filter_column", &self.filter_column)?;
        if let Some(name) = &self.read_count_column {
            validate_column_name("read_count_column", name)?;
        }
        for value in &self.redact_values {
            if value.type_name.trim().is_empty() {
                return Err(CopyError::config("redact value without a type name"));
            }
            if value.len == 0 {
                return Err(CopyError::config(format!(
                    "redact value for '{}' has zero length",
                    value.type_name
                )));
            }
            decode_pattern(&value.value, value.len)?;
        }
        Ok(())
    }

    /// Lossiness score for a type name; unscored types rank as 0.
    pub fn lossy_score(&self, type_name: &str) -> u32 {
        let key = TypeKey::new(type_name);
        self.type_scores
            .iter()
            .find(|(name, _)| TypeKey::new(name) == key)
            .map(|(_, score)| *score)
            .unwrap_or(0)
    }
}

fn validate_column_name(key: &str, name: &str) -> Result<(), CopyError> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(CopyError::config(format!("{key} must not be empty")));
    }
    if trimmed
        .chars()
        .any(|c| c.is_whitespace() || matches!(c, ',' | '(' | ')' | ':'))
    {
        return Err(CopyError::config(format!(
            "{key} '{name}' is not a valid column name"
        )));
    }
    Ok(())
}

/// Decodes a configured redaction value into a pattern of exactly `len`
/// bytes.
///
/// `0x`-prefixed values are hex byte strings, plain integers are encoded
/// little-endian, anything else is taken as literal text. Short patterns are
/// zero-padded and long ones truncated to `len`.
pub fn decode_pattern(value: &str, len: usize) -> Result<Vec<u8>, CopyError> {
    let trimmed = value.trim();
    let mut bytes = if let Some(hex) = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
    {
        decode_hex(hex)
            .map_err(|err| CopyError::config(format!("redact value '{value}': {err}")))?
    } else if let Ok(number) = trimmed.parse::<u64>() {
        number.to_le_bytes().to_vec()
    } else if value.is_empty() {
        return Err(CopyError::config("redact value must not be empty"));
    } else {
        value.as_bytes().to_vec()
    };
    bytes.resize(len, 0);
    Ok(bytes)
}

fn decode_hex(digits: &str) -> Result<Vec<u8>, hex::FromHexError> {
    if digits.is_empty() {
        Err(hex::FromHexError::InvalidStringLength)
    } else if digits.len() % 2 == 1 {
        hex::decode(format!("0{digits}"))
    } else {
        hex::decode(digits)
    }
}
