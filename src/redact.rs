//! Redaction rules keyed by destination type.

use std::collections::HashMap;

use log::debug;

use crate::{
    catalog::Column,
    config::{CopyConfig, decode_pattern},
    error::Result,
    types::TypeKey,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RedactionRule {
    pub type_name: TypeKey,
    /// `None` fills with zero bytes.
    pub pattern: Option<Vec<u8>>,
}

impl RedactionRule {
    pub fn zero_fill(type_name: TypeKey) -> Self {
        RedactionRule {
            type_name,
            pattern: None,
        }
    }

    pub fn pattern_len(&self) -> usize {
        self.pattern.as_ref().map_or(1, Vec::len)
    }

    /// Overwrites `out` with the pattern repeated, truncating the last
    /// repetition.
    pub fn fill(&self, out: &mut [u8]) {
        match self.pattern.as_deref() {
            Some(pattern) if !pattern.is_empty() => {
                for (dst, src) in out.iter_mut().zip(pattern.iter().cycle()) {
                    *dst = *src;
                }
            }
            _ => out.fill(0),
        }
    }

    pub fn apply(&self, len: usize) -> Vec<u8> {
        let mut out = vec![0u8; len];
        self.fill(&mut out);
        out
    }

    pub fn first_byte(&self) -> u8 {
        self.pattern
            .as_ref()
            .and_then(|p| p.first().copied())
            .unwrap_or(0)
    }
}

/// Immutable map from destination type to redaction rule, built once per run.
#[derive(Debug, Clone, Default)]
pub struct RedactionPolicy {
    rules: HashMap<TypeKey, RedactionRule>,
}

impl RedactionPolicy {
    pub fn from_config(config: &CopyConfig) -> Result<Self> {
        let mut rules = HashMap::new();
        for value in &config.redact_values {
            let key = TypeKey::new(&value.type_name);
            let pattern = decode_pattern(&value.value, value.len)?;
            debug!("Redaction rule for '{key}': {} byte pattern", pattern.len());
            rules.insert(
                key.clone(),
                RedactionRule {
                    type_name: key,
                    pattern: Some(pattern),
                },
            );
        }
        Ok(RedactionPolicy { rules })
    }

    pub fn insert(&mut self, rule: RedactionRule) {
        self.rules.insert(rule.type_name.clone(), rule);
    }

    /// Rule for the column's chosen destination type, or zero fill.
    pub fn resolve(&self, column: &Column) -> RedactionRule {
        let key = match column.chosen_dst_type() {
            Some(ty) => TypeKey::new(&ty.name),
            None => TypeKey::new(""),
        };
        self.rules
            .get(&key)
            .cloned()
            .unwrap_or_else(|| RedactionRule::zero_fill(key))
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}
