//! Detection rule definitions.
//!
//! A rule is a set of named string patterns plus a condition over which of
//! them matched, loosely modelled on YARA. Rules carry the severity and the
//! stable rule id reported when they fire.

use crate::core::error::{Error, Result};
use crate::core::types::Severity;
use crate::detection::entropy::shannon_entropy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Pattern type for string matching.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatternType {
    /// Plain text (case-sensitive)
    Text,
    /// Plain text (case-insensitive)
    TextNocase,
    /// Regular expression
    Regex,
    /// Regular expression (case-insensitive)
    RegexNocase,
}

/// A string pattern in a rule.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StringPattern {
    /// Pattern identifier (e.g., "$exec")
    pub id: String,
    pub pattern: String,
    pub pattern_type: PatternType,
    #[serde(skip)]
    compiled: Option<Regex>,
}

impl StringPattern {
    fn new(id: &str, pattern: &str, pattern_type: PatternType) -> Self {
        Self {
            id: id.to_string(),
            pattern: pattern.to_string(),
            pattern_type,
            compiled: None,
        }
    }

    pub fn text(id: &str, pattern: &str) -> Self {
        Self::new(id, pattern, PatternType::Text)
    }

    pub fn text_nocase(id: &str, pattern: &str) -> Self {
        Self::new(id, pattern, PatternType::TextNocase)
    }

    pub fn regex(id: &str, pattern: &str) -> Self {
        Self::new(id, pattern, PatternType::Regex)
    }

    pub fn regex_nocase(id: &str, pattern: &str) -> Self {
        Self::new(id, pattern, PatternType::RegexNocase)
    }

    /// Compile the pattern for matching.
    pub fn compile(&mut self, rule: &str) -> Result<()> {
        let source = match self.pattern_type {
            PatternType::Text => regex::escape(&self.pattern),
            PatternType::TextNocase => format!("(?i){}", regex::escape(&self.pattern)),
            PatternType::Regex => self.pattern.clone(),
            PatternType::RegexNocase => format!("(?i){}", self.pattern),
        };

        let compiled = Regex::new(&source).map_err(|e| Error::RuleCompile {
            rule: format!("{}:{}", rule, self.id),
            message: e.to_string(),
        })?;
        self.compiled = Some(compiled);
        Ok(())
    }

    /// Check if the pattern occurs in the decoded text. Uncompiled patterns never match.
    pub fn is_match(&self, text: &str) -> bool {
        self.compiled.as_ref().map_or(false, |re| re.is_match(text))
    }
}

/// Condition over a rule's pattern results.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Condition {
    /// All patterns must match
    All,
    /// Any pattern must match
    Any,
    /// Specific pattern must match
    Pattern(String),
    /// Shannon entropy of the raw buffer is strictly above the value
    EntropyAbove(f64),
    And(Box<Condition>, Box<Condition>),
    Or(Box<Condition>, Box<Condition>),
    Not(Box<Condition>),
}

impl Condition {
    pub fn and(a: Condition, b: Condition) -> Self {
        Condition::And(Box::new(a), Box::new(b))
    }

    pub fn or(a: Condition, b: Condition) -> Self {
        Condition::Or(Box::new(a), Box::new(b))
    }

    pub fn pattern(id: &str) -> Self {
        Condition::Pattern(id.to_string())
    }

    /// Evaluate the condition against pattern results.
    pub fn evaluate(&self, hits: &HashMap<&str, bool>, data: &[u8]) -> bool {
        match self {
            Condition::All => !hits.is_empty() && hits.values().all(|hit| *hit),
            Condition::Any => hits.values().any(|hit| *hit),
            Condition::Pattern(id) => hits.get(id.as_str()).copied().unwrap_or(false),
            Condition::EntropyAbove(threshold) => {
                !data.is_empty() && shannon_entropy(data) > *threshold
            }
            Condition::And(a, b) => a.evaluate(hits, data) && b.evaluate(hits, data),
            Condition::Or(a, b) => a.evaluate(hits, data) || b.evaluate(hits, data),
            Condition::Not(c) => !c.evaluate(hits, data),
        }
    }
}

/// A detection rule.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Rule {
    /// Stable rule id reported in findings
    pub id: String,
    pub severity: Severity,
    pub description: Option<String>,
    pub strings: Vec<StringPattern>,
    pub condition: Condition,
}

impl Rule {
    pub fn new(id: &str, severity: Severity) -> Self {
        Self {
            id: id.to_string(),
            severity,
            description: None,
            strings: Vec::new(),
            condition: Condition::Any,
        }
    }

    pub fn with_description(mut self, desc: &str) -> Self {
        self.description = Some(desc.to_string());
        self
    }

    pub fn with_string(mut self, pattern: StringPattern) -> Self {
        self.strings.push(pattern);
        self
    }

    pub fn with_condition(mut self, condition: Condition) -> Self {
        self.condition = condition;
        self
    }

    /// Compile all patterns.
    pub fn compile(&mut self) -> Result<()> {
        for pattern in &mut self.strings {
            pattern.compile(&self.id)?;
        }
        Ok(())
    }

    /// Whether the rule fires for a buffer and its decoded text.
    pub fn matches(&self, data: &[u8], text: &str) -> bool {
        let hits: HashMap<&str, bool> = self
            .strings
            .iter()
            .map(|p| (p.id.as_str(), p.is_match(text)))
            .collect();
        self.condition.evaluate(&hits, data)
    }
}
