//! Content classifier.
//!
//! Maps a byte buffer to a verdict by running an ordered list of rules over
//! the lossily decoded text. The first rule that fires wins; when none fires
//! the verdict is clean with rule id `none`.

use super::rules::{Condition, Rule, StringPattern};
use crate::core::config::DetectionConfig;
use crate::core::error::Result;
use crate::core::types::Severity;
use serde::{Deserialize, Serialize};

/// Rule id for web shell signatures and exec-with-tainted-input.
pub const RULE_WEBSHELL: &str = "yara_webshell";
/// Rule id for obfuscation idioms.
pub const RULE_OBFUSCATION: &str = "heur_obfuscation";
/// Rule id reported for clean buffers.
pub const RULE_NONE: &str = "none";

/// Verdict for one buffer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Classification {
    pub severity: Severity,
    pub rule: String,
}

impl Classification {
    pub fn clean() -> Self {
        Self {
            severity: Severity::Clean,
            rule: RULE_NONE.to_string(),
        }
    }

    pub fn is_clean(&self) -> bool {
        self.severity == Severity::Clean
    }
}

/// Ordered rule list. Immutable once built, so it can be shared across workers.
#[derive(Debug, Clone)]
pub struct Classifier {
    rules: Vec<Rule>,
}

impl Classifier {
    /// Classifier with no rules; everything is clean.
    pub fn empty() -> Self {
        Self { rules: Vec::new() }
    }

    /// Built-in web shell and obfuscation rules, plus the entropy rule when configured.
    pub fn with_default_rules(config: &DetectionConfig) -> Result<Self> {
        let mut classifier = Self::empty()
            .with_rule(webshell_rule())?
            .with_rule(obfuscation_rule())?;

        if let Some(threshold) = config.entropy_threshold {
            classifier = classifier.with_rule(entropy_rule(threshold))?;
        }

        log::debug!("Classifier ready with {} rules", classifier.rules.len());
        Ok(classifier)
    }

    /// Append a rule. Rules are evaluated in insertion order.
    pub fn with_rule(mut self, mut rule: Rule) -> Result<Self> {
        rule.compile()?;
        self.rules.push(rule);
        Ok(self)
    }

    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    /// Classify a buffer. Never fails.
    pub fn classify(&self, data: &[u8]) -> Classification {
        let text = String::from_utf8_lossy(data);

        self.rules
            .iter()
            .find(|rule| rule.severity != Severity::Clean && rule.matches(data, &text))
            .map(|rule| Classification {
                severity: rule.severity,
                rule: rule.id.clone(),
            })
            .unwrap_or_else(Classification::clean)
    }
}

fn webshell_rule() -> Rule {
    Rule::new(RULE_WEBSHELL, Severity::Malicious)
        .with_description("Known web shell marker, or code execution fed by request input")
        .with_string(StringPattern::regex_nocase(
            "$signature",
            r"(r57|c99|webshell|wso_?shell|FilesMan)",
        ))
        .with_string(StringPattern::regex_nocase(
            "$exec",
            r"(eval|assert|system|exec|shell_exec|passthru|proc_open|popen)\s*\(",
        ))
        .with_string(StringPattern::regex_nocase(
            "$input",
            r#"\$_(GET|POST|REQUEST|COOKIE|SERVER)\s*\[['"][^'" ]+['"]\]"#,
        ))
        .with_condition(Condition::or(
            Condition::pattern("$signature"),
            Condition::and(Condition::pattern("$exec"), Condition::pattern("$input")),
        ))
}

fn obfuscation_rule() -> Rule {
    Rule::new(RULE_OBFUSCATION, Severity::Suspicious)
        .with_description("Decode chains, dynamic function construction or preg_replace /e")
        .with_string(StringPattern::regex_nocase(
            "$decode",
            r"(base64_decode|gzinflate|str_rot13|fromCharCode|create_function|atob)\s*\(",
        ))
        .with_string(StringPattern::regex_nocase(
            "$preg_e",
            r#"preg_replace\s*\(\s*['"]/.*/e['"]"#,
        ))
        .with_condition(Condition::Any)
}

fn entropy_rule(threshold: f64) -> Rule {
    Rule::new(RULE_OBFUSCATION, Severity::Suspicious)
        .with_description("Buffer entropy above the configured threshold")
        .with_condition(Condition::EntropyAbove(threshold))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn classifier() -> Classifier {
        Classifier::with_default_rules(&DetectionConfig::default()).unwrap()
    }

    fn verdict(data: &[u8]) -> (Severity, String) {
        let c = classifier().classify(data);
        (c.severity, c.rule)
    }

    #[test]
    fn test_exec_with_request_input_is_malicious() {
        assert_eq!(
            verdict(b"<?php eval($_GET['x']); ?>"),
            (Severity::Malicious, RULE_WEBSHELL.to_string())
        );
        assert_eq!(
            verdict(b"<?php system ($_POST[\"cmd\"]);"),
            (Severity::Malicious, RULE_WEBSHELL.to_string())
        );
    }

    #[test]
    fn test_exec_without_input_is_not_malicious() {
        assert_eq!(
            verdict(b"<?php eval($code);"),
            (Severity::Clean, RULE_NONE.to_string())
        );
    }

    #[test]
    fn test_decode_alone_is_suspicious() {
        assert_eq!(
            verdict(b"$p = base64_decode('aGVsbG8=');"),
            (Severity::Suspicious, RULE_OBFUSCATION.to_string())
        );
        assert_eq!(
            verdict(b"preg_replace('/.*/e', $r, $s);"),
            (Severity::Suspicious, RULE_OBFUSCATION.to_string())
        );
    }

    #[test]
    fn test_signature_wins_over_everything() {
        assert_eq!(
            verdict(b"// c99 shell\n$x = base64_decode('...');"),
            (Severity::Malicious, RULE_WEBSHELL.to_string())
        );
        assert_eq!(verdict(b"c99").0, Severity::Malicious);
    }

    #[test]
    fn test_empty_buffer_is_clean() {
        assert_eq!(verdict(b""), (Severity::Clean, RULE_NONE.to_string()));
    }

    #[test]
    fn test_invalid_utf8_tolerated() {
        let mut data = vec![0xff, 0xfe, 0x00];
        data.extend_from_slice(b"eval($_REQUEST['a'])");
        assert_eq!(verdict(&data).0, Severity::Malicious);
    }

    #[test]
    fn test_deterministic() {
        let c = classifier();
        let data = b"atob (payload); $_COOKIE['k']";
        let first = c.classify(data);
        for _ in 0..10 {
            assert_eq!(c.classify(data), first);
        }
    }

    #[test]
    fn test_entropy_rule_opt_in() {
        let blob: Vec<u8> = (0..=255u8).cycle().take(8192).collect();
        assert!(classifier().classify(&blob).is_clean());

        let config = DetectionConfig {
            entropy_threshold: Some(7.5),
        };
        let c = Classifier::with_default_rules(&config).unwrap();
        assert_eq!(c.classify(&blob).severity, Severity::Suspicious);
        assert_eq!(c.rules().len(), 3);
    }

    #[test]
    fn test_custom_rule_appended() {
        let c = Classifier::empty()
            .with_rule(
                Rule::new("custom_miner", Severity::Suspicious)
                    .with_string(StringPattern::text_nocase("$a", "coinhive")),
            )
            .unwrap();
        let result = c.classify(b"<script src=CoinHive.min.js>");
        assert_eq!(result.rule, "custom_miner");
    }
}
