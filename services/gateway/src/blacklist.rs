//! Blacklist evaluator (C8).
//!
//! Rules are grouped by action and evaluated in a fixed priority order:
//! `DENY` before `DENY_FOR_TWO_DAYS`. Within an action's rule list, the
//! first rule whose field matches its pattern wins. Absent any match, the
//! implicit verdict is `ALLOW`.

use classlog_protocol::blacklist_actions;
use regex::Regex;
use serde_json::Value;

use crate::config::BlacklistConfig;

pub struct CompiledRule {
    pub field: String,
    pub patterns: Vec<Regex>,
}

pub struct BlacklistRules {
    deny: Vec<CompiledRule>,
    deny_for_two_days: Vec<CompiledRule>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Verdict {
    pub action: &'static str,
    pub message: String,
    pub status_code: u16,
}

impl Verdict {
    fn allow() -> Self {
        Verdict {
            action: blacklist_actions::ALLOW,
            message: String::new(),
            status_code: 200,
        }
    }

    fn deny() -> Self {
        Verdict {
            action: blacklist_actions::DENY,
            message: "this account is not permitted to use this service".to_owned(),
            status_code: 403,
        }
    }

    fn deny_for_two_days() -> Self {
        Verdict {
            action: blacklist_actions::DENY_FOR_TWO_DAYS,
            message: "this account is temporarily blocked; try again in two days".to_owned(),
            status_code: 403,
        }
    }

    pub fn is_allowed(&self) -> bool {
        self.action == blacklist_actions::ALLOW
    }
}

impl BlacklistRules {
    pub fn compile(config: &BlacklistConfig) -> Result<Self, regex::Error> {
        Ok(BlacklistRules {
            deny: compile_rules(&config.deny)?,
            deny_for_two_days: compile_rules(&config.deny_for_two_days)?,
        })
    }

    /// `record` is the JSON object (e.g. an auth identity, or the raw event)
    /// whose fields the rules are matched against.
    pub fn evaluate(&self, record: &Value) -> Verdict {
        if matches_any(&self.deny, record) {
            return Verdict::deny();
        }
        if matches_any(&self.deny_for_two_days, record) {
            return Verdict::deny_for_two_days();
        }
        Verdict::allow()
    }
}

fn compile_rules(rules: &[crate::config::BlacklistRule]) -> Result<Vec<CompiledRule>, regex::Error> {
    rules
        .iter()
        .map(|r| {
            let patterns = r
                .patterns
                .iter()
                .map(|p| Regex::new(p))
                .collect::<Result<Vec<_>, _>>()?;
            Ok(CompiledRule {
                field: r.field.clone(),
                patterns,
            })
        })
        .collect()
}

fn matches_any(rules: &[CompiledRule], record: &Value) -> bool {
    rules.iter().any(|rule| {
        record
            .get(&rule.field)
            .and_then(Value::as_str)
            .is_some_and(|value| rule.patterns.iter().any(|p| p.is_match(value)))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn rules() -> BlacklistRules {
        let config = BlacklistConfig {
            deny: vec![crate::config::BlacklistRule {
                field: "email".to_owned(),
                patterns: vec![r"^.*@ncsu\.edu$".to_owned()],
            }],
            deny_for_two_days: vec![crate::config::BlacklistRule {
                field: "email".to_owned(),
                patterns: vec![r"^.*@example\.edu$".to_owned()],
            }],
        };
        BlacklistRules::compile(&config).unwrap()
    }

    #[test]
    fn ncsu_email_is_denied() {
        let verdict = rules().evaluate(&json!({"email": "student@ncsu.edu"}));
        assert_eq!(verdict.action, blacklist_actions::DENY);
        assert_eq!(verdict.status_code, 403);
    }

    #[test]
    fn unmatched_email_is_allowed() {
        let verdict = rules().evaluate(&json!({"email": "student@other.edu"}));
        assert!(verdict.is_allowed());
    }

    #[test]
    fn deny_takes_priority_over_deny_for_two_days() {
        let config = BlacklistConfig {
            deny: vec![crate::config::BlacklistRule {
                field: "email".to_owned(),
                patterns: vec![r".*@ncsu\.edu$".to_owned()],
            }],
            deny_for_two_days: vec![crate::config::BlacklistRule {
                field: "email".to_owned(),
                patterns: vec![r".*@ncsu\.edu$".to_owned()],
            }],
        };
        let rules = BlacklistRules::compile(&config).unwrap();
        let verdict = rules.evaluate(&json!({"email": "x@ncsu.edu"}));
        assert_eq!(verdict.action, blacklist_actions::DENY);
    }
}
