//! Issuance policy (component C8): allow/deny rules applied to the
//! identifiers of every incoming ACME order (spec §4.8).

use crate::config::{PolicyConfig, RuleSet};
use ipnet::IpNet;
use std::net::IpAddr;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdentifierKind {
    Dns,
    Ip,
}

#[derive(Debug, Clone)]
pub struct Identifier {
    pub kind: IdentifierKind,
    pub value: String,
}

impl Identifier {
    pub fn dns(value: impl Into<String>) -> Self {
        Identifier {
            kind: IdentifierKind::Dns,
            value: value.into(),
        }
    }

    pub fn ip(value: impl Into<String>) -> Self {
        Identifier {
            kind: IdentifierKind::Ip,
            value: value.into(),
        }
    }

    pub fn is_wildcard(&self) -> bool {
        self.kind == IdentifierKind::Dns && self.value.starts_with("*.")
    }
}

pub struct Policy {
    allow: Option<RuleSet>,
    deny: Option<RuleSet>,
    allow_wildcard_names: bool,
}

impl Policy {
    pub fn new(config: &PolicyConfig) -> Self {
        Policy {
            allow: config.allow.clone(),
            deny: config.deny.clone(),
            allow_wildcard_names: config.allow_wildcard_names,
        }
    }

    /// Evaluate one identifier (spec §4.8): deny wins over allow; an empty
    /// policy with wildcards disallowed is pass-through except for the
    /// wildcard check itself.
    pub fn evaluate(&self, identifier: &Identifier) -> Result<(), &'static str> {
        if identifier.is_wildcard() && !self.allow_wildcard_names {
            return Err("rejectedIdentifier");
        }

        if let Some(deny) = &self.deny {
            if rule_set_matches(deny, identifier) {
                return Err("rejectedIdentifier");
            }
        }

        if let Some(allow) = &self.allow {
            if !allow.is_empty() && !rule_set_matches(allow, identifier) {
                return Err("rejectedIdentifier");
            }
        }

        Ok(())
    }
}

fn rule_set_matches(rules: &RuleSet, identifier: &Identifier) -> bool {
    match identifier.kind {
        IdentifierKind::Dns => rules
            .domains
            .iter()
            .any(|domain| dns_suffix_match(domain, &identifier.value))
            || rules
                .common_names
                .iter()
                .any(|cn| cn.eq_ignore_ascii_case(&identifier.value)),
        IdentifierKind::Ip => {
            let Ok(addr) = IpAddr::from_str(&identifier.value) else {
                return false;
            };
            rules.ip_ranges.iter().any(|range| {
                IpNet::from_str(range)
                    .map(|net| net.contains(&addr))
                    .unwrap_or(false)
            })
        }
    }
}

/// Case-insensitive suffix match with label-wildcard semantics (spec §4.8):
/// `*.example.test` in the rule matches any single-label subdomain of
/// `example.test`; an exact rule domain matches itself or any subdomain.
fn dns_suffix_match(rule: &str, name: &str) -> bool {
    let rule = rule.to_ascii_lowercase();
    let name = name.to_ascii_lowercase();

    if let Some(suffix) = rule.strip_prefix("*.") {
        let Some(rest) = name.strip_suffix(suffix) else {
            return false;
        };
        let Some(label) = rest.strip_suffix('.') else {
            return false;
        };
        return !label.is_empty() && !label.contains('.');
    }

    name == rule || name.ends_with(&format!(".{rule}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(allow: Option<RuleSet>, deny: Option<RuleSet>, wildcards: bool) -> Policy {
        Policy {
            allow,
            deny,
            allow_wildcard_names: wildcards,
        }
    }

    #[test]
    fn empty_policy_is_pass_through() {
        let p = policy(None, None, false);
        assert!(p.evaluate(&Identifier::dns("example.test")).is_ok());
    }

    #[test]
    fn deny_wins_over_allow_on_overlap() {
        let allow = RuleSet {
            domains: vec!["example.test".into()],
            ..Default::default()
        };
        let deny = RuleSet {
            domains: vec!["example.test".into()],
            ..Default::default()
        };
        let p = policy(Some(allow), Some(deny), false);
        assert!(p.evaluate(&Identifier::dns("example.test")).is_err());
    }

    #[test]
    fn wildcard_rejected_unless_enabled() {
        let p = policy(None, None, false);
        assert!(p.evaluate(&Identifier::dns("*.example.test")).is_err());
        let p = policy(None, None, true);
        assert!(p.evaluate(&Identifier::dns("*.example.test")).is_ok());
    }

    #[test]
    fn deny_suffix_rejects_subdomains() {
        let deny = RuleSet {
            domains: vec!["*.test".into()],
            ..Default::default()
        };
        let p = policy(None, Some(deny), false);
        assert!(p.evaluate(&Identifier::dns("example.test")).is_err());
    }

    #[test]
    fn ip_identifier_matches_cidr() {
        let allow = RuleSet {
            ip_ranges: vec!["10.0.0.0/8".into()],
            ..Default::default()
        };
        let p = policy(Some(allow), None, false);
        assert!(p.evaluate(&Identifier::ip("10.1.2.3")).is_ok());
        assert!(p.evaluate(&Identifier::ip("192.168.1.1")).is_err());
    }

    #[test]
    fn evaluation_is_idempotent() {
        let deny = RuleSet {
            domains: vec!["bad.test".into()],
            ..Default::default()
        };
        let p = policy(None, Some(deny), false);
        let id = Identifier::dns("bad.test");
        assert_eq!(p.evaluate(&id).is_ok(), p.evaluate(&id).is_ok());
    }
}
