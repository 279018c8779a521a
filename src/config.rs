//! Serde-mapped configuration for the subsystem (spec §3, §4.4, §4.8). Mirrors
//! the teacher's pattern of plain `serde`-derived structs with `#[serde(default)]`
//! rather than a builder type, so these compose directly into a host's own
//! JSON/TOML configuration tree.

use crate::crypto::KeyType;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::time::Duration;

fn default_root_lifetime_days() -> i64 {
    3650
}

fn default_intermediate_lifetime_days() -> i64 {
    7
}

fn default_renewal_window_ratio() -> f64 {
    0.2
}

fn default_leaf_lifetime_hours() -> i64 {
    12
}

fn default_maintenance_interval() -> Duration {
    Duration::from_secs(600)
}

fn default_true() -> bool {
    true
}

fn default_stek_key_count() -> usize {
    4
}

fn default_acme_prefix() -> String {
    "/acme/".to_string()
}

fn default_admin_prefix() -> String {
    "/pki/".to_string()
}

fn default_challenge_types() -> HashSet<String> {
    ["http-01", "dns-01", "tls-alpn-01"]
        .into_iter()
        .map(String::from)
        .collect()
}

/// Tri-state trust-install flag (spec §3): `None` defaults to `true`.
pub type TriBool = Option<bool>;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ExternalKeyPair {
    pub cert_pem: String,
    pub key_pem: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct CaConfig {
    #[serde(default = "default_local_id")]
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub root_common_name: Option<String>,
    #[serde(default)]
    pub intermediate_common_name: Option<String>,
    #[serde(default)]
    pub key_type: KeyType,
    #[serde(default = "default_root_lifetime_days")]
    pub root_lifetime_days: i64,
    #[serde(default = "default_intermediate_lifetime_days")]
    pub intermediate_lifetime_days: i64,
    #[serde(default = "default_renewal_window_ratio")]
    pub renewal_window_ratio: f64,
    #[serde(default)]
    pub install_trust: TriBool,
    #[serde(default)]
    pub sign_with_root: bool,
    #[serde(default)]
    pub external_root: Option<ExternalKeyPair>,
    #[serde(default)]
    pub external_intermediate: Option<ExternalKeyPair>,
    #[serde(default)]
    pub storage_override: Option<String>,
}

fn default_local_id() -> String {
    "local".to_string()
}

impl Default for CaConfig {
    fn default() -> Self {
        CaConfig {
            id: default_local_id(),
            name: None,
            root_common_name: None,
            intermediate_common_name: None,
            key_type: KeyType::default(),
            root_lifetime_days: default_root_lifetime_days(),
            intermediate_lifetime_days: default_intermediate_lifetime_days(),
            renewal_window_ratio: default_renewal_window_ratio(),
            install_trust: None,
            sign_with_root: false,
            external_root: None,
            external_intermediate: None,
            storage_override: None,
        }
    }
}

impl CaConfig {
    /// Effective renewal ratio after clamping out-of-range values to the
    /// default (spec §4.3 `needs_renewal`).
    pub fn effective_renewal_window_ratio(&self) -> f64 {
        if self.renewal_window_ratio > 0.0 && self.renewal_window_ratio < 1.0 {
            self.renewal_window_ratio
        } else {
            default_renewal_window_ratio()
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct RuleSet {
    #[serde(default)]
    pub domains: Vec<String>,
    #[serde(default)]
    pub ip_ranges: Vec<String>,
    #[serde(default)]
    pub uri_domains: Vec<String>,
    #[serde(default)]
    pub common_names: Vec<String>,
}

impl RuleSet {
    pub fn is_empty(&self) -> bool {
        self.domains.is_empty()
            && self.ip_ranges.is_empty()
            && self.uri_domains.is_empty()
            && self.common_names.is_empty()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct PolicyConfig {
    #[serde(default)]
    pub allow: Option<RuleSet>,
    #[serde(default)]
    pub deny: Option<RuleSet>,
    #[serde(default)]
    pub allow_wildcard_names: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct AcmeConfig {
    #[serde(default = "default_acme_prefix")]
    pub path_prefix: String,
    #[serde(default)]
    pub external_hostname: Option<String>,
    #[serde(default = "default_leaf_lifetime_hours")]
    pub leaf_lifetime_hours: i64,
    #[serde(default = "default_challenge_types")]
    pub enabled_challenges: HashSet<String>,
    #[serde(default)]
    pub dns_resolvers: Vec<String>,
    #[serde(default)]
    pub sign_with_ca: Option<String>,
    #[serde(default)]
    pub policy: PolicyConfig,
}

impl Default for AcmeConfig {
    fn default() -> Self {
        AcmeConfig {
            path_prefix: default_acme_prefix(),
            external_hostname: None,
            leaf_lifetime_hours: default_leaf_lifetime_hours(),
            enabled_challenges: default_challenge_types(),
            dns_resolvers: Vec::new(),
            sign_with_ca: None,
            policy: PolicyConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct StekConfig {
    #[serde(default = "default_stek_key_count")]
    pub key_count: usize,
    #[serde(default = "default_stek_rotation_interval_secs")]
    pub rotation_interval_secs: i64,
}

fn default_stek_rotation_interval_secs() -> i64 {
    86_400
}

impl Default for StekConfig {
    fn default() -> Self {
        StekConfig {
            key_count: default_stek_key_count(),
            rotation_interval_secs: default_stek_rotation_interval_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct PkiConfig {
    #[serde(default)]
    pub cas: Vec<CaConfig>,
    #[serde(default = "default_admin_prefix")]
    pub admin_path_prefix: String,
    #[serde(default)]
    pub acme: AcmeConfig,
    #[serde(default)]
    pub stek: StekConfig,
    #[serde(default = "default_maintenance_interval_secs")]
    pub maintenance_interval_secs: u64,
    #[serde(default = "default_true")]
    pub install_trust: bool,
    #[serde(default = "default_app_data_dir")]
    pub app_data_dir: String,
}

fn default_maintenance_interval_secs() -> u64 {
    default_maintenance_interval().as_secs()
}

fn default_app_data_dir() -> String {
    "pki-data".to_string()
}

impl Default for PkiConfig {
    fn default() -> Self {
        PkiConfig {
            cas: Vec::new(),
            admin_path_prefix: default_admin_prefix(),
            acme: AcmeConfig::default(),
            stek: StekConfig::default(),
            maintenance_interval_secs: default_maintenance_interval_secs(),
            install_trust: true,
            app_data_dir: default_app_data_dir(),
        }
    }
}

/// Substitute `{pki.ca.name}`, `{pki.ca.cert.key_type}`, `{year}` placeholders
/// in a common-name template (spec §3, §6).
pub fn render_template(template: &str, ca_name: &str, key_type: KeyType, year: i32) -> String {
    template
        .replace("{pki.ca.name}", ca_name)
        .replace("{pki.ca.cert.key_type}", key_type.label())
        .replace("{year}", &year.to_string())
}

/// Sanitize a CA id for use as a filesystem path component (spec §4.9):
/// strip characters outside `[A-Za-z0-9._-]`, then lowercase.
pub fn sanitize_id(id: &str) -> String {
    id.chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '.' || *c == '_' || *c == '-')
        .collect::<String>()
        .to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn template_substitutes_all_placeholders() {
        let out = render_template(
            "Caddy Local Authority - {year} {pki.ca.cert.key_type} Root",
            "Caddy Local Authority",
            KeyType::EcdsaP256,
            2026,
        );
        assert_eq!(out, "Caddy Local Authority - 2026 ECC Root");
    }

    #[test]
    fn sanitize_id_strips_and_lowercases() {
        assert_eq!(sanitize_id("My CA/2024!"), "myca2024");
    }

    #[test]
    fn renewal_ratio_falls_back_to_default_when_out_of_range() {
        let mut cfg = CaConfig::default();
        cfg.renewal_window_ratio = 0.0;
        assert_eq!(cfg.effective_renewal_window_ratio(), 0.2);
        cfg.renewal_window_ratio = 1.5;
        assert_eq!(cfg.effective_renewal_window_ratio(), 0.2);
        cfg.renewal_window_ratio = 0.3;
        assert_eq!(cfg.effective_renewal_window_ratio(), 0.3);
    }
}
