// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Layered custom-provider configuration.
//!
//! The effective catalog is assembled from three sources, lowest to
//! highest precedence:
//!
//! 1. `CUSTOM_<ID>_<FIELD>` environment variables
//! 2. the single legacy custom-provider record (`--custom.*` flags and
//!    the legacy `CUSTOM_URL`/`CUSTOM_MODEL`/... keys)
//! 3. the explicit `--customs id:spec` CLI map
//!
//! Overwriting happens by whole record at the id level. The merge itself
//! is a pure function over three maps so it stays unit-testable.

pub mod spec;

use std::collections::BTreeMap;

pub use spec::{
    normalize_id, parse_bool, parse_size, parse_spec, parse_temperature, CustomSpec, SpecError,
    DEFAULT_MAX_TOKENS,
};

use crate::providers::types::TEMPERATURE_UNSET;

/// Legacy single-provider environment keys; these configure the legacy
/// record, not the `CUSTOM_<ID>_<FIELD>` family, and are skipped by the
/// env scan.
const LEGACY_ENV_KEYS: &[&str] = &[
    "CUSTOM_URL",
    "CUSTOM_MODEL",
    "CUSTOM_API_KEY",
    "CUSTOM_MAX_TOKENS",
    "CUSTOM_TEMPERATURE",
    "CUSTOM_ENABLED",
    "CUSTOM_NAME",
];

/// Recognized field suffixes, longest first so `_max_tokens` wins over a
/// hypothetical id ending in `max`.
const ENV_FIELD_SUFFIXES: &[&str] = &[
    "endpoint_type",
    "temperature",
    "max_tokens",
    "api_key",
    "enabled",
    "model",
    "name",
    "url",
];

/// The single flat custom-provider record from the legacy flag family.
#[derive(Debug, Clone, PartialEq)]
pub struct LegacyCustom {
    /// Display name; also the source of the catalog id.
    pub name: String,
    /// API root.
    pub url: String,
    /// Optional bearer credential.
    pub api_key: String,
    /// Model identifier.
    pub model: String,
    /// Completion token ceiling.
    pub max_tokens: i64,
    /// Sampling temperature; `-1` means unset.
    pub temperature: f32,
    /// Whether the provider takes part in runs.
    pub enabled: bool,
}

impl Default for LegacyCustom {
    fn default() -> Self {
        Self {
            name: String::new(),
            url: String::new(),
            api_key: String::new(),
            model: String::new(),
            max_tokens: DEFAULT_MAX_TOKENS,
            temperature: TEMPERATURE_UNSET,
            enabled: false,
        }
    }
}

impl LegacyCustom {
    /// The legacy record derives its id from the lowercased `name` when one
    /// is set and the literal `custom` otherwise. This predates the
    /// `[a-z0-9_-]+` rule for the other sources and is kept as-is.
    pub fn catalog_id(&self) -> String {
        let trimmed = self.name.trim();
        if trimmed.is_empty() {
            "custom".to_string()
        } else {
            trimmed.to_lowercase()
        }
    }

    /// Convert to a catalog spec.
    pub fn to_spec(&self) -> CustomSpec {
        let mut out = CustomSpec::new(self.catalog_id());
        out.name = self.name.trim().to_string();
        out.url = self.url.trim().to_string();
        out.api_key = self.api_key.trim().to_string();
        out.model = self.model.trim().to_string();
        out.max_tokens = self.max_tokens;
        out.temperature = self.temperature;
        out.enabled = self.enabled;
        out
    }
}

/// The resolved provider catalog plus everything the caller needs to
/// report about it.
#[derive(Debug, Default)]
pub struct Catalog {
    /// Surviving specs in ascending id order.
    pub specs: Vec<CustomSpec>,
    /// Hard configuration errors (`custom[<id>]: missing URL` and CLI
    /// parse failures). The caller decides whether survivors warrant
    /// proceeding.
    pub errors: Vec<String>,
    /// Soft issues: unknown env suffixes, unparsable env values.
    pub warnings: Vec<String>,
    /// Distinct non-empty API keys across the merged catalog, for log
    /// redaction. Collected before disabled entries are dropped.
    pub secrets: Vec<String>,
}

/// Parse the `CUSTOM_<ID>_<FIELD>` environment family.
///
/// Field matching is suffix-directed, which is what makes multi-word ids
/// like `my_provider` work. Unknown suffixes and empty ids produce
/// warnings and are discarded; so do unparsable values.
pub fn parse_env(
    vars: impl IntoIterator<Item = (String, String)>,
) -> (BTreeMap<String, CustomSpec>, Vec<String>) {
    let mut specs: BTreeMap<String, CustomSpec> = BTreeMap::new();
    let mut warnings = Vec::new();

    for (key, value) in vars {
        if !key.starts_with("CUSTOM_") || LEGACY_ENV_KEYS.contains(&key.as_str()) {
            continue;
        }
        let rest = key["CUSTOM_".len()..].to_lowercase();

        let Some((raw_id, field)) = ENV_FIELD_SUFFIXES.iter().find_map(|suffix| {
            rest.strip_suffix(suffix)
                .and_then(|head| head.strip_suffix('_'))
                .map(|id| (id, *suffix))
        }) else {
            warnings.push(format!("{key}: unknown custom provider field, ignoring"));
            continue;
        };

        let id = match normalize_id(raw_id) {
            Ok(id) => id,
            Err(_) => {
                warnings.push(format!("{key}: missing or invalid provider id, ignoring"));
                continue;
            }
        };

        let entry = specs
            .entry(id.clone())
            .or_insert_with(|| CustomSpec::new(id));
        if let Err(err) = spec::apply_env_field(entry, field, &value) {
            warnings.push(format!("{key}: {err}, ignoring"));
        }
    }

    (specs, warnings)
}

/// Parse the repeatable `--customs id:spec` values into a map.
///
/// A duplicated id within the flag list is a configuration error, as is a
/// value without the `id:` prefix or an unparsable spec body.
pub fn parse_cli_customs(values: &[String]) -> (BTreeMap<String, CustomSpec>, Vec<String>) {
    let mut specs: BTreeMap<String, CustomSpec> = BTreeMap::new();
    let mut errors = Vec::new();

    for value in values {
        let Some((raw_id, body)) = value.split_once(':') else {
            errors.push(format!("customs value {value:?}: expected id:key=value,..."));
            continue;
        };
        match parse_spec(raw_id, body) {
            Ok(parsed) => {
                if specs.contains_key(&parsed.id) {
                    errors.push(format!("custom[{}]: duplicate id", parsed.id));
                    continue;
                }
                specs.insert(parsed.id.clone(), parsed);
            }
            Err(err) => errors.push(format!("customs value {raw_id:?}: {err}")),
        }
    }

    (specs, errors)
}

/// Pure three-way merge: env is the base, the legacy record overrides it,
/// the CLI map overrides both. Whole records replace whole records.
pub fn merge(
    env: BTreeMap<String, CustomSpec>,
    legacy: Option<CustomSpec>,
    cli: BTreeMap<String, CustomSpec>,
) -> BTreeMap<String, CustomSpec> {
    let mut merged = env;
    if let Some(record) = legacy {
        merged.insert(record.id.clone(), record);
    }
    for (id, record) in cli {
        merged.insert(id, record);
    }
    merged
}

/// Resolve the effective catalog from all three sources.
///
/// `env_vars` is normally `std::env::vars()`, injected for testability.
pub fn resolve_catalog(
    env_vars: impl IntoIterator<Item = (String, String)>,
    legacy: Option<&LegacyCustom>,
    cli_values: &[String],
) -> Catalog {
    let (env_specs, warnings) = parse_env(env_vars);
    let (cli_specs, errors) = parse_cli_customs(cli_values);
    let legacy_spec = legacy.map(LegacyCustom::to_spec);

    let merged = merge(env_specs, legacy_spec, cli_specs);

    let mut catalog = Catalog {
        errors,
        warnings,
        ..Catalog::default()
    };

    let mut secrets: Vec<String> = merged
        .values()
        .map(|s| s.api_key.clone())
        .filter(|k| !k.is_empty())
        .collect();
    secrets.sort();
    secrets.dedup();
    catalog.secrets = secrets;

    // BTreeMap iteration keeps the id ordering deterministic
    for (id, record) in merged {
        if !record.enabled {
            continue;
        }
        if record.url.is_empty() {
            catalog.errors.push(format!("custom[{id}]: missing URL"));
            continue;
        }
        if record.model.is_empty() {
            catalog.errors.push(format!("custom[{id}]: missing model"));
            continue;
        }
        catalog.specs.push(record);
    }

    catalog
}

#[cfg(test)]
mod tests {
    use super::*;

    fn envs(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect()
    }

    #[test]
    fn test_env_basic_fields() {
        let (specs, warnings) = parse_env(envs(&[
            ("CUSTOM_TEST_URL", "http://env.com"),
            ("CUSTOM_TEST_MODEL", "env-model"),
            ("CUSTOM_TEST_ENABLED", "true"),
            ("PATH", "/usr/bin"),
        ]));
        assert!(warnings.is_empty());
        let spec = &specs["test"];
        assert_eq!(spec.url, "http://env.com");
        assert_eq!(spec.model, "env-model");
        assert!(spec.enabled);
    }

    #[test]
    fn test_env_multi_word_id() {
        let (specs, warnings) = parse_env(envs(&[
            ("CUSTOM_MY_PROVIDER_URL", "http://x"),
            ("CUSTOM_MY_PROVIDER_MAX_TOKENS", "4k"),
            ("CUSTOM_MY_PROVIDER_ENDPOINT_TYPE", "responses"),
        ]));
        assert!(warnings.is_empty(), "{warnings:?}");
        let spec = &specs["my_provider"];
        assert_eq!(spec.url, "http://x");
        assert_eq!(spec.max_tokens, 4096);
        assert_eq!(
            spec.endpoint_type,
            crate::providers::types::EndpointType::Responses
        );
    }

    #[test]
    fn test_env_skips_legacy_keys() {
        let (specs, warnings) = parse_env(envs(&[
            ("CUSTOM_URL", "http://legacy"),
            ("CUSTOM_MODEL", "legacy-model"),
            ("CUSTOM_API_KEY", "legacy-key"),
        ]));
        assert!(specs.is_empty());
        assert!(warnings.is_empty());
    }

    #[test]
    fn test_env_unknown_suffix_warns() {
        let (specs, warnings) = parse_env(envs(&[("CUSTOM_TEST_COLOR", "blue")]));
        assert!(specs.is_empty());
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].contains("CUSTOM_TEST_COLOR"));
    }

    #[test]
    fn test_env_missing_id_warns() {
        // CUSTOM_ENDPOINT_TYPE is not a legacy key and has no id part
        let (specs, warnings) = parse_env(envs(&[("CUSTOM_ENDPOINT_TYPE", "auto")]));
        assert!(specs.is_empty());
        assert_eq!(warnings.len(), 1);
    }

    #[test]
    fn test_env_bad_value_warns_and_keeps_rest() {
        let (specs, warnings) = parse_env(envs(&[
            ("CUSTOM_T_URL", "http://x"),
            ("CUSTOM_T_MAX_TOKENS", "lots"),
        ]));
        assert_eq!(specs["t"].url, "http://x");
        assert_eq!(specs["t"].max_tokens, DEFAULT_MAX_TOKENS);
        assert_eq!(warnings.len(), 1);
    }

    #[test]
    fn test_cli_customs_parse() {
        let (specs, errors) = parse_cli_customs(&[
            "alpha:url=http://a,model=m1,enabled=true".to_string(),
            "beta:url=http://b,model=m2".to_string(),
        ]);
        assert!(errors.is_empty());
        assert_eq!(specs.len(), 2);
        assert!(specs["alpha"].enabled);
        assert!(!specs["beta"].enabled);
    }

    #[test]
    fn test_cli_customs_duplicate_id_is_error() {
        let (specs, errors) = parse_cli_customs(&[
            "dup:url=http://a".to_string(),
            "dup:url=http://b".to_string(),
        ]);
        assert_eq!(specs["dup"].url, "http://a");
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("duplicate id"));
    }

    #[test]
    fn test_cli_customs_missing_colon_is_error() {
        let (specs, errors) = parse_cli_customs(&["url=http://a".to_string()]);
        assert!(specs.is_empty());
        assert_eq!(errors.len(), 1);
    }

    #[test]
    fn test_cli_overrides_env_whole_record() {
        let catalog = resolve_catalog(
            envs(&[
                ("CUSTOM_TEST_URL", "http://env.com"),
                ("CUSTOM_TEST_MODEL", "env-model"),
                ("CUSTOM_TEST_ENABLED", "true"),
                ("CUSTOM_TEST_API_KEY", "env-secret"),
            ]),
            None,
            &["test:url=http://cli.com,model=cli-model,enabled=true".to_string()],
        );
        assert!(catalog.errors.is_empty(), "{:?}", catalog.errors);
        assert_eq!(catalog.specs.len(), 1);
        let spec = &catalog.specs[0];
        assert_eq!(spec.id, "test");
        assert_eq!(spec.url, "http://cli.com");
        assert_eq!(spec.model, "cli-model");
        // whole-record overwrite: the env api key does not leak through
        assert_eq!(spec.api_key, "");
    }

    #[test]
    fn test_legacy_between_env_and_cli() {
        let legacy = LegacyCustom {
            name: "Test".to_string(),
            url: "http://legacy.com".to_string(),
            model: "legacy-model".to_string(),
            enabled: true,
            ..LegacyCustom::default()
        };

        // legacy (id "test") overrides env...
        let catalog = resolve_catalog(
            envs(&[
                ("CUSTOM_TEST_URL", "http://env.com"),
                ("CUSTOM_TEST_MODEL", "env-model"),
                ("CUSTOM_TEST_ENABLED", "true"),
            ]),
            Some(&legacy),
            &[],
        );
        assert_eq!(catalog.specs[0].url, "http://legacy.com");

        // ...and the CLI map overrides legacy
        let catalog = resolve_catalog(
            std::iter::empty(),
            Some(&legacy),
            &["test:url=http://cli.com,model=cli-model,enabled=true".to_string()],
        );
        assert_eq!(catalog.specs[0].url, "http://cli.com");
    }

    #[test]
    fn test_legacy_default_id_is_custom() {
        let legacy = LegacyCustom {
            url: "http://legacy.com".to_string(),
            model: "m".to_string(),
            enabled: true,
            ..LegacyCustom::default()
        };
        assert_eq!(legacy.catalog_id(), "custom");
        let catalog = resolve_catalog(std::iter::empty(), Some(&legacy), &[]);
        assert_eq!(catalog.specs[0].id, "custom");
    }

    #[test]
    fn test_legacy_id_skips_cli_normalization() {
        // the legacy id derivation predates the charset rule; a name with a
        // space stays a space
        let legacy = LegacyCustom {
            name: "My Endpoint".to_string(),
            ..LegacyCustom::default()
        };
        assert_eq!(legacy.catalog_id(), "my endpoint");
    }

    #[test]
    fn test_catalog_drops_disabled() {
        let catalog = resolve_catalog(
            envs(&[
                ("CUSTOM_OFF_URL", "http://x"),
                ("CUSTOM_OFF_MODEL", "m"),
            ]),
            None,
            &[],
        );
        assert!(catalog.specs.is_empty());
        assert!(catalog.errors.is_empty());
    }

    #[test]
    fn test_catalog_requires_url_and_model() {
        let catalog = resolve_catalog(
            std::iter::empty(),
            None,
            &[
                "nourl:model=m,enabled=true".to_string(),
                "nomodel:url=http://x,enabled=true".to_string(),
            ],
        );
        assert!(catalog.specs.is_empty());
        assert!(catalog
            .errors
            .iter()
            .any(|e| e == "custom[nourl]: missing URL"));
        assert!(catalog
            .errors
            .iter()
            .any(|e| e == "custom[nomodel]: missing model"));
    }

    #[test]
    fn test_catalog_sorted_by_id() {
        let catalog = resolve_catalog(
            std::iter::empty(),
            None,
            &[
                "zeta:url=http://z,model=m,enabled=true".to_string(),
                "alpha:url=http://a,model=m,enabled=true".to_string(),
                "mid:url=http://m,model=m,enabled=true".to_string(),
            ],
        );
        let ids: Vec<_> = catalog.specs.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, vec!["alpha", "mid", "zeta"]);
    }

    #[test]
    fn test_secrets_collected_across_merged_catalog() {
        let catalog = resolve_catalog(
            envs(&[
                ("CUSTOM_OFF_API_KEY", "disabled-secret"),
                ("CUSTOM_ON_URL", "http://x"),
                ("CUSTOM_ON_MODEL", "m"),
                ("CUSTOM_ON_ENABLED", "true"),
                ("CUSTOM_ON_API_KEY", "live-secret"),
            ]),
            None,
            &["dup:url=http://d,model=m,enabled=true,api-key=live-secret".to_string()],
        );
        let mut secrets = catalog.secrets.clone();
        secrets.sort();
        // distinct values only, disabled entries included
        assert_eq!(secrets, vec!["disabled-secret", "live-secret"]);
    }
}
