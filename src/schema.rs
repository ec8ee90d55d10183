use std::collections::HashMap;

use anyhow::{Context, Result};
use regex::Regex;

/// Package prefix for provider resources. For these tokens the package is
/// the third segment, not the first.
const PROVIDERS_PACKAGE_PREFIX: &str = "pulumi:providers:";

/// Canonicalize a resource or function token. Tokens are three-segment
/// `package:module:type` strings; a missing or empty module segment means
/// `index`.
pub fn canonicalize_token(token: &str) -> String {
    let parts: Vec<&str> = token.split(':').collect();
    match parts.as_slice() {
        [package, member] => format!("{}:index:{}", package, member),
        [package, module, member] => {
            let module = if module.is_empty() { "index" } else { module };
            format!("{}:{}:{}", package, module, member)
        }
        _ => token.to_string(),
    }
}

/// The package a token belongs to. Provider tokens name their package in
/// the third segment.
pub fn package_of_token(token: &str) -> &str {
    if let Some(package) = token.strip_prefix(PROVIDERS_PACKAGE_PREFIX) {
        return package;
    }
    token.split(':').next().unwrap_or(token)
}

/// Parsed package metadata served by the schema loader.
#[derive(Debug, Default)]
pub struct PackageSchema {
    pub name: String,
    /// Regex applied to raw module segments to recover the canonical
    /// module name. Some packages report tokens with non-canonical modules.
    module_format: Option<Regex>,
    pub resources: HashMap<String, ResourceSchema>,
    pub functions: HashMap<String, FunctionSchema>,
}

#[derive(Debug, Default)]
pub struct ResourceSchema {
    pub is_component: bool,
    /// Names of the schema-declared output properties.
    pub outputs: Vec<String>,
    /// Method name → full function token.
    pub methods: HashMap<String, String>,
}

#[derive(Debug, Default)]
pub struct FunctionSchema {
    /// When true the whole return map is the call result; otherwise the
    /// return must have exactly one property.
    pub returns_object: bool,
}

impl PackageSchema {
    /// Parse the loader's schema document.
    pub fn parse(document: &serde_json::Value) -> Result<Self> {
        let name = document
            .get("name")
            .and_then(|n| n.as_str())
            .context("Package schema missing name")?
            .to_string();

        let module_format = document
            .get("meta")
            .and_then(|m| m.get("moduleFormat"))
            .and_then(|f| f.as_str())
            .map(Regex::new)
            .transpose()
            .context("Invalid moduleFormat regex in package schema")?;

        let mut resources = HashMap::new();
        if let Some(entries) = document.get("resources").and_then(|r| r.as_object()) {
            for (token, entry) in entries {
                let is_component = entry
                    .get("isComponent")
                    .and_then(|c| c.as_bool())
                    .unwrap_or(false);
                let outputs = entry
                    .get("outputs")
                    .and_then(|o| o.as_array())
                    .map(|names| {
                        names
                            .iter()
                            .filter_map(|n| n.as_str().map(str::to_string))
                            .collect()
                    })
                    .unwrap_or_default();
                let methods = entry
                    .get("methods")
                    .and_then(|m| m.as_object())
                    .map(|methods| {
                        methods
                            .iter()
                            .filter_map(|(name, tok)| {
                                tok.as_str().map(|t| (name.clone(), t.to_string()))
                            })
                            .collect()
                    })
                    .unwrap_or_default();
                resources.insert(
                    token.clone(),
                    ResourceSchema {
                        is_component,
                        outputs,
                        methods,
                    },
                );
            }
        }

        let mut functions = HashMap::new();
        if let Some(entries) = document.get("functions").and_then(|f| f.as_object()) {
            for (token, entry) in entries {
                let returns_object = entry
                    .get("returnsObject")
                    .and_then(|r| r.as_bool())
                    .unwrap_or(true);
                functions.insert(token.clone(), FunctionSchema { returns_object });
            }
        }

        Ok(PackageSchema {
            name,
            module_format,
            resources,
            functions,
        })
    }

    /// Canonical module name for a token, applying the package's module
    /// format regex when one is declared.
    pub fn token_to_module(&self, token: &str) -> String {
        let raw = token.split(':').nth(1).unwrap_or("");
        if raw.is_empty() {
            return "index".to_string();
        }
        if let Some(ref format) = self.module_format {
            if let Some(captures) = format.captures(raw) {
                let matched = captures
                    .get(1)
                    .or_else(|| captures.get(0))
                    .map(|m| m.as_str())
                    .unwrap_or(raw);
                if !matched.is_empty() {
                    return matched.to_string();
                }
            }
        }
        raw.split('/').next().unwrap_or(raw).to_string()
    }

    /// Canonicalize an arbitrary token against this package's module
    /// format: `package:module:member` with the module remapped.
    fn canonical_form(&self, token: &str) -> String {
        let parts: Vec<&str> = token.split(':').collect();
        if parts.len() != 3 {
            return canonicalize_token(token);
        }
        format!(
            "{}:{}:{}",
            parts[0],
            self.token_to_module(token),
            parts[2]
        )
    }

    /// Look up a function by token: direct lookup first, then a scan that
    /// remaps every declared token's module. Returns the declared token
    /// (the one the monitor expects) alongside the schema.
    pub fn find_function(&self, token: &str) -> Option<(String, &FunctionSchema)> {
        let wanted = canonicalize_token(token);
        if let Some(schema) = self.functions.get(&wanted) {
            return Some((wanted, schema));
        }
        if let Some(schema) = self.functions.get(token) {
            return Some((token.to_string(), schema));
        }
        for (declared, schema) in &self.functions {
            if self.canonical_form(declared) == wanted {
                return Some((declared.clone(), schema));
            }
        }
        None
    }

    /// Look up a resource by token, with the same canonicalization
    /// fallback as `find_function`.
    pub fn find_resource(&self, token: &str) -> Option<&ResourceSchema> {
        let wanted = canonicalize_token(token);
        if let Some(schema) = self.resources.get(&wanted) {
            return Some(schema);
        }
        if let Some(schema) = self.resources.get(token) {
            return Some(schema);
        }
        self.resources
            .iter()
            .find(|(declared, _)| self.canonical_form(declared) == wanted)
            .map(|(_, schema)| schema)
    }
}
