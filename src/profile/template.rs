// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 teeprov contributors

//! `{placeholder}` expansion for manifest strings

use std::collections::BTreeMap;

use crate::errors::ProvisionError;

/// Placeholders only known once a stage is running
pub const RUNTIME_PLACEHOLDERS: &[&str] = &["artifact", "installer", "source_tree", "install_root", "jobs"];

/// Expand `{name}` placeholders in `template`.
///
/// Names in `passthrough` are left untouched so they can be filled in later;
/// any other unknown name is a configuration error.
pub fn expand(
    template: &str,
    vars: &BTreeMap<&str, String>,
    passthrough: &[&str],
) -> Result<String, ProvisionError> {
    let re = regex::Regex::new(r"\{([a-z_]+)\}").map_err(|e| ProvisionError::config(e.to_string()))?;

    let mut out = String::with_capacity(template.len());
    let mut last = 0;

    for caps in re.captures_iter(template) {
        let whole = caps.get(0).map(|m| m.range()).unwrap_or(0..0);
        let name = &caps[1];

        out.push_str(&template[last..whole.start]);
        match vars.get(name) {
            Some(value) => out.push_str(value),
            None if passthrough.contains(&name) => out.push_str(&template[whole.clone()]),
            None => {
                return Err(ProvisionError::Configuration {
                    reason: format!("unknown placeholder '{{{}}}' in '{}'", name, template),
                    help: Some(format!(
                        "Known placeholders: {}",
                        vars.keys()
                            .copied()
                            .chain(passthrough.iter().copied())
                            .collect::<Vec<_>>()
                            .join(", ")
                    )),
                })
            }
        }
        last = whole.end;
    }

    out.push_str(&template[last..]);
    Ok(out)
}

/// Fill runtime placeholders, leaving nothing unresolved
pub fn fill_runtime(template: &str, runtime: &[(&str, String)]) -> Result<String, ProvisionError> {
    let vars: BTreeMap<&str, String> = runtime.iter().cloned().collect();
    expand(template, &vars, &[])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars() -> BTreeMap<&'static str, String> {
        let mut vars = BTreeMap::new();
        vars.insert("version", "2.15".to_string());
        vars.insert("distro_id", "ubuntu20.04".to_string());
        vars
    }

    #[test]
    fn test_expand_known_placeholders() {
        let out = expand("sgx/{version}/distro/{distro_id}-server", &vars(), &[]).unwrap();
        assert_eq!(out, "sgx/2.15/distro/ubuntu20.04-server");
    }

    #[test]
    fn test_passthrough_is_preserved() {
        let out = expand("{artifact} --prefix {version}", &vars(), RUNTIME_PLACEHOLDERS).unwrap();
        assert_eq!(out, "{artifact} --prefix 2.15");
    }

    #[test]
    fn test_unknown_placeholder_is_rejected() {
        let err = expand("{nope}", &vars(), RUNTIME_PLACEHOLDERS).unwrap_err();
        assert!(matches!(err, ProvisionError::Configuration { .. }));
        assert!(err.to_string().contains("{nope}"));
    }

    #[test]
    fn test_non_placeholder_braces_are_left_alone() {
        let out = expand("${HOME}/x {VERSION}", &vars(), &[]).unwrap();
        assert_eq!(out, "${HOME}/x {VERSION}");
    }
}
