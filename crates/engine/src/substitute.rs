//! `{{NAME}}` placeholder substitution for step scripts.
//!
//! Names match exactly and case-sensitively, with no whitespace allowed
//! inside the braces. Placeholders with no matching variable are left as
//! they are. Substitution is a single pass, so a value that itself contains
//! `{{OTHER}}` is inserted literally and never expanded.

use std::collections::BTreeMap;
use std::sync::LazyLock;

use regex::{Captures, Regex};

static PLACEHOLDER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{\{([^{}]+)\}\}").expect("placeholder pattern is valid"));

/// Replace every `{{NAME}}` in `template` with `variables[NAME]`.
pub fn substitute(template: &str, variables: &BTreeMap<String, String>) -> String {
    PLACEHOLDER
        .replace_all(template, |caps: &Captures<'_>| match variables.get(&caps[1]) {
            Some(value) => value.clone(),
            None => caps[0].to_owned(),
        })
        .into_owned()
}
