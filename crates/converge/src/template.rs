//! `{{ fact }}` placeholder substitution for file contents

use crate::facts::Facts;
use crate::rules::RuleError;
use regex::{Captures, Regex};
use std::sync::LazyLock;

static PLACEHOLDER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\{\{\s*([A-Za-z0-9_.]+)\s*\}\}").expect("placeholder pattern is valid")
});

/// Replace every `{{ key }}` with the fact of that name.
///
/// Fails on the first placeholder naming an absent fact.
pub fn render(content: &str, facts: &Facts) -> Result<String, RuleError> {
    if let Some(missing) = PLACEHOLDER
        .captures_iter(content)
        .map(|caps| caps[1].to_string())
        .find(|key| !facts.contains(key))
    {
        return Err(RuleError::MissingFact(missing));
    }

    Ok(PLACEHOLDER
        .replace_all(content, |caps: &Captures| {
            facts.get(&caps[1]).unwrap_or_default().to_string()
        })
        .into_owned())
}
