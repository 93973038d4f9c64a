//! Environment construction for child processes.

use std::collections::BTreeMap;

/// Overlay `overrides` on top of `base`.
///
/// Keys present in both take the override's value. The result is sorted
/// by key so the environment handed to a child is deterministic.
pub fn overlay_env<B, K, V>(base: B, overrides: &[(K, V)]) -> Vec<(String, String)>
where
    B: IntoIterator<Item = (String, String)>,
    K: AsRef<str>,
    V: AsRef<str>,
{
    let mut merged: BTreeMap<String, String> = base.into_iter().collect();
    for (key, value) in overrides {
        merged.insert(key.as_ref().to_string(), value.as_ref().to_string());
    }
    merged.into_iter().collect()
}
