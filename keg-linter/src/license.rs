use crate::VALID_LICENSES;

/// Splits an SPDX expression like `MIT OR (Apache-2.0 WITH LLVM-exception)`
/// into its identifiers. Exception names after `WITH` are skipped.
pub fn license_ids(expr: &str) -> Vec<&str> {
    let mut ids = Vec::new();
    let mut skip_next = false;
    for word in expr.split_whitespace() {
        let word = word.trim_matches(|c| c == '(' || c == ')');
        match word {
            "" | "OR" | "AND" => {}
            "WITH" => skip_next = true,
            _ if skip_next => skip_next = false,
            id => ids.push(id.trim_end_matches('+')),
        }
    }
    ids
}

pub fn is_known_license(id: &str) -> bool {
    VALID_LICENSES.lines().any(|line| line.trim() == id)
}

/// Identifiers in `expr` that are not known SPDX licenses.
pub fn unknown_licenses(expr: &str) -> Vec<String> {
    license_ids(expr)
        .into_iter()
        .filter(|id| !is_known_license(id))
        .map(String::from)
        .collect()
}
