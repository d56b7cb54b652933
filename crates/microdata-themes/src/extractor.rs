//! Label extraction from a data dictionary.

use microdata_types::{DataDictionary, LabelGroup, Variable};
use tracing::debug;

use crate::quality::is_valid_variable;

/// Group variable names under their label.
///
/// Invalid variables are dropped, the remainder is stable-sorted by raw label
/// and folded into a [`LabelGroup`] keyed by the trimmed label:
///
/// ```text
/// {
///     "label1": ["vname1"],
///     "label2": ["vname2"],
///     "label3": ["vname3", "vname3.1"],
/// }
/// ```
///
/// The result does not depend on the order of `dictionary.variables` apart
/// from the relative order of names that share an identical raw label.
pub fn extract_label_groups(dictionary: &DataDictionary) -> LabelGroup {
    let mut variables: Vec<&Variable> = dictionary
        .variables
        .iter()
        .filter(|v| is_valid_variable(v))
        .collect();
    variables.sort_by(|a, b| a.label_text().cmp(b.label_text()));

    let mut groups = LabelGroup::new();
    for var in &variables {
        groups
            .entry(var.label_text().trim().to_string())
            .or_default()
            .push(var.name.clone());
    }

    debug!(
        variables = dictionary.variables.len(),
        valid = variables.len(),
        labels = groups.len(),
        "Extracted label groups"
    );
    groups
}

/// Sorted label keys of a group, the order used for embedding and regrouping.
pub fn sorted_labels(groups: &LabelGroup) -> Vec<String> {
    groups.keys().cloned().collect()
}
