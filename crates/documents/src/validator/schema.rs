use einvoice_invoicing::DocumentKind;

use crate::codec::{NS_CAC, NS_CBC, framing};
use crate::validator::ValidationIssue;
use crate::markup::Element;

pub(crate) fn check(root: &Element, kind: DocumentKind) -> Vec<ValidationIssue> {
    let expected = framing(kind);
    let mut issues = Vec::new();

    if root.name != expected.root {
        issues.push(ValidationIssue::error(
            "SCH-001",
            format!(
                "root element {} does not match {} (expected {})",
                root.name, kind, expected.root
            ),
        ));
    }
    if root.attr("xmlns") != Some(expected.namespace) {
        issues.push(ValidationIssue::error(
            "SCH-002",
            format!("default namespace must be {}", expected.namespace),
        ));
    }
    if root.attr("xmlns:cac") != Some(NS_CAC) || root.attr("xmlns:cbc") != Some(NS_CBC) {
        issues.push(ValidationIssue::error(
            "SCH-003",
            "cac/cbc prefixes must be bound to the UBL component namespaces",
        ));
    }
    issues
}
