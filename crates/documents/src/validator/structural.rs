use crate::validator::ValidationIssue;
use crate::markup::{self, Element};

pub(crate) const MISSING_DECLARATION: &str = "XML-001";
pub(crate) const MALFORMED: &str = "XML-002";
pub(crate) const EMPTY_ELEMENT: &str = "XML-003";

/// Parse the document. `Err` means the document is unreadable and no further
/// phase can run.
pub(crate) fn check(input: &str) -> Result<(Element, Vec<ValidationIssue>), ValidationIssue> {
    let parsed = markup::parse(input)
        .map_err(|reason| ValidationIssue::error(MALFORMED, format!("malformed document: {reason}")))?;

    let mut issues = Vec::new();
    if !parsed.has_declaration {
        issues.push(ValidationIssue::error(
            MISSING_DECLARATION,
            "document must start with an XML declaration",
        ));
    }

    let mut path = Vec::new();
    collect_empty(&parsed.root, &mut path, &mut issues);
    Ok((parsed.root, issues))
}

fn collect_empty<'a>(node: &'a Element, path: &mut Vec<&'a str>, issues: &mut Vec<ValidationIssue>) {
    path.push(&node.name);
    if node.is_empty() {
        issues.push(ValidationIssue::error(
            EMPTY_ELEMENT,
            format!("empty element {}", path.join("/")),
        ));
    }
    for child in &node.children {
        collect_empty(child, path, issues);
    }
    path.pop();
}
