//! Numbered business rules. Codes are stable and surfaced to callers verbatim.

use chrono::NaiveDate;
use rust_decimal::Decimal;

use einvoice_invoicing::DocumentKind;

use crate::codec::{Framing, NOT_APPLICABLE, framing};
use crate::validator::ValidationIssue;
use crate::markup::Element;

type Check = fn(&Element, &Framing) -> Result<(), String>;

pub struct Rule {
    pub code: &'static str,
    pub description: &'static str,
    check: Check,
}

const SUPPLIER: &str = "cac:AccountingSupplierParty";
const CUSTOMER: &str = "cac:AccountingCustomerParty";

pub static RULES: &[Rule] = &[
    Rule {
        code: "BR-01",
        description: "document must carry an identifier",
        check: |root, _| require(root, &["cbc:ID"]).map(drop),
    },
    Rule {
        code: "BR-02",
        description: "document must carry a valid issue date",
        check: |root, _| {
            let value = require(root, &["cbc:IssueDate"])?;
            NaiveDate::parse_from_str(value, "%Y-%m-%d")
                .map(drop)
                .map_err(|_| format!("{value} is not a YYYY-MM-DD date"))
        },
    },
    Rule {
        code: "BR-03",
        description: "document currency must be a three-letter code",
        check: |root, _| {
            let value = require(root, &["cbc:DocumentCurrencyCode"])?;
            if value.len() == 3 && value.chars().all(|c| c.is_ascii_uppercase()) {
                Ok(())
            } else {
                Err(format!("{value} is not an ISO 4217 code"))
            }
        },
    },
    Rule {
        code: "BR-04",
        description: "issuer must have a name",
        check: |root, _| party_name(root, SUPPLIER),
    },
    Rule {
        code: "BR-05",
        description: "issuer must have a tax or company identifier",
        check: |root, _| party_identifier(root, SUPPLIER),
    },
    Rule {
        code: "BR-06",
        description: "issuer must have a postal address with a street line, city and country",
        check: |root, _| party_address(root, SUPPLIER),
    },
    Rule {
        code: "BR-07",
        description: "counterparty must have a name",
        check: |root, _| party_name(root, CUSTOMER),
    },
    Rule {
        code: "BR-08",
        description: "counterparty must have a tax or company identifier",
        check: |root, _| party_identifier(root, CUSTOMER),
    },
    Rule {
        code: "BR-09",
        description: "counterparty must have a postal address with a street line, city and country",
        check: |root, _| party_address(root, CUSTOMER),
    },
    Rule {
        code: "BR-10",
        description: "at least one line item must be present",
        check: |root, f| {
            if root.children_named(f.line).next().is_some() {
                Ok(())
            } else {
                Err(format!("no {} elements", f.line))
            }
        },
    },
    Rule {
        code: "BR-11",
        description: "every line must carry an id, a positive quantity and an amount",
        check: check_lines,
    },
    Rule {
        code: "BR-12",
        description: "line amounts must sum to the document line extension amount",
        check: |root, f| {
            let mut sum = Decimal::ZERO;
            for line in root.children_named(f.line) {
                sum += number(line, &["cbc:LineExtensionAmount"])?;
            }
            let declared = number(root, &[f.monetary_total, "cbc:LineExtensionAmount"])?;
            if sum == declared {
                Ok(())
            } else {
                Err(format!("lines sum to {sum}, document declares {declared}"))
            }
        },
    },
    Rule {
        code: "BR-13",
        description: "tax and payable totals must be consistent",
        check: |root, f| {
            let tax = number(root, &["cac:TaxTotal", "cbc:TaxAmount"])?;
            let mut subtotal_tax = Decimal::ZERO;
            if let Some(total) = root.child("cac:TaxTotal") {
                for sub in total.children_named("cac:TaxSubtotal") {
                    subtotal_tax += number(sub, &["cbc:TaxAmount"])?;
                }
            }
            if subtotal_tax != tax {
                return Err(format!("tax subtotals sum to {subtotal_tax}, tax total is {tax}"));
            }
            let exclusive = number(root, &[f.monetary_total, "cbc:TaxExclusiveAmount"])?;
            let payable = number(root, &[f.monetary_total, "cbc:PayableAmount"])?;
            if exclusive + tax != payable {
                return Err(format!("{exclusive} + {tax} does not equal payable {payable}"));
            }
            Ok(())
        },
    },
];

/// Value at `path` that is neither blank nor the filler.
fn require<'a>(node: &'a Element, path: &[&str]) -> Result<&'a str, String> {
    let value = node
        .path(path)
        .map(Element::value)
        .ok_or_else(|| format!("{} is missing", path.join("/")))?;
    if value.is_empty() || value == NOT_APPLICABLE {
        return Err(format!("{} has no value", path.join("/")));
    }
    Ok(value)
}

fn number(node: &Element, path: &[&str]) -> Result<Decimal, String> {
    let value = require(node, path)?;
    value
        .parse::<Decimal>()
        .map_err(|_| format!("{} is not a number: {value}", path.join("/")))
}

fn party<'a>(root: &'a Element, role: &str) -> Result<&'a Element, String> {
    root.path(&[role, "cac:Party"])
        .ok_or_else(|| format!("{role} is missing"))
}

fn party_name(root: &Element, role: &str) -> Result<(), String> {
    let party = party(root, role)?;
    require(party, &["cac:PartyLegalEntity", "cbc:RegistrationName"]).map(drop)
}

/// A TIN or BRN identification with a real value.
fn party_identifier(root: &Element, role: &str) -> Result<(), String> {
    let party = party(root, role)?;
    let identified = party
        .children_named("cac:PartyIdentification")
        .filter_map(|pi| pi.child("cbc:ID"))
        .any(|id| {
            matches!(id.attr("schemeID"), Some("TIN" | "BRN"))
                && !id.value().is_empty()
                && id.value() != NOT_APPLICABLE
        });
    if identified {
        Ok(())
    } else {
        Err(format!("{role} has no TIN or BRN identification"))
    }
}

fn party_address(root: &Element, role: &str) -> Result<(), String> {
    let party = party(root, role)?;
    let address = party
        .child("cac:PostalAddress")
        .ok_or_else(|| format!("{role} has no postal address"))?;
    let has_line = address
        .children_named("cac:AddressLine")
        .any(|line| require(line, &["cbc:Line"]).is_ok());
    if !has_line {
        return Err(format!("{role} address has no street line"));
    }
    require(address, &["cbc:CityName"])?;
    require(address, &["cac:Country", "cbc:IdentificationCode"])?;
    Ok(())
}

fn check_lines(root: &Element, f: &Framing) -> Result<(), String> {
    let mut problems = Vec::new();
    for (idx, line) in root.children_named(f.line).enumerate() {
        let position = idx + 1;
        if let Err(e) = require(line, &["cbc:ID"]) {
            problems.push(format!("line {position}: {e}"));
        }
        match number(line, &[f.quantity]) {
            Ok(q) if q > Decimal::ZERO => {}
            Ok(q) => problems.push(format!("line {position}: quantity {q} is not positive")),
            Err(e) => problems.push(format!("line {position}: {e}")),
        }
        if let Err(e) = number(line, &["cbc:LineExtensionAmount"]) {
            problems.push(format!("line {position}: {e}"));
        }
    }
    if problems.is_empty() {
        Ok(())
    } else {
        Err(problems.join(", "))
    }
}

pub(crate) fn check(root: &Element, kind: DocumentKind) -> Vec<ValidationIssue> {
    let f = framing(kind);
    let mut issues: Vec<ValidationIssue> = RULES
        .iter()
        .filter_map(|rule| {
            (rule.check)(root, &f)
                .err()
                .map(|detail| ValidationIssue::error(rule.code, format!("{}: {detail}", rule.description)))
        })
        .collect();

    if kind.is_reference_kind() && root.child("cac:BillingReference").is_none() {
        issues.push(ValidationIssue::warning(
            "W-01",
            format!("{kind} has no billing reference to the original invoice"),
        ));
    }
    let classification = root.path(&[SUPPLIER, "cac:Party", "cbc:IndustryClassificationCode"]);
    if classification.is_none_or(|c| c.value() == NOT_APPLICABLE) {
        issues.push(ValidationIssue::warning(
            "W-02",
            "issuer has no industry classification code",
        ));
    }
    issues
}
