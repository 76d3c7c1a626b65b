//! Fixed-point line and total arithmetic.
//!
//! The registry denominates amounts in whole currency units, so every derived
//! amount is rounded to [`AMOUNT_SCALE`] decimal places. Quantities and rates
//! keep their input precision.

use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};

use einvoice_core::{DomainError, DomainResult, ValueObject};

/// Decimal places kept on monetary amounts.
pub const AMOUNT_SCALE: u32 = 0;

/// Unit code used when the caller does not provide one (UN/ECE rec 20 "one").
pub const DEFAULT_UNIT_CODE: &str = "C62";

const HUNDRED: Decimal = Decimal::ONE_HUNDRED;

/// Round an amount to whole units, half away from zero.
pub fn round_amount(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(AMOUNT_SCALE, RoundingStrategy::MidpointAwayFromZero)
}

/// Line data as supplied by the caller. Derived amounts are not accepted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineItemInput {
    pub line_no: u32,
    pub description: String,
    pub quantity: Decimal,
    #[serde(default)]
    pub unit_code: Option<String>,
    pub unit_price: Decimal,
    /// Percentage, e.g. `10` for 10%.
    pub tax_rate: Decimal,
    #[serde(default)]
    pub classification_code: Option<String>,
}

/// Invoice line with recomputed totals.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineItem {
    line_no: u32,
    description: String,
    quantity: Decimal,
    unit_code: String,
    unit_price: Decimal,
    tax_rate: Decimal,
    classification_code: Option<String>,
    line_total: Decimal,
    tax_amount: Decimal,
}

impl LineItem {
    /// Validate a caller line and derive `line_total = quantity × unit_price`
    /// and `tax_amount = line_total × tax_rate / 100`.
    pub fn from_input(input: &LineItemInput) -> DomainResult<Self> {
        if input.line_no == 0 {
            return Err(DomainError::validation("line numbers are 1-based"));
        }
        if input.quantity <= Decimal::ZERO {
            return Err(DomainError::validation(format!(
                "line {}: quantity must be positive",
                input.line_no
            )));
        }
        if input.unit_price < Decimal::ZERO {
            return Err(DomainError::validation(format!(
                "line {}: unit_price must not be negative",
                input.line_no
            )));
        }
        if input.tax_rate < Decimal::ZERO || input.tax_rate > HUNDRED {
            return Err(DomainError::validation(format!(
                "line {}: tax_rate must be between 0 and 100",
                input.line_no
            )));
        }

        let gross = input
            .quantity
            .checked_mul(input.unit_price)
            .ok_or_else(|| DomainError::invariant("line amount overflow"))?;
        let line_total = round_amount(gross);
        let tax = line_total
            .checked_mul(input.tax_rate)
            .and_then(|v| v.checked_div(HUNDRED))
            .ok_or_else(|| DomainError::invariant("line tax overflow"))?;

        let unit_code = input
            .unit_code
            .as_deref()
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .unwrap_or(DEFAULT_UNIT_CODE)
            .to_string();

        Ok(Self {
            line_no: input.line_no,
            description: input.description.trim().to_string(),
            quantity: input.quantity,
            unit_code,
            unit_price: input.unit_price,
            tax_rate: input.tax_rate,
            classification_code: input.classification_code.clone(),
            line_total,
            tax_amount: round_amount(tax),
        })
    }

    pub fn line_no(&self) -> u32 {
        self.line_no
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn quantity(&self) -> Decimal {
        self.quantity
    }

    pub fn unit_code(&self) -> &str {
        &self.unit_code
    }

    pub fn unit_price(&self) -> Decimal {
        self.unit_price
    }

    pub fn tax_rate(&self) -> Decimal {
        self.tax_rate
    }

    pub fn classification_code(&self) -> Option<&str> {
        self.classification_code.as_deref()
    }

    pub fn line_total(&self) -> Decimal {
        self.line_total
    }

    pub fn tax_amount(&self) -> Decimal {
        self.tax_amount
    }
}

/// Monetary summary of an invoice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Totals {
    pub subtotal: Decimal,
    pub tax_total: Decimal,
    pub grand_total: Decimal,
}

impl ValueObject for Totals {}

impl Totals {
    pub fn zero() -> Self {
        Self {
            subtotal: Decimal::ZERO,
            tax_total: Decimal::ZERO,
            grand_total: Decimal::ZERO,
        }
    }

    /// Sum recomputed line amounts.
    pub fn from_lines(lines: &[LineItem]) -> DomainResult<Self> {
        let mut subtotal = Decimal::ZERO;
        let mut tax_total = Decimal::ZERO;
        for line in lines {
            subtotal = subtotal
                .checked_add(line.line_total)
                .ok_or_else(|| DomainError::invariant("invoice subtotal overflow"))?;
            tax_total = tax_total
                .checked_add(line.tax_amount)
                .ok_or_else(|| DomainError::invariant("invoice tax total overflow"))?;
        }
        let grand_total = subtotal
            .checked_add(tax_total)
            .ok_or_else(|| DomainError::invariant("invoice total overflow"))?;
        Ok(Self {
            subtotal,
            tax_total,
            grand_total,
        })
    }

    /// Whether these declared totals equal `computed` rounded to whole units.
    /// The declared side is taken as given, so 100.4 never matches 100.
    pub fn matches(&self, computed: &Totals) -> bool {
        self.subtotal == round_amount(computed.subtotal)
            && self.tax_total == round_amount(computed.tax_total)
            && self.grand_total == round_amount(computed.grand_total)
    }
}

/// Build ordered line items, enforcing unique contiguous 1-based numbering.
pub(crate) fn build_lines(inputs: &[LineItemInput]) -> DomainResult<Vec<LineItem>> {
    let mut lines = inputs
        .iter()
        .map(LineItem::from_input)
        .collect::<DomainResult<Vec<_>>>()?;
    lines.sort_by_key(|l| l.line_no);

    for (idx, line) in lines.iter().enumerate() {
        let expected = (idx as u32) + 1;
        if line.line_no != expected {
            return Err(DomainError::validation(format!(
                "line numbers must be unique and contiguous from 1 (expected {expected}, found {})",
                line.line_no
            )));
        }
    }
    Ok(lines)
}
