use rust_decimal::Decimal;
use unirecon_core::{CanonicalField, CoercionError, ComparisonLogic, DataType, Row, Value};

const HUNDRED: Decimal = Decimal::ONE_HUNDRED;

/// Names of the COMPARE fields on which `candidate` differs from `anchor`.
///
/// Every field is evaluated, so a malformed value anywhere in the record
/// surfaces even when an earlier field already differed.
pub fn differing_fields<'f>(
    anchor: &Row,
    candidate: &Row,
    compare_fields: &'f [CanonicalField],
) -> Result<Vec<&'f str>, CoercionError> {
    let mut differing = Vec::new();
    for field in compare_fields {
        if !compare_values(anchor.value(&field.name), candidate.value(&field.name), field)? {
            differing.push(field.name.as_str());
        }
    }
    Ok(differing)
}

/// Compare an anchor value (`left`) with a candidate value (`right`).
pub fn compare_values(left: &Value, right: &Value, field: &CanonicalField) -> Result<bool, CoercionError> {
    if left.is_null() || right.is_null() {
        return Ok(left.is_null() && right.is_null());
    }
    match field.comparison {
        ComparisonLogic::ExactMatch => normalized_equals(left, right, field.data_type),
        ComparisonLogic::CaseInsensitive => Ok(left.to_string().to_lowercase() == right.to_string().to_lowercase()),
        ComparisonLogic::NumericThreshold => {
            within_threshold(left, right, field.threshold_percentage.unwrap_or(Decimal::ZERO))
        }
        ComparisonLogic::DateOnly => Ok(left.to_date()? == right.to_date()?),
    }
}

fn normalized_equals(left: &Value, right: &Value, data_type: DataType) -> Result<bool, CoercionError> {
    Ok(match data_type {
        DataType::Decimal | DataType::Integer => left.to_decimal()? == right.to_decimal()?,
        DataType::Date => left.to_date()? == right.to_date()?,
        DataType::DateTime => left.to_datetime()? == right.to_datetime()?,
        DataType::Boolean => left.to_bool()? == right.to_bool()?,
        DataType::String => left.to_string() == right.to_string(),
    })
}

/// Tolerance is `|left| * pct / 100`, taken from the anchor side only, so
/// swapping the operands can change the outcome.
fn within_threshold(left: &Value, right: &Value, percentage: Decimal) -> Result<bool, CoercionError> {
    let left = left.to_decimal()?;
    let right = right.to_decimal()?;
    let tolerance = left
        .abs()
        .checked_mul(percentage)
        .and_then(|t| t.checked_div(HUNDRED))
        .unwrap_or(Decimal::MAX);
    Ok(match left.checked_sub(right) {
        Some(diff) => diff.abs() <= tolerance,
        None => false,
    })
}
