use std::ops::RangeInclusive;
use std::str::FromStr;

use thiserror::Error;

use super::models::ImportQuery;
use crate::jobs::ImportOptions;

const THRESHOLD_RANGE: RangeInclusive<u8> = 0..=100;
const BATCH_SIZE_RANGE: RangeInclusive<u32> = 1..=100;
const BATCH_DELAY_RANGE: RangeInclusive<u64> = 0..=1000;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum OptionsValidationError {
    #[error("{field} must be an integer, got '{value}'")]
    NotANumber { field: &'static str, value: String },
    #[error("{field} must be between {min} and {max}, got {value}")]
    OutOfRange {
        field: &'static str,
        min: u64,
        max: u64,
        value: String,
    },
}

fn parse_bounded<T>(
    raw: Option<&str>,
    field: &'static str,
    range: RangeInclusive<T>,
    default: T,
) -> Result<T, OptionsValidationError>
where
    T: FromStr + PartialOrd + Copy + Into<u64>,
{
    let Some(raw) = raw.map(str::trim).filter(|v| !v.is_empty()) else {
        return Ok(default);
    };

    let out_of_range = || OptionsValidationError::OutOfRange {
        field,
        min: (*range.start()).into(),
        max: (*range.end()).into(),
        value: raw.to_string(),
    };

    // Negative or oversized integers cannot be represented but are still integers
    let value = match raw.parse::<T>() {
        Ok(value) => value,
        Err(_) if raw.parse::<i128>().is_ok() => return Err(out_of_range()),
        Err(_) => {
            return Err(OptionsValidationError::NotANumber {
                field,
                value: raw.to_string(),
            });
        }
    };

    if !range.contains(&value) {
        return Err(out_of_range());
    }
    Ok(value)
}

/// Turn `POST /import` query parameters into bounded [`ImportOptions`]
///
/// Missing parameters take their defaults (threshold 60, batch size 20,
/// batch delay 200ms).
pub fn validate_options(query: &ImportQuery) -> Result<ImportOptions, OptionsValidationError> {
    let defaults = ImportOptions::default();

    Ok(ImportOptions {
        dedupe_threshold: parse_bounded(
            query.deduplicate_threshold.as_deref(),
            "deduplicateThreshold",
            THRESHOLD_RANGE,
            defaults.dedupe_threshold,
        )?,
        batch_size: parse_bounded(
            query.batch_size.as_deref(),
            "batchSize",
            BATCH_SIZE_RANGE,
            defaults.batch_size,
        )?,
        batch_delay_ms: parse_bounded(
            query.batch_delay.as_deref(),
            "batchDelay",
            BATCH_DELAY_RANGE,
            defaults.batch_delay_ms,
        )?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn query(threshold: Option<&str>, size: Option<&str>, delay: Option<&str>) -> ImportQuery {
        ImportQuery {
            deduplicate_threshold: threshold.map(String::from),
            batch_size: size.map(String::from),
            batch_delay: delay.map(String::from),
        }
    }

    #[test]
    fn test_defaults_when_absent() {
        assert_eq!(validate_options(&ImportQuery::default()).unwrap(), ImportOptions::default());
    }

    #[test]
    fn test_accepts_bounds() {
        let options = validate_options(&query(Some("100"), Some("1"), Some("0"))).unwrap();
        assert_eq!(options.dedupe_threshold, 100);
        assert_eq!(options.batch_size, 1);
        assert_eq!(options.batch_delay_ms, 0);

        let options = validate_options(&query(Some("0"), Some("100"), Some("1000"))).unwrap();
        assert_eq!(options.batch_delay_ms, 1000);
    }

    #[test]
    fn test_rejects_out_of_range() {
        assert!(matches!(
            validate_options(&query(Some("101"), None, None)),
            Err(OptionsValidationError::OutOfRange { field: "deduplicateThreshold", .. })
        ));
        assert!(matches!(
            validate_options(&query(None, Some("0"), None)),
            Err(OptionsValidationError::OutOfRange { field: "batchSize", .. })
        ));
        assert!(matches!(
            validate_options(&query(None, None, Some("-5"))),
            Err(OptionsValidationError::OutOfRange { field: "batchDelay", .. })
        ));
    }

    #[test]
    fn test_rejects_non_numbers() {
        assert!(matches!(
            validate_options(&query(None, Some("ten"), None)),
            Err(OptionsValidationError::NotANumber { field: "batchSize", .. })
        ));
    }
}
