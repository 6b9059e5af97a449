// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Argument validation, applied before any wire call is made.

use crate::{ErrorKind, Result};

pub(crate) fn validate_limit(limit: Option<usize>) -> Result<()> {
    if limit == Some(0) {
        return Err(ErrorKind::InvalidArgument.with_message("limit must be greater than 0"));
    }
    Ok(())
}

pub(crate) fn validate_tail_limit(tail_limit: Option<usize>) -> Result<()> {
    if tail_limit == Some(0) {
        return Err(ErrorKind::InvalidArgument.with_message("tail_limit must be greater than 0"));
    }
    Ok(())
}

pub(crate) fn validate_step_range(step_range: (Option<f64>, Option<f64>)) -> Result<()> {
    let (start, end) = step_range;
    if start.is_some_and(f64::is_nan) || end.is_some_and(f64::is_nan) {
        return Err(ErrorKind::InvalidArgument.with_message("step_range bounds must not be NaN"));
    }
    if let (Some(start), Some(end)) = (start, end) {
        if start > end {
            return Err(ErrorKind::InvalidArgument
                .with_message("step_range start must be less than or equal to end"));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_limits_are_rejected() {
        assert!(validate_limit(Some(0)).is_err());
        assert!(validate_limit(Some(1)).is_ok());
        assert!(validate_limit(None).is_ok());
        assert!(validate_tail_limit(Some(0)).is_err());
        assert!(validate_tail_limit(Some(5)).is_ok());
    }

    #[test]
    fn inverted_step_range_is_rejected() {
        assert!(validate_step_range((Some(2.0), Some(1.0))).is_err());
        assert!(validate_step_range((Some(1.0), Some(1.0))).is_ok());
        assert!(validate_step_range((None, Some(1.0))).is_ok());
        assert!(validate_step_range((Some(1.0), None)).is_ok());
        assert!(validate_step_range((Some(f64::NAN), None)).is_err());
    }
}
