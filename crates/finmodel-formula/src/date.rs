//! Calendar arithmetic for date-offset formulas
//!
//! Month arithmetic follows spreadsheet `EDATE`/`EOMONTH` semantics on proleptic
//! Gregorian dates: adding months keeps the day of month where possible and clamps
//! to the last day of shorter months (2024-01-31 + 1 month = 2024-02-29).

use crate::error::{FormulaError, FormulaResult};
use chrono::{Datelike, Duration, Months, NaiveDate};

/// Shift a date by whole months, clamping to the month end
pub fn edate(start: NaiveDate, months: i64) -> FormulaResult<NaiveDate> {
    let shifted = if months >= 0 {
        u32::try_from(months)
            .ok()
            .and_then(|m| start.checked_add_months(Months::new(m)))
    } else {
        u32::try_from(months.unsigned_abs())
            .ok()
            .and_then(|m| start.checked_sub_months(Months::new(m)))
    };

    shifted.ok_or_else(|| {
        FormulaError::InvalidDate(format!("{} shifted by {} months", start, months))
    })
}

/// Last day of the month `months` months away from `start`
pub fn eomonth(start: NaiveDate, months: i64) -> FormulaResult<NaiveDate> {
    let first = start
        .with_day(1)
        .ok_or_else(|| FormulaError::InvalidDate(start.to_string()))?;
    let next_month = edate(first, months.saturating_add(1))?;
    next_month
        .pred_opt()
        .ok_or_else(|| FormulaError::InvalidDate(format!("end of month before {}", next_month)))
}

/// Shift a date by whole days
pub fn add_days(date: NaiveDate, days: i64) -> FormulaResult<NaiveDate> {
    Duration::try_days(days)
        .and_then(|d| date.checked_add_signed(d))
        .ok_or_else(|| FormulaError::InvalidDate(format!("{} shifted by {} days", date, days)))
}

/// Signed number of days from `start` to `end`
pub fn days_between(start: NaiveDate, end: NaiveDate) -> i64 {
    end.signed_duration_since(start).num_days()
}

/// Whole months from a computed month count, truncated toward zero
pub fn whole_months(months: f64) -> FormulaResult<i64> {
    if !months.is_finite() || months.abs() >= 1e9 {
        return Err(FormulaError::InvalidDate(format!(
            "month offset {} is out of range",
            months
        )));
    }
    Ok(months.trunc() as i64)
}
