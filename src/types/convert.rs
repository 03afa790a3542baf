//! # Value Conversions
//!
//! `cast` implements the conversions needed by CONVERT/CAST evaluation and by
//! the rewriter's inversion of conversion functions:
//!
//! | From | To | Rule |
//! |------|----|------|
//! | numeric | numeric | range checked, fractions truncated toward zero |
//! | numeric/boolean/date/timestamp | string | canonical text form |
//! | string | anything parseable | trimmed parse, error if malformed |
//! | boolean | numeric | 1 / 0 |
//! | numeric/string | boolean | zero or "false" is false |
//! | date | timestamp | midnight |
//! | timestamp | date | date part (floor) |
//! | string/varbinary | LOB | inline payload |
//!
//! NULL converts to NULL for every target.
//!
//! `is_widening` and `is_injective` tell the rewriter when `convert(x, T) op c`
//! may be rewritten as `x op convert(c, S)`.

use eyre::{bail, ensure, eyre, Result};

use super::value::{LobValue, MICROS_PER_DAY};
use super::{DataType, Value};

const MICROS_PER_SECOND: i64 = 1_000_000;

pub fn cast(value: &Value, target: DataType) -> Result<Value> {
    if value.is_null() {
        return Ok(Value::Null);
    }
    if value.data_type() == target {
        return Ok(value.clone());
    }

    let converted = match target {
        DataType::Null => None,
        DataType::Boolean => to_boolean(value)?,
        DataType::Integer => match to_i128(value)? {
            Some(i) => Some(Value::Integer(
                i32::try_from(i).map_err(|_| out_of_range(value, target))?,
            )),
            None => None,
        },
        DataType::Long => match to_i128(value)? {
            Some(i) => Some(Value::Long(
                i64::try_from(i).map_err(|_| out_of_range(value, target))?,
            )),
            None => None,
        },
        DataType::Double => to_double(value)?,
        DataType::Decimal => to_decimal(value)?,
        DataType::String => to_string(value),
        DataType::Date => match value {
            Value::Timestamp(micros) => Some(Value::Date(
                i32::try_from(micros.div_euclid(MICROS_PER_DAY))
                    .map_err(|_| out_of_range(value, target))?,
            )),
            Value::String(s) => Some(Value::Date(parse_date(s)?)),
            _ => None,
        },
        DataType::Timestamp => match value {
            Value::Date(days) => Some(Value::Timestamp(*days as i64 * MICROS_PER_DAY)),
            Value::String(s) => Some(Value::Timestamp(parse_timestamp(s)?)),
            _ => None,
        },
        DataType::Varbinary => match value {
            Value::String(s) => Some(Value::Varbinary(s.as_bytes().to_vec())),
            Value::Blob(lob) => lob.inline_bytes().map(|b| Value::Varbinary(b.to_vec())),
            _ => None,
        },
        DataType::Clob | DataType::Xml => match value {
            Value::String(s) => {
                let lob = LobValue::inline(s.as_bytes().to_vec());
                Some(if target == DataType::Clob {
                    Value::Clob(lob)
                } else {
                    Value::Xml(lob)
                })
            }
            Value::Clob(lob) | Value::Xml(lob) => Some(if target == DataType::Clob {
                Value::Clob(lob.clone())
            } else {
                Value::Xml(lob.clone())
            }),
            _ => None,
        },
        DataType::Blob => match value {
            Value::Varbinary(bytes) => Some(Value::Blob(LobValue::inline(bytes.clone()))),
            _ => None,
        },
        DataType::Object => None,
    };

    converted.ok_or_else(|| {
        eyre!(
            "cannot convert {} value '{}' to {}",
            value.data_type(),
            value,
            target
        )
    })
}

/// True when every value of `from` converts to `to` without loss and the
/// conversion preserves ordering.
pub fn is_widening(from: DataType, to: DataType) -> bool {
    use DataType::*;

    from == to
        || matches!(
            (from, to),
            (Integer, Long)
                | (Integer, Double)
                | (Integer, Decimal)
                | (Long, Decimal)
                | (Date, Timestamp)
        )
}

/// True when distinct values of `from` always convert to distinct values of
/// `to`, so equality survives the inverse conversion.
pub fn is_injective(from: DataType, to: DataType) -> bool {
    use DataType::*;

    is_widening(from, to)
        || (to == String && matches!(from, Integer | Long | Boolean | Date | Timestamp))
}

fn out_of_range(value: &Value, target: DataType) -> eyre::Report {
    eyre!("value '{}' is out of range for {}", value, target)
}

fn to_boolean(value: &Value) -> Result<Option<Value>> {
    Ok(match value {
        Value::String(s) => {
            let trimmed = s.trim();
            if trimmed.eq_ignore_ascii_case("true") || trimmed == "1" {
                Some(Value::Boolean(true))
            } else if trimmed.eq_ignore_ascii_case("false") || trimmed == "0" {
                Some(Value::Boolean(false))
            } else {
                bail!("cannot convert string '{}' to boolean", s);
            }
        }
        other => other
            .signum()
            .map(|sign| Value::Boolean(sign != std::cmp::Ordering::Equal)),
    })
}

fn to_i128(value: &Value) -> Result<Option<i128>> {
    Ok(match value {
        Value::Boolean(b) => Some(*b as i128),
        Value::Integer(i) => Some(*i as i128),
        Value::Long(l) => Some(*l as i128),
        Value::Double(d) => {
            ensure!(d.is_finite(), "cannot convert {} to an integral type", d);
            let truncated = d.trunc();
            ensure!(
                truncated >= i64::MIN as f64 && truncated <= i64::MAX as f64,
                "value '{}' is out of range for long",
                d
            );
            Some(truncated as i128)
        }
        Value::Decimal { digits, scale } => Some(truncate_decimal(*digits, *scale)?),
        Value::String(s) => {
            let trimmed = s.trim();
            Some(
                trimmed
                    .parse::<i128>()
                    .map_err(|_| eyre!("cannot convert string '{}' to an integral type", s))?,
            )
        }
        _ => None,
    })
}

fn truncate_decimal(digits: i128, scale: i16) -> Result<i128> {
    if scale <= 0 {
        let factor = 10i128
            .checked_pow(scale.unsigned_abs() as u32)
            .ok_or_else(|| eyre!("decimal scale {} out of range", scale))?;
        return digits
            .checked_mul(factor)
            .ok_or_else(|| eyre!("decimal value out of range"));
    }
    match 10i128.checked_pow(scale as u32) {
        Some(divisor) => Ok(digits / divisor),
        None => Ok(0),
    }
}

fn to_double(value: &Value) -> Result<Option<Value>> {
    Ok(match value {
        Value::Boolean(b) => Some(Value::Double(if *b { 1.0 } else { 0.0 })),
        Value::String(s) => Some(Value::Double(
            s.trim()
                .parse::<f64>()
                .map_err(|_| eyre!("cannot convert string '{}' to double", s))?,
        )),
        other => other.as_f64().map(Value::Double),
    })
}

fn to_decimal(value: &Value) -> Result<Option<Value>> {
    let parsed = match value {
        Value::Boolean(b) => Some((*b as i128, 0)),
        Value::Integer(_) | Value::Long(_) => value.as_decimal(),
        Value::Double(d) => {
            ensure!(d.is_finite(), "cannot convert {} to bigdecimal", d);
            Some(parse_decimal(&d.to_string())?)
        }
        Value::String(s) => Some(parse_decimal(s)?),
        _ => None,
    };
    Ok(parsed.map(|(digits, scale)| Value::Decimal { digits, scale }))
}

fn to_string(value: &Value) -> Option<Value> {
    match value {
        Value::Varbinary(bytes) => std::str::from_utf8(bytes)
            .ok()
            .map(|s| Value::String(s.to_string())),
        Value::Clob(lob) | Value::Xml(lob) => lob
            .inline_bytes()
            .and_then(|bytes| std::str::from_utf8(bytes).ok())
            .map(|s| Value::String(s.to_string())),
        Value::Blob(_) | Value::Object(_) => None,
        other => Some(Value::String(other.to_string())),
    }
}

pub fn format_double(d: f64) -> String {
    if d.is_finite() && d.fract() == 0.0 && d.abs() < 1e16 {
        format!("{:.1}", d)
    } else {
        d.to_string()
    }
}

pub fn format_decimal(digits: i128, scale: i16) -> String {
    if scale <= 0 {
        let zeros = "0".repeat(scale.unsigned_abs() as usize);
        return if digits == 0 {
            "0".to_string()
        } else {
            format!("{}{}", digits, zeros)
        };
    }

    // Past 10^38 every digit of an i128 is fractional.
    let (int_part, frac_part) = match 10u128.checked_pow(scale as u32) {
        Some(divisor) => (digits.unsigned_abs() / divisor, digits.unsigned_abs() % divisor),
        None => (0, digits.unsigned_abs()),
    };
    let sign = if digits < 0 { "-" } else { "" };
    format!(
        "{}{}.{:0>width$}",
        sign,
        int_part,
        frac_part,
        width = scale as usize
    )
}

pub fn parse_decimal(text: &str) -> Result<(i128, i16)> {
    let trimmed = text.trim();
    let (negative, unsigned) = match trimmed.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, trimmed.strip_prefix('+').unwrap_or(trimmed)),
    };
    let (int_digits, frac_digits) = match unsigned.split_once('.') {
        Some((int_digits, frac_digits)) => (int_digits, frac_digits),
        None => (unsigned, ""),
    };

    ensure!(
        !(int_digits.is_empty() && frac_digits.is_empty())
            && int_digits.bytes().all(|b| b.is_ascii_digit())
            && frac_digits.bytes().all(|b| b.is_ascii_digit()),
        "cannot convert string '{}' to bigdecimal",
        text
    );
    ensure!(
        frac_digits.len() <= i16::MAX as usize,
        "decimal scale too large in '{}'",
        text
    );

    let mut digits: i128 = 0;
    for b in int_digits.bytes().chain(frac_digits.bytes()) {
        digits = digits
            .checked_mul(10)
            .and_then(|d| d.checked_add((b - b'0') as i128))
            .ok_or_else(|| eyre!("decimal '{}' out of range", text))?;
    }

    Ok((if negative { -digits } else { digits }, frac_digits.len() as i16))
}

pub fn format_date(days: i32) -> String {
    let (year, month, day) = civil_from_days(days as i64);
    format!("{:04}-{:02}-{:02}", year, month, day)
}

pub fn parse_date(text: &str) -> Result<i32> {
    let trimmed = text.trim();
    let mut parts = trimmed.splitn(3, '-');
    let (Some(year), Some(month), Some(day)) = (parts.next(), parts.next(), parts.next()) else {
        bail!("cannot convert string '{}' to date", text);
    };

    let parse_field = |field: &str| -> Result<i64> {
        ensure!(
            !field.is_empty() && field.bytes().all(|b| b.is_ascii_digit()),
            "cannot convert string '{}' to date",
            text
        );
        field
            .parse::<i64>()
            .map_err(|_| eyre!("cannot convert string '{}' to date", text))
    };

    let year = parse_field(year)?;
    let month = parse_field(month)?;
    let day = parse_field(day)?;
    ensure!(
        (1..=12).contains(&month) && (1..=31).contains(&day),
        "invalid date '{}'",
        text
    );

    let days = days_from_civil(year, month as u32, day as u32);
    ensure!(
        civil_from_days(days) == (year, month as u32, day as u32),
        "invalid date '{}'",
        text
    );
    i32::try_from(days).map_err(|_| eyre!("date '{}' out of range", text))
}

pub fn format_timestamp(micros: i64) -> String {
    let days = micros.div_euclid(MICROS_PER_DAY);
    let of_day = micros.rem_euclid(MICROS_PER_DAY);
    let (year, month, day) = civil_from_days(days);
    let seconds = of_day / MICROS_PER_SECOND;
    let fraction = of_day % MICROS_PER_SECOND;

    let mut out = format!(
        "{:04}-{:02}-{:02} {:02}:{:02}:{:02}",
        year,
        month,
        day,
        seconds / 3600,
        (seconds / 60) % 60,
        seconds % 60
    );
    if fraction != 0 {
        let digits = format!("{:06}", fraction);
        out.push('.');
        out.push_str(digits.trim_end_matches('0'));
    }
    out
}

pub fn parse_timestamp(text: &str) -> Result<i64> {
    let trimmed = text.trim();
    let (date_part, time_part) = match trimmed.split_once(|c: char| c == ' ' || c == 'T') {
        Some((date_part, time_part)) => (date_part, Some(time_part)),
        None => (trimmed, None),
    };

    let days = parse_date(date_part)? as i64;
    let Some(time_part) = time_part else {
        return Ok(days * MICROS_PER_DAY);
    };

    let (clock, fraction) = match time_part.split_once('.') {
        Some((clock, fraction)) => (clock, fraction),
        None => (time_part, ""),
    };
    let fields: Vec<&str> = clock.split(':').collect();
    ensure!(
        fields.len() == 3,
        "cannot convert string '{}' to timestamp",
        text
    );
    let mut hms = [0i64; 3];
    for (slot, field) in hms.iter_mut().zip(&fields) {
        *slot = field
            .parse::<i64>()
            .map_err(|_| eyre!("cannot convert string '{}' to timestamp", text))?;
    }
    ensure!(
        hms[0] < 24 && hms[1] < 60 && hms[2] < 60 && hms.iter().all(|v| *v >= 0),
        "invalid time in '{}'",
        text
    );
    ensure!(
        fraction.len() <= 6 && fraction.bytes().all(|b| b.is_ascii_digit()),
        "invalid fraction in '{}'",
        text
    );
    let micros_fraction = if fraction.is_empty() {
        0
    } else {
        format!("{:0<6}", fraction)
            .parse::<i64>()
            .map_err(|_| eyre!("invalid fraction in '{}'", text))?
    };

    Ok(days * MICROS_PER_DAY
        + (hms[0] * 3600 + hms[1] * 60 + hms[2]) * MICROS_PER_SECOND
        + micros_fraction)
}

pub(crate) fn days_from_civil(year: i64, month: u32, day: u32) -> i64 {
    let year = if month <= 2 { year - 1 } else { year };
    let era = if year >= 0 { year } else { year - 399 } / 400;
    let year_of_era = year - era * 400;
    let shifted_month = ((month + 9) % 12) as i64;
    let day_of_year = (153 * shifted_month + 2) / 5 + day as i64 - 1;
    let day_of_era = year_of_era * 365 + year_of_era / 4 - year_of_era / 100 + day_of_year;
    era * 146_097 + day_of_era - 719_468
}

pub(crate) fn civil_from_days(days: i64) -> (i64, u32, u32) {
    let z = days + 719_468;
    let era = if z >= 0 { z } else { z - 146_096 } / 146_097;
    let day_of_era = z - era * 146_097;
    let year_of_era =
        (day_of_era - day_of_era / 1460 + day_of_era / 36_524 - day_of_era / 146_096) / 365;
    let day_of_year = day_of_era - (365 * year_of_era + year_of_era / 4 - year_of_era / 100);
    let shifted_month = (5 * day_of_year + 2) / 153;
    let day = (day_of_year - (153 * shifted_month + 2) / 5 + 1) as u32;
    let month = if shifted_month < 10 {
        shifted_month + 3
    } else {
        shifted_month - 9
    } as u32;
    let year = year_of_era + era * 400;
    (if month <= 2 { year + 1 } else { year }, month, day)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_decimal_handles_scales_past_i128_range() {
        assert_eq!(format_decimal(-1250, 2), "-12.50");
        assert_eq!(format_decimal(1, 40), format!("0.{}1", "0".repeat(39)));
        assert_eq!(format_decimal(i128::MIN, 0), i128::MIN.to_string());
    }

    #[test]
    fn null_converts_to_null() {
        assert_eq!(cast(&Value::Null, DataType::Integer).unwrap(), Value::Null);
    }

    #[test]
    fn numeric_narrowing_is_range_checked() {
        assert_eq!(
            cast(&Value::Long(42), DataType::Integer).unwrap(),
            Value::Integer(42)
        );
        assert!(cast(&Value::Long(i64::MAX), DataType::Integer).is_err());
        assert_eq!(
            cast(&Value::Double(2.9), DataType::Integer).unwrap(),
            Value::Integer(2)
        );
    }

    #[test]
    fn string_parsing() {
        assert_eq!(
            cast(&Value::from(" 17 "), DataType::Integer).unwrap(),
            Value::Integer(17)
        );
        assert!(cast(&Value::from("abc"), DataType::Integer).is_err());
        assert_eq!(
            cast(&Value::from("01"), DataType::Integer).unwrap(),
            Value::Integer(1)
        );
        assert_eq!(
            cast(&Value::from("-1.50"), DataType::Decimal).unwrap(),
            Value::Decimal {
                digits: -150,
                scale: 2
            }
        );
    }

    #[test]
    fn formatting() {
        assert_eq!(
            cast(&Value::Integer(1), DataType::String).unwrap(),
            Value::from("1")
        );
        assert_eq!(
            cast(&Value::Double(2.0), DataType::String).unwrap(),
            Value::from("2.0")
        );
        assert_eq!(format_decimal(-5, 2), "-0.05");
        assert_eq!(format_decimal(12, -2), "1200");
    }

    #[test]
    fn dates_round_trip() {
        let days = parse_date("2024-02-29").unwrap();
        assert_eq!(format_date(days), "2024-02-29");
        assert_eq!(parse_date("1970-01-01").unwrap(), 0);
        assert!(parse_date("2023-02-29").is_err());
        assert!(parse_date("2023-13-01").is_err());
        assert_eq!(format_date(-1), "1969-12-31");
    }

    #[test]
    fn timestamps_round_trip() {
        let micros = parse_timestamp("2021-06-15 13:45:30.25").unwrap();
        assert_eq!(format_timestamp(micros), "2021-06-15 13:45:30.25");
        assert_eq!(
            cast(&Value::Timestamp(micros), DataType::Date).unwrap(),
            Value::Date(parse_date("2021-06-15").unwrap())
        );
        assert_eq!(parse_timestamp("1970-01-02").unwrap(), MICROS_PER_DAY);
    }

    #[test]
    fn widening_and_injective() {
        assert!(is_widening(DataType::Integer, DataType::Long));
        assert!(!is_widening(DataType::Long, DataType::Integer));
        assert!(!is_widening(DataType::Double, DataType::Integer));
        assert!(is_injective(DataType::Integer, DataType::String));
        assert!(!is_injective(DataType::Double, DataType::Integer));
    }

    #[test]
    fn unsupported_conversion_fails() {
        assert!(cast(&Value::Object(vec![1]), DataType::Integer).is_err());
        assert!(cast(&Value::Date(0), DataType::Boolean).is_err());
    }
}
