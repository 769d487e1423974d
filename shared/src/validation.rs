//! Custom field validators for `validator` derives.

use chrono::NaiveTime;
use validator::ValidationError;

use crate::{Error, Result};

/// Accept `#RRGGBB` colors.
pub fn validate_hex_color(value: &str) -> std::result::Result<(), ValidationError> {
    let valid = value.len() == 7
        && value.starts_with('#')
        && value[1..].chars().all(|c| c.is_ascii_hexdigit());
    if valid {
        Ok(())
    } else {
        let mut err = ValidationError::new("hex_color");
        err.message = Some("must be a #RRGGBB color".into());
        Err(err)
    }
}

/// Colors are stored lowercase.
pub fn normalize_color(value: &str) -> String {
    value.to_ascii_lowercase()
}

/// Reject blank strings that passed a length check.
pub fn validate_not_blank(value: &str) -> std::result::Result<(), ValidationError> {
    if value.trim().is_empty() {
        let mut err = ValidationError::new("blank");
        err.message = Some("must not be blank".into());
        Err(err)
    } else {
        Ok(())
    }
}

/// Parse an optional `HH:MM` pair; both or neither must be given and end must follow start.
pub fn parse_time_pair(
    start: Option<&str>,
    end: Option<&str>,
) -> Result<Option<(NaiveTime, NaiveTime)>> {
    let parse = |value: &str, field: &str| {
        NaiveTime::parse_from_str(value.trim(), "%H:%M")
            .map_err(|_| Error::Validation(format!("{} must be HH:MM", field)))
    };

    match (start, end) {
        (None, None) => Ok(None),
        (Some(start), Some(end)) => {
            let start = parse(start, "startTime")?;
            let end = parse(end, "endTime")?;
            if end <= start {
                return Err(Error::Validation("endTime must be after startTime".to_string()));
            }
            Ok(Some((start, end)))
        }
        _ => Err(Error::Validation(
            "startTime and endTime must be given together".to_string(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hex_colors() {
        assert!(validate_hex_color("#1a2B3c").is_ok());
        assert!(validate_hex_color("1a2b3c").is_err());
        assert!(validate_hex_color("#1a2b3").is_err());
        assert!(validate_hex_color("#1a2b3g").is_err());
        assert!(validate_hex_color("#ääää").is_err());
        assert_eq!(normalize_color("#AABBCC"), "#aabbcc");
    }

    #[test]
    fn test_blank() {
        assert!(validate_not_blank("  ").is_err());
        assert!(validate_not_blank(" x ").is_ok());
    }

    #[test]
    fn test_time_pairs() {
        assert_eq!(parse_time_pair(None, None).unwrap(), None);
        let (start, end) = parse_time_pair(Some("09:00"), Some("11:30")).unwrap().unwrap();
        assert_eq!(start, NaiveTime::from_hms_opt(9, 0, 0).unwrap());
        assert_eq!(end, NaiveTime::from_hms_opt(11, 30, 0).unwrap());

        assert!(parse_time_pair(Some("09:00"), None).is_err());
        assert!(parse_time_pair(Some("11:00"), Some("09:00")).is_err());
        assert!(parse_time_pair(Some("9h"), Some("10:00")).is_err());
    }
}
