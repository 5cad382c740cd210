use tokio::time::Duration;

/// Parses a duration string such as "30s", "250ms", "10m", "2h" or "1m30s".
///
/// The string is one or more `<integer><unit>` segments. Supported units:
/// - `ns` for nanoseconds
/// - `us` for microseconds
/// - `ms` for milliseconds
/// - `s` for seconds
/// - `m` for minutes
/// - `h` for hours
/// - `d` for days
pub fn parse_duration_string(s: &str) -> Result<Duration, String> {
    let s = s.trim();

    if s.is_empty() {
        return Err("Duration string cannot be empty".to_string());
    }

    let mut total = Duration::ZERO;
    let mut rest = s;

    while !rest.is_empty() {
        let digits_end = rest
            .find(|c: char| !c.is_ascii_digit())
            .unwrap_or(rest.len());
        let (value_str, after_value) = rest.split_at(digits_end);

        let unit_end = after_value
            .find(|c: char| c.is_ascii_digit())
            .unwrap_or(after_value.len());
        let (unit_str, remainder) = after_value.split_at(unit_end);

        let value: u64 = value_str.parse().map_err(|_| {
            format!(
                "Invalid numeric value in duration: '{}'",
                value_str
            )
        })?;

        let segment = match unit_str {
            "ns" => Duration::from_nanos(value),
            "us" => Duration::from_micros(value),
            "ms" => Duration::from_millis(value),
            "s" => Duration::from_secs(value),
            "m" => seconds_times(value, 60)?,
            "h" => seconds_times(value, 60 * 60)?,
            "d" => seconds_times(value, 24 * 60 * 60)?,
            "" => {
                return Err(format!(
                    "Unknown duration unit in '{}'. Use 'ns', 'us', 'ms', 's', 'm', 'h', or 'd'.",
                    s
                ))
            }
            other => {
                return Err(format!(
                    "Unknown duration unit: '{}'. Use 'ns', 'us', 'ms', 's', 'm', 'h', or 'd'.",
                    other
                ))
            }
        };

        total = total
            .checked_add(segment)
            .ok_or_else(|| format!("Duration '{}' is too large", s))?;
        rest = remainder;
    }

    Ok(total)
}

fn seconds_times(value: u64, factor: u64) -> Result<Duration, String> {
    value
        .checked_mul(factor)
        .map(Duration::from_secs)
        .ok_or_else(|| format!("Duration value {} is too large", value))
}

/// Renders an error together with its chain of sources, outermost first.
///
/// reqwest's top-level message ("error sending request for url ...") hides the
/// interesting part (connection refused, dns failure), which lives in the
/// source chain.
pub fn error_chain(error: &dyn std::error::Error) -> String {
    let mut message = error.to_string();
    let mut source = error.source();
    while let Some(cause) = source {
        let cause_text = cause.to_string();
        if !message.contains(&cause_text) {
            message.push_str(": ");
            message.push_str(&cause_text);
        }
        source = cause.source();
    }
    message
}

#[cfg(test)]
mod tests {
    use super::*;

    mod duration {
        use super::*;

        #[test]
        fn parse_seconds() {
            assert_eq!(
                parse_duration_string("10s").unwrap(),
                Duration::from_secs(10)
            );
        }

        #[test]
        fn parse_minutes() {
            assert_eq!(
                parse_duration_string("1m").unwrap(),
                Duration::from_secs(60)
            );
        }

        #[test]
        fn parse_hours() {
            assert_eq!(
                parse_duration_string("2h").unwrap(),
                Duration::from_secs(7200)
            );
        }

        #[test]
        fn parse_days() {
            assert_eq!(
                parse_duration_string("3d").unwrap(),
                Duration::from_secs(259200)
            );
        }

        #[test]
        fn parse_milliseconds() {
            assert_eq!(
                parse_duration_string("50ms").unwrap(),
                Duration::from_millis(50)
            );
        }

        #[test]
        fn parse_sub_millisecond_units() {
            assert_eq!(
                parse_duration_string("15us").unwrap(),
                Duration::from_micros(15)
            );
            assert_eq!(
                parse_duration_string("900ns").unwrap(),
                Duration::from_nanos(900)
            );
        }

        #[test]
        fn parse_compound() {
            assert_eq!(
                parse_duration_string("1m30s").unwrap(),
                Duration::from_secs(90)
            );
            assert_eq!(
                parse_duration_string("1s500ms").unwrap(),
                Duration::from_millis(1500)
            );
        }

        #[test]
        fn parse_zero() {
            assert_eq!(parse_duration_string("0s").unwrap(), Duration::ZERO);
        }

        #[test]
        fn trims_whitespace() {
            assert_eq!(
                parse_duration_string("  10m  ").unwrap(),
                Duration::from_secs(600)
            );
        }

        #[test]
        fn empty_string_errors() {
            let err = parse_duration_string("").unwrap_err();
            assert!(err.contains("empty"), "error was: {}", err);
        }

        #[test]
        fn whitespace_only_errors() {
            let err = parse_duration_string("   ").unwrap_err();
            assert!(err.contains("empty"), "error was: {}", err);
        }

        #[test]
        fn unknown_suffix_errors() {
            let err = parse_duration_string("10x").unwrap_err();
            assert!(err.contains("Unknown duration unit"), "error was: {}", err);
        }

        #[test]
        fn no_suffix_errors() {
            let err = parse_duration_string("10").unwrap_err();
            assert!(err.contains("Unknown duration unit"), "error was: {}", err);
        }

        #[test]
        fn no_number_errors() {
            let err = parse_duration_string("m").unwrap_err();
            assert!(err.contains("Invalid numeric"), "error was: {}", err);
        }

        #[test]
        fn fractional_number_errors() {
            let err = parse_duration_string("5.5h").unwrap_err();
            assert!(err.contains("Unknown duration unit"), "error was: {}", err);
        }

        #[test]
        fn negative_number_errors() {
            let err = parse_duration_string("-5m").unwrap_err();
            assert!(err.contains("Invalid numeric"), "error was: {}", err);
        }

        #[test]
        fn overflow_errors() {
            let err = parse_duration_string("18446744073709551615d").unwrap_err();
            assert!(err.contains("too large"), "error was: {}", err);
        }
    }

    #[derive(Debug)]
    struct Outer(std::io::Error);

    impl std::fmt::Display for Outer {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "error sending request")
        }
    }

    impl std::error::Error for Outer {
        fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
            Some(&self.0)
        }
    }

    #[test]
    fn error_chain_includes_sources() {
        let err = Outer(std::io::Error::new(
            std::io::ErrorKind::ConnectionRefused,
            "connection refused",
        ));
        assert_eq!(error_chain(&err), "error sending request: connection refused");
    }
}
