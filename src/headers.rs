use core::fmt;
use std::collections::HashMap;

/// Request header map. Keys are stored lowercase; a repeated key keeps the
/// last value seen.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers(HashMap<String, String>);

impl Headers {
    pub fn new() -> Self {
        Self(HashMap::new())
    }

    pub fn insert(&mut self, k: &str, v: &str) -> Option<String> {
        self.0.insert(k.to_lowercase(), v.to_string())
    }

    pub fn get(&self, k: &str) -> Option<&str> {
        self.0.get(k.to_lowercase().as_str()).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Parses the header lines of a request head (everything after the start
    /// line). Stops at the first empty line; lines without a `:` are skipped.
    pub fn parse_lines(data: &str) -> Self {
        let mut headers = Self::new();
        for raw_header in data.split("\r\n") {
            if raw_header.is_empty() {
                break;
            }
            if let Some((field_name, field_value)) = raw_header.split_once(':') {
                headers.insert(field_name.trim_matches(is_hws), field_value.trim_matches(is_hws));
            }
        }
        headers
    }
}

fn is_hws(c: char) -> bool {
    c == ' ' || c == '\t'
}

/// One line per header, sorted by name, for logging.
impl fmt::Display for Headers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut entries: Vec<_> = self.0.iter().collect();
        entries.sort();
        for (i, (k, v)) in entries.into_iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{}: {}", k, v)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn display_is_sorted_and_single_line() {
        let headers = Headers::parse_lines("User-Agent: curl\r\nAccept: */*\r\nHost: x\r\n\r\n");
        assert_eq!(headers.to_string(), "accept: */*, host: x, user-agent: curl");
        assert_eq!(Headers::new().to_string(), "");
    }

    #[test]
    fn headers_basics() {
        let headers = Headers::parse_lines("Host: localhost:42069\r\n\r\n");
        assert_eq!(headers.get("Host"), Some("localhost:42069"));
        assert_eq!(headers.get("host"), Some("localhost:42069"));
        assert_eq!(headers.len(), 1);
    }

    #[test]
    fn headers_trim_and_lowercase() {
        let headers = Headers::parse_lines("  Content-Type:\t  text/plain \t\r\nX-EMPTY:\r\n\r\n");
        assert_eq!(headers.get("content-type"), Some("text/plain"));
        assert_eq!(headers.get("x-empty"), Some(""));
        assert!(headers.0.contains_key("content-type"));
    }

    #[test]
    fn headers_last_occurrence_wins() {
        let headers = Headers::parse_lines(
            "Set-Person: lane-loves-go\r\nSet-Person: prime-loves-zig\r\nset-person: tj-loves-ocaml\r\n\r\n",
        );
        assert_eq!(headers.get("Set-Person"), Some("tj-loves-ocaml"));
        assert_eq!(headers.len(), 1);
    }

    #[test]
    fn headers_skip_lines_without_colon() {
        let headers = Headers::parse_lines("Host localhost\r\nAccept: */*\r\n\r\n");
        assert_eq!(headers.get("host"), None);
        assert_eq!(headers.get("accept"), Some("*/*"));
    }

    #[test]
    fn headers_stop_at_blank_line() {
        let headers = Headers::parse_lines("A: 1\r\n\r\nB: 2\r\n");
        assert_eq!(headers.get("a"), Some("1"));
        assert_eq!(headers.get("b"), None);
    }

    #[test]
    fn headers_value_keeps_inner_colons() {
        let headers = Headers::parse_lines("Host: localhost:8080\r\n");
        assert_eq!(headers.get("host"), Some("localhost:8080"));
        assert!(!headers.is_empty());
    }
}
