/// Scans a function host's stdout for the endpoint table it prints on
/// startup (`func start`'s `Functions:` banner) and publishes the routes it
/// finds. Endpoint lines look like `Http Functions:\n\n        Hello: [GET] http://localhost:7071/api/Hello`.

use regex::Regex;
use std::sync::OnceLock;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FunctionEndpoint {
    pub name: String,
    pub method: String,
    pub url: String,
}

fn endpoint_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(?m)^\s*(\S+):\s*\[(\w+)\]\s*(https?://\S+)\s*$").expect("static pattern is valid")
    })
}

/// Scans one line of stdout, returning any endpoint it announces.
pub fn scan_line(line: &str) -> Option<FunctionEndpoint> {
    let captures = endpoint_pattern().captures(line)?;
    Some(FunctionEndpoint {
        name: captures[1].to_string(),
        method: captures[2].to_string(),
        url: captures[3].to_string(),
    })
}

/// Scans the full accumulated stdout text captured so far, returning every
/// endpoint found, in the order they appeared.
pub fn scan_output(text: &str) -> Vec<FunctionEndpoint> {
    text.lines().filter_map(scan_line).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scans_a_single_endpoint_line() {
        let endpoint = scan_line("        Hello: [GET] http://localhost:7071/api/Hello").unwrap();
        assert_eq!(endpoint.name, "Hello");
        assert_eq!(endpoint.method, "GET");
        assert_eq!(endpoint.url, "http://localhost:7071/api/Hello");
    }

    #[test]
    fn ignores_unrelated_log_lines() {
        assert!(scan_line("Host lock lease acquired by instance ID").is_none());
    }

    #[test]
    fn scan_output_collects_every_endpoint_in_a_banner() {
        let banner = "Http Functions:\n\n        Hello: [GET] http://localhost:7071/api/Hello\n        Goodbye: [POST] http://localhost:7071/api/Goodbye\n";
        let endpoints = scan_output(banner);
        assert_eq!(endpoints.len(), 2);
        assert_eq!(endpoints[0].name, "Hello");
        assert_eq!(endpoints[1].method, "POST");
    }
}
