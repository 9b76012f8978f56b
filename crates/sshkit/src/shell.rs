//! Shell quoting for remote command lines.

/// Escape a value for use inside single quotes.
pub fn escape_single_quote_content(value: &str) -> String {
    value.replace('\'', "'\\''")
}

/// Quote a path for shell execution (always quotes).
pub fn quote(path: &str) -> String {
    format!("'{}'", escape_single_quote_content(path))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quote_plain() {
        assert_eq!(quote("kubeone/cfg/master_0.yaml"), "'kubeone/cfg/master_0.yaml'");
    }

    #[test]
    fn test_quote_embedded_quote() {
        assert_eq!(quote("it's"), "'it'\\''s'");
    }
}
