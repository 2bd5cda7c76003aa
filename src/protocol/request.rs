use std::{borrow::Cow, fmt::Display};

/// One request line: a command token followed by `&key=value` pairs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    command: &'static str,
    line: String,
}

impl Request {
    pub fn new(command: &'static str) -> Self {
        Self {
            command,
            line: command.to_string(),
        }
    }

    /// A line sent verbatim, used for the password reply which carries no
    /// command token.
    pub(crate) fn raw(command: &'static str, line: String) -> Self {
        Self { command, line }
    }

    pub fn arg(mut self, key: &str, value: impl Display) -> Self {
        self.line.push('&');
        self.line.push_str(key);
        self.line.push('=');
        self.line.push_str(&value.to_string());
        self
    }

    /// Appends `&key="value"` with embedded quotes escaped.
    pub fn quoted(mut self, key: &str, value: &str) -> Self {
        self.line.push('&');
        self.line.push_str(key);
        self.line.push_str("=\"");
        self.line.push_str(&protect_quotes(value));
        self.line.push('"');
        self
    }

    pub fn command(&self) -> &'static str {
        self.command
    }

    /// The wire form, newline terminated.
    pub fn to_line(&self) -> String {
        format!("{}\n", self.line)
    }
}

/// Replaces every `"` with `\"`.
pub fn protect_quotes(value: &str) -> Cow<'_, str> {
    if value.contains('"') {
        Cow::Owned(value.replace('"', "\\\""))
    } else {
        Cow::Borrowed(value)
    }
}

/// Reverses [`protect_quotes`].
pub fn unprotect_quotes(value: &str) -> Cow<'_, str> {
    if value.contains("\\\"") {
        Cow::Owned(value.replace("\\\"", "\""))
    } else {
        Cow::Borrowed(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_fragment_request() {
        let req = Request::new("gfrag")
            .arg("number", 12)
            .arg("start", 1)
            .arg("length", 10_000);

        assert_eq!(req.command(), "gfrag");
        assert_eq!(req.to_line(), "gfrag&number=12&start=1&length=10000\n");
    }

    #[test]
    fn quoted_values_escape_quotes() {
        let req = Request::new("iknum")
            .quoted("name", "5'-PARTIAL \"x\"")
            .arg("type", "KW");

        assert_eq!(
            req.to_line(),
            "iknum&name=\"5'-PARTIAL \\\"x\\\"\"&type=KW\n"
        );
    }

    #[test]
    fn quote_protection_round_trip() {
        let text = r#"say "hi""#;
        let protected = protect_quotes(text);
        assert_eq!(protected, r#"say \"hi\""#);
        assert_eq!(unprotect_quotes(&protected), text);
        assert!(matches!(protect_quotes("plain"), Cow::Borrowed(_)));
    }
}
