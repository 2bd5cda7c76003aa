use std::str::FromStr;

use crate::error::RaaError;

use super::request::unprotect_quotes;

/// Fields of one logical response, `key=value&key="quoted"&bare...`.
///
/// Lives only for the call that produced it. Bare tokens (no `=`) keep their
/// position, e.g. the comma separated payload of `code=0&n=3&1,5,9`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseRecord {
    command: &'static str,
    fields: Vec<(String, Option<String>)>,
}

impl ResponseRecord {
    pub fn parse(command: &'static str, line: &str) -> Result<Self, RaaError> {
        let mut fields = Vec::new();
        let mut rest = line;

        while !rest.is_empty() {
            let Some(stop) = rest.find(['=', '&']) else {
                fields.push((rest.to_string(), None));
                break;
            };

            if rest.as_bytes()[stop] == b'&' {
                if stop > 0 {
                    fields.push((rest[..stop].to_string(), None));
                }
                rest = &rest[stop + 1..];
                continue;
            }

            let key = rest[..stop].to_string();
            let after = &rest[stop + 1..];
            if after.starts_with('"') {
                let (value, remain) = take_quoted(after)
                    .ok_or_else(|| RaaError::decode(command, format!("unterminated quote in {key}")))?;
                rest = match remain.strip_prefix('&') {
                    Some(next) => next,
                    None if remain.is_empty() => remain,
                    None => {
                        return Err(RaaError::decode(
                            command,
                            format!("unexpected text after quoted {key}"),
                        ));
                    }
                };
                fields.push((key, Some(value)));
            } else {
                let end = after.find('&').unwrap_or(after.len());
                fields.push((key, Some(after[..end].to_string())));
                rest = after.get(end + 1..).unwrap_or_default();
            }
        }

        Ok(Self { command, fields })
    }

    pub fn command(&self) -> &'static str {
        self.command
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(k, v)| k == key && v.is_some())
            .and_then(|(_, v)| v.as_deref())
    }

    pub fn int<T: FromStr>(&self, key: &str) -> Option<T> {
        self.get(key).and_then(|v| v.trim().parse().ok())
    }

    pub fn require<T: FromStr>(&self, key: &str) -> Result<T, RaaError> {
        let raw = self
            .get(key)
            .ok_or_else(|| RaaError::decode(self.command, format!("missing field `{key}`")))?;
        raw.trim().parse().map_err(|_| {
            RaaError::decode(self.command, format!("field `{key}` has bad value {raw:?}"))
        })
    }

    pub fn text(&self, key: &str) -> Option<String> {
        self.get(key).map(str::to_string)
    }

    /// The `index`-th token that carried no `=`.
    pub fn bare(&self, index: usize) -> Option<&str> {
        self.fields
            .iter()
            .filter(|(_, v)| v.is_none())
            .nth(index)
            .map(|(k, _)| k.as_str())
    }

    pub fn has_bare(&self, token: &str) -> bool {
        self.fields.iter().any(|(k, v)| v.is_none() && k == token)
    }

    pub fn code(&self) -> Result<i32, RaaError> {
        self.require("code")
    }

    /// Fails with [`RaaError::Rejected`] unless `code=0`.
    pub fn expect_ok(&self) -> Result<(), RaaError> {
        match self.code()? {
            0 => Ok(()),
            code => Err(RaaError::Rejected {
                command: self.command,
                code,
                message: self.text("message"),
            }),
        }
    }
}

/// Splits a leading `"..."` (backslash-escaped quotes allowed) off `text`,
/// returning the unescaped content and the remainder after the closing quote.
pub fn take_quoted(text: &str) -> Option<(String, &str)> {
    let bytes = text.as_bytes();
    if bytes.first() != Some(&b'"') {
        return None;
    }
    let mut end = None;
    for i in 1..bytes.len() {
        if bytes[i] == b'"' && bytes[i - 1] != b'\\' {
            end = Some(i);
            break;
        }
    }
    let end = end?;
    Some((
        unprotect_quotes(&text[1..end]).into_owned(),
        &text[end + 1..],
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_plain_fields() {
        let rec = ResponseRecord::parse("acnucopen", "code=0&type=EMBL&totseqs=1200").unwrap();

        assert_eq!(rec.code().unwrap(), 0);
        assert_eq!(rec.get("type"), Some("EMBL"));
        assert_eq!(rec.int::<u32>("totseqs"), Some(1200));
        assert_eq!(rec.get("missing"), None);
    }

    #[test]
    fn quoted_values_may_hold_separators() {
        let rec = ResponseRecord::parse(
            "readspec",
            r#"code=0&name="HOMO & \"SAPIENS\""&plsub=4"#,
        )
        .unwrap();

        assert_eq!(rec.get("name"), Some(r#"HOMO & "SAPIENS""#));
        assert_eq!(rec.int::<u32>("plsub"), Some(4));
    }

    #[test]
    fn bare_tokens_keep_position() {
        let rec = ResponseRecord::parse("readshrt", "code=0&n=2&17,30,18,0").unwrap();

        assert_eq!(rec.int::<u32>("n"), Some(2));
        assert_eq!(rec.bare(0), Some("17,30,18,0"));
        assert!(ResponseRecord::parse("btest", "code=0&on").unwrap().has_bare("on"));
    }

    #[test]
    fn unterminated_quote_fails_closed() {
        let err = ResponseRecord::parse("readkey", r#"code=0&name="OPEN"#).unwrap_err();
        assert!(matches!(err, RaaError::Decode { command: "readkey", .. }));
    }

    #[test]
    fn text_glued_to_closing_quote_fails() {
        let err = ResponseRecord::parse("readspec", r#"code=0&name="b"c&plsub=1"#).unwrap_err();
        assert!(matches!(err, RaaError::Decode { command: "readspec", .. }));
        assert!(err.to_string().contains("after quoted name"));
    }

    #[test]
    fn require_reports_missing_field() {
        let rec = ResponseRecord::parse("bcount", "code=0").unwrap();
        let err = rec.require::<u32>("count").unwrap_err();
        assert_eq!(
            err.to_string(),
            "failed to decode `bcount` response: missing field `count`"
        );
    }

    #[test]
    fn expect_ok_carries_server_message() {
        let rec = ResponseRecord::parse("proc_query", "code=2&message=\"bad query\"").unwrap();
        match rec.expect_ok().unwrap_err() {
            RaaError::Rejected { code, message, .. } => {
                assert_eq!(code, 2);
                assert_eq!(message.as_deref(), Some("bad query"));
            }
            other => panic!("unexpected error {other:?}"),
        }
    }
}
