//! SMTP reply parsing.

use crate::{
    auth::AuthMechanism,
    error::{ClientError, Result},
};

/// One line of a (possibly multi-line) reply
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplyLine<'a> {
    pub code: u16,
    /// `false` for `250-` continuation lines
    pub is_last: bool,
    pub text: &'a str,
}

/// A complete server reply
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub code: u16,
    pub lines: Vec<String>,
}

impl Response {
    #[must_use]
    pub const fn new(code: u16, lines: Vec<String>) -> Self {
        Self { code, lines }
    }

    /// All text lines joined by newlines
    #[must_use]
    pub fn message(&self) -> String {
        self.lines.join("\n")
    }

    #[must_use]
    pub const fn is_success(&self) -> bool {
        self.code >= 200 && self.code < 300
    }

    /// 3xx: the server wants more input (DATA, AUTH challenges)
    #[must_use]
    pub const fn is_intermediate(&self) -> bool {
        self.code >= 300 && self.code < 400
    }

    #[must_use]
    pub const fn is_temporary_error(&self) -> bool {
        self.code >= 400 && self.code < 500
    }

    #[must_use]
    pub const fn is_permanent_error(&self) -> bool {
        self.code >= 500 && self.code < 600
    }

    /// Parses `NNN text` or `NNN-text`.
    ///
    /// # Errors
    ///
    /// Returns `ClientError::ParseError` if the line doesn't match SMTP format.
    pub fn parse_line(line: &str) -> Result<ReplyLine<'_>> {
        let (code, rest) = line
            .split_at_checked(3)
            .ok_or_else(|| ClientError::ParseError(format!("Response line too short: '{line}'")))?;

        let code = code
            .parse::<u16>()
            .map_err(|_| ClientError::ParseError(format!("Invalid status code: '{code}'")))?;

        let mut chars = rest.chars();
        let is_last = match chars.next() {
            None | Some(' ') => true,
            Some('-') => false,
            Some(c) => {
                return Err(ClientError::ParseError(format!(
                    "Invalid separator character: '{c}'"
                )));
            }
        };

        Ok(ReplyLine {
            code,
            is_last,
            text: chars.as_str(),
        })
    }

    /// Parses one complete reply from the front of `buffer`.
    ///
    /// Returns the reply and the number of bytes it occupied, or `None` when
    /// the buffer does not hold a complete reply yet.
    ///
    /// # Errors
    ///
    /// Returns `ClientError::ParseError` if the response is malformed.
    pub fn parse_response(buffer: &[u8]) -> Result<Option<(Self, usize)>> {
        let text = std::str::from_utf8(buffer)?;
        let mut consumed = 0;
        let mut code = None;
        let mut lines = Vec::new();

        for raw in text.split_inclusive('\n') {
            let Some(line) = raw.strip_suffix('\n') else {
                // Partial line at the end of the buffer
                return Ok(None);
            };
            consumed += raw.len();

            let line = line.strip_suffix('\r').unwrap_or(line);
            if line.is_empty() {
                continue;
            }

            let parsed = Self::parse_line(line)?;
            match code {
                Some(expected) if expected != parsed.code => {
                    return Err(ClientError::ParseError(format!(
                        "Status code mismatch in multi-line response: expected {expected}, got {}",
                        parsed.code
                    )));
                }
                Some(_) => {}
                None => code = Some(parsed.code),
            }

            lines.push(parsed.text.to_string());

            if parsed.is_last {
                return Ok(code.map(|code| (Self::new(code, lines), consumed)));
            }
        }

        Ok(None)
    }
}

/// Extensions advertised in an EHLO reply
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Capabilities {
    keywords: Vec<String>,
}

impl Capabilities {
    /// The first line of an EHLO reply is the greeting, the rest are keywords
    #[must_use]
    pub fn from_ehlo(response: &Response) -> Self {
        Self {
            keywords: response
                .lines
                .iter()
                .skip(1)
                .map(|line| line.trim().to_ascii_uppercase())
                .collect(),
        }
    }

    fn find(&self, keyword: &str) -> Option<&str> {
        self.keywords.iter().find_map(|line| {
            let (name, params) = line.split_once(' ').unwrap_or((line.as_str(), ""));
            (name == keyword).then_some(params)
        })
    }

    #[must_use]
    pub fn supports_starttls(&self) -> bool {
        self.find("STARTTLS").is_some()
    }

    /// Mechanisms we know how to speak, in server order
    #[must_use]
    pub fn auth_mechanisms(&self) -> Vec<AuthMechanism> {
        self.find("AUTH")
            .map(|params| {
                params
                    .split_whitespace()
                    .filter_map(|m| m.parse().ok())
                    .collect()
            })
            .unwrap_or_default()
    }

    #[must_use]
    pub fn max_size(&self) -> Option<usize> {
        self.find("SIZE").and_then(|size| size.trim().parse().ok())
    }
}
