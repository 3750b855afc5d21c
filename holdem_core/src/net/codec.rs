//! Line framing and command tokenizing.
//!
//! The wire protocol is newline-terminated ASCII with space-separated
//! tokens; free text travels in double quotes. Bytes arrive in
//! arbitrary chunks, so each connection keeps a buffer that complete
//! lines are peeled off of.

/// Extract the next complete line from `buf`, consuming it. Trailing
/// carriage returns are dropped; interior ones become spaces.
pub fn extract_line(buf: &mut Vec<u8>) -> Option<String> {
    let pos = buf.iter().position(|b| *b == b'\n')?;
    let line: Vec<u8> = buf.drain(..=pos).collect();
    let mut text = String::from_utf8_lossy(&line[..pos]).into_owned();
    if text.ends_with('\r') {
        text.pop();
    }
    Some(text.replace('\r', " "))
}

/// Space-separated tokens with `"quoted strings"` kept whole.
#[derive(Clone, Debug)]
pub struct Tokenizer {
    tokens: Vec<String>,
    idx: usize,
}

impl Tokenizer {
    #[must_use]
    pub fn new(line: &str) -> Self {
        let mut tokens = Vec::new();
        let mut chars = line.chars().peekable();
        while let Some(&c) = chars.peek() {
            if c.is_whitespace() {
                chars.next();
                continue;
            }
            // Quotes may open mid-token (`name:"High Stakes"`); the
            // quoted span joins the surrounding token with the quote
            // characters stripped.
            let mut token = String::new();
            let mut in_quotes = false;
            while let Some(&c) = chars.peek() {
                if in_quotes {
                    chars.next();
                    if c == '"' {
                        in_quotes = false;
                    } else {
                        token.push(c);
                    }
                } else if c == '"' {
                    chars.next();
                    in_quotes = true;
                } else if c.is_whitespace() {
                    break;
                } else {
                    token.push(c);
                    chars.next();
                }
            }
            tokens.push(token);
        }
        Self { tokens, idx: 0 }
    }

    /// Tokens not yet consumed.
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.tokens.len() - self.idx
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    #[must_use]
    pub fn peek(&self) -> Option<&str> {
        self.tokens.get(self.idx).map(String::as_str)
    }

    pub fn next(&mut self) -> Option<String> {
        let token = self.tokens.get(self.idx).cloned();
        if token.is_some() {
            self.idx += 1;
        }
        token
    }

    pub fn next_parsed<T: std::str::FromStr>(&mut self) -> Option<T> {
        self.next()?.parse().ok()
    }

    /// Everything left, joined back with single spaces. Chat text.
    pub fn rest(&mut self) -> String {
        let rest = self.tokens[self.idx..].join(" ");
        self.idx = self.tokens.len();
        rest
    }
}

/// Split a `key:value` token; the value part is optional.
#[must_use]
pub fn split_pair(token: &str) -> (&str, Option<&str>) {
    match token.split_once(':') {
        Some((key, value)) => (key, Some(value)),
        None => (token, None),
    }
}
