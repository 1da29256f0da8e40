//! Redis-style glob matching
//!
//! Mirrors the semantics of Redis `KEYS`/`SCAN MATCH`: `*` matches any run of
//! characters, `?` exactly one, `[abc]`, `[a-z]` and `[^a]` a character
//! class, and `\x` the literal `x`.

use std::borrow::Cow;

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Literal(char),
    AnyOne,
    AnyRun,
    Class { negated: bool, ranges: Vec<(char, char)> },
}

impl Token {
    fn matches(&self, c: char) -> bool {
        match self {
            Token::Literal(l) => *l == c,
            Token::AnyOne => true,
            Token::AnyRun => true,
            Token::Class { negated, ranges } => {
                let hit = ranges.iter().any(|(lo, hi)| *lo <= c && c <= *hi);
                hit != *negated
            },
        }
    }
}

fn tokenize(pattern: &str) -> Vec<Token> {
    let chars: Vec<char> = pattern.chars().collect();
    let mut tokens = Vec::with_capacity(chars.len());
    let mut i = 0;

    while i < chars.len() {
        match chars[i] {
            '*' => {
                // Collapse runs of stars
                if tokens.last() != Some(&Token::AnyRun) {
                    tokens.push(Token::AnyRun);
                }
                i += 1;
            },
            '?' => {
                tokens.push(Token::AnyOne);
                i += 1;
            },
            '\\' if i + 1 < chars.len() => {
                tokens.push(Token::Literal(chars[i + 1]));
                i += 2;
            },
            '[' => {
                let mut j = i + 1;
                let negated = j < chars.len() && chars[j] == '^';
                if negated {
                    j += 1;
                }
                let mut ranges = Vec::new();
                while j < chars.len() && chars[j] != ']' {
                    let lo = if chars[j] == '\\' && j + 1 < chars.len() {
                        j += 1;
                        chars[j]
                    } else {
                        chars[j]
                    };
                    if j + 2 < chars.len() && chars[j + 1] == '-' && chars[j + 2] != ']' {
                        let hi = chars[j + 2];
                        ranges.push(if lo <= hi { (lo, hi) } else { (hi, lo) });
                        j += 3;
                    } else {
                        ranges.push((lo, lo));
                        j += 1;
                    }
                }
                // Unterminated classes run to the end of the pattern, as in Redis
                tokens.push(Token::Class { negated, ranges });
                i = j + 1;
            },
            c => {
                tokens.push(Token::Literal(c));
                i += 1;
            },
        }
    }

    tokens
}

/// Match `text` against a Redis glob `pattern`
pub fn glob_match(pattern: &str, text: &str) -> bool {
    let tokens = tokenize(pattern);
    let text: Vec<char> = text.chars().collect();

    let (mut t, mut p) = (0usize, 0usize);
    let mut backtrack: Option<(usize, usize)> = None;

    while t < text.len() {
        match tokens.get(p) {
            Some(Token::AnyRun) => {
                backtrack = Some((p, t));
                p += 1;
            },
            Some(token) if token.matches(text[t]) => {
                p += 1;
                t += 1;
            },
            _ => match backtrack {
                Some((star_p, star_t)) => {
                    // Let the last star swallow one more character
                    p = star_p + 1;
                    t = star_t + 1;
                    backtrack = Some((star_p, star_t + 1));
                },
                None => return false,
            },
        }
    }

    tokens[p..].iter().all(|token| *token == Token::AnyRun)
}

/// Backslash-escape glob metacharacters so `segment` matches only itself
pub fn escape_glob(segment: &str) -> Cow<'_, str> {
    const META: [char; 5] = ['*', '?', '[', ']', '\\'];
    if !segment.contains(META) {
        return Cow::Borrowed(segment);
    }

    let mut escaped = String::with_capacity(segment.len() + 4);
    for c in segment.chars() {
        if META.contains(&c) {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    Cow::Owned(escaped)
}
