//! Repository version ordering.
//!
//! Repository versions are not semver: `1.0-alpha-2`, `1.0.0.Final` and
//! `20060110` all occur in the wild. This implements the conventional
//! total order over such strings: dot/dash/case-transition tokenisation,
//! numeric comparison for number tokens, and the canonical qualifier
//! ranking (`alpha < beta < milestone < rc < snapshot < release < sp`).

use std::{cmp::Ordering, fmt};

/// A repository artifact version with a total order.
#[derive(Clone, Debug, Eq)]
pub struct ArtifactVersion {
    raw: String,
    tokens: Vec<Token>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
enum Token {
    Number(u128),
    Qualifier(u8, String),
}

/// Rank given to the empty qualifier, i.e. a release.
const RELEASE_RANK: u8 = 6;
/// Rank given to qualifiers with no conventional meaning; ties break on the
/// qualifier text itself.
const UNKNOWN_RANK: u8 = 8;

fn qualifier_rank(qualifier: &str) -> u8 {
    match qualifier {
        "alpha" | "a" => 1,
        "beta" | "b" => 2,
        "milestone" | "m" => 3,
        "rc" | "cr" => 4,
        "snapshot" => 5,
        "" | "ga" | "final" | "release" => RELEASE_RANK,
        "sp" => 7,
        _ => UNKNOWN_RANK,
    }
}

impl ArtifactVersion {
    pub fn new(raw: impl Into<String>) -> Self {
        let raw = raw.into();
        let tokens = tokenize(&raw);
        Self { raw, tokens }
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Whether the version string is empty or whitespace, i.e. the
    /// coordinate left the version to dependency management.
    pub fn is_blank(&self) -> bool {
        self.raw.trim().is_empty()
    }
}

impl From<&str> for ArtifactVersion {
    fn from(raw: &str) -> Self {
        Self::new(raw)
    }
}

impl fmt::Display for ArtifactVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

impl PartialEq for ArtifactVersion {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl PartialOrd for ArtifactVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ArtifactVersion {
    fn cmp(&self, other: &Self) -> Ordering {
        let len = self.tokens.len().max(other.tokens.len());
        for i in 0..len {
            let ordering = match (self.tokens.get(i), other.tokens.get(i)) {
                (Some(a), Some(b)) => a.cmp(b),
                (Some(a), None) => a.cmp_null(),
                (None, Some(b)) => b.cmp_null().reverse(),
                (None, None) => unreachable!(),
            };
            if ordering != Ordering::Equal {
                return ordering;
            }
        }
        Ordering::Equal
    }
}

impl Token {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Token::Number(a), Token::Number(b)) => a.cmp(b),
            // any number outranks any qualifier: 1.1 > 1.rc
            (Token::Number(_), Token::Qualifier(..)) => Ordering::Greater,
            (Token::Qualifier(..), Token::Number(_)) => Ordering::Less,
            (Token::Qualifier(ar, aq), Token::Qualifier(br, bq)) => {
                ar.cmp(br).then_with(|| aq.cmp(bq))
            }
        }
    }

    /// Compares against the implicit padding token, so that `1.0` equals
    /// `1.0.0` and `1.0-alpha` sorts before `1.0`.
    fn cmp_null(&self) -> Ordering {
        match self {
            Token::Number(n) => n.cmp(&0),
            Token::Qualifier(rank, _) => rank.cmp(&RELEASE_RANK),
        }
    }
}

fn tokenize(raw: &str) -> Vec<Token> {
    let mut tokens = Vec::new();
    let mut buf = String::new();
    let mut buf_numeric = false;

    let flush = |buf: &mut String, numeric: bool, tokens: &mut Vec<Token>| {
        if buf.is_empty() {
            return;
        }
        let token = if numeric {
            // overlong digit runs saturate; ordering stays consistent
            Token::Number(buf.parse::<u128>().unwrap_or(u128::MAX))
        } else {
            let qualifier = buf.clone();
            Token::Qualifier(qualifier_rank(&qualifier), qualifier)
        };
        tokens.push(token);
        buf.clear();
    };

    for ch in raw.trim().to_lowercase().chars() {
        match ch {
            '.' | '-' | '_' => flush(&mut buf, buf_numeric, &mut tokens),
            c if c.is_ascii_digit() => {
                if !buf_numeric {
                    flush(&mut buf, buf_numeric, &mut tokens);
                }
                buf_numeric = true;
                buf.push(c);
            }
            c => {
                if buf_numeric {
                    flush(&mut buf, buf_numeric, &mut tokens);
                }
                buf_numeric = false;
                buf.push(c);
            }
        }
    }
    flush(&mut buf, buf_numeric, &mut tokens);
    tokens
}
