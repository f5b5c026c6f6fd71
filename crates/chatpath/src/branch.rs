//! `next` pointers and branch selection.
//!
//! A `next` is empty (terminal), a single key, or `|`-joined candidates of the
//! form `token-key`. Candidates are tried in order against the visitor's
//! response; the first token found at a word boundary, ignoring case, wins.
//! "definitely yes" picks `YES`, "nope" picks `NO`, "maybe" picks nothing.

use regex::Regex;
use std::fmt;
use tracing::warn;

/// Separator between branch candidates.
pub const BRANCH_MARKER: char = '|';

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BranchCandidate {
    pub token: String,
    /// Raw dialogue key to continue at.
    pub target: String,
}

impl BranchCandidate {
    /// Split at the first `-`; the rest is the target key.
    pub fn parse(raw: &str) -> Option<Self> {
        let (token, target) = raw.trim().split_once('-')?;
        let (token, target) = (token.trim(), target.trim());
        if token.is_empty() || target.is_empty() {
            return None;
        }
        Some(Self {
            token: token.to_string(),
            target: target.to_string(),
        })
    }

    pub fn matches(&self, response: &str) -> bool {
        let pattern = format!(r"(?i)\b{}", regex::escape(&self.token));
        match Regex::new(&pattern) {
            Ok(re) => re.is_match(response),
            Err(e) => {
                warn!("branch token {:?} does not compile: {}", self.token, e);
                false
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Next {
    Terminal,
    Single(String),
    Branch(Vec<BranchCandidate>),
}

impl Next {
    pub fn parse(raw: &str) -> Self {
        let raw = raw.trim();
        if raw.is_empty() {
            return Next::Terminal;
        }
        if !raw.contains(BRANCH_MARKER) {
            return Next::Single(raw.to_string());
        }

        let candidates = raw
            .split(BRANCH_MARKER)
            .filter(|part| !part.trim().is_empty())
            .filter_map(|part| {
                let candidate = BranchCandidate::parse(part);
                if candidate.is_none() {
                    warn!("skipping malformed branch candidate {:?}", part);
                }
                candidate
            })
            .collect();
        Next::Branch(candidates)
    }

    pub fn is_branch(&self) -> bool {
        matches!(self, Next::Branch(_))
    }
}

impl fmt::Display for Next {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Next::Terminal => Ok(()),
            Next::Single(key) => f.write_str(key),
            Next::Branch(candidates) => {
                for (i, c) in candidates.iter().enumerate() {
                    if i > 0 {
                        write!(f, "{}", BRANCH_MARKER)?;
                    }
                    write!(f, "{}-{}", c.token, c.target)?;
                }
                // A lone candidate still has to read back as a branch.
                if candidates.len() == 1 {
                    write!(f, "{}", BRANCH_MARKER)?;
                }
                Ok(())
            }
        }
    }
}

/// First candidate whose token occurs in `response`.
pub fn match_branch<'a>(candidates: &'a [BranchCandidate], response: &str) -> Option<&'a BranchCandidate> {
    candidates.iter().find(|c| c.matches(response))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn yes_no() -> Vec<BranchCandidate> {
        match Next::parse("YES-A|NO-B") {
            Next::Branch(c) => c,
            other => panic!("expected branch, got {other:?}"),
        }
    }

    #[test]
    fn candidates_split_at_first_dash() {
        let next = Next::parse("YES-0-DELIV-2|NO-DELIV-3");
        assert_eq!(
            next,
            Next::Branch(vec![
                BranchCandidate {
                    token: "YES".into(),
                    target: "0-DELIV-2".into()
                },
                BranchCandidate {
                    token: "NO".into(),
                    target: "DELIV-3".into()
                },
            ])
        );
    }

    #[test]
    fn single_and_terminal() {
        assert_eq!(Next::parse(""), Next::Terminal);
        assert_eq!(Next::parse("  "), Next::Terminal);
        assert_eq!(Next::parse("GREETA-2"), Next::Single("GREETA-2".into()));
    }

    #[test]
    fn word_prefix_matching() {
        let candidates = yes_no();
        assert_eq!(match_branch(&candidates, "definitely yes").map(|c| c.target.as_str()), Some("A"));
        assert_eq!(match_branch(&candidates, "nope").map(|c| c.target.as_str()), Some("B"));
        assert_eq!(match_branch(&candidates, "maybe"), None);
        assert_eq!(match_branch(&candidates, "YES please").map(|c| c.target.as_str()), Some("A"));
    }

    #[test]
    fn tokens_inside_words_do_not_match() {
        let candidates = yes_no();
        // "eyes" contains "yes" but not at a word start; "know" contains "no" likewise
        assert_eq!(match_branch(&candidates, "my eyes, I know"), None);
        assert_eq!(match_branch(&candidates, ""), None);
    }

    #[test]
    fn order_decides_ties() {
        let candidates = yes_no();
        assert_eq!(match_branch(&candidates, "no, yes").map(|c| c.token.as_str()), Some("YES"));
    }

    #[test]
    fn display_roundtrips() {
        for raw in ["", "GREETA-2", "YES-A|NO-B"] {
            assert_eq!(Next::parse(raw).to_string(), raw);
        }
        let lone = Next::parse("YES-A|");
        assert_eq!(Next::parse(&lone.to_string()), lone);
    }
}
