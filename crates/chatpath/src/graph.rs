//! The dialogue graph and its traversal.

use rand::seq::SliceRandom;
use rand::Rng;
use std::collections::HashMap;
use std::path::Path;
use tracing::{debug, warn};

use crate::action::Action;
use crate::branch::{match_branch, BranchCandidate, Next};
use crate::key::NodeKey;
use crate::script::{IntentRow, Script, ScriptError, ScriptRow};

/// Spoken when a key has no row.
pub const FALLBACK_TEXT: &str = "Something went wrong. I could not find the requested chat entry";

pub const DEFAULT_MAX_HOPS: usize = 32;

/// One resolved line of dialogue.
#[derive(Debug, Clone, PartialEq)]
pub struct DialogueNode {
    pub key: NodeKey,
    pub text: String,
    pub action: Action,
    pub next: Next,
}

#[derive(Debug, Clone)]
pub struct GraphOptions {
    /// Language given to two-part keys.
    pub language: String,
    /// Upper bound on lines in one traversal.
    pub max_hops: usize,
}

impl Default for GraphOptions {
    fn default() -> Self {
        Self {
            language: "0".to_string(),
            max_hops: DEFAULT_MAX_HOPS,
        }
    }
}

/// Rows grouped by category.
#[derive(Debug, Clone, Default)]
pub struct DialogueGraph {
    options: GraphOptions,
    categories: HashMap<String, Vec<DialogueNode>>,
    intents: Vec<IntentRow>,
}

impl DialogueGraph {
    pub fn load(path: &Path, options: GraphOptions) -> Result<Self, ScriptError> {
        Ok(Self::from_script(Script::load(path)?, options))
    }

    pub fn from_toml_str(contents: &str, options: GraphOptions) -> Result<Self, ScriptError> {
        Ok(Self::from_script(Script::parse(contents, Path::new("<inline>"))?, options))
    }

    pub fn from_script(script: Script, options: GraphOptions) -> Self {
        let mut graph = Self::from_rows(script.nodes, options);
        graph.intents = script.intents;
        graph
    }

    /// Build from rows. A repeated (language, category, item) keeps the first row.
    pub fn from_rows(rows: Vec<ScriptRow>, options: GraphOptions) -> Self {
        let mut categories: HashMap<String, Vec<DialogueNode>> = HashMap::new();
        for row in rows {
            let key = NodeKey::new(
                row.language.unwrap_or_else(|| options.language.clone()),
                row.category,
                row.item,
            );
            let bucket = categories.entry(key.category.clone()).or_default();
            if bucket.iter().any(|n| n.key == key) {
                warn!("duplicate dialogue row {}, keeping the first", key);
                continue;
            }
            bucket.push(DialogueNode {
                key,
                text: row.text,
                action: Action::parse(&row.action),
                next: Next::parse(&row.next),
            });
        }

        Self {
            options,
            categories,
            intents: Vec::new(),
        }
    }

    pub fn options(&self) -> &GraphOptions {
        &self.options
    }

    pub fn intents(&self) -> &[IntentRow] {
        &self.intents
    }

    pub fn len(&self) -> usize {
        self.categories.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Rows of a category, for callers that need to check membership.
    pub fn category(&self, category: &str) -> &[DialogueNode] {
        self.categories.get(category).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Find the row for `key`. Item 0 picks a random row in the category.
    ///
    /// Rows in the key's language are preferred; a category with no rows in
    /// that language answers from whatever languages it has.
    pub fn lookup<R: Rng + ?Sized>(&self, key: &NodeKey, rng: &mut R) -> Option<&DialogueNode> {
        let rows = self.categories.get(&key.category)?;
        let mut pool: Vec<&DialogueNode> = rows.iter().filter(|n| n.key.language == key.language).collect();
        if pool.is_empty() {
            pool = rows.iter().collect();
        }

        if key.is_random() {
            pool.choose(rng).copied()
        } else {
            pool.into_iter().find(|n| n.key.item == key.item)
        }
    }

    fn fallback_node(&self, raw: &str) -> DialogueNode {
        let key = NodeKey::parse(raw, &self.options.language)
            .unwrap_or_else(|_| NodeKey::new(self.options.language.clone(), "FALLBACK", 0));
        DialogueNode {
            key,
            text: FALLBACK_TEXT.to_string(),
            action: Action::None,
            next: Next::Terminal,
        }
    }

    /// Lazily walk `next` pointers from `start`.
    pub fn walk(&self, start: &str) -> Walk<'_, rand::rngs::ThreadRng> {
        self.walk_with_rng(start, rand::thread_rng())
    }

    pub fn walk_with_rng<R: Rng>(&self, start: &str, rng: R) -> Walk<'_, R> {
        Walk {
            graph: self,
            rng,
            pending: Some(start.to_string()),
            hops: 0,
        }
    }

    /// Resolve a whole traversal. Random where `item = 0` is involved.
    pub fn resolve(&self, start: &str) -> DialogueTraversal {
        self.resolve_with_rng(start, &mut rand::thread_rng())
    }

    pub fn resolve_with_rng<R: Rng>(&self, start: &str, rng: &mut R) -> DialogueTraversal {
        let lines: Vec<DialogueNode> = self.walk_with_rng(start, rng).collect();
        debug!("resolved {} into {} line(s)", start, lines.len());
        DialogueTraversal {
            start: start.to_string(),
            lines,
        }
    }
}

/// Iterator over the lines of one traversal.
///
/// Stops after a terminal line, after a line that branches, or once the hop
/// limit is reached. An unknown key yields the fallback line and stops.
pub struct Walk<'g, R> {
    graph: &'g DialogueGraph,
    rng: R,
    pending: Option<String>,
    hops: usize,
}

impl<R> Walk<'_, R> {
    /// Start over from a new key, keeping the rng.
    pub fn restart(&mut self, start: &str) {
        self.pending = Some(start.to_string());
        self.hops = 0;
    }
}

impl<R: Rng> Iterator for Walk<'_, R> {
    type Item = DialogueNode;

    fn next(&mut self) -> Option<DialogueNode> {
        let raw = self.pending.take()?;
        if self.hops >= self.graph.options.max_hops {
            warn!("dialogue walk stopped at {} after {} hops", raw, self.hops);
            return None;
        }
        self.hops += 1;

        let graph = self.graph;
        let found = NodeKey::parse(&raw, &graph.options.language)
            .ok()
            .and_then(|key| graph.lookup(&key, &mut self.rng))
            .cloned();

        match found {
            Some(node) => {
                if let Next::Single(next) = &node.next {
                    self.pending = Some(next.clone());
                }
                Some(node)
            }
            None => {
                warn!("no dialogue entry for {:?}", raw);
                Some(graph.fallback_node(&raw))
            }
        }
    }
}

/// Where a traversal goes after the visitor answers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Advance {
    Next(String),
    Terminal,
}

/// The lines spoken for one request, and the branch they stopped at.
#[derive(Debug, Clone, PartialEq)]
pub struct DialogueTraversal {
    pub start: String,
    pub lines: Vec<DialogueNode>,
}

impl DialogueTraversal {
    /// Candidates of the final line, if the walk stopped at a branch.
    pub fn branch(&self) -> Option<&[BranchCandidate]> {
        match self.lines.last().map(|n| &n.next) {
            Some(Next::Branch(candidates)) => Some(candidates),
            _ => None,
        }
    }

    pub fn advance(&self, response: &str) -> Advance {
        advance(self.branch().unwrap_or(&[]), response)
    }
}

/// Pick the continuation for `response`; no match ends the conversation.
pub fn advance(candidates: &[BranchCandidate], response: &str) -> Advance {
    match match_branch(candidates, response) {
        Some(candidate) => Advance::Next(candidate.target.clone()),
        None => Advance::Terminal,
    }
}
