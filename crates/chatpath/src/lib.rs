//! Branching dialogue graph.
//!
//! A script is a table of rows keyed `{language}-{category}-{item}`. Walking
//! from a key follows single `next` pointers until a row ends the conversation
//! or offers a branch; the visitor's answer then picks the next key.
//!
//! ```rust
//! use chatpath::{Advance, DialogueGraph, GraphOptions};
//!
//! let graph = DialogueGraph::from_toml_str(r#"
//! [[node]]
//! category = "ASK"
//! item = 1
//! text = "Are you here for a delivery?"
//! action = "yesNo"
//! next = "YES-DELIV-1|NO-BYE-1"
//! "#, GraphOptions::default()).unwrap();
//!
//! let traversal = graph.resolve("ASK-1");
//! assert_eq!(traversal.advance("yes I am"), Advance::Next("DELIV-1".into()));
//! ```

pub mod action;
pub mod branch;
pub mod graph;
pub mod key;
pub mod render;
pub mod script;

pub use action::{Action, MAX_WAIT};
pub use branch::{match_branch, BranchCandidate, Next, BRANCH_MARKER};
pub use graph::{
    advance, Advance, DialogueGraph, DialogueNode, DialogueTraversal, GraphOptions, Walk,
    DEFAULT_MAX_HOPS, FALLBACK_TEXT,
};
pub use key::{KeyError, NodeKey, RANDOM_ITEM};
pub use render::{render, time_of_day, RenderContext};
pub use script::{IntentRow, Script, ScriptError, ScriptRow};
