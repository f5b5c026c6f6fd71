//! Walks over a realistic script file.

use chatpath::{Action, Advance, DialogueGraph, GraphOptions, Next, FALLBACK_TEXT};
use pretty_assertions::assert_eq;
use std::io::Write;
use std::path::Path;

fn doorbell() -> DialogueGraph {
    let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("tests/data/doorbell.toml");
    DialogueGraph::load(&path, GraphOptions::default()).unwrap()
}

#[test]
fn greeting_reaches_the_delivery_question() {
    let graph = doorbell();
    // Random entry; both greetings lead to the same question.
    let traversal = graph.resolve("GREETA-0");
    assert_eq!(traversal.lines.len(), 2);
    assert_eq!(traversal.lines[0].key.category, "GREETA");
    assert_eq!(traversal.lines[1].text, "Are you here to drop off a package?");
    assert_eq!(traversal.lines[1].action, Action::YesNo);
}

#[test]
fn full_delivery_conversation() {
    let graph = doorbell();
    let first = graph.resolve("ASKA-1");

    let Advance::Next(key) = first.advance("Yes, a parcel for you") else {
        panic!("expected to continue");
    };
    assert_eq!(key, "DELIV-1");

    let second = graph.resolve(&key);
    let texts: Vec<_> = second.lines.iter().map(|n| n.text.as_str()).collect();
    assert_eq!(
        texts,
        vec!["Please leave it by the door.", "Thank you, have a nice {time-of-day}."]
    );
    assert_eq!(second.lines.last().map(|n| &n.next), Some(&Next::Terminal));
}

#[test]
fn unanswered_question_ends_the_conversation() {
    let graph = doorbell();
    assert_eq!(graph.resolve("ASKA-1").advance("hmm"), Advance::Terminal);
}

#[test]
fn intents_are_loaded() {
    let graph = doorbell();
    assert_eq!(graph.intents().len(), 2);
    assert_eq!(graph.intents()[0].key, "DELIV-1");
}

#[test]
fn missing_entry_never_fails() {
    let traversal = doorbell().resolve("9-UNKNOWN-0");
    assert_eq!(traversal.lines.len(), 1);
    assert_eq!(traversal.lines[0].text, FALLBACK_TEXT);
    assert_eq!(traversal.advance("yes"), Advance::Terminal);
}

#[test]
fn loads_from_a_temp_file() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(
        file,
        r#"
[[node]]
category = "BYE"
item = 1
text = "See you."
"#
    )
    .unwrap();

    let graph = DialogueGraph::load(file.path(), GraphOptions::default()).unwrap();
    assert_eq!(graph.len(), 1);
    assert_eq!(graph.resolve("0-BYE-1").lines[0].text, "See you.");
}
