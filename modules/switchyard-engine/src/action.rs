//! Action references and the sequence table.
//!
//! An event key maps to an ordered `Sequence` of `ActionRef`s. Order is
//! significant: each action sees the input merged by all earlier ones.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::error::BuildError;

/// The accumulating record threaded through a sequence.
pub type Input = serde_json::Map<String, serde_json::Value>;

/// Shallow merge: keys in `output` overwrite keys in `input`.
pub fn merge(input: &mut Input, output: Input) {
    for (key, value) in output {
        input.insert(key, value);
    }
}

/// Names starting with `/` are navigation targets, not handler names.
pub fn is_redirect(name: &str) -> bool {
    name.starts_with('/')
}

// ---------------------------------------------------------------------------
// ActionRef
// ---------------------------------------------------------------------------

/// One step of a sequence.
#[derive(Clone, Debug)]
pub enum ActionRef {
    /// Key into the local/remote handler maps, or a redirect target.
    Name(String),
    /// Zero-argument side effect, fired once.
    Effect(Effect),
    /// Nested sequence gated on a store path.
    Conditional(Branch),
}

impl ActionRef {
    pub fn name(name: impl Into<String>) -> Self {
        Self::Name(name.into())
    }

    pub fn effect(
        label: impl Into<String>,
        run: impl Fn() -> Result<()> + Send + Sync + 'static,
    ) -> Self {
        Self::Effect(Effect::new(label, run))
    }

    /// Run `nested` only when the store value at `path` is truthy.
    pub fn when(path: impl Into<String>, nested: Vec<ActionRef>) -> Self {
        Self::Conditional(Branch {
            path: path.into(),
            nested: Nested::Inline(nested),
        })
    }

    /// Run the registered sequence `key` only when the store value at `path`
    /// is truthy.
    pub fn when_sequence(path: impl Into<String>, key: impl Into<String>) -> Self {
        Self::Conditional(Branch {
            path: path.into(),
            nested: Nested::Sequence(key.into()),
        })
    }

    /// Label used for timing and logging.
    pub fn label(&self) -> String {
        match self {
            Self::Name(name) => name.clone(),
            Self::Effect(effect) => format!("fx:{}", effect.label()),
            Self::Conditional(branch) => branch.path.clone(),
        }
    }
}

impl From<&str> for ActionRef {
    fn from(name: &str) -> Self {
        Self::Name(name.to_string())
    }
}

impl From<String> for ActionRef {
    fn from(name: String) -> Self {
        Self::Name(name)
    }
}

/// A labelled side effect with no input or output. A failed effect is
/// reported like any other action and the sequence carries on.
#[derive(Clone)]
pub struct Effect {
    label: String,
    run: Arc<dyn Fn() -> Result<()> + Send + Sync>,
}

impl Effect {
    pub fn new(
        label: impl Into<String>,
        run: impl Fn() -> Result<()> + Send + Sync + 'static,
    ) -> Self {
        Self {
            label: label.into(),
            run: Arc::new(run),
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub(crate) fn fire(&self) -> Result<()> {
        (self.run)()
    }
}

impl fmt::Debug for Effect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Effect").field("label", &self.label).finish()
    }
}

/// A store-gated sub-sequence.
#[derive(Clone, Debug)]
pub struct Branch {
    /// Dotted store path whose truthiness opens the branch.
    pub path: String,
    pub nested: Nested,
}

impl Branch {
    /// Key the branch's sub-dispatch runs under: the gating path for inline
    /// branches, the referenced key otherwise.
    pub fn key(&self) -> &str {
        match &self.nested {
            Nested::Inline(_) => &self.path,
            Nested::Sequence(key) => key,
        }
    }
}

#[derive(Clone, Debug)]
pub enum Nested {
    Inline(Vec<ActionRef>),
    /// Another registered sequence, by key.
    Sequence(String),
}

// ---------------------------------------------------------------------------
// Sequences
// ---------------------------------------------------------------------------

/// Which trigger a sequence answers to. All kinds share one key space.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SequenceKind {
    Event,
    /// Key is a route pattern such as `/users/:id`.
    Route,
    /// Key is one or more comma-separated store paths.
    Listener,
    /// Key is a socket message name.
    Socket,
}

#[derive(Clone, Debug)]
pub struct Sequence {
    pub kind: SequenceKind,
    pub actions: Vec<ActionRef>,
}

/// Event key → sequence. Remembers registration order so route matching is
/// first-registered-wins.
#[derive(Clone, Debug, Default)]
pub struct SequenceTable {
    sequences: HashMap<String, Sequence>,
    order: Vec<String>,
}

impl SequenceTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(
        &mut self,
        key: impl Into<String>,
        kind: SequenceKind,
        actions: Vec<ActionRef>,
    ) -> Result<(), BuildError> {
        let key = key.into();
        if self.sequences.contains_key(&key) {
            return Err(BuildError::DuplicateSequence { key });
        }
        self.order.push(key.clone());
        self.sequences.insert(key, Sequence { kind, actions });
        Ok(())
    }

    pub fn get(&self, key: &str) -> Option<&Sequence> {
        self.sequences.get(key)
    }

    pub fn kind_of(&self, key: &str) -> Option<SequenceKind> {
        self.sequences.get(key).map(|s| s.kind)
    }

    /// Keys of one kind, in registration order.
    pub fn keys_of(&self, kind: SequenceKind) -> impl Iterator<Item = &str> {
        self.order
            .iter()
            .filter(move |key| self.kind_of(key) == Some(kind))
            .map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Every action name referenced anywhere, nested branches included.
    pub fn referenced_names(&self) -> HashSet<&str> {
        fn walk<'a>(actions: &'a [ActionRef], out: &mut HashSet<&'a str>) {
            for action in actions {
                match action {
                    ActionRef::Name(name) => {
                        out.insert(name);
                    }
                    ActionRef::Conditional(Branch {
                        nested: Nested::Inline(nested),
                        ..
                    }) => walk(nested, out),
                    _ => {}
                }
            }
        }

        let mut names = HashSet::new();
        for sequence in self.sequences.values() {
            walk(&sequence.actions, &mut names);
        }
        names
    }

    /// Check that every `Nested::Sequence` points at a registered key and that
    /// those references form no cycle.
    pub fn check_references(&self) -> Result<(), BuildError> {
        for key in &self.order {
            for to in self.sequence_refs(key) {
                if !self.sequences.contains_key(to) {
                    return Err(BuildError::DanglingSequence {
                        from: key.clone(),
                        to: to.to_string(),
                    });
                }
            }
        }

        let mut done: HashSet<&str> = HashSet::new();
        for key in &self.order {
            let mut path = Vec::new();
            self.visit(key, &mut path, &mut done)?;
        }
        Ok(())
    }

    fn visit<'a>(
        &'a self,
        key: &'a str,
        path: &mut Vec<&'a str>,
        done: &mut HashSet<&'a str>,
    ) -> Result<(), BuildError> {
        if done.contains(key) {
            return Ok(());
        }
        if let Some(start) = path.iter().position(|k| *k == key) {
            let mut cycle: Vec<String> = path[start..].iter().map(|k| k.to_string()).collect();
            cycle.push(key.to_string());
            return Err(BuildError::CyclicSequence { cycle });
        }

        path.push(key);
        for next in self.sequence_refs(key) {
            self.visit(next, path, done)?;
        }
        path.pop();
        done.insert(key);
        Ok(())
    }

    /// Keys referenced through `Nested::Sequence` from `key`'s sequence.
    fn sequence_refs(&self, key: &str) -> Vec<&str> {
        fn walk<'a>(actions: &'a [ActionRef], out: &mut Vec<&'a str>) {
            for action in actions {
                if let ActionRef::Conditional(branch) = action {
                    match &branch.nested {
                        Nested::Inline(nested) => walk(nested, out),
                        Nested::Sequence(key) => out.push(key),
                    }
                }
            }
        }

        let mut refs = Vec::new();
        if let Some(sequence) = self.sequences.get(key) {
            walk(&sequence.actions, &mut refs);
        }
        refs
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn merge_overwrites_earlier_keys() {
        let mut input = json!({"id": 7, "name": "old"}).as_object().unwrap().clone();
        let output = json!({"name": "Ann"}).as_object().unwrap().clone();
        merge(&mut input, output);
        assert_eq!(serde_json::Value::Object(input), json!({"id": 7, "name": "Ann"}));
    }

    #[test]
    fn labels_by_kind() {
        assert_eq!(ActionRef::name("fetchUser").label(), "fetchUser");
        assert_eq!(ActionRef::effect("ping", || Ok(())).label(), "fx:ping");
        assert_eq!(ActionRef::when("user.isAdmin", vec![]).label(), "user.isAdmin");
    }

    #[test]
    fn duplicate_keys_are_rejected() {
        let mut table = SequenceTable::new();
        table.insert("load", SequenceKind::Event, vec![]).unwrap();
        let err = table.insert("load", SequenceKind::Route, vec![]).unwrap_err();
        assert!(matches!(err, BuildError::DuplicateSequence { key } if key == "load"));
    }

    #[test]
    fn keys_of_keeps_registration_order() {
        let mut table = SequenceTable::new();
        table.insert("/b", SequenceKind::Route, vec![]).unwrap();
        table.insert("evt", SequenceKind::Event, vec![]).unwrap();
        table.insert("/a", SequenceKind::Route, vec![]).unwrap();
        let routes: Vec<&str> = table.keys_of(SequenceKind::Route).collect();
        assert_eq!(routes, vec!["/b", "/a"]);
    }

    #[test]
    fn referenced_names_include_inline_branches() {
        let mut table = SequenceTable::new();
        table
            .insert(
                "load",
                SequenceKind::Event,
                vec!["a".into(), ActionRef::when("flag", vec!["b".into()])],
            )
            .unwrap();
        let names = table.referenced_names();
        assert!(names.contains("a"));
        assert!(names.contains("b"));
    }

    #[test]
    fn cycle_through_sequence_references_is_detected() {
        let mut table = SequenceTable::new();
        table
            .insert("a", SequenceKind::Event, vec![ActionRef::when_sequence("x", "b")])
            .unwrap();
        table
            .insert(
                "b",
                SequenceKind::Event,
                vec![ActionRef::when("y", vec![ActionRef::when_sequence("z", "a")])],
            )
            .unwrap();

        let err = table.check_references().unwrap_err();
        match err {
            BuildError::CyclicSequence { cycle } => assert_eq!(cycle, vec!["a", "b", "a"]),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn diamond_references_are_not_cycles() {
        let mut table = SequenceTable::new();
        table.insert("leaf", SequenceKind::Event, vec![]).unwrap();
        table
            .insert("left", SequenceKind::Event, vec![ActionRef::when_sequence("p", "leaf")])
            .unwrap();
        table
            .insert("right", SequenceKind::Event, vec![ActionRef::when_sequence("p", "leaf")])
            .unwrap();
        table
            .insert(
                "root",
                SequenceKind::Event,
                vec![
                    ActionRef::when_sequence("p", "left"),
                    ActionRef::when_sequence("p", "right"),
                ],
            )
            .unwrap();
        assert!(table.check_references().is_ok());
    }

    #[test]
    fn dangling_sequence_reference_is_reported() {
        let mut table = SequenceTable::new();
        table
            .insert("a", SequenceKind::Event, vec![ActionRef::when_sequence("x", "ghost")])
            .unwrap();
        let err = table.check_references().unwrap_err();
        assert!(matches!(err, BuildError::DanglingSequence { to, .. } if to == "ghost"));
    }
}
