//! Store-gated branches.

use switchyard_store::{is_truthy, split_path, StoreView};

use crate::action::{ActionRef, Branch, Nested, SequenceTable};

/// A branch is open when the store value at its path is truthy. A missing
/// path is closed, not an error.
pub fn is_open<V: StoreView + ?Sized>(store: &V, branch: &Branch) -> bool {
    is_truthy(store.get(&split_path(&branch.path)).as_ref())
}

/// The actions a branch runs, or `None` when it references an unregistered
/// sequence.
pub fn resolve<'a>(branch: &'a Branch, sequences: &'a SequenceTable) -> Option<&'a [ActionRef]> {
    match &branch.nested {
        Nested::Inline(actions) => Some(actions.as_slice()),
        Nested::Sequence(key) => sequences.get(key).map(|s| s.actions.as_slice()),
    }
}

/// `user.isAdmin: loadAdmin, fx:ping` for a taken branch.
pub fn taken_label(branch: &Branch, actions: &[ActionRef]) -> String {
    let labels: Vec<String> = actions.iter().map(ActionRef::label).collect();
    format!("{}: {}", branch.path, labels.join(", "))
}

/// `user.isAdmin: false` for a skipped branch.
pub fn skipped_label(branch: &Branch) -> String {
    format!("{}: false", branch.path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::SequenceKind;
    use serde_json::{json, Value};

    struct State(Value);

    impl StoreView for State {
        fn get(&self, path: &[&str]) -> Option<Value> {
            switchyard_store::get_path(&self.0, path).cloned()
        }
    }

    fn branch(path: &str) -> Branch {
        Branch {
            path: path.to_string(),
            nested: Nested::Inline(vec!["loadAdmin".into()]),
        }
    }

    #[test]
    fn gate_follows_truthiness() {
        let state = State(json!({"user": {"isAdmin": false, "name": "Ann"}}));
        assert!(!is_open(&state, &branch("user.isAdmin")));
        assert!(is_open(&state, &branch("user.name")));
        assert!(!is_open(&state, &branch("user.missing.deeper")));
    }

    #[test]
    fn resolve_inline_and_named() {
        let mut table = SequenceTable::new();
        table
            .insert("admin:load", SequenceKind::Event, vec!["loadAdmin".into()])
            .unwrap();

        let inline = branch("user.isAdmin");
        assert_eq!(inline.key(), "user.isAdmin");
        assert_eq!(resolve(&inline, &table).unwrap().len(), 1);

        let named = Branch {
            path: "user.isAdmin".into(),
            nested: Nested::Sequence("admin:load".into()),
        };
        assert_eq!(named.key(), "admin:load");
        assert!(resolve(&named, &table).is_some());

        let ghost = Branch {
            path: "p".into(),
            nested: Nested::Sequence("ghost".into()),
        };
        assert!(resolve(&ghost, &table).is_none());
    }

    #[test]
    fn labels() {
        let b = branch("user.isAdmin");
        assert_eq!(
            taken_label(&b, &["loadAdmin".into(), ActionRef::effect("ping", || Ok(()))]),
            "user.isAdmin: loadAdmin, fx:ping"
        );
        assert_eq!(skipped_label(&b), "user.isAdmin: false");
    }
}
