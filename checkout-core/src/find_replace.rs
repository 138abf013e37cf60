// src/find_replace.rs
//
// Regex search and replace over any walkable tree. Matches become
// `FindReplaceAction`s: a path, a replace function, and optionally the
// serializable `RegexFindReplace` they were built from.

use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::error::{EditError, FindReplaceError, PathResolutionError, ReplaceConversionError};
use crate::tree::{Scalar, SimplifiedPath, Step, Walk, expand, resolve, set_at, walk};

pub type MatchFn = Arc<dyn Fn(&Scalar) -> bool + Send + Sync>;
pub type ReplaceFn = Arc<dyn Fn(&Scalar) -> Result<Scalar, ReplaceConversionError> + Send + Sync>;

/// Leaves whose text form contains a match. Null leaves never match.
pub fn get_default_match_fn(search: &Regex) -> MatchFn {
    let search = search.clone();
    Arc::new(move |value: &Scalar| match value {
        Scalar::Null => false,
        Scalar::Str(s) => search.is_match(s),
        other => search.is_match(&other.to_string()),
    })
}

/// Substitute `replace_text` for every match, then coerce back to the
/// leaf's kind: numbers go through a float parse, booleans through a
/// boolean parse.
pub fn get_default_replace_fn(replace_text: &str, search: &Regex) -> ReplaceFn {
    let search = search.clone();
    let replace_text = replace_text.to_string();
    Arc::new(move |value: &Scalar| {
        let replaced = |text: &str| search.replace_all(text, replace_text.as_str()).into_owned();
        match value {
            Scalar::Str(s) => Ok(Scalar::Str(replaced(s))),
            Scalar::Int(_) => {
                let text = replaced(&value.to_string());
                parse_float(&text, "int").map(|x| Scalar::Int(x.trunc() as i64))
            }
            Scalar::Float(_) => {
                let text = replaced(&value.to_string());
                parse_float(&text, "float").map(Scalar::Float)
            }
            Scalar::Bool(_) => {
                let text = replaced(&value.to_string());
                parse_bool(&text).map(Scalar::Bool)
            }
            Scalar::Null => Err(ReplaceConversionError::new(
                "null",
                "null",
                "null values cannot be replaced",
            )),
        }
    })
}

fn parse_float(text: &str, target: &'static str) -> Result<f64, ReplaceConversionError> {
    text.trim()
        .parse::<f64>()
        .ok()
        .filter(|x| x.is_finite())
        .ok_or_else(|| ReplaceConversionError::new(text, target, "not a finite number"))
}

fn parse_bool(text: &str) -> Result<bool, ReplaceConversionError> {
    match text.trim().to_ascii_lowercase().as_str() {
        "true" | "1" => Ok(true),
        "false" | "0" => Ok(false),
        _ => Err(ReplaceConversionError::new(text, "bool", "not a boolean")),
    }
}

/// Serializable description of a regex edit, enough to rebuild its
/// replace function later.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegexFindReplace {
    pub path: SimplifiedPath,
    pub search_regex: String,
    pub replace_text: String,
    #[serde(default = "RegexFindReplace::default_case_sensitive")]
    pub case_sensitive: bool,
}

impl RegexFindReplace {
    fn default_case_sensitive() -> bool {
        true
    }

    pub fn compile(&self) -> Result<Regex, FindReplaceError> {
        compile_regex(&self.search_regex, self.case_sensitive)
    }

    pub fn to_action(&self) -> Result<FindReplaceAction, FindReplaceError> {
        let search = self.compile()?;
        Ok(FindReplaceAction {
            path: self.path.clone(),
            replace_fn: get_default_replace_fn(&self.replace_text, &search),
            origin: Some(self.clone()),
        })
    }

    /// Build the action and check the path still resolves under `root`.
    pub fn to_action_for(&self, root: &dyn Walk) -> Result<FindReplaceAction, FindReplaceError> {
        let action = self.to_action()?;
        expand(&self.path, root)?;
        Ok(action)
    }
}

fn compile_regex(pattern: &str, case_sensitive: bool) -> Result<Regex, FindReplaceError> {
    RegexBuilder::new(pattern)
        .case_insensitive(!case_sensitive)
        .build()
        .map_err(|source| FindReplaceError::InvalidRegex {
            pattern: pattern.to_string(),
            source,
        })
}

/// A single pending edit.
#[derive(Clone)]
pub struct FindReplaceAction {
    pub path: SimplifiedPath,
    pub replace_fn: ReplaceFn,
    pub origin: Option<RegexFindReplace>,
}

impl fmt::Debug for FindReplaceAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FindReplaceAction")
            .field("path", &self.path.to_string())
            .field("origin", &self.origin)
            .finish_non_exhaustive()
    }
}

impl FindReplaceAction {
    pub fn new(path: SimplifiedPath, replace_fn: ReplaceFn) -> Self {
        Self {
            path,
            replace_fn,
            origin: None,
        }
    }

    /// Apply with the bound path and replace function.
    pub fn apply(&self, target: &mut dyn Walk) -> bool {
        self.apply_with(target, None, None)
    }

    /// Apply, optionally overriding the path or replace function.
    ///
    /// Failures are logged and reported as `false`; the target is left
    /// untouched in that case.
    pub fn apply_with(
        &self,
        target: &mut dyn Walk,
        path: Option<&SimplifiedPath>,
        replace_fn: Option<&ReplaceFn>,
    ) -> bool {
        let path = path.unwrap_or(&self.path);
        let replace_fn = replace_fn.unwrap_or(&self.replace_fn);
        match edit(target, path, replace_fn) {
            Ok(()) => {
                debug!(path = %path, "replaced value");
                true
            }
            Err(EditError::Path(PathResolutionError::MissingKey(key))) => {
                warn!(
                    path = %path,
                    "Unable to find key ({key}) in file. File may have already been edited"
                );
                false
            }
            Err(e) => {
                warn!(path = %path, error = %e, "Unable to replace value");
                false
            }
        }
    }

    /// Whether both actions address the same slot, ignoring owner tags.
    pub fn same_path(&self, other: &SimplifiedPath) -> bool {
        self.path.same_steps(other)
    }
}

fn edit(target: &mut dyn Walk, path: &SimplifiedPath, replace_fn: &ReplaceFn) -> Result<(), EditError> {
    let current = {
        let resolved = resolve(&*target, path)?;
        resolved
            .scalar()
            .ok_or(EditError::NotALeaf("container"))?
    };
    let replacement = replace_fn(&current)?;
    set_at(target, path, replacement)
}

/// One action per leaf matching `search_regex`, in walk order.
pub fn find(
    root: &dyn Walk,
    search_regex: &str,
    replace_text: &str,
    case_sensitive: bool,
) -> Result<Vec<FindReplaceAction>, FindReplaceError> {
    let search = compile_regex(search_regex, case_sensitive)?;
    let matches = get_default_match_fn(&search);
    let replace_fn = get_default_replace_fn(replace_text, &search);
    let actions: Vec<FindReplaceAction> = walk(root, |value| matches(value))
        .map(|address| {
            let path = address.simplify();
            FindReplaceAction {
                origin: Some(RegexFindReplace {
                    path: path.clone(),
                    search_regex: search_regex.to_string(),
                    replace_text: replace_text.to_string(),
                    case_sensitive,
                }),
                path,
                replace_fn: Arc::clone(&replace_fn),
            }
        })
        .collect();
    debug!(pattern = search_regex, matches = actions.len(), "find finished");
    Ok(actions)
}

/// Apply actions in order, skipping any whose slot was already handled.
/// Returns the number of successful edits.
pub fn apply_all(target: &mut dyn Walk, actions: &[FindReplaceAction]) -> usize {
    let mut seen: Vec<&SimplifiedPath> = Vec::new();
    let mut applied = 0;
    for action in actions {
        if seen.iter().any(|path| action.same_path(path)) {
            debug!(path = %action.path, "skipping duplicate action");
            continue;
        }
        seen.push(&action.path);
        if action.apply(target) {
            applied += 1;
        }
    }
    applied
}

/// Owner type name and field of the last field step in `path`.
pub fn get_deepest_composite(path: &SimplifiedPath) -> Option<(&str, &str)> {
    path.segments.iter().rev().find_map(|seg| match &seg.step {
        Step::Field(field) => Some((seg.tag.as_str(), field.as_str())),
        _ => None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use indexmap::IndexMap;

    type Tree = IndexMap<String, IndexMap<String, Vec<i64>>>;

    fn tree() -> Tree {
        IndexMap::from([(
            "a".to_string(),
            IndexMap::from([("b".to_string(), vec![1, 2, 3])]),
        )])
    }

    fn regex(pattern: &str) -> Regex {
        Regex::new(pattern).unwrap()
    }

    #[test]
    fn default_replace_keeps_leaf_kind() {
        let f = get_default_replace_fn("7", &regex("2"));
        assert_eq!(f(&Scalar::Int(12)).unwrap(), Scalar::Int(17));
        assert_eq!(f(&Scalar::Float(2.5)).unwrap(), Scalar::Float(7.5));
        assert_eq!(f(&Scalar::Str("a2b2".into())).unwrap(), Scalar::Str("a7b7".into()));

        let to_bool = get_default_replace_fn("false", &regex("(?i)true"));
        assert_eq!(to_bool(&Scalar::Bool(true)).unwrap(), Scalar::Bool(false));
    }

    #[test]
    fn default_replace_reports_conversion_errors() {
        let f = get_default_replace_fn("x", &regex("1"));
        let err = f(&Scalar::Int(1)).unwrap_err();
        assert_eq!(err.target, "int");
        assert!(f(&Scalar::Null).is_err());
    }

    #[test]
    fn match_fn_skips_null() {
        let m = get_default_match_fn(&regex(".*"));
        assert!(!m(&Scalar::Null));
        assert!(m(&Scalar::Bool(false)));
    }

    #[test]
    fn find_then_apply_all_edits_every_match() {
        let mut tree = tree();
        let actions = find(&tree, "^[13]$", "9", true).unwrap();
        assert_eq!(actions.len(), 2);
        assert_eq!(apply_all(&mut tree, &actions), 2);
        assert_eq!(tree["a"]["b"], vec![9, 2, 9]);
    }

    #[test]
    fn apply_all_deduplicates_by_path() {
        let mut tree = tree();
        let mut actions = find(&tree, "^2$", "20", true).unwrap();
        actions.extend(find(&tree, "^2$", "40", true).unwrap());
        assert_eq!(apply_all(&mut tree, &actions), 1);
        assert_eq!(tree["a"]["b"], vec![1, 20, 3]);
    }

    #[test]
    fn renaming_a_key_goes_through_the_key_step() {
        let mut tree = tree();
        let actions = find(&tree, "^b$", "c", true).unwrap();
        assert_eq!(actions.len(), 1);
        assert!(actions[0].apply(&mut tree));
        assert!(tree["a"].contains_key("c"));
        assert!(!actions[0].apply(&mut tree), "key is gone after the rename");
    }

    #[test]
    fn override_path_and_replace_fn() {
        let mut tree = tree();
        let action = find(&tree, "^1$", "5", true).unwrap().remove(0);
        let other = find(&tree, "^3$", "5", true).unwrap().remove(0).path;
        let triple: ReplaceFn = Arc::new(|value: &Scalar| match value {
            Scalar::Int(i) => Ok(Scalar::Int(i * 3)),
            other => Err(ReplaceConversionError::new(other, "int", "expected int")),
        });
        assert!(action.apply_with(&mut tree, Some(&other), Some(&triple)));
        assert_eq!(tree["a"]["b"], vec![1, 2, 9]);
    }

    #[test]
    fn invalid_regex_is_an_error() {
        let err = find(&tree(), "(", "x", true).unwrap_err();
        assert!(matches!(err, FindReplaceError::InvalidRegex { .. }));
    }

    #[test]
    fn origin_rebuilds_an_equivalent_action() {
        let tree_before = tree();
        let action = find(&tree_before, "^2$", "5", true).unwrap().remove(0);
        let origin = action.origin.clone().unwrap();
        let json = serde_json::to_string(&origin).unwrap();
        let restored: RegexFindReplace = serde_json::from_str(&json).unwrap();

        let mut fresh = tree();
        let rebuilt = restored.to_action_for(&fresh).unwrap();
        assert!(rebuilt.same_path(&action.path));
        assert!(rebuilt.apply(&mut fresh));
        assert_eq!(fresh["a"]["b"], vec![1, 5, 3]);
    }

    #[test]
    fn case_insensitive_search() {
        let mut tree: IndexMap<String, String> =
            IndexMap::from([("k".to_string(), "Motor".to_string())]);
        let actions = find(&tree, "motor", "pump", false).unwrap();
        assert_eq!(apply_all(&mut tree, &actions), 1);
        assert_eq!(tree["k"], "pump");
        assert!(find(&tree, "PUMP", "x", true).unwrap().is_empty());
    }

    #[test]
    fn deepest_composite_is_the_last_field_step() {
        let path: SimplifiedPath = serde_json::from_str(
            r#"[["ConfigurationFile","configs"],["__list__",0],["PVConfiguration","checklist"],["__list__",1]]"#,
        )
        .unwrap();
        assert_eq!(get_deepest_composite(&path), Some(("PVConfiguration", "checklist")));
        assert_eq!(get_deepest_composite(&SimplifiedPath::default()), None);
    }
}
