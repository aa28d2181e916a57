//! Structural invariant checks for a finished form tree.
//!
//! Run over the output of the structuring pass; any violation means a bug
//! in a cleaner, not bad input, so failures carry a human-readable
//! description rather than a typed error.

use crate::forms::element::{ElementKind, FormId, ScKind};
use crate::forms::pool::FormPool;

/// Check the invariants a fully built tree must satisfy:
///
/// - no reachable form ends in a `Branch` element;
/// - every short circuit is classified as `And` or `Or`;
/// - every cond entry and every `While` is cleaned;
/// - every `CondNoElse` has a final destination, and every non-last entry
///   a false destination;
/// - parent handles agree with the tree in both directions.
pub fn verify_form_tree(pool: &FormPool, root: FormId) -> Result<(), String> {
    let mut stack = vec![root];
    while let Some(form_id) = stack.pop() {
        let form = pool.form(form_id);

        if let Some(&back) = form.elems.last() {
            if pool.kind(back).is_branch() {
                return Err(format!("form {form_id:?} ends in a branch"));
            }
        }

        if let Some(parent) = form.parent {
            if !pool.kind(parent).child_forms().contains(&form_id) {
                return Err(format!(
                    "form {form_id:?} claims parent {parent:?}, which does not own it"
                ));
            }
        }

        for &elem_id in &form.elems {
            let elem = pool.elem(elem_id);
            if elem.parent != Some(form_id) {
                return Err(format!(
                    "element {elem_id:?} in form {form_id:?} has parent {:?}",
                    elem.parent
                ));
            }
            verify_element(&elem.kind, elem_id)?;
            stack.extend(elem.kind.child_forms());
        }
    }
    Ok(())
}

fn verify_element(kind: &ElementKind, id: crate::forms::ElemId) -> Result<(), String> {
    match kind {
        ElementKind::While { cleaned: false, .. } => {
            return Err(format!("while {id:?} is not cleaned"));
        }
        ElementKind::CondWithElse { entries, .. } => {
            if entries.iter().any(|e| !e.cleaned) {
                return Err(format!("cond-with-else {id:?} has an uncleaned entry"));
            }
        }
        ElementKind::CondNoElse {
            entries,
            final_destination,
            ..
        } => {
            if entries.iter().any(|e| !e.cleaned) {
                return Err(format!("cond-no-else {id:?} has an uncleaned entry"));
            }
            if final_destination.is_none() {
                return Err(format!("cond-no-else {id:?} has no final destination"));
            }
            for (i, e) in entries.iter().enumerate() {
                if i + 1 != entries.len() && e.false_destination.is_none() {
                    return Err(format!(
                        "cond-no-else {id:?} entry {i} has no false destination"
                    ));
                }
            }
        }
        ElementKind::ShortCircuit { kind, .. } => {
            if *kind == ScKind::Undetermined {
                return Err(format!("short circuit {id:?} is unclassified"));
            }
        }
        _ => {}
    }
    Ok(())
}
