//! The per-function arena that owns every form and element.
//!
//! Allocation never fails short of the host running out of memory, and
//! nothing is freed individually — the whole pool drops with the
//! function's analysis state. Nodes abandoned mid-transform simply stay
//! unreachable.

use serde::{Deserialize, Serialize};

use crate::entity::PrimaryMap;
use crate::forms::element::{ElemId, ElementKind, Form, FormElement, FormId};

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct FormPool {
    forms: PrimaryMap<FormId, Form>,
    elems: PrimaryMap<ElemId, FormElement>,
}

impl FormPool {
    pub fn new() -> FormPool {
        FormPool::default()
    }

    pub fn form(&self, id: FormId) -> &Form {
        &self.forms[id]
    }

    pub fn form_mut(&mut self, id: FormId) -> &mut Form {
        &mut self.forms[id]
    }

    pub fn elem(&self, id: ElemId) -> &FormElement {
        &self.elems[id]
    }

    pub fn elem_mut(&mut self, id: ElemId) -> &mut FormElement {
        &mut self.elems[id]
    }

    pub fn kind(&self, id: ElemId) -> &ElementKind {
        &self.elems[id].kind
    }

    /// Allocate an element. Any forms the kind refers to are adopted: their
    /// parent handle is pointed at the new element.
    pub fn alloc_element(&mut self, kind: ElementKind) -> ElemId {
        let children = kind.child_forms();
        let id = self.elems.push(FormElement { kind, parent: None });
        for child in children {
            self.forms[child].parent = Some(id);
        }
        id
    }

    pub fn alloc_empty_form(&mut self) -> FormId {
        self.forms.push(Form {
            elems: Vec::new(),
            parent: None,
        })
    }

    /// Allocate a form holding exactly `elem`, under `parent`.
    pub fn alloc_single_form(&mut self, parent: Option<ElemId>, elem: ElemId) -> FormId {
        let id = self.forms.push(Form {
            elems: vec![elem],
            parent,
        });
        self.elems[elem].parent = Some(id);
        id
    }

    /// Allocate an element and a form holding only it.
    pub fn alloc_single_element_form(
        &mut self,
        parent: Option<ElemId>,
        kind: ElementKind,
    ) -> FormId {
        let elem = self.alloc_element(kind);
        self.alloc_single_form(parent, elem)
    }

    /// Allocate a form from an element sequence, under `parent`.
    pub fn alloc_sequence_form(&mut self, parent: Option<ElemId>, elems: Vec<ElemId>) -> FormId {
        let id = self.forms.push(Form { elems, parent });
        for i in 0..self.forms[id].elems.len() {
            let e = self.forms[id].elems[i];
            self.elems[e].parent = Some(id);
        }
        id
    }

    pub fn form_len(&self, form: FormId) -> usize {
        self.forms[form].elems.len()
    }

    pub fn at(&self, form: FormId, i: usize) -> ElemId {
        self.forms[form].elems[i]
    }

    pub fn back(&self, form: FormId) -> Option<ElemId> {
        self.forms[form].elems.last().copied()
    }

    pub fn push_back(&mut self, form: FormId, elem: ElemId) {
        self.forms[form].elems.push(elem);
        self.elems[elem].parent = Some(form);
    }

    pub fn pop_back(&mut self, form: FormId) -> Option<ElemId> {
        self.forms[form].elems.pop()
    }

    /// Rewrite the last slot of `form` in place. Returns the displaced
    /// element. This is how a located trailing branch is patched.
    pub fn replace_back(&mut self, form: FormId, elem: ElemId) -> ElemId {
        let slot = self.forms[form]
            .elems
            .last_mut()
            .expect("replace_back on empty form");
        let old = std::mem::replace(slot, elem);
        self.elems[elem].parent = Some(form);
        old
    }

    /// The form's element, iff it holds exactly one.
    pub fn try_as_single_element(&self, form: FormId) -> Option<ElemId> {
        match self.forms[form].elems.as_slice() {
            [single] => Some(*single),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::atomic::{Atom, SimpleExpr};

    fn int_expr(pool: &mut FormPool, v: i64) -> ElemId {
        pool.alloc_element(ElementKind::Expr(SimpleExpr::identity(Atom::Int(v))))
    }

    #[test]
    fn push_pop_back() {
        let mut pool = FormPool::new();
        let form = pool.alloc_empty_form();
        let a = int_expr(&mut pool, 1);
        let b = int_expr(&mut pool, 2);
        pool.push_back(form, a);
        pool.push_back(form, b);

        assert_eq!(pool.form_len(form), 2);
        assert_eq!(pool.back(form), Some(b));
        assert_eq!(pool.elem(a).parent, Some(form));
        assert_eq!(pool.elem(b).parent, Some(form));

        assert_eq!(pool.pop_back(form), Some(b));
        assert_eq!(pool.back(form), Some(a));
    }

    #[test]
    fn replace_back_rewrites_slot() {
        let mut pool = FormPool::new();
        let a = int_expr(&mut pool, 1);
        let form = pool.alloc_single_form(None, a);
        let b = int_expr(&mut pool, 2);

        let old = pool.replace_back(form, b);
        assert_eq!(old, a);
        assert_eq!(pool.form_len(form), 1);
        assert_eq!(pool.back(form), Some(b));
        assert_eq!(pool.elem(b).parent, Some(form));
    }

    #[test]
    fn single_element_access() {
        let mut pool = FormPool::new();
        let a = int_expr(&mut pool, 1);
        let form = pool.alloc_single_form(None, a);
        assert_eq!(pool.try_as_single_element(form), Some(a));

        let b = int_expr(&mut pool, 2);
        pool.push_back(form, b);
        assert_eq!(pool.try_as_single_element(form), None);
    }

    #[test]
    fn alloc_element_adopts_children() {
        let mut pool = FormPool::new();
        let src = pool.alloc_empty_form();
        let abs = pool.alloc_element(ElementKind::Abs { source: src });
        assert_eq!(pool.form(src).parent, Some(abs));
    }

    #[test]
    fn sequence_form_sets_parents() {
        let mut pool = FormPool::new();
        let a = int_expr(&mut pool, 1);
        let b = int_expr(&mut pool, 2);
        let form = pool.alloc_sequence_form(None, vec![a, b]);
        assert_eq!(pool.elem(a).parent, Some(form));
        assert_eq!(pool.elem(b).parent, Some(form));
        assert_eq!(pool.form(form).parent, None);
    }
}
