pub mod element;
pub mod pool;
pub mod printer;
pub mod verify;

pub use element::{
    CondEntry, CondNoElseEntry, ElemId, ElementKind, Form, FormElement, FormId, ScEntry, ScKind,
};
pub use pool::FormPool;
pub use printer::{elem_to_string, form_to_string};
pub use verify::verify_form_tree;
