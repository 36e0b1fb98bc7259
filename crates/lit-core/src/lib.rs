//! Core value representation for the Lit virtual machine.

mod value;

pub use value::{ObjHandle, Value};
