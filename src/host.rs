//! Host-value protocol.
//!
//! The VM treats game entities as opaque handles: attribute lookup and
//! invocation go through this trait, and the VM never writes attributes or
//! aliases host state. Values cross the boundary by value; a list handed to
//! the VM belongs to the VM.

use std::rc::Rc;

use thiserror::Error;

use crate::value::Value;

#[derive(Debug, Clone, PartialEq, Error)]
#[error("{message}")]
pub struct HostError {
    pub message: String,
}

impl HostError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Outcome of a host call.
///
/// `Yield` means "not ready yet": the VM leaves the instruction pointer on
/// the CALL, charges one budgeted step, and returns from `run` so the same
/// call is re-attempted next tick. Blocking operations like weapon
/// cooldowns are built entirely from this on the host side.
#[derive(Debug, Clone, PartialEq)]
pub enum HostReturn {
    Value(Value),
    Yield,
}

pub trait HostObject {
    fn type_name(&self) -> &str;

    fn getattr(&self, name: &str) -> Result<Value, HostError> {
        Err(HostError::new(format!(
            "{} has no attribute '{name}'",
            self.type_name()
        )))
    }

    fn call(&self, args: &[Value]) -> Result<HostReturn, HostError> {
        let _ = args;
        Err(HostError::new(format!(
            "{} is not callable",
            self.type_name()
        )))
    }
}

/// Adapts a plain closure into a callable host value, for environment
/// injection of selectors and other host functions.
pub struct HostFn<F> {
    name: String,
    func: F,
}

impl<F> HostFn<F>
where
    F: Fn(&[Value]) -> Result<HostReturn, HostError> + 'static,
{
    pub fn value(name: impl Into<String>, func: F) -> Value {
        Value::Host(Rc::new(Self {
            name: name.into(),
            func,
        }))
    }
}

impl<F> HostObject for HostFn<F>
where
    F: Fn(&[Value]) -> Result<HostReturn, HostError> + 'static,
{
    fn type_name(&self) -> &str {
        &self.name
    }

    fn call(&self, args: &[Value]) -> Result<HostReturn, HostError> {
        (self.func)(args)
    }
}
