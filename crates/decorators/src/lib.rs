//! opdisco decorators: the label-based ownership protocol between Operators and
//! their components, and the status bookkeeping built on top of it.

#![forbid(unsafe_code)]

mod component;
mod error;
mod factory;
mod operator;
mod scheme;
pub mod selector;

pub use component::Component;
pub use error::{Error, Result};
pub use factory::{OperatorFactory, NAMESPACE_ALL};
pub use operator::{operator_names, OperatorDecorator};
pub use scheme::Scheme;
pub use selector::{Requirement, Selector};
