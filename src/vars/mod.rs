//! Variables Module
//!
//! The layered variable environment: values, scopes and the resolver
//! with its per-call-site memo cache.

pub mod resolver;
pub mod scope;
pub mod value;

pub use resolver::{ResolveCache, Resolver};
pub use scope::{Scope, ScopeStack};
pub use value::Value;
