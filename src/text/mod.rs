//! Text Utilities
//!
//! Escape handling for template metacharacters, path formatting,
//! the recursive bracket matcher and the variable list grammar.

pub mod brackets;
pub mod escape;
pub mod list;

pub use brackets::{find_matches, BracketMatch};
pub use escape::{escape, format_path, unescape};
pub use list::{variable_list_join, variable_list_parse};
