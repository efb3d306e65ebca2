//! Parse, patch and re-emit Device Tree Source overlays.
//!
//! The pipeline mirrors the way overlay tooling is actually used:
//!
//! 1. [`tokenize`] reads a `.dts` file (following its includes) through a
//!    [`FileOpener`] and produces a flat token stream;
//! 2. [`parse`] builds a mutable [`Tree`] from it;
//! 3. [`param::apply_parameter`] applies `name[=value]` bindings through the
//!    tree's `__overrides__` declarations;
//! 4. [`overlay::merge`] combines plugins and [`overlay::apply`] splices them
//!    into a base tree;
//! 5. [`emit::emit`] serializes the result back to DTS text.

pub mod emit;
pub mod error;
pub mod lexer;
pub mod overlay;
pub mod param;
pub mod parser;
pub mod source;
pub mod tokenizer;
pub mod tree;
pub mod value;

pub use error::{DtsError, Result};
pub use parser::parse;
pub use source::{FileOpener, LocalFiles, MemoryFiles};
pub use tokenizer::{include_tree, tokenize};
pub use tree::Tree;

/// Tokenize and parse a source file in one go.
pub fn load(opener: &dyn FileOpener, path: &str) -> Result<Tree> {
    parse(&tokenize(opener, path)?)
}
