//! Compile spintax templates and spin them into random text.
//!
//! A template mixes literal text with pickers and variables:
//!
//! ```text
//! {Hello|Hi} [name], have {:2:a coffee|a tea|some cake}.
//! ```
//!
//! `{a|b}` picks one alternative, `{:N:a|b|c}` picks N distinct alternatives
//! in random order, `[name]` expands a symbol defined with
//! [`Spintax::define`], and `\` escapes the next character.

pub mod eval;
pub mod lex;
pub mod parse;

pub use eval::{SpinError, Spintax, SymbolTable};
pub use lex::{Lexer, tokenize};
pub use parse::Parser;
