//! Diff extraction, parsing, filtering and risk ranking.
//!
//! Turns a repository's staged (or all tracked) changes into parsed
//! [`parser::FileDiff`]s, drops files that are not worth reviewing, and
//! orders the remaining review units so sensitive code is reviewed first
//! when the token budget runs short.
pub mod filter;
pub mod parser;
pub mod risk;
pub mod source;
