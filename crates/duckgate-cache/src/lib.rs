//! Semantic review cache.
//!
//! Diff hunks are embedded ([`embedding`]), stored with their review result
//! in a SQLite vector table ([`store`]), and looked up by cosine similarity
//! through the fail-open [`semantic::SemanticCache`].

pub mod embedding;
pub mod semantic;
pub mod store;
