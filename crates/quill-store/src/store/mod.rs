//! The public store facade.

pub mod doc_store;
