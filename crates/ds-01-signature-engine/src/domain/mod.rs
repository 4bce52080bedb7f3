//! # Domain Layer
//!
//! CMS assembly, parsing and validation. No I/O.

pub mod chain;
pub mod cms;
pub mod entities;
pub mod errors;
pub mod validation;
