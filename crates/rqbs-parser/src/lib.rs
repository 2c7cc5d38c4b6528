//! rqbs Parser
//!
//! This crate parses the declarative item language used by rqbs project
//! files, the script files they import, and standalone expressions.
//! It uses pest for parsing and produces an AST representation.

pub mod ast;
pub mod error;
pub mod parser;

pub use ast::*;
pub use error::{ParseError, ParseResult};
pub use parser::{parse_expression, parse_file, parse_script};
