pub mod graphql;
pub mod http;
pub mod json;
pub mod lexer;
pub use graphql_parser::query::{Definition, Document, OperationDefinition, ParseError};
pub use graphql_parser::schema::ParseError as SchemaParseError;
