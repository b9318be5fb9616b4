pub mod graphql_source;
#[cfg(any(test, feature = "test_utils"))]
pub mod mock_source;
pub mod runtime;
