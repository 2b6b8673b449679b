//! SQL Connect - JDBC-backed SQL data source
//!
//! Query routing, variable-query replay and connection settings for a
//! dashboard data source whose backend talks to databases over JDBC.
//!
//! # Core Concepts
//!
//! - **Blank SQL never leaves**: targets without SQL are dropped before sending
//! - **One request per fresh run**: variable refreshes and the query path
//!   share a single replayable result while a variable is being edited
//! - **Self-tagged bypass**: requests the coordinator issues skip the coordinator
//!
//! # Modules
//!
//! - [`datasource`] - Query entry point and variable-value extraction
//! - [`variable`] - Replay coordinator for variable queries
//! - [`executor`] - Executor trait and HTTP backend client
//! - [`template`] - Template variable interpolation
//! - [`settings`] - Connection settings model
//! - [`config`] - Configuration types and loading
//! - [`cli`] - Command-line interface

pub mod cli;
pub mod config;
pub mod datasource;
pub mod error;
pub mod executor;
pub mod settings;
pub mod template;
pub mod types;
pub mod variable;

// Re-export commonly used types
pub use config::{BackendConfig, Config, ConnectionConfig};
pub use datasource::{DataSource, apply_template_variables, format_value};
pub use error::QueryError;
pub use executor::{BackendClient, QueryExecutor, create_executor};
pub use settings::{DataSourceOptions, JdbcSettings, SecureJdbcSettings, Setting};
pub use template::{ScopedVars, TemplateSrv, VariableInterpolator, VariableValue};
pub use types::{DataFrame, Field, Format, MetricFindValue, QueryRequest, QueryResponse, SqlQuery, TimeRange};
pub use variable::{CoordinatorState, ReplayCache, ReplayCoordinator, ReplayHandle, ReplayResult, VariableSession};
