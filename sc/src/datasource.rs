//! SQL Connect data source
//!
//! Entry point for every query the host issues. Blank targets are dropped,
//! template variables are interpolated, and the request is routed either
//! straight to the executor or through the session's variable-query
//! coordinator.

use std::sync::Arc;

use eyre::{Context, Result};
use serde_json::Value;
use tracing::{debug, warn};

use crate::executor::QueryExecutor;
use crate::template::{ScopedVars, TemplateSrv, VariableValue};
use crate::types::{DataFrame, MetricFindValue, QueryRequest, SqlQuery};
use crate::variable::{CoordinatorState, ReplayHandle, VariableSession};

/// A configured data source instance
pub struct DataSource {
    executor: Arc<dyn QueryExecutor>,
    template: Option<Arc<dyn TemplateSrv>>,
    session: VariableSession,
}

impl DataSource {
    pub fn new(executor: Arc<dyn QueryExecutor>) -> Self {
        debug!("DataSource::new: called");
        Self {
            executor,
            template: None,
            session: VariableSession::new(),
        }
    }

    /// Interpolate template variables with `template` before sending
    pub fn with_template(mut self, template: Arc<dyn TemplateSrv>) -> Self {
        self.template = Some(template);
        self
    }

    /// Execute a request
    ///
    /// Requests left with no SQL resolve to `{ data: [] }` without touching
    /// the executor.
    pub fn query(&mut self, mut request: QueryRequest) -> ReplayHandle {
        debug!(request_id = %request.request_id, app = ?request.app, targets = request.targets.len(), "query: called");
        request.targets.retain(SqlQuery::has_sql);
        if request.targets.is_empty() {
            debug!("query: no targets with SQL");
            return ReplayHandle::empty();
        }

        if let Some(template) = &self.template {
            request.targets = request
                .targets
                .iter()
                .map(|t| apply_template_variables(t, &request.scoped_vars, template.as_ref()))
                .collect();
        }

        if !self.session.is_bypassed(&request)
            && let Some(coordinator) = self.session.coordinator_mut()
        {
            debug!("query: routing through variable coordinator");
            return coordinator.run(&request);
        }

        debug!("query: sending to executor");
        let executor = Arc::clone(&self.executor);
        ReplayHandle::new(async move { executor.execute(request).await })
    }

    /// Create, update or tear down the variable-query coordinator
    ///
    /// Called by the variable editor: `Some(skip)` when the query text changed
    /// without a run being wanted, `Some(fresh)` to run, `None` on teardown.
    pub fn set_variable_query(&mut self, state: Option<CoordinatorState>) {
        debug!(?state, "set_variable_query: called");
        self.session.set_variable_query(Arc::clone(&self.executor), state);
    }

    pub fn session(&self) -> &VariableSession {
        &self.session
    }

    /// Run a single query and return its first frame
    pub async fn run_query(&mut self, query: SqlQuery) -> Result<DataFrame> {
        debug!(?query, "run_query: called");
        let target = SqlQuery {
            ref_id: uuid::Uuid::now_v7().to_string(),
            ..query
        };

        let response = self
            .query(QueryRequest::new(vec![target]))
            .await
            .context("Query failed")?;

        if let Some(error) = &response.error {
            warn!(%error, "run_query: backend reported an error");
        }

        Ok(response.first_frame().cloned().unwrap_or_default())
    }

    /// Resolve the options of a template variable
    ///
    /// A single column supplies both text and value. With more columns the
    /// first is taken as the value (an id) and the second as the text.
    pub async fn metric_find_query(&mut self, query: &SqlQuery) -> Result<Vec<MetricFindValue>> {
        debug!(?query.raw_sql, "metric_find_query: called");
        if !query.has_sql() {
            debug!("metric_find_query: no SQL");
            return Ok(Vec::new());
        }

        let frame = self.run_query(query.clone()).await?;
        let values = match frame.fields.as_slice() {
            [] => Vec::new(),
            [only] => only
                .values
                .iter()
                .map(|v| MetricFindValue::new(value_text(v), v.clone()))
                .collect(),
            [ids, texts, ..] => texts
                .values
                .iter()
                .enumerate()
                .map(|(i, text)| {
                    let value = ids.values.get(i).cloned().unwrap_or(Value::Null);
                    MetricFindValue::new(value_text(text), value)
                })
                .collect(),
        };

        debug!(count = values.len(), "metric_find_query: done");
        Ok(values)
    }
}

/// Interpolate template variables into a query's SQL
pub fn apply_template_variables(query: &SqlQuery, scoped_vars: &ScopedVars, template: &dyn TemplateSrv) -> SqlQuery {
    let sql = template.replace(query.raw_sql.as_deref().unwrap_or_default(), scoped_vars, &format_value);
    SqlQuery {
        raw_sql: Some(sql),
        ..query.clone()
    }
}

/// Render a variable value for SQL
///
/// Multi-value variables become a quoted list usable in `IN (...)`.
pub fn format_value(value: &VariableValue) -> String {
    match value {
        VariableValue::Single(v) => v.clone(),
        VariableValue::Multi(vs) => format!("'{}'", vs.join("','")),
    }
}

fn value_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}
