//! Pluggable analytics-reducer dispatch.
//!
//! A reducer module is registered once at startup as a `(scope, factory)`
//! pair. Per connection, `ReducerCatalog::prepare` binds a fresh reducer
//! instance per module from that connection's metadata (mirrors the
//! reference system's `prepare_reducer` closure). Per event, [`dispatch`]
//! extracts each reducer's scoped fields and invokes it in isolation.

use futures_util::future::BoxFuture;
use serde_json::Value;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ReducerError {
    #[error("reducer '{module}' failed: {source}")]
    Failed {
        module: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}

/// A bound, per-connection reducer instance.
pub trait Reducer: Send + Sync {
    fn handle<'a>(
        &'a self,
        event: &'a Value,
        fields: &'a HashMap<String, Value>,
    ) -> BoxFuture<'a, Result<(), ReducerError>>;
}

/// Builds a bound reducer from connection metadata. Registered once per
/// analytics module at startup; invoked once per connection.
pub type ReducerFactory =
    Arc<dyn Fn(Value) -> BoxFuture<'static, Arc<dyn Reducer>> + Send + Sync>;

/// A registered analytics module: the fields it reads and how to bind it.
pub struct ReducerModule {
    pub name: String,
    pub scope: Vec<String>,
    pub factory: ReducerFactory,
}

/// A reducer module bound to one connection.
pub struct PreparedReducer {
    pub name: String,
    pub scope: Vec<String>,
    pub reducer: Arc<dyn Reducer>,
}

/// The set of analytics modules a deployment has registered.
///
/// Out of scope: the catalog's *contents* (which modules exist, what they
/// compute) are supplied by the embedding application, not this crate.
#[derive(Default)]
pub struct ReducerCatalog {
    modules: Vec<ReducerModule>,
}

impl ReducerCatalog {
    pub fn new(modules: Vec<ReducerModule>) -> Self {
        Self { modules }
    }

    pub fn len(&self) -> usize {
        self.modules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }

    /// Bind one reducer instance per registered module to this connection.
    pub async fn prepare(&self, metadata: &Value) -> Vec<PreparedReducer> {
        let mut out = Vec::with_capacity(self.modules.len());
        for module in &self.modules {
            let reducer = (module.factory)(metadata.clone()).await;
            out.push(PreparedReducer {
                name: module.name.clone(),
                scope: module.scope.clone(),
                reducer,
            });
        }
        out
    }
}

/// Whether reducer failures should propagate (tearing down the connection)
/// or be swallowed after logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    Dev,
    Prod,
}

/// Dispatch one event to every prepared reducer whose scope is fully
/// present on the event's `client` sub-object, isolating failures per
/// reducer. `event` is the full envelope (`{client, server, metadata}`);
/// reducers only ever see the student-authored `client` event and its
/// scoped fields.
pub async fn dispatch(
    prepared: &[PreparedReducer],
    event: &Value,
    run_mode: RunMode,
    traceback_dir: &Path,
) -> Result<(), ReducerError> {
    for pr in prepared {
        let Some(fields) = extract_scope(event, &pr.scope) else {
            continue;
        };

        if let Err(err) = pr.reducer.handle(event, &fields).await {
            tracing::error!(module = %pr.name, error = %err, "reducer failed");
            if let Err(io_err) = write_traceback_file(traceback_dir, &pr.name, event, &err) {
                tracing::warn!(error = %io_err, "failed to write reducer traceback file");
            }
            if run_mode == RunMode::Dev {
                return Err(err);
            }
        }
    }
    Ok(())
}

fn extract_scope(event: &Value, scope: &[String]) -> Option<HashMap<String, Value>> {
    let empty = Value::Null;
    let client_event = event.get("client").unwrap_or(&empty);
    let mut fields = HashMap::with_capacity(scope.len());
    for field in scope {
        let value = client_event.get(field)?;
        fields.insert(field.clone(), value.clone());
    }
    Some(fields)
}

fn write_traceback_file(
    dir: &Path,
    module: &str,
    event: &Value,
    err: &ReducerError,
) -> std::io::Result<()> {
    std::fs::create_dir_all(dir)?;
    let ts = chrono::Utc::now().format("%Y%m%dT%H%M%S%.6f");
    let rand_suffix: u32 = rand::random();
    let path = dir.join(format!("critical-error-{ts}-{rand_suffix:08x}.tb"));
    let pretty_event =
        serde_json::to_string_pretty(event).unwrap_or_else(|_| "<unserializable event>".to_owned());
    let contents = format!("module: {module}\nerror: {err}\n\nevent:\n{pretty_event}\n");
    std::fs::write(path, contents)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingReducer {
        calls: Arc<AtomicUsize>,
    }

    impl Reducer for CountingReducer {
        fn handle<'a>(
            &'a self,
            _event: &'a Value,
            _fields: &'a HashMap<String, Value>,
        ) -> BoxFuture<'a, Result<(), ReducerError>> {
            Box::pin(async move {
                self.calls.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
        }
    }

    struct FailingReducer;

    impl Reducer for FailingReducer {
        fn handle<'a>(
            &'a self,
            _event: &'a Value,
            _fields: &'a HashMap<String, Value>,
        ) -> BoxFuture<'a, Result<(), ReducerError>> {
            Box::pin(async move {
                Err(ReducerError::Failed {
                    module: "failing".to_owned(),
                    source: "boom".into(),
                })
            })
        }
    }

    #[tokio::test]
    async fn dispatch_skips_reducers_missing_a_scoped_field() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counting = CountingReducer {
            calls: calls.clone(),
        };
        let prepared = vec![PreparedReducer {
            name: "keystrokes".to_owned(),
            scope: vec!["event".to_owned(), "absent_field".to_owned()],
            reducer: Arc::new(counting),
        }];

        let event = serde_json::json!({"client": {"event": "keydown"}});
        let dir = tempfile::tempdir().unwrap();
        dispatch(&prepared, &event, RunMode::Prod, dir.path())
            .await
            .unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn dispatch_invokes_reducers_whose_scope_is_fully_present() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counting = CountingReducer {
            calls: calls.clone(),
        };
        let prepared = vec![PreparedReducer {
            name: "keystrokes".to_owned(),
            scope: vec!["event".to_owned()],
            reducer: Arc::new(counting),
        }];

        let event = serde_json::json!({"client": {"event": "keydown"}});
        let dir = tempfile::tempdir().unwrap();
        dispatch(&prepared, &event, RunMode::Prod, dir.path())
            .await
            .unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn dispatch_swallows_reducer_failure_outside_dev_mode() {
        let prepared = vec![PreparedReducer {
            name: "failing".to_owned(),
            scope: vec!["event".to_owned()],
            reducer: Arc::new(FailingReducer),
        }];
        let event = serde_json::json!({"client": {"event": "keydown"}});
        let dir = tempfile::tempdir().unwrap();

        let result = dispatch(&prepared, &event, RunMode::Prod, dir.path()).await;
        assert!(result.is_ok());

        let entries: Vec<_> = std::fs::read_dir(dir.path()).unwrap().collect();
        assert_eq!(entries.len(), 1);
    }

    #[tokio::test]
    async fn dispatch_propagates_reducer_failure_in_dev_mode() {
        let prepared = vec![PreparedReducer {
            name: "failing".to_owned(),
            scope: vec!["event".to_owned()],
            reducer: Arc::new(FailingReducer),
        }];
        let event = serde_json::json!({"client": {"event": "keydown"}});
        let dir = tempfile::tempdir().unwrap();

        let result = dispatch(&prepared, &event, RunMode::Dev, dir.path()).await;
        assert!(result.is_err());
    }
}
