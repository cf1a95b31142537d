use futures::{
    Stream, StreamExt, TryStreamExt,
    stream::{self},
};
use quarry_core::{
    Connection, Driver, Error, IsolationLevel, ParameterCustomizer, QueryResult, Result,
    RowLabeled, RowsAffected, SqlServerCustomizer, Statement, Value,
};
use std::{
    collections::HashMap,
    future::Future,
    sync::{
        Arc, Mutex, PoisonError, RwLock,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
    time::Duration,
};

/// Bindings of one batch row, in binding order.
pub type BoundRow = Vec<(String, Value)>;

/// Produces the results of one bound row of a statement.
pub type Responder = Arc<dyn Fn(&mut Store, &BoundRow) -> Result<Vec<QueryResult>> + Send + Sync>;

/// In-memory tables, each a list of labeled rows.
#[derive(Default, Debug, Clone, PartialEq)]
pub struct Store {
    tables: HashMap<String, Vec<RowLabeled>>,
}

impl Store {
    pub fn insert(&mut self, table: &str, row: RowLabeled) {
        self.tables.entry(table.to_string()).or_default().push(row);
    }
    pub fn rows(&self, table: &str) -> &[RowLabeled] {
        self.tables.get(table).map(Vec::as_slice).unwrap_or_default()
    }
    /// Removes the rows matching `predicate`, returns how many.
    pub fn delete(&mut self, table: &str, predicate: impl Fn(&RowLabeled) -> bool) -> u64 {
        let Some(rows) = self.tables.get_mut(table) else {
            return 0;
        };
        let before = rows.len();
        rows.retain(|v| !predicate(v));
        (before - rows.len()) as u64
    }
}

/// Recorded driver interaction, tagged with the connection id.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    Connect(usize),
    Begin(usize, IsolationLevel),
    Commit(usize),
    Rollback(usize),
    Close(usize),
    Execute {
        connection: usize,
        sql: String,
        rows: Vec<BoundRow>,
    },
}

#[derive(Default)]
struct Shared {
    store: Mutex<Store>,
    events: Mutex<Vec<Event>>,
    responders: RwLock<Vec<(String, Responder)>>,
    next_id: AtomicUsize,
    begin_delay: Mutex<Option<Duration>>,
    refuse_rollback: AtomicBool,
}

impl Shared {
    fn record(&self, event: Event) {
        log::debug!("{event:?}");
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event);
    }

    fn responder(&self, sql: &str) -> Option<Responder> {
        let sql = sql.trim_start().to_lowercase();
        self.responders
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .find(|(prefix, _)| sql.starts_with(prefix.as_str()))
            .map(|(_, v)| v.clone())
    }
}

/// Scripted in-memory driver.
///
/// Statements are answered by the first responder whose prefix matches the
/// SQL, once per bound row. Transactions stage a copy of the store that
/// commit publishes and rollback discards.
#[derive(Clone)]
pub struct MockDriver {
    shared: Arc<Shared>,
    customizer: Arc<dyn ParameterCustomizer>,
}

impl Default for MockDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl MockDriver {
    /// Driver using `@name` placeholders.
    pub fn new() -> Self {
        Self {
            shared: Default::default(),
            customizer: Arc::new(SqlServerCustomizer),
        }
    }

    pub fn with_customizer(mut self, customizer: impl ParameterCustomizer + 'static) -> Self {
        self.customizer = Arc::new(customizer);
        self
    }

    /// Answers statements starting with `prefix`, compared case-insensitively.
    pub fn respond<F>(&self, prefix: &str, responder: F) -> &Self
    where
        F: Fn(&mut Store, &BoundRow) -> Result<Vec<QueryResult>> + Send + Sync + 'static,
    {
        self.shared
            .responders
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push((prefix.trim().to_lowercase(), Arc::new(responder)));
        self
    }

    /// Every `begin_transaction` waits `delay` before taking effect.
    pub fn delay_begin(&self, delay: Duration) -> &Self {
        *self
            .shared
            .begin_delay
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(delay);
        self
    }

    /// Every `rollback_transaction` fails, leaving the transaction open.
    pub fn refuse_rollback(&self) -> &Self {
        self.shared.refuse_rollback.store(true, Ordering::Relaxed);
        self
    }

    pub fn events(&self) -> Vec<Event> {
        self.shared
            .events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn count(&self, predicate: impl Fn(&Event) -> bool) -> usize {
        self.events().iter().filter(|v| predicate(v)).count()
    }

    /// Statements executed so far, with their bound rows.
    pub fn executed(&self) -> Vec<(String, Vec<BoundRow>)> {
        self.events()
            .into_iter()
            .filter_map(|v| match v {
                Event::Execute { sql, rows, .. } => Some((sql, rows)),
                _ => None,
            })
            .collect()
    }

    pub fn clear_events(&self) {
        self.shared
            .events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    /// Committed state.
    pub fn store(&self) -> Store {
        self.shared
            .store
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl Driver for MockDriver {
    type Connection = MockConnection;

    const NAME: &'static str = "mock";

    fn parameter_customizer(&self) -> Arc<dyn ParameterCustomizer> {
        self.customizer.clone()
    }

    fn connect(&self) -> impl Future<Output = Result<MockConnection>> + Send {
        let shared = self.shared.clone();
        async move {
            let id = shared.next_id.fetch_add(1, Ordering::Relaxed);
            shared.record(Event::Connect(id));
            Ok(MockConnection {
                shared,
                id,
                staged: Default::default(),
            })
        }
    }
}

pub struct MockConnection {
    shared: Arc<Shared>,
    id: usize,
    staged: Arc<Mutex<Option<Store>>>,
}

impl MockConnection {
    pub fn id(&self) -> usize {
        self.id
    }
}

impl Connection for MockConnection {
    type Statement = MockStatement;

    fn create_statement(&self, sql: &str) -> Result<MockStatement> {
        Ok(MockStatement {
            shared: self.shared.clone(),
            connection: self.id,
            staged: self.staged.clone(),
            sql: sql.to_string(),
            rows: vec![BoundRow::new()],
        })
    }

    fn begin_transaction(
        &self,
        isolation_level: IsolationLevel,
    ) -> impl Future<Output = Result<()>> + Send {
        let shared = self.shared.clone();
        let staged = self.staged.clone();
        let id = self.id;
        let delay = *shared
            .begin_delay
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        async move {
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            let mut staged = staged.lock().unwrap_or_else(PoisonError::into_inner);
            if staged.is_some() {
                return Err(Error::msg(format!(
                    "Connection {id} already has an open transaction"
                )));
            }
            *staged = Some(
                shared
                    .store
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .clone(),
            );
            shared.record(Event::Begin(id, isolation_level));
            Ok(())
        }
    }

    fn commit_transaction(&self) -> impl Future<Output = Result<()>> + Send {
        let result = (|| {
            let staged = self
                .staged
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .take();
            let Some(staged) = staged else {
                return Err(Error::msg(format!(
                    "Connection {} has no open transaction to commit",
                    self.id
                )));
            };
            *self.shared.store.lock().unwrap_or_else(PoisonError::into_inner) = staged;
            self.shared.record(Event::Commit(self.id));
            Ok(())
        })();
        async move { result }
    }

    fn rollback_transaction(&self) -> impl Future<Output = Result<()>> + Send {
        let result = (|| {
            if self.shared.refuse_rollback.load(Ordering::Relaxed) {
                return Err(Error::msg(format!(
                    "Connection {} refused to roll back",
                    self.id
                )));
            }
            let staged = self
                .staged
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .take();
            if staged.is_none() {
                return Err(Error::msg(format!(
                    "Connection {} has no open transaction to roll back",
                    self.id
                )));
            }
            self.shared.record(Event::Rollback(self.id));
            Ok(())
        })();
        async move { result }
    }

    fn close(&self) -> impl Future<Output = Result<()>> + Send {
        if self
            .staged
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .is_some()
        {
            log::warn!("Connection {} closed with an open transaction", self.id);
        }
        self.shared.record(Event::Close(self.id));
        async { Ok(()) }
    }
}

pub struct MockStatement {
    shared: Arc<Shared>,
    connection: usize,
    staged: Arc<Mutex<Option<Store>>>,
    sql: String,
    rows: Vec<BoundRow>,
}

impl MockStatement {
    fn current(&mut self) -> &mut BoundRow {
        if self.rows.is_empty() {
            self.rows.push(BoundRow::new());
        }
        let last = self.rows.len() - 1;
        &mut self.rows[last]
    }

    fn set(&mut self, key: &str, value: Value) {
        let row = self.current();
        match row.iter_mut().find(|(k, _)| k == key) {
            Some((_, v)) => *v = value,
            None => row.push((key.to_string(), value)),
        }
    }

    fn run(self) -> Result<Vec<QueryResult>> {
        let MockStatement {
            shared,
            connection,
            staged,
            sql,
            rows,
        } = self;
        shared.record(Event::Execute {
            connection,
            sql: sql.clone(),
            rows: rows.clone(),
        });
        let responder = shared
            .responder(&sql)
            .ok_or_else(|| Error::msg(format!("No response scripted for `{sql}`")))?;
        let mut staged = staged.lock().unwrap_or_else(PoisonError::into_inner);
        let mut committed;
        let store = match staged.as_mut() {
            Some(store) => store,
            None => {
                committed = shared.store.lock().unwrap_or_else(PoisonError::into_inner);
                &mut *committed
            }
        };
        let mut results = Vec::new();
        for row in &rows {
            results.extend(responder(store, row)?);
        }
        Ok(results)
    }
}

impl Statement for MockStatement {
    fn bind(&mut self, key: &str, value: Value) -> Result<&mut Self> {
        self.set(key, value);
        Ok(self)
    }

    fn bind_null(&mut self, key: &str, ty: Value) -> Result<&mut Self> {
        self.set(key, ty);
        Ok(self)
    }

    fn add(&mut self) -> Result<&mut Self> {
        self.rows.push(BoundRow::new());
        Ok(self)
    }

    fn execute(self) -> impl Stream<Item = Result<QueryResult>> + Send + 'static {
        stream::once(async move { self.run() })
            .map_ok(|results| stream::iter(results.into_iter().map(Ok)))
            .try_flatten()
            .boxed()
    }
}

/// Row with the given column names and values.
pub fn row<const N: usize>(columns: [(&str, Value); N]) -> RowLabeled {
    let (labels, values): (Vec<String>, Vec<Value>) = columns
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .unzip();
    RowLabeled::new(labels.into(), values.into())
}

/// Single affected count result.
pub fn affected(rows_affected: u64) -> Vec<QueryResult> {
    vec![
        RowsAffected {
            rows_affected,
            last_affected_id: None,
        }
        .into(),
    ]
}

/// Value bound under `key` in `row`.
pub fn bound<'a>(row: &'a BoundRow, key: &str) -> Option<&'a Value> {
    row.iter().find(|(k, _)| k == key).map(|(_, v)| v)
}
