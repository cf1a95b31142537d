#[cfg(test)]
mod tests {
    use futures::{Stream, StreamExt, TryStreamExt, stream};
    use quarry::{
        Argument, Bind, Database, IsolationLevel, QuarryError, Result, ScopedExecutor,
        SqlInterfaceDef, SqlMethod, Transactional, Value,
    };
    use quarry_tests::{Event, MockDriver, init_logs, users_driver};
    use std::time::Duration;

    const INSERT: &str = "insert into users (id, name, email) values (:id, :name, :email)";

    fn dao() -> SqlInterfaceDef<MockDriver> {
        SqlInterfaceDef::new("TxDao")
            .method(
                SqlMethod::update("insert", INSERT)
                    .param(Bind::new("id"))
                    .param(Bind::new("name"))
                    .param(Bind::typed::<String>("email")),
            )
            .method(
                SqlMethod::update("insert_tx", INSERT)
                    .param(Bind::new("id"))
                    .param(Bind::new("name"))
                    .param(Bind::typed::<String>("email"))
                    .decorate(Transactional::default()),
            )
            .method(
                SqlMethod::batch::<u64>("insert_all_tx", INSERT)
                    .sequence(Bind::new("id"))
                    .param(Bind::new("name"))
                    .param(Bind::typed::<String>("email"))
                    .returning_updated_rows()
                    .decorate(Transactional::new(Some(IsolationLevel::Serializable))),
            )
            .method(
                SqlMethod::query::<i64>("ids_tx", "select * from users")
                    .decorate(Transactional::default()),
            )
    }

    fn user(id: i64, name: &'static str) -> [Argument; 3] {
        [Argument::value(id), Argument::value(name), Argument::null()]
    }

    fn delayed(value: u64, millis: u64) -> impl Stream<Item = Result<u64>> + Send + 'static {
        stream::once(async move {
            tokio::time::sleep(Duration::from_millis(millis)).await;
            Ok(value)
        })
    }

    fn ids(driver: &MockDriver) -> Vec<Value> {
        driver
            .store()
            .rows("users")
            .iter()
            .filter_map(|v| v.get_column("id").cloned())
            .collect()
    }

    #[tokio::test]
    async fn commit() -> Result<()> {
        init_logs();
        let driver = users_driver();
        let database = Database::new(driver.clone());
        let dao = database.on_demand(&dao())?;
        assert_eq!(dao.call::<u64>("insert_tx", user(1, "Ada")).collect().await?, [1]);

        let events = driver.events();
        assert!(matches!(
            events.as_slice(),
            [
                Event::Connect(c),
                Event::Begin(b, IsolationLevel::ReadCommitted),
                Event::Execute { connection: e, .. },
                Event::Commit(m),
                Event::Close(l),
            ] if [b, e, m, l].iter().all(|v| *v == c)
        ));
        assert_eq!(ids(&driver), [Value::Int64(Some(1))]);
        Ok(())
    }

    #[tokio::test]
    async fn rollback_on_failure() -> Result<()> {
        init_logs();
        let driver = users_driver();
        let database = Database::new(driver.clone());
        let dao = database.on_demand(&dao())?;

        // Autocommitted before the transaction, survives the rollback
        dao.call::<u64>("insert", user(7, "Edsger")).collect().await?;

        let error = dao
            .call::<u64>(
                "insert_all_tx",
                [
                    Argument::list([1i64, 2, 1].map(Value::from)),
                    Argument::value("batch"),
                    Argument::null(),
                ],
            )
            .collect()
            .await
            .unwrap_err();
        assert!(error.to_string().contains("Duplicate key"), "{error}");
        assert!(!QuarryError::is_configuration(&error));

        assert_eq!(
            driver.count(|v| matches!(v, Event::Begin(_, IsolationLevel::Serializable))),
            1
        );
        assert_eq!(driver.count(|v| matches!(v, Event::Rollback(..))), 1);
        assert_eq!(driver.count(|v| matches!(v, Event::Commit(..))), 0);
        assert_eq!(ids(&driver), [Value::Int64(Some(7))]);
        Ok(())
    }

    #[tokio::test]
    async fn nested_scopes_join_the_open_transaction() -> Result<()> {
        init_logs();
        let driver = users_driver();
        let database = Database::new(driver.clone());
        let def = dao();
        let db = database.clone();
        let counts = database
            .execute(move |context| {
                let dao = db.attach_to(&def, ScopedExecutor::Attached(context.clone()))?;
                Ok(context.in_transaction(None).run(move |context| {
                    assert!(context.is_in_transaction());
                    Ok(dao
                        .call::<u64>("insert_tx", user(1, "Ada"))
                        .into_stream()
                        .chain(dao.call::<u64>("insert_tx", user(2, "Alan")).into_stream()))
                }))
            })
            .try_collect::<Vec<_>>()
            .await?;
        assert_eq!(counts, [1, 1]);
        assert_eq!(driver.count(|v| matches!(v, Event::Connect(..))), 1);
        assert_eq!(driver.count(|v| matches!(v, Event::Begin(..))), 1);
        assert_eq!(driver.count(|v| matches!(v, Event::Commit(..))), 1);
        assert_eq!(driver.count(|v| matches!(v, Event::Close(..))), 1);
        assert_eq!(ids(&driver), [Value::Int64(Some(1)), Value::Int64(Some(2))]);
        Ok(())
    }

    #[tokio::test]
    async fn failure_in_a_joined_scope_rolls_back_everything() -> Result<()> {
        init_logs();
        let driver = users_driver();
        let database = Database::new(driver.clone());
        let def = dao();
        let executor = ScopedExecutor::OnDemand(database.clone()).in_transaction(None);
        let result = executor
            .run(move |context| {
                let dao = database.attach_to(&def, ScopedExecutor::Attached(context))?;
                Ok(dao
                    .call::<u64>("insert_tx", user(1, "Ada"))
                    .into_stream()
                    .chain(dao.call::<u64>("insert", user(1, "Ada again")).into_stream()))
            })
            .try_collect::<Vec<_>>()
            .await;
        assert!(result.is_err());
        assert_eq!(driver.count(|v| matches!(v, Event::Begin(..))), 1);
        assert_eq!(driver.count(|v| matches!(v, Event::Rollback(..))), 1);
        assert!(ids(&driver).is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn dropped_stream_rolls_back() -> Result<()> {
        init_logs();
        let driver = users_driver();
        let database = Database::new(driver.clone());
        let dao = database.on_demand(&dao())?;
        dao.call::<u64>("insert", user(1, "Ada")).collect().await?;
        dao.call::<u64>("insert", user(2, "Alan")).collect().await?;
        driver.clear_events();

        let mut stream = dao.call::<i64>("ids_tx", []).into_stream();
        assert_eq!(stream.try_next().await?, Some(1));
        drop(stream);
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(driver.count(|v| matches!(v, Event::Begin(..))), 1);
        assert_eq!(driver.count(|v| matches!(v, Event::Commit(..))), 0);
        assert_eq!(driver.count(|v| matches!(v, Event::Rollback(..))), 1);
        assert_eq!(driver.count(|v| matches!(v, Event::Close(..))), 1);
        Ok(())
    }

    #[tokio::test]
    async fn sequential_transactions_on_one_context() -> Result<()> {
        init_logs();
        let driver = users_driver();
        let database = Database::new(driver.clone());
        let def = dao();
        let db = database.clone();
        let counts = database
            .execute(move |context| {
                let dao = db.attach_to(
                    &def,
                    ScopedExecutor::Attached(context.clone()).in_transaction(None),
                )?;
                Ok(dao
                    .call::<u64>("insert", user(1, "Ada"))
                    .into_stream()
                    .chain(dao.call::<u64>("insert", user(2, "Alan")).into_stream()))
            })
            .try_collect::<Vec<_>>()
            .await?;
        assert_eq!(counts, [1, 1]);
        // Each call owns its own transaction
        assert_eq!(driver.count(|v| matches!(v, Event::Begin(..))), 2);
        assert_eq!(driver.count(|v| matches!(v, Event::Commit(..))), 2);
        assert_eq!(driver.count(|v| matches!(v, Event::Connect(..))), 1);
        Ok(())
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn dropped_stream_rolls_back_before_closing() -> Result<()> {
        init_logs();
        let driver = users_driver();
        let database = Database::new(driver.clone());
        let dao = database.on_demand(&dao())?;
        dao.call::<u64>("insert", user(1, "Ada")).collect().await?;
        dao.call::<u64>("insert", user(2, "Alan")).collect().await?;
        driver.clear_events();

        for _ in 0..10 {
            let mut stream = dao.call::<i64>("ids_tx", []).into_stream();
            assert_eq!(stream.try_next().await?, Some(1));
            drop(stream);
        }
        tokio::time::sleep(Duration::from_millis(100)).await;

        let events = driver.events();
        assert_eq!(driver.count(|v| matches!(v, Event::Rollback(..))), 10);
        for (i, event) in events.iter().enumerate() {
            if let Event::Close(id) = event {
                assert!(
                    events[..i].contains(&Event::Rollback(*id)),
                    "Connection {id} closed before rolling back: {events:?}"
                );
            }
        }
        Ok(())
    }

    #[tokio::test]
    async fn cancelled_begin_releases_the_context() -> Result<()> {
        init_logs();
        let driver = users_driver();
        driver.delay_begin(Duration::from_millis(20));
        let database = Database::new(driver.clone());
        let outcome = database
            .execute(|context| {
                Ok(stream::once(async move {
                    let mut scope = context
                        .in_transaction(None)
                        .run(|_| Ok(stream::empty::<Result<u64>>()));
                    assert!(futures::poll!(scope.next()).is_pending());
                    assert!(context.is_in_transaction());
                    drop(scope);
                    tokio::time::sleep(Duration::from_millis(50)).await;
                    let released = !context.is_in_transaction();
                    context
                        .in_transaction(None)
                        .run(|_| Ok(stream::iter([Ok(1u64)])))
                        .try_collect::<Vec<_>>()
                        .await
                        .map(|counts| (released, counts))
                }))
            })
            .try_collect::<Vec<_>>()
            .await?;
        assert_eq!(outcome, [(true, vec![1])]);
        assert_eq!(driver.count(|v| matches!(v, Event::Begin(..))), 1);
        assert_eq!(driver.count(|v| matches!(v, Event::Commit(..))), 1);
        assert_eq!(driver.count(|v| matches!(v, Event::Rollback(..))), 0);
        Ok(())
    }

    #[tokio::test]
    async fn failed_rollback_keeps_the_original_error() -> Result<()> {
        init_logs();
        let driver = users_driver();
        driver.refuse_rollback();
        let database = Database::new(driver.clone());
        let error = database
            .execute(|context| {
                Ok(context.in_transaction(None).run(|_| {
                    Ok(stream::iter([
                        Ok(1u64),
                        Err(QuarryError::data("Row 2 is broken")),
                    ]))
                }))
            })
            .try_collect::<Vec<_>>()
            .await
            .unwrap_err();
        let original = error
            .downcast_ref::<QuarryError>()
            .expect("The original error is still reachable");
        assert_eq!(original.to_string(), "Row 2 is broken");
        assert!(QuarryError::is_data(&error));
        assert!(error.to_string().contains("Rollback failed"), "{error}");
        assert!(format!("{error:#}").contains("refused to roll back"), "{error:#}");
        assert_eq!(driver.count(|v| matches!(v, Event::Rollback(..))), 0);
        assert_eq!(driver.count(|v| matches!(v, Event::Close(..))), 1);
        Ok(())
    }

    #[tokio::test]
    async fn concurrent_scopes_begin_once() -> Result<()> {
        init_logs();
        let driver = users_driver();
        let database = Database::new(driver.clone());
        let counts = database
            .execute(|context| {
                let first = context.in_transaction(None).run(|_| Ok(delayed(1, 40)));
                let second = context.in_transaction(None).run(|_| Ok(delayed(2, 10)));
                Ok(stream::once(async move {
                    let (first, second) = futures::join!(
                        first.try_collect::<Vec<_>>(),
                        second.try_collect::<Vec<_>>()
                    );
                    first.and_then(|first| second.map(|second| [first, second].concat()))
                }))
            })
            .try_collect::<Vec<_>>()
            .await?;
        assert_eq!(counts, [vec![1, 2]]);
        assert_eq!(driver.count(|v| matches!(v, Event::Begin(..))), 1);
        assert_eq!(driver.count(|v| matches!(v, Event::Commit(..))), 1);
        assert_eq!(driver.count(|v| matches!(v, Event::Rollback(..))), 0);
        Ok(())
    }
}
