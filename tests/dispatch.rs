#[cfg(test)]
mod tests {
    use futures::{TryStreamExt, stream};
    use quarry::{
        Argument, Bind, BindObject, Bindable, Database, FnRowMapper, Mapped, QuarryError, Result,
        RowLabeled, RowMapper, RowMapperFactory, ScopedExecutor, SqlInterfaceDef, SqlMethod,
        TypeInfo, Value,
    };
    use quarry_tests::{Event, MockDriver, bound, init_logs, users_driver};
    use std::{
        collections::hash_map::DefaultHasher,
        hash::{Hash, Hasher},
        sync::Arc,
    };

    #[derive(Mapped, Debug, Clone, PartialEq)]
    struct User {
        id: i64,
        name: String,
        email: Option<String>,
    }

    #[derive(Bindable)]
    struct NewUser {
        id: i64,
        name: String,
        email: Option<String>,
    }

    fn user_dao() -> SqlInterfaceDef<MockDriver> {
        SqlInterfaceDef::new("UserDao")
            .method(
                SqlMethod::update(
                    "insert",
                    "insert into users (id, name, email) values (:id, :name, :email)",
                )
                .param(Bind::new("id"))
                .param(Bind::new("name"))
                .param(Bind::typed::<String>("email")),
            )
            .method(
                SqlMethod::update(
                    "insert_user",
                    "insert into users (id, name, email) values (:id, :name, :email)",
                )
                .param(BindObject),
            )
            .method(
                SqlMethod::query::<User>("find", "select * from users where id = :id")
                    .param(Bind::new("id")),
            )
            .method(SqlMethod::query::<User>("all", "select * from users"))
            .method(SqlMethod::query::<i64>("count", "select count(*) from users"))
            .method(
                SqlMethod::update("delete", "delete from users where id = :id")
                    .param(Bind::new("id")),
            )
    }

    fn hash_of<T: Hash>(value: &T) -> u64 {
        let mut hasher = DefaultHasher::new();
        value.hash(&mut hasher);
        hasher.finish()
    }

    #[tokio::test]
    async fn query_and_update() -> Result<()> {
        init_logs();
        let driver = users_driver();
        let database = Database::new(driver.clone());
        let dao = database.on_demand(&user_dao())?;

        let inserted = dao
            .call::<u64>(
                "insert",
                [
                    Argument::value(1i64),
                    Argument::value("Ada"),
                    Argument::value("ada@example.com"),
                ],
            )
            .collect()
            .await?;
        assert_eq!(inserted, [1]);
        let inserted = dao
            .call::<u64>(
                "insert",
                [Argument::value(2i64), Argument::value("Alan"), Argument::null()],
            )
            .collect()
            .await?;
        assert_eq!(inserted, [1]);

        let found = dao
            .call::<User>("find", [Argument::value(2i64)])
            .collect()
            .await?;
        assert_eq!(
            found,
            [User {
                id: 2,
                name: "Alan".into(),
                email: None,
            }]
        );
        assert_eq!(dao.call::<i64>("count", []).collect().await?, [2]);
        assert_eq!(
            dao.call::<User>("all", [])
                .collect()
                .await?
                .into_iter()
                .map(|v| v.name)
                .collect::<Vec<_>>(),
            ["Ada", "Alan"]
        );
        assert_eq!(
            dao.call::<u64>("delete", [Argument::value(1i64)])
                .collect()
                .await?,
            [1]
        );
        assert_eq!(dao.call::<i64>("count", []).collect().await?, [1]);

        // Every call ran on its own connection
        let connects = driver.count(|v| matches!(v, Event::Connect(..)));
        let closes = driver.count(|v| matches!(v, Event::Close(..)));
        assert_eq!(connects, 7);
        assert_eq!(closes, 7);
        Ok(())
    }

    #[tokio::test]
    async fn sql_is_rewritten_and_bound_by_name() -> Result<()> {
        init_logs();
        let driver = users_driver();
        let database = Database::new(driver.clone());
        let dao = database.on_demand(&user_dao())?;
        dao.call::<u64>(
            "insert",
            [Argument::value(3i64), Argument::value("Grace"), Argument::null()],
        )
        .collect()
        .await?;
        let executed = driver.executed();
        assert_eq!(executed.len(), 1);
        let (sql, rows) = &executed[0];
        assert_eq!(
            sql,
            "insert into users (id, name, email) values (@id, @name, @email)"
        );
        assert_eq!(rows.len(), 1);
        assert_eq!(bound(&rows[0], "id"), Some(&Value::Int64(Some(3))));
        assert_eq!(
            bound(&rows[0], "name"),
            Some(&Value::Varchar(Some("Grace".into())))
        );
        // Typed null from `Bind::typed`
        assert!(matches!(bound(&rows[0], "email"), Some(Value::Varchar(None))));
        Ok(())
    }

    #[tokio::test]
    async fn bind_object_fields() -> Result<()> {
        init_logs();
        let driver = users_driver();
        let database = Database::new(driver.clone());
        let dao = database.on_demand(&user_dao())?;
        let inserted = dao
            .call::<u64>(
                "insert_user",
                [Argument::object(NewUser {
                    id: 10,
                    name: "Barbara".into(),
                    email: Some("barbara@example.com".into()),
                })],
            )
            .collect()
            .await?;
        assert_eq!(inserted, [1]);
        let found = dao
            .call::<User>("find", [Argument::value(10i64)])
            .collect()
            .await?;
        assert_eq!(found[0].email.as_deref(), Some("barbara@example.com"));

        let error = dao
            .call::<u64>("insert_user", [Argument::null()])
            .collect()
            .await
            .unwrap_err();
        assert!(QuarryError::is_configuration(&error));
        assert_eq!(error.to_string(), "value cannot be null for BindObject");
        Ok(())
    }

    #[tokio::test]
    async fn on_demand_identity() -> Result<()> {
        init_logs();
        let database = Database::new(users_driver());
        let first = database.on_demand(&user_dao())?;
        let second = database.on_demand(&user_dao())?;
        assert_eq!(first, second);
        assert_eq!(hash_of(&first), hash_of(&second));
        assert_eq!(first.to_string(), second.to_string());
        assert!(
            first
                .to_string()
                .starts_with("quarry on demand proxy for UserDao@"),
            "{first}"
        );
        assert_eq!(format!("{first:?}"), first.to_string());
        assert_eq!(first.name(), "UserDao");

        let other = database.on_demand(&SqlInterfaceDef::new("OtherDao"))?;
        assert_ne!(first, other);

        let db = database.clone();
        let attached = database
            .execute(move |context| {
                let dao = db.attach_to(&user_dao(), ScopedExecutor::Attached(context))?;
                Ok(stream::iter([Ok(dao.to_string())]))
            })
            .try_collect::<Vec<_>>()
            .await?;
        assert!(
            attached[0].starts_with("quarry attached proxy for UserDao@"),
            "{attached:?}"
        );
        let transactional = database.attach_to(
            &user_dao(),
            ScopedExecutor::OnDemand(database.clone()).in_transaction(None),
        )?;
        assert!(
            transactional
                .to_string()
                .starts_with("quarry transactional proxy for UserDao@"),
            "{transactional}"
        );

        let table = database.handler_table(&user_dao())?;
        assert!(Arc::ptr_eq(&table, &database.handler_table(&user_dao())?));
        assert!(table.contains("find"));
        assert!(!table.contains("missing"));
        Ok(())
    }

    #[tokio::test]
    async fn call_errors() -> Result<()> {
        init_logs();
        let driver = users_driver();
        let database = Database::new(driver.clone());
        let dao = database.on_demand(&user_dao())?;

        let error = dao.call::<u64>("missing", []).collect().await.unwrap_err();
        assert!(QuarryError::is_configuration(&error));
        assert_eq!(error.to_string(), "No method missing found in interface UserDao");

        let error = dao
            .call::<String>("find", [Argument::value(1i64)])
            .collect()
            .await
            .unwrap_err();
        assert!(QuarryError::is_configuration(&error));
        assert!(error.to_string().starts_with("Method find of UserDao returns User"));

        // Nothing was executed for the calls above
        assert!(driver.events().is_empty());

        let error = dao.call::<User>("find", []).collect().await.unwrap_err();
        assert!(QuarryError::is_configuration(&error));
        assert_eq!(
            error.to_string(),
            "Method find of UserDao expects 1 arguments, got 0"
        );

        let error = dao
            .call::<User>("find", [Argument::value(1i64), Argument::value(2i64)])
            .collect()
            .await
            .unwrap_err();
        assert_eq!(
            error.to_string(),
            "No method arg found at index 1, sqlInterface: UserDao, method: find"
        );

        let error = dao
            .call::<User>("find", [Argument::list([Value::Int64(Some(1))])])
            .collect()
            .await
            .unwrap_err();
        assert!(QuarryError::is_configuration(&error));

        // Connections opened for failing calls are closed as well
        assert_eq!(
            driver.count(|v| matches!(v, Event::Connect(..))),
            driver.count(|v| matches!(v, Event::Close(..)))
        );

        dao.call::<u64>(
            "insert",
            [Argument::value(1i64), Argument::value("x"), Argument::null()],
        )
        .into_stream()
        .try_collect::<Vec<_>>()
        .await?;
        let error = dao
            .call::<u64>(
                "insert",
                [Argument::value(1i64), Argument::value("y"), Argument::null()],
            )
            .collect()
            .await
            .unwrap_err();
        // Driver errors pass through unclassified
        assert!(error.downcast_ref::<QuarryError>().is_none());
        assert!(error.to_string().contains("Duplicate key"), "{error}");
        Ok(())
    }

    #[tokio::test]
    async fn duplicate_method() {
        init_logs();
        let database = Database::new(users_driver());
        let def = SqlInterfaceDef::<MockDriver>::new("Twice")
            .method(SqlMethod::update("run", "delete from users"))
            .method(SqlMethod::update("run", "delete from users"));
        let error = database.on_demand(&def).unwrap_err();
        assert!(QuarryError::is_configuration(&error));
    }

    struct Constant<const N: i64>;

    impl<const N: i64> RowMapperFactory for Constant<N> {
        fn build(&self, ty: &TypeInfo) -> Result<Option<Arc<dyn RowMapper>>> {
            if *ty != i64::type_info() {
                return Ok(None);
            }
            Ok(Some(Arc::new(FnRowMapper::new(|_: &RowLabeled| Ok(Some(N))))))
        }
    }

    #[tokio::test]
    async fn row_mapper_resolution_order() -> Result<()> {
        init_logs();
        let database = Database::new(users_driver());
        let def = SqlInterfaceDef::<MockDriver>::new("Counters")
            .row_mapper_factory(Constant::<2>)
            .method(
                SqlMethod::query::<i64>("method_level", "select count(*) from users")
                    .row_mapper_factory(Constant::<1>),
            )
            .method(SqlMethod::query::<i64>(
                "interface_level",
                "select count(*) from users",
            ))
            .method(SqlMethod::query::<Opaque>("unmapped", "select count(*) from users"));
        let dao = database.on_demand(&def)?;
        assert_eq!(dao.call::<i64>("method_level", []).collect().await?, [1]);
        assert_eq!(dao.call::<i64>("interface_level", []).collect().await?, [2]);

        let error = dao.call::<Opaque>("unmapped", []).collect().await.unwrap_err();
        assert!(QuarryError::is_configuration(&error));
        assert!(
            error
                .to_string()
                .starts_with("No rowMapper found for type: "),
            "{error}"
        );
        assert!(
            error
                .to_string()
                .ends_with(", in interface: Counters, method: unmapped"),
            "{error}"
        );

        // A registered mapper fixes the method on the next call
        database.register_row_mapper::<Opaque>(FnRowMapper::new(|row: &RowLabeled| {
            Ok(Some(Opaque(row.len())))
        }));
        let values = dao.call::<Opaque>("unmapped", []).collect().await?;
        assert_eq!(values.len(), 1);
        assert_eq!(values[0].0, 1);
        Ok(())
    }

    #[derive(Debug)]
    struct Opaque(usize);

    impl Mapped for Opaque {
        fn type_info() -> TypeInfo {
            TypeInfo::opaque::<Self>()
        }
    }
}
