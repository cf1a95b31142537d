#[cfg(test)]
mod tests {
    use futures::TryStreamExt;
    use quarry::{Bindable, Database, Mapped, QuarryError, Result, Value};
    use quarry_tests::{Event, init_logs, row, users_driver};
    use std::sync::{Arc, Mutex};

    #[derive(Mapped, Debug, PartialEq)]
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

    const INSERT: &str = "insert into users (id, name, email) values (:id, :name, :email)";

    #[tokio::test]
    async fn select_one() -> Result<()> {
        init_logs();
        let driver = users_driver();
        driver.respond("select 1", |_, _| {
            Ok(vec![row([("1", Value::Int32(Some(1)))]).into()])
        });
        let database = Database::new(driver.clone());
        let values = database
            .open()
            .sql("select 1")
            .execute()
            .map_to_not_null::<i32>()
            .try_collect::<Vec<_>>()
            .await?;
        assert_eq!(values, [1]);
        assert_eq!(driver.executed()[0].0, "select 1");
        Ok(())
    }

    #[tokio::test]
    async fn bind_by_name_and_object() -> Result<()> {
        init_logs();
        let driver = users_driver();
        let database = Database::new(driver.clone());
        let updated = database
            .open()
            .sql(INSERT)
            .bind_name("id", 5i64)
            .bind_name("name", "Fluent")
            .bind_name("email", Value::Varchar(None))
            .execute()
            .rows_updated()
            .try_collect::<Vec<_>>()
            .await?;
        assert_eq!(updated, [1]);
        let updated = database
            .open()
            .sql(INSERT)
            .bind_object(NewUser {
                id: 6,
                name: "Object".into(),
                email: Some("object@example.com".into()),
            })
            .execute()
            .rows_updated()
            .try_collect::<Vec<_>>()
            .await?;
        assert_eq!(updated, [1]);

        let users = database
            .open()
            .sql("select * from users where id = :id")
            .bind_name("id", 6i64)
            .execute()
            .map_rows::<User>()
            .try_collect::<Vec<_>>()
            .await?;
        assert_eq!(
            users,
            [Some(User {
                id: 6,
                name: "Object".into(),
                email: Some("object@example.com".into()),
            })]
        );
        assert_eq!(
            driver.count(|v| matches!(v, Event::Connect(..))),
            3,
            "Every consumer opens its own context"
        );
        assert_eq!(driver.count(|v| matches!(v, Event::Close(..))), 3);
        Ok(())
    }

    #[tokio::test]
    async fn unknown_parameter() {
        init_logs();
        let database = Database::new(users_driver());
        let error = database
            .open()
            .sql("select * from users where id = :id")
            .bind_name("nope", 1i64)
            .execute()
            .map_rows::<User>()
            .try_collect::<Vec<_>>()
            .await
            .unwrap_err();
        assert!(QuarryError::is_configuration(&error));
        assert_eq!(error.to_string(), "No bind-parameter found for nope");
    }

    #[tokio::test]
    async fn subscribe() -> Result<()> {
        init_logs();
        let driver = users_driver();
        let database = Database::new(driver.clone());

        let counts = Arc::new(Mutex::new(Vec::new()));
        let sink = counts.clone();
        database
            .open()
            .sql("insert into users (id, name) values (:id, :name)")
            .bind_name("id", 1i64)
            .bind_name("name", "Ada")
            .execute()
            .subscribe_rows_updated(move |v| sink.lock().unwrap().push(v))
            .await??;
        assert_eq!(*counts.lock().unwrap(), [1]);

        let names = Arc::new(Mutex::new(Vec::new()));
        let sink = names.clone();
        database
            .open()
            .sql("select * from users")
            .execute()
            .subscribe_not_null(move |v: User| sink.lock().unwrap().push(v.name))
            .await??;
        assert_eq!(*names.lock().unwrap(), ["Ada"]);

        let error = database
            .open()
            .sql("insert into users (id, name) values (:id, :name)")
            .bind_name("id", 1i64)
            .bind_name("name", "Ada")
            .execute()
            .subscribe_rows_updated(|_| {})
            .await?
            .unwrap_err();
        assert!(error.to_string().contains("Duplicate key"), "{error}");
        Ok(())
    }
}
