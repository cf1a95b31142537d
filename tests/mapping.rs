#[cfg(test)]
mod tests {
    use futures::TryStreamExt;
    use quarry::{Database, Mapped, QuarryError, Result, SqlInterfaceDef, SqlMethod, Value};
    use quarry_tests::{MockDriver, init_logs, row};
    use rust_decimal::Decimal;
    use std::str::FromStr;
    use time::macros::date;
    use uuid::Uuid;

    #[derive(Mapped, Debug, PartialEq)]
    enum Status {
        Active,
        Suspended,
    }

    #[derive(Mapped, Debug, PartialEq)]
    struct Address {
        city: String,
        #[quarry(column = "zip_code")]
        zip: Option<String>,
    }

    #[derive(Mapped, Debug, PartialEq)]
    struct Account {
        id: i64,
        #[quarry(column = "user_name")]
        name: String,
        status: Status,
        #[quarry(default = "hello".to_string())]
        greeting: String,
        #[quarry(nested)]
        address: Address,
        #[quarry(setter)]
        score: i32,
        #[quarry(setter, default = 100)]
        limit: i32,
        #[quarry(skip)]
        tags: Vec<String>,
    }

    #[derive(Mapped, Debug, PartialEq)]
    struct Invoice {
        r#ref: Uuid,
        amount: Decimal,
        issued: time::Date,
        paid: bool,
        note: Option<String>,
    }

    fn text(value: &str) -> Value {
        Value::Varchar(Some(value.into()))
    }

    fn accounts_driver() -> MockDriver {
        let driver = MockDriver::new();
        driver
            .respond("select * from accounts", |_, _| {
                Ok(vec![
                    row([
                        ("id", Value::Int64(Some(1))),
                        ("user_name", text("ada")),
                        ("status", text("Active")),
                        ("greeting", text("good morning")),
                        ("city", text("London")),
                        ("zip_code", text("N1")),
                        ("score", Value::Int32(Some(42))),
                        ("limit", Value::Int64(Some(5))),
                    ])
                    .into(),
                    row([
                        ("ID", Value::Int32(Some(2))),
                        ("User_Name", text("alan")),
                        ("status", text("Suspended")),
                        ("city", text("Manchester")),
                    ])
                    .into(),
                ])
            })
            .respond("select * from deleted_accounts", |_, _| {
                Ok(vec![
                    row([
                        ("id", Value::Int64(Some(3))),
                        ("user_name", text("grace")),
                        ("status", text("Deleted")),
                        ("city", text("Arlington")),
                    ])
                    .into(),
                ])
            })
            .respond("select status from deleted_accounts", |_, _| {
                Ok(vec![row([("status", text("Deleted"))]).into()])
            })
            .respond("select score from accounts", |_, _| {
                Ok(vec![
                    row([("score", Value::Int32(Some(3)))]).into(),
                    row([("score", Value::Int32(None))]).into(),
                ])
            })
            .respond("select * from invoices", |_, _| {
                Ok(vec![
                    row([
                        ("ref", text("67e55044-10b1-426f-9247-bb680e5fe0c8")),
                        ("amount", Value::Decimal(Some(Decimal::new(1999, 2)))),
                        ("issued", Value::Date(Some(date!(2024 - 02 - 29)))),
                        ("paid", Value::Boolean(Some(true))),
                        ("note", Value::Null),
                    ])
                    .into(),
                ])
            });
        driver
    }

    fn accounts() -> SqlInterfaceDef<MockDriver> {
        SqlInterfaceDef::new("AccountDao")
            .method(SqlMethod::query::<Account>("all", "select * from accounts"))
            .method(SqlMethod::query::<Account>(
                "deleted",
                "select * from deleted_accounts",
            ))
            .method(SqlMethod::query::<i32>("scores", "select score from accounts"))
            .method(SqlMethod::query::<Option<i32>>(
                "nullable_scores",
                "select score from accounts",
            ))
            .method(SqlMethod::query::<Status>(
                "statuses",
                "select status from deleted_accounts",
            ))
            .method(SqlMethod::query::<Invoice>("invoices", "select * from invoices"))
    }

    #[tokio::test]
    async fn derived_struct() -> Result<()> {
        init_logs();
        let database = Database::new(accounts_driver());
        let dao = database.on_demand(&accounts())?;
        let accounts = dao.call::<Account>("all", []).collect().await?;
        assert_eq!(
            accounts,
            [
                Account {
                    id: 1,
                    name: "ada".into(),
                    status: Status::Active,
                    greeting: "good morning".into(),
                    address: Address {
                        city: "London".into(),
                        zip: Some("N1".into()),
                    },
                    score: 42,
                    limit: 5,
                    tags: vec![],
                },
                Account {
                    id: 2,
                    name: "alan".into(),
                    status: Status::Suspended,
                    greeting: "hello".into(),
                    address: Address {
                        city: "Manchester".into(),
                        zip: None,
                    },
                    score: 0,
                    limit: 100,
                    tags: vec![],
                },
            ]
        );
        Ok(())
    }

    #[tokio::test]
    async fn unknown_enum_constant() -> Result<()> {
        init_logs();
        let database = Database::new(accounts_driver());
        let dao = database.on_demand(&accounts())?;

        // Unknown constants map to null
        let error = dao.call::<Status>("statuses", []).collect().await.unwrap_err();
        assert!(QuarryError::is_data(&error));
        assert!(
            error
                .to_string()
                .starts_with("Null value found for returnType: Status"),
            "{error}"
        );

        let error = dao.call::<Account>("deleted", []).collect().await.unwrap_err();
        assert!(QuarryError::is_data(&error));
        assert_eq!(
            error.to_string(),
            "Null value found for non-nullable param: status in mappedType: Account"
        );
        Ok(())
    }

    #[tokio::test]
    async fn null_elements() -> Result<()> {
        init_logs();
        let database = Database::new(accounts_driver());
        let dao = database.on_demand(&accounts())?;

        let values = dao
            .call::<Option<i32>>("nullable_scores", [])
            .collect()
            .await?;
        assert_eq!(values, [Some(3), None]);

        let mut stream = dao.call::<i32>("scores", []).into_stream();
        assert_eq!(stream.try_next().await?, Some(3));
        let error = stream.try_next().await.unwrap_err();
        assert!(QuarryError::is_data(&error));
        assert_eq!(
            error.to_string(),
            "Null value found for returnType: i32 when mapping result in method: scores in interface: AccountDao"
        );
        // The first error ends the stream
        assert!(stream.try_next().await?.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn native_columns() -> Result<()> {
        init_logs();
        let database = Database::new(accounts_driver());
        let dao = database.on_demand(&accounts())?;
        let invoices = dao.call::<Invoice>("invoices", []).collect().await?;
        assert_eq!(
            invoices,
            [Invoice {
                r#ref: Uuid::from_str("67e55044-10b1-426f-9247-bb680e5fe0c8")?,
                amount: Decimal::from_str("19.99")?,
                issued: date!(2024 - 02 - 29),
                paid: true,
                note: None,
            }]
        );
        Ok(())
    }

    #[tokio::test]
    async fn fluent_mapping() -> Result<()> {
        init_logs();
        let database = Database::new(accounts_driver());
        let accounts = database
            .open()
            .sql("select * from accounts")
            .execute()
            .map_to_not_null::<Account>()
            .try_collect::<Vec<_>>()
            .await?;
        assert_eq!(accounts.len(), 2);
        assert_eq!(accounts[1].address.city, "Manchester");

        let statuses = database
            .open()
            .sql("select status from deleted_accounts")
            .execute()
            .map_rows::<Status>()
            .try_collect::<Vec<_>>()
            .await?;
        assert_eq!(statuses, [None]);
        Ok(())
    }
}
