use crate::{BoundRow, MockDriver, affected, bound, row};
use quarry_core::{Error, QueryResult, Result, RowLabeled, Value};

fn required(bindings: &BoundRow, name: &str) -> Result<Value> {
    bound(bindings, name)
        .cloned()
        .ok_or_else(|| Error::msg(format!("Parameter `{name}` is not bound")))
}

fn with_id<'a>(rows: &'a [RowLabeled], id: &'a Value) -> impl Iterator<Item = &'a RowLabeled> {
    rows.iter().filter(move |v| v.get_column("id") == Some(id))
}

/// Mock scripted with a `users (id, name, email)` table.
///
/// Inserting an existing id fails like a primary key violation. Rows come
/// back in insertion order.
pub fn users_driver() -> MockDriver {
    let driver = MockDriver::new();
    driver
        .respond("insert into users", |store, bindings| {
            let id = required(bindings, "id")?;
            if with_id(store.rows("users"), &id).next().is_some() {
                return Err(Error::msg(format!(
                    "Duplicate key value {id} violates the primary key of users"
                )));
            }
            let email = bound(bindings, "email")
                .cloned()
                .unwrap_or(Value::Varchar(None));
            store.insert(
                "users",
                row([
                    ("id", id),
                    ("name", required(bindings, "name")?),
                    ("email", email),
                ]),
            );
            Ok(affected(1))
        })
        .respond("select count(*) from users", |store, _| {
            let count = store.rows("users").len() as i64;
            Ok(vec![row([("count", Value::Int64(Some(count)))]).into()])
        })
        .respond("select * from users where id", |store, bindings| {
            let id = required(bindings, "id")?;
            Ok(with_id(store.rows("users"), &id)
                .cloned()
                .map(QueryResult::Row)
                .collect())
        })
        .respond("select * from users", |store, _| {
            Ok(store
                .rows("users")
                .iter()
                .cloned()
                .map(QueryResult::Row)
                .collect())
        })
        .respond("delete from users where id", |store, bindings| {
            let id = required(bindings, "id")?;
            Ok(affected(
                store.delete("users", |v| v.get_column("id") == Some(&id)),
            ))
        })
        .respond("delete from users", |store, _| {
            Ok(affected(store.delete("users", |_| true)))
        });
    driver
}
