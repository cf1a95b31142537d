mod as_value;
mod binder;
mod column_mapper;
mod database;
mod driver;
mod error;
mod execution_context;
mod fluent;
mod interface;
mod method;
mod object_mapper;
mod output;
mod query;
mod row_mapper;
mod scoped_executor;
mod statement;
mod template;
mod type_info;
mod util;
mod value;

pub use ::anyhow::Context;
pub use as_value::*;
pub use binder::*;
pub use column_mapper::*;
pub use database::*;
pub use driver::*;
pub use error::*;
pub use execution_context::*;
pub use fluent::*;
pub use interface::*;
pub use method::*;
pub use object_mapper::*;
pub use output::*;
pub use query::*;
pub use row_mapper::*;
pub use scoped_executor::*;
pub use statement::*;
pub use template::*;
pub use type_info::*;
pub use util::*;
pub use value::*;
pub mod stream {
    pub use ::futures::stream::*;
}
pub use ::futures::future;

pub type Result<T> = anyhow::Result<T>;
pub type Error = anyhow::Error;
