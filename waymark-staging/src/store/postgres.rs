//! Live staging store backend over a PostgreSQL server.
//!
//! Parameters are passed in text form (every prepared statement is typed
//! with text parameters and casts them server-side) and result columns are
//! cast to text in the SQL, so the adapter sees the same representation on
//! both backends. Streaming-insert rows are buffered and shipped through
//! `COPY ... FROM STDIN` in bounded chunks; rows reach the server in ingest
//! order.

use std::collections::HashMap;
use std::io::Write;

use postgres::types::{ToSql, Type};
use postgres::{Client, NoTls, SimpleQueryMessage, Statement};
use waymark_core::MiddleError;

use super::{Rows, StoreConnection, StoreDriver};

/// Copy rows are flushed to the server whenever the buffer passes this size.
const COPY_FLUSH_BYTES: usize = 1 << 20;

fn store_err(op: &'static str, source: postgres::Error) -> MiddleError {
    MiddleError::Store {
        op: op.to_owned(),
        message: source.to_string(),
    }
}

/// [`StoreDriver`] over the `postgres` crate.
#[derive(Debug, Default, Clone, Copy)]
pub struct PgStoreDriver;

impl PgStoreDriver {
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl StoreDriver for PgStoreDriver {
    fn connect(&self, conninfo: &str) -> Result<Box<dyn StoreConnection>, MiddleError> {
        let client = Client::connect(conninfo, NoTls).map_err(|source| MiddleError::Connect {
            message: source.to_string(),
        })?;
        Ok(Box::new(PgConnection {
            client,
            statements: HashMap::new(),
            copy: None,
        }))
    }
}

struct CopyBuffer {
    sql: String,
    rows: Vec<u8>,
}

struct PgConnection {
    client: Client,
    statements: HashMap<String, Statement>,
    copy: Option<CopyBuffer>,
}

impl PgConnection {
    fn flush_copy(&mut self) -> Result<(), MiddleError> {
        let Some(copy) = self.copy.as_mut() else {
            return Ok(());
        };
        if copy.rows.is_empty() {
            return Ok(());
        }
        let mut writer = self
            .client
            .copy_in(copy.sql.as_str())
            .map_err(|e| store_err("copy", e))?;
        writer.write_all(&copy.rows).map_err(|source| MiddleError::Io {
            context: "writing streaming-insert rows",
            source,
        })?;
        writer.finish().map_err(|e| store_err("copy", e))?;
        copy.rows.clear();
        Ok(())
    }
}

impl StoreConnection for PgConnection {
    fn batch(&mut self, sql: &str) -> Result<(), MiddleError> {
        self.client
            .batch_execute(sql)
            .map_err(|e| store_err("batch", e))
    }

    fn query(&mut self, sql: &str) -> Result<Rows, MiddleError> {
        let messages = self
            .client
            .simple_query(sql)
            .map_err(|e| store_err("query", e))?;
        let mut rows = Rows::new();
        for message in messages {
            if let SimpleQueryMessage::Row(row) = message {
                rows.push(
                    (0..row.len())
                        .map(|i| row.get(i).map(str::to_owned))
                        .collect(),
                );
            }
        }
        Ok(rows)
    }

    fn prepare(&mut self, name: &str, sql: &str, params: usize) -> Result<(), MiddleError> {
        let types = vec![Type::TEXT; params];
        let statement = self
            .client
            .prepare_typed(sql, &types)
            .map_err(|e| store_err("prepare", e))?;
        self.statements.insert(name.to_owned(), statement);
        Ok(())
    }

    fn exec_prepared(
        &mut self,
        name: &str,
        params: &[Option<&str>],
    ) -> Result<Rows, MiddleError> {
        let statement = self
            .statements
            .get(name)
            .ok_or_else(|| {
                MiddleError::Protocol(format!("prepared statement {name} was never registered"))
            })?
            .clone();
        let args: Vec<&(dyn ToSql + Sync)> =
            params.iter().map(|p| p as &(dyn ToSql + Sync)).collect();
        let result = self
            .client
            .query(&statement, &args)
            .map_err(|source| MiddleError::Store {
                op: name.to_owned(),
                message: source.to_string(),
            })?;

        let mut rows = Rows::with_capacity(result.len());
        for row in &result {
            let mut columns = Vec::with_capacity(row.len());
            for i in 0..row.len() {
                columns.push(row.try_get::<_, Option<String>>(i).map_err(|source| {
                    MiddleError::Store {
                        op: name.to_owned(),
                        message: source.to_string(),
                    }
                })?);
            }
            rows.push(columns);
        }
        Ok(rows)
    }

    fn copy_begin(&mut self, sql: &str) -> Result<(), MiddleError> {
        self.copy = Some(CopyBuffer {
            sql: sql.to_owned(),
            rows: Vec::new(),
        });
        Ok(())
    }

    fn copy_row(&mut self, row: &str) -> Result<(), MiddleError> {
        let over_threshold = {
            let Some(copy) = self.copy.as_mut() else {
                return Err(MiddleError::Protocol(
                    "copy_row without an open streaming insert".to_owned(),
                ));
            };
            copy.rows.extend_from_slice(row.as_bytes());
            copy.rows.len() >= COPY_FLUSH_BYTES
        };
        if over_threshold {
            self.flush_copy()?;
        }
        Ok(())
    }

    fn copy_end(&mut self) -> Result<(), MiddleError> {
        if self.copy.is_none() {
            return Err(MiddleError::Protocol(
                "copy_end without an open streaming insert".to_owned(),
            ));
        }
        self.flush_copy()?;
        self.copy = None;
        Ok(())
    }
}
