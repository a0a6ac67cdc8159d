//! Extended query protocol: Parse, Bind, Describe, Execute, Close, Sync.

use bytes::BytesMut;
use log::debug;
use std::sync::Arc;

use crate::errors::Error;
use crate::messages::constants::*;
use crate::messages::{
    bind_complete, close_complete, no_data, parameter_description, parse_complete,
    ready_for_query, row_description, Bind, Close, Describe, Execute, FormatCode, Parse, Target,
};
use crate::query::pipeline::{self, Outcome};
use crate::query::{Parameter, QueryError};

use super::core::{Client, Portal, StoredStatement};

impl<S, T> Client<S, T>
where
    S: tokio::io::AsyncRead + std::marker::Unpin,
    T: tokio::io::AsyncWrite + std::marker::Unpin,
{
    /// Queue an ErrorResponse and discard everything up to the next Sync.
    fn extended_error(&mut self, err: QueryError) {
        debug!(
            "Session {} extended query error: {err}",
            self.process_id()
        );
        self.send(err.to_pg_error().to_bytes());
        self.skip_until_sync = true;
    }

    fn malformed(&mut self, err: Error) {
        self.extended_error(QueryError::new(sqlstate::PROTOCOL_VIOLATION, err.to_string()));
    }

    pub(crate) async fn parse(&mut self, message: BytesMut) -> Result<(), Error> {
        let parse = match Parse::try_from(message) {
            Ok(parse) => parse,
            Err(err) => {
                self.malformed(err);
                return Ok(());
            }
        };

        // The unnamed statement is replaced freely.
        if !parse.name.is_empty() && self.statements.contains_key(&parse.name) {
            self.extended_error(QueryError::new(
                sqlstate::DUPLICATE_PREPARED_STATEMENT,
                format!("prepared statement \"{}\" already exists", parse.name),
            ));
            return Ok(());
        }

        let handler = Arc::clone(&self.state.handler);
        let (ctx, registration) = self.begin_query();
        let prepared = pipeline::prepare(handler.as_ref(), &ctx, parse.query).await;
        drop(registration);

        match prepared {
            Ok(statement) => {
                let parameter_types = if statement.parameters().is_empty() {
                    parse.param_types
                } else {
                    statement.parameters().to_vec()
                };
                self.statements.insert(
                    parse.name,
                    StoredStatement {
                        statement,
                        parameter_types,
                    },
                );
                self.send(parse_complete());
            }
            Err(err) => {
                let outcome = if err.is_canceled() {
                    Outcome::Canceled
                } else {
                    Outcome::Failed(err)
                };
                self.report(outcome);
                self.skip_until_sync = true;
            }
        }
        Ok(())
    }

    pub(crate) fn bind(&mut self, message: BytesMut) {
        let bind = match Bind::try_from(message) {
            Ok(bind) => bind,
            Err(err) => return self.malformed(err),
        };

        let stored = match self.statements.get(&bind.statement) {
            Some(stored) => stored,
            None => {
                return self.extended_error(QueryError::new(
                    sqlstate::INVALID_SQL_STATEMENT_NAME,
                    format!("prepared statement \"{}\" does not exist", bind.statement),
                ))
            }
        };

        let expected = stored.parameter_types.len();
        if bind.params.len() != expected {
            return self.extended_error(QueryError::new(
                sqlstate::PROTOCOL_VIOLATION,
                format!(
                    "bind message supplies {} parameters, but prepared statement \"{}\" requires {}",
                    bind.params.len(),
                    bind.statement,
                    expected
                ),
            ));
        }
        if bind.param_formats.len() > 1 && bind.param_formats.len() != expected {
            return self.extended_error(QueryError::new(
                sqlstate::PROTOCOL_VIOLATION,
                format!(
                    "bind message has {} parameter formats but {} parameters",
                    bind.param_formats.len(),
                    expected
                ),
            ));
        }

        let parameters = bind
            .params
            .into_iter()
            .zip(stored.parameter_types.iter())
            .enumerate()
            .map(|(index, (value, oid))| {
                Parameter::new(
                    FormatCode::for_column(&bind.param_formats, index),
                    *oid,
                    value,
                )
            })
            .collect();
        let portal = Portal {
            statement: stored.statement.clone(),
            parameters,
            result_formats: bind.result_formats,
        };

        if !bind.portal.is_empty() && self.portals.contains_key(&bind.portal) {
            return self.extended_error(QueryError::new(
                sqlstate::DUPLICATE_CURSOR,
                format!("cursor \"{}\" already exists", bind.portal),
            ));
        }
        self.portals.insert(bind.portal, portal);
        self.send(bind_complete());
    }

    pub(crate) fn describe(&mut self, message: BytesMut) {
        let describe = match Describe::try_from(message) {
            Ok(describe) => describe,
            Err(err) => return self.malformed(err),
        };

        let response = match describe.target {
            Target::Statement => match self.statements.get(&describe.name) {
                Some(stored) => {
                    let mut response = parameter_description(&stored.parameter_types);
                    let columns = stored.statement.columns();
                    if columns.is_empty() {
                        response.unsplit(no_data());
                    } else {
                        // Formats are unknown until Bind.
                        response.unsplit(row_description(columns, &[]));
                    }
                    Ok(response)
                }
                None => Err(QueryError::new(
                    sqlstate::INVALID_SQL_STATEMENT_NAME,
                    format!("prepared statement \"{}\" does not exist", describe.name),
                )),
            },
            Target::Portal => match self.portals.get(&describe.name) {
                Some(portal) => {
                    let columns = portal.statement.columns();
                    if columns.is_empty() {
                        Ok(no_data())
                    } else {
                        Ok(row_description(columns, &portal.result_formats))
                    }
                }
                None => Err(QueryError::new(
                    sqlstate::INVALID_CURSOR_NAME,
                    format!("portal \"{}\" does not exist", describe.name),
                )),
            },
        };

        match response {
            Ok(response) => self.send(response),
            Err(err) => self.extended_error(err),
        }
    }

    /// Run a portal to completion. The row limit of Execute is not honored.
    pub(crate) async fn execute(&mut self, message: BytesMut) -> Result<(), Error> {
        let execute = match Execute::try_from(message) {
            Ok(execute) => execute,
            Err(err) => {
                self.malformed(err);
                return Ok(());
            }
        };

        let portal = match self.portals.get(&execute.portal) {
            Some(portal) => portal.clone(),
            None => {
                self.extended_error(QueryError::new(
                    sqlstate::INVALID_CURSOR_NAME,
                    format!("portal \"{}\" does not exist", execute.portal),
                ));
                return Ok(());
            }
        };
        if execute.max_rows > 0 {
            debug!(
                "Session {}: ignoring row limit {} for portal \"{}\"",
                self.process_id(),
                execute.max_rows,
                execute.portal
            );
        }

        let (ctx, registration) = self.begin_query();
        let outcome = self
            .run_statement(
                ctx,
                &portal.statement,
                portal.parameters,
                &portal.result_formats,
            )
            .await?;
        drop(registration);

        if !self.report(outcome) {
            self.skip_until_sync = true;
        }
        Ok(())
    }

    pub(crate) fn close(&mut self, message: BytesMut) {
        let close = match Close::try_from(message) {
            Ok(close) => close,
            Err(err) => return self.malformed(err),
        };

        // Closing something that does not exist is not an error.
        match close.target {
            Target::Statement => {
                self.statements.remove(&close.name);
            }
            Target::Portal => {
                self.portals.remove(&close.name);
            }
        }
        self.send(close_complete());
    }

    /// End of an extended query cycle. Portals do not outlive it.
    pub(crate) async fn sync(&mut self) -> Result<(), Error> {
        self.skip_until_sync = false;
        self.portals.clear();
        self.send(ready_for_query(false));
        self.flush().await
    }
}
