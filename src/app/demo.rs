//! Query handler run by the binary. Good enough to try cancellation from
//! `psql`: `SELECT pg_sleep(30);` then Ctrl-C.

use std::time::Duration;

use crate::messages::{oid, FormatCode, Value};
use crate::query::{
    handler_fn, Column, Parameter, PreparedStatement, QueryContext, QueryError, QueryHandler,
};

/// How the sleep length is given.
#[derive(Debug, Clone, Copy, PartialEq)]
enum Sleep {
    Seconds(f64),
    /// `pg_sleep($1)`.
    Parameter,
}

/// `SELECT pg_sleep(<secs>)`, case insensitive, optional trailing `;`.
fn parse_sleep(query: &str) -> Option<Sleep> {
    let query = query.trim().trim_end_matches(';').trim().to_ascii_lowercase();
    let argument = query
        .strip_prefix("select")?
        .trim_start()
        .strip_prefix("pg_sleep")?
        .trim_start()
        .strip_prefix('(')?
        .strip_suffix(')')?
        .trim();
    if argument == "$1" {
        return Some(Sleep::Parameter);
    }
    argument
        .parse::<f64>()
        .ok()
        .filter(|seconds| seconds.is_finite())
        .map(Sleep::Seconds)
}

fn parameter_seconds(parameters: &[Parameter]) -> Result<f64, QueryError> {
    let invalid = || QueryError::new("22P02", "invalid input syntax for pg_sleep");
    let parameter = parameters.first().ok_or_else(invalid)?;
    match parameter.format() {
        FormatCode::Text => parameter
            .as_str()
            .and_then(|text| text.trim().parse::<f64>().ok())
            .ok_or_else(invalid),
        FormatCode::Binary => match parameter.value() {
            Some(bytes) if bytes.len() == 8 => {
                let mut raw = [0u8; 8];
                raw.copy_from_slice(bytes);
                Ok(f64::from_be_bytes(raw))
            }
            _ => Err(invalid()),
        },
    }
}

/// Emit one row per elapsed second, stopping as soon as the query is
/// cancelled.
async fn sleep(
    ctx: QueryContext,
    mut writer: crate::query::RowWriter,
    seconds: f64,
) -> Result<(), QueryError> {
    let whole = seconds.max(0.0).floor() as i32;
    for second in 1..=whole {
        ctx.until_cancelled(tokio::time::sleep(Duration::from_secs(1)))
            .await?;
        writer.row(vec![Value::Int4(second)]).await?;
    }
    let rest = seconds.max(0.0) - f64::from(whole);
    if rest > 0.0 {
        ctx.until_cancelled(tokio::time::sleep(Duration::from_secs_f64(rest)))
            .await?;
    }
    Ok(())
}

/// The demo handler: `pg_sleep` streams elapsed seconds, anything else is
/// echoed back as one text row.
pub fn demo_handler() -> impl QueryHandler {
    handler_fn(|_ctx: QueryContext, query: String| {
        let statement = match parse_sleep(&query) {
            Some(Sleep::Seconds(seconds)) => {
                PreparedStatement::new(move |ctx, writer, _parameters| sleep(ctx, writer, seconds))
                    .with_columns(vec![Column::new("pg_sleep", oid::INT4, 4)])
            }
            Some(Sleep::Parameter) => {
                PreparedStatement::new(|ctx, writer, parameters: Vec<Parameter>| async move {
                    let seconds = parameter_seconds(&parameters)?;
                    sleep(ctx, writer, seconds).await
                })
                .with_columns(vec![Column::new("pg_sleep", oid::INT4, 4)])
                .with_parameters(vec![oid::FLOAT8])
            }
            None => PreparedStatement::new(move |_ctx, mut writer, _parameters| {
                let query = query.clone();
                async move { writer.row(vec![Value::Text(query)]).await }
            })
            .with_columns(vec![Column::new("echo", oid::TEXT, -1)]),
        };
        std::future::ready(Ok(statement))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_sleep() {
        assert_eq!(parse_sleep("SELECT pg_sleep(5)"), Some(Sleep::Seconds(5.0)));
        assert_eq!(
            parse_sleep("  select pg_sleep( 0.5 );"),
            Some(Sleep::Seconds(0.5))
        );
        assert_eq!(parse_sleep("select pg_sleep($1)"), Some(Sleep::Parameter));
        assert_eq!(parse_sleep("select pg_sleep(nan)"), None);
        assert_eq!(parse_sleep("select 1"), None);
        assert_eq!(parse_sleep("select pg_sleep(1) + 1"), None);
    }

    #[test]
    fn test_parameter_seconds() {
        let text = Parameter::new(FormatCode::Text, oid::FLOAT8, Some("2.5".into()));
        assert_eq!(parameter_seconds(&[text]).unwrap(), 2.5);

        let binary = Parameter::new(
            FormatCode::Binary,
            oid::FLOAT8,
            Some(bytes::Bytes::copy_from_slice(&1.5f64.to_be_bytes())),
        );
        assert_eq!(parameter_seconds(&[binary]).unwrap(), 1.5);

        let null = Parameter::new(FormatCode::Text, oid::FLOAT8, None);
        assert_eq!(parameter_seconds(&[null]).unwrap_err().code(), "22P02");
    }
}
