//! # Redis Channel
//!
//! Command channel backed by the `redis` crate.
//!
//! Regular commands share one multiplexed [`ConnectionManager`], which keeps
//! issuance order and reconnects after a dropped connection. Blocking
//! commands (`BLPOP`, `BZPOPMIN`, ...) hold their connection for the whole
//! server-side wait, so each one runs on a dedicated connection instead.
//!
//! Dropping a pending future abandons the request locally; the driver
//! discards the late reply.

use std::time::Duration;

use async_trait::async_trait;
use redis::aio::{ConnectionLike, ConnectionManager, MultiplexedConnection};
use redis::{Client, RedisError, Value};
use tokio::time::timeout;

use keyweave_domain::{CacheError, Command, Reply, Result, TransportError, TransportErrorKind};

use super::CommandChannel;
use crate::config::ClientConfig;

/// Redis command channel with connection management
#[derive(Clone)]
pub struct RedisChannel {
    client: Client,
    conn: ConnectionManager,
    connect_timeout: Duration,
    response_timeout: Duration,
}

impl RedisChannel {
    /// Connect to the server named by `config.url`
    pub async fn connect(config: &ClientConfig) -> Result<Self> {
        let client = Client::open(config.url.as_str()).map_err(|e| map_redis_error("CONNECT", &e))?;
        let conn = timeout(config.connect_timeout, ConnectionManager::new(client.clone()))
            .await
            .map_err(|_| connect_timed_out(config.connect_timeout))?
            .map_err(|e| map_redis_error("CONNECT", &e))?;

        tracing::info!(url = %config.url, "Redis channel connected");

        Ok(Self {
            client,
            conn,
            connect_timeout: config.connect_timeout,
            response_timeout: config.response_timeout,
        })
    }

    async fn dedicated_connection(&self) -> Result<MultiplexedConnection> {
        timeout(self.connect_timeout, self.client.get_multiplexed_async_connection())
            .await
            .map_err(|_| connect_timed_out(self.connect_timeout))?
            .map_err(|e| map_redis_error("CONNECT", &e))
    }
}

fn connect_timed_out(after: Duration) -> CacheError {
    TransportError::new(
        TransportErrorKind::Timeout,
        format!("no connection within {}ms", after.as_millis()),
    )
    .into()
}

fn to_redis_cmd(command: &Command) -> redis::Cmd {
    let mut cmd = redis::cmd(command.name());
    for arg in command.arg_slice() {
        cmd.arg(arg.as_slice());
    }
    cmd
}

/// Reply deadline for a blocking command. A zero wait blocks server-side
/// until data arrives, so it gets no client deadline at all.
fn blocking_deadline(wait: Duration, response_timeout: Duration) -> Option<Duration> {
    (!wait.is_zero()).then(|| wait + response_timeout)
}

/// Send `cmd`, giving up after `deadline` when one is set.
async fn send<C: ConnectionLike + Send>(
    cmd: &redis::Cmd,
    conn: &mut C,
    name: &str,
    deadline: Option<Duration>,
) -> Result<Value> {
    let reply: redis::RedisResult<Value> = match deadline {
        Some(deadline) => timeout(deadline, cmd.query_async(conn)).await.map_err(|_| {
            TransportError::new(
                TransportErrorKind::Timeout,
                format!("{name}: no reply within {}ms", deadline.as_millis()),
            )
        })?,
        None => cmd.query_async(conn).await,
    };
    reply.map_err(|e| map_redis_error(name, &e))
}

#[async_trait]
impl CommandChannel for RedisChannel {
    async fn execute(&self, command: Command) -> Result<Reply> {
        command.check()?;
        let cmd = to_redis_cmd(&command);
        let name = command.name();

        let value = if let Some(wait) = command.blocking() {
            let mut conn = self.dedicated_connection().await?;
            send(&cmd, &mut conn, name, blocking_deadline(wait, self.response_timeout)).await?
        } else {
            let mut conn = self.conn.clone();
            send(&cmd, &mut conn, name, Some(self.response_timeout)).await?
        };

        from_value(value)
    }
}

/// Classify a driver error into the cache error taxonomy.
fn map_redis_error(command: &str, err: &RedisError) -> CacheError {
    let kind = if err.is_timeout() {
        Some(TransportErrorKind::Timeout)
    } else if err.is_connection_refusal() {
        Some(TransportErrorKind::ConnectionRefused)
    } else if err.is_connection_dropped() {
        Some(TransportErrorKind::ConnectionReset)
    } else if err.is_io_error() {
        Some(TransportErrorKind::Io)
    } else {
        None
    };

    if let Some(kind) = kind {
        return TransportError::new(kind, err.to_string()).into();
    }

    match err.code() {
        Some(code) => CacheError::Server {
            command: command.to_string(),
            code: code.to_string(),
            message: err.detail().unwrap_or_default().to_string(),
        },
        None => TransportError::new(TransportErrorKind::Protocol, err.to_string()).into(),
    }
}

/// Convert a driver value into the untyped reply model.
fn from_value(value: Value) -> Result<Reply> {
    Ok(match value {
        Value::Nil => Reply::Nil,
        Value::Int(n) => Reply::Integer(n),
        Value::BulkString(bytes) => Reply::Bulk(bytes),
        Value::SimpleString(text) => Reply::Status(text),
        Value::Okay => Reply::ok(),
        Value::Double(d) => Reply::Double(d),
        Value::Boolean(b) => Reply::Boolean(b),
        Value::Array(items) | Value::Set(items) => {
            Reply::Array(items.into_iter().map(from_value).collect::<Result<_>>()?)
        }
        Value::Map(entries) => Reply::Map(
            entries
                .into_iter()
                .map(|(k, v)| Ok((from_value(k)?, from_value(v)?)))
                .collect::<Result<_>>()?,
        ),
        Value::VerbatimString { text, .. } => Reply::Bulk(text.into_bytes()),
        other => {
            return Err(TransportError::new(
                TransportErrorKind::Protocol,
                format!("unsupported reply frame: {other:?}"),
            )
            .into());
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_value_conversion() {
        let value = Value::Array(vec![
            Value::BulkString(b"alice".to_vec()),
            Value::Int(3),
            Value::Nil,
            Value::Okay,
        ]);
        assert_eq!(
            from_value(value).unwrap(),
            Reply::Array(vec![Reply::from("alice"), Reply::Integer(3), Reply::Nil, Reply::ok()])
        );
    }

    #[test]
    fn test_io_error_is_retryable_transport() {
        let io = std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset by peer");
        let err = map_redis_error("GET", &RedisError::from(io));
        assert!(matches!(err, CacheError::Transport(_)));
        assert!(err.is_retryable());
    }

    #[test]
    fn test_response_error_is_server_error() {
        let redis_err = RedisError::from((
            redis::ErrorKind::ResponseError,
            "An error was signalled by the server",
            "index out of range".to_string(),
        ));
        let err = map_redis_error("LSET", &redis_err);
        assert!(err.is_out_of_range_reply());
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_blocking_deadline() {
        let response = Duration::from_millis(500);
        assert_eq!(blocking_deadline(Duration::ZERO, response), None);
        assert_eq!(
            blocking_deadline(Duration::from_secs(2), response),
            Some(Duration::from_millis(2500))
        );
    }

    #[test]
    fn test_command_encoding() {
        let cmd = to_redis_cmd(&Command::new("HSET").arg("h").arg("f").arg(1));
        assert_eq!(cmd.args_iter().count(), 4);
    }
}
