use std::collections::HashMap;
use std::time::Duration;

use log::debug;
use thiserror::Error;

use super::Origin;
use super::conn::Conn;

/// Why a connection was not returned to the idle pool.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PutIdleError {
    #[error("keep-alives disabled")]
    KeepAlivesDisabled,
    #[error("too many idle connections for host")]
    TooManyIdle,
    #[error("connection not reusable: {0}")]
    NotReusable(&'static str),
}

/// Idle keep-alive connections, most recently returned first.
pub(crate) struct IdlePool {
    idle: HashMap<Origin, Vec<Conn>>,
    max_idle_per_host: usize,
    idle_timeout: Duration,
}

impl IdlePool {
    pub(crate) fn new(max_idle_per_host: usize, idle_timeout: Duration) -> Self {
        Self {
            idle: HashMap::new(),
            max_idle_per_host,
            idle_timeout,
        }
    }

    /// Take the freshest usable connection for `origin`, discarding expired or closed ones.
    pub(crate) fn checkout(&mut self, origin: &Origin) -> Option<Conn> {
        let conns = self.idle.get_mut(origin)?;
        while let Some(mut conn) = conns.pop() {
            if conn.idle_for() > self.idle_timeout {
                debug!("dropping idle connection to {} after {:?}", origin, conn.idle_for());
                continue;
            }
            if conn.looks_closed() {
                debug!("dropping idle connection to {}: closed by peer", origin);
                continue;
            }
            return Some(conn);
        }
        None
    }

    /// Return a connection for reuse. On rejection the connection is dropped.
    pub(crate) fn put(&mut self, origin: Origin, mut conn: Conn) -> Result<(), PutIdleError> {
        if self.max_idle_per_host == 0 {
            return Err(PutIdleError::KeepAlivesDisabled);
        }
        let conns = self.idle.entry(origin).or_default();
        conns.retain(|idle| idle.idle_for() <= self.idle_timeout);
        if conns.len() >= self.max_idle_per_host {
            return Err(PutIdleError::TooManyIdle);
        }
        conn.mark_idle();
        conns.push(conn);
        Ok(())
    }

    pub(crate) fn idle_count(&self) -> usize {
        self.idle.values().map(Vec::len).sum()
    }

    pub(crate) fn clear(&mut self) {
        self.idle.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::conn::Stream;
    use tokio::net::{TcpListener, TcpStream};

    async fn connected_pair() -> (Conn, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let client = TcpStream::connect(addr).await.unwrap();
        let (server, _) = listener.accept().await.unwrap();
        (Conn::new(Stream::Plain(client), false), server)
    }

    fn origin() -> Origin {
        Origin::parse(&"http://127.0.0.1:8080/".parse().unwrap()).unwrap()
    }

    #[tokio::test]
    async fn test_put_then_checkout_reuses_connection() {
        let mut pool = IdlePool::new(2, Duration::from_secs(10));
        let (conn, _server) = connected_pair().await;
        pool.put(origin(), conn).unwrap();
        assert_eq!(pool.idle_count(), 1);

        let conn = pool.checkout(&origin()).unwrap();
        assert!(conn.info(true).was_idle);
        assert_eq!(pool.idle_count(), 0);
    }

    #[tokio::test]
    async fn test_put_rejects_beyond_capacity() {
        let mut pool = IdlePool::new(1, Duration::from_secs(10));
        let (first, _s1) = connected_pair().await;
        let (second, _s2) = connected_pair().await;
        pool.put(origin(), first).unwrap();
        assert_eq!(pool.put(origin(), second), Err(PutIdleError::TooManyIdle));
        assert_eq!(
            PutIdleError::TooManyIdle.to_string(),
            "too many idle connections for host"
        );
    }

    #[tokio::test]
    async fn test_zero_capacity_disables_keep_alive() {
        let mut pool = IdlePool::new(0, Duration::from_secs(10));
        let (conn, _server) = connected_pair().await;
        assert_eq!(pool.put(origin(), conn), Err(PutIdleError::KeepAlivesDisabled));
    }

    #[tokio::test]
    async fn test_checkout_skips_expired_connections() {
        let mut pool = IdlePool::new(2, Duration::ZERO);
        let (conn, _server) = connected_pair().await;
        pool.put(origin(), conn).unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;
        assert!(pool.checkout(&origin()).is_none());
    }

    #[tokio::test]
    async fn test_checkout_skips_connections_closed_by_peer() {
        let mut pool = IdlePool::new(2, Duration::from_secs(10));
        let (conn, server) = connected_pair().await;
        pool.put(origin(), conn).unwrap();
        drop(server);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(pool.checkout(&origin()).is_none());
    }

    #[tokio::test]
    async fn test_checkout_skips_tls_connection_after_close_notify() {
        use tokio::io::AsyncWriteExt;

        let mut pool = IdlePool::new(2, Duration::from_secs(10));
        let tls_origin = Origin::parse(&"https://localhost:8443/".parse().unwrap()).unwrap();
        let (conn, mut server) = crate::transport::conn::tests::tls_pair().await;
        pool.put(tls_origin.clone(), conn).unwrap();

        server.shutdown().await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert!(pool.checkout(&tls_origin).is_none());
        assert_eq!(pool.idle_count(), 0);
    }

    #[tokio::test]
    async fn test_checkout_keeps_live_tls_connection() {
        let mut pool = IdlePool::new(2, Duration::from_secs(10));
        let tls_origin = Origin::parse(&"https://localhost:8443/".parse().unwrap()).unwrap();
        let (conn, _server) = crate::transport::conn::tests::tls_pair().await;
        pool.put(tls_origin.clone(), conn).unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert!(pool.checkout(&tls_origin).is_some());
    }

    #[tokio::test]
    async fn test_clear_drops_everything() {
        let mut pool = IdlePool::new(2, Duration::from_secs(10));
        let (conn, _server) = connected_pair().await;
        pool.put(origin(), conn).unwrap();
        pool.clear();
        assert_eq!(pool.idle_count(), 0);
    }
}
