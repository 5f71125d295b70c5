use crate::config::Config;
use crate::deadline::Deadline;
use crate::error::Error;
use crate::fsm::AdaptiveQueryIterator;
use crate::gateway::Gateway;
use crate::pb::{QueryResult, TransferMode};
use crate::paginator::{ChunkPaginator, RowPaginator};
use crate::poller;
use crate::status::QueryStatus;

/// Entry point for submitting queries and scanning persisted results.
/// Stateless between calls; cheap to clone (the gateway wraps a `tonic`
/// channel, which is itself cheaply cloneable).
#[derive(Debug, Clone)]
pub struct HyperClient {
    gateway: Gateway,
    config: Config,
}

impl HyperClient {
    #[must_use]
    pub fn new(gateway: Gateway, config: Config) -> Self {
        Self { gateway, config }
    }

    /// Submits `sql` for execution under `mode` and returns a handle that
    /// streams result batches in order as they become available.
    pub async fn submit(&self, sql: &str, mode: TransferMode) -> Result<QueryHandle, Error> {
        let fsm = AdaptiveQueryIterator::submit(self.gateway.clone(), sql, mode, &self.config).await?;

        Ok(QueryHandle {
            fsm,
            gateway: self.gateway.clone(),
            config: self.config.clone(),
        })
    }

    /// Blocks (asynchronously) until `predicate` holds for the query's
    /// status, or the query finishes without ever satisfying it.
    pub async fn wait_for(
        &self,
        query_id: &str,
        deadline: Deadline,
        predicate: impl FnMut(&QueryStatus) -> bool,
    ) -> Result<QueryStatus, Error> {
        poller::wait_for(&self.gateway, query_id, deadline, &self.config, predicate).await
    }

    /// Returns an iterator over chunks `[chunk_id, chunk_id + count)` of an
    /// already-submitted query's persisted result.
    #[must_use]
    pub fn fetch_chunks(
        &self,
        query_id: impl Into<String>,
        chunk_id: u64,
        count: u64,
        deadline: Deadline,
    ) -> ChunkPaginator {
        ChunkPaginator::new(self.gateway.clone(), query_id, chunk_id, count, deadline)
    }

    /// Returns an iterator over rows `[row_offset, row_offset + row_limit)`
    /// of an already-submitted query's persisted result.
    pub fn fetch_rows(
        &self,
        query_id: impl Into<String>,
        row_offset: u64,
        row_limit: u64,
        byte_limit: u64,
        deadline: Deadline,
    ) -> Result<RowPaginator, Error> {
        RowPaginator::new(self.gateway.clone(), query_id, row_offset, row_limit, byte_limit, deadline)
    }

    /// Requests server-side cancellation of a submitted query.
    pub async fn cancel(&self, query_id: &str) -> Result<(), Error> {
        self.gateway.cancel(query_id).await.map_err(|source| {
            Error::transport_fatal(Some(query_id), crate::error::StateLabel::Poller, None, source)
        })
    }

    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }
}

/// A live, in-progress query. Not `Send` across an await point concurrently
/// from two callers: like the adaptive iterator it wraps, only one logical
/// consumer may drive `next()` at a time.
pub struct QueryHandle {
    fsm: AdaptiveQueryIterator,
    gateway: Gateway,
    config: Config,
}

impl QueryHandle {
    #[must_use]
    pub fn query_id(&self) -> &str {
        self.fsm.query_id()
    }

    #[must_use]
    pub fn status(&self) -> &QueryStatus {
        self.fsm.status()
    }

    /// Returns the next result batch, or `None` once the query is fully
    /// drained. Exhaustion is idempotent: further calls keep returning
    /// `None` rather than erroring.
    pub async fn next(&mut self) -> Result<Option<QueryResult>, Error> {
        self.fsm.next(&self.config).await
    }

    /// Requests server-side cancellation of the underlying query.
    pub async fn cancel(&self) -> Result<(), Error> {
        self.gateway.cancel(self.fsm.query_id()).await.map_err(|source| {
            Error::transport_fatal(
                Some(self.fsm.query_id()),
                crate::error::StateLabel::Poller,
                Some(self.fsm.status()),
                source,
            )
        })
    }

    /// Closes any in-flight stream held by this handle. Idempotent.
    pub fn close(&mut self) {
        self.fsm.close();
    }
}

impl Drop for QueryHandle {
    fn drop(&mut self) {
        self.fsm.close();
    }
}
