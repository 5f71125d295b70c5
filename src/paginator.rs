use crate::config::{self, Config};
use crate::deadline::Deadline;
use crate::error::Error;
use crate::gateway::Gateway;
use crate::observer::Observer;
use crate::pb::QueryResult;

/// Lazily fetches chunks `[start, start + count)` of a query's persisted
/// result. The first chunk is requested with schema included; every
/// subsequent chunk omits it, since the decoder only needs schema once.
pub struct ChunkPaginator {
    gateway: Gateway,
    query_id: String,
    next_chunk_id: u64,
    end_chunk_id: u64,
    current: Option<Observer<QueryResult>>,
    deadline: Deadline,
}

impl ChunkPaginator {
    #[must_use]
    pub fn new(gateway: Gateway, query_id: impl Into<String>, start: u64, count: u64, deadline: Deadline) -> Self {
        Self {
            gateway,
            query_id: query_id.into(),
            next_chunk_id: start,
            end_chunk_id: start.saturating_add(count),
            current: None,
            deadline,
        }
    }

    pub async fn next(&mut self, config: &Config) -> Result<Option<QueryResult>, Error> {
        loop {
            if let Some(observer) = &self.current {
                match observer.next_element().await.map_err(|err| {
                    err.with_context(&self.query_id, crate::error::StateLabel::CheckForMoreData, None)
                })? {
                    Some(result) => return Ok(Some(result)),
                    None => self.current = None,
                }
            }

            if self.next_chunk_id >= self.end_chunk_id {
                return Ok(None);
            }

            let chunk_id = self.next_chunk_id;
            let omit_schema = chunk_id != 0;
            self.next_chunk_id += 1;

            let stream = self
                .gateway
                .get_query_result_by_chunk(
                    &self.query_id,
                    chunk_id,
                    omit_schema,
                    self.deadline.residual_or(config.network_timeout()),
                )
                .await
                .map_err(|source| {
                    Error::transport_fatal(
                        Some(&self.query_id),
                        crate::error::StateLabel::CheckForMoreData,
                        None,
                        source,
                    )
                })?;

            self.current = Some(Observer::new(stream, config.initial_flow_credit()));
        }
    }
}

/// Lazily fetches rows `[row_offset, row_offset + row_limit)` of a query's
/// persisted result, paging through successive `GetQueryResult` calls that
/// each ask for whatever rows remain, bounded by `byte_limit` per request.
pub struct RowPaginator {
    gateway: Gateway,
    query_id: String,
    row_offset: u64,
    row_limit: u64,
    byte_limit: u64,
    seen: u64,
    current: Option<Observer<QueryResult>>,
    /// Whether the currently open page has yielded at least one batch.
    /// Distinguishes "this page is done, open the next one" from "a freshly
    /// opened page came back empty", which ends iteration outright.
    current_yielded: bool,
    deadline: Deadline,
}

impl RowPaginator {
    pub fn new(
        gateway: Gateway,
        query_id: impl Into<String>,
        row_offset: u64,
        row_limit: u64,
        byte_limit: u64,
        deadline: Deadline,
    ) -> Result<Self, Error> {
        config::validate_row_limit_byte_size(byte_limit)?;
        Ok(Self {
            gateway,
            query_id: query_id.into(),
            row_offset,
            row_limit,
            byte_limit,
            seen: 0,
            current: None,
            current_yielded: false,
            deadline,
        })
    }

    pub async fn next(&mut self, config: &Config) -> Result<Option<QueryResult>, Error> {
        loop {
            if let Some(observer) = &self.current {
                match observer.next_element().await.map_err(|err| {
                    err.with_context(&self.query_id, crate::error::StateLabel::CheckForMoreData, None)
                })? {
                    Some(result) => {
                        self.seen += result.row_count;
                        self.current_yielded = true;
                        return Ok(Some(result));
                    }
                    None if !self.current_yielded => {
                        // A freshly opened page came back with nothing ends
                        // iteration, rather than retrying at the same offset.
                        self.current = None;
                        return Ok(None);
                    }
                    None => {
                        self.current = None;
                    }
                }
            }

            if self.seen >= self.row_limit {
                return Ok(None);
            }

            let omit_schema = self.seen != 0;
            let stream = self
                .gateway
                .get_query_result_by_range(
                    &self.query_id,
                    self.row_offset + self.seen,
                    self.row_limit - self.seen,
                    self.byte_limit,
                    omit_schema,
                    self.deadline.residual_or(config.network_timeout()),
                )
                .await
                .map_err(|source| {
                    Error::transport_fatal(
                        Some(&self.query_id),
                        crate::error::StateLabel::CheckForMoreData,
                        None,
                        source,
                    )
                })?;

            self.current = Some(Observer::new(stream, config.initial_flow_credit()));
            self.current_yielded = false;
        }
    }
}
