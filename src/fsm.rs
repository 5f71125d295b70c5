use std::time::Duration;

use crate::config::Config;
use crate::deadline::Deadline;
use crate::error::{Error, StateLabel};
use crate::gateway::Gateway;
use crate::observer::Observer;
use crate::pb::{ExecuteQueryResponse, QueryInfo, QueryResult, TransferMode};
use crate::status::QueryStatus;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    ProcessExecuteQueryStream,
    CheckForMoreData,
    ProcessQueryResultStream,
    ProcessQueryInfoStream,
    Completed,
}

/// Drives a single logical result stream by multiplexing the execute,
/// status and chunk-fetch RPC streams behind one `next()` call. See the
/// state-transition table for the full contract; in short: results stream
/// directly off the execute call while it lasts, then the FSM alternates
/// between polling status and fetching numbered chunks until the server
/// reports all results produced and every chunk has been retrieved.
pub struct AdaptiveQueryIterator {
    gateway: Gateway,
    query_id: String,
    status: QueryStatus,
    high_water: u64,
    state: State,
    buffer: Option<QueryResult>,
    deadline: Deadline,
    execute_observer: Option<Observer<ExecuteQueryResponse>>,
    info_observer: Option<Observer<QueryInfo>>,
    result_observer: Option<Observer<QueryResult>>,
    /// Whether the execute stream ever yielded a chunk-0 batch inline.
    /// `high_water` is seeded assuming it always will; if the execute
    /// stream ends (normally or via a benign cancellation) without ever
    /// producing one, `high_water` is rewound so `CHECK_FOR_MORE_DATA`
    /// fetches chunk 0 through the result-stream path instead of skipping
    /// it (see the empty-first-chunk edge case).
    any_chunk_observed: bool,
}

impl AdaptiveQueryIterator {
    /// Submits `sql` for execution and synchronously consumes the first
    /// message of the resulting stream, which the protocol guarantees is a
    /// `QueryInfo` carrying the query id. A failure here is a submission
    /// error, surfaced before the caller ever calls `next()`.
    pub async fn submit(
        gateway: Gateway,
        sql: &str,
        transfer_mode: TransferMode,
        config: &Config,
    ) -> Result<Self, Error> {
        let deadline = if config.query_timeout().is_zero() {
            Deadline::never()
        } else {
            Deadline::starting_now(config.query_timeout() + config.local_enforcement_grace())
        };

        let stream = gateway
            .execute_query(
                sql,
                transfer_mode,
                deadline.residual_or(config.network_timeout()),
                config.query_timeout(),
                config.query_settings().clone(),
                None,
            )
            .await
            .map_err(|source| {
                Error::submission(
                    source.message().to_owned(),
                    sql,
                    config.include_customer_detail_in_reason(),
                    source.clone(),
                )
            })?;

        let execute_observer = Observer::new(stream, config.initial_flow_credit());

        let mut fsm = Self {
            gateway,
            query_id: String::new(),
            status: QueryStatus {
                query_id: String::new(),
                chunk_count: 0,
                row_count: 0,
                progress: 0.0,
                completion_status: crate::status::CompletionStatus::Running,
            },
            high_water: 1,
            state: State::ProcessExecuteQueryStream,
            buffer: None,
            deadline,
            execute_observer: Some(execute_observer),
            info_observer: None,
            result_observer: None,
            any_chunk_observed: false,
        };

        // Consume messages up to and including the first status update so
        // the query id is available immediately and submission failures
        // surface here rather than at first iteration.
        loop {
            let Some(response) = fsm
                .execute_observer
                .as_ref()
                .expect("execute stream present during submission")
                .next_element()
                .await?
            else {
                return Err(Error::protocol(None, "execute stream ended before a query id was observed"));
            };

            if response.optional {
                continue;
            }

            match response.message {
                Some(crate::pb::execute_query_response::Message::QueryInfo(info)) => {
                    if let Some(status) = info.status {
                        fsm.status = status.into();
                        fsm.query_id = fsm.status.query_id.clone();
                        if fsm.status.chunk_count == 0 && fsm.status.all_results_produced() {
                            fsm.transition_to(State::Completed);
                        }
                        break;
                    }
                }
                Some(crate::pb::execute_query_response::Message::QueryResult(_)) => {
                    return Err(Error::protocol(
                        None,
                        "execute stream yielded a result batch before a query id",
                    ));
                }
                None => {}
            }
        }

        Ok(fsm)
    }

    #[must_use]
    pub fn query_id(&self) -> &str {
        &self.query_id
    }

    #[must_use]
    pub fn status(&self) -> &QueryStatus {
        &self.status
    }

    fn network_residual(&self, config: &Config) -> Duration {
        self.deadline.residual_or(config.network_timeout())
    }

    /// Returns the next result batch, or `None` once every chunk has been
    /// delivered and the server has confirmed no more results are coming.
    pub async fn next(&mut self, config: &Config) -> Result<Option<QueryResult>, Error> {
        loop {
            if let Some(batch) = self.buffer.take() {
                return Ok(Some(batch));
            }

            if matches!(self.state, State::Completed) {
                return Ok(None);
            }

            if self.deadline.has_passed() {
                return Err(Error::deadline_exceeded(
                    Some(&self.query_id),
                    self.current_label(),
                    Some(&self.status),
                ));
            }

            self.step(config).await?;
        }
    }

    /// Moves to `to`, tracing the transition with the query id so the full
    /// state path a query took can be reconstructed from logs alone.
    fn transition_to(&mut self, to: State) {
        tracing::trace!(
            query_id = self.query_id,
            from = ?self.state,
            to = ?to,
            "state transition"
        );
        self.state = to;
    }

    fn current_label(&self) -> StateLabel {
        match self.state {
            State::ProcessExecuteQueryStream => StateLabel::ProcessExecuteQueryStream,
            State::CheckForMoreData => StateLabel::CheckForMoreData,
            State::ProcessQueryResultStream => StateLabel::ProcessQueryResultStream,
            State::ProcessQueryInfoStream => StateLabel::ProcessQueryInfoStream,
            State::Completed => StateLabel::CheckForMoreData,
        }
    }

    async fn step(&mut self, config: &Config) -> Result<(), Error> {
        match self.state {
            State::ProcessExecuteQueryStream => self.step_execute_stream().await,
            State::CheckForMoreData => self.step_check_for_more_data(config).await,
            State::ProcessQueryResultStream => self.step_result_stream().await,
            State::ProcessQueryInfoStream => self.step_info_stream().await,
            State::Completed => Ok(()),
        }
    }

    async fn step_execute_stream(&mut self) -> Result<(), Error> {
        let observer = self
            .execute_observer
            .as_ref()
            .expect("execute stream present while in ProcessExecuteQueryStream");

        match observer.next_element().await {
            Ok(Some(response)) => {
                if response.optional {
                    return Ok(());
                }
                match response.message {
                    Some(crate::pb::execute_query_response::Message::QueryInfo(info)) => {
                        if let Some(status) = info.status {
                            self.status = status.into();
                        }
                    }
                    Some(crate::pb::execute_query_response::Message::QueryResult(result)) => {
                        self.any_chunk_observed = true;
                        self.buffer = Some(result);
                    }
                    None => {}
                }
                Ok(())
            }
            Ok(None) => {
                self.execute_observer = None;
                self.rewind_high_water_if_chunk_zero_missing();
                self.transition_to(State::CheckForMoreData);
                Ok(())
            }
            Err(Error::TransportFatal { source, .. }) if Error::is_benign_cancellation(&source) => {
                tracing::debug!(
                    query_id = self.query_id,
                    "execute stream ended with benign CANCELLED"
                );
                self.execute_observer = None;
                self.rewind_high_water_if_chunk_zero_missing();
                self.transition_to(State::CheckForMoreData);
                Ok(())
            }
            Err(err) => Err(err.with_context(&self.query_id, self.current_label(), Some(&self.status))),
        }
    }

    fn rewind_high_water_if_chunk_zero_missing(&mut self) {
        if !self.any_chunk_observed && self.high_water > 0 {
            self.high_water = 0;
        }
    }

    async fn step_check_for_more_data(&mut self, config: &Config) -> Result<(), Error> {
        if self.high_water < self.status.chunk_count {
            let next = self.high_water;
            self.high_water += 1;

            let stream = self
                .gateway
                .get_query_result_by_chunk(
                    &self.query_id,
                    next,
                    next != 0,
                    self.network_residual(config),
                )
                .await
                .map_err(|source| {
                    Error::transport_fatal(Some(&self.query_id), StateLabel::CheckForMoreData, Some(&self.status), source)
                })?;

            self.result_observer = Some(Observer::new(stream, config.initial_flow_credit()));
            self.transition_to(State::ProcessQueryResultStream);
        } else if !self.status.all_results_produced() {
            let stream = self
                .gateway
                .get_query_info(&self.query_id, self.network_residual(config))
                .await
                .map_err(|source| {
                    Error::transport_fatal(Some(&self.query_id), StateLabel::CheckForMoreData, Some(&self.status), source)
                })?;

            self.info_observer = Some(Observer::new(stream, config.initial_flow_credit()));
            self.transition_to(State::ProcessQueryInfoStream);
        } else {
            self.transition_to(State::Completed);
        }

        Ok(())
    }

    async fn step_result_stream(&mut self) -> Result<(), Error> {
        let observer = self
            .result_observer
            .as_ref()
            .expect("result stream present while in ProcessQueryResultStream");

        match observer.next_element().await {
            Ok(Some(result)) => {
                self.buffer = Some(result);
                Ok(())
            }
            Ok(None) => {
                self.result_observer = None;
                self.transition_to(State::CheckForMoreData);
                Ok(())
            }
            Err(err) => Err(err.with_context(&self.query_id, self.current_label(), Some(&self.status))),
        }
    }

    async fn step_info_stream(&mut self) -> Result<(), Error> {
        let observer = self
            .info_observer
            .as_ref()
            .expect("info stream present while in ProcessQueryInfoStream");

        match observer.next_element().await {
            Ok(Some(info)) => {
                if info.optional {
                    return Ok(());
                }
                if let Some(status) = info.status {
                    self.status = status.into();
                    if self.status.has_more_chunks(self.high_water) {
                        self.info_observer = None;
                        self.transition_to(State::CheckForMoreData);
                    }
                }
                Ok(())
            }
            Ok(None) => {
                self.info_observer = None;
                self.transition_to(State::CheckForMoreData);
                Ok(())
            }
            Err(Error::TransportFatal { source, .. }) if Error::is_benign_cancellation(&source) => {
                tracing::debug!(
                    query_id = self.query_id,
                    "status stream ended with benign CANCELLED"
                );
                self.info_observer = None;
                self.transition_to(State::CheckForMoreData);
                Ok(())
            }
            Err(err) => Err(err.with_context(&self.query_id, self.current_label(), Some(&self.status))),
        }
    }

    /// Cancels any in-flight stream and marks the iterator terminal.
    pub fn close(&mut self) {
        if let Some(o) = self.execute_observer.take() {
            o.close();
        }
        if let Some(o) = self.info_observer.take() {
            o.close();
        }
        if let Some(o) = self.result_observer.take() {
            o.close();
        }
        self.transition_to(State::Completed);
    }
}
