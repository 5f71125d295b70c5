use std::fmt::{Debug, Display};

use thiserror::Error as ThisError;

use crate::status::QueryStatus;

/// The state label an [`Error`] was raised from, for errors originating in the
/// adaptive query FSM or the status poller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateLabel {
    ProcessExecuteQueryStream,
    CheckForMoreData,
    ProcessQueryResultStream,
    ProcessQueryInfoStream,
    Poller,
}

impl Display for StateLabel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::ProcessExecuteQueryStream => "PROCESS_EXECUTE_QUERY_STREAM",
            Self::CheckForMoreData => "CHECK_FOR_MORE_DATA",
            Self::ProcessQueryResultStream => "PROCESS_QUERY_RESULT_STREAM",
            Self::ProcessQueryInfoStream => "PROCESS_QUERY_INFO_STREAM",
            Self::Poller => "POLLER",
        };
        f.write_str(s)
    }
}

/// Taxonomy of errors the core can surface, per the failure-kind table in the
/// top-level design notes: submission-time failures, fatal transport errors,
/// deadline exceeded, client-side invalid arguments, protocol violations.
#[derive(Debug, ThisError)]
pub enum Error {
    #[error("query submission failed: {message}")]
    Submission {
        /// The terse primary message, with the SQL clause already folded in
        /// when the caller's `Config::include_customer_detail_in_reason`
        /// opted into carrying it.
        message: String,
        /// The submitted SQL text, always retained structurally regardless
        /// of whether it was folded into `message`.
        sql: String,
        #[source]
        source: tonic::Status,
    },

    #[error("transport error in state {state} for query {query_id:?}: {source}")]
    TransportFatal {
        query_id: Option<String>,
        state: StateLabel,
        last_status: Option<QueryStatus>,
        #[source]
        source: tonic::Status,
    },

    #[error("deadline exceeded in state {state} for query {query_id:?}")]
    DeadlineExceeded {
        query_id: Option<String>,
        state: StateLabel,
        last_status: Option<QueryStatus>,
    },

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("protocol violation for query {query_id:?}: {message}")]
    Protocol {
        query_id: Option<String>,
        message: String,
    },

    #[error("observer is already awaiting a pending element")]
    IllegalState,

    #[error("transport channel error: {0}")]
    Transport(#[from] tonic::transport::Error),
}

impl Error {
    /// Builds a submission-time error, including the submitted SQL in the
    /// primary message only when `include_customer_detail` is set (spec's
    /// "inclusion of customer detail in the primary message is gated by
    /// configuration").
    pub(crate) fn submission(message: impl Into<String>, sql: &str, include_customer_detail: bool, source: tonic::Status) -> Self {
        let message = message.into();
        let message = if include_customer_detail {
            format!("{message} (sql: {sql})")
        } else {
            message
        };
        Self::Submission {
            message,
            sql: sql.to_owned(),
            source,
        }
    }

    pub(crate) fn transport_fatal(
        query_id: Option<&str>,
        state: StateLabel,
        last_status: Option<&QueryStatus>,
        source: tonic::Status,
    ) -> Self {
        Self::TransportFatal {
            query_id: query_id.map(str::to_owned),
            state,
            last_status: last_status.cloned(),
            source,
        }
    }

    pub(crate) fn deadline_exceeded(
        query_id: Option<&str>,
        state: StateLabel,
        last_status: Option<&QueryStatus>,
    ) -> Self {
        Self::DeadlineExceeded {
            query_id: query_id.map(str::to_owned),
            state,
            last_status: last_status.cloned(),
        }
    }

    pub(crate) fn protocol(query_id: Option<&str>, message: impl Into<String>) -> Self {
        Self::Protocol {
            query_id: query_id.map(str::to_owned),
            message: message.into(),
        }
    }

    /// Transport statuses the server uses as a benign end-of-stream marker
    /// rather than a genuine failure, centralized here so the FSM and poller
    /// share one definition (see design note on benign cancellation).
    pub(crate) fn is_benign_cancellation(status: &tonic::Status) -> bool {
        status.code() == tonic::Code::Cancelled
    }

    /// Re-stamps a transport error raised by the generic buffering layer
    /// (which has no knowledge of which phase it was fetched for) with the
    /// calling phase's query id, state label and last known status. The
    /// status may be absent (no update observed yet, or the caller never
    /// tracks one at all). Other error kinds pass through unchanged.
    pub(crate) fn with_context(
        self,
        query_id: &str,
        state: StateLabel,
        last_status: Option<&QueryStatus>,
    ) -> Self {
        match self {
            Self::TransportFatal { source, .. } => Self::TransportFatal {
                query_id: Some(query_id.to_owned()),
                state,
                last_status: last_status.cloned(),
                source,
            },
            other => other,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
