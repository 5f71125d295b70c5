use crate::config::Config;
use crate::deadline::Deadline;
use crate::error::{Error, StateLabel};
use crate::gateway::Gateway;
use crate::observer::Observer;
use crate::status::QueryStatus;

/// Reopen attempts permitted, per call to [`wait_for`], after repeated
/// benign `CANCELLED` terminations with no intervening progress before the
/// condition is escalated to a transport-fatal error.
const MAX_STALE_REOPENS: u32 = 3;

/// Streams `GetQueryInfo`, reopening the stream across benign `CANCELLED`
/// terminations, until `predicate` is satisfied or execution finishes
/// without ever satisfying it.
pub async fn wait_for(
    gateway: &Gateway,
    query_id: &str,
    deadline: Deadline,
    config: &Config,
    mut predicate: impl FnMut(&QueryStatus) -> bool,
) -> Result<QueryStatus, Error> {
    let mut last_status: Option<QueryStatus> = None;
    let mut stale_reopens: u32 = 0;

    loop {
        if deadline.has_passed() {
            return Err(Error::deadline_exceeded(
                Some(query_id),
                StateLabel::Poller,
                last_status.as_ref(),
            ));
        }

        let stream = gateway
            .get_query_info(query_id, deadline.residual_or(config.network_timeout()))
            .await
            .map_err(|source| {
                Error::transport_fatal(Some(query_id), StateLabel::Poller, last_status.as_ref(), source)
            })?;
        let observer = Observer::new(stream, config.initial_flow_credit());

        let progress_before_reopen = last_status.clone();
        let mut saw_any_update = false;

        loop {
            if deadline.has_passed() {
                return Err(Error::deadline_exceeded(
                    Some(query_id),
                    StateLabel::Poller,
                    last_status.as_ref(),
                ));
            }

            match observer.next_element().await {
                Ok(Some(info)) => {
                    if info.optional {
                        continue;
                    }
                    let Some(status) = info.status else { continue };
                    let status: QueryStatus = status.into();
                    saw_any_update = true;

                    if predicate(&status) {
                        return Ok(status);
                    }

                    if status.is_execution_finished() {
                        return Err(Error::protocol(
                            Some(query_id),
                            "execution finished without ever satisfying the wait predicate",
                        ));
                    }

                    last_status = Some(status);
                }
                Ok(None) => break,
                Err(Error::TransportFatal { source, .. })
                    if Error::is_benign_cancellation(&source) =>
                {
                    break;
                }
                Err(err) => {
                    return Err(err.with_context(query_id, StateLabel::Poller, last_status.as_ref()));
                }
            }
        }

        let made_progress = match (&progress_before_reopen, &last_status) {
            (Some(before), Some(after)) => {
                after.chunk_count > before.chunk_count
                    || after.row_count > before.row_count
                    || after.completion_status > before.completion_status
            }
            (None, Some(_)) => true,
            _ => saw_any_update,
        };

        if made_progress {
            stale_reopens = 0;
        } else {
            stale_reopens += 1;
            tracing::debug!(
                query_id,
                stale_reopens,
                "status stream reopened without progress"
            );
            if stale_reopens > MAX_STALE_REOPENS {
                return Err(Error::protocol(
                    Some(query_id),
                    format!("status stream reopened {stale_reopens} times without progress"),
                ));
            }
        }
    }
}
