use std::time::Duration;

use tonic::metadata::MetadataValue;
use tonic::transport::Channel;
use tonic::{Request, Streaming};

use crate::config::Config;
use crate::pb::hyper_service_client::HyperServiceClient;
use crate::pb::{
    CancelQueryRequest, ExecuteQueryRequest, ExecuteQueryResponse, GetQueryInfoRequest,
    GetQueryResultRequest, OutputFormat, QueryInfo, QueryResult, ResultRange, TransferMode,
    get_query_result_request::Selector,
};

const QUERY_ID_HEADER: &str = "x-hyperdb-query-id";

/// Thin wrapper binding a query id to a preconfigured stub. Applies the
/// required `x-hyperdb-query-id` header to every call but the initial
/// `execute_query`, and derives each call's deadline from the residual of
/// the caller's logical deadline and an optional network timeout.
#[derive(Debug, Clone)]
pub struct Gateway {
    client: HyperServiceClient<Channel>,
    config: Config,
}

impl Gateway {
    /// Wraps `client`, raising its inbound/outbound decoding limits to
    /// `config.max_inbound_message_size()` so a single oversized chunk
    /// doesn't get rejected by tonic's default 4 MiB codec cap.
    #[must_use]
    pub fn new(client: HyperServiceClient<Channel>, config: Config) -> Self {
        let limit = config.max_inbound_message_size();
        let client = client
            .max_decoding_message_size(limit)
            .max_encoding_message_size(limit);
        Self { client, config }
    }

    /// Applies this gateway's configured keepalive to an `Endpoint` a caller
    /// is about to build a `Channel` from. Channel/transport construction
    /// itself stays the caller's responsibility; this only ensures the
    /// `keepalive` option in [`Config`] is actually read somewhere rather
    /// than validated and dropped.
    #[must_use]
    pub fn apply_keepalive(config: &Config, endpoint: tonic::transport::Endpoint) -> tonic::transport::Endpoint {
        let keepalive = config.keepalive();
        if !keepalive.enabled {
            return endpoint;
        }
        endpoint
            .http2_keep_alive_interval(keepalive.interval)
            .keep_alive_timeout(keepalive.timeout)
            .keep_alive_while_idle(true)
    }

    fn timeout(&self, residual: Duration) -> Duration {
        match self.config.network_timeout() {
            Some(network_timeout) => residual.min(network_timeout),
            None => residual,
        }
    }

    fn with_query_id<T>(&self, mut request: Request<T>, query_id: &str) -> Request<T> {
        if let Ok(value) = MetadataValue::try_from(query_id) {
            request.metadata_mut().insert(QUERY_ID_HEADER, value);
        }
        request
    }

    pub async fn execute_query(
        &self,
        sql: &str,
        transfer_mode: TransferMode,
        residual: Duration,
        query_timeout: Duration,
        mut query_settings: std::collections::HashMap<String, String>,
        result_range: Option<ResultRange>,
    ) -> tonic::Result<Streaming<ExecuteQueryResponse>> {
        tracing::debug!(rpc = "execute_query", "submitting query");

        // The server's authoritative timeout is the un-graced query timeout,
        // passed as a session setting; `residual` below (which includes the
        // local enforcement grace) only bounds the RPC's own deadline, so
        // the server's timeout fires first and produces the authoritative
        // error. A caller who already set `query_timeout` in query_settings
        // directly is left alone.
        if !query_timeout.is_zero() {
            query_settings
                .entry("query_timeout".to_owned())
                .or_insert_with(|| query_timeout.as_secs().to_string());
        }

        let mut request = Request::new(ExecuteQueryRequest {
            query: sql.to_owned(),
            output_format: OutputFormat::ArrowStreaming as i32,
            transfer_mode: transfer_mode as i32,
            result_range,
            settings: query_settings,
        });
        request.set_timeout(self.timeout(residual));

        let mut client = self.client.clone();
        Ok(client.execute_query(request).await?.into_inner())
    }

    pub async fn get_query_info(
        &self,
        query_id: &str,
        residual: Duration,
    ) -> tonic::Result<Streaming<QueryInfo>> {
        tracing::debug!(rpc = "get_query_info", query_id, "opening status stream");

        let mut request = self.with_query_id(
            Request::new(GetQueryInfoRequest {
                query_id: query_id.to_owned(),
                streaming: true,
                schema_output_format: None,
            }),
            query_id,
        );
        request.set_timeout(self.timeout(residual));

        let mut client = self.client.clone();
        Ok(client.get_query_info(request).await?.into_inner())
    }

    /// Requests a single schema-bearing `QueryInfo` message without opening
    /// a full status-streaming call, for callers that need column metadata
    /// ahead of (or independent of) fetching any result batches.
    pub async fn get_query_schema(
        &self,
        query_id: &str,
        residual: Duration,
    ) -> tonic::Result<Streaming<QueryInfo>> {
        tracing::debug!(rpc = "get_query_schema", query_id, "fetching schema");

        let mut request = self.with_query_id(
            Request::new(GetQueryInfoRequest {
                query_id: query_id.to_owned(),
                streaming: false,
                schema_output_format: Some(OutputFormat::ArrowStreaming as i32),
            }),
            query_id,
        );
        request.set_timeout(self.timeout(residual));

        let mut client = self.client.clone();
        Ok(client.get_query_info(request).await?.into_inner())
    }

    pub async fn get_query_result_by_chunk(
        &self,
        query_id: &str,
        chunk_id: u64,
        omit_schema: bool,
        residual: Duration,
    ) -> tonic::Result<Streaming<QueryResult>> {
        tracing::debug!(rpc = "get_query_result", query_id, chunk_id, "fetching chunk");

        let mut request = self.with_query_id(
            Request::new(GetQueryResultRequest {
                query_id: query_id.to_owned(),
                selector: Some(Selector::ChunkId(chunk_id)),
                omit_schema,
                output_format: OutputFormat::ArrowStreaming as i32,
            }),
            query_id,
        );
        request.set_timeout(self.timeout(residual));

        let mut client = self.client.clone();
        Ok(client.get_query_result(request).await?.into_inner())
    }

    pub async fn get_query_result_by_range(
        &self,
        query_id: &str,
        row_offset: u64,
        row_limit: u64,
        byte_limit: u64,
        omit_schema: bool,
        residual: Duration,
    ) -> tonic::Result<Streaming<QueryResult>> {
        tracing::debug!(
            rpc = "get_query_result",
            query_id,
            row_offset,
            row_limit,
            "fetching row range"
        );

        let mut request = self.with_query_id(
            Request::new(GetQueryResultRequest {
                query_id: query_id.to_owned(),
                selector: Some(Selector::ResultRange(ResultRange {
                    row_offset,
                    row_limit,
                    byte_limit,
                })),
                omit_schema,
                output_format: OutputFormat::ArrowStreaming as i32,
            }),
            query_id,
        );
        request.set_timeout(self.timeout(residual));

        let mut client = self.client.clone();
        Ok(client.get_query_result(request).await?.into_inner())
    }

    pub async fn cancel(&self, query_id: &str) -> tonic::Result<()> {
        tracing::debug!(rpc = "cancel_query", query_id, "cancelling");

        let request = self.with_query_id(
            Request::new(CancelQueryRequest {
                query_id: query_id.to_owned(),
            }),
            query_id,
        );

        let mut client = self.client.clone();
        client.cancel_query(request).await?;
        Ok(())
    }
}
