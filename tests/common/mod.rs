//! In-process fake `HyperService` used to exercise the adaptive iterator,
//! paginators and status poller against scripted RPC responses without a
//! real query engine.

use std::collections::VecDeque;
use std::net::SocketAddr;

use hyperdb_client_core::pb::hyper_service_server::{HyperService, HyperServiceServer};
use hyperdb_client_core::pb::{
    CancelQueryRequest, CancelQueryResponse, ExecuteQueryRequest, ExecuteQueryResponse,
    GetQueryInfoRequest, GetQueryResultRequest, QueryInfo, QueryResult,
};
use tokio::net::TcpListener;
use tokio::sync::{mpsc, Mutex};
use tokio_stream::wrappers::{ReceiverStream, TcpListenerStream};
use tonic::{Request, Response, Status};

type Script<T> = Mutex<VecDeque<Vec<Result<T, Status>>>>;

/// A scripted server: each RPC kind has a queue of "call scripts" consumed
/// in call order. A call beyond the queued scripts gets an empty stream.
#[derive(Default)]
pub struct FakeHyper {
    execute: Script<ExecuteQueryResponse>,
    info: Script<QueryInfo>,
    result: Script<QueryResult>,
    pub cancelled: Mutex<Vec<String>>,
}

fn spawn_scripted<T: Send + 'static>(items: Vec<Result<T, Status>>) -> ReceiverStream<Result<T, Status>> {
    let (tx, rx) = mpsc::channel(items.len().max(1));
    tokio::spawn(async move {
        for item in items {
            if tx.send(item).await.is_err() {
                break;
            }
        }
    });
    ReceiverStream::new(rx)
}

impl FakeHyper {
    pub fn push_execute_script(&mut self, items: Vec<Result<ExecuteQueryResponse, Status>>) {
        self.execute.get_mut().push_back(items);
    }

    pub fn push_info_script(&mut self, items: Vec<Result<QueryInfo, Status>>) {
        self.info.get_mut().push_back(items);
    }

    pub fn push_result_script(&mut self, items: Vec<Result<QueryResult, Status>>) {
        self.result.get_mut().push_back(items);
    }
}

#[tonic::async_trait]
impl HyperService for FakeHyper {
    type ExecuteQueryStream = ReceiverStream<Result<ExecuteQueryResponse, Status>>;
    type GetQueryInfoStream = ReceiverStream<Result<QueryInfo, Status>>;
    type GetQueryResultStream = ReceiverStream<Result<QueryResult, Status>>;

    async fn execute_query(
        &self,
        _request: Request<ExecuteQueryRequest>,
    ) -> Result<Response<Self::ExecuteQueryStream>, Status> {
        let items = self.execute.lock().await.pop_front().unwrap_or_default();
        Ok(Response::new(spawn_scripted(items)))
    }

    async fn get_query_info(
        &self,
        _request: Request<GetQueryInfoRequest>,
    ) -> Result<Response<Self::GetQueryInfoStream>, Status> {
        let items = self.info.lock().await.pop_front().unwrap_or_default();
        Ok(Response::new(spawn_scripted(items)))
    }

    async fn get_query_result(
        &self,
        _request: Request<GetQueryResultRequest>,
    ) -> Result<Response<Self::GetQueryResultStream>, Status> {
        let items = self.result.lock().await.pop_front().unwrap_or_default();
        Ok(Response::new(spawn_scripted(items)))
    }

    async fn cancel_query(
        &self,
        request: Request<CancelQueryRequest>,
    ) -> Result<Response<CancelQueryResponse>, Status> {
        self.cancelled
            .lock()
            .await
            .push(request.into_inner().query_id);
        Ok(Response::new(CancelQueryResponse {}))
    }
}

/// Starts `fake` on an ephemeral localhost port and returns a connected
/// gateway client plus the server's address.
pub async fn start(fake: FakeHyper) -> (hyperdb_client_core::Gateway, SocketAddr) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        tonic::transport::Server::builder()
            .add_service(HyperServiceServer::new(fake))
            .serve_with_incoming(TcpListenerStream::new(listener))
            .await
            .unwrap();
    });

    // give the listener a moment to start accepting.
    tokio::time::sleep(std::time::Duration::from_millis(20)).await;

    let channel = tonic::transport::Endpoint::from_shared(format!("http://{addr}"))
        .unwrap()
        .connect()
        .await
        .unwrap();

    let client = hyperdb_client_core::pb::hyper_service_client::HyperServiceClient::new(channel);
    let gateway = hyperdb_client_core::Gateway::new(client, hyperdb_client_core::Config::builder().build().unwrap());
    (gateway, addr)
}

pub fn query_info(
    query_id: &str,
    chunk_count: u64,
    row_count: u64,
    completion_status: hyperdb_client_core::pb::CompletionStatus,
) -> QueryInfo {
    QueryInfo {
        status: Some(hyperdb_client_core::pb::QueryStatus {
            query_id: query_id.to_owned(),
            chunk_count,
            row_count,
            progress: 1.0,
            completion_status: completion_status as i32,
        }),
        schema: None,
        optional: false,
    }
}

pub fn exec_info(
    query_id: &str,
    chunk_count: u64,
    row_count: u64,
    completion_status: hyperdb_client_core::pb::CompletionStatus,
) -> ExecuteQueryResponse {
    ExecuteQueryResponse {
        message: Some(hyperdb_client_core::pb::execute_query_response::Message::QueryInfo(
            query_info(query_id, chunk_count, row_count, completion_status),
        )),
        optional: false,
    }
}

pub fn exec_result(row_count: u64) -> ExecuteQueryResponse {
    ExecuteQueryResponse {
        message: Some(hyperdb_client_core::pb::execute_query_response::Message::QueryResult(
            QueryResult {
                data: vec![],
                row_count,
            },
        )),
        optional: false,
    }
}

pub fn chunk_result(row_count: u64) -> QueryResult {
    QueryResult {
        data: vec![],
        row_count,
    }
}
