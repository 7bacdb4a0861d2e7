//! End-to-end protocol tests against a running backend service.
//!
//! A bare endpoint plays the frontend: it encodes envelopes by hand and
//! inspects exactly what comes back.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures::StreamExt;
use proven_access_api::{
    AbiVersion, Address, ClientIdentifier, ClientRequestKind, ClientSuccess, CommitPhase,
    DataPath, FrontendIdentifier, FrontendType, LocalHistoryIdentifier, MemberName,
    MessageHeader, OutOfOrder, PersistenceProtocol, Request, RequestEnvelope, RequestException,
    RequestMessage, ResponseEnvelope, ResponseMessage, TransactionIdentifier,
    TransactionModification, TransactionRequestKind, TransactionSuccess, VersionRange, codec,
};
use proven_access_backend::{BackendConfig, BackendService, DataTree, MemoryDataTree};
use proven_access_transport::Transport;
use proven_access_transport_memory::{MemoryNetwork, MemoryTransport};
use tokio::time::timeout;

const SESSION: u64 = 1;

struct RawFrontend {
    transport: MemoryTransport,
    backend: Address,
    client: ClientIdentifier,
    version: AbiVersion,
    next_tx: u64,
}

impl RawFrontend {
    fn new(network: &Arc<MemoryNetwork>) -> Self {
        Self {
            transport: network.endpoint("frontend").unwrap(),
            backend: Address::new("backend"),
            client: ClientIdentifier::new(
                FrontendIdentifier::new(MemberName::new("member-1"), FrontendType::new("test")),
                0,
            ),
            version: AbiVersion::MIN,
            next_tx: 0,
        }
    }

    async fn exchange(&mut self, message: RequestMessage) -> ResponseEnvelope {
        let envelope = RequestEnvelope::new(SESSION, self.next_tx, message);
        self.next_tx += 1;
        self.send(&envelope).await
    }

    async fn send(&self, envelope: &RequestEnvelope) -> ResponseEnvelope {
        let frame = codec::encode_request(envelope).unwrap();
        self.transport.send(&self.backend, frame).await.unwrap();

        let datagram = timeout(Duration::from_secs(5), self.transport.incoming().next())
            .await
            .expect("Timeout waiting for response")
            .expect("Transport closed");
        codec::decode_response(&datagram.payload).unwrap()
    }

    async fn connect(&mut self, versions: VersionRange) -> ResponseEnvelope {
        let request = Request::new(
            MessageHeader::new(self.client.clone(), 0, AbiVersion::MIN),
            self.transport.local_address().clone(),
            ClientRequestKind::Connect { versions },
        );
        let response = self.exchange(RequestMessage::Client(request)).await;
        if let ResponseMessage::Client(r) = &response.message {
            if let Ok(ClientSuccess::Connect { version, .. }) = &r.outcome {
                self.version = *version;
            }
        }
        response
    }

    fn tx(&self, transaction_id: u64) -> TransactionIdentifier {
        TransactionIdentifier::new(
            LocalHistoryIdentifier::standalone(self.client.clone()),
            transaction_id,
        )
    }

    fn tx_request(
        &self,
        transaction_id: u64,
        sequence: u64,
        kind: TransactionRequestKind,
    ) -> RequestMessage {
        RequestMessage::Transaction(Request::new(
            MessageHeader::new(self.tx(transaction_id), sequence, self.version),
            self.transport.local_address().clone(),
            kind,
        ))
    }
}

async fn start_backend(
    network: &Arc<MemoryNetwork>,
    config: BackendConfig,
) -> (BackendService<MemoryTransport>, Arc<MemoryDataTree>) {
    let tree = Arc::new(MemoryDataTree::new());
    let transport = Arc::new(network.endpoint("backend").unwrap());
    let mut service = BackendService::new(transport, tree.clone(), config).unwrap();
    service.start().unwrap();
    (service, tree)
}

fn path(s: &str) -> DataPath {
    s.parse().unwrap()
}

fn write(p: &str, value: &'static [u8], protocol: Option<PersistenceProtocol>) -> TransactionRequestKind {
    TransactionRequestKind::Modify {
        modifications: vec![TransactionModification::Write {
            path: path(p),
            data: Bytes::from_static(value),
        }],
        protocol,
    }
}

fn transaction_outcome(response: &ResponseEnvelope) -> Result<TransactionSuccess, RequestException> {
    match &response.message {
        ResponseMessage::Transaction(r) => r.outcome.clone(),
        other => panic!("Expected a transaction response, got {other:?}"),
    }
}

#[tracing_test::traced_test]
#[tokio::test]
async fn test_version_negotiated_to_backend_maximum() {
    let network = MemoryNetwork::new();
    let config = BackendConfig {
        versions: VersionRange::new(AbiVersion::V1, AbiVersion::V2).unwrap(),
        ..BackendConfig::default()
    };
    let (service, _tree) = start_backend(&network, config).await;
    let mut frontend = RawFrontend::new(&network);

    let response = frontend.connect(VersionRange::all()).await;
    assert_eq!(response.message.version(), AbiVersion::V2);
    assert_eq!(frontend.version, AbiVersion::V2);

    let response = frontend
        .exchange(frontend.tx_request(1, 0, TransactionRequestKind::CreateSnapshot))
        .await;
    assert_eq!(response.message.version(), AbiVersion::V2);
    assert_eq!(
        transaction_outcome(&response),
        Ok(TransactionSuccess::CreateSnapshot)
    );

    service.stop().await;
}

#[tracing_test::traced_test]
#[tokio::test]
async fn test_duplicate_request_is_replayed_not_reapplied() {
    let network = MemoryNetwork::new();
    let (service, tree) = start_backend(&network, BackendConfig::default()).await;
    let mut frontend = RawFrontend::new(&network);
    frontend.connect(VersionRange::all()).await;

    let commit = frontend.tx_request(1, 0, write("/a", b"1", Some(PersistenceProtocol::Simple)));
    let envelope = RequestEnvelope::new(SESSION, frontend.next_tx, commit);
    frontend.next_tx += 1;

    let first = frontend.send(&envelope).await;
    let version = tree.version();
    let second = frontend.send(&envelope).await;

    assert_eq!(transaction_outcome(&first), Ok(TransactionSuccess::Modify));
    assert_eq!(first.message, second.message);
    assert_eq!(tree.version(), version);
    assert_eq!(tree.read_committed(&path("/a")), Some(Bytes::from_static(b"1")));

    service.stop().await;
}

#[tracing_test::traced_test]
#[tokio::test]
async fn test_commit_phase_out_of_order_is_fatal() {
    let network = MemoryNetwork::new();
    let (service, tree) = start_backend(&network, BackendConfig::default()).await;
    let mut frontend = RawFrontend::new(&network);
    frontend.connect(VersionRange::all()).await;

    let prepare = frontend.tx_request(1, 0, write("/a", b"1", Some(PersistenceProtocol::ThreePhase)));
    let response = frontend.exchange(prepare).await;
    assert_eq!(transaction_outcome(&response), Ok(TransactionSuccess::Modify));

    let commit = frontend.tx_request(1, 1, TransactionRequestKind::DoCommit);
    let response = frontend.exchange(commit).await;
    let e = transaction_outcome(&response).unwrap_err();
    assert_eq!(
        e,
        RequestException::OutOfOrderRequest(OutOfOrder::CommitPhase {
            requested: CommitPhase::DoCommit,
            expected: Some(CommitPhase::CanCommit),
        })
    );
    assert!(!e.is_retriable());

    let can_commit = frontend.tx_request(1, 2, TransactionRequestKind::CanCommit);
    let response = frontend.exchange(can_commit).await;
    assert_eq!(
        transaction_outcome(&response),
        Err(RequestException::AbortedTransaction { transaction_id: 1 })
    );
    assert_eq!(tree.read_committed(&path("/a")), None);

    service.stop().await;
}

#[tracing_test::traced_test]
#[tokio::test]
async fn test_request_after_purge_reports_closed() {
    let network = MemoryNetwork::new();
    let (service, _tree) = start_backend(&network, BackendConfig::default()).await;
    let mut frontend = RawFrontend::new(&network);
    frontend.connect(VersionRange::all()).await;

    let commit = frontend.tx_request(1, 0, write("/a", b"1", Some(PersistenceProtocol::Simple)));
    frontend.exchange(commit).await;
    let purge = frontend.tx_request(1, 1, TransactionRequestKind::Purge);
    let response = frontend.exchange(purge).await;
    assert_eq!(transaction_outcome(&response), Ok(TransactionSuccess::Purge));

    let read = frontend.tx_request(
        1,
        2,
        TransactionRequestKind::Read {
            path: path("/a"),
            snapshot_only: false,
        },
    );
    let response = frontend.exchange(read).await;
    assert_eq!(
        transaction_outcome(&response),
        Err(RequestException::ClosedTransaction { successful: true })
    );

    service.stop().await;
}

#[tracing_test::traced_test]
#[tokio::test]
async fn test_undecodable_frames_are_dropped() {
    let network = MemoryNetwork::new();
    let (service, _tree) = start_backend(&network, BackendConfig::default()).await;
    let mut frontend = RawFrontend::new(&network);

    frontend
        .transport
        .send(&frontend.backend, Bytes::from_static(b"\x00\x09garbage"))
        .await
        .unwrap();

    // The backend keeps serving after the bad frame.
    let response = frontend.connect(VersionRange::all()).await;
    assert_eq!(response.message.exception(), None);

    service.stop().await;
}

fn idle_config() -> BackendConfig {
    BackendConfig {
        frontend_idle_timeout: Duration::from_millis(50),
        ..BackendConfig::default()
    }
}

#[tracing_test::traced_test]
#[tokio::test]
async fn test_idle_frontend_is_forgotten() {
    let network = MemoryNetwork::new();
    let (service, _tree) = start_backend(&network, idle_config()).await;
    let mut frontend = RawFrontend::new(&network);
    frontend.connect(VersionRange::all()).await;

    let commit = frontend.tx_request(1, 0, write("/a", b"1", Some(PersistenceProtocol::Simple)));
    frontend.exchange(commit).await;
    let purge = frontend.tx_request(1, 1, TransactionRequestKind::Purge);
    let response = frontend.exchange(purge).await;
    assert_eq!(transaction_outcome(&response), Ok(TransactionSuccess::Purge));

    tokio::time::sleep(Duration::from_millis(300)).await;

    let snapshot = frontend.tx_request(2, 0, TransactionRequestKind::CreateSnapshot);
    let response = frontend.exchange(snapshot).await;
    assert_eq!(
        response.message.exception(),
        Some(&RequestException::OutOfSequenceEnvelope { expected: 0 })
    );

    let response = frontend.connect(VersionRange::all()).await;
    assert_eq!(response.message.exception(), None);

    service.stop().await;
}

#[tracing_test::traced_test]
#[tokio::test]
async fn test_frontend_with_open_transaction_is_kept() {
    let network = MemoryNetwork::new();
    let (service, tree) = start_backend(&network, idle_config()).await;
    let mut frontend = RawFrontend::new(&network);
    frontend.connect(VersionRange::all()).await;

    let open = frontend.tx_request(1, 0, write("/a", b"1", None));
    let response = frontend.exchange(open).await;
    assert_eq!(transaction_outcome(&response), Ok(TransactionSuccess::Modify));

    tokio::time::sleep(Duration::from_millis(300)).await;

    let commit = frontend.tx_request(1, 1, write("/b", b"2", Some(PersistenceProtocol::Simple)));
    let response = frontend.exchange(commit).await;
    assert_eq!(transaction_outcome(&response), Ok(TransactionSuccess::Modify));
    assert_eq!(tree.read_committed(&path("/a")), Some(Bytes::from_static(b"1")));

    service.stop().await;
}
