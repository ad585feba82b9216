use std::net::Ipv4Addr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;

use wsdriver::tls::TlsConfiguration;
use wsdriver::{
    ClientBootstrap, ClientConnection, ClientFactory, ConnectRequest, ConnectState,
    ConnectionListener, Endpoint, Error, Frame, FrameSink, SelectionKey, WebSocketConnection,
    WebSocketPolicy,
};

const KEY: SelectionKey = SelectionKey { selector: 0, id: 7 };

#[derive(Default)]
struct RecordingListener {
    opened: Mutex<Vec<WebSocketConnection>>,
}

impl RecordingListener {
    fn opened(&self) -> Vec<WebSocketConnection> {
        self.opened.lock().unwrap().clone()
    }
}

impl ConnectionListener for RecordingListener {
    fn connection_opened(&self, connection: &WebSocketConnection) {
        self.opened.lock().unwrap().push(connection.clone());
    }
}

async fn socket_pair() -> (TcpStream, TcpStream) {
    let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (client, server) = tokio::join!(TcpStream::connect(addr), listener.accept());
    (client.unwrap(), server.unwrap().0)
}

fn tls_configuration() -> TlsConfiguration {
    let config = rustls::ClientConfig::builder_with_provider(Arc::new(
        rustls::crypto::ring::default_provider(),
    ))
    .with_safe_default_protocol_versions()
    .unwrap()
    .with_root_certificates(rustls::RootCertStore::empty())
    .with_no_client_auth();
    TlsConfiguration::from(config)
}

fn channel_sink() -> (Arc<dyn FrameSink>, mpsc::UnboundedReceiver<Frame>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let sink: Arc<dyn FrameSink> = Arc::new(move |frame: Frame| {
        let _ = tx.send(frame);
    });
    (sink, rx)
}

fn factory(policy: WebSocketPolicy) -> Arc<ClientFactory> {
    Arc::new(ClientFactory::builder().policy(policy).build().unwrap())
}

#[tokio::test]
async fn plain_scheme_returns_the_websocket_connection() {
    let factory = factory(WebSocketPolicy::default());
    let bootstrap = ClientBootstrap::from_factory(&factory);
    let listener = RecordingListener::default();
    let (sink, _frames) = channel_sink();

    let (request, _future) =
        ConnectRequest::new("ws://host:80/chat".parse().unwrap(), sink.clone(), factory)
            .unwrap();

    let (client, _server) = socket_pair().await;
    let endpoint = bootstrap.new_endpoint(client, KEY).unwrap();
    let connection = bootstrap
        .new_connection(endpoint, &request, &listener)
        .unwrap();

    let ClientConnection::WebSocket {
        connection,
        endpoint,
    } = connection
    else {
        panic!("expected a plain websocket connection");
    };

    assert!(!connection.is_secure());
    assert_eq!(
        connection.idle_timeout(),
        WebSocketPolicy::default().idle_timeout()
    );
    assert!(Arc::ptr_eq(connection.parser().incoming_frames(), &sink));
    assert_eq!(endpoint.connection().map(|c| c.id()), Some(connection.id()));

    let opened = listener.opened();
    assert_eq!(opened.len(), 1);
    assert_eq!(opened[0].id(), connection.id());
    assert!(matches!(request.state(), ConnectState::Pending));
}

#[tokio::test]
async fn scheme_match_is_case_insensitive() {
    let factory = factory(WebSocketPolicy::default());
    let bootstrap = ClientBootstrap::from_factory(&factory);
    bootstrap.set_tls_configuration(tls_configuration());
    let listener = RecordingListener::default();
    let (sink, _frames) = channel_sink();

    let (plain, _) =
        ConnectRequest::new("WS://host/".parse().unwrap(), sink.clone(), factory.clone())
            .unwrap();
    let (secure, _) = ConnectRequest::new("WsS://host/".parse().unwrap(), sink, factory).unwrap();

    let (a, _sa) = socket_pair().await;
    let (b, _sb) = socket_pair().await;

    let plain = bootstrap
        .new_connection(bootstrap.new_endpoint(a, KEY).unwrap(), &plain, &listener)
        .unwrap();
    let secure = bootstrap
        .new_connection(bootstrap.new_endpoint(b, KEY).unwrap(), &secure, &listener)
        .unwrap();

    assert!(!plain.is_secure());
    assert!(secure.is_secure());
}

#[tokio::test]
async fn secure_scheme_returns_the_tls_connection() {
    let factory = factory(WebSocketPolicy::default());
    let bootstrap = ClientBootstrap::from_factory(&factory);
    bootstrap.set_tls_configuration(tls_configuration());
    let listener = RecordingListener::default();
    let (sink, _frames) = channel_sink();

    let (request, _future) =
        ConnectRequest::new("wss://host:443/chat".parse().unwrap(), sink.clone(), factory)
            .unwrap();

    let (client, _server) = socket_pair().await;
    let endpoint = bootstrap.new_endpoint(client, KEY).unwrap();
    let connection = bootstrap
        .new_connection(endpoint, &request, &listener)
        .unwrap();

    let ClientConnection::Tls(tunnel) = connection else {
        panic!("expected a tls connection");
    };

    let decrypted = tunnel.decrypted_endpoint();
    assert!(decrypted.is_secure());
    assert!(decrypted.tls_info().is_none(), "no handshake should have happened");

    let bound = decrypted.connection().expect("decrypted endpoint has a connection");
    assert!(bound.is_secure());
    assert!(Arc::ptr_eq(bound.parser().incoming_frames(), &sink));

    let opened = listener.opened();
    assert_eq!(opened.len(), 1);
    assert_eq!(opened[0].id(), bound.id());
}

#[tokio::test]
async fn secure_scheme_without_tls_fails_the_request() {
    let factory = factory(WebSocketPolicy::default());
    let bootstrap = ClientBootstrap::from_factory(&factory);
    let listener = RecordingListener::default();
    let (sink, _frames) = channel_sink();

    let (request, future) =
        ConnectRequest::new("wss://host:443/chat".parse().unwrap(), sink, factory).unwrap();

    let (client, _server) = socket_pair().await;
    let endpoint = bootstrap.new_endpoint(client, KEY).unwrap();
    let error = bootstrap
        .new_connection(endpoint, &request, &listener)
        .unwrap_err();

    assert!(matches!(error, Error::SecureTransportUnavailable));
    assert!(error.is_configuration());
    assert!(listener.opened().is_empty());
    assert!(matches!(
        request.state(),
        ConnectState::Failed(Error::SecureTransportUnavailable)
    ));
    assert!(!request.failed(Error::Closed), "request completes only once");

    assert!(matches!(
        future.await,
        Err(Error::SecureTransportUnavailable)
    ));
}

#[tokio::test]
async fn tls_engine_targets_the_socket_peer() {
    let factory = factory(WebSocketPolicy::default());
    let bootstrap = ClientBootstrap::from_factory(&factory);
    let tls = tls_configuration();
    bootstrap.set_tls_configuration(tls.clone());
    let listener = RecordingListener::default();
    let (sink, _frames) = channel_sink();

    // The URI names a host which resolves elsewhere; the socket is what counts.
    let (request, _future) = ConnectRequest::new(
        "wss://virtual.example.test:443/chat".parse().unwrap(),
        sink,
        factory,
    )
    .unwrap();

    let (client, server) = socket_pair().await;
    let peer = server.local_addr().unwrap();
    let endpoint = bootstrap.new_endpoint(client, KEY).unwrap();

    let engine = bootstrap.new_tls_engine(&tls, &endpoint, &request).unwrap();
    assert_eq!(engine.peer(), peer);
    assert_eq!(
        engine.server_name(),
        &rustls::pki_types::ServerName::try_from("virtual.example.test").unwrap()
    );

    let ClientConnection::Tls(tunnel) = bootstrap
        .new_connection(endpoint, &request, &listener)
        .unwrap()
    else {
        panic!("expected a tls connection");
    };
    assert_eq!(tunnel.peer(), peer);
    assert_ne!(tunnel.peer().port(), 443);
}

#[tokio::test]
async fn connection_uses_the_request_factory() {
    let bootstrap_factory =
        factory(WebSocketPolicy::new().with_idle_timeout(Duration::from_secs(10)));
    let request_factory =
        factory(WebSocketPolicy::new().with_idle_timeout(Duration::from_secs(42)));
    let bootstrap = ClientBootstrap::from_factory(&bootstrap_factory);
    let listener = RecordingListener::default();
    let (sink, _frames) = channel_sink();

    let (request, _future) =
        ConnectRequest::new("ws://host/".parse().unwrap(), sink, request_factory).unwrap();

    let (client, _server) = socket_pair().await;
    let endpoint = bootstrap.new_endpoint(client, KEY).unwrap();
    assert_eq!(endpoint.idle_timeout(), Some(Duration::from_secs(10)));

    let connection = bootstrap
        .new_connection(endpoint, &request, &listener)
        .unwrap();
    let websocket = connection.websocket().unwrap();
    assert_eq!(websocket.idle_timeout(), Some(Duration::from_secs(42)));
}

#[tokio::test]
async fn engine_construction_error_fails_the_request() {
    let factory = factory(WebSocketPolicy::default());
    let bootstrap = ClientBootstrap::from_factory(&factory);
    bootstrap.set_tls_configuration(tls_configuration());
    let listener = RecordingListener::default();
    let (sink, _frames) = channel_sink();

    let (request, future) =
        ConnectRequest::new("wss://host:443/chat".parse().unwrap(), sink, factory).unwrap();

    let (client, server) = socket_pair().await;
    let endpoint = bootstrap.new_endpoint(client, KEY).unwrap();

    // Reset the connection so the socket no longer has a peer address.
    #[allow(deprecated)]
    server.set_linger(Some(Duration::ZERO)).unwrap();
    drop(server);
    tokio::time::timeout(Duration::from_secs(5), endpoint.get_ref().readable())
        .await
        .expect("reset observed")
        .unwrap();

    let error = bootstrap
        .new_connection(endpoint, &request, &listener)
        .unwrap_err();

    assert!(matches!(error, Error::Io(_)), "got {error:?}");
    assert!(listener.opened().is_empty());
    assert!(matches!(request.state(), ConnectState::Failed(Error::Io(_))));
    assert!(!request.failed(Error::Closed), "request completes only once");
    assert!(matches!(request.state(), ConnectState::Failed(Error::Io(_))));

    assert!(matches!(future.await, Err(Error::Io(_))));
}

struct EagerListener;

impl ConnectionListener for EagerListener {
    fn connection_opened(&self, connection: &WebSocketConnection) {
        connection
            .parser()
            .incoming_frame(Frame::text("early"))
            .unwrap();
    }
}

#[tokio::test]
async fn frames_delivered_during_open_reach_the_sink() {
    let factory = factory(WebSocketPolicy::default());
    let bootstrap = ClientBootstrap::from_factory(&factory);
    bootstrap.set_tls_configuration(tls_configuration());

    for uri in ["ws://host/", "wss://host/"] {
        let (sink, mut frames) = channel_sink();
        let (request, _future) =
            ConnectRequest::new(uri.parse().unwrap(), sink, factory.clone()).unwrap();

        let (client, _server) = socket_pair().await;
        let endpoint = bootstrap.new_endpoint(client, KEY).unwrap();
        let _connection = bootstrap
            .new_connection(endpoint, &request, &EagerListener)
            .unwrap();

        let frame = tokio::time::timeout(Duration::from_secs(5), frames.recv())
            .await
            .expect("frame delivered")
            .unwrap();
        assert_eq!(frame, Frame::text("early"));
    }
}

#[tokio::test]
async fn bootstrapping_twice_is_rejected() {
    let factory = factory(WebSocketPolicy::default());
    let bootstrap = ClientBootstrap::from_factory(&factory);
    let listener = RecordingListener::default();
    let (sink, _frames) = channel_sink();
    let (other, _other_frames) = channel_sink();

    let (request, _future) =
        ConnectRequest::new("ws://host/".parse().unwrap(), sink.clone(), factory).unwrap();

    let (a, _sa) = socket_pair().await;
    let (b, _sb) = socket_pair().await;
    let first = bootstrap
        .new_connection(bootstrap.new_endpoint(a, KEY).unwrap(), &request, &listener)
        .unwrap();
    let second =
        bootstrap.new_connection(bootstrap.new_endpoint(b, KEY).unwrap(), &request, &listener);

    assert!(matches!(second, Err(Error::AlreadyBootstrapped)));
    assert_eq!(listener.opened().len(), 1);

    let bound = first.websocket().unwrap().parser().incoming_frames();
    assert!(Arc::ptr_eq(bound, &sink));
    assert!(!Arc::ptr_eq(bound, &other));
}

#[tokio::test]
async fn endpoint_binds_one_connection() {
    let factory = factory(WebSocketPolicy::default());
    let bootstrap = ClientBootstrap::from_factory(&factory);
    let (sink, _frames) = channel_sink();
    let (request, _future) =
        ConnectRequest::new("ws://host/".parse().unwrap(), sink, factory).unwrap();

    let (client, _server) = socket_pair().await;
    let mut endpoint = bootstrap.new_endpoint(client, KEY).unwrap();

    let connection = bootstrap.new_websocket_connection(&endpoint, &request);
    endpoint.set_connection(connection.clone()).unwrap();
    assert!(matches!(
        endpoint.set_connection(connection),
        Err(Error::AlreadyBound)
    ));
}
