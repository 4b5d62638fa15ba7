//! End-to-End Protocol Tests
//!
//! Full client/server sessions over localhost: key exchange, encrypted
//! input transfer, masked garbled-circuit rounds, and result delivery.

use std::time::Duration;

use ciphernet::he::EncryptionParameters;
use ciphernet::session::{
    ClientConfig, GcOptions, HeClient, HeServer, InputMode, RetrySchedule, ServerConfig,
    SessionError, ServerSession, SessionResult,
};

fn server_config(params: EncryptionParameters, gc_enabled: bool) -> ServerConfig {
    ServerConfig {
        addr: "127.0.0.1:0".to_string(),
        mpc_addr: "127.0.0.1:0".to_string(),
        params,
        gc: GcOptions {
            enabled: gc_enabled,
            ..GcOptions::default()
        },
        peer_timeout: Some(Duration::from_secs(30)),
    }
}

fn client_config(
    addr: std::net::SocketAddr,
    mpc_addr: std::net::SocketAddr,
    gc_enabled: bool,
    input_mode: InputMode,
) -> ClientConfig {
    ClientConfig {
        addr: addr.to_string(),
        mpc_addr: mpc_addr.to_string(),
        gc: GcOptions {
            enabled: gc_enabled,
            ..GcOptions::default()
        },
        input_mode,
        peer_timeout: Some(Duration::from_secs(30)),
        retry: RetrySchedule::default(),
    }
}

/// Boot a server, drive one session with `drive`, and run one client
/// against it; returns the client's decrypted results.
async fn run_session<F>(
    params: EncryptionParameters,
    gc_enabled: bool,
    input_mode: InputMode,
    inputs: Vec<f64>,
    drive: F,
) -> SessionResult<Vec<f64>>
where
    F: FnOnce(&mut ServerSession) -> SessionResult<()> + Send + 'static,
{
    let server = HeServer::bind(server_config(params, gc_enabled))
        .await
        .expect("bind");
    let addr = server.local_addr().unwrap();
    let mpc_addr = server.mpc_local_addr().unwrap();

    let server_task = tokio::spawn(async move {
        let session = server.accept().await.expect("accept");
        tokio::task::spawn_blocking(move || {
            let mut session = session;
            drive(&mut session)
        })
        .await
        .expect("driver thread")
    });

    let client = HeClient::connect(
        client_config(addr, mpc_addr, gc_enabled, input_mode),
        inputs,
    )
    .await?;
    let results = tokio::task::spawn_blocking(move || client.wait_results())
        .await
        .expect("client thread");

    server_task.await.expect("server task")?;
    results
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_end_to_end_relu_reference_params() {
    // The reference scenario: encrypt at scale 2^30, run the masked ReLU
    // protocol, decrypt, expect exact ReLU up to encryption noise.
    let results = run_session(
        EncryptionParameters::reference(),
        true,
        InputMode::Encrypt,
        vec![1.0, 2.0, -3.0, 0.5],
        |session| {
            let inputs = session.wait_for_inputs(vec![4], true)?;
            let out = session.relu(inputs)?;
            session.send_result(out)
        },
    )
    .await
    .unwrap();

    let expected = [1.0, 2.0, 0.0, 0.5];
    assert_eq!(results.len(), 4);
    for (r, e) in results.iter().zip(&expected) {
        assert!((r - e).abs() < 1e-3, "{r} vs {e}");
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_end_to_end_relu_unpacked() {
    let results = run_session(
        EncryptionParameters::toy(),
        true,
        InputMode::Encrypt,
        vec![0.5, -1.0, 2.0, -0.25],
        |session| {
            let inputs = session.wait_for_inputs(vec![4], false)?;
            let out = session.relu(inputs)?;
            session.send_result(out)
        },
    )
    .await
    .unwrap();

    let expected = [0.5, 0.0, 2.0, 0.0];
    for (r, e) in results.iter().zip(&expected) {
        assert!((r - e).abs() < 1e-2, "{r} vs {e}");
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_end_to_end_bounded_relu() {
    let results = run_session(
        EncryptionParameters::toy(),
        true,
        InputMode::Encrypt,
        vec![0.5, -1.0, 2.0, 1.25],
        |session| {
            let inputs = session.wait_for_inputs(vec![4], true)?;
            let out = session.bounded_relu(inputs, 1.0)?;
            session.send_result(out)
        },
    )
    .await
    .unwrap();

    let expected = [0.5, 0.0, 1.0, 1.0];
    for (r, e) in results.iter().zip(&expected) {
        assert!((r - e).abs() < 1e-2, "{r} vs {e}");
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_end_to_end_max_pool() {
    // Two windows over an unpacked 4-vector; values kept non-negative so
    // the ring-order fold matches the numeric maximum.
    let results = run_session(
        EncryptionParameters::toy(),
        true,
        InputMode::Encrypt,
        vec![0.5, 1.5, 0.25, 1.0],
        |session| {
            let inputs = session.wait_for_inputs(vec![4], false)?;
            let windows = vec![vec![0, 1], vec![2, 3]];
            let out = session.max_pool(&inputs, &windows)?;
            session.send_result(out)
        },
    )
    .await
    .unwrap();

    assert_eq!(results.len(), 2);
    assert!((results[0] - 1.5).abs() < 1e-2, "{}", results[0]);
    assert!((results[1] - 1.0).abs() < 1e-2, "{}", results[1]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_end_to_end_relu_then_max_pool() {
    // Two sequential non-linear operators in one session; the second round
    // must not start before the first one's results are applied. Positive
    // activations keep the ring-order fold aligned with the numeric max.
    let results = run_session(
        EncryptionParameters::toy(),
        true,
        InputMode::Encrypt,
        vec![0.5, 0.25, 1.0, 0.75],
        |session| {
            let inputs = session.wait_for_inputs(vec![4], false)?;
            let activated = session.relu(inputs)?;
            let windows = vec![vec![0, 1], vec![2, 3]];
            let out = session.max_pool(&activated, &windows)?;
            session.send_result(out)
        },
    )
    .await
    .unwrap();

    assert_eq!(results.len(), 2);
    assert!((results[0] - 0.5).abs() < 1e-2, "{}", results[0]);
    assert!((results[1] - 1.0).abs() < 1e-2, "{}", results[1]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_server_side_constant_through_public_key() {
    use ciphernet::ledger::{align, HeTensor, HeValue};

    // The server materializes a bias constant under the client's public
    // key, adds it homomorphically, and only then runs the masked ReLU.
    let results = run_session(
        EncryptionParameters::toy(),
        true,
        InputMode::Encrypt,
        vec![0.5, -1.0, 2.0, -0.1],
        |session| {
            let inputs = session.wait_for_inputs(vec![4], true)?;
            let bias = session.encrypt_constant(&[0.25, 0.25, 0.25, 0.25])?;

            let mut x = inputs.data()[0]
                .as_cipher()
                .expect("encrypted inputs")
                .clone();
            let mut b = bias;
            align(session.backend(), &mut x, &mut b)?;
            let shifted = session.backend().add(&x, &b)?;

            let tensor = HeTensor::new(vec![4, 1], true, vec![HeValue::Cipher(shifted)])?;
            let out = session.relu(tensor)?;
            session.send_result(out)
        },
    )
    .await
    .unwrap();

    let expected = [0.75, 0.0, 2.25, 0.15];
    for (r, e) in results.iter().zip(&expected) {
        assert!((r - e).abs() < 5e-2, "{r} vs {e}");
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_plain_input_mode_short_circuits() {
    // Plaintext inputs never trigger a client round; the server evaluates
    // the operator locally and returns plaintext results.
    let results = run_session(
        EncryptionParameters::toy(),
        true,
        InputMode::Plain,
        vec![1.0, -2.0, 0.25, -0.5],
        |session| {
            let inputs = session.wait_for_inputs(vec![4], true)?;
            let out = session.relu(inputs)?;
            session.send_result(out)
        },
    )
    .await
    .unwrap();

    assert_eq!(results, vec![1.0, 0.0, 0.25, 0.0]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_degraded_mode_without_garbled_circuits() {
    let results = run_session(
        EncryptionParameters::toy(),
        false,
        InputMode::Encrypt,
        vec![1.0, -2.0, 0.25, -0.5],
        |session| {
            let inputs = session.wait_for_inputs(vec![4], true)?;
            let out = session.relu(inputs)?;
            session.send_result(out)
        },
    )
    .await
    .unwrap();

    let expected = [1.0, 0.0, 0.25, 0.0];
    for (r, e) in results.iter().zip(&expected) {
        assert!((r - e).abs() < 1e-2, "{r} vs {e}");
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_silent_peer_times_out() {
    let mut cfg = server_config(EncryptionParameters::toy(), true);
    cfg.peer_timeout = Some(Duration::from_millis(200));
    let server = HeServer::bind(cfg).await.unwrap();
    let addr = server.local_addr().unwrap();

    // A client that connects and then never speaks.
    let _silent = tokio::net::TcpStream::connect(addr).await.unwrap();
    let session = server.accept().await.unwrap();

    let err = tokio::task::spawn_blocking(move || {
        let mut session = session;
        session.wait_for_handshake()
    })
    .await
    .unwrap()
    .unwrap_err();
    assert!(matches!(err, SessionError::PeerTimeout));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_peer_disconnect_aborts_session() {
    let mut cfg = server_config(EncryptionParameters::toy(), true);
    cfg.peer_timeout = None; // wait indefinitely; disconnect must wake us
    let server = HeServer::bind(cfg).await.unwrap();
    let addr = server.local_addr().unwrap();

    let doomed = tokio::net::TcpStream::connect(addr).await.unwrap();
    let session = server.accept().await.unwrap();
    drop(doomed);

    let err = tokio::task::spawn_blocking(move || {
        let mut session = session;
        session.wait_for_handshake()
    })
    .await
    .unwrap()
    .unwrap_err();
    assert!(matches!(err, SessionError::SessionAborted));
}

#[tokio::test]
async fn test_connect_retry_gives_up() {
    // Port 1 has no listener; bounded retry must surface the failure.
    let cfg = ClientConfig {
        addr: "127.0.0.1:1".to_string(),
        mpc_addr: "127.0.0.1:1".to_string(),
        gc: GcOptions::default(),
        input_mode: InputMode::Encrypt,
        peer_timeout: Some(Duration::from_secs(1)),
        retry: RetrySchedule {
            initial: Duration::from_millis(1),
            max: Duration::from_millis(10),
            max_attempts: Some(3),
        },
    };
    let err = HeClient::connect(cfg, vec![1.0]).await.unwrap_err();
    assert!(matches!(err, SessionError::Io(_)));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_client_outlives_slow_server_start() {
    // Client begins connecting before the server binds; backoff carries it.
    let probe = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = probe.local_addr().unwrap();
    drop(probe);

    let client_task = tokio::spawn(async move {
        let cfg = ClientConfig {
            addr: addr.to_string(),
            mpc_addr: "127.0.0.1:1".to_string(), // unused: plain input mode
            gc: GcOptions::default(),
            input_mode: InputMode::Plain,
            peer_timeout: Some(Duration::from_secs(30)),
            retry: RetrySchedule {
                initial: Duration::from_millis(20),
                max: Duration::from_millis(200),
                max_attempts: Some(100),
            },
        };
        let client = HeClient::connect(cfg, vec![2.0, -1.0]).await?;
        tokio::task::spawn_blocking(move || client.wait_results())
            .await
            .expect("client thread")
    });

    tokio::time::sleep(Duration::from_millis(300)).await;
    let server = HeServer::bind(ServerConfig {
        addr: addr.to_string(),
        mpc_addr: "127.0.0.1:0".to_string(),
        params: EncryptionParameters::toy(),
        gc: GcOptions::default(),
        peer_timeout: Some(Duration::from_secs(30)),
    })
    .await
    .unwrap();
    let session = server.accept().await.unwrap();
    tokio::task::spawn_blocking(move || {
        let mut session = session;
        let inputs = session.wait_for_inputs(vec![2], true)?;
        let out = session.relu(inputs)?;
        session.send_result(out)
    })
    .await
    .unwrap()
    .unwrap();

    let results = client_task.await.unwrap().unwrap();
    assert_eq!(results, vec![2.0, 0.0]);
}
