//! Server side: listener, per-session network tasks, and the blocking
//! driver API the evaluation loop calls.
//!
//! A session owns exactly one connection; the server creates a fresh
//! session per accepted client. The reader task dispatches each inbound
//! message to the purpose-specific channel the evaluation thread blocks on;
//! dropping the session tears down both tasks and the sockets.

use std::sync::mpsc::{Receiver, RecvTimeoutError, SyncSender};
use std::time::{Duration, Instant};

use rand_chacha::ChaCha20Rng;
use tokio::net::TcpListener;
use tokio::sync::mpsc::{unbounded_channel, UnboundedSender};
use tracing::{debug, error, info, warn};

use ciphernet_bridge::ServerBridge;
use ciphernet_gc::{GcParty, GcRole, TcpChannel};
use ciphernet_he::sampling::fresh_rng;
use ciphernet_he::{Ciphertext, HeBackend, Plaintext, PublicKey};
use ciphernet_ledger::{HeTensor, HeValue};
use ciphernet_wire::{read_message, write_message, Message, RoundHeader};

use crate::config::ServerConfig;
use crate::errors::SessionError;
use crate::{SessionResult, MAX_ROUND_ELEMENTS};

/// Kind tag for non-linear round replies.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum ReplyKind {
    Relu,
    BoundedRelu,
    MaxPool,
}

/// Listening server; hands out one [`ServerSession`] per connection.
pub struct HeServer {
    listener: TcpListener,
    mpc_listener: std::net::TcpListener,
    cfg: ServerConfig,
}

impl HeServer {
    pub async fn bind(cfg: ServerConfig) -> SessionResult<Self> {
        cfg.validate()?;
        let listener = TcpListener::bind(&cfg.addr).await?;
        let mpc_listener = std::net::TcpListener::bind(&cfg.mpc_addr)?;
        info!(
            addr = %listener.local_addr()?,
            mpc_addr = %mpc_listener.local_addr()?,
            "server listening"
        );
        Ok(Self {
            listener,
            mpc_listener,
            cfg,
        })
    }

    pub fn local_addr(&self) -> SessionResult<std::net::SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    pub fn mpc_local_addr(&self) -> SessionResult<std::net::SocketAddr> {
        Ok(self.mpc_listener.local_addr()?)
    }

    /// Accept the next client and start its session: spawn the network
    /// tasks and queue the parameter message.
    pub async fn accept(&self) -> SessionResult<ServerSession> {
        let (stream, peer) = self.listener.accept().await?;
        stream.set_nodelay(true)?;
        info!(%peer, "session accepted");
        ServerSession::start(stream, self.cfg.clone(), self.mpc_listener.try_clone()?)
    }
}

/// One inference session, driven by the caller's evaluation thread.
pub struct ServerSession {
    cfg: ServerConfig,
    backend: HeBackend,
    outbound: UnboundedSender<Message>,
    handshake_rx: Receiver<PublicKey>,
    inputs_rx: Receiver<HeTensor>,
    rounds_rx: Receiver<(RoundHeader, ReplyKind, HeTensor)>,
    public_key: Option<PublicKey>,
    bridge: ServerBridge,
    gc_party: Option<GcParty>,
    mpc_listener: std::net::TcpListener,
    round_counter: u64,
    rng: ChaCha20Rng,
}

impl ServerSession {
    fn start(
        stream: tokio::net::TcpStream,
        cfg: ServerConfig,
        mpc_listener: std::net::TcpListener,
    ) -> SessionResult<Self> {
        let backend = HeBackend::new(cfg.params.clone())?;
        let (mut read_half, mut write_half) = stream.into_split();
        let (outbound, mut outbound_rx) = unbounded_channel::<Message>();

        // Writer task: drains the evaluation thread's outbound queue.
        tokio::spawn(async move {
            while let Some(msg) = outbound_rx.recv().await {
                if let Err(e) = write_message(&mut write_half, &msg).await {
                    error!(error = %e, "session write failed");
                    break;
                }
            }
        });

        // Bounded at 1: the protocol is lock-step, anything deeper means
        // the peer is running ahead of the evaluation loop.
        let (handshake_tx, handshake_rx) = std::sync::mpsc::sync_channel(1);
        let (inputs_tx, inputs_rx) = std::sync::mpsc::sync_channel(1);
        let (rounds_tx, rounds_rx) = std::sync::mpsc::sync_channel(2);

        // Reader task: dispatches inbound messages in arrival order.
        tokio::spawn(async move {
            loop {
                let msg = match read_message(&mut read_half).await {
                    Ok(m) => m,
                    Err(e) => {
                        info!(error = %e, "session reader stopped");
                        break;
                    }
                };
                let dispatched = dispatch(msg, &handshake_tx, &inputs_tx, &rounds_tx);
                if let Err(kind) = dispatched {
                    error!(kind, "dropping session on unexpected message");
                    break;
                }
            }
            // Dropping the senders wakes the evaluation thread with
            // SessionAborted.
        });

        let session = Self {
            backend,
            outbound,
            handshake_rx,
            inputs_rx,
            rounds_rx,
            public_key: None,
            bridge: ServerBridge::new(cfg.gc.bridge_config()),
            gc_party: None,
            mpc_listener,
            round_counter: 0,
            rng: fresh_rng(),
            cfg,
        };
        // Key exchange starts immediately.
        session.send(Message::EncryptionParameters {
            params: session.cfg.params.clone(),
        })?;
        Ok(session)
    }

    pub fn backend(&self) -> &HeBackend {
        &self.backend
    }

    /// The client's public key, once the handshake completed.
    pub fn public_key(&self) -> Option<&PublicKey> {
        self.public_key.as_ref()
    }

    /// Block until the client's key material has arrived.
    pub fn wait_for_handshake(&mut self) -> SessionResult<()> {
        if self.public_key.is_none() {
            let key = recv_with_timeout(&self.handshake_rx, self.cfg.peer_timeout)?;
            debug!("client public key received");
            self.public_key = Some(key);
        }
        Ok(())
    }

    /// Request the client's inputs for the given shape and block until the
    /// encrypted tensor arrives.
    pub fn wait_for_inputs(&mut self, shape: Vec<usize>, packed: bool) -> SessionResult<HeTensor> {
        self.wait_for_handshake()?;
        let expected: usize = shape.iter().product::<usize>().max(1);
        self.send(Message::InferenceShape { shape, packed })?;
        let tensor = recv_with_timeout(&self.inputs_rx, self.cfg.peer_timeout)?;
        let got = tensor.element_count() * tensor.batch_size();
        if got != expected {
            return Err(SessionError::Protocol(format!(
                "client sent {got} input values, function expects {expected}"
            )));
        }
        info!(elements = tensor.element_count(), batch = tensor.batch_size(), "inputs received");
        Ok(tensor)
    }

    /// Materialize plaintext values as a ciphertext under the client's
    /// public key — the tag change that lets a plaintext operand flow
    /// through cipher-only code paths.
    pub fn encrypt_constant(&mut self, values: &[f64]) -> SessionResult<Ciphertext> {
        self.wait_for_handshake()?;
        let key = self.public_key.as_ref().expect("handshake stored the key");
        let scale = self.backend.params().scale;
        Ok(self
            .backend
            .encrypt_with_public(key, values, scale, &mut self.rng)?)
    }

    /// ReLU over a tensor. Plaintext elements are evaluated locally; the
    /// ciphertext remainder goes through masked client rounds in chunks.
    pub fn relu(&mut self, tensor: HeTensor) -> SessionResult<HeTensor> {
        self.elementwise_rounds(tensor, false, None)
    }

    /// Bounded ReLU (clip to `bound`).
    pub fn bounded_relu(&mut self, tensor: HeTensor, bound: f64) -> SessionResult<HeTensor> {
        self.elementwise_rounds(tensor, true, Some(bound))
    }

    fn elementwise_rounds(
        &mut self,
        mut tensor: HeTensor,
        bounded: bool,
        bound: Option<f64>,
    ) -> SessionResult<HeTensor> {
        let garbled = self.cfg.gc.enabled;
        let mut cipher_idx = Vec::with_capacity(tensor.element_count());
        for (idx, value) in tensor.data_mut().iter_mut().enumerate() {
            match value {
                HeValue::Plain(p) => {
                    let mapped: Vec<f64> = p
                        .values
                        .iter()
                        .map(|&v| match bound {
                            Some(b) => v.clamp(0.0, b),
                            None => v.max(0.0),
                        })
                        .collect();
                    value.set_plaintext(Plaintext::new(mapped));
                }
                HeValue::Cipher(_) => cipher_idx.push(idx),
            }
        }
        debug!(
            total = tensor.element_count(),
            encrypted = cipher_idx.len(),
            bounded,
            "relu operator"
        );

        let batch_size = tensor.batch_size();
        for chunk in cipher_idx.chunks(MAX_ROUND_ELEMENTS) {
            let mut batch: Vec<HeValue> = chunk
                .iter()
                .map(|&i| tensor.data()[i].clone())
                .collect();
            if garbled {
                self.bridge
                    .prepare_relu(&self.backend, &mut batch, bounded, &mut self.rng)?;
            }

            let round = self.next_round(garbled);
            let wire_tensor = HeTensor::new(vec![batch_size, chunk.len()], true, batch)?;
            let (request, expect) = if bounded {
                (
                    Message::BoundedReluRequest {
                        round,
                        bound: bound.expect("bounded round carries a bound"),
                        tensor: wire_tensor,
                    },
                    ReplyKind::BoundedRelu,
                )
            } else {
                (
                    Message::ReluRequest {
                        round,
                        tensor: wire_tensor,
                    },
                    ReplyKind::Relu,
                )
            };
            self.send(request)?;

            if garbled {
                self.run_server_circuit(bound)?;
            }

            let mut replies = self.expect_reply(round, expect, chunk.len())?;
            if garbled {
                self.bridge.post_process(&self.backend, &mut replies)?;
            }
            for (&idx, reply) in chunk.iter().zip(replies) {
                tensor.set(idx, reply);
            }
        }
        Ok(tensor)
    }

    /// Max-pool: `windows[w]` lists the element indices feeding output
    /// window `w`. Windows of equal size share one vectorized round.
    pub fn max_pool(
        &mut self,
        tensor: &HeTensor,
        windows: &[Vec<usize>],
    ) -> SessionResult<HeTensor> {
        if windows.is_empty() || windows.iter().any(|w| w.is_empty()) {
            return Err(SessionError::Protocol("empty max-pool window list".into()));
        }
        let garbled = self.cfg.gc.enabled;
        let batch_size = tensor.batch_size();
        let mut out: Vec<Option<HeValue>> = vec![None; windows.len()];

        // Group windows by size; each size class is one vectorized round.
        let mut by_size: std::collections::BTreeMap<usize, Vec<usize>> = Default::default();
        for (w, indices) in windows.iter().enumerate() {
            by_size.entry(indices.len()).or_default().push(w);
        }

        for (window, group) in by_size {
            // All-plaintext groups never leave the server.
            let all_plain = group.iter().all(|&w| {
                windows[w]
                    .iter()
                    .all(|&i| tensor.data()[i].is_plaintext())
            });
            if all_plain {
                for &w in &group {
                    let mut acc = vec![f64::NEG_INFINITY; batch_size];
                    for &i in &windows[w] {
                        let p = tensor.data()[i].as_plain().expect("checked plaintext");
                        for (a, &v) in acc.iter_mut().zip(&p.values) {
                            *a = a.max(v);
                        }
                    }
                    out[w] = Some(HeValue::Plain(Plaintext::new(acc)));
                }
                continue;
            }

            // Element-major flattening: lane = elem * group_len + window.
            let mut batch = Vec::with_capacity(window * group.len());
            for elem in 0..window {
                for &w in &group {
                    batch.push(tensor.data()[windows[w][elem]].clone());
                }
            }
            if garbled {
                self.bridge.prepare_max_pool(
                    &self.backend,
                    &mut batch,
                    window,
                    group.len(),
                    &mut self.rng,
                )?;
            }

            let round = self.next_round(garbled);
            let wire_tensor =
                HeTensor::new(vec![batch_size, window * group.len()], true, batch)?;
            self.send(Message::MaxPoolRequest {
                round,
                window,
                tensor: wire_tensor,
            })?;

            if garbled {
                self.run_server_circuit(None)?;
            }

            let mut replies = self.expect_reply(round, ReplyKind::MaxPool, group.len())?;
            if garbled {
                self.bridge.post_process(&self.backend, &mut replies)?;
            }
            for (&w, reply) in group.iter().zip(replies) {
                out[w] = Some(reply);
            }
        }

        let elements: Vec<HeValue> = out
            .into_iter()
            .map(|v| v.expect("every window produced"))
            .collect();
        Ok(HeTensor::new(
            vec![batch_size, windows.len()],
            true,
            elements,
        )?)
    }

    /// Deliver the encrypted result to the client.
    pub fn send_result(&mut self, tensor: HeTensor) -> SessionResult<()> {
        info!(elements = tensor.element_count(), "sending inference result");
        self.send(Message::InferenceResult { tensor })
    }

    fn send(&self, message: Message) -> SessionResult<()> {
        self.outbound
            .send(message)
            .map_err(|_| SessionError::SessionAborted)
    }

    fn next_round(&mut self, garbled: bool) -> RoundHeader {
        let index = self.round_counter;
        self.round_counter += 1;
        RoundHeader { index, garbled }
    }

    fn run_server_circuit(&mut self, bound: Option<f64>) -> SessionResult<()> {
        self.ensure_gc_party()?;
        let party = self.gc_party.as_mut().expect("party just ensured");
        self.bridge.execute(party, bound)?;
        Ok(())
    }

    /// The 2PC connection is established lazily on the first garbled round;
    /// the client connects after it has seen the first request.
    fn ensure_gc_party(&mut self) -> SessionResult<()> {
        if self.gc_party.is_some() {
            return Ok(());
        }
        let stream = accept_with_deadline(&self.mpc_listener, self.cfg.peer_timeout)?;
        let channel = TcpChannel::new(stream, self.cfg.peer_timeout)?;
        let party = GcParty::new(GcRole::Garbler, self.cfg.gc.gc_config(), Box::new(channel))?;
        info!("2PC channel established");
        self.gc_party = Some(party);
        Ok(())
    }

    fn expect_reply(
        &mut self,
        round: RoundHeader,
        kind: ReplyKind,
        expected_elements: usize,
    ) -> SessionResult<Vec<HeValue>> {
        let (got_round, got_kind, tensor) =
            recv_with_timeout(&self.rounds_rx, self.cfg.peer_timeout)?;
        if got_round.index != round.index || got_kind != kind {
            return Err(SessionError::Protocol(format!(
                "expected {kind:?} reply for round {}, got {got_kind:?} for round {}",
                round.index, got_round.index
            )));
        }
        let replies = tensor.into_data();
        if replies.len() != expected_elements {
            return Err(SessionError::Protocol(format!(
                "round {} reply has {} elements, expected {expected_elements}",
                round.index,
                replies.len()
            )));
        }
        Ok(replies)
    }
}

fn dispatch(
    msg: Message,
    handshake_tx: &SyncSender<PublicKey>,
    inputs_tx: &SyncSender<HeTensor>,
    rounds_tx: &SyncSender<(RoundHeader, ReplyKind, HeTensor)>,
) -> Result<(), &'static str> {
    let kind = msg.kind();
    // try_send keeps the reader non-blocking: the protocol is lock-step, so
    // a full channel means the peer is running ahead of the evaluation loop.
    let ok = match msg {
        Message::PublicKey { key } => handshake_tx.try_send(key).is_ok(),
        Message::EvaluationKey { key_bytes } => {
            // Kept for wire compatibility; this backend never key-switches.
            warn!(bytes = key_bytes.len(), "ignoring evaluation key");
            true
        }
        Message::Execute { tensor } => inputs_tx.try_send(tensor).is_ok(),
        Message::ReluResult { round, tensor } => {
            rounds_tx.try_send((round, ReplyKind::Relu, tensor)).is_ok()
        }
        Message::BoundedReluResult { round, tensor } => rounds_tx
            .try_send((round, ReplyKind::BoundedRelu, tensor))
            .is_ok(),
        Message::MaxPoolResult { round, tensor } => {
            rounds_tx.try_send((round, ReplyKind::MaxPool, tensor)).is_ok()
        }
        Message::ResultRequest => {
            debug!("client requested the result");
            true
        }
        _ => return Err(kind),
    };
    if ok {
        Ok(())
    } else {
        // Evaluation side is gone; stop reading.
        Err("session closed")
    }
}

fn recv_with_timeout<T>(rx: &Receiver<T>, timeout: Option<Duration>) -> SessionResult<T> {
    match timeout {
        Some(t) => rx.recv_timeout(t).map_err(|e| match e {
            RecvTimeoutError::Timeout => SessionError::PeerTimeout,
            RecvTimeoutError::Disconnected => SessionError::SessionAborted,
        }),
        None => rx.recv().map_err(|_| SessionError::SessionAborted),
    }
}

/// Blocking accept honoring the session's peer timeout.
fn accept_with_deadline(
    listener: &std::net::TcpListener,
    timeout: Option<Duration>,
) -> SessionResult<std::net::TcpStream> {
    match timeout {
        None => {
            listener.set_nonblocking(false)?;
            let (stream, _) = listener.accept()?;
            Ok(stream)
        }
        Some(t) => {
            listener.set_nonblocking(true)?;
            let deadline = Instant::now() + t;
            loop {
                match listener.accept() {
                    Ok((stream, _)) => {
                        stream.set_nonblocking(false)?;
                        return Ok(stream);
                    }
                    Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                        if Instant::now() >= deadline {
                            return Err(SessionError::PeerTimeout);
                        }
                        std::thread::sleep(Duration::from_millis(5));
                    }
                    Err(e) => return Err(e.into()),
                }
            }
        }
    }
}
