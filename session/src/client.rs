//! Client side: connect with backoff, answer the server's protocol, and
//! hand the decrypted result to the caller.
//!
//! The async read pump forwards every inbound message into a channel; a
//! dedicated worker thread owns all key material and processes messages in
//! arrival order. Blocking inside the worker (decryption, the 2PC
//! subprotocol) therefore never stalls the socket.

use std::sync::mpsc::{Receiver, RecvTimeoutError, Sender};
use std::time::Duration;

use rand_chacha::ChaCha20Rng;
use tokio::net::TcpStream;
use tokio::sync::mpsc::{unbounded_channel, UnboundedSender};
use tracing::{debug, error, info, warn};

use ciphernet_bridge::ClientBridge;
use ciphernet_gc::{GcParty, GcRole, TcpChannel};
use ciphernet_he::sampling::fresh_rng;
use ciphernet_he::{HeBackend, KeyPair};
use ciphernet_ledger::{HeTensor, HeValue};
use ciphernet_wire::{read_message, write_message, Message, RoundHeader};

use crate::config::{ClientConfig, InputMode};
use crate::errors::SessionError;
use crate::SessionResult;

/// Handle to a running client session.
#[derive(Debug)]
pub struct HeClient {
    results_rx: Receiver<SessionResult<Vec<f64>>>,
}

impl HeClient {
    /// Connect (retrying with exponential backoff), start the session
    /// worker, and return immediately. Results arrive via
    /// [`HeClient::wait_results`].
    pub async fn connect(cfg: ClientConfig, inputs: Vec<f64>) -> SessionResult<Self> {
        cfg.validate()?;
        let stream = connect_with_backoff(&cfg).await?;
        stream.set_nodelay(true)?;
        info!(addr = %cfg.addr, "connected to server");

        let (mut read_half, mut write_half) = stream.into_split();
        let (outbound, mut outbound_rx) = unbounded_channel::<Message>();
        tokio::spawn(async move {
            while let Some(msg) = outbound_rx.recv().await {
                if let Err(e) = write_message(&mut write_half, &msg).await {
                    error!(error = %e, "client write failed");
                    break;
                }
            }
        });

        let (fwd_tx, fwd_rx) = std::sync::mpsc::channel::<Message>();
        tokio::spawn(async move {
            loop {
                match read_message(&mut read_half).await {
                    Ok(msg) => {
                        if fwd_tx.send(msg).is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        info!(error = %e, "client reader stopped");
                        break;
                    }
                }
            }
        });

        let (results_tx, results_rx) = std::sync::mpsc::channel();
        let worker = ClientWorker {
            cfg,
            inputs,
            outbound,
            backend: None,
            keys: None,
            gc_party: None,
            rng: fresh_rng(),
        };
        std::thread::spawn(move || worker.run(fwd_rx, results_tx));

        Ok(Self { results_rx })
    }

    /// Block until the inference result (or a session failure) arrives.
    pub fn wait_results(&self) -> SessionResult<Vec<f64>> {
        self.results_rx
            .recv()
            .unwrap_or(Err(SessionError::SessionAborted))
    }
}

async fn connect_with_backoff(cfg: &ClientConfig) -> SessionResult<TcpStream> {
    let mut delay = cfg.retry.initial;
    let mut attempts = 0u32;
    loop {
        match TcpStream::connect(&cfg.addr).await {
            Ok(stream) => return Ok(stream),
            Err(e) => {
                attempts += 1;
                if let Some(max) = cfg.retry.max_attempts {
                    if attempts >= max {
                        return Err(SessionError::Io(e));
                    }
                }
                warn!(error = %e, ?delay, "server not ready, retrying");
                tokio::time::sleep(delay).await;
                delay = (delay * 2).min(cfg.retry.max);
            }
        }
    }
}

struct ClientWorker {
    cfg: ClientConfig,
    inputs: Vec<f64>,
    outbound: UnboundedSender<Message>,
    backend: Option<HeBackend>,
    keys: Option<KeyPair>,
    gc_party: Option<GcParty>,
    rng: ChaCha20Rng,
}

impl ClientWorker {
    fn run(mut self, fwd_rx: Receiver<Message>, results_tx: Sender<SessionResult<Vec<f64>>>) {
        loop {
            let msg = match recv_with_timeout(&fwd_rx, self.cfg.peer_timeout) {
                Ok(m) => m,
                Err(e) => {
                    let _ = results_tx.send(Err(e));
                    return;
                }
            };
            match self.handle(msg) {
                Ok(Some(results)) => {
                    let _ = results_tx.send(Ok(results));
                    return;
                }
                Ok(None) => {}
                Err(e) => {
                    error!(error = %e, "client session failed");
                    let _ = results_tx.send(Err(e));
                    return;
                }
            }
        }
    }

    /// Returns the decrypted results once the server delivers them.
    fn handle(&mut self, msg: Message) -> SessionResult<Option<Vec<f64>>> {
        match msg {
            Message::EncryptionParameters { params } => {
                params
                    .validate()
                    .map_err(|e| SessionError::Config(e.to_string()))?;
                let backend = HeBackend::new(params)?;
                let keys = backend.generate_keys(&mut self.rng);
                debug!("parameters accepted, keys generated");
                self.send(Message::PublicKey {
                    key: keys.public.clone(),
                })?;
                self.backend = Some(backend);
                self.keys = Some(keys);
                Ok(None)
            }
            Message::InferenceShape { shape, packed } => {
                let tensor = self.encode_inputs(shape, packed)?;
                self.send(Message::Execute { tensor })?;
                self.send(Message::ResultRequest)?;
                Ok(None)
            }
            Message::ReluRequest { round, tensor } => {
                self.answer_relu(round, tensor, false, None)?;
                Ok(None)
            }
            Message::BoundedReluRequest {
                round,
                bound,
                tensor,
            } => {
                self.answer_relu(round, tensor, true, Some(bound))?;
                Ok(None)
            }
            Message::MaxPoolRequest {
                round,
                window,
                tensor,
            } => {
                self.answer_max_pool(round, window, tensor)?;
                Ok(None)
            }
            Message::InferenceResult { tensor } => Ok(Some(self.decrypt_result(tensor)?)),
            other => Err(SessionError::Protocol(format!(
                "unexpected message '{}' from server",
                other.kind()
            ))),
        }
    }

    fn send(&self, message: Message) -> SessionResult<()> {
        self.outbound
            .send(message)
            .map_err(|_| SessionError::SessionAborted)
    }

    fn backend(&self) -> SessionResult<&HeBackend> {
        self.backend
            .as_ref()
            .ok_or_else(|| SessionError::Protocol("request before parameter exchange".into()))
    }

    fn encode_inputs(&mut self, shape: Vec<usize>, packed: bool) -> SessionResult<HeTensor> {
        let expected: usize = shape.iter().product::<usize>().max(1);
        if self.inputs.len() != expected {
            return Err(SessionError::Config(format!(
                "{} input values supplied, function expects {expected}",
                self.inputs.len()
            )));
        }
        let plain = HeTensor::from_plain_values(shape, packed, &self.inputs)?;
        match self.cfg.input_mode {
            InputMode::Plain => {
                info!("sending plaintext inputs");
                Ok(plain)
            }
            InputMode::Encrypt => {
                let backend = self
                    .backend
                    .as_ref()
                    .ok_or_else(|| {
                        SessionError::Protocol("inference request before parameters".into())
                    })?;
                let keys = self.keys.as_ref().expect("keys exist with backend");
                let scale = backend.params().scale;
                let mut elements = Vec::with_capacity(plain.element_count());
                for value in plain.data() {
                    let p = value.as_plain().expect("fresh plaintext tensor");
                    let ct =
                        backend.encrypt(&keys.secret, &p.values, scale, false, &mut self.rng)?;
                    elements.push(HeValue::Cipher(ct));
                }
                info!(elements = elements.len(), "sending encrypted inputs");
                Ok(HeTensor::new(
                    plain.shape().to_vec(),
                    plain.is_packed(),
                    elements,
                )?)
            }
        }
    }

    fn answer_relu(
        &mut self,
        round: RoundHeader,
        tensor: HeTensor,
        bounded: bool,
        bound: Option<f64>,
    ) -> SessionResult<()> {
        debug!(round = round.index, garbled = round.garbled, bounded, "relu request");
        let mut batch = tensor.into_data();
        if round.garbled {
            self.ensure_gc_party()?;
            let backend = self.backend.as_ref().expect("checked by ensure_gc_party");
            let keys = self.keys.as_ref().expect("keys exist with backend");
            let bridge = ClientBridge::new(self.cfg.gc.bridge_config());
            let party = self.gc_party.as_mut().expect("party just ensured");
            bridge.run_relu(
                backend,
                &keys.secret,
                &mut batch,
                bounded,
                party,
                &mut self.rng,
            )?;
        } else {
            // Degraded-privacy fallback: evaluate on decrypted values.
            let backend = self.backend.as_ref().ok_or_else(|| {
                SessionError::Protocol("request before parameter exchange".into())
            })?;
            let keys = self.keys.as_ref().expect("keys exist with backend");
            for value in batch.iter_mut() {
                let ct = value
                    .as_cipher()
                    .ok_or_else(|| SessionError::Protocol("relu round over plaintext".into()))?;
                let scale = ct.scale();
                let mapped: Vec<f64> = backend
                    .decrypt(&keys.secret, ct)?
                    .into_iter()
                    .map(|v| match bound {
                        Some(b) => v.clamp(0.0, b),
                        None => v.max(0.0),
                    })
                    .collect();
                let fresh =
                    backend.encrypt(&keys.secret, &mapped, scale, false, &mut self.rng)?;
                value.set_ciphertext(fresh);
            }
        }

        let count = batch.len();
        let batch_size = batch.first().map(HeValue::batch_size).unwrap_or(1);
        let reply = HeTensor::new(vec![batch_size, count], true, batch)?;
        let message = if bounded {
            Message::BoundedReluResult {
                round,
                tensor: reply,
            }
        } else {
            Message::ReluResult {
                round,
                tensor: reply,
            }
        };
        self.send(message)
    }

    fn answer_max_pool(
        &mut self,
        round: RoundHeader,
        window: usize,
        tensor: HeTensor,
    ) -> SessionResult<()> {
        debug!(round = round.index, window, "max-pool request");
        let mut batch = tensor.into_data();
        if round.garbled {
            self.ensure_gc_party()?;
            let backend = self.backend.as_ref().expect("checked by ensure_gc_party");
            let keys = self.keys.as_ref().expect("keys exist with backend");
            let bridge = ClientBridge::new(self.cfg.gc.bridge_config());
            let party = self.gc_party.as_mut().expect("party just ensured");
            bridge.run_max_pool(
                backend,
                &keys.secret,
                &mut batch,
                window,
                party,
                &mut self.rng,
            )?;
        } else {
            batch = self.plain_max_pool(&batch, window)?;
        }

        let count = batch.len();
        let batch_size = batch.first().map(HeValue::batch_size).unwrap_or(1);
        let reply = HeTensor::new(vec![batch_size, count], true, batch)?;
        self.send(Message::MaxPoolResult {
            round,
            tensor: reply,
        })
    }

    /// Fallback max over decrypted values; windows are element-major.
    fn plain_max_pool(&mut self, batch: &[HeValue], window: usize) -> SessionResult<Vec<HeValue>> {
        if window == 0 || batch.len() % window != 0 {
            return Err(SessionError::Protocol(format!(
                "{} elements do not divide into windows of {window}",
                batch.len()
            )));
        }
        let backend = self.backend.as_ref().ok_or_else(|| {
            SessionError::Protocol("request before parameter exchange".into())
        })?;
        let keys = self.keys.as_ref().expect("keys exist with backend");
        let num_windows = batch.len() / window;
        let mut decrypted = Vec::with_capacity(batch.len());
        let mut scale = backend.params().scale;
        for value in batch {
            let ct = value
                .as_cipher()
                .ok_or_else(|| SessionError::Protocol("max-pool round over plaintext".into()))?;
            scale = ct.scale();
            decrypted.push(backend.decrypt(&keys.secret, ct)?);
        }
        let batch_size = decrypted[0].len();
        let mut out = Vec::with_capacity(num_windows);
        for w in 0..num_windows {
            let mut acc = vec![f64::NEG_INFINITY; batch_size];
            for elem in 0..window {
                let vals = &decrypted[elem * num_windows + w];
                for (a, &v) in acc.iter_mut().zip(vals) {
                    *a = a.max(v);
                }
            }
            let ct = backend.encrypt(&keys.secret, &acc, scale, false, &mut self.rng)?;
            out.push(HeValue::Cipher(ct));
        }
        Ok(out)
    }

    fn decrypt_result(&self, tensor: HeTensor) -> SessionResult<Vec<f64>> {
        let backend = self.backend()?;
        let keys = self.keys.as_ref().expect("keys exist with backend");
        let element_count = tensor.element_count();
        let batch = tensor.batch_size();
        let mut out = vec![0.0; element_count * batch];
        for (j, value) in tensor.data().iter().enumerate() {
            let values = match value {
                HeValue::Plain(p) => p.values.clone(),
                HeValue::Cipher(ct) => backend.decrypt(&keys.secret, ct)?,
            };
            if values.len() != batch {
                return Err(SessionError::Protocol(
                    "result tensor has inconsistent packing".into(),
                ));
            }
            for (f, &v) in values.iter().enumerate() {
                out[f * element_count + j] = v;
            }
        }
        info!(values = out.len(), "inference result decrypted");
        Ok(out)
    }

    /// Connect the dedicated 2PC socket on the first garbled round.
    fn ensure_gc_party(&mut self) -> SessionResult<()> {
        if self.gc_party.is_some() {
            return Ok(());
        }
        self.backend()?; // parameters must have arrived first
        let mut delay = self.cfg.retry.initial;
        let mut attempts = 0u32;
        let stream = loop {
            match std::net::TcpStream::connect(&self.cfg.mpc_addr) {
                Ok(s) => break s,
                Err(e) => {
                    attempts += 1;
                    if let Some(max) = self.cfg.retry.max_attempts {
                        if attempts >= max {
                            return Err(SessionError::Io(e));
                        }
                    }
                    warn!(error = %e, ?delay, "2PC endpoint not ready, retrying");
                    std::thread::sleep(delay);
                    delay = (delay * 2).min(self.cfg.retry.max);
                }
            }
        };
        let channel = TcpChannel::new(stream, self.cfg.peer_timeout)?;
        let party = GcParty::new(GcRole::Evaluator, self.cfg.gc.gc_config(), Box::new(channel))?;
        info!("2PC channel established");
        self.gc_party = Some(party);
        Ok(())
    }
}

fn recv_with_timeout(
    rx: &Receiver<Message>,
    timeout: Option<Duration>,
) -> SessionResult<Message> {
    match timeout {
        Some(t) => rx.recv_timeout(t).map_err(|e| match e {
            RecvTimeoutError::Timeout => SessionError::PeerTimeout,
            RecvTimeoutError::Disconnected => SessionError::SessionAborted,
        }),
        None => rx.recv().map_err(|_| SessionError::SessionAborted),
    }
}
