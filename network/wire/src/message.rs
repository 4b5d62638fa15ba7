//! Session message schema.

use serde::{Deserialize, Serialize};

use ciphernet_he::{EncryptionParameters, PublicKey};
use ciphernet_ledger::HeTensor;

/// Correlates a non-linear request with its reply.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoundHeader {
    /// Monotonic round counter within one session.
    pub index: u64,
    /// Whether the round runs through the garbled-circuit engine; when
    /// false the client applies the operator to decrypted values directly.
    pub garbled: bool,
}

/// Every message the session layer exchanges.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum Message {
    /// Server -> client: the parameter set the session will run under.
    EncryptionParameters { params: EncryptionParameters },
    /// Client -> server: public key for server-side encryption.
    PublicKey { key: PublicKey },
    /// Client -> server: reserved for schemes with key switching. This
    /// backend accepts and ignores it.
    EvaluationKey { key_bytes: Vec<u8> },
    /// Server -> client: shape of the inputs the compiled function expects.
    InferenceShape { shape: Vec<usize>, packed: bool },
    /// Client -> server: the encrypted (or plaintext) input tensor.
    Execute { tensor: HeTensor },
    /// Server -> client: masked ReLU batch.
    ReluRequest { round: RoundHeader, tensor: HeTensor },
    /// Client -> server: re-encrypted ReLU batch.
    ReluResult { round: RoundHeader, tensor: HeTensor },
    /// Server -> client: masked bounded-ReLU batch plus the clip bound.
    BoundedReluRequest {
        round: RoundHeader,
        bound: f64,
        tensor: HeTensor,
    },
    /// Client -> server: re-encrypted bounded-ReLU batch.
    BoundedReluResult { round: RoundHeader, tensor: HeTensor },
    /// Server -> client: masked max-pool batch, flattened element-major;
    /// `window` elements per window.
    MaxPoolRequest {
        round: RoundHeader,
        window: usize,
        tensor: HeTensor,
    },
    /// Client -> server: re-encrypted per-window maxima.
    MaxPoolResult { round: RoundHeader, tensor: HeTensor },
    /// Server -> client: the encrypted inference result.
    InferenceResult { tensor: HeTensor },
    /// Client -> server: ask for the result as soon as it is ready.
    ResultRequest,
}

impl Message {
    /// Short tag for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            Message::EncryptionParameters { .. } => "encryption_parameters",
            Message::PublicKey { .. } => "public_key",
            Message::EvaluationKey { .. } => "evaluation_key",
            Message::InferenceShape { .. } => "inference_shape",
            Message::Execute { .. } => "execute",
            Message::ReluRequest { .. } => "relu_request",
            Message::ReluResult { .. } => "relu_result",
            Message::BoundedReluRequest { .. } => "bounded_relu_request",
            Message::BoundedReluResult { .. } => "bounded_relu_result",
            Message::MaxPoolRequest { .. } => "max_pool_request",
            Message::MaxPoolResult { .. } => "max_pool_result",
            Message::InferenceResult { .. } => "result",
            Message::ResultRequest => "result_request",
        }
    }
}
