//! One endpoint of the garbled execution.
//!
//! Message order per execution: the garbler ships tables, its own active
//! input labels, the constant labels, the output decode bits, and its OT
//! public point; the evaluator answers with one blinded point per private
//! input bit; the garbler returns the encrypted label pairs. If the circuit
//! declares garbler-owned outputs the evaluator finally returns those active
//! labels. Every execution draws fresh labels, a fresh delta, and a fresh OT
//! scalar; `reset` must be called between executions.

use serde::{Deserialize, Serialize};
use std::str::FromStr;
use tracing::{debug, trace};

use crate::boolean::{bits_value, lower, value_bits, BitCircuit};
use crate::channel::GcChannel;
use crate::circuit::{GateParty, WordCircuit};
use crate::errors::GcError;
use crate::garble::{
    const_active_labels, decode_bit, decode_with_secrets, evaluate_garbled, garble, Label,
    LABEL_BYTES,
};
use crate::ot::{OtReceiver, OtSender};
use crate::{GcResult, SUPPORTED_SECURITY_LEVEL};

/// Boolean-sharing protocol variants recognized by the configuration
/// surface. Only Yao garbling is built into this engine.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum MpcProtocol {
    Yao,
    Gmw,
}

impl FromStr for MpcProtocol {
    type Err = GcError;

    fn from_str(s: &str) -> GcResult<Self> {
        match s.to_ascii_lowercase().as_str() {
            "yao" => Ok(MpcProtocol::Yao),
            "gmw" => Ok(MpcProtocol::Gmw),
            other => Err(GcError::UnknownProtocol(other.to_string())),
        }
    }
}

impl std::fmt::Display for MpcProtocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MpcProtocol::Yao => write!(f, "yao"),
            MpcProtocol::Gmw => write!(f, "gmw"),
        }
    }
}

/// Which side of the garbled protocol this party plays. The model owner
/// garbles; the data owner evaluates.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GcRole {
    Garbler,
    Evaluator,
}

impl GcRole {
    fn gate_party(self) -> GateParty {
        match self {
            GcRole::Garbler => GateParty::Server,
            GcRole::Evaluator => GateParty::Client,
        }
    }
}

/// Engine configuration.
#[derive(Clone, Debug)]
pub struct GcConfig {
    pub protocol: MpcProtocol,
    pub security_level: u64,
    pub bit_length: u32,
    /// Gate-reservation hint forwarded to circuit builders.
    pub reserve_gates: usize,
}

impl Default for GcConfig {
    fn default() -> Self {
        Self {
            protocol: MpcProtocol::Yao,
            security_level: SUPPORTED_SECURITY_LEVEL,
            bit_length: 64,
            reserve_gates: 4096,
        }
    }
}

#[derive(Serialize, Deserialize)]
struct GarblerPayload {
    tables: Vec<[[u8; LABEL_BYTES]; 4]>,
    /// false-const, true-const, then the garbler's active input labels.
    fixed_labels: Vec<[u8; LABEL_BYTES]>,
    /// `lsb(W^0)` per evaluator-owned output wire.
    decode_bits: Vec<bool>,
    ot_public: [u8; 32],
    evaluator_input_bits: u64,
}

#[derive(Serialize, Deserialize)]
struct OtRequest {
    points: Vec<[u8; 32]>,
}

#[derive(Serialize, Deserialize)]
struct OtReply {
    pairs: Vec<([u8; LABEL_BYTES], [u8; LABEL_BYTES])>,
}

#[derive(Serialize, Deserialize)]
struct EvaluatorOutputs {
    labels: Vec<[u8; LABEL_BYTES]>,
}

fn decode_msg<T: for<'de> Deserialize<'de>>(bytes: &[u8]) -> GcResult<T> {
    bincode::deserialize(bytes).map_err(|e| GcError::Decode(e.to_string()))
}

fn encode_msg<T: Serialize>(msg: &T) -> GcResult<Vec<u8>> {
    bincode::serialize(msg).map_err(|e| GcError::Decode(e.to_string()))
}

/// One party of the two-party engine.
pub struct GcParty {
    cfg: GcConfig,
    role: GcRole,
    channel: Box<dyn GcChannel>,
    needs_reset: bool,
    executions: u64,
}

impl GcParty {
    pub fn new(role: GcRole, cfg: GcConfig, channel: Box<dyn GcChannel>) -> GcResult<Self> {
        if cfg.security_level != SUPPORTED_SECURITY_LEVEL {
            return Err(GcError::UnsupportedSecurityLevel(cfg.security_level));
        }
        if cfg.protocol != MpcProtocol::Yao {
            return Err(GcError::UnsupportedProtocol(cfg.protocol.to_string()));
        }
        if !(2..=64).contains(&cfg.bit_length) {
            return Err(GcError::ContractViolation(format!(
                "bit length {} outside 2..=64",
                cfg.bit_length
            )));
        }
        debug!(?role, protocol = %cfg.protocol, bits = cfg.bit_length, "2PC party ready");
        Ok(Self {
            cfg,
            role,
            channel,
            needs_reset: false,
            executions: 0,
        })
    }

    pub fn role(&self) -> GcRole {
        self.role
    }

    pub fn config(&self) -> &GcConfig {
        &self.cfg
    }

    pub fn executions(&self) -> u64 {
        self.executions
    }

    /// Discard per-execution state so the next invocation uses fresh
    /// randomness and fresh transfer correlations.
    pub fn reset(&mut self) {
        self.needs_reset = false;
    }

    /// Run one circuit. `my_inputs` supplies values for this party's input
    /// gates in creation order; the return value holds this party's owned
    /// outputs in creation order.
    pub fn execute(
        &mut self,
        circuit: &WordCircuit,
        my_inputs: &[Vec<u64>],
    ) -> GcResult<Vec<Vec<u64>>> {
        if self.needs_reset {
            return Err(GcError::SessionNotReset);
        }
        if circuit.bit_length() != self.cfg.bit_length {
            return Err(GcError::ContractViolation(format!(
                "circuit bit length {} does not match engine bit length {}",
                circuit.bit_length(),
                self.cfg.bit_length
            )));
        }
        let bc = lower(circuit)?;
        let my_bits = self.collect_input_bits(circuit, &bc, my_inputs)?;
        trace!(
            gates = circuit.gate_count(),
            and_gates = bc.and_count,
            "executing garbled circuit"
        );

        let outputs = match self.role {
            GcRole::Garbler => self.run_garbler(&bc, &my_bits),
            GcRole::Evaluator => self.run_evaluator(&bc, &my_bits),
        }?;

        self.needs_reset = true;
        self.executions += 1;
        Ok(outputs)
    }

    /// Values for this party's input gates, flattened to wire/bit pairs in
    /// canonical order (group, lane, LSB-first bit).
    fn collect_input_bits(
        &self,
        circuit: &WordCircuit,
        bc: &BitCircuit,
        my_inputs: &[Vec<u64>],
    ) -> GcResult<Vec<bool>> {
        let party = self.role.gate_party();
        let my_groups: Vec<_> = bc.inputs.iter().filter(|g| g.party == party).collect();
        if my_groups.len() != my_inputs.len() {
            return Err(GcError::ContractViolation(format!(
                "circuit declares {} input gates for this party, {} supplied",
                my_groups.len(),
                my_inputs.len()
            )));
        }
        let width = circuit.bit_length() as usize;
        let mask = if width == 64 {
            u64::MAX
        } else {
            (1u64 << width) - 1
        };
        let mut bits = Vec::new();
        for (group, values) in my_groups.iter().zip(my_inputs) {
            if values.len() != group.lanes {
                return Err(GcError::ContractViolation(format!(
                    "input gate expects {} lanes, {} supplied",
                    group.lanes,
                    values.len()
                )));
            }
            for &v in values {
                if v & !mask != 0 {
                    return Err(GcError::ValueTooWide {
                        value: v,
                        bits: circuit.bit_length(),
                    });
                }
                bits.extend(value_bits(v, width));
            }
        }
        Ok(bits)
    }

    fn run_garbler(&mut self, bc: &BitCircuit, my_bits: &[bool]) -> GcResult<Vec<Vec<u64>>> {
        let mut rng = rand::rngs::OsRng;
        let (secrets, tables) = garble(bc, &mut rng);

        let consts = const_active_labels(&secrets);
        let mut fixed_labels = vec![consts[0].0, consts[1].0];
        let my_wires = bc.input_wires_of(GateParty::Server);
        debug_assert_eq!(my_wires.len(), my_bits.len());
        for (&wire, &bit) in my_wires.iter().zip(my_bits) {
            fixed_labels.push(secrets.label_for(wire, bit).0);
        }

        let evaluator_wires = bc.input_wires_of(GateParty::Client);
        let decode_bits: Vec<bool> = bc
            .output_wires_of(GateParty::Client)
            .iter()
            .map(|&w| secrets.labels0[w].lsb())
            .collect();

        let ot = OtSender::new();
        let payload = GarblerPayload {
            tables: tables.rows.clone(),
            fixed_labels,
            decode_bits,
            ot_public: ot.public_bytes(),
            evaluator_input_bits: evaluator_wires.len() as u64,
        };
        self.channel.send(&encode_msg(&payload)?)?;

        let request: OtRequest = decode_msg(&self.channel.recv()?)?;
        if request.points.len() != evaluator_wires.len() {
            return Err(GcError::ContractViolation(format!(
                "expected {} transfer points, got {}",
                evaluator_wires.len(),
                request.points.len()
            )));
        }
        let mut pairs = Vec::with_capacity(request.points.len());
        for (&wire, point) in evaluator_wires.iter().zip(&request.points) {
            let l0 = secrets.label_for(wire, false);
            let l1 = secrets.label_for(wire, true);
            pairs.push(ot.encrypt_pair(point, &l0, &l1)?);
        }
        self.channel.send(&encode_msg(&OtReply { pairs })?)?;

        // Outputs this party owns come back as active labels.
        let my_output_wires = bc.output_wires_of(GateParty::Server);
        if my_output_wires.is_empty() {
            return Ok(Vec::new());
        }
        let returned: EvaluatorOutputs = decode_msg(&self.channel.recv()?)?;
        if returned.labels.len() != my_output_wires.len() {
            return Err(GcError::ContractViolation(format!(
                "expected {} output labels, got {}",
                my_output_wires.len(),
                returned.labels.len()
            )));
        }
        let mut wire_bits = std::collections::HashMap::new();
        for (&wire, raw) in my_output_wires.iter().zip(&returned.labels) {
            wire_bits.insert(wire, decode_with_secrets(&secrets, wire, &Label(*raw)));
        }
        Ok(assemble_outputs(bc, GateParty::Server, |w| wire_bits[&w]))
    }

    fn run_evaluator(&mut self, bc: &BitCircuit, my_bits: &[bool]) -> GcResult<Vec<Vec<u64>>> {
        let payload: GarblerPayload = decode_msg(&self.channel.recv()?)?;

        let garbler_wires = bc.input_wires_of(GateParty::Server);
        if payload.fixed_labels.len() != garbler_wires.len() + 2 {
            return Err(GcError::ContractViolation(format!(
                "expected {} fixed labels, got {}",
                garbler_wires.len() + 2,
                payload.fixed_labels.len()
            )));
        }
        let my_wires = bc.input_wires_of(GateParty::Client);
        if payload.evaluator_input_bits as usize != my_wires.len()
            || my_wires.len() != my_bits.len()
        {
            return Err(GcError::ContractViolation(
                "evaluator input width disagreement".into(),
            ));
        }

        let mut active: Vec<Option<Label>> = vec![None; bc.wire_count];
        active[0] = Some(Label(payload.fixed_labels[0]));
        active[1] = Some(Label(payload.fixed_labels[1]));
        for (&wire, raw) in garbler_wires.iter().zip(&payload.fixed_labels[2..]) {
            active[wire] = Some(Label(*raw));
        }

        // Pick up our own labels through OT.
        let mut receivers = Vec::with_capacity(my_bits.len());
        let mut points = Vec::with_capacity(my_bits.len());
        for &bit in my_bits {
            let (recv, point) = OtReceiver::choose(&payload.ot_public, bit)?;
            receivers.push(recv);
            points.push(point);
        }
        self.channel.send(&encode_msg(&OtRequest { points })?)?;
        let reply: OtReply = decode_msg(&self.channel.recv()?)?;
        if reply.pairs.len() != my_wires.len() {
            return Err(GcError::ContractViolation(format!(
                "expected {} transfer pairs, got {}",
                my_wires.len(),
                reply.pairs.len()
            )));
        }
        for ((&wire, recv), pair) in my_wires.iter().zip(&receivers).zip(&reply.pairs) {
            active[wire] = Some(recv.receive(pair));
        }

        let tables = crate::garble::GarbledTables {
            rows: payload.tables,
        };
        evaluate_garbled(bc, &tables, &mut active)?;

        // Return the garbler's outputs, decode our own.
        let garbler_output_wires = bc.output_wires_of(GateParty::Server);
        if !garbler_output_wires.is_empty() {
            let labels: Vec<[u8; LABEL_BYTES]> = garbler_output_wires
                .iter()
                .map(|&w| active[w].map(|l| l.0).ok_or_else(missing_label))
                .collect::<GcResult<_>>()?;
            self.channel.send(&encode_msg(&EvaluatorOutputs { labels })?)?;
        }

        let my_output_wires = bc.output_wires_of(GateParty::Client);
        if payload.decode_bits.len() != my_output_wires.len() {
            return Err(GcError::ContractViolation(format!(
                "expected {} decode bits, got {}",
                my_output_wires.len(),
                payload.decode_bits.len()
            )));
        }
        let mut wire_bits = std::collections::HashMap::new();
        for (&wire, &decode) in my_output_wires.iter().zip(&payload.decode_bits) {
            let label = active[wire].ok_or_else(missing_label)?;
            wire_bits.insert(wire, decode_bit(&label, decode));
        }
        Ok(assemble_outputs(bc, GateParty::Client, |w| wire_bits[&w]))
    }
}

fn missing_label() -> GcError {
    GcError::Decode("active label missing during evaluation".into())
}

/// Reassemble a party's owned output groups into word vectors.
fn assemble_outputs(
    bc: &BitCircuit,
    owner: GateParty,
    bit_of: impl Fn(usize) -> bool,
) -> Vec<Vec<u64>> {
    bc.outputs
        .iter()
        .filter(|g| g.owner == owner)
        .map(|g| {
            let width = g.wires.len() / g.lanes;
            (0..g.lanes)
                .map(|lane| {
                    let bits: Vec<bool> = (0..width)
                        .map(|i| bit_of(g.wires[lane * width + i]))
                        .collect();
                    bits_value(&bits)
                })
                .collect()
        })
        .collect()
}
