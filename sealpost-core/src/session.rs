//! Session controller: drives one client run from identity bootstrap to checksum resolution.
//!
//! States: `Bootstrapping -> KeyExchange -> Transferring <-> Resolving -> Done`, or `Failed`
//! from any of them. All retry policy lives here; operations only encode and validate.

use std::time::Duration;

use tracing::{debug, info, warn};

use crate::chunk::FileTransferState;
use crate::crypto::{session_key_from_bytes, CryptoProvider};
use crate::error::{ProtocolError, SessionError, Step};
use crate::identity::{ClientId, ClientIdentity, EncryptedSessionKey, PrivateKey, SessionKey};
use crate::integrity::{ChecksumTracker, Resolution};
use crate::operation::{FileChunk, Operation, Response, StepOutcome};
use crate::protocol::{MAX_CHECKSUM_RETRIES, MAX_REQUEST_ATTEMPTS, MAX_RESPONSE_PAYLOAD};
use crate::store::IdentityStore;
use crate::transport::Transport;
use crate::wire::{decode_response_header, RESPONSE_HEADER_SIZE};

/// Default pause between attempts of the same request (multiplied by the attempt number).
pub const DEFAULT_BACKOFF: Duration = Duration::from_millis(250);

/// Retry budgets for one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Attempts per request/response exchange (and per transfer pass acknowledgement).
    pub max_request_attempts: u32,
    /// Full transfer passes before a checksum mismatch is accepted.
    pub max_checksum_passes: u32,
    /// Linear backoff unit between attempts.
    pub backoff: Duration,
}

impl RetryPolicy {
    /// Default budgets without sleeping between attempts.
    pub fn immediate() -> Self {
        Self {
            backoff: Duration::ZERO,
            ..Self::default()
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_request_attempts: MAX_REQUEST_ATTEMPTS,
            max_checksum_passes: MAX_CHECKSUM_RETRIES,
            backoff: DEFAULT_BACKOFF,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Bootstrapping,
    KeyExchange,
    Transferring,
    Resolving,
    Done,
    Failed,
}

/// The file to send: the name announced to the server and its plaintext content.
#[derive(Debug, Clone)]
pub struct OutgoingFile {
    pub name: String,
    pub content: Vec<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferOutcome {
    /// Server checksum matched; confirmed.
    Confirmed,
    /// Checksums never matched; verification aborted and the file accepted as-is.
    AcceptedWithMismatch,
}

/// Summary of a run that reached `Done`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunReport {
    pub client_id: ClientId,
    pub outcome: TransferOutcome,
    /// Full transfer passes whose acknowledgement was received.
    pub transfer_passes: u32,
    /// Chunk requests written, across all passes and attempts.
    pub chunks_sent: u64,
    /// A new identity was created during this run.
    pub registered: bool,
}

/// Key material waiting to be unwrapped in `KeyExchange`.
struct KeyDelivery {
    private_key: PrivateKey,
    encrypted: EncryptedSessionKey,
    /// New identity: persist once the session key is recovered.
    persist: bool,
}

/// Owns the connection, the in-memory key material and the transfer state for one run.
pub struct Session<T, C, S> {
    transport: T,
    crypto: C,
    store: S,
    identity: ClientIdentity,
    policy: RetryPolicy,
    state: SessionState,
    chunks_sent: u64,
    registered: bool,
}

impl<T: Transport, C: CryptoProvider, S: IdentityStore> Session<T, C, S> {
    /// `name` is used when no identity is stored yet; a stored identity's name wins.
    pub fn new(transport: T, crypto: C, store: S, name: impl Into<String>) -> Self {
        Self {
            transport,
            crypto,
            store,
            identity: ClientIdentity::unregistered(name),
            policy: RetryPolicy::default(),
            state: SessionState::Bootstrapping,
            chunks_sent: 0,
            registered: false,
        }
    }

    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn identity(&self) -> &ClientIdentity {
        &self.identity
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Run to `Done` or `Failed`.
    pub fn run(&mut self, file: &OutgoingFile) -> Result<RunReport, SessionError> {
        let result = self.drive(file);
        match &result {
            Ok(report) => info!(
                client = %report.client_id,
                outcome = ?report.outcome,
                passes = report.transfer_passes,
                "run complete"
            ),
            Err(e) => {
                warn!(step = %e.step, error = %e.source, "run failed");
                self.transition(SessionState::Failed);
            }
        }
        result
    }

    fn drive(&mut self, file: &OutgoingFile) -> Result<RunReport, SessionError> {
        self.transition(SessionState::Bootstrapping);
        let delivery = self.bootstrap()?;

        self.transition(SessionState::KeyExchange);
        let session_key = self.exchange_keys(delivery)?;

        let local_checksum = self.crypto.checksum(&file.content);
        let mut tracker = ChecksumTracker::new(self.policy.max_checksum_passes);
        loop {
            self.transition(SessionState::Transferring);
            let (transfer, server_checksum) = self.transfer(&session_key, file)?;

            self.transition(SessionState::Resolving);
            let resolution = tracker.resolve(local_checksum, server_checksum);
            info!(
                pass = tracker.passes(),
                chunks = transfer.chunk_count,
                local = local_checksum,
                server = server_checksum,
                ?resolution,
                "transfer pass complete"
            );
            let file_name = transfer.file_name.as_str();
            let outcome = match resolution {
                Resolution::Confirm => {
                    let op = Operation::ConfirmChecksum { file_name };
                    self.exchange(Step::ChecksumConfirmation, &op)?;
                    TransferOutcome::Confirmed
                }
                Resolution::Retry => {
                    warn!(pass = tracker.passes(), "checksum mismatch, re-sending file");
                    let op = Operation::RetryChecksum { file_name };
                    if let Err(e) = self.exchange(Step::FileTransfer, &op) {
                        warn!(error = %e, "retry notification not delivered");
                    }
                    continue;
                }
                Resolution::Abort => {
                    warn!(
                        passes = tracker.passes(),
                        mismatches = tracker.mismatches(),
                        "checksum never matched, accepting file as-is"
                    );
                    self.exchange(Step::ChecksumAbort, &Operation::AbortChecksum { file_name })?;
                    TransferOutcome::AcceptedWithMismatch
                }
            };
            self.transition(SessionState::Done);
            return Ok(RunReport {
                client_id: self.identity.id,
                outcome,
                transfer_passes: tracker.passes(),
                chunks_sent: self.chunks_sent,
                registered: self.registered,
            });
        }
    }

    /// Reconnect a stored identity, or register a new one, up to an encrypted session key.
    /// On ReconnectAsNew the server has already registered the name, so no Register is sent.
    fn bootstrap(&mut self) -> Result<KeyDelivery, SessionError> {
        let stored = self
            .store
            .load()
            .map_err(|e| SessionError::new(Step::IdentityLoad, e))?;
        let Some(stored) = stored else {
            info!(name = %self.identity.name, "no stored identity, registering");
            self.register()?;
            return self.send_public_key();
        };

        if stored.identity.name != self.identity.name {
            debug!(stored = %stored.identity.name, "using stored name");
        }
        self.identity = stored.identity;
        info!(client = %self.identity.id, "reconnecting");
        let name = self.identity.name.clone();
        match self.exchange(Step::Reconnection, &Operation::Reconnect { name: &name })? {
            StepOutcome::SessionKey(encrypted) => Ok(KeyDelivery {
                private_key: stored.private_key,
                encrypted,
                persist: false,
            }),
            StepOutcome::ReconnectedAsNew(id) => {
                // The server registered `name` afresh; re-key under the new id.
                info!(
                    old = %self.identity.id,
                    new = %id,
                    "server does not know this client, re-registering"
                );
                self.adopt_id(id);
                self.send_public_key()
            }
            other => Err(unexpected_outcome(Step::Reconnection, other)),
        }
    }

    fn register(&mut self) -> Result<(), SessionError> {
        let name = self.identity.name.clone();
        match self.exchange(Step::Registration, &Operation::Register { name: &name })? {
            StepOutcome::Registered(id) => {
                info!(client = %id, "registered");
                self.adopt_id(id);
                Ok(())
            }
            other => Err(unexpected_outcome(Step::Registration, other)),
        }
    }

    fn adopt_id(&mut self, id: ClientId) {
        self.identity.id = id;
        self.registered = true;
    }

    /// New keypair, public half to the server, encrypted session key back.
    fn send_public_key(&mut self) -> Result<KeyDelivery, SessionError> {
        let (private_key, public_key) = self
            .crypto
            .generate_keypair()
            .map_err(|e| SessionError::new(Step::SendingPublicKey, e))?;
        let name = self.identity.name.clone();
        let op = Operation::SendPublicKey {
            name: &name,
            public_key: &public_key,
        };
        match self.exchange(Step::SendingPublicKey, &op)? {
            StepOutcome::SessionKey(encrypted) => Ok(KeyDelivery {
                private_key,
                encrypted,
                persist: true,
            }),
            other => Err(unexpected_outcome(Step::SendingPublicKey, other)),
        }
    }

    /// Unwrap the session key; persist a new identity only once that succeeded.
    fn exchange_keys(&mut self, delivery: KeyDelivery) -> Result<SessionKey, SessionError> {
        let raw = self
            .crypto
            .decrypt_with_private(&delivery.private_key, delivery.encrypted.as_bytes())
            .map_err(|e| SessionError::new(Step::KeyExchange, e))?;
        let key =
            session_key_from_bytes(&raw).map_err(|e| SessionError::new(Step::KeyExchange, e))?;
        if delivery.persist {
            self.store
                .save(&self.identity, &delivery.private_key)
                .map_err(|e| SessionError::new(Step::IdentityPersistence, e))?;
            info!(client = %self.identity.id, "identity saved");
        }
        Ok(key)
    }

    /// Encrypt once, then send every chunk and await FileReceived, re-sending the whole
    /// sequence when the acknowledgement is missing or invalid.
    fn transfer(
        &mut self,
        key: &SessionKey,
        file: &OutgoingFile,
    ) -> Result<(FileTransferState, u32), SessionError> {
        let ciphertext = self
            .crypto
            .encrypt_with_symmetric(key, &file.content)
            .map_err(|e| SessionError::new(Step::FileTransfer, e))?;
        let mut transfer = FileTransferState::new(&file.name, file.content.len(), ciphertext.len())
            .map_err(|e| SessionError::new(Step::FileTransfer, e))?;
        debug!(
            file = %transfer.file_name,
            plaintext = transfer.plaintext_size,
            ciphertext = transfer.ciphertext_size,
            chunks = transfer.chunk_count,
            "starting transfer pass"
        );

        let max = self.policy.max_request_attempts.max(1);
        let mut attempt = 0;
        loop {
            attempt += 1;
            transfer.restart();
            match self.send_chunks(&mut transfer, &ciphertext) {
                Ok(checksum) => return Ok((transfer, checksum)),
                Err(e) if e.is_retryable() && attempt < max => {
                    warn!(
                        step = %Step::FileTransfer,
                        attempt,
                        error = %e,
                        "transfer pass failed, re-sending"
                    );
                    self.backoff(attempt);
                }
                Err(e) => return Err(SessionError::new(Step::FileTransfer, exhausted(attempt, e))),
            }
        }
    }

    fn send_chunks(
        &mut self,
        transfer: &mut FileTransferState,
        ciphertext: &[u8],
    ) -> Result<u32, ProtocolError> {
        let mut checksum = None;
        while let Some(range) = transfer.current_range() {
            let op = Operation::SendFileChunk(FileChunk {
                transfer: &*transfer,
                index: transfer.chunk_index,
                bytes: &ciphertext[range],
            });
            let frame = op.serialize(&self.identity.id);
            self.write_frame(&frame)?;
            self.chunks_sent += 1;
            debug!(index = transfer.chunk_index, count = transfer.chunk_count, "chunk sent");
            if op.expects_response() {
                let response = self.read_response()?;
                let outcome = op.apply(&self.identity.id, &response)?;
                if let StepOutcome::FileReceived { checksum: c } = outcome {
                    checksum = Some(c);
                }
            }
            transfer.advance();
        }
        checksum.ok_or_else(|| ProtocolError::unexpected("transfer ended without acknowledgement"))
    }

    /// Write one frame, retrying the same bytes on transport failure. Exhaustion is not
    /// retryable, so the enclosing pass does not multiply the write budget.
    fn write_frame(&mut self, frame: &[u8]) -> Result<(), ProtocolError> {
        let max = self.policy.max_request_attempts.max(1);
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.transport.write_all(frame) {
                Ok(()) => return Ok(()),
                Err(e) if attempt < max => {
                    warn!(attempt, error = %e, "write failed, retrying");
                    self.backoff(attempt);
                }
                Err(e) => {
                    return Err(ProtocolError::AttemptsExhausted {
                        attempts: attempt,
                        last: Box::new(ProtocolError::Connection(e)),
                    })
                }
            }
        }
    }

    /// One request/response exchange with the shared retry policy.
    fn exchange(&mut self, step: Step, op: &Operation<'_>) -> Result<StepOutcome, SessionError> {
        let max = self.policy.max_request_attempts.max(1);
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.attempt(op) {
                Ok(outcome) => {
                    debug!(%step, op = ?op.op_code(), attempt, "step complete");
                    return Ok(outcome);
                }
                Err(e) if e.is_retryable() && attempt < max => {
                    warn!(%step, attempt, error = %e, "request failed, retrying");
                    self.backoff(attempt);
                }
                Err(e) => return Err(SessionError::new(step, exhausted(attempt, e))),
            }
        }
    }

    fn attempt(&mut self, op: &Operation<'_>) -> Result<StepOutcome, ProtocolError> {
        let frame = op.serialize(&self.identity.id);
        debug!(op = ?op.op_code(), bytes = frame.len(), "sending request");
        self.transport.write_all(&frame)?;
        if !op.expects_response() {
            return Ok(StepOutcome::Sent);
        }
        let response = self.read_response()?;
        op.apply(&self.identity.id, &response)
    }

    /// Header first, then exactly the payload it declares.
    fn read_response(&mut self) -> Result<Response, ProtocolError> {
        let raw = self.transport.read_exact(RESPONSE_HEADER_SIZE)?;
        let header = decode_response_header(&raw)?;
        if header.payload_size > MAX_RESPONSE_PAYLOAD {
            return Err(ProtocolError::unexpected(format!(
                "declared payload of {} bytes exceeds any response",
                header.payload_size
            )));
        }
        let payload = self.transport.read_exact(header.payload_size as usize)?;
        debug!(code = header.op_code, bytes = payload.len(), "response received");
        Ok(Response { header, payload })
    }

    fn backoff(&self, attempt: u32) {
        if !self.policy.backoff.is_zero() {
            std::thread::sleep(self.policy.backoff * attempt);
        }
    }

    fn transition(&mut self, next: SessionState) {
        if self.state != next {
            debug!(from = ?self.state, to = ?next, "session state");
            self.state = next;
        }
    }
}

/// Retryable errors that ran out of attempts are wrapped; fatal ones pass through.
fn exhausted(attempts: u32, e: ProtocolError) -> ProtocolError {
    if e.is_retryable() {
        ProtocolError::AttemptsExhausted {
            attempts,
            last: Box::new(e),
        }
    } else {
        e
    }
}

fn unexpected_outcome(step: Step, outcome: StepOutcome) -> SessionError {
    SessionError::new(
        step,
        ProtocolError::unexpected(format!("unexpected outcome {outcome:?}")),
    )
}
