//! Interrupt-driven command transactions.
//!
//! Steady-state commands (`SendData`, `ReceiveData`,
//! `AcceptConnections`) cannot block: they run one word per
//! serial-complete interrupt. The machine below holds the pieces of
//! the in-flight transaction; the serial ISR feeds it each received
//! word and transmits whatever it asks for next.
//!
//! ```text
//! CommandHeader ──▶ Parameters ──▶ ResponseRequest ──▶ DataRequest ─┐
//!        │   echo 0x80000000 each │        response header          │ repeat
//!        └────────────────────────┴─────────────────────────────────┘
//! ```
//!
//! Only one transaction is in flight at a time; the driver's
//! `is_active` guard drops re-entrant starts.

use heapless::Vec;

use crate::proto::codec::{self, Command};
use crate::proto::{DATA_REQUEST, HOST_TRANSFER_WORDS, RESPONSE_CAP};

/// Where the in-flight transaction currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Step {
    /// The command word is on the wire.
    CommandHeader,
    /// Parameter words are being streamed.
    Parameters,
    /// The data-request sentinel is out; the next word in is the
    /// response header.
    ResponseRequest,
    /// Response words are being pulled one sentinel at a time.
    DataRequest,
}

/// One interrupt-driven command transaction.
#[derive(Debug)]
pub(crate) struct AsyncCommand {
    command: Command,
    params: Vec<u32, HOST_TRANSFER_WORDS>,
    /// Response words collected so far; valid once `succeeded()`.
    pub(crate) responses: Vec<u32, RESPONSE_CAP>,
    step: Step,
    sent_params: usize,
    total_responses: usize,
    requested_responses: usize,
    pending: bool,
    success: bool,
    active: bool,
}

impl AsyncCommand {
    pub(crate) fn idle() -> Self {
        Self {
            command: Command::Hello,
            params: Vec::new(),
            responses: Vec::new(),
            step: Step::CommandHeader,
            sent_params: 0,
            total_responses: 0,
            requested_responses: 0,
            pending: false,
            success: false,
            active: false,
        }
    }

    /// Arm the machine for `command` and return the first word to put
    /// on the wire. Parameters beyond the frame cap are a programming
    /// error upstream and truncate in release builds.
    pub(crate) fn begin(&mut self, command: Command, params: &[u32]) -> u32 {
        debug_assert!(params.len() <= HOST_TRANSFER_WORDS);

        self.command = command;
        self.params.clear();
        let take = params.len().min(HOST_TRANSFER_WORDS);
        let _ = self.params.extend_from_slice(&params[..take]);
        self.responses.clear();
        self.step = Step::CommandHeader;
        self.sent_params = 0;
        self.total_responses = 0;
        self.requested_responses = 0;
        self.pending = true;
        self.success = false;
        self.active = true;

        codec::command_word(command, self.params.len() as u8)
    }

    /// Feed the word just received; returns the next word to
    /// transmit, or `None` when the transaction has completed
    /// (successfully or not; check [`succeeded`](Self::succeeded)).
    pub(crate) fn feed(&mut self, word: u32) -> Option<u32> {
        match self.step {
            Step::CommandHeader | Step::Parameters => {
                if !codec::is_data_request(word) {
                    return self.complete(false);
                }
                self.next_parameter_or_request_response()
            }
            Step::ResponseRequest => {
                let Some(count) = codec::parse_response_word(word, self.command) else {
                    return self.complete(false);
                };
                if usize::from(count) > RESPONSE_CAP {
                    return self.complete(false);
                }
                self.total_responses = usize::from(count);
                self.next_response_or_finish()
            }
            Step::DataRequest => {
                // Capacity checked against the declared count above.
                let _ = self.responses.push(word);
                self.next_response_or_finish()
            }
        }
    }

    /// The bus reported completion without delivering a word (e.g.
    /// deactivated mid-flight). The transaction fails.
    pub(crate) fn complete_without_data(&mut self) {
        let _ = self.complete(false);
    }

    pub(crate) fn finish(&mut self) {
        self.active = false;
    }

    pub(crate) fn abort(&mut self) {
        self.pending = false;
        self.active = false;
    }

    pub(crate) fn command(&self) -> Command {
        self.command
    }

    pub(crate) fn is_active(&self) -> bool {
        self.active
    }

    pub(crate) fn is_pending(&self) -> bool {
        self.pending
    }

    pub(crate) fn succeeded(&self) -> bool {
        self.success
    }

    // ── Internal ──────────────────────────────────────────────

    fn next_parameter_or_request_response(&mut self) -> Option<u32> {
        if self.sent_params < self.params.len() {
            self.step = Step::Parameters;
            let word = self.params[self.sent_params];
            self.sent_params += 1;
            Some(word)
        } else {
            self.step = Step::ResponseRequest;
            Some(DATA_REQUEST)
        }
    }

    fn next_response_or_finish(&mut self) -> Option<u32> {
        if self.requested_responses < self.total_responses {
            self.step = Step::DataRequest;
            self.requested_responses += 1;
            Some(DATA_REQUEST)
        } else {
            self.complete(true)
        }
    }

    fn complete(&mut self, success: bool) -> Option<u32> {
        self.success = success;
        self.pending = false;
        None
    }
}

// ── Tests ────────────────────────────────────────────────────
