//! The session driver.
//!
//! [`LinkDriver`] owns the whole session: adapter authentication,
//! host/client lifecycle, and the steady-state send/receive loop.
//! Hardware is injected at every call through the port traits in
//! [`ports`], so the core never touches registers and is fully
//! testable against scripted mocks.
//!
//! ```text
//!  on_timer ──▶ accept / send ──▶ async SEND_DATA ─┐
//!                                                  │ serial IRQs
//!  on_serial ◀──────────── word by word ◀──────────┘
//!      │ completion
//!      └─▶ RECEIVE_DATA ──▶ parse ──▶ inbound snapshot
//! ```
//!
//! The three interrupt entry points (`on_vblank`, `on_serial`,
//! `on_timer`) must be wired to the platform's vertical-refresh,
//! serial-complete, and periodic-timer IRQ sources, all running with
//! interrupts masked. Every other method runs on the foreground.
//!
//! Fallible operations return a success flag and latch the cause in
//! a one-shot slot drained by [`last_error`](LinkDriver::last_error);
//! errors never surface asynchronously. Protocol and liveness errors
//! park the session in [`LinkState::NeedsReset`]; the next lifecycle
//! call re-authenticates.

pub mod ports;
pub mod session;

mod async_cmd;
mod frames;

use core::mem;
use core::sync::atomic::{AtomicBool, Ordering};

use heapless::Vec;
use log::{info, warn};

use crate::config::LinkConfig;
use crate::error::LinkError;
use crate::proto::broadcast::{self, ServerInfo, BROADCAST_GROUP_WORDS, MAX_SERVERS};
use crate::proto::codec::{self, Command};
use crate::proto::login::{LoginExchange, LOGIN_PARTS};
use crate::proto::{
    self, BROADCAST_SEARCH_FRAMES, CLIENT_SEND_LIMITS, CMD_TIMEOUT_LINES, DATA_REQUEST,
    HOST_SEND_LIMITS, INCOMING_QUEUE_CAP, PING_WAIT_LINES, RESPONSE_CAP, SETUP_MAGIC,
    STILL_CONNECTING, TRANSFER_WAIT_LINES, VBLANK_LINE,
};

use async_cmd::AsyncCommand;
use ports::{AdapterPort, AsyncState, BusMode, Timebase};
use session::{Message, PeerState, SessionState};

/// Session lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    /// Not authenticated (initial, or parked after an error).
    NeedsReset,
    /// Logged in to the adapter; ready to serve or search.
    Authenticated,
    /// A broadcast read is in flight.
    Searching,
    /// Hosting; we are player 0.
    Serving,
    /// Join requested, completion pending.
    Connecting,
    /// Joined as player 1-4.
    Connected,
}

/// The WaveLink session driver. One instance per adapter.
pub struct LinkDriver {
    config: LinkConfig,
    state: LinkState,

    /// Peer-visible state written by interrupt context.
    back: PeerState,
    /// Peer-visible snapshot read by the foreground.
    front: PeerState,
    session: SessionState,
    async_cmd: AsyncCommand,

    // Snapshot handshake: the ISR publishes `front` only when the
    // previous snapshot was consumed (or never produced).
    snapshot_ready: AtomicBool,
    snapshot_consumed: AtomicBool,
    // Foreground-enqueue interlock: the timer ISR skips frame build
    // while `send` is mid-mutation; a reset during that window defers
    // the queue clear to the foreground.
    adding_message: AtomicBool,
    resetting: AtomicBool,

    last_error: Option<LinkError>,
    enabled: bool,
}

impl LinkDriver {
    /// Build a driver with `config`. Nothing touches hardware until
    /// [`activate`](Self::activate).
    pub fn new(config: LinkConfig) -> Self {
        debug_assert!(config.validate().is_ok());
        Self {
            config,
            state: LinkState::NeedsReset,
            back: PeerState::new(),
            front: PeerState::new(),
            session: SessionState::new(),
            async_cmd: AsyncCommand::idle(),
            snapshot_ready: AtomicBool::new(false),
            snapshot_consumed: AtomicBool::new(false),
            adding_message: AtomicBool::new(false),
            resetting: AtomicBool::new(false),
            last_error: None,
            enabled: false,
        }
    }

    // ── Lifecycle ─────────────────────────────────────────────

    /// Claim the hardware, wake the adapter, and run the login
    /// handshake. Safe to call again at any time; an existing
    /// session is torn down first.
    pub fn activate(&mut self, hw: &mut impl AdapterPort) -> bool {
        self.last_error = None;
        self.enabled = false;

        let success = self.reset(hw);

        // Interrupts may fire from here on even if login failed; the
        // next lifecycle call retries.
        self.enabled = true;
        success
    }

    /// Tear down the session and release the hardware.
    pub fn deactivate(&mut self, hw: &mut impl AdapterPort) {
        self.last_error = None;
        self.enabled = false;
        self.snapshot_ready.store(false, Ordering::Release);
        self.snapshot_consumed.store(false, Ordering::Release);
        self.resetting.store(false, Ordering::Release);
        self.reset_state();
        self.stop(hw);
        info!("link: deactivated");
    }

    /// Whether the driver currently owns the hardware.
    pub fn is_active(&self) -> bool {
        self.enabled
    }

    // ── Hosting ───────────────────────────────────────────────

    /// Start hosting under `game_name`/`user_name`. Requires
    /// `Authenticated`; on success the state becomes `Serving` and
    /// the timer loop begins accepting connections.
    pub fn serve(&mut self, hw: &mut impl AdapterPort, game_name: &str, user_name: &str) -> bool {
        if !self.ensure_ready(hw) {
            return false;
        }
        if self.state != LinkState::Authenticated {
            return self.user_error(LinkError::WrongState);
        }
        if game_name.len() > broadcast::MAX_GAME_NAME_LEN {
            return self.user_error(LinkError::GameNameTooLong);
        }
        if user_name.len() > broadcast::MAX_USER_NAME_LEN {
            return self.user_error(LinkError::UserNameTooLong);
        }

        let advertisement = broadcast::pack_advertisement(game_name, user_name);
        let ok = self
            .send_command(hw, Command::Broadcast, &advertisement)
            .is_some()
            && self.send_command(hw, Command::StartHost, &[]).is_some();
        if !ok {
            return self.fail(hw, LinkError::CommandFailed);
        }

        self.snapshot_ready.store(false, Ordering::Release);
        self.snapshot_consumed.store(false, Ordering::Release);
        wait_lines(hw, TRANSFER_WAIT_LINES);
        self.state = LinkState::Serving;
        info!("link: serving as \"{game_name}\"");
        true
    }

    // ── Discovery ─────────────────────────────────────────────

    /// Synchronous discovery: starts a broadcast read, idles for the
    /// search window, then collects the results into `servers`.
    pub fn get_servers(
        &mut self,
        hw: &mut impl AdapterPort,
        servers: &mut Vec<ServerInfo, MAX_SERVERS>,
    ) -> bool {
        self.get_servers_with(hw, servers, || {})
    }

    /// Like [`get_servers`](Self::get_servers) but invokes `on_vblank`
    /// once per display frame of the wait, so the caller can keep
    /// rendering.
    pub fn get_servers_with(
        &mut self,
        hw: &mut impl AdapterPort,
        servers: &mut Vec<ServerInfo, MAX_SERVERS>,
        on_vblank: impl FnMut(),
    ) -> bool {
        if !self.get_servers_async_start(hw) {
            return false;
        }
        wait_vblanks(hw, BROADCAST_SEARCH_FRAMES, on_vblank);
        self.get_servers_async_end(hw, servers)
    }

    /// Begin a split discovery pass; state becomes `Searching`.
    pub fn get_servers_async_start(&mut self, hw: &mut impl AdapterPort) -> bool {
        if !self.ensure_ready(hw) {
            return false;
        }
        if self.state != LinkState::Authenticated {
            return self.user_error(LinkError::WrongState);
        }
        if self
            .send_command(hw, Command::BroadcastReadStart, &[])
            .is_none()
        {
            return self.fail(hw, LinkError::CommandFailed);
        }
        self.state = LinkState::Searching;
        true
    }

    /// Finish a split discovery pass and decode the results; state
    /// returns to `Authenticated`.
    pub fn get_servers_async_end(
        &mut self,
        hw: &mut impl AdapterPort,
        servers: &mut Vec<ServerInfo, MAX_SERVERS>,
    ) -> bool {
        if !self.ensure_ready(hw) {
            return false;
        }
        if self.state != LinkState::Searching {
            return self.user_error(LinkError::WrongState);
        }

        let Some(responses) = self.send_command(hw, Command::BroadcastReadPoll, &[]) else {
            return self.fail(hw, LinkError::CommandFailed);
        };
        if responses.len() % BROADCAST_GROUP_WORDS != 0 {
            return self.fail(hw, LinkError::CommandFailed);
        }
        if self
            .send_command(hw, Command::BroadcastReadEnd, &[])
            .is_none()
        {
            return self.fail(hw, LinkError::CommandFailed);
        }

        for group in responses.chunks_exact(BROADCAST_GROUP_WORDS) {
            let group: &[u32; BROADCAST_GROUP_WORDS] = group.try_into().unwrap_or(&[0; 7]);
            if servers.push(broadcast::unpack_group(group)).is_err() {
                break;
            }
        }

        self.state = LinkState::Authenticated;
        info!("link: discovery found {} host(s)", servers.len());
        true
    }

    // ── Joining ───────────────────────────────────────────────

    /// Ask the adapter to join `server_id`; state becomes
    /// `Connecting`. Poll [`keep_connecting`](Self::keep_connecting)
    /// until the state leaves `Connecting`.
    pub fn connect(&mut self, hw: &mut impl AdapterPort, server_id: u16) -> bool {
        if !self.ensure_ready(hw) {
            return false;
        }
        if self.state != LinkState::Authenticated {
            return self.user_error(LinkError::WrongState);
        }
        if self
            .send_command(hw, Command::Connect, &[u32::from(server_id)])
            .is_none()
        {
            return self.fail(hw, LinkError::CommandFailed);
        }
        self.state = LinkState::Connecting;
        true
    }

    /// One join-completion poll. Returns `true` while the join is
    /// still pending *and* after it completes; the caller observes
    /// completion via the state moving to `Connected`.
    pub fn keep_connecting(&mut self, hw: &mut impl AdapterPort) -> bool {
        if !self.ensure_ready(hw) {
            return false;
        }
        if self.state != LinkState::Connecting {
            return self.user_error(LinkError::WrongState);
        }

        let Some(status) = self.send_command(hw, Command::IsFinishedConnect, &[]) else {
            return self.fail(hw, LinkError::CommandFailed);
        };
        let Some(&word) = status.first() else {
            return self.fail(hw, LinkError::CommandFailed);
        };
        if word == STILL_CONNECTING {
            return true;
        }

        let assigned_player_id = 1 + ((word >> 16) & 0xFF) as u8;
        let assigned_client_id = word as u16;
        if assigned_player_id >= self.config.max_players {
            return self.fail(hw, LinkError::WeirdPlayerId);
        }

        let Some(confirmation) = self.send_command(hw, Command::FinishConnection, &[]) else {
            return self.fail(hw, LinkError::CommandFailed);
        };
        match confirmation.first() {
            Some(&word) if word as u16 == assigned_client_id => {}
            _ => return self.fail(hw, LinkError::CommandFailed),
        }

        self.back.current_player_id = assigned_player_id;
        self.snapshot_ready.store(false, Ordering::Release);
        self.snapshot_consumed.store(false, Ordering::Release);
        self.state = LinkState::Connected;
        info!("link: connected as player {assigned_player_id}");
        true
    }

    // ── Messaging ─────────────────────────────────────────────

    /// Enqueue `data` for the next send round. Non-blocking; returns
    /// `false` (with a latched user error) when the payload or queue
    /// state rejects it.
    pub fn send(&mut self, hw: &mut impl AdapterPort, data: &[u32]) -> bool {
        self.enqueue(hw, data, None)
    }

    /// Host-only: enqueue on behalf of `author`, preserving the
    /// original player id on the forwarded copy.
    pub fn send_as(&mut self, hw: &mut impl AdapterPort, data: &[u32], author: u8) -> bool {
        self.enqueue(hw, data, Some(author))
    }

    /// Drain the inbound snapshot. Empty when nothing arrived since
    /// the last drain or no session is live.
    pub fn receive(&mut self) -> Vec<Message, INCOMING_QUEUE_CAP> {
        if !self.enabled
            || !matches!(self.state, LinkState::Serving | LinkState::Connected)
            || !self.snapshot_ready.load(Ordering::Acquire)
            || self.snapshot_consumed.load(Ordering::Acquire)
        {
            return Vec::new();
        }

        let messages = self.front.incoming.clone();
        self.snapshot_consumed.store(true, Ordering::Release);
        messages
    }

    // ── Accessors ─────────────────────────────────────────────

    pub fn state(&self) -> LinkState {
        self.state
    }

    /// More than one console in the visible session.
    pub fn is_connected(&self) -> bool {
        self.front.player_count > 1
    }

    pub fn player_count(&self) -> u8 {
        self.front.player_count
    }

    pub fn current_player_id(&self) -> u8 {
        self.front.current_player_id
    }

    /// Room left in the outgoing queue.
    pub fn can_send(&self) -> bool {
        self.session.outgoing.len() < self.config.buffer_size
    }

    /// Queued-but-unconfirmed outgoing messages.
    pub fn pending_count(&self) -> usize {
        self.session.outgoing.len()
    }

    /// Drain the latched error. One-shot: reading clears it.
    pub fn last_error(&mut self) -> Option<LinkError> {
        self.last_error.take()
    }

    pub fn config(&self) -> &LinkConfig {
        &self.config
    }

    // ── Interrupt entry points ────────────────────────────────

    /// Vertical-refresh interrupt: advances the receive-liveness
    /// counter and opens a new accept/send frame.
    pub fn on_vblank(&mut self) {
        if !self.enabled {
            return;
        }
        if !matches!(self.state, LinkState::Serving | LinkState::Connected) {
            self.copy_state();
            return;
        }

        if self.back.player_count > 1 && self.session.frame_recv_count == 0 {
            self.session.recv_timeout += 1;
        }
        self.session.frame_recv_count = 0;
        self.session.accept_called = false;

        self.copy_state();
    }

    /// Serial-complete interrupt: acknowledges the transfer and
    /// advances the in-flight async transaction by one word.
    pub fn on_serial(&mut self, hw: &mut impl AdapterPort) {
        if !self.enabled {
            return;
        }

        hw.on_serial_isr();
        let has_new_data = hw.async_state() == AsyncState::Ready;
        if has_new_data && !self.acknowledge(hw) {
            self.fail(hw, LinkError::AcknowledgeFailed);
            self.copy_state();
            return;
        }
        let new_data = hw.async_data();

        if !matches!(self.state, LinkState::Serving | LinkState::Connected) {
            self.copy_state();
            return;
        }

        if self.async_cmd.is_active() && self.async_cmd.is_pending() {
            if has_new_data {
                if let Some(next) = self.async_cmd.feed(new_data) {
                    hw.start_transfer(next);
                }
            } else {
                self.async_cmd.complete_without_data();
            }

            if !self.async_cmd.is_pending() {
                self.process_async_command(hw);
            }
        }

        self.copy_state();
    }

    /// Periodic send-timer interrupt: checks receive liveness and,
    /// when the bus is free, starts the next accept or send round.
    pub fn on_timer(&mut self, hw: &mut impl AdapterPort) {
        if !self.enabled {
            return;
        }
        if !matches!(self.state, LinkState::Serving | LinkState::Connected) {
            self.copy_state();
            return;
        }

        if self.session.recv_timeout >= self.config.timeout {
            self.fail(hw, LinkError::Timeout);
            self.copy_state();
            return;
        }

        if !self.async_cmd.is_active() {
            self.accept_or_send(hw);
        }

        self.copy_state();
    }

    // ── Steady state internals ────────────────────────────────

    fn accept_or_send(&mut self, hw: &mut impl AdapterPort) {
        if self.state == LinkState::Serving
            && !self.session.accept_called
            && self.back.player_count < self.config.max_players
        {
            self.start_async(hw, Command::AcceptConnections, &[]);
            self.session.accept_called = true;
        } else if self.back.player_count > 1 {
            self.send_pending(hw);
        }
    }

    fn send_pending(&mut self, hw: &mut impl AdapterPort) {
        // The foreground is mid-enqueue; pick the frame up next tick.
        if self.adding_message.load(Ordering::Acquire) {
            return;
        }

        frames::add_ping_if_needed(
            &mut self.session,
            self.back.current_player_id,
            self.config.retransmission,
        );
        let frame = frames::build_send_frame(
            &self.session,
            self.state == LinkState::Serving,
            self.back.current_player_id,
            self.back.player_count,
            self.config.retransmission,
            self.config.max_players,
        );
        self.start_async(hw, Command::SendData, &frame);
    }

    fn start_async(&mut self, hw: &mut impl AdapterPort, command: Command, params: &[u32]) {
        if self.async_cmd.is_active() {
            return;
        }
        let first = self.async_cmd.begin(command, params);
        hw.start_transfer(first);
    }

    fn process_async_command(&mut self, hw: &mut impl AdapterPort) {
        if !self.async_cmd.succeeded() {
            let error = match self.async_cmd.command() {
                Command::SendData => LinkError::SendDataFailed,
                Command::ReceiveData => LinkError::ReceiveDataFailed,
                _ => LinkError::CommandFailed,
            };
            self.fail(hw, error);
            return;
        }

        self.async_cmd.finish();

        match self.async_cmd.command() {
            Command::AcceptConnections => {
                let joined = self.async_cmd.responses.len() as u8;
                self.back.player_count = (1 + joined).min(self.config.max_players);
            }
            Command::SendData => {
                if !self.config.retransmission {
                    self.session.outgoing.clear();
                }
                self.start_async(hw, Command::ReceiveData, &[]);
            }
            Command::ReceiveData => {
                let responses: Vec<u32, RESPONSE_CAP> = self.async_cmd.responses.clone();
                self.finish_receive_round(hw, &responses);
            }
            _ => {}
        }
    }

    fn finish_receive_round(&mut self, hw: &mut impl AdapterPort, responses: &[u32]) {
        let payload = if responses.is_empty() {
            responses
        } else {
            self.session.frame_recv_count += 1;
            self.session.recv_timeout = 0;
            // The adapter prefixes every delivery with its own
            // wireless header word.
            &responses[1..]
        };

        let serving = self.state == LinkState::Serving;
        self.session
            .track_remote_timeouts(self.back.player_count, self.back.current_player_id);

        let parsed = frames::parse_frame(
            payload,
            serving,
            self.state == LinkState::Connected,
            self.config.retransmission,
            self.back.current_player_id,
            self.config.max_players,
            &mut self.session,
            &mut self.back.player_count,
        );
        let messages = match parsed {
            Ok(messages) => messages,
            Err(error) => {
                self.fail(hw, error);
                return;
            }
        };

        for message in &messages {
            let _ = self.back.incoming.push(message.clone());
        }

        // Host-mediated broadcast: re-queue fresh client traffic so
        // the other clients hear it, preserving the original author.
        if serving && self.config.forwarding && self.back.player_count > 2 {
            for message in &messages {
                let _ = self.enqueue(hw, &message.data, Some(message.player_id));
            }
        }

        if !self.session.remote_timeouts_ok(
            self.back.player_count,
            serving,
            self.config.remote_timeout,
        ) {
            self.fail(hw, LinkError::RemoteTimeout);
        }
    }

    fn enqueue(&mut self, hw: &mut impl AdapterPort, data: &[u32], author: Option<u8>) -> bool {
        if !self.ensure_ready(hw) {
            return false;
        }
        let serving = self.state == LinkState::Serving;
        if !serving && self.state != LinkState::Connected {
            return self.user_error(LinkError::WrongState);
        }
        // Sending on behalf of someone else is a host privilege.
        if author.is_some() && !serving {
            return self.user_error(LinkError::InvalidSendSize);
        }

        let limits = if serving {
            HOST_SEND_LIMITS
        } else {
            CLIENT_SEND_LIMITS
        };
        let limit = limits[usize::from(self.config.retransmission)];
        if data.is_empty() || data.len() > limit {
            return self.user_error(LinkError::InvalidSendSize);
        }
        // 0xFFFF_FFFF is reserved for error signalling and the
        // sentinel for transaction flow control.
        if data.iter().any(|&w| w == u32::MAX || w == DATA_REQUEST) {
            return self.user_error(LinkError::InvalidSendSize);
        }
        if self.session.outgoing.len() >= self.config.buffer_size {
            return self.user_error(LinkError::BufferIsFull);
        }

        self.adding_message.store(true, Ordering::Release);

        let player_id = author.unwrap_or(self.back.current_player_id);
        if let Some(message) = session::make_message(&mut self.session, player_id, data) {
            let _ = self.session.outgoing.push(message);
        }

        self.adding_message.store(false, Ordering::Release);

        // A reset happened mid-enqueue: the queue is stale and ours
        // to clear.
        if self.resetting.load(Ordering::Acquire) {
            self.session.outgoing.clear();
            self.resetting.store(false, Ordering::Release);
        }

        true
    }

    // ── Lifecycle internals ───────────────────────────────────

    fn ensure_ready(&mut self, hw: &mut impl AdapterPort) -> bool {
        if !self.enabled {
            return false;
        }
        if self.state == LinkState::NeedsReset && !self.reset(hw) {
            return false;
        }
        true
    }

    fn user_error(&mut self, error: LinkError) -> bool {
        debug_assert!(error.is_user_error());
        self.last_error = Some(error);
        false
    }

    /// Protocol/liveness failure: park the session in `NeedsReset`
    /// and latch the cause. Re-authentication happens on the next
    /// lifecycle call, never inside an interrupt.
    fn fail(&mut self, hw: &mut impl AdapterPort, error: LinkError) -> bool {
        warn!("link: reset ({error})");
        self.reset_state();
        self.stop(hw);
        self.last_error = Some(error);
        false
    }

    fn reset(&mut self, hw: &mut impl AdapterPort) -> bool {
        self.reset_state();
        self.stop(hw);
        self.start(hw)
    }

    fn reset_state(&mut self) {
        self.state = LinkState::NeedsReset;
        self.back.reset();
        self.session.reset_bookkeeping();
        self.async_cmd.abort();

        if self.adding_message.load(Ordering::Acquire) || self.resetting.load(Ordering::Acquire) {
            // `send` owns the queue right now; let it clear.
            self.resetting.store(true, Ordering::Release);
        } else {
            self.session.outgoing.clear();
        }
    }

    fn stop(&mut self, hw: &mut impl AdapterPort) {
        hw.stop();
        hw.deactivate();
    }

    fn start(&mut self, hw: &mut impl AdapterPort) -> bool {
        hw.start(self.config.interval);

        self.ping_adapter(hw);
        hw.activate(BusMode::Master256Kbps);

        if !self.login(hw) {
            warn!("link: login failed");
            return false;
        }

        wait_lines(hw, TRANSFER_WAIT_LINES);

        if self.send_command(hw, Command::Hello, &[]).is_none() {
            return false;
        }
        if self
            .send_command(hw, Command::Setup, &[SETUP_MAGIC])
            .is_none()
        {
            return false;
        }

        hw.activate(BusMode::Master2Mbps);
        self.state = LinkState::Authenticated;
        info!("link: authenticated");
        true
    }

    /// Wake the adapter into serial mode: hold SD high for ~50 scan
    /// lines, then drop it.
    fn ping_adapter(&mut self, hw: &mut impl AdapterPort) {
        hw.set_wake(true);
        wait_lines(hw, PING_WAIT_LINES);
        hw.set_wake(false);
    }

    fn login(&mut self, hw: &mut impl AdapterPort) -> bool {
        let mut exchange = LoginExchange::new();

        // The adapter has not spoken yet, so step 0 expects zero.
        if !self.exchange_login(hw, &mut exchange, LOGIN_PARTS[0], 0) {
            return false;
        }
        for &part in &LOGIN_PARTS {
            if !self.exchange_login(hw, &mut exchange, part, part) {
                return false;
            }
        }
        true
    }

    fn exchange_login(
        &mut self,
        hw: &mut impl AdapterPort,
        exchange: &mut LoginExchange,
        part: u16,
        expected: u16,
    ) -> bool {
        let request = exchange.request(part);
        let response = self.transfer_plain(hw, request);
        exchange.verify(part, expected, response)
    }

    // ── Transactions ──────────────────────────────────────────

    /// One command/response transaction on the foreground path.
    /// `None` on any echo, magic, acknowledge, or capacity violation.
    fn send_command(
        &mut self,
        hw: &mut impl AdapterPort,
        command: Command,
        params: &[u32],
    ) -> Option<Vec<u32, RESPONSE_CAP>> {
        let word = codec::command_word(command, params.len() as u8);
        if self.transfer_acked(hw, word)? != DATA_REQUEST {
            return None;
        }
        for &param in params {
            if self.transfer_acked(hw, param)? != DATA_REQUEST {
                return None;
            }
        }

        let response = self.transfer_acked(hw, DATA_REQUEST)?;
        let count = usize::from(codec::parse_response_word(response, command)?);
        if count > RESPONSE_CAP {
            return None;
        }

        let mut responses = Vec::new();
        for _ in 0..count {
            let word = self.transfer_acked(hw, DATA_REQUEST)?;
            responses.push(word).ok()?;
        }
        Some(responses)
    }

    /// Blocking transfer followed by the four-phase acknowledge (the
    /// 2 Mbps path).
    fn transfer_acked(&mut self, hw: &mut impl AdapterPort, word: u32) -> Option<u32> {
        let received = hw.transfer(word);
        if !self.acknowledge(hw) {
            return None;
        }
        Some(received)
    }

    /// Blocking transfer with a settling wait instead of the
    /// handshake (the 256 kbps login path).
    fn transfer_plain(&mut self, hw: &mut impl AdapterPort, word: u32) -> u32 {
        wait_lines(hw, TRANSFER_WAIT_LINES);
        hw.transfer(word)
    }

    /// The adapter's four-phase SO/SI handshake between transfers:
    /// SO low, SI high, SO high, SI low, SO low. Each phase is
    /// line-count bounded.
    fn acknowledge(&mut self, hw: &mut impl AdapterPort) -> bool {
        let mut counter = LineCounter::new(hw);

        hw.set_so(false);
        while !hw.si_high() {
            if counter.expired(hw, CMD_TIMEOUT_LINES) {
                return false;
            }
        }
        hw.set_so(true);
        while hw.si_high() {
            if counter.expired(hw, CMD_TIMEOUT_LINES) {
                return false;
            }
        }
        hw.set_so(false);

        true
    }

    // ── Snapshot publication ──────────────────────────────────

    /// Publish the back state to the foreground. Skipped while an
    /// unconsumed snapshot is pending, so the reader never observes
    /// a half-written list.
    fn copy_state(&mut self) {
        if self.snapshot_ready.load(Ordering::Acquire)
            && !self.snapshot_consumed.load(Ordering::Acquire)
        {
            return;
        }

        self.front.player_count = self.back.player_count;
        self.front.current_player_id = self.back.current_player_id;
        mem::swap(&mut self.front.incoming, &mut self.back.incoming);
        self.back.incoming.clear();

        self.snapshot_ready.store(true, Ordering::Release);
        self.snapshot_consumed.store(false, Ordering::Release);
    }
}

// ── Timebase helpers ──────────────────────────────────────────

/// Accumulates elapsed scan lines against a wrap-aware sample of the
/// vertical counter.
struct LineCounter {
    lines: u32,
    vcount: u16,
}

impl LineCounter {
    fn new(hw: &impl Timebase) -> Self {
        Self {
            lines: 0,
            vcount: hw.vcount(),
        }
    }

    fn expired(&mut self, hw: &impl Timebase, limit: u32) -> bool {
        let vcount = hw.vcount();
        if vcount != self.vcount {
            self.lines += u32::from(vcount.saturating_sub(self.vcount));
            self.vcount = vcount;
        }
        self.lines > limit
    }
}

/// Busy-wait for `lines` scan lines of the timebase.
fn wait_lines(hw: &impl Timebase, lines: u32) {
    let mut counter = LineCounter::new(hw);
    while !counter.expired(hw, lines.saturating_sub(1)) {}
}

/// Busy-wait for `frames` vertical blanking periods, invoking
/// `on_vblank` at each one.
fn wait_vblanks(hw: &impl Timebase, frames: u32, mut on_vblank: impl FnMut()) {
    let mut count = 0;
    let mut vcount = hw.vcount();

    while count < frames {
        let now = hw.vcount();
        if now != vcount {
            vcount = now;
            if now == VBLANK_LINE {
                on_vblank();
                count += 1;
            }
        }
    }
}

const _: () = assert!(proto::MAX_PLAYERS == 5);
