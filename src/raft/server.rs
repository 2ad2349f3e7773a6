use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use actix::prelude::*;
use rand::Rng;

use crate::config::RaftConfig;
use crate::membership::Membership;
use crate::storage::log::Log;
use crate::storage::server_state::DurableServerState;
use crate::util::errors::{RaftError, Result};

use super::append::{self, AppendOutcome};
use super::election;
use super::rpc::{
    AppendResponse, CommandRequest, CommandResponse, Envelope, RaftMessage, VoteResponse, NO_INDEX,
};
use super::state::{Role, RoleState};
use super::tracker::MajorityTracker;
use super::types::{Command, CommandListener, LogIndex, RequestId, ServerId, Term};

// lower and upper bound for the randomized candidacy back-off
const CANDIDACY_BACKOFF_MIN_MS: u64 = 100;
const CANDIDACY_BACKOFF_MAX_MS: u64 = 300;

/// Tells the server to start participating in the cluster. Idempotent.
#[derive(Message)]
#[rtype(result = "()")]
pub struct Start;

/// Tells the server to stop. Pending timers are cancelled and new work is
/// rejected; in-flight work completes.
#[derive(Message)]
#[rtype(result = "()")]
pub struct Shutdown;

/// Delivers a decoded message from a peer.
#[derive(Message)]
#[rtype(result = "()")]
pub struct Deliver(pub Envelope);

/// Submits a client command, optionally tracking its outcome.
#[derive(Message)]
#[rtype(result = "()")]
pub struct Submit {
    pub command: Command,
    pub listener: Option<CommandListener>,
}

/// Queries the server's observable state, for monitoring and tests.
#[derive(Message)]
#[rtype(result = "StatusInfo")]
pub struct Status;

#[derive(Debug, Clone)]
pub struct StatusInfo {
    pub server_id: ServerId,
    pub role: Role,
    pub term: Term,
    pub commit_index: LogIndex,
    pub last_log_index: LogIndex,
    pub leader_id: Option<ServerId>,
}

impl<A, M> actix::dev::MessageResponse<A, M> for StatusInfo
where
    A: Actor,
    M: Message<Result = StatusInfo>,
{
    fn handle(self, _ctx: &mut A::Context, tx: Option<actix::dev::OneshotSender<M::Result>>) {
        if let Some(tx) = tx {
            let _ = tx.send(self);
        }
    }
}

/// One server of the replicated cluster: the follower/candidate/leader
/// state machine, its timers and its RPC handlers.
///
/// The actor mailbox serializes every handler and every state transition,
/// so handlers may touch all state freely. A single timer exists at any
/// moment: the term timeout while following, the campaign back-off while
/// candidating, or the heartbeat interval while leading; each transition
/// cancels the previous timer and schedules its own. Peer delivery may
/// reorder messages in flight, which the stale term and index checks
/// absorb.
pub struct RaftServer {
    role: RoleState,
    durable: DurableServerState,
    log: Box<dyn Log>,
    membership: Arc<dyn Membership>,
    tracker: MajorityTracker,
    heartbeat_period: Duration,
    term_timeout: Duration,
    /// Listeners for entries this server appended as leader, keyed by index
    local_listeners: HashMap<LogIndex, CommandListener>,
    /// Listeners for commands forwarded to the leader, keyed by request
    remote_waiters: HashMap<RequestId, CommandListener>,
    request_seq: RequestId,
    timer: Option<SpawnHandle>,
    active: bool,
}

impl RaftServer {
    /// Assembles a server from its collaborators. The durable commit index
    /// is replayed into the log (and through it the state machine) before
    /// the server sees any traffic.
    pub fn new(
        durable: DurableServerState,
        mut log: Box<dyn Log>,
        membership: Arc<dyn Membership>,
        config: &RaftConfig,
    ) -> Result<Self> {
        config.validate()?;

        log.applied(durable.commit_index());

        let mut tracker = MajorityTracker::new(membership.clone());
        tracker.update_term(durable.current_term());

        Ok(Self {
            role: RoleState::new(durable.server_id()),
            durable,
            log,
            membership,
            tracker,
            heartbeat_period: config.heartbeat(),
            term_timeout: config.term_timeout(),
            local_listeners: HashMap::new(),
            remote_waiters: HashMap::new(),
            request_seq: 1,
            timer: None,
            active: false,
        })
    }

    pub fn id(&self) -> ServerId {
        self.role.server_id
    }

    /* RPC logic routines */

    fn request_vote(
        &mut self,
        sender_id: ServerId,
        msg_term: Term,
        request: &super::rpc::VoteRequest,
        ctx: &mut Context<Self>,
    ) -> Option<Envelope> {
        let response =
            match election::handle_vote_request(&mut self.durable, &*self.log, sender_id, msg_term, request)
            {
                Ok(response) => response,
                Err(err) => {
                    self.fail(err, ctx);
                    return None;
                }
            };

        if response.granted {
            // fall back to following whoever wins this election
            self.convert_to_follower(None, ctx);
        }

        Some(Envelope::new(
            self.id(),
            msg_term,
            RaftMessage::VoteResponse(response),
        ))
    }

    fn respond_vote(&mut self, sender_id: ServerId, msg_term: Term, response: &VoteResponse, ctx: &mut Context<Self>) {
        if !response.granted {
            return;
        }

        // only count votes for the current, ongoing election
        if msg_term < self.durable.current_term() || !self.role.is_candidate() {
            return;
        }

        if self.tracker.received_vote(sender_id, msg_term) {
            self.convert_to_leader(ctx);
        }
    }

    fn request_append(
        &mut self,
        sender_id: ServerId,
        msg_term: Term,
        request: &super::rpc::AppendRequest,
        ctx: &mut Context<Self>,
    ) -> Option<Envelope> {
        let outcome =
            match append::handle_append_request(&self.durable, &mut *self.log, sender_id, msg_term, request) {
                Ok(outcome) => outcome,
                Err(err) => {
                    self.fail(err, ctx);
                    return None;
                }
            };
        let AppendOutcome {
            response,
            accepted,
            commit_to,
            fatal,
        } = outcome;

        if fatal {
            // answer first so the leader stops resyncing us, then stop
            self.reply(sender_id, Envelope::new(self.id(), msg_term, RaftMessage::AppendResponse(response)));
            self.fail(
                RaftError::DivergedPastCommit {
                    index: request.prev_log_index,
                    commit_index: self.durable.commit_index(),
                },
                ctx,
            );
            return None;
        }

        if accepted {
            self.convert_to_follower(Some(sender_id), ctx);
            self.apply_index(commit_to);
        }

        Some(Envelope::new(
            self.id(),
            msg_term,
            RaftMessage::AppendResponse(response),
        ))
    }

    fn respond_append(&mut self, sender_id: ServerId, msg_term: Term, response: &AppendResponse) {
        if msg_term < self.durable.current_term() || !self.role.is_leader() {
            return;
        }

        if response.ok {
            let applied =
                self.tracker
                    .appended(sender_id, response.index, self.log.commit_index());
            if applied != 0 {
                self.apply_index(applied);
                // propagate the new commit index without waiting a period
                self.send_heartbeat();
            }
            return;
        }

        // the follower is out of step; roll back to the point it indicated
        // (unless it indicated that there is no point to resync from)
        if response.index == NO_INDEX {
            return;
        }

        let catch_up = match append::create_catch_up(
            self.id(),
            self.durable.current_term(),
            &*self.log,
            response.index,
        ) {
            Ok(envelope) => envelope,
            Err(err) => {
                tracing::warn!(
                    "server {} cannot build catch-up from {} for {sender_id}: {err}",
                    self.id(),
                    response.index
                );
                return;
            }
        };
        self.reply(sender_id, catch_up);
    }

    fn request_command(
        &mut self,
        _sender_id: ServerId,
        request: CommandRequest,
        ctx: &mut Context<Self>,
    ) -> Option<Envelope> {
        let current_term = self.durable.current_term();

        // only the leader appends commands to the log
        if !self.role.is_leader() {
            return request.request_id.map(|request_id| {
                Envelope::command_response(self.id(), current_term, request_id, None)
            });
        }

        let prev_index = self.log.last_index();
        let prev_term = self.log.last_term();
        if let Err(err) = self.log.append(request.command.clone(), current_term) {
            self.fail(err, ctx);
            return None;
        }

        self.membership.broadcast(Envelope::append_request(
            self.id(),
            current_term,
            prev_index,
            prev_term,
            vec![request.command],
            self.log.commit_index(),
        ));

        // the leader itself has already appended the entry; in a cluster of
        // one that self-acknowledgement is the majority
        let applied = self
            .tracker
            .appended(self.id(), prev_index + 1, self.log.commit_index());
        if applied != 0 {
            self.apply_index(applied);
        }

        request.request_id.map(|request_id| {
            Envelope::command_response(self.id(), current_term, request_id, Some(prev_index + 1))
        })
    }

    fn respond_command(&mut self, response: &CommandResponse) {
        let Some(listener) = self.remote_waiters.remove(&response.request_id) else {
            tracing::warn!(
                "server {} got a command response for unknown request {}",
                self.id(),
                response.request_id
            );
            return;
        };

        match response.entry_index {
            None => listener.failed(),
            // already applied locally by the time the response arrived
            Some(index) if index <= self.log.commit_index() => listener.applied(),
            Some(index) => {
                self.local_listeners.insert(index, listener);
            }
        }
    }

    /* State transition routines */

    /// Moves to a newer term. Returns false when the durable write failed
    /// and the server has halted.
    fn update_term(&mut self, term: Term, ctx: &mut Context<Self>) -> bool {
        if term == self.durable.current_term() {
            return true;
        }

        if let Err(err) = self.durable.update_current_term(term) {
            self.fail(err, ctx);
            return false;
        }
        self.tracker.update_term(term);
        true
    }

    fn convert_to_follower(&mut self, leader_id: Option<ServerId>, ctx: &mut Context<Self>) {
        self.role.become_follower(leader_id);
        self.schedule_election_timeout(self.term_timeout, ctx);
    }

    fn convert_to_candidate(&mut self, ctx: &mut Context<Self>) {
        self.role.become_candidate();

        let new_term = self.durable.current_term() + 1;
        if !self.update_term(new_term, ctx) {
            return;
        }
        if let Err(err) = self.durable.update_voted_for(self.id()) {
            self.fail(err, ctx);
            return;
        }

        if self.tracker.received_vote(self.id(), new_term) {
            // a cluster this small elects itself
            self.convert_to_leader(ctx);
        } else {
            let backoff = Duration::from_millis(
                rand::thread_rng().gen_range(CANDIDACY_BACKOFF_MIN_MS..CANDIDACY_BACKOFF_MAX_MS),
            );
            self.schedule_election_timeout(backoff, ctx);

            self.membership
                .broadcast(election::create_vote_request(self.id(), new_term, &*self.log));
        }
    }

    fn convert_to_leader(&mut self, ctx: &mut Context<Self>) {
        self.role.become_leader();
        // fresh match tracking for the term being led
        self.tracker.update_term(self.durable.current_term());
        self.start_heartbeat(ctx);
    }

    /// Advances the commit pointer: persists it (best-effort), applies the
    /// newly committed entries and fires any listeners waiting on them.
    fn apply_index(&mut self, index: LogIndex) {
        let index = index.min(self.log.last_index());
        self.durable.update_commit_index(index);

        let prev_commit = self.log.commit_index();
        self.log.applied(index);

        for i in (prev_commit + 1)..=index {
            if let Some(listener) = self.local_listeners.remove(&i) {
                listener.applied();
            }
        }
    }

    /* Timer utilities */

    fn schedule_election_timeout(&mut self, timeout: Duration, ctx: &mut Context<Self>) {
        if let Some(handle) = self.timer.take() {
            ctx.cancel_future(handle);
        }

        self.timer = Some(ctx.run_later(timeout, |server, ctx| {
            if !server.active || server.role.is_leader() {
                return;
            }
            tracing::info!("server {} election timeout, announcing candidacy", server.id());
            server.convert_to_candidate(ctx);
        }));
    }

    fn start_heartbeat(&mut self, ctx: &mut Context<Self>) {
        if let Some(handle) = self.timer.take() {
            ctx.cancel_future(handle);
        }

        self.send_heartbeat();
        self.timer = Some(ctx.run_interval(self.heartbeat_period, |server, _ctx| {
            if !server.active {
                return;
            }
            server.send_heartbeat();
        }));
    }

    fn send_heartbeat(&mut self) {
        // elections can happen back to back, leaving a heartbeat scheduled
        // by a deposed leader; re-check the role before sending
        if !self.role.is_leader() {
            return;
        }

        self.membership.broadcast(append::create_heartbeat(
            self.id(),
            self.durable.current_term(),
            &*self.log,
        ));
    }

    /* Failure handling */

    fn reply(&self, target: ServerId, envelope: Envelope) {
        match self.membership.find(target) {
            Some(peer) => peer.invoke(envelope),
            None => tracing::debug!(
                "server {} dropping {} for unknown peer {target}",
                self.id(),
                envelope.message.kind()
            ),
        }
    }

    /// Stops the role engine after an unrecoverable fault (durable write
    /// failure or log safety violation).
    fn fail(&mut self, err: RaftError, ctx: &mut Context<Self>) {
        tracing::error!("server {} halting: {err}", self.id());
        self.active = false;
        if let Some(handle) = self.timer.take() {
            ctx.cancel_future(handle);
        }
        ctx.stop();
    }
}

impl Actor for RaftServer {
    type Context = Context<Self>;

    fn started(&mut self, _ctx: &mut Self::Context) {
        tracing::debug!("server {} mailbox running", self.id());
    }

    fn stopped(&mut self, _ctx: &mut Self::Context) {
        tracing::debug!("server {} stopped", self.id());
    }
}

impl Handler<Start> for RaftServer {
    type Result = ();

    fn handle(&mut self, _msg: Start, ctx: &mut Context<Self>) {
        if self.active {
            return;
        }
        self.active = true;

        // a lone server has nobody to wait for and elects itself
        if self.membership.count() < 2 {
            self.convert_to_candidate(ctx);
        } else {
            self.convert_to_follower(None, ctx);
        }
    }
}

impl Handler<Shutdown> for RaftServer {
    type Result = ();

    fn handle(&mut self, _msg: Shutdown, ctx: &mut Context<Self>) {
        if !self.active {
            return;
        }
        self.active = false;

        if let Some(handle) = self.timer.take() {
            ctx.cancel_future(handle);
        }
        ctx.stop();
    }
}

impl Handler<Deliver> for RaftServer {
    type Result = ();

    fn handle(&mut self, Deliver(envelope): Deliver, ctx: &mut Context<Self>) {
        if !self.active {
            tracing::trace!(
                "server {} inactive, dropping {}",
                self.id(),
                envelope.message.kind()
            );
            return;
        }

        // any message from a newer term deposes us first
        if envelope.term > self.durable.current_term() {
            if !self.update_term(envelope.term, ctx) {
                return;
            }
            self.convert_to_follower(Some(envelope.sender_id), ctx);
        }

        let Envelope {
            sender_id,
            term,
            message,
        } = envelope;

        let response = match message {
            RaftMessage::VoteRequest(request) => self.request_vote(sender_id, term, &request, ctx),
            RaftMessage::VoteResponse(response) => {
                self.respond_vote(sender_id, term, &response, ctx);
                None
            }
            RaftMessage::AppendRequest(request) => {
                self.request_append(sender_id, term, &request, ctx)
            }
            RaftMessage::AppendResponse(response) => {
                self.respond_append(sender_id, term, &response);
                None
            }
            RaftMessage::CommandRequest(request) => self.request_command(sender_id, request, ctx),
            RaftMessage::CommandResponse(response) => {
                self.respond_command(&response);
                None
            }
        };

        if let Some(response) = response {
            self.reply(sender_id, response);
        }
    }
}

impl Handler<Submit> for RaftServer {
    type Result = ();

    fn handle(&mut self, msg: Submit, ctx: &mut Context<Self>) {
        // reject outright when inactive or when no leader is known
        if !self.active || self.role.leader_id.is_none() {
            if let Some(listener) = msg.listener {
                listener.failed();
            }
            return;
        }

        let current_term = self.durable.current_term();

        if self.role.leader_is_self() {
            debug_assert!(self.role.is_leader(), "leadership mismatch");

            // track the listener under the index the append will land on,
            // then run the leader path directly
            if let Some(listener) = msg.listener {
                self.local_listeners
                    .insert(self.log.last_index() + 1, listener);
            }
            let request = CommandRequest {
                command: msg.command,
                request_id: None,
            };
            self.request_command(self.id(), request, ctx);
            return;
        }

        // forward to the believed leader, correlating a response only when
        // someone is waiting on the outcome
        let leader_id = self.role.leader_id.expect("leader checked above");
        let Some(leader) = self.membership.find(leader_id) else {
            if let Some(listener) = msg.listener {
                listener.failed();
            }
            return;
        };

        let request_id = msg.listener.map(|listener| {
            let request_id = self.request_seq;
            self.request_seq += 1;
            self.remote_waiters.insert(request_id, listener);
            request_id
        });

        leader.invoke(Envelope::command_request(
            self.id(),
            current_term,
            msg.command,
            request_id,
        ));
    }
}

impl Handler<Status> for RaftServer {
    type Result = StatusInfo;

    fn handle(&mut self, _msg: Status, _ctx: &mut Context<Self>) -> StatusInfo {
        StatusInfo {
            server_id: self.id(),
            role: self.role.role,
            term: self.durable.current_term(),
            commit_index: self.log.commit_index(),
            last_log_index: self.log.last_index(),
            leader_id: self.role.leader_id,
        }
    }
}
