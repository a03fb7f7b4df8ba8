//! The consensus state machine.

use crate::round::{RoundRecord, RoundStep};
use crate::VoteOutcome;
use alioth_core::{Action, Event, OutboundMessage, TimeoutKind};
use alioth_messages::{FetchBlockResp, NewRoundMsg, ProposalMsg};
use alioth_pool::BlockPool;
use alioth_types::{
    Address, BftTimeouts, Block, ChainReader, Committee, Hash, KeyPair, Verification, VotePhase,
};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tracing::{debug, info, instrument, trace, warn};

/// The per-height round state machine.
///
/// Owned by a single task; every entry point is synchronous and returns the
/// actions the runtime must perform. The machine reads the chain and the
/// block pool but never writes outside its own state — commits go out as
/// [`Action::PersistBlock`] and come back as [`Event::NewHeight`].
pub struct ConsensusState {
    // ═══════════════════════════════════════════════════════════════════════
    // Collaborators
    // ═══════════════════════════════════════════════════════════════════════
    chain: Arc<dyn ChainReader>,
    pool: Arc<BlockPool>,
    signer: KeyPair,
    timeouts: BftTimeouts,

    // ═══════════════════════════════════════════════════════════════════════
    // Height state
    // ═══════════════════════════════════════════════════════════════════════
    /// Height under agreement.
    height: u64,
    /// Current round within the height.
    round: u64,
    /// Committee voting at this height.
    committee: Committee,
    /// Round records, current and future, keyed by round.
    rounds: HashMap<u64, RoundRecord>,
    /// Locked block: set on a 2f+1 pre-vote quorum, (hash, round).
    locked: Option<(Hash, u64)>,
    /// Most recent block known valid, (hash, round).
    valid: Option<(Hash, u64)>,
    /// Distinct members seen announcing each round of this height.
    announcements: HashMap<u64, BTreeSet<Address>>,
    /// Our own round announcements, for catch-up responses.
    our_round_msgs: HashMap<u64, NewRoundMsg>,
}

impl ConsensusState {
    /// Create a machine. It stays inert until the first `NewHeight` event.
    pub fn new(
        chain: Arc<dyn ChainReader>,
        pool: Arc<BlockPool>,
        signer: KeyPair,
        timeouts: BftTimeouts,
    ) -> Self {
        Self {
            chain,
            pool,
            signer,
            timeouts,
            height: 0,
            round: 0,
            committee: Committee::default(),
            rounds: HashMap::new(),
            locked: None,
            valid: None,
            announcements: HashMap::new(),
            our_round_msgs: HashMap::new(),
        }
    }

    /// Height under agreement.
    pub fn height(&self) -> u64 {
        self.height
    }

    /// Current round.
    pub fn round(&self) -> u64 {
        self.round
    }

    /// Current phase of the current round.
    pub fn step(&self) -> RoundStep {
        self.rounds
            .get(&self.round)
            .map(|r| r.step)
            .unwrap_or(RoundStep::NewRound)
    }

    /// Our verifier address.
    pub fn address(&self) -> Address {
        self.signer.address()
    }

    /// The locked block hash, if any.
    pub fn locked_block(&self) -> Option<Hash> {
        self.locked.map(|(hash, _)| hash)
    }

    /// The record of a round at the current height, if one exists.
    pub fn round_record(&self, round: u64) -> Option<&RoundRecord> {
        self.rounds.get(&round)
    }

    /// Process one event.
    #[instrument(skip(self, event), fields(
        event = event.type_name(),
        height = self.height,
        round = self.round
    ))]
    pub fn handle(&mut self, event: Event) -> Vec<Action> {
        match event {
            Event::NewHeight { height } => self.on_new_height(height),
            Event::NewRound { msg } => self.on_new_round_msg(msg),
            Event::Proposal { msg } => self.on_proposal(msg),
            Event::PreVote { vote } => self.on_vote(vote, VotePhase::PreVote),
            Event::Vote { vote } => self.on_vote(vote, VotePhase::Commit),
            Event::Timeout {
                kind,
                height,
                round,
            } => self.on_timeout(kind, height, round),
            Event::BlockArrived { block } => self.on_block_arrived(block),
            Event::RoundMsgRequested {
                peer,
                height,
                round,
            } => self.on_round_msg_requested(peer, height, round),
            Event::ProposalBlockRequested {
                peer,
                msg_id,
                block_hash,
            } => self.on_proposal_block_requested(peer, msg_id, block_hash),
        }
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Height and round progression
    // ═══════════════════════════════════════════════════════════════════════

    fn on_new_height(&mut self, height: u64) -> Vec<Action> {
        if height <= self.height && self.height != 0 {
            trace!(height, "stale height, ignoring");
            return vec![];
        }

        self.height = height;
        self.round = 0;
        self.committee = self.chain.verifiers_for(height);
        self.rounds.clear();
        self.locked = None;
        self.valid = None;
        self.announcements.clear();
        self.our_round_msgs.clear();
        self.pool.new_height(height);

        info!(
            height,
            committee = self.committee.len(),
            "entering new height"
        );
        self.enter_round(0)
    }

    fn enter_round(&mut self, round: u64) -> Vec<Action> {
        self.round = round;
        let height = self.height;
        {
            let record = self.ensure_round(round);
            if record.step < RoundStep::Propose {
                record.step = RoundStep::Propose;
            }
        }

        debug!(height, round, "entering round");

        let mut actions = vec![
            Action::CancelTimer {
                kind: TimeoutKind::PreVote,
            },
            Action::CancelTimer {
                kind: TimeoutKind::PreCommit,
            },
            Action::SetTimer {
                kind: TimeoutKind::Propose,
                height,
                round,
                duration: self.timeouts.propose_for(round),
            },
        ];

        // Record our announcement; broadcast it past round 0 so laggards
        // can follow the round progression.
        let announcement = NewRoundMsg::sign(height, round, &self.signer);
        self.our_round_msgs.insert(round, announcement.clone());
        if round > 0 {
            actions.push(Action::Broadcast {
                message: OutboundMessage::NewRound(announcement),
            });
        }

        if self.committee.proposer_for(height, round) == Some(self.address()) {
            actions.extend(self.try_propose());
        }

        // Messages for this round may have arrived while we were behind.
        actions.extend(self.reevaluate_current_round());
        actions
    }

    /// Propose a candidate if we are the proposer and have one.
    ///
    /// A locked or valid block from an earlier round is re-proposed;
    /// otherwise the freshest pool candidate goes out. With no candidate at
    /// hand we stay quiet and retry when the pool notifies an arrival.
    fn try_propose(&mut self) -> Vec<Action> {
        let height = self.height;
        let round = self.round;

        let already_proposed = self
            .rounds
            .get(&round)
            .map(|r| r.proposal.is_some())
            .unwrap_or(false);
        if already_proposed {
            return vec![];
        }

        let candidate = self
            .valid
            .or(self.locked)
            .and_then(|(hash, _)| self.find_block(&hash))
            .or_else(|| self.pool.latest());

        let Some(block) = candidate else {
            trace!(height, round, "proposer without candidate, waiting for pool");
            return vec![];
        };

        if block.height() != height {
            warn!(
                height,
                candidate_height = block.height(),
                "stale candidate in pool, not proposing"
            );
            return vec![];
        }

        let block_id = block.hash();
        let proposal = ProposalMsg::sign(height, round, block_id, &self.signer);

        info!(height, round, block = ?block_id, "proposing block");

        let record = self.ensure_round(round);
        record.proposal = Some(proposal.clone());
        record.proposal_block = Some(block);

        let mut actions = vec![Action::Broadcast {
            message: OutboundMessage::Proposal(proposal),
        }];
        // Pre-vote for our own proposal under the same lock rules as
        // everyone else.
        actions.extend(self.prevote_for_proposal(block_id));
        actions
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Proposal handling
    // ═══════════════════════════════════════════════════════════════════════

    fn on_proposal(&mut self, msg: ProposalMsg) -> Vec<Action> {
        if msg.height.0 != self.height {
            trace!(
                msg_height = msg.height.0,
                "proposal for another height, discarding"
            );
            return vec![];
        }
        if msg.round < self.round {
            trace!(msg_round = msg.round, "proposal for past round, discarding");
            return vec![];
        }

        if let Err(reason) = self.validate_proposal(&msg) {
            warn!(
                proposer = %msg.proposer(),
                round = msg.round,
                reason,
                "invalid proposal"
            );
            return vec![];
        }

        let round = msg.round;
        let record = self.ensure_round(round);

        if let Some(existing) = &record.proposal {
            if existing.block_id != msg.block_id {
                warn!(
                    proposer = %msg.proposer(),
                    first = ?existing.block_id,
                    second = ?msg.block_id,
                    "conflicting proposal from slot proposer, keeping first"
                );
            }
            return vec![];
        }

        let block_id = msg.block_id;
        let proposer = msg.proposer();

        match self.find_block(&block_id) {
            Some(block) => {
                let record = self.ensure_round(round);
                record.proposal = Some(msg);
                record.proposal_block = Some(block);

                if round == self.round {
                    let mut actions = self.prevote_for_proposal(block_id);
                    actions.extend(self.reevaluate_current_round());
                    actions
                } else {
                    // Future round: recorded, evaluated when we get there.
                    vec![]
                }
            }
            None => {
                debug!(block = ?block_id, %proposer, "proposal references unseen block, fetching");
                let record = self.ensure_round(round);
                record.pending_proposal = Some(msg);
                vec![Action::FetchBlock {
                    peer: proposer,
                    block_hash: block_id,
                }]
            }
        }
    }

    /// Check slot, signature and committee membership of a proposal.
    fn validate_proposal(&self, msg: &ProposalMsg) -> Result<(), &'static str> {
        let expected = self
            .committee
            .proposer_for(msg.height.0, msg.round)
            .ok_or("empty committee")?;
        if msg.proposer() != expected {
            return Err("wrong proposer for slot");
        }
        if !msg.verify() {
            return Err("bad signature");
        }
        Ok(())
    }

    /// Pre-vote in the current round per the lock rules: an unlocked node
    /// votes the proposal, a node locked on it re-affirms, a node locked
    /// elsewhere votes nil.
    fn prevote_for_proposal(&mut self, block_id: Hash) -> Vec<Action> {
        let Some(record) = self.rounds.get(&self.round) else {
            return vec![];
        };
        if record.prevote_sent || record.step > RoundStep::PreVote {
            return vec![];
        }

        let target = match self.locked {
            None => Some(block_id),
            Some((locked_hash, _)) if locked_hash == block_id => Some(block_id),
            Some(_) => None,
        };
        self.broadcast_prevote(target)
    }

    fn broadcast_prevote(&mut self, target: Option<Hash>) -> Vec<Action> {
        let height = self.height;
        let round = self.round;

        let vote = Verification::sign(height, round, VotePhase::PreVote, target, &self.signer);

        debug!(height, round, target = ?target, "pre-voting");

        let record = self.ensure_round(round);
        record.prevote_sent = true;
        record.step = RoundStep::PreVote;
        record.prevotes.add(vote.clone());

        let mut actions = vec![
            Action::SetTimer {
                kind: TimeoutKind::PreVote,
                height,
                round,
                duration: self.timeouts.prevote_for(round),
            },
            Action::Broadcast {
                message: OutboundMessage::PreVote(vote),
            },
        ];
        actions.extend(self.evaluate_prevotes());
        actions
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Vote handling
    // ═══════════════════════════════════════════════════════════════════════

    fn on_vote(&mut self, vote: Verification, phase: VotePhase) -> Vec<Action> {
        if vote.height.0 != self.height {
            trace!(vote_height = vote.height.0, "vote for another height, discarding");
            return vec![];
        }
        if vote.round < self.round {
            trace!(vote_round = vote.round, "vote for past round, discarding");
            return vec![];
        }
        if vote.phase != phase {
            warn!(voter = %vote.voter(), "vote phase does not match its wire code");
            return vec![];
        }
        if !self.committee.contains(&vote.voter()) {
            warn!(voter = %vote.voter(), "vote from outside the committee");
            return vec![];
        }
        if !vote.verify() {
            warn!(voter = %vote.voter(), "vote signature invalid");
            return vec![];
        }

        let round = vote.round;
        let record = self.ensure_round(round);
        let outcome = match phase {
            VotePhase::PreVote => record.prevotes.add(vote),
            VotePhase::Commit => record.votes.add(vote),
        };

        match outcome {
            VoteOutcome::Duplicate => return vec![],
            VoteOutcome::Equivocation => {
                // Evidence retained in the set; nothing counts.
                return vec![];
            }
            VoteOutcome::Added => {}
        }

        if round != self.round {
            return vec![];
        }
        match phase {
            VotePhase::PreVote => self.evaluate_prevotes(),
            VotePhase::Commit => self.evaluate_votes(),
        }
    }

    /// Apply pre-vote quorum rules for the current round.
    fn evaluate_prevotes(&mut self) -> Vec<Action> {
        let quorum = self.committee.quorum();
        let round = self.round;

        let (target, total) = match self.rounds.get(&round) {
            Some(record) => (
                record.prevotes.quorum_target(quorum),
                record.prevotes.total(),
            ),
            None => return vec![],
        };

        match target {
            Some(Some(hash)) => {
                // 2f+1 for one block: it becomes valid and we lock on it.
                if self.locked != Some((hash, round)) {
                    info!(height = self.height, round, block = ?hash, "locked on block");
                }
                self.valid = Some((hash, round));
                self.locked = Some((hash, round));
                self.broadcast_vote(Some(hash))
            }
            Some(None) => self.broadcast_vote(None),
            // Mixed 2f+1 without a single target: vote nil.
            None if total >= quorum => self.broadcast_vote(None),
            None => vec![],
        }
    }

    fn broadcast_vote(&mut self, target: Option<Hash>) -> Vec<Action> {
        let height = self.height;
        let round = self.round;

        {
            let record = self.ensure_round(round);
            if record.vote_sent {
                return vec![];
            }
            record.vote_sent = true;
            if record.step < RoundStep::PreCommit {
                record.step = RoundStep::PreCommit;
            }
        }

        debug!(height, round, target = ?target, "voting");

        let vote = Verification::sign(height, round, VotePhase::Commit, target, &self.signer);
        self.ensure_round(round).votes.add(vote.clone());

        let mut actions = vec![
            Action::CancelTimer {
                kind: TimeoutKind::PreVote,
            },
            Action::SetTimer {
                kind: TimeoutKind::PreCommit,
                height,
                round,
                duration: self.timeouts.precommit_for(round),
            },
            Action::Broadcast {
                message: OutboundMessage::Vote(vote),
            },
        ];
        actions.extend(self.evaluate_votes());
        actions
    }

    /// Apply commit-vote quorum rules for the current round.
    fn evaluate_votes(&mut self) -> Vec<Action> {
        let quorum = self.committee.quorum();
        let round = self.round;

        let target = match self.rounds.get(&round) {
            Some(record) if !record.commit_emitted => record.votes.quorum_target(quorum),
            _ => return vec![],
        };

        match target {
            Some(Some(hash)) => self.commit(hash),
            Some(None) => {
                debug!(height = self.height, round, "nil vote quorum, advancing round");
                self.enter_round(round + 1)
            }
            None => vec![],
        }
    }

    /// Emit the commit for a decided block.
    ///
    /// The pre-commit timer stays armed: if persistence fails the round
    /// times out and the next round re-decides the same block.
    fn commit(&mut self, hash: Hash) -> Vec<Action> {
        let round = self.round;

        let Some(block) = self.find_block(&hash) else {
            // Decided without holding the block (we voted nil). Pull it
            // from the slot proposer, then commit on arrival.
            let Some(proposer) = self.committee.proposer_for(self.height, round) else {
                return vec![];
            };
            debug!(block = ?hash, "commit quorum without block, fetching");
            return vec![Action::FetchBlock {
                peer: proposer,
                block_hash: hash,
            }];
        };

        let record = self.ensure_round(round);
        record.step = RoundStep::Commit;
        record.commit_emitted = true;
        let commits = record.votes.votes_for(Some(&hash));

        info!(
            height = self.height,
            round,
            block = ?hash,
            commits = commits.len(),
            "committing block"
        );

        vec![
            Action::CancelTimer {
                kind: TimeoutKind::Propose,
            },
            Action::CancelTimer {
                kind: TimeoutKind::PreVote,
            },
            Action::PersistBlock { block, commits },
        ]
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Timeouts
    // ═══════════════════════════════════════════════════════════════════════

    fn on_timeout(&mut self, kind: TimeoutKind, height: u64, round: u64) -> Vec<Action> {
        if height != self.height || round != self.round {
            trace!(?kind, height, round, "stale timeout, ignoring");
            return vec![];
        }

        debug!(?kind, height, round, "phase timed out");

        match kind {
            TimeoutKind::Propose => {
                let prevoted = self
                    .rounds
                    .get(&round)
                    .map(|r| r.prevote_sent)
                    .unwrap_or(false);
                if prevoted {
                    return vec![];
                }
                // No proposal in time. A locked node keeps affirming its
                // lock; everyone else pre-votes nil.
                let target = self.locked.map(|(hash, _)| hash);
                self.broadcast_prevote(target)
            }
            TimeoutKind::PreVote => {
                let voted = self
                    .rounds
                    .get(&round)
                    .map(|r| r.vote_sent)
                    .unwrap_or(false);
                if voted {
                    return vec![];
                }
                self.broadcast_vote(None)
            }
            TimeoutKind::PreCommit => self.enter_round(round + 1),
        }
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Block arrival and catch-up
    // ═══════════════════════════════════════════════════════════════════════

    fn on_block_arrived(&mut self, block: Arc<Block>) -> Vec<Action> {
        if block.height() != self.height {
            trace!(
                block_height = block.height(),
                "block for another height, ignoring"
            );
            return vec![];
        }

        let hash = block.hash();
        let round = self.round;
        let mut actions = Vec::new();

        // A pending proposal waiting on exactly this block?
        let pending = self
            .rounds
            .get_mut(&round)
            .and_then(|record| {
                if record
                    .pending_proposal
                    .as_ref()
                    .is_some_and(|p| p.block_id == hash)
                {
                    record.pending_proposal.take()
                } else {
                    None
                }
            });
        if let Some(proposal) = pending {
            debug!(block = ?hash, "fetched block resolves pending proposal");
            let record = self.ensure_round(round);
            record.proposal = Some(proposal);
            record.proposal_block = Some(Arc::clone(&block));
            actions.extend(self.prevote_for_proposal(hash));
        }

        // A proposer that was waiting for a candidate can propose now.
        if self.committee.proposer_for(self.height, round) == Some(self.address()) {
            actions.extend(self.try_propose());
        }

        // A commit that was waiting for the block body can proceed.
        actions.extend(self.reevaluate_current_round());
        actions
    }

    fn on_new_round_msg(&mut self, msg: NewRoundMsg) -> Vec<Action> {
        if msg.height.0 != self.height {
            return vec![];
        }
        if !self.committee.contains(&msg.sender()) || !msg.verify() {
            warn!(sender = %msg.sender(), "invalid round announcement");
            return vec![];
        }
        if msg.round <= self.round {
            return vec![];
        }

        let entry = self.announcements.entry(msg.round).or_default();
        entry.insert(msg.sender());
        let count = entry.len();

        // f+1 distinct members ahead of us cannot all be Byzantine; follow.
        if count > self.committee.max_faulty() {
            info!(
                height = self.height,
                from = self.round,
                to = msg.round,
                "round catch-up"
            );
            return self.enter_round(msg.round);
        }
        vec![]
    }

    fn on_round_msg_requested(&mut self, peer: Address, height: u64, round: u64) -> Vec<Action> {
        if height != self.height {
            return vec![];
        }
        match self.our_round_msgs.get(&round) {
            Some(msg) => vec![Action::SendTo {
                peer,
                message: OutboundMessage::NewRound(msg.clone()),
            }],
            None => vec![],
        }
    }

    /// Serve a fetch that missed the pool: round records first, then the
    /// chain for blocks already committed.
    fn on_proposal_block_requested(
        &mut self,
        peer: Address,
        msg_id: u64,
        block_hash: Hash,
    ) -> Vec<Action> {
        let block = self
            .rounds
            .values()
            .find_map(|record| {
                record
                    .proposal_block
                    .as_ref()
                    .filter(|b| b.hash() == block_hash)
                    .cloned()
            })
            .or_else(|| self.chain.get_block_by_hash(&block_hash));
        match block {
            Some(block) => vec![Action::SendTo {
                peer,
                message: OutboundMessage::FetchBlockResp(Box::new(FetchBlockResp {
                    msg_id,
                    block: Some((*block).clone()),
                })),
            }],
            // Nothing to serve; the requester's fetch will time out.
            None => vec![],
        }
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Helpers
    // ═══════════════════════════════════════════════════════════════════════

    fn ensure_round(&mut self, round: u64) -> &mut RoundRecord {
        self.rounds
            .entry(round)
            .or_insert_with(|| RoundRecord::new(round))
    }

    /// Look a block up in the pool, then in the round records.
    fn find_block(&self, hash: &Hash) -> Option<Arc<Block>> {
        self.pool.get_block_by_hash(hash).or_else(|| {
            self.rounds.values().find_map(|record| {
                record
                    .proposal_block
                    .as_ref()
                    .filter(|b| b.hash() == *hash)
                    .cloned()
            })
        })
    }

    /// Re-run the quorum checks of the current round.
    ///
    /// Used after round entry and block arrival, when the round record may
    /// already hold a decisive message set.
    fn reevaluate_current_round(&mut self) -> Vec<Action> {
        let round = self.round;

        // An already-recorded proposal we have not pre-voted on yet.
        let proposal_target = self.rounds.get(&round).and_then(|record| {
            if record.proposal_block.is_some() && !record.prevote_sent {
                record.proposal.as_ref().map(|p| p.block_id)
            } else {
                None
            }
        });

        let mut actions = Vec::new();
        if let Some(block_id) = proposal_target {
            actions.extend(self.prevote_for_proposal(block_id));
        }
        actions.extend(self.evaluate_prevotes());
        actions.extend(self.evaluate_votes());
        actions
    }
}

impl std::fmt::Debug for ConsensusState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConsensusState")
            .field("address", &self.address())
            .field("height", &self.height)
            .field("round", &self.round)
            .field("step", &self.step())
            .field("locked", &self.locked)
            .finish()
    }
}
