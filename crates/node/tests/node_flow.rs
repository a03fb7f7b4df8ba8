//! Node runtime integration tests.

use alioth_builder::BlockBuilder;
use alioth_harness::{MemoryChain, TestCommittee};
use alioth_messages::{ConsensusMsg, Envelope, FetchBlockResp, WireError};
use alioth_node::{BftNode, Fetcher, NetworkSender, NodeConfig, NodeError};
use alioth_types::{
    Address, BftTimeouts, Block, ChainConfig, ChainReader, ChainWriter, Committee, Hash, KeyPair,
    Verification, VotePhase,
};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;

/// Transport stub: records every outbound envelope.
#[derive(Default)]
struct CapturingNetwork {
    sent: Mutex<Vec<(Option<Address>, Envelope)>>,
}

impl CapturingNetwork {
    fn messages(&self) -> Vec<(Option<Address>, ConsensusMsg)> {
        self.sent
            .lock()
            .iter()
            .filter_map(|(peer, envelope)| {
                ConsensusMsg::decode(envelope).ok().map(|msg| (*peer, msg))
            })
            .collect()
    }

    fn last_fetch_request(&self) -> Option<(u64, Hash)> {
        self.messages()
            .into_iter()
            .rev()
            .find_map(|(_, msg)| match msg {
                ConsensusMsg::FetchBlockReq(req) => Some((req.msg_id, req.block_hash)),
                _ => None,
            })
    }
}

impl NetworkSender for CapturingNetwork {
    fn broadcast(&self, envelope: Envelope) {
        self.sent.lock().push((None, envelope));
    }

    fn send_to(&self, peer: Address, envelope: Envelope) {
        self.sent.lock().push((Some(peer), envelope));
    }
}

async fn wait_until(mut check: impl FnMut() -> bool) {
    for _ in 0..200 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached within 2s");
}

fn build_candidate(chain: &Arc<MemoryChain>, signer: &KeyPair) -> Arc<Block> {
    // Wall-clock stamped so the pool's timestamp restriction accepts it.
    let block = BlockBuilder::new(
        Arc::clone(chain) as Arc<dyn ChainReader>,
        chain.current_block(),
        signer.clone(),
        Vec::new(),
        chain.seen_commits(chain.head_height()),
    )
    .build()
    .expect("candidate build");
    Arc::new(block)
}

fn fast_config() -> NodeConfig {
    NodeConfig {
        fetch_timeout: Duration::from_millis(200),
        sync_block_announce_delay: Duration::from_millis(10),
        ..NodeConfig::default()
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Fetcher
// ═══════════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn fetch_returns_the_correlated_block() {
    let network = Arc::new(CapturingNetwork::default());
    let fetcher = Arc::new(Fetcher::new(
        network.clone() as Arc<dyn NetworkSender>,
        Duration::from_secs(2),
    ));
    fetcher.start();

    let committee = TestCommittee::new(4, 10);
    let chain = MemoryChain::with_committee(ChainConfig::default(), &committee);
    let block = build_candidate(&chain, committee.keypair(0));
    let hash = block.hash();
    let peer = committee.addresses()[1];

    let fetch = {
        let fetcher = Arc::clone(&fetcher);
        tokio::spawn(async move { fetcher.fetch_block(peer, hash).await })
    };

    wait_until(|| network.last_fetch_request().is_some()).await;
    let (msg_id, wanted) = network.last_fetch_request().unwrap();
    assert_eq!(wanted, hash);

    fetcher.on_response(FetchBlockResp {
        msg_id,
        block: Some((*block).clone()),
    });

    let fetched = fetch.await.unwrap();
    assert_eq!(fetched.map(|b| b.hash()), Some(hash));
    assert_eq!(fetcher.pending_count(), 0);
}

#[tokio::test]
async fn fetch_never_returns_a_mismatched_block() {
    let network = Arc::new(CapturingNetwork::default());
    let fetcher = Arc::new(Fetcher::new(
        network.clone() as Arc<dyn NetworkSender>,
        Duration::from_secs(2),
    ));
    fetcher.start();

    let committee = TestCommittee::new(4, 10);
    let chain = MemoryChain::with_committee(ChainConfig::default(), &committee);
    let block = build_candidate(&chain, committee.keypair(0));
    let wanted = Hash::from_bytes(b"something-else");
    let peer = committee.addresses()[1];

    let fetch = {
        let fetcher = Arc::clone(&fetcher);
        tokio::spawn(async move { fetcher.fetch_block(peer, wanted).await })
    };

    wait_until(|| network.last_fetch_request().is_some()).await;
    let (msg_id, _) = network.last_fetch_request().unwrap();

    // The peer answers with a block whose hash is not the requested one.
    fetcher.on_response(FetchBlockResp {
        msg_id,
        block: Some((*block).clone()),
    });

    assert_eq!(fetch.await.unwrap(), None);
}

#[tokio::test]
async fn fetch_times_out_to_none() {
    let network = Arc::new(CapturingNetwork::default());
    let fetcher = Fetcher::new(
        network as Arc<dyn NetworkSender>,
        Duration::from_millis(30),
    );
    fetcher.start();

    let result = fetcher
        .fetch_block(Address([1; 20]), Hash::from_bytes(b"never-served"))
        .await;
    assert_eq!(result, None);
    assert_eq!(fetcher.pending_count(), 0);
}

#[tokio::test]
async fn uncorrelated_and_duplicate_responses_are_dropped() {
    let network = Arc::new(CapturingNetwork::default());
    let fetcher = Arc::new(Fetcher::new(
        network.clone() as Arc<dyn NetworkSender>,
        Duration::from_millis(200),
    ));
    fetcher.start();

    // No pending request at all: nothing happens.
    fetcher.on_response(FetchBlockResp {
        msg_id: 999,
        block: None,
    });

    let committee = TestCommittee::new(4, 10);
    let chain = MemoryChain::with_committee(ChainConfig::default(), &committee);
    let block = build_candidate(&chain, committee.keypair(0));
    let hash = block.hash();
    let peer = committee.addresses()[1];

    let fetch = {
        let fetcher = Arc::clone(&fetcher);
        tokio::spawn(async move { fetcher.fetch_block(peer, hash).await })
    };
    wait_until(|| network.last_fetch_request().is_some()).await;
    let (msg_id, _) = network.last_fetch_request().unwrap();

    fetcher.on_response(FetchBlockResp {
        msg_id,
        block: Some((*block).clone()),
    });
    // A duplicate of the same response finds no pending entry.
    fetcher.on_response(FetchBlockResp {
        msg_id,
        block: Some((*block).clone()),
    });

    assert!(fetch.await.unwrap().is_some());
}

#[tokio::test]
async fn reset_releases_every_waiter_with_none() {
    let network = Arc::new(CapturingNetwork::default());
    let fetcher = Arc::new(Fetcher::new(
        network.clone() as Arc<dyn NetworkSender>,
        Duration::from_secs(10),
    ));
    fetcher.start();

    let fetch = {
        let fetcher = Arc::clone(&fetcher);
        tokio::spawn(async move {
            fetcher
                .fetch_block(Address([1; 20]), Hash::from_bytes(b"wanted"))
                .await
        })
    };

    wait_until(|| fetcher.pending_count() == 1).await;
    fetcher.reset();

    let result = tokio::time::timeout(Duration::from_secs(1), fetch)
        .await
        .expect("reset must release the waiter promptly")
        .unwrap();
    assert_eq!(result, None);
}

// ═══════════════════════════════════════════════════════════════════════════
// Single-verifier end-to-end
// ═══════════════════════════════════════════════════════════════════════════

#[tracing_test::traced_test]
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn solo_committee_commits_through_the_runtime() {
    let committee = TestCommittee::new(1, 10);
    let chain = MemoryChain::with_committee(
        ChainConfig {
            slot_size: 1_000,
            verifier_number: 1,
            ..ChainConfig::default()
        },
        &committee,
    );
    let network = Arc::new(CapturingNetwork::default());

    let node = BftNode::new(
        Arc::clone(&chain) as Arc<dyn ChainReader>,
        Arc::clone(&chain) as Arc<dyn ChainWriter>,
        committee.keypair(0).clone(),
        network.clone() as Arc<dyn NetworkSender>,
        BftTimeouts::default(),
        fast_config(),
    );

    node.start().expect("start");
    assert!(node.is_running());

    // Feed a candidate; with a quorum of one the node proposes, votes and
    // commits it on its own.
    let block = build_candidate(&chain, committee.keypair(0));
    node.on_new_candidate_block(Arc::clone(&block));

    wait_until(|| chain.head_height() == 1).await;
    assert_eq!(chain.current_block().hash(), block.hash());
    assert_eq!(chain.seen_commits(1).len(), 1);
    assert!(chain.seen_commits(1)[0].verify());

    // The candidate announcement went out after its delay.
    wait_until(|| {
        network
            .messages()
            .iter()
            .any(|(_, msg)| matches!(msg, ConsensusMsg::SyncBlock(_)))
    })
    .await;

    node.stop();
    assert!(!node.is_running());
}

// ═══════════════════════════════════════════════════════════════════════════
// Dispatch
// ═══════════════════════════════════════════════════════════════════════════

fn four_node_setup() -> (Arc<MemoryChain>, TestCommittee, Arc<CapturingNetwork>, Arc<BftNode>) {
    let committee = TestCommittee::new(4, 10);
    let chain = MemoryChain::with_committee(
        ChainConfig {
            slot_size: 1_000,
            verifier_number: 4,
            ..ChainConfig::default()
        },
        &committee,
    );
    let network = Arc::new(CapturingNetwork::default());
    let node = BftNode::new(
        Arc::clone(&chain) as Arc<dyn ChainReader>,
        Arc::clone(&chain) as Arc<dyn ChainWriter>,
        committee.keypair(0).clone(),
        network.clone() as Arc<dyn NetworkSender>,
        BftTimeouts::default(),
        fast_config(),
    );
    (chain, committee, network, node)
}

#[tokio::test]
async fn unknown_message_code_is_fatal() {
    let (_, committee, _, node) = four_node_setup();
    node.start().expect("start");

    let envelope = Envelope {
        code: 99,
        payload: vec![],
    };
    let err = node
        .on_peer_message(committee.addresses()[1], envelope)
        .await
        .expect_err("unknown code must error");
    assert!(matches!(
        err,
        NodeError::Wire(WireError::UnknownCode(99))
    ));
}

#[tokio::test]
async fn fetch_requests_are_served_from_the_pool() {
    let (chain, committee, network, node) = four_node_setup();
    node.start().expect("start");

    let block = build_candidate(&chain, committee.keypair(1));
    node.on_new_candidate_block(Arc::clone(&block));

    let req = ConsensusMsg::FetchBlockReq(alioth_messages::FetchBlockReq {
        msg_id: 77,
        block_hash: block.hash(),
    });
    let peer = committee.addresses()[2];
    node.on_peer_message(peer, req.encode().unwrap())
        .await
        .expect("dispatch");

    let served = network.messages().into_iter().find_map(|(to, msg)| match msg {
        ConsensusMsg::FetchBlockResp(resp) => Some((to, *resp)),
        _ => None,
    });
    let (to, resp) = served.expect("a response must have been sent");
    assert_eq!(to, Some(peer));
    assert_eq!(resp.msg_id, 77);
    assert_eq!(resp.block.map(|b| b.hash()), Some(block.hash()));
}

#[tokio::test]
async fn fetch_requests_fall_back_to_the_machine_round_records() {
    let committee = TestCommittee::new(4, 10);
    let chain = MemoryChain::with_committee(
        ChainConfig {
            slot_size: 1_000,
            verifier_number: 4,
            ..ChainConfig::default()
        },
        &committee,
    );
    let network = Arc::new(CapturingNetwork::default());
    // Capacity one: the second candidate evicts the first from the pool.
    let node = BftNode::new(
        Arc::clone(&chain) as Arc<dyn ChainReader>,
        Arc::clone(&chain) as Arc<dyn ChainWriter>,
        committee.keypair(0).clone(),
        network.clone() as Arc<dyn NetworkSender>,
        BftTimeouts::default(),
        NodeConfig {
            pool_capacity: 1,
            ..fast_config()
        },
    );
    node.start().expect("start");

    // The slot proposer's block lands in the pool and its proposal makes
    // the machine record it; the pre-vote going out proves the record.
    let proposed = build_candidate(&chain, committee.keypair(1));
    node.on_new_candidate_block(Arc::clone(&proposed));
    let proposal =
        alioth_messages::ProposalMsg::sign(1, 0, proposed.hash(), committee.keypair(1));
    node.on_peer_message(
        committee.addresses()[1],
        ConsensusMsg::Proposal(proposal).encode().unwrap(),
    )
    .await
    .expect("dispatch");
    wait_until(|| {
        network.messages().iter().any(|(_, msg)| {
            matches!(msg, ConsensusMsg::PreVote(vote) if vote.block_id == Some(proposed.hash()))
        })
    })
    .await;

    // A second candidate evicts the proposed block from the pool.
    let evictor = build_candidate(&chain, committee.keypair(2));
    assert_ne!(evictor.hash(), proposed.hash());
    node.on_new_candidate_block(evictor);

    // The fetch request still gets answered, now from the round record.
    let peer = committee.addresses()[3];
    let req = ConsensusMsg::FetchBlockReq(alioth_messages::FetchBlockReq {
        msg_id: 55,
        block_hash: proposed.hash(),
    });
    node.on_peer_message(peer, req.encode().unwrap())
        .await
        .expect("dispatch");

    wait_until(|| {
        network.messages().into_iter().any(|(to, msg)| {
            to == Some(peer)
                && matches!(&msg, ConsensusMsg::FetchBlockResp(resp)
                    if resp.msg_id == 55
                        && resp.block.as_ref().map(|b| b.hash()) == Some(proposed.hash()))
        })
    })
    .await;
}

#[tokio::test]
async fn sync_announcement_triggers_fetch_and_pooling() {
    let (chain, committee, network, node) = four_node_setup();
    node.start().expect("start");

    let block = build_candidate(&chain, committee.keypair(1));
    let hash = block.hash();
    let announcer = committee.addresses()[1];

    let announce = ConsensusMsg::SyncBlock(alioth_messages::SyncBlock { block_hash: hash });
    node.on_peer_message(announcer, announce.encode().unwrap())
        .await
        .expect("dispatch");

    // The bounded worker fetches from the announcer.
    wait_until(|| network.last_fetch_request().is_some()).await;
    let (msg_id, wanted) = network.last_fetch_request().unwrap();
    assert_eq!(wanted, hash);

    // Feed the response through the dispatch path (the fetcher is the
    // single ingress for responses).
    let resp = ConsensusMsg::FetchBlockResp(Box::new(FetchBlockResp {
        msg_id,
        block: Some((*block).clone()),
    }));
    node.on_peer_message(announcer, resp.encode().unwrap())
        .await
        .expect("dispatch");

    // The block is now pooled: a fetch request for it gets served.
    let probe_peer = committee.addresses()[3];
    wait_until_async(|| async {
        let req = ConsensusMsg::FetchBlockReq(alioth_messages::FetchBlockReq {
            msg_id: 4242,
            block_hash: hash,
        });
        node.on_peer_message(probe_peer, req.encode().unwrap())
            .await
            .expect("dispatch");
        network.messages().into_iter().any(|(to, msg)| {
            to == Some(probe_peer)
                && matches!(&msg, ConsensusMsg::FetchBlockResp(resp)
                    if resp.msg_id == 4242 && resp.block.is_some())
        })
    })
    .await;
}

async fn wait_until_async<F, Fut>(mut check: F)
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    for _ in 0..200 {
        if check().await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached within 2s");
}

// ═══════════════════════════════════════════════════════════════════════════
// Change-point handoff
// ═══════════════════════════════════════════════════════════════════════════

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn committee_handoff_at_the_change_point() {
    let old_members = TestCommittee::new(4, 10);
    let new_members = TestCommittee::new(4, 50);
    let config = ChainConfig {
        slot_size: 2,
        verifier_number: 4,
        ..ChainConfig::default()
    };
    let funded: Vec<(Address, i128)> = old_members
        .addresses()
        .into_iter()
        .chain(new_members.addresses())
        .map(|a| (a, 1_000_000))
        .collect();
    let chain = MemoryChain::new(
        config,
        vec![
            Committee::new(old_members.addresses()),
            Committee::new(new_members.addresses()),
        ],
        &funded,
    );
    let network = Arc::new(CapturingNetwork::default());

    let outgoing = BftNode::new(
        Arc::clone(&chain) as Arc<dyn ChainReader>,
        Arc::clone(&chain) as Arc<dyn ChainWriter>,
        old_members.keypair(0).clone(),
        network.clone() as Arc<dyn NetworkSender>,
        BftTimeouts::default(),
        fast_config(),
    );
    let incoming = BftNode::new(
        Arc::clone(&chain) as Arc<dyn ChainReader>,
        Arc::clone(&chain) as Arc<dyn ChainWriter>,
        new_members.keypair(0).clone(),
        network.clone() as Arc<dyn NetworkSender>,
        BftTimeouts::default(),
        fast_config(),
    );

    // Head at genesis: slot 0 belongs to the old committee.
    assert!(outgoing.can_start());
    assert!(!incoming.can_start());
    outgoing.start().expect("start");
    incoming.start().expect("start");
    assert!(outgoing.is_running());
    assert!(!incoming.is_running());

    // Advance the head to height 1, the last height of slot 0.
    let block = build_candidate(&chain, old_members.keypair(0));
    let commits: Vec<Verification> = (0..3)
        .map(|i| {
            Verification::sign(
                1,
                0,
                VotePhase::Commit,
                Some(block.hash()),
                old_members.keypair(i),
            )
        })
        .collect();
    chain.save_bft_block(&block, &commits).expect("save");
    assert!(chain.is_change_point(&chain.current_block()));

    // At the change point the next committee is the active one: the old
    // node hands off, the new one takes over.
    assert!(!outgoing.can_start());
    assert!(incoming.can_start());

    outgoing.change_primary().expect("handoff");
    incoming.change_primary().expect("handoff");
    assert!(!outgoing.is_running());
    assert!(incoming.is_running());

    // Handoff back works too: the machine is respawned, not resurrected.
    incoming.stop();
    assert!(!incoming.is_running());
    incoming.change_primary().expect("restart");
    assert!(incoming.is_running());
}
