use tracing::{error, info};

use crate::account::Instruction;
use crate::client::{wait_for_commitment, wait_for_delegation, wait_for_undelegation, PollPolicy};
use crate::commit::CommitStatus;
use crate::config::LifecycleConfig;
use crate::crypto::{signature_hex, KeyPair};
use crate::error::Result;
use crate::node::Cluster;

pub async fn handle_demo(config_path: &str, in_memory: bool) {
    let config = if in_memory {
        LifecycleConfig::read_or_default(config_path)
    } else {
        LifecycleConfig::load_or_default(config_path)
    };
    let cluster = if in_memory {
        Cluster::in_memory(&config)
    } else {
        Cluster::from_config(&config)
    };
    let cluster = match cluster {
        Ok(c) => c,
        Err(e) => {
            error!("Failed to start cluster: {}", e);
            return;
        }
    };

    let relay = cluster.spawn_relay();
    let outcome = run_lifecycle(&cluster, &PollPolicy::from(&config.client)).await;
    relay.abort();
    if let Err(e) = cluster.flush() {
        error!("Failed to flush storage: {}", e);
    }

    match outcome {
        Ok(()) => {
            let stats = cluster.relay_stats();
            info!(
                "Demo complete: {} messages relayed, {} failed, avg delivery {:.1}ms",
                stats.messages_delivered, stats.messages_failed, stats.avg_delivery_time_ms
            );
        }
        Err(e) => error!("Demo failed: {}", e),
    }
}

/// Initialize, update, delegate, commit on the rollup, undelegate, close, re-initialize
pub async fn run_lifecycle(cluster: &Cluster, policy: &PollPolicy) -> Result<()> {
    let owner = KeyPair::generate();
    let address = cluster.address_of(&owner.pubkey());
    info!("Owner {} -> account {}", owner.pubkey(), address);

    let record = cluster.initialize(&cluster.request(Instruction::Initialize, &owner))?;
    info!("[1] Initialized: payload={} state={}", record.payload, record.state_label());

    let seed = [7u8; 32];
    let attestation = cluster.attest(&address, seed)?;
    let payload = cluster.update(
        &cluster.request(Instruction::Update { caller_seed: seed }, &owner),
        Some(&attestation),
    )?;
    info!("[2] VRF update: payload={}", payload);

    cluster.delegate(&cluster.request(Instruction::Delegate { validator: cluster.validator() }, &owner))?;
    wait_for_delegation(cluster, &address, policy).await?;
    info!("[3] Delegated to {}", cluster.validator());

    let ticket = cluster.ephemeral_update_commit(&cluster.request(
        Instruction::EphemeralUpdateCommit { value: 43, idempotency_key: None },
        &owner,
    ))?;
    if let CommitStatus::Pending = cluster.get_commitment_signature(&ticket) {
        info!("[4] Commit {} scheduled, pending on base layer", ticket);
    }
    let signature = wait_for_commitment(cluster, &ticket, policy).await?;
    info!("[4] Commit {} finalized: {}", ticket, signature_hex(&signature));

    cluster.undelegate(&cluster.request(Instruction::Undelegate, &owner))?;
    wait_for_undelegation(cluster, &address, policy).await?;
    let record = cluster.get_account(&address)?;
    info!("[5] Undelegated: payload={} state={}", record.payload, record.state_label());

    let refunded = cluster.close(&cluster.request(Instruction::Close, &owner))?;
    info!("[6] Closed, {} reclaimed", refunded);

    let record = cluster.initialize(&cluster.request(Instruction::Initialize, &owner))?;
    info!("[7] Re-initialized: payload={}", record.payload);
    Ok(())
}
