//! Base-layer record of finalized commits

use std::collections::HashMap;
use std::sync::Arc;

use super::{CommitStatus, CommitTicket, CommitmentArtifact};
use crate::error::Result;
use crate::storage::Storage;

#[derive(Clone, Default)]
pub struct CommitLog {
    artifacts: HashMap<CommitTicket, CommitmentArtifact>,
    storage: Option<Arc<Storage>>,
}

impl CommitLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_storage(storage: Arc<Storage>) -> Result<Self> {
        let mut artifacts = HashMap::new();
        for artifact in storage.load_artifacts()? {
            artifacts.insert(artifact.ticket, artifact);
        }
        Ok(Self {
            artifacts,
            storage: Some(storage),
        })
    }

    pub fn record(&mut self, artifact: CommitmentArtifact) -> Result<()> {
        if let Some(storage) = &self.storage {
            storage.save_artifact(&artifact)?;
        }
        self.artifacts.insert(artifact.ticket, artifact);
        Ok(())
    }

    pub fn get(&self, ticket: &CommitTicket) -> Option<&CommitmentArtifact> {
        self.artifacts.get(ticket)
    }

    /// Pure query; an unknown ticket is simply not finalized yet
    pub fn status(&self, ticket: &CommitTicket) -> CommitStatus {
        match self.artifacts.get(ticket) {
            Some(artifact) => CommitStatus::Committed(artifact.signature),
            None => CommitStatus::Pending,
        }
    }

    pub fn len(&self) -> usize {
        self.artifacts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.artifacts.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::account::AccountAddress;
    use crate::commit::CommitRequest;
    use crate::crypto::{KeyPair, Pubkey};

    #[test]
    fn test_status_pending_until_recorded() {
        let base = KeyPair::generate();
        let mut log = CommitLog::with_storage(Arc::new(Storage::temporary().unwrap())).unwrap();
        let ticket = CommitTicket::derive(&AccountAddress([1u8; 32]), "d", "k");
        assert!(log.status(&ticket).is_pending());

        let request = CommitRequest {
            ticket,
            address: AccountAddress([1u8; 32]),
            validator: Pubkey([2u8; 32]),
            payload: 5,
            sequence: 1,
            ephemeral_tx: "tx".to_string(),
        };
        let artifact = CommitmentArtifact::sign(&request, true, &base);
        log.record(artifact.clone()).unwrap();

        assert_eq!(log.status(&ticket), CommitStatus::Committed(artifact.signature));
        assert_eq!(log.len(), 1);
    }
}
