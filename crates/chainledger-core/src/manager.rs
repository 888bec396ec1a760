//! Reorg manager — drives detect→rollback→recover as one unit of work per
//! chain.
//!
//! Each chain gets its own manager and its own polling loop; managers for
//! different chains share nothing but the store. Within a chain, reorg
//! handling is strictly sequential — one fork at a time, and the ingest path
//! must take the same gate, so flag flips and decode-time inserts for a chain
//! can never race.

use std::{sync::Arc, time::Duration};

use tokio::sync::Mutex;

use crate::{
    abi::AbiRegistry,
    canonical::CanonicalFlags,
    error::{ManagerError, RecoveryError, ReorgError},
    ingest::Ingestor,
    provider::ChainClient,
    recovery::RecoveryEngine,
    reorg::{HeadCheck, ReorgDetector, ReorgEvent},
    rollback::RollbackEngine,
    store::LedgerStore,
    types::LedgerConfig,
};

/// The per-chain processing state.
///
/// Held in one owned structure per chain; there is no shared "is running"
/// flag anywhere.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChainState {
    Idle,
    Detecting,
    RollingBack,
    Recovering,
    /// A fatal reorg-handling error occurred. Polling stays halted until an
    /// operator calls [`ReorgManager::acknowledge`] — serving a possibly
    /// inconsistent canonical view is worse than stopping.
    Failed,
}

impl std::fmt::Display for ChainState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Idle => "idle",
            Self::Detecting => "detecting",
            Self::RollingBack => "rolling-back",
            Self::Recovering => "recovering",
            Self::Failed => "failed",
        };
        write!(f, "{s}")
    }
}

/// Outcome of one poll cycle.
#[derive(Debug)]
pub enum CycleOutcome {
    /// No fork; head unchanged or advanced normally.
    Quiet,
    /// A fork was detected, rolled back, and recovered.
    Handled(ReorgEvent),
    /// Recovery was abandoned because the head moved again; re-detect
    /// immediately against the new head.
    Abandoned,
}

/// Orchestrates one chain's reorg handling.
pub struct ReorgManager {
    config: LedgerConfig,
    detector: ReorgDetector,
    rollback: RollbackEngine,
    recovery: RecoveryEngine,
    store: Arc<dyn LedgerStore>,
    state: ChainState,
    gate: Arc<Mutex<()>>,
}

impl ReorgManager {
    pub fn new(
        config: LedgerConfig,
        client: Arc<dyn ChainClient>,
        store: Arc<dyn LedgerStore>,
        registry: AbiRegistry,
    ) -> Self {
        let flags = CanonicalFlags::new(store.clone());
        let ingestor = Ingestor::new(
            config.chain.clone(),
            registry,
            store.clone(),
            config.ingest_version,
        );
        Self {
            detector: ReorgDetector::new(&config, client.clone(), store.clone()),
            rollback: RollbackEngine::new(flags.clone()),
            recovery: RecoveryEngine::new(&config, client, flags, store.clone(), ingestor),
            store,
            state: ChainState::Idle,
            gate: Arc::new(Mutex::new(())),
            config,
        }
    }

    /// Seed the detector from the ledger. Call once before polling.
    pub async fn init(&mut self) -> Result<(), ReorgError> {
        self.detector.init_from_ledger().await
    }

    pub fn state(&self) -> ChainState {
        self.state
    }

    /// The chain's mutual-exclusion gate. The normal ingest path must hold
    /// this lock while writing a block, so ingest and reorg handling for the
    /// same chain never overlap.
    pub fn gate(&self) -> Arc<Mutex<()>> {
        self.gate.clone()
    }

    /// Operator acknowledgement after a failure: resets `Failed` back to
    /// `Idle` so polling may be restarted.
    pub fn acknowledge(&mut self) {
        if self.state == ChainState::Failed {
            tracing::info!(chain = %self.config.chain, "failure acknowledged, chain unpaused");
            self.state = ChainState::Idle;
        }
    }

    /// Poll until a fatal error. Returns only with the error that moved the
    /// chain to `Failed`; the caller decides when to `acknowledge` and
    /// restart.
    pub async fn run(&mut self) -> Result<(), ManagerError> {
        let poll = Duration::from_millis(self.config.poll_interval_ms);
        loop {
            match self.cycle().await? {
                // a deeper reorg interrupted recovery — go straight into the
                // next detect pass instead of sleeping on stale state
                CycleOutcome::Abandoned => continue,
                CycleOutcome::Quiet | CycleOutcome::Handled(_) => {}
            }
            tokio::time::sleep(poll).await;
        }
    }

    /// One detect→rollback→recover pass.
    pub async fn cycle(&mut self) -> Result<CycleOutcome, ManagerError> {
        let gate = self.gate.clone();
        let _ingest_exclusion = gate.lock().await;

        self.state = ChainState::Detecting;
        let event = match self.detector.check_head().await {
            Ok(HeadCheck::Unchanged) | Ok(HeadCheck::Advanced) => {
                self.state = ChainState::Idle;
                return Ok(CycleOutcome::Quiet);
            }
            Ok(HeadCheck::Reorg(event)) => event,
            Err(error) => {
                self.state = ChainState::Failed;
                tracing::error!(
                    chain = %self.config.chain,
                    error = %error,
                    "reorg detection failed, chain paused until acknowledged"
                );
                return Err(error.into());
            }
        };

        if let Err(error) = self.store.append_reorg_event(&event).await {
            self.state = ChainState::Failed;
            tracing::error!(
                chain = %self.config.chain,
                error = %error,
                "could not persist reorg audit record, chain paused"
            );
            return Err(ManagerError::Detect(error.into()));
        }

        self.state = ChainState::RollingBack;
        let rollback = self.rollback.rollback(&event).await;
        if !rollback.complete() {
            self.state = ChainState::Failed;
            tracing::error!(
                chain = %self.config.chain,
                failed = rollback.failures.len(),
                affected = rollback.affected,
                "rollback incomplete, chain paused until acknowledged"
            );
            return Err(ManagerError::RollbackIncomplete {
                failed: rollback.failures.len(),
            });
        }

        self.state = ChainState::Recovering;
        match self.recovery.recover(&event).await {
            Ok((result, branch_head)) => {
                self.detector.advance_to(branch_head);
                self.state = ChainState::Idle;
                tracing::info!(
                    chain = %self.config.chain,
                    depth = event.depth,
                    demoted = rollback.affected,
                    recovered = result.blocks,
                    "reorg handled"
                );
                Ok(CycleOutcome::Handled(event))
            }
            Err(RecoveryError::HeadMoved { expected, observed }) => {
                tracing::warn!(
                    chain = %self.config.chain,
                    expected = %expected,
                    observed = %observed,
                    "recovery abandoned, head moved again"
                );
                self.state = ChainState::Idle;
                Ok(CycleOutcome::Abandoned)
            }
            Err(error) => {
                self.state = ChainState::Failed;
                tracing::error!(
                    chain = %self.config.chain,
                    error = %error,
                    "recovery failed, chain paused until acknowledged"
                );
                Err(error.into())
            }
        }
    }
}
