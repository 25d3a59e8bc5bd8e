//! Escrow Ledger - Custody, authorization and exactly-once payout
//!
//! The ledger owns the record table, the id allocator, the custody balance
//! and the account balances the rail commits. All of it lives behind one
//! lock. Each mutation holds the write guard from its first check until its
//! snapshot is saved and its event is published, so two mutations can never
//! interleave.
//!
//! A mutation stages every change (record, allocator, deposit or payout) on
//! a copy of the snapshot. The copy is saved in one write, then adopted by
//! the rail and swapped in. A refused transfer or a failed save leaves the
//! committed state untouched, with nothing to compensate.

use crate::{
    error::LedgerError,
    events::{EventPublisher, LedgerEvent, LedgerEventKind},
    funds::{Balances, FundsRail},
    models::{AccountId, Amount, EscrowId, EscrowRecord, LedgerSnapshot},
    store::LedgerStore,
    LedgerResult,
};
use std::sync::Arc;
use tokio::sync::{broadcast, RwLock};
use tracing::{debug, error, info, warn};

/// The escrow ledger
pub struct EscrowLedger {
    /// Committed snapshot; the write guard serializes mutations
    state: RwLock<LedgerSnapshot>,
    /// Rail that holds the committed balances
    rail: Arc<dyn FundsRail>,
    /// Durable home of the snapshot
    store: Arc<dyn LedgerStore>,
    /// Event fan-out for committed mutations
    publisher: EventPublisher,
}

impl EscrowLedger {
    /// Open a ledger, restoring the last committed snapshot from `store`.
    ///
    /// A stored snapshot brings its balances along and the rail adopts them.
    /// A fresh ledger starts from the rail's current balances.
    pub async fn open(
        rail: Arc<dyn FundsRail>,
        store: Arc<dyn LedgerStore>,
        publisher: EventPublisher,
    ) -> LedgerResult<Self> {
        let snapshot = match store.load().await? {
            Some(snapshot) => {
                snapshot.validate()?;
                rail.commit(snapshot.balances.clone()).await;
                snapshot
            }
            None => LedgerSnapshot {
                balances: rail.balances().await,
                ..LedgerSnapshot::default()
            },
        };

        info!(
            "Opened escrow ledger with {} records (custody: {}, account: {})",
            snapshot.records.len(),
            snapshot.custody_balance,
            rail.custody_account()
        );

        Ok(Self {
            state: RwLock::new(snapshot),
            rail,
            store,
            publisher,
        })
    }

    /// Create an escrow funded with `value` taken from `caller`.
    ///
    /// Returns the new record's id. The same id is announced as `Created`.
    /// The custody account can neither fund nor receive an escrow.
    pub async fn create(
        &self,
        caller: &AccountId,
        arbiter: &AccountId,
        beneficiary: &AccountId,
        value: Amount,
    ) -> LedgerResult<EscrowId> {
        let mut state = self.state.write().await;

        let custody = self.rail.custody_account();
        if caller == custody || beneficiary == custody {
            warn!(
                "Escrow creation by {} refused: custody account {} named as a party",
                caller, custody
            );
            return Err(LedgerError::transfer(format!(
                "custody account {} cannot fund or receive an escrow",
                custody
            )));
        }

        let id = state.next_id;
        let custody_balance = state
            .custody_balance
            .checked_add(value)
            .ok_or_else(|| LedgerError::transfer("custody balance would overflow"))?;

        let mut next = state.clone();
        next.balances.transfer(caller, custody, value).map_err(|e| {
            warn!("Escrow creation by {} aborted, deposit failed: {}", caller, e);
            e
        })?;
        next.records
            .push(EscrowRecord::new(id, caller.clone(), arbiter.clone(), beneficiary.clone(), value));
        next.next_id = id + 1;
        next.custody_balance = custody_balance;

        self.commit(&mut state, next).await.map_err(|e| {
            error!("Saving escrow {} failed, nothing taken from {}: {}", id, caller, e);
            e
        })?;
        self.publisher.publish(LedgerEventKind::Created(id)).await;

        info!(
            "Created escrow {} (depositor: {}, arbiter: {}, beneficiary: {}, amount: {})",
            id, caller, arbiter, beneficiary, value
        );

        Ok(id)
    }

    /// Approve escrow `id`, paying its amount to the beneficiary.
    ///
    /// Fails with `InvalidId`, `Unauthorized` or `AlreadyApproved`, checked
    /// in that order, or with `TransferFailure` if the payout is refused.
    pub async fn approve(&self, caller: &AccountId, id: EscrowId) -> LedgerResult<()> {
        let mut state = self.state.write().await;

        let record = Self::record_in(&state, id)?;
        if &record.arbiter != caller {
            warn!("Approval of escrow {} refused: {} is not the arbiter", id, caller);
            return Err(LedgerError::Unauthorized {
                id,
                caller: caller.clone(),
            });
        }

        let mut next = state.clone();
        let index = id as usize;
        next.records[index].mark_approved().map_err(|e| {
            warn!("Approval of escrow {} refused: already approved", id);
            e
        })?;

        let amount = next.records[index].amount;
        let beneficiary = next.records[index].beneficiary.clone();
        next.custody_balance = next
            .custody_balance
            .checked_sub(amount)
            .ok_or_else(|| LedgerError::corrupt(format!("custody short for escrow {}", id)))?;

        let custody = self.rail.custody_account();
        next.balances.transfer(custody, &beneficiary, amount).map_err(|e| {
            warn!("Payout of escrow {} to {} refused: {}", id, beneficiary, e);
            e
        })?;

        self.commit(&mut state, next).await.map_err(|e| {
            error!("Saving approval of escrow {} failed, nothing paid: {}", id, e);
            e
        })?;
        self.publisher.publish(LedgerEventKind::Approved(id)).await;

        info!(
            "Approved escrow {} by {}, paid {} to {}",
            id, caller, amount, beneficiary
        );

        Ok(())
    }

    /// Change balances outside of any escrow (faucet credits, receive
    /// settings), committed through the same snapshot as escrow mutations
    pub async fn adjust_balances<T, F>(&self, change: F) -> LedgerResult<T>
    where
        F: FnOnce(&mut Balances) -> LedgerResult<T> + Send,
        T: Send,
    {
        let mut state = self.state.write().await;

        let mut next = state.clone();
        let outcome = change(&mut next.balances)?;
        self.commit(&mut state, next).await?;

        debug!("Committed balance adjustment");
        Ok(outcome)
    }

    /// Fetch one record
    pub async fn get_record(&self, id: EscrowId) -> LedgerResult<EscrowRecord> {
        let state = self.state.read().await;
        Self::record_in(&state, id).cloned()
    }

    /// All records in creation order
    pub async fn list_records(&self) -> Vec<EscrowRecord> {
        self.state.read().await.records.clone()
    }

    /// Total value held for unapproved records
    pub async fn custody_balance(&self) -> Amount {
        self.state.read().await.custody_balance
    }

    /// What the ledger owes and what the custody account holds, read together
    pub async fn custody_position(&self) -> (Amount, Amount) {
        let state = self.state.read().await;
        (
            state.custody_balance,
            state.balances.balance(self.rail.custody_account()),
        )
    }

    /// Id the next successful `create` will receive
    pub async fn next_id(&self) -> EscrowId {
        self.state.read().await.next_id
    }

    /// Check table, allocator and custody balance against each other
    pub async fn verify_invariant(&self) -> LedgerResult<()> {
        self.state.read().await.validate()
    }

    /// Subscribe to `Created`/`Approved` events committed from now on
    pub fn subscribe(&self) -> broadcast::Receiver<LedgerEvent> {
        self.publisher.subscribe()
    }

    /// Events committed by this process, in order
    pub async fn events(&self) -> Vec<LedgerEvent> {
        self.publisher.history().await
    }

    pub fn rail(&self) -> &Arc<dyn FundsRail> {
        &self.rail
    }

    /// Save `next`, hand its balances to the rail and make it current
    async fn commit(&self, state: &mut LedgerSnapshot, next: LedgerSnapshot) -> LedgerResult<()> {
        self.store.save(&next).await?;
        self.rail.commit(next.balances.clone()).await;
        *state = next;
        Ok(())
    }

    fn record_in(state: &LedgerSnapshot, id: EscrowId) -> LedgerResult<&EscrowRecord> {
        usize::try_from(id)
            .ok()
            .and_then(|index| state.records.get(index))
            .ok_or_else(|| {
                debug!("Lookup of unknown escrow {}", id);
                LedgerError::InvalidId(id)
            })
    }
}
