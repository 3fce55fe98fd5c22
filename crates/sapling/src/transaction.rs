//! Transactions and the transaction isolator
//!
//! A transaction is either read-only or a writer. The isolator serializes
//! them: at most one writer is installed at a time, readers never wait for
//! each other, a writer waits (up to [`READONLY_TXS_WAIT_TIMEOUT`]) for the
//! readers that started before it, and once installed it blocks every other
//! transaction until it finishes.

use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};

use crossbeam::channel::{after, select, Receiver};
use parking_lot::Mutex;
use tracing::{debug, trace, warn};
use ulid::Ulid;

use crate::context::Context;
use crate::error::{Result, RuntimeError};
use crate::signal::Signal;

/// Maximum number of writers a transaction waits for in a row.
pub const MAX_WRITE_TX_WAITS: usize = 100;

/// How long an installed writer waits for running read-only transactions.
pub const READONLY_TXS_WAIT_TIMEOUT: Duration = Duration::from_secs(2);

/// Called when a transaction ends; the flag tells whether it committed.
pub type TransactionEndCallback = Box<dyn FnOnce(&Context, bool) + Send>;

/// A transaction.
pub struct Transaction {
    id: Ulid,
    readonly: bool,
    start_time: SystemTime,
    finished: Signal,
    end_callbacks: Mutex<Vec<TransactionEndCallback>>,
}

impl Transaction {
    fn new(readonly: bool) -> Arc<Self> {
        Arc::new(Self {
            id: Ulid::new(),
            readonly,
            start_time: SystemTime::now(),
            finished: Signal::new(),
            end_callbacks: Mutex::new(Vec::new()),
        })
    }

    /// Start a writer transaction and make it the context's transaction.
    pub fn start(ctx: &Context) -> Arc<Self> {
        Self::start_with(ctx, false)
    }

    /// Start a read-only transaction and make it the context's transaction.
    pub fn start_readonly(ctx: &Context) -> Arc<Self> {
        Self::start_with(ctx, true)
    }

    fn start_with(ctx: &Context, readonly: bool) -> Arc<Self> {
        let tx = Self::new(readonly);
        debug!(tx = %tx.id, readonly, "transaction started");
        ctx.set_tx(Some(tx.clone()));
        tx
    }

    /// Unique id.
    pub fn id(&self) -> Ulid {
        self.id
    }

    /// Check whether the transaction is read-only.
    pub fn is_readonly(&self) -> bool {
        self.readonly
    }

    /// When the transaction started.
    pub fn start_time(&self) -> SystemTime {
        self.start_time
    }

    /// Check whether the transaction committed or rolled back.
    pub fn is_finished(&self) -> bool {
        self.finished.is_fired()
    }

    /// Receiver that becomes ready once the transaction is finished.
    pub fn finished(&self) -> Receiver<()> {
        self.finished.receiver()
    }

    /// Register a callback called when the transaction ends.
    pub fn on_end(&self, callback: TransactionEndCallback) -> Result<()> {
        if self.is_finished() {
            return Err(RuntimeError::RunningTransactionExpected);
        }
        self.end_callbacks.lock().push(callback);
        Ok(())
    }

    /// Commit the transaction.
    pub fn commit(self: &Arc<Self>, ctx: &Context) -> Result<()> {
        if !self.finish(ctx, true) {
            return Err(RuntimeError::RunningTransactionExpected);
        }
        debug!(tx = %self.id, "transaction committed");
        Ok(())
    }

    /// Roll the transaction back. Rolling back a finished transaction does
    /// nothing.
    pub fn rollback(self: &Arc<Self>, ctx: &Context) {
        if self.finish(ctx, false) {
            debug!(tx = %self.id, "transaction rolled back");
        }
    }

    fn finish(self: &Arc<Self>, ctx: &Context, success: bool) -> bool {
        if !self.finished.fire() {
            return false;
        }
        let callbacks = std::mem::take(&mut *self.end_callbacks.lock());
        for callback in callbacks {
            callback(ctx, success);
        }
        ctx.clear_tx(self);
        true
    }
}

impl std::fmt::Debug for Transaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transaction")
            .field("id", &self.id)
            .field("readonly", &self.readonly)
            .field("finished", &self.is_finished())
            .finish()
    }
}

#[derive(Default)]
struct IsolatorState {
    current_write_tx: Option<Arc<Transaction>>,
    readonly_txs: Vec<Arc<Transaction>>,
}

impl IsolatorState {
    fn prune(&mut self) {
        self.readonly_txs.retain(|tx| !tx.is_finished());
        if self.current_write_tx.as_ref().is_some_and(|tx| tx.is_finished()) {
            self.current_write_tx = None;
        }
    }
}

enum Step {
    Done,
    WaitReaders(Arc<Transaction>, Vec<Receiver<()>>),
    WaitWriter(Receiver<()>),
}

/// Serializes the transactions accessing a shared resource.
#[derive(Default)]
pub struct TransactionIsolator {
    state: Mutex<IsolatorState>,
}

impl TransactionIsolator {
    /// Create an isolator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait until the context's transaction may access the resource.
    ///
    /// With `require_running_tx` the context must have a running
    /// transaction.
    #[tracing::instrument(level = "trace", skip_all, fields(require_running_tx = require_running_tx))]
    pub fn wait_if_other_transaction(&self, ctx: &Context, require_running_tx: bool) -> Result<()> {
        let mut depth = 0;
        loop {
            if depth >= MAX_WRITE_TX_WAITS {
                warn!(depth, "too many writer transactions waited for");
                return Err(RuntimeError::TooManyWriteTxsWaited);
            }
            match self.step(ctx, require_running_tx)? {
                Step::Done => return Ok(()),
                Step::WaitReaders(writer, readers) => {
                    return self.wait_for_readers(ctx, &writer, readers);
                }
                Step::WaitWriter(finished) => {
                    trace!(depth, "waiting for the current writer");
                    select! {
                        recv(finished) -> _ => {}
                        recv(ctx.done()) -> _ => return Err(RuntimeError::DoneContext),
                    }
                    depth += 1;
                }
            }
        }
    }

    fn step(&self, ctx: &Context, require_running_tx: bool) -> Result<Step> {
        let tx = ctx.tx().filter(|tx| !tx.is_finished());
        if require_running_tx && tx.is_none() {
            return Err(RuntimeError::RunningTransactionExpected);
        }

        let mut state = self.state.lock();
        state.prune();

        let Some(current) = state.current_write_tx.clone() else {
            let Some(tx) = tx else {
                return Ok(Step::Done);
            };
            if tx.is_readonly() {
                if !state.readonly_txs.iter().any(|r| Arc::ptr_eq(r, &tx)) {
                    state.readonly_txs.push(tx);
                }
                return Ok(Step::Done);
            }
            debug!(tx = %tx.id(), "writer installed");
            state.current_write_tx = Some(tx.clone());
            let readers: Vec<Receiver<()>> = state.readonly_txs.iter().map(|r| r.finished()).collect();
            if readers.is_empty() {
                return Ok(Step::Done);
            }
            return Ok(Step::WaitReaders(tx, readers));
        };

        if tx.as_ref().is_some_and(|tx| Arc::ptr_eq(tx, &current)) {
            return Ok(Step::Done);
        }
        Ok(Step::WaitWriter(current.finished()))
    }

    fn wait_for_readers(
        &self,
        ctx: &Context,
        writer: &Arc<Transaction>,
        readers: Vec<Receiver<()>>,
    ) -> Result<()> {
        trace!(readers = readers.len(), "writer waiting for read-only transactions");
        let deadline = Instant::now() + READONLY_TXS_WAIT_TIMEOUT;
        for finished in readers {
            let remaining = deadline.saturating_duration_since(Instant::now());
            select! {
                recv(finished) -> _ => {}
                recv(ctx.done()) -> _ => {
                    self.uninstall(writer);
                    return Err(RuntimeError::DoneContext);
                }
                recv(after(remaining)) -> _ => {
                    warn!(tx = %writer.id(), "read-only transactions did not finish in time");
                    self.uninstall(writer);
                    return Err(RuntimeError::WaitReadonlyTxsTimeout);
                }
            }
        }
        Ok(())
    }

    fn uninstall(&self, writer: &Arc<Transaction>) {
        let mut state = self.state.lock();
        if state.current_write_tx.as_ref().is_some_and(|c| Arc::ptr_eq(c, writer)) {
            state.current_write_tx = None;
        }
    }

    /// The installed writer, if any.
    pub fn current_write_tx(&self) -> Option<Arc<Transaction>> {
        let mut state = self.state.lock();
        state.prune();
        state.current_write_tx.clone()
    }

    /// Number of running read-only transactions known to the isolator.
    pub fn readonly_tx_count(&self) -> usize {
        let mut state = self.state.lock();
        state.prune();
        state.readonly_txs.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::ContextConfig;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::thread;

    fn ctx() -> Context {
        Context::new(ContextConfig::new()).unwrap()
    }

    #[test]
    fn test_commit_and_rollback() {
        let ctx = ctx();
        let tx = Transaction::start(&ctx);
        let committed = Arc::new(AtomicBool::new(false));
        let flag = committed.clone();
        tx.on_end(Box::new(move |_, success| flag.store(success, Ordering::SeqCst)))
            .unwrap();
        tx.commit(&ctx).unwrap();
        assert!(tx.is_finished());
        assert!(committed.load(Ordering::SeqCst));
        assert!(ctx.tx().is_none());
        assert!(matches!(tx.commit(&ctx), Err(RuntimeError::RunningTransactionExpected)));
        tx.rollback(&ctx);
    }

    #[test]
    fn test_cancel_rolls_back() {
        let ctx = ctx();
        let tx = Transaction::start(&ctx);
        let rolled_back = Arc::new(AtomicBool::new(false));
        let flag = rolled_back.clone();
        tx.on_end(Box::new(move |_, success| flag.store(!success, Ordering::SeqCst)))
            .unwrap();
        ctx.cancel();
        assert!(tx.is_finished());
        assert!(rolled_back.load(Ordering::SeqCst));
    }

    #[test]
    fn test_readers_do_not_block_each_other() {
        let isolator = TransactionIsolator::new();
        let (a, b) = (ctx(), ctx());
        Transaction::start_readonly(&a);
        Transaction::start_readonly(&b);
        isolator.wait_if_other_transaction(&a, true).unwrap();
        isolator.wait_if_other_transaction(&b, true).unwrap();
        assert_eq!(isolator.readonly_tx_count(), 2);
        assert!(isolator.current_write_tx().is_none());
    }

    #[test]
    fn test_writer_is_reentrant() {
        let isolator = TransactionIsolator::new();
        let ctx = ctx();
        let tx = Transaction::start(&ctx);
        isolator.wait_if_other_transaction(&ctx, true).unwrap();
        isolator.wait_if_other_transaction(&ctx, true).unwrap();
        assert!(isolator.current_write_tx().is_some_and(|c| Arc::ptr_eq(&c, &tx)));
        tx.commit(&ctx).unwrap();
        assert!(isolator.current_write_tx().is_none());
    }

    #[test]
    fn test_running_transaction_expected() {
        let isolator = TransactionIsolator::new();
        let ctx = ctx();
        assert!(matches!(
            isolator.wait_if_other_transaction(&ctx, true),
            Err(RuntimeError::RunningTransactionExpected)
        ));
        isolator.wait_if_other_transaction(&ctx, false).unwrap();
    }

    #[test]
    fn test_second_writer_waits_for_first() {
        let isolator = Arc::new(TransactionIsolator::new());
        let first = ctx();
        let first_tx = Transaction::start(&first);
        isolator.wait_if_other_transaction(&first, true).unwrap();

        let finished_first = Arc::new(AtomicBool::new(false));
        let second = {
            let isolator = isolator.clone();
            let finished_first = finished_first.clone();
            thread::spawn(move || {
                let ctx = ctx();
                Transaction::start(&ctx);
                isolator.wait_if_other_transaction(&ctx, true).unwrap();
                finished_first.load(Ordering::SeqCst)
            })
        };
        thread::sleep(Duration::from_millis(50));
        finished_first.store(true, Ordering::SeqCst);
        first_tx.commit(&first).unwrap();
        assert!(second.join().unwrap());
    }

    #[test]
    fn test_done_context_stops_waiting() {
        let isolator = Arc::new(TransactionIsolator::new());
        let first = ctx();
        Transaction::start(&first);
        isolator.wait_if_other_transaction(&first, true).unwrap();

        let second = ctx();
        Transaction::start(&second);
        let canceller = {
            let second = second.clone();
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(20));
                second.cancel();
            })
        };
        assert!(matches!(
            isolator.wait_if_other_transaction(&second, false),
            Err(RuntimeError::DoneContext)
        ));
        canceller.join().unwrap();
    }

    #[test]
    fn test_writer_chain_saturates() {
        let isolator = Arc::new(TransactionIsolator::new());
        let mut holder = ctx();
        let mut held = Transaction::start(&holder);
        isolator.wait_if_other_transaction(&holder, true).unwrap();

        let waiter = {
            let isolator = isolator.clone();
            thread::spawn(move || {
                let ctx = ctx();
                Transaction::start(&ctx);
                isolator.wait_if_other_transaction(&ctx, true)
            })
        };

        while !waiter.is_finished() {
            thread::sleep(Duration::from_millis(1));
            let next_holder = ctx();
            let next = Transaction::start(&next_holder);
            {
                let mut state = isolator.state.lock();
                state.current_write_tx = Some(next.clone());
                held.commit(&holder).unwrap();
            }
            holder = next_holder;
            held = next;
        }
        assert!(matches!(
            waiter.join().unwrap(),
            Err(RuntimeError::TooManyWriteTxsWaited)
        ));
    }
}
