//! Tests for transactions and the transaction isolator

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use sapling::transaction::READONLY_TXS_WAIT_TIMEOUT;
use sapling::{Context, ContextConfig, RuntimeError, Transaction, TransactionIsolator};

fn ctx() -> Context {
    Context::new(ContextConfig::new()).unwrap()
}

#[test]
fn test_readonly_transactions_do_not_block_each_other() {
    let isolator = TransactionIsolator::new();
    let a = ctx();
    let b = ctx();
    Transaction::start_readonly(&a);
    Transaction::start_readonly(&b);

    let start = Instant::now();
    isolator.wait_if_other_transaction(&a, true).unwrap();
    isolator.wait_if_other_transaction(&b, true).unwrap();
    assert!(start.elapsed() < Duration::from_millis(100));
    assert_eq!(isolator.readonly_tx_count(), 2);
}

#[test]
fn test_writer_waits_for_reader() {
    let isolator = Arc::new(TransactionIsolator::new());
    let reader = ctx();
    let reader_tx = Transaction::start_readonly(&reader);
    isolator.wait_if_other_transaction(&reader, true).unwrap();

    let reader_finished = Arc::new(AtomicBool::new(false));
    let writer = {
        let isolator = isolator.clone();
        let reader_finished = reader_finished.clone();
        thread::spawn(move || {
            let ctx = ctx();
            Transaction::start(&ctx);
            isolator.wait_if_other_transaction(&ctx, true).unwrap();
            reader_finished.load(Ordering::SeqCst)
        })
    };

    thread::sleep(Duration::from_millis(100));
    reader_finished.store(true, Ordering::SeqCst);
    reader_tx.commit(&reader).unwrap();
    assert!(writer.join().unwrap());
}

#[test]
fn test_writer_gives_up_on_stuck_reader() {
    let isolator = TransactionIsolator::new();
    let reader = ctx();
    let _reader_tx = Transaction::start_readonly(&reader);
    isolator.wait_if_other_transaction(&reader, true).unwrap();

    let writer = ctx();
    Transaction::start(&writer);
    let start = Instant::now();
    assert!(matches!(
        isolator.wait_if_other_transaction(&writer, true),
        Err(RuntimeError::WaitReadonlyTxsTimeout)
    ));
    assert!(start.elapsed() >= READONLY_TXS_WAIT_TIMEOUT);
    assert!(isolator.current_write_tx().is_none());
}

#[test]
fn test_second_writer_blocks_until_first_finishes() {
    let isolator = Arc::new(TransactionIsolator::new());
    let first = ctx();
    let first_tx = Transaction::start(&first);
    isolator.wait_if_other_transaction(&first, true).unwrap();

    let released = Arc::new(AtomicBool::new(false));
    let second = {
        let isolator = isolator.clone();
        let released = released.clone();
        thread::spawn(move || {
            let ctx = ctx();
            let tx = Transaction::start(&ctx);
            isolator.wait_if_other_transaction(&ctx, true).unwrap();
            let saw_release = released.load(Ordering::SeqCst);
            tx.commit(&ctx).unwrap();
            saw_release
        })
    };

    thread::sleep(Duration::from_millis(50));
    released.store(true, Ordering::SeqCst);
    first_tx.rollback(&first);
    assert!(second.join().unwrap());
    assert!(isolator.current_write_tx().is_none());
}

#[test]
fn test_end_callbacks() {
    let ctx = ctx();
    let tx = Transaction::start(&ctx);
    let outcome = Arc::new(parking_lot::Mutex::new(None));
    let seen = outcome.clone();
    tx.on_end(Box::new(move |_, success| *seen.lock() = Some(success)))
        .unwrap();
    tx.rollback(&ctx);
    assert_eq!(*outcome.lock(), Some(false));
    assert!(ctx.tx().is_none());
    assert!(matches!(tx.commit(&ctx), Err(RuntimeError::RunningTransactionExpected)));
}
