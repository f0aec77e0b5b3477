use std::sync::Arc;

use futures::{StreamExt, stream};
use proptest::prelude::*;
use tokio::sync::mpsc;

use replay_stream::{ReplayBroadcaster, StreamError};

type Item = Result<u32, StreamError>;

/// An upstream fed by hand so tests control exactly when elements appear.
fn manual_upstream() -> (
    mpsc::UnboundedSender<Item>,
    impl futures::Stream<Item = Item> + Send + 'static,
) {
    let (tx, rx) = mpsc::unbounded_channel();
    let upstream = stream::unfold(rx, |mut rx| async move { rx.recv().await.map(|v| (v, rx)) });
    (tx, upstream)
}

async fn wait_for_history(b: &ReplayBroadcaster<u32>, len: usize) {
    while b.history_len() < len {
        tokio::task::yield_now().await;
    }
}

proptest! {
    #[test]
    fn late_consumer_sees_every_element_once(total in 0u32..64, attach_at in 0u32..64) {
        let attach_at = attach_at.min(total);
        let rt = tokio::runtime::Builder::new_current_thread().build().unwrap();
        let received = rt.block_on(async move {
            let (tx, upstream) = manual_upstream();
            let b = ReplayBroadcaster::new(upstream);

            for i in 0..attach_at {
                tx.send(Ok(i)).unwrap();
            }
            wait_for_history(&b, attach_at as usize).await;

            let consumer = b.attach();
            for i in attach_at..total {
                tx.send(Ok(i)).unwrap();
            }
            drop(tx);
            consumer.collect::<Vec<_>>().await
        });
        prop_assert_eq!(received, (0..total).collect::<Vec<_>>());
    }
}

#[tokio::test]
async fn consumers_attached_at_different_times_are_independent() {
    let (tx, upstream) = manual_upstream();
    let b = ReplayBroadcaster::new(upstream);

    let first = b.attach();
    tx.send(Ok(1)).unwrap();
    tx.send(Ok(2)).unwrap();
    wait_for_history(&b, 2).await;

    let second = b.attach();
    let third = b.attach();
    assert_eq!(second.replay_remaining(), 2);

    // Detaching one consumer does not disturb the others
    drop(third);
    tx.send(Ok(3)).unwrap();
    drop(tx);

    let (a, c) = tokio::join!(first.collect::<Vec<_>>(), second.collect::<Vec<_>>());
    assert_eq!(a, vec![1, 2, 3]);
    assert_eq!(c, vec![1, 2, 3]);
    assert!(b.finished().await.is_ok());
}

#[tokio::test]
async fn slow_consumer_does_not_hold_back_the_pump() {
    let (tx, upstream) = manual_upstream();
    let b = ReplayBroadcaster::new(upstream);
    let idle = b.attach();

    for i in 0..1000 {
        tx.send(Ok(i)).unwrap();
    }
    drop(tx);

    // Nobody has read `idle`, yet the upstream was drained to completion
    b.finished().await.unwrap();
    assert_eq!(b.history_len(), 1000);
    assert_eq!(idle.collect::<Vec<_>>().await, (0..1000).collect::<Vec<_>>());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_attach_never_skips_or_duplicates() {
    const TOTAL: u32 = 2000;
    let (tx, upstream) = manual_upstream();
    let b = Arc::new(ReplayBroadcaster::new(upstream));

    let producer = tokio::spawn(async move {
        for i in 0..TOTAL {
            tx.send(Ok(i)).unwrap();
            if i % 50 == 0 {
                tokio::task::yield_now().await;
            }
        }
    });

    let mut readers = Vec::new();
    for _ in 0..16 {
        let b = b.clone();
        readers.push(tokio::spawn(async move {
            tokio::task::yield_now().await;
            b.attach().collect::<Vec<_>>().await
        }));
    }

    producer.await.unwrap();
    for reader in readers {
        assert_eq!(reader.await.unwrap(), (0..TOTAL).collect::<Vec<_>>());
    }
}

#[tokio::test]
async fn error_is_seen_by_driver_and_consumers_just_end() {
    let (tx, upstream) = manual_upstream();
    let b = ReplayBroadcaster::new(upstream);
    let consumer = b.attach();

    tx.send(Ok(1)).unwrap();
    tx.send(Err(StreamError::Cancelled)).unwrap();
    tx.send(Ok(2)).unwrap();

    assert_eq!(consumer.collect::<Vec<_>>().await, vec![1]);
    assert!(b.finished().await.unwrap_err().is_cancelled());
    assert_eq!(b.history(), vec![1]);
}
