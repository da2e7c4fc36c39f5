use std::{future::Future, num::NonZeroUsize, time::Duration};

use distributed::{
    AnyContext, Backend, CommunicationContext, CoordinatorAddr, DistError, RankIdentity,
    TcpContext, init_context,
};
use tokio::{
    io::AsyncWriteExt,
    net::{TcpListener, TcpStream},
    task::JoinHandle,
};

const TIMEOUT: Duration = Duration::from_secs(10);

fn identity(rank: usize, world: usize) -> RankIdentity {
    RankIdentity::new(rank, NonZeroUsize::new(world).unwrap(), rank).unwrap()
}

fn loopback(port: u16) -> CoordinatorAddr {
    CoordinatorAddr {
        host: "127.0.0.1".into(),
        port,
    }
}

/// Runs `script` once per rank, each in its own task, and returns the results in rank order.
async fn run_group<F, Fut, T>(world: usize, script: F) -> Vec<T>
where
    F: Fn(TcpContext) -> Fut + Clone + Send + 'static,
    Fut: Future<Output = T> + Send + 'static,
    T: Send + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = loopback(listener.local_addr().unwrap().port());

    let mut handles: Vec<JoinHandle<T>> = Vec::new();
    let coordinator_script = script.clone();
    handles.push(tokio::spawn(async move {
        let ctx = TcpContext::coordinate(listener, identity(0, world), Backend::Cpu, TIMEOUT)
            .await
            .unwrap();
        coordinator_script(ctx).await
    }));

    for rank in 1..world {
        let addr = addr.clone();
        let script = script.clone();
        handles.push(tokio::spawn(async move {
            let ctx = TcpContext::join(identity(rank, world), &addr, Backend::Cpu, TIMEOUT)
                .await
                .unwrap();
            script(ctx).await
        }));
    }

    let mut results = Vec::with_capacity(world);
    for handle in handles {
        results.push(handle.await.unwrap());
    }

    results
}

#[tokio::test]
async fn all_reduce_sums_every_contribution() {
    let results = run_group(4, |mut ctx| async move {
        let r = ctx.rank() as f32;
        let mut buf = vec![r, 1.0, 2.0 * r];
        ctx.all_reduce_sum(&mut buf).await.unwrap();
        ctx.close().await.unwrap();
        buf
    })
    .await;

    for buf in results {
        assert_eq!(buf, vec![6.0, 4.0, 12.0]);
    }
}

#[tokio::test]
async fn reductions_are_bit_identical_across_ranks() {
    let results = run_group(3, |mut ctx| async move {
        let seed = ctx.rank() as f32 + 1.0;
        let mut buf: Vec<f32> = (0..64).map(|i| (i as f32 * 0.1 + seed).sin() / 3.0).collect();

        for _ in 0..3 {
            ctx.all_reduce_sum(&mut buf).await.unwrap();
        }

        ctx.close().await.unwrap();
        buf
    })
    .await;

    let first: Vec<u32> = results[0].iter().map(|x| x.to_bits()).collect();
    for buf in &results[1..] {
        let bits: Vec<u32> = buf.iter().map(|x| x.to_bits()).collect();
        assert_eq!(bits, first);
    }
}

#[tokio::test]
async fn broadcast_from_a_peer_reaches_everyone() {
    let results = run_group(3, |mut ctx| async move {
        let mut buf = if ctx.rank() == 2 {
            vec![7.0, 8.0, 9.0]
        } else {
            vec![0.0; 3]
        };

        ctx.broadcast(&mut buf, 2).await.unwrap();
        ctx.close().await.unwrap();
        buf
    })
    .await;

    for buf in results {
        assert_eq!(buf, vec![7.0, 8.0, 9.0]);
    }
}

#[tokio::test]
async fn barrier_and_out_of_range_root() {
    let results = run_group(2, |mut ctx| async move {
        ctx.barrier().await.unwrap();

        let err = ctx.broadcast(&mut [0.0], 5).await.unwrap_err();
        let invalid = matches!(err, DistError::InvalidRoot { root: 5, world_size: 2 });

        ctx.barrier().await.unwrap();
        ctx.close().await.unwrap();
        invalid
    })
    .await;

    assert!(results.into_iter().all(|invalid| invalid));
}

#[tokio::test]
async fn mismatched_lengths_fail_on_every_rank() {
    let results = run_group(3, |mut ctx| async move {
        let len = if ctx.rank() == 1 { 2 } else { 3 };
        let mut buf = vec![1.0; len];
        ctx.all_reduce_sum(&mut buf).await.unwrap_err()
    })
    .await;

    assert!(matches!(
        results[0],
        DistError::LengthMismatch {
            rank: 1,
            got: 2,
            expected: 3,
            ..
        }
    ));
    assert!(matches!(results[1], DistError::Peer { rank: 0, .. }));
    assert!(matches!(results[2], DistError::Peer { rank: 0, .. }));
}

#[tokio::test]
async fn coordinator_abort_releases_a_peer_waiting_in_broadcast() {
    let group = run_group(2, |mut ctx| async move {
        if ctx.rank() == 0 {
            ctx.abort("dataset unavailable").await;
            return None;
        }

        let mut buf = [0.0; 4];
        Some(ctx.broadcast(&mut buf, 0).await.unwrap_err())
    });

    let results = tokio::time::timeout(TIMEOUT, group).await.unwrap();

    match &results[1] {
        Some(DistError::Peer { rank: 0, reason }) => assert_eq!(reason, "dataset unavailable"),
        other => panic!("unexpected outcome: {other:?}"),
    }
}

#[tokio::test]
async fn member_abort_fails_the_running_collective_everywhere() {
    let group = run_group(3, |mut ctx| async move {
        if ctx.rank() == 1 {
            ctx.abort("out of memory").await;
            return None;
        }

        let mut buf = [1.0; 2];
        Some(ctx.all_reduce_sum(&mut buf).await.unwrap_err())
    });

    let results = tokio::time::timeout(TIMEOUT, group).await.unwrap();

    match &results[0] {
        Some(DistError::Peer { rank: 1, reason }) => assert_eq!(reason, "out of memory"),
        other => panic!("unexpected outcome on rank 0: {other:?}"),
    }
    match &results[2] {
        Some(DistError::Peer { rank: 0, reason }) => assert!(reason.contains("out of memory")),
        other => panic!("unexpected outcome on rank 2: {other:?}"),
    }
}

#[tokio::test]
async fn stray_connections_do_not_stop_the_group_from_forming() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = loopback(listener.local_addr().unwrap().port());

    let coordinator = tokio::spawn(async move {
        let mut ctx = TcpContext::coordinate(listener, identity(0, 2), Backend::Cpu, TIMEOUT)
            .await
            .unwrap();
        let mut buf = [1.0];
        ctx.all_reduce_sum(&mut buf).await.unwrap();
        ctx.close().await.unwrap();
        buf[0]
    });

    let target = (addr.host.as_str(), addr.port);

    // Stays connected without ever saying hello.
    let _silent = TcpStream::connect(target).await.unwrap();

    // Hangs up right away.
    drop(TcpStream::connect(target).await.unwrap());

    // Sends a frame with an unknown message kind.
    let mut garbage = TcpStream::connect(target).await.unwrap();
    let mut frame = 4u64.to_be_bytes().to_vec();
    frame.extend_from_slice(&99u32.to_be_bytes());
    garbage.write_all(&frame).await.unwrap();

    let mut ctx = TcpContext::join(identity(1, 2), &addr, Backend::Cpu, TIMEOUT)
        .await
        .unwrap();
    let mut buf = [2.0];
    ctx.all_reduce_sum(&mut buf).await.unwrap();
    ctx.close().await.unwrap();

    assert_eq!(buf[0], 3.0);
    assert_eq!(coordinator.await.unwrap(), 3.0);
}

#[tokio::test]
async fn mismatched_world_size_is_rejected() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = loopback(listener.local_addr().unwrap().port());

    let coordinator = tokio::spawn(async move {
        TcpContext::coordinate(listener, identity(0, 2), Backend::Cpu, TIMEOUT).await
    });

    let peer = TcpContext::join(identity(1, 3), &addr, Backend::Cpu, TIMEOUT).await;

    assert!(matches!(peer, Err(DistError::Handshake(_))));
    assert!(matches!(
        coordinator.await.unwrap(),
        Err(DistError::Handshake(_))
    ));
}

#[tokio::test]
async fn peers_may_start_before_the_coordinator() {
    let port = {
        let spare = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        spare.local_addr().unwrap().port()
    };
    let addr = loopback(port);

    let peer_addr = addr.clone();
    let peer = tokio::spawn(async move {
        let mut ctx = init_context(identity(1, 2), &peer_addr, Backend::Cpu, TIMEOUT)
            .await
            .unwrap();
        let mut buf = [2.0];
        ctx.all_reduce_sum(&mut buf).await.unwrap();
        ctx.close().await.unwrap();
        buf[0]
    });

    tokio::time::sleep(Duration::from_millis(600)).await;

    let mut ctx = init_context(identity(0, 2), &addr, Backend::Cpu, TIMEOUT)
        .await
        .unwrap();
    let mut buf = [3.0];
    ctx.all_reduce_sum(&mut buf).await.unwrap();
    ctx.close().await.unwrap();

    assert_eq!(buf[0], 5.0);
    assert_eq!(peer.await.unwrap(), 5.0);
}

#[tokio::test]
async fn unreachable_coordinator_times_out() {
    let port = {
        let spare = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        spare.local_addr().unwrap().port()
    };

    let err = TcpContext::join(
        identity(1, 2),
        &loopback(port),
        Backend::Cpu,
        Duration::from_millis(600),
    )
    .await
    .err()
    .unwrap();

    assert!(matches!(err, DistError::InitTimeout { .. }));
}

#[tokio::test]
async fn single_process_group_is_local() {
    let ctx = init_context(
        RankIdentity::standalone(),
        &loopback(1),
        Backend::Cpu,
        TIMEOUT,
    )
    .await
    .unwrap();

    assert!(matches!(ctx, AnyContext::Solo(_)));
    assert_eq!(ctx.world_size(), 1);
    ctx.close().await.unwrap();
}
