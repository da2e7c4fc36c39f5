//! A star shaped process group over TCP.
//!
//! Rank 0 accepts one connection per peer and runs every collective: contributions are
//! summed in rank order so every rank ends up with bit-identical results.

use std::{borrow::Cow, time::Duration};

use comms::{
    OnoReceiver, OnoSender,
    msg::{Command, Msg, Payload},
};
use log::{debug, info, warn};
use tokio::{
    net::{
        TcpListener, TcpStream,
        tcp::{OwnedReadHalf, OwnedWriteHalf},
    },
    task::JoinSet,
    time::{self, Instant},
};

use super::CommunicationContext;
use crate::{Backend, CoordinatorAddr, DistError, RankIdentity, Result};

const RETRY_DELAY: Duration = Duration::from_millis(250);

struct Link {
    rank: usize,
    rx: OnoReceiver<OwnedReadHalf>,
    tx: OnoSender<OwnedWriteHalf>,
}

impl Link {
    fn new(rank: usize, stream: TcpStream) -> Result<Self> {
        stream.set_nodelay(true)?;
        let (rx, tx) = stream.into_split();
        let (rx, tx) = comms::channel(rx, tx);

        Ok(Self { rank, rx, tx })
    }

    async fn send(&mut self, msg: &Msg<'_>) -> Result<()> {
        self.tx.send(msg).await?;
        Ok(())
    }

    async fn expect_command(&mut self, expected: Command) -> Result<()> {
        let rank = self.rank;

        match self.rx.recv::<Msg>().await? {
            Msg::Control(cmd) if cmd == expected => Ok(()),
            Msg::Err(reason) => Err(DistError::Peer {
                rank,
                reason: reason.into_owned(),
            }),
            other => Err(DistError::Protocol {
                rank,
                expected: expected.kind(),
                got: other.kind(),
            }),
        }
    }

    async fn recv_payload(&mut self, expected: &'static str) -> Result<Payload<'_>> {
        let rank = self.rank;

        match self.rx.recv::<Msg>().await? {
            Msg::Data(payload) => Ok(payload),
            Msg::Err(reason) => Err(DistError::Peer {
                rank,
                reason: reason.into_owned(),
            }),
            other => Err(DistError::Protocol {
                rank,
                expected,
                got: other.kind(),
            }),
        }
    }
}

enum Role {
    /// Rank 0, holding one link per peer sorted by rank.
    Coordinator { peers: Vec<Link> },
    Member { link: Link },
}

/// A process group membership over TCP.
pub struct TcpContext {
    identity: RankIdentity,
    backend: Backend,
    role: Role,
}

impl TcpContext {
    /// Joins the group, listening on the coordinator's port if this is rank 0.
    ///
    /// # Arguments
    /// * `identity` - This process's rank identity.
    /// * `coordinator` - Where rank 0 listens.
    /// * `backend` - The backend every rank must agree on.
    /// * `timeout` - How long to wait for the rest of the group.
    ///
    /// # Returns
    /// The connected context or an error if the group could not be formed.
    pub async fn connect(
        identity: RankIdentity,
        coordinator: &CoordinatorAddr,
        backend: Backend,
        timeout: Duration,
    ) -> Result<Self> {
        if identity.is_coordinator() {
            let listener = TcpListener::bind(("0.0.0.0", coordinator.port)).await?;
            Self::coordinate(listener, identity, backend, timeout).await
        } else {
            Self::join(identity, coordinator, backend, timeout).await
        }
    }

    /// Runs the rank 0 side of the handshake on an already bound listener.
    pub async fn coordinate(
        listener: TcpListener,
        identity: RankIdentity,
        backend: Backend,
        timeout: Duration,
    ) -> Result<Self> {
        let deadline = Instant::now() + timeout;
        let expected_peers = identity.world_size() - 1;
        let local = listener
            .local_addr()
            .map(|addr| addr.to_string())
            .unwrap_or_default();

        let timed_out = || DistError::InitTimeout {
            coordinator: local.clone(),
            after: timeout,
        };

        let mut slots: Vec<Option<Link>> = (0..expected_peers).map(|_| None).collect();
        let mut joined = 0;

        // Handshakes run concurrently so a silent or stray connection cannot hold up the rest.
        let mut pending = JoinSet::new();

        while joined < expected_peers {
            let (mut link, hello, addr) = tokio::select! {
                accepted = listener.accept() => {
                    let (stream, addr) = accepted?;
                    pending.spawn(async move { (addr, read_hello(stream).await) });
                    continue;
                }
                Some(handshake) = pending.join_next() => match handshake {
                    Ok((addr, Ok((link, hello)))) => (link, hello, addr),
                    Ok((addr, Err(e))) => {
                        warn!("dropping connection from {addr}: {e}");
                        continue;
                    }
                    Err(e) => {
                        warn!("handshake task failed: {e}");
                        continue;
                    }
                },
                _ = time::sleep_until(deadline) => return Err(timed_out()),
            };

            let rank = match validate_hello(&hello, &identity, backend, &slots) {
                Ok(rank) => rank,
                Err(reason) => {
                    warn!("rejecting connection from {addr}: {reason}");
                    let _ = link.send(&Msg::Err(Cow::Borrowed(reason.as_str()))).await;
                    return Err(DistError::Handshake(reason));
                }
            };

            debug!(
                rank = rank, joined = joined + 1, expected = expected_peers;
                "peer joined from {addr}"
            );
            link.rank = rank;
            slots[rank - 1] = Some(link);
            joined += 1;
        }

        let mut peers: Vec<Link> = slots.into_iter().flatten().collect();
        for peer in &mut peers {
            peer.send(&Msg::Control(Command::Welcome)).await?;
        }

        info!(world_size = identity.world_size(); "process group complete");
        Ok(Self {
            identity,
            backend,
            role: Role::Coordinator { peers },
        })
    }

    /// Runs the peer side of the handshake, retrying until the coordinator is reachable.
    pub async fn join(
        identity: RankIdentity,
        coordinator: &CoordinatorAddr,
        backend: Backend,
        timeout: Duration,
    ) -> Result<Self> {
        let deadline = Instant::now() + timeout;
        let timed_out = || DistError::InitTimeout {
            coordinator: coordinator.to_string(),
            after: timeout,
        };

        let stream = loop {
            let attempt = TcpStream::connect((coordinator.host.as_str(), coordinator.port));
            match time::timeout_at(deadline, attempt).await {
                Ok(Ok(stream)) => break stream,
                Ok(Err(e)) => {
                    debug!(
                        rank = identity.rank();
                        "coordinator at {coordinator} not reachable yet: {e}"
                    );
                    if Instant::now() + RETRY_DELAY >= deadline {
                        return Err(timed_out());
                    }

                    time::sleep(RETRY_DELAY).await;
                }
                Err(_) => return Err(timed_out()),
            }
        };

        let mut link = Link::new(0, stream)?;
        let hello = Command::Hello {
            rank: identity.rank(),
            world_size: identity.world_size(),
            backend: backend.as_str().to_string(),
        };
        link.send(&Msg::Control(hello)).await?;

        let welcome = time::timeout_at(deadline, link.rx.recv::<Msg>())
            .await
            .map_err(|_| timed_out())??;

        let verdict = match welcome {
            Msg::Control(Command::Welcome) => Ok(()),
            Msg::Err(reason) => Err(DistError::Handshake(reason.into_owned())),
            other => Err(DistError::Protocol {
                rank: 0,
                expected: Command::Welcome.kind(),
                got: other.kind(),
            }),
        };
        verdict?;

        debug!(rank = identity.rank(); "welcomed into the process group");
        Ok(Self {
            identity,
            backend,
            role: Role::Member { link },
        })
    }

    /// Best effort notification of a failure, so no peer stays blocked.
    async fn fail_peers(peers: &mut [Link], reason: &str) {
        for peer in peers {
            let _ = peer.send(&Msg::Err(Cow::Borrowed(reason))).await;
        }
    }

    async fn reduce_at_coordinator(peers: &mut [Link], buf: &mut [f32]) -> Result<()> {
        for peer in peers.iter_mut() {
            let rank = peer.rank;
            let expected = "data/contribution";

            match peer.recv_payload(expected).await? {
                Payload::Contribution(nums) if nums.len() == buf.len() => {
                    buf.iter_mut().zip(nums).for_each(|(acc, x)| *acc += x);
                }
                Payload::Contribution(nums) => {
                    return Err(DistError::LengthMismatch {
                        op: "all_reduce_sum",
                        rank,
                        got: nums.len(),
                        expected: buf.len(),
                    });
                }
                other => {
                    return Err(DistError::Protocol {
                        rank,
                        expected,
                        got: other.kind(),
                    });
                }
            }
        }

        let reduced = Msg::Data(Payload::Reduced(buf));
        for peer in peers.iter_mut() {
            peer.send(&reduced).await?;
        }

        Ok(())
    }

    async fn broadcast_at_coordinator(
        peers: &mut [Link],
        buf: &mut [f32],
        root: usize,
    ) -> Result<()> {
        if root != 0 {
            let source = &mut peers[root - 1];
            let expected = "data/broadcast";

            match source.recv_payload(expected).await? {
                Payload::Broadcast(nums) if nums.len() == buf.len() => buf.copy_from_slice(nums),
                Payload::Broadcast(nums) => {
                    return Err(DistError::LengthMismatch {
                        op: "broadcast",
                        rank: root,
                        got: nums.len(),
                        expected: buf.len(),
                    });
                }
                other => {
                    return Err(DistError::Protocol {
                        rank: root,
                        expected,
                        got: other.kind(),
                    });
                }
            }
        }

        let msg = Msg::Data(Payload::Broadcast(buf));
        for peer in peers.iter_mut().filter(|peer| peer.rank != root) {
            peer.send(&msg).await?;
        }

        Ok(())
    }

    async fn barrier_at_coordinator(peers: &mut [Link]) -> Result<()> {
        for peer in peers.iter_mut() {
            peer.expect_command(Command::Barrier).await?;
        }

        for peer in peers.iter_mut() {
            peer.send(&Msg::Control(Command::Release)).await?;
        }

        Ok(())
    }

    async fn receive_into(
        link: &mut Link,
        buf: &mut [f32],
        op: &'static str,
        expected: &'static str,
    ) -> Result<()> {
        let payload = link.recv_payload(expected).await?;
        if payload.kind() != expected {
            return Err(DistError::Protocol {
                rank: 0,
                expected,
                got: payload.kind(),
            });
        }

        let nums = payload.values();
        if nums.len() != buf.len() {
            return Err(DistError::LengthMismatch {
                op,
                rank: 0,
                got: nums.len(),
                expected: buf.len(),
            });
        }

        buf.copy_from_slice(nums);
        Ok(())
    }
}

/// Reads the first frame of a fresh connection, which must be a `Hello`.
async fn read_hello(stream: TcpStream) -> Result<(Link, Command)> {
    let mut link = Link::new(0, stream)?;

    let hello = match link.rx.recv::<Msg>().await? {
        Msg::Control(hello @ Command::Hello { .. }) => hello,
        other => {
            return Err(DistError::Handshake(format!(
                "expected a hello, got {}",
                other.kind()
            )));
        }
    };

    Ok((link, hello))
}

/// Checks a peer's `Hello` against the local view of the group.
///
/// # Returns
/// The peer's rank, or the reason it was rejected.
fn validate_hello(
    hello: &Command,
    identity: &RankIdentity,
    backend: Backend,
    slots: &[Option<Link>],
) -> std::result::Result<usize, String> {
    let Command::Hello {
        rank,
        world_size,
        backend: peer_backend,
    } = hello
    else {
        return Err(format!("expected a hello, got {}", hello.kind()));
    };

    let (rank, world_size) = (*rank, *world_size);

    if world_size != identity.world_size() {
        return Err(format!(
            "rank {rank} expects world size {world_size}, the coordinator has {}",
            identity.world_size()
        ));
    }

    if peer_backend != backend.as_str() {
        return Err(format!(
            "rank {rank} uses the {peer_backend} backend, the coordinator uses {backend}"
        ));
    }

    if rank == 0 || rank >= world_size {
        return Err(format!("rank {rank} is not a valid peer rank"));
    }

    if slots[rank - 1].is_some() {
        return Err(format!("rank {rank} joined twice"));
    }

    Ok(rank)
}

impl CommunicationContext for TcpContext {
    fn rank(&self) -> usize {
        self.identity.rank()
    }

    fn world_size(&self) -> usize {
        self.identity.world_size()
    }

    fn backend(&self) -> Backend {
        self.backend
    }

    async fn barrier(&mut self) -> Result<()> {
        match &mut self.role {
            Role::Coordinator { peers } => {
                let result = Self::barrier_at_coordinator(peers).await;
                if let Err(e) = &result {
                    Self::fail_peers(peers, &e.to_string()).await;
                }

                result
            }
            Role::Member { link } => {
                link.send(&Msg::Control(Command::Barrier)).await?;
                link.expect_command(Command::Release).await
            }
        }
    }

    async fn all_reduce_sum(&mut self, buf: &mut [f32]) -> Result<()> {
        match &mut self.role {
            Role::Coordinator { peers } => {
                let result = Self::reduce_at_coordinator(peers, buf).await;
                if let Err(e) = &result {
                    Self::fail_peers(peers, &e.to_string()).await;
                }

                result
            }
            Role::Member { link } => {
                link.send(&Msg::Data(Payload::Contribution(buf))).await?;
                Self::receive_into(link, buf, "all_reduce_sum", "data/reduced").await
            }
        }
    }

    async fn broadcast(&mut self, buf: &mut [f32], root: usize) -> Result<()> {
        let world_size = self.identity.world_size();
        if root >= world_size {
            return Err(DistError::InvalidRoot { root, world_size });
        }

        let rank = self.identity.rank();
        match &mut self.role {
            Role::Coordinator { peers } => {
                let result = Self::broadcast_at_coordinator(peers, buf, root).await;
                if let Err(e) = &result {
                    Self::fail_peers(peers, &e.to_string()).await;
                }

                result
            }
            Role::Member { link } if rank == root => {
                link.send(&Msg::Data(Payload::Broadcast(buf))).await
            }
            Role::Member { link } => {
                Self::receive_into(link, buf, "broadcast", "data/broadcast").await
            }
        }
    }

    async fn close(self) -> Result<()> {
        match self.role {
            Role::Coordinator { mut peers } => {
                for i in 0..peers.len() {
                    if let Err(e) = peers[i].expect_command(Command::Close).await {
                        Self::fail_peers(&mut peers, &e.to_string()).await;
                        return Err(e);
                    }
                }

                for peer in &mut peers {
                    peer.send(&Msg::Control(Command::Close)).await?;
                    peer.tx.shutdown().await?;
                }

                info!(world_size = self.identity.world_size(); "process group closed");
            }
            Role::Member { mut link } => {
                link.send(&Msg::Control(Command::Close)).await?;
                link.expect_command(Command::Close).await?;
                link.tx.shutdown().await?;
                debug!(rank = self.identity.rank(); "left the process group");
            }
        }

        Ok(())
    }

    async fn abort(self, reason: &str) {
        warn!(rank = self.identity.rank(); "leaving the process group: {reason}");

        match self.role {
            Role::Coordinator { mut peers } => {
                Self::fail_peers(&mut peers, reason).await;
                for peer in &mut peers {
                    let _ = peer.tx.shutdown().await;
                }
            }
            Role::Member { mut link } => {
                let _ = link.send(&Msg::Err(Cow::Borrowed(reason))).await;
                let _ = link.tx.shutdown().await;
            }
        }
    }
}
