//! A reliable, ordered byte stream over one conversation.
//!
//! The connection owns a sending worker, a receiving worker and a round-trip
//! estimator, each behind its own lock. Two [`Updater`]s drive it: the data
//! updater flushes every `tti` while there is something to send or acknowledge,
//! the ping updater keeps the conversation alive and walks it through the
//! closing states.
//!
//! 基于单个会话的可靠有序字节流。
//!
//! 连接拥有一个发送端、一个接收端和一个往返时间估算器，各自有独立的锁。
//! 两个 [`Updater`] 驱动连接：数据更新器在有数据需要发送或确认时每隔 `tti` 刷新一次，
//! ping 更新器保持会话存活并推动其经过各关闭状态。

mod state;

pub use state::State;

use super::lock;
use super::output::SegmentWriter;
use super::reliability::{ReceivingWorker, RoundTripInfo, SendingWorker};
use super::updater::Updater;
use crate::config::{Config, LifecycleConfig};
use crate::error::{Error, Result};
use crate::packet::segment::DATA_SEGMENT_OVERHEAD;
use crate::packet::{CmdOnlySegment, Command, Segment, SegmentOption};
use crate::socket::PacketWriter;
use bytes::Bytes;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::{debug, info, trace};

/// Addresses and conversation id of a connection.
///
/// 连接的地址和会话 ID。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnMetadata {
    pub local_addr: SocketAddr,
    pub remote_addr: SocketAddr,
    pub conversation: u16,
}

#[derive(Debug, Clone, Copy)]
struct StateEntry {
    state: State,
    /// Connection clock when `state` was entered.
    since: u32,
}

/// A handle to a connection. Clones share the same connection.
///
/// 连接句柄。克隆体共享同一个连接。
#[derive(Clone)]
pub struct Connection {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("meta", &self.inner.meta)
            .field("state", &self.inner.state())
            .finish()
    }
}

struct Inner {
    meta: ConnMetadata,
    lifecycle: LifecycleConfig,
    epoch: Instant,
    mss: usize,

    state: Mutex<StateEntry>,
    last_incoming_time: AtomicU32,
    last_ping_time: AtomicU32,

    round_trip: Mutex<RoundTripInfo>,
    sending: Mutex<SendingWorker>,
    receiving: Mutex<ReceivingWorker>,
    output: SegmentWriter,

    /// Signalled when data becomes readable or the state changes.
    data_input: Notify,
    /// Signalled when the sending window may have room again.
    data_output: Notify,
    read_deadline: Mutex<Option<Instant>>,
    write_deadline: Mutex<Option<Instant>>,

    data_updater: Arc<Updater>,
    ping_updater: Arc<Updater>,
    released: AtomicBool,
}

impl Connection {
    /// Creates a connection writing through `writer` and starts its keep-alive.
    /// Must be called from within a tokio runtime.
    ///
    /// 创建一个通过 `writer` 写出的连接并启动其保活。必须在 tokio 运行时内调用。
    pub fn new(meta: ConnMetadata, writer: PacketWriter, config: &Config) -> Self {
        let mtu = config.mtu() as usize;
        let mss = mtu
            .saturating_sub(writer.overhead() + DATA_SEGMENT_OVERHEAD)
            .max(1);
        let tti = config.tti();
        let conversation = meta.conversation;

        let inner = Arc::new_cyclic(|weak: &Weak<Inner>| {
            let data_updater = {
                let (running, stopped, flush) = (weak.clone(), weak.clone(), weak.clone());
                Updater::new(
                    Duration::from_millis(tti as u64),
                    move || running.upgrade().is_some_and(|c| c.data_update_necessary()),
                    move || stopped.upgrade().is_none_or(|c| c.state().is_terminating()),
                    move || {
                        if let Some(c) = flush.upgrade() {
                            c.flush();
                        }
                    },
                )
            };
            let ping_updater = {
                let (running, stopped, flush) = (weak.clone(), weak.clone(), weak.clone());
                Updater::new(
                    config.lifecycle.keepalive_interval,
                    move || running.upgrade().is_some_and(|c| c.state() != State::Terminated),
                    move || stopped.upgrade().is_none_or(|c| c.state() == State::Terminated),
                    move || {
                        if let Some(c) = flush.upgrade() {
                            c.flush();
                        }
                    },
                )
            };

            Inner {
                meta,
                lifecycle: config.lifecycle.clone(),
                epoch: Instant::now(),
                mss,
                state: Mutex::new(StateEntry {
                    state: State::Active,
                    since: 0,
                }),
                last_incoming_time: AtomicU32::new(0),
                last_ping_time: AtomicU32::new(0),
                round_trip: Mutex::new(RoundTripInfo::new(
                    config.reliability.initial_rto_ms,
                    tti,
                )),
                sending: Mutex::new(SendingWorker::new(
                    conversation,
                    mss,
                    config.sending_in_flight_size(),
                    config.sending_buffer_size(),
                    config.reliability.fast_resend,
                    config.reliability.congestion,
                )),
                receiving: Mutex::new(ReceivingWorker::new(
                    conversation,
                    config.receiving_in_flight_size(),
                )),
                output: SegmentWriter::new(writer, mtu),
                data_input: Notify::new(),
                data_output: Notify::new(),
                read_deadline: Mutex::new(None),
                write_deadline: Mutex::new(None),
                data_updater,
                ping_updater,
                released: AtomicBool::new(false),
            }
        });

        debug!(
            conv = conversation,
            remote = %meta.remote_addr,
            mss,
            "connection created"
        );
        inner.ping_updater.wake_up();
        Self { inner }
    }

    /// Feeds segments received from the peer. Processing stops at the first
    /// segment of another conversation.
    ///
    /// 输入从对端收到的分段。遇到第一个属于其他会话的分段时停止处理。
    pub fn input(&self, segments: Vec<Segment>) {
        self.inner.input(segments);
    }

    /// Reads delivered bytes into `buf`.
    ///
    /// Waits until data is available, the connection stops serving reads
    /// (returns `Ok(0)`), or the read deadline passes ([`Error::Timeout`]).
    ///
    /// 将已交付的字节读入 `buf`。
    ///
    /// 等待直到有数据可读、连接不再提供读取（返回 `Ok(0)`），或读截止时间已过（[`Error::Timeout`]）。
    pub async fn read(&self, buf: &mut [u8]) -> Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        let inner = &self.inner;
        loop {
            let state = inner.state();
            if !state.accepts_reads() {
                return Ok(0);
            }
            let n = lock(&inner.receiving).read(buf);
            if n > 0 {
                inner.data_updater.wake_up();
                return Ok(n);
            }
            if state == State::PeerTerminating {
                return Ok(0);
            }
            let deadline = *lock(&inner.read_deadline);
            wait_for(&inner.data_input, deadline).await?;
        }
    }

    /// Like [`read`](Self::read), but returns whole delivered chunks without
    /// copying. An empty `Vec` means end of stream.
    ///
    /// 与 [`read`](Self::read) 类似，但直接返回完整的已交付数据块而不复制。空 `Vec` 表示流结束。
    pub async fn read_chunks(&self) -> Result<Vec<Bytes>> {
        let inner = &self.inner;
        loop {
            let state = inner.state();
            if !state.accepts_reads() {
                return Ok(Vec::new());
            }
            let chunks = lock(&inner.receiving).read_multi_buffer();
            if !chunks.is_empty() {
                inner.data_updater.wake_up();
                return Ok(chunks);
            }
            if state == State::PeerTerminating {
                return Ok(Vec::new());
            }
            let deadline = *lock(&inner.read_deadline);
            wait_for(&inner.data_input, deadline).await?;
        }
    }

    /// Queues all of `data` for sending, waiting for window space as needed.
    ///
    /// When the write deadline passes or the connection leaves `Active` after
    /// part of `data` was queued, the queued length is returned. With nothing
    /// queued it fails with [`Error::Timeout`] or [`Error::ConnectionClosed`].
    ///
    /// 将 `data` 全部排队发送，必要时等待窗口空间。
    ///
    /// 若写截止时间到期或连接离开 `Active` 时已有部分数据排队，返回已排队的长度；
    /// 若尚未排队任何数据则返回 [`Error::Timeout`] 或 [`Error::ConnectionClosed`]。
    pub async fn write(&self, data: &[u8]) -> Result<usize> {
        let inner = &self.inner;
        let mut remaining = data;
        loop {
            if !inner.state().accepts_writes() {
                if remaining.len() < data.len() {
                    return Ok(data.len() - remaining.len());
                }
                return Err(Error::ConnectionClosed);
            }
            let before = remaining.len();
            lock(&inner.sending).push(&mut remaining);
            if remaining.len() != before {
                inner.data_updater.wake_up();
            }
            if remaining.is_empty() {
                return Ok(data.len());
            }

            let deadline = *lock(&inner.write_deadline);
            match wait_for(&inner.data_output, deadline).await {
                Ok(()) => {}
                Err(Error::Timeout) if remaining.len() < data.len() => {
                    return Ok(data.len() - remaining.len());
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Starts a graceful close. Fails with [`Error::ConnectionClosed`] when the
    /// connection is already closing on this side.
    ///
    /// 开始优雅关闭。如果本端已在关闭中，返回 [`Error::ConnectionClosed`]。
    pub fn close(&self) -> Result<()> {
        self.inner.close()
    }

    /// Terminates immediately, dropping undelivered data.
    ///
    /// 立即终止，丢弃未交付的数据。
    pub fn terminate(&self) {
        self.inner
            .transition(|state, _| (state != State::Terminated).then_some(State::Terminated));
    }

    /// Sends a command-only segment carrying the current window bases.
    pub fn ping(&self, command: Command) {
        self.inner.ping(self.inner.elapsed(), command);
    }

    /// Sets the deadline for pending and future reads; `None` waits forever.
    ///
    /// 设置当前及之后读取的截止时间；`None` 表示永远等待。
    pub fn set_read_deadline(&self, deadline: Option<Instant>) {
        *lock(&self.inner.read_deadline) = deadline;
        self.inner.data_input.notify_waiters();
    }

    /// Sets the deadline for pending and future writes; `None` waits forever.
    pub fn set_write_deadline(&self, deadline: Option<Instant>) {
        *lock(&self.inner.write_deadline) = deadline;
        self.inner.data_output.notify_waiters();
    }

    /// Sets both deadlines.
    pub fn set_deadline(&self, deadline: Option<Instant>) {
        self.set_read_deadline(deadline);
        self.set_write_deadline(deadline);
    }

    pub fn state(&self) -> State {
        self.inner.state()
    }

    pub fn conversation(&self) -> u16 {
        self.inner.meta.conversation
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.inner.meta.local_addr
    }

    pub fn remote_addr(&self) -> SocketAddr {
        self.inner.meta.remote_addr
    }

    /// Smoothed round-trip time; zero before the first sample.
    pub fn smoothed_rtt(&self) -> Duration {
        Duration::from_millis(lock(&self.inner.round_trip).smoothed_time() as u64)
    }

    /// Current retransmission timeout.
    pub fn rto(&self) -> Duration {
        Duration::from_millis(lock(&self.inner.round_trip).timeout() as u64)
    }

    /// Maximum payload bytes per data segment.
    pub fn mss(&self) -> usize {
        self.inner.mss
    }

    /// True when every written byte has been acknowledged by the peer.
    ///
    /// 当所有写入的字节都已被对端确认时返回 true。
    pub fn is_send_window_empty(&self) -> bool {
        lock(&self.inner.sending).is_empty()
    }
}

impl Inner {
    fn elapsed(&self) -> u32 {
        self.epoch.elapsed().as_millis() as u32
    }

    fn state(&self) -> State {
        lock(&self.state).state
    }

    /// Applies `next` to the current state and its age under the state lock,
    /// then runs the side effects of the new state. Returns the new state.
    ///
    /// 在状态锁内对当前状态及其持续时间应用 `next`，然后执行新状态的副作用。返回新状态。
    fn transition<F>(&self, next: F) -> Option<State>
    where
        F: FnOnce(State, u32) -> Option<State>,
    {
        let current = self.elapsed();
        let (from, to) = {
            let mut entry = lock(&self.state);
            let to = next(entry.state, current.wrapping_sub(entry.since))?;
            let from = entry.state;
            *entry = StateEntry {
                state: to,
                since: current,
            };
            (from, to)
        };
        debug!(
            conv = self.meta.conversation,
            from = %from,
            to = %to,
            "connection state changed"
        );
        self.on_state_entered(to);
        Some(to)
    }

    fn on_state_entered(&self, state: State) {
        let closing = self.lifecycle.closing_keepalive_interval;
        match state {
            State::Active => {}
            State::ReadyToClose => {
                self.ping_updater.set_interval(closing);
                self.data_updater.wake_up();
            }
            State::PeerClosed => {
                lock(&self.sending).close_write();
            }
            State::Terminating | State::PeerTerminating => {
                lock(&self.sending).close_write();
                self.ping_updater.set_interval(closing);
            }
            State::Terminated => {
                lock(&self.sending).close_write();
                self.ping_updater.set_interval(closing);
                self.release_resources();
            }
        }
        self.signal_all();
    }

    fn close(&self) -> Result<()> {
        self.signal_all();
        let next = self.transition(|state, _| match state {
            State::Active => Some(State::ReadyToClose),
            State::PeerClosed => Some(State::Terminating),
            State::PeerTerminating => Some(State::Terminated),
            _ => None,
        });
        match next {
            Some(_) => Ok(()),
            None => Err(Error::ConnectionClosed),
        }
    }

    fn on_peer_closed(&self) {
        self.transition(|state, _| match state {
            State::ReadyToClose => Some(State::Terminating),
            State::Active => Some(State::PeerClosed),
            _ => None,
        });
    }

    fn on_peer_terminate(&self) {
        self.transition(|state, _| match state {
            State::Active | State::PeerClosed => Some(State::PeerTerminating),
            State::ReadyToClose => Some(State::Terminating),
            State::Terminating => Some(State::Terminated),
            _ => None,
        });
    }

    fn input(&self, segments: Vec<Segment>) {
        let current = self.elapsed();
        self.last_incoming_time.store(current, Ordering::Release);

        for segment in segments {
            if segment.conversation() != self.meta.conversation {
                trace!(
                    conv = self.meta.conversation,
                    other = segment.conversation(),
                    "segment of another conversation"
                );
                break;
            }
            if segment.option().contains(SegmentOption::CLOSE) {
                self.on_peer_closed();
            }

            match segment {
                Segment::Data(seg) => {
                    let available = {
                        let mut receiving = lock(&self.receiving);
                        receiving.process_segment(seg);
                        receiving.is_data_available()
                    };
                    if available {
                        self.data_input.notify_one();
                    }
                    self.data_updater.wake_up();
                }
                Segment::Ack(seg) => {
                    let sample = lock(&self.sending).process_segment(current, &seg);
                    if let Some(rtt) = sample {
                        lock(&self.round_trip).update(rtt, current);
                    }
                    self.data_output.notify_one();
                    self.data_updater.wake_up();
                }
                Segment::Cmd(seg) => {
                    if seg.command == Command::Terminate {
                        self.on_peer_terminate();
                    }
                    if seg.option.contains(SegmentOption::CLOSE)
                        || seg.command == Command::Terminate
                    {
                        self.signal_all();
                    }
                    lock(&self.sending).process_receiving_next(seg.receiving_next);
                    {
                        let mut receiving = lock(&self.receiving);
                        receiving.process_sending_next(seg.sending_next);
                        if seg.command == Command::Ping {
                            // Answer with our window so a stalled peer can resume.
                            receiving.mark_dirty();
                        }
                    }
                    lock(&self.round_trip).update_peer_rto(seg.peer_rto, current);
                    self.data_output.notify_one();
                    self.data_updater.wake_up();
                }
            }
        }
    }

    fn data_update_necessary(&self) -> bool {
        match self.state() {
            State::Terminating | State::Terminated => false,
            // Keep flushing until the sending window drains.
            State::ReadyToClose => true,
            _ => {
                lock(&self.sending).update_necessary()
                    || lock(&self.receiving).update_necessary()
            }
        }
    }

    fn flush(&self) {
        let current = self.elapsed();
        if self.state() == State::Terminated {
            return;
        }

        let idle_ms = self.lifecycle.idle_timeout.as_millis() as u32;
        let last_incoming = self.last_incoming_time.load(Ordering::Acquire);
        if self.state() == State::Active && current.wrapping_sub(last_incoming) >= idle_ms {
            debug!(conv = self.meta.conversation, "closing idle connection");
            let _ = self.close();
        }

        let send_empty = lock(&self.sending).is_empty();
        let ready_to_close_ms = self.lifecycle.ready_to_close_timeout.as_millis() as u32;
        let peer_terminating_ms = self.lifecycle.peer_terminating_timeout.as_millis() as u32;
        let terminating_ms = self.lifecycle.terminating_timeout.as_millis() as u32;
        self.transition(|state, age| match state {
            State::ReadyToClose if send_empty || age > ready_to_close_ms => {
                Some(State::Terminating)
            }
            State::PeerTerminating if age > peer_terminating_ms => Some(State::Terminating),
            _ => None,
        });

        if self.state() == State::Terminating {
            trace!(conv = self.meta.conversation, "sending terminate");
            self.ping(current, Command::Terminate);
            self.transition(|state, age| {
                (state == State::Terminating && age > terminating_ms).then_some(State::Terminated)
            });
            return;
        }

        let option = self.segment_option();
        let rto = lock(&self.round_trip).timeout();
        lock(&self.receiving).flush(current, rto, option, |seg| self.output.write(&seg));
        let una_moved = lock(&self.sending).flush(current, rto, option, |seg| {
            self.output.write(seg);
        });

        let ping_ms = self.lifecycle.ping_interval.as_millis() as u32;
        let last_ping = self.last_ping_time.load(Ordering::Acquire);
        if una_moved || current.wrapping_sub(last_ping) >= ping_ms {
            self.ping(current, Command::Ping);
        }
    }

    fn segment_option(&self) -> SegmentOption {
        if self.state() == State::ReadyToClose {
            SegmentOption::CLOSE
        } else {
            SegmentOption::empty()
        }
    }

    fn ping(&self, current: u32, command: Command) {
        let segment = CmdOnlySegment {
            conversation: self.meta.conversation,
            command,
            option: self.segment_option(),
            sending_next: lock(&self.sending).first_unacknowledged(),
            receiving_next: lock(&self.receiving).next_number(),
            peer_rto: lock(&self.round_trip).timeout(),
        };
        self.output.write(&segment);
        self.last_ping_time.store(current, Ordering::Release);
    }

    fn signal_all(&self) {
        self.data_input.notify_waiters();
        self.data_input.notify_one();
        self.data_output.notify_waiters();
        self.data_output.notify_one();
    }

    fn release_resources(&self) {
        if self.released.swap(true, Ordering::AcqRel) {
            return;
        }
        info!(
            conv = self.meta.conversation,
            remote = %self.meta.remote_addr,
            "connection terminated"
        );
        self.output.close();
        lock(&self.sending).release();
        lock(&self.receiving).release();
        self.data_updater.wake_up();
        self.ping_updater.wake_up();
    }
}

/// Waits for `signal`, or fails with [`Error::Timeout`] once `deadline` passes.
///
/// 等待 `signal`，或在 `deadline` 到期后返回 [`Error::Timeout`]。
async fn wait_for(signal: &Notify, deadline: Option<Instant>) -> Result<()> {
    match deadline {
        Some(deadline) => {
            if Instant::now() >= deadline {
                return Err(Error::Timeout);
            }
            tokio::time::timeout_at(deadline, signal.notified())
                .await
                .map_err(|_| Error::Timeout)
        }
        None => {
            signal.notified().await;
            Ok(())
        }
    }
}
