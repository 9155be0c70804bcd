//! Per-call session state
//!
//! A session is shared between the gateway's media thread (forwarding), the
//! control path, the signaling worker and the watchdog. Forwarding policy is
//! a set of independent scalars, so each is its own atomic and updates are
//! last-write-wins. The outbound target is swapped as a whole behind a lock
//! that is never held across I/O.

use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use serde_json::Value;
use std::io;
use std::net::{Ipv4Addr, SocketAddrV4, UdpSocket};
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicU16, AtomicU32, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};

use rtpforward_media::{AudioCodec, VideoCodec};

use crate::feedback::FeedbackRelay;
use crate::gateway::{Gateway, SessionHandle};

/// Destination ports on the external receiver
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TargetPorts {
    pub video_rtp: u16,
    pub video_rtcp: u16,
    pub audio_rtp: u16,
    pub audio_rtcp: u16,
}

impl TargetPorts {
    pub fn rtp(&self, video: bool) -> u16 {
        if video { self.video_rtp } else { self.audio_rtp }
    }

    pub fn rtcp(&self, video: bool) -> u16 {
        if video { self.video_rtcp } else { self.audio_rtcp }
    }
}

/// The outbound UDP socket and where it sends to
///
/// One socket serves all four streams. Dropping the target closes it.
#[derive(Debug)]
pub struct ForwardTarget {
    socket: UdpSocket,
    address: Ipv4Addr,
    ports: TargetPorts,
}

impl ForwardTarget {
    /// Open the outbound socket.
    ///
    /// Multicast targets get a TTL of zero and an explicit outbound
    /// interface, so the kernel neither routes them off the host nor picks
    /// an interface on its own.
    pub fn open(
        address: Ipv4Addr,
        ports: TargetPorts,
        multicast_interface: Ipv4Addr,
    ) -> io::Result<Self> {
        let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0))?;

        if address.is_multicast() {
            socket.set_multicast_ttl_v4(0)?;
            socket2::SockRef::from(&socket).set_multicast_if_v4(&multicast_interface)?;
        }

        Ok(Self {
            socket,
            address,
            ports,
        })
    }

    pub fn address(&self) -> Ipv4Addr {
        self.address
    }

    pub fn ports(&self) -> TargetPorts {
        self.ports
    }

    pub fn send(&self, port: u16, buf: &[u8]) -> io::Result<usize> {
        self.socket.send_to(buf, SocketAddrV4::new(self.address, port))
    }

    /// Second handle on the same socket, for the feedback relay
    pub fn try_clone_socket(&self) -> io::Result<UdpSocket> {
        self.socket.try_clone()
    }

    pub fn local_port(&self) -> io::Result<u16> {
        Ok(self.socket.local_addr()?.port())
    }
}

/// Codec preferences from `configure` and the outcome of the last answer
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Negotiation {
    pub requested_audio: AudioCodec,
    pub requested_video: VideoCodec,
    /// `None` until an answer has been produced, or when audio was rejected
    pub audio: Option<AudioCodec>,
    /// `None` until an answer has been produced, or when video was rejected
    pub video: Option<VideoCodec>,
}

/// Forwarding-policy fields of a control message, validated as a whole
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PolicyUpdate {
    pub enable_video_on_keyframe: Option<bool>,
    pub disable_video_on_packetloss: Option<bool>,
    pub video_enabled: Option<bool>,
    pub audio_enabled: Option<bool>,
    pub drop_permille: Option<u16>,
    pub drop_video_packets: Option<u32>,
    pub drop_audio_packets: Option<u32>,
}

/// Snapshot returned by `query_session`
#[derive(Debug, Clone, Serialize)]
pub struct SessionInfo {
    pub handle: u64,
    pub target: Option<String>,
    pub ports: Option<TargetPorts>,
    pub requested_audio_codec: AudioCodec,
    pub requested_video_codec: VideoCodec,
    pub audio_codec: Option<AudioCodec>,
    pub video_codec: Option<VideoCodec>,
    pub video_enabled: bool,
    pub audio_enabled: bool,
    pub enable_video_on_keyframe: bool,
    pub disable_video_on_packetloss: bool,
    pub drop_probability: u16,
    pub drop_video_packets: u32,
    pub drop_audio_packets: u32,
    pub hanging_up: bool,
    pub destroyed: bool,
}

pub struct Session {
    handle: SessionHandle,
    target: RwLock<Option<Arc<ForwardTarget>>>,
    negotiation: RwLock<Negotiation>,

    video_enabled: AtomicBool,
    audio_enabled: AtomicBool,
    enable_video_on_keyframe: AtomicBool,
    disable_video_on_packetloss: AtomicBool,
    drop_permille: AtomicU16,
    drop_video_packets: AtomicU32,
    drop_audio_packets: AtomicU32,

    last_video_seq: AtomicU16,
    fir_seq: AtomicU8,
    hanging_up: AtomicBool,
    destroyed: OnceLock<Instant>,

    relays: Mutex<Vec<FeedbackRelay>>,
}

impl Session {
    pub fn new(handle: SessionHandle) -> Self {
        Self {
            handle,
            target: RwLock::new(None),
            negotiation: RwLock::new(Negotiation::default()),
            video_enabled: AtomicBool::new(true),
            audio_enabled: AtomicBool::new(true),
            enable_video_on_keyframe: AtomicBool::new(false),
            disable_video_on_packetloss: AtomicBool::new(false),
            drop_permille: AtomicU16::new(0),
            drop_video_packets: AtomicU32::new(0),
            drop_audio_packets: AtomicU32::new(0),
            last_video_seq: AtomicU16::new(0),
            fir_seq: AtomicU8::new(0),
            hanging_up: AtomicBool::new(false),
            destroyed: OnceLock::new(),
            relays: Mutex::new(Vec::new()),
        }
    }

    pub fn handle(&self) -> SessionHandle {
        self.handle
    }

    // Lifecycle

    /// Stamp the destruction time. Returns false if it was already stamped;
    /// the first stamp is kept.
    pub fn mark_destroyed(&self, now: Instant) -> bool {
        self.destroyed.set(now).is_ok()
    }

    pub fn destroyed_at(&self) -> Option<Instant> {
        self.destroyed.get().copied()
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed.get().is_some()
    }

    /// Enter hang-up. Returns true only for the first caller.
    pub fn hang_up(&self) -> bool {
        if self.is_destroyed() {
            return false;
        }
        !self.hanging_up.swap(true, Ordering::AcqRel)
    }

    pub fn clear_hang_up(&self) {
        self.hanging_up.store(false, Ordering::Release);
    }

    pub fn is_hanging_up(&self) -> bool {
        self.hanging_up.load(Ordering::Acquire)
    }

    /// Release owned resources: close the socket and join relay workers.
    /// Blocks for up to one relay poll interval.
    pub fn close(&self) {
        drop(self.target.write().take());
        self.join_relays();
    }

    // Target

    pub fn target(&self) -> Option<Arc<ForwardTarget>> {
        self.target.read().clone()
    }

    /// Swap the outbound target, returning the previous one
    pub fn replace_target(&self, target: Option<Arc<ForwardTarget>>) -> Option<Arc<ForwardTarget>> {
        std::mem::replace(&mut *self.target.write(), target)
    }

    pub fn is_configured(&self) -> bool {
        self.target.read().is_some()
    }

    // Feedback relay workers

    /// Start a relay on the current target unless one is already running.
    ///
    /// Returns false when there is no target or a relay is running. The
    /// check and the spawn happen under the relay lock, so two callers never
    /// start two relays on one socket.
    pub fn start_relay(&self, gateway: &Arc<dyn Gateway>, poll: Duration) -> io::Result<bool> {
        let mut relays = self.relays.lock();
        if relays.iter().any(FeedbackRelay::is_running) {
            return Ok(false);
        }
        let Some(target) = self.target() else {
            return Ok(false);
        };
        relays.retain(|r| !r.is_finished());
        relays.push(FeedbackRelay::spawn(self.handle, &target, gateway.clone(), poll)?);
        Ok(true)
    }

    pub fn has_running_relay(&self) -> bool {
        self.relays.lock().iter().any(FeedbackRelay::is_running)
    }

    /// Ask relay workers to stop without waiting for them
    pub fn stop_relays(&self) {
        for relay in self.relays.lock().iter() {
            relay.stop();
        }
    }

    /// Stop relay workers and wait until each has dropped its socket handle.
    /// Blocks for up to one relay poll interval.
    pub fn join_relays(&self) {
        let relays = std::mem::take(&mut *self.relays.lock());
        for relay in relays {
            relay.join();
        }
    }

    // Negotiation

    pub fn negotiation(&self) -> Negotiation {
        *self.negotiation.read()
    }

    pub fn set_requested_codecs(&self, audio: Option<AudioCodec>, video: Option<VideoCodec>) {
        let mut negotiation = self.negotiation.write();
        if let Some(audio) = audio {
            negotiation.requested_audio = audio;
        }
        if let Some(video) = video {
            negotiation.requested_video = video;
        }
    }

    pub fn set_negotiated(&self, audio: Option<AudioCodec>, video: Option<VideoCodec>) {
        let mut negotiation = self.negotiation.write();
        negotiation.audio = audio;
        negotiation.video = video;
    }

    pub fn negotiated_video(&self) -> Option<VideoCodec> {
        self.negotiation.read().video
    }

    // Forwarding policy

    pub fn apply_policy(&self, update: &PolicyUpdate) {
        if let Some(v) = update.enable_video_on_keyframe {
            self.enable_video_on_keyframe.store(v, Ordering::Relaxed);
            tracing::info!("Session {}: enable_video_on_keyframe={}", self.handle, v);
        }
        if let Some(v) = update.disable_video_on_packetloss {
            self.disable_video_on_packetloss.store(v, Ordering::Relaxed);
            tracing::info!("Session {}: disable_video_on_packetloss={}", self.handle, v);
        }
        if let Some(v) = update.drop_permille {
            self.drop_permille.store(v, Ordering::Relaxed);
            tracing::info!("Session {}: drop_probability={}", self.handle, v);
        }
        if let Some(v) = update.drop_video_packets {
            self.drop_video_packets.store(v, Ordering::Relaxed);
            tracing::info!("Session {}: drop_video_packets={}", self.handle, v);
        }
        if let Some(v) = update.drop_audio_packets {
            self.drop_audio_packets.store(v, Ordering::Relaxed);
            tracing::info!("Session {}: drop_audio_packets={}", self.handle, v);
        }
        if let Some(v) = update.video_enabled {
            self.video_enabled.store(v, Ordering::Relaxed);
            tracing::info!("Session {}: video_enabled={}", self.handle, v);
        }
        if let Some(v) = update.audio_enabled {
            self.audio_enabled.store(v, Ordering::Relaxed);
            tracing::info!("Session {}: audio_enabled={}", self.handle, v);
        }
    }

    pub fn video_enabled(&self) -> bool {
        self.video_enabled.load(Ordering::Relaxed)
    }

    pub fn set_video_enabled(&self, enabled: bool) {
        self.video_enabled.store(enabled, Ordering::Relaxed);
    }

    pub fn audio_enabled(&self) -> bool {
        self.audio_enabled.load(Ordering::Relaxed)
    }

    pub fn enable_video_on_keyframe(&self) -> bool {
        self.enable_video_on_keyframe.load(Ordering::Relaxed)
    }

    pub fn disable_video_on_packetloss(&self) -> bool {
        self.disable_video_on_packetloss.load(Ordering::Relaxed)
    }

    pub fn drop_permille(&self) -> u16 {
        self.drop_permille.load(Ordering::Relaxed)
    }

    /// Consume one unit of the one-shot video drop counter, if any is left
    pub fn take_video_drop(&self) -> bool {
        take_one(&self.drop_video_packets)
    }

    /// Consume one unit of the one-shot audio drop counter, if any is left
    pub fn take_audio_drop(&self) -> bool {
        take_one(&self.drop_audio_packets)
    }

    /// Record a new last-seen video sequence number, returning the old one
    pub fn swap_last_video_seq(&self, seq: u16) -> u16 {
        self.last_video_seq.swap(seq, Ordering::Relaxed)
    }

    /// Sequence number for the next FIR, wrapping at 256
    pub fn next_fir_seq(&self) -> u8 {
        self.fir_seq.fetch_add(1, Ordering::Relaxed)
    }

    pub fn info(&self) -> SessionInfo {
        let target = self.target();
        let negotiation = self.negotiation();
        SessionInfo {
            handle: self.handle.0,
            target: target.as_ref().map(|t| t.address().to_string()),
            ports: target.as_ref().map(|t| t.ports()),
            requested_audio_codec: negotiation.requested_audio,
            requested_video_codec: negotiation.requested_video,
            audio_codec: negotiation.audio,
            video_codec: negotiation.video,
            video_enabled: self.video_enabled(),
            audio_enabled: self.audio_enabled(),
            enable_video_on_keyframe: self.enable_video_on_keyframe(),
            disable_video_on_packetloss: self.disable_video_on_packetloss(),
            drop_probability: self.drop_permille(),
            drop_video_packets: self.drop_video_packets.load(Ordering::Relaxed),
            drop_audio_packets: self.drop_audio_packets.load(Ordering::Relaxed),
            hanging_up: self.is_hanging_up(),
            destroyed: self.is_destroyed(),
        }
    }

    pub fn snapshot(&self) -> Value {
        serde_json::to_value(self.info()).unwrap_or(Value::Null)
    }
}

fn take_one(counter: &AtomicU32) -> bool {
    counter
        .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1))
        .is_ok()
}
