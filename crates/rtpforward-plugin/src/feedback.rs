//! Optional feedback relay
//!
//! Some receivers answer the forwarded stream with RTCP of their own (receiver
//! reports, PLI, NACK) sent back to the socket the media came from. When
//! enabled, one worker per configured target reads those datagrams and relays
//! the RTCP toward the browser through the gateway.

use std::io;
use std::net::UdpSocket;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use rtpforward_media::rtcp;

use crate::gateway::{Gateway, SessionHandle};
use crate::session::ForwardTarget;

/// Largest datagram the relay will read
const MAX_DATAGRAM: usize = 1500;

pub struct FeedbackRelay {
    stop: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl FeedbackRelay {
    /// Start relaying feedback that arrives on `target`'s socket.
    ///
    /// The worker checks its stop flag at least every `poll`.
    pub fn spawn(
        handle: SessionHandle,
        target: &ForwardTarget,
        gateway: Arc<dyn Gateway>,
        poll: Duration,
    ) -> io::Result<Self> {
        let socket = target.try_clone_socket()?;
        socket.set_read_timeout(Some(poll))?;
        let video_rtcp_port = target.ports().video_rtcp;

        let stop = Arc::new(AtomicBool::new(false));
        let thread = thread::Builder::new()
            .name(format!("rtpforward relay {}", handle))
            .spawn({
                let stop = stop.clone();
                move || run(handle, socket, video_rtcp_port, gateway, stop)
            })?;

        tracing::info!("Session {}: feedback relay started", handle);

        Ok(Self {
            stop,
            thread: Some(thread),
        })
    }

    pub fn stop(&self) {
        self.stop.store(true, Ordering::Release);
    }

    /// Not asked to stop and still reading
    pub fn is_running(&self) -> bool {
        !self.stop.load(Ordering::Acquire) && !self.is_finished()
    }

    pub fn is_finished(&self) -> bool {
        self.thread.as_ref().is_none_or(|t| t.is_finished())
    }

    /// Stop the worker and wait for it (blocking)
    pub fn join(mut self) {
        self.stop();
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                tracing::error!("Feedback relay worker panicked");
            }
        }
    }
}

impl Drop for FeedbackRelay {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run(
    handle: SessionHandle,
    socket: UdpSocket,
    video_rtcp_port: u16,
    gateway: Arc<dyn Gateway>,
    stop: Arc<AtomicBool>,
) {
    let mut buf = [0u8; MAX_DATAGRAM];
    let mut relayed = 0u64;

    while !stop.load(Ordering::Acquire) {
        match socket.recv_from(&mut buf) {
            Ok((len, from)) => {
                let packet = &buf[..len];
                if !rtcp::is_rtcp(packet) {
                    tracing::trace!("Session {}: ignoring non-RTCP datagram from {}", handle, from);
                    continue;
                }

                // The receiver is expected to send video feedback from its video RTCP port
                let video = from.port() == video_rtcp_port;
                match gateway.relay_rtcp(handle, video, packet) {
                    Ok(()) => relayed += 1,
                    Err(e) => tracing::debug!("Session {}: could not relay feedback: {}", handle, e),
                }
            }
            Err(e)
                if matches!(
                    e.kind(),
                    io::ErrorKind::WouldBlock
                        | io::ErrorKind::TimedOut
                        | io::ErrorKind::ConnectionRefused
                        | io::ErrorKind::ConnectionReset
                ) =>
            {
                continue;
            }
            Err(e) => {
                tracing::warn!("Session {}: feedback relay read failed: {}", handle, e);
                break;
            }
        }
    }

    tracing::info!(
        "Session {}: feedback relay stopped after {} packets",
        handle,
        relayed
    );
}
