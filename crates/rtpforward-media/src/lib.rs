//! Media utilities for rtpforward
//!
//! This crate provides the packet-level pieces of the forwarder:
//! - Codec enumerations and their SDP names
//! - RTP header access and sequence-number loss accounting
//! - Keyframe detection for VP8, VP9 and H.264 payloads
//! - RTCP feedback synthesis (PLI, FIR, REMB)

pub mod codec;
pub mod keyframe;
pub mod rtcp;
pub mod rtp;

pub use codec::*;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum MediaError {
    #[error("packet marshalling failed: {0}")]
    Marshal(#[from] webrtc::util::Error),

    #[error("invalid RTP padding")]
    Padding,

    #[error("unknown {kind} codec: {name}")]
    UnknownCodec { kind: &'static str, name: String },
}
