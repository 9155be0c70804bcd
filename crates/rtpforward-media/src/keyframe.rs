//! Keyframe detection on RTP payloads
//!
//! Only the payload descriptor and the first bytes of the codec bitstream are
//! inspected. Nothing is depacketized.

/// Drop `n` bytes from the front of `buf`
fn skip(buf: &[u8], n: usize) -> Option<&[u8]> {
    buf.get(n..)
}

/// VP8, see https://datatracker.ietf.org/doc/html/rfc7741#section-4.2
pub fn is_vp8_keyframe(payload: &[u8]) -> bool {
    vp8_keyframe(payload).unwrap_or(false)
}

fn vp8_keyframe(payload: &[u8]) -> Option<bool> {
    let (&byte0, mut rest) = payload.split_first()?;
    let has_extensions = byte0 & 0x80 != 0;
    let start_of_partition = byte0 & 0x10 != 0;
    let partition_id = byte0 & 0x0f;

    if has_extensions {
        let (&x_byte, tail) = rest.split_first()?;
        rest = tail;
        // I: picture id, 7 or 15 bits depending on its M bit
        if x_byte & 0x80 != 0 {
            let picture_id = *rest.first()?;
            rest = skip(rest, if picture_id & 0x80 != 0 { 2 } else { 1 })?;
        }
        // L: TL0PICIDX
        if x_byte & 0x40 != 0 {
            rest = skip(rest, 1)?;
        }
        // T or K share one byte
        if x_byte & 0x30 != 0 {
            rest = skip(rest, 1)?;
        }
    }

    if !start_of_partition || partition_id != 0 {
        return Some(false);
    }

    // Frame tag: P bit is an inverse key frame flag, followed on key frames by
    // the start code 9d 01 2a (RFC 6386 section 9.1).
    match rest {
        [tag, _, _, 0x9d, 0x01, 0x2a, ..] => Some(tag & 0x01 == 0),
        _ => Some(false),
    }
}

/// VP9, see https://datatracker.ietf.org/doc/html/rfc9628#section-4.2
pub fn is_vp9_keyframe(payload: &[u8]) -> bool {
    vp9_keyframe(payload).unwrap_or(false)
}

fn vp9_keyframe(payload: &[u8]) -> Option<bool> {
    let (&byte0, mut rest) = payload.split_first()?;
    let has_picture_id = byte0 & 0x80 != 0;
    let inter_predicted = byte0 & 0x40 != 0;
    let has_layer_indices = byte0 & 0x20 != 0;
    let start_of_frame = byte0 & 0x08 != 0;

    if inter_predicted || !start_of_frame {
        return Some(false);
    }

    if has_picture_id {
        let picture_id = *rest.first()?;
        rest = skip(rest, if picture_id & 0x80 != 0 { 2 } else { 1 })?;
    }

    if has_layer_indices {
        // TID:3 U:1 SID:3 D:1, only the base spatial layer starts a keyframe
        let layer = *rest.first()?;
        return Some((layer >> 1) & 0x07 == 0);
    }

    Some(true)
}

const NAL_IDR: u8 = 5;
const NAL_SPS: u8 = 7;
const NAL_STAP_A: u8 = 24;
const NAL_FU_A: u8 = 28;

fn starts_keyframe(nal_type: u8) -> bool {
    nal_type == NAL_IDR || nal_type == NAL_SPS
}

/// H.264, see https://datatracker.ietf.org/doc/html/rfc6184#section-5.2
pub fn is_h264_keyframe(payload: &[u8]) -> bool {
    let Some(&header) = payload.first() else {
        return false;
    };

    match header & 0x1f {
        NAL_STAP_A => {
            let mut rest = &payload[1..];
            while rest.len() > 2 {
                let size = u16::from_be_bytes([rest[0], rest[1]]) as usize;
                let Some(nal) = rest.get(2..2 + size) else {
                    break;
                };
                if nal.first().is_some_and(|n| starts_keyframe(n & 0x1f)) {
                    return true;
                }
                rest = &rest[2 + size..];
            }
            false
        }
        NAL_FU_A => payload
            .get(1)
            .is_some_and(|fu| fu & 0x80 != 0 && starts_keyframe(fu & 0x1f)),
        nal_type => starts_keyframe(nal_type),
    }
}
