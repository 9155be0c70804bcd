//! Offer/answer for a receive-only forwarding session
//!
//! The gateway adds ICE and DTLS to whatever answer we push, so only the media
//! sections matter here: one receive-only audio line and one receive-only
//! video line, each carrying exactly one codec. Everything else is rejected.

use std::io::Cursor;
use webrtc::sdp::description::media::MediaDescription;
use webrtc::sdp::description::session::SessionDescription;

use rtpforward_media::{AudioCodec, VideoCodec};

use crate::error::{Error, Result};

/// Codecs we would like the browser to send
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Preferences {
    pub audio: AudioCodec,
    pub video: VideoCodec,
}

/// Generated answer and the codecs it settled on
#[derive(Debug, Clone)]
pub struct Answer {
    pub sdp: String,
    pub audio: Option<AudioCodec>,
    pub video: Option<VideoCodec>,
}

/// One offered payload type with its rtpmap
#[derive(Debug, Clone, PartialEq, Eq)]
struct Payload {
    pt: u8,
    encoding: String,
    clock_rate: u32,
    channels: u16,
}

pub fn parse_offer(sdp: &str) -> Result<SessionDescription> {
    let offer = SessionDescription::unmarshal(&mut Cursor::new(sdp.as_bytes()))
        .map_err(|e| Error::InvalidSdp(e.to_string()))?;

    if offer.media_descriptions.is_empty() {
        return Err(Error::InvalidSdp("offer has no media".to_string()));
    }
    Ok(offer)
}

/// Parse an offer and answer it.
pub fn negotiate(offer_sdp: &str, prefs: Preferences) -> Result<Answer> {
    let offer = parse_offer(offer_sdp)?;
    let answer = generate_answer(&offer, prefs);
    let (audio, video) = find_first_codecs(&answer);

    Ok(Answer {
        sdp: answer.marshal(),
        audio,
        video,
    })
}

pub fn generate_answer(offer: &SessionDescription, prefs: Preferences) -> SessionDescription {
    let mut answer = SessionDescription::new_jsep_session_description(false);
    let mut audio_done = false;
    let mut video_done = false;
    let mut bundled = Vec::new();

    for offered in &offer.media_descriptions {
        let selected = match offered.media_name.media.as_str() {
            "audio" if !audio_done => select_payload(offered, |p| {
                AudioCodec::from_rtpmap(&p.encoding, p.clock_rate).map(|c| c == prefs.audio)
            }),
            "video" if !video_done => select_payload(offered, |p| {
                VideoCodec::from_rtpmap(&p.encoding, p.clock_rate).map(|c| c == prefs.video)
            }),
            _ => None,
        };

        let media = match selected {
            Some(payload) => {
                match offered.media_name.media.as_str() {
                    "audio" => audio_done = true,
                    _ => video_done = true,
                }
                if let Some(mid) = mid(offered) {
                    bundled.push(mid.to_string());
                }
                accept(offered, &payload)
            }
            None => {
                tracing::debug!("Rejecting offered {} m-line", offered.media_name.media);
                reject(offered)
            }
        };
        answer = answer.with_media(media);
    }

    let offered_bundle = offer
        .attributes
        .iter()
        .any(|a| a.key == "group" && a.value.as_deref().is_some_and(|v| v.starts_with("BUNDLE")));
    if offered_bundle && !bundled.is_empty() {
        answer = answer.with_value_attribute("group".to_string(), format!("BUNDLE {}", bundled.join(" ")));
    }

    answer
}

/// First audio and video codec of the accepted m-lines of an answer
pub fn find_first_codecs(sdp: &SessionDescription) -> (Option<AudioCodec>, Option<VideoCodec>) {
    let mut audio = None;
    let mut video = None;

    for media in sdp.media_descriptions.iter().filter(|m| m.media_name.port.value != 0) {
        let Some(first) = offered_payloads(media).into_iter().next() else {
            continue;
        };
        match media.media_name.media.as_str() {
            "audio" if audio.is_none() => {
                audio = AudioCodec::from_rtpmap(&first.encoding, first.clock_rate);
            }
            "video" if video.is_none() => {
                video = VideoCodec::from_rtpmap(&first.encoding, first.clock_rate);
            }
            _ => {}
        }
    }

    (audio, video)
}

/// Pick the preferred payload, else the first one we support.
///
/// `matches` returns `None` for unsupported payloads and whether the payload
/// is the preferred codec otherwise.
fn select_payload(media: &MediaDescription, matches: impl Fn(&Payload) -> Option<bool>) -> Option<Payload> {
    let payloads = offered_payloads(media);
    payloads
        .iter()
        .find(|p| matches(p) == Some(true))
        .or_else(|| payloads.iter().find(|p| matches(p).is_some()))
        .cloned()
}

fn accept(offered: &MediaDescription, payload: &Payload) -> MediaDescription {
    let pt = payload.pt;
    let fmtp = attribute_values(offered, "fmtp")
        .find_map(|v| strip_pt(v, pt))
        .unwrap_or_default()
        .to_string();

    let mut media = MediaDescription::new_jsep_media_description(offered.media_name.media.clone(), vec![]);
    media.media_name.protos = offered.media_name.protos.clone();

    if let Some(mid) = mid(offered) {
        media = media.with_value_attribute("mid".to_string(), mid.to_string());
    }
    media = media.with_property_attribute(answer_direction(offered).to_string());
    if offered.attributes.iter().any(|a| a.key == "rtcp-mux") {
        media = media.with_property_attribute("rtcp-mux".to_string());
    }

    media = media.with_codec(
        pt,
        payload.encoding.clone(),
        payload.clock_rate,
        payload.channels,
        fmtp,
    );

    for feedback in attribute_values(offered, "rtcp-fb").filter_map(|v| strip_pt(v, pt)) {
        media = media.with_value_attribute("rtcp-fb".to_string(), format!("{} {}", pt, feedback));
    }

    media
}

fn reject(offered: &MediaDescription) -> MediaDescription {
    let mut media = MediaDescription::new_jsep_media_description(offered.media_name.media.clone(), vec![]);
    media.media_name.port.value = 0;
    media.media_name.protos = offered.media_name.protos.clone();
    media.media_name.formats = offered.media_name.formats.clone();
    if let Some(mid) = mid(offered) {
        media = media.with_value_attribute("mid".to_string(), mid.to_string());
    }
    media
}

fn answer_direction(offered: &MediaDescription) -> &'static str {
    let inactive = offered
        .attributes
        .iter()
        .any(|a| a.key == "recvonly" || a.key == "inactive");
    if inactive { "inactive" } else { "recvonly" }
}

fn mid(media: &MediaDescription) -> Option<&str> {
    attribute_values(media, "mid").next()
}

fn attribute_values<'a>(media: &'a MediaDescription, key: &'a str) -> impl Iterator<Item = &'a str> {
    media
        .attributes
        .iter()
        .filter(move |a| a.key == key)
        .filter_map(|a| a.value.as_deref())
}

/// `"96 nack pli"` with pt 96 becomes `"nack pli"`
fn strip_pt(value: &str, pt: u8) -> Option<&str> {
    let (head, rest) = value.split_once(' ')?;
    (head.parse::<u8>().ok()? == pt).then_some(rest.trim())
}

/// Payload types of an m-line in offer order, resolved through rtpmap
fn offered_payloads(media: &MediaDescription) -> Vec<Payload> {
    media
        .media_name
        .formats
        .iter()
        .filter_map(|format| format.parse::<u8>().ok())
        .filter_map(|pt| {
            attribute_values(media, "rtpmap")
                .find_map(|v| strip_pt(v, pt))
                .and_then(|map| parse_rtpmap(pt, map))
                .or_else(|| static_payload(pt))
        })
        .collect()
}

/// `"opus/48000/2"`
fn parse_rtpmap(pt: u8, map: &str) -> Option<Payload> {
    let mut parts = map.split('/');
    let encoding = parts.next()?.to_string();
    let clock_rate = parts.next()?.parse().ok()?;
    let channels = parts.next().and_then(|c| c.parse().ok()).unwrap_or(0);
    Some(Payload {
        pt,
        encoding,
        clock_rate,
        channels,
    })
}

/// RFC 3551 payload types that may be offered without an rtpmap
fn static_payload(pt: u8) -> Option<Payload> {
    let encoding = match pt {
        0 => "PCMU",
        8 => "PCMA",
        9 => "G722",
        _ => return None,
    };
    Some(Payload {
        pt,
        encoding: encoding.to_string(),
        clock_rate: 8000,
        channels: 0,
    })
}
