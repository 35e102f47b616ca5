//! Annex-B assembly of decoded access units.
//!
//! Each unit is written as `00 00 00 01` + payload. Keyframe (IDR) units are
//! preceded by the session's SPS and PPS, each behind its own start code, so
//! a viewer joining mid-stream can start decoding at any keyframe.

use bytes::{Bytes, BytesMut};
use ffmpeg_source::h264::{AccessUnit, ParameterSets, START_CODE};

/// Assembles the units decoded from one packet into a single buffer.
pub fn assemble(units: &[AccessUnit], params: &ParameterSets) -> Bytes {
    let mut out = BytesMut::with_capacity(assembled_len(units, params));
    for unit in units {
        if unit.is_keyframe() {
            out.extend_from_slice(&START_CODE);
            out.extend_from_slice(params.sps());
            out.extend_from_slice(&START_CODE);
            out.extend_from_slice(params.pps());
        }
        out.extend_from_slice(&START_CODE);
        out.extend_from_slice(unit.payload());
    }
    out.freeze()
}

fn assembled_len(units: &[AccessUnit], params: &ParameterSets) -> usize {
    let parameter_len = 2 * START_CODE.len() + params.sps().len() + params.pps().len();
    units
        .iter()
        .map(|u| {
            let framed = START_CODE.len() + u.payload().len();
            if u.is_keyframe() {
                framed + parameter_len
            } else {
                framed
            }
        })
        .sum()
}
