// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

use std::time::SystemTime;

use serde::Serialize;
use tracing::{debug, instrument, trace, warn};

use crate::{
    error::ProtocolError,
    frame::{DetectedPoint, Frame, TlvBlock, TlvType},
};

/// Magic word which starts every frame on the data port.
pub const MAGIC_WORD: [u8; 8] = [0x02, 0x01, 0x04, 0x03, 0x06, 0x05, 0x08, 0x07];

/// The device pads every frame to a multiple of this many bytes.
pub const FRAME_ALIGN: usize = 32;

/// Default upper bound on the declared packet length.
pub const DEFAULT_MAX_PACKET_LEN: usize = 64 * 1024;

/// Frame header as sent by the xWR68xx out-of-box demo.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct FrameHeader {
    /// SDK version which produced the frame.
    pub version: u32,
    /// Frame length in bytes including header, TLVs and padding.
    pub total_packet_len: u32,
    /// Device platform, e.g. 0xA6843.
    pub platform: u32,
    /// Frame counter maintained by the device.
    pub frame_number: u32,
    /// Device CPU cycle counter when the frame was produced.
    pub time_cpu_cycles: u32,
    /// Number of detected points.
    pub num_detected_obj: u32,
    /// Number of TLVs following the header.
    pub num_tlvs: u32,
    /// Subframe index, zero without advanced frame configuration.
    pub subframe_number: u32,
}

impl FrameHeader {
    /// Length of the frame header in bytes, magic word included.
    pub const LEN: usize = 40;
}

/// A slice containing a frame header, starting at the magic word.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct FrameHeaderSlice<'a> {
    slice: &'a [u8],
}

impl<'a> FrameHeaderSlice<'a> {
    /// Wraps the slice if it holds a complete header.  The slice must start
    /// with the magic word; it may be shorter than the declared packet.
    pub fn from_slice(slice: &'a [u8]) -> Option<FrameHeaderSlice<'a>> {
        if slice.len() < FrameHeader::LEN || slice[..MAGIC_WORD.len()] != MAGIC_WORD {
            return None;
        }

        Some(FrameHeaderSlice { slice })
    }

    /// Copies every header field out of the slice.
    pub fn to_header(&self) -> FrameHeader {
        FrameHeader {
            version: self.version(),
            total_packet_len: self.total_packet_len(),
            platform: self.platform(),
            frame_number: self.frame_number(),
            time_cpu_cycles: self.time_cpu_cycles(),
            num_detected_obj: self.num_detected_obj(),
            num_tlvs: self.num_tlvs(),
            subframe_number: self.subframe_number(),
        }
    }

    #[inline]
    fn field(&self, index: usize) -> u32 {
        let offset = MAGIC_WORD.len() + index * 4;
        u32::from_le_bytes([
            self.slice[offset],
            self.slice[offset + 1],
            self.slice[offset + 2],
            self.slice[offset + 3],
        ])
    }

    /// SDK version which produced the frame.
    #[inline]
    pub fn version(&self) -> u32 {
        self.field(0)
    }

    /// Length of the whole frame including header, TLVs and padding.
    #[inline]
    pub fn total_packet_len(&self) -> u32 {
        self.field(1)
    }

    /// Device platform, e.g. 0xA6843 for the IWR6843.
    #[inline]
    pub fn platform(&self) -> u32 {
        self.field(2)
    }

    /// Frame counter maintained by the device.
    #[inline]
    pub fn frame_number(&self) -> u32 {
        self.field(3)
    }

    /// Device CPU cycle counter.
    #[inline]
    pub fn time_cpu_cycles(&self) -> u32 {
        self.field(4)
    }

    /// Number of detected points.
    #[inline]
    pub fn num_detected_obj(&self) -> u32 {
        self.field(5)
    }

    /// Number of TLVs following the header.
    #[inline]
    pub fn num_tlvs(&self) -> u32 {
        self.field(6)
    }

    /// Subframe index.
    #[inline]
    pub fn subframe_number(&self) -> u32 {
        self.field(7)
    }
}

/// A slice containing a TLV header followed by its payload.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct TlvSlice<'a> {
    slice: &'a [u8],
}

impl<'a> TlvSlice<'a> {
    /// Length of the TLV header in bytes.
    pub const HEADER_LEN: usize = 8;

    /// Wraps the slice if it holds the TLV header and the full payload.
    pub fn from_slice(slice: &'a [u8]) -> Option<TlvSlice<'a>> {
        if slice.len() < Self::HEADER_LEN {
            return None;
        }

        let tlv = TlvSlice { slice };
        if slice.len() < Self::HEADER_LEN + tlv.length() as usize {
            return None;
        }

        Some(tlv)
    }

    /// TLV type code, see [`TlvType`].
    #[inline]
    pub fn tlv_type(&self) -> u32 {
        u32::from_le_bytes([self.slice[0], self.slice[1], self.slice[2], self.slice[3]])
    }

    /// Payload length in bytes, excluding the TLV header.
    #[inline]
    pub fn length(&self) -> u32 {
        u32::from_le_bytes([self.slice[4], self.slice[5], self.slice[6], self.slice[7]])
    }

    /// Payload bytes following the TLV header.
    #[inline]
    pub fn payload(&self) -> &'a [u8] {
        &self.slice[Self::HEADER_LEN..Self::HEADER_LEN + self.length() as usize]
    }

    /// Total length of the TLV including its header.
    #[inline]
    pub fn total_len(&self) -> usize {
        Self::HEADER_LEN + self.length() as usize
    }
}

/// Counters kept by the frame decoder across a session.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize)]
pub struct DecoderStats {
    /// Frames successfully decoded
    pub frames: u64,
    /// Candidate frames rejected as corrupt
    pub corrupt: u64,
    /// Noise bytes discarded while searching for a magic word
    pub discarded_bytes: u64,
    /// Frames whose number did not follow the previous one
    pub sequence_gaps: u64,
}

/// Decodes a complete frame.  The slice must hold exactly the bytes declared
/// by the header's total packet length.
#[instrument(skip_all, level = "trace")]
pub fn decode_frame(packet: &[u8], timestamp: SystemTime) -> Result<Frame, ProtocolError> {
    let header = match FrameHeaderSlice::from_slice(packet) {
        Some(header) => header,
        None => return Err(ProtocolError::InvalidPacketLength(packet.len() as u32)),
    };

    let num_points = header.num_detected_obj();
    let num_tlvs = header.num_tlvs();
    let mut frame = Frame::new(header.frame_number(), timestamp);
    frame.subframe_number = header.subframe_number();

    let mut side_info = None;
    let mut offset = FrameHeader::LEN;

    for index in 0..num_tlvs {
        let tlv = match TlvSlice::from_slice(&packet[offset..]) {
            Some(tlv) => tlv,
            None => {
                return Err(ProtocolError::TlvOverrun {
                    index,
                    count: num_tlvs,
                    offset,
                })
            }
        };
        trace!(tlv_type = tlv.tlv_type(), length = tlv.length(), "tlv");

        match TlvType::from(tlv.tlv_type()) {
            TlvType::DetectedPoints => {
                check_length(&tlv, num_points.saturating_mul(16))?;
                frame.points = tlv
                    .payload()
                    .chunks_exact(16)
                    .map(|chunk| {
                        let value = |i: usize| {
                            f32::from_le_bytes([
                                chunk[i * 4],
                                chunk[i * 4 + 1],
                                chunk[i * 4 + 2],
                                chunk[i * 4 + 3],
                            ])
                        };
                        DetectedPoint::from_cartesian(value(0), value(1), value(2), value(3))
                    })
                    .collect();
            }
            TlvType::DetectedPointsSideInfo => {
                check_length(&tlv, num_points.saturating_mul(4))?;
                side_info = Some(tlv.payload());
            }
            _ => frame.raw_tlv_blocks.push(TlvBlock {
                tlv_type: tlv.tlv_type(),
                payload: tlv.payload().to_vec(),
            }),
        }

        offset += tlv.total_len();
    }

    let trailing = packet.len() - offset;
    if trailing >= FRAME_ALIGN {
        return Err(ProtocolError::TrailingData(trailing));
    }

    if frame.points.len() != num_points as usize {
        return Err(ProtocolError::MissingPoints(num_points));
    }

    if let Some(side_info) = side_info {
        for (point, chunk) in frame.points.iter_mut().zip(side_info.chunks_exact(4)) {
            let snr = i16::from_le_bytes([chunk[0], chunk[1]]) as f32 / 10.0;
            let noise = i16::from_le_bytes([chunk[2], chunk[3]]) as f32 / 10.0;
            *point = point.with_side_info(snr, noise);
        }
    }

    Ok(frame)
}

fn check_length(tlv: &TlvSlice, expected: u32) -> Result<(), ProtocolError> {
    if tlv.length() != expected {
        return Err(ProtocolError::TlvLength {
            tlv_type: tlv.tlv_type(),
            length: tlv.length(),
            expected,
        });
    }
    Ok(())
}

/// Encodes a frame into the device wire format, including padding.  Side
/// info is emitted when any point carries a noise value.
pub fn encode_frame(frame: &Frame) -> Vec<u8> {
    let mut tlvs: Vec<(u32, Vec<u8>)> = Vec::new();

    if !frame.points.is_empty() {
        let payload = frame
            .points
            .iter()
            .flat_map(|p| [p.x, p.y, p.z, p.velocity])
            .flat_map(f32::to_le_bytes)
            .collect();
        tlvs.push((TlvType::DetectedPoints.into(), payload));

        if frame.points.iter().any(|p| p.noise.is_some()) {
            let payload = frame
                .points
                .iter()
                .flat_map(|p| {
                    let snr = (p.snr * 10.0).round() as i16;
                    let noise = (p.noise.unwrap_or_default() * 10.0).round() as i16;
                    [snr, noise]
                })
                .flat_map(i16::to_le_bytes)
                .collect();
            tlvs.push((TlvType::DetectedPointsSideInfo.into(), payload));
        }
    }

    for block in &frame.raw_tlv_blocks {
        tlvs.push((block.tlv_type, block.payload.clone()));
    }

    let body: usize = tlvs
        .iter()
        .map(|(_, payload)| TlvSlice::HEADER_LEN + payload.len())
        .sum();
    let total = (FrameHeader::LEN + body).div_ceil(FRAME_ALIGN) * FRAME_ALIGN;

    let mut out = Vec::with_capacity(total);
    out.extend_from_slice(&MAGIC_WORD);
    for field in [
        0x0306_0000,
        total as u32,
        0x000A_6843,
        frame.sequence_number,
        0,
        frame.points.len() as u32,
        tlvs.len() as u32,
        frame.subframe_number,
    ] {
        out.extend_from_slice(&u32::to_le_bytes(field));
    }

    for (tlv_type, payload) in tlvs {
        out.extend_from_slice(&tlv_type.to_le_bytes());
        out.extend_from_slice(&(payload.len() as u32).to_le_bytes());
        out.extend_from_slice(&payload);
    }

    out.resize(total, 0);
    out
}

/// Stateful decoder turning the data port byte stream into frames.
///
/// Bytes are appended with [`FrameDecoder::push`] in chunks of any size and
/// frames are pulled with [`FrameDecoder::read`].  A corrupt candidate frame
/// is reported as an error and the decoder resumes scanning right after the
/// candidate's magic word, so the next call continues with the following
/// frame.
#[derive(Debug)]
pub struct FrameDecoder {
    buffer: Vec<u8>,
    max_packet_len: usize,
    last_sequence: Option<u32>,
    stats: DecoderStats,
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_PACKET_LEN)
    }
}

impl FrameDecoder {
    /// Creates a decoder rejecting frames longer than `max_packet_len`.
    pub fn new(max_packet_len: usize) -> FrameDecoder {
        FrameDecoder {
            buffer: Vec::new(),
            max_packet_len: max_packet_len.max(FrameHeader::LEN),
            last_sequence: None,
            stats: DecoderStats::default(),
        }
    }

    /// Appends bytes received from the data port.
    pub fn push(&mut self, bytes: &[u8]) {
        self.buffer.extend_from_slice(bytes);
    }

    /// Returns the next complete frame, `Ok(None)` when more bytes are
    /// needed, or the corruption found in the current candidate frame.
    pub fn read(&mut self) -> Result<Option<Frame>, ProtocolError> {
        if !self.sync() || self.buffer.len() < FrameHeader::LEN {
            return Ok(None);
        }

        let total = match FrameHeaderSlice::from_slice(&self.buffer) {
            Some(header) => header.total_packet_len(),
            None => return Ok(None),
        };

        if (total as usize) < FrameHeader::LEN || total as usize > self.max_packet_len {
            return Err(self.corrupt(ProtocolError::InvalidPacketLength(total)));
        }

        let total = total as usize;

        // Lost bytes make the header swallow the start of the next frame,
        // which shows up as a magic word inside the declared body.
        let available = self.buffer.len().min(total);
        if let Some(pos) = find_magic(&self.buffer[MAGIC_WORD.len()..available]) {
            return Err(self.corrupt(ProtocolError::EmbeddedMagic(pos + MAGIC_WORD.len())));
        }

        if self.buffer.len() < total {
            return Ok(None);
        }

        let frame = match decode_frame(&self.buffer[..total], SystemTime::now()) {
            Ok(frame) => frame,
            Err(err) => return Err(self.corrupt(err)),
        };

        self.buffer.drain(..total);
        self.track_sequence(frame.sequence_number);
        self.stats.frames += 1;

        Ok(Some(frame))
    }

    /// Discards all buffered bytes, counters and sequence tracking.
    pub fn reset(&mut self) {
        *self = Self::new(self.max_packet_len);
    }

    /// Counters accumulated since creation or the last reset.
    pub fn stats(&self) -> DecoderStats {
        self.stats
    }

    /// Sequence number of the last decoded frame.
    pub fn last_sequence(&self) -> Option<u32> {
        self.last_sequence
    }

    /// Number of bytes waiting for a complete frame.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Aligns the buffer to the earliest magic word, returning false when
    /// no magic word is present.  A partial magic word at the end of the
    /// buffer is kept.
    fn sync(&mut self) -> bool {
        match find_magic(&self.buffer) {
            Some(0) => true,
            Some(pos) => {
                debug!("discarding {} bytes before magic word", pos);
                self.stats.discarded_bytes += pos as u64;
                self.buffer.drain(..pos);
                true
            }
            None => {
                let keep = (MAGIC_WORD.len() - 1).min(self.buffer.len());
                let discard = self.buffer.len() - keep;
                if discard > 0 {
                    self.stats.discarded_bytes += discard as u64;
                    self.buffer.drain(..discard);
                }
                false
            }
        }
    }

    fn corrupt(&mut self, err: ProtocolError) -> ProtocolError {
        warn!("corrupt frame: {}", err);
        self.stats.corrupt += 1;
        self.buffer.drain(..MAGIC_WORD.len());
        err
    }

    fn track_sequence(&mut self, sequence: u32) {
        if let Some(last) = self.last_sequence {
            if sequence != last.wrapping_add(1) {
                debug!("frame sequence gap {} -> {}", last, sequence);
                self.stats.sequence_gaps += 1;
            }
        }
        self.last_sequence = Some(sequence);
    }
}

fn find_magic(data: &[u8]) -> Option<usize> {
    data.windows(MAGIC_WORD.len())
        .position(|window| window == MAGIC_WORD)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn synthetic(sequence: u32, n_points: usize) -> Frame {
        let mut frame = Frame::new(sequence, SystemTime::UNIX_EPOCH);
        frame.points = (0..n_points)
            .map(|i| {
                DetectedPoint::from_cartesian(i as f32 * 0.5 - 1.0, 2.0 + i as f32, 0.25, -0.5)
                    .with_side_info(12.5 + i as f32, 3.0)
            })
            .collect();
        frame.raw_tlv_blocks.push(TlvBlock {
            tlv_type: 2,
            payload: vec![1, 0, 2, 0, 3, 0, 4, 0],
        });
        frame
    }

    fn decode_all(decoder: &mut FrameDecoder, out: &mut Vec<Frame>, errors: &mut usize) {
        loop {
            match decoder.read() {
                Ok(Some(frame)) => out.push(frame),
                Ok(None) => break,
                Err(_) => *errors += 1,
            }
        }
    }

    fn same(a: &Frame, b: &Frame) -> bool {
        a.sequence_number == b.sequence_number
            && a.points == b.points
            && a.raw_tlv_blocks == b.raw_tlv_blocks
    }

    #[test]
    fn test_header_slice() {
        let bytes = encode_frame(&synthetic(42, 3));
        let header = FrameHeaderSlice::from_slice(&bytes).unwrap().to_header();

        assert_eq!(header.frame_number, 42);
        assert_eq!(header.num_detected_obj, 3);
        assert_eq!(header.num_tlvs, 3);
        assert_eq!(header.total_packet_len as usize, bytes.len());
        assert_eq!(bytes.len() % FRAME_ALIGN, 0);
        assert!(FrameHeaderSlice::from_slice(&bytes[1..]).is_none());
        assert!(FrameHeaderSlice::from_slice(&bytes[..20]).is_none());
    }

    #[test]
    fn test_decode_points() {
        let frame = synthetic(5, 4);
        let decoded = decode_frame(&encode_frame(&frame), SystemTime::UNIX_EPOCH).unwrap();

        assert_eq!(decoded.points.len(), 4);
        assert_eq!(decoded.points[1].y, 3.0);
        assert!((decoded.points[1].snr - 13.5).abs() < 1e-4);
        assert_eq!(decoded.points[1].noise, Some(3.0));
        assert_eq!(decoded.range_profile(), Some(vec![1, 2, 3, 4]));
    }

    #[test]
    fn test_chunking_idempotence() {
        let frames: Vec<_> = (1..=4).map(|i| synthetic(i, i as usize)).collect();
        let mut capture = vec![0xAA, 0x55, 0x02, 0x01];
        for frame in &frames {
            capture.extend(encode_frame(frame));
        }

        let mut whole = Vec::new();
        let mut errors = 0;
        let mut decoder = FrameDecoder::default();
        decoder.push(&capture);
        decode_all(&mut decoder, &mut whole, &mut errors);
        assert_eq!(whole.len(), 4);
        assert_eq!(errors, 0);

        for chunk_size in [1, 3, 7, 31, 64, 500] {
            let mut chunked = Vec::new();
            let mut decoder = FrameDecoder::default();
            for chunk in capture.chunks(chunk_size) {
                decoder.push(chunk);
                decode_all(&mut decoder, &mut chunked, &mut errors);
            }
            assert_eq!(errors, 0);
            assert_eq!(chunked.len(), whole.len());
            assert!(whole.iter().zip(&chunked).all(|(a, b)| same(a, b)));
        }

        assert!(whole.iter().zip(&frames).all(|(a, b)| same(a, b)));
    }

    #[test]
    fn test_resync_after_corrupt_frame() {
        let first = encode_frame(&synthetic(1, 2));
        let mut middle = encode_frame(&synthetic(2, 3));
        let last = encode_frame(&synthetic(3, 2));

        // Drop a chunk of the points so the header claims the next frame.
        middle.drain(60..80);

        let mut capture = first.clone();
        capture.extend(&middle);
        capture.extend(&last);

        let mut frames = Vec::new();
        let mut errors = 0;
        let mut decoder = FrameDecoder::default();
        decoder.push(&capture);
        decode_all(&mut decoder, &mut frames, &mut errors);

        assert_eq!(errors, 1);
        assert_eq!(
            frames.iter().map(|f| f.sequence_number).collect::<Vec<_>>(),
            vec![1, 3]
        );
        assert_eq!(decoder.stats().corrupt, 1);
        assert_eq!(decoder.stats().sequence_gaps, 1);
    }

    #[test]
    fn test_point_count_mismatch() {
        let mut bytes = encode_frame(&synthetic(9, 2));
        // num_detected_obj lives at offset 28
        bytes[28] = 3;

        let mut decoder = FrameDecoder::default();
        decoder.push(&bytes);
        assert_eq!(
            decoder.read(),
            Err(ProtocolError::TlvLength {
                tlv_type: 1,
                length: 32,
                expected: 48,
            })
        );
        assert_eq!(decoder.read(), Ok(None));
    }

    #[test]
    fn test_absurd_length_rejected_early() {
        let mut bytes = encode_frame(&synthetic(1, 1));
        bytes[12..16].copy_from_slice(&u32::MAX.to_le_bytes());

        let mut decoder = FrameDecoder::default();
        decoder.push(&bytes[..FrameHeader::LEN]);
        assert_eq!(
            decoder.read(),
            Err(ProtocolError::InvalidPacketLength(u32::MAX))
        );
    }

    #[test]
    fn test_earliest_magic_wins() {
        // A stray magic word followed by a truncated header, then a frame.
        let mut capture = MAGIC_WORD.to_vec();
        capture.extend_from_slice(&[0u8; 12]);
        capture.extend(encode_frame(&synthetic(11, 1)));

        let mut frames = Vec::new();
        let mut errors = 0;
        let mut decoder = FrameDecoder::default();
        decoder.push(&capture);
        decode_all(&mut decoder, &mut frames, &mut errors);

        assert_eq!(errors, 1);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].sequence_number, 11);
    }

    #[test]
    fn test_noise_only_keeps_partial_magic() {
        let mut decoder = FrameDecoder::default();
        decoder.push(&[0xFF; 100]);
        decoder.push(&MAGIC_WORD[..3]);
        assert_eq!(decoder.read(), Ok(None));
        assert_eq!(decoder.buffered(), MAGIC_WORD.len() - 1);

        decoder.push(&MAGIC_WORD[3..]);
        let bytes = encode_frame(&synthetic(4, 1));
        decoder.push(&bytes[MAGIC_WORD.len()..]);
        assert_eq!(decoder.read().unwrap().unwrap().sequence_number, 4);
        assert_eq!(decoder.stats().discarded_bytes, 100);
    }

    #[test]
    fn test_reset() {
        let bytes = encode_frame(&synthetic(1, 1));
        let mut decoder = FrameDecoder::default();
        decoder.push(&bytes[..50]);
        assert_eq!(decoder.read(), Ok(None));
        decoder.reset();
        assert_eq!(decoder.buffered(), 0);
        assert_eq!(decoder.last_sequence(), None);
    }
}
