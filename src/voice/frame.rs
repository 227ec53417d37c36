//! # Frame Codec
//!
//! Binary encoding of voice frames using the protobuf wire format, with field
//! numbers taken from the loaded [`Schema`] rather than generated code.
//!
//! ## Frame shape:
//! ```text
//! Frame { oneof { text: TextFrame, audio: AudioRawFrame, transcription: TranscriptionFrame } }
//! AudioRawFrame { audio: bytes, sample_rate: uint32, num_channels: uint32 }
//! ```
//! Only `audio` is required; `text` and `transcription` are used when the
//! schema defines them. Unknown fields are skipped on decode, and proto3
//! default values are omitted on encode.

use crate::error::{ProtocolDecodeError, SchemaError};
use crate::voice::schema::{FieldDef, FieldType, MessageType, ScalarType, Schema};
use prost::bytes::{Buf, BufMut};
use prost::encoding::{decode_key, decode_varint, encode_key, encode_varint, encoded_len_varint, WireType};

/// Raw PCM or container audio plus its declared format.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioFrame {
    pub audio: Vec<u8>,
    pub sample_rate: u32,
    pub num_channels: u32,
}

/// A decoded voice frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Audio(AudioFrame),
    Text(String),
    Transcription { text: String, user_id: String, timestamp: String },
    /// No payload this client understands.
    Empty,
}

#[derive(Debug, Clone)]
struct AudioLayout {
    frame_field: u32,
    audio: u32,
    sample_rate: u32,
    num_channels: u32,
}

#[derive(Debug, Clone)]
struct TextLayout {
    frame_field: u32,
    text: u32,
}

#[derive(Debug, Clone)]
struct TranscriptionLayout {
    frame_field: u32,
    text: u32,
    user_id: Option<u32>,
    timestamp: Option<u32>,
}

/// Field numbers resolved from the schema, ready for encode and decode.
#[derive(Debug, Clone)]
pub struct FrameCodec {
    audio: AudioLayout,
    text: Option<TextLayout>,
    transcription: Option<TranscriptionLayout>,
}

fn expect_type(message: &MessageType, field: &FieldDef, expected: &[ScalarType], label: &str) -> Result<(), SchemaError> {
    match field.ty {
        FieldType::Scalar(scalar) if expected.contains(&scalar) => Ok(()),
        _ => Err(SchemaError::FieldType {
            message: message.name.clone(),
            field: field.name.clone(),
            found: field.ty.describe(),
            expected: label.to_string(),
        }),
    }
}

fn sub_message<'a>(schema: &'a Schema, frame: &MessageType, field: &FieldDef) -> Result<&'a MessageType, SchemaError> {
    match &field.ty {
        FieldType::Message(name) => schema.message(name),
        other => Err(SchemaError::FieldType {
            message: frame.name.clone(),
            field: field.name.clone(),
            found: other.describe(),
            expected: "a message".to_string(),
        }),
    }
}

const UINTS: &[ScalarType] = &[ScalarType::Uint32, ScalarType::Uint64, ScalarType::Int32, ScalarType::Int64];

impl FrameCodec {
    /// Resolve the frame layout from `frame_type` (e.g. `pipecat.Frame`).
    pub fn from_schema(schema: &Schema, frame_type: &str) -> Result<Self, SchemaError> {
        let frame = schema.message(frame_type)?;

        let audio_field = frame.field("audio")?;
        let audio_msg = sub_message(schema, frame, audio_field)?;
        let audio_bytes = audio_msg.field("audio")?;
        expect_type(audio_msg, audio_bytes, &[ScalarType::Bytes], "bytes")?;
        let sample_rate = audio_msg.field("sample_rate")?;
        expect_type(audio_msg, sample_rate, UINTS, "an unsigned integer")?;
        let num_channels = audio_msg.field("num_channels")?;
        expect_type(audio_msg, num_channels, UINTS, "an unsigned integer")?;

        let audio = AudioLayout {
            frame_field: audio_field.number,
            audio: audio_bytes.number,
            sample_rate: sample_rate.number,
            num_channels: num_channels.number,
        };

        let string_field = |message: &MessageType, name: &str| -> Option<u32> {
            message
                .field(name)
                .ok()
                .filter(|f| f.ty == FieldType::Scalar(ScalarType::String))
                .map(|f| f.number)
        };

        let text = frame.field("text").ok().and_then(|field| {
            let message = sub_message(schema, frame, field).ok()?;
            Some(TextLayout { frame_field: field.number, text: string_field(message, "text")? })
        });

        let transcription = frame.field("transcription").ok().and_then(|field| {
            let message = sub_message(schema, frame, field).ok()?;
            Some(TranscriptionLayout {
                frame_field: field.number,
                text: string_field(message, "text")?,
                user_id: string_field(message, "user_id"),
                timestamp: string_field(message, "timestamp"),
            })
        });

        Ok(Self { audio, text, transcription })
    }

    pub fn encode(&self, frame: &Frame) -> Vec<u8> {
        let mut inner = Vec::new();
        let field = match frame {
            Frame::Audio(audio) => {
                put_bytes(self.audio.audio, &audio.audio, &mut inner);
                put_varint(self.audio.sample_rate, u64::from(audio.sample_rate), &mut inner);
                put_varint(self.audio.num_channels, u64::from(audio.num_channels), &mut inner);
                Some(self.audio.frame_field)
            }
            Frame::Text(text) => self.text.as_ref().map(|layout| {
                put_bytes(layout.text, text.as_bytes(), &mut inner);
                layout.frame_field
            }),
            Frame::Transcription { text, user_id, timestamp } => self.transcription.as_ref().map(|layout| {
                put_bytes(layout.text, text.as_bytes(), &mut inner);
                if let Some(tag) = layout.user_id {
                    put_bytes(tag, user_id.as_bytes(), &mut inner);
                }
                if let Some(tag) = layout.timestamp {
                    put_bytes(tag, timestamp.as_bytes(), &mut inner);
                }
                layout.frame_field
            }),
            Frame::Empty => None,
        };

        let mut out = Vec::with_capacity(inner.len() + 8);
        if let Some(tag) = field {
            encode_key(tag, WireType::LengthDelimited, &mut out);
            encode_varint(inner.len() as u64, &mut out);
            out.put_slice(&inner);
        }
        out
    }

    /// Encode one capture block of s16le PCM.
    pub fn encode_audio(&self, pcm: Vec<u8>, sample_rate: u32, num_channels: u32) -> Vec<u8> {
        self.encode(&Frame::Audio(AudioFrame { audio: pcm, sample_rate, num_channels }))
    }

    pub fn decode(&self, bytes: &[u8]) -> Result<Frame, ProtocolDecodeError> {
        let mut buf = bytes;
        let mut frame = Frame::Empty;

        while buf.has_remaining() {
            let (tag, wire_type) = decode_key(&mut buf).map_err(frame_error)?;
            if wire_type == WireType::LengthDelimited {
                if tag == self.audio.frame_field {
                    frame = Frame::Audio(self.decode_audio(take_len_delimited(&mut buf)?)?);
                    continue;
                }
                if let Some(layout) = self.text.as_ref().filter(|l| l.frame_field == tag) {
                    let body = take_len_delimited(&mut buf)?;
                    frame = Frame::Text(decode_strings(body, &[layout.text])?.swap_remove(0));
                    continue;
                }
                if let Some(layout) = self.transcription.as_ref().filter(|l| l.frame_field == tag) {
                    let body = take_len_delimited(&mut buf)?;
                    let tags = [layout.text, layout.user_id.unwrap_or(0), layout.timestamp.unwrap_or(0)];
                    let mut values = decode_strings(body, &tags)?.into_iter();
                    frame = Frame::Transcription {
                        text: values.next().unwrap_or_default(),
                        user_id: values.next().unwrap_or_default(),
                        timestamp: values.next().unwrap_or_default(),
                    };
                    continue;
                }
            }
            skip_field(wire_type, &mut buf)?;
        }

        Ok(frame)
    }

    fn decode_audio(&self, mut buf: &[u8]) -> Result<AudioFrame, ProtocolDecodeError> {
        let mut audio = AudioFrame { audio: Vec::new(), sample_rate: 0, num_channels: 0 };
        while buf.has_remaining() {
            let (tag, wire_type) = decode_key(&mut buf).map_err(frame_error)?;
            match wire_type {
                WireType::LengthDelimited if tag == self.audio.audio => {
                    audio.audio = take_len_delimited(&mut buf)?.to_vec();
                }
                WireType::Varint if tag == self.audio.sample_rate => {
                    audio.sample_rate = varint_u32(&mut buf)?;
                }
                WireType::Varint if tag == self.audio.num_channels => {
                    audio.num_channels = varint_u32(&mut buf)?;
                }
                _ => skip_field(wire_type, &mut buf)?,
            }
        }
        Ok(audio)
    }
}

fn frame_error(err: prost::DecodeError) -> ProtocolDecodeError {
    ProtocolDecodeError::Frame(err.to_string())
}

fn put_varint(tag: u32, value: u64, out: &mut Vec<u8>) {
    if value != 0 {
        encode_key(tag, WireType::Varint, out);
        encode_varint(value, out);
    }
}

fn put_bytes(tag: u32, value: &[u8], out: &mut Vec<u8>) {
    if !value.is_empty() {
        encode_key(tag, WireType::LengthDelimited, out);
        out.reserve(encoded_len_varint(value.len() as u64) + value.len());
        encode_varint(value.len() as u64, out);
        out.put_slice(value);
    }
}

fn varint_u32(buf: &mut &[u8]) -> Result<u32, ProtocolDecodeError> {
    let value = decode_varint(buf).map_err(frame_error)?;
    u32::try_from(value).map_err(|_| ProtocolDecodeError::Frame(format!("value {value} out of range")))
}

fn take_len_delimited<'a>(buf: &mut &'a [u8]) -> Result<&'a [u8], ProtocolDecodeError> {
    let len = decode_varint(buf).map_err(frame_error)?;
    let len = usize::try_from(len).map_err(|_| ProtocolDecodeError::Frame("length overflow".into()))?;
    if len > buf.len() {
        return Err(ProtocolDecodeError::Frame(format!(
            "field length {len} exceeds remaining {} bytes",
            buf.len()
        )));
    }
    let (head, tail) = buf.split_at(len);
    *buf = tail;
    Ok(head)
}

fn skip_field(wire_type: WireType, buf: &mut &[u8]) -> Result<(), ProtocolDecodeError> {
    let skip = |buf: &mut &[u8], n: usize| {
        if buf.len() < n {
            return Err(ProtocolDecodeError::Frame("truncated fixed-width field".into()));
        }
        buf.advance(n);
        Ok(())
    };
    match wire_type {
        WireType::Varint => decode_varint(buf).map(|_| ()).map_err(frame_error),
        WireType::SixtyFourBit => skip(buf, 8),
        WireType::ThirtyTwoBit => skip(buf, 4),
        WireType::LengthDelimited => take_len_delimited(buf).map(|_| ()),
        WireType::StartGroup | WireType::EndGroup => {
            Err(ProtocolDecodeError::Frame("groups are not supported".into()))
        }
    }
}

/// Read the string fields at `tags` from a sub-message, in `tags` order.
fn decode_strings(mut buf: &[u8], tags: &[u32]) -> Result<Vec<String>, ProtocolDecodeError> {
    let mut values = vec![String::new(); tags.len()];
    while buf.has_remaining() {
        let (tag, wire_type) = decode_key(&mut buf).map_err(frame_error)?;
        let slot = tags.iter().position(|&t| t != 0 && t == tag);
        match (slot, wire_type) {
            (Some(idx), WireType::LengthDelimited) => {
                let raw = take_len_delimited(&mut buf)?;
                values[idx] = String::from_utf8(raw.to_vec())
                    .map_err(|e| ProtocolDecodeError::Frame(format!("invalid utf-8: {e}")))?;
            }
            _ => skip_field(wire_type, &mut buf)?,
        }
    }
    Ok(values)
}
