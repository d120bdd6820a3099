use crate::constants::{MAX_FRAME_LEN, READ_CHUNK};
use crate::error::WireError;
use ledger_core::{Block, Transaction};
use serde::{de::IgnoredAny, Deserialize, Serialize};
use serde_json::Value;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// How one message is delimited on a connection. Either way there is
/// exactly one request (and at most one reply) per connection.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Framing {
    /// A bare JSON document. The reader stops at the end of the first
    /// complete document or at EOF, whichever comes first.
    #[default]
    Raw,
    /// A 4-byte big-endian length followed by that many bytes of JSON.
    LengthPrefixed,
}

/// A peer message: `{"type": ..., "data": ...}`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum Message {
    GetChain,
    Chain(Vec<Block>),
    Block(Block),
    Tx(Transaction),
}

const KNOWN_TYPES: [&str; 4] = ["get_chain", "chain", "block", "tx"];

impl Message {
    pub fn kind(&self) -> &'static str {
        match self {
            Message::GetChain => "get_chain",
            Message::Chain(_) => "chain",
            Message::Block(_) => "block",
            Message::Tx(_) => "tx",
        }
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, WireError> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Decodes one message. Invalid JSON, or a known type with a bad
    /// payload, is an error. Valid JSON without a known `type` is `None`.
    pub fn parse(bytes: &[u8]) -> Result<Option<Message>, WireError> {
        let value: Value = serde_json::from_slice(bytes)?;
        let kind = value.get("type").and_then(Value::as_str);
        match kind {
            // any payload sent along with get_chain is ignored
            Some("get_chain") => Ok(Some(Message::GetChain)),
            Some(k) if KNOWN_TYPES.contains(&k) => Ok(Some(serde_json::from_value(value)?)),
            _ => Ok(None),
        }
    }
}

pub async fn write_message<W>(w: &mut W, message: &Message, framing: Framing) -> Result<(), WireError>
where
    W: AsyncWrite + Unpin,
{
    write_frame(w, &message.to_bytes()?, framing).await
}

pub async fn write_frame<W>(w: &mut W, payload: &[u8], framing: Framing) -> Result<(), WireError>
where
    W: AsyncWrite + Unpin,
{
    if payload.len() > MAX_FRAME_LEN {
        return Err(WireError::FrameTooLarge(payload.len()));
    }
    if framing == Framing::LengthPrefixed {
        w.write_u32(payload.len() as u32).await?;
    }
    w.write_all(payload).await?;
    w.flush().await?;
    Ok(())
}

/// Reads one message's bytes.
pub async fn read_frame<R>(r: &mut R, framing: Framing) -> Result<Vec<u8>, WireError>
where
    R: AsyncRead + Unpin,
{
    match framing {
        Framing::LengthPrefixed => {
            let len = match r.read_u32().await {
                Ok(len) => len as usize,
                Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                    return Err(WireError::Closed)
                }
                Err(e) => return Err(e.into()),
            };
            if len > MAX_FRAME_LEN {
                return Err(WireError::FrameTooLarge(len));
            }
            let mut buf = vec![0u8; len];
            r.read_exact(&mut buf).await?;
            Ok(buf)
        }
        Framing::Raw => read_raw(r).await,
    }
}

async fn read_raw<R>(r: &mut R) -> Result<Vec<u8>, WireError>
where
    R: AsyncRead + Unpin,
{
    let mut buf = Vec::with_capacity(READ_CHUNK);
    let mut chunk = vec![0u8; READ_CHUNK];
    loop {
        let n = r.read(&mut chunk).await?;
        if n == 0 {
            if buf.is_empty() {
                return Err(WireError::Closed);
            }
            return Ok(buf);
        }
        buf.extend_from_slice(&chunk[..n]);
        if buf.len() > MAX_FRAME_LEN {
            return Err(WireError::FrameTooLarge(buf.len()));
        }
        match serde_json::from_slice::<IgnoredAny>(&buf) {
            Err(e) if e.is_eof() => continue,
            // complete, or broken in a way more bytes cannot fix
            _ => return Ok(buf),
        }
    }
}
