//! Length-prefixed stream framing around `clustersync_core::wire`'s
//! envelope codec. The envelope codec produces a self-describing but
//! unframed byte string; TCP is a byte stream, so we add a 4-byte
//! big-endian length prefix around each envelope for delimiting (spec §6:
//! "length-prefixed" is the on-wire contract for stream transports).

use clustersync_core::{wire, SyncEnvelope, SyncError};
use tokio::io::{AsyncReadExt, AsyncWriteExt};

/// Frames above this are rejected outright rather than allocated for, as a
/// guard against a peer sending a bogus length prefix.
pub const MAX_FRAME_LEN: u32 = 16 * 1024 * 1024;

pub async fn write_envelope<W: AsyncWriteExt + Unpin>(
    w: &mut W,
    env: &SyncEnvelope,
) -> std::io::Result<()> {
    let body = wire::encode_envelope(env);
    w.write_u32(body.len() as u32).await?;
    w.write_all(&body).await?;
    w.flush().await
}

pub async fn read_envelope<R: AsyncReadExt + Unpin>(r: &mut R) -> std::io::Result<SyncEnvelope> {
    let len = r.read_u32().await?;
    if len > MAX_FRAME_LEN {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("frame length {len} exceeds maximum {MAX_FRAME_LEN}"),
        ));
    }
    let mut body = vec![0u8; len as usize];
    r.read_exact(&mut body).await?;
    wire::decode_envelope(&body).map_err(to_io_error)
}

fn to_io_error(e: SyncError) -> std::io::Error {
    std::io::Error::new(std::io::ErrorKind::InvalidData, e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clustersync_core::{DispatchPolicy, MessageType, SyncMode};

    #[tokio::test]
    async fn roundtrip_over_duplex_stream() {
        let (mut a, mut b) = tokio::io::duplex(4096);
        let env = SyncEnvelope::new(1, MessageType::Ok, SyncMode::Cluster, DispatchPolicy::UnicastPlain)
            .with_sequence(0);
        write_envelope(&mut a, &env).await.unwrap();
        let decoded = read_envelope(&mut b).await.unwrap();
        assert_eq!(decoded.sender_id, 1);
        assert_eq!(decoded.message_type.as_u8(), MessageType::Ok.as_u8());
    }

    #[tokio::test]
    async fn oversized_length_prefix_is_rejected() {
        let (mut a, mut b) = tokio::io::duplex(4096);
        a.write_u32(MAX_FRAME_LEN + 1).await.unwrap();
        let result = read_envelope(&mut b).await;
        assert!(result.is_err());
    }
}
