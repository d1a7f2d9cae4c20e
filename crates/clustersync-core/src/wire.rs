//! Length-prefixed binary framing for the sync envelope and the membership
//! publication (spec §6). All integers are big-endian; strings are
//! length-prefixed UTF-8.

use std::net::IpAddr;

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::content::SyncContent;
use crate::dispatch::DispatchPolicy;
use crate::envelope::{MessageType, SyncEnvelope, SyncMode};
use crate::error::{Result, SyncError};
use crate::ids::IdSet;
use crate::member::SyncAddress;
use crate::publication::{MembershipCommand, MembershipPublication};

fn malformed(reason: impl Into<String>) -> SyncError {
    SyncError::Malformed {
        reason: reason.into(),
    }
}

fn require(buf: &Bytes, need: usize, what: &'static str) -> Result<()> {
    if buf.remaining() < need {
        return Err(malformed(format!(
            "truncated frame while reading {what}: need {need}, have {}",
            buf.remaining()
        )));
    }
    Ok(())
}

fn get_string(buf: &mut Bytes, len_bytes: usize, what: &'static str) -> Result<String> {
    require(buf, len_bytes, what)?;
    let len = match len_bytes {
        2 => buf.get_u16() as usize,
        4 => buf.get_u32() as usize,
        1 => buf.get_u8() as usize,
        _ => unreachable!("unsupported length prefix width"),
    };
    require(buf, len, what)?;
    let raw = buf.copy_to_bytes(len);
    String::from_utf8(raw.to_vec()).map_err(|_| malformed(format!("invalid utf8 in {what}")))
}

fn put_string(out: &mut BytesMut, s: &str, len_bytes: usize) {
    match len_bytes {
        2 => out.put_u16(s.len() as u16),
        4 => out.put_u32(s.len() as u32),
        1 => out.put_u8(s.len() as u8),
        _ => unreachable!("unsupported length prefix width"),
    }
    out.put_slice(s.as_bytes());
}

fn get_id_set(buf: &mut Bytes) -> Result<IdSet> {
    require(buf, 2, "awareIdsLen")?;
    let len = buf.get_u16() as usize;
    require(buf, len * 2, "awareIds")?;
    let mut set = IdSet::new();
    for _ in 0..len {
        set.add(buf.get_i16());
    }
    Ok(set)
}

fn put_id_set(out: &mut BytesMut, set: &IdSet) {
    out.put_u16(set.size() as u16);
    for id in set.iter() {
        out.put_i16(id);
    }
}

/// Encodes a `SyncEnvelope` per spec §6's wire format.
pub fn encode_envelope(env: &SyncEnvelope) -> Vec<u8> {
    let mut out = BytesMut::new();
    out.put_i16(env.sender_id);
    out.put_u8(env.message_type.as_u8());
    out.put_u8(env.sequence);
    out.put_u8(if env.in_startup { 1 } else { 0 });
    out.put_u8(env.sync_mode.as_u8());
    out.put_u8(env.sync_type.as_u8());

    let key_chain = env.key_chain.as_deref().unwrap_or(&[]);
    out.put_u8(key_chain.len() as u8);
    for k in key_chain {
        put_string(&mut out, k, 2);
    }

    match &env.expected_ids {
        Some(ids) => {
            out.put_u16(ids.size() as u16);
            for id in ids.iter() {
                out.put_u16(id as u16);
            }
        }
        None => out.put_u16(0),
    }

    out.put_u32(env.contents.len() as u32);
    for c in &env.contents {
        let payload = c.payload.as_deref().unwrap_or(&[]);
        out.put_u32(payload.len() as u32);
        out.put_slice(payload);
        out.put_i64(c.version);
        put_string(&mut out, &c.key, 2);
        put_id_set(&mut out, &c.aware_ids);
    }

    out.to_vec()
}

/// Decodes a `SyncEnvelope` previously produced by [`encode_envelope`].
pub fn decode_envelope(bytes: &[u8]) -> Result<SyncEnvelope> {
    let mut buf = Bytes::copy_from_slice(bytes);

    require(&buf, 2, "senderId")?;
    let sender_id = buf.get_i16();

    require(&buf, 1, "messageType")?;
    let message_type = MessageType::from_u8(buf.get_u8())
        .ok_or_else(|| malformed("unknown messageType byte"))?;

    require(&buf, 1, "sequence")?;
    let sequence = buf.get_u8();

    require(&buf, 1, "inStartup")?;
    let in_startup = buf.get_u8() != 0;

    require(&buf, 1, "syncMode")?;
    let sync_mode =
        SyncMode::from_u8(buf.get_u8()).ok_or_else(|| malformed("unknown syncMode byte"))?;

    require(&buf, 1, "syncType")?;
    let sync_type = DispatchPolicy::from_u8(buf.get_u8())
        .ok_or_else(|| malformed("unknown syncType byte"))?;

    require(&buf, 1, "keyChainLen")?;
    let key_chain_len = buf.get_u8() as usize;
    let mut key_chain = Vec::with_capacity(key_chain_len);
    for _ in 0..key_chain_len {
        key_chain.push(get_string(&mut buf, 2, "keyChain entry")?);
    }

    require(&buf, 2, "expectedIdsLen")?;
    let expected_len = buf.get_u16() as usize;
    let expected_ids = if expected_len == 0 {
        None
    } else {
        require(&buf, expected_len * 2, "expectedIds")?;
        let mut set = IdSet::new();
        for _ in 0..expected_len {
            set.add(buf.get_u16() as i16);
        }
        Some(set)
    };

    require(&buf, 4, "contentsLen")?;
    let contents_len = buf.get_u32() as usize;
    let mut contents = Vec::with_capacity(contents_len);
    for _ in 0..contents_len {
        require(&buf, 4, "payloadLen")?;
        let payload_len = buf.get_u32() as usize;
        require(&buf, payload_len, "payload")?;
        let payload_bytes = buf.copy_to_bytes(payload_len).to_vec();
        let payload = if payload_bytes.is_empty() {
            None
        } else {
            Some(payload_bytes)
        };

        require(&buf, 8, "version")?;
        let version = buf.get_i64();

        let key = get_string(&mut buf, 2, "content key")?;
        let aware_ids = get_id_set(&mut buf)?;

        contents.push(SyncContent {
            key,
            version,
            aware_ids,
            payload,
        });
    }

    Ok(SyncEnvelope {
        sender_id,
        message_type,
        sequence,
        in_startup,
        sync_mode,
        sync_type,
        key_chain: if key_chain.is_empty() {
            None
        } else {
            Some(key_chain)
        },
        expected_ids,
        contents,
    })
}

/// Encodes a `MembershipPublication` (the payload carried inside a
/// `SyncContent` when `syncMode == SYNC_CLUSTER`).
pub fn encode_membership_publication(m: &MembershipPublication) -> Vec<u8> {
    let mut out = BytesMut::new();
    out.put_i16(m.id);
    out.put_u8(if m.auth_by_key { 1 } else { 0 });
    put_string(&mut out, &m.key, 4);
    out.put_i64(m.version);
    out.put_u8(m.command.as_u8());
    out.put_u8(m.sync_addresses.len() as u8);
    for addr in &m.sync_addresses {
        match addr.ip {
            IpAddr::V4(v4) => {
                let octets = v4.octets();
                out.put_u8(octets.len() as u8);
                out.put_slice(&octets);
            }
            IpAddr::V6(v6) => {
                let octets = v6.octets();
                out.put_u8(octets.len() as u8);
                out.put_slice(&octets);
            }
        }
        out.put_u32(addr.port as u32);
    }
    out.to_vec()
}

pub fn decode_membership_publication(bytes: &[u8]) -> Result<MembershipPublication> {
    let mut buf = Bytes::copy_from_slice(bytes);

    require(&buf, 2, "member id")?;
    let id = buf.get_i16();

    require(&buf, 1, "authByKey")?;
    let auth_by_key = buf.get_u8() != 0;

    let key = get_string(&mut buf, 4, "member key")?;

    require(&buf, 8, "member version")?;
    let version = buf.get_i64();

    require(&buf, 1, "command")?;
    let command = MembershipCommand::from_u8(buf.get_u8())?;

    require(&buf, 1, "syncAddressesLen")?;
    let addr_len = buf.get_u8() as usize;
    let mut sync_addresses = Vec::with_capacity(addr_len);
    for _ in 0..addr_len {
        require(&buf, 1, "ipLen")?;
        let ip_len = buf.get_u8() as usize;
        require(&buf, ip_len, "ip")?;
        let ip_bytes = buf.copy_to_bytes(ip_len);
        let ip = match ip_len {
            4 => IpAddr::from([ip_bytes[0], ip_bytes[1], ip_bytes[2], ip_bytes[3]]),
            16 => {
                let mut octets = [0u8; 16];
                octets.copy_from_slice(&ip_bytes);
                IpAddr::from(octets)
            }
            other => return Err(malformed(format!("unsupported ip length {other}"))),
        };
        require(&buf, 4, "port")?;
        let port = buf.get_u32() as u16;
        sync_addresses.push(SyncAddress { ip, port });
    }

    Ok(MembershipPublication::new(
        id,
        auth_by_key,
        key,
        version,
        sync_addresses,
        command,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::publication::Publication;

    #[test]
    fn envelope_roundtrip_structural_equality() {
        let mut contents = vec![SyncContent::new(
            "k1",
            7,
            IdSet::from_iter([1, 2, 3]),
            Some(b"hello".to_vec()),
        )];
        contents.push(SyncContent::ack("k2", 3, IdSet::from_iter([4])));

        let env = SyncEnvelope::new(
            1,
            MessageType::Check,
            SyncMode::Message,
            DispatchPolicy::UnicastQuorum,
        )
        .with_sequence(2)
        .with_in_startup(true)
        .with_key_chain(vec!["k1".into(), "k2".into()])
        .with_expected_ids(IdSet::from_iter([9, 10]))
        .with_contents(contents);

        let bytes = encode_envelope(&env);
        let decoded = decode_envelope(&bytes).unwrap();

        assert_eq!(decoded.sender_id, env.sender_id);
        assert_eq!(decoded.sequence, env.sequence);
        assert_eq!(decoded.in_startup, env.in_startup);
        assert_eq!(decoded.sync_mode.as_u8(), env.sync_mode.as_u8());
        assert_eq!(decoded.sync_type.as_u8(), env.sync_type.as_u8());
        assert_eq!(decoded.key_chain, env.key_chain);
        assert_eq!(decoded.expected_ids, env.expected_ids);
        assert_eq!(decoded.contents.len(), env.contents.len());
        for (a, b) in decoded.contents.iter().zip(env.contents.iter()) {
            assert_eq!(a, b);
            assert_eq!(a.aware_ids, b.aware_ids);
            assert_eq!(a.payload, b.payload);
        }
    }

    #[test]
    fn membership_publication_roundtrip() {
        let m = MembershipPublication::new(
            42,
            true,
            "secret",
            99,
            vec![SyncAddress {
                ip: "10.0.0.1".parse().unwrap(),
                port: 4000,
            }],
            MembershipCommand::TakeThis,
        );
        let bytes = m.serialize();
        let decoded = MembershipPublication::deserialize(&bytes).unwrap();
        assert_eq!(decoded.id, m.id);
        assert_eq!(decoded.key, m.key);
        assert_eq!(decoded.version, m.version);
        assert_eq!(decoded.command, m.command);
        assert_eq!(decoded.sync_addresses.len(), 1);
        assert_eq!(decoded.sync_addresses[0].port, 4000);
    }

    #[test]
    fn truncated_frame_is_malformed_not_panic() {
        let bytes = [0u8; 3];
        assert!(decode_envelope(&bytes).is_err());
    }
}
