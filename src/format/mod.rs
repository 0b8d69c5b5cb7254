//! macaroon wire serialization
//!
//! Macaroons travel in the v1 binary format: a sequence of packets,
//! each `hex4(length) key SP data LF` where the length covers the whole
//! packet. The fields appear in order: `location`, `identifier`, then
//! per caveat `cid` (plus `vid` and `cl` for third-party caveats), and
//! finally the 32-byte `signature`.
//!
//! A serialized macaroon has a base64 text form (URL-safe alphabet, no
//! padding), and macaroon slices are transmitted as a JSON array of
//! those text forms.

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::Error;
use crate::macaroon::{Caveat, Macaroon, SIGNATURE_LEN};

const FIELD_LOCATION: &[u8] = b"location";
const FIELD_IDENTIFIER: &[u8] = b"identifier";
const FIELD_CAVEAT_ID: &[u8] = b"cid";
const FIELD_VERIFICATION_ID: &[u8] = b"vid";
const FIELD_CAVEAT_LOCATION: &[u8] = b"cl";
const FIELD_SIGNATURE: &[u8] = b"signature";

/// 4 hex digits of length, key, space, data, newline
const PACKET_PREFIX_LEN: usize = 4;
const MAX_PACKET_LEN: usize = 0xffff;

impl Macaroon {
    /// Serializes to the v1 binary format.
    pub fn to_bytes(&self) -> Result<Vec<u8>, Error> {
        let mut buf = Vec::new();
        append_packet(&mut buf, FIELD_LOCATION, self.location.as_bytes())?;
        append_packet(&mut buf, FIELD_IDENTIFIER, &self.id)?;
        for caveat in &self.caveats {
            append_packet(&mut buf, FIELD_CAVEAT_ID, &caveat.id)?;
            if caveat.is_third_party() {
                append_packet(&mut buf, FIELD_VERIFICATION_ID, &caveat.verification_id)?;
                append_packet(&mut buf, FIELD_CAVEAT_LOCATION, caveat.location.as_bytes())?;
            }
        }
        append_packet(&mut buf, FIELD_SIGNATURE, &self.signature)?;
        Ok(buf)
    }

    /// Deserializes from the v1 binary format.
    pub fn from_bytes(data: &[u8]) -> Result<Macaroon, Error> {
        let (macaroon, rest) = read_macaroon(data)?;
        if !rest.is_empty() {
            return Err(Error::Format("trailing data after signature".to_owned()));
        }
        Ok(macaroon)
    }

    /// Serializes to base64 text (URL-safe alphabet, no padding).
    pub fn to_base64(&self) -> Result<String, Error> {
        Ok(base64::encode_config(self.to_bytes()?, base64::URL_SAFE_NO_PAD))
    }

    /// Deserializes from base64 text as produced by
    /// [`Macaroon::to_base64`].
    pub fn from_base64(text: &str) -> Result<Macaroon, Error> {
        let data = base64::decode_config(text, base64::URL_SAFE_NO_PAD)
            .map_err(|e| Error::Format(e.to_string()))?;
        Macaroon::from_bytes(&data)
    }
}

impl Serialize for Macaroon {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let text = self
            .to_base64()
            .map_err(|e| serde::ser::Error::custom(e.to_string()))?;
        serializer.serialize_str(&text)
    }
}

impl<'de> Deserialize<'de> for Macaroon {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        Macaroon::from_base64(&text).map_err(|e| D::Error::custom(e.to_string()))
    }
}

/// Serializes a macaroon slice (`[primary, discharges...]`) as a JSON
/// array of base64 macaroons.
pub fn slice_to_json(ms: &[Macaroon]) -> Result<String, Error> {
    serde_json::to_string(ms).map_err(|e| Error::Format(e.to_string()))
}

/// Deserializes a macaroon slice from the JSON array form.
pub fn slice_from_json(data: &str) -> Result<Vec<Macaroon>, Error> {
    serde_json::from_str(data).map_err(|e| Error::Format(e.to_string()))
}

fn append_packet(buf: &mut Vec<u8>, key: &[u8], data: &[u8]) -> Result<(), Error> {
    let len = PACKET_PREFIX_LEN + key.len() + 1 + data.len() + 1;
    if len > MAX_PACKET_LEN {
        return Err(Error::Format(format!(
            "field {} too long to encode",
            String::from_utf8_lossy(key)
        )));
    }
    buf.extend_from_slice(format!("{:04x}", len).as_bytes());
    buf.extend_from_slice(key);
    buf.push(b' ');
    buf.extend_from_slice(data);
    buf.push(b'\n');
    Ok(())
}

struct Packet<'a> {
    key: &'a [u8],
    data: &'a [u8],
}

fn read_packet(data: &[u8]) -> Result<(Packet<'_>, &[u8]), Error> {
    if data.len() < PACKET_PREFIX_LEN {
        return Err(Error::Format("packet length prefix truncated".to_owned()));
    }
    let prefix = std::str::from_utf8(&data[..PACKET_PREFIX_LEN])
        .map_err(|_| Error::Format("invalid packet length prefix".to_owned()))?;
    let len = usize::from_str_radix(prefix, 16)
        .map_err(|_| Error::Format("invalid packet length prefix".to_owned()))?;
    if len < PACKET_PREFIX_LEN + 2 || len > data.len() {
        return Err(Error::Format("invalid packet length".to_owned()));
    }
    let (packet, rest) = data.split_at(len);
    let packet = &packet[PACKET_PREFIX_LEN..];
    if packet.last() != Some(&b'\n') {
        return Err(Error::Format("packet is not newline-terminated".to_owned()));
    }
    let packet = &packet[..packet.len() - 1];
    let space = packet
        .iter()
        .position(|&b| b == b' ')
        .ok_or_else(|| Error::Format("packet has no field key".to_owned()))?;
    Ok((
        Packet {
            key: &packet[..space],
            data: &packet[space + 1..],
        },
        rest,
    ))
}

fn read_macaroon(data: &[u8]) -> Result<(Macaroon, &[u8]), Error> {
    let (packet, mut data) = read_packet(data)?;
    if packet.key != FIELD_LOCATION {
        return Err(Error::Format("macaroon must start with a location".to_owned()));
    }
    let location = utf8_field(packet.data, "location")?;

    let (packet, rest) = read_packet(data)?;
    data = rest;
    if packet.key != FIELD_IDENTIFIER {
        return Err(Error::Format("expected identifier".to_owned()));
    }
    let id = packet.data.to_vec();

    let mut caveats: Vec<Caveat> = Vec::new();
    let signature = loop {
        let (packet, rest) = read_packet(data)?;
        data = rest;
        match packet.key {
            FIELD_CAVEAT_ID => caveats.push(Caveat {
                id: packet.data.to_vec(),
                verification_id: Vec::new(),
                location: String::new(),
            }),
            FIELD_VERIFICATION_ID => {
                let caveat = caveats
                    .last_mut()
                    .filter(|c| c.verification_id.is_empty())
                    .ok_or_else(|| Error::Format("vid without preceding cid".to_owned()))?;
                caveat.verification_id = packet.data.to_vec();
            }
            FIELD_CAVEAT_LOCATION => {
                let caveat = caveats
                    .last_mut()
                    .filter(|c| c.location.is_empty())
                    .ok_or_else(|| Error::Format("cl without preceding cid".to_owned()))?;
                caveat.location = utf8_field(packet.data, "cl")?;
            }
            FIELD_SIGNATURE => {
                let signature: [u8; SIGNATURE_LEN] = packet.data.try_into().map_err(|_| {
                    Error::Format(format!("signature has wrong length {}", packet.data.len()))
                })?;
                break signature;
            }
            key => {
                return Err(Error::Format(format!(
                    "unexpected field {:?}",
                    String::from_utf8_lossy(key)
                )))
            }
        }
    };

    Ok((
        Macaroon {
            location,
            id,
            caveats,
            signature,
        },
        data,
    ))
}

fn utf8_field(data: &[u8], field: &str) -> Result<String, Error> {
    std::str::from_utf8(data)
        .map(str::to_owned)
        .map_err(|_| Error::Format(format!("field {field} is not utf-8")))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Macaroon {
        let mut m = Macaroon::new(b"root key", b"id-1".to_vec(), "https://example.com");
        m.add_first_party_caveat("account = 42");
        m.add_third_party_caveat(b"other key", b"cav-1".to_vec(), "https://auth")
            .unwrap();
        m
    }

    #[test]
    fn binary_round_trip() {
        let m = sample();
        let data = m.to_bytes().unwrap();
        let decoded = Macaroon::from_bytes(&data).unwrap();
        assert_eq!(decoded, m);
    }

    #[test]
    fn base64_round_trip() {
        let m = sample();
        let decoded = Macaroon::from_base64(&m.to_base64().unwrap()).unwrap();
        assert_eq!(decoded, m);
    }

    #[test]
    fn packet_layout() {
        let m = Macaroon::new(b"root key", b"id".to_vec(), "loc");
        let data = m.to_bytes().unwrap();
        // 4-digit hex length covers the whole packet
        assert!(data.starts_with(b"0011location loc\n"));
        assert!(data[17..].starts_with(b"0012identifier id\n"));
    }

    #[test]
    fn truncated_input_is_rejected() {
        let data = sample().to_bytes().unwrap();
        for cut in [1, 5, data.len() - 1] {
            assert!(matches!(
                Macaroon::from_bytes(&data[..cut]),
                Err(Error::Format(_))
            ));
        }
    }

    #[test]
    fn trailing_data_is_rejected() {
        let mut data = sample().to_bytes().unwrap();
        data.extend_from_slice(b"0006xx y\n");
        assert!(matches!(Macaroon::from_bytes(&data), Err(Error::Format(_))));
    }

    #[test]
    fn bad_signature_length_is_rejected() {
        let m = sample();
        let mut buf = Vec::new();
        append_packet(&mut buf, FIELD_LOCATION, b"loc").unwrap();
        append_packet(&mut buf, FIELD_IDENTIFIER, b"id").unwrap();
        append_packet(&mut buf, FIELD_SIGNATURE, &m.signature()[..16]).unwrap();
        assert!(matches!(Macaroon::from_bytes(&buf), Err(Error::Format(_))));
    }

    #[test]
    fn oversized_field_is_rejected() {
        let mut m = Macaroon::new(b"root key", b"id".to_vec(), "loc");
        m.add_first_party_caveat("x".repeat(MAX_PACKET_LEN));
        assert!(matches!(m.to_bytes(), Err(Error::Format(_))));
    }

    #[test]
    fn json_slice_round_trip() {
        let m = sample();
        let d = Macaroon::new(b"other key", b"cav-1".to_vec(), "");
        let json = slice_to_json(&[m.clone(), d.clone()]).unwrap();
        let decoded = slice_from_json(&json).unwrap();
        assert_eq!(decoded, vec![m, d]);
    }
}
