use bech32::{FromBase32, ToBase32, Variant};

use crate::error::{Result, WalletError};

/// Human readable part used by the sandbox network.
pub const DEFAULT_HRP: &str = "tmw";

const IDENTIFIER_VERSION: u8 = 1;
const ADDRESS_LEN: usize = 16;
const SUBADDRESS_LEN: usize = 8;
const PAYLOAD_LEN: usize = 1 + ADDRESS_LEN + SUBADDRESS_LEN;

/// On-chain address of a wallet.
///
/// All user accounts of one wallet share this address; individual accounts are
/// told apart by the sub-address carried in the account identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AccountAddress([u8; ADDRESS_LEN]);

impl AccountAddress {
    pub fn new(bytes: [u8; ADDRESS_LEN]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; ADDRESS_LEN] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn from_hex(raw: &str) -> Result<Self> {
        let bytes = hex::decode(raw)
            .map_err(|_| WalletError::validation(format!("'{raw}' is not a valid hex address")))?;
        let bytes: [u8; ADDRESS_LEN] = bytes.try_into().map_err(|_| {
            WalletError::validation(format!("address must be {ADDRESS_LEN} bytes: {raw}"))
        })?;
        Ok(Self(bytes))
    }
}

impl std::fmt::Display for AccountAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

/// Sub-address routing an incoming payment to one account of a wallet.
///
/// Derived from a monotonic per-wallet counter and never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubAddress([u8; SUBADDRESS_LEN]);

impl SubAddress {
    /// Encodes a counter value as a big-endian sub-address.
    pub fn from_index(index: u64) -> Self {
        Self(index.to_be_bytes())
    }

    pub fn from_hex(raw: &str) -> Result<Self> {
        let bytes = hex::decode(raw)
            .map_err(|_| WalletError::validation(format!("'{raw}' is not a valid sub-address")))?;
        let bytes: [u8; SUBADDRESS_LEN] = bytes.try_into().map_err(|_| {
            WalletError::validation(format!("sub-address must be {SUBADDRESS_LEN} bytes: {raw}"))
        })?;
        Ok(Self(bytes))
    }

    pub fn as_bytes(&self) -> &[u8; SUBADDRESS_LEN] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn is_empty(&self) -> bool {
        self.0 == [0u8; SUBADDRESS_LEN]
    }
}

/// Encodes an address plus optional sub-address as a bech32 account identifier.
pub fn encode_account(
    hrp: &str,
    address: &AccountAddress,
    subaddress: Option<&SubAddress>,
) -> Result<String> {
    let mut payload = Vec::with_capacity(PAYLOAD_LEN);
    payload.push(IDENTIFIER_VERSION);
    payload.extend_from_slice(address.as_bytes());
    match subaddress {
        Some(sub) => payload.extend_from_slice(sub.as_bytes()),
        None => payload.extend_from_slice(&[0u8; SUBADDRESS_LEN]),
    }
    bech32::encode(hrp, payload.to_base32(), Variant::Bech32)
        .map_err(|err| WalletError::Internal(format!("bech32 encoding failed: {err}")))
}

/// Decodes a bech32 account identifier into its address and sub-address.
///
/// An all-zero sub-address means "none". Identifiers from other networks are
/// rejected by the human readable part check.
pub fn decode_account(hrp: &str, identifier: &str) -> Result<(AccountAddress, Option<SubAddress>)> {
    let (found_hrp, data, variant) = bech32::decode(identifier).map_err(|err| {
        WalletError::validation(format!(
            "'{identifier}' is not a valid account identifier: {err}"
        ))
    })?;
    if found_hrp != hrp {
        return Err(WalletError::validation(format!(
            "'{identifier}' is not a valid account identifier: network prefix is '{found_hrp}', expected '{hrp}'"
        )));
    }
    if variant != Variant::Bech32 {
        return Err(WalletError::validation(format!(
            "'{identifier}' is not a valid account identifier: unexpected bech32 variant"
        )));
    }
    let payload = Vec::<u8>::from_base32(&data).map_err(|err| {
        WalletError::validation(format!(
            "'{identifier}' is not a valid account identifier: {err}"
        ))
    })?;
    if payload.len() != PAYLOAD_LEN {
        return Err(WalletError::validation(format!(
            "'{identifier}' is not a valid account identifier: payload is {} bytes, expected {PAYLOAD_LEN}",
            payload.len()
        )));
    }
    if payload[0] != IDENTIFIER_VERSION {
        return Err(WalletError::validation(format!(
            "'{identifier}' is not a valid account identifier: unsupported version {}",
            payload[0]
        )));
    }

    let mut address = [0u8; ADDRESS_LEN];
    address.copy_from_slice(&payload[1..1 + ADDRESS_LEN]);
    let mut sub = [0u8; SUBADDRESS_LEN];
    sub.copy_from_slice(&payload[1 + ADDRESS_LEN..]);
    let subaddress = SubAddress(sub);

    Ok((
        AccountAddress(address),
        (!subaddress.is_empty()).then_some(subaddress),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn address() -> AccountAddress {
        AccountAddress::new([7u8; 16])
    }

    #[test]
    fn test_roundtrip_with_subaddress() {
        let sub = SubAddress::from_index(42);
        let encoded = encode_account(DEFAULT_HRP, &address(), Some(&sub)).unwrap();
        assert!(encoded.starts_with(DEFAULT_HRP));

        let (decoded_address, decoded_sub) = decode_account(DEFAULT_HRP, &encoded).unwrap();
        assert_eq!(decoded_address, address());
        assert_eq!(decoded_sub, Some(sub));
    }

    #[test]
    fn test_roundtrip_without_subaddress() {
        let encoded = encode_account(DEFAULT_HRP, &address(), None).unwrap();
        let (decoded_address, decoded_sub) = decode_account(DEFAULT_HRP, &encoded).unwrap();
        assert_eq!(decoded_address, address());
        assert_eq!(decoded_sub, None);
    }

    #[test]
    fn test_subaddress_is_big_endian() {
        let sub = SubAddress::from_index(1);
        assert_eq!(sub.to_hex(), "0000000000000001");
        assert_eq!(SubAddress::from_hex("0000000000000001").unwrap(), sub);
    }

    #[test]
    fn test_wrong_network_prefix_rejected() {
        let encoded = encode_account("other", &address(), None).unwrap();
        let err = decode_account(DEFAULT_HRP, &encoded).unwrap_err();
        assert!(err.to_string().contains("network prefix"));
    }

    #[test]
    fn test_garbage_identifier_rejected() {
        assert!(decode_account(DEFAULT_HRP, "not-bech32").is_err());
        assert!(decode_account(DEFAULT_HRP, "").is_err());
    }

    #[test]
    fn test_truncated_payload_rejected() {
        let short = bech32::encode(DEFAULT_HRP, [1u8, 2, 3].to_base32(), Variant::Bech32).unwrap();
        let err = decode_account(DEFAULT_HRP, &short).unwrap_err();
        assert!(err.to_string().contains("payload"));
    }

    #[test]
    fn test_address_hex_roundtrip() {
        let parsed = AccountAddress::from_hex(&address().to_hex()).unwrap();
        assert_eq!(parsed, address());
        assert!(AccountAddress::from_hex("zz").is_err());
        assert!(AccountAddress::from_hex("aabb").is_err());
    }
}
