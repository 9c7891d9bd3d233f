//! Utility functions for address generation

use bech32::Bech32m;
use uuid7::uuid7;

// construct a unique account id then encode using bech32
pub fn new_uuid_to_bech32(hrp: &str) -> anyhow::Result<String> {
    let hrp = bech32::Hrp::parse(hrp)?;
    let encode = bech32::encode::<Bech32m>(hrp, uuid7().as_bytes())?;
    Ok(encode)
}

/// Derive the address of the `index`th ledger a registry creates. Same inputs
/// always give the same address, so a retried create lands on the same key.
pub fn derive_ledger_address(registry: &str, index: u64) -> anyhow::Result<String> {
    let mut preimage = registry.as_bytes().to_vec();
    preimage.extend_from_slice(&index.to_be_bytes());

    let digest = hex::decode(sha256::digest(&preimage))?;

    let hrp = bech32::Hrp::parse("order")?;
    let encode = bech32::encode::<Bech32m>(hrp, &digest[..20])?;
    Ok(encode)
}
