use serde::Serialize;
use solana_sdk::pubkey::Pubkey;

use crate::recipients::Recipient;

/// A recipient that failed validation, with its 1-based row in the source file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InvalidAddress {
    pub row: usize,
    pub address: String,
}

/// True iff `address` is base58 that decodes to exactly one public key.
pub fn is_valid(address: &str) -> bool {
    parse(address).is_some()
}

fn parse(address: &str) -> Option<Pubkey> {
    let bytes = bs58::decode(address).into_vec().ok()?;
    let array: [u8; 32] = bytes.try_into().ok()?;
    Some(Pubkey::new_from_array(array))
}

/// Validate every recipient before anything is sent.
///
/// Collects every invalid address instead of stopping at the first one.
pub fn validate_all(recipients: &[Recipient]) -> Result<Vec<Pubkey>, Vec<InvalidAddress>> {
    let mut valid = Vec::with_capacity(recipients.len());
    let mut invalid = Vec::new();

    for recipient in recipients {
        match parse(&recipient.address) {
            Some(pubkey) => valid.push(pubkey),
            None => invalid.push(InvalidAddress {
                row: recipient.row,
                address: recipient.address.clone(),
            }),
        }
    }

    if invalid.is_empty() {
        Ok(valid)
    } else {
        Err(invalid)
    }
}
