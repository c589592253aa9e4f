//! Byte layouts of bridge deposit data and proposal data.
//!
//! Every length-prefixed field uses a 32-byte big-endian length word, every
//! number is a 32-byte big-endian word.

use ethers::core::types::{Bytes, U256};

use crate::types::TransferType;

const WORD: usize = 32;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("{field}: expected {expected} bytes at offset {offset}, got {available}")]
    Truncated {
        field: &'static str,
        offset: usize,
        expected: usize,
        available: usize,
    },

    #[error("{field}: {len} bytes do not fit in a 32-byte word")]
    Oversized { field: &'static str, len: usize },

    #[error("{field}: length word does not fit in memory")]
    LengthOverflow { field: &'static str },

    #[error("{transfer_type} expects {expected} payload blobs, got {actual}")]
    PayloadShape {
        transfer_type: TransferType,
        expected: usize,
        actual: usize,
    },
}

struct Reader<'a> {
    data: &'a [u8],
    offset: usize,
}

impl<'a> Reader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, offset: 0 }
    }

    fn take(&mut self, field: &'static str, len: usize) -> Result<&'a [u8], DecodeError> {
        let available = self.data.len().saturating_sub(self.offset);
        if len > available {
            return Err(DecodeError::Truncated {
                field,
                offset: self.offset,
                expected: len,
                available,
            });
        }
        let bytes = &self.data[self.offset..self.offset + len];
        self.offset += len;
        Ok(bytes)
    }

    fn word(&mut self, field: &'static str) -> Result<&'a [u8], DecodeError> {
        self.take(field, WORD)
    }

    fn length_prefixed(&mut self, field: &'static str) -> Result<&'a [u8], DecodeError> {
        let len = U256::from_big_endian(self.word(field)?);
        if len > U256::from(usize::MAX) {
            return Err(DecodeError::LengthOverflow { field });
        }
        self.take(field, len.as_usize())
    }
}

/// Splits raw deposit data into the payload blobs of `transfer_type`.
pub fn decode_deposit_data(
    transfer_type: TransferType,
    data: &[u8],
) -> Result<Vec<Bytes>, DecodeError> {
    let mut reader = Reader::new(data);
    let blobs = match transfer_type {
        TransferType::FungibleTransfer => vec![
            reader.word("amount")?,
            reader.length_prefixed("recipient")?,
        ],
        TransferType::NonFungibleTransfer => vec![
            reader.word("token_id")?,
            reader.length_prefixed("recipient")?,
            reader.length_prefixed("metadata")?,
        ],
        TransferType::GenericTransfer => vec![reader.length_prefixed("metadata")?],
    };
    Ok(blobs.into_iter().map(|b| Bytes::from(b.to_vec())).collect())
}

/// Re-assembles payload blobs into the proposal data expected by the
/// destination handler.
pub fn encode_proposal_data(
    transfer_type: TransferType,
    payload: &[Bytes],
) -> Result<Bytes, DecodeError> {
    if payload.len() != transfer_type.payload_len() {
        return Err(DecodeError::PayloadShape {
            transfer_type,
            expected: transfer_type.payload_len(),
            actual: payload.len(),
        });
    }

    let mut out = Vec::new();
    match transfer_type {
        TransferType::FungibleTransfer => {
            push_word(&mut out, "amount", &payload[0])?;
            push_length_prefixed(&mut out, &payload[1]);
        }
        TransferType::NonFungibleTransfer => {
            push_word(&mut out, "token_id", &payload[0])?;
            push_length_prefixed(&mut out, &payload[1]);
            push_length_prefixed(&mut out, &payload[2]);
        }
        TransferType::GenericTransfer => push_length_prefixed(&mut out, &payload[0]),
    }
    Ok(out.into())
}

// Left-pads numbers shorter than a word, the way big-endian integers are
// stored on chain.
fn push_word(out: &mut Vec<u8>, field: &'static str, value: &[u8]) -> Result<(), DecodeError> {
    if value.len() > WORD {
        return Err(DecodeError::Oversized {
            field,
            len: value.len(),
        });
    }
    out.extend(std::iter::repeat(0u8).take(WORD - value.len()));
    out.extend_from_slice(value);
    Ok(())
}

fn push_length_prefixed(out: &mut Vec<u8>, value: &[u8]) {
    let mut len = [0u8; WORD];
    U256::from(value.len()).to_big_endian(&mut len);
    out.extend_from_slice(&len);
    out.extend_from_slice(value);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn word(value: u64) -> Vec<u8> {
        let mut out = [0u8; WORD];
        U256::from(value).to_big_endian(&mut out);
        out.to_vec()
    }

    fn fungible_data(amount: u64, recipient: &[u8]) -> Vec<u8> {
        let mut data = word(amount);
        data.extend(word(recipient.len() as u64));
        data.extend_from_slice(recipient);
        data
    }

    #[test]
    fn decodes_fungible_deposit() {
        let recipient = [0xaa; 20];
        let payload =
            decode_deposit_data(TransferType::FungibleTransfer, &fungible_data(1_000, &recipient))
                .unwrap();

        assert_eq!(payload.len(), 2);
        assert_eq!(U256::from_big_endian(&payload[0]), U256::from(1_000));
        assert_eq!(payload[1].as_ref(), &recipient);
    }

    #[test]
    fn decodes_non_fungible_deposit_with_metadata() {
        let mut data = word(7);
        data.extend(word(2));
        data.extend([0xbb, 0xcc]);
        data.extend(word(3));
        data.extend(b"uri");

        let payload = decode_deposit_data(TransferType::NonFungibleTransfer, &data).unwrap();

        assert_eq!(U256::from_big_endian(&payload[0]), U256::from(7));
        assert_eq!(payload[1].as_ref(), &[0xbb, 0xcc]);
        assert_eq!(payload[2].as_ref(), b"uri");
    }

    #[test]
    fn rejects_truncated_recipient() {
        let mut data = fungible_data(1, &[0xaa; 20]);
        data.truncate(WORD * 2 + 5);

        let err = decode_deposit_data(TransferType::FungibleTransfer, &data).unwrap_err();

        assert_eq!(
            err,
            DecodeError::Truncated {
                field: "recipient",
                offset: WORD * 2,
                expected: 20,
                available: 5,
            }
        );
    }

    #[test]
    fn rejects_absurd_length_word() {
        let mut data = vec![0xff; WORD];
        data.extend([0u8; 4]);

        let err = decode_deposit_data(TransferType::GenericTransfer, &data).unwrap_err();

        assert!(matches!(
            err,
            DecodeError::LengthOverflow { field: "metadata" } | DecodeError::Truncated { .. }
        ));
    }

    #[test]
    fn proposal_data_matches_deposit_layout() {
        let data = fungible_data(42, &[0x01; 20]);
        let payload = decode_deposit_data(TransferType::FungibleTransfer, &data).unwrap();

        let proposal = encode_proposal_data(TransferType::FungibleTransfer, &payload).unwrap();

        assert_eq!(proposal.as_ref(), data.as_slice());
    }

    #[test]
    fn proposal_pads_short_amounts() {
        let payload = vec![Bytes::from(vec![0x03, 0xe8]), Bytes::from(vec![0xaa; 20])];

        let proposal = encode_proposal_data(TransferType::FungibleTransfer, &payload).unwrap();

        assert_eq!(proposal.as_ref(), fungible_data(1_000, &[0xaa; 20]).as_slice());
    }

    #[test]
    fn proposal_rejects_amount_wider_than_a_word() {
        let payload = vec![Bytes::from(vec![0x01; 33]), Bytes::from(vec![0xaa; 20])];

        let err = encode_proposal_data(TransferType::FungibleTransfer, &payload).unwrap_err();

        assert_eq!(err, DecodeError::Oversized { field: "amount", len: 33 });
    }

    #[test]
    fn proposal_rejects_wrong_payload_shape() {
        let err = encode_proposal_data(TransferType::GenericTransfer, &[]).unwrap_err();

        assert_eq!(
            err,
            DecodeError::PayloadShape {
                transfer_type: TransferType::GenericTransfer,
                expected: 1,
                actual: 0,
            }
        );
    }
}
