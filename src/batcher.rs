use solana_sdk::pubkey::Pubkey;
use std::num::NonZeroUsize;

/// Recipients that share one transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Batch {
    /// position among all batches of the run
    pub index: usize,
    pub recipients: Vec<Pubkey>,
}

/// Split `items` into contiguous groups of at most `size`, preserving order.
pub fn chunk<T: Clone>(items: &[T], size: NonZeroUsize) -> Vec<Vec<T>> {
    items.chunks(size.get()).map(<[T]>::to_vec).collect()
}

pub fn into_batches(recipients: &[Pubkey], size: NonZeroUsize) -> Vec<Batch> {
    chunk(recipients, size)
        .into_iter()
        .enumerate()
        .map(|(index, recipients)| Batch { index, recipients })
        .collect()
}
