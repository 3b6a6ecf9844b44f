//! Regrouping of a flat crop batch by parent image.
//!
//! The child stage sees all crops as one flat batch; these helpers undo that
//! flattening purely by position, so callers must keep the slot order used
//! when the batch was built.

use crate::util::{CascadeError, CascadeResult};

/// Splits `flat` into consecutive groups of `num_crops_per_image` items.
///
/// Fails unless `flat.len()` is an exact multiple of `num_crops_per_image`.
pub fn split_batch<T>(flat: Vec<T>, num_crops_per_image: usize) -> CascadeResult<Vec<Vec<T>>> {
    if num_crops_per_image == 0 {
        return Err(CascadeError::InvalidInput(
            "num_crops_per_image must be at least 1",
        ));
    }
    let rem = flat.len() % num_crops_per_image;
    if rem != 0 {
        return Err(CascadeError::ShapeMismatch {
            context: "flat batch remainder for crops per image",
            expected: 0,
            got: rem,
        });
    }
    let images = flat.len() / num_crops_per_image;
    split_batch_ragged(flat, &vec![num_crops_per_image; images])
}

/// Splits `flat` into consecutive groups of `counts[i]` items.
///
/// Fails unless the counts sum to `flat.len()`. Zero counts yield empty groups.
pub fn split_batch_ragged<T>(flat: Vec<T>, counts: &[usize]) -> CascadeResult<Vec<Vec<T>>> {
    let total: usize = counts.iter().sum();
    if total != flat.len() {
        return Err(CascadeError::ShapeMismatch {
            context: "flat batch size vs crop counts",
            expected: total,
            got: flat.len(),
        });
    }
    let mut items = flat.into_iter();
    Ok(counts
        .iter()
        .map(|&count| items.by_ref().take(count).collect())
        .collect())
}
