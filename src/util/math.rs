//! Activation helpers shared by the codec and the output head.

/// Logistic sigmoid, evaluated in the branch that cannot overflow `exp`.
#[inline]
pub(crate) fn sigmoid(x: f32) -> f32 {
    if x >= 0.0 {
        1.0 / (1.0 + (-x).exp())
    } else {
        let e = x.exp();
        e / (1.0 + e)
    }
}

/// Inverse of [`sigmoid`] for `p` in `(0, 1)`.
#[inline]
pub(crate) fn logit(p: f32) -> f32 {
    (p / (1.0 - p)).ln()
}

/// Writes the softmax of `logits` into `out`.
///
/// The maximum logit is subtracted first so large activations stay finite.
pub(crate) fn softmax_into(logits: &[f32], out: &mut Vec<f32>) {
    out.clear();
    if logits.is_empty() {
        return;
    }
    let max = logits.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let mut sum = 0.0f32;
    for &value in logits {
        let e = (value - max).exp();
        sum += e;
        out.push(e);
    }
    let inv = 1.0 / sum;
    for value in out.iter_mut() {
        *value *= inv;
    }
}

/// Clamps a coordinate to the normalized image range.
#[inline]
pub(crate) fn clamp01(x: f32) -> f32 {
    x.clamp(0.0, 1.0)
}
