use std::fmt::Debug;

use num_traits::{Num, PrimInt};
use parking_lot::Mutex;
use rand::Rng;

/// Make sure bounds are ordered correctly, eg right is to the right of left, top is above
/// bottom.
///
pub fn rearrange<N>(lower: N, upper: N) -> (N, N)
where
    N: Num + Debug + PartialOrd,
{
    if lower > upper {
        (upper, lower)
    } else {
        (lower, upper)
    }
}

/// Returns n / m with remainder rounded up to nearest integer
pub fn div_ceil<I>(m: I, n: I) -> I
where
    I: PrimInt + Debug,
{
    let a = m / n;
    if m % n > I::zero() {
        a + I::one()
    } else {
        a
    }
}

static NAME_LOCK: Mutex<()> = Mutex::new(());

/// Generate a unique random name, typically used for temporary files.
///
/// Generation is mutex-protected so that concurrent chunk reads never race
/// towards the same name.
///
pub fn unique_name(n: usize, prefix: &str, suffix: &str) -> String {
    const LETTERS: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789";

    let _guard = NAME_LOCK.lock();
    let mut rng = rand::thread_rng();
    let mut out = String::with_capacity(prefix.len() + n + suffix.len());
    out.push_str(prefix);
    for _ in 0..n {
        out.push(LETTERS[rng.gen_range(0..LETTERS.len())] as char);
    }
    out.push_str(suffix);

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rearrange() {
        assert_eq!(rearrange(5.0, 3.0), (3.0, 5.0));
        assert_eq!(rearrange(3.0, 5.0), (3.0, 5.0));
    }

    #[test]
    fn test_div_ceil() {
        assert_eq!(div_ceil(10, 5), 2);
        assert_eq!(div_ceil(11, 5), 3);
        assert_eq!(div_ceil(1, 5), 1);
    }

    #[test]
    fn test_unique_name() {
        let a = unique_name(8, "chunk_", ".bin");
        let b = unique_name(8, "chunk_", ".bin");
        assert_eq!(a.len(), "chunk_".len() + 8 + ".bin".len());
        assert!(a.starts_with("chunk_") && a.ends_with(".bin"));
        assert_ne!(a, b);
    }
}
