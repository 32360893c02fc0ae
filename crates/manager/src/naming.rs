use rand::Rng;

pub const NAME_SUFFIX_LEN: usize = 5;

/// Characters a name suffix is drawn from. Lowercase so names stay valid
/// Kubernetes object names.
pub const NAME_SUFFIX_ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";

/// `<prefix>-` followed by a random suffix. Not collision-free: the cluster
/// rejects duplicates.
pub fn generate_name(prefix: &str) -> String {
    generate_name_with(prefix, &mut rand::thread_rng())
}

pub fn generate_name_with<R: Rng + ?Sized>(prefix: &str, rng: &mut R) -> String {
    let suffix: String = (0..NAME_SUFFIX_LEN)
        .map(|_| NAME_SUFFIX_ALPHABET[rng.gen_range(0..NAME_SUFFIX_ALPHABET.len())] as char)
        .collect();
    format!("{prefix}-{suffix}")
}
