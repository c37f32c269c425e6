use rand::distributions::Alphanumeric;
use rand::Rng;

/// Generates a random alphanumeric identifier of the given length.
///
/// Used for document `_id` values when the caller does not supply one. The
/// default length gives roughly 95 bits of entropy, which keeps accidental
/// collisions out of reach for a single-process store; the caller still
/// retries against the id index before accepting one.
pub fn random_id(length: usize) -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(length)
        .map(char::from)
        .collect()
}
