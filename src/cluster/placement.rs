//! Deterministic record-to-shard placement
//!
//! Every node computes the same placement set for a key from nothing but
//! the key, the ordered shard list, and the replica count, so writes and
//! reads agree without coordination. The shard list ordering is part of
//! the cluster's durable state.

/// Compute the ordered set of shards responsible for `key`.
///
/// When `replicas` equals the shard count the whole list is returned
/// unchanged. Otherwise the key's Unicode code points are summed with
/// 32-bit signed wrapping, and shards are drawn from a shrinking working
/// set by `sum mod remaining`. `replicas` larger than the shard count is
/// clamped; zero shards yields an empty set.
pub fn placement(key: &str, shards: &[String], replicas: usize) -> Vec<String> {
    if shards.is_empty() {
        return Vec::new();
    }
    if replicas == shards.len() {
        return shards.to_vec();
    }
    let replicas = replicas.clamp(1, shards.len());

    let mut sum: i32 = 0;
    for c in key.chars() {
        sum = sum.wrapping_add(c as i32);
    }

    let mut working: Vec<String> = shards.to_vec();
    let mut selected = Vec::with_capacity(replicas);
    for _ in 0..replicas {
        let idx = sum.rem_euclid(working.len() as i32) as usize;
        selected.push(working.remove(idx));
    }
    selected
}
