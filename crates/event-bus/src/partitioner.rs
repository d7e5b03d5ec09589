//! Key to partition mapping.
//!
//! Uses the murmur2 hash of Kafka's default partitioner so a given key lands
//! on the same partition number here as it would on a Kafka cluster with the
//! same partition count.

/// Picks the partition for `key` among `partitions` partitions.
pub fn partition_for_key(key: &str, partitions: u32) -> u32 {
    if partitions == 0 {
        return 0;
    }
    let positive = murmur2(key.as_bytes()) & 0x7fff_ffff;
    (positive as u32) % partitions
}

/// 32-bit murmur2 with Kafka's seed.
pub fn murmur2(data: &[u8]) -> i32 {
    const SEED: u32 = 0x9747_b28c;
    const M: i32 = 0x5bd1_e995;
    const R: u32 = 24;

    let length = data.len();
    let mut h: i32 = (SEED as i32) ^ (length as i32);

    let chunks = length / 4;
    for i in 0..chunks {
        let i4 = i * 4;
        let mut k: i32 = (data[i4] as i32)
            | ((data[i4 + 1] as i32) << 8)
            | ((data[i4 + 2] as i32) << 16)
            | ((data[i4 + 3] as i32) << 24);
        k = k.wrapping_mul(M);
        k ^= ((k as u32) >> R) as i32;
        k = k.wrapping_mul(M);
        h = h.wrapping_mul(M);
        h ^= k;
    }

    let tail = chunks * 4;
    let rem = length % 4;
    if rem == 3 {
        h ^= (data[tail + 2] as i32) << 16;
    }
    if rem >= 2 {
        h ^= (data[tail + 1] as i32) << 8;
    }
    if rem >= 1 {
        h ^= data[tail] as i32;
        h = h.wrapping_mul(M);
    }

    h ^= ((h as u32) >> 13) as i32;
    h = h.wrapping_mul(M);
    h ^= ((h as u32) >> 15) as i32;
    h
}
