//! Purge pass helpers: overflow victim selection and pass reporting.

/// Outcome of a single purge pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PurgeReport {
    /// Records removed because they had expired.
    pub expired: usize,
    /// Records removed to bring the cache back to capacity.
    pub evicted: usize,
    /// Records left after the pass.
    pub remaining: usize,
}

impl PurgeReport {
    /// Total records removed.
    pub fn removed(&self) -> usize {
        self.expired + self.evicted
    }
}

/// Pick the `k` entries with the smallest access time.
///
/// Keeps a working set of `k` candidates and swaps out the newest candidate
/// whenever an older entry shows up. O(n·k); overflow is expected to be small
/// compared to the cache, so this beats sorting everything.
pub(crate) fn select_least_recent<K, T, I>(entries: I, k: usize) -> Vec<K>
where
    I: IntoIterator<Item = (K, T)>,
    T: Ord + Copy,
{
    if k == 0 {
        return Vec::new();
    }

    let mut candidates: Vec<(K, T)> = Vec::with_capacity(k);
    let mut newest = 0;

    for (key, accessed_at) in entries {
        if candidates.len() < k {
            candidates.push((key, accessed_at));
            if candidates.len() == k {
                newest = index_of_newest(&candidates);
            }
        } else if accessed_at < candidates[newest].1 {
            candidates[newest] = (key, accessed_at);
            newest = index_of_newest(&candidates);
        }
    }

    candidates.into_iter().map(|(key, _)| key).collect()
}

fn index_of_newest<K, T: Ord + Copy>(candidates: &[(K, T)]) -> usize {
    let mut newest = 0;
    for (i, (_, accessed_at)) in candidates.iter().enumerate() {
        if *accessed_at > candidates[newest].1 {
            newest = i;
        }
    }
    newest
}
