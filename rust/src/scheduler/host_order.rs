//! Host selection for submission, driven by per-host free cores.

use rustc_hash::{FxHashMap, FxHashSet};

use crate::toolchain::Occupancy;

/// Build the list of submission slots, one entry per usable core.
///
/// Each host contributes `free - 1` entries (one core is left as headroom),
/// so hosts with at most one free core never appear. Hosts from `priority`
/// come first, in that list's order; the remaining hosts follow by
/// descending free cores, ties kept in report order.
pub fn machine_order(occupancy: &Occupancy, priority: &[String]) -> Vec<String> {
    let free: FxHashMap<&str, u32> = occupancy
        .iter()
        .map(|(host, (occupied, total))| (host.as_str(), total.saturating_sub(*occupied)))
        .collect();

    let mut ranked: Vec<&str> = occupancy.keys().map(|h| h.as_str()).collect();
    // Stable sort keeps report order among equals.
    ranked.sort_by(|a, b| free[b].cmp(&free[a]));

    let mut seen = FxHashSet::default();
    let preferred: Vec<&str> = priority
        .iter()
        .map(|h| h.as_str())
        .filter(|h| free.contains_key(h) && seen.insert(*h))
        .collect();
    let remainder = ranked.into_iter().filter(|h| !seen.contains(h));

    let mut order = Vec::new();
    for host in preferred.iter().copied().chain(remainder) {
        for _ in 1..free[host] {
            order.push(host.to_string());
        }
    }
    order
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_occupancy(hosts: &[(&str, u32, u32)]) -> Occupancy {
        hosts
            .iter()
            .map(|(h, occupied, total)| (h.to_string(), (*occupied, *total)))
            .collect()
    }

    fn counts(order: &[String]) -> Vec<(String, usize)> {
        let mut runs: Vec<(String, usize)> = Vec::new();
        for host in order {
            match runs.last_mut() {
                Some((last, n)) if last == host => *n += 1,
                _ => runs.push((host.clone(), 1)),
            }
        }
        runs
    }

    #[test]
    fn test_priority_host_first_then_capacity() {
        let occupancy = make_occupancy(&[("h1", 2, 10), ("h2", 0, 4)]);
        let order = machine_order(&occupancy, &["h2".to_string()]);
        assert_eq!(
            counts(&order),
            vec![("h2".to_string(), 3), ("h1".to_string(), 7)]
        );
    }

    #[test]
    fn test_no_priority_sorts_by_free_cores() {
        let occupancy = make_occupancy(&[("small", 0, 3), ("big", 1, 9), ("mid", 0, 5)]);
        let order = machine_order(&occupancy, &[]);
        assert_eq!(
            counts(&order),
            vec![
                ("big".to_string(), 7),
                ("mid".to_string(), 4),
                ("small".to_string(), 2)
            ]
        );
    }

    #[test]
    fn test_priority_list_order_and_unknown_hosts() {
        let occupancy = make_occupancy(&[("a", 0, 3), ("b", 0, 9), ("c", 0, 5)]);
        let priority = vec!["ghost".to_string(), "a".to_string(), "c".to_string(), "a".to_string()];
        let order = machine_order(&occupancy, &priority);
        assert_eq!(
            counts(&order),
            vec![
                ("a".to_string(), 2),
                ("c".to_string(), 4),
                ("b".to_string(), 8)
            ]
        );
    }

    #[test]
    fn test_hosts_without_headroom_are_omitted() {
        let occupancy = make_occupancy(&[("full", 8, 8), ("over", 12, 8), ("one", 3, 4), ("two", 2, 4)]);
        let order = machine_order(&occupancy, &["full".to_string()]);
        assert_eq!(order, vec!["two".to_string()]);
    }

    #[test]
    fn test_empty_occupancy() {
        assert!(machine_order(&Occupancy::default(), &["h1".to_string()]).is_empty());
    }
}
