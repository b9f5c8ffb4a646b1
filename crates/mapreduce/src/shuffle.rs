//! Largest-key grouping of sorted intermediate vectors.

use std::cmp::Ordering;

/// Drain `vecs` into one group per distinct key, emitted in strictly
/// descending key order.
///
/// Every input vector must be sorted ascending by key, so the largest
/// remaining key is always some vector's trailing element. Key equality is
/// defined solely through `Ord::cmp`; the order of pairs inside a group is
/// unspecified. `on_group` receives the number of pairs collected into
/// each finished group.
pub(crate) fn drain_into_groups<K: Ord, V>(
    vecs: &mut [Vec<(K, V)>],
    mut on_group: impl FnMut(usize),
) -> Vec<Vec<(K, V)>> {
    let mut groups = Vec::new();
    loop {
        // The vector whose trailing element carries the largest remaining key.
        let mut best: Option<usize> = None;
        for (i, vec) in vecs.iter().enumerate() {
            if let Some((key, _)) = vec.last() {
                let larger = match best {
                    None => true,
                    Some(b) => {
                        let (best_key, _) = vecs[b].last().expect("best vector is non-empty");
                        best_key < key
                    }
                };
                if larger {
                    best = Some(i);
                }
            }
        }
        let Some(best) = best else {
            break; // every vector is drained
        };

        let seed = vecs[best].pop().expect("best vector is non-empty");
        let mut group = vec![seed];
        for vec in vecs.iter_mut() {
            while vec
                .last()
                .is_some_and(|(key, _)| key.cmp(&group[0].0) == Ordering::Equal)
            {
                group.push(vec.pop().expect("trailing element just observed"));
            }
        }
        on_group(group.len());
        groups.push(group);
    }
    groups
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keys_of<V>(groups: &[Vec<(i32, V)>]) -> Vec<i32> {
        groups.iter().map(|g| g[0].0).collect()
    }

    #[test]
    fn test_groups_come_out_in_descending_key_order() {
        let mut vecs = vec![
            vec![(1, "a"), (3, "b"), (5, "c")],
            vec![(2, "d"), (4, "e")],
        ];
        let groups = drain_into_groups(&mut vecs, |_| {});
        assert_eq!(keys_of(&groups), vec![5, 4, 3, 2, 1]);
    }

    #[test]
    fn test_equal_keys_collect_across_vectors() {
        let mut vecs = vec![
            vec![(1, "a"), (7, "b")],
            vec![(7, "c")],
            vec![(1, "d"), (7, "e")],
        ];
        let groups = drain_into_groups(&mut vecs, |_| {});
        assert_eq!(keys_of(&groups), vec![7, 1]);
        assert_eq!(groups[0].len(), 3);
        assert_eq!(groups[1].len(), 2);
        assert!(groups[0].iter().all(|(k, _)| *k == 7));
        assert!(groups[1].iter().all(|(k, _)| *k == 1));
    }

    #[test]
    fn test_pair_count_is_conserved() {
        let mut vecs = vec![
            vec![(1, 0), (1, 1), (2, 2)],
            vec![],
            vec![(1, 3), (3, 4), (3, 5)],
        ];
        let before: usize = vecs.iter().map(Vec::len).sum();
        let mut reported = 0;
        let groups = drain_into_groups(&mut vecs, |drained| reported += drained);
        let after: usize = groups.iter().map(Vec::len).sum();
        assert_eq!(after, before);
        assert_eq!(reported, before);
        assert!(vecs.iter().all(Vec::is_empty));
    }

    #[test]
    fn test_no_input_means_no_groups() {
        let mut vecs: Vec<Vec<(i32, ())>> = vec![vec![], vec![]];
        let groups = drain_into_groups(&mut vecs, |_| {});
        assert!(groups.is_empty());
    }

    #[test]
    fn test_single_vector_splits_by_key() {
        let mut vecs = vec![vec![(1, "a"), (1, "b"), (2, "c")]];
        let groups = drain_into_groups(&mut vecs, |_| {});
        assert_eq!(keys_of(&groups), vec![2, 1]);
        assert_eq!(groups[1].len(), 2);
    }
}
