use proptest::prelude::*;
use std::collections::BTreeSet;

/// Forward edges over `1..=n` (lower id to higher id), so the result is always acyclic
pub fn dag_edges_strategy() -> impl Strategy<Value = (usize, Vec<(i64, i64)>)> {
    (2usize..12).prop_flat_map(|n| {
        let edge = (1..=n as i64, 1..=n as i64)
            .prop_filter("no self-loops", |(a, b)| a != b)
            .prop_map(|(a, b)| if a < b { (a, b) } else { (b, a) });
        (
            Just(n),
            prop::collection::vec(edge, 0..(n * 2)).prop_map(|edges| {
                edges
                    .into_iter()
                    .collect::<BTreeSet<_>>()
                    .into_iter()
                    .collect()
            }),
        )
    })
}

/// A generated DAG plus one of its node ids
pub fn dag_with_start_node_strategy() -> impl Strategy<Value = (usize, Vec<(i64, i64)>, i64)> {
    dag_edges_strategy()
        .prop_flat_map(|(n, edges)| (Just(n), Just(edges), 1..=n as i64))
}
