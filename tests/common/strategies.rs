use proptest::prelude::*;
use proptest::sample::Index;

use conference_broker::execution::ExecutableId;

pub type Dependencies = Vec<(ExecutableId, Vec<ExecutableId>)>;

/// Acyclic dependency graph: every executable only depends on earlier declared ones,
/// listed in shuffled order
pub fn acyclic_graph_strategy() -> impl Strategy<Value = Dependencies> {
    (1usize..16)
        .prop_flat_map(|size| prop::collection::vec(prop::collection::vec(any::<Index>(), 0..4), size))
        .prop_map(|picks| {
            picks
                .into_iter()
                .enumerate()
                .map(|(position, picks)| {
                    let mut children: Vec<ExecutableId> = if position == 0 {
                        Vec::new()
                    } else {
                        picks
                            .iter()
                            .map(|pick| ExecutableId(pick.index(position) as u64 + 1))
                            .collect()
                    };
                    children.sort();
                    children.dedup();
                    (ExecutableId(position as u64 + 1), children)
                })
                .collect::<Dependencies>()
        })
        .prop_flat_map(|graph| Just(graph).prop_shuffle())
}

/// `1 <- 2 <- ... <- n`: each executable depends on its predecessor
pub fn chain_strategy() -> impl Strategy<Value = Dependencies> {
    (1u64..20).prop_map(|length| {
        (1..=length)
            .map(|id| {
                let children = if id == 1 { Vec::new() } else { vec![ExecutableId(id - 1)] };
                (ExecutableId(id), children)
            })
            .collect()
    })
}

/// Acyclic graph plus a ring closing over some of its executables
pub fn cyclic_graph_strategy() -> impl Strategy<Value = Dependencies> {
    (acyclic_graph_strategy(), 1u64..6).prop_map(|(mut graph, ring)| {
        let base = graph.len() as u64;
        for offset in 0..ring {
            let id = ExecutableId(base + offset + 1);
            let next = if offset + 1 == ring {
                ExecutableId(base + 1)
            } else {
                ExecutableId(base + offset + 2)
            };
            graph.push((id, vec![next]));
        }
        graph
    })
}
