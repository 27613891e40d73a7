//! Topological ordering of action calls by their data dependencies.

use super::ActionCallDescriptor;
use crate::errors::CyclicDependencyError;
use std::collections::{BTreeSet, HashMap};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mark {
    Unvisited,
    OnStack,
    Done,
}

/// Orders action calls so that every call runs after the calls whose
/// output it consumes.
///
/// For a key `K`:
/// - a call reading `K` without writing it runs after every writer of `K`;
/// - a call reading and writing `K` runs after every writer of `K` that
///   does not read `K` itself;
/// - a call declaring `K` as read-before-written runs before every writer
///   of `K`.
///
/// Calls are visited in name order, so the result and any reported cycle
/// are independent of the input order. Calls with equal names keep their
/// relative input order.
///
/// # Errors
///
/// Returns `CyclicDependencyError` if the dependencies form a cycle.
pub fn resolve<T>(items: Vec<T>) -> Result<Vec<T>, CyclicDependencyError>
where
    T: AsRef<ActionCallDescriptor>,
{
    let order = {
        let descriptors: Vec<&ActionCallDescriptor> = items.iter().map(AsRef::as_ref).collect();
        execution_order(&descriptors)?
    };

    let mut slots: Vec<Option<T>> = items.into_iter().map(Some).collect();
    Ok(order
        .into_iter()
        .filter_map(|index| slots[index].take())
        .collect())
}

/// Returns input indices in execution order.
fn execution_order(descriptors: &[&ActionCallDescriptor]) -> Result<Vec<usize>, CyclicDependencyError> {
    // Position in `sorted` is the node id used below; ids ascend with names.
    let mut sorted: Vec<usize> = (0..descriptors.len()).collect();
    sorted.sort_by(|a, b| descriptors[*a].name.cmp(&descriptors[*b].name));
    let nodes: Vec<&ActionCallDescriptor> = sorted.iter().map(|i| descriptors[*i]).collect();

    let predecessors = direct_predecessors(&nodes);
    let post_order = depth_first_order(&nodes, &predecessors)?;

    Ok(post_order.into_iter().map(|node| sorted[node]).collect())
}

/// Computes each node's direct predecessors, ascending by node id.
fn direct_predecessors(nodes: &[&ActionCallDescriptor]) -> Vec<Vec<usize>> {
    let mut writers: HashMap<&str, Vec<usize>> = HashMap::new();
    let mut pre_readers: HashMap<&str, Vec<usize>> = HashMap::new();
    for (id, node) in nodes.iter().enumerate() {
        for key in &node.writes {
            writers.entry(key.as_str()).or_default().push(id);
        }
        for key in &node.reads_before_written {
            pre_readers.entry(key.as_str()).or_default().push(id);
        }
    }

    let ordering_reads: Vec<BTreeSet<&str>> = nodes.iter().map(|n| n.ordering_reads()).collect();

    nodes
        .iter()
        .enumerate()
        .map(|(id, node)| {
            let mut predecessors = BTreeSet::new();

            for key in &ordering_reads[id] {
                let transforms = node.writes.contains(*key);
                for &writer in writers.get(key).into_iter().flatten() {
                    if writer == id {
                        continue;
                    }
                    // Transforms only wait for plain producers, not for each other.
                    if transforms && ordering_reads[writer].contains(key) {
                        continue;
                    }
                    predecessors.insert(writer);
                }
            }

            for key in &node.writes {
                for &reader in pre_readers.get(key.as_str()).into_iter().flatten() {
                    if reader != id {
                        predecessors.insert(reader);
                    }
                }
            }

            predecessors.into_iter().collect()
        })
        .collect()
}

/// Post-order depth-first traversal over predecessor edges, with an
/// explicit stack so long dependency chains cannot overflow the call stack.
fn depth_first_order(
    nodes: &[&ActionCallDescriptor],
    predecessors: &[Vec<usize>],
) -> Result<Vec<usize>, CyclicDependencyError> {
    let mut marks = vec![Mark::Unvisited; nodes.len()];
    let mut result = Vec::with_capacity(nodes.len());
    // (node, index of the next predecessor to visit)
    let mut stack: Vec<(usize, usize)> = Vec::new();

    for root in 0..nodes.len() {
        if marks[root] != Mark::Unvisited {
            continue;
        }
        marks[root] = Mark::OnStack;
        stack.push((root, 0));

        while let Some(top) = stack.last_mut() {
            let (node, next) = *top;
            let Some(&predecessor) = predecessors[node].get(next) else {
                stack.pop();
                marks[node] = Mark::Done;
                result.push(node);
                continue;
            };
            top.1 += 1;

            match marks[predecessor] {
                Mark::Done => {}
                Mark::Unvisited => {
                    marks[predecessor] = Mark::OnStack;
                    stack.push((predecessor, 0));
                }
                Mark::OnStack => {
                    let start = stack
                        .iter()
                        .position(|(id, _)| *id == predecessor)
                        .unwrap_or(0);
                    let cycle = stack[start..]
                        .iter()
                        .map(|(id, _)| nodes[*id].name.clone())
                        .collect();
                    return Err(CyclicDependencyError::new(cycle));
                }
            }
        }
    }

    Ok(result)
}
