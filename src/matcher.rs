use crate::ir::Method;
use crate::predicate::InsnPredicate;

/// One occurrence of a predicate pattern, as node indices into the method.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Match {
    /// First node of the span; may be a marker preceding the first matched instruction.
    pub first: usize,
    /// The instruction satisfying the last predicate.
    pub last: usize,
    /// Every node from `first` through `last`, markers included, plus the markers directly
    /// after `last` up to the next instruction.
    pub nodes: Vec<usize>,
}

/// Find every non-overlapping occurrence of `predicates`, in order of start position.
///
/// Each predicate consumes one opcode-bearing node; markers in between are skipped but stay in
/// the span. A match also takes the markers trailing its last instruction, and the scan resumes
/// after them; after a failure it resumes at the next node. An empty pattern matches nothing.
pub fn find_matches(method: &Method, predicates: &[InsnPredicate]) -> Vec<Match> {
    let mut matches = Vec::new();
    if predicates.is_empty() {
        return matches;
    }
    let nodes = &method.instructions;
    let mut start = 0;
    while start < nodes.len() {
        let mut matched = 0;
        let mut last = None;
        let mut cursor = start;
        while cursor < nodes.len() && matched < predicates.len() {
            if !nodes[cursor].is_marker() {
                if !predicates[matched].test(method, cursor) {
                    break;
                }
                matched += 1;
                last = Some(cursor);
            }
            cursor += 1;
        }
        match last {
            Some(last) if matched == predicates.len() => {
                let mut end = last;
                while end + 1 < nodes.len() && nodes[end + 1].is_marker() {
                    end += 1;
                }
                matches.push(Match {
                    first: start,
                    last,
                    nodes: (start..=end).collect(),
                });
                start = end + 1;
            }
            _ => start += 1,
        }
    }
    matches
}
