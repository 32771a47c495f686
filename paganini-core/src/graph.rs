//! Dependency graph over class variables and its strongly connected
//! components (Tarjan).

/// Edge `i -> j` when the equation of class `i` mentions class `j`.
#[derive(Clone, Debug, Default)]
pub struct DependencyGraph {
    adjacency: Vec<Vec<usize>>,
}

impl DependencyGraph {
    pub fn new(adjacency: Vec<Vec<usize>>) -> Self {
        Self { adjacency }
    }

    pub fn len(&self) -> usize {
        self.adjacency.len()
    }

    pub fn is_empty(&self) -> bool {
        self.adjacency.is_empty()
    }

    pub fn successors(&self, node: usize) -> &[usize] {
        &self.adjacency[node]
    }

    pub fn has_edge(&self, from: usize, to: usize) -> bool {
        self.adjacency[from].contains(&to)
    }

    /// Components in reverse topological order (dependencies first).
    pub fn strongly_connected_components(&self) -> Vec<Vec<usize>> {
        let mut state = TarjanState::new(self.len());
        for node in 0..self.len() {
            if state.index[node].is_none() {
                state.strong_connect(node, self);
            }
        }
        state.components
    }

    /// Components that carry a cycle: more than one node, or a self-loop.
    pub fn recursive_components(&self) -> Vec<Vec<usize>> {
        self.strongly_connected_components()
            .into_iter()
            .filter(|c| c.len() > 1 || self.has_edge(c[0], c[0]))
            .collect()
    }
}

struct TarjanState {
    next_index: usize,
    stack: Vec<usize>,
    on_stack: Vec<bool>,
    index: Vec<Option<usize>>,
    lowlink: Vec<usize>,
    components: Vec<Vec<usize>>,
}

impl TarjanState {
    fn new(n: usize) -> Self {
        Self {
            next_index: 0,
            stack: Vec::new(),
            on_stack: vec![false; n],
            index: vec![None; n],
            lowlink: vec![0; n],
            components: Vec::new(),
        }
    }

    fn strong_connect(&mut self, node: usize, graph: &DependencyGraph) {
        self.index[node] = Some(self.next_index);
        self.lowlink[node] = self.next_index;
        self.next_index += 1;
        self.stack.push(node);
        self.on_stack[node] = true;

        for &target in graph.successors(node) {
            match self.index[target] {
                None => {
                    self.strong_connect(target, graph);
                    self.lowlink[node] = self.lowlink[node].min(self.lowlink[target]);
                }
                Some(idx) if self.on_stack[target] => {
                    self.lowlink[node] = self.lowlink[node].min(idx);
                }
                Some(_) => {}
            }
        }

        if Some(self.lowlink[node]) == self.index[node] {
            let mut component = Vec::new();
            while let Some(popped) = self.stack.pop() {
                self.on_stack[popped] = false;
                component.push(popped);
                if popped == node {
                    break;
                }
            }
            component.sort_unstable();
            self.components.push(component);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mutual_recursion_forms_one_component() {
        // L -> {L, D}, D -> {D}
        let g = DependencyGraph::new(vec![vec![0, 1], vec![1]]);
        let comps = g.strongly_connected_components();
        assert_eq!(comps, vec![vec![1], vec![0]]);
        assert_eq!(g.recursive_components().len(), 2);

        // F -> K -> U -> F
        let cycle = DependencyGraph::new(vec![vec![1], vec![2], vec![0]]);
        assert_eq!(cycle.strongly_connected_components(), vec![vec![0, 1, 2]]);
    }

    #[test]
    fn acyclic_nodes_are_not_recursive() {
        let g = DependencyGraph::new(vec![vec![1], vec![]]);
        assert_eq!(g.strongly_connected_components().len(), 2);
        assert!(g.recursive_components().is_empty());
    }
}
