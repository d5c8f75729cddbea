//! Stage planning for declared sub-workflows
//!
//! Dependencies split invocations into Kahn layers; inside a layer, siblings
//! sharing a `parallel_group` form one batch that runs concurrently. Batches
//! run one after another.

use crate::ast::SubWorkflowInvocation;
use crate::dag::DependencyGraph;

/// Ordered batches; members of one batch may run concurrently
pub fn batches<'a>(invocations: &[&'a SubWorkflowInvocation]) -> Vec<Vec<&'a SubWorkflowInvocation>> {
    let graph = DependencyGraph::from_invocations(invocations.iter().copied());
    let mut out = Vec::new();

    for layer in graph.layers() {
        let mut groups: Vec<(Option<&str>, Vec<&'a SubWorkflowInvocation>)> = Vec::new();

        for name in &layer {
            let Some(inv) = invocations.iter().copied().find(|inv| &inv.name == name) else {
                continue;
            };
            match inv.parallel_group.as_deref() {
                Some(tag) => match groups.iter_mut().find(|(t, _)| *t == Some(tag)) {
                    Some((_, members)) => members.push(inv),
                    None => groups.push((Some(tag), vec![inv])),
                },
                None => groups.push((None, vec![inv])),
            }
        }

        out.extend(groups.into_iter().map(|(_, members)| members));
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn inv(name: &str, deps: &[&str], group: Option<&str>) -> SubWorkflowInvocation {
        SubWorkflowInvocation {
            name: name.to_string(),
            path: format!("./{}.lumen.md", name),
            depends_on: deps.iter().map(|d| d.to_string()).collect(),
            parallel_group: group.map(String::from),
            ..Default::default()
        }
    }

    fn names(batches: &[Vec<&SubWorkflowInvocation>]) -> Vec<Vec<String>> {
        batches
            .iter()
            .map(|b| b.iter().map(|i| i.name.clone()).collect())
            .collect()
    }

    #[test]
    fn ungrouped_siblings_run_one_by_one() {
        let (a, b) = (inv("a", &[], None), inv("b", &[], None));
        assert_eq!(names(&batches(&[&a, &b])), vec![vec!["a"], vec!["b"]]);
    }

    #[test]
    fn group_members_share_a_batch() {
        let lint = inv("lint", &[], Some("checks"));
        let test = inv("test", &[], Some("checks"));
        let report = inv("report", &["lint", "test"], None);
        assert_eq!(
            names(&batches(&[&lint, &test, &report])),
            vec![vec!["lint", "test"], vec!["report"]]
        );
    }

    #[test]
    fn dependency_splits_a_group() {
        let a = inv("a", &[], Some("g"));
        let b = inv("b", &["a"], Some("g"));
        assert_eq!(names(&batches(&[&b, &a])), vec![vec!["a"], vec!["b"]]);
    }
}
