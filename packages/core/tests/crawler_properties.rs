//! Property tests for the crawler over random link graphs.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use proptest::prelude::*;

use blog_notifier::crawler::{Crawler, DEFAULT_MAX_DEPTH};
use blog_notifier::services::MockFetcher;

fn node(i: usize) -> String {
    format!("http://g/{}", i)
}

/// Links of every node: `graph[i]` lists the targets of node `i`.
fn graphs() -> impl Strategy<Value = Vec<Vec<usize>>> {
    (1usize..12).prop_flat_map(|n| {
        prop::collection::vec(prop::collection::vec(0..n, 0..4), n)
    })
}

/// Minimal hop count from node 0 for every node within `max_depth`.
fn depths(graph: &[Vec<usize>], max_depth: usize) -> HashMap<usize, usize> {
    let mut depth = HashMap::from([(0, 0)]);
    let mut queue = VecDeque::from([0]);
    while let Some(current) = queue.pop_front() {
        let d = depth[&current];
        if d >= max_depth {
            continue;
        }
        for &next in &graph[current] {
            if !depth.contains_key(&next) {
                depth.insert(next, d + 1);
                queue.push_back(next);
            }
        }
    }
    depth
}

fn mock(graph: &[Vec<usize>]) -> MockFetcher {
    let fetcher = MockFetcher::new();
    for (i, targets) in graph.iter().enumerate() {
        let links: Vec<String> = targets.iter().map(|&t| node(t)).collect();
        let links: Vec<&str> = links.iter().map(String::as_str).collect();
        fetcher.set_page(&node(i), &links);
    }
    fetcher
}

proptest! {
    #[test]
    fn crawl_returns_exactly_the_pages_within_depth(graph in graphs()) {
        let fetcher = Arc::new(mock(&graph));
        let crawler = Crawler::new(fetcher.clone());
        let result = tokio_test::block_on(crawler.crawl(&node(0))).unwrap();

        let unique: HashSet<&String> = result.posts.iter().collect();
        prop_assert_eq!(unique.len(), result.posts.len(), "duplicate posts");
        prop_assert!(!result.posts.contains(&node(0)), "root reported as post");

        let depth = depths(&graph, DEFAULT_MAX_DEPTH);
        let expected: HashSet<String> = depth
            .keys()
            .filter(|&&i| i != 0)
            .map(|&i| node(i))
            .collect();
        let actual: HashSet<String> = result.posts.iter().cloned().collect();
        prop_assert_eq!(actual, expected);

        for (i, d) in depth {
            let fetched = fetcher.fetch_count(&node(i));
            let expected_fetches = usize::from(d < DEFAULT_MAX_DEPTH);
            prop_assert_eq!(fetched, expected_fetches, "node {} at depth {}", i, d);
        }
    }

    #[test]
    fn smaller_depth_bound_yields_a_subset(graph in graphs(), max_depth in 0usize..3) {
        let shallow = Crawler::new(Arc::new(mock(&graph))).with_max_depth(max_depth);
        let deep = Crawler::new(Arc::new(mock(&graph)));

        let shallow = tokio_test::block_on(shallow.crawl(&node(0))).unwrap();
        let deep = tokio_test::block_on(deep.crawl(&node(0))).unwrap();

        let deep: HashSet<String> = deep.posts.into_iter().collect();
        for post in &shallow.posts {
            prop_assert!(deep.contains(post));
        }
    }
}
