// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Message Routing
//!
//! Pure routing decisions: given an exchange and a routing key, which queues
//! receive a copy. Routing keys and topic patterns are words separated by `.`;
//! in a pattern `*` stands for exactly one word and `#` for zero or more words.

use crate::exchange::{Exchange, ExchangeKind};

const WORD_SEPARATOR: char = '.';
const SINGLE_WORD: &str = "*";
const MULTI_WORD: &str = "#";

/// Resolves the target queues of a message published on `exchange`.
///
/// One entry is returned per matching binding, in binding order, so a queue
/// bound twice with matching patterns receives two copies.
///
/// `headers` exchanges route like `fanout`: header matching is not implemented.
pub fn route(exchange: &Exchange, routing_key: &str) -> Vec<String> {
    exchange
        .bindings()
        .iter()
        .filter(|binding| match exchange.kind() {
            ExchangeKind::Direct => binding.pattern == routing_key,
            ExchangeKind::Fanout | ExchangeKind::Headers => true,
            ExchangeKind::Topic => topic_matches(&binding.pattern, routing_key),
        })
        .map(|binding| binding.queue.clone())
        .collect()
}

/// Whole-string topic match of `routing_key` against `pattern`.
pub fn topic_matches(pattern: &str, routing_key: &str) -> bool {
    let pattern: Vec<&str> = pattern.split(WORD_SEPARATOR).collect();
    let key: Vec<&str> = routing_key.split(WORD_SEPARATOR).collect();

    match_words(&pattern, &key)
}

/// Word-by-word match over the key, tracking every key prefix the pattern
/// consumed so far can end at. Runs in `O(pattern * key)`.
fn match_words(pattern: &[&str], key: &[&str]) -> bool {
    // reachable[j]: the pattern words seen so far match exactly key[..j]
    let mut reachable = vec![false; key.len() + 1];
    reachable[0] = true;

    for &word in pattern {
        let mut next = vec![false; key.len() + 1];
        match word {
            MULTI_WORD => {
                let mut seen = false;
                for (j, slot) in next.iter_mut().enumerate() {
                    seen |= reachable[j];
                    *slot = seen;
                }
            }
            SINGLE_WORD => {
                for j in 1..=key.len() {
                    next[j] = reachable[j - 1];
                }
            }
            literal => {
                for j in 1..=key.len() {
                    next[j] = reachable[j - 1] && key[j - 1] == literal;
                }
            }
        }

        if !next.contains(&true) {
            return false;
        }
        reachable = next;
    }

    reachable[key.len()]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exchange::ExchangeDefinition;

    fn exchange(def: ExchangeDefinition, bindings: &[(&str, &str)]) -> Exchange {
        let mut exchange = Exchange::new(def);
        for (queue, pattern) in bindings {
            exchange.bind(queue, pattern);
        }
        exchange
    }

    #[test]
    fn topic_truth_table() {
        let cases = [
            ("a.*.c", "a.b.c", true),
            ("a.*.c", "a.c", false),
            ("a.*.c", "a.b.b.c", false),
            ("a.#", "a", true),
            ("a.#", "a.b", true),
            ("a.#", "a.b.c", true),
            ("a.*", "a.b.c", false),
            ("a.*", "a.b", true),
            ("#", "", true),
            ("#", "x.y.z", true),
            ("a.#.z", "a.z", true),
            ("a.#.z", "a.b.c.z", true),
            ("a.#.z", "a.b.c", false),
            ("#.#", "a.b", true),
            ("*", "", true),
            ("a.b", "a.b.c", false),
            ("health.*.metrics", "health.device.metrics", true),
            ("health.*.metrics", "health.metrics", false),
            ("health.*.metrics", "health.device.sub.metrics", false),
            ("health.#", "health", true),
            ("health.#", "health.sleep.nightly", true),
        ];

        for (pattern, key, expected) in cases {
            assert_eq!(
                topic_matches(pattern, key),
                expected,
                "pattern `{}` against `{}`",
                pattern,
                key
            );
        }
    }

    #[test]
    fn many_multi_word_wildcards_match_quickly() {
        let pattern = format!("{}.b", vec!["#.a"; 12].join("."));
        let key = vec!["a"; 60].join(".");

        let started = std::time::Instant::now();
        assert!(!topic_matches(&pattern, &key));
        assert!(topic_matches(&pattern, &format!("{}.b", key)));
        assert!(started.elapsed() < std::time::Duration::from_secs(1));
    }

    #[test]
    fn direct_requires_exact_key() {
        let ex = exchange(ExchangeDefinition::new("d"), &[("q1", "x"), ("q2", "x.y")]);

        assert_eq!(route(&ex, "x"), vec!["q1".to_owned()]);
        assert!(route(&ex, "y").is_empty());
        assert!(route(&ex, "x.*").is_empty());
    }

    #[test]
    fn fanout_ignores_routing_key() {
        let ex = exchange(
            ExchangeDefinition::new("f").fanout(),
            &[("q1", ""), ("q2", "anything"), ("q3", "#")],
        );

        assert_eq!(route(&ex, "whatever"), vec!["q1", "q2", "q3"]);
    }

    #[test]
    fn headers_falls_back_to_fanout() {
        let ex = exchange(ExchangeDefinition::new("h").headers(), &[("q1", "a"), ("q2", "b")]);
        assert_eq!(route(&ex, "c"), vec!["q1", "q2"]);
    }

    #[test]
    fn duplicate_bindings_fire_independently() {
        let ex = exchange(
            ExchangeDefinition::new("t").topic(),
            &[("q1", "health.*"), ("q1", "health.*"), ("q2", "vitals.#")],
        );

        assert_eq!(route(&ex, "health.sleep"), vec!["q1", "q1"]);
    }
}
