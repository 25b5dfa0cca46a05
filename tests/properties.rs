use proptest::prelude::*;
use proxy_sieve::{Candidate, CandidateSet, ProxyParser};
use std::collections::HashSet;

fn octet_ok(part: &str) -> bool {
    part.parse::<u32>().map_or(false, |n| n <= 255)
}

fn assert_valid(candidate: &Candidate) {
    let octets: Vec<&str> = candidate.host.split('.').collect();
    assert_eq!(octets.len(), 4, "bad host {}", candidate.host);
    assert!(octets.iter().all(|o| octet_ok(o)), "bad host {}", candidate.host);
    assert!(candidate.port >= 1);
}

proptest! {
    #[test]
    fn extracted_candidates_are_always_valid(text in r"[0-9.: a-z/@\n]{0,400}") {
        for candidate in ProxyParser::extract(&text).iter() {
            assert_valid(candidate);
        }
    }

    #[test]
    fn address_like_noise_never_yields_invalid_candidates(
        parts in prop::collection::vec((0u32..1000, 0u32..1000, 0u32..1000, 0u32..1000, 0u32..100_000), 0..30)
    ) {
        let text = parts
            .iter()
            .map(|(a, b, c, d, port)| format!("{}.{}.{}.{}:{}", a, b, c, d, port))
            .collect::<Vec<_>>()
            .join(" ");

        let candidates = ProxyParser::extract(&text);
        for candidate in candidates.iter() {
            assert_valid(candidate);
        }

        let expected: HashSet<String> = parts
            .iter()
            .filter(|(a, b, c, d, port)| {
                [a, b, c, d].iter().all(|o| **o <= 255) && (1..=65535).contains(port)
            })
            .map(|(a, b, c, d, port)| format!("{}.{}.{}.{}:{}", a, b, c, d, port))
            .collect();
        let found: HashSet<String> = candidates.iter().map(|c| c.identity()).collect();
        prop_assert_eq!(found, expected);
    }

    #[test]
    fn zero_padded_octets_collapse_to_one_candidate(
        octets in prop::array::uniform4(0u8..=255),
        port in 1u16..=65535,
    ) {
        let plain = format!("{}.{}.{}.{}:{}", octets[0], octets[1], octets[2], octets[3], port);
        let padded = octets
            .iter()
            .map(|o| format!("{:03}", o))
            .collect::<Vec<_>>()
            .join(".");
        let text = format!("{} {}:{}", plain, padded, port);

        let candidates = ProxyParser::extract(&text);
        prop_assert_eq!(candidates.len(), 1);
        prop_assert_eq!(candidates.as_slice()[0].identity(), plain);
    }

    #[test]
    fn extraction_is_idempotent(text in r"(([0-9]{1,3}\.){3}[0-9]{1,3}:[0-9]{1,5}|socks5://|http://| |\n|x){0,60}") {
        let first = ProxyParser::extract(&text);
        let second = ProxyParser::extract(&text);
        prop_assert_eq!(first.as_slice(), second.as_slice());
    }

    #[test]
    fn candidate_sets_hold_unique_identities(
        entries in prop::collection::vec((0u8..4, 1u16..6), 0..50)
    ) {
        let set: CandidateSet = entries
            .iter()
            .map(|(host, port)| Candidate::new(format!("10.0.0.{}", host), *port))
            .collect();

        let identities: Vec<String> = set.iter().map(|c| c.identity()).collect();
        let unique: HashSet<&String> = identities.iter().collect();
        prop_assert_eq!(unique.len(), identities.len());

        let distinct: HashSet<(u8, u16)> = entries.iter().copied().collect();
        prop_assert_eq!(set.len(), distinct.len());
    }
}
