use std::sync::Arc;

use rand::Rng;

use crate::credentials::Credential;

/// How a virtual user picks the identity it acts as on each iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, strum::Display, strum::EnumString)]
#[strum(serialize_all = "camelCase")]
pub enum UserSelection {
    /// Uniformly random credential per iteration.
    #[default]
    Random,
    /// VU `n` always acts as credential `(n - 1) % len`.
    RoundRobin,
    /// Each VU walks the credentials in order: its iteration `i` acts as
    /// credential `i % len`.
    Iteration,
}

/// The loaded credential set plus the user/peer selection policy.
#[derive(Debug, Clone)]
pub struct Identities {
    creds: Arc<[Credential]>,
    selection: UserSelection,
    exclude_self: bool,
}

impl Default for Identities {
    fn default() -> Self {
        Self::new(Vec::new(), UserSelection::default(), true)
    }
}

impl Identities {
    pub fn new(creds: Vec<Credential>, selection: UserSelection, exclude_self: bool) -> Self {
        Self {
            creds: Arc::from(creds.into_boxed_slice()),
            selection,
            exclude_self,
        }
    }

    pub fn len(&self) -> usize {
        self.creds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.creds.is_empty()
    }

    pub fn get(&self, idx: usize) -> Option<&Credential> {
        self.creds.get(idx)
    }

    pub fn exclude_self(&self) -> bool {
        self.exclude_self
    }

    pub fn pick_user<R: Rng + ?Sized>(&self, vu: u64, iter: u64, rng: &mut R) -> Option<usize> {
        let len = self.creds.len();
        if len == 0 {
            return None;
        }
        Some(match self.selection {
            UserSelection::Random => rng.gen_range(0..len),
            UserSelection::RoundRobin => (vu.saturating_sub(1) % len as u64) as usize,
            UserSelection::Iteration => (iter % len as u64) as usize,
        })
    }

    /// Picks a transfer counterpart uniformly. With self-exclusion enabled the
    /// acting user is never returned, so a single-credential set yields `None`.
    pub fn pick_peer<R: Rng + ?Sized>(&self, user: Option<usize>, rng: &mut R) -> Option<usize> {
        let len = self.creds.len();
        match user {
            Some(me) if self.exclude_self => {
                if len < 2 {
                    return None;
                }
                let idx = rng.gen_range(0..len - 1);
                Some(if idx >= me { idx + 1 } else { idx })
            }
            _ if len == 0 => None,
            _ => Some(rng.gen_range(0..len)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    fn creds(n: usize) -> Vec<Credential> {
        (0..n)
            .map(|i| Credential {
                username: format!("user{i}"),
                password: "pw".to_string(),
            })
            .collect()
    }

    #[test]
    fn peer_selection_is_uniform_over_others() {
        let ids = Identities::new(creds(5), UserSelection::Random, true);
        let mut rng = StdRng::seed_from_u64(7);
        let mut counts = [0u32; 5];
        for _ in 0..40_000 {
            let peer = ids
                .pick_peer(Some(2), &mut rng)
                .unwrap_or_else(|| panic!("no peer"));
            counts[peer] += 1;
        }

        assert_eq!(counts[2], 0);
        for (idx, c) in counts.iter().enumerate().filter(|(i, _)| *i != 2) {
            assert!((9_500..=10_500).contains(c), "peer {idx} drawn {c} times");
        }
    }

    #[test]
    fn peer_selection_without_exclusion_can_pick_self() {
        let ids = Identities::new(creds(4), UserSelection::Random, false);
        let mut rng = StdRng::seed_from_u64(11);
        let mut counts = [0u32; 4];
        for _ in 0..40_000 {
            let peer = ids
                .pick_peer(Some(0), &mut rng)
                .unwrap_or_else(|| panic!("no peer"));
            counts[peer] += 1;
        }
        for c in counts {
            assert!((9_500..=10_500).contains(&c), "counts={counts:?}");
        }
    }

    #[test]
    fn single_identity_has_no_peer_when_excluding_self() {
        let ids = Identities::new(creds(1), UserSelection::Random, true);
        let mut rng = StdRng::seed_from_u64(1);
        assert_eq!(ids.pick_user(1, 0, &mut rng), Some(0));
        assert_eq!(ids.pick_peer(Some(0), &mut rng), None);
        assert_eq!(Identities::default().pick_user(1, 0, &mut rng), None);
    }

    #[test]
    fn round_robin_maps_vu_to_fixed_identity() {
        let ids = Identities::new(creds(3), UserSelection::RoundRobin, true);
        let mut rng = StdRng::seed_from_u64(3);
        let picks: Vec<_> = (1..=5).map(|vu| ids.pick_user(vu, 9, &mut rng)).collect();
        assert_eq!(picks, vec![Some(0), Some(1), Some(2), Some(0), Some(1)]);
        assert_eq!("roundRobin".parse::<UserSelection>().ok(), Some(UserSelection::RoundRobin));
    }

    #[test]
    fn iteration_selection_alternates_between_two_users() {
        let ids = Identities::new(creds(2), UserSelection::Iteration, true);
        let mut rng = StdRng::seed_from_u64(5);
        let pairs: Vec<_> = (0..4)
            .map(|iter| {
                let user = ids.pick_user(7, iter, &mut rng);
                (user, ids.pick_peer(user, &mut rng))
            })
            .collect();
        assert_eq!(
            pairs,
            vec![
                (Some(0), Some(1)),
                (Some(1), Some(0)),
                (Some(0), Some(1)),
                (Some(1), Some(0)),
            ]
        );
        assert_eq!("iteration".parse::<UserSelection>().ok(), Some(UserSelection::Iteration));
    }
}
