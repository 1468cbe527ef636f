use crate::{
    binding::Binding,
    error::{Error, Result},
    import::LbScheme,
    object::ObjectKey,
};
use rand::Rng;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Picks a binding for each new connection to an import.
///
/// A balancer is immutable with respect to its binding set: when the set of live bindings
/// changes shape, a new balancer is built rather than patching this one.
#[derive(Debug)]
pub struct LoadBalancer {
    import: ObjectKey,
    scheme: LbScheme,
    bindings: Vec<Binding>,
    cursor: AtomicUsize,
}

/// Selects a binding for a new connection to the named import.
pub trait SelectBinding {
    fn select(&self, import: &ObjectKey) -> Result<Binding>;
}

impl LoadBalancer {
    /// Builds a balancer over live bindings, which must be in declared source order.
    pub fn new(import: ObjectKey, scheme: LbScheme, bindings: Vec<Binding>) -> Self {
        debug_assert!(
            bindings.windows(2).all(|w| w[0].source < w[1].source),
            "bindings must be in declared order"
        );
        Self {
            scheme: scheme.effective(bindings.len()),
            import,
            bindings,
            cursor: AtomicUsize::new(0),
        }
    }

    /// The scheme in effect, with the default resolved.
    pub fn scheme(&self) -> LbScheme {
        self.scheme
    }

    pub fn bindings(&self) -> &[Binding] {
        &self.bindings
    }

    pub fn select(&self) -> Result<&Binding> {
        if self.bindings.is_empty() {
            return Err(Error::NoLiveBinding(self.import.clone()));
        }

        let idx = match self.scheme {
            LbScheme::Static | LbScheme::Default => 0,
            LbScheme::Ecmp => self.cursor.fetch_add(1, Ordering::Relaxed) % self.bindings.len(),
            LbScheme::Random => rand::thread_rng().gen_range(0..self.bindings.len()),
        };
        Ok(&self.bindings[idx])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::peer::PeerStatus;
    use ahash::AHashMap as HashMap;

    fn mk_bindings(peers: &[&str]) -> Vec<Binding> {
        peers
            .iter()
            .enumerate()
            .map(|(source, peer)| Binding {
                import: ObjectKey::import("ns-0", "reviews"),
                source,
                peer: peer.to_string(),
                export: ObjectKey::export("ns-0", "reviews"),
                peer_status: PeerStatus::Reachable,
            })
            .collect()
    }

    fn counts(lb: &LoadBalancer, n: usize) -> HashMap<String, usize> {
        let mut counts = HashMap::new();
        for _ in 0..n {
            let b = lb.select().expect("bindings must be live");
            *counts.entry(b.peer.clone()).or_default() += 1;
        }
        counts
    }

    #[test]
    fn no_bindings_fails() {
        let lb = LoadBalancer::new(ObjectKey::import("ns-0", "reviews"), LbScheme::Ecmp, vec![]);
        assert!(matches!(lb.select(), Err(Error::NoLiveBinding(_))));
    }

    #[test]
    fn static_always_picks_first() {
        let lb = LoadBalancer::new(
            ObjectKey::import("ns-0", "reviews"),
            LbScheme::Static,
            mk_bindings(&["p1", "p2", "p3"]),
        );
        for _ in 0..100 {
            assert_eq!(lb.select().unwrap().peer, "p1");
        }
    }

    #[test]
    fn ecmp_is_fair() {
        let lb = LoadBalancer::new(
            ObjectKey::import("ns-0", "reviews"),
            LbScheme::Ecmp,
            mk_bindings(&["p1", "p2", "p3"]),
        );
        let counts = counts(&lb, 3000);
        assert_eq!(counts.len(), 3);
        for (peer, n) in counts {
            assert!((900..=1100).contains(&n), "{peer} selected {n} times");
        }
    }

    #[test]
    fn random_reaches_every_binding() {
        let lb = LoadBalancer::new(
            ObjectKey::import("ns-0", "reviews"),
            LbScheme::Random,
            mk_bindings(&["p1", "p2", "p3"]),
        );
        let counts = counts(&lb, 3000);
        assert_eq!(counts.len(), 3);
        for (peer, n) in counts {
            assert!((850..=1150).contains(&n), "{peer} selected {n} times");
        }
    }

    #[test]
    fn default_scheme_spreads_multiple_bindings() {
        let single = LoadBalancer::new(
            ObjectKey::import("ns-0", "reviews"),
            LbScheme::Default,
            mk_bindings(&["p1"]),
        );
        assert_eq!(single.scheme(), LbScheme::Static);

        let multi = LoadBalancer::new(
            ObjectKey::import("ns-0", "reviews"),
            LbScheme::Default,
            mk_bindings(&["p1", "p2"]),
        );
        assert_eq!(multi.scheme(), LbScheme::Ecmp);
        assert_eq!(counts(&multi, 10).len(), 2);
    }
}
