use crate::atom::AtomId;

/// Receives the atoms the table reports as roots during a collection.
pub trait Tracer {
    fn trace_root(&mut self, atom: AtomId, kind: &'static str);
}

/// The collector's view of which atoms are still reachable. Consulted for
/// every unpinned entry a sweep visits; the answer must be stable for the
/// duration of one sweep cycle.
pub trait Liveness {
    fn is_reachable(&self, atom: AtomId) -> bool;
}

impl<F: Fn(AtomId) -> bool> Liveness for F {
    fn is_reachable(&self, atom: AtomId) -> bool {
        self(atom)
    }
}
