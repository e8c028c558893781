use crate::trace::{SpanId, TraceId};
use rand::{rngs::SmallRng, Rng, SeedableRng};
use std::cell::RefCell;
use std::fmt;

/// Generates trace and span ids for new spans.
pub trait IdGenerator: Send + Sync + fmt::Debug {
    /// Generate a new `TraceId`.
    fn new_trace_id(&self) -> TraceId;

    /// Generate a new `SpanId`.
    fn new_span_id(&self) -> SpanId;
}

/// Default [`IdGenerator`] using random ids.
///
/// Ids are drawn from a per-thread PRNG seeded from the OS, so concurrent
/// threads never contend on a shared generator.
#[derive(Clone, Debug, Default)]
pub struct RandomIdGenerator {
    _private: (),
}

impl IdGenerator for RandomIdGenerator {
    fn new_trace_id(&self) -> TraceId {
        CURRENT_RNG.with(|rng| TraceId::from(rng.borrow_mut().random::<u128>()))
    }

    fn new_span_id(&self) -> SpanId {
        CURRENT_RNG.with(|rng| SpanId::from(rng.borrow_mut().random::<u64>()))
    }
}

thread_local! {
    /// Store random number generator for each thread
    static CURRENT_RNG: RefCell<SmallRng> = RefCell::new(SmallRng::from_os_rng());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_ids_are_valid_and_distinct() {
        let generator = RandomIdGenerator::default();
        let trace_ids: Vec<_> = (0..32).map(|_| generator.new_trace_id()).collect();
        let span_ids: Vec<_> = (0..32).map(|_| generator.new_span_id()).collect();
        assert!(trace_ids.iter().all(|id| *id != TraceId::INVALID));
        assert!(span_ids.iter().all(|id| *id != SpanId::INVALID));
        // 32 draws from a 128-bit space colliding would indicate a broken rng
        let mut deduped = trace_ids.clone();
        deduped.sort();
        deduped.dedup();
        assert_eq!(deduped.len(), trace_ids.len());
    }
}
