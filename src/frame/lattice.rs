//! The join-semilattice that abstract values must form for the worklist
//! driver to reach a fixed point.

/// A join-semilattice with a distinguished `top` (over-approximation)
/// element.
///
/// The base `AbstractInterpreter` hooks all return `T::top()`; concrete
/// analyses refine by overriding the `Transfer<T>` methods they care about
/// and joining with more precise values. `join` must be monotone and `T`
/// must have finite height for the worklist to terminate.
pub trait Lattice: Sized {
    /// The over-approximation element: "could be anything".
    fn top() -> Self;

    /// Joins two values, producing an upper bound of both in the lattice
    /// order.
    fn join(&self, other: &Self) -> Self;
}

/// The trivial one-point lattice: every value is `top` and joining is the
/// identity. This is the lattice `TopAnalysis` runs over; it always reaches
/// a fixed point in one iteration per block.
impl Lattice for () {
    fn top() -> Self {}

    fn join(&self, (): &Self) -> Self {}
}
